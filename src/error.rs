//! Error taxonomy.
//!
//! Format and structural failures come out of [`DecodeError`]; query
//! validation and network failures come out of [`ResolveError`].  Neither
//! carries a partially decoded replay.  Conditions the decoder can heal on
//! its own (string resync, unrecognised extension blobs) are logged and never
//! surface here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unexpected end of buffer at offset {offset}: needed {needed} byte(s), buffer is {len}")]
    UnexpectedEof { offset: usize, needed: usize, len: usize },
    #[error("Invalid magic number: {0:#010x}")]
    InvalidMagic(u32),
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),
    #[error("Unknown section tag {tag} at offset {offset}")]
    UnknownSection { tag: u8, offset: usize },
    #[error("Section tag {0} appears more than once")]
    DuplicateSection(u8),
    #[error("Negative {what} length {len} at offset {offset}")]
    NegativeLength { what: &'static str, len: i32, offset: usize },
    #[error("String length never resynchronised after {attempts} attempt(s) starting at offset {offset}")]
    StringResyncExhausted { offset: usize, attempts: usize },
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Query is neither a score id nor a .bsor URL: {0}")]
    InvalidQuery(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        url:    String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },
    #[error("Empty body fetching {url}")]
    EmptyBody { url: String },
    #[error("Score metadata from {url} is not valid JSON: {source}")]
    InvalidMetadata {
        url:    String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Score {score_id} has no replay URL")]
    MissingReplayUrl { score_id: u64 },
    #[error("Score metadata pointed at another score id too many times")]
    RecursionLimit,
}

/// Crate-level error for the combined resolve-then-decode path.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
