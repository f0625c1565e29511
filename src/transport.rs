//! Turn a user query into replay bytes.
//!
//! A query is either a decimal score id or an `http(s)` URL whose path ends
//! in `.bsor`.  Anything else is rejected before any request is made.
//!
//! - Score id: fetch `{api_base}/score/{id}`, read its `replay` field, and
//!   resolve that in turn.
//! - URL: apply the configured CDN prefix rewrites, then fetch the bytes.
//!
//! The two fetches are strictly sequential.  Timeouts belong to the
//! [`Fetch`] implementation; there is no retry here.

use std::future::Future;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ResolveError;

pub const DEFAULT_API_BASE: &str = "https://api.beatleader.xyz";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub api_base:       String,
    /// `(from_prefix, to_prefix)` pairs applied to replay URLs before fetching.
    pub cdn_rewrites:   Vec<(String, String)>,
    pub timeout:        Duration,
    /// How many score-id indirections a single query may follow.
    pub max_score_hops: u8,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            api_base:       DEFAULT_API_BASE.to_string(),
            cdn_rewrites:   vec![(
                "https://cdn.discordapp.com/".to_string(),
                "https://discord.beatleader.pro/".to_string(),
            )],
            timeout:        DEFAULT_TIMEOUT,
            max_score_hops: 2,
        }
    }
}

// ── Query ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    ScoreId(u64),
    Url(Url),
}

impl Query {
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let raw = raw.trim();
        if let Ok(id) = raw.parse::<u64>() {
            return Ok(Query::ScoreId(id));
        }
        match Url::parse(raw) {
            Ok(url)
                if matches!(url.scheme(), "http" | "https") && url.path().ends_with(".bsor") =>
            {
                Ok(Query::Url(url))
            }
            _ => Err(ResolveError::InvalidQuery(raw.to_string())),
        }
    }
}

// ── Fetch ────────────────────────────────────────────────────────────────────

/// HTTP GET returning the response body.  Non-success statuses are errors.
pub trait Fetch {
    fn get_bytes(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ResolveError>> + Send;
}

/// [`Fetch`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(config: &ResolverConfig) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("bsor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ResolveError::Client)?;
        Ok(Self { client })
    }
}

impl Fetch for ReqwestFetcher {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        let http = |source| ResolveError::Http { url: url.to_string(), source };
        let response = self.client.get(url).send().await.map_err(http)?;
        if !response.status().is_success() {
            return Err(ResolveError::Status {
                url:    url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let body = response.bytes().await.map_err(http)?;
        Ok(body.to_vec())
    }
}

// ── Resolver ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ScoreMetadata {
    #[serde(default)]
    replay: Option<String>,
}

pub struct Resolver<F> {
    fetcher: F,
    config:  ResolverConfig,
}

impl Resolver<ReqwestFetcher> {
    pub fn with_reqwest(config: ResolverConfig) -> Result<Self, ResolveError> {
        Ok(Self::new(ReqwestFetcher::new(&config)?, config))
    }
}

impl<F: Fetch> Resolver<F> {
    pub fn new(fetcher: F, config: ResolverConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn rewrite_url(&self, url: &str) -> String {
        for (from, to) in &self.config.cdn_rewrites {
            if let Some(rest) = url.strip_prefix(from.as_str()) {
                return format!("{to}{rest}");
            }
        }
        url.to_string()
    }

    pub fn score_url(&self, score_id: u64) -> String {
        format!("{}/score/{}", self.config.api_base.trim_end_matches('/'), score_id)
    }

    async fn fetch_nonempty(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        let body = self.fetcher.get_bytes(url).await?;
        if body.is_empty() {
            return Err(ResolveError::EmptyBody { url: url.to_string() });
        }
        Ok(body)
    }

    /// Look up the replay URL recorded for a score.
    pub async fn replay_url_for(&self, score_id: u64) -> Result<String, ResolveError> {
        let url = self.score_url(score_id);
        info!(score_id, %url, "fetching score metadata");
        let body = self.fetch_nonempty(&url).await?;
        let meta: ScoreMetadata = serde_json::from_slice(&body)
            .map_err(|source| ResolveError::InvalidMetadata { url: url.clone(), source })?;
        meta.replay
            .filter(|r| !r.trim().is_empty())
            .ok_or(ResolveError::MissingReplayUrl { score_id })
    }

    pub async fn resolve(&self, query: &str) -> Result<Vec<u8>, ResolveError> {
        let mut current = query.trim().to_string();
        for _ in 0..=self.config.max_score_hops {
            match Query::parse(&current)? {
                Query::ScoreId(id) => {
                    current = self.replay_url_for(id).await?;
                    debug!(score_id = id, replay = %current, "score resolved");
                }
                Query::Url(url) => {
                    let target = self.rewrite_url(url.as_str());
                    info!(url = %target, "fetching replay");
                    let bytes = self.fetch_nonempty(&target).await?;
                    info!(url = %target, bytes = bytes.len(), "fetched replay");
                    return Ok(bytes);
                }
            }
        }
        Err(ResolveError::RecursionLimit)
    }
}
