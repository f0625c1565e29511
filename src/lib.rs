pub mod analytics;
pub mod cursor;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod extensions;
pub mod merge;
pub mod model;
pub mod transport;

pub use analytics::{AnalyticsOptions, DecodedReplayResponse};
pub use decoder::{decode, decode_many, decode_with, DecodeOptions};
pub use encoder::encode;
pub use error::{DecodeError, Error, ResolveError, Result};
pub use model::Replay;
pub use transport::{Fetch, Resolver, ResolverConfig};

/// Resolve `query`, decode the bytes, and compute the analytics.
pub async fn load<F: Fetch>(
    resolver:       &Resolver<F>,
    query:          &str,
    decode_opts:    &DecodeOptions,
    analytics_opts: &AnalyticsOptions,
) -> Result<DecodedReplayResponse> {
    let bytes = resolver.resolve(query).await?;
    let replay = decode_with(&bytes, decode_opts)?;
    Ok(DecodedReplayResponse::from_replay(replay, analytics_opts))
}
