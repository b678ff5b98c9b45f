use thiserror::Error;

/// Transport-level failure while fetching a URL.
///
/// Non-200 responses are not errors; they come back as a `FetchResult`
/// without a body.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Fetch failures never end a walk; they are skipped and counted.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("walk cancelled")]
    Cancelled,
}
