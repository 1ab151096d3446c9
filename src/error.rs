//! Error types shared by the fetch pipeline and the delivery adapters.

use thiserror::Error;

/// Failure of one fetch-decode-transform cycle.
///
/// `Clone` because a single refresh outcome is handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The upstream could not be reached or the body could not be read.
    #[error("network error: {0}")]
    Network(String),

    /// The upstream answered with a non-success status.
    #[error("upstream returned status {status}")]
    Upstream { status: u16 },

    /// The payload is not a valid GTFS-RT `FeedMessage`.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The refresh task panicked or was aborted before producing a result.
    #[error("refresh aborted: {0}")]
    RefreshAborted(String),
}

impl From<prost::DecodeError> for FeedError {
    fn from(err: prost::DecodeError) -> Self {
        FeedError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Serialization(err.to_string())
    }
}

/// Startup configuration problems. Fatal: the server never starts with these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API key set for the NSW public transport API")]
    MissingApiKey,

    #[error("invalid feed url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to read config file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}'")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
