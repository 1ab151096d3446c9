//! Service configuration.
//!
//! Read from an optional JSON file, then overridden by environment variables
//! (a `.env` file is loaded into the environment by `main`):
//!
//! ```json
//! {
//!   "nsw_public_transport_api": {
//!     "api_key": "…",
//!     "url": "https://api.transport.nsw.gov.au/v2/gtfs/vehiclepos/sydneytrains"
//!   },
//!   "upstream_timeout_secs": 30
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

/// Sydney Trains vehicle positions feed.
pub const DEFAULT_FEED_URL: &str = "https://api.transport.nsw.gov.au/v2/gtfs/vehiclepos/sydneytrains";

pub const API_KEY_ENV: &str = "NSW_PUBLIC_TRANSPORT_API_KEY";
pub const FEED_URL_ENV: &str = "NSW_PUBLIC_TRANSPORT_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NswPublicTransportApi {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub nsw_public_transport_api: NswPublicTransportApi,
    /// Overall deadline for one upstream request. Unset means the transport
    /// default (no deadline beyond the connect timeout).
    #[serde(default)]
    pub upstream_timeout_secs: Option<u64>,
}

impl Configuration {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Loads `path` when it exists (an empty configuration otherwise) and
    /// applies the environment overrides.
    pub fn resolve(path: &str) -> Result<Self, ConfigError> {
        let mut cfg = if Path::new(path).exists() {
            debug!(path, "Loading config file");
            Self::load(path)?
        } else {
            Self::default()
        };
        cfg.apply_env(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV) {
            self.nsw_public_transport_api.api_key = key;
        }
        if let Some(url) = lookup(FEED_URL_ENV) {
            self.nsw_public_transport_api.url = Some(url);
        }
    }

    /// Returns the API key, or [`ConfigError::MissingApiKey`] when it is
    /// absent or blank.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        let key = self.nsw_public_transport_api.api_key.trim();
        if key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(key)
    }

    /// Returns the feed URL (the Sydney Trains feed unless overridden), or
    /// [`ConfigError::InvalidUrl`] when it is not an absolute http(s) URL.
    pub fn feed_url(&self) -> Result<reqwest::Url, ConfigError> {
        let raw = self
            .nsw_public_transport_api
            .url
            .as_deref()
            .unwrap_or(DEFAULT_FEED_URL)
            .trim();
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason,
        };

        let url = raw.parse::<reqwest::Url>().map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(invalid(format!("unsupported scheme '{other}'"))),
        }
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_secs.map(Duration::from_secs)
    }
}
