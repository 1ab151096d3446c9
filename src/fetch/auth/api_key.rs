use crate::error::ConfigError;
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The header name and value are validated once at construction, so a client
/// that exists can always authenticate its requests.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    /// Sends `value` verbatim in the `header_name` header.
    pub fn new(inner: C, header_name: &str, value: &str) -> Result<Self, ConfigError> {
        let header_name =
            HeaderName::from_bytes(header_name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
                name: header_name.to_string(),
                reason: e.to_string(),
            })?;
        let mut value = HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
            name: header_name.to_string(),
            reason: e.to_string(),
        })?;
        value.set_sensitive(true);

        Ok(Self {
            inner,
            header_name,
            value,
        })
    }

    /// `Authorization: apikey <key>`, the scheme used by the NSW open data
    /// APIs. An empty key is rejected.
    pub fn apikey(inner: C, key: &str) -> Result<Self, ConfigError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Self::new(inner, AUTHORIZATION.as_str(), &format!("apikey {key}"))
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the headers of every request and answers 200.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<reqwest::header::HeaderMap>>,
    }

    #[async_trait]
    impl HttpClient for Recorder {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            self.seen.lock().unwrap().push(req.headers().clone());
            let resp = axum::http::Response::builder()
                .status(200)
                .body(Vec::<u8>::new())
                .unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }

    fn request() -> reqwest::Request {
        reqwest::Request::new(reqwest::Method::GET, "http://localhost/feed".parse().unwrap())
    }

    #[tokio::test]
    async fn test_apikey_sets_authorization_header() {
        let client = ApiKey::apikey(Recorder::default(), "secret").unwrap();
        client.execute(request()).await.unwrap();

        let seen = client.inner.seen.lock().unwrap();
        assert_eq!(seen[0].get(AUTHORIZATION).unwrap(), "apikey secret");
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let result = ApiKey::apikey(Recorder::default(), "");
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_invalid_header_value_is_rejected() {
        let result = ApiKey::new(Recorder::default(), "Authorization", "bad\nvalue");
        assert!(matches!(result, Err(ConfigError::InvalidHeader { .. })));
    }

    #[test]
    fn test_invalid_header_name_is_rejected() {
        let result = ApiKey::new(Recorder::default(), "bad header", "value");
        assert!(matches!(result, Err(ConfigError::InvalidHeader { .. })));
    }
}
