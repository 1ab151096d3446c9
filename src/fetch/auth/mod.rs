//! Credential-injecting [`HttpClient`](super::HttpClient) decorators.

mod api_key;

pub use api_key::ApiKey;
