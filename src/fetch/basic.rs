use std::time::Duration;

use super::client::HttpClient;
use async_trait::async_trait;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Plain `reqwest` client.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    /// `timeout` bounds a whole request; `None` leaves only the connect timeout.
    pub fn new(timeout: Option<Duration>) -> reqwest::Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self(builder.build()?))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
