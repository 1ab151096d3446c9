use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes one outbound HTTP request.
///
/// Decorators such as [`ApiKey`](super::auth::ApiKey) wrap another client to
/// add credentials before delegating.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
