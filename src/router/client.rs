//! HTTP client for the router's admin API.
//!
//! The session manager keeps the router's route table in sync with container
//! lifecycle through this client. It is a trait so tests can substitute an
//! in-process router.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Result type for router admin calls.
pub type RouterClientResult<T> = Result<T, RouterClientError>;

/// Errors from the router admin API.
#[derive(Debug, Error)]
pub enum RouterClientError {
    /// The router could not be reached at all.
    #[error("router unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    /// The router answered with a non-success status.
    #[error("router rejected request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
}

/// Admin-side view of the router.
#[async_trait]
pub trait RouterApi: Send + Sync {
    /// Upsert the route for a session (idempotent).
    async fn put_route(&self, session_id: &str, upstream: &str) -> RouterClientResult<()>;
    /// Remove the route for a session (idempotent, missing is not an error).
    async fn delete_route(&self, session_id: &str) -> RouterClientResult<()>;
    /// List all registered routes.
    async fn list_routes(&self) -> RouterClientResult<BTreeMap<String, String>>;
}

/// Client speaking to a router process over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRouterClient {
    client: Client,
    base_url: String,
    admin_token: String,
}

impl HttpRouterClient {
    /// Create a new router client.
    pub fn new(base_url: impl Into<String>, admin_token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            admin_token: admin_token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check(&self, url: &str, response: reqwest::Response) -> RouterClientResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RouterClientError::Rejected {
            status,
            message: format!("{}: {}", url, body),
        })
    }
}

#[async_trait]
impl RouterApi for HttpRouterClient {
    async fn put_route(&self, session_id: &str, upstream: &str) -> RouterClientResult<()> {
        let url = self.url(&format!("/admin/sessions/{}", session_id));
        let response = self
            .client
            .put(&url)
            .header("Authorization", format!("Bearer {}", self.admin_token))
            .json(&json!({ "upstream": upstream }))
            .send()
            .await
            .map_err(|e| RouterClientError::Unreachable {
                url: url.clone(),
                message: e.to_string(),
            })?;

        self.check(&url, response).await?;
        Ok(())
    }

    async fn delete_route(&self, session_id: &str) -> RouterClientResult<()> {
        let url = self.url(&format!("/admin/sessions/{}", session_id));
        let response = self
            .client
            .delete(&url)
            .header("Authorization", format!("Bearer {}", self.admin_token))
            .send()
            .await
            .map_err(|e| RouterClientError::Unreachable {
                url: url.clone(),
                message: e.to_string(),
            })?;

        self.check(&url, response).await?;
        Ok(())
    }

    async fn list_routes(&self) -> RouterClientResult<BTreeMap<String, String>> {
        let url = self.url("/admin/sessions");
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.admin_token))
            .send()
            .await
            .map_err(|e| RouterClientError::Unreachable {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let response = self.check(&url, response).await?;
        response
            .json()
            .await
            .map_err(|e| RouterClientError::Unreachable {
                url,
                message: format!("invalid route listing: {}", e),
            })
    }
}
