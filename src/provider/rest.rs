//! HTTP client for the historical search API.
//!
//! Authentication is the app-auth token exchange: consumer key and secret
//! are traded for a bearer token once at startup, and the token rides on
//! every request as a default header.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Credentials;
use crate::models::{MalformedPost, Post};
use crate::provider::{ProviderError, SearchClient};

const DEFAULT_API_BASE: &str = "https://api.poststash.dev/v1";

/// API base URL, overridable via `POSTSTASH_API_URL`.
pub fn api_base() -> String {
    std::env::var("POSTSTASH_API_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    posts: Vec<Value>,
}

impl ApiClient {
    /// Exchange credentials for a bearer token and build the client.
    ///
    /// A non-success token response is `ProviderError::Auth` and should be
    /// surfaced immediately; there is no point retrying bad credentials.
    pub async fn connect(
        credentials: &Credentials,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.into();

        let bootstrap = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let resp = bootstrap
            .post(format!("{base_url}/oauth2/token"))
            .basic_auth(&credentials.key, Some(&credentials.secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Auth { status, body });
        }

        let token: TokenResponse = resp.json().await?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {}", token.access_token)
                        .parse()
                        .map_err(|_| ProviderError::Auth {
                            status: 0,
                            body: "access token is not a usable header value".to_string(),
                        })?,
                );
                headers
            })
            .build()?;

        Ok(Self {
            client,
            base_url,
            access_token: token.access_token,
        })
    }

    /// Bearer token, for the streaming endpoint which authenticates by URL.
    pub fn token(&self) -> &str {
        &self.access_token
    }
}

#[async_trait::async_trait]
impl SearchClient for ApiClient {
    async fn search_page(
        &self,
        query: &str,
        page_size: u32,
        max_id: Option<u64>,
    ) -> Result<Vec<Post>, ProviderError> {
        let url = format!("{}/posts/search", self.base_url);
        let mut qp: Vec<(String, String)> = Vec::with_capacity(3);
        qp.push(("query".to_string(), query.to_string()));
        qp.push(("limit".to_string(), page_size.to_string()));
        if let Some(bound) = max_id {
            qp.push(("max_id".to_string(), bound.to_string()));
        }

        let resp = self.client.get(url).query(&qp).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let status = status.as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(match status {
                401 | 403 => ProviderError::Auth { status, body },
                429 => ProviderError::RateLimited,
                _ => ProviderError::Http { status, body },
            });
        }

        let page: SearchResponse = resp.json().await?;
        page.posts
            .into_iter()
            .map(Post::from_raw)
            .collect::<Result<Vec<_>, MalformedPost>>()
            .map_err(Into::into)
    }
}
