//! Remote API clients.
//!
//! The retrieval loops only see the two traits here, so tests drive them
//! with scripted implementations and the wire clients stay swappable.

pub mod rest;
pub mod stream;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{MalformedPost, Post};

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Credential exchange or token rejection. Fatal, never retried.
    #[error("authentication failed ({status}): {body}")]
    Auth { status: u16, body: String },

    /// The provider signalled that this client must disconnect because it
    /// exceeded its rate allowance.
    #[error("provider rate limit exceeded, disconnect required")]
    RateLimited,

    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("stream transport error: {0}")]
    Stream(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("wire encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Malformed(#[from] MalformedPost),
}

/// Paginated historical search access.
#[async_trait]
pub trait SearchClient {
    /// Fetch one page of posts matching `query`, newest-first, with ids
    /// strictly below `max_id` when given. An empty page means the result
    /// set is exhausted.
    async fn search_page(
        &self,
        query: &str,
        page_size: u32,
        max_id: Option<u64>,
    ) -> Result<Vec<Post>, ProviderError>;
}

/// One event received on a live subscription.
#[derive(Debug)]
pub enum StreamEvent {
    Post(Post),
    /// Provider-reported error; the subscription itself is still alive.
    ProviderError { message: String },
    /// Provider notice that it is about to close the connection.
    Disconnect { reason: String },
    /// The provider closed the connection.
    Closed,
}

/// An open live subscription yielding posts until closed.
#[async_trait]
pub trait PostStream {
    async fn next_event(&mut self) -> Result<StreamEvent, ProviderError>;

    async fn close(&mut self) -> Result<(), ProviderError>;
}
