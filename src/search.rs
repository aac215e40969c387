//! Historical search: paginate backward in time, newest-first, until an
//! age cutoff or provider exhaustion, stashing every post on the way.
//!
//! Batches and pages run strictly sequentially. The provider's rate
//! accounting is stateful per credential, so concurrent requests would
//! fight its limiter instead of cooperating with it.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::provider::SearchClient;
use crate::stash::Stash;

/// Page size for historical queries (provider maximum).
pub const POSTS_PER_PAGE: u32 = 100;

/// Maximum number of OR-combined terms the provider accepts per query.
pub const TERMS_PER_QUERY: usize = 30;

/// Where a historical query stops paginating.
#[derive(Debug, Clone, Copy)]
pub enum StopAfter {
    /// Absolute cutoff; applies to every post including the first.
    At(DateTime<Utc>),
    /// Relative cutoff, anchored to the first returned post's timestamp.
    Within(Duration),
    /// No limit: drain until the provider is exhausted.
    Unbounded,
}

impl StopAfter {
    pub fn days(days: i64) -> Self {
        Self::Within(Duration::days(days))
    }
}

/// Combine one batch of terms into a single OR query.
pub fn batch_query(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("#{t}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Split `terms` into provider-sized batches and run one historical query
/// per batch, in order. A batch that comes back empty does not abort the
/// rest.
pub async fn run_batches<C: SearchClient>(
    client: &C,
    stash: &mut dyn Stash,
    terms: &[String],
    stop: StopAfter,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    for batch in terms.chunks(TERMS_PER_QUERY) {
        if *shutdown.borrow() {
            info!("shutdown requested, skipping remaining batches");
            break;
        }
        let query = batch_query(batch);
        run_query(client, stash, &query, stop, shutdown).await?;
    }
    Ok(())
}

/// Drain the paginated result set for one query.
///
/// Guarantees: never stashes a post strictly older than the stop time,
/// never skips one newer than it, and never requests the same id twice
/// (each page's cursor is the previous page's last id minus one).
///
/// Provider errors end the query gracefully; only storage failures
/// propagate.
pub async fn run_query<C: SearchClient>(
    client: &C,
    stash: &mut dyn Stash,
    query: &str,
    stop: StopAfter,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (mut stop_time, window) = match stop {
        StopAfter::At(t) => (Some(t), Duration::zero()),
        StopAfter::Within(d) => (None, d),
        // Effectively no limit.
        StopAfter::Unbounded => (None, Duration::days(36_500)),
    };

    let mut max_id: Option<u64> = None;
    let mut seen = 0u64;
    let mut saved = 0u64;

    'pages: loop {
        let page = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                info!(query, "shutdown requested, ending search");
                break 'pages;
            }
            page = client.search_page(query, POSTS_PER_PAGE, max_id) => page,
        };

        let page = match page {
            Ok(page) => page,
            Err(e) => {
                warn!(query, error = %e, "search page failed, ending batch");
                break 'pages;
            }
        };
        if page.is_empty() {
            debug!(query, "provider exhausted");
            break 'pages;
        }

        let last_id = page.last().map(|p| p.id);
        for post in page {
            seen += 1;
            // The first post anchors a relative cutoff, so it always falls
            // inside its own window.
            let cutoff = *stop_time.get_or_insert(post.created_at - window);
            if post.created_at < cutoff {
                debug!(query, post_id = post.id, "stop time reached");
                break 'pages;
            }
            if stash.put(&post, false)? {
                saved += 1;
            }
        }

        max_id = last_id.map(|id| id.saturating_sub(1));
    }

    info!(query, seen, saved, "search batch complete");
    Ok(())
}
