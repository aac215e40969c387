//! Live subscription: persist matching posts as they are published.

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::provider::stream::RATE_LIMIT_REASON;
use crate::provider::{PostStream, ProviderError, StreamEvent};
use crate::stash::Stash;

/// Consume a live subscription until cancelled, the provider closes it,
/// or a fatal rate-limit disconnect arrives.
///
/// Rate-limit disconnects are surfaced as an error: whether and when to
/// reconnect is the caller's decision, not something to swallow here.
/// Provider-reported errors on a live stream are logged and the loop
/// keeps consuming. Storage failures propagate.
pub async fn run_listen<S: PostStream + ?Sized>(
    stream: &mut S,
    stash: &mut dyn Stash,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                info!("shutdown requested, closing subscription");
                if let Err(e) = stream.close().await {
                    warn!(error = %e, "error closing subscription");
                }
                return Ok(());
            }
            event = stream.next_event() => event?,
        };

        match event {
            StreamEvent::Post(post) => {
                if !stash.put(&post, false)? {
                    debug!(post_id = post.id, "already stashed");
                }
            }
            StreamEvent::ProviderError { message } => {
                warn!(provider_message = %message, "provider error on stream");
            }
            StreamEvent::Disconnect { reason } if reason == RATE_LIMIT_REASON => {
                return Err(ProviderError::RateLimited.into());
            }
            StreamEvent::Disconnect { reason } => {
                warn!(reason, "provider disconnect notice");
            }
            StreamEvent::Closed => {
                info!("subscription closed by provider");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Post;
    use crate::stash::FileStash;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    fn post(id: u64) -> Post {
        Post::from_raw(json!({
            "id": id,
            "author_id": 1,
            "created_at": "2021-01-06T18:40:40Z",
            "text": format!("post {id}")
        }))
        .unwrap()
    }

    /// Scripted stream: yields queued events, then `Closed`.
    struct ScriptedStream {
        events: VecDeque<Result<StreamEvent, ProviderError>>,
        closed: bool,
    }

    impl ScriptedStream {
        fn new(events: Vec<Result<StreamEvent, ProviderError>>) -> Self {
            Self {
                events: events.into(),
                closed: false,
            }
        }
    }

    #[async_trait]
    impl PostStream for ScriptedStream {
        async fn next_event(&mut self) -> Result<StreamEvent, ProviderError> {
            self.events.pop_front().unwrap_or(Ok(StreamEvent::Closed))
        }

        async fn close(&mut self) -> Result<(), ProviderError> {
            self.closed = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn posts_are_persisted_until_close() {
        let mut stream = ScriptedStream::new(vec![
            Ok(StreamEvent::Post(post(1))),
            Ok(StreamEvent::Post(post(2))),
            Ok(StreamEvent::Closed),
        ]);
        let dir = tempdir().unwrap();
        let mut stash = FileStash::open(dir.path(), false, false).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        run_listen(&mut stream, &mut stash, &mut rx).await.unwrap();

        assert!(stash.exists(1));
        assert!(stash.exists(2));
    }

    #[tokio::test]
    async fn provider_errors_do_not_stop_the_loop() {
        let mut stream = ScriptedStream::new(vec![
            Ok(StreamEvent::ProviderError {
                message: "upstream timeout".to_string(),
            }),
            Ok(StreamEvent::Post(post(1))),
            Ok(StreamEvent::Closed),
        ]);
        let dir = tempdir().unwrap();
        let mut stash = FileStash::open(dir.path(), false, false).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        run_listen(&mut stream, &mut stash, &mut rx).await.unwrap();

        assert!(stash.exists(1));
    }

    #[tokio::test]
    async fn rate_limit_disconnect_is_fatal() {
        let mut stream = ScriptedStream::new(vec![
            Ok(StreamEvent::Post(post(1))),
            Ok(StreamEvent::Disconnect {
                reason: RATE_LIMIT_REASON.to_string(),
            }),
        ]);
        let dir = tempdir().unwrap();
        let mut stash = FileStash::open(dir.path(), false, false).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        let err = run_listen(&mut stream, &mut stash, &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::RateLimited)
        ));
        // Everything received before the disconnect is already durable.
        assert!(stash.exists(1));
    }

    #[tokio::test]
    async fn other_disconnect_notices_are_not_fatal() {
        let mut stream = ScriptedStream::new(vec![
            Ok(StreamEvent::Disconnect {
                reason: "server_maintenance".to_string(),
            }),
            Ok(StreamEvent::Post(post(1))),
            Ok(StreamEvent::Closed),
        ]);
        let dir = tempdir().unwrap();
        let mut stash = FileStash::open(dir.path(), false, false).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        run_listen(&mut stream, &mut stash, &mut rx).await.unwrap();

        assert!(stash.exists(1));
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let mut stream = ScriptedStream::new(vec![Err(ProviderError::Stream(
            tokio_tungstenite::tungstenite::Error::ConnectionClosed,
        ))]);
        let dir = tempdir().unwrap();
        let mut stash = FileStash::open(dir.path(), false, false).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        assert!(run_listen(&mut stream, &mut stash, &mut rx).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_posts_are_deduplicated() {
        let mut stream = ScriptedStream::new(vec![
            Ok(StreamEvent::Post(post(9))),
            Ok(StreamEvent::Post(post(9))),
            Ok(StreamEvent::Closed),
        ]);
        let dir = tempdir().unwrap();
        let mut stash = FileStash::open(dir.path(), false, false).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        run_listen(&mut stream, &mut stash, &mut rx).await.unwrap();

        assert_eq!(stash.ids(None).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_the_subscription() {
        // No queued events: the stream would report Closed on the first
        // poll, so flip the shutdown flag before entering the loop.
        let mut stream = ScriptedStream::new(vec![]);
        let dir = tempdir().unwrap();
        let mut stash = FileStash::open(dir.path(), false, false).unwrap();
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        run_listen(&mut stream, &mut stash, &mut rx).await.unwrap();
        assert!(stream.closed);
    }
}
