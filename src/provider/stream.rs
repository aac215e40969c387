//! WebSocket client for the live subscription feed.
//!
//! Endpoint: `<stream base>/<TOKEN>` (token in the URL path). After the
//! upgrade a single subscribe frame carries the filter terms; everything
//! after that is a JSON text frame per event.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::models::Post;
use crate::provider::{PostStream, ProviderError, StreamEvent};

const DEFAULT_STREAM_BASE: &str = "wss://stream.poststash.dev/v1";

/// Stream base URL, overridable via `POSTSTASH_STREAM_URL`.
pub fn stream_base() -> String {
    std::env::var("POSTSTASH_STREAM_URL").unwrap_or_else(|_| DEFAULT_STREAM_BASE.to_string())
}

/// Disconnect reason sent when the provider force-closes a client that
/// exceeded its rate allowance. Fatal to the listen loop.
pub const RATE_LIMIT_REASON: &str = "rate_limit";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeMessage {
    pub action: String, // "subscribe"
    pub filters: SubscribeFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeFilters {
    pub terms: Vec<String>,
}

/// Wire shape of one text frame from the provider.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Post { data: Value },
    Error { message: String },
    Disconnect { reason: String },
}

pub struct WsPostStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsPostStream {
    /// Connect, authenticate via the URL path, and subscribe to `terms`.
    pub async fn connect(
        token: &str,
        base_url: &str,
        terms: &[String],
    ) -> Result<Self, ProviderError> {
        // Token goes in the path; never log the full URL.
        let url = format!("{base_url}/{token}");
        debug!(endpoint = base_url, "connecting to stream");

        let (mut ws, response) = connect_async(&url).await?;
        debug!(status = %response.status(), "stream connected");

        let subscribe = SubscribeMessage {
            action: "subscribe".to_string(),
            filters: SubscribeFilters {
                terms: terms.to_vec(),
            },
        };
        ws.send(Message::Text(serde_json::to_string(&subscribe)?))
            .await?;

        Ok(Self { ws })
    }
}

#[async_trait]
impl PostStream for WsPostStream {
    async fn next_event(&mut self) -> Result<StreamEvent, ProviderError> {
        loop {
            let Some(message) = self.ws.next().await else {
                return Ok(StreamEvent::Closed);
            };

            match message? {
                Message::Text(text) => match serde_json::from_str::<WireEvent>(&text) {
                    Ok(WireEvent::Post { data }) => match Post::from_raw(data) {
                        Ok(post) => return Ok(StreamEvent::Post(post)),
                        Err(e) => warn!(error = %e, "skipping malformed post"),
                    },
                    Ok(WireEvent::Error { message }) => {
                        return Ok(StreamEvent::ProviderError { message })
                    }
                    Ok(WireEvent::Disconnect { reason }) => {
                        return Ok(StreamEvent::Disconnect { reason })
                    }
                    // Subscription acks and other control frames.
                    Err(_) => debug!(frame = %text, "ignoring control frame"),
                },
                Message::Ping(payload) => {
                    self.ws.send(Message::Pong(payload)).await?;
                }
                Message::Pong(_) => {}
                Message::Close(frame) => {
                    debug!(?frame, "stream closed by provider");
                    return Ok(StreamEvent::Closed);
                }
                Message::Binary(data) => {
                    warn!(bytes = data.len(), "unexpected binary frame");
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        self.ws.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_message_serializes() {
        let msg = SubscribeMessage {
            action: "subscribe".to_string(),
            filters: SubscribeFilters {
                terms: vec!["rustlang".to_string(), "async".to_string()],
            },
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "subscribe");
        assert_eq!(json["filters"]["terms"][0], "rustlang");
    }

    #[test]
    fn post_event_deserializes() {
        let json = r#"{
            "type": "post",
            "data": {
                "id": "1346889436626259968",
                "author_id": "2244994945",
                "created_at": "2021-01-06T18:40:40Z",
                "text": "shipping a new build"
            }
        }"#;

        let event: WireEvent = serde_json::from_str(json).unwrap();
        match event {
            WireEvent::Post { data } => {
                let post = Post::from_raw(data).unwrap();
                assert_eq!(post.id, 1346889436626259968);
            }
            other => panic!("expected post event, got {other:?}"),
        }
    }

    #[test]
    fn error_and_disconnect_events_deserialize() {
        let error: WireEvent =
            serde_json::from_str(r#"{"type":"error","message":"upstream timeout"}"#).unwrap();
        assert!(matches!(error, WireEvent::Error { message } if message == "upstream timeout"));

        let disconnect: WireEvent =
            serde_json::from_str(r#"{"type":"disconnect","reason":"rate_limit"}"#).unwrap();
        assert!(
            matches!(disconnect, WireEvent::Disconnect { reason } if reason == RATE_LIMIT_REASON)
        );
    }
}
