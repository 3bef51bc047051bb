pub mod feed;

use serde_json::Value;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub use feed::FeedConnector;

/// Named events emitted by an upstream source once connected.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Chat(Value),
    Gift(Value),
    Like(Value),
    Subscribe(Value),
    Follow(Value),
    Share(Value),
    Member(Value),
    RoomUser(Value),
    StreamEnd,
    Disconnected,
    Error(String),
}

impl UpstreamEvent {
    /// Maps an upstream event name and its payload. Unknown names yield `None`.
    pub fn from_named(name: &str, data: Value) -> Option<Self> {
        let event = match name {
            "chat" => Self::Chat(data),
            "gift" => Self::Gift(data),
            "like" => Self::Like(data),
            "subscribe" => Self::Subscribe(data),
            "follow" => Self::Follow(data),
            "share" => Self::Share(data),
            "member" => Self::Member(data),
            "roomUser" => Self::RoomUser(data),
            "streamEnd" => Self::StreamEnd,
            "disconnected" => Self::Disconnected,
            "error" => Self::Error(crate::normalize::error_message(&data)),
            _ => return None,
        };
        Some(event)
    }
}

#[derive(Debug)]
pub enum UpstreamError {
    InvalidStreamId,
    Connect(String),
    Closed,
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStreamId => write!(f, "invalid stream id: username must not be empty"),
            Self::Connect(msg) => write!(f, "{msg}"),
            Self::Closed => write!(f, "upstream connection already closed"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Trims outer whitespace, strips one leading `@` and rejects identifiers that
/// are empty afterwards.
pub fn normalize_stream_id(raw: &str) -> Result<String, UpstreamError> {
    let trimmed = raw.trim();
    let id = trimmed.strip_prefix('@').unwrap_or(trimmed);
    if id.is_empty() {
        return Err(UpstreamError::InvalidStreamId);
    }
    Ok(id.to_string())
}

/// A live upstream connection. Dropping it releases the event stream; call
/// [`UpstreamConnection::disconnect`] to close the source politely.
#[derive(Debug)]
pub struct UpstreamConnection {
    pub room_id: String,
    events: mpsc::Receiver<UpstreamEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl UpstreamConnection {
    pub fn new(
        room_id: impl Into<String>,
        events: mpsc::Receiver<UpstreamEvent>,
        shutdown: oneshot::Sender<()>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            events,
            shutdown: Some(shutdown),
            task,
        }
    }

    pub async fn recv(&mut self) -> Option<UpstreamEvent> {
        self.events.recv().await
    }

    pub async fn disconnect(mut self) -> Result<(), UpstreamError> {
        self.events.close();
        let signalled = self
            .shutdown
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false);
        if let Some(task) = self.task.take() {
            if !signalled {
                task.abort();
            }
            let _ = task.await;
        }
        if signalled {
            Ok(())
        } else {
            Err(UpstreamError::Closed)
        }
    }
}

/// Source of upstream connections, one per `connect` call.
#[async_trait::async_trait]
pub trait UpstreamConnector: Send + Sync + 'static {
    async fn connect(&self, stream_id: &str) -> Result<UpstreamConnection, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_id_strips_single_leading_at() {
        assert_eq!(normalize_stream_id("@alice").unwrap(), "alice");
        assert_eq!(normalize_stream_id(" alice ").unwrap(), "alice");
        assert_eq!(normalize_stream_id("@@alice").unwrap(), "@alice");
    }

    #[test]
    fn whitespace_after_at_is_kept() {
        assert_eq!(normalize_stream_id("@ alice").unwrap(), " alice");
        assert_eq!(normalize_stream_id(" @alice ").unwrap(), "alice");
    }

    #[test]
    fn empty_stream_id_is_rejected() {
        assert!(matches!(normalize_stream_id(""), Err(UpstreamError::InvalidStreamId)));
        assert!(matches!(normalize_stream_id("@"), Err(UpstreamError::InvalidStreamId)));
        assert!(matches!(normalize_stream_id("  "), Err(UpstreamError::InvalidStreamId)));
    }

    #[test]
    fn connect_error_message_is_forwarded_verbatim() {
        let err = UpstreamError::Connect("User is offline".to_string());
        assert_eq!(err.to_string(), "User is offline");
    }

    #[test]
    fn maps_named_events() {
        assert_eq!(
            UpstreamEvent::from_named("roomUser", json!({"viewerCount": 3})),
            Some(UpstreamEvent::RoomUser(json!({"viewerCount": 3})))
        );
        assert_eq!(
            UpstreamEvent::from_named("error", json!({"message": "rate limited"})),
            Some(UpstreamEvent::Error("rate limited".to_string()))
        );
        assert_eq!(UpstreamEvent::from_named("streamEnd", Value::Null), Some(UpstreamEvent::StreamEnd));
        assert_eq!(UpstreamEvent::from_named("emote", json!({})), None);
    }

    #[tokio::test]
    async fn disconnect_signals_reader_task() {
        let (_tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = shutdown_rx.await;
        });
        let conn = UpstreamConnection::new("room", rx, shutdown_tx, Some(task));
        assert!(conn.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn disconnect_reports_already_closed_source() {
        let (_tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        drop(shutdown_rx);
        let conn = UpstreamConnection::new("room", rx, shutdown_tx, None);
        assert!(matches!(conn.disconnect().await, Err(UpstreamError::Closed)));
    }
}
