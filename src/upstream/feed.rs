use super::{UpstreamConnection, UpstreamConnector, UpstreamError, UpstreamEvent};
use crate::normalize;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type FeedWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One text frame from the relay feed.
#[derive(Debug, Deserialize)]
struct FeedFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

fn decode_frame(text: &str) -> Result<FeedFrame, serde_json::Error> {
    serde_json::from_str(text)
}

/// Connects to a WebSocket relay that republishes a live platform's events as
/// `{"event": <name>, "data": {...}}` frames, one stream per URL path.
#[derive(Debug, Clone)]
pub struct FeedConnector {
    feed_url: Url,
    buffer: usize,
}

impl FeedConnector {
    pub fn new(feed_url: &str, buffer: usize) -> Result<Self, UpstreamError> {
        let feed_url = Url::parse(feed_url.trim())
            .map_err(|err| UpstreamError::Connect(format!("invalid feed url: {err}")))?;
        if feed_url.cannot_be_a_base() {
            return Err(UpstreamError::Connect(
                "invalid feed url: cannot be a base".to_string(),
            ));
        }
        Ok(Self {
            feed_url,
            buffer: buffer.max(1),
        })
    }

    pub fn stream_url(&self, stream_id: &str) -> Result<Url, UpstreamError> {
        let mut url = self.feed_url.clone();
        url.path_segments_mut()
            .map_err(|_| UpstreamError::Connect("invalid feed url: cannot be a base".to_string()))?
            .pop_if_empty()
            .push(stream_id);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl UpstreamConnector for FeedConnector {
    async fn connect(&self, stream_id: &str) -> Result<UpstreamConnection, UpstreamError> {
        let url = self.stream_url(stream_id)?;
        tracing::debug!(url = %url, "opening upstream feed");
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|err| UpstreamError::Connect(err.to_string()))?;
        let (write, mut read) = ws.split();

        let room_id = await_room_id(&mut read).await?;

        let (events_tx, events_rx) = mpsc::channel(self.buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(pump_events(read, write, events_tx, shutdown_rx));
        Ok(UpstreamConnection::new(
            room_id,
            events_rx,
            shutdown_tx,
            Some(task),
        ))
    }
}

async fn await_room_id(read: &mut SplitStream<FeedWs>) -> Result<String, UpstreamError> {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                Ok(frame) if frame.event == "connected" => return Ok(normalize::room_id(&frame.data)),
                Ok(frame) if frame.event == "error" => {
                    return Err(UpstreamError::Connect(normalize::error_message(&frame.data)))
                }
                Ok(frame) => {
                    tracing::debug!(event = %frame.event, "skipping upstream frame before connect");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping undecodable upstream frame");
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(UpstreamError::Connect(
                    "upstream closed before connect".to_string(),
                ))
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(UpstreamError::Connect(err.to_string())),
        }
    }
}

async fn pump_events(
    mut read: SplitStream<FeedWs>,
    mut write: SplitSink<FeedWs, Message>,
    events_tx: mpsc::Sender<UpstreamEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame = match decode_frame(&text) {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::warn!(error = %err, "dropping undecodable upstream frame");
                            continue;
                        }
                    };
                    let Some(event) = UpstreamEvent::from_named(&frame.event, frame.data) else {
                        tracing::debug!(event = %frame.event, "skipping unknown upstream event");
                        continue;
                    };
                    let terminal = matches!(event, UpstreamEvent::Disconnected);
                    if events_tx.send(event).await.is_err() || terminal {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events_tx.send(UpstreamEvent::Disconnected).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "upstream feed read failed");
                    let _ = events_tx.send(UpstreamEvent::Error(err.to_string())).await;
                    let _ = events_tx.send(UpstreamEvent::Disconnected).await;
                    return;
                }
            }
        }
    }
}
