use crate::gifts::{GiftAggregator, GiftIngest};
use crate::hub::BroadcastHub;
use crate::likes::LikeThrottler;
use crate::model::{BridgeEvent, ControlCommand};
use crate::normalize;
use crate::upstream::{
    normalize_stream_id, UpstreamConnection, UpstreamConnector, UpstreamError, UpstreamEvent,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

pub type CommandSender = mpsc::Sender<ControlCommand>;
pub type CommandReceiver = mpsc::Receiver<ControlCommand>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Errored,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Errored => "errored",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTimings {
    pub gift_tick: Duration,
    pub gift_idle: Duration,
    pub like_tick: Duration,
    pub like_window: Duration,
}

impl Default for FlushTimings {
    fn default() -> Self {
        Self {
            gift_tick: Duration::from_secs(1),
            gift_idle: Duration::from_secs(3),
            like_tick: Duration::from_secs(2),
            like_window: Duration::from_secs(5),
        }
    }
}

struct ConnectOutcome {
    generation: u64,
    stream_id: String,
    result: Result<UpstreamConnection, UpstreamError>,
}

/// Owns the single upstream slot and all aggregation state. Runs as one task;
/// everything it mutates is touched only from [`SessionController::run`].
pub struct SessionController {
    connector: Arc<dyn UpstreamConnector>,
    hub: BroadcastHub,
    timings: FlushTimings,
    gifts: GiftAggregator,
    likes: LikeThrottler,
    upstream: Option<UpstreamConnection>,
    pending_connect: Option<JoinHandle<()>>,
    generation: u64,
    state_tx: watch::Sender<ConnectionState>,
    outcome_tx: mpsc::UnboundedSender<ConnectOutcome>,
    outcome_rx: Option<mpsc::UnboundedReceiver<ConnectOutcome>>,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        hub: BroadcastHub,
        timings: FlushTimings,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            hub,
            timings,
            gifts: GiftAggregator::new(timings.gift_idle),
            likes: LikeThrottler::new(timings.like_window),
            upstream: None,
            pending_connect: None,
            generation: 0,
            state_tx,
            outcome_tx,
            outcome_rx: Some(outcome_rx),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub async fn run(mut self, mut commands: CommandReceiver, mut shutdown: watch::Receiver<bool>) {
        let Some(mut outcomes) = self.outcome_rx.take() else {
            return;
        };
        let mut gift_tick = interval(self.timings.gift_tick);
        gift_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut like_tick = interval(self.timings.like_tick);
        like_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(outcome) = outcomes.recv() => self.handle_connect_outcome(outcome).await,
                event = next_upstream_event(&mut self.upstream) => {
                    self.handle_upstream_event(event.unwrap_or(UpstreamEvent::Disconnected)).await;
                }
                _ = gift_tick.tick() => self.flush_gifts(Instant::now()),
                _ = like_tick.tick() => self.flush_likes(Instant::now()),
                _ = shutdown.changed() => break,
            }
        }

        self.release_upstream().await;
        tracing::info!("session controller stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    async fn handle_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Connect { username } => self.start_connect(&username).await,
        }
    }

    async fn start_connect(&mut self, username: &str) {
        let stream_id = match normalize_stream_id(username) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(username = %username, error = %err, "rejecting connect command");
                self.hub.broadcast(&BridgeEvent::error(err.to_string()));
                return;
            }
        };

        self.release_upstream().await;
        self.gifts.clear();

        self.generation += 1;
        self.set_state(ConnectionState::Connecting);
        tracing::info!(stream_id = %stream_id, generation = self.generation, "connecting to upstream");

        let connector = self.connector.clone();
        let outcome_tx = self.outcome_tx.clone();
        let generation = self.generation;
        self.pending_connect = Some(tokio::spawn(async move {
            let result = connector.connect(&stream_id).await;
            let _ = outcome_tx.send(ConnectOutcome {
                generation,
                stream_id,
                result,
            });
        }));
    }

    /// Cancels any in-flight attempt and closes the current connection. Teardown
    /// failures are ignored; the old connection is discarded either way.
    async fn release_upstream(&mut self) {
        if let Some(task) = self.pending_connect.take() {
            task.abort();
        }
        if let Some(conn) = self.upstream.take() {
            if let Err(err) = conn.disconnect().await {
                tracing::debug!(error = %err, "ignoring upstream teardown failure");
            }
        }
    }

    async fn handle_connect_outcome(&mut self, outcome: ConnectOutcome) {
        if outcome.generation != self.generation {
            if let Ok(conn) = outcome.result {
                let _ = conn.disconnect().await;
            }
            tracing::debug!(stream_id = %outcome.stream_id, "discarding superseded connect result");
            return;
        }
        self.pending_connect = None;

        match outcome.result {
            Ok(conn) => {
                let room_id = conn.room_id.clone();
                self.upstream = Some(conn);
                self.set_state(ConnectionState::Connected);
                tracing::info!(stream_id = %outcome.stream_id, room_id = %room_id, "upstream connected");
                self.hub.broadcast(&BridgeEvent::Connected {
                    room_id,
                    username: outcome.stream_id,
                });
            }
            Err(err) => {
                self.set_state(ConnectionState::Errored);
                tracing::warn!(stream_id = %outcome.stream_id, error = %err, "upstream connect failed");
                self.hub.broadcast(&BridgeEvent::error(err.to_string()));
            }
        }
    }

    async fn handle_upstream_event(&mut self, event: UpstreamEvent) {
        let now = Instant::now();
        match event {
            UpstreamEvent::Chat(raw) => {
                self.hub.broadcast(&normalize::chat_event(&raw));
            }
            UpstreamEvent::Gift(raw) => match self.gifts.ingest(&raw, now) {
                GiftIngest::StreakInProgress => {
                    tracing::trace!("skipping in-progress gift streak event");
                }
                GiftIngest::Accumulated(total) => {
                    tracing::trace!(total, "gift accumulated");
                }
            },
            UpstreamEvent::Like(raw) => {
                match self.likes.ingest(&raw, now) {
                    Some(like) => {
                        self.hub.broadcast(&like);
                    }
                    None => {
                        tracing::trace!(pending = self.likes.has_pending(), "like deferred");
                    }
                }
            }
            UpstreamEvent::Subscribe(raw) => {
                self.hub.broadcast(&BridgeEvent::Subscribe {
                    user: normalize::normalize_user(&raw),
                });
            }
            UpstreamEvent::Follow(raw) => {
                self.hub.broadcast(&BridgeEvent::Follow {
                    user: normalize::normalize_user(&raw),
                });
            }
            UpstreamEvent::Share(raw) => {
                self.hub.broadcast(&BridgeEvent::Share {
                    user: normalize::normalize_user(&raw),
                });
            }
            UpstreamEvent::Member(raw) => {
                self.hub.broadcast(&BridgeEvent::Member {
                    user: normalize::normalize_user(&raw),
                });
            }
            UpstreamEvent::RoomUser(raw) => {
                self.hub.broadcast(&normalize::room_user_event(&raw));
            }
            UpstreamEvent::StreamEnd => {
                tracing::info!("upstream stream ended");
                self.release_upstream().await;
                self.set_state(ConnectionState::Disconnected);
                self.hub.broadcast(&BridgeEvent::StreamEnd);
            }
            UpstreamEvent::Disconnected => {
                tracing::info!("upstream disconnected");
                self.upstream = None;
                self.set_state(ConnectionState::Disconnected);
                self.hub.broadcast(&BridgeEvent::Disconnected);
            }
            UpstreamEvent::Error(message) => {
                tracing::warn!(error = %message, "upstream reported error");
                self.set_state(ConnectionState::Errored);
                self.hub.broadcast(&BridgeEvent::error(message));
            }
        }
    }

    fn flush_gifts(&mut self, now: Instant) {
        for event in self.gifts.flush_idle(now) {
            if let BridgeEvent::Gift {
                total_diamond_count,
                ..
            } = &event
            {
                tracing::debug!(total_diamond_count, "flushing aggregated gift");
            }
            self.hub.broadcast(&event);
        }
        tracing::trace!(pending = self.gifts.pending_senders(), "gift flush check");
    }

    fn flush_likes(&mut self, now: Instant) {
        if let Some(event) = self.likes.flush_due(now) {
            tracing::debug!("flushing deferred like");
            self.hub.broadcast(&event);
        }
    }
}

async fn next_upstream_event(upstream: &mut Option<UpstreamConnection>) -> Option<UpstreamEvent> {
    match upstream {
        Some(conn) => conn.recv().await,
        None => std::future::pending().await,
    }
}
