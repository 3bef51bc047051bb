use crate::hub::BroadcastHub;
use crate::model::ControlCommand;
use crate::session::{CommandSender, ConnectionState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::watch;
use uuid::Uuid;

struct ServerState {
    hub: BroadcastHub,
    commands: CommandSender,
    connection: watch::Receiver<ConnectionState>,
}

pub async fn start(
    addr: SocketAddr,
    hub: BroadcastHub,
    commands: CommandSender,
    connection: watch::Receiver<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "downstream listener bound");
    serve(listener, hub, commands, connection, shutdown_rx).await
}

pub async fn serve(
    listener: TcpListener,
    hub: BroadcastHub,
    commands: CommandSender,
    connection: watch::Receiver<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(ServerState {
        hub,
        commands,
        connection,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .with_state(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    let id = Uuid::new_v4();
    let Some(mut mailbox) = state.hub.register(id) else {
        return;
    };

    loop {
        tokio::select! {
            payload = mailbox.recv() => {
                let Some(payload) = payload else { break };
                if let Err(err) = socket.send(Message::Text(payload.to_string())).await {
                    tracing::debug!(socket_id = %id, error = %err, "downstream write failed");
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => forward_command(&state, id, &text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(socket_id = %id, error = %err, "downstream read failed");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.unregister(&id);
}

async fn forward_command(state: &ServerState, id: Uuid, raw: &str) {
    match ControlCommand::parse(raw) {
        Ok(cmd) => {
            if state.commands.send(cmd).await.is_err() {
                tracing::warn!(socket_id = %id, "session controller is not running; command dropped");
            }
        }
        Err(err) => {
            tracing::warn!(socket_id = %id, error = %err, "ignoring inbound message");
        }
    }
}

async fn health_check(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let connection = state.connection.borrow().to_string();
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "status": "healthy",
            "connection": connection,
            "clients": state.hub.client_count(),
            "timestamp": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })),
    )
}
