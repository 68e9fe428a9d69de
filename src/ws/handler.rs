//! WebSocket session transport

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::{AppState, SessionInfo};
use crate::game::SignalEnvelope;
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientSignal, ServerIntent};

/// Connection query parameters
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Display name to join with
    pub name: Option<String>,
}

/// Upgrade entry point for game clients
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query.name, state))
}

/// Session lifecycle for one connected client
async fn handle_socket(socket: WebSocket, name: Option<String>, state: AppState) {
    let session_id = Uuid::new_v4();
    let display_name = name.unwrap_or_else(|| format!("Player_{}", &session_id.to_string()[..8]));
    info!(session_id = %session_id, name = %display_name, "Session connected");

    let (mut ws_sink, ws_stream) = socket.split();

    // Clients learn their session id from the welcome
    let welcome = ServerIntent::Welcome {
        session_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_intent(&mut ws_sink, &welcome).await {
        error!(session_id = %session_id, error = %e, "Failed to send welcome");
        return;
    }

    state.sessions.insert(
        session_id,
        SessionInfo {
            name: display_name.clone(),
            connected_at: unix_millis(),
        },
    );

    let signal_tx = state.engine.signal_tx.clone();
    let intent_rx = state.engine.intent_tx.subscribe();

    // Announce the session to the engine
    let _ = signal_tx
        .send(SignalEnvelope::from_session(
            session_id,
            ClientSignal::Join {
                name: display_name,
            },
        ))
        .await;

    run_session(session_id, ws_sink, ws_stream, signal_tx.clone(), intent_rx).await;

    // Leave the match and drop the session row
    let _ = signal_tx
        .send(SignalEnvelope::from_session(session_id, ClientSignal::Leave))
        .await;
    state.sessions.remove(&session_id);

    info!(session_id = %session_id, "Session closed");
}

/// Pump signals in and intents out until either side drops
async fn run_session(
    session_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    signal_tx: mpsc::Sender<SignalEnvelope>,
    mut intent_rx: broadcast::Receiver<ServerIntent>,
) {
    let rate_limiter = SessionRateLimiter::new();

    // Spawn writer task: broadcast intents -> WebSocket
    let writer_session_id = session_id;
    let writer_handle = tokio::spawn(async move {
        loop {
            match intent_rx.recv().await {
                Ok(intent) => {
                    if let Err(e) = send_intent(&mut ws_sink, &intent).await {
                        debug!(session_id = %writer_session_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        session_id = %writer_session_id,
                        lagged_count = n,
                        "Client lagged, skipping {} intents", n
                    );
                    // The receiver resumes at the newest intent, keep the session
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(session_id = %writer_session_id, "Intent channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> engine
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_signal() {
                    warn!(session_id = %session_id, "Rate limited signal");
                    continue;
                }

                match serde_json::from_str::<ClientSignal>(&text) {
                    Ok(signal) => {
                        let envelope = SignalEnvelope::from_session(session_id, signal);
                        if signal_tx.send(envelope).await.is_err() {
                            debug!(session_id = %session_id, "Signal channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Failed to parse client signal");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(session_id = %session_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(session_id = %session_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Serialize one intent onto the socket
async fn send_intent(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    intent: &ServerIntent,
) -> Result<(), String> {
    let json = serde_json::to_string(intent).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
