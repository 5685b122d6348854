//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::Outbound;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Stable identity issued to the device by the session layer
    pub device_id: Uuid,
    /// Display name shown to the opponent
    #[serde(default)]
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    info!(participant = %query.device_id, "WebSocket upgrade");
    let display_name = query
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| default_name(query.device_id));
    ws.on_upgrade(move |socket| handle_socket(socket, query.device_id, display_name, state))
}

fn default_name(participant_id: Uuid) -> String {
    format!("Player_{}", &participant_id.simple().to_string()[..8])
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, participant_id: Uuid, display_name: String, state: AppState) {
    info!(participant = %participant_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        participant_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(participant = %participant_id, error = %e, "Failed to send welcome");
        return;
    }

    let (connection, outbound_rx) = state
        .matchmaking
        .register_player(participant_id, display_name);

    run_session(
        participant_id,
        &state,
        connection.outbound,
        ws_sink,
        ws_stream,
        outbound_rx,
    )
    .await;

    state
        .matchmaking
        .unregister_player(participant_id, connection.connection_id)
        .await;

    info!(participant = %participant_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    participant_id: Uuid,
    state: &AppState,
    // same channel the match broadcasts on, so replies stay ordered with them
    reply: Outbound,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut outbound_rx: mpsc::UnboundedReceiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Spawn writer task: outbound channel -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(participant = %participant_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        debug!(participant = %participant_id, "Outbound channel closed");
    });

    // Reader loop: WebSocket -> matchmaking / match session
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_inbound() {
                    warn!(participant = %participant_id, "Rate limited inbound message");
                    let _ = reply.send(ServerMsg::error("rate_limited", "Too many messages"));
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => dispatch(participant_id, state, &reply, client_msg).await,
                    Err(e) => {
                        warn!(participant = %participant_id, error = %e, "Failed to parse client message");
                        let _ = reply.send(ServerMsg::error("malformed", e.to_string()));
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(participant = %participant_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(participant = %participant_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(participant = %participant_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(participant = %participant_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(participant = %participant_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Route one parsed client message
async fn dispatch(participant_id: Uuid, state: &AppState, reply: &Outbound, msg: ClientMsg) {
    let result = match msg {
        ClientMsg::JoinQueue { display_name } => state
            .matchmaking
            .join_queue(participant_id, display_name)
            .await
            .map(|queue_size| {
                let _ = reply.send(ServerMsg::Queued { queue_size });
            }),
        ClientMsg::LeaveQueue => {
            state.matchmaking.leave_queue(participant_id).await;
            Ok(())
        }
        ClientMsg::Move { row, col } => state.matchmaking.submit_move(participant_id, row, col),
        ClientMsg::Leave => state.matchmaking.leave_match(participant_id),
        ClientMsg::Ping { t } => {
            let _ = reply.send(ServerMsg::Pong { t });
            Ok(())
        }
    };

    if let Err(e) = result {
        debug!(participant = %participant_id, error = %e, "Client request refused");
        let _ = reply.send(e.to_msg());
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
