use crate::api::HostState;
use crate::auth::Credential;
use crate::session::{ConnectionId, Outbound};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, Request, State,
    },
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Rejects malformed credentials with 401 before the upgrade. Token
/// validity is checked by the session handshake, which closes the socket
/// with 4401.
async fn ws_credentials(
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    mut req: Request,
    next: Next,
) -> Response {
    match Credential::from_request(&params, &headers) {
        Ok(credential) => {
            req.extensions_mut().insert(credential);
            next.run(req).await
        }
        Err(e) => (StatusCode::UNAUTHORIZED, e.to_string()).into_response(),
    }
}

/// GET /ws - signaling socket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HostState>>,
    axum::Extension(credential): axum::Extension<Credential>,
) -> Response {
    debug!(world = ?credential.world, resume = credential.session.is_some(), "WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state, credential))
}

/// Create the signaling router with credential parsing applied
pub fn create_ws_router(state: Arc<HostState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route_layer(middleware::from_fn(ws_credentials))
        .with_state(state)
}

/// Pump one signaling socket: inbound text goes to the session manager,
/// outbound messages queued by the session go to the socket.
async fn handle_socket(mut socket: WebSocket, state: Arc<HostState>, credential: Credential) {
    let connection = ConnectionId::generate();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    info!(connection = %connection, "Signaling connection established");

    state
        .sessions
        .handle_connect(connection.clone(), credential, outbound_tx)
        .await;

    loop {
        tokio::select! {
            Some(msg) = socket.recv() => {
                match msg {
                    Ok(Message::Text(text)) => {
                        state.sessions.handle_message(&connection, &text).await;
                    }
                    Ok(Message::Close(_)) => {
                        debug!(connection = %connection, "Client closed signaling socket");
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {
                        // Binary and pong frames carry nothing for us
                    }
                    Err(e) => {
                        warn!(connection = %connection, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            Some(outbound) = outbound_rx.recv() => {
                match outbound {
                    Outbound::Signal(message) => {
                        if let Err(e) = socket.send(Message::Text(message.to_json())).await {
                            warn!(connection = %connection, error = %e, "Failed to send signaling message");
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code,
                            reason: reason.into(),
                        };
                        let _ = socket.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }

            else => {
                break;
            }
        }
    }

    state.sessions.handle_disconnect(&connection).await;
    info!(connection = %connection, "Signaling connection closed");
}
