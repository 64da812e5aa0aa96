//! Per-connection handler: authenticate, then dispatch frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use huddle_common::{ClientFrame, ConnectionId, ErrorCode, Identity, ServerFrame};

use crate::auth::TokenVerifier;
use crate::chat::ChatRelay;
use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomManager;
use crate::signaling::{Envelope, SignalingRelay};
use crate::store::MessageStore;

/// Shared server components handed to every connection task.
#[derive(Clone)]
pub struct ServerState {
    pub registry: ConnectionRegistry,
    pub rooms: Arc<RoomManager>,
    pub chat: Arc<ChatRelay>,
    pub signaling: Arc<SignalingRelay>,
    pub auth_timeout: Duration,
}

impl ServerState {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        store: Arc<dyn MessageStore>,
        config: &ServerConfig,
    ) -> Self {
        let registry = ConnectionRegistry::new(verifier);
        let rooms = Arc::new(RoomManager::new(registry.clone()));
        let chat = Arc::new(ChatRelay::new(
            registry.clone(),
            Arc::clone(&rooms),
            store,
        ));
        let signaling = Arc::new(SignalingRelay::new(registry.clone()));
        Self {
            registry,
            rooms,
            chat,
            signaling,
            auth_timeout: config.auth_timeout(),
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

/// Handle a single WebSocket connection for its whole lifetime.
pub async fn handle_connection(ws: WsStream, addr: SocketAddr, state: ServerState) {
    let (mut sink, mut stream) = ws.split();
    let conn_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    // 1. Auth handshake: the connection gets no other capability until an
    // accepted `auth` frame binds an identity.
    let identity =
        match authenticate(&mut sink, &mut stream, addr, &conn_id, &state, tx.clone()).await {
            Some(identity) => identity,
            None => return,
        };

    let active = state.registry.count().await;
    info!(
        peer = %addr,
        conn = %conn_id,
        user = %identity.user_id,
        active = active,
        "client authenticated"
    );

    // Queue the ack so it is the first frame the writer delivers.
    let _ = tx.send(ServerFrame::AuthSuccess {
        connection_id: conn_id.clone(),
        user: identity,
    });

    // 2. Forwarding loop: outbound queue → socket, socket → dispatch.
    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                let json = serde_json::to_string(&frame).unwrap();
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => dispatch(&state, &conn_id, &tx, frame).await,
                            Err(e) => {
                                debug!(peer = %addr, error = %e, "unparseable frame");
                                let _ = tx.send(ServerFrame::Error {
                                    code: ErrorCode::BadRequest,
                                    message: "unrecognized frame".into(),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 3. Cleanup: evict from the registry first so the presence
    // rebroadcasts that follow no longer include this connection.
    state.registry.evict(&conn_id).await;
    state.rooms.drop_connection(&conn_id).await;
    let active = state.registry.count().await;
    info!(
        peer = %addr,
        conn = %conn_id,
        active = active,
        "client disconnected"
    );
}

/// Run the auth handshake. Frames other than `auth` are rejected with
/// `unauthorized` until the handshake deadline passes.
async fn authenticate(
    sink: &mut WsSink,
    stream: &mut WsRead,
    addr: SocketAddr,
    conn_id: &ConnectionId,
    state: &ServerState,
    tx: mpsc::UnboundedSender<ServerFrame>,
) -> Option<Identity> {
    let deadline = tokio::time::Instant::now() + state.auth_timeout;
    loop {
        let text = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Ping(data)))) => {
                let _ = sink.send(Message::Pong(data)).await;
                continue;
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                debug!(peer = %addr, "connection closed before auth");
                return None;
            }
            Ok(Some(Ok(_))) => {
                warn!(peer = %addr, "expected text auth frame, got binary");
                return None;
            }
            Ok(Some(Err(e))) => {
                warn!(peer = %addr, error = %e, "WS error during auth");
                return None;
            }
            Err(_) => {
                warn!(peer = %addr, "auth timeout");
                let _ = send_error(
                    sink,
                    ErrorCode::Unauthorized,
                    &huddle_common::AuthError::HandshakeTimeout.to_string(),
                )
                .await;
                return None;
            }
        };

        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Auth { token }) => {
                match state.registry.authenticate(conn_id, &token, tx.clone()).await {
                    Ok(identity) => return Some(identity),
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "auth rejected");
                        let _ = send_error(sink, ErrorCode::Unauthorized, &e.to_string()).await;
                        return None;
                    }
                }
            }
            Ok(_) => {
                let _ = send_error(sink, ErrorCode::Unauthorized, "authenticate first").await;
            }
            Err(e) => {
                warn!(peer = %addr, error = %e, "invalid frame during auth");
                return None;
            }
        }
    }
}

async fn send_error(
    sink: &mut WsSink,
    code: ErrorCode,
    message: &str,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let frame = ServerFrame::Error {
        code,
        message: message.to_string(),
    };
    let json = serde_json::to_string(&frame).unwrap();
    sink.send(Message::Text(json.into())).await
}

/// Route one authenticated frame to the owning component. Failures are
/// reported back on the sender's own queue; nothing is retried.
async fn dispatch(
    state: &ServerState,
    conn: &ConnectionId,
    tx: &mpsc::UnboundedSender<ServerFrame>,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::Auth { .. } => {
            let _ = tx.send(ServerFrame::Error {
                code: ErrorCode::BadRequest,
                message: "already authenticated".into(),
            });
        }
        ClientFrame::JoinRoom { room_id } => state.rooms.join(conn, &room_id).await,
        ClientFrame::LeaveRoom { room_id } => state.rooms.leave(conn, &room_id).await,
        ClientFrame::SendMessage { room_id, text } => {
            if let Err(e) = state.chat.send(conn, &room_id, text).await {
                let _ = tx.send(ServerFrame::Error {
                    code: e.code(),
                    message: e.to_string(),
                });
            }
        }
        ClientFrame::Offer { target, sdp } => {
            relay_envelope(state, conn, tx, target, Envelope::Offer { sdp }).await;
        }
        ClientFrame::Answer { target, sdp } => {
            relay_envelope(state, conn, tx, target, Envelope::Answer { sdp }).await;
        }
        ClientFrame::IceCandidate { target, candidate } => {
            relay_envelope(state, conn, tx, target, Envelope::IceCandidate { candidate }).await;
        }
    }
}

async fn relay_envelope(
    state: &ServerState,
    conn: &ConnectionId,
    tx: &mpsc::UnboundedSender<ServerFrame>,
    target: ConnectionId,
    envelope: Envelope,
) {
    if let Err(e) = state.signaling.relay(conn, &target, envelope).await {
        // Best effort only: the relay is fire-and-forget, so the sender is
        // not guaranteed this notification.
        let _ = tx.send(ServerFrame::Error {
            code: e.code(),
            message: e.to_string(),
        });
    }
}
