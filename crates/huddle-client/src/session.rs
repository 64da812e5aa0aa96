//! Persistent session over the signaling server's WebSocket.
//!
//! `Session::connect` starts a background task that owns the socket,
//! authenticates, forwards queued commands, and translates server frames
//! into [`SessionEvent`]s. The single task serializes everything the
//! embedder (and its call machine) observes, so handlers never run
//! concurrently for one session.
//!
//! There is no automatic reconnect: a dropped transport ends the session
//! with [`SessionEvent::Disconnected`], and re-attempting is an explicit
//! embedder decision.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use huddle_common::{
    ChatMessage, ClientFrame, ConnectionId, ErrorCode, Identity, PresenceEntry, ServerFrame,
    UserSummary,
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling server (e.g. "ws://localhost:4000").
    pub url: String,
    /// Credential token minted by the login service.
    pub token: String,
}

/// Events emitted by the session for the embedding application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Transport established (authentication still pending).
    Connected,
    /// Identity bound; `connection_id` is how peers will address us.
    AuthAccepted {
        connection_id: ConnectionId,
        user: Identity,
    },
    /// Presence snapshot for a room we are in.
    Presence {
        room_id: String,
        users: Vec<PresenceEntry>,
    },
    Message(ChatMessage),
    Offer {
        from: ConnectionId,
        from_user: UserSummary,
        sdp: String,
    },
    Answer {
        from: ConnectionId,
        from_user: UserSummary,
        sdp: String,
    },
    IceCandidate {
        from: ConnectionId,
        candidate: String,
    },
    /// An `error` frame from the server.
    ServerError { code: ErrorCode, message: String },
    /// Local transport-level failure.
    Error(String),
    /// The transport is gone; this session is over.
    Disconnected,
}

/// Handle for one server connection. All methods are non-blocking; they
/// enqueue frames for the background task.
pub struct Session {
    command_tx: mpsc::UnboundedSender<ClientFrame>,
}

impl Session {
    /// Connect and authenticate in the background.
    /// Returns `(session, event_receiver)`.
    pub fn connect(config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(session_loop(config, event_tx, command_rx));
        (Self { command_tx }, event_rx)
    }

    /// Sender for raw frames; the call machine signals through a clone of
    /// this, sharing the session's single outbound path.
    pub fn frame_sender(&self) -> mpsc::UnboundedSender<ClientFrame> {
        self.command_tx.clone()
    }

    pub fn join_room(&self, room_id: &str) {
        let _ = self.command_tx.send(ClientFrame::JoinRoom {
            room_id: room_id.to_string(),
        });
    }

    pub fn leave_room(&self, room_id: &str) {
        let _ = self.command_tx.send(ClientFrame::LeaveRoom {
            room_id: room_id.to_string(),
        });
    }

    pub fn send_message(&self, room_id: &str, text: &str) {
        let _ = self.command_tx.send(ClientFrame::SendMessage {
            room_id: room_id.to_string(),
            text: text.to_string(),
        });
    }
}

/// Background task owning the WebSocket.
async fn session_loop(
    config: SessionConfig,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    mut command_rx: mpsc::UnboundedReceiver<ClientFrame>,
) {
    info!(url = %config.url, "connecting to signaling server");
    let ws = match tokio_tungstenite::connect_async(&config.url).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!(error = %e, "failed to connect");
            let _ = event_tx.send(SessionEvent::Error(format!("connection failed: {e}")));
            let _ = event_tx.send(SessionEvent::Disconnected);
            return;
        }
    };
    let _ = event_tx.send(SessionEvent::Connected);
    let (mut sink, mut stream) = ws.split();

    // Authenticate before anything else rides the connection.
    let auth = ClientFrame::Auth {
        token: config.token.clone(),
    };
    let json = serde_json::to_string(&auth).unwrap();
    if sink.send(WsMessage::Text(json.into())).await.is_err() {
        let _ = event_tx.send(SessionEvent::Disconnected);
        return;
    }

    loop {
        tokio::select! {
            Some(frame) = command_rx.recv() => {
                let json = serde_json::to_string(&frame).unwrap();
                if sink.send(WsMessage::Text(json.into())).await.is_err() {
                    break;
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(frame) => {
                                let _ = event_tx.send(translate(frame));
                            }
                            Err(e) => debug!(error = %e, "unrecognized server frame"),
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sink.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = event_tx.send(SessionEvent::Disconnected);
}

/// Map a server frame to the session event the embedder consumes.
fn translate(frame: ServerFrame) -> SessionEvent {
    match frame {
        ServerFrame::AuthSuccess {
            connection_id,
            user,
        } => SessionEvent::AuthAccepted {
            connection_id,
            user,
        },
        ServerFrame::UserList { room_id, users } => SessionEvent::Presence { room_id, users },
        ServerFrame::NewMessage(msg) => SessionEvent::Message(msg),
        ServerFrame::Offer {
            from,
            from_user,
            sdp,
        } => SessionEvent::Offer {
            from,
            from_user,
            sdp,
        },
        ServerFrame::Answer {
            from,
            from_user,
            sdp,
        } => SessionEvent::Answer {
            from,
            from_user,
            sdp,
        },
        ServerFrame::IceCandidate { from, candidate } => {
            SessionEvent::IceCandidate { from, candidate }
        }
        ServerFrame::Error { code, message } => SessionEvent::ServerError { code, message },
    }
}
