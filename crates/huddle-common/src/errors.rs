use crate::id::ConnectionId;
use crate::protocol::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credential token")]
    InvalidToken,

    #[error("connection is already authenticated")]
    AlreadyBound,

    #[error("authentication handshake timed out")]
    HandshakeTimeout,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("operation requires an authenticated connection")]
    Unauthorized,

    #[error("not a member of room {0}")]
    NotInRoom(String),

    #[error("no live connection with id {0}")]
    UnknownTarget(ConnectionId),
}

impl RelayError {
    /// Wire error code for `error` frames.
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Unauthorized => ErrorCode::Unauthorized,
            RelayError::NotInRoom(_) => ErrorCode::NotInRoom,
            RelayError::UnknownTarget(_) => ErrorCode::UnknownTarget,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}
