//! Media and peer-connection boundary.
//!
//! The call state machine never talks to a concrete WebRTC stack; it
//! drives these traits. A production embedding wires them to its media
//! engine, tests wire them to mocks.

use async_trait::async_trait;
use tokio::sync::mpsc;

use huddle_common::IceServer;

use crate::call::CallError;

/// Source of the local audio/video capture. One acquisition per active
/// call session.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn LocalMedia>, CallError>;
}

/// A held local capture. `stop` must be idempotent.
pub trait LocalMedia: Send {
    fn stop(&mut self);
}

/// Events surfaced by the underlying peer connection.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Locally gathered ICE candidate to forward to the remote peer.
    LocalCandidate(String),
    /// First usable remote media track arrived.
    TrackReceived,
    /// Fatal negotiation failure (e.g. no viable ICE path).
    NegotiationFailed(String),
}

/// One negotiated peer connection.
#[async_trait]
pub trait PeerConnection: Send {
    async fn create_offer(&mut self) -> Result<String, CallError>;
    async fn create_answer(&mut self) -> Result<String, CallError>;
    async fn set_local_description(&mut self, sdp: &str) -> Result<(), CallError>;
    async fn set_remote_description(&mut self, sdp: &str) -> Result<(), CallError>;
    /// Apply a remote candidate. Callers must ensure the remote
    /// description is set first.
    async fn add_ice_candidate(&mut self, candidate: &str) -> Result<(), CallError>;
    fn close(&mut self);
}

/// Creates peer connections configured for NAT traversal.
pub trait PeerConnectionFactory: Send + Sync {
    fn create(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<(Box<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), CallError>;
}
