//! Targeted signaling relay.
//!
//! Forwards call-setup envelopes from one live connection to another,
//! keyed by connection id rather than by room: a caller must designate
//! exactly which peer it is negotiating with, so a room with more than
//! two members stays unambiguous. Payloads are never inspected, nothing
//! is buffered past a connection's lifetime, and delivery is
//! fire-and-forget.

use tracing::debug;

use huddle_common::{ConnectionId, RelayError, ServerFrame};

use crate::registry::ConnectionRegistry;

/// One call-setup message in flight. Exists only between receipt from the
/// source and the push onto the target's outbound queue.
#[derive(Debug, Clone)]
pub enum Envelope {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: String },
}

pub struct SignalingRelay {
    registry: ConnectionRegistry,
}

impl SignalingRelay {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Forward an envelope from `source` to `target`, rewriting the
    /// address so the target learns which connection to reply to.
    ///
    /// FIFO per (source, target) pair holds by construction: each source's
    /// envelopes arrive here in receipt order from its single connection
    /// task and land on the target's single FIFO outbound queue. If the
    /// target's queue closed between resolution and the push, the envelope
    /// is dropped with it.
    pub async fn relay(
        &self,
        source: &ConnectionId,
        target: &ConnectionId,
        envelope: Envelope,
    ) -> Result<(), RelayError> {
        let source_peer = self
            .registry
            .resolve(source)
            .await
            .ok_or(RelayError::Unauthorized)?;
        let target_peer = self
            .registry
            .resolve(target)
            .await
            .ok_or_else(|| RelayError::UnknownTarget(target.clone()))?;

        let frame = match envelope {
            Envelope::Offer { sdp } => ServerFrame::Offer {
                from: source.clone(),
                from_user: source_peer.identity.summary(),
                sdp,
            },
            Envelope::Answer { sdp } => ServerFrame::Answer {
                from: source.clone(),
                from_user: source_peer.identity.summary(),
                sdp,
            },
            Envelope::IceCandidate { candidate } => ServerFrame::IceCandidate {
                from: source.clone(),
                candidate,
            },
        };

        debug!(%source, %target, "relaying signaling envelope");
        let _ = target_peer.tx.send(frame);
        Ok(())
    }
}
