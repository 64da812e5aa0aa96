//! Connection registry: maps live connections to authenticated identities
//! and their outbound frame queues.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use huddle_common::{AuthError, ConnectionId, Identity, ServerFrame};

use crate::auth::TokenVerifier;

/// A live, authenticated connection as the relays see it.
#[derive(Clone)]
pub struct Peer {
    pub identity: Identity,
    /// Outbound frame queue, drained by the connection's writer loop.
    /// Per-connection delivery order follows send order on this queue.
    pub tx: mpsc::UnboundedSender<ServerFrame>,
}

/// Thread-safe registry of authenticated connections.
#[derive(Clone)]
pub struct ConnectionRegistry {
    verifier: Arc<dyn TokenVerifier>,
    peers: Arc<RwLock<HashMap<ConnectionId, Peer>>>,
}

impl ConnectionRegistry {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier,
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Verify the token and bind the resulting identity to `conn` for the
    /// connection's lifetime. Fails without mutating state if the token is
    /// invalid or the connection is already bound.
    pub async fn authenticate(
        &self,
        conn: &ConnectionId,
        token: &str,
        tx: mpsc::UnboundedSender<ServerFrame>,
    ) -> Result<Identity, AuthError> {
        let identity = self.verifier.verify(token).await?;

        let mut peers = self.peers.write().await;
        if peers.contains_key(conn) {
            return Err(AuthError::AlreadyBound);
        }
        peers.insert(
            conn.clone(),
            Peer {
                identity: identity.clone(),
                tx,
            },
        );
        Ok(identity)
    }

    /// Look up a live, authenticated connection.
    pub async fn resolve(&self, conn: &ConnectionId) -> Option<Peer> {
        self.peers.read().await.get(conn).cloned()
    }

    /// Resolve every id in `ids` that is still live, in arbitrary order.
    pub async fn resolve_members(&self, ids: &HashSet<ConnectionId>) -> Vec<(ConnectionId, Peer)> {
        let peers = self.peers.read().await;
        ids.iter()
            .filter_map(|id| peers.get(id).map(|p| (id.clone(), p.clone())))
            .collect()
    }

    /// Remove a connection on transport close. Returns the identity that
    /// was bound, if any.
    pub async fn evict(&self, conn: &ConnectionId) -> Option<Identity> {
        self.peers
            .write()
            .await
            .remove(conn)
            .map(|peer| peer.identity)
    }

    /// Number of authenticated connections.
    pub async fn count(&self) -> usize {
        self.peers.read().await.len()
    }
}
