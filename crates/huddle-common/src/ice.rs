//! ICE server configuration (STUN/TURN) handed to the peer-connection
//! factory when a call session starts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Default public STUN server. Production deployments should append
    /// TURN entries with credentials for clients behind symmetric NAT.
    pub fn default_stun() -> Vec<Self> {
        vec![Self {
            urls: vec!["stun:stun.l.google.com:19302".into()],
            username: None,
            credential: None,
        }]
    }
}
