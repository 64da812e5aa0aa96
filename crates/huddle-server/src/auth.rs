//! Credential token verification.
//!
//! Tokens are minted by the external login service (`POST /api/login`);
//! this server only needs to resolve a token to an [`Identity`]. The
//! verifier is a trait so deployments can plug in whatever the login
//! service issues; [`InMemoryTokenVerifier`] stands in for it in tests
//! and single-process setups.

use std::collections::HashMap;

use async_trait::async_trait;
use huddle_common::{AuthError, Identity};

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve a credential token to the identity it was issued for.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Token → identity map, populated out of band.
#[derive(Default)]
pub struct InMemoryTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl InMemoryTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }

    pub fn with_tokens(tokens: impl IntoIterator<Item = (String, Identity)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TokenVerifier for InMemoryTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
