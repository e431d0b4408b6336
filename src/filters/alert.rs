//! `AlertFilter`: verifies signed operator broadcasts against a hard-coded
//! public key before logging them. There is no operator key for this
//! deployment yet, so every alert is rejected — wiring in a real key is an
//! operational step, not a protocol one.

use super::Filter;
use crate::node::Node;
use crate::peer::PeerId;
use crate::wire::Message;
use coin_core::CoinResult;
use coin_primitives::crypto::{PublicKey, Signature};
use coin_primitives::hash::Hash256;
use tracing::{info, warn};

pub struct AlertFilter {
    operator_key: Option<PublicKey>,
}

impl AlertFilter {
    #[must_use]
    pub fn new() -> Self {
        Self { operator_key: None }
    }

    /// Installs the key alerts must be signed with; without one, `alert`
    /// messages are logged as untrusted and otherwise ignored.
    pub fn set_operator_key(&mut self, key: PublicKey) {
        self.operator_key = Some(key);
    }
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for AlertFilter {
    fn name(&self) -> &'static str {
        "alert"
    }

    fn handle(&mut self, _node: &mut Node, peer_id: PeerId, message: &Message) -> CoinResult<bool> {
        let Message::Alert { payload, signature } = message else {
            return Ok(false);
        };
        let Some(key) = &self.operator_key else {
            warn!(peer = peer_id, "alert received but no operator key is configured; ignoring");
            return Ok(true);
        };
        let Ok(sig) = Signature::from_der(signature) else {
            warn!(peer = peer_id, "alert signature is not valid DER; dropping");
            return Ok(true);
        };
        let digest = Hash256::double_sha256(payload);
        if sig.verify(&digest, key) {
            info!(peer = peer_id, bytes = payload.len(), "verified operator alert");
        } else {
            warn!(peer = peer_id, "alert signature does not match the operator key; dropping");
        }
        Ok(true)
    }
}
