//! The ordered filter pipeline: every inbound message is
//! offered to each filter in turn until one consumes it. Filters hold only
//! their own small bit of persistent state (the alert public key, per-peer
//! rebroadcast timers, the orphan pool); all chain and peer state lives on
//! `Node` and is passed in explicitly, so filter order is just a `Vec` the
//! node iterates — no trait-object self-reference tangles.

mod alert;
mod block;
mod endpoint;
mod share;
mod transaction;
mod version;

pub use alert::AlertFilter;
pub use block::BlockFilter;
pub use endpoint::EndpointFilter;
pub use share::ShareFilter;
pub use transaction::TransactionFilter;
pub use version::VersionFilter;

use crate::node::Node;
use crate::peer::PeerId;
use crate::wire::Message;
use coin_core::CoinResult;

/// One stage of the pipeline. `handle` returns `Ok(true)` if it consumed
/// the message (dispatch stops), `Ok(false)` to let the next filter try,
/// or `Err` if the message or the peer's behaviour was invalid — the
/// caller logs the rejection and may queue the peer for disconnect, but
/// dispatch itself always continues to the next *message*.
pub trait Filter: Send {
    fn name(&self) -> &'static str;

    fn handle(&mut self, node: &mut Node, peer: PeerId, message: &Message) -> CoinResult<bool>;

    /// Periodic housekeeping unrelated to any single message (orphan
    /// expiry, rebroadcast timers). Called on every housekeeping tick;
    /// default no-op.
    fn tick(&mut self, _node: &mut Node) {}
}

/// Builds the fixed filter order the wire protocol requires: Version,
/// Endpoint, Block, Share, Transaction, Alert. `own_nonce` is the nonce
/// `Node` advertises in its own `version` messages.
#[must_use]
pub fn default_pipeline(own_nonce: u64) -> Vec<Box<dyn Filter>> {
    vec![
        Box::new(VersionFilter::new(own_nonce)),
        Box::new(EndpointFilter::new()),
        Box::new(BlockFilter::new()),
        Box::new(ShareFilter::new()),
        Box::new(TransactionFilter::new()),
        Box::new(AlertFilter::new()),
    ]
}
