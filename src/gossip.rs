use std::sync::Arc;

use tracing::warn;

use crate::node::Node;
use crate::types::PeerId;
use crate::wire::{self, DecodeError, DeltaBatch};

/// Contract the gossip transport drives.
///
/// The transport delivers inbound payloads through the `on_gossip_*`
/// callbacks and pulls our outbound traffic through [`Gossiper::gossip`]
/// (or by draining via [`crate::node::ClusterState::encode`] when it is
/// about to send). This store disseminates changes, never full
/// snapshots, so every method deals in delta batches.
pub trait Gossiper: Send + Sync {
    /// Current outbound snapshot, without draining it.
    fn gossip(&self) -> DeltaBatch;

    /// Merge a broadcast payload; returns the post-merge outbound
    /// snapshot, which the transport may flood in turn.
    fn on_gossip(&self, payload: &[u8]) -> Result<DeltaBatch, DecodeError>;

    /// Merge a payload broadcast by a known peer.
    fn on_gossip_broadcast(&self, src: PeerId, payload: &[u8]) -> Result<DeltaBatch, DecodeError>;

    /// Merge a payload sent directly to us; no snapshot is returned.
    fn on_gossip_unicast(&self, src: PeerId, payload: &[u8]) -> Result<(), DecodeError>;
}

/// Implements [`Gossiper`] over a [`Node`] by decode-and-delegate; no
/// policy of its own.
pub struct GossipAdapter {
    node: Arc<Node>,
}

impl GossipAdapter {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    fn merge_payload(&self, payload: &[u8]) -> Result<DeltaBatch, DecodeError> {
        let deltas = wire::decode(payload).map_err(|err| {
            warn!(%err, "dropping undecodable gossip payload");
            err
        })?;
        Ok(DeltaBatch::new(self.node.write().merge(deltas)))
    }
}

impl Gossiper for GossipAdapter {
    fn gossip(&self) -> DeltaBatch {
        DeltaBatch::new(self.node.read().pending().to_vec())
    }

    fn on_gossip(&self, payload: &[u8]) -> Result<DeltaBatch, DecodeError> {
        self.merge_payload(payload)
    }

    fn on_gossip_broadcast(&self, _src: PeerId, payload: &[u8]) -> Result<DeltaBatch, DecodeError> {
        self.merge_payload(payload)
    }

    fn on_gossip_unicast(&self, _src: PeerId, payload: &[u8]) -> Result<(), DecodeError> {
        self.merge_payload(payload).map(|_| ())
    }
}
