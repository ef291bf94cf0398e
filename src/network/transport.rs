//! Broadcast trait object the daemon wires at startup, mirroring
//! `BroadcastCallback` in the teacher's BFT/consensus modules: the
//! scheduler and finality aggregator don't know or care how a message
//! actually reaches peers, only that `broadcast()` exists.

use super::message::NetworkMessage;
use crate::types::Hash256;
use dashmap::DashSet;

pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, message: NetworkMessage);
}

/// No-op broadcaster for regtest/single-node operation and tests.
#[derive(Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn broadcast(&self, _message: NetworkMessage) {}
}

/// Wraps a [`Broadcaster`] with a relay-once-per-`(block_hash, signer)`
/// policy for finality-signature gossip, so a signature already seen isn't
/// re-flooded to the network on every inbound repeat.
pub struct DedupingRelay<B: Broadcaster> {
    inner: B,
    seen: DashSet<(Hash256, crate::types::MnId)>,
}

impl<B: Broadcaster> DedupingRelay<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            seen: DashSet::new(),
        }
    }

    /// Relay a finality signature, returning `true` if it was actually
    /// broadcast (first time seen) or `false` if it was a duplicate.
    pub fn relay_finality_signature(&self, sig: crate::types::FinalitySignature) -> bool {
        let key = (sig.block_hash, sig.signer_mn_id);
        if !self.seen.insert(key) {
            return false;
        }
        self.inner.broadcast(NetworkMessage::FinalitySignatureGossip(sig));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingBroadcaster(Arc<AtomicUsize>);

    impl Broadcaster for CountingBroadcaster {
        fn broadcast(&self, _message: NetworkMessage) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn duplicate_signature_relayed_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let relay = DedupingRelay::new(CountingBroadcaster(counter.clone()));
        let sig = crate::types::FinalitySignature {
            block_hash: [1u8; 32],
            height: 10,
            signer_mn_id: [2u8; 32],
            signature_bytes: vec![0; 65],
        };
        assert!(relay.relay_finality_signature(sig.clone()));
        assert!(!relay.relay_finality_signature(sig));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
