//! Overlay tuning knobs.

use std::time::Duration;

/// Live entries per routing bucket (the Kademlia `k`).
pub const DEFAULT_BUCKET_SIZE: usize = 16;

/// Outstanding parallel queries per iterative lookup (the Kademlia `alpha`).
pub const DEFAULT_PARALLELISM: usize = 3;

/// Peers offered per content during neighborhood gossip.
pub const DEFAULT_GOSSIP_FANOUT: usize = 4;

/// Configuration shared by every engine of an overlay node.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Live entries per bucket; also the width of lookup seed and result
    /// sets.
    pub bucket_size: usize,
    /// Fallback candidates kept per bucket while its live slots are full.
    pub replacement_queue_size: usize,
    /// Bound on concurrently in-flight queries within one lookup.
    pub parallelism: usize,
    /// Per-query transport deadline. Local to each query, never global to a
    /// lookup.
    pub request_timeout: Duration,
    /// Peers offered per content key during gossip.
    pub gossip_fanout: usize,
    /// Entries of the per-peer data-radius memory.
    pub radius_cache_size: usize,
    /// Ceiling on entries in a single offer, ours or a peer's.
    pub max_offer_entries: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
            replacement_queue_size: 8,
            parallelism: DEFAULT_PARALLELISM,
            request_timeout: Duration::from_secs(2),
            gossip_fanout: DEFAULT_GOSSIP_FANOUT,
            radius_cache_size: 1024,
            max_offer_entries: 64,
        }
    }
}

impl OverlayConfig {
    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_gossip_fanout(mut self, gossip_fanout: usize) -> Self {
        self.gossip_fanout = gossip_fanout;
        self
    }
}
