//! Structured audit trail for traced content lookups.
//!
//! A [`LookupTrace`] accumulates, per peer the traversal touched: how long
//! the peer took to answer, which records it answered with, and its record
//! and distance to the target. Queries still in flight when the lookup
//! terminates are listed as cancelled. The serialized form uses camelCase
//! field names and `0x`-prefixed hex identifiers so the trace can be handed
//! to external tooling as-is.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::id::{ContentId, Distance, NodeId};
use crate::record::PeerRecord;

/// One peer's answer within a traced lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResponse {
    /// Round-trip time for this query in milliseconds.
    pub duration_ms: u64,
    /// Identifiers of the records the peer responded with.
    pub responded_with: Vec<NodeId>,
}

/// Record and placement bookkeeping for a peer the traversal learned about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetadata {
    /// The peer's encoded record.
    pub enr: String,
    /// XOR distance between the peer and the lookup target.
    pub distance: Distance,
}

/// The full audit trail of one content lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupTrace {
    /// The node that ran the lookup.
    pub origin: NodeId,
    /// The content address the lookup walked toward.
    pub target_id: ContentId,
    /// The peer that ultimately yielded the content, absent when the
    /// traversal exhausted without finding it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_from: Option<NodeId>,
    /// Per-peer response log. The origin's own entry carries the local
    /// seed candidates with a zero duration.
    pub responses: HashMap<NodeId, TraceResponse>,
    /// Record and distance for every peer the traversal saw.
    pub metadata: HashMap<NodeId, TraceMetadata>,
    /// Wall-clock start of the lookup, unix milliseconds.
    pub started_at_ms: u64,
    /// Peers whose queries were abandoned when the lookup terminated early.
    pub cancelled: Vec<NodeId>,
}

impl LookupTrace {
    /// Start a trace for a lookup running from `origin` toward `target`.
    pub fn new(origin: &PeerRecord, target: ContentId) -> Self {
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let mut trace = Self {
            origin: origin.id(),
            target_id: target,
            received_from: None,
            responses: HashMap::new(),
            metadata: HashMap::new(),
            started_at_ms,
            cancelled: Vec::new(),
        };
        trace.record_metadata(origin);
        trace
    }

    /// Log the local table candidates the traversal starts from, attributed
    /// to the origin with a zero duration.
    pub fn record_seeds(&mut self, seeds: &[PeerRecord]) {
        let ids = seeds.iter().map(|record| record.id()).collect();
        self.responses.insert(
            self.origin,
            TraceResponse {
                duration_ms: 0,
                responded_with: ids,
            },
        );
        for seed in seeds {
            self.record_metadata(seed);
        }
    }

    /// Log a peer's record and its distance to the target.
    pub fn record_metadata(&mut self, record: &PeerRecord) {
        let distance = record.id().distance_to_content(&self.target_id);
        self.metadata.insert(
            record.id(),
            TraceMetadata {
                enr: record.encode(),
                distance,
            },
        );
    }

    /// Log a completed query: who answered, how long it took, and which
    /// records came back.
    pub fn record_response(&mut self, from: NodeId, elapsed: Duration, responded_with: Vec<NodeId>) {
        self.responses.insert(
            from,
            TraceResponse {
                duration_ms: elapsed.as_millis() as u64,
                responded_with,
            },
        );
    }

    /// Log a query abandoned by early termination.
    pub fn record_cancelled(&mut self, id: NodeId) {
        if !self.cancelled.contains(&id) {
            self.cancelled.push(id);
        }
    }

    /// Mark the peer the content ultimately came from.
    pub fn mark_received_from(&mut self, id: NodeId) {
        self.received_from = Some(id);
    }
}
