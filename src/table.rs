//! Kademlia routing table.
//!
//! 256 buckets indexed by log2 distance class to the local node, each holding
//! up to `bucket_size` live records ordered most-recently-verified-first plus
//! a bounded queue of replacement candidates. The table is a plain structure;
//! [`OverlayNode`](crate::node::OverlayNode) wraps it in the one table-wide
//! mutex every structural mutation serializes under.

use tracing::trace;

use crate::id::NodeId;
use crate::record::PeerRecord;

/// One bucket per possible log2 distance class.
pub const BUCKET_COUNT: usize = 256;

/// Outcome of a table admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The record entered a live slot.
    Admitted,
    /// An existing live entry was refreshed or superseded.
    Updated,
    /// The bucket is full; the record was queued as a replacement candidate.
    Queued,
    /// Stale sequence number or the local identifier; nothing changed.
    Rejected,
}

#[derive(Debug, Clone)]
struct BucketEntry {
    record: PeerRecord,
    verified: bool,
}

/// Live entries are ordered most-recently-verified first; entries admitted
/// from inbound traffic start unverified at the back until an outbound
/// exchange confirms them. Replacements are newest-first.
#[derive(Debug, Default, Clone)]
struct Bucket {
    entries: Vec<BucketEntry>,
    replacements: Vec<PeerRecord>,
}

impl Bucket {
    fn position(&self, id: &NodeId) -> Option<usize> {
        self.entries.iter().position(|e| e.record.id() == *id)
    }

    fn insert_live(&mut self, entry: BucketEntry) {
        if entry.verified {
            self.entries.insert(0, entry);
        } else {
            self.entries.push(entry);
        }
    }

    fn queue_replacement(&mut self, record: PeerRecord, cap: usize) {
        self.scrub_replacement(&record.id());
        self.replacements.insert(0, record);
        self.replacements.truncate(cap);
    }

    fn scrub_replacement(&mut self, id: &NodeId) {
        self.replacements.retain(|r| r.id() != *id);
    }

    /// Pull the newest replacement candidate into a freed live slot.
    fn promote_replacement(&mut self) {
        if self.replacements.is_empty() {
            return;
        }
        let record = self.replacements.remove(0);
        trace!(promoted = ?record.id(), "replacement candidate promoted to live slot");
        self.entries.push(BucketEntry {
            record,
            verified: false,
        });
    }
}

/// The overlay's single shared, long-lived structure: every known peer,
/// bucketed by distance class from the local node.
#[derive(Debug)]
pub struct RoutingTable {
    local_id: NodeId,
    bucket_size: usize,
    replacement_cap: usize,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    /// Create an empty table around the local identifier.
    pub fn new(local_id: NodeId, bucket_size: usize, replacement_cap: usize) -> Self {
        Self {
            local_id,
            bucket_size,
            replacement_cap,
            buckets: vec![Bucket::default(); BUCKET_COUNT],
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Bucket index for a foreign identifier; `None` for the local one,
    /// which never enters the table.
    fn bucket_of(&self, id: &NodeId) -> Option<usize> {
        self.local_id.log2_distance(id).map(|d| (d - 1) as usize)
    }

    /// Admit or update a peer.
    ///
    /// A known identifier is superseded in place when the sequence number is
    /// not older; an outbound-confirmed exchange (`is_inbound == false`)
    /// also re-verifies the entry and moves it to the bucket front. A full
    /// bucket queues the candidate instead of evicting speculatively, unless
    /// `force_set_live` (administrative override) evicts the
    /// least-recently-verified entry to make room.
    pub fn add_node(
        &mut self,
        record: PeerRecord,
        is_inbound: bool,
        force_set_live: bool,
    ) -> AddOutcome {
        let Some(idx) = self.bucket_of(&record.id()) else {
            return AddOutcome::Rejected;
        };
        let verified = force_set_live || !is_inbound;
        let bucket = &mut self.buckets[idx];

        if let Some(pos) = bucket.position(&record.id()) {
            if !record.supersedes(&bucket.entries[pos].record) {
                return AddOutcome::Rejected;
            }
            let mut entry = bucket.entries.remove(pos);
            entry.record = record;
            if verified {
                entry.verified = true;
                bucket.entries.insert(0, entry);
            } else {
                bucket.entries.insert(pos, entry);
            }
            return AddOutcome::Updated;
        }

        if bucket.entries.len() < self.bucket_size {
            bucket.scrub_replacement(&record.id());
            bucket.insert_live(BucketEntry { record, verified });
            return AddOutcome::Admitted;
        }

        if force_set_live {
            if let Some(evicted) = bucket.entries.pop() {
                trace!(
                    evicted = ?evicted.record.id(),
                    "forced admission evicted least-recently-verified entry"
                );
            }
            bucket.scrub_replacement(&record.id());
            bucket.insert_live(BucketEntry {
                record,
                verified: true,
            });
            return AddOutcome::Admitted;
        }

        bucket.queue_replacement(record, self.replacement_cap);
        AddOutcome::Queued
    }

    /// Look up a live record by identifier.
    pub fn get_node(&self, id: &NodeId) -> Option<PeerRecord> {
        let idx = self.bucket_of(id)?;
        let bucket = &self.buckets[idx];
        bucket
            .position(id)
            .map(|pos| bucket.entries[pos].record.clone())
    }

    /// Remove a live entry outright, with no liveness check; the caller has
    /// already decided the peer is gone. Frees the slot for the newest
    /// replacement candidate. Returns whether a live entry was removed.
    pub fn remove(&mut self, id: &NodeId) -> bool {
        let Some(idx) = self.bucket_of(id) else {
            return false;
        };
        let bucket = &mut self.buckets[idx];
        bucket.scrub_replacement(id);
        let Some(pos) = bucket.position(id) else {
            return false;
        };
        bucket.entries.remove(pos);
        bucket.promote_replacement();
        true
    }

    /// Up to `count` live records ordered by ascending distance to `target`,
    /// ties broken by identifier.
    pub fn closest_to(&self, target: &NodeId, count: usize) -> Vec<PeerRecord> {
        let mut all: Vec<PeerRecord> = self
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter().map(|e| e.record.clone()))
            .collect();

        all.sort_by(|a, b| {
            let da = a.id().distance(target);
            let db = b.id().distance(target);
            da.cmp(&db).then_with(|| a.id().cmp(&b.id()))
        });

        all.truncate(count);
        all
    }

    /// Live records at one log2 distance class. Class `0` is the local
    /// record's business and answered by the node, not the table.
    pub fn entries_at_distance(&self, distance: u16) -> Vec<PeerRecord> {
        if distance == 0 || distance as usize > BUCKET_COUNT {
            return Vec::new();
        }
        self.buckets[(distance - 1) as usize]
            .entries
            .iter()
            .map(|e| e.record.clone())
            .collect()
    }

    /// Read-only diagnostic view: hex identifiers per bucket, near to far.
    pub fn snapshot(&self) -> Vec<Vec<String>> {
        self.buckets
            .iter()
            .map(|b| b.entries.iter().map(|e| e.record.id().to_hex()).collect())
            .collect()
    }

    /// Total live entries across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.entries.is_empty())
    }
}
