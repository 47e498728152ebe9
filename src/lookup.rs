//! Iterative traversals across the overlay.
//!
//! Both lookup flavors walk the same way: seed a distance-ordered shortlist
//! from the local table, keep a bounded number of queries in flight, fold
//! every answer back into the shortlist, and never query the same peer
//! twice. A node lookup runs until the closest-known window is exhausted; a
//! content lookup additionally terminates the moment any peer yields the
//! payload, abandoning whatever is still in flight.

use std::collections::HashSet;

use bytes::Bytes;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

use crate::error::OverlayError;
use crate::id::{derive_content_id, Distance, NodeId};
use crate::net::{FoundContent, OverlayNetwork};
use crate::node::{timed, OverlayNode};
use crate::record::PeerRecord;
use crate::trace::LookupTrace;

/// How many distance classes one iterative find-nodes query asks for.
const LOOKUP_DISTANCE_CLASSES: usize = 3;

/// Content pulled out of the network by a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentResult {
    pub content: Bytes,
    /// True when the payload arrived over the side-channel rather than
    /// inline in a response.
    pub utp_transfer: bool,
}

/// A content lookup outcome bundled with its audit trail. `result` is
/// `None` when the traversal exhausted every reachable candidate without
/// finding the payload; the trace still tells the whole story.
#[derive(Debug, Clone)]
pub struct TracedContentResult {
    pub result: Option<ContentResult>,
    pub trace: LookupTrace,
}

// ─────────────────────────────────────────────────────────────────────────
// Shortlist
// ─────────────────────────────────────────────────────────────────────────

struct ShortEntry {
    distance: Distance,
    queried: bool,
    record: PeerRecord,
}

/// Candidate bookkeeping for one traversal: entries stay sorted by distance
/// to the target with ties broken by identifier, a peer is only ever
/// dispatched once, and dispatch only considers the closest `window`
/// entries.
struct Shortlist {
    target: NodeId,
    window: usize,
    seen: HashSet<NodeId>,
    entries: Vec<ShortEntry>,
}

impl Shortlist {
    fn new(target: NodeId, window: usize, local_id: NodeId) -> Self {
        let mut seen = HashSet::new();
        seen.insert(local_id);
        Self {
            target,
            window,
            seen,
            entries: Vec::new(),
        }
    }

    /// Returns false for repeat sightings and the local node.
    fn insert(&mut self, record: PeerRecord) -> bool {
        if !self.seen.insert(record.id()) {
            return false;
        }
        let distance = self.target.distance(&record.id());
        let key = (distance, record.id());
        let pos = self
            .entries
            .binary_search_by(|entry| (entry.distance, entry.record.id()).cmp(&key))
            .unwrap_or_else(|pos| pos);
        self.entries.insert(
            pos,
            ShortEntry {
                distance,
                queried: false,
                record,
            },
        );
        true
    }

    /// The closest candidate inside the window that has never been
    /// dispatched, marked queried on the way out.
    fn next_unqueried(&mut self) -> Option<PeerRecord> {
        let window = self.window.min(self.entries.len());
        for entry in &mut self.entries[..window] {
            if !entry.queried {
                entry.queried = true;
                return Some(entry.record.clone());
            }
        }
        None
    }

    /// The closest `count` known records, dispatched or not.
    fn closest(&self, count: usize) -> Vec<PeerRecord> {
        self.entries
            .iter()
            .take(count)
            .map(|entry| entry.record.clone())
            .collect()
    }
}

/// Distance classes to ask `peer` for when walking toward `target`: the
/// class the target falls in from the peer's point of view, widened to the
/// adjacent classes.
fn lookup_distances(target: &NodeId, peer: &NodeId) -> Vec<u16> {
    let center = peer.log2_distance(target).unwrap_or(0);
    let mut classes = vec![center];
    let mut step = 1u16;
    while classes.len() < LOOKUP_DISTANCE_CLASSES && step <= 256 {
        if center + step <= 256 {
            classes.push(center + step);
        }
        if classes.len() < LOOKUP_DISTANCE_CLASSES && center > step {
            classes.push(center - step);
        }
        step += 1;
    }
    classes
}

// ─────────────────────────────────────────────────────────────────────────
// Drivers
// ─────────────────────────────────────────────────────────────────────────

impl<N: OverlayNetwork> OverlayNode<N> {
    /// Iterative node lookup. Walks toward `target` until no unqueried
    /// candidate remains among the closest known, and returns that closest
    /// set. Per-peer failures are absorbed; an unreachable network simply
    /// yields what the local table already knew.
    pub async fn recursive_find_nodes(&self, target: &NodeId) -> Vec<PeerRecord> {
        let width = self.config.bucket_size;
        let mut shortlist = Shortlist::new(*target, width, self.local_id());
        for record in self.table.lock().await.closest_to(target, width) {
            shortlist.insert(record);
        }

        let mut in_flight = JoinSet::new();
        loop {
            while in_flight.len() < self.config.parallelism {
                let Some(peer) = shortlist.next_unqueried() else { break };
                let node = self.clone();
                let target = *target;
                in_flight.spawn(async move {
                    let distances = lookup_distances(&target, &peer.id());
                    let outcome = node.find_nodes(&peer, &distances).await;
                    (peer, outcome)
                });
            }
            let Some(joined) = in_flight.join_next().await else { break };
            let Ok((peer, outcome)) = joined else { continue };
            match outcome {
                Ok(records) => {
                    for record in records {
                        shortlist.insert(record);
                    }
                }
                Err(err) => {
                    debug!(peer = %peer.id(), %err, "node lookup query failed");
                }
            }
        }
        shortlist.closest(width)
    }

    /// Iterative content lookup. `Ok(None)` means every reachable candidate
    /// was exhausted without the payload turning up.
    pub async fn recursive_find_content(
        &self,
        content_key: &[u8],
    ) -> Result<Option<ContentResult>, OverlayError> {
        self.content_lookup_inner(content_key, None).await
    }

    /// Iterative content lookup with a full audit trail. Not finding the
    /// payload is not an error here; the trace is the product.
    pub async fn trace_recursive_find_content(
        &self,
        content_key: &[u8],
    ) -> Result<TracedContentResult, OverlayError> {
        let mut trace = LookupTrace::new(&self.record, derive_content_id(content_key));
        let result = self
            .content_lookup_inner(content_key, Some(&mut trace))
            .await?;
        Ok(TracedContentResult { result, trace })
    }

    async fn content_lookup_inner(
        &self,
        content_key: &[u8],
        mut trace: Option<&mut LookupTrace>,
    ) -> Result<Option<ContentResult>, OverlayError> {
        let content_id = derive_content_id(content_key);

        // A local hit short-circuits the network entirely.
        if let Some(content) = self.store.get_by_id(&content_id)? {
            if let Some(t) = trace.as_deref_mut() {
                t.mark_received_from(self.local_id());
            }
            return Ok(Some(ContentResult {
                content,
                utp_transfer: false,
            }));
        }

        let target = NodeId::new(*content_id.as_bytes());
        let width = self.config.bucket_size;
        let mut shortlist = Shortlist::new(target, width, self.local_id());
        let seeds = self.table.lock().await.closest_to(&target, width);
        if let Some(t) = trace.as_deref_mut() {
            t.record_seeds(&seeds);
        }
        for seed in seeds {
            shortlist.insert(seed);
        }

        let key = Bytes::copy_from_slice(content_key);
        let mut in_flight = JoinSet::new();
        // Dispatched but not yet folded back in; cancelled on early exit.
        let mut pending: HashSet<NodeId> = HashSet::new();

        loop {
            while in_flight.len() < self.config.parallelism {
                let Some(peer) = shortlist.next_unqueried() else { break };
                pending.insert(peer.id());
                let node = self.clone();
                let key = key.clone();
                in_flight.spawn(async move {
                    let started = Instant::now();
                    let outcome = node.find_content(&peer, &key).await;
                    (peer, started.elapsed(), outcome)
                });
            }

            let Some(joined) = in_flight.join_next().await else { break };
            let Ok((peer, elapsed, outcome)) = joined else { continue };
            pending.remove(&peer.id());

            match outcome {
                Ok(FoundContent::Content(content)) => {
                    if let Some(t) = trace.as_deref_mut() {
                        t.record_response(peer.id(), elapsed, Vec::new());
                        t.mark_received_from(peer.id());
                    }
                    self.abandon_in_flight(in_flight, pending, trace);
                    return Ok(Some(ContentResult {
                        content,
                        utp_transfer: false,
                    }));
                }
                Ok(FoundContent::ConnectionId(conn)) => {
                    if let Some(t) = trace.as_deref_mut() {
                        t.record_response(peer.id(), elapsed, Vec::new());
                    }
                    let pulled = timed(
                        self.config.request_timeout,
                        self.network.transfer(&peer, &conn),
                    )
                    .await;
                    match pulled {
                        Ok(content) => {
                            if let Some(t) = trace.as_deref_mut() {
                                t.mark_received_from(peer.id());
                            }
                            self.abandon_in_flight(in_flight, pending, trace);
                            return Ok(Some(ContentResult {
                                content,
                                utp_transfer: true,
                            }));
                        }
                        // The peer advertised content it could not deliver.
                        // That is its failure alone; the walk goes on.
                        Err(err) => {
                            debug!(peer = %peer.id(), %err, "side-channel transfer failed");
                            if let Some(t) = trace.as_deref_mut() {
                                t.record_cancelled(peer.id());
                            }
                        }
                    }
                }
                Ok(FoundContent::Peers(records)) => {
                    if let Some(t) = trace.as_deref_mut() {
                        t.record_response(
                            peer.id(),
                            elapsed,
                            records.iter().map(|r| r.id()).collect(),
                        );
                        for record in &records {
                            t.record_metadata(record);
                        }
                    }
                    for record in records {
                        shortlist.insert(record);
                    }
                }
                Err(err) => {
                    debug!(peer = %peer.id(), %err, "content query failed");
                    if let Some(t) = trace.as_deref_mut() {
                        t.record_cancelled(peer.id());
                    }
                }
            }
        }
        Ok(None)
    }

    /// Stop outstanding queries after early termination. A query that ran
    /// far enough to refresh the routing table keeps that effect; its answer
    /// is discarded, and every peer never folded back into the walk is
    /// listed in the trace as cancelled.
    fn abandon_in_flight<T: 'static>(
        &self,
        mut in_flight: JoinSet<T>,
        pending: HashSet<NodeId>,
        trace: Option<&mut LookupTrace>,
    ) {
        in_flight.abort_all();
        if let Some(t) = trace {
            for id in pending {
                t.record_cancelled(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;

    fn record(bytes: [u8; 32]) -> PeerRecord {
        let addr: SocketAddr = "127.0.0.1:9000".parse().expect("test address parses");
        PeerRecord::new(NodeId::new(bytes), 1, addr)
    }

    fn id_with_low_byte(byte: u8) -> [u8; 32] {
        let mut raw = [0u8; 32];
        raw[31] = byte;
        raw
    }

    #[test]
    fn lookup_distances_center_on_the_target_class() {
        let target = NodeId::new(id_with_low_byte(0));
        let peer = NodeId::new(id_with_low_byte(0x0c));

        // log2(0x0c) = 4, so the query widens to the adjacent classes.
        assert_eq!(lookup_distances(&target, &peer), vec![4, 5, 3]);
    }

    #[test]
    fn lookup_distances_clamp_at_the_keyspace_edges() {
        let target = NodeId::new([0u8; 32]);
        let mut far = [0u8; 32];
        far[0] = 0x80;
        assert_eq!(
            lookup_distances(&target, &NodeId::new(far)),
            vec![256, 255, 254],
            "no class above 256 exists"
        );

        let near = NodeId::new(id_with_low_byte(0x01));
        assert_eq!(
            lookup_distances(&target, &near),
            vec![1, 2, 3],
            "no class below 1 is queried"
        );
    }

    #[test]
    fn shortlist_orders_by_distance_and_never_requeries() {
        let target = NodeId::new([0u8; 32]);
        let local = NodeId::new(id_with_low_byte(0xff));
        let mut shortlist = Shortlist::new(target, 3, local);

        let near = record(id_with_low_byte(0x01));
        let mid = record(id_with_low_byte(0x04));
        let far = record(id_with_low_byte(0x09));

        assert!(shortlist.insert(far.clone()));
        assert!(shortlist.insert(near.clone()));
        assert!(shortlist.insert(mid.clone()));
        assert!(!shortlist.insert(near.clone()), "repeat sighting is ignored");
        assert!(
            !shortlist.insert(record(id_with_low_byte(0xff))),
            "the local node never becomes a candidate"
        );

        let order: Vec<NodeId> = std::iter::from_fn(|| shortlist.next_unqueried())
            .map(|r| r.id())
            .collect();
        assert_eq!(order, vec![near.id(), mid.id(), far.id()]);
        assert!(
            shortlist.next_unqueried().is_none(),
            "every candidate was already dispatched"
        );
    }

    #[test]
    fn shortlist_window_bounds_dispatch_but_not_knowledge() {
        let target = NodeId::new([0u8; 32]);
        let local = NodeId::new(id_with_low_byte(0xff));
        let mut shortlist = Shortlist::new(target, 2, local);

        for byte in [0x07, 0x03, 0x01, 0x05] {
            shortlist.insert(record(id_with_low_byte(byte)));
        }

        // Only the two closest are eligible for dispatch.
        let mut dispatched = Vec::new();
        while let Some(peer) = shortlist.next_unqueried() {
            dispatched.push(peer.id());
        }
        assert_eq!(
            dispatched,
            vec![
                NodeId::new(id_with_low_byte(0x01)),
                NodeId::new(id_with_low_byte(0x03)),
            ]
        );

        // The full set is still known and ordered.
        let known: Vec<NodeId> = shortlist.closest(4).iter().map(|r| r.id()).collect();
        assert_eq!(
            known,
            vec![
                NodeId::new(id_with_low_byte(0x01)),
                NodeId::new(id_with_low_byte(0x03)),
                NodeId::new(id_with_low_byte(0x05)),
                NodeId::new(id_with_low_byte(0x07)),
            ]
        );
    }

    #[test]
    fn closer_discoveries_enter_the_dispatch_window() {
        let target = NodeId::new([0u8; 32]);
        let local = NodeId::new(id_with_low_byte(0xff));
        let mut shortlist = Shortlist::new(target, 2, local);

        shortlist.insert(record(id_with_low_byte(0x08)));
        shortlist.insert(record(id_with_low_byte(0x0c)));
        assert_eq!(
            shortlist
                .next_unqueried()
                .expect("first candidate dispatches")
                .id(),
            NodeId::new(id_with_low_byte(0x08))
        );

        // A closer peer learned mid-walk takes dispatch priority.
        shortlist.insert(record(id_with_low_byte(0x02)));
        assert_eq!(
            shortlist
                .next_unqueried()
                .expect("closer discovery dispatches next")
                .id(),
            NodeId::new(id_with_low_byte(0x02))
        );
    }
}
