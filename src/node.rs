//! The overlay node: shared state and single-hop operations.
//!
//! [`OverlayNode`] ties the routing table, the radius-aware store adapter,
//! and the transport facade together. This module holds construction, the
//! table side-effect helpers every exchange funnels through, the single-hop
//! client operations (ping, find-nodes, find-content), and the handlers for
//! the same messages arriving from peers. The iterative traversals live in
//! [`lookup`](crate::lookup), push propagation in [`gossip`](crate::gossip).

use std::collections::HashSet;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::debug;

use crate::config::OverlayConfig;
use crate::error::OverlayError;
use crate::id::{derive_content_id, Distance, NodeId};
use crate::net::{
    AcceptBitmask, ContentEntry, FoundContent, OfferKind, OfferRequest, OverlayNetwork, Pong,
};
use crate::record::PeerRecord;
use crate::store::{ContentStore, RadiusPolicy, RadiusStore};
use crate::table::{AddOutcome, RoutingTable};

/// Ceiling on records in one find-nodes reply, ours or a peer's.
pub(crate) const FIND_NODES_RESULT_LIMIT: usize = 32;

/// What this node answers a content query with: the payload itself or its
/// closest records to the address. Whether a payload rides inline or through
/// the side-channel is the transport's encoding decision, not made here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentAnswer {
    Content(Bytes),
    Peers(Vec<PeerRecord>),
}

/// A peer node of the overlay.
///
/// Cheap to clone; clones share the routing table, store adapter, transport,
/// and radius memory.
pub struct OverlayNode<N: OverlayNetwork> {
    pub(crate) record: PeerRecord,
    pub(crate) table: Arc<Mutex<RoutingTable>>,
    pub(crate) store: Arc<RadiusStore>,
    pub(crate) network: Arc<N>,
    pub(crate) radius_cache: Arc<Mutex<LruCache<NodeId, Distance>>>,
    pub(crate) config: Arc<OverlayConfig>,
}

impl<N: OverlayNetwork> Clone for OverlayNode<N> {
    fn clone(&self) -> Self {
        Self {
            record: self.record.clone(),
            table: self.table.clone(),
            store: self.store.clone(),
            network: self.network.clone(),
            radius_cache: self.radius_cache.clone(),
            config: self.config.clone(),
        }
    }
}

impl<N: OverlayNetwork> OverlayNode<N> {
    /// Build a node around its identity record, transport, and the external
    /// content store.
    pub fn new(
        record: PeerRecord,
        network: N,
        store: Arc<dyn ContentStore>,
        policy: Box<dyn RadiusPolicy>,
        config: OverlayConfig,
    ) -> Self {
        let local_id = record.id();
        let cache_size =
            NonZeroUsize::new(config.radius_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            record,
            table: Arc::new(Mutex::new(RoutingTable::new(
                local_id,
                config.bucket_size,
                config.replacement_queue_size,
            ))),
            store: Arc::new(RadiusStore::new(local_id, store, policy)),
            network: Arc::new(network),
            radius_cache: Arc::new(Mutex::new(LruCache::new(cache_size))),
            config: Arc::new(config),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.record.id()
    }

    pub fn record(&self) -> &PeerRecord {
        &self.record
    }

    /// The local data radius as currently claimed by the store adapter.
    pub fn radius(&self) -> Distance {
        self.store.radius()
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Direct access to the radius-aware store adapter.
    pub fn store(&self) -> &RadiusStore {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────
    // Routing table side effects
    // ─────────────────────────────────────────────────────────────────────

    /// Record a peer we heard back from: verified liveness refresh.
    pub(crate) async fn observe_verified(&self, record: &PeerRecord) {
        self.table.lock().await.add_node(record.clone(), false, false);
    }

    /// Record a peer we only heard about: unverified candidate.
    pub(crate) async fn observe_candidate(&self, record: PeerRecord) {
        self.table.lock().await.add_node(record, true, false);
    }

    pub(crate) async fn remember_radius(&self, id: NodeId, radius: Distance) {
        self.radius_cache.lock().await.put(id, radius);
    }

    /// The peer's radius as last declared to us, if we ever saw one.
    pub(crate) async fn known_radius(&self, id: &NodeId) -> Option<Distance> {
        self.radius_cache.lock().await.get(id).copied()
    }

    /// Administrative admission, the `forceSetLive` path: the record enters
    /// a live slot even if the bucket has to evict for it.
    pub async fn add_record(&self, record: PeerRecord) -> AddOutcome {
        self.table.lock().await.add_node(record, true, true)
    }

    /// Record lookup answering for the local identifier as well.
    pub async fn get_record(&self, id: &NodeId) -> Option<PeerRecord> {
        if *id == self.local_id() {
            return Some(self.record.clone());
        }
        self.table.lock().await.get_node(id)
    }

    /// Outright removal of a live entry, no liveness check.
    pub async fn remove_record(&self, id: &NodeId) -> bool {
        self.table.lock().await.remove(id)
    }

    /// Resolve a record locally, falling back to a network lookup. The
    /// freshest (highest sequence) match wins.
    pub async fn resolve_record(&self, id: &NodeId) -> Option<PeerRecord> {
        if let Some(record) = self.get_record(id).await {
            return Some(record);
        }
        self.recursive_find_nodes(id)
            .await
            .into_iter()
            .filter(|r| r.id() == *id)
            .max_by_key(|r| r.seq())
    }

    pub async fn table_len(&self) -> usize {
        self.table.lock().await.len()
    }

    /// Diagnostic bucket view, near to far.
    pub async fn table_snapshot(&self) -> Vec<Vec<String>> {
        self.table.lock().await.snapshot()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Single-hop client operations
    // ─────────────────────────────────────────────────────────────────────

    /// Liveness round-trip. Remembers the peer's declared radius and
    /// refreshes its table entry.
    pub async fn ping(&self, to: &PeerRecord) -> Result<Pong, OverlayError> {
        let pong = timed(self.config.request_timeout, self.network.ping(to)).await?;
        self.observe_verified(to).await;
        self.remember_radius(to.id(), pong.data_radius).await;
        Ok(pong)
    }

    /// One "find nodes at these distance classes" request to one peer, the
    /// primitive the iterative traversal repeats. The answer is filtered
    /// before anything trusts it.
    pub async fn find_nodes(
        &self,
        to: &PeerRecord,
        distances: &[u16],
    ) -> Result<Vec<PeerRecord>, OverlayError> {
        let found = timed(
            self.config.request_timeout,
            self.network.find_nodes(to, distances),
        )
        .await?;
        self.observe_verified(to).await;
        let records = self.sanitize_found_nodes(to, Some(distances), found);
        for record in &records {
            self.observe_candidate(record.clone()).await;
        }
        Ok(records)
    }

    /// One content query to one peer, returned in its three-case shape with
    /// no side-channel fetch attempted.
    pub async fn find_content(
        &self,
        to: &PeerRecord,
        content_key: &[u8],
    ) -> Result<FoundContent, OverlayError> {
        let found = timed(
            self.config.request_timeout,
            self.network.find_content(to, content_key),
        )
        .await?;
        self.observe_verified(to).await;
        match found {
            FoundContent::Peers(records) => {
                let records = self.sanitize_found_nodes(to, None, records);
                for record in &records {
                    self.observe_candidate(record.clone()).await;
                }
                Ok(FoundContent::Peers(records))
            }
            other => Ok(other),
        }
    }

    /// Drop untrustworthy entries from a peer's find-nodes answer: our own
    /// record, duplicates, records outside the distance classes we asked
    /// that peer for, and anything past the reply ceiling.
    pub(crate) fn sanitize_found_nodes(
        &self,
        from: &PeerRecord,
        requested: Option<&[u16]>,
        found: Vec<PeerRecord>,
    ) -> Vec<PeerRecord> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut kept = Vec::new();
        for record in found {
            if kept.len() >= FIND_NODES_RESULT_LIMIT {
                debug!(from = ?from.id(), "find-nodes reply exceeded result ceiling");
                break;
            }
            if record.id() == self.local_id() || !seen.insert(record.id()) {
                continue;
            }
            if let Some(distances) = requested {
                let class = from.id().log2_distance(&record.id()).unwrap_or(0);
                if !distances.contains(&class) {
                    debug!(
                        from = ?from.id(),
                        record = ?record.id(),
                        class,
                        "dropped record outside requested distance classes"
                    );
                    continue;
                }
            }
            kept.push(record);
        }
        kept
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound handlers
    // ─────────────────────────────────────────────────────────────────────

    /// Answer a peer's liveness probe with our sequence number and radius.
    pub async fn handle_ping(&self, from: &PeerRecord, their_radius: Distance) -> Pong {
        self.observe_candidate(from.clone()).await;
        self.remember_radius(from.id(), their_radius).await;
        Pong {
            enr_seq: self.record.seq(),
            data_radius: self.store.radius(),
        }
    }

    /// Answer a distance-class query from our table; class `0` is our own
    /// record.
    pub async fn handle_find_nodes(&self, from: &PeerRecord, distances: &[u16]) -> Vec<PeerRecord> {
        self.observe_candidate(from.clone()).await;

        let mut classes: Vec<u16> = distances.to_vec();
        classes.sort_unstable();
        classes.dedup();

        let mut records = Vec::new();
        let table = self.table.lock().await;
        for class in classes {
            if records.len() >= FIND_NODES_RESULT_LIMIT {
                break;
            }
            if class == 0 {
                records.push(self.record.clone());
                continue;
            }
            for record in table.entries_at_distance(class) {
                if record.id() != from.id() {
                    records.push(record);
                }
            }
        }
        records.truncate(FIND_NODES_RESULT_LIMIT);
        records
    }

    /// Answer a content query: the payload when we hold it, otherwise our
    /// records closest to the address, never including the caller.
    pub async fn handle_find_content(
        &self,
        from: &PeerRecord,
        content_key: &[u8],
    ) -> Result<ContentAnswer, OverlayError> {
        self.observe_candidate(from.clone()).await;

        let id = derive_content_id(content_key);
        if let Some(content) = self.store.get_by_id(&id)? {
            return Ok(ContentAnswer::Content(content));
        }

        let target = NodeId::new(*id.as_bytes());
        let closest = self
            .table
            .lock()
            .await
            .closest_to(&target, self.config.bucket_size)
            .into_iter()
            .filter(|r| r.id() != from.id())
            .collect();
        Ok(ContentAnswer::Peers(closest))
    }

    /// Decide an inbound offer entry by entry: wanted when in radius and not
    /// already held. Transient entries are admitted on the spot, and newly
    /// admitted content propagates onward to our own neighborhood, excluding
    /// the offerer, on a detached task.
    pub async fn handle_offer(
        &self,
        from: &PeerRecord,
        request: OfferRequest,
    ) -> Result<AcceptBitmask, OverlayError> {
        if request.entries.len() > self.config.max_offer_entries {
            return Err(OverlayError::InvalidInput(format!(
                "offer of {} entries exceeds the {}-entry ceiling",
                request.entries.len(),
                self.config.max_offer_entries
            )));
        }
        self.observe_candidate(from.clone()).await;

        let mut mask = AcceptBitmask::declined(request.entries.len());
        let mut admitted: Vec<ContentEntry> = Vec::new();
        for (i, entry) in request.entries.iter().enumerate() {
            let id = derive_content_id(&entry.key);
            if !self.store.in_range(&id) || self.store.contains(&id)? {
                continue;
            }
            match request.kind {
                OfferKind::Transient => {
                    if self.store.should_store(&entry.key, &entry.content)? {
                        mask.set(i);
                        admitted.push(entry.clone());
                    }
                }
                // Accumulated entries are fetched out-of-band by the
                // transport; here we only signal interest.
                OfferKind::Accumulated => mask.set(i),
            }
        }

        if !admitted.is_empty() {
            let node = self.clone();
            let exclude = from.id();
            let count = admitted.len();
            tokio::spawn(async move {
                let peers = node.gossip(Some(exclude), admitted).await;
                debug!(entries = count, peers, "propagated newly admitted offer entries");
            });
        }
        Ok(mask)
    }
}

/// Bound one transport exchange by the per-query deadline; a timeout is that
/// exchange's failure, nothing more.
pub(crate) async fn timed<T, F>(deadline: Duration, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("request timed out")),
    }
}
