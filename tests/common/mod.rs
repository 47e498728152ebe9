#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};

use portal_overlay::{
    AcceptBitmask, ContentAnswer, Distance, FoundContent, MemoryContentStore, NodeId,
    OfferRequest, OverlayConfig, OverlayNetwork, OverlayNode, PeerRecord, Pong, PressureHalving,
};

pub const TEST_STORE_CAPACITY: u64 = 1 << 20;

/// In-process transport: requests are dispatched straight into the target
/// node's inbound handlers, with per-peer latency and failure injection and
/// call recording layered on top.
#[derive(Clone)]
pub struct SimNetwork {
    registry: Arc<NetworkRegistry>,
    self_record: PeerRecord,
    latencies: Arc<Mutex<HashMap<NodeId, Duration>>>,
    failures: Arc<Mutex<HashSet<NodeId>>>,
    node_queries: Arc<Mutex<Vec<NodeId>>>,
    content_queries: Arc<Mutex<Vec<NodeId>>>,
    offers: Arc<Mutex<Vec<(NodeId, usize)>>>,
    scripted_nodes: Arc<Mutex<HashMap<NodeId, Vec<PeerRecord>>>>,
    scripted_content: Arc<Mutex<HashMap<NodeId, FoundContent>>>,
    scripted_transfers: Arc<Mutex<HashMap<NodeId, (Bytes, Bytes)>>>,
}

impl SimNetwork {
    pub fn new(registry: Arc<NetworkRegistry>, self_record: PeerRecord) -> Self {
        Self {
            registry,
            self_record,
            latencies: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(HashSet::new())),
            node_queries: Arc::new(Mutex::new(Vec::new())),
            content_queries: Arc::new(Mutex::new(Vec::new())),
            offers: Arc::new(Mutex::new(Vec::new())),
            scripted_nodes: Arc::new(Mutex::new(HashMap::new())),
            scripted_content: Arc::new(Mutex::new(HashMap::new())),
            scripted_transfers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn set_latency(&self, node: NodeId, latency: Duration) {
        self.latencies.lock().await.insert(node, latency);
    }

    pub async fn set_failure(&self, node: NodeId, fail: bool) {
        let mut failures = self.failures.lock().await;
        if fail {
            failures.insert(node);
        } else {
            failures.remove(&node);
        }
    }

    /// Fix the find-nodes answer of one peer, bypassing its real handler.
    pub async fn script_nodes(&self, node: NodeId, answer: Vec<PeerRecord>) {
        self.scripted_nodes.lock().await.insert(node, answer);
    }

    /// Fix the find-content answer of one peer, bypassing its real handler.
    pub async fn script_content(&self, node: NodeId, answer: FoundContent) {
        self.scripted_content.lock().await.insert(node, answer);
    }

    /// Arm one peer's side channel: a transfer with the expected handle
    /// yields the payload.
    pub async fn script_transfer(&self, node: NodeId, connection_id: &[u8], payload: &[u8]) {
        self.scripted_transfers.lock().await.insert(
            node,
            (
                Bytes::copy_from_slice(connection_id),
                Bytes::copy_from_slice(payload),
            ),
        );
    }

    pub async fn node_queries(&self) -> Vec<NodeId> {
        self.node_queries.lock().await.clone()
    }

    pub async fn content_queries(&self) -> Vec<NodeId> {
        self.content_queries.lock().await.clone()
    }

    pub async fn offer_calls(&self) -> Vec<(NodeId, usize)> {
        self.offers.lock().await.clone()
    }

    async fn should_fail(&self, node: &NodeId) -> bool {
        self.failures.lock().await.contains(node)
    }

    async fn maybe_sleep(&self, node: &NodeId) {
        let latency = { self.latencies.lock().await.get(node).copied() };
        if let Some(delay) = latency {
            sleep(delay).await;
        }
    }

    async fn caller_radius(&self) -> Distance {
        match self.registry.get(&self.self_record.id()).await {
            Some(me) => me.radius(),
            None => Distance::MAX,
        }
    }
}

#[async_trait::async_trait]
impl OverlayNetwork for SimNetwork {
    async fn ping(&self, to: &PeerRecord) -> Result<Pong> {
        if self.should_fail(&to.id()).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&to.id()).await;
        let peer = self
            .registry
            .get(&to.id())
            .await
            .ok_or_else(|| anyhow!("peer not reachable"))?;
        let radius = self.caller_radius().await;
        Ok(peer.handle_ping(&self.self_record, radius).await)
    }

    async fn find_nodes(&self, to: &PeerRecord, distances: &[u16]) -> Result<Vec<PeerRecord>> {
        if self.should_fail(&to.id()).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&to.id()).await;
        self.node_queries.lock().await.push(to.id());
        if let Some(answer) = self.scripted_nodes.lock().await.get(&to.id()) {
            return Ok(answer.clone());
        }
        let peer = self
            .registry
            .get(&to.id())
            .await
            .ok_or_else(|| anyhow!("peer not reachable"))?;
        Ok(peer.handle_find_nodes(&self.self_record, distances).await)
    }

    async fn find_content(&self, to: &PeerRecord, content_key: &[u8]) -> Result<FoundContent> {
        if self.should_fail(&to.id()).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&to.id()).await;
        self.content_queries.lock().await.push(to.id());
        if let Some(answer) = self.scripted_content.lock().await.get(&to.id()) {
            return Ok(answer.clone());
        }
        let peer = self
            .registry
            .get(&to.id())
            .await
            .ok_or_else(|| anyhow!("peer not reachable"))?;
        match peer.handle_find_content(&self.self_record, content_key).await? {
            ContentAnswer::Content(content) => Ok(FoundContent::Content(content)),
            ContentAnswer::Peers(records) => Ok(FoundContent::Peers(records)),
        }
    }

    async fn offer(&self, to: &PeerRecord, request: OfferRequest) -> Result<AcceptBitmask> {
        if self.should_fail(&to.id()).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&to.id()).await;
        self.offers.lock().await.push((to.id(), request.entries.len()));
        let peer = self
            .registry
            .get(&to.id())
            .await
            .ok_or_else(|| anyhow!("peer not reachable"))?;
        Ok(peer.handle_offer(&self.self_record, request).await?)
    }

    async fn transfer(&self, to: &PeerRecord, connection_id: &[u8]) -> Result<Bytes> {
        if self.should_fail(&to.id()).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&to.id()).await;
        let transfers = self.scripted_transfers.lock().await;
        match transfers.get(&to.id()) {
            Some((expected, payload)) if expected.as_ref() == connection_id => Ok(payload.clone()),
            _ => Err(anyhow!("no side channel armed for this handle")),
        }
    }
}

/// Shared lookup of live nodes by identifier.
#[derive(Default)]
pub struct NetworkRegistry {
    peers: RwLock<HashMap<NodeId, OverlayNode<SimNetwork>>>,
}

impl NetworkRegistry {
    pub async fn register(&self, node: &OverlayNode<SimNetwork>) {
        self.peers.write().await.insert(node.local_id(), node.clone());
    }

    pub async fn get(&self, id: &NodeId) -> Option<OverlayNode<SimNetwork>> {
        self.peers.read().await.get(id).cloned()
    }
}

/// One simulated node plus the injection handles of its transport.
pub struct TestNode {
    pub node: OverlayNode<SimNetwork>,
    pub network: SimNetwork,
}

impl TestNode {
    pub async fn new(registry: &Arc<NetworkRegistry>, index: u32) -> Self {
        Self::with_config(registry, index, OverlayConfig::default()).await
    }

    pub async fn with_config(
        registry: &Arc<NetworkRegistry>,
        index: u32,
        config: OverlayConfig,
    ) -> Self {
        Self::with_record(registry, make_record(index), config).await
    }

    pub async fn with_record(
        registry: &Arc<NetworkRegistry>,
        record: PeerRecord,
        config: OverlayConfig,
    ) -> Self {
        let network = SimNetwork::new(registry.clone(), record.clone());
        let store = Arc::new(MemoryContentStore::new(TEST_STORE_CAPACITY));
        let node = OverlayNode::new(
            record,
            network.clone(),
            store,
            Box::new(PressureHalving::default()),
            config,
        );
        registry.register(&node).await;
        Self { node, network }
    }

    pub fn id(&self) -> NodeId {
        self.node.local_id()
    }

    pub fn record(&self) -> PeerRecord {
        self.node.record().clone()
    }
}

/// Seed `node`'s table with every peer's record.
pub async fn link(node: &TestNode, peers: &[&TestNode]) {
    for peer in peers {
        node.node.add_record(peer.record()).await;
    }
}

pub fn make_node_id(index: u32) -> NodeId {
    let mut raw = [0u8; 32];
    raw[..4].copy_from_slice(&index.to_be_bytes());
    NodeId::new(raw)
}

pub fn make_record(index: u32) -> PeerRecord {
    make_record_with_seq(index, 1)
}

pub fn make_record_with_seq(index: u32, seq: u64) -> PeerRecord {
    let port = 20000 + (index % 40000) as u16;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    PeerRecord::new(make_node_id(index), seq, addr)
}
