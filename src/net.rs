//! Transport facade: the single abstraction point over the external
//! request/response primitive.
//!
//! Every outbound exchange the engines perform goes through
//! [`OverlayNetwork`]. A call resolves to the peer's decoded reply or fails
//! as one exchange (timeout, unreachable peer, undecodable response); the
//! datagram layer, session management, and the bulk side-channel mechanics
//! behind [`OverlayNetwork::transfer`] all live with the implementor.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::id::Distance;
use crate::record::PeerRecord;

/// Liveness reply: the peer's record sequence number and its declared data
/// radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub enr_seq: u64,
    pub data_radius: Distance,
}

/// The three shapes a single-hop content query can come back in. Every
/// consumer matches all three.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoundContent {
    /// Raw content bytes, small enough for the datagram channel.
    Content(Bytes),
    /// The payload is too large for a datagram; it must be pulled through
    /// the bulk side-channel under this connection identifier.
    ConnectionId(Bytes),
    /// No content held; the peer's records closest to the address instead.
    Peers(Vec<PeerRecord>),
}

/// One key/content pair, the unit of offer and gossip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub key: Bytes,
    pub content: Bytes,
}

impl ContentEntry {
    pub fn new(key: impl Into<Bytes>, content: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
        }
    }
}

/// How an offer's payload travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferKind {
    /// Entries carry their full content inline.
    Transient,
    /// Entries reference content the receiver fetches out-of-band.
    Accumulated,
}

/// A content proposal pushed to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferRequest {
    pub kind: OfferKind,
    pub entries: Vec<ContentEntry>,
}

impl OfferRequest {
    /// An offer carrying full content inline, the shape gossip uses.
    pub fn transient(entries: Vec<ContentEntry>) -> Self {
        Self {
            kind: OfferKind::Transient,
            entries,
        }
    }
}

/// The receiver's decision on an offer, one bit per offered entry in offer
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptBitmask(Vec<bool>);

impl AcceptBitmask {
    /// All-declined bitmask for an offer of `len` entries.
    pub fn declined(len: usize) -> Self {
        Self(vec![false; len])
    }

    pub fn set(&mut self, index: usize) {
        if let Some(bit) = self.0.get_mut(index) {
            *bit = true;
        }
    }

    pub fn accepted(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    pub fn any_accepted(&self) -> bool {
        self.0.iter().any(|bit| *bit)
    }

    pub fn accepted_count(&self) -> usize {
        self.0.iter().filter(|bit| **bit).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pack into bytes, entry `i` at bit `i % 8` (LSB first) of byte `i / 8`.
    /// This is the boundary rendering of the accept signal.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.0.len().div_ceil(8)];
        for (i, bit) in self.0.iter().enumerate() {
            if *bit {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        out
    }
}

impl From<Vec<bool>> for AcceptBitmask {
    fn from(bits: Vec<bool>) -> Self {
        Self(bits)
    }
}

/// The external request/response primitive, as seen by the engines.
///
/// Implementations must be safe for concurrent use; the engines issue calls
/// from many lookup tasks at once and add no synchronization of their own.
/// A returned error means that one exchange failed; the trait implies no
/// retry policy.
#[async_trait]
pub trait OverlayNetwork: Send + Sync + 'static {
    /// Liveness round-trip carrying the peer's sequence number and radius.
    async fn ping(&self, to: &PeerRecord) -> Result<Pong>;

    /// Ask one peer for its records at the given log2 distance classes
    /// (`0` addresses the peer's own record).
    async fn find_nodes(&self, to: &PeerRecord, distances: &[u16]) -> Result<Vec<PeerRecord>>;

    /// Ask one peer for content by key.
    async fn find_content(&self, to: &PeerRecord, content_key: &[u8]) -> Result<FoundContent>;

    /// Push a content proposal; the reply selects the entries the receiver
    /// wants.
    async fn offer(&self, to: &PeerRecord, request: OfferRequest) -> Result<AcceptBitmask>;

    /// Pull one payload through the bulk side-channel, keyed by the
    /// connection identifier a peer returned in place of content.
    async fn transfer(&self, to: &PeerRecord, connection_id: &[u8]) -> Result<Bytes>;
}
