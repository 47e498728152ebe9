//! Peer identity records.
//!
//! A [`PeerRecord`] is the immutable tuple the external record layer hands
//! us: identifier, sequence number, declared address, and the signed payload
//! this crate never inspects. Records are replaced wholesale when a newer
//! sequence number shows up, never merged.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::OverlayError;
use crate::id::NodeId;

/// Immutable identity record of one peer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    id: NodeId,
    seq: u64,
    addr: SocketAddr,
    #[serde(default, with = "payload_hex")]
    payload: Bytes,
}

impl PeerRecord {
    /// Build a record with an empty signed payload.
    pub fn new(id: NodeId, seq: u64, addr: SocketAddr) -> Self {
        Self {
            id,
            seq,
            addr,
            payload: Bytes::new(),
        }
    }

    /// Attach the opaque signed payload produced by the record layer.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether this record replaces `other`: same identifier, sequence
    /// number at least as new.
    pub fn supersedes(&self, other: &PeerRecord) -> bool {
        self.id == other.id && self.seq >= other.seq
    }

    /// Boundary encoding of a record, a stand-in for the production record
    /// codec the record layer owns.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("record encoding is infallible")
    }

    /// Parse a boundary-encoded record.
    pub fn decode(s: &str) -> Result<Self, OverlayError> {
        serde_json::from_str(s)
            .map_err(|e| OverlayError::InvalidInput(format!("malformed peer record: {e}")))
    }
}

impl fmt::Debug for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRecord")
            .field("id", &self.id)
            .field("seq", &self.seq)
            .field("addr", &self.addr)
            .finish()
    }
}

mod payload_hex {
    use bytes::Bytes;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(payload)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(stripped).map(Bytes::from).map_err(D::Error::custom)
    }
}
