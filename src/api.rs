//! The RPC-facing surface of a node.
//!
//! [`PortalApi`] is a thin layer over [`OverlayNode`]: identifiers, content
//! keys, and payloads cross this boundary as `0x`-prefixed hex strings,
//! records as their encoded string form, and every malformed input is
//! rejected here before any engine work happens. Response shapes mirror
//! what RPC tooling expects, camelCase throughout.

use serde::{Deserialize, Serialize};

use crate::error::OverlayError;
use crate::gossip::PutContentResult;
use crate::id::{Distance, NodeId};
use crate::net::{ContentEntry, FoundContent, OverlayNetwork};
use crate::node::{timed, OverlayNode};
use crate::record::PeerRecord;
use crate::table::AddOutcome;
use crate::trace::LookupTrace;

/// Identity and address of the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_id: String,
    pub enr: String,
    pub ip: String,
}

/// Bucket-by-bucket view of the routing table, near to far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingTableInfo {
    pub local_node_id: String,
    pub buckets: Vec<Vec<String>>,
}

/// A pong as the caller sees it: the peer's record sequence and its
/// declared data radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongResponse {
    pub enr_seq: u64,
    pub data_radius: Distance,
}

/// Content delivered by a lookup or a single-hop query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentInfo {
    pub content: String,
    pub utp_transfer: bool,
}

/// Records returned where content was asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrs {
    pub enrs: Vec<String>,
}

/// A single-hop content query answers with one of two shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FindContentResult {
    Content(ContentInfo),
    Peers(Enrs),
}

/// A traced lookup always returns its trace; `content` is empty hex when
/// the traversal exhausted without finding the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContentResult {
    pub content: String,
    pub utp_transfer: bool,
    pub trace: LookupTrace,
}

/// The node's documented operation surface.
pub struct PortalApi<N: OverlayNetwork> {
    node: OverlayNode<N>,
}

impl<N: OverlayNetwork> Clone for PortalApi<N> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<N: OverlayNetwork> PortalApi<N> {
    pub fn new(node: OverlayNode<N>) -> Self {
        Self { node }
    }

    /// The engine underneath, for callers that need more than the string
    /// surface.
    pub fn node(&self) -> &OverlayNode<N> {
        &self.node
    }

    // ─────────────────────────────────────────────────────────────────────
    // Local state
    // ─────────────────────────────────────────────────────────────────────

    pub fn node_info(&self) -> NodeInfo {
        let record = self.node.record();
        NodeInfo {
            node_id: record.id().to_hex(),
            enr: record.encode(),
            ip: record.addr().ip().to_string(),
        }
    }

    pub async fn routing_table_info(&self) -> RoutingTableInfo {
        RoutingTableInfo {
            local_node_id: self.node.local_id().to_hex(),
            buckets: self.node.table_snapshot().await,
        }
    }

    /// Force a record into the table. False means a fresher record for the
    /// same peer was already held.
    pub async fn add_enr(&self, enr: &str) -> Result<bool, OverlayError> {
        let record = PeerRecord::decode(enr)?;
        let outcome = self.node.add_record(record).await;
        Ok(outcome != AddOutcome::Rejected)
    }

    pub async fn get_enr(&self, node_id: &str) -> Result<String, OverlayError> {
        let id = NodeId::from_hex(node_id)?;
        let record = self
            .node
            .get_record(&id)
            .await
            .ok_or(OverlayError::RecordNotFound)?;
        Ok(record.encode())
    }

    pub async fn delete_enr(&self, node_id: &str) -> Result<bool, OverlayError> {
        let id = NodeId::from_hex(node_id)?;
        Ok(self.node.remove_record(&id).await)
    }

    /// Resolve a record locally or, failing that, by network lookup.
    pub async fn lookup_enr(&self, node_id: &str) -> Result<String, OverlayError> {
        let id = NodeId::from_hex(node_id)?;
        let record = self
            .node
            .resolve_record(&id)
            .await
            .ok_or(OverlayError::RecordLookupFailed)?;
        Ok(record.encode())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Single-hop operations
    // ─────────────────────────────────────────────────────────────────────

    pub async fn ping(&self, enr: &str) -> Result<PongResponse, OverlayError> {
        let to = PeerRecord::decode(enr)?;
        let pong = self.node.ping(&to).await?;
        Ok(PongResponse {
            enr_seq: pong.enr_seq,
            data_radius: pong.data_radius,
        })
    }

    pub async fn find_nodes(
        &self,
        enr: &str,
        distances: &[u16],
    ) -> Result<Vec<String>, OverlayError> {
        let to = PeerRecord::decode(enr)?;
        if let Some(class) = distances.iter().find(|&&d| d > 256) {
            return Err(OverlayError::InvalidInput(format!(
                "distance class {class} is out of range (max 256)"
            )));
        }
        let records = self.node.find_nodes(&to, distances).await?;
        Ok(records.iter().map(PeerRecord::encode).collect())
    }

    /// One content query to one peer. A side-channel handle is pulled
    /// through right here, so the caller always sees either the payload or
    /// closer records.
    pub async fn find_content(
        &self,
        enr: &str,
        content_key: &str,
    ) -> Result<FindContentResult, OverlayError> {
        let to = PeerRecord::decode(enr)?;
        let key = decode_hex("content key", content_key)?;
        match self.node.find_content(&to, &key).await? {
            FoundContent::Content(content) => Ok(FindContentResult::Content(ContentInfo {
                content: encode_hex(&content),
                utp_transfer: false,
            })),
            FoundContent::ConnectionId(conn) => {
                let content = timed(
                    self.node.config().request_timeout,
                    self.node.network.transfer(&to, &conn),
                )
                .await?;
                Ok(FindContentResult::Content(ContentInfo {
                    content: encode_hex(&content),
                    utp_transfer: true,
                }))
            }
            FoundContent::Peers(records) => Ok(FindContentResult::Peers(Enrs {
                enrs: records.iter().map(PeerRecord::encode).collect(),
            })),
        }
    }

    /// Offer key/content pairs to one peer; returns the accept bitmask as
    /// hex, one bit per pair in offer order.
    pub async fn offer(
        &self,
        enr: &str,
        content_items: &[(String, String)],
    ) -> Result<String, OverlayError> {
        let to = PeerRecord::decode(enr)?;
        let mut entries = Vec::with_capacity(content_items.len());
        for (content_key, content) in content_items {
            entries.push(ContentEntry::new(
                decode_hex("content key", content_key)?,
                decode_hex("content", content)?,
            ));
        }
        let mask = self.node.offer(&to, entries).await?;
        Ok(encode_hex(&mask.to_bytes()))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Iterative operations
    // ─────────────────────────────────────────────────────────────────────

    pub async fn recursive_find_nodes(&self, node_id: &str) -> Result<Vec<String>, OverlayError> {
        let target = NodeId::from_hex(node_id)?;
        let records = self.node.recursive_find_nodes(&target).await;
        Ok(records.iter().map(PeerRecord::encode).collect())
    }

    pub async fn recursive_find_content(
        &self,
        content_key: &str,
    ) -> Result<ContentInfo, OverlayError> {
        let key = decode_hex("content key", content_key)?;
        let found = self
            .node
            .recursive_find_content(&key)
            .await?
            .ok_or(OverlayError::ContentNotFound)?;
        Ok(ContentInfo {
            content: encode_hex(&found.content),
            utp_transfer: found.utp_transfer,
        })
    }

    /// Traced variant: exhausting the network without a hit is not an
    /// error, the trace itself is the answer.
    pub async fn trace_recursive_find_content(
        &self,
        content_key: &str,
    ) -> Result<TraceContentResult, OverlayError> {
        let key = decode_hex("content key", content_key)?;
        let traced = self.node.trace_recursive_find_content(&key).await?;
        let (content, utp_transfer) = match traced.result {
            Some(found) => (encode_hex(&found.content), found.utp_transfer),
            None => ("0x".to_string(), false),
        };
        Ok(TraceContentResult {
            content,
            utp_transfer,
            trace: traced.trace,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Content operations
    // ─────────────────────────────────────────────────────────────────────

    pub async fn local_content(&self, content_key: &str) -> Result<String, OverlayError> {
        let key = decode_hex("content key", content_key)?;
        let content = self
            .node
            .store()
            .get(&key)?
            .ok_or(OverlayError::ContentNotFound)?;
        Ok(encode_hex(&content))
    }

    /// Run the radius-and-capacity admission test and store on success.
    pub async fn store(&self, content_key: &str, content: &str) -> Result<bool, OverlayError> {
        let key = decode_hex("content key", content_key)?;
        let content = decode_hex("content", content)?;
        Ok(self.node.store().should_store(&key, &content)?)
    }

    pub async fn gossip(&self, content_key: &str, content: &str) -> Result<usize, OverlayError> {
        let entry = ContentEntry::new(
            decode_hex("content key", content_key)?,
            decode_hex("content", content)?,
        );
        Ok(self.node.gossip(None, vec![entry]).await)
    }

    pub async fn put_content(
        &self,
        content_key: &str,
        content: &str,
    ) -> Result<PutContentResult, OverlayError> {
        let key = decode_hex("content key", content_key)?;
        let content = decode_hex("content", content)?;
        self.node.put_content(&key, &content).await
    }
}

fn decode_hex(label: &str, input: &str) -> Result<Vec<u8>, OverlayError> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(stripped)
        .map_err(|err| OverlayError::InvalidInput(format!("{label} is not valid hex: {err}")))
}

fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
