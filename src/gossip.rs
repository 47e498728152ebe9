//! Push propagation: single-peer offers and neighborhood gossip.
//!
//! Gossip aims each content entry at the peers whose identifiers sit
//! closest to the entry's address, skipping the originator and any peer
//! whose last declared radius excludes the address. Offers to the selected
//! peers run concurrently; an unreachable peer is that peer's failure and
//! never aborts the remaining fan-out.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::OverlayError;
use crate::id::{derive_content_id, NodeId};
use crate::net::{AcceptBitmask, ContentEntry, OfferRequest, OverlayNetwork};
use crate::node::{timed, OverlayNode};
use crate::record::PeerRecord;

/// Outcome of storing-then-propagating one content entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutContentResult {
    /// Peers that accepted at least one gossiped entry.
    pub peer_count: usize,
    /// Whether the local admission test kept a copy.
    pub stored_locally: bool,
}

impl<N: OverlayNetwork> OverlayNode<N> {
    /// Offer entries to one peer and return its accept decisions. Transport
    /// failures surface here; [`gossip`](Self::gossip) is the layer that
    /// absorbs them.
    pub async fn offer(
        &self,
        to: &PeerRecord,
        entries: Vec<ContentEntry>,
    ) -> Result<AcceptBitmask, OverlayError> {
        if entries.is_empty() {
            return Err(OverlayError::InvalidInput("offer carries no entries".into()));
        }
        if entries.len() > self.config.max_offer_entries {
            return Err(OverlayError::InvalidInput(format!(
                "offer of {} entries exceeds the {}-entry ceiling",
                entries.len(),
                self.config.max_offer_entries
            )));
        }
        let offered = entries.len();
        let request = OfferRequest::transient(entries);
        let mask = timed(self.config.request_timeout, self.network.offer(to, request)).await?;
        if mask.len() != offered {
            return Err(OverlayError::Transport(anyhow::anyhow!(
                "accept bitmask covers {} entries, {} were offered",
                mask.len(),
                offered
            )));
        }
        self.observe_verified(to).await;
        Ok(mask)
    }

    /// Propagate entries to the neighborhood of each entry's address:
    /// for every entry, the closest `gossip_fanout` table peers that have
    /// not declared the address out of their radius, minus `exclude`.
    /// Entries aimed at the same peer ride one offer. Returns how many
    /// peers accepted at least one entry.
    pub async fn gossip(&self, exclude: Option<NodeId>, entries: Vec<ContentEntry>) -> usize {
        if entries.is_empty() {
            return 0;
        }

        let mut batches: HashMap<NodeId, (PeerRecord, Vec<ContentEntry>)> = HashMap::new();
        for entry in &entries {
            let content_id = derive_content_id(&entry.key);
            let target = NodeId::new(*content_id.as_bytes());
            let candidates = self
                .table
                .lock()
                .await
                .closest_to(&target, self.config.bucket_size);

            let mut chosen = 0usize;
            for peer in candidates {
                if chosen >= self.config.gossip_fanout {
                    break;
                }
                if Some(peer.id()) == exclude {
                    continue;
                }
                if let Some(radius) = self.known_radius(&peer.id()).await {
                    if peer.id().distance_to_content(&content_id) > radius {
                        continue;
                    }
                }
                let (_, batch) = batches
                    .entry(peer.id())
                    .or_insert_with(|| (peer.clone(), Vec::new()));
                if batch.len() >= self.config.max_offer_entries {
                    continue;
                }
                batch.push(entry.clone());
                chosen += 1;
            }
        }
        if batches.is_empty() {
            debug!("gossip found no eligible peers");
            return 0;
        }

        let mut offers = JoinSet::new();
        for (peer, batch) in batches.into_values() {
            let node = self.clone();
            offers.spawn(async move {
                let outcome = node.offer(&peer, batch).await;
                (peer, outcome)
            });
        }

        let mut accepted_by = 0usize;
        while let Some(joined) = offers.join_next().await {
            let Ok((peer, outcome)) = joined else { continue };
            match outcome {
                Ok(mask) if mask.any_accepted() => accepted_by += 1,
                Ok(_) => {
                    debug!(peer = %peer.id(), "peer declined every gossiped entry");
                }
                Err(err) => {
                    debug!(peer = %peer.id(), %err, "gossip offer failed");
                }
            }
        }
        accepted_by
    }

    /// Local admission plus unconditional propagation. The entry is
    /// gossiped even when the local test declines it; our responsibility
    /// for the address and the neighborhood's are independent.
    pub async fn put_content(
        &self,
        content_key: &[u8],
        content: &[u8],
    ) -> Result<PutContentResult, OverlayError> {
        let stored_locally = self.store.should_store(content_key, content)?;
        let entry = ContentEntry::new(content_key.to_vec(), content.to_vec());
        let peer_count = self.gossip(None, vec![entry]).await;
        Ok(PutContentResult {
            peer_count,
            stored_locally,
        })
    }
}
