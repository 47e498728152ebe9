//! # Portal Overlay
//!
//! This crate implements the peer engine of a content-addressed overlay
//! network: a Kademlia-style routing table over 256 log-distance buckets,
//! iterative node and content lookups, radius-gated content admission, and
//! offer/accept gossip. Transport and content validation stay outside; the
//! engine drives any [`OverlayNetwork`] implementation and any
//! [`ContentStore`] backend the embedding application provides.
//!
//! The crate is split into modules that can be reused independently:
//!
//! - [`table`]: the routing table, its bounded replacement queues, and the
//!   ping-less eviction policy.
//! - [`store`]: the radius-aware admission layer over an external
//!   [`ContentStore`], including the monotone data-radius bookkeeping.
//! - [`lookup`]: iterative node and content traversals with bounded
//!   parallelism and early termination on a content hit.
//! - [`gossip`]: push propagation of content toward the peers closest to
//!   its address.
//! - [`net`]: the transport facade trait and the message shapes that cross
//!   it.
//! - [`trace`]: the per-peer audit trail a traced content lookup produces.
//! - [`api`]: the hex-string operation surface meant to sit behind an RPC
//!   server.
//!
//! ## Getting started
//!
//! Provide a transport, hand the engine an identity record and a content
//! store, and drive the async operations from your application:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use portal_overlay::{
//!     MemoryContentStore, OverlayConfig, OverlayNode, PortalApi, PressureHalving,
//! };
//! # use anyhow::Result;
//! # use async_trait::async_trait;
//! # use bytes::Bytes;
//! # use portal_overlay::{AcceptBitmask, FoundContent, OfferRequest, OverlayNetwork, PeerRecord, Pong};
//! # struct StubTransport;
//! # #[async_trait]
//! # impl OverlayNetwork for StubTransport {
//! #     async fn ping(&self, _to: &PeerRecord) -> Result<Pong> { unimplemented!() }
//! #     async fn find_nodes(&self, _to: &PeerRecord, _distances: &[u16]) -> Result<Vec<PeerRecord>> { unimplemented!() }
//! #     async fn find_content(&self, _to: &PeerRecord, _content_key: &[u8]) -> Result<FoundContent> { unimplemented!() }
//! #     async fn offer(&self, _to: &PeerRecord, _request: OfferRequest) -> Result<AcceptBitmask> { unimplemented!() }
//! #     async fn transfer(&self, _to: &PeerRecord, _connection_id: &[u8]) -> Result<Bytes> { unimplemented!() }
//! # }
//! # async fn launch(record: PeerRecord) -> Result<()> {
//! let store = Arc::new(MemoryContentStore::new(64 * 1024 * 1024));
//! let node = OverlayNode::new(
//!     record,
//!     StubTransport,
//!     store,
//!     Box::new(PressureHalving::default()),
//!     OverlayConfig::default(),
//! );
//! let api = PortalApi::new(node);
//! let result = api.put_content("0x6b6579", "0x76616c7565").await?;
//! println!("stored locally: {}", result.stored_locally);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod gossip;
pub mod id;
pub mod lookup;
pub mod net;
pub mod node;
pub mod record;
pub mod store;
pub mod table;
pub mod trace;

pub use api::{
    ContentInfo, Enrs, FindContentResult, NodeInfo, PongResponse, PortalApi, RoutingTableInfo,
    TraceContentResult,
};
pub use config::OverlayConfig;
pub use error::OverlayError;
pub use gossip::PutContentResult;
pub use id::{derive_content_id, ContentId, Distance, NodeId, ID_LEN};
pub use lookup::{ContentResult, TracedContentResult};
pub use net::{
    AcceptBitmask, ContentEntry, FoundContent, OfferKind, OfferRequest, OverlayNetwork, Pong,
};
pub use node::{ContentAnswer, OverlayNode};
pub use record::PeerRecord;
pub use store::{
    ContentStore, MemoryContentStore, PressureHalving, RadiusPolicy, RadiusStore, StoreError,
};
pub use table::{AddOutcome, RoutingTable};
pub use trace::{LookupTrace, TraceMetadata, TraceResponse};
