//! Crate-level error type.
//!
//! Per-peer transport failures inside multi-peer operations never surface
//! here; lookups and gossip absorb them and record the outcome. What reaches
//! callers is the taxonomy below: rejected input, distinguished not-found
//! outcomes, single-exchange transport failures, and local store failures.

use crate::store::StoreError;

/// Errors surfaced at the overlay's public boundary.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// Malformed identifier, record, or payload encoding. Rejected before
    /// any engine is touched.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested peer record is not in the local routing table.
    #[error("record not in local routing table")]
    RecordNotFound,

    /// A network-wide lookup completed without locating the requested record.
    #[error("record not found by network lookup")]
    RecordLookupFailed,

    /// The requested content is neither stored locally nor reachable through
    /// the network, distinguished from any transport failure.
    #[error("content not found")]
    ContentNotFound,

    /// A single-exchange transport failure (timeout, unreachable peer,
    /// undecodable response) on an operation addressed to exactly one peer.
    #[error("transport: {0}")]
    Transport(#[from] anyhow::Error),

    /// The local content store itself failed. Admission negatives are not
    /// errors; this is reserved for backend faults.
    #[error("content store: {0}")]
    Store(#[from] StoreError),
}
