//! Content storage: the external byte-store seam and the radius-aware
//! admission adapter in front of it.
//!
//! [`ContentStore`] is the capacity-bounded key/value store the overlay
//! treats as an external collaborator; [`MemoryContentStore`] is the in-crate
//! implementation backing tests and small deployments. [`RadiusStore`] wraps
//! whichever store the embedder supplies with the admission policy of the
//! overlay: content is taken only when its address falls inside the local
//! data radius and the store can hold it, and the radius itself only ever
//! narrows under storage pressure.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use lru::LruCache;
use tracing::debug;

use crate::id::{derive_content_id, ContentId, Distance, NodeId};

/// Failures of the external byte store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A payload larger than the whole store can never be admitted.
    #[error("content of {size} bytes exceeds store capacity of {capacity} bytes")]
    CapacityExceeded { size: u64, capacity: u64 },

    /// A hard fault reported by the backing store.
    #[error("store backend: {0}")]
    Backend(String),
}

/// Capacity-bounded store of raw content bytes keyed by content address.
///
/// Get and put are local and non-blocking as far as the engines are
/// concerned; implementations own their eviction policy and report usage so
/// the radius policy can react to pressure. Must be safe for concurrent use.
pub trait ContentStore: Send + Sync + 'static {
    fn get(&self, id: &ContentId) -> Result<Option<Bytes>, StoreError>;

    /// Store one payload, reclaiming space per the store's own eviction
    /// policy if needed. `CapacityExceeded` is reserved for payloads that
    /// could never fit.
    fn put(&self, id: ContentId, content: Bytes) -> Result<(), StoreError>;

    /// Returns whether the payload was present.
    fn delete(&self, id: &ContentId) -> Result<bool, StoreError>;

    fn contains(&self, id: &ContentId) -> Result<bool, StoreError> {
        Ok(self.get(id)?.is_some())
    }

    /// Bytes currently held.
    fn used_capacity(&self) -> u64;

    /// Bytes this store will hold at most.
    fn total_capacity(&self) -> u64;
}

struct MemoryStoreInner {
    entries: LruCache<ContentId, Bytes>,
    used: u64,
}

/// In-memory [`ContentStore`] bounded by total content bytes, evicting
/// least-recently-used payloads to stay inside its capacity.
pub struct MemoryContentStore {
    inner: Mutex<MemoryStoreInner>,
    capacity: u64,
}

impl MemoryContentStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner {
                entries: LruCache::unbounded(),
                used: 0,
            }),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().expect("store mutex poisoned")
    }
}

impl ContentStore for MemoryContentStore {
    fn get(&self, id: &ContentId) -> Result<Option<Bytes>, StoreError> {
        Ok(self.lock().entries.get(id).cloned())
    }

    fn put(&self, id: ContentId, content: Bytes) -> Result<(), StoreError> {
        let size = content.len() as u64;
        if size > self.capacity {
            return Err(StoreError::CapacityExceeded {
                size,
                capacity: self.capacity,
            });
        }

        let mut inner = self.lock();
        if let Some(existing) = inner.entries.pop(&id) {
            inner.used -= existing.len() as u64;
        }
        inner.used += size;
        inner.entries.put(id, content);

        while inner.used > self.capacity {
            match inner.entries.pop_lru() {
                Some((evicted, payload)) => {
                    inner.used -= payload.len() as u64;
                    debug!(?evicted, "evicted least-recently-used content under pressure");
                }
                None => break,
            }
        }
        Ok(())
    }

    fn delete(&self, id: &ContentId) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.entries.pop(id) {
            Some(payload) => {
                inner.used -= payload.len() as u64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn contains(&self, id: &ContentId) -> Result<bool, StoreError> {
        Ok(self.lock().entries.contains(id))
    }

    fn used_capacity(&self) -> u64 {
        self.lock().used
    }

    fn total_capacity(&self) -> u64 {
        self.capacity
    }
}

/// Pluggable shrink curve for the local data radius.
///
/// Consulted by [`RadiusStore`] after every successful admission; whatever
/// the policy proposes, the adapter clamps so the radius never widens
/// outside an administrative reset.
pub trait RadiusPolicy: Send + Sync + 'static {
    fn next_radius(&self, used: u64, capacity: u64, current: Distance) -> Distance;
}

/// Default policy: halve the radius whenever store utilization reaches a
/// high-water fraction, otherwise leave it alone.
#[derive(Debug, Clone)]
pub struct PressureHalving {
    pub high_water: f64,
}

impl Default for PressureHalving {
    fn default() -> Self {
        Self { high_water: 0.95 }
    }
}

impl RadiusPolicy for PressureHalving {
    fn next_radius(&self, used: u64, capacity: u64, current: Distance) -> Distance {
        if capacity == 0 {
            return Distance::ZERO;
        }
        if used as f64 / capacity as f64 >= self.high_water {
            current.halved()
        } else {
            current
        }
    }
}

/// Radius-aware admission adapter over the external content store.
///
/// Sole reader and writer of the local data radius. Starts claiming the
/// whole key space and narrows as the backing store fills.
pub struct RadiusStore {
    local_id: NodeId,
    store: Arc<dyn ContentStore>,
    policy: Box<dyn RadiusPolicy>,
    radius: Mutex<Distance>,
}

impl RadiusStore {
    pub fn new(
        local_id: NodeId,
        store: Arc<dyn ContentStore>,
        policy: Box<dyn RadiusPolicy>,
    ) -> Self {
        Self {
            local_id,
            store,
            policy,
            radius: Mutex::new(Distance::MAX),
        }
    }

    /// The currently claimed responsibility interval.
    pub fn radius(&self) -> Distance {
        *self.radius.lock().expect("radius mutex poisoned")
    }

    /// Administrative reset, the one path that may widen the radius.
    pub fn set_radius(&self, radius: Distance) {
        *self.radius.lock().expect("radius mutex poisoned") = radius;
    }

    /// The shared content-key → content-address derivation.
    pub fn to_content_id(&self, content_key: &[u8]) -> ContentId {
        derive_content_id(content_key)
    }

    /// Radius-only responsibility check; touches no capacity state.
    pub fn in_range(&self, id: &ContentId) -> bool {
        self.local_id.distance_to_content(id) <= self.radius()
    }

    /// Admission test and admission in one step, idempotent. `Ok(false)`
    /// covers both out-of-radius content and a store that cannot make room;
    /// errors are reserved for backend faults.
    pub fn should_store(&self, content_key: &[u8], content: &[u8]) -> Result<bool, StoreError> {
        let id = derive_content_id(content_key);
        if !self.in_range(&id) {
            return Ok(false);
        }
        match self.store.put(id, Bytes::copy_from_slice(content)) {
            Ok(()) => {
                self.react_to_pressure();
                Ok(true)
            }
            Err(StoreError::CapacityExceeded { size, capacity }) => {
                debug!(size, capacity, "admission declined, store cannot make room");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Direct store write, skipping the admission test. The unsolicited
    /// admission paths go through [`RadiusStore::should_store`]; this is the
    /// operator-facing delegation for content already known to be wanted.
    pub fn put(&self, content_key: &[u8], content: Bytes) -> Result<(), StoreError> {
        self.store.put(derive_content_id(content_key), content)?;
        self.react_to_pressure();
        Ok(())
    }

    pub fn get(&self, content_key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.store.get(&derive_content_id(content_key))
    }

    pub fn get_by_id(&self, id: &ContentId) -> Result<Option<Bytes>, StoreError> {
        self.store.get(id)
    }

    pub fn contains(&self, id: &ContentId) -> Result<bool, StoreError> {
        self.store.contains(id)
    }

    /// Consult the shrink policy, clamped so the radius never widens here.
    fn react_to_pressure(&self) {
        let used = self.store.used_capacity();
        let capacity = self.store.total_capacity();
        let mut radius = self.radius.lock().expect("radius mutex poisoned");
        let proposed = self.policy.next_radius(used, capacity, *radius);
        if proposed < *radius {
            debug!(
                used,
                capacity,
                radius = %proposed,
                "data radius narrowed under storage pressure"
            );
            *radius = proposed;
        }
    }
}
