//! Address discovery: maps global identifiers to network addresses.
//!
//! The context pairs the discovery state with its backing [`AddressCache`].
//! It is created by the supervisor, bound to exactly one active layer during
//! bootstrap, and never rebound.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use thiserror::Error;
use tracing::{debug, trace};

use super::{AmAddr, CommsLayer, Eui64};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("address discovery already bound to layer '{0}'")]
    AlreadyBound(String),
}

// ── Cache ─────────────────────────────────────────────────────────────────────

/// Bounded identifier → address cache. Most recently used entries sit at the
/// front; inserting into a full cache evicts the least recently used one.
#[derive(Debug)]
pub struct AddressCache {
    capacity: usize,
    entries: Mutex<VecDeque<(Eui64, AmAddr)>>,
}

impl AddressCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or refresh a mapping.
    pub fn insert(&self, eui: Eui64, address: AmAddr) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        if let Some(pos) = entries.iter().position(|(e, _)| *e == eui) {
            entries.remove(pos);
        } else if entries.len() == self.capacity {
            if let Some((evicted, _)) = entries.pop_back() {
                trace!(%evicted, "address cache eviction");
            }
        }
        entries.push_front((eui, address));
    }

    /// Look up a mapping, promoting it to most recently used on a hit.
    pub fn get(&self, eui: &Eui64) -> Option<AmAddr> {
        let mut entries = self.lock();
        let pos = entries.iter().position(|(e, _)| e == eui)?;
        let entry = entries.remove(pos)?;
        entries.push_front(entry);
        Some(entry.1)
    }

    // Entries stay consistent across a panic mid-update.
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(Eui64, AmAddr)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

/// The layer a context is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub layer: String,
    pub address: AmAddr,
    pub eui: Eui64,
}

#[derive(Debug, Default)]
pub struct DiscoveryState {
    binding: OnceLock<Binding>,
    lookups: AtomicU64,
    misses: AtomicU64,
}

impl DiscoveryState {
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct AddressDiscoveryContext {
    state: DiscoveryState,
    cache: AddressCache,
}

impl AddressDiscoveryContext {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            state: DiscoveryState::default(),
            cache: AddressCache::new(cache_capacity),
        }
    }

    /// Bind to `layer`. Fails if the context is already bound.
    pub fn bind(&self, layer: &dyn CommsLayer) -> Result<(), DiscoveryError> {
        let binding = Binding {
            layer: layer.name().to_string(),
            address: layer.address(),
            eui: layer.eui(),
        };
        self.state
            .binding
            .set(binding)
            .map_err(|_| DiscoveryError::AlreadyBound(self.bound_layer().unwrap_or_default()))?;
        debug!(layer = layer.name(), "address discovery bound");
        Ok(())
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.state.binding.get()
    }

    pub fn is_bound(&self) -> bool {
        self.binding().is_some()
    }

    pub fn bound_layer(&self) -> Option<String> {
        self.binding().map(|b| b.layer.clone())
    }

    pub fn state(&self) -> &DiscoveryState {
        &self.state
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    /// Record an observed identifier → address mapping.
    pub fn learn(&self, eui: Eui64, address: AmAddr) {
        if self.binding().is_some_and(|b| b.eui == eui) {
            return;
        }
        self.cache.insert(eui, address);
    }

    /// Resolve `eui`: the node's own identifier maps to its own address,
    /// anything else goes through the cache.
    pub fn resolve(&self, eui: &Eui64) -> Option<AmAddr> {
        let binding = self.binding()?;
        if binding.eui == *eui {
            return Some(binding.address);
        }
        self.state.lookups.fetch_add(1, Ordering::Relaxed);
        let hit = self.cache.get(eui);
        if hit.is_none() {
            self.state.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }
}
