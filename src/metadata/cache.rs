//! Process-scoped memo of resolved names.
//!
//! Resolving the same class over and over is the common case while
//! sampling, so the decoder can consult a [`NameCache`] keyed by the
//! candidate address. The cache lives only as long as the process; a
//! restart starts empty. Hosts that unload images call `invalidate`.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::memory::Address;

use super::descriptor::TypeDescriptor;
use super::decoder::ResolvedType;

pub trait NameCache: Send + Sync {
    fn get(&self, address: Address) -> Option<ResolvedType>;
    fn insert(&self, address: Address, resolved: &ResolvedType);
    /// Drop every entry.
    fn invalidate(&self);
}

/// Default capacity of [`MemoizedNames`].
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Bounded `HashMap` cache. When full it is cleared wholesale rather than
/// tracking recency; sampling quickly repopulates the hot entries.
#[derive(Debug)]
pub struct MemoizedNames {
    entries: RwLock<HashMap<Address, (String, TypeDescriptor)>>,
    capacity: usize,
}

impl MemoizedNames {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoizedNames {
    fn default() -> Self {
        Self::new()
    }
}

impl NameCache for MemoizedNames {
    fn get(&self, address: Address) -> Option<ResolvedType> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&address).map(|(name, descriptor)| ResolvedType {
            name: name.clone(),
            descriptor: *descriptor,
        })
    }

    fn insert(&self, address: Address, resolved: &ResolvedType) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.capacity && !entries.contains_key(&address) {
            tracing::debug!(capacity = self.capacity, "name cache full, clearing");
            entries.clear();
        }
        entries.insert(address, (resolved.name.clone(), resolved.descriptor));
    }

    fn invalidate(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
