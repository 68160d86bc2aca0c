// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded cache of decoded components, keyed by location.
//
// Eviction is least-recently-used down to a byte ceiling. Evicting drops the
// cache's handle only; anything else holding the component keeps it alive,
// and the node simply leaves the cache's accounting.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use blattwerk_core::types::Location;

use crate::component::Component;

struct CacheInner {
    map: LruCache<Location, Arc<Component>>,
    max_bytes: usize,
}

/// Bounded mapping from location to decoded component.
pub struct ComponentCache {
    inner: Mutex<CacheInner>,
}

impl ComponentCache {
    pub fn new(max_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CacheInner {
                map: LruCache::unbounded(),
                max_bytes,
            }),
        })
    }

    /// Look a component up, marking it recently used.
    pub fn get(&self, location: &Location) -> Option<Arc<Component>> {
        self.inner.lock().map.get(location).cloned()
    }

    /// Install a component, then evict oldest entries until the byte ceiling
    /// holds again. Component sizes are re-measured here because artifacts
    /// keep growing while decode runs.
    pub fn put(&self, location: Location, component: Arc<Component>) {
        let mut inner = self.inner.lock();
        inner.map.put(location, component);
        Self::enforce_ceiling(&mut inner);
    }

    pub fn set_max_bytes(&self, max_bytes: usize) {
        let mut inner = self.inner.lock();
        inner.max_bytes = max_bytes;
        Self::enforce_ceiling(&mut inner);
    }

    pub fn clear(&self) {
        self.inner.lock().map.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current byte total across cached components.
    pub fn byte_total(&self) -> usize {
        let inner = self.inner.lock();
        inner.map.iter().map(|(_, c)| c.memory_usage()).sum()
    }

    fn enforce_ceiling(inner: &mut CacheInner) {
        let mut total: usize = inner.map.iter().map(|(_, c)| c.memory_usage()).sum();
        // The most recent entry always survives, even when it alone exceeds
        // the ceiling — the caller is about to use it.
        while total > inner.max_bytes && inner.map.len() > 1 {
            if let Some((location, component)) = inner.map.pop_lru() {
                total = total.saturating_sub(component.memory_usage());
                debug!(%location, "evicted from component cache");
            } else {
                break;
            }
        }
        trace!(total, ceiling = inner.max_bytes, "cache accounted");
    }
}
