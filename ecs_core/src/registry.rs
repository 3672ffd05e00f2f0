//! The type-erased pool map and its per-thread lookup cache.

use std::cell::RefCell;
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::RwLock;

use crate::component::{Component, ComponentTypeId};
use crate::pool::{ComponentPool, PoolBase};

std::thread_local! {
    /// Short-circuits the shared `pools` lock on hot lookups (spec §5: "a
    /// per-thread pool-pointer cache short-circuits the shared lock"). Keyed
    /// by the owning registry's address so one thread touching two
    /// `Runtime`s doesn't cross-pollute the cache.
    static LOCAL_CACHE: RefCell<FxHashMap<(usize, ComponentTypeId), Arc<dyn PoolBase>>> =
        RefCell::new(FxHashMap::default());
}

/// Owns one [`ComponentPool`] per component type ever registered, behind a
/// `ComponentTypeId`-keyed map. Grounded on spec §5's "reader/writer mutex,
/// shared during lookup, exclusive only during first-time pool creation".
#[derive(Default)]
pub struct PoolRegistry {
    pools: RwLock<FxHashMap<ComponentTypeId, Arc<dyn PoolBase>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        PoolRegistry { pools: RwLock::new(FxHashMap::default()) }
    }

    fn identity(&self) -> usize {
        self as *const Self as usize
    }

    /// Returns the pool for `T`, creating it on first use.
    pub fn get_or_create<T: Component>(&self) -> Arc<ComponentPool<T>> {
        let type_id = ComponentTypeId::of::<T>();
        let cache_key = (self.identity(), type_id);

        if let Some(cached) = LOCAL_CACHE.with(|c| c.borrow().get(&cache_key).cloned()) {
            return downcast(cached);
        }

        if let Some(found) = self.pools.read().get(&type_id).cloned() {
            LOCAL_CACHE.with(|c| c.borrow_mut().insert(cache_key, found.clone()));
            return downcast(found);
        }

        let mut pools = self.pools.write();
        let entry = pools
            .entry(type_id)
            .or_insert_with(|| Arc::new(ComponentPool::<T>::new()) as Arc<dyn PoolBase>)
            .clone();
        drop(pools);

        LOCAL_CACHE.with(|c| c.borrow_mut().insert(cache_key, entry.clone()));
        downcast(entry)
    }

    /// Looks up a pool without creating it, for read-only introspection
    /// (`get_component_count`, `has_component`) that should not allocate a
    /// pool for a component type that has never been used.
    pub fn get<T: Component>(&self) -> Option<Arc<ComponentPool<T>>> {
        self.pools
            .read()
            .get(&ComponentTypeId::of::<T>())
            .cloned()
            .map(downcast)
    }

    pub fn get_erased(&self, type_id: ComponentTypeId) -> Option<Arc<dyn PoolBase>> {
        self.pools.read().get(&type_id).cloned()
    }

    /// Commits every pool's deferred queues. Run in parallel across pools
    /// when the `par-iter` feature is enabled, matching
    /// `legion_systems::schedule::Executor`'s use of `rayon` for
    /// independent, lock-disjoint work.
    pub fn process_all_changes(&self) {
        let pools = self.pools.read();
        #[cfg(feature = "par-iter")]
        {
            use rayon::prelude::*;
            pools.values().collect::<Vec<_>>().par_iter().for_each(|p| p.process_changes());
        }
        #[cfg(not(feature = "par-iter"))]
        {
            pools.values().for_each(|p| p.process_changes());
        }
    }

    pub fn clear_all_flags(&self) {
        for pool in self.pools.read().values() {
            pool.clear_flags();
        }
    }

    /// Empties every pool's ranges, storage, and deferred queues, leaving
    /// the registry's map (and every pool object already in it) in place.
    ///
    /// `self.pools.write().clear()` would drop the map entries but not the
    /// `Arc<dyn PoolBase>`s a thread's `LOCAL_CACHE` may still be holding
    /// from an earlier `get_or_create`; that thread would go on reading and
    /// committing against an orphaned pool no other code ever looks at
    /// again. Calling `PoolBase::clear` on every pool still in the map
    /// instead means a stale cache entry and a fresh `get_or_create` both
    /// resolve to the same, now-empty pool.
    pub fn reset(&self) {
        for pool in self.pools.read().values() {
            pool.clear();
        }
    }

    pub fn registered_types(&self) -> Vec<ComponentTypeId> {
        self.pools.read().keys().copied().collect()
    }
}

fn downcast<T: Component>(pool: Arc<dyn PoolBase>) -> Arc<ComponentPool<T>> {
    pool.downcast_arc::<ComponentPool<T>>()
        .unwrap_or_else(|_| panic!("pool registry stored the wrong concrete type under this ComponentTypeId"))
}
