//! Per-type component storage: the sorted range index, the per-thread
//! deferred add/remove queues, and the commit algorithm that merges them.
//!
//! Grounded on `original_source/include/ecs/detail/component_pool.h`
//! (`process_add_components`/`process_remove_components`) and spec §4.2.

use std::fmt::Debug;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use downcast_rs::{impl_downcast, DowncastSync};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thread_local::ThreadLocal;

use crate::component::{Component, ComponentTypeId};
use crate::contract::{self, ContractViolation};
use crate::entity::{intersect_ranges, EntityId, EntityRange};

/// A single deferred addition. Bound types always carry a fully-materialized
/// span (`add` pre-expands its single value into `range.count()` clones, so
/// only `add`'s caller ever needs `T: Clone`); unbound types carry a
/// one-element span holding the shared instance. `add_generator` defers
/// materialization to commit time.
enum AddPayload<T> {
    Span(Vec<T>),
    Generator(Arc<dyn Fn(EntityId) -> T + Send + Sync>),
}

struct QueuedAdd<T> {
    range: EntityRange,
    payload: AddPayload<T>,
}

/// Physical storage backing a pool. Bound components keep one value per
/// owning entity, laid out contiguously per range (invariant #2 in spec
/// §4.2); unbound components (tag, global) keep at most one instance.
enum Storage<T> {
    Bound(Vec<T>),
    Unbound(Option<T>),
}

impl<T> Storage<T> {
    fn bound(&self) -> &Vec<T> {
        match self {
            Storage::Bound(v) => v,
            Storage::Unbound(_) => unreachable!("bound accessor used on unbound storage"),
        }
    }

    fn bound_mut(&mut self) -> &mut Vec<T> {
        match self {
            Storage::Bound(v) => v,
            Storage::Unbound(_) => unreachable!("bound accessor used on unbound storage"),
        }
    }
}

struct PoolData<T> {
    ranges: Vec<EntityRange>,
    storage: Storage<T>,
}

/// The store and change-queue for every component of type `T` (spec §4.2).
pub struct ComponentPool<T: Component> {
    data: RwLock<PoolData<T>>,
    deferred_adds: ThreadLocal<Mutex<Vec<QueuedAdd<T>>>>,
    deferred_removes: ThreadLocal<Mutex<Vec<EntityRange>>>,
    added: AtomicBool,
    removed: AtomicBool,
    modified: AtomicBool,
}

impl<T: Component> ComponentPool<T> {
    pub fn new() -> Self {
        let storage = if T::is_unbound() {
            Storage::Unbound(None)
        } else {
            Storage::Bound(Vec::new())
        };

        ComponentPool {
            data: RwLock::new(PoolData { ranges: Vec::new(), storage }),
            deferred_adds: ThreadLocal::new(),
            deferred_removes: ThreadLocal::new(),
            added: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            modified: AtomicBool::new(false),
        }
    }

    /// Enqueues `value` to apply to every entity in `range`. Bound types
    /// clone the value across the whole range up front (mirroring the
    /// original's `components.insert(pos, range_count, std::move(value))`,
    /// which copy-constructs `range_count` times); unbound types keep a
    /// single shared instance regardless of `range`'s size.
    pub fn add(&self, range: EntityRange, value: T)
    where
        T: Clone,
    {
        let span = if T::is_unbound() {
            vec![value]
        } else {
            vec![value; range.count()]
        };
        self.local_adds().push(QueuedAdd { range, payload: AddPayload::Span(span) });
    }

    /// Enqueues a distinct value per entity in `range`.
    ///
    /// # Panics
    /// Raises [`ContractViolation::SpanLengthMismatch`] (aborting the
    /// process through the contract handler) if `values.len() !=
    /// range.count()`.
    pub fn add_span(&self, range: EntityRange, values: Vec<T>) {
        if values.len() != range.count() {
            contract::raise(
                "ecs_core::pool::ComponentPool::add_span",
                ContractViolation::SpanLengthMismatch {
                    component: T::type_name(),
                    expected: range.count(),
                    actual: values.len(),
                },
            );
        }
        self.local_adds().push(QueuedAdd { range, payload: AddPayload::Span(values) });
    }

    /// Enqueues a generator invoked once per entity at commit time.
    pub fn add_generator<F>(&self, range: EntityRange, generator: F)
    where
        F: Fn(EntityId) -> T + Send + Sync + 'static,
    {
        self.local_adds().push(QueuedAdd {
            range,
            payload: AddPayload::Generator(Arc::new(generator)),
        });
    }

    /// Enqueues `range` for removal at the next commit.
    pub fn remove(&self, range: EntityRange) {
        self.local_removes().push(range);
    }

    fn local_adds(&self) -> parking_lot::MutexGuard<'_, Vec<QueuedAdd<T>>> {
        self.deferred_adds.get_or(|| Mutex::new(Vec::new())).lock()
    }

    fn local_removes(&self) -> parking_lot::MutexGuard<'_, Vec<EntityRange>> {
        self.deferred_removes.get_or(|| Mutex::new(Vec::new())).lock()
    }

    /// Returns a reference to the stored value for `id`, or `None` if `id`
    /// does not currently own this component. For a tag pool, every
    /// owning entity resolves to the same shared sentinel instance.
    pub fn find_component_data(&self, id: EntityId) -> Option<ComponentRef<'_, T>> {
        let guard = self.data.read();

        if T::IS_GLOBAL {
            return match &guard.storage {
                Storage::Unbound(Some(_)) => Some(ComponentRef { guard, index: RefIndex::Unbound }),
                _ => None,
            };
        }

        let owns = guard.ranges.iter().any(|r| r.contains_id(id));
        if !owns {
            return None;
        }

        match &guard.storage {
            Storage::Unbound(Some(_)) => Some(ComponentRef { guard, index: RefIndex::Unbound }),
            Storage::Unbound(None) => None,
            Storage::Bound(_) => {
                let index = bound_offset(&guard.ranges, id)?;
                Some(ComponentRef { guard, index: RefIndex::Bound(index) })
            }
        }
    }

    /// Returns a contiguous, read-only view over `range`, or `None` if
    /// `range` is not fully owned by this pool.
    pub fn get_components(&self, range: EntityRange) -> Option<ComponentsRef<'_, T>> {
        let guard = self.data.read();
        if !has_entity_locked(&guard.ranges, &range) {
            return None;
        }
        let start = bound_offset(&guard.ranges, range.first())?;
        Some(ComponentsRef { guard, start, len: range.count() })
    }

    /// The single global instance, or `None` before it is first added.
    pub fn global_instance(&self) -> Option<ComponentRef<'_, T>> {
        let guard = self.data.read();
        match &guard.storage {
            Storage::Unbound(Some(_)) => Some(ComponentRef { guard, index: RefIndex::Unbound }),
            _ => None,
        }
    }

    /// A mutable borrow of `id`'s stored value, valid until dropped. Marks
    /// the pool `data_modified` when the borrow ends (the system-facing
    /// equivalent of spec §4.4's "on return, call `notify_components_modified`
    /// on every mutable reference in the signature" — applied per-access
    /// here rather than once at the end of `do_run`, since a held guard is
    /// already scoped to a single write anyway).
    pub fn get_component_mut(&self, id: EntityId) -> Option<ComponentRefMut<'_, T>> {
        let guard = self.data.write();

        if T::IS_GLOBAL {
            return match &guard.storage {
                Storage::Unbound(Some(_)) => {
                    Some(ComponentRefMut { guard, index: RefIndex::Unbound, modified: &self.modified })
                }
                _ => None,
            };
        }

        let owns = guard.ranges.iter().any(|r| r.contains_id(id));
        if !owns {
            return None;
        }

        match &guard.storage {
            Storage::Unbound(Some(_)) => {
                Some(ComponentRefMut { guard, index: RefIndex::Unbound, modified: &self.modified })
            }
            Storage::Unbound(None) => None,
            Storage::Bound(_) => {
                let index = bound_offset(&guard.ranges, id)?;
                Some(ComponentRefMut { guard, index: RefIndex::Bound(index), modified: &self.modified })
            }
        }
    }

    /// True iff some current range fully contains `range` (or this is a
    /// global pool, which always owns every entity).
    pub fn has_entity(&self, range: EntityRange) -> bool {
        if T::IS_GLOBAL {
            return true;
        }
        has_entity_locked(&self.data.read().ranges, &range)
    }

    /// The ranges of entities that currently own this component. Globals
    /// report the universal sentinel range; locals report their real
    /// range index.
    pub fn get_entities(&self) -> Vec<EntityRange> {
        if T::IS_GLOBAL {
            return vec![EntityRange::all()];
        }
        self.data.read().ranges.clone()
    }

    pub fn component_count(&self) -> usize {
        let guard = self.data.read();
        match &guard.storage {
            Storage::Bound(v) => v.len(),
            Storage::Unbound(v) => v.is_some() as usize,
        }
    }

    pub fn entity_count(&self) -> usize {
        if T::IS_GLOBAL {
            return 1;
        }
        self.data.read().ranges.iter().map(|r| r.count()).sum()
    }

    /// Marks the pool as modified by a system write. Called by `System::
    /// run` after invoking a callable with a mutable reference to this
    /// component, never by the pool itself.
    pub fn notify_components_modified(&self) {
        self.modified.store(true, Ordering::Release);
    }

    pub fn data_added(&self) -> bool {
        self.added.load(Ordering::Acquire)
    }

    pub fn data_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn data_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    pub fn clear_flags(&self) {
        self.added.store(false, Ordering::Release);
        self.removed.store(false, Ordering::Release);
        self.modified.store(false, Ordering::Release);
    }

    /// Wipes every range and stored value, and drops any mutation still
    /// sitting in a thread's deferred queues, without discarding the pool
    /// object itself. Unlike [`ComponentPool::new`], this is called on a
    /// pool that other threads may already hold an `Arc` to (via
    /// `PoolRegistry`'s per-thread cache), so the pool has to go back to
    /// empty in place rather than being replaced.
    pub fn clear(&self) {
        let mut guard = self.data.write();
        let had_data = !guard.ranges.is_empty()
            || matches!(&guard.storage, Storage::Unbound(Some(_)));

        guard.ranges.clear();
        match &mut guard.storage {
            Storage::Bound(v) => v.clear(),
            Storage::Unbound(v) => *v = None,
        }
        drop(guard);

        for queue in self.deferred_adds.iter() {
            queue.lock().clear();
        }
        for queue in self.deferred_removes.iter() {
            queue.lock().clear();
        }

        self.added.store(false, Ordering::Release);
        self.modified.store(false, Ordering::Release);
        if had_data {
            self.removed.store(true, Ordering::Release);
        }
    }

    /// Merges deferred mutations into main storage: removals first, then
    /// additions (spec §4.2's four-step commit algorithm).
    pub fn process_changes(&self) {
        let span = tracing::trace_span!("pool::process_changes", component = T::type_name());
        let _enter = span.enter();

        let mut guard = self.data.write();
        self.process_removals(&mut guard);
        self.process_additions(&mut guard);
    }

    fn process_removals(&self, guard: &mut PoolData<T>) {
        if T::IS_TRANSIENT {
            let had_data = !guard.ranges.is_empty();
            guard.ranges.clear();
            match &mut guard.storage {
                Storage::Bound(v) => v.clear(),
                Storage::Unbound(v) => *v = None,
            }
            if had_data {
                self.removed.store(true, Ordering::Release);
            }
            return;
        }

        let mut removes: Vec<EntityRange> = Vec::new();
        for queue in self.deferred_removes.iter() {
            removes.append(&mut queue.lock());
        }
        if removes.is_empty() {
            return;
        }

        removes.sort();
        reject_duplicate_ranges("remove", &removes);
        let removes = merge_adjacent(removes);
        let requested: usize = removes.iter().map(|r| r.count()).sum();
        let mut actually_removed = 0usize;

        let mut new_ranges: Vec<EntityRange> = Vec::with_capacity(guard.ranges.len());
        let mut new_bound: Vec<T> = match &guard.storage {
            Storage::Bound(v) => Vec::with_capacity(v.len()),
            Storage::Unbound(_) => Vec::new(),
        };

        let mut data_cursor = 0usize;
        for current in guard.ranges.iter().copied() {
            let current_data_start = data_cursor;
            data_cursor += current.count();

            if !removes.iter().any(|rm| rm.overlaps(&current)) {
                if let Storage::Bound(old) = &guard.storage {
                    new_bound.extend_from_slice(
                        &old[current_data_start..current_data_start + current.count()],
                    );
                }
                push_range(&mut new_ranges, current);
                continue;
            }

            let mut pieces = vec![current];
            for rm in removes.iter().filter(|r| r.overlaps(&current)) {
                let mut next_pieces = Vec::with_capacity(pieces.len());
                for piece in pieces {
                    if !piece.overlaps(rm) {
                        next_pieces.push(piece);
                        continue;
                    }

                    let inter = EntityRange::intersect(&piece, rm);
                    actually_removed += inter.count();

                    if piece == inter {
                        // Fully consumed by this removal; nothing survives.
                    } else {
                        let (a, b) = EntityRange::remove(&piece, &inter);
                        next_pieces.push(a);
                        if let Some(b) = b {
                            next_pieces.push(b);
                        }
                    }
                }
                pieces = next_pieces;
            }

            for surv in pieces {
                if let Storage::Bound(old) = &guard.storage {
                    copy_surviving(old, current_data_start, &current, &surv, &mut new_bound);
                }
                push_range(&mut new_ranges, surv);
            }
        }

        if actually_removed != requested {
            contract::raise(
                "ecs_core::pool::ComponentPool::process_removals",
                ContractViolation::PartialRemoval {
                    component: T::type_name(),
                    range: format!("requested {} entities, {} were owned", requested, actually_removed),
                },
            );
        }

        if let Storage::Bound(slot) = &mut guard.storage {
            *slot = new_bound;
        }
        guard.ranges = new_ranges;
        self.removed.store(true, Ordering::Release);
    }

    fn process_additions(&self, guard: &mut PoolData<T>) {
        let mut adds: Vec<QueuedAdd<T>> = Vec::new();
        for queue in self.deferred_adds.iter() {
            adds.append(&mut queue.lock());
        }
        if adds.is_empty() {
            return;
        }

        adds.sort_by_key(|a| a.range.first());
        reject_duplicate_ranges("add", &adds.iter().map(|a| a.range).collect::<Vec<_>>());

        if T::is_unbound() {
            // A global/tag pool only ever needs the most recent value; the
            // range bookkeeping below (for tags) still runs so has_entity
            // and get_entities stay accurate.
            if let Some(last) = adds.iter_mut().rev().find_map(|a| match &mut a.payload {
                AddPayload::Span(values) => values.pop(),
                AddPayload::Generator(gen) => Some(gen(adds_first_id(a))),
            }) {
                guard.storage = Storage::Unbound(Some(last));
            }
        }

        let mut new_ranges: Vec<EntityRange> = Vec::with_capacity(guard.ranges.len() + adds.len());
        let mut new_bound: Vec<T> = Vec::new();
        let mut old_idx = 0usize;
        let mut old_data_cursor = 0usize;

        for add in adds {
            while old_idx < guard.ranges.len() && guard.ranges[old_idx].last() < add.range.first() {
                let r = guard.ranges[old_idx];
                if let Storage::Bound(old) = &guard.storage {
                    new_bound.extend_from_slice(&old[old_data_cursor..old_data_cursor + r.count()]);
                }
                old_data_cursor += r.count();
                push_range(&mut new_ranges, r);
                old_idx += 1;
            }

            if old_idx < guard.ranges.len() && guard.ranges[old_idx].overlaps(&add.range) {
                contract::raise(
                    "ecs_core::pool::ComponentPool::process_additions",
                    ContractViolation::OverlappingAdd {
                        component: T::type_name(),
                        range: format!("{:?}..{:?}", add.range.first(), add.range.last()),
                    },
                );
            }

            if !T::is_unbound() {
                match add.payload {
                    AddPayload::Span(values) => new_bound.extend(values),
                    AddPayload::Generator(gen) => {
                        for id in add.range.first()..=add.range.last() {
                            new_bound.push(gen(id));
                        }
                    }
                }
            }

            push_range(&mut new_ranges, add.range);
        }

        while old_idx < guard.ranges.len() {
            let r = guard.ranges[old_idx];
            if let Storage::Bound(old) = &guard.storage {
                new_bound.extend_from_slice(&old[old_data_cursor..old_data_cursor + r.count()]);
            }
            old_data_cursor += r.count();
            push_range(&mut new_ranges, r);
            old_idx += 1;
        }

        if !T::is_unbound() {
            guard.storage = Storage::Bound(new_bound);
        }
        guard.ranges = new_ranges;
        self.added.store(true, Ordering::Release);
    }
}

fn adds_first_id<T>(add: &QueuedAdd<T>) -> EntityId {
    add.range.first()
}

fn copy_surviving<T: Clone>(
    old: &[T],
    consumed_from: usize,
    original: &EntityRange,
    surviving: &EntityRange,
    out: &mut Vec<T>,
) {
    let offset = consumed_from + original.offset(surviving.first());
    out.extend_from_slice(&old[offset..offset + surviving.count()]);
}

fn push_range(ranges: &mut Vec<EntityRange>, range: EntityRange) {
    if let Some(last) = ranges.last_mut() {
        if last.last() < range.first() && last.adjacent(&range) {
            *last = EntityRange::merge(last, &range);
            return;
        }
    }
    ranges.push(range);
}

fn has_entity_locked(ranges: &[EntityRange], range: &EntityRange) -> bool {
    ranges.iter().any(|r| r.contains(range))
}

fn bound_offset(ranges: &[EntityRange], id: EntityId) -> Option<usize> {
    let mut offset = 0;
    for r in ranges {
        if r.contains_id(id) {
            return Some(offset + r.offset(id));
        }
        offset += r.count();
    }
    None
}

fn reject_duplicate_ranges(op: &str, ranges: &[EntityRange]) {
    let mut sorted = ranges.to_vec();
    sorted.sort();
    for pair in sorted.windows(2) {
        if pair[0] == pair[1] || pair[0].overlaps(&pair[1]) {
            contract::raise(
                "ecs_core::pool::reject_duplicate_ranges",
                ContractViolation::DuplicateEntry {
                    component: op,
                    range: format!("{:?}..{:?}", pair[1].first(), pair[1].last()),
                },
            );
        }
    }
}

fn merge_adjacent(mut ranges: Vec<EntityRange>) -> Vec<EntityRange> {
    let mut out: Vec<EntityRange> = Vec::with_capacity(ranges.len());
    ranges.sort();
    for r in ranges.drain(..) {
        push_range(&mut out, r);
    }
    out
}

/// Type-erased handle stored in the [`crate::registry::PoolRegistry`]. Lets
/// the registry hold pools of heterogeneous component types behind one
/// map, and lets systems query `get_entities`/flags without knowing `T`.
pub trait PoolBase: DowncastSync + Debug {
    fn component_type(&self) -> ComponentTypeId;
    fn get_entities_erased(&self) -> Vec<EntityRange>;
    fn process_changes(&self);
    fn clear_flags(&self);
    /// Empties the pool in place (ranges, storage, deferred queues) while
    /// leaving the `Arc<dyn PoolBase>` itself intact, so callers already
    /// holding a clone keep observing the same pool, now empty.
    fn clear(&self);
    fn data_added(&self) -> bool;
    fn data_removed(&self) -> bool;
    fn data_modified(&self) -> bool;
    fn component_count(&self) -> usize;
    fn entity_count(&self) -> usize;
    fn has_entity(&self, range: EntityRange) -> bool;
}
impl_downcast!(sync PoolBase);

impl<T: Component> Debug for ComponentPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentPool").field("component", &T::type_name()).finish()
    }
}

impl<T: Component> PoolBase for ComponentPool<T> {
    fn component_type(&self) -> ComponentTypeId {
        ComponentTypeId::of::<T>()
    }

    fn get_entities_erased(&self) -> Vec<EntityRange> {
        self.get_entities()
    }

    fn process_changes(&self) {
        ComponentPool::process_changes(self)
    }

    fn clear_flags(&self) {
        ComponentPool::clear_flags(self)
    }

    fn clear(&self) {
        ComponentPool::clear(self)
    }

    fn data_added(&self) -> bool {
        ComponentPool::data_added(self)
    }

    fn data_removed(&self) -> bool {
        ComponentPool::data_removed(self)
    }

    fn data_modified(&self) -> bool {
        ComponentPool::data_modified(self)
    }

    fn component_count(&self) -> usize {
        ComponentPool::component_count(self)
    }

    fn entity_count(&self) -> usize {
        ComponentPool::entity_count(self)
    }

    fn has_entity(&self, range: EntityRange) -> bool {
        ComponentPool::has_entity(self, range)
    }
}

enum RefIndex {
    Bound(usize),
    Unbound,
}

/// A borrow of a single component value, valid until the next
/// `commit_changes`/`run_systems` releases the pool's internal lock.
pub struct ComponentRef<'a, T: Component> {
    guard: RwLockReadGuard<'a, PoolData<T>>,
    index: RefIndex,
}

impl<'a, T: Component> Deref for ComponentRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.index {
            RefIndex::Bound(i) => &self.guard.storage.bound()[i],
            RefIndex::Unbound => match &self.guard.storage {
                Storage::Unbound(Some(v)) => v,
                _ => unreachable!("ComponentRef constructed without a value present"),
            },
        }
    }
}

/// A mutable borrow of a single component value, returned by
/// [`ComponentPool::get_component_mut`]. Sets the pool's `data_modified`
/// flag when dropped.
pub struct ComponentRefMut<'a, T: Component> {
    guard: RwLockWriteGuard<'a, PoolData<T>>,
    index: RefIndex,
    modified: &'a AtomicBool,
}

impl<'a, T: Component> Deref for ComponentRefMut<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.index {
            RefIndex::Bound(i) => &self.guard.storage.bound()[i],
            RefIndex::Unbound => match &self.guard.storage {
                Storage::Unbound(Some(v)) => v,
                _ => unreachable!("ComponentRefMut constructed without a value present"),
            },
        }
    }
}

impl<'a, T: Component> std::ops::DerefMut for ComponentRefMut<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.index {
            RefIndex::Bound(i) => &mut self.guard.storage.bound_mut()[i],
            RefIndex::Unbound => match &mut self.guard.storage {
                Storage::Unbound(Some(v)) => v,
                _ => unreachable!("ComponentRefMut constructed without a value present"),
            },
        }
    }
}

impl<'a, T: Component> Drop for ComponentRefMut<'a, T> {
    fn drop(&mut self) {
        self.modified.store(true, Ordering::Release);
    }
}

/// A contiguous borrow over a fully-owned range.
pub struct ComponentsRef<'a, T: Component> {
    guard: RwLockReadGuard<'a, PoolData<T>>,
    start: usize,
    len: usize,
}

impl<'a, T: Component> Deref for ComponentsRef<'a, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.guard.storage.bound()[self.start..self.start + self.len]
    }
}

/// Intersects this pool's entity set with `ranges`, as used by the system
/// argument builder (spec §4.3 step 2). A free function rather than a
/// method so it can be called generically over `&dyn PoolBase`.
pub fn intersect_with_pool(ranges: &[EntityRange], pool: &dyn PoolBase) -> Vec<EntityRange> {
    intersect_ranges(ranges, &pool.get_entities_erased())
}

impl<T: Component> Default for ComponentPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Pos(i32);
    impl Component for Pos {}

    #[derive(Clone)]
    struct ATag;
    impl Component for ATag {
        const IS_TAG: bool = true;
    }

    #[derive(Clone)]
    struct AGlobal(u32);
    impl Component for AGlobal {
        const IS_GLOBAL: bool = true;
    }

    #[test]
    fn add_then_commit_then_find() {
        let pool = ComponentPool::<Pos>::new();
        pool.add(EntityRange::new(0, 9), Pos(1));
        pool.process_changes();

        assert!(pool.data_added());
        assert_eq!(pool.component_count(), 10);
        assert_eq!(*pool.find_component_data(0).unwrap(), Pos(1));
        assert_eq!(*pool.find_component_data(9).unwrap(), Pos(1));
        assert!(pool.find_component_data(10).is_none());
    }

    #[test]
    fn add_then_remove_round_trip() {
        let pool = ComponentPool::<Pos>::new();
        pool.add(EntityRange::new(0, 9), Pos(1));
        pool.process_changes();
        pool.clear_flags();

        pool.remove(EntityRange::new(0, 9));
        pool.process_changes();

        assert!(pool.data_removed());
        assert_eq!(pool.component_count(), 0);
        for id in 0..10 {
            assert!(pool.find_component_data(id).is_none());
        }
    }

    #[test]
    fn clear_empties_pool_and_flags_removed() {
        let pool = ComponentPool::<Pos>::new();
        pool.add(EntityRange::new(0, 9), Pos(1));
        pool.process_changes();
        pool.clear_flags();

        pool.clear();

        assert_eq!(pool.component_count(), 0);
        assert!(pool.find_component_data(0).is_none());
        assert!(pool.data_removed());
    }

    #[test]
    fn clear_drops_deferred_queues_so_a_stale_commit_is_a_no_op() {
        let pool = ComponentPool::<Pos>::new();
        pool.add(EntityRange::new(0, 0), Pos(9));

        pool.clear();
        pool.process_changes();

        assert_eq!(pool.component_count(), 0);
    }

    #[test]
    fn partial_removal_splits_range() {
        let pool = ComponentPool::<Pos>::new();
        pool.add_span(EntityRange::new(0, 4), vec![Pos(0), Pos(1), Pos(2), Pos(3), Pos(4)]);
        pool.process_changes();

        pool.remove(EntityRange::new(2, 2));
        pool.process_changes();

        assert!(pool.find_component_data(2).is_none());
        assert_eq!(*pool.find_component_data(1).unwrap(), Pos(1));
        assert_eq!(*pool.find_component_data(3).unwrap(), Pos(3));
        assert_eq!(pool.component_count(), 4);
    }

    #[test]
    fn removal_spanning_two_adjacent_owned_ranges_is_valid() {
        let pool = ComponentPool::<Pos>::new();
        pool.add_span(EntityRange::new(0, 4), vec![Pos(0), Pos(1), Pos(2), Pos(3), Pos(4)]);
        pool.process_changes();
        pool.clear_flags();
        // Force two separate range entries by removing then re-adding the middle.
        pool.remove(EntityRange::new(2, 2));
        pool.process_changes();
        pool.clear_flags();
        pool.add(EntityRange::single(2), Pos(99));
        pool.process_changes();

        assert_eq!(pool.get_entities(), vec![EntityRange::new(0, 4)]);
    }

    #[test]
    fn span_length_mismatch_is_a_contract_violation() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let hit = Arc::new(AtomicBool::new(false));
        let hit2 = hit.clone();
        contract::set_violation_handler(Some(move |_l: &str, v: &ContractViolation| {
            hit2.store(true, Ordering::SeqCst);
            assert!(matches!(v, ContractViolation::SpanLengthMismatch { .. }));
            panic!("expected violation");
        }));

        let pool = ComponentPool::<Pos>::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pool.add_span(EntityRange::new(0, 2), vec![Pos(0)]);
        }));
        assert!(result.is_err());
        assert!(hit.load(Ordering::SeqCst));
        contract::set_violation_handler::<fn(&str, &ContractViolation)>(None);
    }

    #[test]
    fn transient_is_emptied_every_commit() {
        #[derive(Clone)]
        struct Flash;
        impl Component for Flash {
            const IS_TRANSIENT: bool = true;
            const IS_TAG: bool = true;
        }

        let pool = ComponentPool::<Flash>::new();
        pool.add(EntityRange::single(0), Flash);
        pool.process_changes();
        assert_eq!(pool.entity_count(), 0, "transient tag should not persist past its own commit");
    }

    #[test]
    fn tag_pool_shares_one_instance() {
        let pool = ComponentPool::<ATag>::new();
        pool.add(EntityRange::new(0, 9), ATag);
        pool.process_changes();
        assert!(pool.find_component_data(0).is_some());
        assert!(pool.find_component_data(9).is_some());
        assert_eq!(pool.component_count(), 1);
        assert_eq!(pool.entity_count(), 10);
    }

    #[test]
    fn global_pool_reports_all_entities() {
        let pool = ComponentPool::<AGlobal>::new();
        pool.add(EntityRange::single(0), AGlobal(42));
        pool.process_changes();

        assert_eq!(pool.get_entities(), vec![EntityRange::all()]);
        assert!(pool.has_entity(EntityRange::new(-1000, 1000)));
        assert_eq!(pool.global_instance().unwrap().0, 42);
    }

    #[test]
    fn repeated_commit_with_no_enqueues_is_a_no_op() {
        let pool = ComponentPool::<Pos>::new();
        pool.add(EntityRange::new(0, 2), Pos(7));
        pool.process_changes();
        pool.clear_flags();

        pool.process_changes();
        assert!(!pool.data_added());
        assert!(!pool.data_removed());
        assert_eq!(pool.component_count(), 3);
    }

    #[test]
    fn commit_with_only_filter_removals_on_empty_pool_is_noop() {
        let pool = ComponentPool::<Pos>::new();
        pool.process_changes();
        assert!(!pool.data_added());
        assert!(!pool.data_removed());
    }
}
