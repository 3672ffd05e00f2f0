//! The system kinds, their shared contract, and the typed query a system's
//! callable is invoked with.
//!
//! Grounded on spec §4.3/§4.4 and `legion`'s `Schedulable`/`System<R,Q,F>`
//! split (`src/system.rs`): a generic `System<Q>` holds a resolved query and
//! a boxed callable, the same two-phase prepare-then-iterate shape as
//! `legion`'s `PreparedQuery`, re-expressed with a GAT instead of the
//! teacher's raw-pointer `PreparedWorld` shim.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ecs_core::prelude::*;
use ecs_core::contract::ContractViolation;

use crate::args::{build_entity_set, Requirement, Signature};
use crate::parent::{classify, HierarchyPosition, ParentConstraint, ParentId};

/// One data-bearing parameter of a system signature, and the tuple
/// combinator that lets a system declare several. Leaf types: [`Read`],
/// [`Write`], [`Filter`], [`GlobalRef`].
pub trait Query: Send + Sync {
    type Resolved: Send + Sync;
    type Item<'a>;

    fn requirements() -> Vec<Requirement>;
    fn writes() -> Vec<ComponentTypeId> {
        Vec::new()
    }
    fn resolve(registry: &PoolRegistry) -> Self::Resolved;
    fn item<'a>(resolved: &'a Self::Resolved, id: EntityId) -> Self::Item<'a>;
}

/// A required, read-only component.
pub struct Read<T>(PhantomData<T>);

impl<T: Component> Query for Read<T> {
    type Resolved = Arc<ComponentPool<T>>;
    type Item<'a> = ComponentRef<'a, T>;

    fn requirements() -> Vec<Requirement> {
        vec![Requirement::Required(ComponentTypeId::of::<T>())]
    }

    fn resolve(registry: &PoolRegistry) -> Self::Resolved {
        registry.get_or_create::<T>()
    }

    fn item<'a>(resolved: &'a Self::Resolved, id: EntityId) -> Self::Item<'a> {
        resolved
            .find_component_data(id)
            .expect("entity in a system's computed set must own its required components")
    }
}

/// A required, mutable component. Its pool is flagged `data_modified` the
/// moment the returned [`ComponentRefMut`] is dropped.
pub struct Write<T>(PhantomData<T>);

impl<T: Component> Query for Write<T> {
    type Resolved = Arc<ComponentPool<T>>;
    type Item<'a> = ComponentRefMut<'a, T>;

    fn requirements() -> Vec<Requirement> {
        vec![Requirement::Required(ComponentTypeId::of::<T>())]
    }

    fn writes() -> Vec<ComponentTypeId> {
        assert!(
            !T::IS_IMMUTABLE,
            "{} is declared immutable and cannot be taken by `Write`; use `Read` instead",
            T::type_name()
        );
        vec![ComponentTypeId::of::<T>()]
    }

    fn resolve(registry: &PoolRegistry) -> Self::Resolved {
        registry.get_or_create::<T>()
    }

    fn item<'a>(resolved: &'a Self::Resolved, id: EntityId) -> Self::Item<'a> {
        resolved
            .get_component_mut(id)
            .expect("entity in a system's computed set must own its required components")
    }
}

/// A filter (absence) marker: narrows the entity set, contributes nothing
/// to the callable's argument tuple.
pub struct Filter<T>(PhantomData<T>);

impl<T: Component> Query for Filter<T> {
    type Resolved = ();
    type Item<'a> = ();

    fn requirements() -> Vec<Requirement> {
        vec![Requirement::Filter(ComponentTypeId::of::<T>())]
    }

    fn resolve(_registry: &PoolRegistry) -> Self::Resolved {}
    fn item<'a>(_resolved: &'a Self::Resolved, _id: EntityId) -> Self::Item<'a> {}
}

/// A global component, delivered by reference regardless of the entity
/// being visited.
pub struct GlobalRef<T>(PhantomData<T>);

impl<T: Component> Query for GlobalRef<T> {
    type Resolved = Arc<ComponentPool<T>>;
    type Item<'a> = ComponentRef<'a, T>;

    fn requirements() -> Vec<Requirement> {
        vec![Requirement::Global(ComponentTypeId::of::<T>())]
    }

    fn resolve(registry: &PoolRegistry) -> Self::Resolved {
        registry.get_or_create::<T>()
    }

    fn item<'a>(resolved: &'a Self::Resolved, _id: EntityId) -> Self::Item<'a> {
        resolved
            .global_instance()
            .expect("global component must be added before a system referencing it runs")
    }
}

/// A global component taken by mutable reference. Writing through it sets
/// the pool's `data_modified` flag, same as [`Write`]; spec §3 only
/// distinguishes `global` from a bound component by its storage ("at most
/// one instance"), not by read/write access, so a system may declare a
/// global parameter mutable the same way it would an ordinary component.
pub struct GlobalMut<T>(PhantomData<T>);

impl<T: Component> Query for GlobalMut<T> {
    type Resolved = Arc<ComponentPool<T>>;
    type Item<'a> = ComponentRefMut<'a, T>;

    fn requirements() -> Vec<Requirement> {
        vec![Requirement::Global(ComponentTypeId::of::<T>())]
    }

    fn writes() -> Vec<ComponentTypeId> {
        assert!(
            !T::IS_IMMUTABLE,
            "{} is declared immutable and cannot be taken by `GlobalMut`; use `GlobalRef` instead",
            T::type_name()
        );
        vec![ComponentTypeId::of::<T>()]
    }

    fn resolve(registry: &PoolRegistry) -> Self::Resolved {
        registry.get_or_create::<T>()
    }

    fn item<'a>(resolved: &'a Self::Resolved, _id: EntityId) -> Self::Item<'a> {
        resolved
            .get_component_mut(0)
            .expect("global component must be added before a system referencing it runs")
    }
}

macro_rules! impl_query_tuple {
    ($($t:ident),+) => {
        impl<$($t: Query),+> Query for ($($t,)+) {
            type Resolved = ($($t::Resolved,)+);
            type Item<'a> = ($($t::Item<'a>,)+);

            fn requirements() -> Vec<Requirement> {
                let mut out = Vec::new();
                $(out.extend($t::requirements());)+
                out
            }

            fn writes() -> Vec<ComponentTypeId> {
                let mut out = Vec::new();
                $(out.extend($t::writes());)+
                out
            }

            fn resolve(registry: &PoolRegistry) -> Self::Resolved {
                ($($t::resolve(registry),)+)
            }

            #[allow(non_snake_case)]
            fn item<'a>(resolved: &'a Self::Resolved, id: EntityId) -> Self::Item<'a> {
                let ($($t,)+) = resolved;
                ($($t::item($t, id),)+)
            }
        }
    };
}

impl_query_tuple!(A);
impl_query_tuple!(A, B);
impl_query_tuple!(A, B, C);
impl_query_tuple!(A, B, C, D);

/// The four argument-delivery strategies a system can use (spec §4.3).
pub enum Kind<Q: Query> {
    /// Iterates matching ranges directly; parallel unless `not_parallel`.
    Ranged,
    /// Unrolls the matching entities into a vector and sorts it by a
    /// host-supplied comparator before each run. `sort_key` names the
    /// component type the comparator reads, so `process_changes` can
    /// re-sort (without recomputing the entity set) whenever that one
    /// pool alone reports `data_modified` (spec §4.3 "sorted").
    Sorted {
        compare: Box<dyn Fn(EntityId, EntityId) -> Ordering + Send + Sync>,
        sort_key: ComponentTypeId,
    },
    /// Classifies matching entities into `(root, depth)` order and visits
    /// them sequentially, every parent before its descendants.
    Hierarchy,
    /// Invokes the callable once per run with each global's instance.
    Global,
    #[doc(hidden)]
    _Marker(std::marker::PhantomData<Q>),
}

/// Runtime-adjustable options a system was built with (spec §4.4, §6).
#[derive(Default)]
pub struct SystemOptions {
    pub group: i32,
    pub interval: Option<Duration>,
    pub not_parallel: bool,
    pub manual_update: bool,
}

/// Type-erased operations the scheduler and runtime need, independent of a
/// system's concrete `Query`. Grounded on `legion`'s `Schedulable` trait
/// (`src/system.rs`), generalized with the entity-set rebuild and interval
/// gating this design's systems own directly rather than delegating to a
/// `World`.
pub trait SystemNode: Send + Sync {
    fn name(&self) -> &str;
    fn group(&self) -> i32;
    fn manual_update(&self) -> bool;
    fn is_enabled(&self) -> bool;
    fn set_enable(&self, enabled: bool);
    fn not_parallel(&self) -> bool;
    fn type_hashes(&self) -> Vec<ComponentTypeId>;
    fn has_component(&self, id: ComponentTypeId) -> bool {
        self.type_hashes().contains(&id)
    }
    fn writes_to_component(&self, id: ComponentTypeId) -> bool;
    fn depends_on(&self, other: &dyn SystemNode) -> bool {
        self.type_hashes()
            .iter()
            .any(|h| other.has_component(*h) && (self.writes_to_component(*h) || other.writes_to_component(*h)))
    }
    /// Rebuilds the cached entity set if `force` or any source pool
    /// reports a count change since the last rebuild.
    fn process_changes(&self, registry: &PoolRegistry, force: bool);
    fn run(&self, registry: &PoolRegistry);
}

/// A concrete system: a query, a callable, an argument-delivery `Kind`, and
/// the cached entity set rebuilt by `process_changes`.
pub struct System<Q: Query> {
    name: String,
    options: SystemOptions,
    kind: Kind<Q>,
    callable: Box<dyn for<'a> Fn(EntityId, Q::Item<'a>) + Send + Sync>,
    parent_constraints: Vec<ParentConstraint>,
    entities: Mutex<Vec<EntityRange>>,
    sorted_order: Mutex<Vec<EntityId>>,
    enabled: AtomicBool,
    last_run: Mutex<Option<Instant>>,
}

impl<Q: Query> System<Q> {
    pub fn new(
        name: impl Into<String>,
        options: SystemOptions,
        kind: Kind<Q>,
        parent_constraints: Vec<ParentConstraint>,
        callable: impl for<'a> Fn(EntityId, Q::Item<'a>) + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();

        if let Kind::Sorted { sort_key, .. } = &kind {
            if !Q::requirements().iter().any(|r| matches!(r, Requirement::Required(t) | Requirement::Global(t) if t == sort_key))
            {
                ecs_core::contract::raise(
                    "ecs_systems::system::System::new",
                    ContractViolation::SortKeyNotInSignature { system: name.clone() },
                );
            }
        }

        System {
            name,
            options,
            kind,
            callable: Box::new(callable),
            parent_constraints,
            entities: Mutex::new(Vec::new()),
            sorted_order: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
            last_run: Mutex::new(None),
        }
    }

    fn signature(&self) -> Signature {
        let mut requirements = Q::requirements();
        if !self.parent_constraints.is_empty() || matches!(self.kind, Kind::Hierarchy) {
            requirements.push(Requirement::Parent(self.parent_constraints.clone()));
        }
        Signature::new(requirements)
    }

    /// Calls the callable once per entity in `ranges`. Fans out across the
    /// runtime's worker pool via `rayon` unless `not_parallel` was set on
    /// this system (spec §4.5 "ranged and sorted systems use a parallel-for
    /// policy unless the `not_parallel` option is present"); sequential when
    /// the `par-iter` feature is disabled, matching `legion`'s own
    /// `par-iter`-gated `Query::par_entities_for_each`.
    #[cfg(feature = "par-iter")]
    fn run_ranged(&self, ranges: &[EntityRange], resolved: &Q::Resolved) {
        if self.options.not_parallel {
            for range in ranges {
                for id in range.first()..=range.last() {
                    (self.callable)(id, Q::item(resolved, id));
                }
            }
            return;
        }

        use rayon::prelude::*;
        ranges.par_iter().for_each(|range| {
            (range.first()..=range.last()).into_par_iter().for_each(|id| {
                (self.callable)(id, Q::item(resolved, id));
            });
        });
    }

    #[cfg(not(feature = "par-iter"))]
    fn run_ranged(&self, ranges: &[EntityRange], resolved: &Q::Resolved) {
        for range in ranges {
            for id in range.first()..=range.last() {
                (self.callable)(id, Q::item(resolved, id));
            }
        }
    }

    fn interval_elapsed(&self) -> bool {
        match self.options.interval {
            None => true,
            Some(interval) => match *self.last_run.lock() {
                None => true,
                Some(last) => last.elapsed() >= interval,
            },
        }
    }
}

impl<Q: Query> SystemNode for System<Q> {
    fn name(&self) -> &str {
        &self.name
    }

    fn group(&self) -> i32 {
        self.options.group
    }

    fn manual_update(&self) -> bool {
        self.options.manual_update
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(AtomicOrd::Acquire)
    }

    fn set_enable(&self, enabled: bool) {
        let was_enabled = self.enabled.swap(enabled, AtomicOrd::AcqRel);
        if enabled && !was_enabled {
            // Re-enabling forces a rebuild on the next `process_changes` by
            // clearing the cached set (spec §4.4 `set_enable`).
            self.entities.lock().clear();
        }
    }

    fn not_parallel(&self) -> bool {
        self.options.not_parallel
    }

    fn type_hashes(&self) -> Vec<ComponentTypeId> {
        self.signature().type_hashes()
    }

    fn writes_to_component(&self, id: ComponentTypeId) -> bool {
        Q::writes().contains(&id)
    }

    fn process_changes(&self, registry: &PoolRegistry, force: bool) {
        let signature = self.signature();
        let needs_rebuild = force
            || signature.type_hashes().iter().any(|tid| {
                registry
                    .get_erased(*tid)
                    .map(|p| p.data_added() || p.data_removed())
                    .unwrap_or(false)
            });

        if !needs_rebuild {
            // Even without a set change, a sorted system must re-sort if its
            // sort key's own pool was written through a mutable reference
            // since the last run (spec §4.3 "sorted").
            if let Kind::Sorted { compare, sort_key } = &self.kind {
                let key_modified = registry.get_erased(*sort_key).map(|p| p.data_modified()).unwrap_or(false);
                if key_modified {
                    self.sorted_order.lock().sort_by(|a, b| compare(*a, *b));
                }
            }
            return;
        }

        let mut set = build_entity_set(&signature, registry);

        if matches!(self.kind, Kind::Hierarchy) {
            let order = hierarchy_order(&set, registry);
            set = order.iter().map(|id| EntityRange::single(*id)).collect();
            *self.sorted_order.lock() = order;
        } else if let Kind::Sorted { compare, .. } = &self.kind {
            let mut ids: Vec<EntityId> = set.iter().flat_map(|r| r.first()..=r.last()).collect();
            ids.sort_by(|a, b| compare(*a, *b));
            *self.sorted_order.lock() = ids;
        }

        *self.entities.lock() = set;
    }

    fn run(&self, registry: &PoolRegistry) {
        if !self.is_enabled() || !self.interval_elapsed() {
            return;
        }

        let resolved = Q::resolve(registry);

        match &self.kind {
            Kind::Ranged => {
                let ranges = self.entities.lock();
                self.run_ranged(&ranges, &resolved);
            }
            Kind::Sorted { .. } | Kind::Hierarchy => {
                for id in self.sorted_order.lock().iter() {
                    (self.callable)(*id, Q::item(&resolved, *id));
                }
            }
            Kind::Global => {
                (self.callable)(0, Q::item(&resolved, 0));
            }
            Kind::_Marker(_) => unreachable!(),
        }

        *self.last_run.lock() = Some(Instant::now());
    }
}

fn hierarchy_order(set: &[EntityRange], registry: &PoolRegistry) -> Vec<EntityId> {
    let Some(parent_pool) = registry.get::<ParentId>() else {
        return set.iter().flat_map(|r| r.first()..=r.last()).collect();
    };

    let parent_of = |id: EntityId| parent_pool.find_component_data(id).map(|p| p.0);
    let mut with_position: Vec<(HierarchyPosition, EntityId)> = set
        .iter()
        .flat_map(|r| r.first()..=r.last())
        .map(|id| (classify(id, parent_of, 10_000), id))
        .collect();
    with_position.sort_by_key(|(pos, _)| *pos);
    with_position.into_iter().map(|(_, id)| id).collect()
}
