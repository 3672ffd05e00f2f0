//! The embedding-facing facade: owns the pool registry, the system list,
//! the scheduler, and the worker pool.
//!
//! Grounded on `legion::Universe`/`World` collapsed into one object (this
//! design has no separate "universe" concept to split the pool registry
//! from the system list across) and spec §6's embedding API table, which
//! this module implements close to verbatim.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use ecs_core::prelude::*;

use crate::error::SchedulerError;
use crate::parent::ParentConstraint;
use crate::schedule::Scheduler;
use crate::system::{Kind, Query, System, SystemNode, SystemOptions};

/// Construction-time knobs for a [`Runtime`]. Deliberately small: the
/// runtime has no on-disk format, so there is nothing here resembling a
/// config file, per spec §6 "Persistence: none".
pub struct RuntimeConfig {
    /// Number of worker threads in the runtime's `rayon::ThreadPool`.
    /// Defaults to the host's logical CPU count (spec §5).
    pub worker_threads: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig { worker_threads: None }
    }
}

/// The runtime object: pool registry, system list, scheduler, and worker
/// pool, all owned together (spec §2 "the runtime").
pub struct Runtime {
    registry: PoolRegistry,
    systems: RwLock<Vec<Arc<dyn SystemNode>>>,
    schedule: RwLock<Option<Scheduler>>,
    pool: rayon::ThreadPool,
}

impl Runtime {
    /// Allocates the pool registry and worker pool. The worker pool is
    /// created once here and released when the `Runtime` is dropped (spec
    /// §5 "created once with the runtime and released at teardown").
    pub fn new(config: RuntimeConfig) -> Self {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = config.worker_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build().expect("failed to build the ecs runtime's worker pool");

        tracing::info!(threads = pool.current_num_threads(), "ecs runtime created");

        Runtime {
            registry: PoolRegistry::new(),
            systems: RwLock::new(Vec::new()),
            schedule: RwLock::new(None),
            pool,
        }
    }

    // ---- component lifecycle (spec §6) ----

    /// Enqueues `value` against every entity in `range`. Deferred until
    /// [`Runtime::commit_changes`].
    pub fn add_component<T: Component + Clone>(&self, range: EntityRange, value: T) {
        self.registry.get_or_create::<T>().add(range, value);
    }

    pub fn add_component_span<T: Component>(&self, range: EntityRange, values: Vec<T>) {
        self.registry.get_or_create::<T>().add_span(range, values);
    }

    pub fn add_component_generator<T, F>(&self, range: EntityRange, generator: F)
    where
        T: Component,
        F: Fn(EntityId) -> T + Send + Sync + 'static,
    {
        self.registry.get_or_create::<T>().add_generator(range, generator);
    }

    pub fn remove_component<T: Component>(&self, range: EntityRange) {
        self.registry.get_or_create::<T>().remove(range);
    }

    pub fn get_component<T: Component>(&self, id: EntityId) -> Option<ComponentRef<'_, T>> {
        self.registry.get::<T>()?.find_component_data(id)
    }

    pub fn get_components<T: Component>(&self, range: EntityRange) -> Option<ComponentsRef<'_, T>> {
        self.registry.get::<T>()?.get_components(range)
    }

    pub fn get_global_component<T: Component>(&self) -> Option<ComponentRef<'_, T>> {
        self.registry.get::<T>()?.global_instance()
    }

    /// A mutable borrow of the single global instance, for host code that
    /// needs to write one outside of a system (systems write through a
    /// `GlobalMut<T>` query parameter instead).
    pub fn get_global_component_mut<T: Component>(&self) -> Option<ComponentRefMut<'_, T>> {
        self.registry.get::<T>()?.get_component_mut(0)
    }

    pub fn has_component<T: Component>(&self, range: EntityRange) -> bool {
        self.registry.get::<T>().map(|p| p.has_entity(range)).unwrap_or(false)
    }

    pub fn get_component_count<T: Component>(&self) -> usize {
        self.registry.get::<T>().map(|p| p.component_count()).unwrap_or(0)
    }

    pub fn get_entity_count<T: Component>(&self) -> usize {
        self.registry.get::<T>().map(|p| p.entity_count()).unwrap_or(0)
    }

    // ---- system creation (spec §6) ----

    /// Registers a system built by a [`SystemBuilder`]. Returns
    /// [`SchedulerError::DuplicateSystemName`] if the name is already taken
    /// (names are the host-facing handle for `set_system_enable` and
    /// `run_system_by_name`, so they must be unique).
    pub fn add_system<Q: Query + 'static>(&self, system: System<Q>) -> Result<(), SchedulerError> {
        let mut systems = self.systems.write();
        if systems.iter().any(|s| s.name() == system.name()) {
            return Err(SchedulerError::DuplicateSystemName(system.name().to_string()));
        }
        system.process_changes(&self.registry, true);
        systems.push(Arc::new(system));
        *self.schedule.write() = None;
        Ok(())
    }

    pub fn set_system_enable(&self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let systems = self.systems.read();
        let system = systems.iter().find(|s| s.name() == name).ok_or_else(|| SchedulerError::UnknownSystem(name.to_string()))?;
        system.set_enable(enabled);
        Ok(())
    }

    pub fn system_is_enabled(&self, name: &str) -> Result<bool, SchedulerError> {
        let systems = self.systems.read();
        systems
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.is_enabled())
            .ok_or_else(|| SchedulerError::UnknownSystem(name.to_string()))
    }

    /// Runs a `manual_update` system's `run()` directly; the scheduler
    /// never schedules such systems (spec §6).
    pub fn run_system_by_name(&self, name: &str) -> Result<(), SchedulerError> {
        let systems = self.systems.read();
        let system = systems.iter().find(|s| s.name() == name).ok_or_else(|| SchedulerError::UnknownSystem(name.to_string()))?;
        if !system.manual_update() {
            return Err(SchedulerError::NotManualUpdate(name.to_string()));
        }
        system.process_changes(&self.registry, false);
        system.run(&self.registry);
        Ok(())
    }

    // ---- lifecycle (spec §6) ----

    /// Merges every pool's deferred queues into its main storage, then asks
    /// every scheduled system to rebuild its entity set if any pool it
    /// reads or writes reported a count change, then clears every pool's
    /// status flags (spec §2 data-flow, §4.2 step 4).
    pub fn commit_changes(&self) {
        let span = tracing::trace_span!("runtime::commit_changes");
        let _enter = span.enter();

        self.registry.process_all_changes();

        for system in self.systems.read().iter() {
            system.process_changes(&self.registry, false);
        }

        self.registry.clear_all_flags();
    }

    /// Builds (if stale) and runs the dependency-ordered schedule once.
    pub fn run_systems(&self) {
        let span = tracing::trace_span!("runtime::run_systems");
        let _enter = span.enter();

        if self.schedule.read().is_none() {
            let systems = self.systems.read();
            *self.schedule.write() = Some(Scheduler::build(&systems));
        }

        if let Some(schedule) = self.schedule.read().as_ref() {
            schedule.run(&self.registry, Some(&self.pool));
        }
    }

    /// `commit_changes` followed by `run_systems` (spec §6 `update()`).
    pub fn update(&self) {
        self.commit_changes();
        self.run_systems();
    }

    /// Drops all systems and clears all pools. The pool registry itself is
    /// retained (spec §6: "per-thread caches may still reference it").
    pub fn reset(&self) {
        self.systems.write().clear();
        *self.schedule.write() = None;
        self.registry.reset();
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }
}

/// Builds a [`System`] step by step, mirroring `legion`'s `SystemBuilder`
/// (`legion_systems::system::SystemBuilder`) fluent-option style, generic
/// over the callable's declared `Query` tuple.
pub struct SystemBuilder<Q: Query> {
    name: String,
    options: SystemOptions,
    kind: Kind<Q>,
    parent_constraints: Vec<ParentConstraint>,
}

impl<Q: Query> SystemBuilder<Q> {
    pub fn ranged(name: impl Into<String>) -> Self {
        SystemBuilder { name: name.into(), options: SystemOptions::default(), kind: Kind::Ranged, parent_constraints: Vec::new() }
    }

    pub fn sorted(name: impl Into<String>, sort_key: ComponentTypeId, compare: impl Fn(EntityId, EntityId) -> std::cmp::Ordering + Send + Sync + 'static) -> Self {
        SystemBuilder {
            name: name.into(),
            options: SystemOptions::default(),
            kind: Kind::Sorted { compare: Box::new(compare), sort_key },
            parent_constraints: Vec::new(),
        }
    }

    pub fn hierarchy(name: impl Into<String>) -> Self {
        SystemBuilder { name: name.into(), options: SystemOptions::default(), kind: Kind::Hierarchy, parent_constraints: Vec::new() }
    }

    pub fn global(name: impl Into<String>) -> Self {
        SystemBuilder { name: name.into(), options: SystemOptions::default(), kind: Kind::Global, parent_constraints: Vec::new() }
    }

    pub fn group(mut self, group: i32) -> Self {
        self.options.group = group;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.options.interval = Some(interval);
        self
    }

    pub fn not_parallel(mut self) -> Self {
        self.options.not_parallel = true;
        self
    }

    pub fn manual_update(mut self) -> Self {
        self.options.manual_update = true;
        self
    }

    pub fn parent_constraints(mut self, constraints: Vec<ParentConstraint>) -> Self {
        self.parent_constraints = constraints;
        self
    }

    pub fn build(self, callable: impl for<'a> Fn(EntityId, Q::Item<'a>) + Send + Sync + 'static) -> System<Q> {
        System::new(self.name, self.options, self.kind, self.parent_constraints, callable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{GlobalMut, Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Speed(i32);
    impl Component for Speed {}

    #[derive(Clone, Debug)]
    struct Mass(i32);
    impl Component for Mass {}

    #[test]
    fn ranged_two_component_system_visits_every_entity() {
        let runtime = Runtime::new(RuntimeConfig::default());
        runtime.add_component::<Speed>(EntityRange::new(0, 9), Speed(1));
        runtime.add_component::<Mass>(EntityRange::new(0, 9), Mass(2));

        let hits = Arc::new(AtomicUsize::new(0));
        let counted = hits.clone();
        let system = SystemBuilder::<(Read<Speed>, Read<Mass>)>::ranged("count")
            .build(move |_id, (_speed, _mass)| {
                counted.fetch_add(1, Ordering::SeqCst);
            });
        runtime.add_system(system).unwrap();

        runtime.update();

        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn transient_component_is_gone_after_update() {
        #[derive(Clone, Debug)]
        struct Flash;
        impl Component for Flash {
            const IS_TAG: bool = true;
            const IS_TRANSIENT: bool = true;
        }

        let runtime = Runtime::new(RuntimeConfig::default());
        runtime.add_component::<Flash>(EntityRange::single(0), Flash);
        runtime.update();

        assert_eq!(runtime.get_component_count::<Flash>(), 0);
    }

    #[test]
    fn reset_drops_systems_and_pools() {
        let runtime = Runtime::new(RuntimeConfig::default());
        runtime.add_component::<Speed>(EntityRange::single(0), Speed(1));
        let system = SystemBuilder::<Read<Speed>>::ranged("noop").build(|_id, _speed| {});
        runtime.add_system(system).unwrap();
        runtime.commit_changes();

        runtime.reset();

        assert_eq!(runtime.get_component_count::<Speed>(), 0);
        assert!(runtime.set_system_enable("noop", false).is_err());
    }

    #[derive(Clone, Debug)]
    struct Tally(i32);
    impl Component for Tally {
        const IS_GLOBAL: bool = true;
    }

    #[test]
    fn global_mut_system_writes_through_to_the_single_instance() {
        let runtime = Runtime::new(RuntimeConfig::default());
        runtime.add_component::<Tally>(EntityRange::single(0), Tally(0));
        runtime.commit_changes();

        let system = SystemBuilder::<GlobalMut<Tally>>::global("tally_up").build(|_id, mut tally| {
            tally.0 += 1;
        });
        runtime.add_system(system).unwrap();

        runtime.update();
        runtime.update();

        assert_eq!(runtime.get_global_component::<Tally>().unwrap().0, 2);
    }

    #[test]
    fn manual_update_system_is_not_scheduled() {
        let runtime = Runtime::new(RuntimeConfig::default());
        runtime.add_component::<Speed>(EntityRange::single(0), Speed(1));

        let hits = Arc::new(AtomicUsize::new(0));
        let counted = hits.clone();
        let system = SystemBuilder::<Write<Speed>>::ranged("manual")
            .manual_update()
            .build(move |_id, mut s| {
                s.0 += 1;
                counted.fetch_add(1, Ordering::SeqCst);
            });
        runtime.add_system(system).unwrap();

        runtime.update();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        runtime.run_system_by_name("manual").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
