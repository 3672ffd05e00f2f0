//! Computes a system's matching entity set from its declared signature.
//!
//! Grounded on `original_source/include/ecs/detail/find_entity_pool_intersections.h`
//! (`pool_intersect<Index>`'s fold over the signature) and spec §4.3.

use ecs_core::prelude::*;

use crate::parent::{parent_satisfies, ParentConstraint, ParentId};

/// One component parameter in a system's signature.
pub enum Requirement {
    /// An ordinary component the entity must own.
    Required(ComponentTypeId),
    /// A filter (absence) marker: the entity must **not** own this.
    Filter(ComponentTypeId),
    /// A global component: does not narrow the entity set (spec §9: "do
    /// not special-case globals in the algebra"), but is tracked so
    /// `get_type_hashes`/`depends_on` see it.
    Global(ComponentTypeId),
    /// A `parent<…>` parameter with its sub-component constraints.
    Parent(Vec<ParentConstraint>),
}

/// The declared shape of a system, independent of its callable.
pub struct Signature {
    pub requirements: Vec<Requirement>,
}

impl Signature {
    pub fn new(requirements: Vec<Requirement>) -> Self {
        Signature { requirements }
    }

    /// Every component type identity this signature touches, including
    /// parent sub-components — used by the scheduler's dependency scan
    /// (spec §4.4 `get_type_hashes`).
    pub fn type_hashes(&self) -> Vec<ComponentTypeId> {
        let mut out = Vec::new();
        for req in &self.requirements {
            match req {
                Requirement::Required(t) | Requirement::Filter(t) | Requirement::Global(t) => out.push(*t),
                Requirement::Parent(constraints) => {
                    out.push(ComponentTypeId::of::<ParentId>());
                    out.extend(constraints.iter().map(|c| c.type_id));
                }
            }
        }
        out
    }
}

/// Builds the entity set matching `signature` against the current state of
/// `registry` (spec §4.3 steps 1-4).
pub fn build_entity_set(signature: &Signature, registry: &PoolRegistry) -> Vec<EntityRange> {
    let mut set = vec![EntityRange::all()];

    for req in &signature.requirements {
        match req {
            Requirement::Required(tid) | Requirement::Global(tid) => {
                let entities = pool_entities(registry, *tid);
                set = intersect_ranges(&set, &entities);
            }
            Requirement::Filter(tid) => {
                let entities = pool_entities(registry, *tid);
                set = difference_ranges(&set, &entities);
            }
            Requirement::Parent(constraints) => {
                let parent_pool = registry.get::<ParentId>();
                let parent_entities = parent_pool.as_ref().map(|p| p.get_entities()).unwrap_or_default();
                set = intersect_ranges(&set, &parent_entities);

                set = match &parent_pool {
                    Some(pool) if !constraints.is_empty() => {
                        filter_by_parent_constraints(&set, constraints, pool, registry)
                    }
                    _ => set,
                };
            }
        }
    }

    set
}

fn pool_entities(registry: &PoolRegistry, tid: ComponentTypeId) -> Vec<EntityRange> {
    registry.get_erased(tid).map(|p| p.get_entities_erased()).unwrap_or_default()
}

fn owns(registry: &PoolRegistry, tid: ComponentTypeId, entity: EntityId) -> bool {
    registry
        .get_erased(tid)
        .map(|p| p.has_entity(EntityRange::single(entity)))
        .unwrap_or(false)
}

/// Tests each candidate entity's parent against `constraints`, dropping any
/// entity whose parent fails a requirement or carries a forbidden
/// sub-component (spec §4.3 step 4).
fn filter_by_parent_constraints(
    candidates: &[EntityRange],
    constraints: &[ParentConstraint],
    parent_pool: &ComponentPool<ParentId>,
    registry: &PoolRegistry,
) -> Vec<EntityRange> {
    let mut surviving: Vec<EntityId> = Vec::new();

    for range in candidates {
        for id in range.first()..=range.last() {
            let parent_id = match parent_pool.find_component_data(id) {
                Some(parent_ref) => parent_ref.0,
                None => continue,
            };

            if parent_satisfies(parent_id, constraints, |tid, e| owns(registry, tid, e)) {
                surviving.push(id);
            }
        }
    }

    coalesce(surviving)
}

fn coalesce(mut ids: Vec<EntityId>) -> Vec<EntityRange> {
    ids.sort_unstable();
    ids.dedup();

    let mut out: Vec<EntityRange> = Vec::new();
    for id in ids {
        match out.last_mut() {
            Some(last) if last.last() != EntityId::MAX && last.last() + 1 == id => {
                *last = EntityRange::new(last.first(), id);
            }
            _ => out.push(EntityRange::single(id)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct A;
    impl Component for A {}

    #[derive(Clone, Debug)]
    struct B;
    impl Component for B {}

    #[test]
    fn required_and_filter_narrow_the_set() {
        let registry = PoolRegistry::new();
        registry.get_or_create::<A>().add(EntityRange::new(0, 9), A);
        registry.get_or_create::<B>().add(EntityRange::new(5, 14), B);
        registry.process_all_changes();

        let sig = Signature::new(vec![
            Requirement::Required(ComponentTypeId::of::<A>()),
            Requirement::Filter(ComponentTypeId::of::<B>()),
        ]);

        assert_eq!(build_entity_set(&sig, &registry), vec![EntityRange::new(0, 4)]);
    }

    #[test]
    fn parent_filter_excludes_children_of_owners() {
        #[derive(Clone, Debug)]
        struct HasFloat;
        impl Component for HasFloat {}

        let registry = PoolRegistry::new();
        registry.get_or_create::<A>().add(EntityRange::new(0, 1), A);
        registry.get_or_create::<ParentId>().add(EntityRange::single(1), ParentId(0));
        registry.get_or_create::<HasFloat>().add(EntityRange::single(0), HasFloat);
        registry.process_all_changes();

        let sig = Signature::new(vec![
            Requirement::Required(ComponentTypeId::of::<A>()),
            Requirement::Parent(vec![ParentConstraint::forbid(ComponentTypeId::of::<HasFloat>())]),
        ]);

        assert!(build_entity_set(&sig, &registry).is_empty());

        registry.get_or_create::<HasFloat>().remove(EntityRange::single(0));
        registry.process_all_changes();

        assert_eq!(build_entity_set(&sig, &registry), vec![EntityRange::single(1)]);
    }
}
