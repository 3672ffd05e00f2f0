//! Parent back-references and the sub-component constraints a system may
//! attach to a `parent<…>` parameter.
//!
//! Grounded on `original_source/include/ecs/parent.h` (the payload: just
//! another entity id, plus a type-list of required/forbidden sub-component
//! markers) and `include/ecs/detail/builder_hierachy_argument.h` (depth/root
//! classification by following the chain to its root).

use ecs_core::prelude::*;

/// The component that makes an entity a child: a back-reference to another
/// entity's id. An ordinary bound component, not special-cased by the pool
/// machinery (spec §9: "store parent ids as an ordinary component type").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParentId(pub EntityId);

impl Component for ParentId {}

/// One sub-component test attached to a `parent<…>` system parameter:
/// either "the parent must own `type_id`" or "the parent must not".
#[derive(Copy, Clone, Debug)]
pub struct ParentConstraint {
    pub type_id: ComponentTypeId,
    pub kind: ConstraintKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    Require,
    Forbid,
}

impl ParentConstraint {
    pub fn require(type_id: ComponentTypeId) -> Self {
        ParentConstraint { type_id, kind: ConstraintKind::Require }
    }

    pub fn forbid(type_id: ComponentTypeId) -> Self {
        ParentConstraint { type_id, kind: ConstraintKind::Forbid }
    }
}

/// Checks every constraint against `parent`'s current ownership, using
/// `has_entity` queries supplied by the caller (which knows how to resolve
/// a `ComponentTypeId` back to its erased pool). Returns `true` only if
/// every `Require` is satisfied and every `Forbid` is absent.
pub fn parent_satisfies(
    parent: EntityId,
    constraints: &[ParentConstraint],
    owns: impl Fn(ComponentTypeId, EntityId) -> bool,
) -> bool {
    constraints.iter().all(|c| match c.kind {
        ConstraintKind::Require => owns(c.type_id, parent),
        ConstraintKind::Forbid => !owns(c.type_id, parent),
    })
}

/// An entity's position within its hierarchy tree, computed by following
/// `ParentId` back-references to the root. Used to order a `HierarchySystem`'s
/// argument vector by `(root, depth)` so every parent runs before its
/// descendants (spec §4.3, hierarchy variant).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HierarchyPosition {
    pub root: EntityId,
    pub depth: u32,
}

/// Walks `id`'s `ParentId` chain via `parent_of` until an entity with no
/// parent is reached, returning that root and the number of hops taken.
///
/// # Panics
/// Panics if the chain does not terminate within `max_depth` hops, which
/// indicates a cycle in the host's parent graph (a user error, not a
/// recoverable runtime condition).
pub fn classify(id: EntityId, parent_of: impl Fn(EntityId) -> Option<EntityId>, max_depth: u32) -> HierarchyPosition {
    let mut current = id;
    let mut depth = 0;

    loop {
        match parent_of(current) {
            Some(next) => {
                depth += 1;
                assert!(depth <= max_depth, "parent chain did not terminate: possible cycle at entity {}", id);
                current = next;
            }
            None => return HierarchyPosition { root: current, depth },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn classify_chain_depths() {
        // 1 is root; 2's parent is 1; 3's parent is 2; 4's parent is 1.
        let mut parents = HashMap::new();
        parents.insert(2, 1);
        parents.insert(3, 2);
        parents.insert(4, 1);
        let parent_of = |id: EntityId| parents.get(&id).copied();

        assert_eq!(classify(1, parent_of, 32), HierarchyPosition { root: 1, depth: 0 });
        assert_eq!(classify(2, parent_of, 32), HierarchyPosition { root: 1, depth: 1 });
        assert_eq!(classify(3, parent_of, 32), HierarchyPosition { root: 1, depth: 2 });
        assert_eq!(classify(4, parent_of, 32), HierarchyPosition { root: 1, depth: 1 });
    }

    #[test]
    fn parent_satisfies_require_and_forbid() {
        #[derive(Clone)]
        struct HasFloat;
        impl Component for HasFloat {}
        let float_id = ComponentTypeId::of::<HasFloat>();

        let owns_float = |tid: ComponentTypeId, e: EntityId| tid == float_id && e == 0;

        let forbid_float = vec![ParentConstraint::forbid(float_id)];
        assert!(!parent_satisfies(0, &forbid_float, owns_float));
        assert!(parent_satisfies(1, &forbid_float, owns_float));

        let require_float = vec![ParentConstraint::require(float_id)];
        assert!(parent_satisfies(0, &require_float, owns_float));
        assert!(!parent_satisfies(1, &require_float, owns_float));
    }
}
