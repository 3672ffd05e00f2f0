//! The component trait and the compile-time flags attached to a component
//! type (`tag`, `transient`, `immutable`, `global`).
//!
//! The original C++ source declares these flags through an inherited
//! `ecs_flags` alias on the component type (`original_source/include/ecs/
//! flags.h`). Rust has no equivalent of deriving from a flags value, so
//! this crate expresses the same four properties as associated constants
//! on [`Component`], defaulted to "none of the above" so that a plain
//! `impl Component for MyType {}` yields an ordinary bound component.

use std::any::TypeId;
use std::fmt;

/// A user-supplied value type that can be attached to entities.
///
/// Implementors opt into the flags described in spec §3 by overriding the
/// relevant associated constant; see [`Component::IS_TAG`] and friends.
pub trait Component: 'static + Send + Sync {
    /// Zero meaningful payload; a single sentinel instance satisfies every
    /// owning entity. Mutually exclusive with `IS_GLOBAL`.
    const IS_TAG: bool = false;

    /// Automatically removed from every owning entity at each commit.
    /// Mutually exclusive with `IS_GLOBAL`.
    const IS_TRANSIENT: bool = false;

    /// A system parameter of this type is statically required to be
    /// read-only. Enforced where a system's signature is assembled: the
    /// `ecs-systems` crate's `Write<T>` query leaf asserts `!T::IS_IMMUTABLE`
    /// before registering itself as a writer.
    const IS_IMMUTABLE: bool = false;

    /// Exactly one instance exists, reachable without an entity; such a
    /// type's pool reports the universal range from `get_entities()`.
    const IS_GLOBAL: bool = false;

    /// `true` for a type that is not physically stored per-entity (`tag`
    /// or `global`); such pools hold at most one instance regardless of
    /// the number of owners.
    fn is_unbound() -> bool {
        Self::IS_TAG || Self::IS_GLOBAL
    }

    /// Debug label used in contract-violation messages.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A stable identifier for a component type, used as the key into the
/// [`crate::registry::PoolRegistry`] and into every system's declared
/// signature. Wraps `TypeId` rather than hashing the type's name, matching
/// `legion`'s `ComponentTypeId`/`TagTypeId` (see `legion_systems::schedule`,
/// which keys `fxhash::FxHashMap<ComponentTypeId, _>` maps this way).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ComponentTypeId(TypeId, &'static str);

impl ComponentTypeId {
    pub fn of<T: Component>() -> Self {
        ComponentTypeId(TypeId::of::<T>(), T::type_name())
    }

    pub fn name(&self) -> &'static str {
        self.1
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.1)
    }
}
