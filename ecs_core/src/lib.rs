//! Entity identifiers, the range algebra over them, and the per-type
//! component pools that store data against those ranges.
//!
//! This crate has no notion of systems or scheduling; see `ecs-systems` for
//! that layer. Mirrors the `legion_core`/`legion_systems` split in the
//! teacher workspace this crate was built against.

pub mod component;
pub mod contract;
pub mod entity;
pub mod pool;
pub mod registry;

pub mod prelude {
    pub use crate::component::{Component, ComponentTypeId};
    pub use crate::contract::{set_violation_handler, ContractViolation};
    pub use crate::entity::{difference_ranges, intersect_ranges, EntityId, EntityRange};
    pub use crate::pool::{ComponentPool, ComponentRef, ComponentRefMut, ComponentsRef, PoolBase};
    pub use crate::registry::PoolRegistry;
}
