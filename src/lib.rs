//! Entity-component-system runtime: ranged component pools, the entity-set
//! algebra that drives a system's implicit query, and a dependency-DAG
//! scheduler.
//!
//! This crate is a thin facade over its two workspace members:
//! - [`ecs_core`] — entity identifiers/ranges, the component trait and its
//!   flags, component pools, and the pool registry.
//! - [`ecs_systems`] — the system-argument builder, the four system kinds,
//!   the scheduler, and the [`Runtime`](ecs_systems::runtime::Runtime)
//!   facade applications actually construct.
//!
//! Most consumers only need `use ecs::prelude::*;`.

pub use ecs_core;
pub use ecs_systems;

pub mod prelude {
    pub use ecs_core::prelude::*;
    pub use ecs_systems::prelude::*;
}
