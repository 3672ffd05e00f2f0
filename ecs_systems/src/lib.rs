//! System signatures, the scheduler, and the runtime facade built on top of
//! `ecs-core`'s pools and range algebra.
//!
//! Mirrors the `legion_systems` half of the teacher workspace this crate
//! was built against: `ecs-core` plays `legion_core`'s role (entities,
//! storage), this crate plays `legion_systems`'s (queries, scheduling, the
//! facade the host actually calls).

pub mod args;
pub mod error;
pub mod parent;
pub mod schedule;
pub mod system;
pub mod runtime;

pub mod prelude {
    pub use crate::error::SchedulerError;
    pub use crate::parent::{ConstraintKind, ParentConstraint, ParentId};
    pub use crate::runtime::{Runtime, RuntimeConfig, SystemBuilder};
    pub use crate::system::{Filter, GlobalMut, GlobalRef, Kind, Query, Read, System, SystemNode, SystemOptions, Write};
    pub use ecs_core::prelude::*;
}
