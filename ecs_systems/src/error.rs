//! Recoverable errors surfaced by the runtime facade and scheduler, as
//! opposed to the abort-on-violation contract errors in `ecs_core::contract`
//! (spec §7: precondition violations abort; everything else here is a
//! `Result` the host can inspect).

/// Failures the [`crate::runtime::Runtime`] facade returns instead of
/// raising a contract violation, because the host is expected to routinely
/// hit these (a typo'd system name, a double registration) rather than
/// violate an internal invariant.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no system named '{0}' is registered")]
    UnknownSystem(String),

    #[error("a system named '{0}' is already registered")]
    DuplicateSystemName(String),

    #[error("system '{0}' is scheduled automatically; manual_update systems only may be run by name")]
    NotManualUpdate(String),
}
