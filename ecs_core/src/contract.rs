//! Precondition violations and the overridable contract handler.
//!
//! Spec §6/§7: a precondition violation (overlapping add, mismatched span,
//! a remove whose range is not a subset of the pool) terminates the process
//! via a handler the host may override. This mirrors
//! `original_source/include/ecs/detail/contract.h`'s `Expects`/`Ensures`
//! macros, which call through a single global assert handler.

use parking_lot::RwLock;
use std::sync::Arc;

/// The ways a deferred mutation, or a query against one, can violate the
/// pool invariants documented in spec §4.2.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ContractViolation {
    #[error("add of {component} over {range:?} overlaps an existing or already-queued range")]
    OverlappingAdd { component: &'static str, range: String },

    #[error("add_component_span for {component} expected {expected} values, got {actual}")]
    SpanLengthMismatch {
        component: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("remove of {component} over {range:?} is not a subset of the pool's current ranges")]
    PartialRemoval { component: &'static str, range: String },

    #[error("duplicate entity entry queued for {component}: {range:?}")]
    DuplicateEntry { component: &'static str, range: String },

    #[error("system '{system}' sort key type is not part of its own signature")]
    SortKeyNotInSignature { system: String },
}

/// A handler invoked on a [`ContractViolation`]. Receives a short
/// `(file, function)`-style location label and the formatted message.
/// The default implementation logs at `error` level via `tracing` and
/// aborts the process; hosts that need different behavior (e.g. unwinding
/// in test harnesses) may install their own via [`set_violation_handler`].
pub type ViolationHandler = dyn Fn(&str, &ContractViolation) + Send + Sync;

static HANDLER: RwLock<Option<Arc<ViolationHandler>>> = RwLock::new(None);

/// Installs a custom handler for contract violations. Passing `None`
/// restores the default (log-and-abort) behavior.
pub fn set_violation_handler<F>(handler: Option<F>)
where
    F: Fn(&str, &ContractViolation) + Send + Sync + 'static,
{
    *HANDLER.write() = handler.map(|f| Arc::new(f) as Arc<ViolationHandler>);
}

/// Raises a contract violation at `location` (typically `module::function`).
/// Never returns: either the installed handler diverges, or the default
/// handler aborts the process after logging.
#[track_caller]
pub fn raise(location: &str, violation: ContractViolation) -> ! {
    tracing::error!(location, %violation, "ecs contract violation");

    if let Some(handler) = HANDLER.read().as_ref() {
        handler(location, &violation);
        // A custom handler that returns instead of diverging is itself a
        // contract violation of this function's guarantee; fall through to
        // abort rather than silently continuing in an undefined state.
    }

    std::process::abort();
}
