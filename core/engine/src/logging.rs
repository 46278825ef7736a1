//! FILENAME: core/engine/src/logging.rs
// PURPOSE: Category-tagged logging shared by every engine crate.
// CONTEXT: The category becomes the `log` target, so a subscriber can filter
//          on e.g. `RECONCILE=debug` without touching the other subsystems.

// ============================================================================
// CATEGORIES
// ============================================================================

pub const PIVOT: &str = "PIVOT";
pub const ORDER: &str = "ORDER";
pub const PLAN: &str = "PLAN";
pub const RECONCILE: &str = "RECONCILE";
pub const STORE: &str = "STORE";
pub const SESSION: &str = "SESSION";

// ============================================================================
// MACRO DEFINITIONS & EXPORTS
// ============================================================================

#[macro_export]
macro_rules! log_debug {
    ($cat:expr, $($arg:tt)*) => {
        $crate::__log::debug!(target: $cat, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($cat:expr, $($arg:tt)*) => {
        $crate::__log::info!(target: $cat, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($cat:expr, $($arg:tt)*) => {
        $crate::__log::warn!(target: $cat, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($cat:expr, $($arg:tt)*) => {
        $crate::__log::error!(target: $cat, $($arg)*)
    };
}
