//! FILENAME: core/sync-engine/src/lib.rs
//! Grid Sync Engine
//!
//! Turns UI edits on the pivoted grid into store writes, and store change
//! notifications back into a fresh grid view.
//!
//! - `plan`: edits become a `MutationPlan` plus an optimistic `LocalPatch`
//! - `execute`: runs a plan against a `Store`, step by step
//! - `reconciler`: the single writer of the local snapshots, fed by the
//!   change feed and debounced per table
//! - `session`: the facade tying all of the above together

mod debounce;
mod error;
mod execute;
mod plan;
mod reconciler;
mod session;
mod state;

pub use debounce::{Debouncer, Fired};
pub use error::{SyncError, SyncResult};
pub use execute::execute_plan;
pub use plan::{next_entity_id, Mutation, MutationPlan, MutationPlanner, RowOrderUpdates};
pub use reconciler::{Reconciler, ReconcilerHandle};
pub use session::GridSession;
pub use state::{GridSnapshot, GridView, LocalPatch};
