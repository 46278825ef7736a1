//! FILENAME: core/engine/src/lib.rs
//! PURPOSE: Main library entry point for the shared grid engine types.
//! CONTEXT: Re-exports the EAV model, the order key allocator, configuration
//! and the logging macros used by the pivot, persistence and sync crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod order;

#[doc(hidden)]
pub use log as __log;

// Re-export commonly used types at the crate root
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use model::{Attribute, AttributeId, AttributeType, Entity, EntityId, Fact, RowView};
pub use order::{move_in_sequence, reassign_sort_order, OrderAllocation, RowOrderAllocator};
