//! FILENAME: core/persistence/src/lib.rs
//! Grid Persistence Module
//!
//! The seam between the grid engine and wherever the three tables live:
//! the `Store` trait, the change-feed records the store pushes, and an
//! in-memory store that implements both.

mod error;
mod feed;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use feed::{ChangeEvent, ChangeKind, Table};
pub use memory::{MemoryStore, StoreDump};
pub use store::Store;
