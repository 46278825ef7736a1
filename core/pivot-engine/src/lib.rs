//! FILENAME: core/pivot-engine/src/lib.rs
//! Pivot subsystem for the EAV grid.
//!
//! Turns the flat, row-ordered fact stream into one dense row per entity,
//! and turns rows back into facts for optimistic local rebuilds. It depends
//! on `engine` only for the shared model and error types.
//!
//! Layers:
//! - `definition`: The attribute set (what the columns ARE)
//! - `view`: Pivot output and diagnostics (WHAT we display and what we dropped)
//! - `engine`: The single-pass builder and its inverse (HOW we pivot)

pub mod definition;
pub mod view;
pub mod engine;

pub use definition::*;
pub use view::*;
pub use self::engine::{build_rows, flatten_rows};
