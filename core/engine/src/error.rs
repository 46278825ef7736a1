//! FILENAME: core/engine/src/error.rs

use thiserror::Error;
use crate::model::{AttributeId, EntityId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Facts for one entity were not contiguous, or rows were not ascending.
    #[error("Ordering violation at fact {index} (entity {entity_id}): {detail}")]
    OrderingViolation {
        entity_id: EntityId,
        index: usize,
        detail: String,
    },

    #[error("Unknown attribute id: {0}")]
    UnknownAttribute(AttributeId),

    #[error("Unknown attribute name: {0}")]
    UnknownAttributeName(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// A move target named two rows that are not adjacent.
    #[error("Rows {lo:?} and {hi:?} are not neighbors")]
    NotNeighbors {
        lo: Option<EntityId>,
        hi: Option<EntityId>,
    },

    /// A row cannot be created in a grid with no columns.
    #[error("Cannot create a row: no attributes are defined")]
    NoAttributes,

    /// No representable key remains between two neighbors.
    #[error("Row order key space exhausted between {lo:?} and {hi:?}")]
    KeySpaceExhausted { lo: Option<f64>, hi: Option<f64> },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
