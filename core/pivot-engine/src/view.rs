//! FILENAME: core/pivot-engine/src/view.rs
//! Pivot Output - Rows plus everything the pass refused to fabricate.
//!
//! A fact whose attribute is not in the current attribute set never becomes
//! a column. Instead it is recorded here so callers and tests can observe it.

use serde::{Deserialize, Serialize};
use engine::{AttributeId, EngineError, EntityId, Fact, RowView};

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// Why a fact (or a row value) was left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// The fact's attribute_id is not in the attribute set.
    UnknownAttributeId(AttributeId),
    /// A row value's key does not name any attribute.
    UnknownAttributeName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedFact {
    pub entity_id: EntityId,
    pub reason: DropReason,
}

impl DroppedFact {
    pub fn to_error(&self) -> EngineError {
        match &self.reason {
            DropReason::UnknownAttributeId(id) => EngineError::UnknownAttribute(*id),
            DropReason::UnknownAttributeName(name) => EngineError::UnknownAttributeName(name.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PivotDiagnostics {
    pub dropped: Vec<DroppedFact>,
    /// Entities whose facts disagreed on `row_order`; the first fact's key was kept.
    pub inconsistent_orders: Vec<EntityId>,
}

impl PivotDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.inconsistent_orders.is_empty()
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }

    pub fn errors(&self) -> Vec<EngineError> {
        self.dropped.iter().map(DroppedFact::to_error).collect()
    }
}

// ============================================================================
// OUTPUTS
// ============================================================================

/// Rows in `row_order`, one per distinct entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PivotOutput {
    pub rows: Vec<RowView>,
    pub diagnostics: PivotDiagnostics,
}

impl PivotOutput {
    pub fn row(&self, entity_id: EntityId) -> Option<&RowView> {
        self.rows.iter().find(|r| r.entity_id == entity_id)
    }

    pub fn index_of(&self, entity_id: EntityId) -> Option<usize> {
        self.rows.iter().position(|r| r.entity_id == entity_id)
    }
}

/// Facts recovered from rows, in row order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlattenOutput {
    pub facts: Vec<Fact>,
    pub diagnostics: PivotDiagnostics,
}
