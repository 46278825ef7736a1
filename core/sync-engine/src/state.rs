//! FILENAME: core/sync-engine/src/state.rs
//! PURPOSE: The local snapshots and the view derived from them.
//! CONTEXT: A `GridSnapshot` is never edited in place. Refetches and local
//! patches build a new snapshot, and a new `GridView` is pivoted from it.
//! The reconciler is the only code that swaps the current view.

use serde::{Deserialize, Serialize};
use engine::{Attribute, EngineResult, EntityId, Fact, RowView};
use persistence::{Store, StoreResult};
use pivot_engine::{build_rows, column_layout, AttributeSet, ColumnDescriptor, PivotDiagnostics};

// ============================================================================
// SNAPSHOT
// ============================================================================

/// The authoritative local copies of the attributes and values tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub attributes: AttributeSet,
    /// Ascending by `row_order`, each entity contiguous.
    pub facts: Vec<Fact>,
}

impl GridSnapshot {
    pub fn new(attributes: Vec<Attribute>, facts: Vec<Fact>) -> Self {
        GridSnapshot {
            attributes: AttributeSet::new(attributes),
            facts,
        }
    }

    /// Initial load: both tables, each in its order-key order.
    pub async fn load<S: Store + ?Sized>(store: &S) -> StoreResult<Self> {
        let attributes = store.read_attributes().await?;
        let facts = store.read_facts().await?;
        Ok(GridSnapshot::new(attributes, facts))
    }

    pub fn with_facts(&self, facts: Vec<Fact>) -> Self {
        GridSnapshot {
            attributes: self.attributes.clone(),
            facts,
        }
    }

    pub fn with_attributes(&self, attributes: Vec<Attribute>) -> Self {
        GridSnapshot {
            attributes: AttributeSet::new(attributes),
            facts: self.facts.clone(),
        }
    }

    /// Largest entity id present in the values table.
    pub fn max_entity_id(&self) -> Option<EntityId> {
        self.facts.iter().map(|f| f.entity_id).max()
    }
}

// ============================================================================
// LOCAL PATCHES
// ============================================================================

/// An optimistic change applied locally before (or without) a refetch.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalPatch {
    /// Drop every fact of one entity.
    RemoveEntity(EntityId),
    /// Replace the values snapshot (already in row order).
    ReplaceFacts(Vec<Fact>),
    /// Replace the attributes snapshot.
    ReplaceAttributes(Vec<Attribute>),
}

impl LocalPatch {
    pub fn apply(&self, snapshot: &GridSnapshot) -> GridSnapshot {
        match self {
            LocalPatch::RemoveEntity(entity_id) => snapshot.with_facts(
                snapshot
                    .facts
                    .iter()
                    .filter(|f| f.entity_id != *entity_id)
                    .cloned()
                    .collect(),
            ),
            LocalPatch::ReplaceFacts(facts) => snapshot.with_facts(facts.clone()),
            LocalPatch::ReplaceAttributes(attributes) => snapshot.with_attributes(attributes.clone()),
        }
    }
}

// ============================================================================
// VIEW
// ============================================================================

/// What the UI renders: the snapshot plus its pivot and column layout.
#[derive(Debug, Clone, Default)]
pub struct GridView {
    /// Bumped on every published change.
    pub version: u64,
    pub snapshot: GridSnapshot,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<RowView>,
    pub diagnostics: PivotDiagnostics,
    /// The most recent reconciliation failure, cleared by the next good refetch.
    pub last_error: Option<String>,
}

impl GridView {
    pub fn build(snapshot: GridSnapshot, version: u64) -> EngineResult<Self> {
        let pivot = build_rows(&snapshot.attributes, &snapshot.facts)?;
        Ok(GridView {
            version,
            columns: column_layout(&snapshot.attributes),
            rows: pivot.rows,
            diagnostics: pivot.diagnostics,
            snapshot,
            last_error: None,
        })
    }

    pub fn row(&self, entity_id: EntityId) -> Option<&RowView> {
        self.rows.iter().find(|r| r.entity_id == entity_id)
    }

    pub fn index_of(&self, entity_id: EntityId) -> Option<usize> {
        self.rows.iter().position(|r| r.entity_id == entity_id)
    }

    /// Entity ids in display order.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.rows.iter().map(|r| r.entity_id).collect()
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.snapshot.attributes
    }
}
