//! FILENAME: core/sync-engine/src/plan.rs
//! PURPOSE: Translates edits on the pivoted grid into store mutations.
//! CONTEXT: Planning is pure: it reads the current `GridView` and returns a
//! `MutationPlan` (the store writes, in order) plus the optimistic
//! `LocalPatch` that makes the view reflect the edit right away.
//!
//! Row moves persist only the rows whose keys changed: the moved row, or
//! every row when the allocator had to renumber. The local patch rewrites
//! exactly those same keys, so local and persisted state agree.

use chrono::{DateTime, SecondsFormat, Utc};
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};
use engine::logging::PLAN;
use engine::{
    log_debug, move_in_sequence, reassign_sort_order, Attribute, AttributeId, EngineConfig,
    EngineError, EngineResult, Entity, EntityId, Fact, RowOrderAllocator, RowView,
};

use crate::state::{GridView, LocalPatch};

/// Row keys a move writes. Usually one entry; every row after a renumbering pass.
pub type RowOrderUpdates = SmallVec<[(EntityId, f64); 1]>;

// ============================================================================
// PLAN
// ============================================================================

/// A single store write.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    UpdateRowOrder {
        entity_id: EntityId,
        row_order: f64,
    },
    UpdateValue {
        entity_id: EntityId,
        attribute_id: AttributeId,
        value_text: Option<String>,
    },
    UpsertFacts(Vec<Fact>),
    UpsertAttributes(Vec<Attribute>),
    InsertEntity(Entity),
    DeleteFacts {
        entity_id: EntityId,
    },
    DeleteEntity {
        entity_id: EntityId,
    },
}

/// The store writes for one user edit, in execution order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutationPlan {
    /// Human-readable description (e.g., "Move row 3", "Edit Name of row 2")
    pub description: String,
    pub mutations: Vec<Mutation>,
    pub local: Option<LocalPatch>,
}

impl MutationPlan {
    pub fn new(description: impl Into<String>) -> Self {
        MutationPlan {
            description: description.into(),
            mutations: Vec::new(),
            local: None,
        }
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn with_local(mut self, patch: LocalPatch) -> Self {
        self.local = Some(patch);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Entities whose `row_order` this plan rewrites.
    pub fn row_order_updates(&self) -> RowOrderUpdates {
        self.mutations
            .iter()
            .filter_map(|m| match m {
                Mutation::UpdateRowOrder { entity_id, row_order } => Some((*entity_id, *row_order)),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// PLANNER
// ============================================================================

#[derive(Debug, Clone)]
pub struct MutationPlanner {
    config: EngineConfig,
    allocator: RowOrderAllocator,
}

impl MutationPlanner {
    pub fn new(config: EngineConfig) -> Self {
        MutationPlanner {
            allocator: RowOrderAllocator::from_config(&config),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------------

    /// Drag-and-drop move: the row `from` takes the index currently held by `to`.
    pub fn plan_row_move(
        &self,
        view: &GridView,
        from: EntityId,
        to: EntityId,
    ) -> EngineResult<MutationPlan> {
        let from_index = view.index_of(from).ok_or(EngineError::UnknownEntity(from))?;
        let to_index = view.index_of(to).ok_or(EngineError::UnknownEntity(to))?;
        if from_index == to_index {
            return Ok(MutationPlan::new(format!("Move row {}", from)));
        }

        let remaining = rows_without(&view.rows, from);
        self.place_row(view, from, &remaining, to_index)
    }

    /// Moves `entity_id` between two adjacent rows. `None` on one side means
    /// the start or end of the grid.
    pub fn plan_row_move_between(
        &self,
        view: &GridView,
        entity_id: EntityId,
        lo: Option<EntityId>,
        hi: Option<EntityId>,
    ) -> EngineResult<MutationPlan> {
        if view.index_of(entity_id).is_none() {
            return Err(EngineError::UnknownEntity(entity_id));
        }
        if lo == Some(entity_id) || hi == Some(entity_id) {
            return Err(EngineError::NotNeighbors { lo, hi });
        }

        let remaining = rows_without(&view.rows, entity_id);
        let position = |id: EntityId| {
            remaining
                .iter()
                .position(|r| r.entity_id == id)
                .ok_or(EngineError::UnknownEntity(id))
        };
        let index = match (lo, hi) {
            (Some(lo), _) => position(lo)? + 1,
            (None, Some(hi)) => position(hi)?,
            (None, None) => 0,
        };

        let actual_lo = index.checked_sub(1).map(|i| remaining[i].entity_id);
        let actual_hi = remaining.get(index).map(|r| r.entity_id);
        if actual_lo != lo || actual_hi != hi {
            return Err(EngineError::NotNeighbors { lo, hi });
        }

        self.place_row(view, entity_id, &remaining, index)
    }

    fn place_row(
        &self,
        view: &GridView,
        entity_id: EntityId,
        remaining: &[&RowView],
        index: usize,
    ) -> EngineResult<MutationPlan> {
        let keys: Vec<f64> = remaining.iter().map(|r| r.row_order).collect();
        let allocation = self.allocator.allocate_in(&keys, index)?;

        let mut updates: RowOrderUpdates = smallvec![(entity_id, allocation.key)];
        if let Some(fresh) = &allocation.renumbered {
            updates.extend(remaining.iter().zip(fresh).map(|(r, key)| (r.entity_id, *key)));
        }
        log_debug!(
            PLAN,
            "row {} -> index {} key {} ({} keys rewritten)",
            entity_id,
            index,
            allocation.key,
            updates.len()
        );

        let mut plan = MutationPlan::new(format!("Move row {}", entity_id));
        for &(entity_id, row_order) in &updates {
            plan.push(Mutation::UpdateRowOrder { entity_id, row_order });
        }
        let facts = rekey_facts(&view.snapshot.facts, &updates);
        Ok(plan.with_local(LocalPatch::ReplaceFacts(facts)))
    }

    /// Prepends a new row: entity `entity_id`, one fact per attribute.
    /// Without attributes the entity would have no facts and never show up
    /// as a row, so that case is refused.
    pub fn plan_row_create(
        &self,
        view: &GridView,
        entity_id: EntityId,
        now: DateTime<Utc>,
    ) -> EngineResult<MutationPlan> {
        if view.attributes().is_empty() {
            return Err(EngineError::NoAttributes);
        }

        let keys: Vec<f64> = view.rows.iter().map(|r| r.row_order).collect();
        let allocation = self.allocator.allocate_in(&keys, 0)?;
        let row_order = allocation.key;

        let mut plan = MutationPlan::new(format!("Create row {}", entity_id));
        let mut updates = RowOrderUpdates::new();
        if let Some(fresh) = &allocation.renumbered {
            updates.extend(view.rows.iter().zip(fresh).map(|(r, key)| (r.entity_id, *key)));
            for &(entity_id, row_order) in &updates {
                plan.push(Mutation::UpdateRowOrder { entity_id, row_order });
            }
        }

        let created = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let new_facts: Vec<Fact> = view
            .snapshot
            .attributes
            .iter()
            .map(|attr| {
                let text = if attr.attribute_id == self.config.creation_timestamp_attribute_id {
                    created.clone()
                } else {
                    String::new()
                };
                Fact {
                    entity_id,
                    attribute_id: attr.attribute_id,
                    value_text: Some(text),
                    row_order,
                }
            })
            .collect();

        plan.push(Mutation::InsertEntity(Entity::new(
            entity_id,
            self.config.new_entity_name.clone(),
        )));
        plan.push(Mutation::UpsertFacts(new_facts.clone()));

        let mut facts = new_facts;
        facts.extend(rekey_facts(&view.snapshot.facts, &updates));
        Ok(plan.with_local(LocalPatch::ReplaceFacts(facts)))
    }

    /// Removes the entity's facts, then the entity itself.
    pub fn plan_row_delete(&self, view: &GridView, entity_id: EntityId) -> EngineResult<MutationPlan> {
        if view.index_of(entity_id).is_none() {
            return Err(EngineError::UnknownEntity(entity_id));
        }
        let mut plan = MutationPlan::new(format!("Delete row {}", entity_id));
        plan.push(Mutation::DeleteFacts { entity_id });
        plan.push(Mutation::DeleteEntity { entity_id });
        Ok(plan.with_local(LocalPatch::RemoveEntity(entity_id)))
    }

    // ------------------------------------------------------------------------
    // Columns and cells
    // ------------------------------------------------------------------------

    /// Drag-and-drop move: column `from` takes the position held by `to`;
    /// every attribute is rewritten with `sort_order` 0..n-1.
    pub fn plan_column_move(
        &self,
        view: &GridView,
        from: &str,
        to: &str,
    ) -> EngineResult<MutationPlan> {
        let attributes = view.attributes();
        let from_index = attributes
            .position_of(from)
            .ok_or_else(|| EngineError::UnknownAttributeName(from.to_string()))?;
        let to_index = attributes
            .position_of(to)
            .ok_or_else(|| EngineError::UnknownAttributeName(to.to_string()))?;

        let mut plan = MutationPlan::new(format!("Move column {}", from));
        if from_index == to_index {
            return Ok(plan);
        }

        let mut reordered = attributes.ordered().to_vec();
        move_in_sequence(&mut reordered, from_index, to_index);
        reassign_sort_order(&mut reordered);

        plan.push(Mutation::UpsertAttributes(reordered.clone()));
        Ok(plan.with_local(LocalPatch::ReplaceAttributes(reordered)))
    }

    /// Point update of one cell. A cell with no stored fact yet (an attribute
    /// added after the row) is upserted at the row's key instead.
    pub fn plan_cell_edit(
        &self,
        view: &GridView,
        entity_id: EntityId,
        attribute_name: &str,
        value_text: Option<String>,
    ) -> EngineResult<MutationPlan> {
        let attribute_id = view
            .attributes()
            .id_of(attribute_name)
            .ok_or_else(|| EngineError::UnknownAttributeName(attribute_name.to_string()))?;
        let row = view.row(entity_id).ok_or(EngineError::UnknownEntity(entity_id))?;

        let mut plan = MutationPlan::new(format!("Edit {} of row {}", attribute_name, entity_id));
        let mut facts = view.snapshot.facts.clone();

        match facts
            .iter_mut()
            .find(|f| f.entity_id == entity_id && f.attribute_id == attribute_id)
        {
            Some(fact) => {
                fact.value_text = value_text.clone();
                plan.push(Mutation::UpdateValue {
                    entity_id,
                    attribute_id,
                    value_text,
                });
            }
            None => {
                let fact = Fact {
                    entity_id,
                    attribute_id,
                    value_text,
                    row_order: row.row_order,
                };
                // Keep the entity's facts contiguous.
                let at = facts
                    .iter()
                    .rposition(|f| f.entity_id == entity_id)
                    .map_or(facts.len(), |i| i + 1);
                facts.insert(at, fact.clone());
                plan.push(Mutation::UpsertFacts(vec![fact]));
            }
        }

        Ok(plan.with_local(LocalPatch::ReplaceFacts(facts)))
    }
}

impl Default for MutationPlanner {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Id for the next created row: one past the largest id in the values
/// snapshot or in `known` (the entities table), which also covers entities
/// that have no facts.
pub fn next_entity_id<I>(view: &GridView, known: I) -> EntityId
where
    I: IntoIterator<Item = EntityId>,
{
    known
        .into_iter()
        .chain(view.snapshot.max_entity_id())
        .max()
        .map_or(1, |max| max + 1)
}

fn rows_without(rows: &[RowView], entity_id: EntityId) -> Vec<&RowView> {
    rows.iter().filter(|r| r.entity_id != entity_id).collect()
}

/// Applies new row keys and restores row order (ties by entity id).
fn rekey_facts(facts: &[Fact], updates: &[(EntityId, f64)]) -> Vec<Fact> {
    let keys: FxHashMap<EntityId, f64> = updates.iter().copied().collect();
    let mut out: Vec<Fact> = facts
        .iter()
        .map(|f| {
            let mut fact = f.clone();
            if let Some(&key) = keys.get(&f.entity_id) {
                fact.row_order = key;
            }
            fact
        })
        .collect();
    out.sort_by(|a, b| {
        a.row_order
            .total_cmp(&b.row_order)
            .then(a.entity_id.cmp(&b.entity_id))
    });
    out
}
