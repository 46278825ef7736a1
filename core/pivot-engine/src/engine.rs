//! FILENAME: core/pivot-engine/src/engine.rs
//! Pivot Engine - Folds the fact stream into rows, and rows back into facts.
//!
//! Algorithm (build):
//! 1. Walk the facts once, keeping the last emitted row as the cursor
//! 2. A fact for the cursor's entity merges into it (same name overwrites)
//! 3. Any other entity closes the cursor and opens a new row
//! 4. Facts with an unknown attribute are dropped and recorded
//!
//! The input must be ascending by `row_order` with each entity's facts
//! contiguous. That is checked, not repaired: an entity that reappears after
//! another one, or a row key that goes backwards, is an `OrderingViolation`.

use rustc_hash::FxHashSet;
use engine::logging::PIVOT;
use engine::{log_debug, log_warn, EngineError, EngineResult, EntityId, Fact, RowView};

use crate::definition::AttributeSet;
use crate::view::{DropReason, DroppedFact, FlattenOutput, PivotDiagnostics, PivotOutput};

// ============================================================================
// BUILD
// ============================================================================

/// Pivots `facts` (ascending by `row_order`, entities contiguous) into rows.
pub fn build_rows(attributes: &AttributeSet, facts: &[Fact]) -> EngineResult<PivotOutput> {
    let mut rows: Vec<RowView> = Vec::new();
    let mut diagnostics = PivotDiagnostics::default();
    let mut seen: FxHashSet<EntityId> = FxHashSet::default();

    for (index, fact) in facts.iter().enumerate() {
        let opens_row = rows
            .last()
            .map_or(true, |row| row.entity_id != fact.entity_id);

        if opens_row {
            if !seen.insert(fact.entity_id) {
                return Err(EngineError::OrderingViolation {
                    entity_id: fact.entity_id,
                    index,
                    detail: "facts for this entity are not contiguous".to_string(),
                });
            }
            if let Some(previous) = rows.last() {
                if fact.row_order < previous.row_order {
                    return Err(EngineError::OrderingViolation {
                        entity_id: fact.entity_id,
                        index,
                        detail: format!(
                            "row_order {} follows {} of entity {}",
                            fact.row_order, previous.row_order, previous.entity_id
                        ),
                    });
                }
            }
            rows.push(RowView::new(fact.entity_id, fact.row_order));
        }

        let Some(row) = rows.last_mut() else {
            continue;
        };

        if !opens_row
            && row.row_order != fact.row_order
            && diagnostics.inconsistent_orders.last() != Some(&row.entity_id)
        {
            diagnostics.inconsistent_orders.push(row.entity_id);
        }

        match attributes.name_of(fact.attribute_id) {
            Some(name) => row.set(name, fact.value_text.clone()),
            None => diagnostics.dropped.push(DroppedFact {
                entity_id: fact.entity_id,
                reason: DropReason::UnknownAttributeId(fact.attribute_id),
            }),
        }
    }

    if !diagnostics.dropped.is_empty() {
        log_warn!(
            PIVOT,
            "dropped {} facts with unknown attributes",
            diagnostics.dropped.len()
        );
    }
    log_debug!(PIVOT, "pivoted {} facts into {} rows", facts.len(), rows.len());

    Ok(PivotOutput { rows, diagnostics })
}

// ============================================================================
// FLATTEN
// ============================================================================

/// Turns rows back into facts, one per known attribute name, in row order.
/// Within a row, facts follow column order.
pub fn flatten_rows(attributes: &AttributeSet, rows: &[RowView]) -> FlattenOutput {
    let mut facts = Vec::new();
    let mut diagnostics = PivotDiagnostics::default();

    for row in rows {
        let mut resolved: Vec<(usize, Fact)> = Vec::with_capacity(row.values.len());
        for (name, value) in &row.values {
            match attributes.by_name(name) {
                Some(attr) => {
                    let position = attributes.position_of(name).unwrap_or(usize::MAX);
                    resolved.push((
                        position,
                        Fact {
                            entity_id: row.entity_id,
                            attribute_id: attr.attribute_id,
                            value_text: value.clone(),
                            row_order: row.row_order,
                        },
                    ));
                }
                None => diagnostics.dropped.push(DroppedFact {
                    entity_id: row.entity_id,
                    reason: DropReason::UnknownAttributeName(name.clone()),
                }),
            }
        }
        resolved.sort_by_key(|(position, _)| *position);
        facts.extend(resolved.into_iter().map(|(_, fact)| fact));
    }

    FlattenOutput { facts, diagnostics }
}
