//! FILENAME: core/pivot-engine/src/definition.rs
//! Attribute Set - The column definitions the pivot runs against.
//!
//! Wraps the attribute snapshot with id and name indexes so the pivot pass
//! and the mutation planner can resolve either direction in O(1). The set
//! is immutable; a new attribute snapshot builds a new set.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use engine::logging::PIVOT;
use engine::{log_warn, Attribute, AttributeId, AttributeType};

// ============================================================================
// ATTRIBUTE SET
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Attribute>", into = "Vec<Attribute>")]
pub struct AttributeSet {
    /// Attributes ascending by `sort_order` (ties broken by id).
    ordered: Vec<Attribute>,

    /// attribute_id -> index into `ordered`.
    by_id: FxHashMap<AttributeId, usize>,

    /// attribute_name -> index into `ordered`.
    by_name: FxHashMap<String, usize>,
}

impl AttributeSet {
    pub fn new(mut attributes: Vec<Attribute>) -> Self {
        attributes.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then(a.attribute_id.cmp(&b.attribute_id))
        });

        let mut by_id = FxHashMap::default();
        let mut by_name = FxHashMap::default();
        for (index, attribute) in attributes.iter().enumerate() {
            by_id.insert(attribute.attribute_id, index);
            if by_name.contains_key(&attribute.attribute_name) {
                // Names are the column keys; the first one in column order wins.
                log_warn!(
                    PIVOT,
                    "duplicate attribute name {:?} (id {})",
                    attribute.attribute_name,
                    attribute.attribute_id
                );
            } else {
                by_name.insert(attribute.attribute_name.clone(), index);
            }
        }

        AttributeSet {
            ordered: attributes,
            by_id,
            by_name,
        }
    }

    pub fn by_id(&self, attribute_id: AttributeId) -> Option<&Attribute> {
        self.by_id.get(&attribute_id).map(|&i| &self.ordered[i])
    }

    pub fn by_name(&self, name: &str) -> Option<&Attribute> {
        self.by_name.get(name).map(|&i| &self.ordered[i])
    }

    pub fn name_of(&self, attribute_id: AttributeId) -> Option<&str> {
        self.by_id(attribute_id).map(|a| a.attribute_name.as_str())
    }

    pub fn id_of(&self, name: &str) -> Option<AttributeId> {
        self.by_name(name).map(|a| a.attribute_id)
    }

    /// Column position of the named attribute.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn ordered(&self) -> &[Attribute] {
        &self.ordered
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.ordered.iter()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl From<Vec<Attribute>> for AttributeSet {
    fn from(attributes: Vec<Attribute>) -> Self {
        AttributeSet::new(attributes)
    }
}

impl From<AttributeSet> for Vec<Attribute> {
    fn from(set: AttributeSet) -> Self {
        set.ordered
    }
}

// ============================================================================
// COLUMN LAYOUT
// ============================================================================

/// One rendered column, derived from an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub attribute_id: AttributeId,
    pub name: String,
    pub attribute_type: AttributeType,
    /// 0-based position among the data columns.
    pub position: usize,
    /// Text columns are edited in place; everything else renders read-only.
    pub editable: bool,
}

/// Column descriptors in display order.
pub fn column_layout(attributes: &AttributeSet) -> Vec<ColumnDescriptor> {
    attributes
        .iter()
        .enumerate()
        .map(|(position, attr)| ColumnDescriptor {
            attribute_id: attr.attribute_id,
            name: attr.attribute_name.clone(),
            attribute_type: attr.attribute_type,
            position,
            editable: attr.attribute_type == AttributeType::Text,
        })
        .collect()
}
