//! FILENAME: core/engine/src/model.rs
//! PURPOSE: Defines the Entity-Attribute-Value records the grid is built from.
//! CONTEXT: Attributes are the columns, entities are the row identities and
//! facts carry one (entity, attribute) value each. `RowView` is the derived,
//! in-memory row produced by the pivot pass; it is never persisted.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

/// Stable identifier of an entity (a grid row).
pub type EntityId = i64;

/// Stable identifier of an attribute (a grid column).
pub type AttributeId = i64;

// ============================================================================
// ATTRIBUTES
// ============================================================================

/// How an attribute's values are presented and edited.
/// Anything the store reports other than `text` collapses to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttributeType {
    #[default]
    Text,
    Other,
}

impl From<String> for AttributeType {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("text") {
            AttributeType::Text
        } else {
            AttributeType::Other
        }
    }
}

impl From<AttributeType> for String {
    fn from(value: AttributeType) -> Self {
        match value {
            AttributeType::Text => "text".to_string(),
            AttributeType::Other => "other".to_string(),
        }
    }
}

/// A column definition. `attribute_name` is the column key and is assumed
/// unique across the attribute table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub attribute_id: AttributeId,
    pub attribute_name: String,
    #[serde(default)]
    pub attribute_type: AttributeType,
    pub sort_order: i64,
}

impl Attribute {
    pub fn new(attribute_id: AttributeId, name: impl Into<String>, sort_order: i64) -> Self {
        Attribute {
            attribute_id,
            attribute_name: name.into(),
            attribute_type: AttributeType::Text,
            sort_order,
        }
    }

    pub fn with_type(mut self, attribute_type: AttributeType) -> Self {
        self.attribute_type = attribute_type;
        self
    }
}

// ============================================================================
// ENTITIES AND FACTS
// ============================================================================

/// A row identity. Nothing but the name lives on it directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: EntityId,
    #[serde(default)]
    pub entity_name: String,
}

impl Entity {
    pub fn new(entity_id: EntityId, entity_name: impl Into<String>) -> Self {
        Entity {
            entity_id,
            entity_name: entity_name.into(),
        }
    }
}

/// One value of one attribute for one entity.
/// `row_order` is denormalized: every fact of an entity carries the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub entity_id: EntityId,
    pub attribute_id: AttributeId,
    pub value_text: Option<String>,
    pub row_order: f64,
}

impl Fact {
    pub fn new(
        entity_id: EntityId,
        attribute_id: AttributeId,
        value_text: Option<&str>,
        row_order: f64,
    ) -> Self {
        Fact {
            entity_id,
            attribute_id,
            value_text: value_text.map(str::to_string),
            row_order,
        }
    }

    /// The (entity, attribute) pair that identifies this fact in the store.
    pub fn key(&self) -> (EntityId, AttributeId) {
        (self.entity_id, self.attribute_id)
    }
}

// ============================================================================
// ROW VIEW
// ============================================================================

/// A dense row: one entity with its values keyed by attribute name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowView {
    pub entity_id: EntityId,
    pub row_order: f64,
    pub values: BTreeMap<String, Option<String>>,
}

impl RowView {
    pub fn new(entity_id: EntityId, row_order: f64) -> Self {
        RowView {
            entity_id,
            row_order,
            values: BTreeMap::new(),
        }
    }

    /// Sets a value, replacing any earlier value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        self.values.insert(name.into(), value);
    }

    /// Returns the value stored under `name`, flattening a null value to `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_type_parses_store_labels() {
        let attr: Attribute = serde_json::from_str(
            r#"{"attribute_id":1,"attribute_name":"Name","attribute_type":"text","sort_order":0}"#,
        )
        .unwrap();
        assert_eq!(attr.attribute_type, AttributeType::Text);

        let attr: Attribute = serde_json::from_str(
            r#"{"attribute_id":2,"attribute_name":"Created","attribute_type":"date","sort_order":1}"#,
        )
        .unwrap();
        assert_eq!(attr.attribute_type, AttributeType::Other);
    }

    #[test]
    fn attribute_type_defaults_to_text() {
        let attr: Attribute =
            serde_json::from_str(r#"{"attribute_id":1,"attribute_name":"Name","sort_order":0}"#)
                .unwrap();
        assert_eq!(attr.attribute_type, AttributeType::Text);
        let json = serde_json::to_string(&attr).unwrap();
        assert!(json.contains(r#""attribute_type":"text""#));
    }

    #[test]
    fn row_view_overwrites_same_name() {
        let mut row = RowView::new(1, 1.0);
        row.set("Name", Some("Alice".to_string()));
        row.set("Name", Some("Alicia".to_string()));
        row.set("Age", None);

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("Name"), Some("Alicia"));
        assert_eq!(row.get("Age"), None);
        assert!(row.contains("Age"));
    }

    #[test]
    fn fact_from_store_row_with_null_text() {
        let fact: Fact = serde_json::from_str(
            r#"{"entity_id":3,"attribute_id":1,"value_text":null,"row_order":2.5}"#,
        )
        .unwrap();
        assert_eq!(fact.key(), (3, 1));
        assert_eq!(fact.value_text, None);
    }
}
