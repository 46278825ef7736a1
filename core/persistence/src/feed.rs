//! FILENAME: core/persistence/src/feed.rs
//! PURPOSE: Change-feed records pushed by the store.
//! CONTEXT: Mirrors the realtime payload shape `{table, event, old, new}`.
//! Records are ordered within one table's stream and unordered across
//! tables. Event names arrive upper case from Postgres-style feeds, so both
//! casings are accepted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use engine::logging::STORE;
use engine::{log_debug, EntityId};

use crate::error::StoreResult;

/// The three logical tables the grid is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Entities,
    Values,
    Attributes,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Entities, Table::Values, Table::Attributes];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Entities => "entities",
            Table::Values => "values",
            Table::Attributes => "attributes",
        }
    }

    pub fn from_name(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|t| t.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    #[serde(alias = "INSERT")]
    Insert,
    #[serde(alias = "UPDATE")]
    Update,
    #[serde(alias = "DELETE")]
    Delete,
}

/// One notification from the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    #[serde(alias = "eventType")]
    pub event: ChangeKind,
    #[serde(default, alias = "old")]
    pub old_record: Option<Value>,
    #[serde(default, alias = "new")]
    pub new_record: Option<Value>,
}

impl ChangeEvent {
    pub fn new(table: Table, event: ChangeKind) -> Self {
        ChangeEvent {
            table,
            event,
            old_record: None,
            new_record: None,
        }
    }

    pub fn with_old(mut self, record: Value) -> Self {
        self.old_record = Some(record);
        self
    }

    pub fn with_new(mut self, record: Value) -> Self {
        self.new_record = Some(record);
        self
    }

    /// Decodes a feed payload. Payloads for tables outside the grid
    /// schema are skipped with `Ok(None)`.
    pub fn from_json(payload: &str) -> StoreResult<Option<ChangeEvent>> {
        let raw: Value = serde_json::from_str(payload)?;
        let table = raw.get("table").and_then(Value::as_str).unwrap_or_default();
        if Table::from_name(table).is_none() {
            log_debug!(STORE, "ignoring change for table {:?}", table);
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(raw)?))
    }

    /// The `entity_id` carried by the record, preferring the old image.
    pub fn entity_id(&self) -> Option<EntityId> {
        [&self.old_record, &self.new_record]
            .into_iter()
            .flatten()
            .find_map(|record| record.get("entity_id").and_then(Value::as_i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_realtime_payload() {
        let event = ChangeEvent::from_json(
            r#"{"table":"entities","eventType":"DELETE","old":{"entity_id":1},"new":{}}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(event.table, Table::Entities);
        assert_eq!(event.event, ChangeKind::Delete);
        assert_eq!(event.entity_id(), Some(1));
    }

    #[test]
    fn decodes_canonical_shape() {
        let event = ChangeEvent::from_json(
            r#"{"table":"values","event":"update","old_record":null,"new_record":{"entity_id":4,"attribute_id":1}}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(event.table, Table::Values);
        assert_eq!(event.event, ChangeKind::Update);
        assert_eq!(event.entity_id(), Some(4));
    }

    #[test]
    fn unknown_table_is_skipped() {
        let event = ChangeEvent::from_json(r#"{"table":"profiles","event":"insert"}"#).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(ChangeEvent::from_json("not json").is_err());
        assert!(ChangeEvent::from_json(r#"{"table":"values","event":"truncate"}"#).is_err());
    }

    #[test]
    fn entity_id_missing() {
        let event = ChangeEvent::new(Table::Attributes, ChangeKind::Insert)
            .with_new(json!({"attribute_id": 3}));
        assert_eq!(event.entity_id(), None);
    }
}
