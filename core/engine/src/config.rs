//! FILENAME: core/engine/src/config.rs
//! PURPOSE: Tunables for ordering, reconciliation and row creation.
//! CONTEXT: Every field has a default, so an empty JSON object is a valid
//! configuration. `validate` rejects combinations the allocator cannot honor.

use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::model::AttributeId;

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_MIN_ORDER_GAP: f64 = 1e-9;
const DEFAULT_RENUMBER_STEP: f64 = 1.0;
const DEFAULT_CREATION_TIMESTAMP_ATTRIBUTE: AttributeId = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet window before a coalesced refetch fires.
    pub debounce_ms: u64,
    /// Smallest gap between neighbor row keys before renumbering kicks in.
    pub min_order_gap: f64,
    /// Spacing of row keys after a renumbering pass, and the prepend/append offset.
    pub renumber_step: f64,
    /// First row key handed out when the grid is empty.
    pub initial_row_order: f64,
    /// Attribute seeded with the creation time when a row is created.
    pub creation_timestamp_attribute_id: AttributeId,
    /// Name written to the entities table for new rows.
    pub new_entity_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            min_order_gap: DEFAULT_MIN_ORDER_GAP,
            renumber_step: DEFAULT_RENUMBER_STEP,
            initial_row_order: DEFAULT_RENUMBER_STEP,
            creation_timestamp_attribute_id: DEFAULT_CREATION_TIMESTAMP_ATTRIBUTE,
            new_entity_name: "new entity".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidConfig(format!("parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidConfig(format!("failed to read {:?}: {}", path, e))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !self.renumber_step.is_finite() || self.renumber_step <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "renumber_step must be positive, got {}",
                self.renumber_step
            )));
        }
        if !self.min_order_gap.is_finite() || self.min_order_gap < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "min_order_gap must be a non-negative number, got {}",
                self.min_order_gap
            )));
        }
        if self.min_order_gap >= self.renumber_step {
            return Err(EngineError::InvalidConfig(
                "min_order_gap must be smaller than renumber_step".to_string(),
            ));
        }
        if !self.initial_row_order.is_finite() {
            return Err(EngineError::InvalidConfig(
                "initial_row_order must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_gives_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.debounce_window(), Duration::from_millis(300));
    }

    #[test]
    fn partial_override() {
        let config = EngineConfig::from_json_str(r#"{"debounce_ms": 50, "renumber_step": 1024.0}"#)
            .unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.renumber_step, 1024.0);
        assert_eq!(config.creation_timestamp_attribute_id, 2);
    }

    #[test]
    fn rejects_gap_not_below_step() {
        let err = EngineConfig::from_json_str(r#"{"min_order_gap": 2.0}"#).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_non_positive_step() {
        let config = EngineConfig {
            renumber_step: 0.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"new_entity_name": "row"}}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.new_entity_name, "row");
    }

    #[test]
    fn load_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }
}
