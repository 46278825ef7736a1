//! FILENAME: core/engine/src/order.rs
//! PURPOSE: Order key allocation for rows and columns.
//! CONTEXT: The two axes use deliberately different policies.
//!
//! Rows are numerous and reordered often, so they carry fractional keys:
//! a moved or inserted row takes the midpoint of its neighbors and nothing
//! else is touched. Bisection eventually runs out of representable values;
//! when the gap drops below `min_gap` (or the midpoint collapses onto a
//! neighbor) every key is renumbered onto an evenly spaced sequence first.
//!
//! Columns are few, so every move rewrites `sort_order` to `0..n-1`.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::logging::ORDER;
use crate::model::Attribute;
use crate::log_info;

// ============================================================================
// ROW KEYS
// ============================================================================

/// Result of placing one key into an existing ordered key sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAllocation {
    /// The key for the inserted/moved row.
    pub key: f64,
    /// Present when the sequence had to be renumbered first. Holds the new
    /// keys for the existing rows, index-aligned with the input sequence.
    pub renumbered: Option<Vec<f64>>,
}

impl OrderAllocation {
    pub fn was_renumbered(&self) -> bool {
        self.renumbered.is_some()
    }
}

/// Fractional (gap-preserving) allocator for row keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowOrderAllocator {
    min_gap: f64,
    step: f64,
    origin: f64,
}

impl RowOrderAllocator {
    pub fn new(min_gap: f64, step: f64) -> Self {
        RowOrderAllocator {
            min_gap,
            step,
            origin: step,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        RowOrderAllocator {
            min_gap: config.min_order_gap,
            step: config.renumber_step,
            origin: config.initial_row_order,
        }
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Computes a key strictly between `lo` and `hi`.
    ///
    /// A missing bound extends the other one by `step` so the result never
    /// equals a neighbor. With neither bound the origin key is returned.
    /// Fails with `KeySpaceExhausted` when no usable key fits.
    pub fn between(&self, lo: Option<f64>, hi: Option<f64>) -> EngineResult<f64> {
        let key = match (lo, hi) {
            (None, None) => self.origin,
            (Some(lo), None) => lo + self.step,
            (None, Some(hi)) => hi - self.step,
            (Some(lo), Some(hi)) => {
                if !(lo < hi) || hi - lo < self.min_gap {
                    return Err(EngineError::KeySpaceExhausted { lo: Some(lo), hi: Some(hi) });
                }
                (lo + hi) / 2.0
            }
        };

        let inside = key.is_finite()
            && lo.map_or(true, |lo| key > lo)
            && hi.map_or(true, |hi| key < hi);
        if !inside {
            return Err(EngineError::KeySpaceExhausted { lo, hi });
        }
        Ok(key)
    }

    /// Key for a row placed in front of the row keyed `hi`.
    pub fn before(&self, hi: f64) -> EngineResult<f64> {
        self.between(None, Some(hi))
    }

    /// Key for a row placed after the row keyed `lo`.
    pub fn after(&self, lo: f64) -> EngineResult<f64> {
        self.between(Some(lo), None)
    }

    /// Evenly spaced keys for `count` rows, starting at the origin.
    pub fn renumber(&self, count: usize) -> Vec<f64> {
        (0..count)
            .map(|i| self.origin + i as f64 * self.step)
            .collect()
    }

    /// Allocates a key for a row inserted at `index` of the ascending `keys`
    /// (which must not contain the row being placed). Renumbers the whole
    /// sequence first when the neighbors are too close.
    pub fn allocate_in(&self, keys: &[f64], index: usize) -> EngineResult<OrderAllocation> {
        let index = index.min(keys.len());
        let (lo, hi) = neighbors(keys, index);

        match self.between(lo, hi) {
            Ok(key) => Ok(OrderAllocation { key, renumbered: None }),
            Err(EngineError::KeySpaceExhausted { .. }) => {
                log_info!(
                    ORDER,
                    "gap exhausted between {:?} and {:?}, renumbering {} rows",
                    lo,
                    hi,
                    keys.len()
                );
                let fresh = self.renumber(keys.len());
                let (lo, hi) = neighbors(&fresh, index);
                let key = self.between(lo, hi)?;
                Ok(OrderAllocation {
                    key,
                    renumbered: Some(fresh),
                })
            }
            Err(e) => Err(e),
        }
    }
}

impl Default for RowOrderAllocator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

fn neighbors(keys: &[f64], index: usize) -> (Option<f64>, Option<f64>) {
    let lo = index.checked_sub(1).and_then(|i| keys.get(i).copied());
    let hi = keys.get(index).copied();
    (lo, hi)
}

// ============================================================================
// COLUMN KEYS
// ============================================================================

/// Rewrites `sort_order` to `0..n-1` following the slice order.
pub fn reassign_sort_order(attributes: &mut [Attribute]) {
    for (index, attribute) in attributes.iter_mut().enumerate() {
        attribute.sort_order = index as i64;
    }
}

/// Moves the item at `from` so it ends up at index `to` (drag-and-drop
/// array move). Returns false and leaves `items` untouched when either index
/// is out of range.
pub fn move_in_sequence<T>(items: &mut Vec<T>, from: usize, to: usize) -> bool {
    if from >= items.len() || to >= items.len() {
        return false;
    }
    let item = items.remove(from);
    items.insert(to, item);
    true
}
