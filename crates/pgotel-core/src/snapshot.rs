//! Immutable result of one collection cycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Metric values captured by one cycle.
///
/// Never mutated after construction; publishing a new cycle means replacing
/// the whole snapshot in the [`SnapshotStore`](crate::store::SnapshotStore).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    values: BTreeMap<String, f64>,
    captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(values: BTreeMap<String, f64>, captured_at: DateTime<Utc>) -> Self {
        Self {
            values,
            captured_at,
        }
    }

    /// Value of `key`, if this cycle produced it.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
