//! Row-set expansion: one metric per entity discovered at collection time.
//!
//! A row-set query returns a variable number of rows (one per database file,
//! tablespace, ...). Each row becomes a key built from the entry's key prefix
//! and the row's stable attributes, e.g. `sql.database_size_A_data_ROWS`.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::collector::parse_value;
use super::traits::{Connection, ResultSet};
use crate::catalog::{KEY_SEPARATOR, MetricQuerySpec, QueryKind, RowExpansion};
use crate::error::CollectError;

#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicMetricExpander;

impl DynamicMetricExpander {
    pub fn new() -> Self {
        Self
    }

    /// Executes a row-set entry and expands its rows.
    ///
    /// Scalar specs expand to nothing.
    pub fn run<C: Connection>(
        &self,
        conn: &mut C,
        spec: &MetricQuerySpec,
    ) -> Result<BTreeMap<String, f64>, CollectError> {
        let QueryKind::RowSet(ref expansion) = spec.kind else {
            return Ok(BTreeMap::new());
        };
        let result = conn.query(&spec.query)?;
        Ok(self.expand(&spec.key, expansion, &result))
    }

    /// Turns every well-formed row into a `(key, value)` pair.
    ///
    /// Rows with a NULL or missing key attribute, or a value that does not
    /// convert, are skipped. Duplicate keys keep the first row.
    pub fn expand(
        &self,
        prefix: &str,
        expansion: &RowExpansion,
        result: &ResultSet,
    ) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();

        'rows: for (idx, row) in result.rows.iter().enumerate() {
            let mut parts = Vec::with_capacity(expansion.key_columns.len());
            for column in &expansion.key_columns {
                match row.get(column) {
                    Some(Some(part)) => parts.push(part),
                    _ => {
                        debug!(
                            prefix,
                            row = idx,
                            column = %column,
                            "row skipped: missing key attribute"
                        );
                        continue 'rows;
                    }
                }
            }
            let key = Self::metric_key(prefix, &parts);

            let raw = row.get(&expansion.value_column).flatten();
            let value = match parse_value(&expansion.value_column, raw) {
                Ok(v) => v,
                Err(e) => {
                    debug!(key = %key, error = %e, "row skipped");
                    continue;
                }
            };

            if out.contains_key(&key) {
                warn!(key = %key, "duplicate row for dynamic metric, keeping first");
                continue;
            }
            out.insert(key, value);
        }

        out
    }

    /// Builds the key for one entity.
    ///
    /// Deterministic and injective: `%` and `_` inside an attribute are
    /// percent-encoded, so the separator only ever appears between parts.
    pub fn metric_key(prefix: &str, parts: &[&str]) -> String {
        let capacity = prefix.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>();
        let mut key = String::with_capacity(capacity);
        key.push_str(prefix);
        for part in parts {
            key.push(KEY_SEPARATOR);
            for ch in part.chars() {
                match ch {
                    '%' => key.push_str("%25"),
                    KEY_SEPARATOR => key.push_str("%5F"),
                    c => key.push(c),
                }
            }
        }
        key
    }
}
