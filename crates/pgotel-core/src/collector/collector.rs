//! One collection cycle: run every catalog entry over a single connection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::expander::DynamicMetricExpander;
use super::traits::{Connection, ConnectionFactory};
use crate::catalog::{MetricQuerySpec, QueryCatalog, QueryKind};
use crate::error::CollectError;
use crate::snapshot::Snapshot;

/// Executes the query catalog and builds snapshots.
///
/// Stateless between cycles: `run` never publishes anything, the caller
/// decides what to do with the returned [`Snapshot`].
#[derive(Debug, Clone)]
pub struct Collector {
    catalog: Arc<QueryCatalog>,
    expander: DynamicMetricExpander,
}

impl Collector {
    pub fn new(catalog: QueryCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            expander: DynamicMetricExpander::new(),
        }
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    /// Runs one cycle.
    ///
    /// A failing entry is logged and left out of the snapshot; the remaining
    /// entries still run. Cancellation is checked between entries and yields
    /// the partial snapshot built so far. Only a connection failure returns
    /// `Err`. The connection is dropped before returning on every path.
    pub fn run<F: ConnectionFactory>(
        &self,
        factory: &F,
        cancel: &CancellationToken,
    ) -> Result<Snapshot, CollectError> {
        let start = Instant::now();
        let mut values = BTreeMap::new();

        if cancel.is_cancelled() {
            debug!("collection cancelled before connecting");
            return Ok(Snapshot::new(values, Utc::now()));
        }

        let mut conn = factory.connect()?;
        let mut failed = 0usize;

        for spec in self.catalog.entries() {
            if cancel.is_cancelled() {
                debug!(collected = values.len(), "collection cancelled, keeping partial snapshot");
                break;
            }

            let t0 = Instant::now();
            match self.collect_entry(&mut conn, spec) {
                Ok(entry_values) => {
                    debug!(
                        key = %spec.key,
                        values = entry_values.len(),
                        duration_ms = t0.elapsed().as_millis() as u64,
                        "query completed"
                    );
                    merge(&mut values, entry_values);
                }
                Err(e) if e.is_connection() => {
                    warn!(key = %spec.key, error = %e, "connection lost, aborting cycle");
                    return Err(e);
                }
                Err(e) => {
                    failed += 1;
                    warn!(key = %spec.key, error = %e, "metric query failed, key omitted");
                }
            }
        }

        drop(conn);

        debug!(
            keys = values.len(),
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "collection cycle finished"
        );

        Ok(Snapshot::new(values, Utc::now()))
    }

    fn collect_entry<C: Connection>(
        &self,
        conn: &mut C,
        spec: &MetricQuerySpec,
    ) -> Result<BTreeMap<String, f64>, CollectError> {
        match spec.kind {
            QueryKind::Scalar => {
                let value = query_scalar(conn, &spec.query)?;
                Ok(BTreeMap::from([(spec.key.clone(), value)]))
            }
            QueryKind::RowSet(_) => self.expander.run(conn, spec),
        }
    }
}

/// Adds `entry_values`, keeping existing keys on conflict.
fn merge(values: &mut BTreeMap<String, f64>, entry_values: BTreeMap<String, f64>) {
    for (key, value) in entry_values {
        if values.contains_key(&key) {
            warn!(key = %key, "metric key produced twice in one cycle, keeping first");
            continue;
        }
        values.insert(key, value);
    }
}

/// Runs a query expected to return exactly one row with one column.
fn query_scalar<C: Connection>(conn: &mut C, sql: &str) -> Result<f64, CollectError> {
    let result = conn.query(sql)?;
    let [row] = result.rows.as_slice() else {
        return Err(CollectError::Conversion(format!(
            "expected 1 row, got {}",
            result.rows.len()
        )));
    };
    if row.len() != 1 {
        return Err(CollectError::Conversion(format!(
            "expected 1 column, got {}",
            row.len()
        )));
    }
    parse_value("?column?", row.get_idx(0).flatten())
}

/// Converts a text value from the server into a finite `f64`.
pub(crate) fn parse_value(column: &str, raw: Option<&str>) -> Result<f64, CollectError> {
    let Some(raw) = raw else {
        return Err(CollectError::Conversion(format!("{column} is NULL")));
    };
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| CollectError::Conversion(format!("{column} = {raw:?}: {e}")))?;
    if !value.is_finite() {
        return Err(CollectError::Conversion(format!(
            "{column} = {raw:?} is not finite"
        )));
    }
    Ok(value)
}
