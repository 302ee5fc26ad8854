//! [`Meter`] backed by a `prometheus::Registry`.
//!
//! Each gauge is a custom collector that calls its callback during
//! `gather()`, which is what an observable gauge is: the value is produced
//! when the pipeline scrapes, not when the metric is registered.
//!
//! Metric keys allow characters Prometheus names do not, so the name is a
//! lossy rendering of the key and the key itself rides along as the `key`
//! label. Keys that render to the same name become separate series of one
//! family:
//!
//! ```text
//! pgotel_sql_database_size_my_db_data_ROWS{key="sql.database_size_my.db_data_ROWS"} 2
//! pgotel_sql_database_size_my_db_data_ROWS{key="sql.database_size_my-db_data_ROWS"} 5
//! ```

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};

use super::{GaugeCallback, Meter};
use crate::error::InstrumentError;

/// Label carrying the untouched metric key.
const KEY_LABEL: &str = "key";

pub struct PrometheusMeter {
    registry: Registry,
    namespace: String,
}

impl PrometheusMeter {
    /// Creates a registry whose metric names are prefixed with `namespace`.
    pub fn new(namespace: &str) -> Result<Self, InstrumentError> {
        let namespace = sanitize_name(namespace);
        if namespace.is_empty() {
            return Err(InstrumentError::InvalidName(namespace));
        }
        let registry = Registry::new_custom(Some(namespace.clone()), None)?;
        Ok(Self {
            registry,
            namespace,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Gathers every gauge and encodes it in the Prometheus text format.
    pub fn encode(&self) -> Result<String, InstrumentError> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| InstrumentError::Encode(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| InstrumentError::Encode(e.to_string()))
    }
}

impl Meter for PrometheusMeter {
    fn register_gauge(&self, name: &str, callback: GaugeCallback) -> Result<(), InstrumentError> {
        let metric_name = sanitize_name(name);
        if metric_name.is_empty() {
            return Err(InstrumentError::InvalidName(name.to_string()));
        }
        let help = format!("PostgreSQL metric {metric_name}");
        let opts = Opts::new(metric_name, help).const_label(KEY_LABEL, name);
        let gauge = Gauge::with_opts(opts)?;
        self.registry
            .register(Box::new(CallbackGauge { gauge, callback }))?;
        Ok(())
    }
}

/// Gauge whose value is refreshed from the callback on every collect.
struct CallbackGauge {
    gauge: Gauge,
    callback: GaugeCallback,
}

impl Collector for CallbackGauge {
    fn desc(&self) -> Vec<&Desc> {
        self.gauge.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match (self.callback)() {
            Some(value) => {
                self.gauge.set(value);
                self.gauge.collect()
            }
            None => Vec::new(),
        }
    }
}

/// Maps a metric key onto the Prometheus name alphabet `[a-zA-Z0-9_:]`,
/// never starting with a digit.
fn sanitize_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}
