//! pgotel-core: PostgreSQL counter collection and metric exposition.
//!
//! Provides:
//! - `catalog`: the table of metric queries (scalar and row-set)
//! - `collector`: one collection cycle against a live connection, the
//!   row-set expander, the `postgres` connection factory and mocks
//! - `snapshot`: immutable collected values
//! - `store`: the atomically replaced current snapshot
//! - `instruments`: gauge registration against a `Meter` (Prometheus-backed)
//! - `job`: the periodic unit of work: collect, publish, register

pub mod catalog;
pub mod collector;
pub mod error;
pub mod instruments;
pub mod job;
pub mod snapshot;
pub mod store;

pub use catalog::{MetricQuerySpec, QueryCatalog, QueryKind, RowExpansion};
pub use collector::{Collector, DynamicMetricExpander};
pub use error::{CatalogError, CollectError, InstrumentError};
pub use instruments::{InstrumentRegistry, Meter, PrometheusMeter, RegistrationState};
pub use job::{CollectionJob, CollectorStatus, CycleSummary};
pub use snapshot::Snapshot;
pub use store::SnapshotStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
