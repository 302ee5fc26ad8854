//! Metric collection.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │          Collector           │
//!                 │  QueryCatalog entries:       │
//!                 │  - Scalar  -> parse_value    │
//!                 │  - RowSet  -> Expander       │
//!                 └──────────────┬───────────────┘
//!                                │
//!                     ┌──────────▼──────────┐
//!                     │  ConnectionFactory  │ (trait)
//!                     └──────────┬──────────┘
//!                                │
//!               ┌────────────────┴────────────────┐
//!               │                                 │
//!    ┌──────────▼──────────┐          ┌───────────▼───────────┐
//!    │ PgConnectionFactory │          │ MockConnectionFactory │
//!    │  (postgres crate)   │          │       (testing)       │
//!    └─────────────────────┘          └───────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use pgotel_core::collector::Collector;
//! use pgotel_core::collector::mock::MockConnectionFactory;
//! use pgotel_core::{MetricQuerySpec, QueryCatalog};
//! use tokio_util::sync::CancellationToken;
//!
//! let entries = vec![MetricQuerySpec::scalar("sql.lock_waits", "SELECT 3")];
//! let catalog = QueryCatalog::new(entries).unwrap();
//! let factory = MockConnectionFactory::new().scalar("SELECT 3", "3");
//! let snapshot = Collector::new(catalog)
//!     .run(&factory, &CancellationToken::new())
//!     .unwrap();
//! assert_eq!(snapshot.get("sql.lock_waits"), Some(3.0));
//! ```

#[allow(clippy::module_inception)]
mod collector;
mod expander;
pub mod mock;
mod pg;
pub mod traits;

pub use collector::Collector;
pub use expander::DynamicMetricExpander;
pub use pg::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_STATEMENT_TIMEOUT, PgConnection, PgConnectionFactory};
pub use traits::{Connection, ConnectionFactory, ResultRow, ResultSet};
