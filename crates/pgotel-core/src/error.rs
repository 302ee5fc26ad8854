//! Error types for collection, catalog construction and instrument registration.

use thiserror::Error;

/// Error raised while collecting metrics from PostgreSQL.
///
/// Only `Connection` aborts a cycle. `QueryExecution` and `Conversion` are
/// confined to the catalog entry that produced them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollectError {
    /// The connection could not be opened or was lost mid-cycle.
    #[error("PostgreSQL: {0}")]
    Connection(String),
    /// A single query failed (syntax, permissions, statement timeout).
    #[error("PostgreSQL query error: {0}")]
    QueryExecution(String),
    /// The result could not be coerced to a number.
    #[error("conversion error: {0}")]
    Conversion(String),
}

impl CollectError {
    /// Returns true if the error invalidates the whole cycle.
    pub fn is_connection(&self) -> bool {
        matches!(self, CollectError::Connection(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogError {
    #[error("duplicate metric key {0:?}")]
    DuplicateKey(String),
    #[error("metric key must not be empty")]
    EmptyKey,
    #[error("row-set entry {0:?} declares no key columns")]
    NoKeyColumns(String),
    #[error("row-set entry {0:?} can produce the same key as entry {1:?}")]
    OverlappingKeys(String, String),
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("invalid instrument name {0:?}")]
    InvalidName(String),
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("encoding error: {0}")]
    Encode(String),
}
