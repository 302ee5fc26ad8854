//! Abstractions over the database client to enable testing and mocking.
//!
//! The collector only needs "run this SQL and give me rows of text values",
//! so the seam is deliberately narrow: [`PgConnectionFactory`] implements it
//! over the `postgres` crate, [`MockConnectionFactory`] over scripted results.
//!
//! [`PgConnectionFactory`]: super::PgConnectionFactory
//! [`MockConnectionFactory`]: super::mock::MockConnectionFactory

use crate::error::CollectError;

/// One result row: ordered `(column name, text value)` pairs.
///
/// `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    fields: Vec<(String, Option<String>)>,
}

impl ResultRow {
    pub fn new(fields: Vec<(String, Option<String>)>) -> Self {
        Self { fields }
    }

    /// Builds a row from non-null `(column, value)` pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            fields: pairs
                .iter()
                .map(|(c, v)| (c.to_string(), Some(v.to_string())))
                .collect(),
        }
    }

    /// Value of `column`. Outer `None`: no such column; inner `None`: NULL.
    pub fn get(&self, column: &str) -> Option<Option<&str>> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_deref())
    }

    /// Value at position `idx`, same convention as [`ResultRow::get`].
    pub fn get_idx(&self, idx: usize) -> Option<Option<&str>> {
        self.fields.get(idx).map(|(_, value)| value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// All rows returned by one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<ResultRow>,
}

impl ResultSet {
    pub fn new(rows: Vec<ResultRow>) -> Self {
        Self { rows }
    }
}

/// A live database connection owned by one collection cycle.
///
/// Dropping the value releases the connection.
pub trait Connection {
    /// Runs `sql` and returns every row.
    ///
    /// Returns `CollectError::Connection` if the connection itself is gone,
    /// `CollectError::QueryExecution` for any other failure.
    fn query(&mut self, sql: &str) -> Result<ResultSet, CollectError>;
}

/// Opens connections for collection cycles.
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection;

    fn connect(&self) -> Result<Self::Connection, CollectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_distinguishes_missing_column_from_null() {
        let row = ResultRow::new(vec![
            ("a".to_string(), Some("1".to_string())),
            ("b".to_string(), None),
        ]);
        assert_eq!(row.get("a"), Some(Some("1")));
        assert_eq!(row.get("b"), Some(None));
        assert_eq!(row.get("c"), None);
        assert_eq!(row.get_idx(1), Some(None));
        assert_eq!(row.get_idx(2), None);
    }
}
