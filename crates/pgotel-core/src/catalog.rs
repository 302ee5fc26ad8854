//! Metric query catalog.
//!
//! Every entry maps a metric key to a SQL query. Scalar entries return exactly
//! one row with one column; row-set entries return one row per discovered
//! entity and carry a [`RowExpansion`] describing how rows become keys.

use std::collections::HashSet;

use crate::error::CatalogError;

/// Joins a row-set key prefix and each of its attributes.
pub(crate) const KEY_SEPARATOR: char = '_';

/// How the rows of a row-set query are turned into metric keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowExpansion {
    /// Stable row attributes forming the key suffix, in order.
    pub key_columns: Vec<String>,
    /// Column holding the numeric value.
    pub value_column: String,
}

impl RowExpansion {
    pub fn new(key_columns: &[&str], value_column: &str) -> Self {
        Self {
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
            value_column: value_column.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Scalar,
    RowSet(RowExpansion),
}

/// A single catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuerySpec {
    /// Metric key for scalar entries, key prefix for row-set entries.
    pub key: String,
    pub query: String,
    pub kind: QueryKind,
}

impl MetricQuerySpec {
    pub fn scalar(key: &str, query: &str) -> Self {
        Self {
            key: key.to_string(),
            query: query.to_string(),
            kind: QueryKind::Scalar,
        }
    }

    pub fn row_set(key: &str, query: &str, expansion: RowExpansion) -> Self {
        Self {
            key: key.to_string(),
            query: query.to_string(),
            kind: QueryKind::RowSet(expansion),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, QueryKind::Scalar)
    }
}

/// Ordered, immutable set of metric queries.
#[derive(Debug, Clone)]
pub struct QueryCatalog {
    entries: Vec<MetricQuerySpec>,
}

impl QueryCatalog {
    /// Builds a catalog from custom entries.
    ///
    /// Rejects empty keys, duplicate keys, row-set entries without key
    /// columns, and entries whose generated keys could coincide.
    pub fn new(entries: Vec<MetricQuerySpec>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.key.is_empty() {
                return Err(CatalogError::EmptyKey);
            }
            if !seen.insert(entry.key.as_str()) {
                return Err(CatalogError::DuplicateKey(entry.key.clone()));
            }
            if let QueryKind::RowSet(ref expansion) = entry.kind
                && expansion.key_columns.is_empty()
            {
                return Err(CatalogError::NoKeyColumns(entry.key.clone()));
            }
        }
        for row_set in &entries {
            for other in &entries {
                if !std::ptr::eq(row_set, other) && keys_overlap(row_set, other) {
                    return Err(CatalogError::OverlappingKeys(
                        row_set.key.clone(),
                        other.key.clone(),
                    ));
                }
            }
        }
        Ok(Self { entries })
    }

    /// The built-in catalog of PostgreSQL counters.
    pub fn postgres() -> Self {
        Self {
            entries: vec![
                MetricQuerySpec::scalar("sql.active_connections", ACTIVE_CONNECTIONS),
                MetricQuerySpec::scalar("sql.user_connections", USER_CONNECTIONS),
                MetricQuerySpec::scalar("sql.active_queries", ACTIVE_QUERIES),
                MetricQuerySpec::scalar("sql.database_size_mb", DATABASE_SIZE_MB),
                MetricQuerySpec::scalar("sql.buffer_cache_hit_ratio", BUFFER_CACHE_HIT_RATIO),
                MetricQuerySpec::scalar("sql.lock_waits", LOCK_WAITS),
                MetricQuerySpec::scalar("sql.deadlocks", DEADLOCKS),
                MetricQuerySpec::scalar("sql.transactions_committed", XACT_COMMIT),
                MetricQuerySpec::scalar("sql.transactions_rolled_back", XACT_ROLLBACK),
                MetricQuerySpec::scalar("sql.temp_bytes", TEMP_BYTES),
                MetricQuerySpec::scalar(
                    "sql.longest_transaction_seconds",
                    LONGEST_TRANSACTION_SECONDS,
                ),
                MetricQuerySpec::row_set(
                    "sql.database_size",
                    DATABASE_FILES,
                    RowExpansion::new(&["database_name", "file_name", "file_type"], "size_mb"),
                ),
                MetricQuerySpec::row_set(
                    "sql.tablespace_size_mb",
                    TABLESPACES,
                    RowExpansion::new(&["tablespace_name"], "size_mb"),
                ),
            ],
        }
    }

    pub fn entries(&self) -> &[MetricQuerySpec] {
        &self.entries
    }

    /// Keys of scalar entries, known before the first cycle.
    pub fn scalar_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.is_scalar())
            .map(|e| e.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// True if some key expanded from the row-set entry `row_set` can equal a key
/// produced by `other`.
///
/// Expanded attributes never contain the separator, so a row-set prefix `p`
/// with `n` key columns yields exactly the keys `p_a1_.._an`. `other` collides
/// when its key extends `p` and, counting its own attributes, ends up with the
/// same number of separator-delimited segments.
fn keys_overlap(row_set: &MetricQuerySpec, other: &MetricQuerySpec) -> bool {
    let QueryKind::RowSet(ref expansion) = row_set.kind else {
        return false;
    };
    let Some(rest) = other
        .key
        .strip_prefix(row_set.key.as_str())
        .and_then(|rest| rest.strip_prefix(KEY_SEPARATOR))
    else {
        return false;
    };
    let own_columns = match other.kind {
        QueryKind::Scalar => 0,
        QueryKind::RowSet(ref e) => e.key_columns.len(),
    };
    rest.split(KEY_SEPARATOR).count() + own_columns == expansion.key_columns.len()
}

impl Default for QueryCatalog {
    fn default() -> Self {
        Self::postgres()
    }
}

const ACTIVE_CONNECTIONS: &str = "SELECT count(*)::double precision FROM pg_stat_activity";

const USER_CONNECTIONS: &str = r#"
    SELECT count(*)::double precision
    FROM pg_stat_activity
    WHERE backend_type = 'client backend'
"#;

const ACTIVE_QUERIES: &str = r#"
    SELECT count(*)::double precision
    FROM pg_stat_activity
    WHERE backend_type = 'client backend'
      AND state = 'active'
      AND pid <> pg_backend_pid()
"#;

const DATABASE_SIZE_MB: &str =
    "SELECT pg_database_size(current_database()) / 1024.0 / 1024.0";

// NULL until the first block read; the key is then absent for the cycle.
const BUFFER_CACHE_HIT_RATIO: &str = r#"
    SELECT sum(blks_hit) * 100.0 / NULLIF(sum(blks_hit) + sum(blks_read), 0)
    FROM pg_stat_database
"#;

const LOCK_WAITS: &str = "SELECT count(*)::double precision FROM pg_locks WHERE NOT granted";

const DEADLOCKS: &str =
    "SELECT COALESCE(sum(deadlocks), 0)::double precision FROM pg_stat_database";

const XACT_COMMIT: &str =
    "SELECT COALESCE(sum(xact_commit), 0)::double precision FROM pg_stat_database";

const XACT_ROLLBACK: &str =
    "SELECT COALESCE(sum(xact_rollback), 0)::double precision FROM pg_stat_database";

const TEMP_BYTES: &str =
    "SELECT COALESCE(sum(temp_bytes), 0)::double precision FROM pg_stat_database";

const LONGEST_TRANSACTION_SECONDS: &str = r#"
    SELECT COALESCE(max(EXTRACT(EPOCH FROM now() - xact_start)), 0)::double precision
    FROM pg_stat_activity
    WHERE xact_start IS NOT NULL
      AND backend_type = 'client backend'
"#;

// pg_ls_waldir() needs pg_monitor; without it the whole entry fails and is
// skipped for the cycle.
const DATABASE_FILES: &str = r#"
    SELECT
        d.datname AS database_name,
        'data' AS file_name,
        'ROWS' AS file_type,
        pg_database_size(d.datname) / 1024.0 / 1024.0 AS size_mb
    FROM pg_database d
    WHERE d.datallowconn AND NOT d.datistemplate
    UNION ALL
    SELECT
        current_database(),
        'wal',
        'LOG',
        (SELECT COALESCE(sum(size), 0) FROM pg_ls_waldir()) / 1024.0 / 1024.0
"#;

const TABLESPACES: &str = r#"
    SELECT
        spcname AS tablespace_name,
        pg_tablespace_size(oid) / 1024.0 / 1024.0 AS size_mb
    FROM pg_tablespace
    ORDER BY spcname
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_catalog_is_valid() {
        let catalog = QueryCatalog::postgres();
        let rebuilt = QueryCatalog::new(catalog.entries().to_vec());
        assert!(rebuilt.is_ok());
        assert!(!catalog.is_empty());
    }

    #[test]
    fn scalar_keys_skip_row_sets() {
        let catalog = QueryCatalog::postgres();
        let keys: Vec<&str> = catalog.scalar_keys().collect();
        assert!(keys.contains(&"sql.active_connections"));
        assert!(!keys.contains(&"sql.database_size"));
        assert_eq!(keys.len(), catalog.len() - 2);
    }

    #[test]
    fn entries_keep_declaration_order() {
        let catalog = QueryCatalog::new(vec![
            MetricQuerySpec::scalar("b", "SELECT 1"),
            MetricQuerySpec::scalar("a", "SELECT 2"),
        ])
        .unwrap();
        let keys: Vec<&str> = catalog.entries().iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = QueryCatalog::new(vec![
            MetricQuerySpec::scalar("a", "SELECT 1"),
            MetricQuerySpec::scalar("a", "SELECT 2"),
        ])
        .unwrap_err();
        assert_eq!(err, CatalogError::DuplicateKey("a".to_string()));
    }

    #[test]
    fn rejects_empty_key() {
        let err = QueryCatalog::new(vec![MetricQuerySpec::scalar("", "SELECT 1")]).unwrap_err();
        assert_eq!(err, CatalogError::EmptyKey);
    }

    #[test]
    fn rejects_row_set_without_key_columns() {
        let err = QueryCatalog::new(vec![MetricQuerySpec::row_set(
            "files",
            "SELECT 1",
            RowExpansion::new(&[], "size"),
        )])
        .unwrap_err();
        assert_eq!(err, CatalogError::NoKeyColumns("files".to_string()));
    }

    #[test]
    fn rejects_scalar_shadowing_row_set_keys() {
        let err = QueryCatalog::new(vec![
            MetricQuerySpec::row_set("a", "SELECT rows", RowExpansion::new(&["x", "y"], "v")),
            MetricQuerySpec::scalar("a_b_c", "SELECT 1"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            CatalogError::OverlappingKeys("a".to_string(), "a_b_c".to_string())
        );
    }

    #[test]
    fn rejects_nested_row_set_prefixes() {
        let err = QueryCatalog::new(vec![
            MetricQuerySpec::row_set("a_b", "SELECT inner", RowExpansion::new(&["z"], "v")),
            MetricQuerySpec::row_set("a", "SELECT outer", RowExpansion::new(&["x", "y"], "v")),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            CatalogError::OverlappingKeys("a".to_string(), "a_b".to_string())
        );
    }

    #[test]
    fn allows_shared_prefix_with_different_arity() {
        let catalog = QueryCatalog::new(vec![
            MetricQuerySpec::row_set(
                "sql.database_size",
                "SELECT files",
                RowExpansion::new(&["db", "file", "type"], "mb"),
            ),
            MetricQuerySpec::scalar("sql.database_size_mb", "SELECT 1"),
        ]);
        assert!(catalog.is_ok());
    }
}
