//! Scripted connections for testing collectors without a PostgreSQL server.
//!
//! Responses are looked up by exact SQL text. Unscripted SQL fails the way a
//! missing relation would.
//!
//! ```
//! use pgotel_core::collector::mock::MockConnectionFactory;
//! use pgotel_core::collector::{Connection, ConnectionFactory};
//!
//! let factory = MockConnectionFactory::new().scalar("SELECT 1", "1");
//! let mut conn = factory.connect().unwrap();
//! assert_eq!(conn.query("SELECT 1").unwrap().rows.len(), 1);
//! drop(conn);
//! assert_eq!(factory.stats().releases(), 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::traits::{Connection, ConnectionFactory, ResultRow, ResultSet};
use crate::error::CollectError;

#[derive(Debug, Clone)]
enum MockResponse {
    Rows(ResultSet),
    Fail(CollectError),
}

/// Counters shared by a factory and every connection it opened.
#[derive(Debug, Default)]
pub struct MockStats {
    connects: AtomicUsize,
    releases: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl MockStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet dropped.
    pub fn open_connections(&self) -> usize {
        self.connects() - self.releases()
    }

    /// Every SQL text executed, in order, across all connections.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

/// Connection factory returning scripted results.
#[derive(Debug, Default)]
pub struct MockConnectionFactory {
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    connect_error: Mutex<Option<String>>,
    cancel_after: Option<(usize, CancellationToken)>,
    stats: Arc<MockStats>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `sql` to return one row with one column.
    pub fn scalar(self, sql: &str, value: &str) -> Self {
        self.set_scalar(sql, value);
        self
    }

    /// Scripts `sql` to return a single NULL.
    pub fn null_scalar(self, sql: &str) -> Self {
        self.script(
            sql,
            MockResponse::Rows(ResultSet::new(vec![ResultRow::new(vec![(
                "?column?".to_string(),
                None,
            )])])),
        );
        self
    }

    pub fn rows(self, sql: &str, rows: ResultSet) -> Self {
        self.set_rows(sql, rows);
        self
    }

    /// Scripts `sql` to fail with a query error.
    pub fn fail(self, sql: &str, message: &str) -> Self {
        self.script(
            sql,
            MockResponse::Fail(CollectError::QueryExecution(message.to_string())),
        );
        self
    }

    /// Scripts `sql` to fail as if the server closed the connection.
    pub fn lose_connection(self, sql: &str) -> Self {
        self.script(
            sql,
            MockResponse::Fail(CollectError::Connection(
                "connection closed".to_string(),
            )),
        );
        self
    }

    /// Cancels `token` once `n` queries have been executed.
    pub fn cancel_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    /// Replaces the scripted value of `sql`; affects later queries only.
    pub fn set_scalar(&self, sql: &str, value: &str) {
        self.set_rows(
            sql,
            ResultSet::new(vec![ResultRow::from_pairs(&[("?column?", value)])]),
        );
    }

    pub fn set_rows(&self, sql: &str, rows: ResultSet) {
        self.script(sql, MockResponse::Rows(rows));
    }

    /// Makes subsequent `connect` calls fail (`Some`) or succeed (`None`).
    pub fn set_connect_error(&self, message: Option<&str>) {
        *self.connect_error.lock() = message.map(str::to_string);
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    fn script(&self, sql: &str, response: MockResponse) {
        self.responses.lock().insert(sql.to_string(), response);
    }
}

impl ConnectionFactory for MockConnectionFactory {
    type Connection = MockConnection;

    fn connect(&self) -> Result<MockConnection, CollectError> {
        if let Some(msg) = self.connect_error.lock().clone() {
            return Err(CollectError::Connection(msg));
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            responses: Arc::clone(&self.responses),
            cancel_after: self.cancel_after.clone(),
            stats: Arc::clone(&self.stats),
        })
    }
}

/// A connection handed out by [`MockConnectionFactory`].
#[derive(Debug)]
pub struct MockConnection {
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    cancel_after: Option<(usize, CancellationToken)>,
    stats: Arc<MockStats>,
}

impl Connection for MockConnection {
    fn query(&mut self, sql: &str) -> Result<ResultSet, CollectError> {
        let executed = {
            let mut executed = self.stats.executed.lock();
            executed.push(sql.to_string());
            executed.len()
        };
        if let Some((n, ref token)) = self.cancel_after
            && executed >= n
        {
            token.cancel();
        }

        match self.responses.lock().get(sql) {
            Some(MockResponse::Rows(rows)) => Ok(rows.clone()),
            Some(MockResponse::Fail(e)) => Err(e.clone()),
            None => Err(CollectError::QueryExecution(format!(
                "ERROR: no scripted response for {sql:?}"
            ))),
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
    }
}
