//! PostgreSQL connections via the `postgres` crate.
//!
//! Queries go through the simple query protocol, so every column arrives as
//! text regardless of its SQL type (including `numeric`) and is converted by
//! the collector.

use std::time::Duration;

use postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::debug;

use super::traits::{Connection, ConnectionFactory, ResultRow, ResultSet};
use crate::error::CollectError;

const APPLICATION_NAME: &str = "pgotel";

/// Default per-statement timeout applied to every collection connection.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens one short-lived connection per collection cycle.
#[derive(Debug, Clone)]
pub struct PgConnectionFactory {
    config: postgres::Config,
    statement_timeout: Duration,
}

impl PgConnectionFactory {
    /// Creates a factory from a libpq-style or URL connection string.
    pub fn new(connection_string: &str) -> Result<Self, CollectError> {
        let mut config: postgres::Config = connection_string
            .parse()
            .map_err(|e: postgres::Error| CollectError::Connection(format_postgres_error(&e)))?;
        if config.get_application_name().is_none() {
            config.application_name(APPLICATION_NAME);
        }
        config.connect_timeout(DEFAULT_CONNECT_TIMEOUT);
        Ok(Self {
            config,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        })
    }

    /// Creates a factory from the standard libpq environment variables:
    /// - PGHOST (default: localhost)
    /// - PGPORT (default: 5432)
    /// - PGUSER (default: $USER)
    /// - PGPASSWORD (default: empty)
    /// - PGDATABASE (default: same as PGUSER)
    pub fn from_env() -> Result<Self, CollectError> {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| CollectError::Connection("PGUSER or USER not set".to_string()))?;
        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        Self::new(&build_connection_string(
            &host, &port, &user, &password, &database,
        ))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout(timeout);
        self
    }

    /// Sets the server-side `statement_timeout`. `Duration::ZERO` disables it.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Target database, for logging.
    pub fn database(&self) -> Option<&str> {
        self.config.get_dbname()
    }
}

impl ConnectionFactory for PgConnectionFactory {
    type Connection = PgConnection;

    fn connect(&self) -> Result<PgConnection, CollectError> {
        let mut client = self
            .config
            .connect(NoTls)
            .map_err(|e| CollectError::Connection(format_postgres_error(&e)))?;

        if let Some(sql) = statement_timeout_sql(self.statement_timeout) {
            client
                .batch_execute(&sql)
                .map_err(|e| CollectError::Connection(format_postgres_error(&e)))?;
        }

        debug!(database = ?self.config.get_dbname(), "connection established");
        Ok(PgConnection { client })
    }
}

/// A connection owned by a single collection cycle.
pub struct PgConnection {
    client: Client,
}

impl Connection for PgConnection {
    fn query(&mut self, sql: &str) -> Result<ResultSet, CollectError> {
        let messages = self.client.simple_query(sql).map_err(|e| {
            let msg = format_postgres_error(&e);
            if self.client.is_closed() {
                CollectError::Connection(msg)
            } else {
                CollectError::QueryExecution(msg)
            }
        })?;

        let rows = messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(ResultRow::new(
                    row.columns()
                        .iter()
                        .enumerate()
                        .map(|(idx, column)| {
                            (column.name().to_string(), row.get(idx).map(str::to_string))
                        })
                        .collect(),
                )),
                _ => None,
            })
            .collect();

        Ok(ResultSet::new(rows))
    }
}

fn build_connection_string(
    host: &str,
    port: &str,
    user: &str,
    password: &str,
    database: &str,
) -> String {
    if password.is_empty() {
        format!("host={host} port={port} user={user} dbname={database}")
    } else {
        format!("host={host} port={port} user={user} password={password} dbname={database}")
    }
}

fn statement_timeout_sql(timeout: Duration) -> Option<String> {
    if timeout.is_zero() {
        None
    } else {
        Some(format!("SET statement_timeout = {}", timeout.as_millis()))
    }
}

/// Formats PostgreSQL error message for logs.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else {
            msg
        }
    }
}
