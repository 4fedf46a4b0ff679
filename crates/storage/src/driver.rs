//! sqlx-backed store connections
//!
//! Uses the `Any` driver so the same code path serves MySQL in production and
//! SQLite for local runs. Queries must cast DECIMAL and DATETIME columns
//! (`CAST(x AS DOUBLE)`, `CAST(x AS CHAR)`) since `Any` decodes neither.

use crate::config::DatabaseConfig;
use crate::connection::{Connection, Connector};
use crate::row::{Row, SqlValue};
use crate::StorageError;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::mysql::MySqlDatabaseError;
use sqlx::{Any, AnyConnection, Column, Connection as _, Executor, Row as _, ValueRef};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// MySQL client error: server has gone away
const CR_SERVER_GONE_ERROR: u16 = 2006;
/// MySQL client error: lost connection to server during query
const CR_SERVER_LOST: u16 = 2013;

/// Opens sqlx connections from a URL
#[derive(Debug, Clone)]
pub struct SqlxConnector {
    url: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl SqlxConnector {
    pub fn new(config: &DatabaseConfig) -> Result<Self, StorageError> {
        sqlx::any::install_default_drivers();
        Ok(Self {
            url: config.connection_url()?,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        })
    }

    /// Connector for an explicit URL with default timeouts
    pub fn from_url(url: &str) -> Self {
        sqlx::any::install_default_drivers();
        let defaults = DatabaseConfig::default();
        Self {
            url: url.to_string(),
            connect_timeout: defaults.connect_timeout(),
            read_timeout: defaults.read_timeout(),
            write_timeout: defaults.write_timeout(),
        }
    }
}

impl Connector for SqlxConnector {
    type Connection = SqlxConnection;

    async fn connect(&self) -> Result<SqlxConnection, StorageError> {
        debug!("Opening database connection");
        let conn = timeout(self.connect_timeout, AnyConnection::connect(&self.url))
            .await
            .map_err(|_| {
                StorageError::Connection(format!(
                    "connect timed out after {}s",
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(SqlxConnection {
            conn,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        })
    }
}

/// One open sqlx session
pub struct SqlxConnection {
    conn: AnyConnection,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl SqlxConnection {
    async fn run_plain(&mut self, sql: &str) -> Result<(), StorageError> {
        timeout(self.write_timeout, (&mut self.conn).execute(sql))
            .await
            .map_err(|_| timed_out("write", self.write_timeout))?
            .map_err(classify)?;
        Ok(())
    }
}

impl Connection for SqlxConnection {
    async fn ping(&mut self) -> Result<(), StorageError> {
        timeout(self.read_timeout, self.conn.ping())
            .await
            .map_err(|_| timed_out("ping", self.read_timeout))?
            .map_err(classify)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StorageError> {
        let rows = timeout(self.read_timeout, bind_all(sql, params).fetch_all(&mut self.conn))
            .await
            .map_err(|_| timed_out("read", self.read_timeout))?
            .map_err(classify)?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError> {
        let result = timeout(self.write_timeout, bind_all(sql, params).execute(&mut self.conn))
            .await
            .map_err(|_| timed_out("write", self.write_timeout))?
            .map_err(classify)?;
        Ok(result.rows_affected())
    }

    async fn begin(&mut self) -> Result<(), StorageError> {
        self.run_plain("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        self.run_plain("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.run_plain("ROLLBACK").await
    }

    async fn close(self) -> Result<(), StorageError> {
        self.conn.close().await.map_err(classify)
    }
}

fn bind_all<'q>(sql: &'q str, params: &'q [SqlValue]) -> Query<'q, Any, AnyArguments<'q>> {
    params.iter().fold(sqlx::query::<Any>(sql), |query, param| match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
    })
}

fn decode_row(row: &AnyRow) -> Result<Row, StorageError> {
    let mut columns = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let value = if row.try_get_raw(i).map_err(classify)?.is_null() {
            SqlValue::Null
        } else if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
            v.map_or(SqlValue::Null, SqlValue::Int)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
            v.map_or(SqlValue::Null, SqlValue::Float)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(i) {
            v.map_or(SqlValue::Null, SqlValue::Text)
        } else {
            return Err(StorageError::decode(column.name(), "unsupported column type"));
        };
        columns.push((column.name().to_string(), value));
    }
    Ok(Row::new(columns))
}

fn timed_out(what: &str, after: Duration) -> StorageError {
    StorageError::ConnectionLost(format!("{what} timed out after {}s", after.as_secs()))
}

/// Map sqlx failures onto the transient/fatal taxonomy
pub(crate) fn classify(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::NotConnected
            ) =>
        {
            StorageError::ConnectionLost(err.to_string())
        }
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StorageError::ConnectionLost(err.to_string())
        }
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .and_then(|mysql| classify_mysql(mysql.number(), mysql.message()))
            .unwrap_or_else(|| StorageError::DatabaseError(err.to_string())),
        _ => StorageError::DatabaseError(err.to_string()),
    }
}

/// MySQL reports disconnects by error number; the SQLSTATE is a generic `HY000`
fn classify_mysql(number: u16, message: &str) -> Option<StorageError> {
    match number {
        CR_SERVER_GONE_ERROR => Some(StorageError::ServerGoneAway(message.to_string())),
        CR_SERVER_LOST => Some(StorageError::ConnectionLost(message.to_string())),
        _ => None,
    }
}
