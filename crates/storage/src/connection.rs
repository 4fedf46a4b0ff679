//! Connection Manager
//!
//! Owns a single lazily-established connection to the relational store.
//! Liveness is probed before reuse; dead connections are replaced. Reads,
//! writes and batches run inside a retry loop that reconnects on transient
//! disconnects and gives up immediately on anything else.
//!
//! One manager per session: the retry and rollback bookkeeping is not meant
//! to be shared between interleaved callers.

use crate::row::{Row, SqlValue};
use crate::StorageError;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Pause between a transient failure and the next attempt
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// A live session with the store
///
/// Connections are autocommit; `begin`/`commit` bracket explicit writes.
#[allow(async_fn_in_trait)]
pub trait Connection: Send {
    /// Cheap liveness probe
    async fn ping(&mut self) -> Result<(), StorageError>;

    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StorageError>;

    /// Run a statement, returning rows affected
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError>;

    async fn begin(&mut self) -> Result<(), StorageError>;

    async fn commit(&mut self) -> Result<(), StorageError>;

    async fn rollback(&mut self) -> Result<(), StorageError>;

    /// Graceful shutdown
    async fn close(self) -> Result<(), StorageError>
    where
        Self: Sized;
}

/// Establishes connections from configuration
#[allow(async_fn_in_trait)]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    async fn connect(&self) -> Result<Self::Connection, StorageError>;
}

enum Operation<'q> {
    Read {
        sql: &'q str,
        params: &'q [SqlValue],
    },
    Write {
        sql: &'q str,
        params: &'q [SqlValue],
    },
    Batch {
        sql: &'q str,
        params_list: &'q [Vec<SqlValue>],
    },
}

enum Outcome {
    Rows(Vec<Row>),
    Affected(u64),
}

impl Operation<'_> {
    fn is_write(&self) -> bool {
        !matches!(self, Operation::Read { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Operation::Read { .. } => "query",
            Operation::Write { .. } => "update",
            Operation::Batch { .. } => "batch update",
        }
    }

    async fn perform<T: Connection>(&self, conn: &mut T) -> Result<Outcome, StorageError> {
        match self {
            Operation::Read { sql, params } => conn.fetch_all(sql, params).await.map(Outcome::Rows),
            Operation::Write { sql, params } => {
                conn.begin().await?;
                let affected = conn.execute(sql, params).await?;
                conn.commit().await?;
                Ok(Outcome::Affected(affected))
            }
            Operation::Batch { sql, params_list } => {
                conn.begin().await?;
                let mut affected = 0;
                for params in params_list.iter() {
                    affected += conn.execute(sql, params).await?;
                }
                conn.commit().await?;
                Ok(Outcome::Affected(affected))
            }
        }
    }
}

/// Reconnecting, retrying owner of one store connection
pub struct ConnectionManager<C: Connector> {
    connector: C,
    max_retries: u32,
    backoff: Duration,
    slot: Mutex<Option<C::Connection>>,
    /// Retries performed since creation
    retries: AtomicU32,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager; no connection is opened until first use
    pub fn new(connector: C, max_retries: u32) -> Self {
        Self {
            connector,
            max_retries: max_retries.max(1),
            backoff: DEFAULT_BACKOFF,
            slot: Mutex::new(None),
            retries: AtomicU32::new(0),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Number of retries performed so far
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Get a usable connection, connecting or reconnecting as needed
    pub async fn acquire(&self) -> Result<MappedMutexGuard<'_, C::Connection>, StorageError> {
        let mut slot = self.slot.lock().await;
        self.ensure_live(&mut slot).await?;
        MutexGuard::try_map(slot, |slot| slot.as_mut())
            .map_err(|_| StorageError::Connection("no connection available".to_string()))
    }

    /// Run a query and return its rows
    pub async fn execute_read(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StorageError> {
        match self.run(Operation::Read { sql, params }).await? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Affected(_) => Ok(Vec::new()),
        }
    }

    /// Run one statement and commit, returning rows affected
    pub async fn execute_write(&self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError> {
        match self.run(Operation::Write { sql, params }).await? {
            Outcome::Affected(n) => Ok(n),
            Outcome::Rows(_) => Ok(0),
        }
    }

    /// Run one statement per parameter set in a single transaction
    pub async fn execute_batch(&self, sql: &str, params_list: &[Vec<SqlValue>]) -> Result<u64, StorageError> {
        match self.run(Operation::Batch { sql, params_list }).await? {
            Outcome::Affected(n) => Ok(n),
            Outcome::Rows(_) => Ok(0),
        }
    }

    /// Close the connection if open. Idempotent.
    pub async fn release(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(conn) = slot.take() {
            match conn.close().await {
                Ok(()) => info!("Database connection closed"),
                Err(e) => warn!("Error while closing database connection: {}", e),
            }
        }
    }

    /// Connect now and hand back a scope that releases on every exit path
    pub async fn scoped(self) -> Result<ManagedScope<C>, StorageError> {
        {
            let mut slot = self.slot.lock().await;
            self.ensure_live(&mut slot).await?;
        }
        Ok(ManagedScope { manager: self })
    }

    async fn run(&self, op: Operation<'_>) -> Result<Outcome, StorageError> {
        let mut slot = self.slot.lock().await;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let conn = self.ensure_live(&mut slot).await?;

            match op.perform(conn).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!(
                        "Database connection error during {} (attempt {}/{}): {}",
                        op.label(),
                        attempt,
                        self.max_retries,
                        e
                    );
                    // The session is gone; a fresh one is opened next attempt
                    slot.take();
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    error!("Database {} failed: {}", op.label(), e);
                    if op.is_write() {
                        if let Some(conn) = slot.as_mut() {
                            Self::rollback_quietly(conn).await;
                        }
                    }
                    if e.is_transient() {
                        return Err(StorageError::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn ensure_live<'a>(
        &self,
        slot: &'a mut Option<C::Connection>,
    ) -> Result<&'a mut C::Connection, StorageError> {
        let alive = match slot.as_mut() {
            Some(conn) => match conn.ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Database connection lost ({}), reconnecting...", e);
                    false
                }
            },
            None => false,
        };

        if !alive {
            if let Some(stale) = slot.take() {
                if let Err(e) = stale.close().await {
                    debug!("Closing stale connection failed: {}", e);
                }
            }
            return Ok(slot.insert(self.establish().await?));
        }

        slot.as_mut()
            .ok_or_else(|| StorageError::Connection("no connection available".to_string()))
    }

    async fn establish(&self) -> Result<C::Connection, StorageError> {
        match self.connector.connect().await {
            Ok(conn) => {
                info!("Database connection established");
                Ok(conn)
            }
            Err(e) => {
                error!("Database connection failed: {}", e);
                // Establishment failures are never retried at this layer
                Err(match e {
                    e if e.is_transient() => StorageError::Connection(e.to_string()),
                    e => e,
                })
            }
        }
    }

    async fn rollback_quietly(conn: &mut C::Connection) {
        match conn.rollback().await {
            Ok(()) => debug!("Transaction rolled back"),
            Err(e) => debug!("Rollback failed: {}", e),
        }
    }
}

/// Connection manager that is released when the scope ends
///
/// `finish` closes gracefully; dropping the scope on any other path (an
/// error, `?`, unwinding) discards the connection.
pub struct ManagedScope<C: Connector> {
    manager: ConnectionManager<C>,
}

impl<C: Connector> ManagedScope<C> {
    pub async fn finish(self) {
        self.manager.release().await;
    }
}

impl<C: Connector> Deref for ManagedScope<C> {
    type Target = ConnectionManager<C>;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl<C: Connector> Drop for ManagedScope<C> {
    fn drop(&mut self) {
        if self.manager.slot.get_mut().take().is_some() {
            debug!("Scoped database connection released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Shared, scriptable state behind the fake connector
    #[derive(Default)]
    struct Script {
        pub connects: u32,
        pub fail_connect: bool,
        pub ping_fails: bool,
        pub failures: VecDeque<StorageError>,
        pub statements: Vec<String>,
        pub commits: u32,
        pub rollbacks: u32,
        pub closed: u32,
        pub dropped: u32,
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        pub script: Arc<StdMutex<Script>>,
    }

    struct FakeConnection {
        script: Arc<StdMutex<Script>>,
    }

    impl FakeConnector {
        pub fn fail_next(&self, err: StorageError) {
            self.script.lock().unwrap().failures.push_back(err);
        }

        pub fn with<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
            f(&mut self.script.lock().unwrap())
        }
    }

    impl Connector for FakeConnector {
        type Connection = FakeConnection;

        async fn connect(&self) -> Result<FakeConnection, StorageError> {
            let mut script = self.script.lock().unwrap();
            script.connects += 1;
            if script.fail_connect {
                return Err(StorageError::Connection("access denied".to_string()));
            }
            Ok(FakeConnection {
                script: Arc::clone(&self.script),
            })
        }
    }

    impl FakeConnection {
        fn step(&self, sql: &str) -> Result<(), StorageError> {
            let mut script = self.script.lock().unwrap();
            script.statements.push(sql.to_string());
            match script.failures.pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    impl Connection for FakeConnection {
        async fn ping(&mut self) -> Result<(), StorageError> {
            if self.script.lock().unwrap().ping_fails {
                Err(StorageError::ServerGoneAway("ping".to_string()))
            } else {
                Ok(())
            }
        }

        async fn fetch_all(&mut self, sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>, StorageError> {
            self.step(sql)?;
            Ok(vec![Row::new(vec![("value".to_string(), SqlValue::Int(42))])])
        }

        async fn execute(&mut self, sql: &str, _params: &[SqlValue]) -> Result<u64, StorageError> {
            self.step(sql)?;
            Ok(1)
        }

        async fn begin(&mut self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn commit(&mut self) -> Result<(), StorageError> {
            self.script.lock().unwrap().commits += 1;
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), StorageError> {
            self.script.lock().unwrap().rollbacks += 1;
            Ok(())
        }

        async fn close(self) -> Result<(), StorageError> {
            self.script.lock().unwrap().closed += 1;
            Ok(())
        }
    }

    impl Drop for FakeConnection {
        fn drop(&mut self) {
            if let Ok(mut script) = self.script.lock() {
                script.dropped += 1;
            }
        }
    }

    fn lost() -> StorageError {
        StorageError::ConnectionLost("Lost connection to MySQL server during query".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_recovers_after_connection_lost() {
        let connector = FakeConnector::default();
        connector.fail_next(lost());
        let manager = ConnectionManager::new(connector.clone(), 3);

        let rows = manager.execute_read("SELECT 42 AS value", &[]).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64("value").unwrap(), 42);
        assert_eq!(manager.retries(), 1);
        assert_eq!(connector.with(|s| s.connects), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_applied() {
        let connector = FakeConnector::default();
        connector.fail_next(lost());
        let manager = ConnectionManager::new(connector, 3);

        let started = tokio::time::Instant::now();
        manager.execute_read("SELECT 1", &[]).await.unwrap();
        assert!(started.elapsed() >= DEFAULT_BACKOFF);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let connector = FakeConnector::default();
        connector.fail_next(StorageError::DatabaseError("syntax error".to_string()));
        let manager = ConnectionManager::new(connector.clone(), 3);

        let err = manager.execute_read("SELEC 1", &[]).await.unwrap_err();

        assert!(matches!(err, StorageError::DatabaseError(_)));
        assert_eq!(manager.retries(), 0);
        assert_eq!(connector.with(|s| s.statements.len()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let connector = FakeConnector::default();
        for _ in 0..3 {
            connector.fail_next(lost());
        }
        let manager = ConnectionManager::new(connector.clone(), 3);

        let err = manager.execute_read("SELECT 1", &[]).await.unwrap_err();

        match err {
            StorageError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(manager.retries(), 2);
    }

    #[tokio::test]
    async fn test_write_commits() {
        let connector = FakeConnector::default();
        let manager = ConnectionManager::new(connector.clone(), 3);

        let affected = manager
            .execute_write("UPDATE devices SET location = ?", &["Lab".into()])
            .await
            .unwrap();

        assert_eq!(affected, 1);
        assert_eq!(connector.with(|s| (s.commits, s.rollbacks)), (1, 0));
    }

    #[tokio::test]
    async fn test_write_failure_rolls_back() {
        let connector = FakeConnector::default();
        connector.fail_next(StorageError::DatabaseError("duplicate key".to_string()));
        let manager = ConnectionManager::new(connector.clone(), 3);

        let result = manager.execute_write("INSERT INTO devices VALUES (?)", &["d1".into()]).await;

        assert!(result.is_err());
        assert_eq!(connector.with(|s| (s.commits, s.rollbacks)), (0, 1));
    }

    #[tokio::test]
    async fn test_batch_runs_every_parameter_set() {
        let connector = FakeConnector::default();
        let manager = ConnectionManager::new(connector.clone(), 3);
        let params = vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)], vec![SqlValue::Int(3)]];

        let affected = manager.execute_batch("INSERT INTO t VALUES (?)", &params).await.unwrap();

        assert_eq!(affected, 3);
        assert_eq!(connector.with(|s| s.commits), 1);
    }

    #[tokio::test]
    async fn test_dead_connection_replaced_before_use() {
        let connector = FakeConnector::default();
        let manager = ConnectionManager::new(connector.clone(), 3);
        manager.execute_read("SELECT 1", &[]).await.unwrap();

        connector.with(|s| s.ping_fails = true);
        manager.execute_read("SELECT 1", &[]).await.unwrap();

        assert_eq!(connector.with(|s| s.connects), 2);
        assert_eq!(manager.retries(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let connector = FakeConnector::default();
        connector.with(|s| s.fail_connect = true);
        let manager = ConnectionManager::new(connector.clone(), 3);

        let err = manager.execute_read("SELECT 1", &[]).await.unwrap_err();

        assert!(matches!(err, StorageError::Connection(_)));
        assert_eq!(connector.with(|s| s.connects), 1);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let connector = FakeConnector::default();
        let manager = ConnectionManager::new(connector.clone(), 3);
        manager.acquire().await.unwrap();
        assert!(manager.is_connected().await);

        manager.release().await;
        manager.release().await;

        assert!(!manager.is_connected().await);
        assert_eq!(connector.with(|s| s.closed), 1);
    }

    #[tokio::test]
    async fn test_scope_finish_closes() {
        let connector = FakeConnector::default();
        let scope = ConnectionManager::new(connector.clone(), 3).scoped().await.unwrap();
        scope.execute_write("CREATE TABLE t (id INT)", &[]).await.unwrap();
        scope.finish().await;

        assert_eq!(connector.with(|s| s.closed), 1);
    }

    #[tokio::test]
    async fn test_scope_releases_on_early_exit() {
        let connector = FakeConnector::default();

        async fn provision(connector: FakeConnector) -> Result<(), StorageError> {
            let scope = ConnectionManager::new(connector, 3).scoped().await?;
            scope.execute_write("CREATE TABLE t (id INT)", &[]).await?;
            scope.execute_write("CREATE TABLE broken", &[]).await?;
            scope.finish().await;
            Ok(())
        }

        connector.fail_next(StorageError::DatabaseError("table already exists".to_string()));
        // the first statement fails and the function exits through `?`
        assert!(provision(connector.clone()).await.is_err());
        assert_eq!(connector.with(|s| (s.connects, s.dropped)), (1, 1));
    }
}
