//! In-memory backend
//!
//! A [`Connector`] whose "database" is a set of named tables held in memory.
//! Statement semantics come from a caller-supplied handler, so tests decide
//! what each command does while the backend provides the parts that matter to
//! the data-access layer: real transaction staging, a command log, optional
//! latency, and a count of connections currently open.
//!
//! Begin snapshots the committed tables; every command in the transaction runs
//! against that snapshot; commit publishes it and rollback (or dropping the
//! connection) discards it.
//!
//! # Example
//!
//! ```rust
//! use sqlgate::backend::{Command, Connection, Connector};
//! use sqlgate::memory::{MemoryConnector, Reply};
//! use sqlgate::row::Row;
//!
//! let connector = MemoryConnector::new(|_, tables| {
//!     Ok(Reply::Rows(tables.get("items").cloned().unwrap_or_default()))
//! })
//! .with_table("items", vec![Row::new().with("id", 1_i64)]);
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let rows = rt.block_on(async {
//!     let mut conn = connector.connect().await?;
//!     conn.fetch(&Command::text("SELECT * FROM items")).await
//! }).unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(connector.open_connections(), 0);
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::backend::{Command, Connection, Connector};
use crate::error::{DatabaseError, DatabaseOperation, Result};
use crate::row::Row;

/// Named tables
pub type Tables = BTreeMap<String, Vec<Row>>;

/// What a handler produced for one command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Result rows
    Rows(Vec<Row>),
    /// Affected-row count
    Affected(u64),
}

type Handler = dyn Fn(&Command, &mut Tables) -> Result<Reply> + Send + Sync;

struct Shared {
    tables: Mutex<Tables>,
    log: Mutex<Vec<Command>>,
    handler: Box<Handler>,
    latency: Duration,
    open: AtomicUsize,
    refuse_connections: AtomicBool,
    fail_commits: AtomicBool,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, operation: DatabaseOperation) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| {
        DatabaseError::query_failed(operation, "in-memory backend state is poisoned").into()
    })
}

/// Connector for the in-memory backend
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Create a backend whose commands are interpreted by `handler`
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Command, &mut Tables) -> Result<Reply> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::new()),
                log: Mutex::new(Vec::new()),
                handler: Box::new(handler),
                latency: Duration::ZERO,
                open: AtomicUsize::new(0),
                refuse_connections: AtomicBool::new(false),
                fail_commits: AtomicBool::new(false),
            }),
        }
    }

    /// Seed a committed table
    ///
    /// Must be called before the connector is cloned or connected.
    #[must_use]
    pub fn with_table(self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        if let Ok(mut tables) = self.shared.tables.lock() {
            tables.insert(name.into(), rows);
        }
        self
    }

    /// Delay every command by `latency`
    ///
    /// Must be called before the connector is cloned or connected.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.latency = latency;
        }
        self
    }

    /// Make subsequent `connect` calls fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Make subsequent commits fail
    ///
    /// A rejected commit publishes nothing and leaves the transaction open,
    /// so it can still be rolled back.
    pub fn fail_commits(&self, fail: bool) {
        self.shared.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Committed contents of `name`
    pub fn table(&self, name: &str) -> Vec<Row> {
        self.shared
            .tables
            .lock()
            .map(|tables| tables.get(name).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Every command received so far, in order
    pub fn commands(&self) -> Vec<Command> {
        self.shared
            .log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Connections acquired and not yet dropped
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        if self.shared.refuse_connections.load(Ordering::SeqCst) {
            return Err(DatabaseError::connection_failed("in-memory backend refused the connection").into());
        }
        self.shared.open.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            shared: Arc::clone(&self.shared),
            staged: None,
        })
    }
}

/// Connection to the in-memory backend
pub struct MemoryConnection {
    shared: Arc<Shared>,
    staged: Option<Tables>,
}

impl MemoryConnection {
    async fn run(&mut self, operation: DatabaseOperation, command: &Command) -> Result<Reply> {
        lock(&self.shared.log, operation)?.push(command.clone());
        if !self.shared.latency.is_zero() {
            tokio::time::sleep(self.shared.latency).await;
        }
        match self.staged.as_mut() {
            Some(staged) => (self.shared.handler)(command, staged),
            None => {
                let mut tables = lock(&self.shared.tables, operation)?;
                (self.shared.handler)(command, &mut tables)
            }
        }
    }
}

impl Connection for MemoryConnection {
    async fn fetch(&mut self, command: &Command) -> Result<Vec<Row>> {
        match self.run(DatabaseOperation::Query, command).await? {
            Reply::Rows(rows) => Ok(rows),
            Reply::Affected(_) => Ok(Vec::new()),
        }
    }

    async fn execute(&mut self, command: &Command) -> Result<u64> {
        match self.run(DatabaseOperation::Execute, command).await? {
            Reply::Rows(rows) => Ok(rows.len() as u64),
            Reply::Affected(n) => Ok(n),
        }
    }

    async fn begin(&mut self) -> Result<()> {
        if self.staged.is_some() {
            return Err(DatabaseError::transaction_failed(
                DatabaseOperation::Begin,
                "a transaction is already open on this connection",
            )
            .into());
        }
        let snapshot = lock(&self.shared.tables, DatabaseOperation::Begin)?.clone();
        self.staged = Some(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.staged.is_some() && self.shared.fail_commits.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction_failed(
                DatabaseOperation::Commit,
                "in-memory backend rejected the commit",
            )
            .into());
        }
        let staged = self.staged.take().ok_or_else(|| {
            DatabaseError::transaction_failed(DatabaseOperation::Commit, "no open transaction")
        })?;
        *lock(&self.shared.tables, DatabaseOperation::Commit)? = staged;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.staged.take().map(drop).ok_or_else(|| {
            DatabaseError::transaction_failed(DatabaseOperation::Rollback, "no open transaction")
                .into()
        })
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SqlValue;

    fn insert_handler(command: &Command, tables: &mut Tables) -> Result<Reply> {
        let id = command.parameters.get("id").cloned().unwrap_or(SqlValue::Null);
        tables
            .entry("items".to_string())
            .or_default()
            .push(Row::new().with("id", id));
        Ok(Reply::Affected(1))
    }

    #[tokio::test]
    async fn test_commit_publishes_staged_changes() {
        let connector = MemoryConnector::new(insert_handler);
        let mut conn = connector.connect().await.unwrap();
        conn.begin().await.unwrap();
        conn.execute(&Command::text("INSERT").with_parameters(
            crate::query::Parameters::new().with("id", 1_i64),
        ))
        .await
        .unwrap();
        assert!(connector.table("items").is_empty());
        conn.commit().await.unwrap();
        assert_eq!(connector.table("items").len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_changes() {
        let connector = MemoryConnector::new(insert_handler);
        let mut conn = connector.connect().await.unwrap();
        conn.begin().await.unwrap();
        conn.execute(&Command::text("INSERT")).await.unwrap();
        conn.rollback().await.unwrap();
        assert!(connector.table("items").is_empty());
        assert!(conn.rollback().await.is_err());
    }

    #[tokio::test]
    async fn test_open_connection_counter_and_log() {
        let connector = MemoryConnector::new(insert_handler);
        {
            let mut first = connector.connect().await.unwrap();
            let _second = connector.connect().await.unwrap();
            assert_eq!(connector.open_connections(), 2);
            first.execute(&Command::text("INSERT")).await.unwrap();
        }
        assert_eq!(connector.open_connections(), 0);
        assert_eq!(connector.commands().len(), 1);
        assert_eq!(connector.table("items").len(), 1);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let connector = MemoryConnector::new(insert_handler);
        connector.refuse_connections(true);
        assert!(connector.connect().await.is_err());
        assert_eq!(connector.open_connections(), 0);
    }
}
