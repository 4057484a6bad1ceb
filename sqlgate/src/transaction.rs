//! Transaction handles for fail-loud batches
//!
//! A [`Transaction`] owns its connection for the whole batch. It moves
//! through `Idle → Began → {Committed | RolledBack}`; the terminal states
//! reject every further call. Operations on the handle return `Result` so a
//! batch can bail out with `?` and have the whole unit rolled back.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::backend::{Command, Connection};
use crate::error::{DatabaseError, DatabaseOperation, Error, Result};
use crate::query::{Dialect, Parameters, QueryRequest};
use crate::row::Row;

/// Lifecycle state of a transaction handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Connection acquired, no transaction begun yet
    Idle,
    /// Transaction open; operations are accepted
    Began,
    /// Committed; terminal
    Committed,
    /// Rolled back; terminal
    RolledBack,
}

impl TransactionState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Began => write!(f, "began"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Transaction-scoped handle passed to a batch
pub struct Transaction<C: Connection> {
    connection: C,
    state: TransactionState,
    dialect: Dialect,
    timeout: Duration,
}

impl<C: Connection> fmt::Debug for Transaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("dialect", &self.dialect)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Transaction<C> {
    pub(crate) fn new(connection: C, dialect: Dialect, timeout: Duration) -> Self {
        Self {
            connection,
            state: TransactionState::Idle,
            dialect,
            timeout,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Dialect used for [`Transaction::query`]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Build and run a paginated query inside the transaction
    pub async fn query<T: DeserializeOwned>(&mut self, request: &QueryRequest) -> Result<Vec<T>> {
        let statement = request.to_statement(self.dialect)?;
        let command = statement.into_command(self.timeout);
        self.fetch(DatabaseOperation::Query, &command)
            .await?
            .iter()
            .map(Row::decode)
            .collect()
    }

    /// Run caller SQL and map every row
    pub async fn query_sql<T: DeserializeOwned>(
        &mut self,
        sql: &str,
        parameters: Parameters,
    ) -> Result<Vec<T>> {
        let command = self.command(sql, parameters);
        self.fetch(DatabaseOperation::Query, &command)
            .await?
            .iter()
            .map(Row::decode)
            .collect()
    }

    /// Run caller SQL and return the rows unmapped
    pub async fn fetch_rows(&mut self, sql: &str, parameters: Parameters) -> Result<Vec<Row>> {
        let command = self.command(sql, parameters);
        self.fetch(DatabaseOperation::Query, &command).await
    }

    /// Run a statement and return the number of affected rows
    pub async fn execute(&mut self, sql: &str, parameters: Parameters) -> Result<u64> {
        self.ensure_began()?;
        let command = self.command(sql, parameters);
        let limit = self.timeout;
        with_timeout(
            DatabaseOperation::Execute,
            limit,
            self.connection.execute(&command),
        )
        .await
    }

    /// First column of the first row, if any
    pub async fn scalar<T: DeserializeOwned>(
        &mut self,
        sql: &str,
        parameters: Parameters,
    ) -> Result<Option<T>> {
        let command = self.command(sql, parameters);
        let rows = self.fetch(DatabaseOperation::Scalar, &command).await?;
        first_column(&rows)
    }

    fn command(&self, sql: &str, parameters: Parameters) -> Command {
        Command::text(sql)
            .with_parameters(parameters)
            .with_timeout(self.timeout)
    }

    async fn fetch(&mut self, operation: DatabaseOperation, command: &Command) -> Result<Vec<Row>> {
        self.ensure_began()?;
        let limit = self.timeout;
        with_timeout(operation, limit, self.connection.fetch(command)).await
    }

    fn ensure_began(&self) -> Result<()> {
        if self.state == TransactionState::Began {
            Ok(())
        } else {
            Err(Error::Transaction(format!(
                "transaction is {}, expected began",
                self.state
            )))
        }
    }

    pub(crate) async fn begin(&mut self) -> Result<()> {
        if self.state != TransactionState::Idle {
            return Err(Error::Transaction(format!(
                "cannot begin a transaction that is {}",
                self.state
            )));
        }
        let limit = self.timeout;
        with_timeout(DatabaseOperation::Begin, limit, self.connection.begin()).await?;
        self.state = TransactionState::Began;
        tracing::debug!("Transaction began");
        Ok(())
    }

    pub(crate) async fn commit(&mut self) -> Result<()> {
        self.ensure_began()?;
        let limit = self.timeout;
        with_timeout(DatabaseOperation::Commit, limit, self.connection.commit()).await?;
        self.state = TransactionState::Committed;
        tracing::debug!("Transaction committed");
        Ok(())
    }

    /// Roll back; the handle ends up `RolledBack` even if the backend call fails
    pub(crate) async fn rollback(&mut self) -> Result<()> {
        self.ensure_began()?;
        let limit = self.timeout;
        let result =
            with_timeout(DatabaseOperation::Rollback, limit, self.connection.rollback()).await;
        self.state = TransactionState::RolledBack;
        tracing::debug!("Transaction rolled back");
        result
    }
}

async fn with_timeout<T>(
    operation: DatabaseOperation,
    limit: Duration,
    future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| Error::from(DatabaseError::timeout(operation, limit)))?
}

pub(crate) fn first_column<T: DeserializeOwned>(rows: &[Row]) -> Result<Option<T>> {
    match rows.first().and_then(|row| row.get_index(0)) {
        None => Ok(None),
        Some(value) if value.is_null() => Ok(None),
        Some(value) => serde_json::from_value(value.to_json())
            .map(Some)
            .map_err(|e| Error::Mapping(format!("cannot map scalar value: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnector, Reply};
    use crate::backend::Connector;
    use crate::query::SqlValue;

    async fn handle() -> Transaction<crate::memory::MemoryConnection> {
        let connector = MemoryConnector::new(|_, _| Ok(Reply::Affected(1)));
        let connection = connector.connect().await.unwrap();
        Transaction::new(connection, Dialect::SqlServer, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_state_machine() {
        let mut tx = handle().await;
        assert_eq!(tx.state(), TransactionState::Idle);
        assert!(tx.execute("UPDATE t SET a = 1", Parameters::new()).await.is_err());

        tx.begin().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Began);
        assert!(tx.begin().await.is_err());
        assert_eq!(
            tx.execute("UPDATE t SET a = 1", Parameters::new()).await.unwrap(),
            1
        );

        tx.commit().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(tx.state().is_terminal());
        assert!(matches!(
            tx.execute("UPDATE t SET a = 1", Parameters::new()).await,
            Err(Error::Transaction(_))
        ));
        assert!(tx.rollback().await.is_err());
    }

    #[tokio::test]
    async fn test_rolled_back_is_terminal() {
        let mut tx = handle().await;
        tx.begin().await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert!(tx.commit().await.is_err());
        assert_eq!(tx.state(), TransactionState::RolledBack);
    }

    #[test]
    fn test_first_column() {
        let rows = vec![Row::new().with("count", 3_i64).with("other", "x")];
        assert_eq!(first_column::<i64>(&rows).unwrap(), Some(3));
        assert_eq!(first_column::<i64>(&[]).unwrap(), None);
        let null = vec![Row::new().with("count", SqlValue::Null)];
        assert_eq!(first_column::<i64>(&null).unwrap(), None);
        assert!(first_column::<i64>(&[Row::new().with("c", "three")]).is_err());
    }
}
