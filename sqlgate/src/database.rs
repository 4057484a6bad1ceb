//! Data-access facade
//!
//! [`Database`] ties the pieces together: it builds statements from
//! [`QueryRequest`]s, acquires one connection per operation from its
//! [`Connector`], and reports through the fail-quiet [`Outcome`] type.
//! Transactional batches are the exception: they are fail-loud and return a
//! `Result`, rolling back on any failure.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use serde::Deserialize;
//! use sqlgate::database::Database;
//! use sqlgate::memory::{MemoryConnector, Reply};
//! use sqlgate::query::{Dialect, QueryRequest};
//! use sqlgate::row::Row;
//!
//! #[derive(Deserialize)]
//! struct Item {
//!     id: i64,
//! }
//!
//! let connector = MemoryConnector::new(|_, tables| {
//!     Ok(Reply::Rows(tables.get("items").cloned().unwrap_or_default()))
//! })
//! .with_table("items", vec![Row::new().with("id", 1_i64)]);
//! let db = Database::new(connector, Dialect::SqlServer, Duration::from_secs(5));
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let request = QueryRequest::new("select id from items").with_filter("id eq 1");
//! let (items, succeeded, has_data) = rt.block_on(db.query::<Item>(&request)).into_flags();
//! assert!(succeeded && has_data);
//! assert_eq!(items[0].id, 1);
//! ```

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;

use crate::backend::{Command, Connection, Connector};
use crate::config::DatabaseConfig;
use crate::error::{DatabaseError, DatabaseOperation, Error, Result};
use crate::execution::{panic_message, run, Outcome};
use crate::query::{Dialect, Parameters, QueryRequest};
use crate::row::Row;
use crate::transaction::{first_column, Transaction};

/// Fail-quiet data access over a [`Connector`]
#[derive(Debug, Clone)]
pub struct Database<C> {
    connector: C,
    dialect: Dialect,
    timeout: Duration,
}

impl<C: Connector> Database<C> {
    /// Create a facade over `connector`
    pub fn new(connector: C, dialect: Dialect, timeout: Duration) -> Self {
        Self {
            connector,
            dialect,
            timeout,
        }
    }

    /// Create a facade using the dialect and timeout from `config`
    pub fn from_config(connector: C, config: &DatabaseConfig) -> Self {
        Self::new(connector, config.dialect, config.timeout())
    }

    /// The underlying connector
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Dialect used to format statements
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Per-operation timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build, run, and map a paginated query
    ///
    /// A malformed request fails before any connection is acquired.
    pub async fn query<T: DeserializeOwned>(&self, request: &QueryRequest) -> Outcome<Vec<T>> {
        run(DatabaseOperation::Query, self.timeout, async {
            let statement = request.to_statement(self.dialect)?;
            let rows = self.fetch(statement.into_command(self.timeout)).await?;
            decode_all(&rows)
        })
        .await
    }

    /// Run caller SQL and map every row
    pub async fn query_sql<T: DeserializeOwned>(
        &self,
        sql: &str,
        parameters: Parameters,
    ) -> Outcome<Vec<T>> {
        run(DatabaseOperation::Query, self.timeout, async {
            let rows = self.fetch(self.command(sql, parameters)).await?;
            decode_all(&rows)
        })
        .await
    }

    /// Run caller SQL and map the first row, if any
    pub async fn query_first<T: DeserializeOwned>(
        &self,
        sql: &str,
        parameters: Parameters,
    ) -> Outcome<Option<T>> {
        run(DatabaseOperation::Query, self.timeout, async {
            let rows = self.fetch(self.command(sql, parameters)).await?;
            rows.first().map(Row::decode).transpose()
        })
        .await
    }

    /// Run a paginated query whose rows join two shapes
    ///
    /// Columns from `split_on` onwards map into `B`; a row whose `B` columns
    /// are all NULL yields `None` for the second shape.
    pub async fn query_join<A, B>(
        &self,
        request: &QueryRequest,
        split_on: &str,
    ) -> Outcome<Vec<(A, Option<B>)>>
    where
        A: DeserializeOwned,
        B: DeserializeOwned,
    {
        run(DatabaseOperation::Query, self.timeout, async {
            let statement = request.to_statement(self.dialect)?;
            let rows = self.fetch(statement.into_command(self.timeout)).await?;
            rows.iter().map(|row| row.decode_pair(split_on)).collect()
        })
        .await
    }

    /// Run a statement and report the number of affected rows
    pub async fn execute(&self, sql: &str, parameters: Parameters) -> Outcome<u64> {
        run(DatabaseOperation::Execute, self.timeout, async {
            let command = self.command(sql, parameters);
            let mut connection = self.connector.connect().await?;
            tracing::debug!(statement = %command.text, "Executing statement");
            connection.execute(&command).await
        })
        .await
    }

    /// First column of the first row, if any
    pub async fn scalar<T: DeserializeOwned>(
        &self,
        sql: &str,
        parameters: Parameters,
    ) -> Outcome<Option<T>> {
        run(DatabaseOperation::Scalar, self.timeout, async {
            let rows = self.fetch(self.command(sql, parameters)).await?;
            first_column(&rows)
        })
        .await
    }

    /// Invoke a row-returning stored procedure with named arguments
    pub async fn procedure<T: DeserializeOwned>(
        &self,
        name: &str,
        parameters: Parameters,
    ) -> Outcome<Vec<T>> {
        run(DatabaseOperation::Procedure, self.timeout, async {
            let command = self.procedure_command(name, parameters)?;
            let rows = self.fetch(command).await?;
            decode_all(&rows)
        })
        .await
    }

    /// Invoke a stored procedure for its side effects
    pub async fn call_procedure(&self, name: &str, parameters: Parameters) -> Outcome<u64> {
        run(DatabaseOperation::Procedure, self.timeout, async {
            let command = self.procedure_command(name, parameters)?;
            let mut connection = self.connector.connect().await?;
            tracing::debug!(procedure = %command.text, "Calling procedure");
            connection.execute(&command).await
        })
        .await
    }

    /// Run `batch` inside one transaction
    ///
    /// Commits when the batch returns `Ok`. On `Err` the transaction is rolled
    /// back and the error is returned; on a panic it is rolled back and the
    /// panic resumes. Nothing is retried.
    ///
    /// ```rust,ignore
    /// let moved = db
    ///     .transaction(|tx| {
    ///         Box::pin(async move {
    ///             tx.execute("UPDATE accounts SET balance = balance - 10 WHERE id = @id",
    ///                 Parameters::new().with("id", 1_i64)).await?;
    ///             tx.execute("UPDATE accounts SET balance = balance + 10 WHERE id = @id",
    ///                 Parameters::new().with("id", 2_i64)).await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<R, F>(&self, batch: F) -> Result<R>
    where
        F: for<'t> FnOnce(&'t mut Transaction<C::Connection>) -> BoxFuture<'t, Result<R>>,
    {
        let connection = tokio::time::timeout(self.timeout, self.connector.connect())
            .await
            .map_err(|_| {
                Error::from(DatabaseError::timeout(DatabaseOperation::Connect, self.timeout))
            })??;
        let mut tx = Transaction::new(connection, self.dialect, self.timeout);
        tx.begin().await?;

        let result = AssertUnwindSafe(batch(&mut tx)).catch_unwind().await;
        match result {
            Ok(Ok(value)) => match tx.commit().await {
                Ok(()) => Ok(value),
                Err(err) => {
                    abort(&mut tx, &err).await;
                    Err(err)
                }
            },
            Ok(Err(err)) => {
                abort(&mut tx, &err).await;
                Err(err)
            }
            Err(panic) => {
                let reason = Error::Panicked(panic_message(panic.as_ref()));
                abort(&mut tx, &reason).await;
                std::panic::resume_unwind(panic)
            }
        }
    }

    fn command(&self, sql: &str, parameters: Parameters) -> Command {
        Command::text(sql)
            .with_parameters(parameters)
            .with_timeout(self.timeout)
    }

    fn procedure_command(&self, name: &str, parameters: Parameters) -> Result<Command> {
        parameters.validate_names()?;
        Ok(Command::procedure(name)?
            .with_parameters(parameters)
            .with_timeout(self.timeout))
    }

    /// Acquire a connection, run one command, release the connection
    async fn fetch(&self, command: Command) -> Result<Vec<Row>> {
        let mut connection = self.connector.connect().await?;
        tracing::debug!(statement = %command.text, "Fetching rows");
        connection.fetch(&command).await
    }
}

async fn abort<C: Connection>(tx: &mut Transaction<C>, cause: &Error) {
    tracing::warn!(error = %cause, "Rolling back transaction");
    if let Err(err) = tx.rollback().await {
        tracing::error!(error = %err, "Transaction rollback failed");
    }
}

fn decode_all<T: DeserializeOwned>(rows: &[Row]) -> Result<Vec<T>> {
    rows.iter().map(Row::decode).collect()
}
