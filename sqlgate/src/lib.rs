//! # sqlgate
//!
//! Safe query translation and fail-quiet execution for relational backends.
//!
//! ## Features
//!
//! - **Filter translation**: OData-style `$filter` expressions parsed into a
//!   tree and rendered as parameterized SQL predicates
//! - **Paginated formatting**: any base query wrapped as a derived table with a
//!   predicate, ordering, and either a row limit or an ordered window
//! - **Fail-quiet execution**: single operations report an [`Outcome`] instead
//!   of raising
//! - **Transactions**: fail-loud batches that commit on success and roll back
//!   on error or panic
//! - **Backends**: PostgreSQL through sqlx (`database` feature) and an
//!   in-memory backend for tests
//!
//! ## Example
//!
//! ```rust
//! use sqlgate::prelude::*;
//!
//! let statement = QueryRequest::new("select id, name from items")
//!     .with_filter("name eq 'a'")
//!     .with_top(5)
//!     .to_statement(Dialect::SqlServer)
//!     .unwrap();
//!
//! assert_eq!(
//!     statement.text,
//!     "SELECT TOP(5) * FROM (select id, name from items) V WHERE 1=1 AND name = @__filter_0"
//! );
//! assert_eq!(statement.parameters.get("__filter_0"), Some(&SqlValue::from("a")));
//! ```

pub mod backend;
pub mod config;
pub mod database;
pub mod error;
pub mod execution;
pub mod filter;
pub mod memory;
pub mod observability;
pub mod query;
pub mod row;
pub mod transaction;

#[cfg(feature = "database")]
pub mod postgres;

pub use execution::Outcome;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{Command, CommandKind, Connection, Connector};
    pub use crate::config::{Config, DatabaseConfig, ServiceConfig};
    pub use crate::database::Database;
    pub use crate::error::{DatabaseError, DatabaseErrorKind, DatabaseOperation, Error, Result};
    pub use crate::execution::{run, HasData, Outcome};
    pub use crate::filter::{translate, PredicateFragment, TranslateError, Translator};
    pub use crate::observability::init_tracing;
    pub use crate::query::{
        format_query, Dialect, OrderBy, OrderDirection, Parameters, QueryRequest, SqlValue,
        Statement,
    };
    pub use crate::row::Row;
    pub use crate::transaction::{Transaction, TransactionState};

    #[cfg(feature = "database")]
    pub use crate::postgres::{PgConnection, PgConnector};

    pub use futures::future::BoxFuture;
}
