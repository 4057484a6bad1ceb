//! Statement construction: dialects, parameters, ordering, and pagination
//!
//! A [`QueryRequest`] is turned into an executable [`Statement`] by
//! translating its filter, validating its ordering, and wrapping its base
//! query with [`format_query`].

mod dialect;
mod format;
mod order;
mod params;
mod request;

pub use dialect::Dialect;
pub use format::{format_query, DERIVED_TABLE_ALIAS};
pub use order::{OrderBy, OrderDirection, OrderKey};
pub use params::{Parameters, SqlValue};
pub use request::{Page, QueryRequest, Statement};

pub(crate) use params::is_identifier;
