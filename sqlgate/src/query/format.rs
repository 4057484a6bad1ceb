//! Paginated statement formatting
//!
//! The base query is wrapped as a derived table so a predicate, an ordering,
//! and one of two pagination modes can be appended without parsing it:
//!
//! ```text
//! SELECT * FROM (<base>) V WHERE 1=1 <predicate> ORDER BY <order> OFFSET (s) ROWS FETCH NEXT (t) ROWS ONLY
//! SELECT TOP(n) * FROM (<base>) V WHERE 1=1 <predicate> [ORDER BY <order>]
//! ```

use super::dialect::Dialect;
use super::order::OrderBy;
use super::request::Page;
use crate::error::{Error, Result};
use crate::filter::PredicateFragment;

/// Alias of the derived table wrapping the base query
pub const DERIVED_TABLE_ALIAS: &str = "V";

/// Compose a base query, predicate, ordering, and pagination into one statement
///
/// `skip` selects the ordered window and requires both `take` and `order_by`;
/// otherwise `top` limits the row count. Ordering is appended whenever it is
/// present. The base query's text is kept as written apart from surrounding
/// whitespace and a trailing `;`.
pub fn format_query(
    dialect: Dialect,
    base_query: &str,
    predicate: &PredicateFragment,
    top: Option<u64>,
    skip: Option<u64>,
    take: Option<u64>,
    order_by: Option<&str>,
) -> Result<String> {
    let order = order_by
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::parse::<OrderBy>)
        .transpose()?;
    let page = Page::resolve(top, skip, take, order.is_some())?;
    let base = normalize_base_query(base_query)?;

    let limit = match page {
        Page::Limit { top } => Some(top),
        _ => None,
    };

    let mut statement = format!(
        "{} FROM ({}) {} WHERE 1=1",
        dialect.select_prefix(limit),
        base,
        DERIVED_TABLE_ALIAS
    );
    if !predicate.is_empty() {
        statement.push(' ');
        statement.push_str(predicate.as_sql());
    }

    match (page, &order) {
        (Page::Window { skip, take }, Some(order)) => {
            statement.push_str(" ORDER BY ");
            statement.push_str(&order.to_string());
            statement.push_str(&dialect.window_clause(skip, take));
        }
        (_, order) => {
            if let Some(order) = order {
                statement.push_str(" ORDER BY ");
                statement.push_str(&order.to_string());
            }
            if let Some(suffix) = limit.and_then(|top| dialect.limit_suffix(top)) {
                statement.push_str(&suffix);
            }
        }
    }

    tracing::debug!(%dialect, ?page, "Formatted statement");
    Ok(statement)
}

fn normalize_base_query(base_query: &str) -> Result<&str> {
    let trimmed = base_query.trim();
    let base = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    if base.is_empty() {
        return Err(Error::InvalidRequest("baseQuery is empty".to_string()));
    }
    Ok(base)
}
