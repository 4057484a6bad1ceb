//! Query requests and pagination modes
//!
//! # Example
//!
//! ```rust
//! use sqlgate::query::{Dialect, QueryRequest};
//!
//! let request = QueryRequest::new("select id, name from items")
//!     .with_filter("name eq 'a'")
//!     .with_order_by("name")
//!     .with_page(3, 20);
//!
//! let statement = request.to_statement(Dialect::SqlServer).unwrap();
//! assert_eq!(
//!     statement.text,
//!     "SELECT * FROM (select id, name from items) V WHERE 1=1 AND name = @__filter_0 \
//!      ORDER BY name OFFSET (40) ROWS FETCH NEXT (20) ROWS ONLY"
//! );
//! ```

use serde::{Deserialize, Serialize};

use super::dialect::Dialect;
use super::format::format_query;
use super::params::{Parameters, SqlValue};
use crate::backend::Command;
use crate::error::{Error, Result};
use crate::filter::{Translator, FILTER_PARAMETER_PREFIX};

use std::time::Duration;

/// Row-selection mode resolved from `top` / `skip` / `take`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// The full filtered result set
    All,
    /// At most `top` rows
    Limit {
        /// Maximum number of rows
        top: u64,
    },
    /// An ordered window of `take` rows after skipping `skip`
    Window {
        /// Rows to skip
        skip: u64,
        /// Rows to return
        take: u64,
    },
}

impl Page {
    /// Resolve the pagination mode; `skip` wins over `top`
    ///
    /// `skip` without both `take` and an ordering is rejected, since an
    /// offset window is only deterministic under a total order.
    pub fn resolve(
        top: Option<u64>,
        skip: Option<u64>,
        take: Option<u64>,
        has_order: bool,
    ) -> Result<Self> {
        match (skip, top) {
            (Some(skip), _) => {
                let take = take.ok_or_else(|| {
                    Error::InvalidRequest("skip requires take to be set".to_string())
                })?;
                if take == 0 {
                    return Err(Error::InvalidRequest(
                        "take must be greater than zero".to_string(),
                    ));
                }
                if !has_order {
                    return Err(Error::InvalidRequest(
                        "skip requires orderBy to be set".to_string(),
                    ));
                }
                if top.is_some() {
                    tracing::debug!("Both top and skip set; using skip/take window");
                }
                Ok(Self::Window { skip, take })
            }
            (None, Some(top)) => Ok(Self::Limit { top }),
            (None, None) => Ok(Self::All),
        }
    }
}

/// A base query plus optional filter, ordering, and pagination directives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Statement wrapped as a derived table
    pub base_query: String,

    /// Filter expression in the OData-style grammar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Ordering, e.g. `"created_at desc, id"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    /// Row limit for the row-limited mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<u64>,

    /// Rows to skip for windowed pagination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,

    /// Window size for windowed pagination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<u64>,

    /// Named parameters referenced by `base_query`
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
}

impl QueryRequest {
    /// Create a request for `base_query` with no filter or pagination
    pub fn new(base_query: impl Into<String>) -> Self {
        Self {
            base_query: base_query.into(),
            ..Self::default()
        }
    }

    /// Set the filter expression
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set the ordering
    #[must_use]
    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    /// Limit the result to the first `top` rows
    #[must_use]
    pub fn with_top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    /// Skip `skip` rows (requires `take` and an ordering)
    #[must_use]
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Window size used together with `skip`
    #[must_use]
    pub fn with_take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    /// Select a 1-indexed page of `page_size` rows
    ///
    /// Page 0 is treated as page 1.
    ///
    /// ```rust
    /// use sqlgate::query::QueryRequest;
    ///
    /// let request = QueryRequest::new("select 1").with_page(3, 20);
    /// assert_eq!(request.skip, Some(40));
    /// assert_eq!(request.take, Some(20));
    /// ```
    #[must_use]
    pub fn with_page(mut self, page_number: u64, page_size: u64) -> Self {
        self.skip = Some(page_number.saturating_sub(1).saturating_mul(page_size));
        self.take = Some(page_size);
        self
    }

    /// Bind a named parameter referenced by the base query
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.parameters.insert(name, value);
        self
    }

    /// Replace all parameters
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Resolved pagination mode
    pub fn page(&self) -> Result<Page> {
        Page::resolve(self.top, self.skip, self.take, self.has_order())
    }

    fn has_order(&self) -> bool {
        self.order_by.as_deref().is_some_and(|o| !o.trim().is_empty())
    }

    /// Translate, format, and merge parameters into one executable statement
    ///
    /// Fails with a caller-input error (and builds nothing) when pagination is
    /// misused, the filter is malformed, the ordering is invalid, or a caller
    /// parameter name is invalid or uses the reserved filter prefix.
    pub fn to_statement(&self, dialect: Dialect) -> Result<Statement> {
        self.parameters.validate_names()?;
        if let Some((name, _)) = self
            .parameters
            .iter()
            .find(|(name, _)| name.to_ascii_lowercase().starts_with(FILTER_PARAMETER_PREFIX))
        {
            return Err(Error::InvalidRequest(format!(
                "parameter '@{}' uses the reserved prefix '{}'",
                name, FILTER_PARAMETER_PREFIX
            )));
        }

        // Pagination misuse is checked before the filter is touched.
        self.page()?;

        let predicate = Translator::new(dialect).translate(self.filter.as_deref().unwrap_or(""))?;
        let order_by = self.order_by.as_deref().filter(|o| !o.trim().is_empty());
        let text = format_query(
            dialect,
            &self.base_query,
            &predicate,
            self.top,
            self.skip,
            self.take,
            order_by,
        )?;

        let (_, filter_parameters) = predicate.into_parts();
        let mut parameters = self.parameters.clone();
        parameters.merge(filter_parameters)?;

        Ok(Statement { text, parameters })
    }
}

/// Executable statement text with its bound parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    /// Statement text with `@name` placeholders
    pub text: String,
    /// Values for every placeholder in `text`
    pub parameters: Parameters,
}

impl Statement {
    /// A caller-supplied statement executed as-is
    pub fn raw(text: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }

    /// Build a free-text command for the backend
    pub fn into_command(self, timeout: Duration) -> Command {
        Command::text(self.text)
            .with_parameters(self.parameters)
            .with_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_resolution() {
        assert_eq!(Page::resolve(None, None, None, false).unwrap(), Page::All);
        assert_eq!(
            Page::resolve(Some(5), None, None, false).unwrap(),
            Page::Limit { top: 5 }
        );
        assert_eq!(
            Page::resolve(Some(5), Some(10), Some(20), true).unwrap(),
            Page::Window { skip: 10, take: 20 }
        );
        // take alone does not paginate
        assert_eq!(Page::resolve(None, None, Some(20), true).unwrap(), Page::All);
    }

    #[test]
    fn test_skip_requires_take_and_order() {
        let missing_take = Page::resolve(None, Some(10), None, true).unwrap_err();
        assert!(missing_take.is_caller_input());
        let missing_order = Page::resolve(None, Some(10), Some(5), false).unwrap_err();
        assert!(missing_order.is_caller_input());
    }

    #[test]
    fn test_empty_window_rejected() {
        let err = Page::resolve(None, Some(10), Some(0), true).unwrap_err();
        assert!(err.is_caller_input());

        let request = QueryRequest::new("select * from items")
            .with_order_by("id")
            .with_page(1, 0);
        assert!(matches!(
            request.to_statement(Dialect::SqlServer),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_blank_order_by_counts_as_missing() {
        let request = QueryRequest::new("select 1")
            .with_skip(0)
            .with_take(10)
            .with_order_by("   ");
        assert!(request.to_statement(Dialect::SqlServer).is_err());
    }

    #[test]
    fn test_with_page() {
        let request = QueryRequest::new("select 1").with_page(0, 25);
        assert_eq!(request.skip, Some(0));
        assert_eq!(request.take, Some(25));
    }

    #[test]
    fn test_parameters_are_merged() {
        let statement = QueryRequest::new("select * from items where owner = @owner")
            .with_parameter("owner", 7_i64)
            .with_filter("name eq 'a'")
            .to_statement(Dialect::SqlServer)
            .unwrap();
        assert_eq!(statement.parameters.len(), 2);
        assert_eq!(statement.parameters.get("owner"), Some(&SqlValue::Int(7)));
        assert_eq!(
            statement.parameters.get("__filter_0"),
            Some(&SqlValue::from("a"))
        );
    }

    #[test]
    fn test_reserved_parameter_prefix_rejected() {
        let err = QueryRequest::new("select 1")
            .with_parameter("__filter_0", 1_i64)
            .to_statement(Dialect::SqlServer)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        // SQL Server parameter names are case-insensitive
        let err = QueryRequest::new("select 1")
            .with_parameter("__FILTER_0", 1_i64)
            .to_statement(Dialect::SqlServer)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let request: QueryRequest = serde_json::from_str(
            r#"{"baseQuery":"select 1","orderBy":"id","skip":0,"take":5,"parameters":{"a":1}}"#,
        )
        .unwrap();
        assert_eq!(request.order_by.as_deref(), Some("id"));
        assert_eq!(request.parameters.get("a"), Some(&SqlValue::Int(1)));
    }
}
