//! Ordering clauses
//!
//! `orderBy` arrives as caller text (`"created_at desc, id"`). It is parsed
//! into validated column names and directions and rendered back, so it cannot
//! carry anything but an ordering.
//!
//! # Example
//!
//! ```rust
//! use sqlgate::query::{OrderBy, OrderDirection};
//!
//! let order: OrderBy = "created_at desc, id".parse().unwrap();
//! assert_eq!(order.to_string(), "created_at DESC, id");
//! assert_eq!(order.keys()[0].direction, Some(OrderDirection::Descending));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::params::is_identifier;
use crate::error::Error;
use crate::filter::statement_keyword;

/// Direction for ordering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    /// Sort in ascending order (A-Z, 0-9)
    #[default]
    Ascending,
    /// Sort in descending order (Z-A, 9-0)
    Descending,
}

impl OrderDirection {
    /// SQL keyword for this direction
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// One `column [direction]` entry of an ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    /// Column of the derived table
    pub column: String,
    /// Explicit direction, or `None` for the backend default (ascending)
    pub direction: Option<OrderDirection>,
}

/// A validated, non-empty list of ordering keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy(Vec<OrderKey>);

impl OrderBy {
    /// Order by a single column using the backend default direction
    pub fn column(column: impl Into<String>) -> Result<Self, Error> {
        Self::from_keys(vec![OrderKey {
            column: column.into(),
            direction: None,
        }])
    }

    /// Build from keys, validating every column name
    pub fn from_keys(keys: Vec<OrderKey>) -> Result<Self, Error> {
        if keys.is_empty() {
            return Err(Error::InvalidRequest("orderBy has no columns".to_string()));
        }
        for key in &keys {
            validate_column(&key.column)?;
        }
        Ok(Self(keys))
    }

    /// The ordering keys in priority order
    pub fn keys(&self) -> &[OrderKey] {
        &self.0
    }
}

impl FromStr for OrderBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let keys = s
            .split(',')
            .map(|part| {
                let mut words = part.split_whitespace();
                let column = words.next().ok_or_else(|| {
                    Error::InvalidRequest(format!("orderBy '{}' has an empty entry", s.trim()))
                })?;
                let direction = match words.next() {
                    None => None,
                    Some(w) if w.eq_ignore_ascii_case("asc") => Some(OrderDirection::Ascending),
                    Some(w) if w.eq_ignore_ascii_case("desc") => Some(OrderDirection::Descending),
                    Some(other) => {
                        return Err(Error::InvalidRequest(format!(
                            "orderBy direction must be asc or desc, found '{}'",
                            other
                        )))
                    }
                };
                if let Some(extra) = words.next() {
                    return Err(Error::InvalidRequest(format!(
                        "unexpected '{}' in orderBy entry '{}'",
                        extra,
                        part.trim()
                    )));
                }
                Ok(OrderKey {
                    column: column.to_string(),
                    direction,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_keys(keys)
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&key.column)?;
            if let Some(direction) = key.direction {
                write!(f, " {}", direction.as_sql())?;
            }
        }
        Ok(())
    }
}

fn validate_column(column: &str) -> Result<(), Error> {
    if !is_identifier(column) {
        return Err(Error::InvalidRequest(format!(
            "orderBy column '{}' is not a valid identifier",
            column
        )));
    }
    if let Some(keyword) = statement_keyword(column) {
        return Err(Error::InvalidRequest(format!(
            "orderBy column cannot be the statement keyword '{}'",
            keyword
        )));
    }
    Ok(())
}
