//! Backend SQL dialects
//!
//! The formatter and translator only differ between backends in how rows are
//! limited and in a handful of scalar function names. Both dialects keep the
//! same two pagination modes: a row-limited selection and an ordered window.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Target SQL dialect for generated statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// T-SQL: `TOP(n)` and `OFFSET .. ROWS FETCH NEXT .. ROWS ONLY`
    #[default]
    SqlServer,
    /// PostgreSQL: `LIMIT n` and the standard `OFFSET .. FETCH NEXT` window
    Postgres,
}

impl Dialect {
    /// Projection prefix for the derived-table wrapper
    pub(crate) fn select_prefix(&self, top: Option<u64>) -> String {
        match (self, top) {
            (Self::SqlServer, Some(n)) => format!("SELECT TOP({}) *", n),
            _ => "SELECT *".to_string(),
        }
    }

    /// Trailing row-limit clause for the row-limited mode, if the dialect uses one
    pub(crate) fn limit_suffix(&self, top: u64) -> Option<String> {
        match self {
            Self::SqlServer => None,
            Self::Postgres => Some(format!(" LIMIT {}", top)),
        }
    }

    /// Windowed-pagination clause appended after `ORDER BY`
    pub(crate) fn window_clause(&self, skip: u64, take: u64) -> String {
        format!(" OFFSET ({}) ROWS FETCH NEXT ({}) ROWS ONLY", skip, take)
    }

    /// Wrap `operand` in the dialect's trim expression
    pub(crate) fn trim(&self, operand: &str) -> String {
        match self {
            Self::SqlServer => format!("LTRIM(RTRIM({}))", operand),
            Self::Postgres => format!("TRIM({})", operand),
        }
    }

    /// Name of the character-length function
    pub(crate) fn length_function(&self) -> &'static str {
        match self {
            Self::SqlServer => "LEN",
            Self::Postgres => "LENGTH",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqlServer => write!(f, "sqlserver"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" | "tsql" => Ok(Self::SqlServer),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            other => Err(Error::InvalidRequest(format!(
                "unknown dialect '{}' (expected sqlserver or postgres)",
                other
            ))),
        }
    }
}
