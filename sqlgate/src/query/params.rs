//! Bound values and named statement parameters
//!
//! Statements produced by this crate carry their values out-of-band: the text
//! only ever contains `@name` placeholders. Backends that speak a positional
//! protocol rewrite those placeholders with [`Parameters::bind_positional`].
//!
//! # Example
//!
//! ```rust
//! use sqlgate::query::{Parameters, SqlValue};
//!
//! let params = Parameters::new()
//!     .with("status", "active")
//!     .with("min_age", 18_i64);
//!
//! let (text, values) = params
//!     .bind_positional("SELECT * FROM users WHERE status = @status AND age >= @min_age")
//!     .unwrap();
//! assert_eq!(text, "SELECT * FROM users WHERE status = $1 AND age >= $2");
//! assert_eq!(values, vec![SqlValue::from("active"), SqlValue::Int(18)]);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A single value bound to a statement parameter or read from a result column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Boolean / bit value
    Bool(bool),
    /// 64-bit integer value
    Int(i64),
    /// 64-bit floating point value
    Float(f64),
    /// Character data
    Text(String),
    /// Point in time with its UTC offset
    Timestamp(DateTime<FixedOffset>),
    /// Calendar date
    Date(NaiveDate),
    /// UUID / uniqueidentifier
    Uuid(Uuid),
    /// Structured JSON document
    Json(serde_json::Value),
}

impl SqlValue {
    /// Returns true for SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert into a JSON value for serde-based row mapping
    ///
    /// Non-finite floats have no JSON representation and map to `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Self::Date(d) => serde_json::Value::String(d.to_string()),
            Self::Uuid(u) => serde_json::Value::String(u.to_string()),
            Self::Json(v) => v.clone(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Timestamp(t) => write!(f, "'{}'", t.to_rfc3339()),
            Self::Date(d) => write!(f, "'{}'", d),
            Self::Uuid(u) => write!(f, "'{}'", u),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for SqlValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for SqlValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<DateTime<FixedOffset>> for SqlValue {
    fn from(t: DateTime<FixedOffset>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t.into())
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl From<Uuid> for SqlValue {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Named statement parameters
///
/// Names are stored without the `@` sigil and iterate in sorted order, so two
/// statements built from the same inputs bind identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, SqlValue>);

impl Parameters {
    /// Create an empty parameter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, builder style
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a parameter; a leading `@` on the name is ignored
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        let name = name.into();
        let name = name.strip_prefix('@').map(str::to_string).unwrap_or(name);
        self.0.insert(name, value.into());
    }

    /// Look up a parameter by name (with or without `@`)
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.0.get(name.strip_prefix('@').unwrap_or(name))
    }

    /// Whether a parameter with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(name, value)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `other` into this set, failing on any duplicate name
    pub fn merge(&mut self, other: Parameters) -> Result<()> {
        for (name, value) in other.0 {
            if self.0.contains_key(&name) {
                return Err(Error::InvalidRequest(format!(
                    "parameter '@{}' is defined twice",
                    name
                )));
            }
            self.0.insert(name, value);
        }
        Ok(())
    }

    /// Check that every name is a plain identifier
    pub fn validate_names(&self) -> Result<()> {
        match self.0.keys().find(|name| !is_identifier(name)) {
            Some(bad) => Err(Error::InvalidRequest(format!(
                "parameter name '{}' is not a valid identifier",
                bad
            ))),
            None => Ok(()),
        }
    }

    /// Rewrite `@name` placeholders in `text` to `$1..$n` and order the values to match
    ///
    /// A name used more than once reuses its first position. Placeholders inside
    /// single-quoted literals, double-quoted identifiers, and `@@` system
    /// variables are left untouched. A placeholder with no matching parameter
    /// is an invalid-request error.
    pub fn bind_positional(&self, text: &str) -> Result<(String, Vec<SqlValue>)> {
        let mut out = String::with_capacity(text.len());
        let mut order: Vec<&str> = Vec::new();
        let bytes = text.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                quote @ (b'\'' | b'"') => {
                    let end = closing_quote(bytes, i, quote);
                    out.push_str(&text[i..end]);
                    i = end;
                }
                b'@' if bytes.get(i + 1) == Some(&b'@') => {
                    let end = identifier_end(bytes, i + 2);
                    out.push_str(&text[i..end]);
                    i = end;
                }
                b'@' if bytes.get(i + 1).is_some_and(|b| is_identifier_start(*b)) => {
                    let end = identifier_end(bytes, i + 1);
                    let name = &text[i + 1..end];
                    if !self.contains(name) {
                        return Err(Error::InvalidRequest(format!(
                            "statement references undefined parameter '@{}'",
                            name
                        )));
                    }
                    let position = match order.iter().position(|n| *n == name) {
                        Some(existing) => existing + 1,
                        None => {
                            order.push(name);
                            order.len()
                        }
                    };
                    out.push('$');
                    out.push_str(&position.to_string());
                    i = end;
                }
                _ => {
                    let ch_len = text[i..].chars().next().map_or(1, char::len_utf8);
                    out.push_str(&text[i..i + ch_len]);
                    i += ch_len;
                }
            }
        }

        let values = order
            .into_iter()
            .filter_map(|name| self.get(name).cloned())
            .collect();
        Ok((out, values))
    }
}

impl<K: Into<String>, V: Into<SqlValue>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Parameters::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// Whether `text` is a plain `[A-Za-z_][A-Za-z0-9_]*` identifier
pub(crate) fn is_identifier(text: &str) -> bool {
    let mut bytes = text.bytes();
    matches!(bytes.next(), Some(b) if is_identifier_start(b))
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn is_identifier_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn identifier_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    end
}

// Doubled quotes inside a quoted run are escapes, not terminators.
fn closing_quote(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_strips_sigil() {
        let mut params = Parameters::new();
        params.insert("@id", 7_i64);
        assert_eq!(params.get("id"), Some(&SqlValue::Int(7)));
        assert_eq!(params.get("@id"), Some(&SqlValue::Int(7)));
    }

    #[test]
    fn test_merge_rejects_duplicates() {
        let mut left = Parameters::new().with("a", 1_i64);
        let right = Parameters::new().with("a", 2_i64);
        let err = left.merge(right).unwrap_err();
        assert!(err.is_caller_input());
    }

    #[test]
    fn test_validate_names() {
        assert!(Parameters::new().with("user_id", 1_i64).validate_names().is_ok());
        assert!(Parameters::new()
            .with("x; drop", 1_i64)
            .validate_names()
            .is_err());
    }

    #[test]
    fn test_bind_positional_reuses_positions() {
        let params = Parameters::new().with("a", 1_i64).with("b", "x");
        let (text, values) = params
            .bind_positional("WHERE x = @a OR y = @b OR z = @a")
            .unwrap();
        assert_eq!(text, "WHERE x = $1 OR y = $2 OR z = $1");
        assert_eq!(values, vec![SqlValue::Int(1), SqlValue::from("x")]);
    }

    #[test]
    fn test_bind_positional_skips_literals_and_system_variables() {
        let params = Parameters::new().with("name", "bob");
        let (text, values) = params
            .bind_positional("SELECT '@name', \"@odd\", @@ROWCOUNT, 'it''s @x' WHERE n = @name")
            .unwrap();
        assert_eq!(
            text,
            "SELECT '@name', \"@odd\", @@ROWCOUNT, 'it''s @x' WHERE n = $1"
        );
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_bind_positional_missing_parameter() {
        let err = Parameters::new().bind_positional("WHERE id = @id").unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_sql_value_to_json() {
        assert_eq!(SqlValue::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(SqlValue::from("a").to_json(), serde_json::json!("a"));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);

        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(SqlValue::from(date).to_json(), serde_json::json!("2024-03-01"));
        let id = Uuid::nil();
        assert_eq!(
            SqlValue::from(id).to_json(),
            serde_json::json!("00000000-0000-0000-0000-000000000000")
        );
    }

    #[test]
    fn test_strings_deserialize_as_text() {
        let value: SqlValue = serde_json::from_str("\"2024-03-01\"").unwrap();
        assert_eq!(value, SqlValue::from("2024-03-01"));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("_id"));
        assert!(is_identifier("created_at2"));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
