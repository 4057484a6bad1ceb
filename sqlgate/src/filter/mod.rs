//! Filter-expression to SQL predicate translation
//!
//! Filters use an OData-style grammar (`eq`, `ne`, `gt`, `ge`, `lt`, `le`,
//! `and`, `or`, `not`, `in`, `contains`, `startswith`, `endswith`,
//! `substringof`, `tolower`, `toupper`, `trim`, `length`) with string,
//! number, boolean, null, date, datetime and guid literals. The filter is parsed
//! into a tree and rendered from fixed templates, with every literal bound as
//! a parameter, so caller text never reaches the statement verbatim.
//!
//! The result is a [`PredicateFragment`] of the form `AND <expression>`,
//! ready to be appended after a `WHERE 1=1` base predicate.
//!
//! # Example
//!
//! ```rust
//! use sqlgate::filter::translate;
//! use sqlgate::query::SqlValue;
//!
//! let fragment = translate("name eq 'a' and age ge 18").unwrap();
//! assert_eq!(
//!     fragment.as_sql(),
//!     "AND (name = @__filter_0 AND age >= @__filter_1)"
//! );
//! assert_eq!(fragment.parameters().get("__filter_0"), Some(&SqlValue::from("a")));
//!
//! assert!(translate("   ").unwrap().is_empty());
//! ```

mod ast;
mod error;
mod keywords;
mod lexer;
mod parser;
mod render;

use std::fmt;

pub use ast::{Comparison, Expr, Literal, MatchFunction, Operand, ScalarFunction};
pub use error::TranslateError;
pub use keywords::{find_statement_keyword, statement_keyword, STATEMENT_KEYWORDS};
pub use render::FILTER_PARAMETER_PREFIX;

use crate::query::{Dialect, Parameters};

/// A sanitized boolean SQL fragment produced from a filter
///
/// Only [`Translator`] constructs non-empty fragments. A non-empty fragment
/// always starts with `AND ` and never contains a statement-altering keyword
/// as a whole token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateFragment {
    sql: String,
    parameters: Parameters,
}

impl PredicateFragment {
    /// The empty fragment: nothing to append
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether there is no predicate to append
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// Fragment text, either empty or `AND <expression>`
    pub fn as_sql(&self) -> &str {
        &self.sql
    }

    /// Values bound to the fragment's placeholders
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Split into text and parameters
    pub fn into_parts(self) -> (String, Parameters) {
        (self.sql, self.parameters)
    }
}

impl fmt::Display for PredicateFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Parse a filter into its expression tree without rendering it
///
/// Returns `Ok(None)` for an empty or whitespace-only filter.
pub fn parse(filter: &str) -> Result<Option<Expr>, TranslateError> {
    if filter.trim().is_empty() {
        return Ok(None);
    }
    let lexed = lexer::tokenize(filter)?;
    if let Some(at) = lexed.terminated_at {
        tracing::warn!(
            position = at,
            "Discarding text after statement terminator in filter"
        );
    }
    parser::Parser::new(lexed.tokens).parse().map(Some)
}

/// Translate a filter for the default (SQL Server) dialect
pub fn translate(filter: &str) -> Result<PredicateFragment, TranslateError> {
    Translator::new(Dialect::default()).translate(filter)
}

/// Filter translator bound to a target dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct Translator {
    dialect: Dialect,
}

impl Translator {
    /// Create a translator for `dialect`
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Target dialect
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Translate `filter` into a predicate fragment
    ///
    /// Empty or whitespace-only input yields [`PredicateFragment::empty`].
    /// Input that does not parse is a [`TranslateError`]; it is never passed
    /// through.
    pub fn translate(&self, filter: &str) -> Result<PredicateFragment, TranslateError> {
        let Some(expr) = parse(filter)? else {
            return Ok(PredicateFragment::empty());
        };

        let mut renderer = render::Renderer::new(self.dialect);
        let sql = format!("AND {}", renderer.expr(&expr));

        if let Some(keyword) = find_statement_keyword(&sql) {
            tracing::error!(keyword, "Statement keyword survived filter rendering");
            return Err(TranslateError::ReservedKeyword {
                keyword: keyword.to_string(),
            });
        }

        tracing::debug!(predicate = %sql, "Translated filter");
        Ok(PredicateFragment {
            sql,
            parameters: renderer.finish(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SqlValue;

    #[test]
    fn test_empty_and_whitespace_filters() {
        assert!(translate("").unwrap().is_empty());
        assert!(translate(" \t\n ").unwrap().is_empty());
        assert_eq!(translate("  ").unwrap().as_sql(), "");
    }

    #[test]
    fn test_fragment_prefixed_with_and() {
        let fragment = translate("price lt 10.5").unwrap();
        assert_eq!(fragment.as_sql(), "AND price < @__filter_0");
        assert_eq!(
            fragment.parameters().get("__filter_0"),
            Some(&SqlValue::Float(10.5))
        );
    }

    #[test]
    fn test_or_is_grouped() {
        let fragment = translate("a eq 1 or b eq 2").unwrap();
        assert_eq!(fragment.as_sql(), "AND (a = @__filter_0 OR b = @__filter_1)");
    }

    #[test]
    fn test_null_comparisons() {
        assert_eq!(
            translate("deleted_at eq null").unwrap().as_sql(),
            "AND deleted_at IS NULL"
        );
        let fragment = translate("deleted_at ne null").unwrap();
        assert_eq!(fragment.as_sql(), "AND deleted_at IS NOT NULL");
        assert!(fragment.parameters().is_empty());
    }

    #[test]
    fn test_match_functions_bind_escaped_patterns() {
        let fragment = translate("contains(name, '50%') and not endswith(code, 'x')").unwrap();
        assert_eq!(
            fragment.as_sql(),
            "AND (name LIKE @__filter_0 ESCAPE '\\' AND NOT (code LIKE @__filter_1 ESCAPE '\\'))"
        );
        assert_eq!(
            fragment.parameters().get("__filter_0"),
            Some(&SqlValue::from("%50\\%%"))
        );
        assert_eq!(
            fragment.parameters().get("__filter_1"),
            Some(&SqlValue::from("%x"))
        );
    }

    #[test]
    fn test_scalar_functions_per_dialect() {
        let filter = "length(trim(name)) gt 3";
        assert_eq!(
            Translator::new(Dialect::SqlServer)
                .translate(filter)
                .unwrap()
                .as_sql(),
            "AND LEN(LTRIM(RTRIM(name))) > @__filter_0"
        );
        assert_eq!(
            Translator::new(Dialect::Postgres)
                .translate(filter)
                .unwrap()
                .as_sql(),
            "AND LENGTH(TRIM(name)) > @__filter_0"
        );
    }

    #[test]
    fn test_statement_keywords_never_reach_fragment() {
        let inputs = [
            "name eq 'x' or DrOp eq 1",
            "delete eq 1",
            "name eq 'insert' and tolower(code) eq 'TRUNCATE'",
            "name eq 'a'; exec sp_who",
            "name eq 'a'; ExEcUtE('x')",
            "name eq 'a' update x",
        ];
        for input in inputs {
            if let Ok(fragment) = translate(input) {
                assert_eq!(
                    find_statement_keyword(fragment.as_sql()),
                    None,
                    "keyword leaked for {:?}",
                    input
                );
            }
        }
    }

    #[test]
    fn test_keyword_inside_literal_is_bound_not_rendered() {
        let fragment = translate("comment eq 'please DROP it'").unwrap();
        assert_eq!(fragment.as_sql(), "AND comment = @__filter_0");
        assert_eq!(
            fragment.parameters().get("__filter_0"),
            Some(&SqlValue::from("please DROP it"))
        );
    }

    #[test]
    fn test_identifiers_containing_keywords_are_kept() {
        let fragment = translate("updated_at gt 2024-01-01 and dropped eq false").unwrap();
        assert_eq!(
            fragment.as_sql(),
            "AND (updated_at > @__filter_0 AND dropped = @__filter_1)"
        );
    }

    #[test]
    fn test_typed_literals_bind_typed_values() {
        let fragment = translate(
            "created_at ge 2024-01-01T00:00:00Z and owner_id eq guid'c56a4180-65aa-42ec-a945-5fd21dec0538'",
        )
        .unwrap();
        assert!(matches!(
            fragment.parameters().get("__filter_0"),
            Some(SqlValue::Timestamp(_))
        ));
        assert!(matches!(
            fragment.parameters().get("__filter_1"),
            Some(SqlValue::Uuid(_))
        ));

        let fragment = translate("day in (2024-01-01, 2024-01-02)").unwrap();
        assert_eq!(fragment.as_sql(), "AND day IN (@__filter_0, @__filter_1)");
        assert!(matches!(
            fragment.parameters().get("__filter_1"),
            Some(SqlValue::Date(_))
        ));
    }

    #[test]
    fn test_deep_parentheses_are_rejected() {
        let filter = format!("{}a eq 1{}", "(".repeat(20_000), ")".repeat(20_000));
        assert_eq!(
            translate(&filter),
            Err(TranslateError::NestingTooDeep {
                limit: 128,
                position: 128,
            })
        );
    }

    #[test]
    fn test_deep_negation_is_rejected() {
        let filter = format!("{}a eq 1", "not ".repeat(100_000));
        assert!(matches!(
            translate(&filter),
            Err(TranslateError::NestingTooDeep { position: 512, .. })
        ));
    }

    #[test]
    fn test_deep_function_calls_are_rejected() {
        let filter = format!("{}a{} eq 'x'", "tolower(".repeat(5_000), ")".repeat(5_000));
        assert!(matches!(
            translate(&filter),
            Err(TranslateError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn test_nesting_within_limit_translates() {
        let filter = format!("{}a eq 1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(translate(&filter).unwrap().as_sql(), "AND a = @__filter_0");
    }

    #[test]
    fn test_trailing_statement_is_discarded() {
        let fragment = translate("name eq 'a'; DROP TABLE x").unwrap();
        assert_eq!(fragment.as_sql(), "AND name = @__filter_0");
    }

    #[test]
    fn test_only_terminated_text_is_malformed() {
        assert_eq!(
            translate("; DROP TABLE x"),
            Err(TranslateError::EmptyExpression)
        );
    }

    #[test]
    fn test_malformed_filters_fail() {
        assert!(translate("name eq").is_err());
        assert!(translate("name = 'a'").is_err());
        assert!(translate("(name eq 'a'").is_err());
        assert!(translate("name eq 'a' DROP TABLE x").is_err());
    }

    #[test]
    fn test_translation_is_deterministic() {
        let filter = "a in (1, 2, 3) and contains(b, 'q')";
        assert_eq!(translate(filter).unwrap(), translate(filter).unwrap());
    }
}
