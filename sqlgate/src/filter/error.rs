//! Translation errors

use thiserror::Error;

/// A filter expression that could not be translated
///
/// Positions are byte offsets into the original filter string.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    /// The filter had text, but none of it formed an expression
    #[error("filter contains no expression")]
    EmptyExpression,

    /// A character outside the filter grammar
    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedCharacter { ch: char, position: usize },

    /// A string literal with no closing quote
    #[error("unterminated string literal starting at position {position}")]
    UnterminatedString { position: usize },

    /// A numeric literal that does not fit the supported numeric types
    #[error("invalid number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },

    /// A date, datetime, or guid literal that does not parse
    #[error("invalid {kind} literal '{text}' at position {position}")]
    InvalidLiteral {
        kind: &'static str,
        text: String,
        position: usize,
    },

    /// The parser expected something else at this point
    #[error("expected {expected} but found {found} at position {position}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        position: usize,
    },

    /// Parentheses, `not`, or function calls nested past the parser's limit
    #[error("filter nests deeper than {limit} levels at position {position}")]
    NestingTooDeep { limit: usize, position: usize },

    /// The input ended while the parser still expected more
    #[error("unexpected end of filter, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    /// A function name outside the supported set
    #[error("unknown function '{name}' at position {position}")]
    UnknownFunction { name: String, position: usize },

    /// A function called with the wrong number of arguments
    #[error("function '{name}' expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    /// A function argument of the wrong kind (e.g. a column where text is required)
    #[error("function '{name}' requires {expected}")]
    InvalidArgument {
        name: &'static str,
        expected: &'static str,
    },

    /// `null` used with an ordering comparison
    #[error("null can only be compared with eq or ne")]
    InvalidNullComparison,

    /// `in` with an empty value list
    #[error("'in' requires at least one value")]
    EmptyList,

    /// A statement-altering keyword found where only identifiers are allowed
    #[error("'{keyword}' is a reserved statement keyword and cannot appear in a filter")]
    ReservedKeyword { keyword: String },
}
