//! Filter expression tree

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate};
use uuid::Uuid;

/// Comparison operators of the filter grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `eq`
    Equal,
    /// `ne`
    NotEqual,
    /// `gt`
    GreaterThan,
    /// `ge`
    GreaterThanOrEqual,
    /// `lt`
    LessThan,
    /// `le`
    LessThanOrEqual,
}

impl Comparison {
    pub(crate) fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "eq" => Some(Self::Equal),
            "ne" => Some(Self::NotEqual),
            "gt" => Some(Self::GreaterThan),
            "ge" => Some(Self::GreaterThanOrEqual),
            "lt" => Some(Self::LessThan),
            "le" => Some(Self::LessThanOrEqual),
            _ => None,
        }
    }

    /// Operator with its operands swapped (`5 lt age` becomes `age gt 5`)
    pub(crate) fn flipped(self) -> Self {
        match self {
            Self::Equal => Self::Equal,
            Self::NotEqual => Self::NotEqual,
            Self::GreaterThan => Self::LessThan,
            Self::GreaterThanOrEqual => Self::LessThanOrEqual,
            Self::LessThan => Self::GreaterThan,
            Self::LessThanOrEqual => Self::GreaterThanOrEqual,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "<>"),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
        }
    }
}

/// Pattern-matching functions that evaluate to a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFunction {
    /// `contains(field, 'x')` and `substringof('x', field)`
    Contains,
    /// `startswith(field, 'x')`
    StartsWith,
    /// `endswith(field, 'x')`
    EndsWith,
}

/// Functions applied to an operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    /// `tolower(x)`
    ToLower,
    /// `toupper(x)`
    ToUpper,
    /// `trim(x)`
    Trim,
    /// `length(x)`
    Length,
}

impl ScalarFunction {
    pub(crate) fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "tolower" => Some(Self::ToLower),
            "toupper" => Some(Self::ToUpper),
            "trim" => Some(Self::Trim),
            "length" => Some(Self::Length),
            _ => None,
        }
    }
}

/// Literal values; each one becomes a bound parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Guid(Uuid),
}

/// Value-producing side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Column of the derived table
    Field(String),
    Literal(Literal),
    Call(ScalarFunction, Box<Operand>),
}

impl Operand {
    pub(crate) fn is_null(&self) -> bool {
        matches!(self, Self::Literal(Literal::Null))
    }
}

/// Boolean filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        left: Operand,
        op: Comparison,
        right: Operand,
    },
    In {
        operand: Operand,
        values: Vec<Literal>,
    },
    Match {
        function: MatchFunction,
        operand: Operand,
        pattern: String,
    },
}

impl Expr {
    /// Negate an expression, collapsing double negation
    #[allow(clippy::should_implement_trait)]
    pub fn not(e: Expr) -> Expr {
        match e {
            Expr::Not(inner) => *inner,
            other => Expr::Not(Box::new(other)),
        }
    }
}
