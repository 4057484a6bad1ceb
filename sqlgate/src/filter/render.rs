//! Rendering filter trees into dialect SQL
//!
//! Every literal is emitted as a `@__filter_N` placeholder; the text only
//! ever contains validated column names, fixed operator templates, and
//! placeholders.

use super::ast::{Comparison, Expr, Literal, MatchFunction, Operand, ScalarFunction};
use crate::query::{Dialect, Parameters, SqlValue};

/// Prefix reserved for parameters produced by the translator
pub const FILTER_PARAMETER_PREFIX: &str = "__filter_";

const LIKE_ESCAPE: char = '\\';

pub(crate) struct Renderer {
    dialect: Dialect,
    parameters: Parameters,
    next: usize,
}

impl Renderer {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            parameters: Parameters::new(),
            next: 0,
        }
    }

    pub fn finish(self) -> Parameters {
        self.parameters
    }

    pub fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::And(terms) => self.joined(terms, " AND "),
            Expr::Or(terms) => self.joined(terms, " OR "),
            Expr::Not(inner) => format!("NOT ({})", self.expr(inner)),
            Expr::Compare { left, op, right } => match right {
                Operand::Literal(Literal::Null) => {
                    let left = self.operand(left);
                    match op {
                        Comparison::NotEqual => format!("{} IS NOT NULL", left),
                        _ => format!("{} IS NULL", left),
                    }
                }
                _ => {
                    let left = self.operand(left);
                    let right = self.operand(right);
                    format!("{} {} {}", left, op, right)
                }
            },
            Expr::In { operand, values } => {
                let operand = self.operand(operand);
                let placeholders: Vec<String> =
                    values.iter().map(|v| self.bind(literal_value(v))).collect();
                format!("{} IN ({})", operand, placeholders.join(", "))
            }
            Expr::Match {
                function,
                operand,
                pattern,
            } => {
                let operand = self.operand(operand);
                let escaped = escape_like(pattern);
                let pattern = match function {
                    MatchFunction::Contains => format!("%{}%", escaped),
                    MatchFunction::StartsWith => format!("{}%", escaped),
                    MatchFunction::EndsWith => format!("%{}", escaped),
                };
                let placeholder = self.bind(SqlValue::Text(pattern));
                format!("{} LIKE {} ESCAPE '{}'", operand, placeholder, LIKE_ESCAPE)
            }
        }
    }

    fn joined(&mut self, terms: &[Expr], separator: &str) -> String {
        let parts: Vec<String> = terms.iter().map(|t| self.expr(t)).collect();
        format!("({})", parts.join(separator))
    }

    fn operand(&mut self, operand: &Operand) -> String {
        match operand {
            Operand::Field(name) => name.clone(),
            Operand::Literal(lit) => self.bind(literal_value(lit)),
            Operand::Call(function, inner) => {
                let inner = self.operand(inner);
                match function {
                    ScalarFunction::ToLower => format!("LOWER({})", inner),
                    ScalarFunction::ToUpper => format!("UPPER({})", inner),
                    ScalarFunction::Trim => self.dialect.trim(&inner),
                    ScalarFunction::Length => {
                        format!("{}({})", self.dialect.length_function(), inner)
                    }
                }
            }
        }
    }

    fn bind(&mut self, value: SqlValue) -> String {
        let name = format!("{}{}", FILTER_PARAMETER_PREFIX, self.next);
        self.next += 1;
        let placeholder = format!("@{}", name);
        self.parameters.insert(name, value);
        placeholder
    }
}

fn literal_value(lit: &Literal) -> SqlValue {
    match lit {
        Literal::Null => SqlValue::Null,
        Literal::Bool(b) => SqlValue::Bool(*b),
        Literal::Int(n) => SqlValue::Int(*n),
        Literal::Float(n) => SqlValue::Float(*n),
        Literal::Text(s) => SqlValue::Text(s.clone()),
        Literal::DateTime(t) => SqlValue::Timestamp(*t),
        Literal::Date(d) => SqlValue::Date(*d),
        Literal::Guid(u) => SqlValue::Uuid(*u),
    }
}

/// Escape LIKE wildcards so the pattern matches literally
fn escape_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        if matches!(ch, '%' | '_' | '[' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off[1]\\"), "50\\%\\_off\\[1]\\\\");
    }

    #[test]
    fn test_placeholders_are_sequential() {
        let mut renderer = Renderer::new(Dialect::SqlServer);
        let expr = Expr::In {
            operand: Operand::Field("id".into()),
            values: vec![Literal::Int(1), Literal::Int(2)],
        };
        assert_eq!(renderer.expr(&expr), "id IN (@__filter_0, @__filter_1)");
        let params = renderer.finish();
        assert_eq!(params.get("__filter_1"), Some(&SqlValue::Int(2)));
    }
}
