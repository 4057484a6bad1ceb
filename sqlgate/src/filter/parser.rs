//! Recursive-descent parser for the filter grammar
//!
//! ```text
//! expr       := and_expr ("or" and_expr)*
//! and_expr   := unary ("and" unary)*
//! unary      := "not" unary | primary
//! primary    := "(" expr ")" | match_call [("eq" | "ne") bool] | comparison
//! comparison := operand (cmp operand | "in" "(" literal ("," literal)* ")")
//! operand    := literal | identifier | scalar_fn "(" operand ")"
//! ```

use super::ast::{Comparison, Expr, Literal, MatchFunction, Operand, ScalarFunction};
use super::error::TranslateError;
use super::keywords::statement_keyword;
use super::lexer::{Token, TokenKind};

/// Deepest nesting of parentheses, `not`, and scalar calls accepted
pub(crate) const MAX_DEPTH: usize = 128;

/// Words with grammatical meaning; none may be used as a column name
const GRAMMAR_WORDS: [&str; 13] = [
    "and", "or", "not", "in", "eq", "ne", "gt", "ge", "lt", "le", "true", "false", "null",
];

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse the whole token stream as one expression
    pub fn parse(mut self) -> Result<Expr, TranslateError> {
        if self.tokens.is_empty() {
            return Err(TranslateError::EmptyExpression);
        }
        let expr = self.or_expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(tok) => Err(TranslateError::UnexpectedToken {
                expected: "'and', 'or' or end of filter",
                found: tok.describe(),
                position: tok.position,
            }),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self, expected: &'static str) -> Result<Token, TranslateError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(TranslateError::UnexpectedEnd { expected })?;
        self.pos += 1;
        Ok(tok)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_word(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<(), TranslateError> {
        let tok = self.advance(expected)?;
        if tok.kind == kind {
            Ok(())
        } else {
            Err(TranslateError::UnexpectedToken {
                expected,
                found: tok.describe(),
                position: tok.position,
            })
        }
    }

    // Every recursive production goes through here, so the call stack stays
    // bounded no matter how the filter nests.
    fn nested<T>(
        &mut self,
        position: usize,
        parse: impl FnOnce(&mut Self) -> Result<T, TranslateError>,
    ) -> Result<T, TranslateError> {
        if self.depth >= MAX_DEPTH {
            return Err(TranslateError::NestingTooDeep {
                limit: MAX_DEPTH,
                position,
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn or_expr(&mut self) -> Result<Expr, TranslateError> {
        let mut terms = vec![self.and_expr()?];
        while self.eat_word("or") {
            terms.push(self.and_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn and_expr(&mut self) -> Result<Expr, TranslateError> {
        let mut terms = vec![self.unary()?];
        while self.eat_word("and") {
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn unary(&mut self) -> Result<Expr, TranslateError> {
        let not_at = self
            .peek()
            .filter(|t| t.is_word("not"))
            .map(|t| t.position);
        if let Some(position) = not_at {
            self.pos += 1;
            let inner = self.nested(position, Self::unary)?;
            return Ok(Expr::not(inner));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, TranslateError> {
        let tok = self
            .peek()
            .cloned()
            .ok_or(TranslateError::UnexpectedEnd { expected: "expression" })?;

        if tok.kind == TokenKind::LParen {
            self.pos += 1;
            let inner = self.nested(tok.position, Self::or_expr)?;
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(inner);
        }

        if let TokenKind::Ident(name) = &tok.kind {
            let is_call = self
                .peek_at(1)
                .is_some_and(|t| t.kind == TokenKind::LParen);
            if is_call && ScalarFunction::from_word(name).is_none() {
                return self.match_call(name, tok.position);
            }
        }

        self.comparison()
    }

    fn match_call(&mut self, name: &str, position: usize) -> Result<Expr, TranslateError> {
        let lowered = name.to_ascii_lowercase();
        let (function, fn_name, reversed) = match lowered.as_str() {
            "contains" => (MatchFunction::Contains, "contains", false),
            "substringof" => (MatchFunction::Contains, "substringof", true),
            "startswith" => (MatchFunction::StartsWith, "startswith", false),
            "endswith" => (MatchFunction::EndsWith, "endswith", false),
            _ => {
                return Err(TranslateError::UnknownFunction {
                    name: name.to_string(),
                    position,
                })
            }
        };

        self.pos += 1;
        let args = self.arguments()?;
        if args.len() != 2 {
            return Err(TranslateError::ArityMismatch {
                name: fn_name,
                expected: 2,
                found: args.len(),
            });
        }
        let mut args = args.into_iter();
        let (first, second) = match (args.next(), args.next()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(TranslateError::ArityMismatch {
                    name: fn_name,
                    expected: 2,
                    found: 0,
                })
            }
        };
        let (operand, pattern) = if reversed {
            (second, first)
        } else {
            (first, second)
        };
        let pattern = match pattern {
            Operand::Literal(Literal::Text(text)) => text,
            _ => {
                return Err(TranslateError::InvalidArgument {
                    name: fn_name,
                    expected: "a string literal pattern",
                })
            }
        };
        if matches!(operand, Operand::Literal(_)) {
            return Err(TranslateError::InvalidArgument {
                name: fn_name,
                expected: "a column or function of a column to search",
            });
        }

        let expr = Expr::Match {
            function,
            operand,
            pattern,
        };
        self.boolean_suffix(expr)
    }

    // `contains(x, 'a') eq true` and friends
    fn boolean_suffix(&mut self, expr: Expr) -> Result<Expr, TranslateError> {
        let negate_on_false = if self.eat_word("eq") {
            false
        } else if self.eat_word("ne") {
            true
        } else {
            return Ok(expr);
        };
        let tok = self.advance("true or false")?;
        let truth = if tok.is_word("true") {
            true
        } else if tok.is_word("false") {
            false
        } else {
            return Err(TranslateError::UnexpectedToken {
                expected: "true or false",
                found: tok.describe(),
                position: tok.position,
            });
        };
        Ok(if truth != negate_on_false {
            expr
        } else {
            Expr::not(expr)
        })
    }

    fn arguments(&mut self) -> Result<Vec<Operand>, TranslateError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek().is_some_and(|t| t.kind == TokenKind::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.operand()?);
            let tok = self.advance("',' or ')'")?;
            match tok.kind {
                TokenKind::Comma => continue,
                TokenKind::RParen => return Ok(args),
                _ => {
                    return Err(TranslateError::UnexpectedToken {
                        expected: "',' or ')'",
                        found: tok.describe(),
                        position: tok.position,
                    })
                }
            }
        }
    }

    fn comparison(&mut self) -> Result<Expr, TranslateError> {
        let left = self.operand()?;

        if self.eat_word("in") {
            let values = self.literal_list()?;
            return Ok(Expr::In {
                operand: left,
                values,
            });
        }

        let tok = self.advance("comparison operator")?;
        let op = match &tok.kind {
            TokenKind::Ident(word) => Comparison::from_word(word),
            _ => None,
        }
        .ok_or_else(|| TranslateError::UnexpectedToken {
            expected: "comparison operator",
            found: tok.describe(),
            position: tok.position,
        })?;
        let right = self.operand()?;

        match (left.is_null(), right.is_null()) {
            (false, false) => Ok(Expr::Compare { left, op, right }),
            (true, true) => Err(TranslateError::InvalidNullComparison),
            _ if !matches!(op, Comparison::Equal | Comparison::NotEqual) => {
                Err(TranslateError::InvalidNullComparison)
            }
            // Keep the null on the right so rendering only handles one shape.
            (true, false) => Ok(Expr::Compare {
                left: right,
                op: op.flipped(),
                right: left,
            }),
            (false, true) => Ok(Expr::Compare { left, op, right }),
        }
    }

    fn literal_list(&mut self) -> Result<Vec<Literal>, TranslateError> {
        let args = self.arguments()?;
        if args.is_empty() {
            return Err(TranslateError::EmptyList);
        }
        args.into_iter()
            .map(|arg| match arg {
                Operand::Literal(Literal::Null) => Err(TranslateError::InvalidNullComparison),
                Operand::Literal(lit) => Ok(lit),
                _ => Err(TranslateError::InvalidArgument {
                    name: "in",
                    expected: "a list of literal values",
                }),
            })
            .collect()
    }

    fn operand(&mut self) -> Result<Operand, TranslateError> {
        let tok = self.advance("column, literal or function")?;
        match tok.kind {
            TokenKind::Text(s) => Ok(Operand::Literal(Literal::Text(s))),
            TokenKind::Int(n) => Ok(Operand::Literal(Literal::Int(n))),
            TokenKind::Float(n) => Ok(Operand::Literal(Literal::Float(n))),
            TokenKind::DateTime(t) => Ok(Operand::Literal(Literal::DateTime(t))),
            TokenKind::Date(d) => Ok(Operand::Literal(Literal::Date(d))),
            TokenKind::Guid(u) => Ok(Operand::Literal(Literal::Guid(u))),
            TokenKind::Ident(word) => {
                let lowered = word.to_ascii_lowercase();
                match lowered.as_str() {
                    "true" => return Ok(Operand::Literal(Literal::Bool(true))),
                    "false" => return Ok(Operand::Literal(Literal::Bool(false))),
                    "null" => return Ok(Operand::Literal(Literal::Null)),
                    _ => {}
                }
                if let Some(function) = ScalarFunction::from_word(&word) {
                    if self.peek().is_some_and(|t| t.kind == TokenKind::LParen) {
                        let args = self.nested(tok.position, Self::arguments)?;
                        let found = args.len();
                        let mut args = args.into_iter();
                        return match (args.next(), found) {
                            (Some(arg), 1) => Ok(Operand::Call(function, Box::new(arg))),
                            _ => Err(TranslateError::ArityMismatch {
                                name: scalar_name(function),
                                expected: 1,
                                found,
                            }),
                        };
                    }
                }
                if let Some(keyword) = statement_keyword(&word) {
                    return Err(TranslateError::ReservedKeyword {
                        keyword: keyword.to_string(),
                    });
                }
                if GRAMMAR_WORDS.contains(&lowered.as_str()) {
                    return Err(TranslateError::UnexpectedToken {
                        expected: "column, literal or function",
                        found: format!("'{}'", word),
                        position: tok.position,
                    });
                }
                Ok(Operand::Field(word))
            }
            _ => Err(TranslateError::UnexpectedToken {
                expected: "column, literal or function",
                found: tok.describe(),
                position: tok.position,
            }),
        }
    }
}

fn scalar_name(function: ScalarFunction) -> &'static str {
    match function {
        ScalarFunction::ToLower => "tolower",
        ScalarFunction::ToUpper => "toupper",
        ScalarFunction::Trim => "trim",
        ScalarFunction::Length => "length",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::lexer::tokenize;

    fn parse(input: &str) -> Result<Expr, TranslateError> {
        Parser::new(tokenize(input)?.tokens).parse()
    }

    fn field(name: &str) -> Operand {
        Operand::Field(name.to_string())
    }

    #[test]
    fn test_simple_comparison() {
        assert_eq!(
            parse("age ge 18").unwrap(),
            Expr::Compare {
                left: field("age"),
                op: Comparison::GreaterThanOrEqual,
                right: Operand::Literal(Literal::Int(18)),
            }
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        match parse("a eq 1 or b eq 2 and c eq 3").unwrap() {
            Expr::Or(terms) => {
                assert_eq!(terms.len(), 2);
                assert!(matches!(&terms[1], Expr::And(inner) if inner.len() == 2));
            }
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_parentheses_and_not() {
        match parse("not (a eq 1 or b eq 2)").unwrap() {
            Expr::Not(inner) => assert!(matches!(*inner, Expr::Or(_))),
            other => panic!("expected Not, got {:?}", other),
        }
        assert!(matches!(parse("not not a eq 1").unwrap(), Expr::Compare { .. }));
    }

    #[test]
    fn test_null_moves_right() {
        assert_eq!(
            parse("null ne deleted_at").unwrap(),
            Expr::Compare {
                left: field("deleted_at"),
                op: Comparison::NotEqual,
                right: Operand::Literal(Literal::Null),
            }
        );
        assert_eq!(
            parse("age gt null"),
            Err(TranslateError::InvalidNullComparison)
        );
    }

    #[test]
    fn test_match_functions() {
        assert_eq!(
            parse("substringof('ab', name)").unwrap(),
            Expr::Match {
                function: MatchFunction::Contains,
                operand: field("name"),
                pattern: "ab".to_string(),
            }
        );
        assert!(matches!(
            parse("startswith(tolower(name), 'a') eq false").unwrap(),
            Expr::Not(_)
        ));
        assert!(matches!(
            parse("contains(name, other)"),
            Err(TranslateError::InvalidArgument { .. })
        ));
        assert!(matches!(
            parse("contains(name)"),
            Err(TranslateError::ArityMismatch { expected: 2, found: 1, .. })
        ));
        assert!(matches!(
            parse("sleep(10)"),
            Err(TranslateError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_in_list() {
        assert_eq!(
            parse("status in ('a', 'b')").unwrap(),
            Expr::In {
                operand: field("status"),
                values: vec![Literal::Text("a".into()), Literal::Text("b".into())],
            }
        );
        assert_eq!(parse("status in ()"), Err(TranslateError::EmptyList));
    }

    #[test]
    fn test_reserved_identifiers() {
        assert_eq!(
            parse("DeLeTe eq 1"),
            Err(TranslateError::ReservedKeyword {
                keyword: "DELETE".to_string()
            })
        );
        assert!(matches!(
            parse("and eq 1"),
            Err(TranslateError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn test_trailing_garbage() {
        assert!(matches!(
            parse("a eq 1 TABLE x"),
            Err(TranslateError::UnexpectedToken { position: 7, .. })
        ));
        assert_eq!(
            parse("a eq"),
            Err(TranslateError::UnexpectedEnd {
                expected: "column, literal or function"
            })
        );
    }
}
