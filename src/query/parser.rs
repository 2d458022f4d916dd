//! Predicate parser
//!
//! Pratt parser over the token stream produced by [`Lexer`]. `OR` binds
//! loosest, then `AND`, then prefix `NOT`; comparisons are atoms.

use super::lexer::{Lexer, Token, TokenKind};
use super::{Comparison, Predicate};
use crate::error::QueryError;
use crate::value::Value;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, QueryError> {
        Ok(Self {
            tokens: Lexer::tokenize(source)?,
            pos: 0,
        })
    }

    /// Parse a complete predicate; trailing tokens are an error.
    pub fn parse(mut self) -> Result<Predicate, QueryError> {
        let predicate = self.parse_expr_bp(0)?;
        if !matches!(self.peek_kind(), TokenKind::Eof) {
            return Err(self.err_here(format!("unexpected {:?} after predicate", self.peek_kind())));
        }
        Ok(predicate)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Predicate, QueryError> {
        let mut lhs = self.parse_prefix()?;

        while let Some((l_bp, r_bp)) = self.infix_bp() {
            if l_bp < min_bp {
                break;
            }
            let op = self.advance_token().kind;
            let rhs = self.parse_expr_bp(r_bp)?;
            lhs = match op {
                TokenKind::And => Predicate::And(Box::new(lhs), Box::new(rhs)),
                _ => Predicate::Or(Box::new(lhs), Box::new(rhs)),
            };
        }

        Ok(lhs)
    }

    fn infix_bp(&self) -> Option<(u8, u8)> {
        match self.peek_kind() {
            TokenKind::Or => Some((1, 2)),
            TokenKind::And => Some((3, 4)),
            _ => None,
        }
    }

    fn parse_prefix(&mut self) -> Result<Predicate, QueryError> {
        let token = self.advance_token();
        match token.kind {
            TokenKind::Not => {
                let operand = self.parse_prefix()?;
                Ok(Predicate::Not(Box::new(operand)))
            }
            TokenKind::LeftParen => {
                let inner = self.parse_expr_bp(0)?;
                self.expect_kind(&TokenKind::RightParen)?;
                Ok(inner)
            }
            TokenKind::TruePredicate => Ok(Predicate::True),
            TokenKind::FalsePredicate => Ok(Predicate::False),
            TokenKind::Ident(key) => self.parse_comparison(key),
            TokenKind::Eof => Err(syntax(token.offset, "unexpected end of predicate")),
            other => Err(syntax(
                token.offset,
                format!("expected attribute name, got {:?}", other),
            )),
        }
    }

    fn parse_comparison(&mut self, key: String) -> Result<Predicate, QueryError> {
        let token = self.advance_token();
        let op = match token.kind {
            TokenKind::Eq => Comparison::Eq,
            TokenKind::Ne => Comparison::Ne,
            TokenKind::Lt => Comparison::Lt,
            TokenKind::Le => Comparison::Le,
            TokenKind::Gt => Comparison::Gt,
            TokenKind::Ge => Comparison::Ge,
            TokenKind::Contains => Comparison::Contains,
            TokenKind::BeginsWith => Comparison::BeginsWith,
            TokenKind::EndsWith => Comparison::EndsWith,
            TokenKind::In => return self.parse_in(key, false),
            TokenKind::Not => {
                self.expect_kind(&TokenKind::In)?;
                return self.parse_in(key, true);
            }
            other => {
                return Err(syntax(
                    token.offset,
                    format!("expected comparison operator after '{}', got {:?}", key, other),
                ))
            }
        };
        let value = self.parse_literal()?;
        Ok(Predicate::Compare { key, op, value })
    }

    /// `{a, b, c}` or `(a, b, c)`.
    fn parse_in(&mut self, key: String, negated: bool) -> Result<Predicate, QueryError> {
        let close = if self.eat_kind(&TokenKind::LeftBrace) {
            TokenKind::RightBrace
        } else if self.eat_kind(&TokenKind::LeftParen) {
            TokenKind::RightParen
        } else {
            return Err(self.err_here("expected '{' or '(' after IN"));
        };

        let mut values = Vec::new();
        if !self.at_kind(&close) {
            values.push(self.parse_literal()?);
            while self.eat_kind(&TokenKind::Comma) {
                values.push(self.parse_literal()?);
            }
        }
        self.expect_kind(&close)?;
        Ok(Predicate::In {
            key,
            values,
            negated,
        })
    }

    fn parse_literal(&mut self) -> Result<Value, QueryError> {
        let token = self.advance_token();
        match token.kind {
            TokenKind::Str(s) => Ok(Value::Text(s)),
            TokenKind::Integer(i) => Ok(Value::Integer(i)),
            TokenKind::Float(f) => Ok(Value::Double(f)),
            TokenKind::True => Ok(Value::Bool(true)),
            TokenKind::False => Ok(Value::Bool(false)),
            TokenKind::Nil => Ok(Value::Null),
            other => Err(syntax(
                token.offset,
                format!("expected literal, got {:?}", other),
            )),
        }
    }

    // Token helpers

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn peek_offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.offset)
    }

    fn advance_token(&mut self) -> Token {
        match self.tokens.get(self.pos) {
            Some(token) => {
                let token = token.clone();
                if token.kind != TokenKind::Eof {
                    self.pos += 1;
                }
                token
            }
            None => Token {
                kind: TokenKind::Eof,
                offset: self.peek_offset(),
            },
        }
    }

    fn at_kind(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn eat_kind(&mut self, kind: &TokenKind) -> bool {
        if self.at_kind(kind) {
            self.advance_token();
            true
        } else {
            false
        }
    }

    fn expect_kind(&mut self, expected: &TokenKind) -> Result<(), QueryError> {
        if self.eat_kind(expected) {
            Ok(())
        } else {
            Err(self.err_here(format!("expected {:?}, got {:?}", expected, self.peek_kind())))
        }
    }

    fn err_here(&self, message: impl Into<String>) -> QueryError {
        syntax(self.peek_offset(), message)
    }
}

fn syntax(position: usize, message: impl Into<String>) -> QueryError {
    QueryError::Syntax {
        position,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Predicate {
        Parser::new(source).unwrap().parse().unwrap()
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let predicate = parse("a == 1 OR b == 2 AND c == 3");
        let Predicate::Or(lhs, rhs) = predicate else {
            panic!("expected OR at the root");
        };
        assert!(matches!(*lhs, Predicate::Compare { .. }));
        assert!(matches!(*rhs, Predicate::And(_, _)));
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let predicate = parse("(a == 1 || b == 2) && c == 3");
        assert!(matches!(predicate, Predicate::And(_, _)));
    }

    #[test]
    fn test_not_applies_to_following_atom() {
        let predicate = parse("NOT done == true AND a == 1");
        let Predicate::And(lhs, _) = predicate else {
            panic!("expected AND at the root");
        };
        assert!(matches!(*lhs, Predicate::Not(_)));
    }

    #[test]
    fn test_in_lists() {
        assert_eq!(
            parse("status IN {'open', 'closed'}"),
            Predicate::In {
                key: "status".into(),
                values: vec![Value::Text("open".into()), Value::Text("closed".into())],
                negated: false,
            }
        );
        assert_eq!(
            parse("id NOT IN (1, 2)"),
            Predicate::In {
                key: "id".into(),
                values: vec![Value::Integer(1), Value::Integer(2)],
                negated: true,
            }
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            parse("x == nil"),
            Predicate::Compare {
                key: "x".into(),
                op: Comparison::Eq,
                value: Value::Null,
            }
        );
        assert_eq!(
            parse("x >= -2.5"),
            Predicate::Compare {
                key: "x".into(),
                op: Comparison::Ge,
                value: Value::Double(-2.5),
            }
        );
    }

    #[test]
    fn test_constant_predicates() {
        assert_eq!(parse("TRUEPREDICATE"), Predicate::True);
        assert_eq!(parse("falsepredicate"), Predicate::False);
    }

    #[test]
    fn test_errors_carry_position() {
        let err = Parser::new("name ==").unwrap().parse().unwrap_err();
        assert!(matches!(err, QueryError::Syntax { position: 7, .. }));

        let err = Parser::new("name == 'a' extra").unwrap().parse().unwrap_err();
        assert!(matches!(err, QueryError::Syntax { position: 12, .. }));

        let err = Parser::new("== 'a'").unwrap().parse().unwrap_err();
        assert!(matches!(err, QueryError::Syntax { position: 0, .. }));

        assert!(Parser::new("(a == 1").unwrap().parse().is_err());
        assert!(Parser::new("").unwrap().parse().is_err());
    }
}
