//! Parser and evaluator for rule expressions
//!
//! Recursive descent over the token stream. Grammar:
//!
//! ```text
//! rule       := or_expr
//! or_expr    := and_expr ( "or" and_expr )*
//! and_expr   := comparison ( "and" comparison )*
//! comparison := IDENT op literal
//! op         := ">" | ">=" | "<" | "<=" | "==" | "!="
//! literal    := NUMBER | STRING | "true" | "false"
//! ```
//!
//! `and` binds tighter than `or`. Field identifiers use dots to address
//! nested payload fields (`leave.days`).

use crate::errors::{RuleError, RuleResult};
use crate::lexer::{Lexer, Token, TokenKind};
use serde_json::Value;

/// A parsed rule expression
#[derive(Clone, Debug, PartialEq)]
pub enum Rule {
    /// A single field-against-literal comparison
    Compare {
        field: String,
        op: CmpOp,
        value: Literal,
    },
    /// Both sub-rules must hold
    And(Box<Rule>, Box<Rule>),
    /// At least one sub-rule must hold
    Or(Box<Rule>, Box<Rule>),
}

/// Comparison operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
        }
    }
}

/// A literal on the right-hand side of a comparison
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Bool(bool),
}

impl Literal {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Bool(_) => "boolean",
        }
    }
}

impl Rule {
    /// Parse a rule expression from its source text
    pub fn parse(input: &str) -> RuleResult<Rule> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;
        if tokens.first().map(|t| t.kind) == Some(TokenKind::Eof) {
            return Err(RuleError::EmptyRule);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let rule = parser.parse_or()?;
        parser.expect(TokenKind::Eof)?;
        Ok(rule)
    }

    /// Evaluate the rule against a JSON payload.
    ///
    /// A field missing from the payload or an operator applied to a
    /// value of the wrong type is an error, not `false` — callers treat
    /// an unresolvable rule as an execution failure.
    pub fn evaluate(&self, payload: &Value) -> RuleResult<bool> {
        match self {
            Rule::And(lhs, rhs) => Ok(lhs.evaluate(payload)? && rhs.evaluate(payload)?),
            Rule::Or(lhs, rhs) => Ok(lhs.evaluate(payload)? || rhs.evaluate(payload)?),
            Rule::Compare { field, op, value } => {
                let actual = lookup(payload, field)
                    .ok_or_else(|| RuleError::UnknownField(field.clone()))?;
                compare(actual, *op, value)
            }
        }
    }
}

/// Resolve a dotted field path within the payload
fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn compare(actual: &Value, op: CmpOp, expected: &Literal) -> RuleResult<bool> {
    match (actual, expected) {
        (Value::Number(n), Literal::Number(rhs)) => {
            let lhs = n.as_f64().ok_or_else(|| RuleError::TypeMismatch {
                op: op.to_string(),
                lhs: "number".into(),
                rhs: expected.type_name().into(),
            })?;
            Ok(match op {
                CmpOp::Gt => lhs > *rhs,
                CmpOp::Gte => lhs >= *rhs,
                CmpOp::Lt => lhs < *rhs,
                CmpOp::Lte => lhs <= *rhs,
                CmpOp::Eq => lhs == *rhs,
                CmpOp::Ne => lhs != *rhs,
            })
        }
        (Value::String(lhs), Literal::String(rhs)) => match op {
            CmpOp::Eq => Ok(lhs == rhs),
            CmpOp::Ne => Ok(lhs != rhs),
            _ => Err(RuleError::TypeMismatch {
                op: op.to_string(),
                lhs: "string".into(),
                rhs: "string".into(),
            }),
        },
        (Value::Bool(lhs), Literal::Bool(rhs)) => match op {
            CmpOp::Eq => Ok(lhs == rhs),
            CmpOp::Ne => Ok(lhs != rhs),
            _ => Err(RuleError::TypeMismatch {
                op: op.to_string(),
                lhs: "boolean".into(),
                rhs: "boolean".into(),
            }),
        },
        _ => Err(RuleError::TypeMismatch {
            op: op.to_string(),
            lhs: json_type_name(actual).into(),
            rhs: expected.type_name().into(),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parser over the token stream
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse_or(&mut self) -> RuleResult<Rule> {
        let mut lhs = self.parse_and()?;
        while self.check(TokenKind::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Rule::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> RuleResult<Rule> {
        let mut lhs = self.parse_comparison()?;
        while self.check(TokenKind::And) {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Rule::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> RuleResult<Rule> {
        let field = self.expect(TokenKind::Identifier)?.text.clone();

        let op = match self.peek_kind() {
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Gte => CmpOp::Gte,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Lte => CmpOp::Lte,
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::Ne,
            _ => {
                let tok = self.peek();
                return Err(RuleError::UnexpectedToken {
                    expected: "comparison operator".into(),
                    found: tok.text.clone(),
                });
            }
        };
        self.advance();

        let value = match self.peek_kind() {
            TokenKind::NumberLiteral => {
                let tok = self.advance();
                let (line, col, text) = (tok.line, tok.col, tok.text.clone());
                let number = text.parse().map_err(|_| RuleError::ParseError {
                    line,
                    col,
                    message: format!("invalid number '{}'", text),
                })?;
                Literal::Number(number)
            }
            TokenKind::StringLiteral => Literal::String(self.advance().text.clone()),
            TokenKind::True => {
                self.advance();
                Literal::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                Literal::Bool(false)
            }
            TokenKind::Eof => return Err(RuleError::UnexpectedEof("literal".into())),
            _ => {
                let tok = self.peek();
                return Err(RuleError::UnexpectedToken {
                    expected: "literal".into(),
                    found: tok.text.clone(),
                });
            }
        };

        Ok(Rule::Compare { field, op, value })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> RuleResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            if tok.kind == TokenKind::Eof {
                Err(RuleError::UnexpectedEof(kind.to_string()))
            } else {
                Err(RuleError::UnexpectedToken {
                    expected: kind.to_string(),
                    found: tok.text.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple() {
        let rule = Rule::parse("days > 10").unwrap();
        assert_eq!(
            rule,
            Rule::Compare {
                field: "days".into(),
                op: CmpOp::Gt,
                value: Literal::Number(10.0),
            }
        );
    }

    #[test]
    fn test_evaluate_number_comparisons() {
        let payload = json!({"days": 15});
        assert!(Rule::parse("days > 10").unwrap().evaluate(&payload).unwrap());
        assert!(!Rule::parse("days > 20").unwrap().evaluate(&payload).unwrap());
        assert!(Rule::parse("days >= 15").unwrap().evaluate(&payload).unwrap());
        assert!(Rule::parse("days <= 15").unwrap().evaluate(&payload).unwrap());
        assert!(Rule::parse("days == 15").unwrap().evaluate(&payload).unwrap());
        assert!(Rule::parse("days != 10").unwrap().evaluate(&payload).unwrap());
    }

    #[test]
    fn test_evaluate_string_equality() {
        let payload = json!({"kind": "sick_leave"});
        assert!(Rule::parse("kind == 'sick_leave'")
            .unwrap()
            .evaluate(&payload)
            .unwrap());
        assert!(Rule::parse("kind != 'vacation'")
            .unwrap()
            .evaluate(&payload)
            .unwrap());
    }

    #[test]
    fn test_evaluate_bool() {
        let payload = json!({"urgent": true});
        assert!(Rule::parse("urgent == true")
            .unwrap()
            .evaluate(&payload)
            .unwrap());
        assert!(!Rule::parse("urgent == false")
            .unwrap()
            .evaluate(&payload)
            .unwrap());
    }

    #[test]
    fn test_nested_field_path() {
        let payload = json!({"leave": {"days": 7}});
        assert!(Rule::parse("leave.days < 10")
            .unwrap()
            .evaluate(&payload)
            .unwrap());
    }

    #[test]
    fn test_and_or_precedence() {
        // `a or b and c` parses as `a or (b and c)`
        let payload = json!({"a": 1, "b": 0, "c": 0});
        let rule = Rule::parse("a == 1 or b == 1 and c == 1").unwrap();
        assert!(rule.evaluate(&payload).unwrap());

        let payload = json!({"a": 0, "b": 1, "c": 0});
        assert!(!rule.evaluate(&payload).unwrap());
    }

    #[test]
    fn test_missing_field_is_error() {
        let payload = json!({"days": 3});
        let result = Rule::parse("hours > 1").unwrap().evaluate(&payload);
        assert!(matches!(result, Err(RuleError::UnknownField(_))));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let payload = json!({"kind": "vacation"});
        let result = Rule::parse("kind > 10").unwrap().evaluate(&payload);
        assert!(matches!(result, Err(RuleError::TypeMismatch { .. })));

        let result = Rule::parse("kind < 'z'").unwrap().evaluate(&payload);
        assert!(matches!(result, Err(RuleError::TypeMismatch { .. })));
    }

    #[test]
    fn test_empty_rule() {
        assert!(matches!(Rule::parse(""), Err(RuleError::EmptyRule)));
        assert!(matches!(Rule::parse("   "), Err(RuleError::EmptyRule)));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let result = Rule::parse("days > 10 days");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_literal() {
        let result = Rule::parse("days >");
        assert!(matches!(result, Err(RuleError::UnexpectedEof(_))));
    }
}
