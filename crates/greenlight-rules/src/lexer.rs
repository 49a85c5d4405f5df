//! Lexer: tokenizes rule expressions
//!
//! Produces the token stream the parser consumes. The language is
//! deliberately small: dotted field paths, numeric/string/boolean
//! literals, comparison operators, and `and`/`or`.

use crate::errors::{RuleError, RuleResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The raw text of the token
    pub text: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

/// Token types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    And,
    Or,
    True,
    False,

    // Identifiers and literals
    Identifier,
    NumberLiteral,
    StringLiteral,

    // Comparison operators
    Gt,
    Gte,
    Lt,
    Lte,
    EqEq,
    NotEq,

    // End of input
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Identifier => write!(f, "identifier"),
            Self::NumberLiteral => write!(f, "number"),
            Self::StringLiteral => write!(f, "string literal"),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
            Self::EqEq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexer for rule expressions
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    /// Create a new lexer from input text
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> RuleResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
                break;
            }

            let (line, col) = (self.line, self.col);
            let ch = self.input[self.pos];

            let token = match ch {
                '>' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        Token::new(TokenKind::Gte, ">=", line, col)
                    } else {
                        Token::new(TokenKind::Gt, ">", line, col)
                    }
                }
                '<' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        Token::new(TokenKind::Lte, "<=", line, col)
                    } else {
                        Token::new(TokenKind::Lt, "<", line, col)
                    }
                }
                '=' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        Token::new(TokenKind::EqEq, "==", line, col)
                    } else {
                        return Err(RuleError::ParseError {
                            line,
                            col,
                            message: "expected '==' (single '=' is not an operator)".into(),
                        });
                    }
                }
                '!' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        Token::new(TokenKind::NotEq, "!=", line, col)
                    } else {
                        return Err(RuleError::ParseError {
                            line,
                            col,
                            message: "expected '!='".into(),
                        });
                    }
                }
                '\'' | '"' => self.lex_string(ch, line, col)?,
                c if c.is_ascii_digit() => self.lex_number(line, col),
                c if c.is_alphabetic() || c == '_' => self.lex_word(line, col),
                other => {
                    return Err(RuleError::ParseError {
                        line,
                        col,
                        message: format!("unexpected character '{}'", other),
                    });
                }
            };

            tokens.push(token);
        }

        Ok(tokens)
    }

    fn lex_string(&mut self, quote: char, line: usize, col: usize) -> RuleResult<Token> {
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.bump();
                    return Ok(Token::new(TokenKind::StringLiteral, text, line, col));
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
                None => {
                    return Err(RuleError::ParseError {
                        line,
                        col,
                        message: "unterminated string literal".into(),
                    });
                }
            }
        }
    }

    fn lex_number(&mut self, line: usize, col: usize) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || (c == '.' && !text.contains('.')) {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Token::new(TokenKind::NumberLiteral, text, line, col)
    }

    /// Identifiers may contain dots — `leave.days` addresses a nested
    /// payload field.
    fn lex_word(&mut self, line: usize, col: usize) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }

        let kind = match text.as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Identifier,
        };
        Token::new(kind, text, line, col)
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }
}
