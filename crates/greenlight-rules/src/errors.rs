//! Rule language error types

/// Errors that can occur while parsing or evaluating a rule
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Parse error at line {line}, column {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("Unexpected token: expected {expected}, found '{found}'")]
    UnexpectedToken { expected: String, found: String },

    #[error("Unexpected end of input: expected {0}")]
    UnexpectedEof(String),

    #[error("Unknown field '{0}' in payload")]
    UnknownField(String),

    #[error("Type mismatch: cannot apply '{op}' to {lhs} and {rhs}")]
    TypeMismatch {
        op: String,
        lhs: String,
        rhs: String,
    },

    #[error("Empty rule")]
    EmptyRule,
}

/// Result type alias for rule operations
pub type RuleResult<T> = Result<T, RuleError>;
