//! Comparison-rule mini-language for workflow policy checks
//!
//! Policy-check and condition nodes carry a small boolean expression
//! over the instance's trigger payload (`days > 10`,
//! `kind == 'sick_leave' and days <= 3`). This crate parses those
//! expressions once at publish time (validation) and evaluates them at
//! execution time against the payload JSON.
//!
//! # Example
//!
//! ```rust
//! use greenlight_rules::Rule;
//!
//! let rule = Rule::parse("days > 10").unwrap();
//! assert!(rule.evaluate(&serde_json::json!({"days": 15})).unwrap());
//! assert!(!rule.evaluate(&serde_json::json!({"days": 5})).unwrap());
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod lexer;
pub mod parser;

pub use errors::{RuleError, RuleResult};
pub use parser::{CmpOp, Literal, Rule};
