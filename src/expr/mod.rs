//! Sandboxed condition expressions.
//!
//! Switch outputs, If branches, and Filter rules carry author-supplied
//! condition strings such as `value.age >= 18 && value.active`. Instead of
//! compiling those to host code, this module interprets them over a
//! restricted grammar with a single bound variable (`value`):
//!
//! - literals: numbers, single- or double-quoted strings, `true`, `false`, `null`
//! - `value` plus dot/index member access (`value.items[0].name`)
//! - unary `!` and `-`
//! - comparisons `==  !=  <  <=  >  >=`
//! - boolean `&&` and `||` (short-circuiting)
//! - parentheses
//!
//! Conditions are data: they can be stored in graph JSON, analyzed, and
//! tested without ever evaluating arbitrary code.
//!
//! # Examples
//!
//! ```
//! use flowloom::expr::evaluate_predicate;
//! use serde_json::json;
//!
//! let hit = evaluate_predicate("value.age >= 18", &json!({"age": 20})).unwrap();
//! assert!(hit);
//!
//! let miss = evaluate_predicate("value == 'red' || value == 'blue'", &json!("green")).unwrap();
//! assert!(!miss);
//! ```

mod eval;
mod lexer;
mod parser;

pub use eval::{evaluate_expr, loose_eq, truthy};
pub use lexer::Token;
pub use parser::Expr;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while lexing, parsing, or evaluating a condition.
#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at position {pos}")]
    #[diagnostic(code(flowloom::expr::unexpected_char))]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal starting at position {pos}")]
    #[diagnostic(code(flowloom::expr::unterminated_string))]
    UnterminatedString { pos: usize },

    #[error("unexpected token {found} at position {pos}")]
    #[diagnostic(
        code(flowloom::expr::unexpected_token),
        help("conditions support literals, `value` member access, comparisons, `&&`, `||`, and parentheses")
    )]
    UnexpectedToken { found: String, pos: usize },

    #[error("unexpected end of expression")]
    #[diagnostic(code(flowloom::expr::unexpected_eof))]
    UnexpectedEof,

    #[error("unknown identifier '{name}'; the only bound variable is `value`")]
    #[diagnostic(code(flowloom::expr::unknown_identifier))]
    UnknownIdentifier { name: String, pos: usize },

    #[error("type mismatch in '{op}': {detail}")]
    #[diagnostic(code(flowloom::expr::type_mismatch))]
    TypeMismatch { op: &'static str, detail: String },
}

/// Parse a condition expression into its AST without evaluating it.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = lexer::lex(src)?;
    parser::parse_tokens(tokens)
}

/// Evaluate a condition expression with `value` bound.
pub fn evaluate(src: &str, value: &Value) -> Result<Value, ExprError> {
    let expr = parse(src)?;
    evaluate_expr(&expr, value)
}

/// Evaluate a condition expression and coerce the result to a boolean.
pub fn evaluate_predicate(src: &str, value: &Value) -> Result<bool, ExprError> {
    Ok(truthy(&evaluate(src, value)?))
}
