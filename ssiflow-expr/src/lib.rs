//! Ssiflow Expression Engine
//!
//! Evaluates the boolean expressions carried by `#if` and `#elif`
//! directives: string literals with variable interpolation, comparison
//! and regex-match operators, `&&`/`||`/`!`, and parentheses.
//!
//! All comparison operators share one precedence level; `&&` and `||`
//! share a lower one; `!` binds tightest; parentheses override. Both
//! sides of a connective are always evaluated (no short-circuiting).

pub mod eval;
pub mod token;

pub use eval::{eval_expr, ExprError, ExprResult};
pub use token::{Token, Tokenizer};
