//! Typed expression trees, their errors, and the evaluation backend.
//!
//! This module provides:
//! - Typed tree node definitions with builder helpers
//! - Parse and evaluation error types
//! - A tree-walking evaluator for compiled expressions and lambdas

pub mod error;
pub mod eval;
pub mod node;

pub use error::{EvalError, EvalResult, ParseError, ParseErrorKind, ParseResult};
pub use eval::{convert_value, evaluate, invoke_lambda, Evaluator};
pub use node::{
    BinaryOp, Expr, ExprKind, LambdaExpr, LiteralId, LiteralTable, OrderingDirective, ParamDef,
    ParamRef, SeqOp, UnaryOp,
};
