//! dynquery compiles short string expressions into strongly typed,
//! executable expression trees bound to a host type model.
//!
//! Embedders register their classes and enums with a [`TypeRegistry`],
//! build an [`Engine`], and hand it user-supplied filters, selectors and
//! orderings such as `City = @0 and Orders.Count >= @1`. The engine lexes,
//! parses and type-checks the text in one pass and returns typed trees or
//! lambdas ready for evaluation.

pub mod binder;
pub mod engine;
pub mod expression;
pub mod query;
pub mod runtime;
pub mod syntax;
pub mod types;

pub use engine::Engine;
pub use expression::{
    evaluate, invoke_lambda, EvalError, Expr, LambdaExpr, OrderingDirective, ParamDef, ParamRef,
    ParseError, ParseErrorKind,
};
pub use query::{GroupResult, Query};
pub use runtime::{DynamicProperty, Instance, Value};
pub use syntax::Binding;
pub use types::{ClassBuilder, EnumDef, Ty, TypeRegistry};
