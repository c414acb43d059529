//! Typed expression tree definitions.
//!
//! Every node carries the `Ty` it evaluates to; the parser only ever emits
//! nodes whose operands were already promoted to the operator's signature,
//! so evaluation never re-checks operand types beyond variant matching.

use std::sync::Arc;

use crate::runtime::value::Value;
use crate::types::class::{CtorDef, MethodDef};
use crate::types::ty::{ClassRef, Ty};

/// A lambda parameter; nodes referring to it share one allocation so
/// binding at evaluation time is identity-based.
#[derive(Debug)]
pub struct ParamDef {
    pub name: String,
    pub ty: Ty,
}

pub type ParamRef = Arc<ParamDef>;

impl ParamDef {
    pub fn new(name: impl Into<String>, ty: Ty) -> ParamRef {
        Arc::new(ParamDef {
            name: name.into(),
            ty,
        })
    }
}

/// Key into the parse-local table of original literal texts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralId(pub u32);

/// Parse-local retention of literal source texts. A constant produced from
/// a literal keeps its id so narrowing promotions can re-parse the original
/// spelling; the table is dropped with the parser.
#[derive(Debug, Default)]
pub struct LiteralTable {
    texts: Vec<String>,
}

impl LiteralTable {
    pub fn new() -> Self {
        LiteralTable::default()
    }

    pub fn insert(&mut self, text: impl Into<String>) -> LiteralId {
        let id = LiteralId(self.texts.len() as u32);
        self.texts.push(text.into());
        id
    }

    pub fn get(&self, id: LiteralId) -> Option<&str> {
        self.texts.get(id.0 as usize).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Not,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
    BitAnd,
    BitOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

/// Sequence operators recognized on enumerable receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqOp {
    Where,
    Any,
    All,
    First,
    FirstOrDefault,
    Last,
    LastOrDefault,
    Single,
    SingleOrDefault,
    Count,
    Min,
    Max,
    Sum,
    Average,
    Select,
    OrderBy,
    OrderByDescending,
    Contains,
}

impl SeqOp {
    /// Case-insensitive operator lookup by method name.
    pub fn from_name(name: &str) -> Option<SeqOp> {
        let op = match name.to_ascii_lowercase().as_str() {
            "where" => SeqOp::Where,
            "any" => SeqOp::Any,
            "all" => SeqOp::All,
            "first" => SeqOp::First,
            "firstordefault" => SeqOp::FirstOrDefault,
            "last" => SeqOp::Last,
            "lastordefault" => SeqOp::LastOrDefault,
            "single" => SeqOp::Single,
            "singleordefault" => SeqOp::SingleOrDefault,
            "count" => SeqOp::Count,
            "min" => SeqOp::Min,
            "max" => SeqOp::Max,
            "sum" => SeqOp::Sum,
            "average" => SeqOp::Average,
            "select" => SeqOp::Select,
            "orderby" => SeqOp::OrderBy,
            "orderbydescending" => SeqOp::OrderByDescending,
            "contains" => SeqOp::Contains,
            _ => return None,
        };
        Some(op)
    }
}

/// A lambda: ordered parameters and a typed body.
#[derive(Debug, Clone)]
pub struct LambdaExpr {
    pub params: Vec<ParamRef>,
    pub body: Expr,
}

impl LambdaExpr {
    pub fn new(params: Vec<ParamRef>, body: Expr) -> Self {
        LambdaExpr { params, body }
    }

    pub fn return_ty(&self) -> &Ty {
        &self.body.ty
    }
}

/// Expression tree node.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Ty,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Constant value; literals keep the id of their original text for the
    /// duration of the parse.
    Constant {
        value: Value,
        literal: Option<LiteralId>,
    },
    Parameter(ParamRef),
    /// Field or property read.
    Property { target: Box<Expr>, name: String },
    /// Method call; `target` is `None` for statics.
    Call {
        target: Option<Box<Expr>>,
        method: Arc<MethodDef>,
        args: Vec<Expr>,
    },
    /// Element access: plain sequence indexing when `indexer` is `None`,
    /// otherwise a default-indexer getter.
    Index {
        target: Box<Expr>,
        args: Vec<Expr>,
        indexer: Option<Arc<MethodDef>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Conversion to this node's type; `checked` conversions range-check.
    Convert { operand: Box<Expr>, checked: bool },
    New {
        class: ClassRef,
        ctor: Arc<CtorDef>,
        args: Vec<Expr>,
    },
    /// Instantiation of an emitted data class; args follow signature order.
    NewDynamic { class: ClassRef, args: Vec<Expr> },
    /// Tuple construction; the argument list mirrors the (possibly nested)
    /// tuple type.
    NewTuple { items: Vec<Expr> },
    Lambda(Arc<LambdaExpr>),
    Invoke {
        lambda: Box<Expr>,
        args: Vec<Expr>,
    },
    /// A sequence operator application. `args` holds lambdas for selector
    /// and predicate forms, plain expressions for `Contains`.
    Aggregate {
        source: Box<Expr>,
        op: SeqOp,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Ty) -> Self {
        Expr { kind, ty }
    }

    pub fn constant(value: Value) -> Self {
        let ty = value.ty();
        Expr::new(
            ExprKind::Constant {
                value,
                literal: None,
            },
            ty,
        )
    }

    /// A constant with an explicit type, used when promotion retypes a
    /// literal (for example a plain value under a nullable type).
    pub fn constant_typed(value: Value, ty: Ty) -> Self {
        Expr::new(
            ExprKind::Constant {
                value,
                literal: None,
            },
            ty,
        )
    }

    pub fn literal(value: Value, id: LiteralId) -> Self {
        let ty = value.ty();
        Expr::new(
            ExprKind::Constant {
                value,
                literal: Some(id),
            },
            ty,
        )
    }

    pub fn parameter(param: ParamRef) -> Self {
        let ty = param.ty.clone();
        Expr::new(ExprKind::Parameter(param), ty)
    }

    pub fn property(target: Expr, name: impl Into<String>, ty: Ty) -> Self {
        Expr::new(
            ExprKind::Property {
                target: Box::new(target),
                name: name.into(),
            },
            ty,
        )
    }

    pub fn call(target: Option<Expr>, method: Arc<MethodDef>, args: Vec<Expr>) -> Self {
        let ty = method.ret.clone();
        Expr::new(
            ExprKind::Call {
                target: target.map(Box::new),
                method,
                args,
            },
            ty,
        )
    }

    pub fn unary(op: UnaryOp, operand: Expr, ty: Ty) -> Self {
        Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
        )
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr, ty: Ty) -> Self {
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        )
    }

    pub fn conditional(test: Expr, then_expr: Expr, else_expr: Expr) -> Self {
        let ty = then_expr.ty.clone();
        Expr::new(
            ExprKind::Conditional {
                test: Box::new(test),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            ty,
        )
    }

    pub fn convert(operand: Expr, target: Ty, checked: bool) -> Self {
        Expr::new(
            ExprKind::Convert {
                operand: Box::new(operand),
                checked,
            },
            target,
        )
    }

    pub fn lambda(lambda: Arc<LambdaExpr>) -> Self {
        let ty = Ty::Func(
            lambda.params.iter().map(|p| p.ty.clone()).collect(),
            Box::new(lambda.body.ty.clone()),
        );
        Expr::new(ExprKind::Lambda(lambda), ty)
    }

    /// The constant value, if this node is a constant.
    pub fn constant_value(&self) -> Option<&Value> {
        match &self.kind {
            ExprKind::Constant { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The literal id, if this node is a constant produced from a literal.
    pub fn literal_id(&self) -> Option<LiteralId> {
        match &self.kind {
            ExprKind::Constant { literal, .. } => *literal,
            _ => None,
        }
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(
            &self.kind,
            ExprKind::Constant {
                value: Value::Null,
                ..
            }
        )
    }
}

/// One selector of an ordering clause.
#[derive(Debug, Clone)]
pub struct OrderingDirective {
    pub selector: Arc<LambdaExpr>,
    pub ascending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_builders() {
        let c = Expr::constant(Value::Int32(5));
        assert_eq!(c.ty, Ty::Int32);
        assert_eq!(c.constant_value(), Some(&Value::Int32(5)));
        assert_eq!(c.literal_id(), None);

        let mut table = LiteralTable::new();
        let id = table.insert("5");
        let lit = Expr::literal(Value::Int32(5), id);
        assert_eq!(lit.literal_id(), Some(id));
        assert_eq!(table.get(id), Some("5"));
    }

    #[test]
    fn test_parameter_identity() {
        let p = ParamDef::new("it", Ty::Int32);
        let a = Expr::parameter(p.clone());
        let b = Expr::parameter(p.clone());
        match (&a.kind, &b.kind) {
            (ExprKind::Parameter(pa), ExprKind::Parameter(pb)) => {
                assert!(Arc::ptr_eq(pa, pb));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_seq_op_lookup() {
        assert_eq!(SeqOp::from_name("WHERE"), Some(SeqOp::Where));
        assert_eq!(SeqOp::from_name("orderByDescending"), Some(SeqOp::OrderByDescending));
        assert_eq!(SeqOp::from_name("Zip"), None);
    }

    #[test]
    fn test_lambda_return_type() {
        let p = ParamDef::new("", Ty::Int32);
        let body = Expr::parameter(p.clone());
        let lambda = LambdaExpr::new(vec![p], body);
        assert_eq!(*lambda.return_ty(), Ty::Int32);
    }
}
