//! Tree-walking evaluation of compiled expressions.
//!
//! The parser promotes every operand before a node is built, so the
//! evaluator only matches value variants: a mixed-variant arithmetic pair
//! here is an internal error, not a user error. Lifted (nullable) operands
//! arrive as `Null` and follow the host's lifted-operator semantics:
//! comparisons are false against `Null` (equality treats two `Null`s as
//! equal), arithmetic propagates `Null`, boolean logic is three-valued.

use std::cmp::Ordering;
use std::sync::Arc;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::expression::error::{EvalError, EvalResult};
use crate::expression::node::{BinaryOp, Expr, ExprKind, LambdaExpr, ParamRef, SeqOp, UnaryOp};
use crate::runtime::object::Instance;
use crate::runtime::value::{SeqValue, Value};
use crate::types::ty::Ty;

/// Evaluator with a stack of parameter bindings.
#[derive(Default)]
pub struct Evaluator {
    env: Vec<(ParamRef, Value)>,
}

/// Evaluate a closed expression (no unbound parameters).
pub fn evaluate(expr: &Expr) -> EvalResult<Value> {
    Evaluator::new().eval(expr)
}

/// Apply a lambda to argument values.
pub fn invoke_lambda(lambda: &LambdaExpr, args: &[Value]) -> EvalResult<Value> {
    let mut evaluator = Evaluator::new();
    for (param, arg) in lambda.params.iter().zip(args.iter()) {
        evaluator.env.push((param.clone(), arg.clone()));
    }
    evaluator.eval(&lambda.body)
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator { env: Vec::new() }
    }

    pub fn bind(&mut self, param: ParamRef, value: Value) {
        self.env.push((param, value));
    }

    pub fn eval(&mut self, expr: &Expr) -> EvalResult<Value> {
        match &expr.kind {
            ExprKind::Constant { value, .. } => Ok(value.clone()),

            ExprKind::Parameter(param) => self
                .env
                .iter()
                .rev()
                .find(|(p, _)| Arc::ptr_eq(p, param))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| EvalError::UnboundParameter(param.name.clone())),

            ExprKind::Property { target, name } => {
                let value = self.eval(target)?;
                property_value(&value, name)
            }

            ExprKind::Call {
                target,
                method,
                args,
            } => {
                let receiver = match target {
                    Some(t) => Some(self.eval(t)?),
                    None => None,
                };
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                (method.body)(receiver.as_ref(), &arg_values)
            }

            ExprKind::Index {
                target,
                args,
                indexer,
            } => {
                let receiver = self.eval(target)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                match indexer {
                    Some(method) => (method.body)(Some(&receiver), &arg_values),
                    None => {
                        let seq = receiver.as_seq().ok_or(EvalError::NullReference)?;
                        let index = match arg_values[0] {
                            Value::Int32(i) => i as i64,
                            _ => return Err(EvalError::InvalidOperand("index".into())),
                        };
                        if index < 0 || index as usize >= seq.items.len() {
                            return Err(EvalError::IndexOutOfRange {
                                index,
                                len: seq.items.len(),
                            });
                        }
                        Ok(seq.items[index as usize].clone())
                    }
                }
            }

            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                eval_unary(*op, value)
            }

            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right),

            ExprKind::Conditional {
                test,
                then_expr,
                else_expr,
            } => match self.eval(test)? {
                Value::Bool(true) => self.eval(then_expr),
                Value::Bool(false) => self.eval(else_expr),
                _ => Err(EvalError::NullReference),
            },

            ExprKind::Convert { operand, checked } => {
                let value = self.eval(operand)?;
                convert_value(value, &expr.ty, *checked)
            }

            ExprKind::New { ctor, args, .. } => {
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                (ctor.body)(None, &arg_values)
            }

            ExprKind::NewDynamic { class, args } => {
                let mut slots = Vec::with_capacity(args.len());
                for arg in args {
                    slots.push(self.eval(arg)?);
                }
                Ok(Value::Object(Instance::new(class.clone(), slots)))
            }

            ExprKind::NewTuple { items } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::Tuple(Arc::new(values)))
            }

            ExprKind::Lambda(lambda) => Ok(Value::Lambda(lambda.clone())),

            ExprKind::Invoke { lambda, args } => {
                let callee = self.eval(lambda)?;
                let lambda = match callee {
                    Value::Lambda(l) => l,
                    _ => return Err(EvalError::InvalidOperand("invoke".into())),
                };
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                self.apply(&lambda, &arg_values)
            }

            ExprKind::Aggregate { source, op, args } => {
                let source_value = self.eval(source)?;
                let seq = match &source_value {
                    Value::Seq(seq) => seq.clone(),
                    Value::Null => return Err(EvalError::NullReference),
                    _ => return Err(EvalError::InvalidOperand("aggregate source".into())),
                };
                self.eval_aggregate(&seq, *op, args, &expr.ty)
            }
        }
    }

    /// Bind a lambda's parameters and evaluate its body; the bindings are
    /// scoped to the application.
    fn apply(&mut self, lambda: &LambdaExpr, args: &[Value]) -> EvalResult<Value> {
        for (param, arg) in lambda.params.iter().zip(args.iter()) {
            self.env.push((param.clone(), arg.clone()));
        }
        let result = self.eval(&lambda.body);
        let keep = self.env.len().saturating_sub(lambda.params.len());
        self.env.truncate(keep);
        result
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> EvalResult<Value> {
        // Boolean logic short-circuits; everything else evaluates both.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            return self.eval_logical(op, left, right);
        }
        let l = self.eval(left)?;
        let r = self.eval(right)?;
        eval_binary_values(op, l, r)
    }

    fn eval_logical(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> EvalResult<Value> {
        let l = self.eval(left)?;
        match (op, &l) {
            (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
            (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
            _ => {}
        }
        let r = self.eval(right)?;
        match op {
            BinaryOp::And => Ok(match (l, r) {
                (Value::Bool(a), Value::Bool(b)) => Value::Bool(a && b),
                (_, Value::Bool(false)) | (Value::Bool(false), _) => Value::Bool(false),
                _ => Value::Null,
            }),
            BinaryOp::Or => Ok(match (l, r) {
                (Value::Bool(a), Value::Bool(b)) => Value::Bool(a || b),
                (_, Value::Bool(true)) | (Value::Bool(true), _) => Value::Bool(true),
                _ => Value::Null,
            }),
            _ => unreachable!("only logical operators reach here"),
        }
    }

    fn eval_aggregate(
        &mut self,
        seq: &SeqValue,
        op: SeqOp,
        args: &[Expr],
        result_ty: &Ty,
    ) -> EvalResult<Value> {
        let lambda = args.first().and_then(|a| match &a.kind {
            ExprKind::Lambda(l) => Some(l.clone()),
            _ => None,
        });

        macro_rules! selected {
            ($self:ident, $item:expr) => {
                match &lambda {
                    Some(l) => $self.apply(l, std::slice::from_ref($item))?,
                    None => $item.clone(),
                }
            };
        }
        macro_rules! matches_pred {
            ($self:ident, $item:expr) => {
                match &lambda {
                    Some(l) => {
                        $self.apply(l, std::slice::from_ref($item))? == Value::Bool(true)
                    }
                    None => true,
                }
            };
        }

        match op {
            SeqOp::Where => {
                let mut items = Vec::new();
                for item in seq.items.iter() {
                    if matches_pred!(self, item) {
                        items.push(item.clone());
                    }
                }
                Ok(Value::seq(seq.elem.clone(), items))
            }
            SeqOp::Select => {
                let elem = match result_ty {
                    Ty::Seq(elem) => (**elem).clone(),
                    _ => Ty::Object,
                };
                let mut items = Vec::with_capacity(seq.items.len());
                for item in seq.items.iter() {
                    items.push(selected!(self, item));
                }
                Ok(Value::seq(elem, items))
            }
            SeqOp::OrderBy | SeqOp::OrderByDescending => {
                let mut keyed = Vec::with_capacity(seq.items.len());
                for item in seq.items.iter() {
                    keyed.push((selected!(self, item), item.clone()));
                }
                keyed.sort_by(|(ka, _), (kb, _)| {
                    let ord = ka.compare(kb).unwrap_or(Ordering::Equal);
                    if op == SeqOp::OrderByDescending {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
                Ok(Value::seq(
                    seq.elem.clone(),
                    keyed.into_iter().map(|(_, v)| v).collect(),
                ))
            }
            SeqOp::Any => {
                for item in seq.items.iter() {
                    if matches_pred!(self, item) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            SeqOp::All => {
                for item in seq.items.iter() {
                    if !matches_pred!(self, item) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            SeqOp::Count => {
                let mut count = 0i32;
                for item in seq.items.iter() {
                    if matches_pred!(self, item) {
                        count += 1;
                    }
                }
                Ok(Value::Int32(count))
            }
            SeqOp::First | SeqOp::FirstOrDefault => {
                for item in seq.items.iter() {
                    if matches_pred!(self, item) {
                        return Ok(item.clone());
                    }
                }
                if op == SeqOp::First {
                    Err(EvalError::EmptySequence)
                } else {
                    Ok(default_of(result_ty))
                }
            }
            SeqOp::Last | SeqOp::LastOrDefault => {
                let mut found = None;
                for item in seq.items.iter() {
                    if matches_pred!(self, item) {
                        found = Some(item.clone());
                    }
                }
                match found {
                    Some(v) => Ok(v),
                    None if op == SeqOp::Last => Err(EvalError::EmptySequence),
                    None => Ok(default_of(result_ty)),
                }
            }
            SeqOp::Single | SeqOp::SingleOrDefault => {
                let mut found = None;
                for item in seq.items.iter() {
                    if matches_pred!(self, item) {
                        if found.is_some() {
                            return Err(EvalError::MoreThanOneElement);
                        }
                        found = Some(item.clone());
                    }
                }
                match found {
                    Some(v) => Ok(v),
                    None if op == SeqOp::Single => Err(EvalError::EmptySequence),
                    None => Ok(default_of(result_ty)),
                }
            }
            SeqOp::Min | SeqOp::Max => {
                let mut best: Option<Value> = None;
                for item in seq.items.iter() {
                    let key = selected!(self, item);
                    best = Some(match best {
                        None => key,
                        Some(current) => {
                            let ord = key
                                .compare(&current)
                                .ok_or_else(|| EvalError::InvalidOperand("Min/Max".into()))?;
                            let take = if op == SeqOp::Min {
                                ord == Ordering::Less
                            } else {
                                ord == Ordering::Greater
                            };
                            if take {
                                key
                            } else {
                                current
                            }
                        }
                    });
                }
                best.ok_or(EvalError::EmptySequence)
            }
            SeqOp::Sum => {
                let mut acc = default_of(result_ty);
                for item in seq.items.iter() {
                    let value = selected!(self, item);
                    if value.is_null() {
                        continue;
                    }
                    acc = eval_binary_values(BinaryOp::Add, acc, value)?;
                }
                Ok(acc)
            }
            SeqOp::Average => {
                let mut count = 0u32;
                let use_decimal = *result_ty.non_nullable() == Ty::Decimal;
                let mut dec_sum = Decimal::ZERO;
                let mut f_sum = 0f64;
                for item in seq.items.iter() {
                    let value = selected!(self, item);
                    if value.is_null() {
                        continue;
                    }
                    count += 1;
                    if use_decimal {
                        match value {
                            Value::Decimal(d) => dec_sum += d,
                            other => {
                                dec_sum += Decimal::from_f64(other.as_f64().unwrap_or(0.0))
                                    .unwrap_or(Decimal::ZERO)
                            }
                        }
                    } else {
                        f_sum += value.as_f64().unwrap_or(0.0);
                    }
                }
                if count == 0 {
                    return Err(EvalError::EmptySequence);
                }
                Ok(match result_ty.non_nullable() {
                    Ty::Decimal => Value::Decimal(dec_sum / Decimal::from(count)),
                    Ty::Float => Value::Float((f_sum / count as f64) as f32),
                    _ => Value::Double(f_sum / count as f64),
                })
            }
            SeqOp::Contains => {
                let needle = self.eval(&args[0])?;
                Ok(Value::Bool(seq.items.iter().any(|item| *item == needle)))
            }
        }
    }
}

fn property_value(receiver: &Value, name: &str) -> EvalResult<Value> {
    match receiver {
        Value::Null => Err(EvalError::NullReference),
        Value::Object(inst) => inst
            .get(name)
            .ok_or_else(|| EvalError::InvalidOperand(format!("property '{}'", name))),
        Value::String(s) if name.eq_ignore_ascii_case("Length") => {
            Ok(Value::Int32(s.chars().count() as i32))
        }
        Value::Seq(seq) if name.eq_ignore_ascii_case("Count") => {
            Ok(Value::Int32(seq.items.len() as i32))
        }
        Value::Tuple(items) => {
            let lower = name.to_ascii_lowercase();
            if let Some(digits) = lower.strip_prefix("item") {
                if let Ok(n) = digits.parse::<usize>() {
                    if n >= 1 && n <= items.len() {
                        return Ok(items[n - 1].clone());
                    }
                }
            }
            if lower == "rest" && items.len() == 8 {
                return Ok(items[7].clone());
            }
            Err(EvalError::InvalidOperand(format!("property '{}'", name)))
        }
        other => Err(EvalError::InvalidOperand(format!(
            "property '{}' on '{}'",
            name,
            other.ty()
        ))),
    }
}

fn eval_unary(op: UnaryOp, value: Value) -> EvalResult<Value> {
    match op {
        UnaryOp::Not => match value {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            Value::Null => Ok(Value::Null),
            other => Err(EvalError::InvalidOperand(format!("!{}", other.ty()))),
        },
        UnaryOp::Negate => match value {
            Value::Null => Ok(Value::Null),
            Value::Int32(v) => v
                .checked_neg()
                .map(Value::Int32)
                .ok_or_else(|| EvalError::ArithmeticOverflow("-".into())),
            Value::Int64(v) => v
                .checked_neg()
                .map(Value::Int64)
                .ok_or_else(|| EvalError::ArithmeticOverflow("-".into())),
            Value::Float(v) => Ok(Value::Float(-v)),
            Value::Double(v) => Ok(Value::Double(-v)),
            Value::Decimal(v) => Ok(Value::Decimal(-v)),
            other => Err(EvalError::InvalidOperand(format!("-{}", other.ty()))),
        },
    }
}

fn eval_binary_values(op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
    // Lifted operands: comparisons against NULL are false (two NULLs are
    // equal); everything else propagates NULL.
    if left.is_null() || right.is_null() {
        return Ok(match op {
            BinaryOp::Eq => Value::Bool(left.is_null() && right.is_null()),
            BinaryOp::Ne => Value::Bool(left.is_null() != right.is_null()),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => Value::Bool(false),
            _ => Value::Null,
        });
    }

    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = left.compare(&right).ok_or_else(|| {
                EvalError::InvalidOperand(format!("{} {} {}", left.ty(), op.as_str(), right.ty()))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            eval_arithmetic(op, left, right)
        }
        BinaryOp::BitAnd | BinaryOp::BitOr => eval_bitwise(op, left, right),
        BinaryOp::Shl | BinaryOp::Shr => eval_shift(op, left, right),
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit earlier"),
    }
}

macro_rules! int_arith {
    ($op:expr, $a:expr, $b:expr, $variant:path) => {{
        match $op {
            BinaryOp::Add => Ok($variant($a.wrapping_add($b))),
            BinaryOp::Sub => Ok($variant($a.wrapping_sub($b))),
            BinaryOp::Mul => Ok($variant($a.wrapping_mul($b))),
            BinaryOp::Div => {
                if $b == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok($variant($a.wrapping_div($b)))
                }
            }
            _ => {
                if $b == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok($variant($a.wrapping_rem($b)))
                }
            }
        }
    }};
}

macro_rules! float_arith {
    ($op:expr, $a:expr, $b:expr, $variant:path) => {{
        match $op {
            BinaryOp::Add => Ok($variant($a + $b)),
            BinaryOp::Sub => Ok($variant($a - $b)),
            BinaryOp::Mul => Ok($variant($a * $b)),
            BinaryOp::Div => Ok($variant($a / $b)),
            _ => Ok($variant($a % $b)),
        }
    }};
}

fn eval_arithmetic(op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int32(a), Value::Int32(b)) => int_arith!(op, a, b, Value::Int32),
        (Value::UInt32(a), Value::UInt32(b)) => int_arith!(op, a, b, Value::UInt32),
        (Value::Int64(a), Value::Int64(b)) => int_arith!(op, a, b, Value::Int64),
        (Value::UInt64(a), Value::UInt64(b)) => int_arith!(op, a, b, Value::UInt64),
        (Value::Float(a), Value::Float(b)) => float_arith!(op, a, b, Value::Float),
        (Value::Double(a), Value::Double(b)) => float_arith!(op, a, b, Value::Double),
        (Value::Decimal(a), Value::Decimal(b)) => match op {
            BinaryOp::Add => Ok(Value::Decimal(a + b)),
            BinaryOp::Sub => Ok(Value::Decimal(a - b)),
            BinaryOp::Mul => Ok(Value::Decimal(a * b)),
            BinaryOp::Div | BinaryOp::Mod => {
                if b.is_zero() {
                    Err(EvalError::DivisionByZero)
                } else if op == BinaryOp::Div {
                    Ok(Value::Decimal(a / b))
                } else {
                    Ok(Value::Decimal(a % b))
                }
            }
            _ => unreachable!("arithmetic dispatch"),
        },
        (l, r) => Err(EvalError::InvalidOperand(format!(
            "{} {} {}",
            l.ty(),
            op.as_str(),
            r.ty()
        ))),
    }
}

fn eval_bitwise(op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
    let and = op == BinaryOp::BitAnd;
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if and { a & b } else { a | b })),
        (Value::Int32(a), Value::Int32(b)) => Ok(Value::Int32(if and { a & b } else { a | b })),
        (Value::UInt32(a), Value::UInt32(b)) => Ok(Value::UInt32(if and { a & b } else { a | b })),
        (Value::Int64(a), Value::Int64(b)) => Ok(Value::Int64(if and { a & b } else { a | b })),
        (Value::UInt64(a), Value::UInt64(b)) => Ok(Value::UInt64(if and { a & b } else { a | b })),
        (l, r) => Err(EvalError::InvalidOperand(format!(
            "{} {} {}",
            l.ty(),
            op.as_str(),
            r.ty()
        ))),
    }
}

fn eval_shift(op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
    let count = right
        .as_i64()
        .ok_or_else(|| EvalError::InvalidOperand("shift count".into()))? as u32;
    let shl = op == BinaryOp::Shl;
    match left {
        Value::Int32(v) => Ok(Value::Int32(if shl {
            v.wrapping_shl(count)
        } else {
            v.wrapping_shr(count)
        })),
        Value::UInt32(v) => Ok(Value::UInt32(if shl {
            v.wrapping_shl(count)
        } else {
            v.wrapping_shr(count)
        })),
        Value::Int64(v) => Ok(Value::Int64(if shl {
            v.wrapping_shl(count)
        } else {
            v.wrapping_shr(count)
        })),
        Value::UInt64(v) => Ok(Value::UInt64(if shl {
            v.wrapping_shl(count)
        } else {
            v.wrapping_shr(count)
        })),
        other => Err(EvalError::InvalidOperand(format!(
            "{} {}",
            other.ty(),
            op.as_str()
        ))),
    }
}

/// The zero/default value of a type, used by `Sum` seeds and the
/// `...OrDefault` aggregates.
fn default_of(ty: &Ty) -> Value {
    match ty.non_nullable() {
        Ty::Bool => Value::Bool(false),
        Ty::Char => Value::Char('\0'),
        Ty::SByte => Value::SByte(0),
        Ty::Byte => Value::Byte(0),
        Ty::Int16 => Value::Int16(0),
        Ty::UInt16 => Value::UInt16(0),
        Ty::Int32 => Value::Int32(0),
        Ty::UInt32 => Value::UInt32(0),
        Ty::Int64 => Value::Int64(0),
        Ty::UInt64 => Value::UInt64(0),
        Ty::Float => Value::Float(0.0),
        Ty::Double => Value::Double(0.0),
        Ty::Decimal => Value::Decimal(Decimal::ZERO),
        _ => Value::Null,
    }
}

/// Convert a runtime value to a target type. Checked conversions reject
/// out-of-range results instead of wrapping.
pub fn convert_value(value: Value, target: &Ty, checked: bool) -> EvalResult<Value> {
    if value.is_null() {
        if target.is_nullable() || target.is_reference_type() || *target == Ty::Null {
            return Ok(Value::Null);
        }
        return Err(EvalError::NullReference);
    }
    let inner = target.non_nullable();

    match inner {
        Ty::Object => return Ok(value),
        Ty::Class(class) => {
            return match &value {
                Value::Object(inst)
                    if crate::types::class::self_and_bases(&inst.class)
                        .any(|c| Arc::ptr_eq(&c, class))
                        || crate::types::class::interface_closure(&inst.class)
                            .iter()
                            .any(|c| Arc::ptr_eq(c, class)) =>
                {
                    Ok(value)
                }
                _ => Err(EvalError::InvalidCast {
                    from: value.ty().to_string(),
                    to: target.to_string(),
                }),
            };
        }
        Ty::Enum(def) => {
            let raw = value.as_i64().ok_or_else(|| EvalError::InvalidCast {
                from: value.ty().to_string(),
                to: target.to_string(),
            })?;
            return Ok(Value::Enum(def.clone(), raw));
        }
        Ty::Char => {
            return match &value {
                Value::Char(c) => Ok(Value::Char(*c)),
                other => {
                    let raw = other.as_i64().ok_or_else(|| EvalError::InvalidCast {
                        from: other.ty().to_string(),
                        to: target.to_string(),
                    })?;
                    u32::try_from(raw)
                        .ok()
                        .and_then(char::from_u32)
                        .map(Value::Char)
                        .ok_or_else(|| EvalError::ConvertOverflow {
                            value: raw.to_string(),
                            target: "Char".to_string(),
                        })
                }
            };
        }
        _ => {}
    }

    if !inner.is_numeric() {
        // Same-shape nullable adjustments (Bool under Bool?, and so on)
        // arrive here with matching variants.
        if value.ty() == *inner {
            return Ok(value);
        }
        return Err(EvalError::InvalidCast {
            from: value.ty().to_string(),
            to: target.to_string(),
        });
    }

    numeric_convert(value, inner, checked)
}

fn numeric_convert(value: Value, target: &Ty, checked: bool) -> EvalResult<Value> {
    // Route through the widest compatible representation.
    enum Wide {
        Int(i128),
        Real(f64),
        Dec(Decimal),
    }
    let wide = match &value {
        Value::Char(c) => Wide::Int(*c as i128),
        Value::SByte(v) => Wide::Int(*v as i128),
        Value::Byte(v) => Wide::Int(*v as i128),
        Value::Int16(v) => Wide::Int(*v as i128),
        Value::UInt16(v) => Wide::Int(*v as i128),
        Value::Int32(v) => Wide::Int(*v as i128),
        Value::UInt32(v) => Wide::Int(*v as i128),
        Value::Int64(v) => Wide::Int(*v as i128),
        Value::UInt64(v) => Wide::Int(*v as i128),
        Value::Enum(_, v) => Wide::Int(*v as i128),
        Value::Float(v) => Wide::Real(*v as f64),
        Value::Double(v) => Wide::Real(*v),
        Value::Decimal(v) => Wide::Dec(*v),
        other => {
            return Err(EvalError::InvalidCast {
                from: other.ty().to_string(),
                to: target.to_string(),
            })
        }
    };

    macro_rules! overflow {
        ($v:expr) => {
            EvalError::ConvertOverflow {
                value: $v.to_string(),
                target: target.to_string(),
            }
        };
    }

    macro_rules! to_int {
        ($t:ty, $variant:path) => {{
            let raw: i128 = match wide {
                Wide::Int(i) => i,
                Wide::Real(f) => {
                    let t = f.trunc();
                    if checked && (t < <$t>::MIN as f64 || t > <$t>::MAX as f64) {
                        return Err(overflow!(f));
                    }
                    t as i128
                }
                Wide::Dec(d) => d.trunc().to_i128().ok_or_else(|| overflow!(d))?,
            };
            if checked {
                <$t>::try_from(raw).map($variant).map_err(|_| overflow!(raw))
            } else {
                Ok($variant(raw as $t))
            }
        }};
    }

    match target {
        Ty::SByte => to_int!(i8, Value::SByte),
        Ty::Byte => to_int!(u8, Value::Byte),
        Ty::Int16 => to_int!(i16, Value::Int16),
        Ty::UInt16 => to_int!(u16, Value::UInt16),
        Ty::Int32 => to_int!(i32, Value::Int32),
        Ty::UInt32 => to_int!(u32, Value::UInt32),
        Ty::Int64 => to_int!(i64, Value::Int64),
        Ty::UInt64 => to_int!(u64, Value::UInt64),
        Ty::Float => Ok(Value::Float(match wide {
            Wide::Int(i) => i as f32,
            Wide::Real(f) => f as f32,
            Wide::Dec(d) => d.to_f32().unwrap_or(f32::NAN),
        })),
        Ty::Double => Ok(Value::Double(match wide {
            Wide::Int(i) => i as f64,
            Wide::Real(f) => f,
            Wide::Dec(d) => d.to_f64().unwrap_or(f64::NAN),
        })),
        Ty::Decimal => match wide {
            Wide::Int(i) => Decimal::from_i128(i)
                .map(Value::Decimal)
                .ok_or_else(|| overflow!(i)),
            Wide::Real(f) => Decimal::from_f64(f)
                .map(Value::Decimal)
                .ok_or_else(|| overflow!(f)),
            Wide::Dec(d) => Ok(Value::Decimal(d)),
        },
        other => Err(EvalError::InvalidCast {
            from: value.ty().to_string(),
            to: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::node::ParamDef;

    #[test]
    fn test_arithmetic() {
        let e = Expr::binary(
            BinaryOp::Add,
            Expr::constant(Value::Int32(40)),
            Expr::constant(Value::Int32(2)),
            Ty::Int32,
        );
        assert_eq!(evaluate(&e).unwrap(), Value::Int32(42));
    }

    #[test]
    fn test_division_by_zero() {
        let e = Expr::binary(
            BinaryOp::Div,
            Expr::constant(Value::Int32(1)),
            Expr::constant(Value::Int32(0)),
            Ty::Int32,
        );
        assert_eq!(evaluate(&e).unwrap_err(), EvalError::DivisionByZero);
    }

    #[test]
    fn test_null_propagation() {
        let e = Expr::binary(
            BinaryOp::Add,
            Expr::constant_typed(Value::Null, Ty::Nullable(Box::new(Ty::Int32))),
            Expr::constant(Value::Int32(1)),
            Ty::Nullable(Box::new(Ty::Int32)),
        );
        assert_eq!(evaluate(&e).unwrap(), Value::Null);

        let e = Expr::binary(
            BinaryOp::Eq,
            Expr::constant_typed(Value::Null, Ty::Nullable(Box::new(Ty::Int32))),
            Expr::constant(Value::Int32(1)),
            Ty::Bool,
        );
        assert_eq!(evaluate(&e).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_three_valued_logic() {
        let null_bool = || Expr::constant_typed(Value::Null, Ty::Nullable(Box::new(Ty::Bool)));
        let lifted = Ty::Nullable(Box::new(Ty::Bool));
        let e = Expr::binary(
            BinaryOp::And,
            null_bool(),
            Expr::constant(Value::Bool(false)),
            lifted.clone(),
        );
        assert_eq!(evaluate(&e).unwrap(), Value::Bool(false));
        let e = Expr::binary(
            BinaryOp::Or,
            null_bool(),
            Expr::constant(Value::Bool(true)),
            lifted.clone(),
        );
        assert_eq!(evaluate(&e).unwrap(), Value::Bool(true));
        let e = Expr::binary(BinaryOp::And, null_bool(), null_bool(), lifted);
        assert_eq!(evaluate(&e).unwrap(), Value::Null);
    }

    #[test]
    fn test_lambda_binding() {
        let p = ParamDef::new("x", Ty::Int32);
        let body = Expr::binary(
            BinaryOp::Mul,
            Expr::parameter(p.clone()),
            Expr::parameter(p.clone()),
            Ty::Int32,
        );
        let lambda = LambdaExpr::new(vec![p], body);
        assert_eq!(
            invoke_lambda(&lambda, &[Value::Int32(6)]).unwrap(),
            Value::Int32(36)
        );
    }

    #[test]
    fn test_unbound_parameter() {
        let p = ParamDef::new("x", Ty::Int32);
        let e = Expr::parameter(p);
        assert_eq!(
            evaluate(&e).unwrap_err(),
            EvalError::UnboundParameter("x".into())
        );
    }

    #[test]
    fn test_checked_conversion_overflow() {
        let result = convert_value(Value::Int32(300), &Ty::Byte, true);
        assert_eq!(
            result.unwrap_err(),
            EvalError::ConvertOverflow {
                value: "300".into(),
                target: "Byte".into()
            }
        );
        assert_eq!(
            convert_value(Value::Int32(200), &Ty::Byte, true).unwrap(),
            Value::Byte(200)
        );
        assert_eq!(
            convert_value(Value::Double(1.9), &Ty::Int32, true).unwrap(),
            Value::Int32(1)
        );
    }

    #[test]
    fn test_shift() {
        let e = Expr::binary(
            BinaryOp::Shl,
            Expr::constant(Value::Int32(10)),
            Expr::constant(Value::Int32(1)),
            Ty::Int32,
        );
        assert_eq!(evaluate(&e).unwrap(), Value::Int32(20));
        let e = Expr::binary(
            BinaryOp::Shr,
            Expr::constant(Value::Int32(10)),
            Expr::constant(Value::Int32(1)),
            Ty::Int32,
        );
        assert_eq!(evaluate(&e).unwrap(), Value::Int32(5));
    }

    #[test]
    fn test_string_ordering() {
        let e = Expr::binary(
            BinaryOp::Lt,
            Expr::constant(Value::String("abc".into())),
            Expr::constant(Value::String("abd".into())),
            Ty::Bool,
        );
        assert_eq!(evaluate(&e).unwrap(), Value::Bool(true));
    }
}
