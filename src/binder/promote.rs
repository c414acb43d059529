//! Promotion of expressions to target types.
//!
//! Implicit promotion covers identity, null-literal typing, literal
//! re-parse narrowing (information-preserving: a literal narrows only if
//! its original spelling parses in the target), string-to-enum coercion,
//! the numeric widening table, nullable lifting and class assignability.
//! Explicit conversion additionally permits checked numeric/enum/char
//! casts, nullable unwrapping and up/down casts.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::expression::node::{Expr, LiteralTable};
use crate::runtime::value::Value;
use crate::types::ty::{is_assignable, is_implicitly_convertible, Ty};

/// Re-parse a literal's original text as `target`. Out-of-range spellings
/// fail rather than wrap, and a suffixed spelling fails outright since the
/// suffix pinned its type at lexing time.
pub fn parse_literal_text(text: &str, target: &Ty) -> Option<Value> {
    match target {
        Ty::SByte => i8::from_str(text).ok().map(Value::SByte),
        Ty::Byte => u8::from_str(text).ok().map(Value::Byte),
        Ty::Int16 => i16::from_str(text).ok().map(Value::Int16),
        Ty::UInt16 => u16::from_str(text).ok().map(Value::UInt16),
        Ty::Int32 => i32::from_str(text).ok().map(Value::Int32),
        Ty::UInt32 => u32::from_str(text).ok().map(Value::UInt32),
        Ty::Int64 => i64::from_str(text).ok().map(Value::Int64),
        Ty::UInt64 => u64::from_str(text).ok().map(Value::UInt64),
        Ty::Float => f32::from_str(text).ok().map(Value::Float),
        Ty::Double => f64::from_str(text).ok().map(Value::Double),
        Ty::Decimal => Decimal::from_str(text)
            .ok()
            .or_else(|| Decimal::from_scientific(text).ok())
            .map(Value::Decimal),
        _ => None,
    }
}

/// Promote `expr` to `target`. With `exact` set the result type must equal
/// the target; otherwise reference widening may leave the node untouched.
/// Returns `None` when no promotion applies.
pub fn promote(expr: &Expr, target: &Ty, exact: bool, literals: &LiteralTable) -> Option<Expr> {
    if expr.ty == *target {
        return Some(expr.clone());
    }

    if expr.is_null_literal() {
        if target.is_reference_type() || target.is_nullable() {
            return Some(Expr::constant_typed(Value::Null, target.clone()));
        }
        return None;
    }

    if let Some(id) = expr.literal_id() {
        let text = literals.get(id)?;
        let underlying = target.non_nullable();
        match expr.constant_value() {
            Some(Value::String(_)) => {
                // A string literal naming an enum member converts to it.
                if let Ty::Enum(def) = underlying {
                    if let Some(member) = def.member(text) {
                        return Some(Expr::constant_typed(
                            Value::Enum(def.clone(), member),
                            target.clone(),
                        ));
                    }
                }
            }
            // Unsuffixed integer literals re-parse into any numeric
            // target; a double literal re-parses only into decimal.
            Some(
                Value::Int32(_) | Value::UInt32(_) | Value::Int64(_) | Value::UInt64(_),
            ) if underlying.is_numeric() => {
                if let Some(parsed) = parse_literal_text(text, underlying) {
                    return Some(Expr::constant_typed(parsed, target.clone()));
                }
            }
            Some(Value::Double(_)) if *underlying == Ty::Decimal => {
                if let Some(parsed) = parse_literal_text(text, underlying) {
                    return Some(Expr::constant_typed(parsed, target.clone()));
                }
            }
            _ => {}
        }
    }

    if is_implicitly_convertible(&expr.ty, target) {
        if target.is_value_type() || exact {
            return Some(Expr::convert(expr.clone(), target.clone(), false));
        }
        return Some(expr.clone());
    }

    None
}

/// Whether an explicit `Type(expr)` conversion between these types exists.
pub fn explicit_conversion_allowed(from: &Ty, to: &Ty) -> bool {
    if from == to {
        return true;
    }
    let from_inner = from.non_nullable();
    let to_inner = to.non_nullable();
    let castable = |t: &Ty| t.is_numeric() || t.is_enum() || *t == Ty::Char;
    if castable(from_inner) && castable(to_inner) {
        return true;
    }
    if from_inner == to_inner {
        // Nullable to non-nullable of the same underlying, or back.
        return true;
    }
    if is_assignable(from, to) || is_assignable(to, from) {
        return true;
    }
    let is_iface = |t: &Ty| t.as_class().map(|c| c.is_interface).unwrap_or(false);
    is_iface(from) || is_iface(to)
}

/// Build the explicit conversion node; checked when crossing numeric,
/// enum or char representations.
pub fn explicit_convert(expr: Expr, target: &Ty) -> Expr {
    if expr.ty == *target {
        return expr;
    }
    let from_inner = expr.ty.non_nullable().clone();
    let to_inner = target.non_nullable();
    let castable = |t: &Ty| t.is_numeric() || t.is_enum() || *t == Ty::Char;
    let checked = castable(&from_inner) && castable(to_inner) && from_inner != *to_inner;
    Expr::convert(expr, target.clone(), checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::class::EnumDef;

    fn literal(value: Value, text: &str, table: &mut LiteralTable) -> Expr {
        let id = table.insert(text);
        Expr::literal(value, id)
    }

    #[test]
    fn test_identity_promotion() {
        let table = LiteralTable::new();
        let e = Expr::constant(Value::Int32(5));
        let p = promote(&e, &Ty::Int32, true, &table).unwrap();
        assert_eq!(p.ty, Ty::Int32);
    }

    #[test]
    fn test_literal_narrowing_in_range() {
        let mut table = LiteralTable::new();
        let e = literal(Value::Int32(200), "200", &mut table);
        let p = promote(&e, &Ty::Byte, false, &table).unwrap();
        assert_eq!(p.constant_value(), Some(&Value::Byte(200)));
        assert_eq!(p.ty, Ty::Byte);
    }

    #[test]
    fn test_literal_narrowing_out_of_range_rejected() {
        let mut table = LiteralTable::new();
        let e = literal(Value::Int32(300), "300", &mut table);
        assert!(promote(&e, &Ty::Byte, false, &table).is_none());
        let e = literal(Value::Int32(-129), "-129", &mut table);
        assert!(promote(&e, &Ty::SByte, false, &table).is_none());
    }

    #[test]
    fn test_double_literal_to_decimal() {
        let mut table = LiteralTable::new();
        let e = literal(Value::Double(1.5), "1.5", &mut table);
        let p = promote(&e, &Ty::Decimal, false, &table).unwrap();
        assert_eq!(
            p.constant_value(),
            Some(&Value::Decimal(Decimal::from_str("1.5").unwrap()))
        );
    }

    #[test]
    fn test_string_literal_to_enum() {
        let color = EnumDef::new("Color", vec![("Red".into(), 0), ("Blue".into(), 2)]);
        let target = Ty::Enum(color.clone());
        let mut table = LiteralTable::new();
        let e = literal(Value::String("blue".into()), "blue", &mut table);
        let p = promote(&e, &target, false, &table).unwrap();
        assert_eq!(p.constant_value(), Some(&Value::Enum(color, 2)));
    }

    #[test]
    fn test_widening_wraps_convert() {
        let table = LiteralTable::new();
        let e = Expr::constant(Value::Int32(5));
        let p = promote(&e, &Ty::Int64, false, &table).unwrap();
        assert_eq!(p.ty, Ty::Int64);
        // Value targets always get an explicit conversion node.
        assert!(matches!(p.kind, crate::expression::node::ExprKind::Convert { .. }));
    }

    #[test]
    fn test_null_literal_promotion() {
        let table = LiteralTable::new();
        let null = Expr::constant(Value::Null);
        assert!(promote(&null, &Ty::String, false, &table).is_some());
        assert!(promote(&null, &Ty::Nullable(Box::new(Ty::Int32)), false, &table).is_some());
        assert!(promote(&null, &Ty::Int32, false, &table).is_none());
    }

    #[test]
    fn test_explicit_conversions() {
        assert!(explicit_conversion_allowed(&Ty::Double, &Ty::Int32));
        assert!(explicit_conversion_allowed(&Ty::Float, &Ty::Decimal));
        assert!(explicit_conversion_allowed(
            &Ty::Nullable(Box::new(Ty::Int32)),
            &Ty::Int32
        ));
        assert!(!explicit_conversion_allowed(&Ty::String, &Ty::Int32));
    }
}
