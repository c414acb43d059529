//! Runtime values flowing through compiled expression trees.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::expression::node::LambdaExpr;
use crate::runtime::object::Instance;
use crate::types::ty::{EnumRef, Ty};

/// An enumerable sequence value; carries its element type so empty
/// sequences stay typed.
#[derive(Debug, Clone)]
pub struct SeqValue {
    pub elem: Ty,
    pub items: Arc<Vec<Value>>,
}

impl SeqValue {
    pub fn new(elem: Ty, items: Vec<Value>) -> Self {
        SeqValue {
            elem,
            items: Arc::new(items),
        }
    }
}

/// A dynamically typed runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Char(char),
    String(String),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Guid(Uuid),
    Enum(EnumRef, i64),
    Object(Arc<Instance>),
    Seq(SeqValue),
    Tuple(Arc<Vec<Value>>),
    Lambda(Arc<LambdaExpr>),
}

impl Value {
    /// The static type this value inhabits.
    pub fn ty(&self) -> Ty {
        match self {
            Value::Null => Ty::Null,
            Value::Bool(_) => Ty::Bool,
            Value::Char(_) => Ty::Char,
            Value::String(_) => Ty::String,
            Value::SByte(_) => Ty::SByte,
            Value::Byte(_) => Ty::Byte,
            Value::Int16(_) => Ty::Int16,
            Value::UInt16(_) => Ty::UInt16,
            Value::Int32(_) => Ty::Int32,
            Value::UInt32(_) => Ty::UInt32,
            Value::Int64(_) => Ty::Int64,
            Value::UInt64(_) => Ty::UInt64,
            Value::Float(_) => Ty::Float,
            Value::Double(_) => Ty::Double,
            Value::Decimal(_) => Ty::Decimal,
            Value::Guid(_) => Ty::Guid,
            Value::Enum(def, _) => Ty::Enum(def.clone()),
            Value::Object(inst) => Ty::Class(inst.class.clone()),
            Value::Seq(seq) => Ty::Seq(Box::new(seq.elem.clone())),
            Value::Tuple(items) => Ty::Tuple(items.iter().map(|v| v.ty()).collect()),
            Value::Lambda(lambda) => Ty::Func(
                lambda.params.iter().map(|p| p.ty.clone()).collect(),
                Box::new(lambda.body.ty.clone()),
            ),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn seq(elem: Ty, items: Vec<Value>) -> Value {
        Value::Seq(SeqValue::new(elem, items))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&SeqValue> {
        match self {
            Value::Seq(seq) => Some(seq),
            _ => None,
        }
    }

    /// Widen to i64 when the value is any signed or unsigned integral that
    /// fits; used for enum re-tagging and shift counts.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::SByte(v) => Some(*v as i64),
            Value::Byte(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::UInt16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::UInt32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::Enum(_, v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Ordering between two values of the same promoted type. `None` when
    /// the pair has no defined order.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::SByte(a), Value::SByte(b)) => Some(a.cmp(b)),
            (Value::Byte(a), Value::Byte(b)) => Some(a.cmp(b)),
            (Value::Int16(a), Value::Int16(b)) => Some(a.cmp(b)),
            (Value::UInt16(a), Value::UInt16(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::UInt32(a), Value::UInt32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::UInt64(a), Value::UInt64(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::Enum(_, a), Value::Enum(_, b)) => Some(a.cmp(b)),
            (Value::Tuple(a), Value::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// A stable hash over the value, used by emitted data classes.
    pub fn hash_code(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        match self {
            Value::Null => 0u8.hash(&mut hasher),
            Value::Bool(v) => v.hash(&mut hasher),
            Value::Char(v) => v.hash(&mut hasher),
            Value::String(v) => v.hash(&mut hasher),
            Value::SByte(v) => v.hash(&mut hasher),
            Value::Byte(v) => v.hash(&mut hasher),
            Value::Int16(v) => v.hash(&mut hasher),
            Value::UInt16(v) => v.hash(&mut hasher),
            Value::Int32(v) => v.hash(&mut hasher),
            Value::UInt32(v) => v.hash(&mut hasher),
            Value::Int64(v) => v.hash(&mut hasher),
            Value::UInt64(v) => v.hash(&mut hasher),
            Value::Float(v) => v.to_bits().hash(&mut hasher),
            Value::Double(v) => v.to_bits().hash(&mut hasher),
            Value::Decimal(v) => v.hash(&mut hasher),
            Value::Guid(v) => v.hash(&mut hasher),
            Value::Enum(_, v) => v.hash(&mut hasher),
            Value::Object(inst) => {
                for slot in &inst.slots {
                    slot.hash_code().hash(&mut hasher);
                }
            }
            Value::Seq(seq) => {
                for item in seq.items.iter() {
                    item.hash_code().hash(&mut hasher);
                }
            }
            Value::Tuple(items) => {
                for item in items.iter() {
                    item.hash_code().hash(&mut hasher);
                }
            }
            Value::Lambda(lambda) => (Arc::as_ptr(lambda) as usize).hash(&mut hasher),
        }
        hasher.finish()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::SByte(a), Value::SByte(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::UInt16(a), Value::UInt16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::Enum(ea, a), Value::Enum(eb, b)) => Arc::ptr_eq(ea, eb) && a == b,
            (Value::Object(a), Value::Object(b)) => {
                // Emitted data classes compare field-wise; everything else
                // by reference.
                if a.class.is_dynamic || b.class.is_dynamic {
                    Arc::ptr_eq(&a.class, &b.class) && a.slots == b.slots
                } else {
                    Arc::ptr_eq(a, b)
                }
            }
            (Value::Seq(a), Value::Seq(b)) => Arc::ptr_eq(&a.items, &b.items),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Lambda(a), Value::Lambda(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::SByte(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Guid(v) => write!(f, "{}", v),
            Value::Enum(def, v) => match def.name_of(*v) {
                Some(name) => write!(f, "{}", name),
                None => write!(f, "{}", v),
            },
            Value::Object(inst) => write!(f, "{}", inst),
            Value::Seq(seq) => write!(f, "Seq<{}>[{}]", seq.elem, seq.items.len()),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Lambda(_) => write!(f, "<lambda>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert_eq!(Value::Int32(5).ty(), Ty::Int32);
        assert_eq!(Value::Null.ty(), Ty::Null);
        assert_eq!(
            Value::seq(Ty::Int32, vec![]).ty(),
            Ty::Seq(Box::new(Ty::Int32))
        );
        assert_eq!(
            Value::Tuple(Arc::new(vec![Value::Int32(1), Value::String("a".into())])).ty(),
            Ty::Tuple(vec![Ty::Int32, Ty::String])
        );
    }

    #[test]
    fn test_comparison() {
        assert_eq!(
            Value::Int32(1).compare(&Value::Int32(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::String("b".into()).compare(&Value::String("a".into())),
            Some(Ordering::Greater)
        );
        // NULL sorts first
        assert_eq!(
            Value::Null.compare(&Value::Int32(0)),
            Some(Ordering::Less)
        );
        // Mixed numeric variants have no defined order; operands are
        // promoted before comparison ever happens.
        assert_eq!(Value::Int32(1).compare(&Value::Int64(1)), None);
    }

    #[test]
    fn test_tuple_comparison_is_lexicographic() {
        let a = Value::Tuple(Arc::new(vec![Value::Int32(1), Value::Int32(9)]));
        let b = Value::Tuple(Arc::new(vec![Value::Int32(2), Value::Int32(0)]));
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(a.compare(&a), Some(Ordering::Equal));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int32(42).to_string(), "42");
        assert_eq!(Value::String("abc".into()).to_string(), "abc");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(
            Value::Tuple(Arc::new(vec![Value::Int32(1), Value::String("x".into())])).to_string(),
            "(1, x)"
        );
    }
}
