//! Type descriptors for the host type model.
//!
//! `Ty` identifies every type an expression node can carry: the numeric
//! tower, the built-in value types, nullable forms, registered classes and
//! enums, sequences, tuples and lambda types. Class and enum descriptors
//! compare by identity so that interned types (notably emitted data
//! classes) stay reference-equal.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::types::class::{ClassDef, EnumDef};

pub type ClassRef = Arc<ClassDef>;
pub type EnumRef = Arc<EnumDef>;

/// A host type.
#[derive(Debug, Clone)]
pub enum Ty {
    /// The result type of a call with no result.
    Void,
    /// The type of the `null` literal before promotion.
    Null,
    /// The top type; every value converts to it.
    Object,
    Bool,
    Char,
    String,
    Guid,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Decimal,
    /// Nullable form of a value type.
    Nullable(Box<Ty>),
    Enum(EnumRef),
    Class(ClassRef),
    /// An enumerable sequence of elements.
    Seq(Box<Ty>),
    /// A positional tuple. At most eight slots; when eight are present the
    /// last slot is the nested rest tuple.
    Tuple(Vec<Ty>),
    /// A lambda type: parameter types and result type.
    Func(Vec<Ty>, Box<Ty>),
}

impl PartialEq for Ty {
    fn eq(&self, other: &Self) -> bool {
        use Ty::*;
        match (self, other) {
            (Void, Void) | (Null, Null) | (Object, Object) => true,
            (Bool, Bool) | (Char, Char) | (String, String) | (Guid, Guid) => true,
            (SByte, SByte) | (Byte, Byte) | (Int16, Int16) | (UInt16, UInt16) => true,
            (Int32, Int32) | (UInt32, UInt32) | (Int64, Int64) | (UInt64, UInt64) => true,
            (Float, Float) | (Double, Double) | (Decimal, Decimal) => true,
            (Nullable(a), Nullable(b)) => a == b,
            (Enum(a), Enum(b)) => Arc::ptr_eq(a, b),
            (Class(a), Class(b)) => Arc::ptr_eq(a, b),
            (Seq(a), Seq(b)) => a == b,
            (Tuple(a), Tuple(b)) => a == b,
            (Func(ap, ar), Func(bp, br)) => ap == bp && ar == br,
            _ => false,
        }
    }
}

impl Eq for Ty {}

impl Hash for Ty {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Ty::Nullable(inner) | Ty::Seq(inner) => inner.hash(state),
            Ty::Enum(e) => (Arc::as_ptr(e) as usize).hash(state),
            Ty::Class(c) => (Arc::as_ptr(c) as usize).hash(state),
            Ty::Tuple(items) => items.hash(state),
            Ty::Func(params, ret) => {
                params.hash(state);
                ret.hash(state);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "Void"),
            Ty::Null => write!(f, "Null"),
            Ty::Object => write!(f, "Object"),
            Ty::Bool => write!(f, "Boolean"),
            Ty::Char => write!(f, "Char"),
            Ty::String => write!(f, "String"),
            Ty::Guid => write!(f, "Guid"),
            Ty::SByte => write!(f, "SByte"),
            Ty::Byte => write!(f, "Byte"),
            Ty::Int16 => write!(f, "Int16"),
            Ty::UInt16 => write!(f, "UInt16"),
            Ty::Int32 => write!(f, "Int32"),
            Ty::UInt32 => write!(f, "UInt32"),
            Ty::Int64 => write!(f, "Int64"),
            Ty::UInt64 => write!(f, "UInt64"),
            Ty::Float => write!(f, "Single"),
            Ty::Double => write!(f, "Double"),
            Ty::Decimal => write!(f, "Decimal"),
            Ty::Nullable(inner) => write!(f, "{}?", inner),
            Ty::Enum(e) => write!(f, "{}", e.name),
            Ty::Class(c) => write!(f, "{}", c.name),
            Ty::Seq(elem) => write!(f, "Seq<{}>", elem),
            Ty::Tuple(items) => {
                write!(f, "Tuple<")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ">")
            }
            Ty::Func(params, ret) => {
                write!(f, "Func<")?;
                for p in params {
                    write!(f, "{}, ", p)?;
                }
                write!(f, "{}>", ret)
            }
        }
    }
}

/// Classification of a numeric type: signedness family plus widening rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Signed(u8),
    Unsigned(u8),
    Real(u8),
    Decimal,
}

impl Ty {
    /// Strip the nullable wrapper, if any.
    pub fn non_nullable(&self) -> &Ty {
        match self {
            Ty::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Ty::Nullable(_))
    }

    /// Wrap a value type into its nullable form. Reference types and
    /// already-nullable types have no nullable form.
    pub fn nullable_form(&self) -> Option<Ty> {
        if self.is_value_type() && !self.is_nullable() {
            Some(Ty::Nullable(Box::new(self.clone())))
        } else {
            None
        }
    }

    /// Value types: the numeric tower, bool, char, Guid, enums, tuples and
    /// their nullable forms.
    pub fn is_value_type(&self) -> bool {
        match self {
            Ty::Bool
            | Ty::Char
            | Ty::Guid
            | Ty::SByte
            | Ty::Byte
            | Ty::Int16
            | Ty::UInt16
            | Ty::Int32
            | Ty::UInt32
            | Ty::Int64
            | Ty::UInt64
            | Ty::Float
            | Ty::Double
            | Ty::Decimal
            | Ty::Enum(_)
            | Ty::Tuple(_)
            | Ty::Nullable(_) => true,
            _ => false,
        }
    }

    pub fn is_reference_type(&self) -> bool {
        matches!(
            self,
            Ty::String | Ty::Object | Ty::Class(_) | Ty::Seq(_) | Ty::Func(_, _)
        )
    }

    /// Numeric classification of the non-nullable form; `None` for
    /// non-numeric types.
    pub fn numeric_kind(&self) -> Option<NumericKind> {
        match self.non_nullable() {
            Ty::SByte => Some(NumericKind::Signed(0)),
            Ty::Int16 => Some(NumericKind::Signed(1)),
            Ty::Int32 => Some(NumericKind::Signed(2)),
            Ty::Int64 => Some(NumericKind::Signed(3)),
            Ty::Byte => Some(NumericKind::Unsigned(0)),
            Ty::UInt16 => Some(NumericKind::Unsigned(1)),
            Ty::UInt32 => Some(NumericKind::Unsigned(2)),
            Ty::UInt64 => Some(NumericKind::Unsigned(3)),
            Ty::Float => Some(NumericKind::Real(0)),
            Ty::Double => Some(NumericKind::Real(1)),
            Ty::Decimal => Some(NumericKind::Decimal),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric_kind().is_some()
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self.numeric_kind(),
            Some(NumericKind::Signed(_)) | Some(NumericKind::Unsigned(_))
        )
    }

    pub fn is_signed_integral(&self) -> bool {
        matches!(self.numeric_kind(), Some(NumericKind::Signed(_)))
    }

    pub fn is_unsigned_integral(&self) -> bool {
        matches!(self.numeric_kind(), Some(NumericKind::Unsigned(_)))
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.non_nullable(), Ty::Enum(_))
    }

    pub fn as_enum(&self) -> Option<&EnumRef> {
        match self.non_nullable() {
            Ty::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassRef> {
        match self {
            Ty::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn seq_element(&self) -> Option<&Ty> {
        match self {
            Ty::Seq(elem) => Some(elem),
            _ => None,
        }
    }
}

/// The built-in implicit numeric widening table.
pub fn numeric_widens_to(from: &Ty, to: &Ty) -> bool {
    use Ty::*;
    match from {
        SByte => matches!(to, SByte | Int16 | Int32 | Int64 | Float | Double | Decimal),
        Byte => matches!(
            to,
            Byte | Int16 | UInt16 | Int32 | UInt32 | Int64 | UInt64 | Float | Double | Decimal
        ),
        Int16 => matches!(to, Int16 | Int32 | Int64 | Float | Double | Decimal),
        UInt16 => matches!(
            to,
            UInt16 | Int32 | UInt32 | Int64 | UInt64 | Float | Double | Decimal
        ),
        Int32 => matches!(to, Int32 | Int64 | Float | Double | Decimal),
        UInt32 => matches!(to, UInt32 | Int64 | UInt64 | Float | Double | Decimal),
        Int64 => matches!(to, Int64 | Float | Double | Decimal),
        UInt64 => matches!(to, UInt64 | Float | Double | Decimal),
        Float => matches!(to, Float | Double),
        Double => matches!(to, Double),
        Decimal => matches!(to, Decimal),
        _ => false,
    }
}

/// Whether `derived` can stand where `base` is expected, walking the base
/// chain and the transitive interface closure.
pub fn is_assignable(base: &Ty, derived: &Ty) -> bool {
    if base == derived {
        return true;
    }
    if *base == Ty::Object {
        return true;
    }
    match (base, derived) {
        (Ty::Class(b), Ty::Class(d)) => {
            if b.is_interface {
                crate::types::class::interface_closure(d)
                    .iter()
                    .any(|i| Arc::ptr_eq(i, b))
            } else {
                crate::types::class::self_and_bases(d).any(|c| Arc::ptr_eq(&c, b))
            }
        }
        _ => false,
    }
}

/// Implicit convertibility between types: identity, the numeric widening
/// table, null to nullable/reference targets, value-to-nullable lifting and
/// class assignability.
pub fn is_implicitly_convertible(from: &Ty, to: &Ty) -> bool {
    if from == to {
        return true;
    }
    if *from == Ty::Null {
        return to.is_reference_type() || to.is_nullable();
    }
    if let Ty::Nullable(inner) = to {
        if !from.is_nullable() && is_implicitly_convertible(from, inner) {
            return true;
        }
    }
    if let (Ty::Nullable(from_inner), Ty::Nullable(to_inner)) = (from, to) {
        if numeric_widens_to(from_inner, to_inner) {
            return true;
        }
    }
    if numeric_widens_to(from, to) {
        return true;
    }
    is_assignable(to, from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::class::ClassBuilder;

    #[test]
    fn test_nullable_forms() {
        assert_eq!(
            Ty::Int32.nullable_form(),
            Some(Ty::Nullable(Box::new(Ty::Int32)))
        );
        assert_eq!(Ty::String.nullable_form(), None);
        assert_eq!(Ty::Nullable(Box::new(Ty::Int32)).nullable_form(), None);
        assert_eq!(
            *Ty::Nullable(Box::new(Ty::Double)).non_nullable(),
            Ty::Double
        );
    }

    #[test]
    fn test_numeric_widening() {
        assert!(numeric_widens_to(&Ty::SByte, &Ty::Decimal));
        assert!(numeric_widens_to(&Ty::Byte, &Ty::UInt64));
        assert!(numeric_widens_to(&Ty::Int32, &Ty::Double));
        assert!(numeric_widens_to(&Ty::Float, &Ty::Double));
        assert!(!numeric_widens_to(&Ty::Int32, &Ty::UInt32));
        assert!(!numeric_widens_to(&Ty::Double, &Ty::Decimal));
        assert!(!numeric_widens_to(&Ty::UInt64, &Ty::Int64));
    }

    #[test]
    fn test_implicit_conversion_lifting() {
        let nullable_long = Ty::Nullable(Box::new(Ty::Int64));
        assert!(is_implicitly_convertible(&Ty::Int32, &nullable_long));
        assert!(is_implicitly_convertible(&Ty::Null, &nullable_long));
        assert!(is_implicitly_convertible(&Ty::Null, &Ty::String));
        assert!(!is_implicitly_convertible(&Ty::Null, &Ty::Int32));
        assert!(!is_implicitly_convertible(&nullable_long, &Ty::Int64));
    }

    #[test]
    fn test_class_identity() {
        let a = ClassBuilder::new("A").build();
        let b = ClassBuilder::new("A").build();
        assert_eq!(Ty::Class(a.clone()), Ty::Class(a.clone()));
        assert_ne!(Ty::Class(a), Ty::Class(b));
    }

    #[test]
    fn test_assignability_walks_bases() {
        let base = ClassBuilder::new("Base").build();
        let derived = ClassBuilder::new("Derived").base(base.clone()).build();
        assert!(is_assignable(&Ty::Class(base.clone()), &Ty::Class(derived)));
        assert!(is_assignable(&Ty::Object, &Ty::Class(base)));
        assert!(!is_assignable(&Ty::Int32, &Ty::Int64));
    }
}
