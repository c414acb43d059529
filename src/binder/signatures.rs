//! Operator signature tables.
//!
//! Each binary and unary operator category owns a fixed set of parameter
//! type lists. Operand typing selects the unique applicable signature via
//! the overload resolver, exactly as reflected method overloads are
//! resolved, and both operands are promoted to the winner's parameters.

use crate::types::ty::Ty;

/// Operator categories with distinct signature sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCategory {
    Logical,
    Bitwise,
    Equality,
    Relational,
    Shift,
    Add,
    Subtract,
    Arithmetic,
    Negation,
    Not,
}

fn nullable(ty: &Ty) -> Ty {
    Ty::Nullable(Box::new(ty.clone()))
}

/// Expand a list of operand types into same-type pairs, plain and lifted.
fn binary_pairs(types: &[Ty]) -> Vec<Vec<Ty>> {
    let mut sigs = Vec::with_capacity(types.len() * 2);
    for ty in types {
        sigs.push(vec![ty.clone(), ty.clone()]);
        sigs.push(vec![nullable(ty), nullable(ty)]);
    }
    sigs
}

fn unary_forms(types: &[Ty]) -> Vec<Vec<Ty>> {
    let mut sigs = Vec::with_capacity(types.len() * 2);
    for ty in types {
        sigs.push(vec![ty.clone()]);
        sigs.push(vec![nullable(ty)]);
    }
    sigs
}

fn arithmetic_operands() -> [Ty; 7] {
    [
        Ty::Int32,
        Ty::UInt32,
        Ty::Int64,
        Ty::UInt64,
        Ty::Float,
        Ty::Double,
        Ty::Decimal,
    ]
}

fn integral_operands() -> [Ty; 4] {
    [Ty::Int32, Ty::UInt32, Ty::Int64, Ty::UInt64]
}

/// The signature table for a category.
pub fn signatures(category: OpCategory) -> Vec<Vec<Ty>> {
    match category {
        OpCategory::Logical => binary_pairs(&[Ty::Bool]),
        OpCategory::Bitwise => {
            let mut sigs = binary_pairs(&integral_operands());
            sigs.extend(binary_pairs(&[Ty::Bool]));
            sigs
        }
        OpCategory::Arithmetic | OpCategory::Add | OpCategory::Subtract => {
            binary_pairs(&arithmetic_operands())
        }
        OpCategory::Relational => {
            let mut sigs = binary_pairs(&arithmetic_operands());
            sigs.push(vec![Ty::String, Ty::String]);
            sigs.extend(binary_pairs(&[Ty::Char]));
            sigs
        }
        OpCategory::Equality => {
            let mut sigs = signatures(OpCategory::Relational);
            sigs.extend(binary_pairs(&[Ty::Bool, Ty::Guid]));
            sigs
        }
        OpCategory::Shift => unary_forms(&integral_operands()),
        OpCategory::Negation => {
            unary_forms(&[Ty::Int32, Ty::Int64, Ty::Float, Ty::Double, Ty::Decimal])
        }
        OpCategory::Not => unary_forms(&[Ty::Bool]),
    }
}
