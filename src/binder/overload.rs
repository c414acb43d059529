//! Overload resolution over candidate parameter lists.
//!
//! One resolver serves operator signature tables, reflected methods,
//! constructors, indexers and aggregate operators: applicability first
//! (same arity, every argument promotable), then better-conversion pruning
//! among the applicable set. The caller receives zero, one or "ambiguous";
//! a unique winner also yields the arguments promoted to its parameters.

use crate::binder::promote::promote;
use crate::expression::node::{Expr, LiteralTable};
use crate::types::ty::Ty;

/// A candidate overload: its position in the caller's list plus parameter
/// types.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: usize,
    pub params: Vec<Ty>,
}

impl Candidate {
    pub fn new(index: usize, params: Vec<Ty>) -> Self {
        Candidate { index, params }
    }
}

/// Outcome of resolution.
#[derive(Debug)]
pub enum Resolution {
    NoMatch,
    Unique { index: usize, args: Vec<Expr> },
    Ambiguous,
}

/// Resolve `args` against `candidates`.
pub fn resolve_overloads(
    candidates: &[Candidate],
    args: &[Expr],
    literals: &LiteralTable,
) -> Resolution {
    let mut applicable: Vec<(&Candidate, Vec<Expr>)> = Vec::new();
    for cand in candidates {
        if let Some(promoted) = try_apply(cand, args, literals) {
            applicable.push((cand, promoted));
        }
    }

    if applicable.len() > 1 {
        let all: Vec<&Candidate> = applicable.iter().map(|(c, _)| *c).collect();
        let filtered: Vec<(&Candidate, Vec<Expr>)> = applicable
            .iter()
            .filter(|(cand, _)| {
                all.iter().all(|other| {
                    std::ptr::eq(*cand, *other) || is_better_than(args, cand, other)
                })
            })
            .map(|(c, a)| (*c, a.clone()))
            .collect();
        applicable = filtered;
    }

    match applicable.len() {
        0 => Resolution::NoMatch,
        1 => {
            let (cand, promoted) = applicable.into_iter().next().unwrap();
            Resolution::Unique {
                index: cand.index,
                args: promoted,
            }
        }
        _ => Resolution::Ambiguous,
    }
}

fn try_apply(cand: &Candidate, args: &[Expr], literals: &LiteralTable) -> Option<Vec<Expr>> {
    if cand.params.len() != args.len() {
        return None;
    }
    let mut promoted = Vec::with_capacity(args.len());
    for (arg, param) in args.iter().zip(cand.params.iter()) {
        promoted.push(promote(arg, param, false, literals)?);
    }
    Some(promoted)
}

/// `m1` beats `m2` when it is at least as good on every argument and
/// strictly better on one.
fn is_better_than(args: &[Expr], m1: &Candidate, m2: &Candidate) -> bool {
    let mut better = false;
    for (i, arg) in args.iter().enumerate() {
        match compare_conversions(&arg.ty, &m1.params[i], &m2.params[i]) {
            c if c < 0 => return false,
            c if c > 0 => better = true,
            _ => {}
        }
    }
    better
}

/// Rank two target types for a source: positive prefers `t1`, negative
/// prefers `t2`, zero is a tie.
fn compare_conversions(source: &Ty, t1: &Ty, t2: &Ty) -> i32 {
    if t1 == t2 {
        return 0;
    }
    if source == t1 {
        return 1;
    }
    if source == t2 {
        return -1;
    }
    let t1_to_t2 = crate::types::ty::is_implicitly_convertible(t1, t2);
    let t2_to_t1 = crate::types::ty::is_implicitly_convertible(t2, t1);
    if t1_to_t2 && !t2_to_t1 {
        return 1;
    }
    if t2_to_t1 && !t1_to_t2 {
        return -1;
    }
    if t1.is_signed_integral() && t2.is_unsigned_integral() {
        return 1;
    }
    if t2.is_signed_integral() && t1.is_unsigned_integral() {
        return -1;
    }
    0
}
