//! In-memory query adapters over compiled lambdas.
//!
//! The thin surface a host query provider would implement: each operator
//! parses its expression against the element type and drives the compiled
//! lambda over a value sequence. Grouping produces `GroupResult` rows and
//! supports multi-level keys through nested subgroups.

use std::cmp::Ordering;

use anyhow::Result;

use crate::engine::Engine;
use crate::expression::eval::invoke_lambda;
use crate::expression::node::OrderingDirective;
use crate::runtime::value::Value;
use crate::syntax::parser::Binding;
use crate::types::ty::Ty;

/// One group produced by `group_by`: the key, its members in input order,
/// and optional nested groups for multi-level grouping.
#[derive(Debug, Clone)]
pub struct GroupResult {
    pub key: Value,
    pub count: usize,
    pub items: Vec<Value>,
    pub subgroups: Option<Vec<GroupResult>>,
}

/// A queryable sequence bound to an engine.
pub struct Query<'e> {
    engine: &'e Engine,
    elem: Ty,
    items: Vec<Value>,
}

impl<'e> Query<'e> {
    pub fn new(engine: &'e Engine, elem: Ty, items: Vec<Value>) -> Self {
        Query {
            engine,
            elem,
            items,
        }
    }

    pub fn elem_ty(&self) -> &Ty {
        &self.elem
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Value> {
        self.items
    }

    /// Keep the elements matching a predicate expression.
    pub fn where_(self, predicate: &str, values: &[Binding]) -> Result<Query<'e>> {
        let lambda = self
            .engine
            .parse_lambda(&self.elem, Some(&Ty::Bool), predicate, values)?;
        let mut kept = Vec::new();
        for item in &self.items {
            if invoke_lambda(&lambda, std::slice::from_ref(item))? == Value::Bool(true) {
                kept.push(item.clone());
            }
        }
        Ok(Query {
            engine: self.engine,
            elem: self.elem,
            items: kept,
        })
    }

    /// Project each element through a selector expression.
    pub fn select(self, selector: &str, values: &[Binding]) -> Result<Query<'e>> {
        let lambda = self.engine.parse_lambda(&self.elem, None, selector, values)?;
        let elem = lambda.return_ty().clone();
        let mut projected = Vec::with_capacity(self.items.len());
        for item in &self.items {
            projected.push(invoke_lambda(&lambda, std::slice::from_ref(item))?);
        }
        Ok(Query {
            engine: self.engine,
            elem,
            items: projected,
        })
    }

    /// Sort by an ordering clause (`"Age desc, Name"`). The sort is stable
    /// and applies selectors left to right.
    pub fn order_by(self, ordering: &str, values: &[Binding]) -> Result<Query<'e>> {
        let directives = self.engine.parse_ordering(&self.elem, ordering, values)?;
        let mut keyed: Vec<(Vec<Value>, Value)> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let mut keys = Vec::with_capacity(directives.len());
            for directive in &directives {
                keys.push(invoke_lambda(
                    &directive.selector,
                    std::slice::from_ref(item),
                )?);
            }
            keyed.push((keys, item.clone()));
        }
        keyed.sort_by(|(ka, _), (kb, _)| compare_keys(ka, kb, &directives));
        Ok(Query {
            engine: self.engine,
            elem: self.elem,
            items: keyed.into_iter().map(|(_, v)| v).collect(),
        })
    }

    /// Group by a key expression, preserving first-appearance order.
    pub fn group_by(self, key: &str, values: &[Binding]) -> Result<Vec<GroupResult>> {
        self.group_by_many(&[key], values)
    }

    /// Group by several key expressions; each level nests inside the
    /// previous one as subgroups.
    pub fn group_by_many(self, keys: &[&str], values: &[Binding]) -> Result<Vec<GroupResult>> {
        group_levels(self.engine, &self.elem, &self.items, keys, values)
    }

    pub fn any(&self, predicate: &str, values: &[Binding]) -> Result<bool> {
        let lambda = self
            .engine
            .parse_lambda(&self.elem, Some(&Ty::Bool), predicate, values)?;
        for item in &self.items {
            if invoke_lambda(&lambda, std::slice::from_ref(item))? == Value::Bool(true) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn first(&self) -> Option<&Value> {
        self.items.first()
    }

    pub fn take(mut self, n: usize) -> Query<'e> {
        self.items.truncate(n);
        self
    }

    pub fn skip(mut self, n: usize) -> Query<'e> {
        if n >= self.items.len() {
            self.items.clear();
        } else {
            self.items.drain(..n);
        }
        self
    }
}

fn compare_keys(a: &[Value], b: &[Value], directives: &[OrderingDirective]) -> Ordering {
    for (i, directive) in directives.iter().enumerate() {
        let ord = a[i].compare(&b[i]).unwrap_or(Ordering::Equal);
        let ord = if directive.ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn group_levels(
    engine: &Engine,
    elem: &Ty,
    items: &[Value],
    keys: &[&str],
    values: &[Binding],
) -> Result<Vec<GroupResult>> {
    let (key_text, rest) = match keys.split_first() {
        Some(split) => split,
        None => return Ok(Vec::new()),
    };
    let lambda = engine.parse_lambda(elem, None, key_text, values)?;

    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for item in items {
        let key = invoke_lambda(&lambda, std::slice::from_ref(item))?;
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(item.clone()),
            None => groups.push((key, vec![item.clone()])),
        }
    }

    let mut results = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let subgroups = if rest.is_empty() {
            None
        } else {
            Some(group_levels(engine, elem, &members, rest, values)?)
        };
        results.push(GroupResult {
            key,
            count: members.len(),
            items: members,
            subgroups,
        });
    }
    Ok(results)
}
