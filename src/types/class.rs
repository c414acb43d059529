//! Class and enum metadata for the host type model.
//!
//! A `ClassDef` is the reflected shape of a host type: ordered properties
//! backed by instance slots, instance and static methods with native bodies,
//! constructors and default indexers. Member lookup walks the base chain;
//! interface receivers resolve against the transitive interface closure.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::expression::error::EvalError;
use crate::runtime::value::Value;
use crate::types::ty::{ClassRef, EnumRef, Ty};

/// Native implementation of a method, constructor or indexer getter. The
/// first argument is the receiver (`None` for statics and constructors).
pub type NativeFn = Arc<dyn Fn(Option<&Value>, &[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// A readable field or auto-property, backed by an instance slot.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub ty: Ty,
    pub slot: usize,
}

pub struct MethodDef {
    pub name: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub is_static: bool,
    pub body: NativeFn,
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .field("is_static", &self.is_static)
            .finish()
    }
}

pub struct CtorDef {
    pub params: Vec<Ty>,
    pub body: NativeFn,
}

impl fmt::Debug for CtorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CtorDef").field("params", &self.params).finish()
    }
}

#[derive(Debug)]
pub struct ClassDef {
    pub name: String,
    pub base: Option<ClassRef>,
    pub interfaces: Vec<ClassRef>,
    pub is_interface: bool,
    /// Set for classes emitted by the data-class factory; their instances
    /// compare by field values rather than by reference.
    pub is_dynamic: bool,
    pub properties: Vec<PropertyDef>,
    pub methods: Vec<Arc<MethodDef>>,
    pub ctors: Vec<Arc<CtorDef>>,
    /// Default-indexer getters: parameter list is the index signature.
    pub indexers: Vec<Arc<MethodDef>>,
}

impl ClassDef {
    /// Find a property on this class only (no base walk), case-insensitive.
    pub fn own_property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// An enum type: named members over an underlying integral type.
#[derive(Debug)]
pub struct EnumDef {
    pub name: String,
    pub underlying: Ty,
    pub members: Vec<(String, i64)>,
}

impl EnumDef {
    pub fn new(name: impl Into<String>, members: Vec<(String, i64)>) -> EnumRef {
        Arc::new(EnumDef {
            name: name.into(),
            underlying: Ty::Int32,
            members,
        })
    }

    /// Case-insensitive member lookup.
    pub fn member(&self, name: &str) -> Option<i64> {
        self.members
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, _)| n.as_str())
    }
}

/// Iterate a class and its base chain, most-derived first.
pub fn self_and_bases(class: &ClassRef) -> impl Iterator<Item = ClassRef> {
    let mut chain = Vec::new();
    let mut current = Some(class.clone());
    while let Some(c) = current {
        current = c.base.clone();
        chain.push(c);
    }
    chain.into_iter()
}

/// The transitive interface closure of a type, computed iteratively with a
/// visited set so mutually referencing interfaces terminate.
pub fn interface_closure(class: &ClassRef) -> Vec<ClassRef> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut closure = Vec::new();
    let mut pending: Vec<ClassRef> = Vec::new();
    for c in self_and_bases(class) {
        pending.extend(c.interfaces.iter().cloned());
    }
    if class.is_interface {
        pending.push(class.clone());
    }
    while let Some(iface) = pending.pop() {
        if !visited.insert(Arc::as_ptr(&iface) as usize) {
            continue;
        }
        pending.extend(iface.interfaces.iter().cloned());
        closure.push(iface);
    }
    closure
}

/// Find a property on a class type, walking the base chain; for interface
/// receivers, walking the interface closure.
pub fn find_property(class: &ClassRef, name: &str) -> Option<PropertyDef> {
    if class.is_interface {
        for iface in interface_closure(class) {
            if let Some(p) = iface.own_property(name) {
                return Some(p.clone());
            }
        }
        return None;
    }
    for c in self_and_bases(class) {
        if let Some(p) = c.own_property(name) {
            return Some(p.clone());
        }
    }
    None
}

/// Collect method candidates by name, honoring instance/static access.
pub fn find_methods(class: &ClassRef, name: &str, is_static: bool) -> Vec<Arc<MethodDef>> {
    let mut out = Vec::new();
    let walk: Vec<ClassRef> = if class.is_interface {
        interface_closure(class)
    } else {
        self_and_bases(class).collect()
    };
    for c in walk {
        for m in &c.methods {
            if m.is_static == is_static && m.name.eq_ignore_ascii_case(name) {
                out.push(m.clone());
            }
        }
    }
    out
}

/// Builder for class definitions; properties are assigned slots in
/// registration order.
pub struct ClassBuilder {
    name: String,
    base: Option<ClassRef>,
    interfaces: Vec<ClassRef>,
    is_interface: bool,
    is_dynamic: bool,
    properties: Vec<PropertyDef>,
    methods: Vec<Arc<MethodDef>>,
    ctors: Vec<Arc<CtorDef>>,
    indexers: Vec<Arc<MethodDef>>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ClassBuilder {
            name: name.into(),
            base: None,
            interfaces: Vec::new(),
            is_interface: false,
            is_dynamic: false,
            properties: Vec::new(),
            methods: Vec::new(),
            ctors: Vec::new(),
            indexers: Vec::new(),
        }
    }

    pub fn interface(mut self) -> Self {
        self.is_interface = true;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.is_dynamic = true;
        self
    }

    pub fn base(mut self, base: ClassRef) -> Self {
        self.base = Some(base);
        self
    }

    pub fn implements(mut self, iface: ClassRef) -> Self {
        self.interfaces.push(iface);
        self
    }

    pub fn property(mut self, name: impl Into<String>, ty: Ty) -> Self {
        let slot = self.properties.len();
        self.properties.push(PropertyDef {
            name: name.into(),
            ty,
            slot,
        });
        self
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        params: Vec<Ty>,
        ret: Ty,
        body: NativeFn,
    ) -> Self {
        self.methods.push(Arc::new(MethodDef {
            name: name.into(),
            params,
            ret,
            is_static: false,
            body,
        }));
        self
    }

    pub fn static_method(
        mut self,
        name: impl Into<String>,
        params: Vec<Ty>,
        ret: Ty,
        body: NativeFn,
    ) -> Self {
        self.methods.push(Arc::new(MethodDef {
            name: name.into(),
            params,
            ret,
            is_static: true,
            body,
        }));
        self
    }

    pub fn ctor(mut self, params: Vec<Ty>, body: NativeFn) -> Self {
        self.ctors.push(Arc::new(CtorDef { params, body }));
        self
    }

    pub fn indexer(mut self, params: Vec<Ty>, ret: Ty, body: NativeFn) -> Self {
        self.indexers.push(Arc::new(MethodDef {
            name: "Item".to_string(),
            params,
            ret,
            is_static: false,
            body,
        }));
        self
    }

    pub fn build(self) -> ClassRef {
        Arc::new(ClassDef {
            name: self.name,
            base: self.base,
            interfaces: self.interfaces,
            is_interface: self.is_interface,
            is_dynamic: self.is_dynamic,
            properties: self.properties,
            methods: self.methods,
            ctors: self.ctors,
            indexers: self.indexers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_lookup_is_case_insensitive() {
        let class = ClassBuilder::new("User")
            .property("UserName", Ty::String)
            .property("Age", Ty::Int32)
            .build();
        assert!(class.own_property("username").is_some());
        assert_eq!(class.own_property("AGE").unwrap().slot, 1);
        assert!(class.own_property("Missing").is_none());
    }

    #[test]
    fn test_property_lookup_walks_base_chain() {
        let base = ClassBuilder::new("Entity").property("Id", Ty::Int32).build();
        let derived = ClassBuilder::new("User")
            .base(base)
            .property("Name", Ty::String)
            .build();
        assert_eq!(find_property(&derived, "id").unwrap().ty, Ty::Int32);
        assert_eq!(find_property(&derived, "name").unwrap().slot, 0);
    }

    #[test]
    fn test_interface_closure_handles_cycles() {
        // a <-> b reference each other; the visited set must terminate.
        let a = ClassBuilder::new("IA").interface().build();
        let b = ClassBuilder::new("IB").interface().implements(a.clone()).build();
        let c = ClassBuilder::new("IC")
            .interface()
            .implements(b.clone())
            .implements(a.clone())
            .build();
        let closure = interface_closure(&c);
        assert_eq!(closure.len(), 3);
    }

    #[test]
    fn test_enum_member_lookup() {
        let color = EnumDef::new(
            "Color",
            vec![("Red".into(), 0), ("Green".into(), 1), ("Blue".into(), 2)],
        );
        assert_eq!(color.member("green"), Some(1));
        assert_eq!(color.member("BLUE"), Some(2));
        assert_eq!(color.member("Purple"), None);
        assert_eq!(color.name_of(0), Some("Red"));
    }
}
