//! The recognized-type resolver.
//!
//! Maps simple type names, case-insensitively, to the types an expression
//! may address directly: the predefined value types and their aliases, the
//! static helper classes, and whatever the embedder registers. Immutable
//! after construction and freely shared.

use std::collections::HashMap;

use crate::types::builtins;
use crate::types::ty::{ClassRef, EnumRef, Ty};

/// What a recognized name resolves to.
#[derive(Debug, Clone)]
pub enum TypeEntry {
    Prim(Ty),
    Class(ClassRef),
    Enum(EnumRef),
}

impl TypeEntry {
    /// The type this entry denotes when used as a conversion or
    /// constructor target.
    pub fn ty(&self) -> Ty {
        match self {
            TypeEntry::Prim(ty) => ty.clone(),
            TypeEntry::Class(class) => Ty::Class(class.clone()),
            TypeEntry::Enum(def) => Ty::Enum(def.clone()),
        }
    }
}

#[derive(Debug)]
pub struct TypeRegistry {
    names: HashMap<String, TypeEntry>,
}

impl TypeRegistry {
    /// A registry holding only the predefined types.
    pub fn with_defaults() -> Self {
        let mut registry = TypeRegistry {
            names: HashMap::new(),
        };
        let prims: &[(&str, Ty)] = &[
            ("Object", Ty::Object),
            ("Boolean", Ty::Bool),
            ("bool", Ty::Bool),
            ("Char", Ty::Char),
            ("String", Ty::String),
            ("string", Ty::String),
            ("Guid", Ty::Guid),
            ("SByte", Ty::SByte),
            ("Byte", Ty::Byte),
            ("Int16", Ty::Int16),
            ("short", Ty::Int16),
            ("UInt16", Ty::UInt16),
            ("ushort", Ty::UInt16),
            ("Int32", Ty::Int32),
            ("int", Ty::Int32),
            ("UInt32", Ty::UInt32),
            ("uint", Ty::UInt32),
            ("Int64", Ty::Int64),
            ("long", Ty::Int64),
            ("UInt64", Ty::UInt64),
            ("ulong", Ty::UInt64),
            ("Single", Ty::Float),
            ("float", Ty::Float),
            ("Double", Ty::Double),
            ("double", Ty::Double),
            ("Decimal", Ty::Decimal),
            ("decimal", Ty::Decimal),
        ];
        for (name, ty) in prims {
            registry.insert(name, TypeEntry::Prim(ty.clone()));
        }
        registry.insert("Math", TypeEntry::Class(builtins::math_class()));
        registry.insert("Convert", TypeEntry::Class(builtins::convert_class()));
        registry
    }

    fn insert(&mut self, name: &str, entry: TypeEntry) {
        self.names.insert(name.to_ascii_lowercase(), entry);
    }

    /// Register a class addressable by its simple name.
    pub fn register_class(&mut self, class: ClassRef) {
        self.insert(&class.name.clone(), TypeEntry::Class(class));
    }

    pub fn register_enum(&mut self, def: EnumRef) {
        self.insert(&def.name.clone(), TypeEntry::Enum(def));
    }

    /// Case-insensitive name lookup.
    pub fn lookup(&self, name: &str) -> Option<&TypeEntry> {
        self.names.get(&name.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::class::{ClassBuilder, EnumDef};

    #[test]
    fn test_predefined_names() {
        let registry = TypeRegistry::with_defaults();
        assert!(matches!(
            registry.lookup("Int32"),
            Some(TypeEntry::Prim(Ty::Int32))
        ));
        assert!(matches!(
            registry.lookup("int"),
            Some(TypeEntry::Prim(Ty::Int32))
        ));
        assert!(matches!(
            registry.lookup("guid"),
            Some(TypeEntry::Prim(Ty::Guid))
        ));
        assert!(matches!(
            registry.lookup("DECIMAL"),
            Some(TypeEntry::Prim(Ty::Decimal))
        ));
        assert!(matches!(registry.lookup("Math"), Some(TypeEntry::Class(_))));
        assert!(registry.lookup("DateTime").is_none());
    }

    #[test]
    fn test_registration() {
        let mut registry = TypeRegistry::with_defaults();
        registry.register_class(ClassBuilder::new("User").build());
        registry.register_enum(EnumDef::new("Color", vec![("Red".into(), 0)]));
        assert!(matches!(registry.lookup("user"), Some(TypeEntry::Class(_))));
        assert!(matches!(registry.lookup("COLOR"), Some(TypeEntry::Enum(_))));
    }
}
