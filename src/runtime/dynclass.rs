//! Process-wide factory for emitted data classes.
//!
//! `new(a as X, b)` projections materialize instances of classes keyed by
//! their ordered `(name, type)` signature. The cache lives for the process:
//! equal signatures always resolve to the same class reference, so values
//! projected by independent parses stay mutually comparable.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::types::class::ClassBuilder;
use crate::types::ty::{ClassRef, Ty};

/// One property of a data-class signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DynamicProperty {
    pub name: String,
    pub ty: Ty,
}

impl DynamicProperty {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        DynamicProperty {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered signature; equality is element-wise over name and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Signature(Vec<DynamicProperty>);

struct ClassCache {
    classes: RwLock<HashMap<Signature, ClassRef>>,
}

fn cache() -> &'static ClassCache {
    static CACHE: OnceLock<ClassCache> = OnceLock::new();
    CACHE.get_or_init(|| ClassCache {
        classes: RwLock::new(HashMap::new()),
    })
}

/// Fetch the emitted class for a signature, emitting it on first use.
///
/// Readers never block readers; the write path re-probes under the write
/// lock so a signature is emitted at most once.
pub fn get_or_create_class(properties: &[DynamicProperty]) -> ClassRef {
    let cache = cache();
    let key = Signature(properties.to_vec());
    {
        let read = cache.classes.read();
        if let Some(class) = read.get(&key) {
            return class.clone();
        }
    }
    let mut write = cache.classes.write();
    if let Some(class) = write.get(&key) {
        return class.clone();
    }
    let name = format!("DynamicClass{}", write.len() + 1);
    let mut builder = ClassBuilder::new(name).dynamic();
    for prop in properties {
        builder = builder.property(prop.name.clone(), prop.ty.clone());
    }
    let class = builder.build();
    write.insert(key, class.clone());
    class
}
