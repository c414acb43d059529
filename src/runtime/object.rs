//! Object instances of registered and emitted classes.

use std::fmt;
use std::sync::Arc;

use crate::runtime::value::Value;
use crate::types::class::{find_property, PropertyDef};
use crate::types::ty::ClassRef;

/// An instance is its class plus one slot per property, in declaration
/// order along the base chain (base slots precede derived slots only within
/// their own class; slot indices are per-class).
#[derive(Debug)]
pub struct Instance {
    pub class: ClassRef,
    pub slots: Vec<Value>,
}

impl Instance {
    pub fn new(class: ClassRef, slots: Vec<Value>) -> Arc<Instance> {
        Arc::new(Instance { class, slots })
    }

    /// Read a property by name, case-insensitive, walking the base chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        let prop = self.resolve(name)?;
        self.slots.get(prop.slot).cloned()
    }

    fn resolve(&self, name: &str) -> Option<PropertyDef> {
        find_property(&self.class, name)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.class.is_dynamic {
            // Emitted data classes render their property map.
            write!(f, "{{")?;
            for (i, prop) in self.class.properties.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={}", prop.name, self.slots[prop.slot])?;
            }
            write!(f, "}}")
        } else {
            write!(f, "{}", self.class.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::class::ClassBuilder;
    use crate::types::ty::Ty;

    #[test]
    fn test_slot_access() {
        let class = ClassBuilder::new("User")
            .property("Name", Ty::String)
            .property("Age", Ty::Int32)
            .build();
        let user = Instance::new(
            class,
            vec![Value::String("Ann".into()), Value::Int32(31)],
        );
        assert_eq!(user.get("name"), Some(Value::String("Ann".into())));
        assert_eq!(user.get("Age"), Some(Value::Int32(31)));
        assert_eq!(user.get("Missing"), None);
    }
}
