//! Host type model: descriptors, class/enum metadata, built-in member
//! surface and the recognized-type resolver.

pub mod builtins;
pub mod class;
pub mod registry;
pub mod ty;

pub use class::{ClassBuilder, ClassDef, CtorDef, EnumDef, MethodDef, NativeFn, PropertyDef};
pub use registry::{TypeEntry, TypeRegistry};
pub use ty::{is_assignable, is_implicitly_convertible, ClassRef, EnumRef, NumericKind, Ty};
