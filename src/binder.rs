//! Semantic binding: type promotion, overload resolution and the operator
//! signature tables they share.

pub mod overload;
pub mod promote;
pub mod signatures;

pub use overload::{resolve_overloads, Candidate, Resolution};
pub use promote::{explicit_conversion_allowed, explicit_convert, promote};
pub use signatures::{signatures, OpCategory};
