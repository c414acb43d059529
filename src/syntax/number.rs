//! Number-literal parsing as a chain of responsibility.
//!
//! Each handler declares the suffix letters it owns, a priority and the
//! literal kind it resolves. The lexer consumes any registered suffix
//! character after the digits; the registry later resolves the full token
//! text with the first handler (lowest priority first) of the right kind
//! whose `can_parse` accepts it.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::runtime::value::Value;

/// Which literal family a handler resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Integer,
    Real,
}

pub trait NumberParser: Send + Sync {
    /// Handlers run lowest priority first.
    fn priority(&self) -> i32;
    fn kind(&self) -> NumberKind;
    /// Uppercase suffix letters this handler contributes to the lexer's
    /// accepted set.
    fn suffixes(&self) -> &[char];
    fn can_parse(&self, text: &str) -> bool;
    fn parse(&self, text: &str) -> Option<Value>;
}

fn digits_only(text: &str) -> bool {
    let body = text.strip_prefix('-').unwrap_or(text);
    !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit())
}

struct FloatParser;

impl NumberParser for FloatParser {
    fn priority(&self) -> i32 {
        10
    }
    fn kind(&self) -> NumberKind {
        NumberKind::Real
    }
    fn suffixes(&self) -> &[char] {
        &['F']
    }
    fn can_parse(&self, text: &str) -> bool {
        text.to_ascii_uppercase().ends_with('F')
    }
    fn parse(&self, text: &str) -> Option<Value> {
        f32::from_str(&text[..text.len() - 1]).ok().map(Value::Float)
    }
}

struct DecimalParser;

impl NumberParser for DecimalParser {
    fn priority(&self) -> i32 {
        10
    }
    fn kind(&self) -> NumberKind {
        NumberKind::Real
    }
    fn suffixes(&self) -> &[char] {
        &['M']
    }
    fn can_parse(&self, text: &str) -> bool {
        text.to_ascii_uppercase().ends_with('M')
    }
    fn parse(&self, text: &str) -> Option<Value> {
        let body = &text[..text.len() - 1];
        Decimal::from_str(body)
            .ok()
            .or_else(|| Decimal::from_scientific(body).ok())
            .map(Value::Decimal)
    }
}

struct DoubleParser;

impl NumberParser for DoubleParser {
    fn priority(&self) -> i32 {
        20
    }
    fn kind(&self) -> NumberKind {
        NumberKind::Real
    }
    fn suffixes(&self) -> &[char] {
        &['D']
    }
    fn can_parse(&self, text: &str) -> bool {
        text.to_ascii_uppercase().ends_with('D')
    }
    fn parse(&self, text: &str) -> Option<Value> {
        f64::from_str(&text[..text.len() - 1]).ok().map(Value::Double)
    }
}

/// Suffix-less real literals resolve as double.
struct RealFallbackParser;

impl NumberParser for RealFallbackParser {
    fn priority(&self) -> i32 {
        100
    }
    fn kind(&self) -> NumberKind {
        NumberKind::Real
    }
    fn suffixes(&self) -> &[char] {
        &[]
    }
    fn can_parse(&self, text: &str) -> bool {
        text.bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'E' | b'e' | b'+' | b'-'))
    }
    fn parse(&self, text: &str) -> Option<Value> {
        f64::from_str(text).ok().map(Value::Double)
    }
}

/// `UB`/`US`/`UI`/`UL`, or bare `B`, resolve unsigned integrals.
struct UnsignedIntegerParser;

impl UnsignedIntegerParser {
    fn split(text: &str) -> Option<(&str, IntWidth)> {
        let upper = text.to_ascii_uppercase();
        if upper.len() >= 2 {
            let body = &text[..text.len() - 2];
            match &upper[upper.len() - 2..] {
                "UB" => return Some((body, IntWidth::Byte)),
                "US" => return Some((body, IntWidth::UInt16)),
                "UI" => return Some((body, IntWidth::UInt32)),
                "UL" => return Some((body, IntWidth::UInt64)),
                _ => {}
            }
        }
        if upper.ends_with('B') {
            return Some((&text[..text.len() - 1], IntWidth::Byte));
        }
        None
    }
}

/// Target widths shared by the two suffix handlers.
#[derive(Clone, Copy)]
enum IntWidth {
    SByte,
    Int16,
    Int32,
    Int64,
    Byte,
    UInt16,
    UInt32,
    UInt64,
}

fn parse_as(body: &str, target: IntWidth) -> Option<Value> {
    match target {
        IntWidth::SByte => i8::from_str(body).ok().map(Value::SByte),
        IntWidth::Int16 => i16::from_str(body).ok().map(Value::Int16),
        IntWidth::Int32 => i32::from_str(body).ok().map(Value::Int32),
        IntWidth::Int64 => i64::from_str(body).ok().map(Value::Int64),
        IntWidth::Byte => u8::from_str(body).ok().map(Value::Byte),
        IntWidth::UInt16 => u16::from_str(body).ok().map(Value::UInt16),
        IntWidth::UInt32 => u32::from_str(body).ok().map(Value::UInt32),
        IntWidth::UInt64 => u64::from_str(body).ok().map(Value::UInt64),
    }
}

impl NumberParser for UnsignedIntegerParser {
    fn priority(&self) -> i32 {
        10
    }
    fn kind(&self) -> NumberKind {
        NumberKind::Integer
    }
    fn suffixes(&self) -> &[char] {
        &['U', 'B']
    }
    fn can_parse(&self, text: &str) -> bool {
        match Self::split(text) {
            Some((body, _)) => digits_only(body) && !body.starts_with('-'),
            None => false,
        }
    }
    fn parse(&self, text: &str) -> Option<Value> {
        let (body, target) = Self::split(text)?;
        parse_as(body, target)
    }
}

/// `SB`/`S`/`I`/`L` resolve signed integrals.
struct SignedIntegerParser;

impl SignedIntegerParser {
    fn split(text: &str) -> Option<(&str, IntWidth)> {
        let upper = text.to_ascii_uppercase();
        if upper.len() >= 2 && upper.ends_with("SB") {
            return Some((&text[..text.len() - 2], IntWidth::SByte));
        }
        match upper.chars().last() {
            Some('S') => Some((&text[..text.len() - 1], IntWidth::Int16)),
            Some('I') => Some((&text[..text.len() - 1], IntWidth::Int32)),
            Some('L') => Some((&text[..text.len() - 1], IntWidth::Int64)),
            _ => None,
        }
    }
}

impl NumberParser for SignedIntegerParser {
    fn priority(&self) -> i32 {
        20
    }
    fn kind(&self) -> NumberKind {
        NumberKind::Integer
    }
    fn suffixes(&self) -> &[char] {
        &['S', 'I', 'L', 'B']
    }
    fn can_parse(&self, text: &str) -> bool {
        match Self::split(text) {
            Some((body, _)) => digits_only(body),
            None => false,
        }
    }
    fn parse(&self, text: &str) -> Option<Value> {
        let (body, target) = Self::split(text)?;
        parse_as(body, target)
    }
}

/// Suffix-less integers pick the narrowest fitting type: int, uint, long,
/// ulong for positive spellings; int then long for negative ones.
struct IntegerFallbackParser;

impl NumberParser for IntegerFallbackParser {
    fn priority(&self) -> i32 {
        100
    }
    fn kind(&self) -> NumberKind {
        NumberKind::Integer
    }
    fn suffixes(&self) -> &[char] {
        &[]
    }
    fn can_parse(&self, text: &str) -> bool {
        digits_only(text)
    }
    fn parse(&self, text: &str) -> Option<Value> {
        if text.starts_with('-') {
            if let Ok(v) = i32::from_str(text) {
                return Some(Value::Int32(v));
            }
            return i64::from_str(text).ok().map(Value::Int64);
        }
        if let Ok(v) = i32::from_str(text) {
            return Some(Value::Int32(v));
        }
        if let Ok(v) = u32::from_str(text) {
            return Some(Value::UInt32(v));
        }
        if let Ok(v) = i64::from_str(text) {
            return Some(Value::Int64(v));
        }
        u64::from_str(text).ok().map(Value::UInt64)
    }
}

/// The immutable handler chain; build once, share via `Arc`.
pub struct NumberParserRegistry {
    parsers: Vec<Arc<dyn NumberParser>>,
    suffix_set: Vec<char>,
}

impl NumberParserRegistry {
    /// The default handler bundle from the table above.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(vec![
            Arc::new(FloatParser),
            Arc::new(DecimalParser),
            Arc::new(DoubleParser),
            Arc::new(RealFallbackParser),
            Arc::new(UnsignedIntegerParser),
            Arc::new(SignedIntegerParser),
            Arc::new(IntegerFallbackParser),
        ])
    }

    pub fn new(mut parsers: Vec<Arc<dyn NumberParser>>) -> Arc<Self> {
        parsers.sort_by_key(|p| p.priority());
        let mut suffix_set: Vec<char> = parsers
            .iter()
            .flat_map(|p| p.suffixes().iter().copied())
            .collect();
        suffix_set.sort_unstable();
        suffix_set.dedup();
        Arc::new(NumberParserRegistry {
            parsers,
            suffix_set,
        })
    }

    /// Whether a character may follow the digits of a literal.
    pub fn is_suffix_char(&self, c: char) -> bool {
        self.suffix_set.contains(&c.to_ascii_uppercase())
    }

    /// Resolve a literal of the given kind; `None` when no handler accepts
    /// it or the accepting handler fails.
    pub fn resolve(&self, kind: NumberKind, text: &str) -> Option<Value> {
        self.parsers
            .iter()
            .filter(|p| p.kind() == kind)
            .find(|p| p.can_parse(text))
            .and_then(|p| p.parse(text))
    }
}
