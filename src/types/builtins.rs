//! Built-in member surface of the predefined types.
//!
//! The original host exposed these through its class library; here they
//! are native methods over runtime values. Lookup is case-insensitive
//! everywhere, matching identifier resolution.

use std::sync::{Arc, OnceLock};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::expression::error::EvalError;
use crate::runtime::value::Value;
use crate::types::class::{ClassBuilder, MethodDef, NativeFn};
use crate::types::ty::{ClassRef, Ty};

fn method(name: &str, params: Vec<Ty>, ret: Ty, body: NativeFn) -> Arc<MethodDef> {
    Arc::new(MethodDef {
        name: name.to_string(),
        params,
        ret,
        is_static: false,
        body,
    })
}

fn static_fn(name: &str, params: Vec<Ty>, ret: Ty, body: NativeFn) -> Arc<MethodDef> {
    Arc::new(MethodDef {
        name: name.to_string(),
        params,
        ret,
        is_static: true,
        body,
    })
}

fn recv(this: Option<&Value>) -> Result<&Value, EvalError> {
    match this {
        Some(Value::Null) | None => Err(EvalError::NullReference),
        Some(v) => Ok(v),
    }
}

fn str_recv(this: Option<&Value>) -> Result<&str, EvalError> {
    match recv(this)? {
        Value::String(s) => Ok(s),
        other => Err(EvalError::InvalidOperand(format!(
            "string method on '{}'",
            other.ty()
        ))),
    }
}

fn str_arg(args: &[Value], i: usize) -> Result<&str, EvalError> {
    match args.get(i) {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Null) | None => Err(EvalError::NullReference),
        Some(other) => Err(EvalError::InvalidOperand(format!(
            "string argument expected, got '{}'",
            other.ty()
        ))),
    }
}

fn i32_arg(args: &[Value], i: usize) -> Result<i32, EvalError> {
    match args.get(i) {
        Some(Value::Int32(v)) => Ok(*v),
        _ => Err(EvalError::InvalidOperand("integer argument expected".into())),
    }
}

/// Parse Guid text: the canonical hyphenated form plus the braced
/// hex-group form `{0xAABBCCDD,0xAABB,0xAABB,{0xAA,..8 bytes..}}`.
pub fn parse_guid(text: &str) -> Option<Uuid> {
    if let Ok(guid) = Uuid::parse_str(text.trim()) {
        return Some(guid);
    }
    parse_guid_hex_groups(text)
}

fn parse_guid_hex_groups(text: &str) -> Option<Uuid> {
    let body = text
        .trim()
        .strip_prefix('{')?
        .strip_suffix('}')?
        .trim();
    let (head, tail) = body.split_once('{')?;
    let bytes_part = tail.strip_suffix('}').unwrap_or(tail);
    let mut head_fields = head.split(',').filter(|s| !s.trim().is_empty());
    let d1 = parse_hex(head_fields.next()?)? as u32;
    let d2 = parse_hex(head_fields.next()?)? as u16;
    let d3 = parse_hex(head_fields.next()?)? as u16;
    if head_fields.next().is_some() {
        return None;
    }
    let mut d4 = [0u8; 8];
    let mut count = 0;
    for part in bytes_part.split(',') {
        if count >= 8 {
            return None;
        }
        d4[count] = parse_hex(part)? as u8;
        count += 1;
    }
    if count != 8 {
        return None;
    }
    Some(Uuid::from_fields(d1, d2, d3, &d4))
}

fn parse_hex(text: &str) -> Option<u64> {
    let t = text.trim();
    let t = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X"))?;
    u64::from_str_radix(t, 16).ok()
}

/// Instance properties available in member position on built-in shapes.
pub fn instance_property(ty: &Ty, name: &str) -> Option<Ty> {
    match ty {
        Ty::String if name.eq_ignore_ascii_case("Length") => Some(Ty::Int32),
        Ty::Seq(_) if name.eq_ignore_ascii_case("Count") => Some(Ty::Int32),
        Ty::Tuple(items) => {
            let lower = name.to_ascii_lowercase();
            if let Some(digits) = lower.strip_prefix("item") {
                let n: usize = digits.parse().ok()?;
                if n >= 1 && n <= items.len().min(7) {
                    return Some(items[n - 1].clone());
                }
                return None;
            }
            if lower == "rest" && items.len() == 8 {
                return Some(items[7].clone());
            }
            None
        }
        _ => None,
    }
}

/// Instance methods on built-in shapes, including the universal
/// `ToString`/`Equals`/`CompareTo` surface present on every value.
pub fn instance_methods(ty: &Ty, name: &str) -> Vec<Arc<MethodDef>> {
    let mut out = Vec::new();
    if *ty == Ty::String {
        out.extend(string_methods(name));
    }
    if name.eq_ignore_ascii_case("ToString") {
        out.push(to_string_method().clone());
    }
    if name.eq_ignore_ascii_case("Equals") {
        out.push(equals_method().clone());
    }
    if name.eq_ignore_ascii_case("CompareTo") {
        out.push(compare_to_method().clone());
    }
    out
}

/// Static members reachable through a predefined type name.
pub fn static_methods(ty: &Ty, name: &str) -> Vec<Arc<MethodDef>> {
    match ty {
        Ty::Guid => guid_statics(name),
        Ty::String => string_statics(name),
        _ => Vec::new(),
    }
}

pub fn to_string_method() -> &'static Arc<MethodDef> {
    static METHOD: OnceLock<Arc<MethodDef>> = OnceLock::new();
    METHOD.get_or_init(|| {
        method(
            "ToString",
            vec![],
            Ty::String,
            Arc::new(|this, _| Ok(Value::String(recv(this)?.to_string()))),
        )
    })
}

pub fn equals_method() -> &'static Arc<MethodDef> {
    static METHOD: OnceLock<Arc<MethodDef>> = OnceLock::new();
    METHOD.get_or_init(|| {
        method(
            "Equals",
            vec![Ty::Object],
            Ty::Bool,
            Arc::new(|this, args| {
                let this = this.ok_or(EvalError::NullReference)?;
                Ok(Value::Bool(args.first().map(|a| this == a).unwrap_or(false)))
            }),
        )
    })
}

pub fn compare_to_method() -> &'static Arc<MethodDef> {
    static METHOD: OnceLock<Arc<MethodDef>> = OnceLock::new();
    METHOD.get_or_init(|| {
        method(
            "CompareTo",
            vec![Ty::Object],
            Ty::Int32,
            Arc::new(|this, args| {
                let this = this.ok_or(EvalError::NullReference)?;
                let other = args.first().ok_or(EvalError::NullReference)?;
                let ord = this
                    .compare(other)
                    .ok_or_else(|| EvalError::InvalidOperand("CompareTo".into()))?;
                Ok(Value::Int32(ord as i32))
            }),
        )
    })
}

/// The `Concat(object, object)` primitive that string `+` lowers to.
pub fn string_concat_method() -> &'static Arc<MethodDef> {
    static METHOD: OnceLock<Arc<MethodDef>> = OnceLock::new();
    METHOD.get_or_init(|| {
        static_fn(
            "Concat",
            vec![Ty::Object, Ty::Object],
            Ty::String,
            Arc::new(|_, args| {
                let mut out = String::new();
                for arg in args {
                    out.push_str(&arg.to_string());
                }
                Ok(Value::String(out))
            }),
        )
    })
}

fn string_statics(name: &str) -> Vec<Arc<MethodDef>> {
    let mut out = Vec::new();
    if name.eq_ignore_ascii_case("Concat") {
        out.push(string_concat_method().clone());
    }
    if name.eq_ignore_ascii_case("IsNullOrEmpty") {
        out.push(static_fn(
            "IsNullOrEmpty",
            vec![Ty::String],
            Ty::Bool,
            Arc::new(|_, args| {
                Ok(Value::Bool(match args.first() {
                    Some(Value::String(s)) => s.is_empty(),
                    _ => true,
                }))
            }),
        ));
    }
    out
}

fn string_methods(name: &str) -> Vec<Arc<MethodDef>> {
    let mut out = Vec::new();
    let push = |out: &mut Vec<Arc<MethodDef>>, m: Arc<MethodDef>| {
        if m.name.eq_ignore_ascii_case(name) {
            out.push(m);
        }
    };
    push(
        &mut out,
        method(
            "Contains",
            vec![Ty::String],
            Ty::Bool,
            Arc::new(|this, args| Ok(Value::Bool(str_recv(this)?.contains(str_arg(args, 0)?)))),
        ),
    );
    push(
        &mut out,
        method(
            "StartsWith",
            vec![Ty::String],
            Ty::Bool,
            Arc::new(|this, args| {
                Ok(Value::Bool(str_recv(this)?.starts_with(str_arg(args, 0)?)))
            }),
        ),
    );
    push(
        &mut out,
        method(
            "EndsWith",
            vec![Ty::String],
            Ty::Bool,
            Arc::new(|this, args| Ok(Value::Bool(str_recv(this)?.ends_with(str_arg(args, 0)?)))),
        ),
    );
    push(
        &mut out,
        method(
            "ToLower",
            vec![],
            Ty::String,
            Arc::new(|this, _| Ok(Value::String(str_recv(this)?.to_lowercase()))),
        ),
    );
    push(
        &mut out,
        method(
            "ToUpper",
            vec![],
            Ty::String,
            Arc::new(|this, _| Ok(Value::String(str_recv(this)?.to_uppercase()))),
        ),
    );
    push(
        &mut out,
        method(
            "Trim",
            vec![],
            Ty::String,
            Arc::new(|this, _| Ok(Value::String(str_recv(this)?.trim().to_string()))),
        ),
    );
    push(
        &mut out,
        method(
            "IndexOf",
            vec![Ty::String],
            Ty::Int32,
            Arc::new(|this, args| {
                let haystack = str_recv(this)?;
                let needle = str_arg(args, 0)?;
                let index = haystack
                    .find(needle)
                    .map(|byte| haystack[..byte].chars().count() as i32)
                    .unwrap_or(-1);
                Ok(Value::Int32(index))
            }),
        ),
    );
    push(
        &mut out,
        method(
            "Substring",
            vec![Ty::Int32],
            Ty::String,
            Arc::new(|this, args| {
                let s = str_recv(this)?;
                let start = i32_arg(args, 0)?;
                let chars: Vec<char> = s.chars().collect();
                if start < 0 || start as usize > chars.len() {
                    return Err(EvalError::IndexOutOfRange {
                        index: start as i64,
                        len: chars.len(),
                    });
                }
                Ok(Value::String(chars[start as usize..].iter().collect()))
            }),
        ),
    );
    push(
        &mut out,
        method(
            "Substring",
            vec![Ty::Int32, Ty::Int32],
            Ty::String,
            Arc::new(|this, args| {
                let s = str_recv(this)?;
                let start = i32_arg(args, 0)?;
                let len = i32_arg(args, 1)?;
                let chars: Vec<char> = s.chars().collect();
                let end = start.checked_add(len);
                match end {
                    Some(end)
                        if start >= 0 && len >= 0 && end as usize <= chars.len() =>
                    {
                        Ok(Value::String(
                            chars[start as usize..end as usize].iter().collect(),
                        ))
                    }
                    _ => Err(EvalError::IndexOutOfRange {
                        index: start as i64,
                        len: chars.len(),
                    }),
                }
            }),
        ),
    );
    out
}

fn guid_statics(name: &str) -> Vec<Arc<MethodDef>> {
    let mut out = Vec::new();
    if name.eq_ignore_ascii_case("Parse") {
        out.push(static_fn(
            "Parse",
            vec![Ty::String],
            Ty::Guid,
            Arc::new(|_, args| {
                let text = str_arg(args, 0)?;
                parse_guid(text)
                    .map(Value::Guid)
                    .ok_or_else(|| EvalError::InvalidGuid(text.to_string()))
            }),
        ));
    }
    if name.eq_ignore_ascii_case("NewGuid") {
        out.push(static_fn(
            "NewGuid",
            vec![],
            Ty::Guid,
            Arc::new(|_, _| Ok(Value::Guid(Uuid::new_v4()))),
        ));
    }
    out
}

/// The `Math` class: static overloads over the numeric tower, resolved by
/// the same machinery as any reflected method set.
pub fn math_class() -> ClassRef {
    let mut builder = ClassBuilder::new("Math");

    for ty in [Ty::Int32, Ty::Int64, Ty::Double, Ty::Decimal] {
        let ret = ty.clone();
        builder = builder.static_method(
            "Abs",
            vec![ty],
            ret,
            Arc::new(|_, args| match &args[0] {
                Value::Int32(v) => v
                    .checked_abs()
                    .map(Value::Int32)
                    .ok_or_else(|| EvalError::ArithmeticOverflow("Abs".into())),
                Value::Int64(v) => v
                    .checked_abs()
                    .map(Value::Int64)
                    .ok_or_else(|| EvalError::ArithmeticOverflow("Abs".into())),
                Value::Double(v) => Ok(Value::Double(v.abs())),
                Value::Decimal(v) => Ok(Value::Decimal(v.abs())),
                other => Err(EvalError::InvalidOperand(format!("Abs({})", other.ty()))),
            }),
        );
    }

    for ty in [Ty::Int32, Ty::Int64, Ty::Double, Ty::Decimal] {
        builder = builder.static_method(
            "Min",
            vec![ty.clone(), ty.clone()],
            ty.clone(),
            Arc::new(|_, args| pick(&args[0], &args[1], true)),
        );
        builder = builder.static_method(
            "Max",
            vec![ty.clone(), ty.clone()],
            ty,
            Arc::new(|_, args| pick(&args[0], &args[1], false)),
        );
    }

    fn pick(a: &Value, b: &Value, min: bool) -> Result<Value, EvalError> {
        let ord = a
            .compare(b)
            .ok_or_else(|| EvalError::InvalidOperand("Math.Min/Max".into()))?;
        let first = if min {
            ord != std::cmp::Ordering::Greater
        } else {
            ord != std::cmp::Ordering::Less
        };
        Ok(if first { a.clone() } else { b.clone() })
    }

    for ty in [Ty::Double, Ty::Decimal] {
        builder = builder.static_method(
            "Floor",
            vec![ty.clone()],
            ty.clone(),
            Arc::new(|_, args| match &args[0] {
                Value::Double(v) => Ok(Value::Double(v.floor())),
                Value::Decimal(v) => Ok(Value::Decimal(v.floor())),
                other => Err(EvalError::InvalidOperand(format!("Floor({})", other.ty()))),
            }),
        );
        builder = builder.static_method(
            "Ceiling",
            vec![ty.clone()],
            ty.clone(),
            Arc::new(|_, args| match &args[0] {
                Value::Double(v) => Ok(Value::Double(v.ceil())),
                Value::Decimal(v) => Ok(Value::Decimal(v.ceil())),
                other => Err(EvalError::InvalidOperand(format!("Ceiling({})", other.ty()))),
            }),
        );
        builder = builder.static_method(
            "Round",
            vec![ty.clone()],
            ty,
            Arc::new(|_, args| match &args[0] {
                Value::Double(v) => Ok(Value::Double(v.round())),
                Value::Decimal(v) => Ok(Value::Decimal(v.round())),
                other => Err(EvalError::InvalidOperand(format!("Round({})", other.ty()))),
            }),
        );
    }

    builder = builder.static_method(
        "Sqrt",
        vec![Ty::Double],
        Ty::Double,
        Arc::new(|_, args| match &args[0] {
            Value::Double(v) => Ok(Value::Double(v.sqrt())),
            other => Err(EvalError::InvalidOperand(format!("Sqrt({})", other.ty()))),
        }),
    );
    builder = builder.static_method(
        "Pow",
        vec![Ty::Double, Ty::Double],
        Ty::Double,
        Arc::new(|_, args| match (&args[0], &args[1]) {
            (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a.powf(*b))),
            _ => Err(EvalError::InvalidOperand("Pow".into())),
        }),
    );

    builder.build()
}

/// The `Convert` class: dynamic conversions from any value.
pub fn convert_class() -> ClassRef {
    fn to_i64(value: &Value) -> Result<i64, EvalError> {
        value
            .as_i64()
            .or_else(|| match value {
                Value::Double(v) => Some(*v as i64),
                Value::Float(v) => Some(*v as i64),
                Value::Decimal(v) => v.to_i64(),
                Value::String(s) => s.trim().parse().ok(),
                Value::Bool(b) => Some(*b as i64),
                _ => None,
            })
            .ok_or_else(|| EvalError::InvalidCast {
                from: value.ty().to_string(),
                to: "Int64".to_string(),
            })
    }

    ClassBuilder::new("Convert")
        .static_method(
            "ToInt32",
            vec![Ty::Object],
            Ty::Int32,
            Arc::new(|_, args| {
                let wide = to_i64(&args[0])?;
                i32::try_from(wide)
                    .map(Value::Int32)
                    .map_err(|_| EvalError::ConvertOverflow {
                        value: wide.to_string(),
                        target: "Int32".to_string(),
                    })
            }),
        )
        .static_method(
            "ToInt64",
            vec![Ty::Object],
            Ty::Int64,
            Arc::new(|_, args| to_i64(&args[0]).map(Value::Int64)),
        )
        .static_method(
            "ToDouble",
            vec![Ty::Object],
            Ty::Double,
            Arc::new(|_, args| match &args[0] {
                Value::String(s) => s.trim().parse().map(Value::Double).map_err(|_| {
                    EvalError::InvalidCast {
                        from: "String".to_string(),
                        to: "Double".to_string(),
                    }
                }),
                Value::Decimal(v) => Ok(Value::Double(v.to_f64().unwrap_or(f64::NAN))),
                other => other.as_f64().map(Value::Double).ok_or_else(|| {
                    EvalError::InvalidCast {
                        from: other.ty().to_string(),
                        to: "Double".to_string(),
                    }
                }),
            }),
        )
        .static_method(
            "ToDecimal",
            vec![Ty::Object],
            Ty::Decimal,
            Arc::new(|_, args| match &args[0] {
                Value::Decimal(v) => Ok(Value::Decimal(*v)),
                Value::String(s) => {
                    s.trim()
                        .parse()
                        .map(Value::Decimal)
                        .map_err(|_| EvalError::InvalidCast {
                            from: "String".to_string(),
                            to: "Decimal".to_string(),
                        })
                }
                other => {
                    use rust_decimal::prelude::FromPrimitive;
                    other
                        .as_f64()
                        .and_then(Decimal::from_f64)
                        .map(Value::Decimal)
                        .ok_or_else(|| EvalError::InvalidCast {
                            from: other.ty().to_string(),
                            to: "Decimal".to_string(),
                        })
                }
            }),
        )
        .static_method(
            "ToBoolean",
            vec![Ty::Object],
            Ty::Bool,
            Arc::new(|_, args| match &args[0] {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(EvalError::InvalidCast {
                        from: "String".to_string(),
                        to: "Boolean".to_string(),
                    }),
                },
                other => other.as_i64().map(|v| Value::Bool(v != 0)).ok_or_else(|| {
                    EvalError::InvalidCast {
                        from: other.ty().to_string(),
                        to: "Boolean".to_string(),
                    }
                }),
            }),
        )
        .static_method(
            "ToString",
            vec![Ty::Object],
            Ty::String,
            Arc::new(|_, args| Ok(Value::String(args[0].to_string()))),
        )
        .build()
}
