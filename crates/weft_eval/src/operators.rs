//! Binary operator implementations for the evaluator.
//!
//! Direct enum-based dispatch over a fixed operator set, with the host
//! language's coercion rules: loose equality coerces primitives, `+`
//! concatenates when either side is a string, ordering falls back to
//! numeric comparison, and bitwise operators work on 32-bit integers.
//! Every operator is total — invalid operands flow through NaN or `false`
//! rather than failing, so the only runtime failures live in scope lookup,
//! member access, updates, and host calls.

use weft_ir::{BinaryOp, Value};

/// Evaluate a binary operation.
///
/// Logical `&&`/`||`/`??` are not handled here: they short-circuit, so the
/// evaluator must decide whether the right side runs at all.
pub fn evaluate_binary(lhs: &Value, rhs: &Value, op: BinaryOp) -> Value {
    match op {
        BinaryOp::Add => eval_add(lhs, rhs),
        BinaryOp::Sub => Value::Number(lhs.as_number() - rhs.as_number()),
        BinaryOp::Mul => Value::Number(lhs.as_number() * rhs.as_number()),
        BinaryOp::Div => Value::Number(lhs.as_number() / rhs.as_number()),
        BinaryOp::Rem => Value::Number(lhs.as_number() % rhs.as_number()),
        BinaryOp::Eq => Value::Bool(loose_eq(lhs, rhs)),
        BinaryOp::NotEq => Value::Bool(!loose_eq(lhs, rhs)),
        BinaryOp::StrictEq => Value::Bool(strict_eq(lhs, rhs)),
        BinaryOp::StrictNotEq => Value::Bool(!strict_eq(lhs, rhs)),
        BinaryOp::Lt => compare(lhs, rhs, |o| o == std::cmp::Ordering::Less),
        BinaryOp::LtEq => compare(lhs, rhs, |o| o != std::cmp::Ordering::Greater),
        BinaryOp::Gt => compare(lhs, rhs, |o| o == std::cmp::Ordering::Greater),
        BinaryOp::GtEq => compare(lhs, rhs, |o| o != std::cmp::Ordering::Less),
        BinaryOp::BitAnd => int32_op(lhs, rhs, |a, b| a & b),
        BinaryOp::BitOr => int32_op(lhs, rhs, |a, b| a | b),
        BinaryOp::BitXor => int32_op(lhs, rhs, |a, b| a ^ b),
        BinaryOp::Shl => int32_op(lhs, rhs, |a, b| a.wrapping_shl(b as u32 & 31)),
        BinaryOp::Shr => int32_op(lhs, rhs, |a, b| a.wrapping_shr(b as u32 & 31)),
        BinaryOp::UShr => {
            let a = to_int32(lhs) as u32;
            let shift = to_int32(rhs) as u32 & 31;
            Value::Number(f64::from(a.wrapping_shr(shift)))
        }
        BinaryOp::In => Value::Bool(eval_in(lhs, rhs)),
    }
}

/// `+`: string concatenation when either side is a string, numeric addition
/// otherwise.
fn eval_add(lhs: &Value, rhs: &Value) -> Value {
    if matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)) {
        Value::String(format!(
            "{}{}",
            lhs.to_display_string(),
            rhs.to_display_string()
        ))
    } else {
        Value::Number(lhs.as_number() + rhs.as_number())
    }
}

/// Strict equality: same type and equal value. NaN is unequal to itself.
pub fn strict_eq(lhs: &Value, rhs: &Value) -> bool {
    lhs == rhs
}

/// Loose equality: strict within a type, plus the host language's
/// primitive coercions. `null == undefined`, numbers and strings compare
/// numerically, booleans coerce to numbers. Arrays and objects never
/// loosely equal primitives.
pub fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null | Value::Undefined, Value::Null | Value::Undefined) => true,
        (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_))
        | (Value::Bool(_), Value::Bool(_))
        | (Value::Array(_), _)
        | (_, Value::Array(_))
        | (Value::Object(_), _)
        | (_, Value::Object(_))
        | (Value::Callable(_), _)
        | (_, Value::Callable(_)) => strict_eq(lhs, rhs),
        (Value::Null | Value::Undefined, _) | (_, Value::Null | Value::Undefined) => false,
        // Remaining pairs are primitive cross-type: coerce both to numbers.
        _ => {
            let (a, b) = (lhs.as_number(), rhs.as_number());
            !a.is_nan() && !b.is_nan() && a == b
        }
    }
}

/// Ordering: lexicographic for two strings, numeric otherwise. Comparisons
/// involving NaN are always false.
fn compare(lhs: &Value, rhs: &Value, test: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return Value::Bool(test(a.cmp(b)));
    }
    let (a, b) = (lhs.as_number(), rhs.as_number());
    match a.partial_cmp(&b) {
        Some(ordering) => Value::Bool(test(ordering)),
        None => Value::Bool(false),
    }
}

/// Membership: key in object, value in array, substring in string.
/// Anything else is false.
fn eval_in(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Object(map) => map.contains_key(&needle.to_display_string()),
        Value::Array(items) => items.iter().any(|item| strict_eq(item, needle)),
        Value::String(s) => s.contains(&needle.to_display_string()),
        _ => false,
    }
}

fn int32_op(lhs: &Value, rhs: &Value, op: impl Fn(i32, i32) -> i32) -> Value {
    Value::Number(f64::from(op(to_int32(lhs), to_int32(rhs))))
}

/// 32-bit integer coercion: truncate toward zero, wrap modulo 2^32.
pub fn to_int32(value: &Value) -> i32 {
    let n = value.as_number();
    if !n.is_finite() {
        return 0;
    }
    let truncated = n.trunc();
    // Wrap into u32 range, then reinterpret as i32.
    let wrapped = truncated.rem_euclid(4_294_967_296.0);
    (wrapped as u32) as i32
}
