//! Typed lowering: numeric promotion, literal narrowing, and cast-matrix
//! enforcement (§4.3.2, §7).

use crate::value::{Type, Value};

/// The numeric mixed-type promotion table from §4.3.2.
pub fn promote_numeric(left: &Type, right: &Type) -> Option<Type> {
    use Type::*;
    if left == right && left.is_numeric() {
        return Some(left.clone());
    }
    match (left, right) {
        (F64, r) if r.is_numeric() => Some(F64),
        (l, F64) if l.is_numeric() => Some(F64),
        (I32, I64) | (I64, I32) => Some(I64),
        (U32, I64) | (I64, U32) => Some(I64),
        (U32, I32) | (I32, U32) => Some(I32),
        _ => None,
    }
}

/// `true` if an `i32 {+,-,*}` i32` computation with these operand values
/// would overflow `i32::MIN..=i32::MAX`, per §4.3.2's constant-fold
/// overflow-promotion rule. Only applies to compile-time-foldable operands.
pub fn i32_arith_would_overflow(op: ArithOp, left: i32, right: i32) -> bool {
    match op {
        ArithOp::Add => left.checked_add(right).is_none(),
        ArithOp::Sub => left.checked_sub(right).is_none(),
        ArithOp::Mul => left.checked_mul(right).is_none(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

/// Attempts to narrow a literal `value` to `target`, rewriting its tagged
/// type if representable. Returns `None` (type-mismatch) if the literal's
/// value cannot be represented in `target` (§4.3.2).
pub fn narrow_literal(value: &Value, target: &Type) -> Option<Value> {
    match (value, target) {
        (Value::I64(v), Type::I32) => i32::try_from(*v).ok().map(Value::I32),
        (Value::I64(v), Type::U32) => u32::try_from(*v).ok().map(Value::U32),
        (Value::I64(v), Type::U64) => u64::try_from(*v).ok().map(Value::U64),
        (Value::I64(v), Type::F64) => Some(Value::F64(*v as f64)),
        (Value::I64(v), Type::I64) => Some(Value::I64(*v)),
        (Value::I32(v), Type::I64) => Some(Value::I64(*v as i64)),
        (Value::I32(v), Type::F64) => Some(Value::F64(*v as f64)),
        (Value::I32(v), Type::I32) => Some(Value::I32(*v)),
        (Value::F64(v), Type::F64) => Some(Value::F64(*v)),
        _ => None,
    }
}

/// Whether a cast from `from` to `to` is permitted by the cast matrix
/// (§7). Identity is always permitted.
pub fn cast_allowed(from: &Type, to: &Type) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (Type::Str, _) => false,
        (_, Type::Str) => matches!(
            from,
            Type::Bool | Type::I32 | Type::I64 | Type::U32 | Type::U64 | Type::F64 | Type::Array { .. } | Type::Struct { .. }
        ),
        (Type::Nil, _) | (Type::Void, _) => false,
        (a, b) => is_scalar(a) && is_scalar(b),
    }
}

fn is_scalar(t: &Type) -> bool {
    matches!(t, Type::Bool | Type::I32 | Type::I64 | Type::U32 | Type::U64 | Type::F64)
}
