//! The runtime tagged value and its compile-time type counterpart.

use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A runtime value. Equality and ordering are defined only within a variant;
/// comparing across variants requires an explicit conversion op emitted by
/// the compiler (see the cast matrix).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F64(f64),
    Bool(bool),
    /// Interned, reference-semantics string.
    Str(Arc<str>),
    Nil,
    Array(Arc<ArrayValue>),
    Struct(Arc<StructValue>),
    /// Index into the function table.
    FunctionHandle(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub elements: Vec<Value>,
    /// `None` for a growable array, `Some(n)` for a fixed-length array.
    pub fixed_length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub type_name: Arc<str>,
    /// Declaration order is preserved; lookups go through `fields`.
    pub field_order: Vec<Arc<str>>,
    pub fields: FxHashMap<Arc<str>, Value>,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::I32(_) => ValueKind::I32,
            Value::I64(_) => ValueKind::I64,
            Value::U32(_) => ValueKind::U32,
            Value::U64(_) => ValueKind::U64,
            Value::F64(_) => ValueKind::F64,
            Value::Bool(_) => ValueKind::Bool,
            Value::Str(_) => ValueKind::Str,
            Value::Nil => ValueKind::Nil,
            Value::Array(_) => ValueKind::Array,
            Value::Struct(_) => ValueKind::Struct,
            Value::FunctionHandle(_) => ValueKind::FunctionHandle,
        }
    }
}

/// The discriminant of a `Value`, used for constant-pool bookkeeping and
/// type-directed opcode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    I32,
    I64,
    U32,
    U64,
    F64,
    Bool,
    Str,
    Nil,
    Array,
    Struct,
    FunctionHandle,
}

/// Generic type parameter constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericConstraint {
    None,
    Numeric,
    Comparable,
}

/// A compile-time type. Structurally equal; arrays with `length == -1` are
/// "unsized" and unify with sized arrays of the same element type during
/// declaration-site checking (handled by the caller, not by `PartialEq`).
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    I32,
    I64,
    U32,
    U64,
    F64,
    Bool,
    Str,
    Nil,
    Void,
    Generic {
        name: Arc<str>,
        constraint: GenericConstraint,
    },
    Array {
        elem: Box<Type>,
        /// `None` encodes the unsized ("length == -1") array.
        fixed_length: Option<usize>,
    },
    Struct {
        name: Arc<str>,
        fields: Vec<(Arc<str>, Type)>,
        generic_params: Vec<Arc<str>>,
    },
    Function {
        params: Vec<Type>,
        ret: Box<Type>,
    },
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Type::I32 | Type::I64 | Type::U32 | Type::U64 | Type::F64
        )
    }

    pub fn is_unsized_array(&self) -> bool {
        matches!(self, Type::Array { fixed_length: None, .. })
    }

    /// Whether `other` may unify with `self` at a declaration site (the
    /// unsized/sized array rule; everything else falls back to structural
    /// equality).
    pub fn unifies_with(&self, other: &Type) -> bool {
        match (self, other) {
            (
                Type::Array { elem: e1, fixed_length: None },
                Type::Array { elem: e2, fixed_length: Some(_) },
            )
            | (
                Type::Array { elem: e1, fixed_length: Some(_) },
                Type::Array { elem: e2, fixed_length: None },
            ) => e1 == e2,
            _ => self == other,
        }
    }

    pub fn value_kind(&self) -> Option<ValueKind> {
        match self {
            Type::I32 => Some(ValueKind::I32),
            Type::I64 => Some(ValueKind::I64),
            Type::U32 => Some(ValueKind::U32),
            Type::U64 => Some(ValueKind::U64),
            Type::F64 => Some(ValueKind::F64),
            Type::Bool => Some(ValueKind::Bool),
            Type::Str => Some(ValueKind::Str),
            Type::Nil => Some(ValueKind::Nil),
            Type::Array { .. } => Some(ValueKind::Array),
            Type::Struct { .. } => Some(ValueKind::Struct),
            Type::Function { .. } => Some(ValueKind::FunctionHandle),
            Type::Void | Type::Generic { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_kind_matches_variant() {
        assert_eq!(Value::I32(1).kind(), ValueKind::I32);
        assert_eq!(Value::Str(Arc::from("x")).kind(), ValueKind::Str);
        assert_eq!(Value::Nil.kind(), ValueKind::Nil);
    }

    #[test]
    fn unsized_array_unifies_with_sized() {
        let unsized_i32 = Type::Array { elem: Box::new(Type::I32), fixed_length: None };
        let sized_i32 = Type::Array { elem: Box::new(Type::I32), fixed_length: Some(4) };
        assert!(unsized_i32.unifies_with(&sized_i32));
        assert!(sized_i32.unifies_with(&unsized_i32));

        let sized_f64 = Type::Array { elem: Box::new(Type::F64), fixed_length: Some(4) };
        assert!(!unsized_i32.unifies_with(&sized_f64));
    }

    #[test]
    fn scalar_types_require_structural_equality() {
        assert!(Type::I32.unifies_with(&Type::I32));
        assert!(!Type::I32.unifies_with(&Type::I64));
    }
}
