//! Compile-time error kinds (§7), each carrying the data needed to build
//! its [`Diagnostic`].

use crate::diagnostics::{Diagnostic, ErrorCode};
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CompileErrorKind {
    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("undefined function '{name}'")]
    UndefinedFunction { name: String },
    #[error("cannot access private member '{name}'")]
    PrivateAccess { name: String },
    #[error("'{name}' is already declared in this scope")]
    Redeclaration { name: String },
    #[error("cannot assign to immutable variable '{name}'")]
    ImmutableAssignment { name: String },
    #[error("type mismatch in {context}")]
    TypeMismatch { context: &'static str },
    #[error("unsupported cast")]
    UnsupportedCast,
    #[error("unsupported operator for operand types")]
    UnsupportedOperator,
    #[error("missing return statement")]
    MissingReturn,
    #[error("not all paths return a value")]
    NotAllPathsReturn,
    #[error("invalid argument count for builtin '{name}'")]
    InvalidBuiltinArgCount { name: String },
    #[error("invalid argument type for builtin '{name}'")]
    InvalidBuiltinArgType { name: String },
    #[error("unknown struct type '{name}'")]
    UnknownStructType { name: String },
    #[error("unknown field '{name}'")]
    UnknownField { name: String },
    #[error("struct field count mismatch")]
    StructFieldCountMismatch,
    #[error("struct field type mismatch")]
    StructFieldTypeMismatch,
    #[error("generic argument count mismatch")]
    GenericArgCountMismatch,
    #[error("generic constraint not satisfied")]
    GenericConstraintNotSatisfied,
    #[error("too many constants")]
    TooManyConstants,
    #[error("too many variables")]
    TooManyVariables,
    #[error("too many functions")]
    TooManyFunctions,
    #[error("too many parameters")]
    TooManyParameters,
    #[error("too much code to jump")]
    TooMuchCodeToJump,
    #[error("module '{name}' not found")]
    ModuleNotFound { name: String },
    #[error("symbol '{name}' not found in module")]
    SymbolNotFoundInModule { name: String },
    #[error("array type mismatch in literal")]
    ArrayTypeMismatch,
    #[error("'{kind}' outside loop")]
    BreakContinueOutsideLoop { kind: &'static str },
    #[error("unresolved iterator or condition type")]
    UnresolvedIteratorOrConditionType,
}

impl CompileErrorKind {
    pub fn code(&self) -> ErrorCode {
        use CompileErrorKind::*;
        ErrorCode(match self {
            UndefinedVariable { .. } => "undefined-variable",
            UndefinedFunction { .. } => "undefined-function",
            PrivateAccess { .. } => "private-access",
            Redeclaration { .. } => "redeclaration",
            ImmutableAssignment { .. } => "immutable-assignment",
            TypeMismatch { .. } => "type-mismatch",
            UnsupportedCast => "unsupported-cast",
            UnsupportedOperator => "unsupported-operator",
            MissingReturn => "missing-return",
            NotAllPathsReturn => "not-all-paths-return",
            InvalidBuiltinArgCount { .. } => "invalid-builtin-arg-count",
            InvalidBuiltinArgType { .. } => "invalid-builtin-arg-type",
            UnknownStructType { .. } => "unknown-struct-type",
            UnknownField { .. } => "unknown-field",
            StructFieldCountMismatch => "struct-field-count-mismatch",
            StructFieldTypeMismatch => "struct-field-type-mismatch",
            GenericArgCountMismatch => "generic-arg-count-mismatch",
            GenericConstraintNotSatisfied => "generic-constraint-not-satisfied",
            TooManyConstants => "too-many-constants",
            TooManyVariables => "too-many-variables",
            TooManyFunctions => "too-many-functions",
            TooManyParameters => "too-many-parameters",
            TooMuchCodeToJump => "too-much-code-to-jump",
            ModuleNotFound { .. } => "module-not-found",
            SymbolNotFoundInModule { .. } => "symbol-not-found-in-module",
            ArrayTypeMismatch => "array-type-mismatch",
            BreakContinueOutsideLoop { .. } => "break-continue-outside-loop",
            UnresolvedIteratorOrConditionType => "unresolved-iterator-or-condition-type",
        })
    }

    /// Whether this error kind is a fatal resource error that aborts
    /// generation immediately, rather than allowing the walk to continue
    /// surfacing sibling diagnostics (§4.3.8, §7 propagation rules).
    pub fn is_fatal_resource_error(&self) -> bool {
        matches!(
            self,
            CompileErrorKind::TooManyConstants
                | CompileErrorKind::TooManyVariables
                | CompileErrorKind::TooManyFunctions
                | CompileErrorKind::TooManyParameters
        )
    }

    pub fn into_diagnostic(self, span: Range<usize>) -> Diagnostic {
        let code = self.code();
        let message = self.to_string();
        Diagnostic::error(message.clone(), span)
            .with_code(code)
            .with_primary_label(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_errors_are_fatal() {
        assert!(CompileErrorKind::TooManyConstants.is_fatal_resource_error());
        assert!(CompileErrorKind::TooManyParameters.is_fatal_resource_error());
    }

    #[test]
    fn type_errors_are_not_fatal_resource_errors() {
        assert!(!CompileErrorKind::TypeMismatch { context: "let declaration" }.is_fatal_resource_error());
    }

    #[test]
    fn cast_overflow_scenario_message_matches_expected_wording() {
        let err = CompileErrorKind::TypeMismatch { context: "let declaration" };
        assert_eq!(err.to_string(), "type mismatch in let declaration");
    }

    #[test]
    fn into_diagnostic_carries_the_stable_code() {
        let diag = CompileErrorKind::UndefinedVariable { name: "x".into() }.into_diagnostic(0..1);
        assert_eq!(diag.code.unwrap().0, "undefined-variable");
    }
}
