//! End-to-end scenarios around numeric literal promotion and the
//! i32-overflow-promotes-to-i64 constant-fold rule (§4.3.2), built by hand
//! from AST fragments since this crate consumes an already-typed AST.

use orus_core::ast::{Ast, BinaryOp, Node, NodeKind, Span};
use orus_core::compiler::Compiler;
use orus_core::opcode::Opcode;
use orus_core::value::{Type, Value};

fn span() -> Span {
    Span { range: 0..1, line: 1, column: 1 }
}

/// A literal the checker has resolved to `i32` (bare, unannotated literals
/// default to `i64` per `effective_type`'s documented fallback, so the
/// overflow-promotion rule only has anything to promote when the checker
/// already narrowed the literal to i32).
fn lit_i32(ast: &mut Ast, v: i32) -> orus_core::ast::NodeId {
    ast.push(Node { span: span(), resolved_type: Some(Type::I32), kind: NodeKind::Literal(Value::I32(v)) })
}

fn var_decl(ast: &mut Ast, name: &str, initializer: orus_core::ast::NodeId) -> orus_core::ast::NodeId {
    ast.push(Node {
        span: span(),
        resolved_type: None,
        kind: NodeKind::VarDecl {
            name: name.into(),
            type_annotation: None,
            initializer: Some(initializer),
            mutable: false,
            public: false,
        },
    })
}

/// Two i32 literals whose product does not overflow stay i32 throughout.
#[test]
fn non_overflowing_i32_literal_arithmetic_stays_i32() {
    let mut ast = Ast::new();
    let left = lit_i32(&mut ast, 10);
    let right = lit_i32(&mut ast, 20);
    let sum = ast.push(Node {
        span: span(),
        resolved_type: None,
        kind: NodeKind::Binary { op: BinaryOp::Add, left, right, convert_left: None, convert_right: None },
    });
    let decl = var_decl(&mut ast, "x", sum);
    let block = ast.push(Node { span: span(), resolved_type: None, kind: NodeKind::Block { statements: vec![decl], scoped: false } });

    let compiled = Compiler::new().compile(&ast, block).unwrap();
    assert!(compiled.chunk.code.contains(&(Opcode::AddI32 as u8)));
    assert!(!compiled.chunk.code.contains(&(Opcode::AddI64 as u8)));
}

/// Two i32 literals whose product overflows i32 promote to i64 before the
/// add is emitted (§4.3.2's constant-fold rule).
#[test]
fn overflowing_i32_literal_arithmetic_promotes_to_i64() {
    let mut ast = Ast::new();
    let left = lit_i32(&mut ast, i32::MAX);
    let right = lit_i32(&mut ast, 100);
    let sum = ast.push(Node {
        span: span(),
        resolved_type: None,
        kind: NodeKind::Binary { op: BinaryOp::Add, left, right, convert_left: None, convert_right: None },
    });
    let decl = var_decl(&mut ast, "x", sum);
    let block = ast.push(Node { span: span(), resolved_type: None, kind: NodeKind::Block { statements: vec![decl], scoped: false } });

    let compiled = Compiler::new().compile(&ast, block).unwrap();
    assert!(compiled.chunk.code.contains(&(Opcode::AddI64 as u8)));
    assert!(!compiled.chunk.code.contains(&(Opcode::AddI32 as u8)));
}

/// A cast that cannot hold the literal's value (i64 literal too large for
/// an i32 annotation) is a compile error, with no bytecode emitted.
#[test]
fn cast_overflow_is_reported_and_emits_no_bytecode() {
    let mut ast = Ast::new();
    let lit = ast.push(Node { span: span(), resolved_type: None, kind: NodeKind::Literal(Value::I64(5_000_000_000)) });
    let decl = ast.push(Node {
        span: span(),
        resolved_type: None,
        kind: NodeKind::VarDecl {
            name: "x".into(),
            type_annotation: Some(Type::I32),
            initializer: Some(lit),
            mutable: false,
            public: false,
        },
    });
    let block = ast.push(Node { span: span(), resolved_type: None, kind: NodeKind::Block { statements: vec![decl], scoped: false } });

    let diagnostics = Compiler::new().compile(&ast, block).unwrap_err();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("type mismatch"));
}
