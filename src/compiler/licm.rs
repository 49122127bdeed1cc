//! Loop-invariant code motion analysis (§4.3.4): a two-pass walk over a
//! loop body that identifies expressions safe to hoist above the loop.

use crate::ast::{Ast, NodeId, NodeKind};
use rustc_hash::FxHashSet;

/// Pass (a): collect every variable name assigned anywhere in `body`
/// (assignments and variable declarations with initializers both count).
pub fn collect_assigned_variables(ast: &Ast, body: NodeId) -> FxHashSet<String> {
    let mut assigned = FxHashSet::default();
    walk_collect(ast, body, &mut assigned);
    assigned
}

fn walk_collect(ast: &Ast, id: NodeId, assigned: &mut FxHashSet<String>) {
    let node = ast.get(id);
    match &node.kind {
        NodeKind::Assignment { target, value } => {
            if let NodeKind::Identifier(name) = &ast.get(*target).kind {
                assigned.insert(name.clone());
            }
            walk_collect(ast, *value, assigned);
        }
        NodeKind::VarDecl { name, initializer, .. } => {
            assigned.insert(name.clone());
            if let Some(init) = initializer {
                walk_collect(ast, *init, assigned);
            }
        }
        NodeKind::Block { statements, .. } => {
            for stmt in statements {
                walk_collect(ast, *stmt, assigned);
            }
        }
        NodeKind::If { condition, then_branch, elif_branches, else_branch } => {
            walk_collect(ast, *condition, assigned);
            walk_collect(ast, *then_branch, assigned);
            for (cond, branch) in elif_branches {
                walk_collect(ast, *cond, assigned);
                walk_collect(ast, *branch, assigned);
            }
            if let Some(branch) = else_branch {
                walk_collect(ast, *branch, assigned);
            }
        }
        NodeKind::While { condition, body, .. } => {
            walk_collect(ast, *condition, assigned);
            walk_collect(ast, *body, assigned);
        }
        NodeKind::ForRange { start, end, step, body, .. } => {
            walk_collect(ast, *start, assigned);
            walk_collect(ast, *end, assigned);
            if let Some(step) = step {
                walk_collect(ast, *step, assigned);
            }
            walk_collect(ast, *body, assigned);
        }
        NodeKind::ForIter { iterable, body, .. } => {
            walk_collect(ast, *iterable, assigned);
            walk_collect(ast, *body, assigned);
        }
        NodeKind::Binary { left, right, .. } => {
            walk_collect(ast, *left, assigned);
            walk_collect(ast, *right, assigned);
        }
        NodeKind::Unary { operand, .. } | NodeKind::Cast { operand, .. } => {
            walk_collect(ast, *operand, assigned);
        }
        NodeKind::Call { arguments, .. } => {
            for arg in arguments {
                walk_collect(ast, *arg, assigned);
            }
        }
        NodeKind::Print { arguments, .. } => {
            for arg in arguments {
                walk_collect(ast, *arg, assigned);
            }
        }
        _ => {}
    }
}

/// Whether `id` is side-effecting per §4.3.4's classification: calls,
/// assignments, declarations, and mutating builtins are side-effecting;
/// literals, identifiers, pure arithmetic, and comparisons are not.
pub fn has_side_effects(ast: &Ast, id: NodeId) -> bool {
    let node = ast.get(id);
    match &node.kind {
        // Every call is conservatively side-effecting, not just the known
        // mutating builtins: an ordinary user function's body is opaque at
        // this point in compilation, so it might mutate shared state too.
        NodeKind::Call { .. } => true,
        NodeKind::Assignment { .. } | NodeKind::VarDecl { .. } => true,
        NodeKind::Binary { left, right, .. } => has_side_effects(ast, *left) || has_side_effects(ast, *right),
        NodeKind::Unary { operand, .. } | NodeKind::Cast { operand, .. } => has_side_effects(ast, *operand),
        NodeKind::Literal(_) | NodeKind::Identifier(_) => false,
        _ => true,
    }
}

/// Whether `id` references any variable in `assigned` (pass (b)'s
/// non-dependence check).
pub fn references_any(ast: &Ast, id: NodeId, assigned: &FxHashSet<String>) -> bool {
    let node = ast.get(id);
    match &node.kind {
        NodeKind::Identifier(name) => assigned.contains(name),
        NodeKind::Binary { left, right, .. } => {
            references_any(ast, *left, assigned) || references_any(ast, *right, assigned)
        }
        NodeKind::Unary { operand, .. } | NodeKind::Cast { operand, .. } => {
            references_any(ast, *operand, assigned)
        }
        NodeKind::Literal(_) => false,
        _ => true,
    }
}

/// Whether `id` is itself a loop header (condition of a while/for), which
/// is never hoisted even if otherwise eligible (§4.3.4 (iii)).
pub fn is_loop_header(ast: &Ast, id: NodeId) -> bool {
    matches!(ast.get(id).kind, NodeKind::While { .. } | NodeKind::ForRange { .. } | NodeKind::ForIter { .. })
}

/// Pass (b): whether `id` is eligible for hoisting as a loop invariant.
pub fn is_invariant(ast: &Ast, id: NodeId, assigned: &FxHashSet<String>) -> bool {
    !has_side_effects(ast, id) && !references_any(ast, id, assigned) && !is_loop_header(ast, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Node, Span};
    use crate::value::{Type, Value};

    fn span() -> Span {
        Span { range: 0..1, line: 1, column: 1 }
    }

    #[test]
    fn assignment_inside_body_is_collected() {
        let mut ast = Ast::new();
        let lit = ast.push(Node { span: span(), resolved_type: Some(Type::I32), kind: NodeKind::Literal(Value::I32(1)) });
        let ident = ast.push(Node { span: span(), resolved_type: None, kind: NodeKind::Identifier("i".into()) });
        let assign = ast.push(Node {
            span: span(),
            resolved_type: None,
            kind: NodeKind::Assignment { target: ident, value: lit },
        });
        let block = ast.push(Node { span: span(), resolved_type: None, kind: NodeKind::Block { statements: vec![assign], scoped: true } });

        let assigned = collect_assigned_variables(&ast, block);
        assert!(assigned.contains("i"));
    }

    #[test]
    fn pure_arithmetic_over_unassigned_vars_is_invariant() {
        let mut ast = Ast::new();
        let a = ast.push(Node { span: span(), resolved_type: None, kind: NodeKind::Identifier("a".into()) });
        let b = ast.push(Node { span: span(), resolved_type: None, kind: NodeKind::Identifier("b".into()) });
        let sum = ast.push(Node {
            span: span(),
            resolved_type: Some(Type::I32),
            kind: NodeKind::Binary { op: BinaryOp::Add, left: a, right: b, convert_left: None, convert_right: None },
        });

        let assigned: rustc_hash::FxHashSet<String> = ["i".to_string()].into_iter().collect();
        assert!(is_invariant(&ast, sum, &assigned));
    }

    #[test]
    fn expression_referencing_an_assigned_variable_is_not_invariant() {
        let mut ast = Ast::new();
        let i = ast.push(Node { span: span(), resolved_type: None, kind: NodeKind::Identifier("i".into()) });
        let one = ast.push(Node { span: span(), resolved_type: Some(Type::I32), kind: NodeKind::Literal(Value::I32(1)) });
        let expr = ast.push(Node {
            span: span(),
            resolved_type: Some(Type::I32),
            kind: NodeKind::Binary { op: BinaryOp::Add, left: i, right: one, convert_left: None, convert_right: None },
        });
        let assigned: rustc_hash::FxHashSet<String> = ["i".to_string()].into_iter().collect();
        assert!(!is_invariant(&ast, expr, &assigned));
    }

    #[test]
    fn function_calls_are_side_effecting() {
        let mut ast = Ast::new();
        let call = ast.push(Node {
            span: span(),
            resolved_type: None,
            kind: NodeKind::Call { name: "f".into(), arguments: vec![], static_struct_type: None, generic_args: vec![] },
        });
        let assigned = rustc_hash::FxHashSet::default();
        assert!(!is_invariant(&ast, call, &assigned));
    }
}
