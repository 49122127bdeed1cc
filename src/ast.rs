//! The consumed AST contract (§6.1). Lexing and parsing are out of scope;
//! this module defines only the shape the compiler reads. Replaces the
//! source's heap-pointer/`next`-sibling-chain tree with an arena of nodes
//! addressed by 32-bit indices (§9).

use crate::value::{GenericConstraint, Type, Value};
use std::ops::Range;

/// An index into an [`Ast`] arena. `NodeId(0)` is never a valid root for an
/// empty arena; callers always receive the id returned by `Ast::push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// A source location in byte-offset terms, plus the 1-based line/column
/// the compiler threads into the chunk's coordinate arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub range: Range<u32>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add, Sub, Mul, Div, Mod,
    BitAnd, BitOr, BitXor, Shl, Shr,
    Eq, Ne, Lt, Le, Gt, Ge,
    AndBool, OrBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_annotation: Option<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericParam {
    pub name: String,
    pub constraint: GenericConstraint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub type_annotation: Type,
}

/// A single AST node. Every node carries a [`Span`]; expression nodes
/// optionally carry a `resolved_type` filled in by the (external) checker.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub span: Span,
    pub resolved_type: Option<Type>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Literal(Value),
    Identifier(String),

    Binary {
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
        /// Pre-resolved by the checker: whether the left/right operand
        /// needs an implicit numeric conversion before the typed opcode.
        convert_left: Option<Type>,
        convert_right: Option<Type>,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Cast {
        operand: NodeId,
        target_type: Type,
    },

    VarDecl {
        name: String,
        type_annotation: Option<Type>,
        initializer: Option<NodeId>,
        mutable: bool,
        public: bool,
    },
    Assignment {
        target: NodeId,
        value: NodeId,
    },

    Print {
        format: Option<String>,
        arguments: Vec<NodeId>,
        newline: bool,
    },

    If {
        condition: NodeId,
        then_branch: NodeId,
        elif_branches: Vec<(NodeId, NodeId)>,
        else_branch: Option<NodeId>,
    },
    Ternary {
        condition: NodeId,
        then_value: NodeId,
        else_value: NodeId,
    },

    While {
        condition: NodeId,
        body: NodeId,
        label: Option<String>,
    },
    ForRange {
        iterator_name: String,
        start: NodeId,
        end: NodeId,
        step: Option<NodeId>,
        body: NodeId,
        label: Option<String>,
        inclusive: bool,
    },
    ForIter {
        iterator_name: String,
        iterable: NodeId,
        body: NodeId,
        label: Option<String>,
    },

    Block {
        statements: Vec<NodeId>,
        scoped: bool,
    },

    Function {
        name: String,
        parameters: Vec<Param>,
        return_type: Type,
        body: NodeId,
        generic_params: Vec<GenericParam>,
        impl_type: Option<String>,
        public: bool,
    },

    Call {
        name: String,
        arguments: Vec<NodeId>,
        static_struct_type: Option<String>,
        generic_args: Vec<Type>,
    },

    Return(Option<NodeId>),
    Break(Option<String>),
    Continue(Option<String>),

    Import {
        module_specifier: String,
    },
    Use {
        path: String,
        alias: Option<String>,
    },

    Try {
        error_binding: String,
        try_block: NodeId,
        catch_block: NodeId,
    },

    Array(Vec<NodeId>),
    ArrayFill {
        value: NodeId,
        count: NodeId,
    },

    StructLiteral {
        type_name: String,
        fields: Vec<(String, NodeId)>,
    },
    Field {
        object: NodeId,
        field_name: String,
    },
    FieldSet {
        object: NodeId,
        field_name: String,
        value: NodeId,
    },
    ArraySet {
        array: NodeId,
        index: NodeId,
        value: NodeId,
    },
    Slice {
        array: NodeId,
        start: Option<NodeId>,
        end: Option<NodeId>,
    },

    Static(NodeId),
    Const(NodeId),
}

/// The arena of AST nodes, addressed by [`NodeId`]. Owns every node; a
/// `Vec<NodeId>` stands in for sibling lists, replacing pointer chains.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        Span { range: 0..1, line: 1, column: 1 }
    }

    #[test]
    fn arena_indices_are_stable_after_further_pushes() {
        let mut ast = Ast::new();
        let lit = ast.push(Node {
            span: dummy_span(),
            resolved_type: Some(Type::I32),
            kind: NodeKind::Literal(Value::I32(1)),
        });
        let _later = ast.push(Node {
            span: dummy_span(),
            resolved_type: None,
            kind: NodeKind::Identifier("x".into()),
        });
        assert_eq!(ast.get(lit).kind, NodeKind::Literal(Value::I32(1)));
    }

    #[test]
    fn no_self_referential_node_is_representable_by_construction() {
        // Arena indices only ever point at already-pushed nodes, so a node
        // cannot name itself as a child the way a raw `next` pointer could.
        let mut ast = Ast::new();
        let a = ast.push(Node {
            span: dummy_span(),
            resolved_type: None,
            kind: NodeKind::Identifier("a".into()),
        });
        assert!(a.0 < ast.len() as u32);
    }
}
