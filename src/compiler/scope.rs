//! Scope stack and local-variable metadata (§4.2).

use crate::compiler::register::RegisterAllocator;
use crate::value::Type;

pub const MAX_LOCALS: usize = 256;

/// A declared local variable, tracked in a parallel metadata array indexed
/// by a small integer id.
#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    pub register: u8,
    pub active: bool,
    pub depth: u32,
    pub mutable: bool,
    pub value_type: Type,
    /// The statically-known type used for type specialization; usually
    /// equal to `value_type` but may be refined by the checker.
    pub known_static_type: Type,
}

/// A compile-time-only symbol, mirroring a `Local` (or a global slot) for
/// scoped name resolution; the locals array remains the source of truth
/// for register mapping (§3, §4.2).
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub resolved_type: Type,
    pub scope_depth: u32,
    pub register_or_global: RegisterOrGlobal,
    pub mutable: bool,
    pub is_constant: bool,
    pub is_module_alias: bool,
    pub fixed_array: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOrGlobal {
    Register(u8),
    Global(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("too many variables")]
    TooManyLocals,
}

/// Owns the locals array and a mirroring symbol table, plus the register
/// allocator whose LIFO discipline governs release on scope exit (§4.2).
#[derive(Debug, Clone)]
pub struct ScopeStack {
    depth: u32,
    locals: Vec<Local>,
    symbols: Vec<Symbol>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        ScopeStack { depth: 0, locals: Vec::new(), symbols: Vec::new() }
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn begin_scope(&mut self) {
        self.depth += 1;
    }

    /// Deactivates every local whose depth exceeds the new depth and frees
    /// its register via `allocator` (subject to the LIFO rule: a register
    /// that isn't the current top of the bump stack, or is persistent, is
    /// left allocated and released later by an enclosing scope).
    pub fn end_scope(&mut self, allocator: &mut RegisterAllocator) {
        debug_assert!(self.depth > 0, "end_scope without matching begin_scope");
        self.depth -= 1;
        for local in self.locals.iter_mut().rev() {
            if local.active && local.depth > self.depth {
                local.active = false;
                allocator.free(local.register);
            }
        }
        for symbol in self.symbols.iter_mut().rev() {
            if symbol.active && symbol.scope_depth > self.depth {
                symbol.active = false;
            }
        }
    }

    pub fn declare_local(
        &mut self,
        name: impl Into<String>,
        register: u8,
        mutable: bool,
        value_type: Type,
    ) -> Result<(), ScopeError> {
        if self.locals.len() >= MAX_LOCALS {
            return Err(ScopeError::TooManyLocals);
        }
        let name = name.into();
        self.symbols.push(Symbol {
            name: name.clone(),
            resolved_type: value_type.clone(),
            scope_depth: self.depth,
            register_or_global: RegisterOrGlobal::Register(register),
            mutable,
            is_constant: !mutable,
            is_module_alias: false,
            fixed_array: false,
            active: true,
        });
        self.locals.push(Local {
            name,
            register,
            active: true,
            depth: self.depth,
            mutable,
            known_static_type: value_type.clone(),
            value_type,
        });
        Ok(())
    }

    /// Lexical lookup: scans from the top of the locals stack downward.
    pub fn resolve_local(&self, name: &str) -> Option<&Local> {
        self.locals.iter().rev().find(|l| l.active && l.name == name)
    }

    pub fn resolve_symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().rev().find(|s| s.active && s.name == name)
    }

    pub fn locals(&self) -> &[Local] {
        &self.locals
    }
}
