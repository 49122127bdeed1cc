//! The JIT backend vtable (§6.3): a narrow seam a real code generator
//! plugs into, reduced to the three operations this core actually drives —
//! `compile_ir`, `enter`, and an optional `destroy` — since relocation
//! records, stack maps, and deopt metadata belong to a real backend's
//! internals, not to this seam.

use crate::jit::ir::JitIrProgram;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend cannot produce executable code for this program")]
    CompilationFailed,
}

/// An opaque compiled entry produced by [`JitBackend::compile_ir`]. Real
/// backends (e.g. a Cranelift-backed one behind the `jit` feature) would
/// carry a function pointer and its owning module here; this core never
/// inspects the contents.
#[derive(Debug)]
pub struct CompiledEntry {
    backend_data: Box<dyn std::any::Any>,
}

impl CompiledEntry {
    pub fn new(backend_data: Box<dyn std::any::Any>) -> Self {
        CompiledEntry { backend_data }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.backend_data.downcast_ref()
    }
}

/// The seam the translator and entry cache drive against; a backend never
/// needs to know about bytecode offsets, chunks, or the interpreter loop.
pub trait JitBackend {
    /// Lowers `program` to an executable [`CompiledEntry`], or reports that
    /// this backend cannot do so.
    fn compile_ir(&self, program: &JitIrProgram) -> Result<CompiledEntry, BackendError>;

    /// Transfers control into `entry`. The VM-side call convention (how
    /// register state crosses the boundary) is a backend concern; this
    /// core only needs to know the call happened.
    fn enter(&self, entry: &CompiledEntry);

    /// Releases any resources `entry` holds. Backends without anything to
    /// free can rely on the default no-op.
    fn destroy(&self, _entry: CompiledEntry) {}
}

/// A backend that never produces executable code (§6.3): `compile_ir`
/// itself always fails. Useful as the default backend when the `jit`
/// feature's real code generator is not linked in — every tier-up attempt
/// falls back to the interpreter.
#[derive(Debug, Default)]
pub struct StubBackend;

impl JitBackend for StubBackend {
    fn compile_ir(&self, _program: &JitIrProgram) -> Result<CompiledEntry, BackendError> {
        Err(BackendError::CompilationFailed)
    }

    fn enter(&self, _entry: &CompiledEntry) {
        unreachable!("StubBackend::compile_ir always fails; no entry is ever installed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_stub_backend_always_fails_to_compile() {
        let backend = StubBackend;
        let result = backend.compile_ir(&JitIrProgram::new());
        assert!(matches!(result, Err(BackendError::CompilationFailed)));
    }
}
