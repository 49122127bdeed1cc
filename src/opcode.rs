//! The opcode set produced by the compiler and consumed by the (external)
//! interpreter and by the JIT translator (§4.5.1).
//!
//! Every opcode has a fixed operand layout known to both the emitter and the
//! interpreter. Jumps take 16-bit big-endian offsets unless the mnemonic is
//! suffixed `Short`, in which case the offset is 8-bit.

use crate::value::ValueKind;

/// One bytecode instruction's leading tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // -- constant loads --------------------------------------------------
    /// operands: u16 const index, u8 dest register
    LoadConst = 0,
    /// operands: u16 const index, u8 dest register (fast path for i32 constants)
    LoadI32Const,
    LoadI64Const,
    LoadU32Const,
    LoadU64Const,
    LoadF64Const,
    /// operands: u8 dest register
    LoadNil,

    // -- register moves ---------------------------------------------------
    /// operands: u8 dest, u8 src
    Move,
    /// operands: u8 dest, u8 src — typed fast path, value kind implied by
    /// static register type; the translator still verifies the tracked
    /// kind at the source register (§4.5.1).
    MoveI32,
    MoveI64,
    MoveU32,
    MoveU64,
    MoveF64,
    MoveBool,
    MoveStr,
    /// operands: u8 dest, u16 upvalue_index — loads a captured variable
    /// from the enclosing frame's upvalue table (§4.3.6).
    GetUpvalueR,
    /// operands: u16 upvalue_index, u8 src
    SetUpvalueR,

    // -- arithmetic (dest, lhs, rhs registers) -----------------------------
    AddI32, AddI64, AddU32, AddU64, AddF64,
    SubI32, SubI64, SubU32, SubU64, SubF64,
    MulI32, MulI64, MulU32, MulU64, MulF64,
    DivI32, DivI64, DivU32, DivU64, DivF64,
    ModI32, ModI64, ModU32, ModU64, ModF64,
    /// operands: u8 dest, u8 reg — increments in place; used for the common
    /// for-range step-1 case instead of a full typed ADD.
    IncI32R,

    // -- bitwise (dest, lhs, rhs registers unless noted) -------------------
    BitAndI32, BitAndI64, BitAndU32, BitAndU64,
    BitOrI32, BitOrI64, BitOrU32, BitOrU64,
    BitXorI32, BitXorI64, BitXorU32, BitXorU64,
    ShlI32, ShlI64, ShlU32, ShlU64,
    ShrI32, ShrI64, ShrU32, ShrU64,
    /// operands: u8 dest, u8 src (unary)
    BitNotI32, BitNotI64, BitNotU32, BitNotU64,

    // -- comparison (dest, lhs, rhs registers) -----------------------------
    EqR, NeR,
    LtI32, LeI32, GtI32, GeI32,
    LtI64, LeI64, GtI64, GeI64,
    LtU32, LeU32, GtU32, GeU32,
    LtU64, LeU64, GtU64, GeU64,
    LtF64, LeF64, GtF64, GeF64,

    // -- logical (dest, lhs, rhs registers unless noted) -------------------
    AndBoolR, OrBoolR,
    /// operands: u8 dest, u8 src (unary)
    NotBoolR,

    // -- conversions --------------------------------------------------------
    /// operands: u8 dest, u8 src, u8 from_kind, u8 to_kind — one opcode
    /// covering every permitted cross-type pair in the cast matrix (§7);
    /// the (from_kind, to_kind) pair must be a permitted transition or the
    /// compiler never emits it (runtime has no "unsupported cast" path).
    Convert,
    /// operands: u8 dest, u8 src, u8 from_kind — scalar/array/struct to string.
    ToString,
    /// operands: u8 dest, u8 src — bool to any numeric kind, kind given by
    /// the destination register's static type (fast path over `Convert`).
    BoolToI32, BoolToI64, BoolToU32, BoolToU64, BoolToF64,

    // -- strings --------------------------------------------------------
    /// operands: u8 dest, u8 lhs, u8 rhs
    ConcatR,
    /// operands: u8 dest, u8 src
    LenString,

    // -- arrays -----------------------------------------------------------
    /// operands: u8 dest, u16 element_count (elements already on stack/regs
    /// in a contiguous run starting at dest+1)
    MakeArray,
    /// operands: u8 dest, u8 value_reg, u16 count
    ArrayFill,
    /// operands: u8 dest, u8 array_reg, u8 index_reg
    ArrayGet,
    /// operands: u8 array_reg, u8 index_reg, u8 value_reg
    ArraySet,
    /// operands: u8 array_reg, u8 value_reg
    ArrayPush,
    /// operands: u8 dest, u8 array_reg
    ArrayPop,
    /// operands: u8 array_reg, u8 additional_capacity_reg
    ArrayReserve,
    /// operands: u8 dest, u8 array_reg
    LenArray,
    /// operands: u8 dest, u8 array_reg, u8 start_reg, u8 end_reg
    Slice,

    // -- globals ------------------------------------------------------------
    /// operands: u16 global index, u8 value_reg
    DefineGlobal,
    /// operands: u8 dest, u16 global index
    GetGlobal,
    /// operands: u16 global index, u8 value_reg
    SetGlobal,
    /// operands: u16 global index, u8 value_reg (post-declaration store)
    StoreGlobal,
    /// operands: u8 dest, u16 global index (post-declaration load)
    LoadGlobal,

    // -- control flow ---------------------------------------------------
    /// operands: i16 big-endian relative offset from the byte after the operand
    Jump,
    /// operands: i8 relative offset
    JumpShort,
    /// operands: u8 cond_reg, i16 relative offset — pops/leaves cond per §4.3.3
    JumpIfFalse,
    /// operands: u8 cond_reg, i16 relative offset
    JumpIfNotR,
    /// operands: u8 cond_reg, i8 relative offset
    JumpIfNotShort,
    /// operands: u8 lhs_reg, u8 rhs_reg, i16 relative offset — fused compare+branch
    JumpIfLtI64,
    /// operands: u16 unsigned back-offset
    Loop,
    /// operands: u8 unsigned back-offset
    LoopShort,

    // -- calls --------------------------------------------------------------
    /// operands: u16 function index, u8 arg_count, u8 first_arg_reg
    Call,
    /// operands: u8 function_value_reg, u8 arg_count, u8 first_arg_reg
    CallR,
    /// operands: u16 native index, u8 arg_count, u8 first_arg_reg
    CallNative,
    /// operands: u8 value_reg
    Return,
    /// operands: u8 value_reg
    ReturnR,
    ReturnVoid,

    // -- iterators --------------------------------------------------------
    /// operands: u8 dest, u8 iterable_reg
    GetIterR,
    /// operands: u8 dest_has_next_reg, u8 dest_value_reg, u8 iter_reg
    IterNextR,

    // -- exceptions -----------------------------------------------------
    /// operands: i16 relative offset to the handler
    SetupExcept,
    PopExcept,

    // -- printing ---------------------------------------------------------
    /// operands: u16 format const index, u8 arg_count, u8 first_arg_reg, u8 newline_flag
    Print,
    PrintNoNl,
    /// operands: u8 value_reg
    PrintR,
    /// operands: u8 value_reg, u8 kind — typed fast path
    PrintTi,
    /// operands: u8 arg_count, u8 first_arg_reg
    PrintMultiR,
    FormatPrint,
    FormatPrintNoNl,

    // -- introspection ----------------------------------------------------
    /// operands: u8 dest, u8 src, u8 kind
    TypeOfTi,

    // -- module -----------------------------------------------------------
    /// operands: u16 module path const index
    Import,

    // -- misc ---------------------------------------------------------------
    GcPause,
    GcResume,
    /// operands: u8 dest
    TimeStamp,
    Halt,
    /// a GC cooperative yield point; not directly compiler-emitted into
    /// source bytecode but the canonical "natural safepoint" the translator
    /// recognizes (§4.5.1, §5).
    GcSafepoint,
}

impl Opcode {
    /// Recovers an [`Opcode`] from its leading tag byte, as read back out
    /// of a [`crate::chunk::Chunk`] by the JIT translator (§4.5.1).
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        const TABLE: &[Opcode] = &[
            Opcode::LoadConst, Opcode::LoadI32Const, Opcode::LoadI64Const, Opcode::LoadU32Const,
            Opcode::LoadU64Const, Opcode::LoadF64Const, Opcode::LoadNil,
            Opcode::Move, Opcode::MoveI32, Opcode::MoveI64, Opcode::MoveU32, Opcode::MoveU64,
            Opcode::MoveF64, Opcode::MoveBool, Opcode::MoveStr, Opcode::GetUpvalueR, Opcode::SetUpvalueR,
            Opcode::AddI32, Opcode::AddI64, Opcode::AddU32, Opcode::AddU64, Opcode::AddF64,
            Opcode::SubI32, Opcode::SubI64, Opcode::SubU32, Opcode::SubU64, Opcode::SubF64,
            Opcode::MulI32, Opcode::MulI64, Opcode::MulU32, Opcode::MulU64, Opcode::MulF64,
            Opcode::DivI32, Opcode::DivI64, Opcode::DivU32, Opcode::DivU64, Opcode::DivF64,
            Opcode::ModI32, Opcode::ModI64, Opcode::ModU32, Opcode::ModU64, Opcode::ModF64,
            Opcode::IncI32R,
            Opcode::BitAndI32, Opcode::BitAndI64, Opcode::BitAndU32, Opcode::BitAndU64,
            Opcode::BitOrI32, Opcode::BitOrI64, Opcode::BitOrU32, Opcode::BitOrU64,
            Opcode::BitXorI32, Opcode::BitXorI64, Opcode::BitXorU32, Opcode::BitXorU64,
            Opcode::ShlI32, Opcode::ShlI64, Opcode::ShlU32, Opcode::ShlU64,
            Opcode::ShrI32, Opcode::ShrI64, Opcode::ShrU32, Opcode::ShrU64,
            Opcode::BitNotI32, Opcode::BitNotI64, Opcode::BitNotU32, Opcode::BitNotU64,
            Opcode::EqR, Opcode::NeR,
            Opcode::LtI32, Opcode::LeI32, Opcode::GtI32, Opcode::GeI32,
            Opcode::LtI64, Opcode::LeI64, Opcode::GtI64, Opcode::GeI64,
            Opcode::LtU32, Opcode::LeU32, Opcode::GtU32, Opcode::GeU32,
            Opcode::LtU64, Opcode::LeU64, Opcode::GtU64, Opcode::GeU64,
            Opcode::LtF64, Opcode::LeF64, Opcode::GtF64, Opcode::GeF64,
            Opcode::AndBoolR, Opcode::OrBoolR, Opcode::NotBoolR,
            Opcode::Convert, Opcode::ToString,
            Opcode::BoolToI32, Opcode::BoolToI64, Opcode::BoolToU32, Opcode::BoolToU64, Opcode::BoolToF64,
            Opcode::ConcatR, Opcode::LenString,
            Opcode::MakeArray, Opcode::ArrayFill, Opcode::ArrayGet, Opcode::ArraySet,
            Opcode::ArrayPush, Opcode::ArrayPop, Opcode::ArrayReserve, Opcode::LenArray, Opcode::Slice,
            Opcode::DefineGlobal, Opcode::GetGlobal, Opcode::SetGlobal, Opcode::StoreGlobal, Opcode::LoadGlobal,
            Opcode::Jump, Opcode::JumpShort, Opcode::JumpIfFalse, Opcode::JumpIfNotR, Opcode::JumpIfNotShort,
            Opcode::JumpIfLtI64, Opcode::Loop, Opcode::LoopShort,
            Opcode::Call, Opcode::CallR, Opcode::CallNative, Opcode::Return, Opcode::ReturnR, Opcode::ReturnVoid,
            Opcode::GetIterR, Opcode::IterNextR,
            Opcode::SetupExcept, Opcode::PopExcept,
            Opcode::Print, Opcode::PrintNoNl, Opcode::PrintR, Opcode::PrintTi, Opcode::PrintMultiR,
            Opcode::FormatPrint, Opcode::FormatPrintNoNl,
            Opcode::TypeOfTi,
            Opcode::Import,
            Opcode::GcPause, Opcode::GcResume, Opcode::TimeStamp, Opcode::Halt, Opcode::GcSafepoint,
        ];
        TABLE.get(byte as usize).copied()
    }

    /// Whether this opcode is a terminal instruction for translation
    /// purposes (§4.5.1): execution cannot fall through past it.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::ReturnR | Opcode::ReturnVoid | Opcode::Halt
        )
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::JumpShort
                | Opcode::JumpIfFalse
                | Opcode::JumpIfNotR
                | Opcode::JumpIfNotShort
                | Opcode::JumpIfLtI64
        )
    }

    pub fn is_loop_back(self) -> bool {
        matches!(self, Opcode::Loop | Opcode::LoopShort)
    }

    /// The typed arithmetic opcode for `op` over operands of kind `kind`,
    /// or `None` if `kind` is not a numeric kind (§4.3.2's typed dispatch
    /// table).
    pub fn typed_add(kind: ValueKind) -> Option<Opcode> {
        match kind {
            ValueKind::I32 => Some(Opcode::AddI32),
            ValueKind::I64 => Some(Opcode::AddI64),
            ValueKind::U32 => Some(Opcode::AddU32),
            ValueKind::U64 => Some(Opcode::AddU64),
            ValueKind::F64 => Some(Opcode::AddF64),
            _ => None,
        }
    }

    /// The typed move opcode for a register known to hold a value of kind
    /// `kind`, falling back to the untyped `Move` for kinds the JIT
    /// translator's move-category arm does not track (strings, aggregates,
    /// handles — anything that isn't a plain numeric or bool register).
    pub fn typed_move(kind: ValueKind) -> Opcode {
        match kind {
            ValueKind::I32 => Opcode::MoveI32,
            ValueKind::I64 => Opcode::MoveI64,
            ValueKind::U32 => Opcode::MoveU32,
            ValueKind::U64 => Opcode::MoveU64,
            ValueKind::F64 => Opcode::MoveF64,
            ValueKind::Bool => Opcode::MoveBool,
            ValueKind::Str => Opcode::MoveStr,
            _ => Opcode::Move,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_opcodes_are_exactly_the_returns_and_halt() {
        assert!(Opcode::Return.is_terminal());
        assert!(Opcode::ReturnVoid.is_terminal());
        assert!(Opcode::Halt.is_terminal());
        assert!(!Opcode::Jump.is_terminal());
        assert!(!Opcode::AddI32.is_terminal());
    }

    #[test]
    fn jump_classification_excludes_loop_back_edges() {
        assert!(Opcode::JumpIfFalse.is_jump());
        assert!(!Opcode::Loop.is_jump());
        assert!(Opcode::Loop.is_loop_back());
    }

    #[test]
    fn typed_add_covers_all_numeric_kinds_and_rejects_others() {
        assert_eq!(Opcode::typed_add(ValueKind::I32), Some(Opcode::AddI32));
        assert_eq!(Opcode::typed_add(ValueKind::F64), Some(Opcode::AddF64));
        assert_eq!(Opcode::typed_add(ValueKind::Str), None);
        assert_eq!(Opcode::typed_add(ValueKind::Bool), None);
    }

    #[test]
    fn typed_move_falls_back_to_the_untyped_form_for_untracked_kinds() {
        assert_eq!(Opcode::typed_move(ValueKind::I64), Opcode::MoveI64);
        assert_eq!(Opcode::typed_move(ValueKind::Bool), Opcode::MoveBool);
        assert_eq!(Opcode::typed_move(ValueKind::Array), Opcode::Move);
    }
}
