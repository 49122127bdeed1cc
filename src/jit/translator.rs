//! The JIT translator (§4.5.1): a linear, single-pass walk of a loop's
//! bytecode region that lowers a supported subset of opcodes to
//! [`crate::jit::ir::JitIrProgram`].
//!
//! The walk starts at the loop header and recognizes only the handful of
//! categories listed in the tier-up design: constant loads, moves,
//! arithmetic, conversions, concatenation, returns, and the loop-back edge
//! itself. Anything else — an opcode outside that set, a value kind the
//! active rollout stage has not unlocked yet, or a back-edge that lands
//! somewhere other than the header it started from — ends the walk with a
//! [`TranslationError`] rather than a partial program.

use crate::chunk::Chunk;
use crate::jit::ir::{ArithKind, JitIrInstr, JitIrOp, JitIrProgram};
use crate::jit::value_kind::{JitValueKind, RolloutStage};
use crate::opcode::Opcode;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationError {
    UnsupportedOpcode { offset: usize },
    UnsupportedLoopShape { offset: usize },
    RolloutDisabled { offset: usize, kind: JitValueKind },
    KindMismatch { offset: usize, register: u8 },
}

impl TranslationError {
    pub fn offset(&self) -> usize {
        match self {
            TranslationError::UnsupportedOpcode { offset }
            | TranslationError::UnsupportedLoopShape { offset }
            | TranslationError::RolloutDisabled { offset, .. }
            | TranslationError::KindMismatch { offset, .. } => *offset,
        }
    }
}

/// Translates the loop body starting at `loop_header_offset` in `chunk`,
/// gated by `rollout` and inserting a `Safepoint` IR instruction every
/// `safepoint_interval` translated instructions (§4.5.1, §5).
pub fn translate_loop(
    chunk: &Chunk,
    loop_header_offset: usize,
    rollout: RolloutStage,
    safepoint_interval: u32,
) -> Result<JitIrProgram, TranslationError> {
    let mut program = JitIrProgram::new();
    let mut tracked_kinds: FxHashMap<u8, JitValueKind> = FxHashMap::default();
    let mut offset = loop_header_offset;
    let mut since_safepoint: u32 = 0;

    while offset < chunk.code.len() {
        let op_byte = chunk.read_u8(offset);
        let Some(opcode) = Opcode::from_byte(op_byte) else {
            return Err(TranslationError::UnsupportedOpcode { offset });
        };
        let instr_offset = offset;
        offset += 1;

        let instr = match opcode {
            Opcode::LoadI32Const | Opcode::LoadI64Const | Opcode::LoadU32Const | Opcode::LoadU64Const | Opcode::LoadF64Const => {
                let const_index = chunk.read_u16(offset);
                offset += 2;
                let dest = chunk.read_u8(offset);
                offset += 1;
                let kind = load_const_kind(opcode);
                require_rollout(rollout, kind, instr_offset)?;
                tracked_kinds.insert(dest, kind);
                JitIrInstr {
                    op: JitIrOp::LoadConst { dest, const_index },
                    value_kind: Some(kind),
                    bytecode_offset: instr_offset,
                }
            }
            Opcode::MoveI32 | Opcode::MoveI64 | Opcode::MoveU32 | Opcode::MoveU64 | Opcode::MoveF64 => {
                let dest = chunk.read_u8(offset);
                offset += 1;
                let src = chunk.read_u8(offset);
                offset += 1;
                let declared_kind = move_kind(opcode);
                require_rollout(rollout, declared_kind, instr_offset)?;
                // The opcode asserts `src`'s kind; verify against what we
                // have tracked for it so far, if anything (§4.5.1).
                if let Some(&tracked) = tracked_kinds.get(&src) {
                    if tracked != declared_kind {
                        return Err(TranslationError::KindMismatch { offset: instr_offset, register: src });
                    }
                }
                tracked_kinds.insert(dest, declared_kind);
                JitIrInstr {
                    op: JitIrOp::Move { dest, src },
                    value_kind: Some(declared_kind),
                    bytecode_offset: instr_offset,
                }
            }
            _ if arith_kind(opcode).is_some() => {
                let dest = chunk.read_u8(offset);
                offset += 1;
                let lhs = chunk.read_u8(offset);
                offset += 1;
                let rhs = chunk.read_u8(offset);
                offset += 1;
                let (arith, kind) = arith_kind(opcode).unwrap();
                require_rollout(rollout, kind, instr_offset)?;
                tracked_kinds.insert(dest, kind);
                JitIrInstr {
                    op: JitIrOp::Arith { op: arith, dest, lhs, rhs },
                    value_kind: Some(kind),
                    bytecode_offset: instr_offset,
                }
            }
            Opcode::Convert => {
                let dest = chunk.read_u8(offset);
                offset += 1;
                let src = chunk.read_u8(offset);
                offset += 1;
                let from_tag = chunk.read_u8(offset);
                offset += 1;
                let to_tag = chunk.read_u8(offset);
                offset += 1;
                let (from, to) = (tag_to_kind(from_tag), tag_to_kind(to_tag));
                let (Some(from), Some(to)) = (from, to) else {
                    return Err(TranslationError::UnsupportedOpcode { offset: instr_offset });
                };
                require_rollout(rollout, from, instr_offset)?;
                require_rollout(rollout, to, instr_offset)?;
                tracked_kinds.insert(dest, to);
                JitIrInstr {
                    op: JitIrOp::Convert { dest, src, from, to },
                    value_kind: Some(to),
                    bytecode_offset: instr_offset,
                }
            }
            Opcode::ToString => {
                let dest = chunk.read_u8(offset);
                offset += 1;
                let src = chunk.read_u8(offset);
                offset += 1;
                let _from_tag = chunk.read_u8(offset);
                offset += 1;
                require_rollout(rollout, JitValueKind::Str, instr_offset)?;
                tracked_kinds.insert(dest, JitValueKind::Str);
                JitIrInstr {
                    op: JitIrOp::ToStringOp { dest, src },
                    value_kind: Some(JitValueKind::Str),
                    bytecode_offset: instr_offset,
                }
            }
            Opcode::ConcatR => {
                let dest = chunk.read_u8(offset);
                offset += 1;
                let lhs = chunk.read_u8(offset);
                offset += 1;
                let rhs = chunk.read_u8(offset);
                offset += 1;
                require_rollout(rollout, JitValueKind::Str, instr_offset)?;
                tracked_kinds.insert(dest, JitValueKind::Str);
                JitIrInstr {
                    op: JitIrOp::Concat { dest, lhs, rhs },
                    value_kind: Some(JitValueKind::Str),
                    bytecode_offset: instr_offset,
                }
            }
            Opcode::ReturnVoid => {
                program.push(JitIrInstr { op: JitIrOp::Return { value: None }, value_kind: None, bytecode_offset: instr_offset });
                return Ok(program);
            }
            Opcode::ReturnR | Opcode::Return => {
                let value = chunk.read_u8(offset);
                offset += 1;
                program.push(JitIrInstr {
                    op: JitIrOp::Return { value: Some(value) },
                    value_kind: None,
                    bytecode_offset: instr_offset,
                });
                return Ok(program);
            }
            Opcode::LoopShort => {
                let back_offset = chunk.read_u8(offset) as usize;
                offset += 1;
                let target = offset - back_offset;
                if target != loop_header_offset {
                    return Err(TranslationError::UnsupportedLoopShape { offset: instr_offset });
                }
                program.push(JitIrInstr {
                    op: JitIrOp::LoopBack { target: loop_header_offset },
                    value_kind: None,
                    bytecode_offset: instr_offset,
                });
                return Ok(program);
            }
            Opcode::Loop => {
                let back_offset = chunk.read_u16(offset) as usize;
                offset += 2;
                let target = offset - back_offset;
                if target != loop_header_offset {
                    return Err(TranslationError::UnsupportedLoopShape { offset: instr_offset });
                }
                program.push(JitIrInstr {
                    op: JitIrOp::LoopBack { target: loop_header_offset },
                    value_kind: None,
                    bytecode_offset: instr_offset,
                });
                return Ok(program);
            }
            other if other.is_terminal() => {
                program.push(JitIrInstr { op: JitIrOp::Return { value: None }, value_kind: None, bytecode_offset: instr_offset });
                return Ok(program);
            }
            _ => return Err(TranslationError::UnsupportedOpcode { offset: instr_offset }),
        };

        program.push(instr);
        since_safepoint += 1;
        if since_safepoint >= safepoint_interval {
            program.push(JitIrInstr { op: JitIrOp::Safepoint, value_kind: None, bytecode_offset: offset });
            since_safepoint = 0;
        }
    }

    // Fell off the end of the chunk without hitting a terminal or loop-back
    // instruction: synthesize an implicit return (§4.5.1).
    program.push(JitIrInstr { op: JitIrOp::Return { value: None }, value_kind: None, bytecode_offset: offset });
    Ok(program)
}

fn require_rollout(rollout: RolloutStage, kind: JitValueKind, offset: usize) -> Result<(), TranslationError> {
    if rollout.permits(kind) {
        Ok(())
    } else {
        Err(TranslationError::RolloutDisabled { offset, kind })
    }
}

fn load_const_kind(opcode: Opcode) -> JitValueKind {
    match opcode {
        Opcode::LoadI32Const => JitValueKind::I32,
        Opcode::LoadI64Const => JitValueKind::I64,
        Opcode::LoadU32Const => JitValueKind::U32,
        Opcode::LoadU64Const => JitValueKind::U64,
        Opcode::LoadF64Const => JitValueKind::F64,
        _ => unreachable!("only called for load-const opcodes"),
    }
}

fn move_kind(opcode: Opcode) -> JitValueKind {
    match opcode {
        Opcode::MoveI32 => JitValueKind::I32,
        Opcode::MoveI64 => JitValueKind::I64,
        Opcode::MoveU32 => JitValueKind::U32,
        Opcode::MoveU64 => JitValueKind::U64,
        Opcode::MoveF64 => JitValueKind::F64,
        _ => unreachable!("only called for typed move opcodes"),
    }
}

fn arith_kind(opcode: Opcode) -> Option<(ArithKind, JitValueKind)> {
    use JitValueKind::*;
    Some(match opcode {
        Opcode::AddI32 => (ArithKind::Add, I32),
        Opcode::AddI64 => (ArithKind::Add, I64),
        Opcode::AddU32 => (ArithKind::Add, U32),
        Opcode::AddU64 => (ArithKind::Add, U64),
        Opcode::AddF64 => (ArithKind::Add, F64),
        Opcode::SubI32 => (ArithKind::Sub, I32),
        Opcode::SubI64 => (ArithKind::Sub, I64),
        Opcode::SubU32 => (ArithKind::Sub, U32),
        Opcode::SubU64 => (ArithKind::Sub, U64),
        Opcode::SubF64 => (ArithKind::Sub, F64),
        Opcode::MulI32 => (ArithKind::Mul, I32),
        Opcode::MulI64 => (ArithKind::Mul, I64),
        Opcode::MulU32 => (ArithKind::Mul, U32),
        Opcode::MulU64 => (ArithKind::Mul, U64),
        Opcode::MulF64 => (ArithKind::Mul, F64),
        Opcode::DivI32 => (ArithKind::Div, I32),
        Opcode::DivI64 => (ArithKind::Div, I64),
        Opcode::DivU32 => (ArithKind::Div, U32),
        Opcode::DivU64 => (ArithKind::Div, U64),
        Opcode::DivF64 => (ArithKind::Div, F64),
        Opcode::ModI32 => (ArithKind::Mod, I32),
        Opcode::ModI64 => (ArithKind::Mod, I64),
        Opcode::ModU32 => (ArithKind::Mod, U32),
        Opcode::ModU64 => (ArithKind::Mod, U64),
        Opcode::ModF64 => (ArithKind::Mod, F64),
        _ => return None,
    })
}

fn tag_to_kind(tag: u8) -> Option<JitValueKind> {
    use crate::value::ValueKind;
    match tag {
        t if t == ValueKind::I32 as u8 => Some(JitValueKind::I32),
        t if t == ValueKind::I64 as u8 => Some(JitValueKind::I64),
        t if t == ValueKind::U32 as u8 => Some(JitValueKind::U32),
        t if t == ValueKind::U64 as u8 => Some(JitValueKind::U64),
        t if t == ValueKind::F64 as u8 => Some(JitValueKind::F64),
        t if t == ValueKind::Str as u8 => Some(JitValueKind::Str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn chunk_with(bytes: impl FnOnce(&mut Chunk)) -> Chunk {
        let mut chunk = Chunk::new();
        bytes(&mut chunk);
        chunk
    }

    #[test]
    fn a_single_add_loop_translates_to_three_instructions() {
        let chunk = chunk_with(|c| {
            let header = c.offset();
            c.write_opcode(Opcode::AddI32, 1, 1);
            c.write_u8_operand(2, 1, 1);
            c.write_u8_operand(0, 1, 1);
            c.write_u8_operand(1, 1, 1);
            let site = c.offset();
            c.write_opcode(Opcode::LoopShort, 1, 1);
            let back_offset = (c.offset() + 1) - header;
            c.write_u8_operand(back_offset as u8, 1, 1);
            let _ = site;
        });
        let program = translate_loop(&chunk, 0, RolloutStage::I32Only, 100).unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(program.instructions[0].op, JitIrOp::Arith { op: ArithKind::Add, .. }));
        assert!(matches!(program.instructions[1].op, JitIrOp::LoopBack { .. }));
    }

    #[test]
    fn a_mistargeted_loop_short_is_an_unsupported_shape() {
        let chunk = chunk_with(|c| {
            c.write_opcode(Opcode::Halt, 1, 1);
            let header = c.offset();
            c.write_opcode(Opcode::LoopShort, 1, 1);
            c.write_u8_operand(200, 1, 1);
            let _ = header;
        });
        let result = translate_loop(&chunk, 1, RolloutStage::I32Only, 100);
        assert!(matches!(result, Err(TranslationError::UnsupportedLoopShape { .. })));
    }

    #[test]
    fn a_float_add_is_rejected_at_the_i32_only_stage() {
        let chunk = chunk_with(|c| {
            c.write_opcode(Opcode::AddF64, 1, 1);
            c.write_u8_operand(2, 1, 1);
            c.write_u8_operand(0, 1, 1);
            c.write_u8_operand(1, 1, 1);
        });
        let result = translate_loop(&chunk, 0, RolloutStage::I32Only, 100);
        assert!(matches!(result, Err(TranslationError::RolloutDisabled { kind: JitValueKind::F64, .. })));
    }

    #[test]
    fn falling_off_the_chunk_synthesizes_a_return() {
        let chunk = chunk_with(|c| {
            c.write_opcode(Opcode::AddI32, 1, 1);
            c.write_u8_operand(2, 1, 1);
            c.write_u8_operand(0, 1, 1);
            c.write_u8_operand(1, 1, 1);
        });
        let program = translate_loop(&chunk, 0, RolloutStage::I32Only, 100).unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(program.instructions.last().unwrap().op, JitIrOp::Return { value: None }));
    }

    #[test]
    fn safepoints_are_inserted_on_the_configured_interval() {
        let chunk = chunk_with(|c| {
            for _ in 0..3 {
                c.write_opcode(Opcode::AddI32, 1, 1);
                c.write_u8_operand(2, 1, 1);
                c.write_u8_operand(0, 1, 1);
                c.write_u8_operand(1, 1, 1);
            }
            c.write_opcode(Opcode::ReturnVoid, 1, 1);
        });
        let program = translate_loop(&chunk, 0, RolloutStage::I32Only, 2).unwrap();
        let safepoints = program.instructions.iter().filter(|i| matches!(i.op, JitIrOp::Safepoint)).count();
        assert_eq!(safepoints, 1);
    }

    #[test]
    fn an_unrecognized_opcode_fails_the_translation() {
        let chunk = chunk_with(|c| {
            c.write_opcode(Opcode::MakeArray, 1, 1);
            c.write_u8_operand(0, 1, 1);
            c.write_u16(0, 1, 1);
        });
        let result = translate_loop(&chunk, 0, RolloutStage::Strings, 100);
        assert!(matches!(result, Err(TranslationError::UnsupportedOpcode { .. })));
    }
}
