//! Structural verification of artifacts.
//!
//! Every reachable instruction of every block is checked by abstract
//! interpretation over the typed operand stack: operand types must match,
//! slots must be in range and typed consistently, every path reaching a jump
//! target must agree on the stack shape, and no path may run off the end of
//! a block. Unreachable code is not checked.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{Artifact, Block, Constant, DecodeError, Op, Signature, ValueType, INIT_BLOCK, MAIN_BLOCK, START_BLOCK};

/// A verification failure, located at a block and bytecode offset.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("block '{block}' pc={offset}: {kind}")]
pub struct VerifyError {
    pub block: String,
    pub offset: usize,
    pub kind: VerifyErrorKind,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerifyErrorKind {
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("duplicate block name")]
    DuplicateBlock,
    #[error("block must have signature {expected}, found {found}")]
    ReservedSignature { expected: Signature, found: Signature },
    #[error("parameter slot {slot} declared {found}, signature says {expected}")]
    ParamSlot { slot: usize, expected: ValueType, found: ValueType },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("expected {expected} on the stack, found {found}")]
    OperandType { expected: ValueType, found: ValueType },
    #[error("arithmetic on {0}")]
    NonNumeric(ValueType),
    #[error("constant index {0} out of range")]
    ConstantIndex(u16),
    #[error("constant {0} cannot be pushed")]
    NotPushable(u16),
    #[error("constant {0} is not a message")]
    NotMessage(u16),
    #[error("slot {slot} out of range ({count} slots)")]
    SlotIndex { slot: u16, count: usize },
    #[error("slot {slot} has type {declared}, accessed as {used}")]
    SlotType { slot: u16, declared: ValueType, used: ValueType },
    #[error("jump target {0} is not an instruction boundary")]
    JumpTarget(u16),
    #[error("call to unknown block {0}")]
    CallTarget(u16),
    #[error("return of {found} from block returning {expected}")]
    ReturnType { expected: String, found: String },
    #[error("stack shapes differ at merge: {0:?} vs {1:?}")]
    StackMismatch(Vec<ValueType>, Vec<ValueType>),
    #[error("control falls off the end of the block")]
    FallOffEnd,
}

/// Verify every block of an artifact. The first failure is reported.
pub fn verify_artifact(artifact: &Artifact) -> Result<(), VerifyError> {
    let mut seen = FxHashSet::default();
    for block in &artifact.blocks {
        if !seen.insert(block.name.as_str()) {
            return Err(err(block, 0, VerifyErrorKind::DuplicateBlock));
        }
        check_reserved_signature(block)?;
        verify_block(artifact, block)?;
    }
    Ok(())
}

fn err(block: &Block, offset: usize, kind: VerifyErrorKind) -> VerifyError {
    VerifyError {
        block: block.name.clone(),
        offset,
        kind,
    }
}

fn check_reserved_signature(block: &Block) -> Result<(), VerifyError> {
    let expected = match block.name.as_str() {
        START_BLOCK | INIT_BLOCK => Signature::void(),
        MAIN_BLOCK => Signature::new(vec![], Some(ValueType::Int)),
        _ => return Ok(()),
    };
    if block.signature != expected {
        return Err(err(
            block,
            0,
            VerifyErrorKind::ReservedSignature {
                expected,
                found: block.signature.clone(),
            },
        ));
    }
    Ok(())
}

/// Abstract state while walking one block.
struct BlockVerifier<'a> {
    artifact: &'a Artifact,
    block: &'a Block,
    /// Decoded instructions by offset
    ops: FxHashMap<usize, (Op, usize)>,
    /// Stack shape on entry to each visited offset
    states: FxHashMap<usize, Vec<ValueType>>,
    worklist: Vec<usize>,
}

fn verify_block(artifact: &Artifact, block: &Block) -> Result<(), VerifyError> {
    for (i, &expected) in block.signature.params.iter().enumerate() {
        match block.slots.get(i) {
            Some(&found) if found == expected => {}
            Some(&found) => {
                return Err(err(block, 0, VerifyErrorKind::ParamSlot { slot: i, expected, found }));
            }
            None => {
                return Err(err(
                    block,
                    0,
                    VerifyErrorKind::SlotIndex {
                        slot: i as u16,
                        count: block.slots.len(),
                    },
                ));
            }
        }
    }

    let mut ops = FxHashMap::default();
    let mut offset = 0;
    while offset < block.chunk.len() {
        let decoded = block.chunk.decode(offset).map_err(|e| err(block, offset, e.into()))?;
        ops.insert(offset, decoded);
        offset = decoded.1;
    }

    let mut verifier = BlockVerifier {
        artifact,
        block,
        ops,
        states: FxHashMap::default(),
        worklist: Vec::new(),
    };
    verifier.flow_to(0, 0, Vec::new())?;
    while let Some(pc) = verifier.worklist.pop() {
        verifier.step(pc)?;
    }
    Ok(())
}

impl<'a> BlockVerifier<'a> {
    fn fail(&self, pc: usize, kind: VerifyErrorKind) -> VerifyError {
        err(self.block, pc, kind)
    }

    /// Propagate `stack` into `target`, queueing it if first seen.
    fn flow_to(&mut self, from: usize, target: usize, stack: Vec<ValueType>) -> Result<(), VerifyError> {
        if target == self.block.chunk.len() {
            return Err(self.fail(from, VerifyErrorKind::FallOffEnd));
        }
        if !self.ops.contains_key(&target) {
            return Err(self.fail(from, VerifyErrorKind::JumpTarget(target as u16)));
        }
        match self.states.get(&target) {
            Some(existing) if *existing != stack => {
                Err(self.fail(target, VerifyErrorKind::StackMismatch(existing.clone(), stack)))
            }
            Some(_) => Ok(()),
            None => {
                self.states.insert(target, stack);
                self.worklist.push(target);
                Ok(())
            }
        }
    }

    fn pop(&self, pc: usize, stack: &mut Vec<ValueType>, expected: ValueType) -> Result<(), VerifyError> {
        match stack.pop() {
            None => Err(self.fail(pc, VerifyErrorKind::StackUnderflow)),
            Some(found) if found != expected => Err(self.fail(pc, VerifyErrorKind::OperandType { expected, found })),
            Some(_) => Ok(()),
        }
    }

    fn slot(&self, pc: usize, slot: u16, used: ValueType) -> Result<(), VerifyError> {
        match self.block.slots.get(slot as usize) {
            None => Err(self.fail(
                pc,
                VerifyErrorKind::SlotIndex {
                    slot,
                    count: self.block.slots.len(),
                },
            )),
            Some(&declared) if declared != used => {
                Err(self.fail(pc, VerifyErrorKind::SlotType { slot, declared, used }))
            }
            Some(_) => Ok(()),
        }
    }

    fn constant(&self, pc: usize, idx: u16) -> Result<&'a Constant, VerifyError> {
        self.block
            .chunk
            .constants
            .get(idx as usize)
            .ok_or_else(|| self.fail(pc, VerifyErrorKind::ConstantIndex(idx)))
    }

    fn step(&mut self, pc: usize) -> Result<(), VerifyError> {
        let (op, next) = match self.ops.get(&pc) {
            Some(&decoded) => decoded,
            None => return Err(self.fail(pc, VerifyErrorKind::JumpTarget(pc as u16))),
        };
        let mut stack = self.states.get(&pc).cloned().unwrap_or_default();

        match op {
            Op::Const(idx) => {
                let ty = self
                    .constant(pc, idx)?
                    .value_type()
                    .ok_or_else(|| self.fail(pc, VerifyErrorKind::NotPushable(idx)))?;
                stack.push(ty);
            }
            Op::Pop(ty) => self.pop(pc, &mut stack, ty)?,
            Op::Load(ty, slot) => {
                self.slot(pc, slot, ty)?;
                stack.push(ty);
            }
            Op::Store(ty, slot) => {
                self.slot(pc, slot, ty)?;
                self.pop(pc, &mut stack, ty)?;
            }
            Op::Arith(_, ty) => {
                if !ty.is_numeric() {
                    return Err(self.fail(pc, VerifyErrorKind::NonNumeric(ty)));
                }
                self.pop(pc, &mut stack, ty)?;
                self.pop(pc, &mut stack, ty)?;
                stack.push(ty);
            }
            Op::Cast(from, to) => {
                self.pop(pc, &mut stack, from)?;
                stack.push(to);
            }
            Op::Shift(_) => {
                self.pop(pc, &mut stack, ValueType::Int)?;
                self.pop(pc, &mut stack, ValueType::Int)?;
                stack.push(ValueType::Int);
            }
            Op::Compare(ty) => {
                self.pop(pc, &mut stack, ty)?;
                self.pop(pc, &mut stack, ty)?;
                stack.push(ValueType::Int);
            }
            Op::Jump(target) => return self.flow_to(pc, target as usize, stack),
            Op::JumpIf(_, target) => {
                self.pop(pc, &mut stack, ValueType::Int)?;
                self.flow_to(pc, target as usize, stack.clone())?;
            }
            Op::JumpIfTrue(target) => {
                self.pop(pc, &mut stack, ValueType::Bool)?;
                self.flow_to(pc, target as usize, stack.clone())?;
            }
            Op::Call(idx) => {
                let callee = self
                    .artifact
                    .blocks
                    .get(idx as usize)
                    .ok_or_else(|| self.fail(pc, VerifyErrorKind::CallTarget(idx)))?;
                for &param in callee.signature.params.iter().rev() {
                    self.pop(pc, &mut stack, param)?;
                }
                if let Some(ret) = callee.signature.ret {
                    stack.push(ret);
                }
            }
            Op::Return(ty) => {
                if self.block.signature.ret != Some(ty) {
                    return Err(self.fail(
                        pc,
                        VerifyErrorKind::ReturnType {
                            expected: describe(self.block.signature.ret),
                            found: ty.to_string(),
                        },
                    ));
                }
                return self.pop(pc, &mut stack, ty);
            }
            Op::ReturnVoid => {
                if let Some(ret) = self.block.signature.ret {
                    return Err(self.fail(
                        pc,
                        VerifyErrorKind::ReturnType {
                            expected: ret.to_string(),
                            found: describe(None),
                        },
                    ));
                }
                return Ok(());
            }
            Op::InitInput => {}
            Op::Read(ty) => stack.push(ty),
            Op::Print(ty) => self.pop(pc, &mut stack, ty)?,
            Op::PrintError(idx) => {
                if !matches!(self.constant(pc, idx)?, Constant::Str(_)) {
                    return Err(self.fail(pc, VerifyErrorKind::NotMessage(idx)));
                }
            }
            Op::Exit => return self.pop(pc, &mut stack, ValueType::Int),
        }

        self.flow_to(pc, next, stack)
    }
}

fn describe(ty: Option<ValueType>) -> String {
    ty.map_or_else(|| "Void".to_string(), |t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chunk, OpCode, Relation};

    fn block(name: &str, signature: Signature, slots: Vec<ValueType>, chunk: Chunk) -> Block {
        Block {
            name: name.into(),
            signature,
            slots,
            chunk,
        }
    }

    fn artifact(blocks: Vec<Block>) -> Artifact {
        Artifact {
            name: "Test".into(),
            blocks,
        }
    }

    fn int_const(chunk: &mut Chunk, n: i64) {
        let idx = chunk.add_constant(Constant::Int(n));
        chunk.write_op(OpCode::Const, 1);
        chunk.write_u16(idx as u16, 1);
    }

    fn typed(chunk: &mut Chunk, op: OpCode, ty: ValueType) {
        chunk.write_op(op, 1);
        chunk.write(ty as u8, 1);
    }

    #[test]
    fn test_accepts_simple_block() {
        let mut chunk = Chunk::new();
        int_const(&mut chunk, 2);
        int_const(&mut chunk, 3);
        typed(&mut chunk, OpCode::Add, ValueType::Int);
        typed(&mut chunk, OpCode::Return, ValueType::Int);
        let a = artifact(vec![block("<main>", Signature::new(vec![], Some(ValueType::Int)), vec![], chunk)]);
        assert_eq!(verify_artifact(&a), Ok(()));
    }

    #[test]
    fn test_rejects_operand_type() {
        let mut chunk = Chunk::new();
        int_const(&mut chunk, 2);
        typed(&mut chunk, OpCode::Print, ValueType::Double);
        chunk.write_op(OpCode::ReturnVoid, 1);
        let a = artifact(vec![block("f", Signature::void(), vec![], chunk)]);
        let e = verify_artifact(&a).unwrap_err();
        assert_eq!(e.block, "f");
        assert_eq!(e.offset, 3);
        assert_eq!(
            e.kind,
            VerifyErrorKind::OperandType {
                expected: ValueType::Double,
                found: ValueType::Int
            }
        );
    }

    #[test]
    fn test_rejects_fall_off_end() {
        let mut chunk = Chunk::new();
        int_const(&mut chunk, 1);
        typed(&mut chunk, OpCode::Pop, ValueType::Int);
        let a = artifact(vec![block("f", Signature::void(), vec![], chunk)]);
        assert_eq!(verify_artifact(&a).unwrap_err().kind, VerifyErrorKind::FallOffEnd);
    }

    #[test]
    fn test_rejects_underflow() {
        let mut chunk = Chunk::new();
        typed(&mut chunk, OpCode::Pop, ValueType::Int);
        chunk.write_op(OpCode::ReturnVoid, 1);
        let a = artifact(vec![block("f", Signature::void(), vec![], chunk)]);
        assert_eq!(verify_artifact(&a).unwrap_err().kind, VerifyErrorKind::StackUnderflow);
    }

    #[test]
    fn test_rejects_slot_type() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Load, 1);
        chunk.write(ValueType::Double as u8, 1);
        chunk.write_u16(0, 1);
        typed(&mut chunk, OpCode::Pop, ValueType::Double);
        chunk.write_op(OpCode::ReturnVoid, 1);
        let a = artifact(vec![block("f", Signature::new(vec![ValueType::Int], None), vec![ValueType::Int], chunk)]);
        assert!(matches!(verify_artifact(&a).unwrap_err().kind, VerifyErrorKind::SlotType { slot: 0, .. }));
    }

    #[test]
    fn test_rejects_stack_mismatch_at_merge() {
        // if (cmp) push 1; merge: return void  (one path leaves an extra Int)
        let mut chunk = Chunk::new();
        int_const(&mut chunk, 0); // 0
        int_const(&mut chunk, 0); // 3
        typed(&mut chunk, OpCode::Cmp, ValueType::Int); // 6
        chunk.write_op(OpCode::JumpIf, 1); // 8
        chunk.write(Relation::Eq as u8, 1);
        chunk.write_u16(15, 1);
        int_const(&mut chunk, 1); // 12
        chunk.write_op(OpCode::ReturnVoid, 1); // 15
        let a = artifact(vec![block("f", Signature::void(), vec![], chunk)]);
        assert!(matches!(verify_artifact(&a).unwrap_err().kind, VerifyErrorKind::StackMismatch(..)));
    }

    #[test]
    fn test_rejects_call_with_wrong_arguments() {
        let mut callee = Chunk::new();
        callee.write_op(OpCode::ReturnVoid, 1);
        let mut caller = Chunk::new();
        int_const(&mut caller, 1);
        caller.write_op(OpCode::Call, 1);
        caller.write_u16(0, 1);
        caller.write_op(OpCode::ReturnVoid, 1);

        let a = artifact(vec![
            block("g", Signature::new(vec![ValueType::Double], None), vec![ValueType::Double], callee),
            block("f", Signature::void(), vec![], caller),
        ]);
        let e = verify_artifact(&a).unwrap_err();
        assert_eq!(e.block, "f");
        assert!(matches!(e.kind, VerifyErrorKind::OperandType { expected: ValueType::Double, .. }));
    }

    #[test]
    fn test_rejects_bad_jump_target() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Jump, 1);
        chunk.write_u16(1, 1);
        chunk.write_op(OpCode::ReturnVoid, 1);
        let a = artifact(vec![block("f", Signature::void(), vec![], chunk)]);
        assert_eq!(verify_artifact(&a).unwrap_err().kind, VerifyErrorKind::JumpTarget(1));
    }

    #[test]
    fn test_rejects_wrong_return() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::ReturnVoid, 1);
        let a = artifact(vec![block("f", Signature::new(vec![], Some(ValueType::Int)), vec![], chunk)]);
        assert!(matches!(verify_artifact(&a).unwrap_err().kind, VerifyErrorKind::ReturnType { .. }));
    }

    #[test]
    fn test_rejects_duplicate_blocks_and_reserved_signatures() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::ReturnVoid, 1);
        let f = block("f", Signature::void(), vec![], chunk.clone());
        let a = artifact(vec![f.clone(), f]);
        assert_eq!(verify_artifact(&a).unwrap_err().kind, VerifyErrorKind::DuplicateBlock);

        let a = artifact(vec![block("<main>", Signature::void(), vec![], chunk)]);
        assert!(matches!(verify_artifact(&a).unwrap_err().kind, VerifyErrorKind::ReservedSignature { .. }));
    }

    #[test]
    fn test_unreachable_code_is_ignored() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::ReturnVoid, 1);
        typed(&mut chunk, OpCode::Pop, ValueType::Int);
        let a = artifact(vec![block("f", Signature::void(), vec![], chunk)]);
        assert_eq!(verify_artifact(&a), Ok(()));
    }

    #[test]
    fn test_message_constant_required() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Constant::Int(4));
        chunk.write_op(OpCode::PrintError, 1);
        chunk.write_u16(idx as u16, 1);
        chunk.write_op(OpCode::ReturnVoid, 1);
        let a = artifact(vec![block("f", Signature::void(), vec![], chunk)]);
        assert_eq!(verify_artifact(&a).unwrap_err().kind, VerifyErrorKind::NotMessage(0));
    }
}
