//! Encoding of abstract instructions into a verified artifact.

use rustc_hash::FxHashMap;

use crate::{
    verify_artifact, Artifact, AssemblyUnit, Block, Chunk, CodeBlock, Constant, Instr, Label, OpCode, ShiftKind,
    VerifyError,
};

/// Errors assembling an [`AssemblyUnit`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssembleError {
    #[error("block '{block}': label {label} is never marked")]
    UnboundLabel { block: String, label: Label },
    #[error("block '{block}': label {label} is marked twice")]
    DuplicateLabel { block: String, label: Label },
    #[error("block '{block}': call to undefined block '{callee}'")]
    UndefinedBlock { block: String, callee: String },
    #[error("block '{block}': call to '{callee}' with signature {used}, but it is declared {declared}")]
    SignatureMismatch {
        block: String,
        callee: String,
        used: String,
        declared: String,
    },
    #[error("block '{0}': code exceeds 65535 bytes")]
    CodeTooLarge(String),
    #[error("block '{0}': too many constants")]
    TooManyConstants(String),
    #[error("block '{0}': too many slots")]
    TooManySlots(String),
    #[error("block '{0}': more than 255 parameters")]
    TooManyParams(String),
    #[error("name of {0} bytes exceeds 65535")]
    NameTooLong(usize),
    #[error("too many blocks in one artifact")]
    TooManyBlocks,
    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
}

/// Turns code blocks into artifact bytes.
///
/// Code generation only depends on this trait, so another target encoding
/// can be substituted without touching it.
pub trait Assembler {
    fn assemble(&self, unit: &AssemblyUnit) -> Result<Vec<u8>, AssembleError>;
}

/// Assembler for the Monicelli bytecode format.
#[derive(Debug, Clone)]
pub struct BytecodeAssembler {
    /// Run the structural verifier before releasing bytes
    pub verify: bool,
}

impl Default for BytecodeAssembler {
    fn default() -> Self {
        Self { verify: true }
    }
}

impl BytecodeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a unit into an in-memory artifact without verifying it.
    pub fn encode(&self, unit: &AssemblyUnit) -> Result<Artifact, AssembleError> {
        if unit.blocks.len() > u16::MAX as usize {
            return Err(AssembleError::TooManyBlocks);
        }
        check_name(&unit.name)?;
        let index: FxHashMap<&str, usize> = unit
            .blocks
            .iter()
            .enumerate()
            .rev()
            .map(|(i, b)| (b.name.as_str(), i))
            .collect();

        let blocks = unit
            .blocks
            .iter()
            .map(|block| encode_block(unit, &index, block))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Artifact {
            name: unit.name.clone(),
            blocks,
        })
    }
}

impl Assembler for BytecodeAssembler {
    fn assemble(&self, unit: &AssemblyUnit) -> Result<Vec<u8>, AssembleError> {
        let artifact = self.encode(unit)?;
        if self.verify {
            verify_artifact(&artifact)?;
        }
        Ok(artifact.to_bytes())
    }
}

/// A jump operand waiting for its label's offset.
struct Fixup {
    at: usize,
    label: Label,
}

fn encode_block(
    unit: &AssemblyUnit,
    index: &FxHashMap<&str, usize>,
    block: &CodeBlock,
) -> Result<Block, AssembleError> {
    check_name(&block.name)?;
    if block.signature.params.len() > u8::MAX as usize {
        return Err(AssembleError::TooManyParams(block.name.clone()));
    }
    if block.slots.len() > u16::MAX as usize {
        return Err(AssembleError::TooManySlots(block.name.clone()));
    }

    let mut chunk = Chunk::new();
    let mut marks: FxHashMap<Label, usize> = FxHashMap::default();
    let mut fixups = Vec::new();

    for (i, instr) in block.instrs.iter().enumerate() {
        let line = block.lines.get(i).copied().unwrap_or(0);
        match instr {
            Instr::Push(constant) => {
                let idx = constant_index(&mut chunk, constant.clone(), &block.name)?;
                chunk.write_op(OpCode::Const, line);
                chunk.write_u16(idx, line);
            }
            Instr::Load { ty, slot } => {
                chunk.write_op(OpCode::Load, line);
                chunk.write(*ty as u8, line);
                chunk.write_u16(*slot, line);
            }
            Instr::Store { ty, slot } => {
                chunk.write_op(OpCode::Store, line);
                chunk.write(*ty as u8, line);
                chunk.write_u16(*slot, line);
            }
            Instr::Pop(ty) => {
                chunk.write_op(OpCode::Pop, line);
                chunk.write(*ty as u8, line);
            }
            Instr::Cast { from, to } => {
                chunk.write_op(OpCode::Cast, line);
                chunk.write(*from as u8, line);
                chunk.write(*to as u8, line);
            }
            Instr::Arith { op, ty } => {
                chunk.write_op(OpCode::arith(*op), line);
                chunk.write(*ty as u8, line);
            }
            Instr::Shift(ShiftKind::Shl) => chunk.write_op(OpCode::Shl, line),
            Instr::Shift(ShiftKind::Ushr) => chunk.write_op(OpCode::Ushr, line),
            Instr::Compare(ty) => {
                chunk.write_op(OpCode::Cmp, line);
                chunk.write(*ty as u8, line);
            }
            Instr::Jump(label) => {
                chunk.write_op(OpCode::Jump, line);
                fixups.push(Fixup { at: chunk.len(), label: *label });
                chunk.write_u16(0, line);
            }
            Instr::JumpIf { relation, target } => {
                chunk.write_op(OpCode::JumpIf, line);
                chunk.write(*relation as u8, line);
                fixups.push(Fixup { at: chunk.len(), label: *target });
                chunk.write_u16(0, line);
            }
            Instr::JumpIfTrue(label) => {
                chunk.write_op(OpCode::JumpIfTrue, line);
                fixups.push(Fixup { at: chunk.len(), label: *label });
                chunk.write_u16(0, line);
            }
            Instr::Mark(label) => {
                if marks.insert(*label, chunk.len()).is_some() {
                    return Err(AssembleError::DuplicateLabel {
                        block: block.name.clone(),
                        label: *label,
                    });
                }
            }
            Instr::Call { name, signature } => {
                let &callee = index.get(name.as_str()).ok_or_else(|| AssembleError::UndefinedBlock {
                    block: block.name.clone(),
                    callee: name.clone(),
                })?;
                let declared = &unit.blocks[callee].signature;
                if declared != signature {
                    return Err(AssembleError::SignatureMismatch {
                        block: block.name.clone(),
                        callee: name.clone(),
                        used: signature.to_string(),
                        declared: declared.to_string(),
                    });
                }
                chunk.write_op(OpCode::Call, line);
                chunk.write_u16(callee as u16, line);
            }
            Instr::Return(ty) => {
                chunk.write_op(OpCode::Return, line);
                chunk.write(*ty as u8, line);
            }
            Instr::ReturnVoid => chunk.write_op(OpCode::ReturnVoid, line),
            Instr::InitInput => chunk.write_op(OpCode::InitInput, line),
            Instr::Read(ty) => {
                chunk.write_op(OpCode::Read, line);
                chunk.write(*ty as u8, line);
            }
            Instr::Print(ty) => {
                chunk.write_op(OpCode::Print, line);
                chunk.write(*ty as u8, line);
            }
            Instr::PrintError(message) => {
                let idx = constant_index(&mut chunk, Constant::Str(message.clone()), &block.name)?;
                chunk.write_op(OpCode::PrintError, line);
                chunk.write_u16(idx, line);
            }
            Instr::Exit => chunk.write_op(OpCode::Exit, line),
        }
    }

    if chunk.len() > u16::MAX as usize {
        return Err(AssembleError::CodeTooLarge(block.name.clone()));
    }

    for fixup in fixups {
        let &target = marks.get(&fixup.label).ok_or_else(|| AssembleError::UnboundLabel {
            block: block.name.clone(),
            label: fixup.label,
        })?;
        chunk.patch_u16(fixup.at, target as u16);
    }

    Ok(Block {
        name: block.name.clone(),
        signature: block.signature.clone(),
        slots: block.slots.clone(),
        chunk,
    })
}

/// Names are stored behind a u16 length.
fn check_name(name: &str) -> Result<(), AssembleError> {
    if name.len() > u16::MAX as usize {
        return Err(AssembleError::NameTooLong(name.len()));
    }
    Ok(())
}

fn constant_index(chunk: &mut Chunk, constant: Constant, block: &str) -> Result<u16, AssembleError> {
    let idx = chunk.add_constant(constant);
    if chunk.constants.len() > u16::MAX as usize {
        return Err(AssembleError::TooManyConstants(block.to_string()));
    }
    Ok(idx as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockBuilder, Relation, Signature, ValueType};

    fn main_block(build: impl FnOnce(&mut BlockBuilder)) -> CodeBlock {
        let mut b = BlockBuilder::new("<main>", Signature::new(vec![], Some(ValueType::Int)));
        build(&mut b);
        b.finish()
    }

    #[test]
    fn test_assemble_and_reload() {
        let mut unit = AssemblyUnit::new("Main");
        unit.push(main_block(|b| {
            b.emit(Instr::Push(Constant::Int(7)));
            b.emit(Instr::Return(ValueType::Int));
        }));

        let bytes = BytecodeAssembler::new().assemble(&unit).unwrap();
        let artifact = Artifact::from_bytes(&bytes).unwrap();
        assert_eq!(artifact.name, "Main");
        assert_eq!(artifact.blocks.len(), 1);
        assert_eq!(artifact.blocks[0].chunk.constants, vec![Constant::Int(7)]);
    }

    #[test]
    fn test_labels_resolve_forward_and_backward() {
        let mut unit = AssemblyUnit::new("Main");
        unit.push(main_block(|b| {
            let top = b.new_label();
            let end = b.new_label();
            b.mark(top);
            b.emit(Instr::Push(Constant::Int(1)));
            b.emit(Instr::Push(Constant::Int(2)));
            b.emit(Instr::Compare(ValueType::Int));
            b.emit(Instr::JumpIf { relation: Relation::Lt, target: end });
            b.emit(Instr::Jump(top));
            b.mark(end);
            b.emit(Instr::Push(Constant::Int(0)));
            b.emit(Instr::Return(ValueType::Int));
        }));

        let artifact = BytecodeAssembler::new().encode(&unit).unwrap();
        let chunk = &artifact.blocks[0].chunk;
        // CONST(3) CONST(3) CMP(2) JUMP_IF(4) JUMP(3) -> end at 15
        assert_eq!(chunk.decode(8).unwrap().0, crate::Op::JumpIf(Relation::Lt, 15));
        assert_eq!(chunk.decode(12).unwrap().0, crate::Op::Jump(0));
        assert_eq!(verify_artifact(&artifact), Ok(()));
    }

    #[test]
    fn test_unbound_label() {
        let mut unit = AssemblyUnit::new("Main");
        unit.push(main_block(|b| {
            let nowhere = b.new_label();
            b.emit(Instr::Jump(nowhere));
        }));
        assert!(matches!(
            BytecodeAssembler::new().assemble(&unit),
            Err(AssembleError::UnboundLabel { .. })
        ));
    }

    #[test]
    fn test_undefined_call_target() {
        let mut unit = AssemblyUnit::new("Main");
        unit.push(main_block(|b| {
            b.emit(Instr::Call {
                name: "missing".into(),
                signature: Signature::void(),
            });
            b.emit(Instr::Push(Constant::Int(0)));
            b.emit(Instr::Return(ValueType::Int));
        }));
        assert_eq!(
            BytecodeAssembler::new().assemble(&unit),
            Err(AssembleError::UndefinedBlock {
                block: "<main>".into(),
                callee: "missing".into()
            })
        );
    }

    #[test]
    fn test_call_signature_must_match() {
        let mut unit = AssemblyUnit::new("Main");
        let mut g = BlockBuilder::new("g", Signature::void());
        g.emit(Instr::ReturnVoid);
        unit.push(g.finish());
        unit.push(main_block(|b| {
            b.emit(Instr::Call {
                name: "g".into(),
                signature: Signature::new(vec![], Some(ValueType::Int)),
            });
            b.emit(Instr::Return(ValueType::Int));
        }));
        assert!(matches!(
            BytecodeAssembler::new().assemble(&unit),
            Err(AssembleError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn test_verification_failure_is_reported() {
        let mut unit = AssemblyUnit::new("Main");
        unit.push(main_block(|b| {
            b.emit(Instr::Push(Constant::Double(1.0)));
            b.emit(Instr::Return(ValueType::Int));
        }));
        let err = BytecodeAssembler::new().assemble(&unit).unwrap_err();
        assert!(matches!(err, AssembleError::Verify(_)));
        assert!(err.to_string().starts_with("verification failed: block '<main>'"));

        let unchecked = BytecodeAssembler { verify: false };
        assert!(unchecked.assemble(&unit).is_ok());
    }

    fn void_block(name: &str, params: usize, extra_slots: usize) -> CodeBlock {
        let mut b = BlockBuilder::new(name, Signature::new(vec![ValueType::Int; params], None));
        for _ in 0..extra_slots {
            b.declare_slot(ValueType::Bool);
        }
        b.emit(Instr::ReturnVoid);
        b.finish()
    }

    #[test]
    fn test_param_limit() {
        let mut unit = AssemblyUnit::new("Main");
        unit.push(void_block("widest", 255, 0));
        let bytes = BytecodeAssembler::new().assemble(&unit).unwrap();
        let artifact = Artifact::from_bytes(&bytes).unwrap();
        assert_eq!(artifact.blocks[0].signature.params.len(), 255);

        unit.push(void_block("too_wide", 256, 0));
        assert_eq!(
            BytecodeAssembler::new().assemble(&unit),
            Err(AssembleError::TooManyParams("too_wide".into()))
        );
    }

    #[test]
    fn test_slot_limit() {
        let mut unit = AssemblyUnit::new("Main");
        unit.push(void_block("full", 0, u16::MAX as usize));
        let bytes = BytecodeAssembler::new().assemble(&unit).unwrap();
        let artifact = Artifact::from_bytes(&bytes).unwrap();
        assert_eq!(artifact.blocks[0].slots.len(), u16::MAX as usize);

        let mut unit = AssemblyUnit::new("Main");
        unit.push(void_block("over", 0, u16::MAX as usize + 1));
        assert_eq!(
            BytecodeAssembler::new().assemble(&unit),
            Err(AssembleError::TooManySlots("over".into()))
        );
    }

    #[test]
    fn test_constant_limit() {
        let mut chunk = Chunk::new();
        chunk.constants = (0..u16::MAX as i64).map(Constant::Int).collect();
        assert_eq!(constant_index(&mut chunk, Constant::Int(0), "f"), Ok(0));
        assert_eq!(
            constant_index(&mut chunk, Constant::Int(-1), "f"),
            Err(AssembleError::TooManyConstants("f".into()))
        );
    }

    #[test]
    fn test_long_name_rejected() {
        let unit = AssemblyUnit::new("M".repeat(u16::MAX as usize + 1));
        assert_eq!(
            BytecodeAssembler::new().encode(&unit),
            Err(AssembleError::NameTooLong(u16::MAX as usize + 1))
        );
    }
}
