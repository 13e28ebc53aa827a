//! Encoded bytecode: opcodes, code chunks and instruction decoding.

use crate::{ArithOp, Constant, Relation, ShiftKind, ValueType};

/// Bytecode opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // STACK OPERATIONS (0x00-0x0F)
    /// Push a constant from the constant pool [index: u16]
    Const = 0x00,
    /// Pop top of stack [type: u8]
    Pop = 0x06,

    // LOCAL SLOTS (0x10-0x1F)
    /// Load local slot [type: u8, slot: u16]
    Load = 0x10,
    /// Store to local slot [type: u8, slot: u16]
    Store = 0x12,

    // ARITHMETIC (0x20-0x2F)
    /// Add [type: u8]
    Add = 0x20,
    /// Subtract [type: u8]
    Sub = 0x21,
    /// Multiply [type: u8]
    Mul = 0x22,
    /// Divide [type: u8]
    Div = 0x23,
    /// Primitive conversion [from: u8, to: u8]
    Cast = 0x28,
    /// Shift left (Int, Int -> Int)
    Shl = 0x2C,
    /// Logical shift right (Int, Int -> Int)
    Ushr = 0x2D,

    // COMPARISON (0x30-0x3F)
    /// Three-way compare, pushes -1/0/1 as Int [type: u8]
    Cmp = 0x30,

    // CONTROL FLOW (0x40-0x4F)
    /// Unconditional jump [target: u16]
    Jump = 0x40,
    /// Pop an ordering signal, jump if the relation holds [relation: u8, target: u16]
    JumpIf = 0x41,
    /// Pop a Bool, jump if true [target: u16]
    JumpIfTrue = 0x42,

    // FUNCTIONS (0x50-0x5F)
    /// Call block [block: u16]
    Call = 0x50,
    /// Return top of stack [type: u8]
    Return = 0x52,
    /// Return without a value
    ReturnVoid = 0x53,

    // HOST (0xF0-0xFF)
    /// Open the standard-input scanner
    InitInput = 0xF0,
    /// Read one token of the given type [type: u8]
    Read = 0xF1,
    /// Print top of stack with newline [type: u8]
    Print = 0xF8,
    /// Print a message constant to stderr [index: u16]
    PrintError = 0xF9,
    /// Terminate with the Int on top of stack as status
    Exit = 0xFF,
}

impl OpCode {
    /// Get the size of an instruction (including operands) in bytes.
    pub fn instruction_size(self) -> usize {
        match self {
            OpCode::Shl | OpCode::Ushr | OpCode::ReturnVoid | OpCode::InitInput | OpCode::Exit => 1,

            // 1-byte operand
            OpCode::Pop
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Cmp
            | OpCode::Return
            | OpCode::Read
            | OpCode::Print => 2,

            // 2-byte operand (u16 or u8 + u8)
            OpCode::Const
            | OpCode::Cast
            | OpCode::Jump
            | OpCode::JumpIfTrue
            | OpCode::Call
            | OpCode::PrintError => 3,

            // 3-byte operand (u8 + u16)
            OpCode::Load | OpCode::Store | OpCode::JumpIf => 4,
        }
    }

    /// Get a human-readable name for the opcode.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Const => "CONST",
            OpCode::Pop => "POP",
            OpCode::Load => "LOAD",
            OpCode::Store => "STORE",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Cast => "CAST",
            OpCode::Shl => "SHL",
            OpCode::Ushr => "USHR",
            OpCode::Cmp => "CMP",
            OpCode::Jump => "JUMP",
            OpCode::JumpIf => "JUMP_IF",
            OpCode::JumpIfTrue => "JUMP_IF_TRUE",
            OpCode::Call => "CALL",
            OpCode::Return => "RETURN",
            OpCode::ReturnVoid => "RETURN_VOID",
            OpCode::InitInput => "INIT_INPUT",
            OpCode::Read => "READ",
            OpCode::Print => "PRINT",
            OpCode::PrintError => "PRINT_ERROR",
            OpCode::Exit => "EXIT",
        }
    }

    pub fn arith(op: ArithOp) -> OpCode {
        match op {
            ArithOp::Add => OpCode::Add,
            ArithOp::Sub => OpCode::Sub,
            ArithOp::Mul => OpCode::Mul,
            ArithOp::Div => OpCode::Div,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(OpCode::Const),
            0x06 => Ok(OpCode::Pop),
            0x10 => Ok(OpCode::Load),
            0x12 => Ok(OpCode::Store),
            0x20 => Ok(OpCode::Add),
            0x21 => Ok(OpCode::Sub),
            0x22 => Ok(OpCode::Mul),
            0x23 => Ok(OpCode::Div),
            0x28 => Ok(OpCode::Cast),
            0x2C => Ok(OpCode::Shl),
            0x2D => Ok(OpCode::Ushr),
            0x30 => Ok(OpCode::Cmp),
            0x40 => Ok(OpCode::Jump),
            0x41 => Ok(OpCode::JumpIf),
            0x42 => Ok(OpCode::JumpIfTrue),
            0x50 => Ok(OpCode::Call),
            0x52 => Ok(OpCode::Return),
            0x53 => Ok(OpCode::ReturnVoid),
            0xF0 => Ok(OpCode::InitInput),
            0xF1 => Ok(OpCode::Read),
            0xF8 => Ok(OpCode::Print),
            0xF9 => Ok(OpCode::PrintError),
            0xFF => Ok(OpCode::Exit),
            _ => Err(()),
        }
    }
}

/// A decoded instruction with its operands resolved to indices and offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Const(u16),
    Pop(ValueType),
    Load(ValueType, u16),
    Store(ValueType, u16),
    Arith(ArithOp, ValueType),
    Cast(ValueType, ValueType),
    Shift(ShiftKind),
    Compare(ValueType),
    Jump(u16),
    JumpIf(Relation, u16),
    JumpIfTrue(u16),
    Call(u16),
    Return(ValueType),
    ReturnVoid,
    InitInput,
    Read(ValueType),
    Print(ValueType),
    PrintError(u16),
    Exit,
}

impl Op {
    /// Whether control never continues to the following instruction.
    pub fn is_terminal(self) -> bool {
        matches!(self, Op::Jump(_) | Op::Return(_) | Op::ReturnVoid | Op::Exit)
    }

    /// The jump target, if this is a jump.
    pub fn jump_target(self) -> Option<u16> {
        match self {
            Op::Jump(t) | Op::JumpIf(_, t) | Op::JumpIfTrue(t) => Some(t),
            _ => None,
        }
    }
}

/// Errors decoding a code stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated instruction at offset {0}")]
    Truncated(usize),
    #[error("invalid opcode 0x{byte:02X} at offset {offset}")]
    InvalidOpcode { offset: usize, byte: u8 },
    #[error("invalid type tag {byte} at offset {offset}")]
    InvalidType { offset: usize, byte: u8 },
    #[error("invalid relation {byte} at offset {offset}")]
    InvalidRelation { offset: usize, byte: u8 },
}

/// A bytecode chunk (compiled code of one block).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    /// The bytecode
    pub code: Vec<u8>,
    /// Constant pool
    pub constants: Vec<Constant>,
    /// Line number information: (bytecode_offset, line_number)
    pub lines: Vec<(u32, u32)>,
}

impl Chunk {
    /// Create a new empty chunk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a byte to the chunk.
    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        // Only store line info when the line changes
        if self.lines.last().map(|&(_, l)| l) != Some(line) {
            self.lines.push((self.code.len() as u32 - 1, line));
        }
    }

    /// Write an opcode to the chunk.
    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write(op as u8, line);
    }

    /// Write a u16 value (little-endian).
    pub fn write_u16(&mut self, value: u16, line: u32) {
        self.write((value & 0xFF) as u8, line);
        self.write((value >> 8) as u8, line);
    }

    /// Add a constant and return its index.
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        if let Some(i) = self.constants.iter().position(|c| c == &constant) {
            return i;
        }
        self.constants.push(constant);
        self.constants.len() - 1
    }

    /// Get the current code length.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Get the line number for a bytecode offset.
    pub fn get_line(&self, offset: usize) -> u32 {
        let offset = offset as u32;
        for &(code_offset, line) in self.lines.iter().rev() {
            if code_offset <= offset {
                return line;
            }
        }
        0
    }

    /// Patch a u16 at the given offset.
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        self.code[offset] = (value & 0xFF) as u8;
        self.code[offset + 1] = (value >> 8) as u8;
    }

    fn byte_at(&self, offset: usize) -> Result<u8, DecodeError> {
        self.code.get(offset).copied().ok_or(DecodeError::Truncated(offset))
    }

    fn u16_at(&self, offset: usize) -> Result<u16, DecodeError> {
        Ok(self.byte_at(offset)? as u16 | ((self.byte_at(offset + 1)? as u16) << 8))
    }

    fn type_at(&self, offset: usize) -> Result<ValueType, DecodeError> {
        let byte = self.byte_at(offset)?;
        ValueType::try_from(byte).map_err(|byte| DecodeError::InvalidType { offset, byte })
    }

    /// Decode the instruction at `offset`, returning it with the offset of the next one.
    pub fn decode(&self, offset: usize) -> Result<(Op, usize), DecodeError> {
        let byte = self.byte_at(offset)?;
        let opcode = OpCode::try_from(byte).map_err(|_| DecodeError::InvalidOpcode { offset, byte })?;
        let size = opcode.instruction_size();
        if offset + size > self.code.len() {
            return Err(DecodeError::Truncated(offset));
        }
        let at = offset + 1;

        let op = match opcode {
            OpCode::Const => Op::Const(self.u16_at(at)?),
            OpCode::Pop => Op::Pop(self.type_at(at)?),
            OpCode::Load => Op::Load(self.type_at(at)?, self.u16_at(at + 1)?),
            OpCode::Store => Op::Store(self.type_at(at)?, self.u16_at(at + 1)?),
            OpCode::Add => Op::Arith(ArithOp::Add, self.type_at(at)?),
            OpCode::Sub => Op::Arith(ArithOp::Sub, self.type_at(at)?),
            OpCode::Mul => Op::Arith(ArithOp::Mul, self.type_at(at)?),
            OpCode::Div => Op::Arith(ArithOp::Div, self.type_at(at)?),
            OpCode::Cast => Op::Cast(self.type_at(at)?, self.type_at(at + 1)?),
            OpCode::Shl => Op::Shift(ShiftKind::Shl),
            OpCode::Ushr => Op::Shift(ShiftKind::Ushr),
            OpCode::Cmp => Op::Compare(self.type_at(at)?),
            OpCode::Jump => Op::Jump(self.u16_at(at)?),
            OpCode::JumpIf => {
                let byte = self.byte_at(at)?;
                let relation =
                    Relation::try_from(byte).map_err(|byte| DecodeError::InvalidRelation { offset: at, byte })?;
                Op::JumpIf(relation, self.u16_at(at + 1)?)
            }
            OpCode::JumpIfTrue => Op::JumpIfTrue(self.u16_at(at)?),
            OpCode::Call => Op::Call(self.u16_at(at)?),
            OpCode::Return => Op::Return(self.type_at(at)?),
            OpCode::ReturnVoid => Op::ReturnVoid,
            OpCode::InitInput => Op::InitInput,
            OpCode::Read => Op::Read(self.type_at(at)?),
            OpCode::Print => Op::Print(self.type_at(at)?),
            OpCode::PrintError => Op::PrintError(self.u16_at(at)?),
            OpCode::Exit => Op::Exit,
        };

        Ok((op, offset + size))
    }

    /// Disassemble the chunk. `blocks` names call targets by index.
    pub fn disassemble(&self, name: &str, blocks: &[&str]) -> String {
        let mut output = format!("== {} ==\n", name);
        let mut offset = 0;

        while offset < self.code.len() {
            match self.decode(offset) {
                Ok((op, next)) => {
                    output.push_str(&self.disassemble_op(offset, op, blocks));
                    output.push('\n');
                    offset = next;
                }
                Err(e) => {
                    output.push_str(&format!("{:04}    ! {}\n", offset, e));
                    break;
                }
            }
        }

        output
    }

    fn disassemble_op(&self, offset: usize, op: Op, blocks: &[&str]) -> String {
        let line = self.get_line(offset);
        let line_str = if offset > 0 && self.get_line(offset - 1) == line {
            "   |".to_string()
        } else {
            format!("{:4}", line)
        };
        let name = match self.code.get(offset).copied().map(OpCode::try_from) {
            Some(Ok(opcode)) => opcode.name(),
            _ => "?",
        };

        let operands = match op {
            Op::Const(idx) | Op::PrintError(idx) => match self.constants.get(idx as usize) {
                Some(constant) => format!("{} ; {}", idx, constant),
                None => format!("{} ; ?", idx),
            },
            Op::Pop(ty) | Op::Arith(_, ty) | Op::Compare(ty) | Op::Return(ty) | Op::Read(ty) | Op::Print(ty) => {
                ty.to_string()
            }
            Op::Load(ty, slot) | Op::Store(ty, slot) => format!("{} {}", ty, slot),
            Op::Cast(from, to) => format!("{} -> {}", from, to),
            Op::Jump(target) | Op::JumpIfTrue(target) => format!("-> {}", target),
            Op::JumpIf(relation, target) => format!("{} -> {}", relation.name(), target),
            Op::Call(idx) => format!("{} ({})", idx, blocks.get(idx as usize).copied().unwrap_or("?")),
            Op::Shift(_) | Op::ReturnVoid | Op::InitInput | Op::Exit => String::new(),
        };

        if operands.is_empty() {
            format!("{:04} {} {}", offset, line_str, name)
        } else {
            format!("{:04} {} {:16} {}", offset, line_str, name, operands)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_write() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::ReturnVoid, 1);
        chunk.write_op(OpCode::Exit, 1);
        assert_eq!(chunk.code, vec![OpCode::ReturnVoid as u8, OpCode::Exit as u8]);
        assert_eq!(chunk.lines, vec![(0, 1)]);
    }

    #[test]
    fn test_constant_dedup() {
        let mut chunk = Chunk::new();
        let idx1 = chunk.add_constant(Constant::Int(42));
        let idx2 = chunk.add_constant(Constant::Int(42));
        let idx3 = chunk.add_constant(Constant::Double(42.0));
        assert_eq!(idx1, idx2);
        assert_ne!(idx1, idx3);
    }

    #[test]
    fn test_decode_operands() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Load, 1);
        chunk.write(ValueType::Double as u8, 1);
        chunk.write_u16(300, 1);
        chunk.write_op(OpCode::JumpIf, 2);
        chunk.write(Relation::Ge as u8, 2);
        chunk.write_u16(0, 2);

        assert_eq!(chunk.decode(0), Ok((Op::Load(ValueType::Double, 300), 4)));
        assert_eq!(chunk.decode(4), Ok((Op::JumpIf(Relation::Ge, 0), 8)));
        assert_eq!(chunk.get_line(5), 2);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut chunk = Chunk::new();
        chunk.write(0x99, 1);
        assert_eq!(chunk.decode(0), Err(DecodeError::InvalidOpcode { offset: 0, byte: 0x99 }));

        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Const, 1);
        chunk.write(0, 1);
        assert_eq!(chunk.decode(0), Err(DecodeError::Truncated(0)));

        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Print, 1);
        chunk.write(9, 1);
        assert_eq!(chunk.decode(0), Err(DecodeError::InvalidType { offset: 1, byte: 9 }));
    }

    #[test]
    fn test_disassemble() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Constant::Int(42));
        chunk.write_op(OpCode::Const, 1);
        chunk.write_u16(idx as u16, 1);
        chunk.write_op(OpCode::Call, 1);
        chunk.write_u16(0, 1);
        chunk.write_op(OpCode::Exit, 2);

        let output = chunk.disassemble("test", &["main"]);
        assert!(output.starts_with("== test ==\n"));
        assert!(output.contains("CONST"));
        assert!(output.contains("; 42"));
        assert!(output.contains("0 (main)"));
        assert!(output.contains("EXIT"));
    }
}
