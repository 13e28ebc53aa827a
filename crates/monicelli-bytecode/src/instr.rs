//! Abstract instructions, as produced by code generation.
//!
//! Jumps refer to symbolic [`Label`]s and calls refer to blocks by name; the
//! assembler resolves both when encoding.

use std::fmt;

use crate::{Constant, Signature, ValueType};

/// A jump target within one code block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftKind {
    /// Left shift
    Shl,
    /// Logical (unsigned) right shift
    Ushr,
}

/// Relation tested by [`Instr::JumpIf`] against a three-way ordering signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Relation {
    Lt = 0,
    Gt = 1,
    Le = 2,
    Ge = 3,
    Eq = 4,
    Ne = 5,
}

impl Relation {
    /// Whether the relation holds for an ordering signal (`-1`, `0` or `1`).
    pub fn holds(self, signal: i64) -> bool {
        match self {
            Relation::Lt => signal < 0,
            Relation::Gt => signal > 0,
            Relation::Le => signal <= 0,
            Relation::Ge => signal >= 0,
            Relation::Eq => signal == 0,
            Relation::Ne => signal != 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Relation::Lt => "lt",
            Relation::Gt => "gt",
            Relation::Le => "le",
            Relation::Ge => "ge",
            Relation::Eq => "eq",
            Relation::Ne => "ne",
        }
    }
}

impl TryFrom<u8> for Relation {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Relation::Lt),
            1 => Ok(Relation::Gt),
            2 => Ok(Relation::Le),
            3 => Ok(Relation::Ge),
            4 => Ok(Relation::Eq),
            5 => Ok(Relation::Ne),
            other => Err(other),
        }
    }
}

/// One abstract stack-machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Push a constant
    Push(Constant),
    /// Push the value of a slot
    Load { ty: ValueType, slot: u16 },
    /// Pop into a slot
    Store { ty: ValueType, slot: u16 },
    /// Discard the top value
    Pop(ValueType),
    /// Convert the top value
    Cast { from: ValueType, to: ValueType },
    /// Pop two values, push the result
    Arith { op: ArithOp, ty: ValueType },
    /// Pop amount and value (both `Int`), push the shifted value
    Shift(ShiftKind),
    /// Pop two values, push their ordering signal as `Int`
    Compare(ValueType),
    Jump(Label),
    /// Pop an ordering signal and jump if the relation holds
    JumpIf { relation: Relation, target: Label },
    /// Pop a `Bool` and jump if it is true
    JumpIfTrue(Label),
    /// Bind a label to the next instruction
    Mark(Label),
    /// Invoke another block of the same artifact
    Call { name: String, signature: Signature },
    Return(ValueType),
    ReturnVoid,
    /// Open the shared standard-input scanner
    InitInput,
    /// Read one token from standard input and push it
    Read(ValueType),
    /// Pop a value and print it with a trailing newline
    Print(ValueType),
    /// Print a fixed message line to standard error
    PrintError(String),
    /// Pop an `Int` and terminate the process with it as status
    Exit,
}

/// A finished block ready for assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub name: String,
    pub signature: Signature,
    /// Types of every local slot; parameters come first
    pub slots: Vec<ValueType>,
    pub instrs: Vec<Instr>,
    /// Source line of each instruction, parallel to `instrs`
    pub lines: Vec<u32>,
}

/// Everything the assembler needs to produce one artifact.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssemblyUnit {
    pub name: String,
    pub blocks: Vec<CodeBlock>,
}

impl AssemblyUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
        }
    }

    pub fn push(&mut self, block: CodeBlock) {
        self.blocks.push(block);
    }
}
