//! Stack-machine bytecode for Monicelli.
//!
//! Code generation emits abstract [`Instr`]uctions into [`BlockBuilder`]s;
//! an [`Assembler`] turns the finished blocks into artifact bytes, which the
//! verifier checks before they are released.

pub mod artifact;
pub mod assembler;
pub mod builder;
pub mod chunk;
pub mod instr;
pub mod types;
pub mod verify;

pub use artifact::{Artifact, ArtifactError, Block, INIT_BLOCK, MAGIC, MAIN_BLOCK, START_BLOCK, VERSION};
pub use assembler::{AssembleError, Assembler, BytecodeAssembler};
pub use builder::BlockBuilder;
pub use chunk::{Chunk, DecodeError, Op, OpCode};
pub use instr::{ArithOp, AssemblyUnit, CodeBlock, Instr, Label, Relation, ShiftKind};
pub use types::{Constant, Signature, ValueType};
pub use verify::{verify_artifact, VerifyError, VerifyErrorKind};
