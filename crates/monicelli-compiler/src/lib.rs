//! Code generation for Monicelli.
//!
//! Walks a validated syntax tree, resolves the static type of every
//! expression, and lowers statements into stack-machine instructions. The
//! result goes through an [`Assembler`](monicelli_bytecode::Assembler), which
//! encodes and verifies it.

pub mod binder;
pub mod error;
pub mod lower;
pub mod module;
pub mod types;

pub use binder::{Binder, Slot};
pub use error::CompileError;
pub use lower::FunctionLowerer;
pub use module::{compile_module, is_valid_identifier, CompileOptions, Compiler};
pub use types::{promote, FunctionSig, FunctionTable, TypeResolver};
