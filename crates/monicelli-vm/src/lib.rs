//! Reference interpreter for Monicelli bytecode artifacts.

pub mod input;
pub mod value;
pub mod vm;

pub use input::InputScanner;
pub use value::Value;
pub use vm::{RuntimeError, Vm, VmConfig};
