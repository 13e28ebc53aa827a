//! Whole-module compilation: wires function blocks into one artifact.

use std::io::Write;

use monicelli_ast::Module;
use monicelli_bytecode::{
    AssemblyUnit, Assembler, BlockBuilder, BytecodeAssembler, CodeBlock, Instr, Signature, ValueType, INIT_BLOCK,
    MAIN_BLOCK, START_BLOCK,
};

use crate::lower::FunctionLowerer;
use crate::types::{FunctionSig, FunctionTable};
use crate::CompileError;

/// Compiler settings.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Artifact name; defaults to the module's own name
    pub artifact_name: Option<String>,
    /// Verify the generated artifact before releasing it
    pub verify: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            artifact_name: None,
            verify: true,
        }
    }
}

/// The Monicelli compiler.
pub struct Compiler<A = BytecodeAssembler> {
    assembler: A,
    options: CompileOptions,
}

impl Compiler {
    /// Create a compiler targeting the Monicelli bytecode format.
    pub fn new() -> Self {
        Self::with_options(CompileOptions::default())
    }

    pub fn with_options(options: CompileOptions) -> Self {
        let assembler = BytecodeAssembler { verify: options.verify };
        Self { assembler, options }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Assembler> Compiler<A> {
    /// Create a compiler around another assembler.
    pub fn with_assembler(assembler: A, options: CompileOptions) -> Self {
        Self { assembler, options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Lower every function of `module` without assembling.
    pub fn lower_module(&self, module: &Module) -> Result<AssemblyUnit, CompileError> {
        let name = self.options.artifact_name.as_deref().unwrap_or(&module.name);
        if !is_valid_identifier(name) {
            return Err(CompileError::InvalidIdentifier { name: name.to_string() });
        }

        let mut functions = FunctionTable::new();
        for function in &module.functions {
            let reserved = [START_BLOCK, MAIN_BLOCK, INIT_BLOCK].contains(&function.name.as_str());
            if reserved || !functions.insert(&function.name, FunctionSig::of(function)) {
                return Err(CompileError::DuplicateFunction {
                    name: function.name.clone(),
                    loc: function.loc.clone(),
                });
            }
        }

        let mut unit = AssemblyUnit::new(name);
        for function in &module.functions {
            unit.push(FunctionLowerer::lower_function(&functions, function)?);
        }

        if let Some(entry) = &module.entry {
            unit.push(FunctionLowerer::lower_entry(&functions, entry)?);
            unit.push(input_initializer());
            unit.push(process_entry());
        }

        Ok(unit)
    }

    /// Compile `module` to verified artifact bytes.
    pub fn compile(&self, module: &Module) -> Result<Vec<u8>, CompileError> {
        let unit = self.lower_module(module)?;
        self.assembler
            .assemble(&unit)
            .map_err(|e| CompileError::InternalVerificationFailure { detail: e.to_string() })
    }

    /// Compile `module` and write the artifact to `sink`.
    ///
    /// Nothing is written unless compilation and verification succeed.
    pub fn compile_to_writer<W: Write>(&self, module: &Module, sink: &mut W) -> Result<(), CompileError> {
        let bytes = self.compile(module)?;
        sink.write_all(&bytes)
            .and_then(|_| sink.flush())
            .map_err(|e| CompileError::Io(e.to_string()))
    }
}

/// Compile with default options.
pub fn compile_module(module: &Module) -> Result<Vec<u8>, CompileError> {
    Compiler::new().compile(module)
}

/// `<clinit>`: opens the shared input scanner once, before any user code.
fn input_initializer() -> CodeBlock {
    let mut builder = BlockBuilder::new(INIT_BLOCK, Signature::void());
    builder.emit(Instr::InitInput);
    builder.emit(Instr::ReturnVoid);
    builder.finish()
}

/// `<start>`: runs the program body and exits with its result.
fn process_entry() -> CodeBlock {
    let mut builder = BlockBuilder::new(START_BLOCK, Signature::void());
    builder.emit(Instr::Call {
        name: MAIN_BLOCK.to_string(),
        signature: Signature::new(vec![], Some(ValueType::Int)),
    });
    builder.emit(Instr::Exit);
    builder.finish()
}

/// Artifact names follow the usual identifier rules: a letter, `_` or `$`,
/// then letters, digits, `_` or `$`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
