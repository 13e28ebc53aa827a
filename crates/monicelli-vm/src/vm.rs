use std::io::{BufRead, BufWriter, Write};

use rustc_hash::FxHashMap;

use monicelli_bytecode::{
    verify_artifact, ArithOp, Artifact, ArtifactError, Constant, DecodeError, Op, ShiftKind, ValueType, VerifyError,
    INIT_BLOCK, START_BLOCK,
};

use crate::input::InputScanner;
use crate::value::Value;

/// VM execution errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("maximum call depth exceeded")]
    CallDepthExceeded,
    #[error("type error: expected {expected}, got {got}")]
    TypeError { expected: &'static str, got: String },
    #[error("arity mismatch: expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid bytecode: {0}")]
    Decode(#[from] DecodeError),
    #[error("constant #{0} cannot be used here")]
    BadConstant(u16),
    #[error("slot {0} is out of range")]
    BadSlot(u16),
    #[error("block not found: {0}")]
    UnknownBlock(String),
    #[error("artifact has no entry point")]
    NotExecutable,
    #[error("input read before it was opened")]
    InputNotInitialized,
    #[error("no more input")]
    InputExhausted,
    #[error("input mismatch: expected {expected}, found '{token}'")]
    InputMismatch { expected: ValueType, token: String },
    #[error("program exited with status {0}")]
    Exited(i32),
    #[error("cannot load artifact: {0}")]
    Load(#[from] ArtifactError),
    #[error("artifact failed verification: {0}")]
    Verify(#[from] VerifyError),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Io(e.to_string())
    }
}

/// Resource limits.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum operand stack size
    pub max_stack_size: usize,
    /// Maximum call depth
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack_size: 65536,
            max_call_depth: 1000,
        }
    }
}

/// The Monicelli virtual machine.
pub struct Vm {
    artifact: Artifact,
    config: VmConfig,
    /// Block name -> block index
    blocks: FxHashMap<String, usize>,
}

impl Vm {
    /// Create a VM for an artifact. The artifact is trusted as-is.
    pub fn new(artifact: Artifact) -> Self {
        Self::with_config(artifact, VmConfig::default())
    }

    pub fn with_config(artifact: Artifact, config: VmConfig) -> Self {
        let mut blocks = FxHashMap::default();
        for (i, block) in artifact.blocks.iter().enumerate() {
            blocks.entry(block.name.clone()).or_insert(i);
        }
        Self {
            artifact,
            config,
            blocks,
        }
    }

    /// Decode and verify artifact bytes.
    pub fn load(bytes: &[u8]) -> Result<Self, RuntimeError> {
        let artifact = Artifact::from_bytes(bytes)?;
        verify_artifact(&artifact)?;
        Ok(Self::new(artifact))
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// Run the program on the process's standard streams.
    pub fn run(&self) -> Result<i32, RuntimeError> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        self.run_with_io(stdin.lock(), BufWriter::new(stdout.lock()), stderr.lock())
    }

    /// Run `<clinit>` then `<start>`, returning the exit status.
    ///
    /// A program that finishes without `Exit` has status 0.
    pub fn run_with_io<R: BufRead, W: Write, E: Write>(
        &self,
        input: R,
        stdout: W,
        stderr: E,
    ) -> Result<i32, RuntimeError> {
        let start = *self.blocks.get(START_BLOCK).ok_or(RuntimeError::NotExecutable)?;
        let init = self.blocks.get(INIT_BLOCK).copied();
        let mut machine = Machine::new(&self.artifact, &self.config, input, stdout, stderr);

        let result = machine.run_program(init, start);
        let flushed = machine.flush();
        let status = result?;
        flushed?;
        Ok(status)
    }

    /// Invoke a single block with `args`, with empty input and no error stream.
    pub fn call<W: Write>(&self, name: &str, args: Vec<Value>, stdout: W) -> Result<Option<Value>, RuntimeError> {
        let index = *self
            .blocks
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownBlock(name.to_string()))?;
        let expected = self.artifact.blocks[index].signature.params.len();
        if args.len() != expected {
            return Err(RuntimeError::ArityMismatch {
                expected,
                got: args.len(),
            });
        }

        let mut machine = Machine::new(&self.artifact, &self.config, std::io::empty(), stdout, std::io::sink());
        let result = machine.invoke(index, args);
        machine.flush()?;
        match result? {
            Completion::Returned(value) => Ok(value),
            Completion::Exited(status) => Err(RuntimeError::Exited(status)),
        }
    }
}

// ---
// Execution
// ---

/// A call frame for block invocation.
struct CallFrame {
    /// Index of the executing block
    block: usize,
    /// Instruction pointer within the block's chunk
    ip: usize,
    /// First local slot of this frame
    locals_base: usize,
    /// Operand stack height on entry
    stack_base: usize,
}

enum Completion {
    Returned(Option<Value>),
    Exited(i32),
}

struct Machine<'a, R, W, E> {
    artifact: &'a Artifact,
    config: &'a VmConfig,
    stack: Vec<Value>,
    locals: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Standard input, until `InitInput` wraps it in a scanner
    reader: Option<R>,
    input: Option<InputScanner<R>>,
    stdout: W,
    stderr: E,
}

impl<'a, R: BufRead, W: Write, E: Write> Machine<'a, R, W, E> {
    fn new(artifact: &'a Artifact, config: &'a VmConfig, input: R, stdout: W, stderr: E) -> Self {
        Self {
            artifact,
            config,
            stack: Vec::with_capacity(256),
            locals: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            reader: Some(input),
            input: None,
            stdout,
            stderr,
        }
    }

    fn run_program(&mut self, init: Option<usize>, start: usize) -> Result<i32, RuntimeError> {
        if let Some(init) = init {
            if let Completion::Exited(status) = self.invoke(init, Vec::new())? {
                return Ok(status);
            }
        }
        match self.invoke(start, Vec::new())? {
            Completion::Exited(status) => Ok(status),
            Completion::Returned(_) => Ok(0),
        }
    }

    fn flush(&mut self) -> Result<(), RuntimeError> {
        self.stdout.flush()?;
        self.stderr.flush()?;
        Ok(())
    }

    fn invoke(&mut self, block: usize, args: Vec<Value>) -> Result<Completion, RuntimeError> {
        let base = self.frames.len();
        for arg in args {
            self.push(arg)?;
        }
        self.enter(block)?;
        self.execute(base)
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.config.max_stack_size {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        let floor = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() <= floor {
            return Err(RuntimeError::StackUnderflow);
        }
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn pop_typed(&mut self, ty: ValueType) -> Result<Value, RuntimeError> {
        let value = self.pop()?;
        if value.value_type() != ty {
            return Err(RuntimeError::TypeError {
                expected: ty.name(),
                got: value.type_name().to_string(),
            });
        }
        Ok(value)
    }

    fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        match self.pop_typed(ValueType::Int)? {
            Value::Int(n) => Ok(n),
            _ => Err(RuntimeError::InternalError("Int expected".to_string())),
        }
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        match self.pop_typed(ValueType::Bool)? {
            Value::Bool(b) => Ok(b),
            _ => Err(RuntimeError::InternalError("Bool expected".to_string())),
        }
    }

    /// Push a frame for `index`, moving its arguments from the stack into
    /// the first slots and zeroing the rest.
    fn enter(&mut self, index: usize) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded);
        }
        let block = self
            .artifact
            .blocks
            .get(index)
            .ok_or_else(|| RuntimeError::UnknownBlock(format!("#{}", index)))?;

        let argc = block.signature.params.len();
        let floor = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() < floor + argc {
            return Err(RuntimeError::StackUnderflow);
        }

        let locals_base = self.locals.len();
        let args = self.stack.split_off(self.stack.len() - argc);
        self.locals.extend(args);
        self.locals.extend(block.slots.iter().skip(argc).map(|&ty| Value::zero(ty)));

        self.frames.push(CallFrame {
            block: index,
            ip: 0,
            locals_base,
            stack_base: self.stack.len(),
        });
        Ok(())
    }

    fn leave(&mut self) -> Result<(), RuntimeError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::InternalError("no frame to return from".to_string()))?;
        self.locals.truncate(frame.locals_base);
        self.stack.truncate(frame.stack_base);
        Ok(())
    }

    fn slot_index(&self, slot: u16) -> Result<usize, RuntimeError> {
        let frame = self
            .frames
            .last()
            .ok_or_else(|| RuntimeError::InternalError("no active frame".to_string()))?;
        let index = frame.locals_base + slot as usize;
        let count = self.artifact.blocks[frame.block].slots.len();
        if slot as usize >= count || index >= self.locals.len() {
            return Err(RuntimeError::BadSlot(slot));
        }
        Ok(index)
    }

    /// Run until the frame at depth `base` returns or the program exits.
    fn execute(&mut self, base: usize) -> Result<Completion, RuntimeError> {
        let artifact = self.artifact;

        loop {
            let frame = self
                .frames
                .last_mut()
                .ok_or_else(|| RuntimeError::InternalError("no active frame".to_string()))?;
            let chunk = &artifact.blocks[frame.block].chunk;
            let (op, next) = chunk.decode(frame.ip)?;
            frame.ip = next;

            match op {
                Op::Const(idx) => {
                    let value = chunk
                        .constants
                        .get(idx as usize)
                        .and_then(Value::from_constant)
                        .ok_or(RuntimeError::BadConstant(idx))?;
                    self.push(value)?;
                }
                Op::Pop(ty) => {
                    self.pop_typed(ty)?;
                }
                Op::Load(ty, slot) => {
                    let value = self.locals[self.slot_index(slot)?];
                    if value.value_type() != ty {
                        return Err(RuntimeError::TypeError {
                            expected: ty.name(),
                            got: value.type_name().to_string(),
                        });
                    }
                    self.push(value)?;
                }
                Op::Store(ty, slot) => {
                    let value = self.pop_typed(ty)?;
                    let index = self.slot_index(slot)?;
                    self.locals[index] = value;
                }
                Op::Arith(op, ty) => {
                    let b = self.pop_typed(ty)?;
                    let a = self.pop_typed(ty)?;
                    self.push(arith(op, a, b)?)?;
                }
                Op::Cast(from, to) => {
                    let value = self.pop_typed(from)?;
                    self.push(value.cast(to))?;
                }
                Op::Shift(kind) => {
                    let amount = self.pop_int()?;
                    let value = self.pop_int()?;
                    let shifted = match kind {
                        ShiftKind::Shl => value.wrapping_shl((amount & 63) as u32),
                        ShiftKind::Ushr => ((value as u64) >> (amount & 63)) as i64,
                    };
                    self.push(Value::Int(shifted))?;
                }
                Op::Compare(ty) => {
                    let b = self.pop_typed(ty)?;
                    let a = self.pop_typed(ty)?;
                    let ordering = a.compare(&b).ok_or_else(|| RuntimeError::TypeError {
                        expected: a.type_name(),
                        got: b.type_name().to_string(),
                    })?;
                    self.push(Value::Int(ordering as i64))?;
                }
                Op::Jump(target) => self.jump(target)?,
                Op::JumpIf(relation, target) => {
                    if relation.holds(self.pop_int()?) {
                        self.jump(target)?;
                    }
                }
                Op::JumpIfTrue(target) => {
                    if self.pop_bool()? {
                        self.jump(target)?;
                    }
                }
                Op::Call(idx) => self.enter(idx as usize)?,
                Op::Return(ty) => {
                    let value = self.pop_typed(ty)?;
                    self.leave()?;
                    if self.frames.len() == base {
                        return Ok(Completion::Returned(Some(value)));
                    }
                    self.push(value)?;
                }
                Op::ReturnVoid => {
                    self.leave()?;
                    if self.frames.len() == base {
                        return Ok(Completion::Returned(None));
                    }
                }
                Op::InitInput => {
                    if let Some(reader) = self.reader.take() {
                        self.input = Some(InputScanner::new(reader));
                    }
                }
                Op::Read(ty) => {
                    let scanner = self.input.as_mut().ok_or(RuntimeError::InputNotInitialized)?;
                    let value = scanner.read(ty)?;
                    self.push(value)?;
                }
                Op::Print(ty) => {
                    let value = self.pop_typed(ty)?;
                    writeln!(self.stdout, "{}", value)?;
                }
                Op::PrintError(idx) => match chunk.constants.get(idx as usize) {
                    Some(Constant::Str(message)) => {
                        self.stdout.flush()?;
                        writeln!(self.stderr, "{}", message)?;
                    }
                    _ => return Err(RuntimeError::BadConstant(idx)),
                },
                Op::Exit => {
                    let status = self.pop_int()?;
                    return Ok(Completion::Exited(status as i32));
                }
            }
        }
    }

    fn jump(&mut self, target: u16) -> Result<(), RuntimeError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| RuntimeError::InternalError("no active frame".to_string()))?;
        frame.ip = target as usize;
        Ok(())
    }
}

fn arith(op: ArithOp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let value = match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(match op {
            ArithOp::Add => x.wrapping_add(y),
            ArithOp::Sub => x.wrapping_sub(y),
            ArithOp::Mul => x.wrapping_mul(y),
            ArithOp::Div => {
                if y == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                x.wrapping_div(y)
            }
        }),
        (Value::Char(x), Value::Char(y)) => Value::Char(match op {
            ArithOp::Add => x.wrapping_add(y),
            ArithOp::Sub => x.wrapping_sub(y),
            ArithOp::Mul => x.wrapping_mul(y),
            ArithOp::Div => {
                if y == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                x / y
            }
        }),
        (Value::Float(x), Value::Float(y)) => Value::Float(match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
        }),
        (Value::Double(x), Value::Double(y)) => Value::Double(match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
        }),
        (a, _) => {
            return Err(RuntimeError::TypeError {
                expected: "numeric",
                got: a.type_name().to_string(),
            })
        }
    };
    Ok(value)
}
