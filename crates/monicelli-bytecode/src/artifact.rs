//! The loadable artifact and its binary form.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "MCBC" | version u16 | name | block count u16 | blocks...
//! block: name | param count u8 | param types | return type u8 (0 = void)
//!        | slot count u16 | slot types | constant count u16 | constants
//!        | code length u32 | code | line count u32 | (offset u32, line u32)...
//! name:  length u16 | utf-8 bytes
//! ```

use crate::{Chunk, Constant, Signature, ValueType};

pub const MAGIC: &[u8; 4] = b"MCBC";
pub const VERSION: u16 = 1;

/// Process entry wrapper: calls the main block and exits with its result.
pub const START_BLOCK: &str = "<start>";
/// The program body.
pub const MAIN_BLOCK: &str = "<main>";
/// One-time initializer of the shared input scanner.
pub const INIT_BLOCK: &str = "<clinit>";

const CONST_INT: u8 = 1;
const CONST_CHAR: u8 = 2;
const CONST_FLOAT: u8 = 3;
const CONST_BOOL: u8 = 4;
const CONST_DOUBLE: u8 = 5;
const CONST_STR: u8 = 6;

/// Errors reading an artifact.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArtifactError {
    #[error("not a Monicelli artifact (bad magic)")]
    BadMagic,
    #[error("unsupported artifact version {0}")]
    UnsupportedVersion(u16),
    #[error("unexpected end of artifact at byte {0}")]
    UnexpectedEof(usize),
    #[error("invalid type tag {0}")]
    InvalidType(u8),
    #[error("invalid constant tag {0}")]
    InvalidConstant(u8),
    #[error("invalid utf-8 in name")]
    InvalidUtf8,
    #[error("{0} trailing bytes after artifact")]
    TrailingBytes(usize),
}

/// One encoded code block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub signature: Signature,
    pub slots: Vec<ValueType>,
    pub chunk: Chunk,
}

/// A complete program: named blocks referencing each other by index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Artifact {
    pub name: String,
    pub blocks: Vec<Block>,
}

impl Artifact {
    /// Find a block by name.
    pub fn block_index(&self, name: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.name == name)
    }

    /// Whether the artifact can be run as a program.
    pub fn is_executable(&self) -> bool {
        self.block_index(START_BLOCK).is_some()
    }

    /// Disassemble every block.
    pub fn disassemble(&self) -> String {
        let names: Vec<&str> = self.blocks.iter().map(|b| b.name.as_str()).collect();
        let mut output = format!("artifact {}\n", self.name);
        for block in &self.blocks {
            output.push('\n');
            output.push_str(&format!("; {} slots={:?}\n", block.signature, block.slots));
            output.push_str(&block.chunk.disassemble(&block.name, &names));
        }
        output
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.bytes.extend_from_slice(MAGIC);
        w.u16(VERSION);
        w.name(&self.name);
        w.u16(self.blocks.len() as u16);

        for block in &self.blocks {
            w.name(&block.name);
            w.u8(block.signature.params.len() as u8);
            for &ty in &block.signature.params {
                w.u8(ty as u8);
            }
            w.u8(block.signature.ret.map_or(0, |ty| ty as u8));
            w.u16(block.slots.len() as u16);
            for &ty in &block.slots {
                w.u8(ty as u8);
            }

            w.u16(block.chunk.constants.len() as u16);
            for constant in &block.chunk.constants {
                w.constant(constant);
            }

            w.u32(block.chunk.code.len() as u32);
            w.bytes.extend_from_slice(&block.chunk.code);
            w.u32(block.chunk.lines.len() as u32);
            for &(offset, line) in &block.chunk.lines {
                w.u32(offset);
                w.u32(line);
            }
        }

        w.bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Artifact, ArtifactError> {
        let mut r = Reader { bytes, pos: 0 };
        if r.take(4).map_err(|_| ArtifactError::BadMagic)? != MAGIC {
            return Err(ArtifactError::BadMagic);
        }
        let version = r.u16()?;
        if version != VERSION {
            return Err(ArtifactError::UnsupportedVersion(version));
        }

        let name = r.name()?;
        let block_count = r.u16()?;
        let mut blocks = Vec::with_capacity(block_count as usize);

        for _ in 0..block_count {
            let name = r.name()?;
            let param_count = r.u8()?;
            let params = (0..param_count).map(|_| r.value_type()).collect::<Result<Vec<_>, _>>()?;
            let ret = match r.u8()? {
                0 => None,
                byte => Some(ValueType::try_from(byte).map_err(ArtifactError::InvalidType)?),
            };
            let slot_count = r.u16()?;
            let slots = (0..slot_count).map(|_| r.value_type()).collect::<Result<Vec<_>, _>>()?;

            let const_count = r.u16()?;
            let constants = (0..const_count).map(|_| r.constant()).collect::<Result<Vec<_>, _>>()?;

            let code_len = r.u32()? as usize;
            let code = r.take(code_len)?.to_vec();
            let line_count = r.u32()?;
            let mut lines = Vec::new();
            for _ in 0..line_count {
                lines.push((r.u32()?, r.u32()?));
            }

            blocks.push(Block {
                name,
                signature: Signature::new(params, ret),
                slots,
                chunk: Chunk { code, constants, lines },
            });
        }

        if r.pos != bytes.len() {
            return Err(ArtifactError::TrailingBytes(bytes.len() - r.pos));
        }

        Ok(Artifact { name, blocks })
    }
}

#[derive(Default)]
struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn name(&mut self, s: &str) {
        self.u16(s.len() as u16);
        self.bytes.extend_from_slice(s.as_bytes());
    }

    fn constant(&mut self, constant: &Constant) {
        match constant {
            Constant::Int(n) => {
                self.u8(CONST_INT);
                self.bytes.extend_from_slice(&n.to_le_bytes());
            }
            Constant::Char(c) => {
                self.u8(CONST_CHAR);
                self.u16(*c);
            }
            Constant::Float(x) => {
                self.u8(CONST_FLOAT);
                self.u32(x.to_bits());
            }
            Constant::Bool(b) => {
                self.u8(CONST_BOOL);
                self.u8(*b as u8);
            }
            Constant::Double(x) => {
                self.u8(CONST_DOUBLE);
                self.bytes.extend_from_slice(&x.to_bits().to_le_bytes());
            }
            Constant::Str(s) => {
                self.u8(CONST_STR);
                self.name(s);
            }
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ArtifactError> {
        let end = self.pos.checked_add(n).ok_or(ArtifactError::UnexpectedEof(self.pos))?;
        let slice = self.bytes.get(self.pos..end).ok_or(ArtifactError::UnexpectedEof(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ArtifactError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ArtifactError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ArtifactError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ArtifactError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, ArtifactError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn name(&mut self) -> Result<String, ArtifactError> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ArtifactError::InvalidUtf8)
    }

    fn value_type(&mut self) -> Result<ValueType, ArtifactError> {
        ValueType::try_from(self.u8()?).map_err(ArtifactError::InvalidType)
    }

    fn constant(&mut self) -> Result<Constant, ArtifactError> {
        match self.u8()? {
            CONST_INT => Ok(Constant::Int(self.u64()? as i64)),
            CONST_CHAR => Ok(Constant::Char(self.u16()?)),
            CONST_FLOAT => Ok(Constant::Float(f32::from_bits(self.u32()?))),
            CONST_BOOL => Ok(Constant::Bool(self.u8()? != 0)),
            CONST_DOUBLE => Ok(Constant::Double(f64::from_bits(self.u64()?))),
            CONST_STR => Ok(Constant::Str(self.name()?)),
            tag => Err(ArtifactError::InvalidConstant(tag)),
        }
    }
}
