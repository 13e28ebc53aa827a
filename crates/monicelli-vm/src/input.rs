//! Whitespace-delimited token reader behind the `Read` instruction.

use std::collections::VecDeque;
use std::io::BufRead;

use monicelli_bytecode::ValueType;

use crate::value::Value;
use crate::RuntimeError;

/// Reads typed values from a line-oriented input, one token at a time.
pub struct InputScanner<R> {
    reader: R,
    pending: VecDeque<String>,
}

impl<R: BufRead> InputScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
        }
    }

    /// The next whitespace-delimited token, or `None` at end of input.
    pub fn next_token(&mut self) -> Result<Option<String>, RuntimeError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| RuntimeError::Io(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            self.pending.extend(line.split_whitespace().map(String::from));
        }
    }

    /// Read and parse one value of type `ty`.
    pub fn read(&mut self, ty: ValueType) -> Result<Value, RuntimeError> {
        let token = self.next_token()?.ok_or(RuntimeError::InputExhausted)?;
        parse_token(&token, ty).ok_or(RuntimeError::InputMismatch { expected: ty, token })
    }
}

fn parse_token(token: &str, ty: ValueType) -> Option<Value> {
    match ty {
        ValueType::Int => token.parse().ok().map(Value::Int),
        ValueType::Float => token.parse().ok().map(Value::Float),
        ValueType::Double => token.parse().ok().map(Value::Double),
        ValueType::Char => token.encode_utf16().next().map(Value::Char),
        ValueType::Bool => {
            if token.eq_ignore_ascii_case("true") {
                Some(Value::Bool(true))
            } else if token.eq_ignore_ascii_case("false") {
                Some(Value::Bool(false))
            } else {
                None
            }
        }
    }
}
