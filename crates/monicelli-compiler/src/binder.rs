//! Per-function variable slots.
//!
//! Scoping is flat: a name declared anywhere in a function, including inside
//! loop or branch bodies, stays visible until the end of the function. Slots
//! are never reused.

use monicelli_ast::{Location, Param, Type};
use rustc_hash::FxHashMap;

use crate::CompileError;

/// A named local slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub name: String,
    pub ty: Type,
    pub index: u16,
    pub is_param: bool,
}

/// Slot table of one function.
#[derive(Debug, Default)]
pub struct Binder {
    slots: Vec<Slot>,
    by_name: FxHashMap<String, usize>,
}

impl Binder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with the parameters in slots `0..n`.
    pub fn with_params(params: &[Param], loc: &Location) -> Result<Self, CompileError> {
        let mut binder = Self::new();
        for param in params {
            binder.bind(&param.name, param.ty, true, loc)?;
        }
        Ok(binder)
    }

    /// Declare a local variable in the next free slot.
    pub fn declare(&mut self, name: &str, ty: Type, loc: &Location) -> Result<&Slot, CompileError> {
        self.bind(name, ty, false, loc)
    }

    fn bind(&mut self, name: &str, ty: Type, is_param: bool, loc: &Location) -> Result<&Slot, CompileError> {
        if ty == Type::Void {
            return Err(CompileError::void_used(loc));
        }
        if self.by_name.contains_key(name) {
            return Err(CompileError::Redeclaration {
                name: name.to_string(),
                loc: loc.clone(),
            });
        }
        let index = u16::try_from(self.slots.len()).map_err(|_| CompileError::InternalVerificationFailure {
            detail: "too many local variables in one function".to_string(),
        })?;

        self.by_name.insert(name.to_string(), self.slots.len());
        self.slots.push(Slot {
            name: name.to_string(),
            ty,
            index,
            is_param,
        });
        Ok(&self.slots[index as usize])
    }

    pub fn lookup(&self, name: &str, loc: &Location) -> Result<&Slot, CompileError> {
        self.by_name
            .get(name)
            .map(|&i| &self.slots[i])
            .ok_or_else(|| CompileError::UndefinedVariable {
                name: name.to_string(),
                loc: loc.clone(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
