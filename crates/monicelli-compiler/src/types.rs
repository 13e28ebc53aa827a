//! Static typing of expressions.

use monicelli_ast::{Call, Expr, ExprKind, Function, Location, Type};
use monicelli_bytecode::{Signature, ValueType};
use rustc_hash::FxHashMap;

use crate::binder::Binder;
use crate::CompileError;

/// Position of a type in the promotion order; wider types rank higher.
fn rank(ty: Type) -> u8 {
    match ty {
        Type::Double => 4,
        Type::Float => 3,
        Type::Int => 2,
        Type::Char => 1,
        Type::Bool => 0,
        Type::Void => 0,
    }
}

/// Common type of two operands: the wider of the two.
///
/// `Void` absorbs everything so that misuse is reported where the operand is
/// consumed.
pub fn promote(lhs: Type, rhs: Type) -> Type {
    if lhs == Type::Void || rhs == Type::Void {
        return Type::Void;
    }
    if rank(lhs) >= rank(rhs) {
        lhs
    } else {
        rhs
    }
}

/// The stack representation of a value type; `None` for `Void`.
pub fn value_type(ty: Type) -> Option<ValueType> {
    match ty {
        Type::Int => Some(ValueType::Int),
        Type::Char => Some(ValueType::Char),
        Type::Float => Some(ValueType::Float),
        Type::Bool => Some(ValueType::Bool),
        Type::Double => Some(ValueType::Double),
        Type::Void => None,
    }
}

/// Like [`value_type`], reporting `Void` as misuse at `loc`.
pub(crate) fn stack_type(ty: Type, loc: &Location) -> Result<ValueType, CompileError> {
    value_type(ty).ok_or_else(|| CompileError::void_used(loc))
}

/// Whether a value of `from` may be converted to `to`.
///
/// Every pair of value types converts (numeric to `Bool` tests for non-zero,
/// `Bool` to numeric yields 0 or 1); only `Void` cannot take part.
pub fn check_cast(from: Type, to: Type, loc: &Location) -> Result<(), CompileError> {
    if from == Type::Void || to == Type::Void {
        return Err(CompileError::void_used(loc));
    }
    Ok(())
}

/// Signature of a user function as seen by callers.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub params: Vec<Type>,
    pub ret: Type,
    pub loc: Location,
}

impl FunctionSig {
    pub fn of(function: &Function) -> Self {
        Self {
            params: function.params.iter().map(|p| p.ty).collect(),
            ret: function.return_type,
            loc: function.loc.clone(),
        }
    }

    /// The block signature; parameters may not be `Void`.
    pub fn block_signature(&self) -> Result<Signature, CompileError> {
        let params = self
            .params
            .iter()
            .map(|&ty| stack_type(ty, &self.loc))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Signature::new(params, value_type(self.ret)))
    }
}

/// Every user function of a module, by name.
#[derive(Debug, Default)]
pub struct FunctionTable {
    sigs: FxHashMap<String, FunctionSig>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function; returns `false` if the name is already taken.
    pub fn insert(&mut self, name: &str, sig: FunctionSig) -> bool {
        if self.sigs.contains_key(name) {
            return false;
        }
        self.sigs.insert(name.to_string(), sig);
        true
    }

    pub fn get(&self, name: &str, loc: &Location) -> Result<&FunctionSig, CompileError> {
        self.sigs.get(name).ok_or_else(|| CompileError::UndefinedFunction {
            name: name.to_string(),
            loc: loc.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.sigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sigs.is_empty()
    }
}

/// Computes the static type of expressions in one function.
pub struct TypeResolver<'a> {
    functions: &'a FunctionTable,
    binder: &'a Binder,
}

impl<'a> TypeResolver<'a> {
    pub fn new(functions: &'a FunctionTable, binder: &'a Binder) -> Self {
        Self { functions, binder }
    }

    pub fn resolve(&self, expr: &Expr) -> Result<Type, CompileError> {
        match &expr.kind {
            ExprKind::Call(Call { name, .. }) => Ok(self.functions.get(name, &expr.loc)?.ret),
            ExprKind::Arith { lhs, rhs, .. } => Ok(promote(self.resolve(lhs)?, self.resolve(rhs)?)),
            ExprKind::Shift { lhs, .. } => self.resolve(lhs),
            ExprKind::Comparison { .. } => Ok(Type::Bool),
            ExprKind::Identifier { name } => Ok(self.binder.lookup(name, &expr.loc)?.ty),
            ExprKind::IntImmediate { .. } => Ok(Type::Int),
            ExprKind::FloatImmediate { .. } => Ok(Type::Double),
        }
    }
}
