use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Location;

// ---
// Module
// ---

/// A complete Monicelli compilation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Name of the produced artifact
    #[serde(default = "default_module_name")]
    pub name: String,
    /// User functions in declaration order
    #[serde(default)]
    pub functions: Vec<Function>,
    /// The program body, if this unit is runnable
    #[serde(default)]
    pub entry: Option<EntryPoint>,
}

fn default_module_name() -> String {
    "Main".to_string()
}

/// The main program body.
///
/// It behaves as a function with no parameters returning `Int`; the value it
/// returns becomes the process exit status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub loc: Location,
}

// ---
// Functions
// ---

/// A user function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub return_type: Type,
    #[serde(default)]
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub loc: Location,
}

/// A typed function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

/// Monicelli primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    /// 64-bit signed integer
    Int,
    /// 16-bit character code unit
    Char,
    /// 32-bit float
    Float,
    Bool,
    /// 64-bit float
    Double,
    /// No value; only valid as a return type
    Void,
}

impl Type {
    pub fn name(self) -> &'static str {
        match self {
            Type::Int => "Int",
            Type::Char => "Char",
            Type::Float => "Float",
            Type::Bool => "Bool",
            Type::Double => "Double",
            Type::Void => "Void",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---
// Statements
// ---

/// A statement with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    #[serde(flatten)]
    pub kind: StmtKind,
    #[serde(default)]
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StmtKind {
    /// Read a value from standard input into a variable
    Read { target: String },
    /// Print a value followed by a newline
    Print { value: Expr },
    /// Declare a new variable, optionally initialized
    VariableDecl {
        name: String,
        #[serde(rename = "type")]
        ty: Type,
        #[serde(default)]
        init: Option<Expr>,
    },
    Assign { name: String, value: Expr },
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    /// A call whose result is discarded
    Call(Call),
    Assert { condition: Expr },
    Abort,
    /// Do-while loop: the body runs at least once
    Loop { body: Vec<Stmt>, condition: Expr },
    /// Multi-way conditional over a target variable
    Branch {
        target: String,
        paths: Vec<BranchPath>,
        #[serde(default)]
        default: Option<Vec<Stmt>>,
    },
}

/// One arm of a `Branch` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchPath {
    pub condition: BranchCondition,
    pub body: Vec<Stmt>,
}

/// How a branch arm tests the branch target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BranchCondition {
    /// `target <op> value`
    Compare { op: CompareOp, value: Expr },
    /// Bare value, meaning `target == value`
    Value { value: Expr },
}

// ---
// Expressions
// ---

/// An expression with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(flatten)]
    pub kind: ExprKind,
    #[serde(default)]
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExprKind {
    Call(Call),
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Shift {
        direction: ShiftDirection,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Comparison {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Identifier { name: String },
    IntImmediate { value: i64 },
    FloatImmediate { value: f64 },
}

/// A function call, used both as a statement and as an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Mult,
    Div,
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftDirection {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
}
