//! Shorthand constructors for building trees by hand.
//!
//! Every node starts at [`Location::unknown`]; chain `.at(..)` to place it.

use crate::{
    ArithOp, BranchCondition, BranchPath, Call, CompareOp, EntryPoint, Expr, ExprKind, Function, Location,
    Module, Param, ShiftDirection, Stmt, StmtKind, Type,
};

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            entry: None,
        }
    }

    pub fn with_function(mut self, function: Function) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_entry(mut self, body: Vec<Stmt>) -> Self {
        self.entry = Some(EntryPoint {
            body,
            loc: Location::unknown(),
        });
        self
    }

    /// Look up a user function by name; the first declaration wins.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

impl Function {
    pub fn new(name: impl Into<String>, return_type: Type, params: Vec<Param>, body: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            return_type,
            params,
            body,
            loc: Location::unknown(),
        }
    }

    pub fn at(mut self, loc: Location) -> Self {
        self.loc = loc;
        self
    }
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            loc: Location::unknown(),
        }
    }

    pub fn at(mut self, loc: Location) -> Self {
        self.loc = loc;
        self
    }

    pub fn read(target: impl Into<String>) -> Self {
        Self::new(StmtKind::Read { target: target.into() })
    }

    pub fn print(value: Expr) -> Self {
        Self::new(StmtKind::Print { value })
    }

    pub fn declare(name: impl Into<String>, ty: Type, init: Option<Expr>) -> Self {
        Self::new(StmtKind::VariableDecl {
            name: name.into(),
            ty,
            init,
        })
    }

    pub fn assign(name: impl Into<String>, value: Expr) -> Self {
        Self::new(StmtKind::Assign {
            name: name.into(),
            value,
        })
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Self::new(StmtKind::Return { value })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(StmtKind::Call(Call {
            name: name.into(),
            args,
        }))
    }

    pub fn assert(condition: Expr) -> Self {
        Self::new(StmtKind::Assert { condition })
    }

    pub fn abort() -> Self {
        Self::new(StmtKind::Abort)
    }

    pub fn do_while(body: Vec<Stmt>, condition: Expr) -> Self {
        Self::new(StmtKind::Loop { body, condition })
    }

    pub fn branch(target: impl Into<String>, paths: Vec<BranchPath>, default: Option<Vec<Stmt>>) -> Self {
        Self::new(StmtKind::Branch {
            target: target.into(),
            paths,
            default,
        })
    }
}

impl BranchPath {
    /// An arm taken when `target <op> value` holds.
    pub fn compare(op: CompareOp, value: Expr, body: Vec<Stmt>) -> Self {
        Self {
            condition: BranchCondition::Compare { op, value },
            body,
        }
    }

    /// An arm taken when the target equals `value`.
    pub fn equals(value: Expr, body: Vec<Stmt>) -> Self {
        Self {
            condition: BranchCondition::Value { value },
            body,
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            loc: Location::unknown(),
        }
    }

    pub fn at(mut self, loc: Location) -> Self {
        self.loc = loc;
        self
    }

    pub fn int(value: i64) -> Self {
        Self::new(ExprKind::IntImmediate { value })
    }

    pub fn float(value: f64) -> Self {
        Self::new(ExprKind::FloatImmediate { value })
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Identifier { name: name.into() })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call(Call {
            name: name.into(),
            args,
        }))
    }

    pub fn arith(op: ArithOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Arith {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn plus(lhs: Expr, rhs: Expr) -> Self {
        Self::arith(ArithOp::Plus, lhs, rhs)
    }

    pub fn minus(lhs: Expr, rhs: Expr) -> Self {
        Self::arith(ArithOp::Minus, lhs, rhs)
    }

    pub fn mult(lhs: Expr, rhs: Expr) -> Self {
        Self::arith(ArithOp::Mult, lhs, rhs)
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        Self::arith(ArithOp::Div, lhs, rhs)
    }

    pub fn shift(direction: ShiftDirection, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Shift {
            direction,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn compare(op: CompareOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Comparison {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }
}
