//! Lowering of function bodies to abstract instructions.

use monicelli_ast::{
    ArithOp, BranchCondition, BranchPath, Call, CompareOp, EntryPoint, Expr, ExprKind, Function, Location, Param,
    ShiftDirection, Stmt, StmtKind, Type,
};
use monicelli_bytecode::{self as bc, BlockBuilder, CodeBlock, Constant, Instr, Relation, ShiftKind, Signature};

use crate::binder::{Binder, Slot};
use crate::types::{check_cast, promote, stack_type, value_type, FunctionTable, TypeResolver};
use crate::CompileError;

/// Lowers one function into a code block.
pub struct FunctionLowerer<'a> {
    functions: &'a FunctionTable,
    binder: Binder,
    builder: BlockBuilder,
    return_type: Type,
}

impl<'a> FunctionLowerer<'a> {
    pub fn new(
        functions: &'a FunctionTable,
        name: &str,
        params: &[Param],
        return_type: Type,
        loc: &Location,
    ) -> Result<Self, CompileError> {
        let binder = Binder::with_params(params, loc)?;
        let param_types = params
            .iter()
            .map(|p| stack_type(p.ty, loc))
            .collect::<Result<Vec<_>, _>>()?;
        let builder = BlockBuilder::new(name, Signature::new(param_types, value_type(return_type)));

        Ok(Self {
            functions,
            binder,
            builder,
            return_type,
        })
    }

    /// Lower a user function.
    pub fn lower_function(functions: &'a FunctionTable, function: &Function) -> Result<CodeBlock, CompileError> {
        let mut lowerer = Self::new(
            functions,
            &function.name,
            &function.params,
            function.return_type,
            &function.loc,
        )?;
        lowerer.builder.set_line(function.loc.line);
        lowerer.lower_body(&function.body)?;
        Ok(lowerer.finish())
    }

    /// Lower the program body as `<main>() -> Int`.
    pub fn lower_entry(functions: &'a FunctionTable, entry: &EntryPoint) -> Result<CodeBlock, CompileError> {
        let mut lowerer = Self::new(functions, bc::MAIN_BLOCK, &[], Type::Int, &entry.loc)?;
        lowerer.builder.set_line(entry.loc.line);
        lowerer.lower_body(&entry.body)?;
        Ok(lowerer.finish())
    }

    /// Close the block with a return of the zero value, for bodies that run off the end.
    pub fn finish(mut self) -> CodeBlock {
        match value_type(self.return_type) {
            Some(ty) => {
                self.builder.emit(Instr::Push(ty.zero()));
                self.builder.emit(Instr::Return(ty));
            }
            None => self.builder.emit(Instr::ReturnVoid),
        }
        self.builder.finish()
    }

    fn resolve(&self, expr: &Expr) -> Result<Type, CompileError> {
        TypeResolver::new(self.functions, &self.binder).resolve(expr)
    }

    fn lookup(&self, name: &str, loc: &Location) -> Result<Slot, CompileError> {
        self.binder.lookup(name, loc).cloned()
    }

    // ---
    // Statements
    // ---

    pub fn lower_body(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        let loc = &stmt.loc;
        self.builder.set_line(loc.line);

        match &stmt.kind {
            StmtKind::Read { target } => {
                let slot = self.lookup(target, loc)?;
                let ty = stack_type(slot.ty, loc)?;
                self.builder.emit(Instr::Read(ty));
                self.builder.emit(Instr::Store { ty, slot: slot.index });
            }
            StmtKind::Print { value } => {
                let ty = stack_type(self.resolve(value)?, &value.loc)?;
                self.emit_expr(value)?;
                self.builder.emit(Instr::Print(ty));
            }
            StmtKind::VariableDecl { name, ty, init } => {
                if self.binder.contains(name) {
                    return Err(CompileError::Redeclaration {
                        name: name.clone(),
                        loc: loc.clone(),
                    });
                }
                let vt = stack_type(*ty, loc)?;
                match init {
                    Some(init) => self.emit_expr_as(init, *ty)?,
                    None => self.builder.emit(Instr::Push(vt.zero())),
                }
                let index = self.binder.declare(name, *ty, loc)?.index;
                let slot = self.builder.declare_slot(vt);
                debug_assert_eq!(index, slot);
                self.builder.emit(Instr::Store { ty: vt, slot });
            }
            StmtKind::Assign { name, value } => {
                let slot = self.lookup(name, loc)?;
                let ty = stack_type(slot.ty, loc)?;
                self.emit_expr_as(value, slot.ty)?;
                self.builder.emit(Instr::Store { ty, slot: slot.index });
            }
            StmtKind::Return { value } => self.lower_return(value.as_ref(), loc)?,
            StmtKind::Call(call) => {
                let ret = self.emit_call(call, loc)?;
                if let Some(ty) = value_type(ret) {
                    self.builder.emit(Instr::Pop(ty));
                }
            }
            StmtKind::Assert { condition } => {
                let ok = self.builder.new_label();
                self.emit_expr_as(condition, Type::Bool)?;
                self.builder.emit(Instr::JumpIfTrue(ok));
                self.emit_fatal(format!("Assertion failed at {}", loc));
                self.builder.mark(ok);
            }
            StmtKind::Abort => self.emit_fatal(format!("Program aborted at {}", loc)),
            StmtKind::Loop { body, condition } => {
                let start = self.builder.new_label();
                self.builder.mark(start);
                self.lower_body(body)?;
                self.builder.set_line(loc.line);
                self.emit_expr_as(condition, Type::Bool)?;
                self.builder.emit(Instr::JumpIfTrue(start));
            }
            StmtKind::Branch { target, paths, default } => {
                self.lower_branch(target, paths, default.as_deref(), loc)?;
            }
        }

        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Expr>, loc: &Location) -> Result<(), CompileError> {
        match (value_type(self.return_type), value) {
            (Some(ty), Some(value)) => {
                self.emit_expr_as(value, self.return_type)?;
                self.builder.emit(Instr::Return(ty));
            }
            (Some(ty), None) => {
                self.builder.emit(Instr::Push(ty.zero()));
                self.builder.emit(Instr::Return(ty));
            }
            (None, Some(value)) => {
                // Evaluated for its effects only
                let ty = self.emit_expr(value)?;
                if let Some(ty) = value_type(ty) {
                    self.builder.emit(Instr::Pop(ty));
                }
                self.builder.set_line(loc.line);
                self.builder.emit(Instr::ReturnVoid);
            }
            (None, None) => self.builder.emit(Instr::ReturnVoid),
        }
        Ok(())
    }

    /// Test each arm in order, jump to the first that holds, else run the default.
    ///
    /// Layout: all tests, a jump to the default (or the end), the arm bodies,
    /// then the default body.
    fn lower_branch(
        &mut self,
        target: &str,
        paths: &[BranchPath],
        default: Option<&[Stmt]>,
        loc: &Location,
    ) -> Result<(), CompileError> {
        let slot = self.lookup(target, loc)?;
        let end = self.builder.new_label();
        let mut arms = Vec::with_capacity(paths.len());

        for path in paths {
            let (op, value) = match &path.condition {
                BranchCondition::Compare { op, value } => (*op, value),
                BranchCondition::Value { value } => (CompareOp::Eq, value),
            };
            let common = promote(slot.ty, self.resolve(value)?);
            let ty = stack_type(common, &value.loc)?;

            self.builder.emit(Instr::Load {
                ty: stack_type(slot.ty, loc)?,
                slot: slot.index,
            });
            self.emit_cast(slot.ty, common, loc)?;
            self.emit_expr_as(value, common)?;
            self.builder.emit(Instr::Compare(ty));

            let arm = self.builder.new_label();
            self.builder.emit(Instr::JumpIf {
                relation: relation(op),
                target: arm,
            });
            arms.push(arm);
        }

        let otherwise = match default {
            Some(_) => self.builder.new_label(),
            None => end,
        };
        self.builder.emit(Instr::Jump(otherwise));

        // Bodies follow source order so declarations bind in that order.
        for (path, arm) in paths.iter().zip(arms) {
            self.builder.mark(arm);
            self.lower_body(&path.body)?;
            self.builder.emit(Instr::Jump(end));
        }

        if let Some(default) = default {
            self.builder.mark(otherwise);
            self.lower_body(default)?;
        }

        self.builder.mark(end);
        Ok(())
    }

    fn emit_fatal(&mut self, message: String) {
        self.builder.emit(Instr::PrintError(message));
        self.builder.emit(Instr::Push(Constant::Int(-1)));
        self.builder.emit(Instr::Exit);
    }

    // ---
    // Expressions
    // ---

    /// Emit `expr`, leaving its value (if any) on the stack.
    fn emit_expr(&mut self, expr: &Expr) -> Result<Type, CompileError> {
        let loc = &expr.loc;
        match &expr.kind {
            ExprKind::Call(call) => self.emit_call(call, loc),
            ExprKind::Arith { op, lhs, rhs } => {
                let ty = promote(self.resolve(lhs)?, self.resolve(rhs)?);
                let vt = stack_type(ty, loc)?;
                if ty == Type::Bool {
                    return Err(CompileError::type_mismatch("arithmetic on Bool operands", loc));
                }
                self.emit_expr_as(lhs, ty)?;
                self.emit_expr_as(rhs, ty)?;
                self.builder.emit(Instr::Arith {
                    op: arith_op(*op),
                    ty: vt,
                });
                Ok(ty)
            }
            ExprKind::Shift { direction, lhs, rhs } => {
                let ty = self.resolve(lhs)?;
                stack_type(ty, &lhs.loc)?;
                self.emit_expr_as(lhs, Type::Int)?;
                self.emit_expr_as(rhs, Type::Int)?;
                self.builder.emit(Instr::Shift(match direction {
                    ShiftDirection::Left => ShiftKind::Shl,
                    ShiftDirection::Right => ShiftKind::Ushr,
                }));
                self.emit_cast(Type::Int, ty, loc)?;
                Ok(ty)
            }
            ExprKind::Comparison { op, lhs, rhs } => {
                let ty = promote(self.resolve(lhs)?, self.resolve(rhs)?);
                let vt = stack_type(ty, loc)?;
                self.emit_expr_as(lhs, ty)?;
                self.emit_expr_as(rhs, ty)?;
                self.builder.emit(Instr::Compare(vt));
                self.emit_signal_to_bool(relation(*op));
                Ok(Type::Bool)
            }
            ExprKind::Identifier { name } => {
                let slot = self.lookup(name, loc)?;
                self.builder.emit(Instr::Load {
                    ty: stack_type(slot.ty, loc)?,
                    slot: slot.index,
                });
                Ok(slot.ty)
            }
            ExprKind::IntImmediate { value } => {
                self.builder.emit(Instr::Push(Constant::Int(*value)));
                Ok(Type::Int)
            }
            ExprKind::FloatImmediate { value } => {
                self.builder.emit(Instr::Push(Constant::Double(*value)));
                Ok(Type::Double)
            }
        }
    }

    /// Emit `expr` converted to `to`.
    fn emit_expr_as(&mut self, expr: &Expr, to: Type) -> Result<(), CompileError> {
        let from = self.emit_expr(expr)?;
        self.emit_cast(from, to, &expr.loc)
    }

    fn emit_cast(&mut self, from: Type, to: Type, loc: &Location) -> Result<(), CompileError> {
        check_cast(from, to, loc)?;
        if from != to {
            self.builder.emit(Instr::Cast {
                from: stack_type(from, loc)?,
                to: stack_type(to, loc)?,
            });
        }
        Ok(())
    }

    /// Turn the ordering signal on top of the stack into a `Bool`.
    fn emit_signal_to_bool(&mut self, relation: Relation) {
        let yes = self.builder.new_label();
        let end = self.builder.new_label();
        self.builder.emit(Instr::JumpIf { relation, target: yes });
        self.builder.emit(Instr::Push(Constant::Bool(false)));
        self.builder.emit(Instr::Jump(end));
        self.builder.mark(yes);
        self.builder.emit(Instr::Push(Constant::Bool(true)));
        self.builder.mark(end);
    }

    fn emit_call(&mut self, call: &Call, loc: &Location) -> Result<Type, CompileError> {
        let functions = self.functions;
        let sig = functions.get(&call.name, loc)?;
        if call.args.len() != sig.params.len() {
            return Err(CompileError::ArityMismatch {
                name: call.name.clone(),
                expected: sig.params.len(),
                got: call.args.len(),
                loc: loc.clone(),
            });
        }

        for (arg, &param) in call.args.iter().zip(&sig.params) {
            self.emit_expr_as(arg, param)?;
        }
        self.builder.emit(Instr::Call {
            name: call.name.clone(),
            signature: sig.block_signature()?,
        });
        Ok(sig.ret)
    }
}

fn arith_op(op: ArithOp) -> bc::ArithOp {
    match op {
        ArithOp::Plus => bc::ArithOp::Add,
        ArithOp::Minus => bc::ArithOp::Sub,
        ArithOp::Mult => bc::ArithOp::Mul,
        ArithOp::Div => bc::ArithOp::Div,
    }
}

fn relation(op: CompareOp) -> Relation {
    match op {
        CompareOp::Lt => Relation::Lt,
        CompareOp::Gt => Relation::Gt,
        CompareOp::Le => Relation::Le,
        CompareOp::Ge => Relation::Ge,
        CompareOp::Eq => Relation::Eq,
    }
}
