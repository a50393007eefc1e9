//! Expression lowering
//!
//! Every expression lowers to the register holding its value. Operands are
//! evaluated left to right, so suspension points and closures are met in the
//! same order as the AST traversal.

use super::{LowerJob, Lowerer};
use crate::compiler::ast::{CallTarget, Expr, ExprKind, Literal, LogicalOp, Param, Span, Stmt};
use crate::compiler::captures::closure_captures;
use crate::compiler::ir::{
    IrConstant, IrInstr, Register, SuspendOp, SuspensionKind, SuspensionPoint, Terminator,
};
use crate::compiler::types::Type;
use crate::compiler::CompileError;
use crate::vm::types::{CaptureDescriptor, DynTypeInfo, FunctionKey};

impl<'a, 'p> Lowerer<'a, 'p> {
    pub(super) fn lower_expr(&mut self, expr: &Expr) -> Result<Register, CompileError> {
        match &expr.kind {
            ExprKind::Lit(lit) => {
                let dest = self.alloc_register();
                let value = match lit {
                    Literal::Nil => IrConstant::Nil,
                    Literal::Bool(b) => IrConstant::Bool(*b),
                    Literal::Int(i) => IrConstant::Int(*i),
                    Literal::Float(f) => IrConstant::Float(*f),
                    Literal::Str(s) => IrConstant::Str(s.clone()),
                };
                self.emit(IrInstr::Const { dest, value });
                Ok(dest)
            }
            ExprKind::Var(name) => self.read_var(name, expr.span),
            ExprKind::Unary { op, expr: operand } => {
                let operand = self.lower_expr(operand)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::Unary {
                    dest,
                    op: *op,
                    operand,
                });
                Ok(dest)
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.lower_expr(left)?;
                let right = self.lower_expr(right)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::Binary {
                    dest,
                    op: *op,
                    left,
                    right,
                });
                Ok(dest)
            }
            ExprKind::Logical { op, left, right } => self.lower_logical(*op, left, right),
            ExprKind::Call { target, args } => self.lower_call(target, args, expr.span),
            ExprKind::Yield(value) => {
                let value = self.lower_expr(value)?;
                Ok(self.suspend(SuspendOp::Yield { value }, SuspensionKind::Yield, expr.span))
            }
            ExprKind::Closure { params, body } => self.lower_closure(params, body, expr.span),
            ExprKind::FuncRef { name, type_args } => {
                let function = self.request_function(name, type_args, expr.span)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::MakeClosure {
                    dest,
                    function,
                    captures: Vec::new(),
                });
                Ok(dest)
            }
            ExprKind::List(items) => {
                let items = self.lower_args(items)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::MakeList { dest, items });
                Ok(dest)
            }
            ExprKind::Map(entries) => {
                let mut lowered = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.lower_expr(key)?;
                    let value = self.lower_expr(value)?;
                    lowered.push((key, value));
                }
                let dest = self.alloc_register();
                self.emit(IrInstr::MakeMap {
                    dest,
                    entries: lowered,
                });
                Ok(dest)
            }
            ExprKind::Struct { name, fields } => {
                let mut lowered = Vec::with_capacity(fields.len());
                for (field, value) in fields {
                    lowered.push((field.clone(), self.lower_expr(value)?));
                }
                let dest = self.alloc_register();
                self.emit(IrInstr::MakeStruct {
                    dest,
                    name: name.clone(),
                    fields: lowered,
                });
                Ok(dest)
            }
            ExprKind::Field { object, field } => {
                let object = self.lower_expr(object)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::GetField {
                    dest,
                    object,
                    field: field.clone(),
                });
                Ok(dest)
            }
            ExprKind::Index { object, index } => {
                let object = self.lower_expr(object)?;
                let index = self.lower_expr(index)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::GetIndex {
                    dest,
                    object,
                    index,
                });
                Ok(dest)
            }
            ExprKind::NewRef(init) => {
                let init = self.lower_expr(init)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::NewCell { dest, init });
                Ok(dest)
            }
            ExprKind::Deref(cell) => {
                let cell = self.lower_expr(cell)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::LoadCell { dest, cell });
                Ok(dest)
            }
            ExprKind::Box { ty, expr: inner } => {
                let ty = self.concrete(ty);
                let src = self.lower_expr(inner)?;
                let type_id = ty.canonical();
                let info = DynTypeInfo {
                    type_id: type_id.clone(),
                    underlying: ty.representation().canonical(),
                };
                if !self.dyn_types.contains(&info) {
                    self.dyn_types.push(info);
                }
                let dest = self.alloc_register();
                self.emit(IrInstr::Box { dest, type_id, src });
                Ok(dest)
            }
            ExprKind::Unbox { ty, expr: inner } => {
                let type_id = self.concrete(ty).canonical();
                let src = self.lower_expr(inner)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::Unbox { dest, type_id, src });
                Ok(dest)
            }
            ExprKind::Is { ty, expr: inner } => {
                let type_id = self.concrete(ty).canonical();
                let src = self.lower_expr(inner)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::IsType { dest, type_id, src });
                Ok(dest)
            }
        }
    }

    pub(super) fn lower_args(&mut self, args: &[Expr]) -> Result<Vec<Register>, CompileError> {
        args.iter().map(|arg| self.lower_expr(arg)).collect()
    }

    /// Apply the type parameter bindings of the body being lowered
    fn concrete(&self, ty: &Type) -> Type {
        ty.substitute(&self.job.subst)
    }

    /// `&&` and `||` evaluate to the deciding operand
    fn lower_logical(&mut self, op: LogicalOp, left: &Expr, right: &Expr) -> Result<Register, CompileError> {
        let result = self.alloc_register();
        let left = self.lower_expr(left)?;
        self.emit(IrInstr::Move {
            dest: result,
            src: left,
        });

        let rhs_block = self.new_block("logic.rhs");
        let merge_block = self.new_block("logic.end");
        let (then_block, else_block) = match op {
            LogicalOp::And => (rhs_block, merge_block),
            LogicalOp::Or => (merge_block, rhs_block),
        };
        self.set_terminator(Terminator::Branch {
            cond: left,
            then_block,
            else_block,
        });

        self.switch_to(rhs_block);
        let right = self.lower_expr(right)?;
        self.emit(IrInstr::Move {
            dest: result,
            src: right,
        });
        self.set_terminator(Terminator::Jump(merge_block));

        self.switch_to(merge_block);
        Ok(result)
    }

    /// Key of a declared function, instantiating generics on demand
    pub(super) fn request_function(
        &mut self,
        name: &str,
        type_args: &[Type],
        span: Span,
    ) -> Result<FunctionKey, CompileError> {
        let type_args: Vec<Type> = type_args.iter().map(|ty| self.concrete(ty)).collect();
        let function = self.function_name();
        self.mono
            .request(&function, name, &type_args, self.job.depth, span)
    }

    fn lower_call(&mut self, target: &CallTarget, args: &[Expr], span: Span) -> Result<Register, CompileError> {
        match target {
            CallTarget::Function { name, type_args } => {
                let decl = self
                    .mono
                    .declaration(name)
                    .ok_or_else(|| CompileError::UnknownFunction {
                        function: self.function_name(),
                        name: name.clone(),
                        span,
                    })?;
                if decl.params.len() != args.len() {
                    return Err(CompileError::ArityMismatch {
                        function: self.function_name(),
                        callee: name.clone(),
                        expected: decl.params.len(),
                        found: args.len(),
                        span,
                    });
                }
                let callee_durable = self.coloring.is_durable(&self.mono.program().qualify(name));
                let function = self.request_function(name, type_args, span)?;
                let args = self.lower_args(args)?;

                if callee_durable {
                    Ok(self.suspend(SuspendOp::Call { function, args }, SuspensionKind::Call, span))
                } else {
                    let dest = self.alloc_register();
                    self.emit(IrInstr::CallPlain {
                        dest,
                        function,
                        args,
                    });
                    Ok(dest)
                }
            }
            CallTarget::Native(name) => {
                let args = self.lower_args(args)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::CallNative {
                    dest,
                    name: name.clone(),
                    args,
                });
                Ok(dest)
            }
            CallTarget::Value(callee) => {
                let callee = self.lower_expr(callee)?;
                let args = self.lower_args(args)?;
                if self.is_durable() {
                    Ok(self.suspend(
                        SuspendOp::CallDynamic { callee, args },
                        SuspensionKind::DynamicCall,
                        span,
                    ))
                } else {
                    let dest = self.alloc_register();
                    self.emit(IrInstr::CallDynamic { dest, callee, args });
                    Ok(dest)
                }
            }
        }
    }

    /// Emit a suspension point with the next resume point id
    fn suspend(&mut self, op: SuspendOp, kind: SuspensionKind, span: Span) -> Register {
        let point = self.next_point;
        self.next_point += 1;
        let dest = self.alloc_register();
        self.emit(IrInstr::Suspend { dest, op, point });
        self.func.suspension_points.push(SuspensionPoint {
            point,
            kind,
            live: Vec::new(),
            span,
        });
        dest
    }

    /// Create a closure value and queue its body
    fn lower_closure(&mut self, params: &[Param], body: &[Stmt], span: Span) -> Result<Register, CompileError> {
        self.closure_count += 1;
        let index = self.closure_count;

        // Free variables that are not locals here are reported when the
        // closure body itself is lowered.
        let mut captures = Vec::new();
        let mut registers = Vec::new();
        for name in closure_captures(params, body).free {
            if let Some(binding) = self.lookup(&name) {
                captures.push(CaptureDescriptor {
                    name,
                    boxed: binding.boxed,
                });
                registers.push(binding.reg);
            }
        }

        let key = self.job.key.closure(index);
        let dest = self.alloc_register();
        self.emit(IrInstr::MakeClosure {
            dest,
            function: key.clone(),
            captures: registers,
        });

        let job = LowerJob {
            key,
            node: format!("{}.func{}", self.job.node, index),
            params: params
                .iter()
                .map(|p| Param::new(p.name.clone(), self.concrete(&p.ty)))
                .collect(),
            captures,
            body: body.to_vec(),
            subst: self.job.subst.clone(),
            depth: self.job.depth,
            span,
        };
        self.closures.push(job);
        Ok(dest)
    }
}
