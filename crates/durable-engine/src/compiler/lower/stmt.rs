//! Statement lowering

use super::{LoopContext, LoopTargetError, Lowerer};
use crate::compiler::ast::{BinaryOp, CallTarget, Expr, ExprKind, Place, Span, Stmt, StmtKind};
use crate::compiler::ir::{IrConstant, IrInstr, Register, Terminator};
use crate::compiler::CompileError;

/// One step from an assignment root to the stored location
enum PlaceStep {
    Field(String),
    Index(Register),
}

/// Where an assigned aggregate is stored
enum PlaceRoot<'t> {
    Var(&'t str),
    /// Register holding the cell reference of `*expr`
    Cell(Register),
}

impl<'a, 'p> Lowerer<'a, 'p> {
    pub(super) fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        if self.current_block_is_terminated() {
            let dead = self.new_block("dead");
            self.switch_to(dead);
        }

        match &stmt.kind {
            StmtKind::Let { name, init } => {
                let value = self.lower_expr(init)?;
                self.declare(name, value);
                Ok(())
            }
            StmtKind::Assign { target, value } => {
                let value = self.lower_expr(value)?;
                self.lower_assign(target, value, stmt.span)
            }
            StmtKind::Expr(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => self.lower_if(cond, then_body, else_body),
            StmtKind::While { label, cond, body } => self.lower_while(label.as_deref(), cond, body),
            StmtKind::Loop { label, body } => self.lower_loop(label.as_deref(), body),
            StmtKind::ForRange {
                label,
                var,
                start,
                end,
                body,
            } => self.lower_for_range(label.as_deref(), var, start, end, body),
            StmtKind::Break(label) => {
                let target = self
                    .loops
                    .break_target(label.as_deref())
                    .map_err(|err| self.loop_error(err, label.as_deref(), true, stmt.span))?;
                self.set_terminator(Terminator::Jump(target));
                Ok(())
            }
            StmtKind::Continue(label) => {
                let target = self
                    .loops
                    .continue_target(label.as_deref())
                    .map_err(|err| self.loop_error(err, label.as_deref(), false, stmt.span))?;
                self.set_terminator(Terminator::Jump(target));
                Ok(())
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => Some(self.lower_expr(expr)?),
                    None => None,
                };
                self.set_terminator(Terminator::Return(value));
                Ok(())
            }
            StmtKind::Block(body) => self.lower_scoped(body),
            StmtKind::Defer(call) => self.lower_defer(call, stmt.span),
        }
    }

    fn loop_error(
        &self,
        err: LoopTargetError,
        label: Option<&str>,
        is_break: bool,
        span: Span,
    ) -> CompileError {
        let function = self.function_name();
        match (err, label) {
            (LoopTargetError::UnknownLabel, Some(label)) => CompileError::UnknownLabel {
                function,
                label: label.to_string(),
                span,
            },
            _ if is_break => CompileError::BreakOutsideLoop { function, span },
            _ => CompileError::ContinueOutsideLoop { function, span },
        }
    }

    fn lower_scoped(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        self.push_scope();
        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn lower_if(&mut self, cond: &Expr, then_body: &[Stmt], else_body: &[Stmt]) -> Result<(), CompileError> {
        let cond = self.lower_expr(cond)?;
        let then_block = self.new_block("if.then");
        let else_block = self.new_block("if.else");
        let merge_block = self.new_block("if.end");
        self.set_terminator(Terminator::Branch {
            cond,
            then_block,
            else_block,
        });

        self.switch_to(then_block);
        self.lower_scoped(then_body)?;
        self.jump_if_open(merge_block);

        self.switch_to(else_block);
        self.lower_scoped(else_body)?;
        self.jump_if_open(merge_block);

        self.switch_to(merge_block);
        Ok(())
    }

    fn lower_while(&mut self, label: Option<&str>, cond: &Expr, body: &[Stmt]) -> Result<(), CompileError> {
        let header = self.new_block("while.cond");
        let body_block = self.new_block("while.body");
        let exit = self.new_block("while.end");
        self.set_terminator(Terminator::Jump(header));

        self.switch_to(header);
        let cond = self.lower_expr(cond)?;
        self.set_terminator(Terminator::Branch {
            cond,
            then_block: body_block,
            else_block: exit,
        });

        self.switch_to(body_block);
        self.lower_loop_body(LoopContext::new(exit, header, label.map(str::to_string)), body)?;
        self.jump_if_open(header);

        self.switch_to(exit);
        Ok(())
    }

    fn lower_loop(&mut self, label: Option<&str>, body: &[Stmt]) -> Result<(), CompileError> {
        let body_block = self.new_block("loop.body");
        let exit = self.new_block("loop.end");
        self.set_terminator(Terminator::Jump(body_block));

        self.switch_to(body_block);
        self.lower_loop_body(LoopContext::new(exit, body_block, label.map(str::to_string)), body)?;
        self.jump_if_open(body_block);

        self.switch_to(exit);
        Ok(())
    }

    /// `for var in start..end`
    ///
    /// Bounds are evaluated once. The loop variable is a fresh binding per
    /// iteration, copied from a hidden counter, so closures created in
    /// different iterations never share it.
    fn lower_for_range(
        &mut self,
        label: Option<&str>,
        var: &str,
        start: &Expr,
        end: &Expr,
        body: &[Stmt],
    ) -> Result<(), CompileError> {
        let start = self.lower_expr(start)?;
        let end = self.lower_expr(end)?;
        let counter = self.alloc_register();
        let limit = self.alloc_register();
        self.emit(IrInstr::Move {
            dest: counter,
            src: start,
        });
        self.emit(IrInstr::Move { dest: limit, src: end });

        let header = self.new_block("for.cond");
        let body_block = self.new_block("for.body");
        let step = self.new_block("for.step");
        let exit = self.new_block("for.end");
        self.set_terminator(Terminator::Jump(header));

        self.switch_to(header);
        let cond = self.alloc_register();
        self.emit(IrInstr::Binary {
            dest: cond,
            op: BinaryOp::Lt,
            left: counter,
            right: limit,
        });
        self.set_terminator(Terminator::Branch {
            cond,
            then_block: body_block,
            else_block: exit,
        });

        self.switch_to(body_block);
        self.push_scope();
        self.declare(var, counter);
        self.lower_loop_body(LoopContext::new(exit, step, label.map(str::to_string)), body)?;
        self.pop_scope();
        self.jump_if_open(step);

        self.switch_to(step);
        let one = self.alloc_register();
        self.emit(IrInstr::Const {
            dest: one,
            value: IrConstant::Int(1),
        });
        self.emit(IrInstr::Binary {
            dest: counter,
            op: BinaryOp::Add,
            left: counter,
            right: one,
        });
        self.set_terminator(Terminator::Jump(header));

        self.switch_to(exit);
        Ok(())
    }

    fn lower_loop_body(&mut self, ctx: LoopContext, body: &[Stmt]) -> Result<(), CompileError> {
        self.loops.push(ctx);
        let result = self.lower_scoped(body);
        self.loops.pop();
        result
    }

    fn lower_assign(&mut self, target: &Place, value: Register, span: Span) -> Result<(), CompileError> {
        match target {
            Place::Var(name) => self.write_var(name, value, span),
            Place::Deref(expr) => {
                let cell = self.lower_expr(expr)?;
                self.emit(IrInstr::StoreCell { cell, value });
                Ok(())
            }
            Place::Field { .. } | Place::Index { .. } => {
                // Flatten `root.a[i].b` into the root and its steps, evaluating
                // index expressions innermost first.
                let mut steps = Vec::new();
                let root = self.flatten_place(target, &mut steps)?;

                // Where the aggregate lives: a plain register is updated in
                // place, a cell is loaded and written back.
                let (base, cell) = match root {
                    PlaceRoot::Var(name) => {
                        let binding = self.resolve(name, span)?;
                        if binding.boxed {
                            let loaded = self.alloc_register();
                            self.emit(IrInstr::LoadCell {
                                dest: loaded,
                                cell: binding.reg,
                            });
                            (loaded, Some(binding.reg))
                        } else {
                            (binding.reg, None)
                        }
                    }
                    PlaceRoot::Cell(cell) => {
                        let loaded = self.alloc_register();
                        self.emit(IrInstr::LoadCell { dest: loaded, cell });
                        (loaded, Some(cell))
                    }
                };

                let mut objects = vec![base];
                for step in &steps[..steps.len() - 1] {
                    let parent = objects[objects.len() - 1];
                    let dest = self.alloc_register();
                    self.emit(match step {
                        PlaceStep::Field(field) => IrInstr::GetField {
                            dest,
                            object: parent,
                            field: field.clone(),
                        },
                        PlaceStep::Index(index) => IrInstr::GetIndex {
                            dest,
                            object: parent,
                            index: *index,
                        },
                    });
                    objects.push(dest);
                }

                let mut stored = value;
                for (step, &object) in steps.iter().zip(&objects).rev() {
                    self.emit(match step {
                        PlaceStep::Field(field) => IrInstr::SetField {
                            object,
                            field: field.clone(),
                            value: stored,
                        },
                        PlaceStep::Index(index) => IrInstr::SetIndex {
                            object,
                            index: *index,
                            value: stored,
                        },
                    });
                    stored = object;
                }

                if let Some(cell) = cell {
                    self.emit(IrInstr::StoreCell { cell, value: base });
                }
                Ok(())
            }
        }
    }

    fn flatten_place<'t>(
        &mut self,
        place: &'t Place,
        steps: &mut Vec<PlaceStep>,
    ) -> Result<PlaceRoot<'t>, CompileError> {
        match place {
            Place::Var(name) => Ok(PlaceRoot::Var(name)),
            Place::Deref(expr) => Ok(PlaceRoot::Cell(self.lower_expr(expr)?)),
            Place::Field { base, field } => {
                let root = self.flatten_place(base, steps)?;
                steps.push(PlaceStep::Field(field.clone()));
                Ok(root)
            }
            Place::Index { base, index } => {
                let root = self.flatten_place(base, steps)?;
                let index = self.lower_expr(index)?;
                steps.push(PlaceStep::Index(index));
                Ok(root)
            }
        }
    }

    /// `defer f(args)`: arguments are evaluated now, the call runs on return
    fn lower_defer(&mut self, call: &Expr, span: Span) -> Result<(), CompileError> {
        if self.is_durable() {
            return Err(self.unsupported("defer", span));
        }
        let ExprKind::Call { target, args } = &call.kind else {
            return Err(self.unsupported("defer of a non-call expression", span));
        };

        let callee = match target {
            CallTarget::Value(callee) => self.lower_expr(callee)?,
            CallTarget::Function { name, type_args } => {
                let key = self.request_function(name, type_args, call.span)?;
                let dest = self.alloc_register();
                self.emit(IrInstr::MakeClosure {
                    dest,
                    function: key,
                    captures: Vec::new(),
                });
                dest
            }
            CallTarget::Native(_) => return Err(self.unsupported("defer of a native call", span)),
        };
        let args = self.lower_args(args)?;
        self.emit(IrInstr::Defer { callee, args });
        Ok(())
    }

    pub(super) fn unsupported(&self, construct: &str, span: Span) -> CompileError {
        CompileError::Unsupported {
            function: self.function_name(),
            construct: construct.to_string(),
            span,
        }
    }
}
