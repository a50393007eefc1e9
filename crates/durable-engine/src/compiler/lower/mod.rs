//! AST to IR lowering
//!
//! Lowers one function body at a time into basic blocks. Each source binding
//! gets its own register; bindings chosen by [`BoxingPlan`] live in a heap cell
//! and the register holds the cell reference instead.
//!
//! Closure literals are not lowered inline. Each one becomes a `MakeClosure`
//! and a [`LowerJob`] that the driver compiles afterwards.
//!
//! Code after a `return`, `break` or `continue` is still lowered, into blocks
//! nothing jumps to, so closure numbering and resume point ids never depend on
//! reachability.

mod control_flow;
mod expr;
mod stmt;

pub use control_flow::{LoopContext, LoopStack, LoopTargetError};

use rustc_hash::FxHashMap;

use crate::compiler::ast::{Param, Program, Span, Stmt};
use crate::compiler::callgraph::Coloring;
use crate::compiler::captures::BoxingPlan;
use crate::compiler::ir::{
    BasicBlockId, BlockKind, FunctionKind, IrFunction, IrInstr, Register, Terminator,
};
use crate::compiler::monomorphize::{Instantiation, Monomorphizer};
use crate::compiler::types::Type;
use crate::compiler::CompileError;
use crate::vm::types::{CaptureDescriptor, DynTypeInfo, FunctionKey};

/// A function body waiting to be lowered
#[derive(Debug, Clone, PartialEq)]
pub struct LowerJob {
    pub key: FunctionKey,
    /// Call graph node, shared by every instantiation of a declaration
    pub node: String,
    pub params: Vec<Param>,
    pub captures: Vec<CaptureDescriptor>,
    pub body: Vec<Stmt>,
    /// Type parameter bindings in effect
    pub subst: FxHashMap<String, Type>,
    /// Instantiation depth of the enclosing declaration
    pub depth: u32,
    pub span: Span,
}

impl LowerJob {
    /// Job for a declaration instance from the monomorphizer
    pub fn for_instance(program: &Program, instance: &Instantiation) -> Self {
        let decl = &program.functions[instance.decl_index];
        Self {
            key: instance.key.clone(),
            node: program.qualify(&decl.name),
            params: decl
                .params
                .iter()
                .map(|p| Param::new(p.name.clone(), p.ty.substitute(&instance.subst)))
                .collect(),
            captures: Vec::new(),
            body: decl.body.clone(),
            subst: instance.subst.clone(),
            depth: instance.depth,
            span: decl.span,
        }
    }
}

/// Result of lowering one body
#[derive(Debug)]
pub struct LoweredFunction {
    pub function: IrFunction,
    pub captures: Vec<CaptureDescriptor>,
    /// Closure literals found in the body, in source order
    pub closures: Vec<LowerJob>,
    pub dyn_types: Vec<DynTypeInfo>,
}

/// Lower a single body
pub fn lower_function(
    job: &LowerJob,
    coloring: &Coloring,
    mono: &mut Monomorphizer<'_>,
) -> Result<LoweredFunction, CompileError> {
    let mut lowerer = Lowerer::new(job, coloring, mono);
    lowerer.lower_body()?;
    Ok(LoweredFunction {
        function: lowerer.func,
        captures: job.captures.clone(),
        closures: lowerer.closures,
        dyn_types: lowerer.dyn_types,
    })
}

/// A source binding
#[derive(Debug, Clone, Copy)]
struct Binding {
    reg: Register,
    /// `reg` holds a cell reference rather than the value
    boxed: bool,
}

/// Per-function lowering state
pub(crate) struct Lowerer<'a, 'p> {
    job: &'a LowerJob,
    coloring: &'a Coloring,
    mono: &'a mut Monomorphizer<'p>,
    func: IrFunction,
    current_block: BasicBlockId,
    scopes: Vec<FxHashMap<String, Binding>>,
    plan: BoxingPlan,
    /// Ordinal of the next declared binding
    next_binding: usize,
    loops: LoopStack,
    closures: Vec<LowerJob>,
    closure_count: u32,
    next_point: u32,
    dyn_types: Vec<DynTypeInfo>,
}

impl<'a, 'p> Lowerer<'a, 'p> {
    fn new(job: &'a LowerJob, coloring: &'a Coloring, mono: &'a mut Monomorphizer<'p>) -> Self {
        let kind = if coloring.is_durable(&job.node) {
            FunctionKind::Durable
        } else {
            FunctionKind::Plain
        };
        let mut func = IrFunction::new(
            job.key.clone(),
            kind,
            job.params.len() as u32,
            job.captures.len() as u32,
        );
        func.span = job.span;
        let entry = func.add_block(BlockKind::Body, Some("entry".to_string()));
        func.entry = entry;

        let capture_names: Vec<String> = job.captures.iter().map(|c| c.name.clone()).collect();
        let plan = BoxingPlan::analyze(&job.params, &capture_names, &job.body);

        Self {
            job,
            coloring,
            mono,
            func,
            current_block: entry,
            scopes: vec![FxHashMap::default()],
            plan,
            next_binding: 0,
            loops: LoopStack::new(),
            closures: Vec::new(),
            closure_count: 0,
            next_point: 1,
            dyn_types: Vec::new(),
        }
    }

    fn lower_body(&mut self) -> Result<(), CompileError> {
        let job = self.job;
        let param_count = job.params.len() as u32;
        for (i, param) in job.params.iter().enumerate() {
            self.declare(&param.name, Register(i as u32));
        }
        // Captures arrive as they were made: cells for shared bindings.
        for (i, capture) in job.captures.iter().enumerate() {
            self.next_binding += 1;
            self.bind(
                &capture.name,
                Binding {
                    reg: Register(param_count + i as u32),
                    boxed: capture.boxed,
                },
            );
        }

        for stmt in &job.body {
            self.lower_stmt(stmt)?;
        }
        if !self.current_block_is_terminated() {
            self.set_terminator(Terminator::Return(None));
        }
        Ok(())
    }

    /// Name used in diagnostics
    fn function_name(&self) -> String {
        self.job.key.to_string()
    }

    fn is_durable(&self) -> bool {
        self.func.is_durable()
    }

    // ===== Blocks =====

    fn new_block(&mut self, label: &str) -> BasicBlockId {
        self.func.add_block(BlockKind::Body, Some(label.to_string()))
    }

    fn switch_to(&mut self, block: BasicBlockId) {
        self.current_block = block;
    }

    fn emit(&mut self, instr: IrInstr) {
        if let Some(block) = self.func.block_mut(self.current_block) {
            block.add_instr(instr);
        }
    }

    fn set_terminator(&mut self, term: Terminator) {
        if let Some(block) = self.func.block_mut(self.current_block) {
            block.set_terminator(term);
        }
    }

    fn current_block_is_terminated(&self) -> bool {
        self.func
            .block(self.current_block)
            .map(|b| b.is_terminated())
            .unwrap_or(false)
    }

    /// Jump to `target` unless the block already left
    fn jump_if_open(&mut self, target: BasicBlockId) {
        if !self.current_block_is_terminated() {
            self.set_terminator(Terminator::Jump(target));
        }
    }

    fn alloc_register(&mut self) -> Register {
        self.func.alloc_register()
    }

    // ===== Bindings =====

    fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    /// Declare the next binding, initialized from `init`
    fn declare(&mut self, name: &str, init: Register) {
        let ordinal = self.next_binding;
        self.next_binding += 1;
        let boxed = self.plan.is_boxed(ordinal);

        let reg = self.alloc_register();
        if boxed {
            self.emit(IrInstr::NewCell { dest: reg, init });
        } else {
            self.emit(IrInstr::Move { dest: reg, src: init });
        }
        self.bind(name, Binding { reg, boxed });
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn resolve(&self, name: &str, span: Span) -> Result<Binding, CompileError> {
        self.lookup(name).ok_or_else(|| CompileError::UnknownVariable {
            function: self.function_name(),
            name: name.to_string(),
            span,
        })
    }

    /// Register holding the current value of a variable
    fn read_var(&mut self, name: &str, span: Span) -> Result<Register, CompileError> {
        let binding = self.resolve(name, span)?;
        if binding.boxed {
            let dest = self.alloc_register();
            self.emit(IrInstr::LoadCell {
                dest,
                cell: binding.reg,
            });
            Ok(dest)
        } else {
            Ok(binding.reg)
        }
    }

    fn write_var(&mut self, name: &str, value: Register, span: Span) -> Result<(), CompileError> {
        let binding = self.resolve(name, span)?;
        if binding.boxed {
            self.emit(IrInstr::StoreCell {
                cell: binding.reg,
                value,
            });
        } else {
            self.emit(IrInstr::Move {
                dest: binding.reg,
                src: value,
            });
        }
        Ok(())
    }
}
