//! IR interpreter
//!
//! Durable functions execute as frames on the coroutine [`Stack`]. A frame is
//! always entered at its dispatch block with a fresh register file; the dispatch
//! block reads the frame's resume point and either loads the entry values or
//! jumps to the restore block of the point the frame suspended at. A first
//! entry, an in-memory resume and a resume after unmarshaling therefore run the
//! same code.
//!
//! Plain functions never suspend and run to completion on the host stack, with
//! their own register file. Their depth is bounded by `max_call_depth`.

use crate::compiler::ast::{BinaryOp, UnaryOp};
use crate::compiler::ir::{BasicBlock, BasicBlockId, IrConstant, IrFunction, IrInstr, Register, SuspendOp, Terminator};
use crate::config::RuntimeOptions;
use crate::vm::heap::{Heap, ObjectId};
use crate::vm::stack::{Frame, Stack};
use crate::vm::types::{FunctionDescriptor, FunctionKey, TypeRegistry};
use crate::vm::value::{DynValue, FuncValue, StructValue, Value};
use crate::vm::{VmError, VmResult};

/// Result of running a stack until it suspends or empties
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The innermost frame yielded this value and is suspended
    Yielded(Value),
    /// The outermost frame returned; the stack is empty
    Returned(Value),
}

/// How a durable frame left the interpreter loop
enum FrameExit {
    Returned(Value),
    Yielded(Value),
    /// Push a frame for a durable callee and run it
    Call(Frame),
    /// Re-enter the same frame with this resume value
    Resume(Value),
}

/// A call registered by `defer`
type Deferred = (Value, Vec<Value>);

/// Executes IR against a registry and a heap
pub struct Interpreter<'a> {
    registry: &'a TypeRegistry,
    heap: &'a mut Heap,
    options: &'a RuntimeOptions,
    /// Current nesting of host-stack calls
    depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(registry: &'a TypeRegistry, heap: &'a mut Heap, options: &'a RuntimeOptions) -> Self {
        Self {
            registry,
            heap,
            options,
            depth: 0,
        }
    }

    /// Run `stack` until the innermost frame yields or the outermost returns
    ///
    /// `resume` is delivered to the innermost frame, which receives it at the
    /// suspension point it is stopped at. It is ignored by a frame that has not
    /// started.
    pub fn run(&mut self, stack: &mut Stack, resume: Value) -> VmResult<RunOutcome> {
        let registry = self.registry;
        let mut resume = Some(resume);
        loop {
            let key = match stack.top() {
                Some(frame) => frame.function().clone(),
                None => return Err(VmError::InvalidState("no frame to run".into())),
            };
            let descriptor = registry.resolve(&key)?;

            let exit = if descriptor.is_durable() {
                self.run_frame(descriptor, stack, resume.take())?
            } else {
                // Only reachable when the coroutine's entry itself is plain.
                let values: Vec<Value> = stack
                    .top()
                    .map(|frame| frame.locals().values().cloned().collect())
                    .unwrap_or_default();
                FrameExit::Returned(self.call_plain(descriptor, values)?)
            };

            match exit {
                FrameExit::Yielded(value) => {
                    tracing::trace!(
                        function = %key,
                        depth = stack.depth(),
                        point = stack.top().map(Frame::resume_point).unwrap_or_default(),
                        "frame yielded"
                    );
                    return Ok(RunOutcome::Yielded(value));
                }
                FrameExit::Returned(value) => {
                    stack.pop_frame();
                    if stack.is_empty() {
                        return Ok(RunOutcome::Returned(value));
                    }
                    tracing::trace!(function = %key, depth = stack.depth(), "frame returned");
                    resume = Some(value);
                }
                FrameExit::Call(frame) => {
                    tracing::trace!(caller = %key, callee = %frame.function(), "frame call");
                    stack.push(frame)?;
                    resume = None;
                }
                FrameExit::Resume(value) => resume = Some(value),
            }
        }
    }

    /// Run the innermost frame from its dispatch block to its next exit
    fn run_frame(
        &mut self,
        descriptor: &'a FunctionDescriptor,
        stack: &mut Stack,
        mut resume: Option<Value>,
    ) -> VmResult<FrameExit> {
        let function: &'a IrFunction = &descriptor.function;
        let mut regs = vec![Value::Nil; function.register_count as usize];
        let mut current = function.entry;

        loop {
            let block = block_at(function, current)?;
            for instr in &block.instructions {
                match instr {
                    IrInstr::LoadResumePoint { dest } => {
                        let point = top(stack)?.resume_point();
                        regs[dest.index()] = Value::Int(i64::from(point));
                    }
                    IrInstr::StoreResumePoint { point } => top_mut(stack)?.set_resume_point(*point),
                    IrInstr::LoadLocal { dest, slot } => {
                        regs[dest.index()] = top(stack)?.local(*slot).cloned().unwrap_or_default();
                    }
                    IrInstr::StoreLocal { slot, src } => {
                        top_mut(stack)?.set_local(*slot, regs[src.index()].clone());
                    }
                    IrInstr::LoadResumeValue { dest } => {
                        regs[dest.index()] = resume.take().unwrap_or_default();
                    }
                    _ => self.execute(function, instr, &mut regs, None)?,
                }
            }

            match &block.terminator {
                Terminator::Suspend(op) => return self.suspend(function, op, &regs),
                Terminator::Return(value) => {
                    return Ok(FrameExit::Returned(read_optional(&regs, *value)));
                }
                terminator => current = branch(function, terminator, &regs)?,
            }
        }
    }

    fn suspend(&mut self, function: &IrFunction, op: &SuspendOp, regs: &[Value]) -> VmResult<FrameExit> {
        match op {
            SuspendOp::Yield { value } => Ok(FrameExit::Yielded(regs[value.index()].clone())),
            SuspendOp::Call { function: key, args } => self.enter(key, read_all(regs, args), Vec::new()),
            SuspendOp::CallDynamic { callee, args } => match &regs[callee.index()] {
                Value::Func(FuncValue { key, captures }) => self.enter(key, read_all(regs, args), captures.clone()),
                other => Err(failure(function, format!("call of non-function {}", other.type_name()))),
            },
        }
    }

    /// Start a call made at a suspension point
    ///
    /// Durable callees get their own frame. Plain callees run right away and
    /// the caller resumes with the result.
    fn enter(&mut self, key: &FunctionKey, args: Vec<Value>, captures: Vec<Value>) -> VmResult<FrameExit> {
        let registry = self.registry;
        let descriptor = registry.resolve(key)?;
        let values = entry_values(descriptor, args, captures)?;
        if descriptor.is_durable() {
            Ok(FrameExit::Call(Frame::entry(key.clone(), values)))
        } else {
            Ok(FrameExit::Resume(self.call_plain(descriptor, values)?))
        }
    }

    /// Call a function to completion from a non-suspending context
    fn call_function(&mut self, key: &FunctionKey, args: Vec<Value>, captures: Vec<Value>) -> VmResult<Value> {
        let registry = self.registry;
        let descriptor = registry.resolve(key)?;
        let values = entry_values(descriptor, args, captures)?;
        if !descriptor.is_durable() {
            return self.call_plain(descriptor, values);
        }

        // A durable callee reached through a function value: it gets a private
        // stack and must finish without yielding.
        self.descend()?;
        let mut stack = Stack::new(self.options.max_frames);
        let outcome = match stack.push(Frame::entry(key.clone(), values)) {
            Ok(_) => self.run(&mut stack, Value::Nil),
            Err(err) => Err(err),
        };
        self.depth -= 1;
        match outcome? {
            RunOutcome::Returned(value) => Ok(value),
            RunOutcome::Yielded(_) => Err(VmError::RuntimeFailure {
                function: key.to_string(),
                message: "yield through a non-suspending call".into(),
            }),
        }
    }

    fn call_value(&mut self, caller: &IrFunction, callee: Value, args: Vec<Value>) -> VmResult<Value> {
        match callee {
            Value::Func(FuncValue { key, captures }) => self.call_function(&key, args, captures),
            other => Err(failure(caller, format!("call of non-function {}", other.type_name()))),
        }
    }

    fn call_plain(&mut self, descriptor: &'a FunctionDescriptor, values: Vec<Value>) -> VmResult<Value> {
        self.descend()?;
        let result = self.exec_plain(&descriptor.function, values);
        self.depth -= 1;
        result
    }

    fn descend(&mut self) -> VmResult<()> {
        if self.depth >= self.options.max_call_depth {
            return Err(VmError::StackOverflow {
                limit: self.options.max_call_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn exec_plain(&mut self, function: &'a IrFunction, values: Vec<Value>) -> VmResult<Value> {
        let mut regs = vec![Value::Nil; (function.register_count as usize).max(values.len())];
        for (slot, value) in values.into_iter().enumerate() {
            regs[slot] = value;
        }

        let mut defers: Vec<Deferred> = Vec::new();
        let outcome = self.exec_plain_blocks(function, &mut regs, &mut defers);

        // Deferred calls run last-in first-out, also after a failure.
        let mut deferred_error = None;
        while let Some((callee, args)) = defers.pop() {
            if let Err(err) = self.call_value(function, callee, args) {
                deferred_error.get_or_insert(err);
            }
        }
        match (outcome, deferred_error) {
            (Err(err), _) | (Ok(_), Some(err)) => Err(err),
            (Ok(value), None) => Ok(value),
        }
    }

    fn exec_plain_blocks(
        &mut self,
        function: &'a IrFunction,
        regs: &mut [Value],
        defers: &mut Vec<Deferred>,
    ) -> VmResult<Value> {
        let mut current = function.entry;
        loop {
            let block = block_at(function, current)?;
            for instr in &block.instructions {
                self.execute(function, instr, regs, Some(&mut *defers))?;
            }
            match &block.terminator {
                Terminator::Return(value) => return Ok(read_optional(regs, *value)),
                Terminator::Suspend(_) => {
                    return Err(failure(function, "suspension in a non-suspending function"));
                }
                terminator => current = branch(function, terminator, regs)?,
            }
        }
    }

    /// Execute one instruction that does not touch the frame
    fn execute(
        &mut self,
        function: &IrFunction,
        instr: &IrInstr,
        regs: &mut [Value],
        defers: Option<&mut Vec<Deferred>>,
    ) -> VmResult<()> {
        match instr {
            IrInstr::Const { dest, value } => regs[dest.index()] = constant(value),
            IrInstr::Move { dest, src } => regs[dest.index()] = regs[src.index()].clone(),
            IrInstr::Binary { dest, op, left, right } => {
                let value = binary(*op, &regs[left.index()], &regs[right.index()])
                    .map_err(|message| failure(function, message))?;
                regs[dest.index()] = value;
            }
            IrInstr::Unary { dest, op, operand } => {
                let value = unary(*op, &regs[operand.index()]).map_err(|message| failure(function, message))?;
                regs[dest.index()] = value;
            }
            IrInstr::MakeList { dest, items } => regs[dest.index()] = Value::List(read_all(regs, items)),
            IrInstr::MakeMap { dest, entries } => {
                let mut map: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    map_insert(&mut map, regs[key.index()].clone(), regs[value.index()].clone());
                }
                regs[dest.index()] = Value::Map(map);
            }
            IrInstr::MakeStruct { dest, name, fields } => {
                let fields = fields
                    .iter()
                    .map(|(field, reg)| (field.clone(), regs[reg.index()].clone()))
                    .collect();
                regs[dest.index()] = Value::Struct(StructValue {
                    name: name.clone(),
                    fields,
                });
            }
            IrInstr::GetField { dest, object, field } => {
                let value = self
                    .get_field(&regs[object.index()], field)
                    .map_err(|message| failure(function, message))?;
                regs[dest.index()] = value;
            }
            IrInstr::SetField { object, field, value } => {
                let value = regs[value.index()].clone();
                self.set_field(&mut regs[object.index()], field, value)
                    .map_err(|message| failure(function, message))?;
            }
            IrInstr::GetIndex { dest, object, index } => {
                let value = self
                    .get_index(&regs[object.index()], &regs[index.index()])
                    .map_err(|message| failure(function, message))?;
                regs[dest.index()] = value;
            }
            IrInstr::SetIndex { object, index, value } => {
                let index = regs[index.index()].clone();
                let value = regs[value.index()].clone();
                self.set_index(&mut regs[object.index()], index, value)
                    .map_err(|message| failure(function, message))?;
            }

            IrInstr::NewCell { dest, init } => {
                let id = self.heap.alloc(regs[init.index()].clone());
                regs[dest.index()] = Value::Ref(id);
            }
            IrInstr::LoadCell { dest, cell } => {
                let value = self
                    .cell(&regs[cell.index()])
                    .and_then(|id| self.heap.get(id).cloned().ok_or_else(|| dangling(id)))
                    .map_err(|message| failure(function, message))?;
                regs[dest.index()] = value;
            }
            IrInstr::StoreCell { cell, value } => {
                let id = self.cell(&regs[cell.index()]).map_err(|message| failure(function, message))?;
                if !self.heap.set(id, regs[value.index()].clone()) {
                    return Err(failure(function, dangling(id)));
                }
            }

            IrInstr::MakeClosure {
                dest,
                function: key,
                captures,
            } => {
                regs[dest.index()] = Value::Func(FuncValue {
                    key: key.clone(),
                    captures: read_all(regs, captures),
                });
            }
            IrInstr::CallNative { dest, name, args } => {
                let registry = self.registry;
                let native = registry
                    .native(name)
                    .ok_or_else(|| failure(function, format!("unknown native {}", name)))?;
                let value = (**native)(&read_all(regs, args)).map_err(|message| failure(function, message))?;
                regs[dest.index()] = value;
            }
            IrInstr::CallPlain {
                dest,
                function: key,
                args,
            } => {
                regs[dest.index()] = self.call_function(key, read_all(regs, args), Vec::new())?;
            }
            IrInstr::CallDynamic { dest, callee, args } => {
                let callee = regs[callee.index()].clone();
                regs[dest.index()] = self.call_value(function, callee, read_all(regs, args))?;
            }
            IrInstr::Defer { callee, args } => match defers {
                Some(defers) => defers.push((regs[callee.index()].clone(), read_all(regs, args))),
                None => return Err(failure(function, "defer in a suspending function")),
            },

            IrInstr::Box { dest, type_id, src } => {
                regs[dest.index()] = Value::Dyn(DynValue {
                    type_id: type_id.clone(),
                    payload: Box::new(regs[src.index()].clone()),
                });
            }
            IrInstr::Unbox { dest, type_id, src } => {
                let value = match &regs[src.index()] {
                    Value::Dyn(boxed) if boxed.type_id == *type_id => (*boxed.payload).clone(),
                    Value::Dyn(boxed) => {
                        return Err(failure(
                            function,
                            format!("interface holds {}, not {}", boxed.type_id, type_id),
                        ));
                    }
                    other => {
                        return Err(failure(
                            function,
                            format!("unbox of non-interface {} as {}", other.type_name(), type_id),
                        ));
                    }
                };
                regs[dest.index()] = value;
            }
            IrInstr::IsType { dest, type_id, src } => {
                let is = matches!(&regs[src.index()], Value::Dyn(boxed) if boxed.type_id == *type_id);
                regs[dest.index()] = Value::Bool(is);
            }

            IrInstr::Suspend { .. } => {
                return Err(failure(function, "suspension in a non-suspending function"));
            }
            IrInstr::LoadResumePoint { .. }
            | IrInstr::StoreResumePoint { .. }
            | IrInstr::LoadLocal { .. }
            | IrInstr::StoreLocal { .. }
            | IrInstr::LoadResumeValue { .. } => {
                return Err(failure(function, "frame access outside a durable frame"));
            }
        }
        Ok(())
    }

    // ===== Heap-aware accessors =====

    fn cell(&self, value: &Value) -> Result<ObjectId, String> {
        match value {
            Value::Ref(id) => Ok(*id),
            Value::Nil => Err("nil dereference".into()),
            other => Err(format!("dereference of {}", other.type_name())),
        }
    }

    /// Follow one reference, if `value` is one
    fn deref<'v>(&'v self, value: &'v Value) -> Result<&'v Value, String> {
        match value {
            Value::Ref(id) => self.heap.get(*id).ok_or_else(|| dangling(*id)),
            other => Ok(other),
        }
    }

    fn get_field(&self, object: &Value, field: &str) -> Result<Value, String> {
        match self.deref(object)? {
            Value::Struct(s) => s
                .field(field)
                .cloned()
                .ok_or_else(|| format!("{} has no field {}", s.name, field)),
            other => Err(format!("field {} of {}", field, other.type_name())),
        }
    }

    fn set_field(&mut self, object: &mut Value, field: &str, value: Value) -> Result<(), String> {
        let target = match object.as_ref_id() {
            Some(id) => self.heap.get_mut(id).ok_or_else(|| dangling(id))?,
            None => object,
        };
        match target {
            Value::Struct(s) => {
                let name = s.name.clone();
                let slot = s
                    .field_mut(field)
                    .ok_or_else(|| format!("{} has no field {}", name, field))?;
                *slot = value;
                Ok(())
            }
            other => Err(format!("field {} of {}", field, other.type_name())),
        }
    }

    fn get_index(&self, object: &Value, index: &Value) -> Result<Value, String> {
        match (self.deref(object)?, index) {
            (Value::List(items), Value::Int(i)) => list_slot(items.len(), *i).map(|i| items[i].clone()),
            (Value::Map(entries), key) => Ok(entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()),
            (Value::Str(s), Value::Int(i)) => {
                let count = s.chars().count();
                let i = list_slot(count, *i)?;
                Ok(s.chars().nth(i).map(|c| Value::Str(c.to_string())).unwrap_or_default())
            }
            (other, index) => Err(format!("index {} of {}", index.type_name(), other.type_name())),
        }
    }

    fn set_index(&mut self, object: &mut Value, index: Value, value: Value) -> Result<(), String> {
        let target = match object.as_ref_id() {
            Some(id) => self.heap.get_mut(id).ok_or_else(|| dangling(id))?,
            None => object,
        };
        match (target, index) {
            (Value::List(items), Value::Int(i)) => {
                let i = list_slot(items.len(), i)?;
                items[i] = value;
                Ok(())
            }
            (Value::Map(entries), key) => {
                map_insert(entries, key, value);
                Ok(())
            }
            (other, index) => Err(format!("assign to index {} of {}", index.type_name(), other.type_name())),
        }
    }
}

// ===== Helpers =====

fn failure(function: &IrFunction, message: impl Into<String>) -> VmError {
    VmError::RuntimeFailure {
        function: function.key.to_string(),
        message: message.into(),
    }
}

fn dangling(id: ObjectId) -> String {
    format!("dangling reference {}", id)
}

fn block_at(function: &IrFunction, id: BasicBlockId) -> VmResult<&BasicBlock> {
    function
        .block(id)
        .ok_or_else(|| failure(function, format!("missing block {}", id)))
}

fn top(stack: &Stack) -> VmResult<&Frame> {
    stack
        .top()
        .ok_or_else(|| VmError::InvalidState("frame instruction on an empty stack".into()))
}

fn top_mut(stack: &mut Stack) -> VmResult<&mut Frame> {
    stack
        .top_mut()
        .ok_or_else(|| VmError::InvalidState("frame instruction on an empty stack".into()))
}

/// Next block for a non-exiting terminator
fn branch(function: &IrFunction, terminator: &Terminator, regs: &[Value]) -> VmResult<BasicBlockId> {
    match terminator {
        Terminator::Jump(target) => Ok(*target),
        Terminator::Branch {
            cond,
            then_block,
            else_block,
        } => Ok(if regs[cond.index()].is_truthy() {
            *then_block
        } else {
            *else_block
        }),
        Terminator::BrTable {
            index,
            targets,
            default,
        } => {
            let target = regs[index.index()]
                .as_int()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| targets.get(i))
                .unwrap_or(default);
            Ok(*target)
        }
        Terminator::Unreachable => Err(failure(function, "reached an unreachable block")),
        Terminator::Return(_) | Terminator::Suspend(_) => {
            Err(failure(function, "exit terminator used as a branch"))
        }
    }
}

/// Arguments followed by captures, checked against the callee
fn entry_values(descriptor: &FunctionDescriptor, args: Vec<Value>, captures: Vec<Value>) -> VmResult<Vec<Value>> {
    let expected = descriptor.function.param_count as usize;
    if args.len() != expected {
        return Err(VmError::ArityMismatch {
            function: descriptor.key.to_string(),
            expected,
            found: args.len(),
        });
    }
    if captures.len() != descriptor.function.capture_count as usize {
        return Err(VmError::RuntimeFailure {
            function: descriptor.key.to_string(),
            message: format!(
                "expects {} captures, got {}",
                descriptor.function.capture_count,
                captures.len()
            ),
        });
    }
    let mut values = args;
    values.extend(captures);
    Ok(values)
}

fn read_all(regs: &[Value], list: &[Register]) -> Vec<Value> {
    list.iter().map(|reg| regs[reg.index()].clone()).collect()
}

fn read_optional(regs: &[Value], reg: Option<Register>) -> Value {
    reg.map(|reg| regs[reg.index()].clone()).unwrap_or_default()
}

fn list_slot(len: usize, index: i64) -> Result<usize, String> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| format!("index {} out of range [0, {})", index, len))
}

fn map_insert(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some((_, slot)) => *slot = value,
        None => entries.push((key, value)),
    }
}

fn constant(value: &IrConstant) -> Value {
    match value {
        IrConstant::Nil => Value::Nil,
        IrConstant::Bool(b) => Value::Bool(*b),
        IrConstant::Int(i) => Value::Int(*i),
        IrConstant::Float(x) => Value::Float(*x),
        IrConstant::Str(s) => Value::Str(s.clone()),
    }
}

fn unary(op: UnaryOp, operand: &Value) -> Result<Value, String> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Neg, other) => Err(format!("negation of {}", other.type_name())),
    }
}

/// Integers wrap; division by zero is an error
fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, String> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne => return Ok(Value::Bool(!values_equal(left, right))),
        _ => {}
    }

    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_binary(op, *a, *b),
        (Value::Float(a), Value::Float(b)) => float_binary(op, *a, *b),
        (Value::Int(a), Value::Float(b)) => float_binary(op, *a as f64, *b),
        (Value::Float(a), Value::Int(b)) => float_binary(op, *a, *b as f64),
        (Value::Str(a), Value::Str(b)) => match op {
            BinaryOp::Add => Ok(Value::Str(format!("{}{}", a, b))),
            BinaryOp::Lt => Ok(Value::Bool(a < b)),
            BinaryOp::Le => Ok(Value::Bool(a <= b)),
            BinaryOp::Gt => Ok(Value::Bool(a > b)),
            BinaryOp::Ge => Ok(Value::Bool(a >= b)),
            _ => Err(invalid_operands(op, left, right)),
        },
        (Value::List(a), Value::List(b)) if op == BinaryOp::Add => {
            Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => Err(invalid_operands(op, left, right)),
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> Result<Value, String> {
    Ok(match op {
        BinaryOp::Add => Value::Int(a.wrapping_add(b)),
        BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
        BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err("integer divide by zero".into()),
        BinaryOp::Div => Value::Int(a.wrapping_div(b)),
        BinaryOp::Rem => Value::Int(a.wrapping_rem(b)),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::Le => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::Ge => Value::Bool(a >= b),
        BinaryOp::Eq => Value::Bool(a == b),
        BinaryOp::Ne => Value::Bool(a != b),
    })
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> Result<Value, String> {
    Ok(match op {
        BinaryOp::Add => Value::Float(a + b),
        BinaryOp::Sub => Value::Float(a - b),
        BinaryOp::Mul => Value::Float(a * b),
        BinaryOp::Div => Value::Float(a / b),
        BinaryOp::Rem => Value::Float(a % b),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::Le => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::Ge => Value::Bool(a >= b),
        BinaryOp::Eq => Value::Bool(a == b),
        BinaryOp::Ne => Value::Bool(a != b),
    })
}

/// Equality with integer/float promotion
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        _ => left == right,
    }
}

fn invalid_operands(op: BinaryOp, left: &Value, right: &Value) -> String {
    format!(
        "invalid operands for {:?}: {} and {}",
        op,
        left.type_name(),
        right.type_name()
    )
}
