//! Pretty-printing for IR
//!
//! Human-readable listings, used in compiler debug logs and test failures.

use std::fmt;

use super::block::{BasicBlock, BlockKind, Terminator};
use super::function::{FunctionKind, IrFunction};
use super::instr::{IrConstant, IrInstr, Register, SuspendOp};

/// Trait for pretty-printing IR constructs
pub trait PrettyPrint {
    fn pretty_print(&self) -> String;
}

impl<T: fmt::Display> PrettyPrint for T {
    fn pretty_print(&self) -> String {
        self.to_string()
    }
}

fn regs(list: &[Register]) -> String {
    list.iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for IrConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrConstant::Nil => write!(f, "nil"),
            IrConstant::Bool(b) => write!(f, "{}", b),
            IrConstant::Int(i) => write!(f, "{}", i),
            IrConstant::Float(x) => write!(f, "{:?}", x),
            IrConstant::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl fmt::Display for SuspendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendOp::Yield { value } => write!(f, "yield {}", value),
            SuspendOp::Call { function, args } => write!(f, "call {}({})", function, regs(args)),
            SuspendOp::CallDynamic { callee, args } => {
                write!(f, "call_dyn {}({})", callee, regs(args))
            }
        }
    }
}

impl fmt::Display for IrInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrInstr::Const { dest, value } => write!(f, "{} = const {}", dest, value),
            IrInstr::Move { dest, src } => write!(f, "{} = {}", dest, src),
            IrInstr::Binary {
                dest,
                op,
                left,
                right,
            } => write!(f, "{} = {:?} {}, {}", dest, op, left, right),
            IrInstr::Unary { dest, op, operand } => write!(f, "{} = {:?} {}", dest, op, operand),
            IrInstr::MakeList { dest, items } => write!(f, "{} = list [{}]", dest, regs(items)),
            IrInstr::MakeMap { dest, entries } => {
                let entries: Vec<String> =
                    entries.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{} = map {{{}}}", dest, entries.join(", "))
            }
            IrInstr::MakeStruct { dest, name, fields } => {
                let fields: Vec<String> =
                    fields.iter().map(|(n, r)| format!("{}: {}", n, r)).collect();
                write!(f, "{} = {} {{{}}}", dest, name, fields.join(", "))
            }
            IrInstr::GetField { dest, object, field } => {
                write!(f, "{} = {}.{}", dest, object, field)
            }
            IrInstr::SetField {
                object,
                field,
                value,
            } => write!(f, "{}.{} = {}", object, field, value),
            IrInstr::GetIndex {
                dest,
                object,
                index,
            } => write!(f, "{} = {}[{}]", dest, object, index),
            IrInstr::SetIndex {
                object,
                index,
                value,
            } => write!(f, "{}[{}] = {}", object, index, value),
            IrInstr::NewCell { dest, init } => write!(f, "{} = new_cell {}", dest, init),
            IrInstr::LoadCell { dest, cell } => write!(f, "{} = *{}", dest, cell),
            IrInstr::StoreCell { cell, value } => write!(f, "*{} = {}", cell, value),
            IrInstr::MakeClosure {
                dest,
                function,
                captures,
            } => write!(f, "{} = closure {} [{}]", dest, function, regs(captures)),
            IrInstr::CallNative { dest, name, args } => {
                write!(f, "{} = native {}({})", dest, name, regs(args))
            }
            IrInstr::CallPlain {
                dest,
                function,
                args,
            } => write!(f, "{} = call {}({})", dest, function, regs(args)),
            IrInstr::CallDynamic { dest, callee, args } => {
                write!(f, "{} = call_dyn {}({})", dest, callee, regs(args))
            }
            IrInstr::Defer { callee, args } => write!(f, "defer {}({})", callee, regs(args)),
            IrInstr::Box { dest, type_id, src } => write!(f, "{} = box<{}> {}", dest, type_id, src),
            IrInstr::Unbox { dest, type_id, src } => {
                write!(f, "{} = unbox<{}> {}", dest, type_id, src)
            }
            IrInstr::IsType { dest, type_id, src } => {
                write!(f, "{} = is<{}> {}", dest, type_id, src)
            }
            IrInstr::Suspend { dest, op, point } => write!(f, "{} = suspend#{} {}", dest, point, op),
            IrInstr::LoadResumePoint { dest } => write!(f, "{} = resume_point", dest),
            IrInstr::StoreResumePoint { point } => write!(f, "resume_point = {}", point),
            IrInstr::LoadLocal { dest, slot } => write!(f, "{} = frame[{}]", dest, slot),
            IrInstr::StoreLocal { slot, src } => write!(f, "frame[{}] = {}", slot, src),
            IrInstr::LoadResumeValue { dest } => write!(f, "{} = resume_value", dest),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump(target) => write!(f, "jump {}", target),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => write!(f, "branch {}, {}, {}", cond, then_block, else_block),
            Terminator::BrTable {
                index,
                targets,
                default,
            } => {
                let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
                write!(f, "br_table {} [{}] default {}", index, targets.join(", "), default)
            }
            Terminator::Return(Some(value)) => write!(f, "return {}", value),
            Terminator::Return(None) => write!(f, "return"),
            Terminator::Suspend(op) => write!(f, "suspend {}", op),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        match self.kind {
            BlockKind::Body => {}
            BlockKind::Dispatch => write!(f, " (dispatch)")?,
            BlockKind::Entry => write!(f, " (entry)")?,
            BlockKind::Save(point) => write!(f, " (save #{})", point)?,
            BlockKind::Restore(point) => write!(f, " (restore #{})", point)?,
        }
        if let Some(label) = &self.label {
            write!(f, " ; {}", label)?;
        }
        writeln!(f, ":")?;
        for instr in &self.instructions {
            writeln!(f, "    {}", instr)?;
        }
        writeln!(f, "    {}", self.terminator)
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FunctionKind::Durable => "durable",
            FunctionKind::Plain => "plain",
        };
        writeln!(
            f,
            "{} fn {} (params: {}, captures: {}, registers: {}) {{",
            kind, self.key, self.param_count, self.capture_count, self.register_count
        )?;
        for point in &self.suspension_points {
            writeln!(f, "  ; resume #{} {:?} live [{}]", point.point, point.kind, regs(&point.live))?;
        }
        for block in &self.blocks {
            write!(f, "  {}", block)?;
        }
        writeln!(f, "}}")
    }
}
