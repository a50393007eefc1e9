//! IR Instructions
//!
//! Three-address instructions over virtual registers. Registers double as frame
//! slots: a local live across a suspension point is saved under its register
//! number and loaded back into the same register on resume.

use std::fmt;

use crate::compiler::ast::{BinaryOp, UnaryOp};
use crate::vm::types::FunctionKey;

/// Virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(pub u32);

impl Register {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Constant operand
#[derive(Debug, Clone, PartialEq)]
pub enum IrConstant {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Operation that suspends the current frame
#[derive(Debug, Clone, PartialEq)]
pub enum SuspendOp {
    /// Hand `value` to the consumer
    Yield { value: Register },
    /// Push a frame for a durable callee
    Call {
        function: FunctionKey,
        args: Vec<Register>,
    },
    /// Call through a function value; suspends only if the callee is durable
    CallDynamic { callee: Register, args: Vec<Register> },
}

impl SuspendOp {
    /// Registers read by the operation
    pub fn uses(&self) -> Vec<Register> {
        match self {
            SuspendOp::Yield { value } => vec![*value],
            SuspendOp::Call { args, .. } => args.clone(),
            SuspendOp::CallDynamic { callee, args } => {
                let mut uses = Vec::with_capacity(args.len() + 1);
                uses.push(*callee);
                uses.extend_from_slice(args);
                uses
            }
        }
    }
}

/// IR instruction
#[derive(Debug, Clone, PartialEq)]
pub enum IrInstr {
    Const {
        dest: Register,
        value: IrConstant,
    },
    Move {
        dest: Register,
        src: Register,
    },
    Binary {
        dest: Register,
        op: BinaryOp,
        left: Register,
        right: Register,
    },
    Unary {
        dest: Register,
        op: UnaryOp,
        operand: Register,
    },
    MakeList {
        dest: Register,
        items: Vec<Register>,
    },
    MakeMap {
        dest: Register,
        entries: Vec<(Register, Register)>,
    },
    MakeStruct {
        dest: Register,
        name: String,
        fields: Vec<(String, Register)>,
    },
    GetField {
        dest: Register,
        object: Register,
        field: String,
    },
    /// Update a field of the struct held in `object`, in place
    SetField {
        object: Register,
        field: String,
        value: Register,
    },
    GetIndex {
        dest: Register,
        object: Register,
        index: Register,
    },
    /// Update an element of the list or map held in `object`, in place
    SetIndex {
        object: Register,
        index: Register,
        value: Register,
    },

    // ===== Heap cells =====
    NewCell {
        dest: Register,
        init: Register,
    },
    LoadCell {
        dest: Register,
        cell: Register,
    },
    StoreCell {
        cell: Register,
        value: Register,
    },

    // ===== Functions =====
    MakeClosure {
        dest: Register,
        function: FunctionKey,
        captures: Vec<Register>,
    },
    CallNative {
        dest: Register,
        name: String,
        args: Vec<Register>,
    },
    /// Call a non-suspending function to completion
    CallPlain {
        dest: Register,
        function: FunctionKey,
        args: Vec<Register>,
    },
    /// Call a function value from a plain function
    CallDynamic {
        dest: Register,
        callee: Register,
        args: Vec<Register>,
    },
    /// Register a call to run when the (plain) function returns
    Defer {
        callee: Register,
        args: Vec<Register>,
    },

    // ===== Dynamic types =====
    Box {
        dest: Register,
        type_id: String,
        src: Register,
    },
    Unbox {
        dest: Register,
        type_id: String,
        src: Register,
    },
    IsType {
        dest: Register,
        type_id: String,
        src: Register,
    },

    /// Suspension point, before the state machine transform
    ///
    /// `dest` receives the resume value (for yields) or the callee's result.
    Suspend {
        dest: Register,
        op: SuspendOp,
        point: u32,
    },

    // ===== State machine (inserted by the transform) =====
    LoadResumePoint {
        dest: Register,
    },
    /// Record where the frame continues; clears previously saved locals
    StoreResumePoint {
        point: u32,
    },
    LoadLocal {
        dest: Register,
        slot: u32,
    },
    StoreLocal {
        slot: u32,
        src: Register,
    },
    /// Value the frame was resumed with
    LoadResumeValue {
        dest: Register,
    },
}

impl IrInstr {
    /// Register written by the instruction, if any
    pub fn dest(&self) -> Option<Register> {
        match self {
            IrInstr::Const { dest, .. }
            | IrInstr::Move { dest, .. }
            | IrInstr::Binary { dest, .. }
            | IrInstr::Unary { dest, .. }
            | IrInstr::MakeList { dest, .. }
            | IrInstr::MakeMap { dest, .. }
            | IrInstr::MakeStruct { dest, .. }
            | IrInstr::GetField { dest, .. }
            | IrInstr::GetIndex { dest, .. }
            | IrInstr::NewCell { dest, .. }
            | IrInstr::LoadCell { dest, .. }
            | IrInstr::MakeClosure { dest, .. }
            | IrInstr::CallNative { dest, .. }
            | IrInstr::CallPlain { dest, .. }
            | IrInstr::CallDynamic { dest, .. }
            | IrInstr::Box { dest, .. }
            | IrInstr::Unbox { dest, .. }
            | IrInstr::IsType { dest, .. }
            | IrInstr::Suspend { dest, .. }
            | IrInstr::LoadResumePoint { dest }
            | IrInstr::LoadLocal { dest, .. }
            | IrInstr::LoadResumeValue { dest } => Some(*dest),
            IrInstr::SetField { .. }
            | IrInstr::SetIndex { .. }
            | IrInstr::StoreCell { .. }
            | IrInstr::Defer { .. }
            | IrInstr::StoreResumePoint { .. }
            | IrInstr::StoreLocal { .. } => None,
        }
    }

    /// Registers read by the instruction
    ///
    /// In-place updates (`SetField`, `SetIndex`) read their object register too,
    /// since the rest of the aggregate flows through.
    pub fn uses(&self) -> Vec<Register> {
        match self {
            IrInstr::Const { .. }
            | IrInstr::LoadResumePoint { .. }
            | IrInstr::StoreResumePoint { .. }
            | IrInstr::LoadLocal { .. }
            | IrInstr::LoadResumeValue { .. } => Vec::new(),
            IrInstr::Move { src, .. }
            | IrInstr::Box { src, .. }
            | IrInstr::Unbox { src, .. }
            | IrInstr::IsType { src, .. }
            | IrInstr::StoreLocal { src, .. } => vec![*src],
            IrInstr::Unary { operand, .. } => vec![*operand],
            IrInstr::Binary { left, right, .. } => vec![*left, *right],
            IrInstr::MakeList { items, .. } => items.clone(),
            IrInstr::MakeMap { entries, .. } => {
                entries.iter().flat_map(|(k, v)| [*k, *v]).collect()
            }
            IrInstr::MakeStruct { fields, .. } => fields.iter().map(|(_, r)| *r).collect(),
            IrInstr::GetField { object, .. } => vec![*object],
            IrInstr::SetField { object, value, .. } => vec![*object, *value],
            IrInstr::GetIndex { object, index, .. } => vec![*object, *index],
            IrInstr::SetIndex {
                object,
                index,
                value,
            } => vec![*object, *index, *value],
            IrInstr::NewCell { init, .. } => vec![*init],
            IrInstr::LoadCell { cell, .. } => vec![*cell],
            IrInstr::StoreCell { cell, value } => vec![*cell, *value],
            IrInstr::MakeClosure { captures, .. } => captures.clone(),
            IrInstr::CallNative { args, .. } | IrInstr::CallPlain { args, .. } => args.clone(),
            IrInstr::CallDynamic { callee, args, .. } | IrInstr::Defer { callee, args } => {
                let mut uses = Vec::with_capacity(args.len() + 1);
                uses.push(*callee);
                uses.extend_from_slice(args);
                uses
            }
            IrInstr::Suspend { op, .. } => op.uses(),
        }
    }

    /// Registers whose value this instruction overwrites
    ///
    /// In-place updates modify their object register but keep it live.
    pub fn defs(&self) -> Vec<Register> {
        match self {
            IrInstr::SetField { object, .. } | IrInstr::SetIndex { object, .. } => vec![*object],
            _ => self.dest().into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dest_and_uses() {
        let instr = IrInstr::Binary {
            dest: Register(2),
            op: BinaryOp::Add,
            left: Register(0),
            right: Register(1),
        };
        assert_eq!(instr.dest(), Some(Register(2)));
        assert_eq!(instr.uses(), vec![Register(0), Register(1)]);

        let store = IrInstr::SetIndex {
            object: Register(3),
            index: Register(4),
            value: Register(5),
        };
        assert_eq!(store.dest(), None);
        assert_eq!(store.defs(), vec![Register(3)]);
        assert!(store.uses().contains(&Register(3)));
    }

    #[test]
    fn test_suspend_uses() {
        let op = SuspendOp::CallDynamic {
            callee: Register(1),
            args: vec![Register(2)],
        };
        assert_eq!(op.uses(), vec![Register(1), Register(2)]);
    }
}
