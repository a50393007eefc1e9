//! Basic Blocks and Control Flow
//!
//! Basic blocks are sequences of instructions with a single entry point
//! and a single exit point (the terminator).

use super::instr::{IrInstr, Register, SuspendOp};

/// Basic block identifier; also the block's index in its function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BasicBlockId(pub u32);

impl BasicBlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BasicBlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Role of a block in a transformed function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Ordinary code
    Body,
    /// Reads the resume point and branches to entry or a restore block
    Dispatch,
    /// Loads parameters and captures out of the frame
    Entry,
    /// Saves live locals and suspends at the given point
    Save(u32),
    /// Reloads live locals after resuming at the given point
    Restore(u32),
}

/// A basic block: sequence of instructions with single entry and exit
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BasicBlockId,
    pub kind: BlockKind,
    pub label: Option<String>,
    pub instructions: Vec<IrInstr>,
    pub terminator: Terminator,
}

impl BasicBlock {
    /// Create a new empty body block
    pub fn new(id: BasicBlockId) -> Self {
        Self {
            id,
            kind: BlockKind::Body,
            label: None,
            instructions: Vec::new(),
            terminator: Terminator::Unreachable,
        }
    }

    /// Create a new block with a debugging label
    pub fn with_label(id: BasicBlockId, label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new(id)
        }
    }

    pub fn add_instr(&mut self, instr: IrInstr) {
        self.instructions.push(instr);
    }

    pub fn set_terminator(&mut self, term: Terminator) {
        self.terminator = term;
    }

    pub fn successors(&self) -> Vec<BasicBlockId> {
        self.terminator.successors()
    }

    /// Check if this block is terminated (not unreachable)
    pub fn is_terminated(&self) -> bool {
        !matches!(self.terminator, Terminator::Unreachable)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Control flow terminator (ends a basic block)
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Jump(BasicBlockId),

    /// Conditional branch on truthiness of `cond`
    Branch {
        cond: Register,
        then_block: BasicBlockId,
        else_block: BasicBlockId,
    },

    /// Jump to `targets[index]`, or `default` when out of range
    BrTable {
        index: Register,
        targets: Vec<BasicBlockId>,
        default: BasicBlockId,
    },

    /// Return from function with optional value (nil when absent)
    Return(Option<Register>),

    /// Leave the frame suspended; only emitted by the state machine transform
    Suspend(SuspendOp),

    /// Placeholder before the terminator is set, or a trap
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BasicBlockId> {
        match self {
            Terminator::Jump(target) => vec![*target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::BrTable {
                targets, default, ..
            } => {
                let mut succs = targets.clone();
                succs.push(*default);
                succs
            }
            Terminator::Return(_) | Terminator::Suspend(_) | Terminator::Unreachable => vec![],
        }
    }

    pub fn uses(&self) -> Vec<Register> {
        match self {
            Terminator::Branch { cond, .. } => vec![*cond],
            Terminator::BrTable { index, .. } => vec![*index],
            Terminator::Return(Some(value)) => vec![*value],
            Terminator::Suspend(op) => op.uses(),
            Terminator::Jump(_) | Terminator::Return(None) | Terminator::Unreachable => vec![],
        }
    }
}
