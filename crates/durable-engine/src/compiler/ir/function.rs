//! IR Function representation

use super::block::{BasicBlock, BasicBlockId, BlockKind};
use super::instr::{IrInstr, Register};
use crate::compiler::ast::Span;
use crate::vm::types::FunctionKey;

/// Whether a function was rewritten into a state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// May suspend; runs as a frame on the coroutine stack
    Durable,
    /// Never suspends; runs to completion on the host stack
    Plain,
}

/// What suspends at a suspension point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionKind {
    Yield,
    Call,
    DynamicCall,
}

/// A suspension point of a durable function
#[derive(Debug, Clone, PartialEq)]
pub struct SuspensionPoint {
    /// Resume point id, starting at 1
    pub point: u32,
    pub kind: SuspensionKind,
    /// Registers saved into the frame, ascending
    pub live: Vec<Register>,
    pub span: Span,
}

/// A function in IR form
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub key: FunctionKey,
    pub kind: FunctionKind,
    /// Number of parameters; they occupy registers `0..param_count`
    pub param_count: u32,
    /// Number of captures; they follow the parameters
    pub capture_count: u32,
    /// Total registers used
    pub register_count: u32,
    /// Blocks, indexed by `BasicBlockId`
    pub blocks: Vec<BasicBlock>,
    /// First block executed on every activation
    pub entry: BasicBlockId,
    /// Suspension points ordered by id
    pub suspension_points: Vec<SuspensionPoint>,
    pub span: Span,
}

impl IrFunction {
    pub fn new(key: FunctionKey, kind: FunctionKind, param_count: u32, capture_count: u32) -> Self {
        Self {
            key,
            kind,
            param_count,
            capture_count,
            register_count: param_count + capture_count,
            blocks: Vec::new(),
            entry: BasicBlockId(0),
            suspension_points: Vec::new(),
            span: Span::default(),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.kind == FunctionKind::Durable
    }

    /// Number of values an activation is entered with
    pub fn entry_arity(&self) -> u32 {
        self.param_count + self.capture_count
    }

    pub fn block(&self, id: BasicBlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index())
    }

    pub fn block_mut(&mut self, id: BasicBlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id.index())
    }

    /// Append a new empty block and return its id
    pub fn add_block(&mut self, kind: BlockKind, label: Option<String>) -> BasicBlockId {
        let id = BasicBlockId(self.blocks.len() as u32);
        let mut block = BasicBlock::new(id);
        block.kind = kind;
        block.label = label;
        self.blocks.push(block);
        id
    }

    /// Allocate a fresh register
    pub fn alloc_register(&mut self) -> Register {
        let reg = Register(self.register_count);
        self.register_count += 1;
        reg
    }

    /// Resume point ids, ascending
    pub fn resume_points(&self) -> Vec<u32> {
        self.suspension_points.iter().map(|p| p.point).collect()
    }

    pub fn suspension_point(&self, point: u32) -> Option<&SuspensionPoint> {
        self.suspension_points.iter().find(|p| p.point == point)
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// Iterate over every instruction in block order
    pub fn instructions(&self) -> impl Iterator<Item = &IrInstr> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_start_after_params_and_captures() {
        let mut func = IrFunction::new(FunctionKey::new("main.f"), FunctionKind::Plain, 2, 1);
        assert_eq!(func.entry_arity(), 3);
        assert_eq!(func.alloc_register(), Register(3));
        assert_eq!(func.register_count, 4);
    }

    #[test]
    fn test_add_block_indexes() {
        let mut func = IrFunction::new(FunctionKey::new("main.f"), FunctionKind::Durable, 0, 0);
        let a = func.add_block(BlockKind::Body, None);
        let b = func.add_block(BlockKind::Dispatch, Some("dispatch".into()));
        assert_eq!(a, BasicBlockId(0));
        assert_eq!(b, BasicBlockId(1));
        assert_eq!(func.block(b).map(|blk| blk.kind), Some(BlockKind::Dispatch));
    }
}
