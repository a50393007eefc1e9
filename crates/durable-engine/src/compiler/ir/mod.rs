//! Intermediate Representation (IR)
//!
//! Three-address code in basic blocks, shared by the lowering pass, the
//! liveness analysis, the state machine transform and the interpreter.
//!
//! # Structure
//!
//! - `IrFunction` - A function with its blocks and suspension points
//! - `BasicBlock` - A sequence of instructions with a single entry and exit
//! - `IrInstr` - Three-address code instructions
//! - `Register` - Virtual registers, which double as frame slots

pub mod block;
pub mod function;
pub mod instr;
pub mod pretty;

pub use block::{BasicBlock, BasicBlockId, BlockKind, Terminator};
pub use function::{FunctionKind, IrFunction, SuspensionKind, SuspensionPoint};
pub use instr::{IrConstant, IrInstr, Register, SuspendOp};
pub use pretty::PrettyPrint;
