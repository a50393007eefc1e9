//! State machine transform
//!
//! Rewrites a durable function so that every activation, first entry or
//! resume, starts at the same dispatch block:
//!
//! ```text
//! [Dispatch] ── resume_point=0 ──→ [Entry] → original entry block
//!     ├── resume_point=1 ──→ [Restore_1] → [Continuation_1]
//!     ├── resume_point=2 ──→ [Restore_2] → [Continuation_2]
//!     └── otherwise ──→ trap
//!
//! Each suspension splits its block:
//!   [Pre-suspend body] → [Save_N] → suspend
//!                        [Restore_N] → [Post-suspend body]
//! ```
//!
//! Save blocks record the resume point, store the live registers into the
//! frame and end in a `Suspend` terminator. Restore blocks load the same
//! registers back and read the resume value into the suspension's destination.

use rustc_hash::FxHashMap;

use crate::compiler::ir::{
    BasicBlockId, BlockKind, IrFunction, IrInstr, Register, Terminator,
};
use crate::compiler::liveness::Liveness;

/// Transform a durable function in place
///
/// Plain functions are left untouched.
pub fn transform(func: &mut IrFunction) {
    if !func.is_durable() {
        return;
    }

    let liveness = Liveness::analyze(func);
    let live_sets = liveness.suspension_live_sets(func);
    for point in &mut func.suspension_points {
        point.live = live_sets.get(&point.point).cloned().unwrap_or_default();
    }

    let body_entry = func.entry;
    let original_blocks = func.blocks.len();
    let mut restores: FxHashMap<u32, BasicBlockId> = FxHashMap::default();
    for index in 0..original_blocks {
        split_at_suspensions(func, BasicBlockId(index as u32), &live_sets, &mut restores);
    }

    // Parameters and captures come out of the frame on first entry.
    let entry = func.add_block(BlockKind::Entry, Some("frame.entry".to_string()));
    let arity = func.entry_arity();
    if let Some(block) = func.block_mut(entry) {
        for slot in 0..arity {
            block.add_instr(IrInstr::LoadLocal {
                dest: Register(slot),
                slot,
            });
        }
        block.set_terminator(Terminator::Jump(body_entry));
    }

    // Unknown resume points land here and trap.
    let trap = func.add_block(BlockKind::Body, Some("dispatch.invalid".to_string()));

    let dispatch = func.add_block(BlockKind::Dispatch, Some("dispatch".to_string()));
    let resume_point = func.alloc_register();
    let mut targets = vec![entry];
    for point in func.resume_points() {
        targets.push(restores.get(&point).copied().unwrap_or(trap));
    }
    if let Some(block) = func.block_mut(dispatch) {
        block.add_instr(IrInstr::LoadResumePoint { dest: resume_point });
        block.set_terminator(Terminator::BrTable {
            index: resume_point,
            targets,
            default: trap,
        });
    }
    func.entry = dispatch;

    tracing::trace!(
        function = %func.key,
        resume_points = func.suspension_points.len(),
        blocks = func.blocks.len(),
        "built state machine\n{}",
        func
    );
}

fn split_at_suspensions(
    func: &mut IrFunction,
    id: BasicBlockId,
    live_sets: &FxHashMap<u32, Vec<Register>>,
    restores: &mut FxHashMap<u32, BasicBlockId>,
) {
    let has_suspension = func.block(id).is_some_and(|block| {
        block
            .instructions
            .iter()
            .any(|instr| matches!(instr, IrInstr::Suspend { .. }))
    });
    if !has_suspension {
        return;
    }

    let (instructions, terminator) = match func.block_mut(id) {
        Some(block) => (
            std::mem::take(&mut block.instructions),
            std::mem::replace(&mut block.terminator, Terminator::Unreachable),
        ),
        None => return,
    };

    let mut current = id;
    let mut segment = Vec::new();
    for instr in instructions {
        let IrInstr::Suspend { dest, op, point } = instr else {
            segment.push(instr);
            continue;
        };
        let live = live_sets.get(&point).cloned().unwrap_or_default();

        let save = func.add_block(BlockKind::Save(point), Some(format!("save.{}", point)));
        let restore = func.add_block(BlockKind::Restore(point), Some(format!("restore.{}", point)));
        let continuation = func.add_block(BlockKind::Body, Some(format!("resume.{}", point)));

        if let Some(block) = func.block_mut(current) {
            block.instructions = std::mem::take(&mut segment);
            block.set_terminator(Terminator::Jump(save));
        }

        if let Some(block) = func.block_mut(save) {
            // Recording the point clears earlier saves, so it goes first.
            block.add_instr(IrInstr::StoreResumePoint { point });
            for &reg in &live {
                block.add_instr(IrInstr::StoreLocal { slot: reg.0, src: reg });
            }
            block.set_terminator(Terminator::Suspend(op));
        }

        if let Some(block) = func.block_mut(restore) {
            for &reg in &live {
                block.add_instr(IrInstr::LoadLocal { dest: reg, slot: reg.0 });
            }
            block.add_instr(IrInstr::LoadResumeValue { dest });
            block.set_terminator(Terminator::Jump(continuation));
        }

        restores.insert(point, restore);
        current = continuation;
    }

    if let Some(block) = func.block_mut(current) {
        block.instructions = segment;
        block.set_terminator(terminator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::BinaryOp;
    use crate::compiler::ir::{FunctionKind, IrConstant, SuspendOp, SuspensionKind, SuspensionPoint};
    use crate::compiler::Span;
    use crate::vm::types::FunctionKey;

    /// fn(p) { let a = p + 1; let b = yield a; return a + b }
    fn generator() -> IrFunction {
        let mut func = IrFunction::new(FunctionKey::new("main.g"), FunctionKind::Durable, 1, 0);
        let entry = func.add_block(BlockKind::Body, None);
        func.entry = entry;
        let one = func.alloc_register();
        let a = func.alloc_register();
        let b = func.alloc_register();
        let sum = func.alloc_register();
        let block = func.block_mut(entry).unwrap();
        block.add_instr(IrInstr::Const {
            dest: one,
            value: IrConstant::Int(1),
        });
        block.add_instr(IrInstr::Binary {
            dest: a,
            op: BinaryOp::Add,
            left: Register(0),
            right: one,
        });
        block.add_instr(IrInstr::Suspend {
            dest: b,
            op: SuspendOp::Yield { value: a },
            point: 1,
        });
        block.add_instr(IrInstr::Binary {
            dest: sum,
            op: BinaryOp::Add,
            left: a,
            right: b,
        });
        block.set_terminator(Terminator::Return(Some(sum)));
        func.suspension_points.push(SuspensionPoint {
            point: 1,
            kind: SuspensionKind::Yield,
            live: Vec::new(),
            span: Span::default(),
        });
        func
    }

    #[test]
    fn test_dispatch_targets_entry_and_restores() {
        let mut func = generator();
        transform(&mut func);

        let dispatch = func.block(func.entry).unwrap();
        assert_eq!(dispatch.kind, BlockKind::Dispatch);
        let Terminator::BrTable { targets, default, .. } = &dispatch.terminator else {
            panic!("dispatch must end in a branch table");
        };
        assert_eq!(targets.len(), 2);
        assert_eq!(func.block(targets[0]).unwrap().kind, BlockKind::Entry);
        assert_eq!(func.block(targets[1]).unwrap().kind, BlockKind::Restore(1));
        assert_eq!(func.block(*default).unwrap().terminator, Terminator::Unreachable);
    }

    #[test]
    fn test_save_block_stores_live_registers() {
        let mut func = generator();
        transform(&mut func);

        // Only `a` (r2) survives the yield.
        assert_eq!(func.suspension_points[0].live, vec![Register(2)]);
        let save = func
            .blocks
            .iter()
            .find(|b| b.kind == BlockKind::Save(1))
            .unwrap();
        assert_eq!(
            save.instructions,
            vec![
                IrInstr::StoreResumePoint { point: 1 },
                IrInstr::StoreLocal {
                    slot: 2,
                    src: Register(2)
                },
            ]
        );
        assert!(matches!(save.terminator, Terminator::Suspend(SuspendOp::Yield { .. })));

        let restore = func
            .blocks
            .iter()
            .find(|b| b.kind == BlockKind::Restore(1))
            .unwrap();
        assert_eq!(
            restore.instructions.last(),
            Some(&IrInstr::LoadResumeValue { dest: Register(3) })
        );
    }

    #[test]
    fn test_no_suspend_instructions_remain() {
        let mut func = generator();
        transform(&mut func);
        assert!(!func
            .instructions()
            .any(|instr| matches!(instr, IrInstr::Suspend { .. })));
    }

    #[test]
    fn test_plain_functions_are_untouched() {
        let mut func = IrFunction::new(FunctionKey::new("main.p"), FunctionKind::Plain, 0, 0);
        func.add_block(BlockKind::Body, None);
        let before = func.clone();
        transform(&mut func);
        assert_eq!(func, before);
    }
}
