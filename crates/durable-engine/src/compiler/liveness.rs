//! Register liveness
//!
//! Classic backward dataflow over the block graph:
//!
//! ```text
//! live_out(b) = ∪ live_in(s) for s in successors(b)
//! live_in(b)  = uses(b) ∪ (live_out(b) − defs(b))
//! ```
//!
//! Iterated to a fixpoint. The live set of a suspension point is what is live
//! right after the `Suspend` instruction, minus the register that receives the
//! resume value: exactly the registers a frame must save.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::compiler::ir::{BasicBlock, IrFunction, IrInstr, Register};

/// Per-block live sets
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    live_in: Vec<FxHashSet<Register>>,
    live_out: Vec<FxHashSet<Register>>,
}

impl Liveness {
    /// Run the analysis to a fixpoint
    pub fn analyze(func: &IrFunction) -> Self {
        let count = func.blocks.len();
        let mut live_in = vec![FxHashSet::default(); count];
        let mut live_out: Vec<FxHashSet<Register>> = vec![FxHashSet::default(); count];

        let mut changed = true;
        while changed {
            changed = false;
            for block in func.blocks.iter().rev() {
                let index = block.id.index();
                let mut out = FxHashSet::default();
                for succ in block.successors() {
                    if let Some(set) = live_in.get(succ.index()) {
                        out.extend(set.iter().copied());
                    }
                }

                let inn = transfer(block, &out);
                if inn != live_in[index] || out != live_out[index] {
                    live_in[index] = inn;
                    live_out[index] = out;
                    changed = true;
                }
            }
        }

        Self { live_in, live_out }
    }

    pub fn live_in(&self, block: usize) -> Option<&FxHashSet<Register>> {
        self.live_in.get(block)
    }

    pub fn live_out(&self, block: usize) -> Option<&FxHashSet<Register>> {
        self.live_out.get(block)
    }

    /// Registers to save at each suspension point, ascending, keyed by point
    pub fn suspension_live_sets(&self, func: &IrFunction) -> FxHashMap<u32, Vec<Register>> {
        let mut sets = FxHashMap::default();
        for block in &func.blocks {
            let mut live = self.live_out[block.id.index()].clone();
            live.extend(block.terminator.uses());

            for instr in block.instructions.iter().rev() {
                if let IrInstr::Suspend { dest, point, .. } = instr {
                    let mut saved: Vec<Register> =
                        live.iter().copied().filter(|reg| reg != dest).collect();
                    saved.sort_unstable();
                    sets.insert(*point, saved);
                }
                step_backward(instr, &mut live);
            }
        }
        sets
    }
}

/// `live_in` of a block given its `live_out`
fn transfer(block: &BasicBlock, live_out: &FxHashSet<Register>) -> FxHashSet<Register> {
    let mut live = live_out.clone();
    live.extend(block.terminator.uses());
    for instr in block.instructions.iter().rev() {
        step_backward(instr, &mut live);
    }
    live
}

fn step_backward(instr: &IrInstr, live: &mut FxHashSet<Register>) {
    for def in instr.defs() {
        live.remove(&def);
    }
    live.extend(instr.uses());
}
