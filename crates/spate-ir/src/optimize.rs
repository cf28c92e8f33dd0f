//! IR cleanup passes
//!
//! The only transformation performed after lowering is unreachable-block
//! removal; anything further is left to downstream consumers.

use crate::ir::{BlockId, IrProgram, StatementKind};
use std::collections::HashSet;
use tracing::debug;

/// A pass over a built IR program
pub trait IrPass {
    /// Apply the pass to the program
    fn apply(&self, prog: &mut IrProgram) -> PassResult;

    /// Get the name of this pass
    fn name(&self) -> &str;
}

/// Result of a pass
#[derive(Debug, Clone)]
pub struct PassResult {
    /// Whether the pass made changes
    pub changed: bool,
    /// Statistics about the pass
    pub stats: PassStats,
}

/// Statistics from a pass
#[derive(Debug, Clone, Default)]
pub struct PassStats {
    /// Number of blocks before the pass
    pub blocks_before: usize,
    /// Number of blocks after the pass
    pub blocks_after: usize,
    /// Phi argument slots removed
    pub phi_inputs_removed: usize,
}

/// Unreachable-block elimination
///
/// Marks every block reachable from an entry block, following branch, jump,
/// and spawn edges; a spawn roots a separate control path only when the
/// spawning statement itself is reachable, which keeps the pass idempotent.
/// Phi argument slots whose predecessor block is unreachable are pruned,
/// then unreachable blocks are deleted.
pub struct UnreachableBlockElimination;

impl IrPass for UnreachableBlockElimination {
    fn apply(&self, prog: &mut IrProgram) -> PassResult {
        let blocks_before = prog.blocks.len();

        let mut reachable: HashSet<BlockId> = HashSet::new();
        let mut worklist: Vec<BlockId> = prog.entries.clone();
        while let Some(bb) = worklist.pop() {
            if !reachable.insert(bb) {
                continue;
            }
            worklist.extend(prog.successors(bb));
        }

        // Drop phi inputs flowing in from unreachable predecessors.
        let mut phi_inputs_removed = 0;
        for block in &mut prog.blocks {
            if !reachable.contains(&block.id) {
                continue;
            }
            for stmt in &mut block.stmts {
                if stmt.kind != StatementKind::Phi {
                    continue;
                }
                let keep: Vec<bool> = stmt
                    .targets
                    .iter()
                    .map(|t| reachable.contains(t))
                    .collect();
                if keep.iter().all(|&k| k) {
                    continue;
                }
                phi_inputs_removed += keep.iter().filter(|&&k| !k).count();
                let mut keep_iter = keep.iter();
                stmt.args.retain(|_| *keep_iter.next().unwrap_or(&true));
                let mut keep_iter = keep.iter();
                stmt.targets.retain(|_| *keep_iter.next().unwrap_or(&true));
                let mut keep_iter = keep.iter();
                stmt.target_labels
                    .retain(|_| *keep_iter.next().unwrap_or(&true));
            }
        }

        prog.blocks.retain(|b| reachable.contains(&b.id));
        prog.rebuild_indexes();

        let blocks_after = prog.blocks.len();
        if blocks_before != blocks_after || phi_inputs_removed > 0 {
            debug!(
                removed = blocks_before - blocks_after,
                phi_inputs_removed, "swept unreachable blocks"
            );
        }
        PassResult {
            changed: blocks_before != blocks_after || phi_inputs_removed > 0,
            stats: PassStats {
                blocks_before,
                blocks_after,
                phi_inputs_removed,
            },
        }
    }

    fn name(&self) -> &str {
        "Unreachable Block Elimination"
    }
}
