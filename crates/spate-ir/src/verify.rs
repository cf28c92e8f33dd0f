//! IR structural invariant checks
//!
//! A pure analysis over a built program. Every check mirrors a guarantee
//! the lowering makes on successful output:
//! - value numbers are unique and below `next_valnum`
//! - every argument resolves to a statement in a live block
//! - phis pair one argument with one predecessor block, and every listed
//!   predecessor really branches into the phi's block
//! - every block is reachable from an entry (unreachable removal has run)
//! - leaf blocks terminate their transaction
//! - timing barriers and timing-variable `uses` lists agree

use crate::ir::{BlockId, IrProgram, StatementKind};
use std::collections::{HashMap, HashSet};

/// A single invariant violation
#[derive(Debug, Clone)]
pub struct Violation {
    /// Description of the broken invariant
    pub message: String,
}

impl Violation {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Check every structural invariant; returns an empty list on a clean
/// program. The program's indexes must be live (`rebuild_indexes` after
/// deserialization).
pub fn check_program(prog: &IrProgram) -> Vec<Violation> {
    let mut violations = Vec::new();

    check_value_numbers(prog, &mut violations);
    check_args(prog, &mut violations);
    check_phis(prog, &mut violations);
    check_entry_closure(prog, &mut violations);
    check_termination(prog, &mut violations);
    check_timing_linkage(prog, &mut violations);

    violations
}

fn check_value_numbers(prog: &IrProgram, violations: &mut Vec<Violation>) {
    let mut seen = HashSet::new();
    for block in &prog.blocks {
        for stmt in &block.stmts {
            if !seen.insert(stmt.valnum) {
                violations.push(Violation::new(format!(
                    "duplicate value number v{}",
                    stmt.valnum.0
                )));
            }
            if stmt.valnum.0 >= prog.next_valnum {
                violations.push(Violation::new(format!(
                    "value number v{} is not below next_valnum {}",
                    stmt.valnum.0, prog.next_valnum
                )));
            }
        }
    }
}

fn check_args(prog: &IrProgram, violations: &mut Vec<Violation>) {
    for block in &prog.blocks {
        for stmt in &block.stmts {
            for arg in &stmt.args {
                if prog.stmt(*arg).is_none() {
                    violations.push(Violation::new(format!(
                        "v{} references dangling argument v{}",
                        stmt.valnum.0, arg.0
                    )));
                }
            }
        }
    }
}

fn check_phis(prog: &IrProgram, violations: &mut Vec<Violation>) {
    // Predecessors by successor derivation.
    let mut preds: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for block in &prog.blocks {
        for succ in block.successors() {
            preds.entry(succ).or_default().insert(block.id);
        }
    }

    for block in &prog.blocks {
        for stmt in &block.stmts {
            if stmt.kind != StatementKind::Phi {
                continue;
            }
            if stmt.args.len() != stmt.targets.len() {
                violations.push(Violation::new(format!(
                    "phi v{} has {} args but {} predecessor targets",
                    stmt.valnum.0,
                    stmt.args.len(),
                    stmt.targets.len()
                )));
            }
            if stmt.targets.len() != stmt.target_labels.len() {
                violations.push(Violation::new(format!(
                    "phi v{} target labels out of step with targets",
                    stmt.valnum.0
                )));
            }
            let block_preds = preds.get(&block.id);
            for target in &stmt.targets {
                let is_pred = block_preds.map(|p| p.contains(target)).unwrap_or(false);
                if !is_pred {
                    violations.push(Violation::new(format!(
                        "phi v{} lists block {} which is not a predecessor of '{}'",
                        stmt.valnum.0, target.0, block.label
                    )));
                }
            }
        }
    }
}

fn check_entry_closure(prog: &IrProgram, violations: &mut Vec<Violation>) {
    let mut reachable: HashSet<BlockId> = HashSet::new();
    let mut worklist: Vec<BlockId> = prog.entries.clone();
    while let Some(bb) = worklist.pop() {
        if !reachable.insert(bb) {
            continue;
        }
        worklist.extend(prog.successors(bb));
    }
    for block in &prog.blocks {
        if !reachable.contains(&block.id) {
            violations.push(Violation::new(format!(
                "block '{}' is unreachable from every entry",
                block.label
            )));
        }
        if block.is_entry != prog.entries.contains(&block.id) {
            violations.push(Violation::new(format!(
                "block '{}' entry flag disagrees with the program entry list",
                block.label
            )));
        }
    }
}

fn check_termination(prog: &IrProgram, violations: &mut Vec<Violation>) {
    for block in &prog.blocks {
        if !block.successors().is_empty() {
            continue;
        }
        let terminates = block
            .stmts
            .iter()
            .any(|s| matches!(s.kind, StatementKind::Done | StatementKind::Kill));
        if !terminates {
            violations.push(Violation::new(format!(
                "leaf block '{}' does not terminate its transaction",
                block.label
            )));
        }
    }
}

fn check_timing_linkage(prog: &IrProgram, violations: &mut Vec<Violation>) {
    for block in &prog.blocks {
        for stmt in &block.stmts {
            if stmt.kind != StatementKind::TimingBarrier {
                continue;
            }
            let linked = stmt
                .timevar
                .as_ref()
                .and_then(|name| prog.timevars.get(name))
                .map(|tv| tv.uses.contains(&stmt.valnum))
                .unwrap_or(false);
            if !linked {
                violations.push(Violation::new(format!(
                    "barrier v{} is not listed by its timing variable",
                    stmt.valnum.0
                )));
            }
        }
    }
    for timevar in prog.timevars.values() {
        for use_val in &timevar.uses {
            let is_barrier = prog
                .stmt(*use_val)
                .map(|s| s.kind == StatementKind::TimingBarrier)
                .unwrap_or(false);
            if !is_barrier {
                violations.push(Violation::new(format!(
                    "timing variable '{}' lists v{} which is not a live barrier",
                    timevar.name, use_val.0
                )));
            }
        }
    }
}
