//! Tests for post-lowering cleanup, determinism, and serialization

mod common;

use common::*;
use spate_frontend::ast::{Ast, ExprOp, InferredType, StmtKind};
use spate_ir::{check_program, IrPass, IrProgram, StatementKind, UnreachableBlockElimination};

fn build_looping_program() -> Ast {
    // let x = 0; let c = 1; while (c) { if (c) { break; } x = x + 1; }
    let mut b = AstBuilder::new();
    let zero = b.constant(0, 32);
    let let_x = b.let_stmt("x", InferredType::bits(32), zero);
    let c_init = b.constant(1, 1);
    let let_c = b.let_stmt("c", InferredType::bits(1), c_init);

    let brk = b.break_stmt(None);
    let brk_block = b.block(vec![brk]);
    let c1 = b.var(let_c, InferredType::bits(1));
    let if_stmt = b.if_stmt(c1, brk_block, None);

    let x_read = b.var(let_x, InferredType::bits(32));
    let one = b.constant(1, 32);
    let plus = b.binop(ExprOp::Add, x_read, one, 32);
    let x_lhs = b.var(let_x, InferredType::bits(32));
    let assign = b.assign(x_lhs, plus);

    let loop_body = b.block(vec![if_stmt, assign]);
    let c2 = b.var(let_c, InferredType::bits(1));
    let while_stmt = b.while_stmt(c2, loop_body, None);
    let body = b.block(vec![let_x, let_c, while_stmt]);
    b.entry_func("f", body);
    b.ast
}

#[test]
fn cleanup_leaves_no_unreachable_blocks() {
    let mut ast = build_looping_program();
    let prog = lower_ok(&mut ast);
    assert!(prog
        .blocks
        .iter()
        .all(|b| !b.label.starts_with("unreachable")));
    assert!(check_program(&prog).is_empty());
}

#[test]
fn cleanup_is_idempotent() {
    let mut ast = build_looping_program();
    let mut prog = lower_ok(&mut ast);

    let before = serde_json::to_string(&prog).expect("serialize");
    let result = UnreachableBlockElimination.apply(&mut prog);
    assert!(!result.changed);
    assert_eq!(result.stats.phi_inputs_removed, 0);
    let after = serde_json::to_string(&prog).expect("serialize");
    assert_eq!(before, after);
}

#[test]
fn lowering_is_deterministic() {
    let mut first_ast = build_looping_program();
    let first = lower_ok(&mut first_ast);
    let mut second_ast = build_looping_program();
    let second = lower_ok(&mut second_ast);

    let first_json = serde_json::to_string(&first).expect("serialize");
    let second_json = serde_json::to_string(&second).expect("serialize");
    assert_eq!(first_json, second_json);
}

#[test]
fn programs_round_trip_through_serde() {
    let mut ast = build_looping_program();
    let prog = lower_ok(&mut ast);

    let json = serde_json::to_string(&prog).expect("serialize");
    let mut restored: IrProgram = serde_json::from_str(&json).expect("deserialize");
    restored.rebuild_indexes();

    assert_eq!(restored.next_valnum, prog.next_valnum);
    assert_eq!(restored.blocks.len(), prog.blocks.len());
    assert!(check_program(&restored).is_empty());

    // Value numbers are stable: every statement resolves to the same kind.
    for block in &prog.blocks {
        for stmt in &block.stmts {
            let restored_stmt = restored.stmt(stmt.valnum).expect("resolvable value");
            assert_eq!(restored_stmt.kind, stmt.kind);
            assert_eq!(restored_stmt.args, stmt.args);
        }
    }
}

#[test]
fn spawn_targets_survive_cleanup_only_when_the_spawn_does() {
    // if (c) {} else {}  with a spawn inside an unreachable arm pruned by a
    // break-style dead block cannot be built from source; instead check the
    // reachable case: a spawn in live code roots its target.
    let mut b = AstBuilder::new();
    let kill = b.stmt(StmtKind::Kill);
    let spawn_body = b.block(vec![kill]);
    let spawn = b.stmt(StmtKind::Spawn { body: spawn_body });
    let body = b.block(vec![spawn]);
    b.entry_func("f", body);

    let prog = lower_ok(&mut b.ast);
    assert_eq!(prog.blocks.len(), 2);
    let spawn_bb = block_by_prefix(&prog, "spawn");
    assert_eq!(kinds(spawn_bb), vec![StatementKind::Kill]);
}

#[test]
fn entry_functions_each_root_their_own_blocks() {
    let mut b = AstBuilder::new();
    let body1 = b.block(vec![]);
    b.entry_func("first", body1);
    let body2 = b.block(vec![]);
    b.entry_func("second", body2);

    let prog = lower_ok(&mut b.ast);
    assert_eq!(prog.entries.len(), 2);
    assert_eq!(prog.blocks.len(), 2);
    assert_eq!(prog.block(prog.entries[0]).label, "first");
    assert_eq!(prog.block(prog.entries[1]).label, "second");
    for entry in &prog.entries {
        assert_eq!(kinds(prog.block(*entry)), vec![StatementKind::Done]);
    }
}
