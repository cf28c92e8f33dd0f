//! SPATE IR - SSA intermediate representation
//!
//! This crate handles:
//! - the control-flow-graph SSA IR data model
//! - AST to IR lowering
//! - unreachable-block cleanup
//! - structural invariant checking

pub mod ast_to_ir;
pub mod bindings;
pub mod ir;
pub mod optimize;
pub mod verify;

// Re-export main types
pub use ast_to_ir::{AstToIr, LowerError};
pub use bindings::{BindingEnv, Overlay};
pub use ir::{
    BasicBlock, BlockId, IrOp, IrProgram, Statement, StatementKind, TimeVar, ValueId,
    TXN_ID_WIDTH,
};
pub use optimize::{IrPass, PassResult, PassStats, UnreachableBlockElimination};
pub use verify::{check_program, Violation};

use anyhow::Result;
use spate_frontend::ast::Ast;
use spate_frontend::diag::ErrorCollector;
use tracing::info;

/// Lower a typed AST to IR
///
/// Runs the lowering pass and sweeps unreachable blocks. Diagnostics land
/// in `errors`; on failure the partially built program is discarded.
pub fn lower_to_ir(ast: &mut Ast, errors: &mut ErrorCollector) -> Result<IrProgram> {
    let lowering = AstToIr::new(errors);
    let mut prog = lowering.lower(ast)?;
    let result = UnreachableBlockElimination.apply(&mut prog);
    info!(
        blocks = result.stats.blocks_after,
        stmts = prog.stmt_count(),
        "lowered program"
    );
    Ok(prog)
}
