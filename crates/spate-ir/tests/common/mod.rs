//! Shared helpers for building test ASTs and checking lowered programs
#![allow(dead_code)]

use spate_frontend::ast::{Ast, Expr, ExprId, ExprOp, FuncDef, InferredType, Stmt, StmtId, StmtKind};
use spate_frontend::diag::ErrorCollector;
use spate_frontend::span::SourceSpan;
use spate_ir::{check_program, BasicBlock, IrProgram, StatementKind};

/// Incremental AST construction for tests
pub struct AstBuilder {
    pub ast: Ast,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self { ast: Ast::new() }
    }

    pub fn constant(&mut self, value: i64, width: u32) -> ExprId {
        self.ast.add_expr(
            Expr::new(ExprOp::Const, InferredType::bits(width)).with_constant(value),
        )
    }

    pub fn var(&mut self, def: StmtId, ty: InferredType) -> ExprId {
        self.ast
            .add_expr(Expr::new(ExprOp::Var, ty).with_def(def))
    }

    pub fn binop(&mut self, op: ExprOp, lhs: ExprId, rhs: ExprId, width: u32) -> ExprId {
        self.ast.add_expr(
            Expr::new(op, InferredType::bits(width)).with_ops(vec![lhs, rhs]),
        )
    }

    /// Anonymous port definition expression
    pub fn port_def(&mut self, width: u32) -> ExprId {
        self.ast
            .add_expr(Expr::new(ExprOp::PortDef, InferredType::port(width)))
    }

    /// Named (exported) port definition expression
    pub fn named_port_def(&mut self, name: &str, width: u32) -> ExprId {
        self.ast.add_expr(
            Expr::new(ExprOp::PortDef, InferredType::port(width)).with_ident(name),
        )
    }

    /// Anonymous channel definition expression
    pub fn chan_def(&mut self, width: u32) -> ExprId {
        self.ast
            .add_expr(Expr::new(ExprOp::PortDef, InferredType::chan(width)))
    }

    pub fn port_read(&mut self, port: ExprId, width: u32) -> ExprId {
        self.ast.add_expr(
            Expr::new(ExprOp::PortRead, InferredType::bits(width)).with_ops(vec![port]),
        )
    }

    pub fn let_stmt(&mut self, name: &str, ty: InferredType, rhs: ExprId) -> StmtId {
        self.ast.add_stmt(Stmt::new(StmtKind::Let {
            name: name.to_string(),
            ty,
            rhs,
        }))
    }

    pub fn expr_stmt(&mut self, expr: ExprId) -> StmtId {
        self.ast.add_stmt(Stmt::new(StmtKind::Expr(expr)))
    }

    pub fn assign(&mut self, lhs: ExprId, rhs: ExprId) -> StmtId {
        self.ast.add_stmt(Stmt::new(StmtKind::Assign { lhs, rhs }))
    }

    pub fn write(&mut self, port: ExprId, rhs: ExprId) -> StmtId {
        self.ast.add_stmt(Stmt::new(StmtKind::Write { port, rhs }))
    }

    pub fn block(&mut self, stmts: Vec<StmtId>) -> StmtId {
        self.ast.add_stmt(Stmt::new(StmtKind::Block(stmts)))
    }

    pub fn if_stmt(&mut self, cond: ExprId, if_body: StmtId, else_body: Option<StmtId>) -> StmtId {
        self.ast.add_stmt(Stmt::new(StmtKind::If {
            cond,
            if_body,
            else_body,
        }))
    }

    pub fn while_stmt(&mut self, cond: ExprId, body: StmtId, label: Option<&str>) -> StmtId {
        self.ast.add_stmt(Stmt::new(StmtKind::While {
            cond,
            body,
            label: label.map(str::to_owned),
        }))
    }

    pub fn break_stmt(&mut self, label: Option<&str>) -> StmtId {
        self.ast.add_stmt(Stmt::new(StmtKind::Break {
            label: label.map(str::to_owned),
        }))
    }

    pub fn continue_stmt(&mut self, label: Option<&str>) -> StmtId {
        self.ast.add_stmt(Stmt::new(StmtKind::Continue {
            label: label.map(str::to_owned),
        }))
    }

    pub fn stmt(&mut self, kind: StmtKind) -> StmtId {
        self.ast.add_stmt(Stmt::new(kind))
    }

    /// Register an entry function whose body is the given block
    pub fn entry_func(&mut self, name: &str, body: StmtId) {
        self.ast.functions.push(FuncDef {
            name: name.to_string(),
            is_entry: true,
            body,
            span: SourceSpan::synthetic(),
        });
    }

    /// Register a non-entry function (skipped by lowering)
    pub fn plain_func(&mut self, name: &str, body: StmtId) {
        self.ast.functions.push(FuncDef {
            name: name.to_string(),
            is_entry: false,
            body,
            span: SourceSpan::synthetic(),
        });
    }
}

/// Lower and require success plus a clean invariant check
pub fn lower_ok(ast: &mut Ast) -> IrProgram {
    let mut errors = ErrorCollector::new();
    let prog = spate_ir::lower_to_ir(ast, &mut errors)
        .unwrap_or_else(|e| panic!("lowering failed: {e}; diagnostics: {:?}", errors.diagnostics()));
    let violations = check_program(&prog);
    assert!(
        violations.is_empty(),
        "invariant violations: {violations:?}"
    );
    prog
}

/// Lower and require failure; returns the collected diagnostics
pub fn lower_err(ast: &mut Ast) -> ErrorCollector {
    let mut errors = ErrorCollector::new();
    let result = spate_ir::lower_to_ir(ast, &mut errors);
    assert!(result.is_err(), "lowering unexpectedly succeeded");
    assert!(errors.has_errors());
    errors
}

/// The single entry block of a program
pub fn entry_block(prog: &IrProgram) -> &BasicBlock {
    assert_eq!(prog.entries.len(), 1, "expected exactly one entry block");
    prog.block(prog.entries[0])
}

/// First block whose label starts with `prefix`
pub fn block_by_prefix<'a>(prog: &'a IrProgram, prefix: &str) -> &'a BasicBlock {
    prog.blocks
        .iter()
        .find(|b| b.label.starts_with(prefix))
        .unwrap_or_else(|| {
            panic!(
                "no block with label prefix '{prefix}'; labels: {:?}",
                prog.blocks.iter().map(|b| &b.label).collect::<Vec<_>>()
            )
        })
}

/// Statement kinds of a block, in order
pub fn kinds(block: &BasicBlock) -> Vec<StatementKind> {
    block.stmts.iter().map(|s| s.kind).collect()
}

/// Whether any collected diagnostic message contains `needle`
pub fn has_message(errors: &ErrorCollector, needle: &str) -> bool {
    errors
        .diagnostics()
        .iter()
        .any(|d| d.message.contains(needle))
}
