//! Pre/post-order AST traversal with scope control
//!
//! Lowering passes hook into traversal through [`AstVisitor`]. A pre hook
//! can return [`Flow::Skip`] to take over lowering of the node's children
//! itself (the post hook still runs), or [`Flow::Stop`] to abandon the
//! subtree with an error. Hooks may re-enter [`walk_stmt`] / [`walk_expr`]
//! to drive child traversal manually, which is how constructs that
//! interleave scope changes with child visits (assignments, if/else, while,
//! spawn, nested functions) are handled.

use crate::ast::{Ast, ExprId, StmtId, StmtKind};

/// Outcome of a visitor hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Proceed normally; children of this node are visited automatically
    Continue,
    /// Skip automatic child visitation; the post hook still runs
    Skip,
    /// Abandon traversal of this subtree with an error
    Stop,
}

/// Visitation hooks over AST nodes
///
/// Default implementations visit everything and do nothing.
pub trait AstVisitor {
    fn stmt_pre(&mut self, _ast: &mut Ast, _id: StmtId) -> Flow {
        Flow::Continue
    }

    fn stmt_post(&mut self, _ast: &mut Ast, _id: StmtId) -> Flow {
        Flow::Continue
    }

    fn expr_pre(&mut self, _ast: &mut Ast, _id: ExprId) -> Flow {
        Flow::Continue
    }

    fn expr_post(&mut self, _ast: &mut Ast, _id: ExprId) -> Flow {
        Flow::Continue
    }
}

/// Walk a statement subtree. Returns `Flow::Stop` if any hook stopped.
pub fn walk_stmt<V: AstVisitor + ?Sized>(ast: &mut Ast, id: StmtId, v: &mut V) -> Flow {
    match v.stmt_pre(ast, id) {
        Flow::Stop => return Flow::Stop,
        Flow::Skip => {}
        Flow::Continue => {
            if walk_stmt_children(ast, id, v) == Flow::Stop {
                return Flow::Stop;
            }
        }
    }
    match v.stmt_post(ast, id) {
        Flow::Stop => Flow::Stop,
        _ => Flow::Continue,
    }
}

fn walk_stmt_children<V: AstVisitor + ?Sized>(ast: &mut Ast, id: StmtId, v: &mut V) -> Flow {
    // Children are visited in syntactic order.
    let kind = ast.stmt(id).kind.clone();
    match kind {
        StmtKind::Block(stmts) => {
            for s in stmts {
                if walk_stmt(ast, s, v) == Flow::Stop {
                    return Flow::Stop;
                }
            }
        }
        StmtKind::Let { rhs, .. } => {
            if walk_expr(ast, rhs, v) == Flow::Stop {
                return Flow::Stop;
            }
        }
        StmtKind::Expr(e) | StmtKind::KillIf { cond: e } => {
            if walk_expr(ast, e, v) == Flow::Stop {
                return Flow::Stop;
            }
        }
        StmtKind::Assign { lhs, rhs } => {
            if walk_expr(ast, lhs, v) == Flow::Stop {
                return Flow::Stop;
            }
            if walk_expr(ast, rhs, v) == Flow::Stop {
                return Flow::Stop;
            }
        }
        StmtKind::Write { port, rhs } => {
            if walk_expr(ast, port, v) == Flow::Stop {
                return Flow::Stop;
            }
            if walk_expr(ast, rhs, v) == Flow::Stop {
                return Flow::Stop;
            }
        }
        StmtKind::If {
            cond,
            if_body,
            else_body,
        } => {
            if walk_expr(ast, cond, v) == Flow::Stop {
                return Flow::Stop;
            }
            if walk_stmt(ast, if_body, v) == Flow::Stop {
                return Flow::Stop;
            }
            if let Some(e) = else_body {
                if walk_stmt(ast, e, v) == Flow::Stop {
                    return Flow::Stop;
                }
            }
        }
        StmtKind::While { cond, body, .. } => {
            if walk_expr(ast, cond, v) == Flow::Stop {
                return Flow::Stop;
            }
            if walk_stmt(ast, body, v) == Flow::Stop {
                return Flow::Stop;
            }
        }
        StmtKind::Spawn { body }
        | StmtKind::OnKillYounger { body }
        | StmtKind::Timing { body }
        | StmtKind::NestedFunc { body } => {
            if walk_stmt(ast, body, v) == Flow::Stop {
                return Flow::Stop;
            }
        }
        StmtKind::BypassStart { bypass, index } => {
            if walk_expr(ast, bypass, v) == Flow::Stop {
                return Flow::Stop;
            }
            if walk_expr(ast, index, v) == Flow::Stop {
                return Flow::Stop;
            }
        }
        StmtKind::BypassEnd { bypass } => {
            if walk_expr(ast, bypass, v) == Flow::Stop {
                return Flow::Stop;
            }
        }
        StmtKind::BypassWrite { bypass, value } => {
            if walk_expr(ast, bypass, v) == Flow::Stop {
                return Flow::Stop;
            }
            if walk_expr(ast, value, v) == Flow::Stop {
                return Flow::Stop;
            }
        }
        StmtKind::Break { .. }
        | StmtKind::Continue { .. }
        | StmtKind::Kill
        | StmtKind::KillYounger
        | StmtKind::Stage { .. } => {}
    }
    Flow::Continue
}

/// Walk an expression subtree. Returns `Flow::Stop` if any hook stopped.
pub fn walk_expr<V: AstVisitor + ?Sized>(ast: &mut Ast, id: ExprId, v: &mut V) -> Flow {
    match v.expr_pre(ast, id) {
        Flow::Stop => return Flow::Stop,
        Flow::Skip => {}
        Flow::Continue => {
            let ops = ast.expr(id).ops.clone();
            for op in ops {
                if walk_expr(ast, op, v) == Flow::Stop {
                    return Flow::Stop;
                }
            }
            // A statement-block expression's value is produced by its body.
            if let Some(stmt) = ast.expr(id).stmt {
                if walk_stmt(ast, stmt, v) == Flow::Stop {
                    return Flow::Stop;
                }
            }
        }
    }
    match v.expr_post(ast, id) {
        Flow::Stop => Flow::Stop,
        _ => Flow::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, ExprOp, InferredType, Stmt};

    struct Recorder {
        events: Vec<String>,
        skip_assign: bool,
    }

    impl AstVisitor for Recorder {
        fn stmt_pre(&mut self, ast: &mut Ast, id: StmtId) -> Flow {
            let is_assign = matches!(ast.stmt(id).kind, StmtKind::Assign { .. });
            self.events.push(format!("pre:{}", id.0));
            if self.skip_assign && is_assign {
                Flow::Skip
            } else {
                Flow::Continue
            }
        }

        fn stmt_post(&mut self, _ast: &mut Ast, id: StmtId) -> Flow {
            self.events.push(format!("post:{}", id.0));
            Flow::Continue
        }

        fn expr_post(&mut self, _ast: &mut Ast, id: ExprId) -> Flow {
            self.events.push(format!("expr:{}", id.0));
            Flow::Continue
        }
    }

    #[test]
    fn skip_suppresses_children_but_runs_post() {
        let mut ast = Ast::new();
        let lhs = ast.add_expr(Expr::new(ExprOp::Var, InferredType::bits(8)));
        let rhs = ast.add_expr(Expr::new(ExprOp::Const, InferredType::bits(8)).with_constant(3));
        let assign = ast.add_stmt(Stmt::new(StmtKind::Assign { lhs, rhs }));

        let mut rec = Recorder {
            events: vec![],
            skip_assign: true,
        };
        assert_eq!(walk_stmt(&mut ast, assign, &mut rec), Flow::Continue);
        assert_eq!(rec.events, vec!["pre:0", "post:0"]);

        let mut rec = Recorder {
            events: vec![],
            skip_assign: false,
        };
        walk_stmt(&mut ast, assign, &mut rec);
        assert_eq!(rec.events, vec!["pre:0", "expr:0", "expr:1", "post:0"]);
    }
}
