//! SPATE frontend
//!
//! This crate holds the language-side surface consumed by the lowering
//! passes:
//! - the typed AST container and nodes
//! - source spans and the diagnostic collector
//! - pre/post-order AST traversal with scope control

pub mod ast;
pub mod diag;
pub mod span;
pub mod walk;

pub use ast::{
    Ast, Expr, ExprId, ExprOp, FuncDef, InferredType, Pragma, Stmt, StmtId, StmtKind,
};
pub use diag::{Diagnostic, ErrorCollector, Severity};
pub use span::SourceSpan;
pub use walk::{walk_expr, walk_stmt, AstVisitor, Flow};
