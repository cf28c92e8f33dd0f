//! Typed AST for the SPATE language
//!
//! This is the tree handed to the lowering passes after parsing, type
//! inference, and type lowering have run. Nodes live in arenas owned by the
//! [`Ast`] container and reference each other through [`ExprId`] /
//! [`StmtId`] handles, so identity-keyed side tables (binding environments,
//! expression-to-IR maps) work without pointer aliasing.
//!
//! Contract expected from upstream passes:
//! - every expression carries an [`InferredType`]
//! - field assignments have been rewritten into whole-aggregate assignments
//! - variable references carry a back-reference to their defining `let`

use crate::span::SourceSpan;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Expression node identifier (index into the AST expression arena)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ExprId(pub u32);

/// Statement node identifier (index into the AST statement arena)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StmtId(pub u32);

/// Type information attached to every expression by type inference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredType {
    /// Bit width of the value
    pub width: u32,
    /// Value is a port
    pub is_port: bool,
    /// Value is an anonymous channel
    pub is_chan: bool,
    /// Number of elements, for array types
    pub array_size: i64,
}

impl InferredType {
    /// Plain bit-vector type of the given width
    pub fn bits(width: u32) -> Self {
        Self {
            width,
            ..Self::default()
        }
    }

    /// Port type of the given width
    pub fn port(width: u32) -> Self {
        Self {
            width,
            is_port: true,
            ..Self::default()
        }
    }

    /// Channel type of the given width
    pub fn chan(width: u32) -> Self {
        Self {
            width,
            is_chan: true,
            ..Self::default()
        }
    }

    /// Array type: `count` elements of `width` bits each
    pub fn array(width: u32, count: i64) -> Self {
        Self {
            width,
            array_size: count,
            ..Self::default()
        }
    }
}

/// Expression operators and node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExprOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    // Bitwise logic
    And,
    Or,
    Not,
    Xor,
    Lsh,
    Rsh,
    // Ternary select, bit slicing, concatenation
    Sel,
    Bitslice,
    Concat,
    // Comparisons
    Eq,
    Ne,
    Le,
    Lt,
    Ge,
    Gt,
    // Leaf / special forms
    Const,
    Var,
    PortDef,
    PortRead,
    ArrayInit,
    ArrayRef,
    RegInit,
    RegRef,
    BypassDef,
    BypassPresent,
    BypassReady,
    BypassRead,
    StmtBlock,
    Cast,
    FieldRef,
    /// Synthesized placeholder with no syntax of its own (phi results)
    Nop,
}

/// An expression node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    /// Operator / node kind
    pub op: ExprOp,
    /// Operand expressions, in syntactic order
    pub ops: Vec<ExprId>,
    /// Literal value (`Const`) or port default value (`PortDef`)
    pub constant: Option<i64>,
    /// Entity name for `PortDef` / `ArrayInit` / `RegInit` / `BypassDef`.
    /// Anonymous entities get a name synthesized during lowering.
    pub ident: Option<String>,
    /// Defining `let` statement, for `Var`
    pub def: Option<StmtId>,
    /// Body block, for `StmtBlock`
    pub stmt: Option<StmtId>,
    /// Inferred type
    pub ty: InferredType,
    /// Source location
    pub span: SourceSpan,
}

impl Expr {
    /// New expression with no operands or metadata
    pub fn new(op: ExprOp, ty: InferredType) -> Self {
        Self {
            op,
            ops: Vec::new(),
            constant: None,
            ident: None,
            def: None,
            stmt: None,
            ty,
            span: SourceSpan::synthetic(),
        }
    }

    pub fn with_ops(mut self, ops: Vec<ExprId>) -> Self {
        self.ops = ops;
        self
    }

    pub fn with_constant(mut self, value: i64) -> Self {
        self.constant = Some(value);
        self
    }

    pub fn with_ident(mut self, name: impl Into<String>) -> Self {
        self.ident = Some(name.into());
        self
    }

    pub fn with_def(mut self, def: StmtId) -> Self {
        self.def = Some(def);
        self
    }

    pub fn with_block(mut self, stmt: StmtId) -> Self {
        self.stmt = Some(stmt);
        self
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = span;
        self
    }
}

/// Statement node kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    /// `{ ... }`
    Block(Vec<StmtId>),
    /// `let name = rhs;`
    Let {
        name: String,
        ty: InferredType,
        rhs: ExprId,
    },
    /// Bare expression statement; the value of a statement-block expression
    Expr(ExprId),
    /// `lhs = rhs;`
    Assign { lhs: ExprId, rhs: ExprId },
    /// `write port, rhs;`
    Write { port: ExprId, rhs: ExprId },
    /// `if (cond) ... else ...`
    If {
        cond: ExprId,
        if_body: StmtId,
        else_body: Option<StmtId>,
    },
    /// `label: while (cond) ...`
    While {
        cond: ExprId,
        body: StmtId,
        label: Option<String>,
    },
    /// `break label;`
    Break { label: Option<String> },
    /// `continue label;`
    Continue { label: Option<String> },
    /// `spawn ...`
    Spawn { body: StmtId },
    /// `kill;`
    Kill,
    /// `killyounger;`
    KillYounger,
    /// `killif (cond);`
    KillIf { cond: ExprId },
    /// `onkillyounger { ... }` (replayed at each subsequent `killyounger`)
    OnKillYounger { body: StmtId },
    /// `timing { ... }`
    Timing { body: StmtId },
    /// `stage N;`
    Stage { offset: i32 },
    /// Nested function literal; lowers to a separate entry point
    NestedFunc { body: StmtId },
    /// `bypass.start(index);`
    BypassStart { bypass: ExprId, index: ExprId },
    /// `bypass.end();`
    BypassEnd { bypass: ExprId },
    /// `bypass.write(value);`
    BypassWrite { bypass: ExprId, value: ExprId },
}

/// A statement node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            span: SourceSpan::synthetic(),
        }
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = span;
        self
    }
}

/// A function definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncDef {
    /// Function name; entry functions name their entry basic block
    pub name: String,
    /// Entry functions root a transaction; others are inlined upstream
    pub is_entry: bool,
    /// Body block
    pub body: StmtId,
    /// Source location
    pub span: SourceSpan,
}

/// A `#[pragma key = value]` directive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pragma {
    pub key: String,
    pub value: String,
}

/// AST container owning all nodes of one compilation unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ast {
    /// Function definitions in declaration order
    pub functions: Vec<FuncDef>,
    /// Pragmas in declaration order
    pub pragmas: Vec<Pragma>,
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an expression to the arena and return its handle
    pub fn add_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    /// Add a statement to the arena and return its handle
    pub fn add_stmt(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(stmt);
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.0 as usize]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.0 as usize]
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    pub fn stmt_count(&self) -> usize {
        self.stmts.len()
    }

    /// Deep-clone a statement subtree into the arena.
    ///
    /// Variable references to `let`s cloned within the subtree are remapped
    /// onto the clones; references to enclosing `let`s are kept as-is.
    pub fn clone_stmt(&mut self, root: StmtId) -> StmtId {
        let mut let_map = HashMap::new();
        self.clone_stmt_rec(root, &mut let_map)
    }

    fn clone_stmt_rec(&mut self, id: StmtId, let_map: &mut HashMap<StmtId, StmtId>) -> StmtId {
        let span = self.stmt(id).span.clone();
        let kind = self.stmt(id).kind.clone();
        let new_kind = match kind {
            StmtKind::Block(stmts) => {
                let cloned = stmts
                    .into_iter()
                    .map(|s| self.clone_stmt_rec(s, let_map))
                    .collect();
                StmtKind::Block(cloned)
            }
            StmtKind::Let { name, ty, rhs } => StmtKind::Let {
                name,
                ty,
                rhs: self.clone_expr_rec(rhs, let_map),
            },
            StmtKind::Expr(e) => StmtKind::Expr(self.clone_expr_rec(e, let_map)),
            StmtKind::Assign { lhs, rhs } => StmtKind::Assign {
                lhs: self.clone_expr_rec(lhs, let_map),
                rhs: self.clone_expr_rec(rhs, let_map),
            },
            StmtKind::Write { port, rhs } => StmtKind::Write {
                port: self.clone_expr_rec(port, let_map),
                rhs: self.clone_expr_rec(rhs, let_map),
            },
            StmtKind::If {
                cond,
                if_body,
                else_body,
            } => StmtKind::If {
                cond: self.clone_expr_rec(cond, let_map),
                if_body: self.clone_stmt_rec(if_body, let_map),
                else_body: else_body.map(|s| self.clone_stmt_rec(s, let_map)),
            },
            StmtKind::While { cond, body, label } => StmtKind::While {
                cond: self.clone_expr_rec(cond, let_map),
                body: self.clone_stmt_rec(body, let_map),
                label,
            },
            StmtKind::Break { label } => StmtKind::Break { label },
            StmtKind::Continue { label } => StmtKind::Continue { label },
            StmtKind::Spawn { body } => StmtKind::Spawn {
                body: self.clone_stmt_rec(body, let_map),
            },
            StmtKind::Kill => StmtKind::Kill,
            StmtKind::KillYounger => StmtKind::KillYounger,
            StmtKind::KillIf { cond } => StmtKind::KillIf {
                cond: self.clone_expr_rec(cond, let_map),
            },
            StmtKind::OnKillYounger { body } => StmtKind::OnKillYounger {
                body: self.clone_stmt_rec(body, let_map),
            },
            StmtKind::Timing { body } => StmtKind::Timing {
                body: self.clone_stmt_rec(body, let_map),
            },
            StmtKind::Stage { offset } => StmtKind::Stage { offset },
            StmtKind::NestedFunc { body } => StmtKind::NestedFunc {
                body: self.clone_stmt_rec(body, let_map),
            },
            StmtKind::BypassStart { bypass, index } => StmtKind::BypassStart {
                bypass: self.clone_expr_rec(bypass, let_map),
                index: self.clone_expr_rec(index, let_map),
            },
            StmtKind::BypassEnd { bypass } => StmtKind::BypassEnd {
                bypass: self.clone_expr_rec(bypass, let_map),
            },
            StmtKind::BypassWrite { bypass, value } => StmtKind::BypassWrite {
                bypass: self.clone_expr_rec(bypass, let_map),
                value: self.clone_expr_rec(value, let_map),
            },
        };
        let new_id = self.add_stmt(Stmt {
            kind: new_kind,
            span,
        });
        if matches!(self.stmt(new_id).kind, StmtKind::Let { .. }) {
            let_map.insert(id, new_id);
        }
        new_id
    }

    fn clone_expr_rec(&mut self, id: ExprId, let_map: &mut HashMap<StmtId, StmtId>) -> ExprId {
        let mut expr = self.expr(id).clone();
        expr.ops = expr
            .ops
            .iter()
            .map(|&op| self.clone_expr_rec(op, let_map))
            .collect();
        if let Some(def) = expr.def {
            if let Some(&remapped) = let_map.get(&def) {
                expr.def = Some(remapped);
            }
        }
        if let Some(stmt) = expr.stmt {
            expr.stmt = Some(self.clone_stmt_rec(stmt, let_map));
        }
        self.add_expr(expr)
    }
}
