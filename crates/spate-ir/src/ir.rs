//! SPATE IR - control-flow-graph SSA representation
//!
//! The IR a typed AST lowers into:
//! - basic blocks joined by explicit branch/jump/spawn edges
//! - every value produced exactly once, carrying a unique value number
//! - phi statements merging alternatives at control-flow joins
//! - hardware operations (ports, channels, registers, arrays, bypass
//!   networks, timing barriers, transaction control) as first-class
//!   statement kinds
//!
//! Statements reference their operands by [`ValueId`] and their targets by
//! [`BlockId`] plus label; the program keeps indexes from ids to owning
//! slots, rebuilt after passes that delete blocks. Value numbers are stable
//! across serialization.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use spate_frontend::span::SourceSpan;
use std::collections::HashMap;

/// SSA value number; unique per statement within a program
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ValueId(pub u32);

/// Stable basic-block identifier; survives block deletion
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockId(pub u32);

/// Bit width of the transaction identifier produced by `Spawn`
pub const TXN_ID_WIDTH: u32 = 32;

/// Operator subtag for `Expr` statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Not,
    Xor,
    Lsh,
    Rsh,
    Select,
    Bitslice,
    Concat,
    CmpEq,
    CmpNe,
    CmpLe,
    CmpLt,
    CmpGe,
    CmpGt,
    Const,
}

/// Statement kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    /// Pure SSA value (arithmetic, logic, compare, shift, select, slice,
    /// concat, constant); `op` carries the operator
    Expr,
    PortRead,
    PortWrite,
    /// Named port definition visible outside the design
    PortExport,
    ChanRead,
    ChanWrite,
    RegRead,
    RegWrite,
    /// Array lifetime marker; `constant` carries the element count
    ArraySize,
    ArrayRead,
    ArrayWrite,
    BypassStart,
    BypassEnd,
    BypassWrite,
    BypassPresent,
    BypassReady,
    BypassRead,
    /// Conditional branch; two targets (taken, not-taken)
    If,
    /// Unconditional jump; one target
    Jmp,
    /// SSA join; the i-th argument flows in from the i-th target block
    Phi,
    /// Terminate the current transaction
    Kill,
    /// Conditionally terminate the current transaction
    KillIf,
    /// Terminate all younger transactions
    KillYounger,
    /// Fork a new transaction at the target block; the emitting block falls
    /// through to the next statement
    Spawn,
    /// Anchor scheduling at `time_offset` within `timevar`
    TimingBarrier,
    /// Transaction completed
    Done,
}

/// One IR statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    /// Unique SSA value number
    pub valnum: ValueId,
    /// Statement kind
    pub kind: StatementKind,
    /// Operator for `Expr` statements
    pub op: Option<IrOp>,
    /// Result width in bits
    pub width: u32,
    /// Operand value numbers, in order
    pub args: Vec<ValueId>,
    /// Target blocks for branches/jumps/spawns; predecessor blocks for phis
    pub targets: Vec<BlockId>,
    /// Labels of `targets`, kept in lockstep
    pub target_labels: Vec<String>,
    /// Literal value (`Expr`/`Const`) or array element count (`ArraySize`)
    pub constant: Option<i64>,
    /// Entity name for port/channel/register/array/bypass operations
    pub port_name: Option<String>,
    /// Default value driven on a port when no write fires
    pub port_default: Option<i64>,
    /// Timing variable this barrier anchors to
    pub timevar: Option<String>,
    /// Scheduling offset within the timing variable
    pub time_offset: i32,
    /// Source location of the construct this statement was lowered from
    pub span: Option<SourceSpan>,
}

impl Statement {
    pub fn new(valnum: ValueId, kind: StatementKind) -> Self {
        Self {
            valnum,
            kind,
            op: None,
            width: 0,
            args: Vec::new(),
            targets: Vec::new(),
            target_labels: Vec::new(),
            constant: None,
            port_name: None,
            port_default: None,
            timevar: None,
            time_offset: 0,
            span: None,
        }
    }

    /// Whether this statement transfers control to other blocks
    pub fn is_branch(&self) -> bool {
        matches!(
            self.kind,
            StatementKind::If | StatementKind::Jmp | StatementKind::Spawn
        )
    }
}

/// A timing variable: barriers referencing it are scheduled relative to
/// each other by their `time_offset`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeVar {
    /// Synthesized name (registry key)
    pub name: String,
    /// Value numbers of the barriers anchored to this variable
    pub uses: Vec<ValueId>,
}

/// A basic block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Stable identifier
    pub id: BlockId,
    /// Label, unique within the program
    pub label: String,
    /// Block begins an entry function
    pub is_entry: bool,
    /// Statements in emission order
    pub stmts: Vec<Statement>,
}

impl BasicBlock {
    /// Successor blocks, derived from branch/jump/spawn statements
    pub fn successors(&self) -> Vec<BlockId> {
        self.stmts
            .iter()
            .filter(|s| s.is_branch())
            .flat_map(|s| s.targets.iter().copied())
            .collect()
    }
}

/// A complete IR program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrProgram {
    /// Basic blocks in creation order
    pub blocks: Vec<BasicBlock>,
    /// Entry blocks, in declaration order
    pub entries: Vec<BlockId>,
    /// Timing variables by synthesized name, in creation order
    pub timevars: IndexMap<String, TimeVar>,
    /// Next free SSA value number; strictly greater than any in use
    pub next_valnum: u32,
    /// Next free block identifier
    pub next_block_id: u32,
    /// Timing model selected by pragma, if any
    pub timing_model: Option<String>,
    /// Argument and target id references are live (indexes are maintained);
    /// cleared by consumers that strip them down to labels/numbers only
    pub crosslinked_args_bbs: bool,
    #[serde(skip)]
    block_index: HashMap<BlockId, usize>,
    #[serde(skip)]
    value_index: HashMap<ValueId, (usize, usize)>,
}

impl Default for IrProgram {
    fn default() -> Self {
        Self::new()
    }
}

impl IrProgram {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            entries: Vec::new(),
            timevars: IndexMap::new(),
            next_valnum: 1,
            next_block_id: 0,
            timing_model: None,
            crosslinked_args_bbs: true,
            block_index: HashMap::new(),
            value_index: HashMap::new(),
        }
    }

    /// Allocate a fresh SSA value number
    pub fn alloc_value(&mut self) -> ValueId {
        let v = ValueId(self.next_valnum);
        self.next_valnum += 1;
        v
    }

    /// Create an empty block with the given label
    pub fn add_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        self.block_index.insert(id, self.blocks.len());
        self.blocks.push(BasicBlock {
            id,
            label: label.into(),
            is_entry: false,
            stmts: Vec::new(),
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[self.block_index[&id]]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        let idx = self.block_index[&id];
        &mut self.blocks[idx]
    }

    /// Append a statement to a block, keeping `next_valnum` and the value
    /// index current. Returns the statement's value number.
    pub fn push_stmt(&mut self, bb: BlockId, stmt: Statement) -> ValueId {
        let valnum = stmt.valnum;
        if valnum.0 >= self.next_valnum {
            self.next_valnum = valnum.0 + 1;
        }
        let block_idx = self.block_index[&bb];
        let block = &mut self.blocks[block_idx];
        self.value_index.insert(valnum, (block_idx, block.stmts.len()));
        block.stmts.push(stmt);
        valnum
    }

    /// Resolve a value number to its producing statement
    pub fn stmt(&self, v: ValueId) -> Option<&Statement> {
        let &(block_idx, stmt_idx) = self.value_index.get(&v)?;
        self.blocks.get(block_idx)?.stmts.get(stmt_idx)
    }

    pub fn stmt_mut(&mut self, v: ValueId) -> Option<&mut Statement> {
        let &(block_idx, stmt_idx) = self.value_index.get(&v)?;
        self.blocks.get_mut(block_idx)?.stmts.get_mut(stmt_idx)
    }

    /// Block owning the statement with the given value number
    pub fn block_of(&self, v: ValueId) -> Option<BlockId> {
        let &(block_idx, _) = self.value_index.get(&v)?;
        Some(self.blocks.get(block_idx)?.id)
    }

    /// Successors of a block, derived from its terminator statements
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.block(id).successors()
    }

    /// Rebuild the block and value indexes from the block list.
    ///
    /// Must be called after deserialization and after any pass that moves
    /// or deletes blocks or statements.
    pub fn rebuild_indexes(&mut self) {
        self.block_index.clear();
        self.value_index.clear();
        for (block_idx, block) in self.blocks.iter().enumerate() {
            self.block_index.insert(block.id, block_idx);
            for (stmt_idx, stmt) in block.stmts.iter().enumerate() {
                self.value_index.insert(stmt.valnum, (block_idx, stmt_idx));
            }
        }
    }

    /// Total statement count across all blocks
    pub fn stmt_count(&self) -> usize {
        self.blocks.iter().map(|b| b.stmts.len()).sum()
    }
}
