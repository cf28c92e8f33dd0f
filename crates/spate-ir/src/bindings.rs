//! Scoped binding environment
//!
//! Maps `let` declarations to the AST expression currently holding their
//! value. Control-flow lowering pushes an overlay frame per path, snapshots
//! what the path rebound, and joins the snapshots into per-let contributor
//! lists when paths merge.
//!
//! Frames are ordered maps keyed by the `let`'s statement id, so overlay
//! snapshots and join results iterate in declaration order and phi emission
//! is deterministic.

use spate_frontend::ast::{ExprId, StmtId};
use std::collections::{BTreeMap, BTreeSet};

/// Flat snapshot of everything bound at or above some overlay level
pub type Overlay = BTreeMap<StmtId, ExprId>;

/// Stack of overlay frames
#[derive(Debug, Clone)]
pub struct BindingEnv {
    frames: Vec<BTreeMap<StmtId, ExprId>>,
}

impl Default for BindingEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingEnv {
    pub fn new() -> Self {
        Self {
            frames: vec![BTreeMap::new()],
        }
    }

    /// Push a new overlay frame; returns its level for `pop_to`/`overlay`
    pub fn push(&mut self) -> usize {
        self.frames.push(BTreeMap::new());
        self.frames.len() - 1
    }

    /// Drop every frame at or above `level`
    pub fn pop_to(&mut self, level: usize) {
        self.frames.truncate(level.max(1));
    }

    /// Bind a `let` in the top frame
    pub fn set(&mut self, let_id: StmtId, expr: ExprId) {
        if let Some(top) = self.frames.last_mut() {
            top.insert(let_id, expr);
        }
    }

    /// Current binding of a `let`, searching frames top-down
    pub fn get(&self, let_id: StmtId) -> Option<ExprId> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.get(&let_id).copied())
    }

    /// All `let`s visible in any frame, in declaration order
    pub fn keys(&self) -> Vec<StmtId> {
        let set: BTreeSet<StmtId> = self
            .frames
            .iter()
            .flat_map(|f| f.keys().copied())
            .collect();
        set.into_iter().collect()
    }

    /// Flatten everything bound at or above `level` into one map; bindings
    /// in higher frames shadow lower ones
    pub fn overlay(&self, level: usize) -> Overlay {
        let mut flat = Overlay::new();
        for frame in self.frames.iter().skip(level) {
            for (&let_id, &expr) in frame {
                flat.insert(let_id, expr);
            }
        }
        flat
    }

    /// Join several overlay snapshots into per-let contributor lists.
    ///
    /// The result holds, for every `let` bound in at least one overlay, one
    /// contributing expression per overlay (in overlay order); overlays that
    /// did not rebind the `let` inherit the enclosing-scope binding. A `let`
    /// with neither an overlay binding nor an enclosing binding in some slot
    /// was local to another path's scope and is dropped from the join.
    pub fn join_overlays(&self, overlays: &[Overlay]) -> BTreeMap<StmtId, Vec<ExprId>> {
        let keys: BTreeSet<StmtId> = overlays
            .iter()
            .flat_map(|o| o.keys().copied())
            .collect();
        let mut joined = BTreeMap::new();
        'keys: for key in keys {
            let mut contributors = Vec::with_capacity(overlays.len());
            for overlay in overlays {
                match overlay.get(&key).copied().or_else(|| self.get(key)) {
                    Some(expr) => contributors.push(expr),
                    None => continue 'keys,
                }
            }
            joined.insert(key, contributors);
        }
        joined
    }

    /// Whether any frame holds a binding
    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(|f| f.is_empty())
    }

    /// Number of frames currently on the stack
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
