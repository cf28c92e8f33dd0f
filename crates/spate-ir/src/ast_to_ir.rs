//! AST to IR lowering
//!
//! Walks a typed AST and builds the SSA control-flow-graph IR:
//! - on-the-fly SSA construction, with phis inserted at if/else merge
//!   points and loop headers
//! - scoped binding overlays per control-flow path, joined at merges
//! - read/write discipline: the same reference node lowers to a read or a
//!   write depending on position (assignment left-hand sides are never
//!   auto-visited)
//! - static trace-back through let chains to port/array/register/bypass
//!   definitions
//! - timing barriers bracketing timing/stage regions
//! - spawned paths, nested entry functions, and deferred on-kill-younger
//!   blocks replayed at each kill-younger
//!
//! Errors go to the [`ErrorCollector`]; a failed subtree stops lowering of
//! its entry function while remaining functions still lower, and the pass
//! as a whole then reports failure.

use crate::bindings::{BindingEnv, Overlay};
use crate::ir::{
    IrOp, IrProgram, Statement, StatementKind, TimeVar, BlockId, ValueId, TXN_ID_WIDTH,
};
use spate_frontend::ast::{Ast, Expr, ExprId, ExprOp, FuncDef, InferredType, StmtId, StmtKind};
use spate_frontend::diag::{ErrorCollector, Severity};
use spate_frontend::span::SourceSpan;
use spate_frontend::walk::{walk_expr, walk_stmt, AstVisitor, Flow};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, trace};

/// Failure of the lowering pass as a whole
#[derive(Error, Debug)]
pub enum LowerError {
    /// Diagnostics were reported through the collector
    #[error("lowering failed with {0} error(s)")]
    Failed(usize),
}

/// One active loop: where its edges go and which bindings each exit path
/// carries (snapshots relative to `overlay_depth`)
struct LoopFrame {
    label: Option<String>,
    overlay_depth: usize,
    header: BlockId,
    footer: BlockId,
    in_bb: BlockId,
    continue_edges: Vec<(BlockId, Overlay)>,
    break_edges: Vec<(BlockId, Overlay)>,
}

struct TimingFrame {
    timevar: String,
    last_stage: i32,
}

/// Per-function lowering state; nested function literals push a new frame
#[derive(Default)]
struct FuncFrame {
    saved_bb: Option<BlockId>,
    loop_frames: Vec<LoopFrame>,
    timing_stack: Vec<TimingFrame>,
    on_kill_youngers: Vec<StmtId>,
}

impl FuncFrame {
    fn with_saved_bb(saved_bb: Option<BlockId>) -> Self {
        Self {
            saved_bb,
            ..Self::default()
        }
    }
}

/// Lowering context: owns the program under construction and all
/// pass-local state
pub struct AstToIr<'a> {
    errors: &'a mut ErrorCollector,
    prog: IrProgram,
    cur_bb: Option<BlockId>,
    gensym: u32,
    /// AST expression -> producing statement; last association wins
    expr_ir: HashMap<ExprId, ValueId>,
    bindings: BindingEnv,
    frames: Vec<FuncFrame>,
}

impl<'a> AstToIr<'a> {
    pub fn new(errors: &'a mut ErrorCollector) -> Self {
        Self {
            errors,
            prog: IrProgram::new(),
            cur_bb: None,
            gensym: 1,
            expr_ir: HashMap::new(),
            bindings: BindingEnv::new(),
            frames: Vec::new(),
        }
    }

    /// Lower the whole AST. The produced program still contains the
    /// unreachable blocks that break/continue lowering leaves behind; run
    /// [`crate::optimize::UnreachableBlockElimination`] to sweep them.
    pub fn lower(mut self, ast: &mut Ast) -> Result<IrProgram, LowerError> {
        for pragma in &ast.pragmas {
            if pragma.key == "timing_model" {
                self.prog.timing_model = Some(pragma.value.clone());
            }
        }

        let functions = ast.functions.clone();
        for func in &functions {
            if !func.is_entry {
                continue;
            }
            self.lower_function(ast, func);
        }

        let count = self.errors.error_count();
        if count > 0 {
            return Err(LowerError::Failed(count));
        }
        Ok(self.prog)
    }

    fn lower_function(&mut self, ast: &mut Ast, func: &FuncDef) {
        debug!(function = %func.name, "lowering entry function");
        self.frames.push(FuncFrame::default());
        let bb = self.prog.add_block(func.name.clone());
        self.prog.block_mut(bb).is_entry = true;
        self.prog.entries.push(bb);
        self.cur_bb = Some(bb);
        let depth = self.bindings.push();

        if walk_stmt(ast, func.body, self) != Flow::Stop {
            // Close the transaction in case the body did not.
            let done = self.new_stmt(StatementKind::Done);
            self.emit_cur(done);
        }

        self.bindings.pop_to(depth);
        debug_assert!(self.bindings.is_empty());
        self.frames.pop();
        self.cur_bb = None;
    }

    // ---- small helpers -----------------------------------------------

    fn cur(&self) -> BlockId {
        self.cur_bb
            .expect("statement emitted outside a function body")
    }

    fn frame(&self) -> &FuncFrame {
        self.frames.last().expect("no active function frame")
    }

    fn frame_mut(&mut self) -> &mut FuncFrame {
        self.frames.last_mut().expect("no active function frame")
    }

    fn gensym(&mut self, prefix: &str) -> String {
        let n = self.gensym;
        self.gensym += 1;
        format!("{prefix}_{n}")
    }

    fn add_bb(&mut self, prefix: &str) -> BlockId {
        let label = self.gensym(prefix);
        self.prog.add_block(label)
    }

    fn new_stmt(&mut self, kind: StatementKind) -> Statement {
        Statement::new(self.prog.alloc_value(), kind)
    }

    fn emit(&mut self, bb: BlockId, stmt: Statement) -> ValueId {
        self.prog.push_stmt(bb, stmt)
    }

    fn emit_cur(&mut self, stmt: Statement) -> ValueId {
        let bb = self.cur();
        self.emit(bb, stmt)
    }

    fn push_target(&self, stmt: &mut Statement, bb: BlockId) {
        stmt.targets.push(bb);
        stmt.target_labels.push(self.prog.block(bb).label.clone());
    }

    fn emit_jmp(&mut self, from: BlockId, to: BlockId) {
        let mut jmp = self.new_stmt(StatementKind::Jmp);
        self.push_target(&mut jmp, to);
        self.emit(from, jmp);
    }

    fn error(&mut self, span: &SourceSpan, message: impl Into<String>) {
        self.errors.report(span.clone(), Severity::Error, message);
    }

    fn associate(&mut self, expr: ExprId, value: ValueId) {
        self.expr_ir.insert(expr, value);
    }

    fn ir_of(&self, expr: ExprId) -> Option<ValueId> {
        self.expr_ir.get(&expr).copied()
    }

    fn require_ir(&mut self, ast: &Ast, expr: ExprId) -> Option<ValueId> {
        let ir = self.ir_of(expr);
        if ir.is_none() {
            let span = ast.expr(expr).span.clone();
            self.error(&span, "expression has no underlying IR value");
        }
        ir
    }

    fn width_of(&self, value: ValueId) -> u32 {
        self.prog.stmt(value).map(|s| s.width).unwrap_or(0)
    }

    /// Synthesize a placeholder expression carrying a phi's value
    fn add_placeholder(&mut self, ast: &mut Ast, ty: InferredType, value: ValueId) -> ExprId {
        let placeholder = ast.add_expr(Expr::new(ExprOp::Nop, ty));
        self.associate(placeholder, value);
        placeholder
    }

    // ---- entity trace-back -------------------------------------------

    /// Follow variable bindings through let chains until the expected
    /// definition node is reached. Static and binding-only: no constant
    /// folding, no flow-sensitive reasoning.
    fn find_entity_def(
        &mut self,
        ast: &Ast,
        node: ExprId,
        expected: ExprOp,
        origin: ExprId,
    ) -> Option<ExprId> {
        let expr = ast.expr(node);
        if expr.op == expected {
            return Some(node);
        }
        if expr.op == ExprOp::Var {
            if let Some(binding) = expr.def.and_then(|def| self.bindings.get(def)) {
                return self.find_entity_def(ast, binding, expected, origin);
            }
        }
        let span = ast.expr(origin).span.clone();
        self.error(
            &span,
            "port/array/reg value expected but cannot trace back to def statically",
        );
        None
    }

    // ---- statement lowering ------------------------------------------

    fn assign_post(&mut self, ast: &mut Ast, id: StmtId, lhs: ExprId, rhs: ExprId) -> Flow {
        let span = ast.stmt(id).span.clone();
        match ast.expr(lhs).op {
            ExprOp::Var => {
                // Rebind the let to the new value's expression.
                if let Some(def) = ast.expr(lhs).def {
                    self.bindings.set(def, rhs);
                    Flow::Continue
                } else {
                    self.error(&span, "variable reference with no definition");
                    Flow::Stop
                }
            }
            ExprOp::RegRef => {
                let target = ast.expr(lhs).ops[0];
                let Some(regdef) = self.find_entity_def(ast, target, ExprOp::RegInit, lhs)
                else {
                    return Flow::Stop;
                };
                let Some(value) = self.require_ir(ast, rhs) else {
                    return Flow::Stop;
                };
                let mut stmt = self.new_stmt(StatementKind::RegWrite);
                stmt.port_name = ast.expr(regdef).ident.clone();
                stmt.width = ast.expr(regdef).ty.width;
                stmt.args.push(value);
                stmt.span = Some(span);
                self.emit_cur(stmt);
                Flow::Continue
            }
            ExprOp::ArrayRef => {
                // The array must be directly reachable through lets; arrays
                // nested inside other lvalues are not supported.
                let target = ast.expr(lhs).ops[0];
                let index = ast.expr(lhs).ops[1];
                let Some(arraydef) =
                    self.find_entity_def(ast, target, ExprOp::ArrayInit, lhs)
                else {
                    return Flow::Stop;
                };
                // The LHS subtree was suppressed to keep the reference from
                // lowering as a read; the index operand still needs IR.
                if walk_expr(ast, index, self) == Flow::Stop {
                    return Flow::Stop;
                }
                let Some(index_value) = self.require_ir(ast, index) else {
                    return Flow::Stop;
                };
                let Some(value) = self.require_ir(ast, rhs) else {
                    return Flow::Stop;
                };
                let mut stmt = self.new_stmt(StatementKind::ArrayWrite);
                stmt.port_name = ast.expr(arraydef).ident.clone();
                stmt.width = ast.expr(rhs).ty.width;
                stmt.args.push(index_value);
                stmt.args.push(value);
                stmt.span = Some(span);
                self.emit_cur(stmt);
                Flow::Continue
            }
            ExprOp::FieldRef => {
                // Type lowering rewrites field assignments into
                // whole-aggregate assignments before this pass runs.
                self.error(&span, "field assignment not desugared by type lowering");
                Flow::Stop
            }
            _ => {
                self.error(
                    &span,
                    "cannot assign to non-variable, non-array-slot, non-field-slot lvalue",
                );
                Flow::Stop
            }
        }
    }

    fn write_post(&mut self, ast: &mut Ast, id: StmtId, port: ExprId, rhs: ExprId) -> Flow {
        let span = ast.stmt(id).span.clone();
        let Some(portdef) = self.find_entity_def(ast, port, ExprOp::PortDef, port) else {
            return Flow::Stop;
        };
        let def = ast.expr(portdef);
        let kind = if def.ty.is_port {
            StatementKind::PortWrite
        } else if def.ty.is_chan {
            StatementKind::ChanWrite
        } else {
            self.error(&span, "write to something not a port or chan");
            return Flow::Stop;
        };
        let port_name = def.ident.clone();
        let port_default = def.constant;
        let Some(value) = self.require_ir(ast, rhs) else {
            return Flow::Stop;
        };
        let mut stmt = self.new_stmt(kind);
        stmt.port_name = port_name;
        stmt.port_default = port_default;
        stmt.args.push(value);
        stmt.width = ast.expr(rhs).ty.width;
        stmt.span = Some(span);
        self.emit_cur(stmt);
        Flow::Continue
    }

    fn kill_younger_post(&mut self, ast: &mut Ast, span: &SourceSpan) -> Flow {
        let mut stmt = self.new_stmt(StatementKind::KillYounger);
        stmt.span = Some(span.clone());
        self.emit_cur(stmt);

        // Replay every pending on-kill-younger block, in registration order.
        let pending = self.frame().on_kill_youngers.clone();
        for block in pending {
            if walk_stmt(ast, block, self) == Flow::Stop {
                // The failure is already reported; drop the remaining
                // replays but let the enclosing block keep lowering.
                return Flow::Skip;
            }
        }
        Flow::Continue
    }

    /// A kill-if condition may only read ports/chans and variables; a
    /// statement-block expression or an array read could perform a side
    /// effect and is rejected.
    fn verify_no_side_effects(&mut self, ast: &Ast, expr: ExprId) -> bool {
        let e = ast.expr(expr);
        if matches!(e.op, ExprOp::StmtBlock | ExprOp::ArrayRef) {
            let span = e.span.clone();
            self.error(
                &span,
                "expression contains a potential side effect (a statement-block \
                 expression or an array read), which is not allowed in a kill-if \
                 condition; such conditions may only contain port/chan reads, \
                 variable references, and computations on those values",
            );
            return false;
        }
        let ops = e.ops.clone();
        ops.iter().all(|&op| self.verify_no_side_effects(ast, op))
    }

    fn kill_if_post(&mut self, ast: &mut Ast, id: StmtId, cond: ExprId) -> Flow {
        if !self.verify_no_side_effects(ast, cond) {
            return Flow::Stop;
        }
        let span = ast.stmt(id).span.clone();
        let Some(cond_value) = self.require_ir(ast, cond) else {
            return Flow::Stop;
        };
        let mut stmt = self.new_stmt(StatementKind::KillIf);
        stmt.args.push(cond_value);
        stmt.span = Some(span);
        self.emit_cur(stmt);
        Flow::Continue
    }

    fn bypass_stmt_post(&mut self, ast: &mut Ast, id: StmtId) -> Flow {
        let span = ast.stmt(id).span.clone();
        let (bypass, kind, operand) = match &ast.stmt(id).kind {
            StmtKind::BypassStart { bypass, index } => {
                (*bypass, StatementKind::BypassStart, Some(*index))
            }
            StmtKind::BypassEnd { bypass } => (*bypass, StatementKind::BypassEnd, None),
            StmtKind::BypassWrite { bypass, value } => {
                (*bypass, StatementKind::BypassWrite, Some(*value))
            }
            _ => return Flow::Continue,
        };
        let Some(bypassdef) = self.find_entity_def(ast, bypass, ExprOp::BypassDef, bypass)
        else {
            return Flow::Stop;
        };
        let mut stmt = self.new_stmt(kind);
        stmt.port_name = ast.expr(bypassdef).ident.clone();
        if let Some(operand) = operand {
            let Some(value) = self.require_ir(ast, operand) else {
                return Flow::Stop;
            };
            stmt.args.push(value);
            if kind == StatementKind::BypassWrite {
                stmt.width = self.width_of(value);
            }
        }
        stmt.span = Some(span);
        self.emit_cur(stmt);
        Flow::Continue
    }

    // ---- timing ------------------------------------------------------

    fn emit_barrier(&mut self, timevar: &str, offset: i32, span: &SourceSpan) {
        let mut stmt = self.new_stmt(StatementKind::TimingBarrier);
        stmt.timevar = Some(timevar.to_string());
        stmt.time_offset = offset;
        stmt.span = Some(span.clone());
        let value = self.emit_cur(stmt);
        if let Some(tv) = self.prog.timevars.get_mut(timevar) {
            tv.uses.push(value);
        }
    }

    fn timing_pre(&mut self, span: &SourceSpan) -> Flow {
        let name = self.gensym("timing");
        self.prog.timevars.insert(
            name.clone(),
            TimeVar {
                name: name.clone(),
                uses: Vec::new(),
            },
        );
        self.frame_mut().timing_stack.push(TimingFrame {
            timevar: name.clone(),
            last_stage: 0,
        });
        // Implicit barrier opening the region at offset 0.
        self.emit_barrier(&name, 0, span);
        Flow::Continue
    }

    fn timing_post(&mut self, span: &SourceSpan) -> Flow {
        // Closing barrier at the last stage's offset, so the final stage
        // cannot leak into whatever follows the block.
        if let Some(frame) = self.frame_mut().timing_stack.pop() {
            self.emit_barrier(&frame.timevar, frame.last_stage, span);
        }
        Flow::Continue
    }

    fn stage_post(&mut self, span: &SourceSpan, offset: i32) -> Flow {
        let Some(frame) = self.frame().timing_stack.last() else {
            self.error(
                span,
                "'stage' statement appears outside of a timing {} block; staging \
                 barriers can occur only inside the context of a timing {} block",
            );
            return Flow::Stop;
        };
        let timevar = frame.timevar.clone();
        let last_stage = frame.last_stage;
        // Late-constrain the previous stage, then early-constrain the new one.
        self.emit_barrier(&timevar, last_stage, span);
        self.emit_barrier(&timevar, offset, span);
        if let Some(frame) = self.frame_mut().timing_stack.last_mut() {
            frame.last_stage = offset;
        }
        Flow::Continue
    }

    // ---- if/else -----------------------------------------------------

    fn lower_if(
        &mut self,
        ast: &mut Ast,
        id: StmtId,
        cond: ExprId,
        if_body: StmtId,
        else_body: Option<StmtId>,
    ) -> Flow {
        let span = ast.stmt(id).span.clone();
        let if_bb = self.add_bb("if_body");
        let else_bb = self.add_bb("else_body");

        // The condition lowers into the current block; as a pre-hook we do
        // not get this for free the way post-hooks do.
        if walk_expr(ast, cond, self) == Flow::Stop {
            return Flow::Stop;
        }
        let Some(cond_value) = self.require_ir(ast, cond) else {
            return Flow::Stop;
        };

        let mut branch = self.new_stmt(StatementKind::If);
        branch.args.push(cond_value);
        self.push_target(&mut branch, if_bb);
        self.push_target(&mut branch, else_bb);
        branch.span = Some(span.clone());
        self.emit_cur(branch);

        // Each side lowers under its own binding overlay; the side may move
        // the current block, so its end block is whatever is current after.
        let level = self.bindings.push();
        self.cur_bb = Some(if_bb);
        if walk_stmt(ast, if_body, self) == Flow::Stop {
            return Flow::Stop;
        }
        let if_overlay = self.bindings.overlay(level);
        self.bindings.pop_to(level);
        let if_end = self.cur();

        let level = self.bindings.push();
        self.cur_bb = Some(else_bb);
        if let Some(else_body) = else_body {
            if walk_stmt(ast, else_body, self) == Flow::Stop {
                return Flow::Stop;
            }
        }
        let else_overlay = self.bindings.overlay(level);
        self.bindings.pop_to(level);
        let else_end = self.cur();

        // Merge point: both sides jump here, and every let rebound on either
        // side joins through a phi.
        let merge = self.add_bb("if_else_merge");
        self.cur_bb = Some(merge);
        self.emit_jmp(if_end, merge);
        self.emit_jmp(else_end, merge);

        let joined = self
            .bindings
            .join_overlays(&[if_overlay, else_overlay]);
        for (let_id, contributors) in joined {
            let values: Option<Vec<ValueId>> =
                contributors.iter().map(|&e| self.ir_of(e)).collect();
            let Some(values) = values else {
                self.error(
                    &span,
                    "if/else reassigns a value without underlying IR representation; \
                     this usually occurs when attempting to reassign port variables",
                );
                return Flow::Stop;
            };
            let mut phi = self.new_stmt(StatementKind::Phi);
            phi.width = self.width_of(values[0]);
            phi.args = values;
            self.push_target(&mut phi, if_end);
            self.push_target(&mut phi, else_end);
            let phi_value = self.emit(merge, phi);
            trace!(let_id = let_id.0, phi = phi_value.0, "if/else merge phi");

            let ty = ast.expr(contributors[0]).ty;
            let placeholder = self.add_placeholder(ast, ty, phi_value);
            self.bindings.set(let_id, placeholder);
        }

        Flow::Skip
    }

    // ---- while / break / continue ------------------------------------

    fn lower_while(
        &mut self,
        ast: &mut Ast,
        id: StmtId,
        cond: ExprId,
        body: StmtId,
        label: Option<String>,
    ) -> Flow {
        let span = ast.stmt(id).span.clone();
        let prefix = label.clone().unwrap_or_else(|| "while".to_string());

        let overlay_depth = self.bindings.push();
        let header = self.add_bb(&format!("{prefix}_header"));
        let footer = self.add_bb(&format!("{prefix}_footer"));
        let in_bb = self.cur();
        self.emit_jmp(in_bb, header);
        self.cur_bb = Some(header);
        self.frame_mut().loop_frames.push(LoopFrame {
            label,
            overlay_depth,
            header,
            footer,
            in_bb,
            continue_edges: Vec::new(),
            break_edges: Vec::new(),
        });

        // Pre-emit a header phi for every binding in scope with an IR value.
        // This keeps the algorithm single-pass: nothing needs fixing up when
        // the body turns out to reassign a binding, at the cost of trivial
        // phis that synthesis removes. Ports have no IR value and are
        // skipped; rebinding those in a loop is an error anyway.
        let mut header_phis: BTreeMap<StmtId, ValueId> = BTreeMap::new();
        for let_id in self.bindings.keys() {
            let Some(binding) = self.bindings.get(let_id) else {
                continue;
            };
            let Some(binding_ir) = self.ir_of(binding) else {
                continue;
            };
            let mut phi = self.new_stmt(StatementKind::Phi);
            phi.width = self.width_of(binding_ir);
            phi.args.push(binding_ir);
            self.push_target(&mut phi, in_bb);
            let phi_value = self.emit(header, phi);
            header_phis.insert(let_id, phi_value);

            let ty = ast.expr(binding).ty;
            let placeholder = self.add_placeholder(ast, ty, phi_value);
            self.bindings.set(let_id, placeholder);
        }

        // Loop condition lowers in the header block.
        if walk_expr(ast, cond, self) == Flow::Stop {
            return Flow::Stop;
        }
        let Some(cond_value) = self.require_ir(ast, cond) else {
            return Flow::Stop;
        };

        let body_bb = self.add_bb(&format!("{prefix}_body"));
        let mut branch = self.new_stmt(StatementKind::If);
        branch.args.push(cond_value);
        self.push_target(&mut branch, body_bb);
        self.push_target(&mut branch, footer);
        branch.span = Some(span.clone());
        self.emit(header, branch);

        // Implicit break edge: the loop condition failing exits via the
        // header.
        let overlay = self.bindings.overlay(overlay_depth);
        if let Some(frame) = self.frame_mut().loop_frames.last_mut() {
            frame.break_edges.push((header, overlay));
        }

        self.cur_bb = Some(body_bb);
        if walk_stmt(ast, body, self) == Flow::Stop {
            return Flow::Stop;
        }

        // Implicit continue edge at the end of the body.
        let body_end = self.cur();
        self.emit_jmp(body_end, header);
        let overlay = self.bindings.overlay(overlay_depth);
        if let Some(frame) = self.frame_mut().loop_frames.last_mut() {
            frame.continue_edges.push((body_end, overlay));
        }

        self.bindings.pop_to(overlay_depth);

        let Some(frame) = self.frame_mut().loop_frames.pop() else {
            return Flow::Stop;
        };
        if !self.fill_header_phis(&span, &header_phis, &frame.continue_edges) {
            return Flow::Stop;
        }
        if !self.emit_footer_phis(ast, &span, frame.footer, &frame.break_edges) {
            return Flow::Stop;
        }

        // The footer is the loop's single exit point.
        self.cur_bb = Some(frame.footer);
        Flow::Skip
    }

    /// Append one argument per continue edge to each pre-emitted header phi
    fn fill_header_phis(
        &mut self,
        span: &SourceSpan,
        header_phis: &BTreeMap<StmtId, ValueId>,
        edges: &[(BlockId, Overlay)],
    ) -> bool {
        let overlays: Vec<Overlay> = edges.iter().map(|(_, o)| o.clone()).collect();
        let joined = self.bindings.join_overlays(&overlays);
        for (let_id, contributors) in joined {
            let Some(&phi_value) = header_phis.get(&let_id) else {
                // Declared inside the loop body: scope-local, dies with the
                // iteration, no phi to feed.
                continue;
            };
            for (i, &contributor) in contributors.iter().enumerate() {
                let Some(value) = self.ir_of(contributor) else {
                    self.error(
                        span,
                        "attempt to reassign a value without an IR representation \
                         inside a while loop; this usually occurs when attempting \
                         to reassign port variables",
                    );
                    return false;
                };
                let in_bb = edges[i].0;
                let width = self.width_of(value);
                let label = self.prog.block(in_bb).label.clone();
                if let Some(phi) = self.prog.stmt_mut(phi_value) {
                    phi.args.push(value);
                    phi.targets.push(in_bb);
                    phi.target_labels.push(label);
                    phi.width = width;
                }
            }
        }
        true
    }

    /// Join break edges in the footer. With a single break edge there is
    /// nothing to merge: each let rebinds to its one contributor. With
    /// several, every joined let gets a footer phi over its per-edge
    /// contributors.
    fn emit_footer_phis(
        &mut self,
        ast: &mut Ast,
        span: &SourceSpan,
        footer: BlockId,
        edges: &[(BlockId, Overlay)],
    ) -> bool {
        let overlays: Vec<Overlay> = edges.iter().map(|(_, o)| o.clone()).collect();
        let joined = self.bindings.join_overlays(&overlays);
        for (let_id, contributors) in joined {
            if edges.len() <= 1 {
                self.bindings.set(let_id, contributors[0]);
                continue;
            }
            let mut phi = self.new_stmt(StatementKind::Phi);
            for (i, &contributor) in contributors.iter().enumerate() {
                let Some(value) = self.ir_of(contributor) else {
                    self.error(
                        span,
                        "attempt to reassign a value without an IR representation \
                         inside a while loop; this usually occurs when attempting \
                         to reassign port variables",
                    );
                    return false;
                };
                phi.width = self.width_of(value);
                phi.args.push(value);
                self.push_target(&mut phi, edges[i].0);
            }
            let phi_value = self.emit(footer, phi);
            trace!(let_id = let_id.0, phi = phi_value.0, "loop footer phi");

            let ty = match &ast.stmt(let_id).kind {
                StmtKind::Let { ty, .. } => *ty,
                _ => ast.expr(contributors[0]).ty,
            };
            let placeholder = self.add_placeholder(ast, ty, phi_value);
            self.bindings.set(let_id, placeholder);
        }
        true
    }

    fn find_loop_frame(&mut self, span: &SourceSpan, label: Option<&str>) -> Option<usize> {
        let frames = &self.frame().loop_frames;
        match label {
            Some(label) => {
                let found = frames
                    .iter()
                    .rposition(|f| f.label.as_deref() == Some(label));
                if found.is_none() {
                    self.error(
                        span,
                        format!("break/continue with unknown label '{label}'"),
                    );
                }
                found
            }
            None => {
                if frames.is_empty() {
                    self.error(span, "break/continue not in loop");
                    None
                } else {
                    Some(frames.len() - 1)
                }
            }
        }
    }

    fn break_continue_post(
        &mut self,
        ast: &Ast,
        id: StmtId,
        label: Option<&str>,
        is_break: bool,
    ) -> Flow {
        let span = ast.stmt(id).span.clone();
        let Some(frame_idx) = self.find_loop_frame(&span, label) else {
            return Flow::Stop;
        };
        let (overlay_depth, target) = {
            let frame = &self.frame().loop_frames[frame_idx];
            (
                frame.overlay_depth,
                if is_break { frame.footer } else { frame.header },
            )
        };

        // Capture the bindings up to this point, then fork the scope so any
        // code after the jump stays well-formed.
        let overlay = self.bindings.overlay(overlay_depth);
        self.bindings.push();
        let from = self.cur();
        {
            let frame = &mut self.frame_mut().loop_frames[frame_idx];
            if is_break {
                frame.break_edges.push((from, overlay));
            } else {
                frame.continue_edges.push((from, overlay));
            }
        }
        self.emit_jmp(from, target);

        // Keep a current block; anything lowered into it is unreachable and
        // swept after lowering.
        let unreachable = self.add_bb("unreachable");
        self.cur_bb = Some(unreachable);
        Flow::Continue
    }

    // ---- spawn and nested functions ----------------------------------

    fn lower_spawn(&mut self, ast: &mut Ast, id: StmtId, body: StmtId) -> Flow {
        let span = ast.stmt(id).span.clone();
        let emitting_bb = self.cur();
        let spawn_bb = self.add_bb("spawn");

        let mut stmt = self.new_stmt(StatementKind::Spawn);
        stmt.width = TXN_ID_WIDTH;
        self.push_target(&mut stmt, spawn_bb);
        stmt.span = Some(span);
        self.emit(emitting_bb, stmt);

        // The spawned path lowers under its own binding scope and must end
        // by killing its transaction.
        self.cur_bb = Some(spawn_bb);
        let level = self.bindings.push();
        if walk_stmt(ast, body, self) == Flow::Stop {
            return Flow::Stop;
        }
        self.bindings.pop_to(level);
        let kill = self.new_stmt(StatementKind::Kill);
        self.emit_cur(kill);

        // Lowering continues on the fall-through path of the emitting block.
        self.cur_bb = Some(emitting_bb);
        Flow::Skip
    }

    fn lower_nested_func(&mut self, ast: &mut Ast, body: StmtId) -> Flow {
        self.frames.push(FuncFrame::with_saved_bb(self.cur_bb));
        let entry = self.add_bb("anon_func");
        self.prog.block_mut(entry).is_entry = true;
        self.prog.entries.push(entry);
        self.cur_bb = Some(entry);

        if walk_stmt(ast, body, self) == Flow::Stop {
            let frame = self.frames.pop();
            self.cur_bb = frame.and_then(|f| f.saved_bb);
            return Flow::Stop;
        }
        let done = self.new_stmt(StatementKind::Done);
        self.emit_cur(done);

        let frame = self.frames.pop();
        self.cur_bb = frame.and_then(|f| f.saved_bb);
        Flow::Skip
    }
}

fn pure_ir_op(op: ExprOp) -> Option<IrOp> {
    match op {
        ExprOp::Add => Some(IrOp::Add),
        ExprOp::Sub => Some(IrOp::Sub),
        ExprOp::Mul => Some(IrOp::Mul),
        ExprOp::Div => Some(IrOp::Div),
        ExprOp::Rem => Some(IrOp::Rem),
        ExprOp::And => Some(IrOp::And),
        ExprOp::Or => Some(IrOp::Or),
        ExprOp::Not => Some(IrOp::Not),
        ExprOp::Xor => Some(IrOp::Xor),
        ExprOp::Lsh => Some(IrOp::Lsh),
        ExprOp::Rsh => Some(IrOp::Rsh),
        ExprOp::Sel => Some(IrOp::Select),
        ExprOp::Bitslice => Some(IrOp::Bitslice),
        ExprOp::Concat => Some(IrOp::Concat),
        ExprOp::Eq => Some(IrOp::CmpEq),
        ExprOp::Ne => Some(IrOp::CmpNe),
        ExprOp::Le => Some(IrOp::CmpLe),
        ExprOp::Lt => Some(IrOp::CmpLt),
        ExprOp::Ge => Some(IrOp::CmpGe),
        ExprOp::Gt => Some(IrOp::CmpGt),
        _ => None,
    }
}

impl AstVisitor for AstToIr<'_> {
    fn stmt_pre(&mut self, ast: &mut Ast, id: StmtId) -> Flow {
        let kind = ast.stmt(id).kind.clone();
        match kind {
            // The LHS may contain array or register references that are
            // writes, not reads; only the RHS subtree is lowered here and
            // the post hook dispatches on the LHS shape.
            StmtKind::Assign { rhs, .. } => {
                if walk_expr(ast, rhs, self) == Flow::Stop {
                    return Flow::Stop;
                }
                Flow::Skip
            }
            StmtKind::If {
                cond,
                if_body,
                else_body,
            } => self.lower_if(ast, id, cond, if_body, else_body),
            StmtKind::While { cond, body, label } => {
                self.lower_while(ast, id, cond, body, label)
            }
            StmtKind::Spawn { body } => self.lower_spawn(ast, id, body),
            StmtKind::NestedFunc { body } => self.lower_nested_func(ast, body),
            StmtKind::OnKillYounger { body } => {
                // Cloned now, lowered at each subsequent kill-younger.
                let clone = ast.clone_stmt(body);
                self.frame_mut().on_kill_youngers.push(clone);
                Flow::Skip
            }
            StmtKind::Timing { .. } => {
                let span = ast.stmt(id).span.clone();
                self.timing_pre(&span)
            }
            _ => Flow::Continue,
        }
    }

    fn stmt_post(&mut self, ast: &mut Ast, id: StmtId) -> Flow {
        let kind = ast.stmt(id).kind.clone();
        match kind {
            StmtKind::Let { rhs, .. } => {
                // The value already exists as the RHS's IR; the let itself
                // emits nothing.
                self.bindings.set(id, rhs);
                Flow::Continue
            }
            StmtKind::Assign { lhs, rhs } => self.assign_post(ast, id, lhs, rhs),
            StmtKind::Write { port, rhs } => self.write_post(ast, id, port, rhs),
            StmtKind::Kill => {
                let span = ast.stmt(id).span.clone();
                let mut stmt = self.new_stmt(StatementKind::Kill);
                stmt.span = Some(span);
                self.emit_cur(stmt);
                Flow::Continue
            }
            StmtKind::KillYounger => {
                let span = ast.stmt(id).span.clone();
                self.kill_younger_post(ast, &span)
            }
            StmtKind::KillIf { cond } => self.kill_if_post(ast, id, cond),
            StmtKind::Stage { offset } => {
                let span = ast.stmt(id).span.clone();
                self.stage_post(&span, offset)
            }
            StmtKind::Timing { .. } => {
                let span = ast.stmt(id).span.clone();
                self.timing_post(&span)
            }
            StmtKind::Break { label } => {
                self.break_continue_post(ast, id, label.as_deref(), true)
            }
            StmtKind::Continue { label } => {
                self.break_continue_post(ast, id, label.as_deref(), false)
            }
            StmtKind::BypassStart { .. }
            | StmtKind::BypassEnd { .. }
            | StmtKind::BypassWrite { .. } => self.bypass_stmt_post(ast, id),
            _ => Flow::Continue,
        }
    }

    fn expr_post(&mut self, ast: &mut Ast, id: ExprId) -> Flow {
        let (op, span, ty, ops) = {
            let e = ast.expr(id);
            (e.op, e.span.clone(), e.ty, e.ops.clone())
        };

        // The common case: a pure operator with a 1-to-1 IR statement.
        if let Some(ir_op) = pure_ir_op(op) {
            let mut stmt = self.new_stmt(StatementKind::Expr);
            stmt.op = Some(ir_op);
            stmt.width = ty.width;
            stmt.span = Some(span);
            for child in ops {
                let Some(value) = self.require_ir(ast, child) else {
                    return Flow::Stop;
                };
                stmt.args.push(value);
            }
            let value = self.emit_cur(stmt);
            self.associate(id, value);
            return Flow::Continue;
        }

        match op {
            ExprOp::Const => {
                let mut stmt = self.new_stmt(StatementKind::Expr);
                stmt.op = Some(IrOp::Const);
                stmt.constant = ast.expr(id).constant;
                stmt.width = ty.width;
                stmt.span = Some(span);
                let value = self.emit_cur(stmt);
                self.associate(id, value);
            }
            ExprOp::Var => {
                // Pass through the current binding; no new IR.
                let Some(def) = ast.expr(id).def else {
                    self.error(&span, "variable reference with no definition");
                    return Flow::Stop;
                };
                let Some(binding) = self.bindings.get(def) else {
                    self.error(&span, "variable used before definition");
                    return Flow::Stop;
                };
                if let Some(value) = self.ir_of(binding) {
                    self.associate(id, value);
                }
            }
            ExprOp::PortDef => {
                let named = ast
                    .expr(id)
                    .ident
                    .as_deref()
                    .filter(|n| !n.is_empty())
                    .map(str::to_owned);
                if let Some(name) = named {
                    // A user-specified name makes the port exported.
                    if ty.is_chan {
                        self.error(
                            &span,
                            "cannot use a defined name on a chan: chans must be anonymous",
                        );
                        return Flow::Stop;
                    }
                    let mut stmt = self.new_stmt(StatementKind::PortExport);
                    stmt.port_name = Some(name);
                    stmt.width = ty.width;
                    stmt.span = Some(span);
                    self.emit_cur(stmt);
                } else {
                    let name = self.gensym("port");
                    ast.expr_mut(id).ident = Some(name);
                }
            }
            ExprOp::PortRead => {
                let Some(portdef) = self.find_entity_def(ast, ops[0], ExprOp::PortDef, id)
                else {
                    return Flow::Stop;
                };
                let def = ast.expr(portdef);
                let kind = if def.ty.is_port {
                    StatementKind::PortRead
                } else if def.ty.is_chan {
                    StatementKind::ChanRead
                } else {
                    // Typecheck catches this before we get this far.
                    self.error(&span, "read from something not a port or chan");
                    return Flow::Stop;
                };
                let port_name = def.ident.clone();
                let width = def.ty.width;
                let mut stmt = self.new_stmt(kind);
                stmt.port_name = port_name;
                stmt.width = width;
                stmt.span = Some(span);
                let value = self.emit_cur(stmt);
                self.associate(id, value);
            }
            ExprOp::ArrayInit => {
                let name = self.gensym("array");
                ast.expr_mut(id).ident = Some(name.clone());
                let mut stmt = self.new_stmt(StatementKind::ArraySize);
                stmt.port_name = Some(name);
                stmt.constant = Some(ty.array_size);
                stmt.span = Some(span);
                self.emit_cur(stmt);
            }
            ExprOp::ArrayRef => {
                let Some(arraydef) =
                    self.find_entity_def(ast, ops[0], ExprOp::ArrayInit, id)
                else {
                    return Flow::Stop;
                };
                let port_name = ast.expr(arraydef).ident.clone();
                let Some(index) = self.require_ir(ast, ops[1]) else {
                    return Flow::Stop;
                };
                let mut stmt = self.new_stmt(StatementKind::ArrayRead);
                stmt.port_name = port_name;
                stmt.width = ty.width;
                stmt.args.push(index);
                stmt.span = Some(span);
                let value = self.emit_cur(stmt);
                self.associate(id, value);
            }
            ExprOp::RegInit => {
                let name = self.gensym("reg");
                ast.expr_mut(id).ident = Some(name);
            }
            ExprOp::RegRef => {
                let Some(regdef) = self.find_entity_def(ast, ops[0], ExprOp::RegInit, id)
                else {
                    return Flow::Stop;
                };
                let mut stmt = self.new_stmt(StatementKind::RegRead);
                stmt.port_name = ast.expr(regdef).ident.clone();
                stmt.width = ty.width;
                stmt.span = Some(span);
                let value = self.emit_cur(stmt);
                self.associate(id, value);
            }
            ExprOp::BypassDef => {
                let name = self.gensym("bypass");
                ast.expr_mut(id).ident = Some(name);
            }
            ExprOp::BypassPresent | ExprOp::BypassReady | ExprOp::BypassRead => {
                let Some(bypassdef) =
                    self.find_entity_def(ast, ops[0], ExprOp::BypassDef, id)
                else {
                    return Flow::Stop;
                };
                let kind = match op {
                    ExprOp::BypassPresent => StatementKind::BypassPresent,
                    ExprOp::BypassReady => StatementKind::BypassReady,
                    _ => StatementKind::BypassRead,
                };
                let port_name = ast.expr(bypassdef).ident.clone();
                let Some(index) = self.require_ir(ast, ops[1]) else {
                    return Flow::Stop;
                };
                let mut stmt = self.new_stmt(kind);
                stmt.port_name = port_name;
                stmt.width = ty.width;
                stmt.args.push(index);
                stmt.span = Some(span);
                let value = self.emit_cur(stmt);
                self.associate(id, value);
            }
            ExprOp::StmtBlock => {
                // The body already lowered during the visit; the block's
                // value is the value of its final expression statement.
                let value_expr = ast.expr(id).stmt.and_then(|block| {
                    match &ast.stmt(block).kind {
                        StmtKind::Block(stmts) => stmts.last().and_then(|&last| {
                            match ast.stmt(last).kind {
                                StmtKind::Expr(e) => Some(e),
                                _ => None,
                            }
                        }),
                        _ => None,
                    }
                });
                let Some(value_expr) = value_expr else {
                    self.error(
                        &span,
                        "statement-block expr where last stmt is not an expression statement",
                    );
                    return Flow::Stop;
                };
                let Some(value) = self.require_ir(ast, value_expr) else {
                    return Flow::Stop;
                };
                self.associate(id, value);
            }
            ExprOp::Cast => {
                // Widths always match across a cast, so no computation:
                // alias the operand's IR value.
                let Some(value) = self.require_ir(ast, ops[0]) else {
                    return Flow::Stop;
                };
                self.associate(id, value);
            }
            _ => {
                self.error(&span, format!("unsupported expression node: {op:?}"));
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}
