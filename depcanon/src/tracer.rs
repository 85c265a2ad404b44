// tracer.rs — Dependency inference: memory conflicts, tile indices, loop tokens
//
// Adds predecessor tokens to async events from three sources: conflicting
// accesses to the same buffer (RAW, WAW/WAR), index values produced by
// compute bundles, and loop-carried threading through enclosing loops. Also
// exposes the backward scalar and control-token traces used by cleanup.
//
// Preconditions: program is well-formed (every token has one producer).
// Postconditions: only tokens of ops that precede the sink in its own block
//   (directly or through an async ancestor) are added by memory tracing.
// Failure modes: `CanonError` on non-token adds, unknown dependency modes,
//   loops without a carried token and malformed execute bodies.
// Side effects: mutates dependency lists in place; emits `tracing` events.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use tracing::{debug, trace, warn};

use crate::diag::{codes, Diagnostic};
use crate::error::{CanonError, Result};
use crate::id::{BlockId, OpId, ValueId};
use crate::ir::{LoopTokenSlot, OpKind, Program, UseRole};
use crate::region::{regions_conflict, PartialRegion};

// ── Modes ────────────────────────────────────────────────────────────────

/// Which dependence a trace looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepMode {
    /// True dependence: prior writers of a region the sink reads.
    Raw,
    /// Output and anti dependence: any prior access to a region the sink writes.
    WawWar,
}

impl FromStr for DepMode {
    type Err = CanonError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RAW" => Ok(DepMode::Raw),
            "WAW/WAR" => Ok(DepMode::WawWar),
            other => Err(CanonError::UnknownDepMode(other.to_string())),
        }
    }
}

impl DepMode {
    pub fn filter(self) -> AccessFilter {
        match self {
            DepMode::Raw => AccessFilter::Writes,
            DepMode::WawWar => AccessFilter::Any,
        }
    }
}

/// Which uses of a buffer count as conflicting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFilter {
    Reads,
    Writes,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl AccessFilter {
    fn admits(self, access: Access) -> bool {
        match self {
            AccessFilter::Any => true,
            AccessFilter::Reads => access == Access::Read,
            AccessFilter::Writes => access == Access::Write,
        }
    }
}

// ── Access summaries ─────────────────────────────────────────────────────

/// Buffer regions and index scalars an op reads and writes.
#[derive(Debug, Clone, Default)]
pub struct AccessSummary {
    pub reads: Vec<PartialRegion>,
    pub writes: Vec<PartialRegion>,
    pub scalar_ins: Vec<ValueId>,
    pub scalar_outs: Vec<ValueId>,
}

/// Summarise an op's accesses. An `Execute` is summarised through its
/// primitives.
pub fn access_summary(program: &Program, op: OpId) -> AccessSummary {
    let mut s = AccessSummary::default();
    summarize_into(program, op, &mut s);
    s
}

fn summarize_into(program: &Program, op: OpId, s: &mut AccessSummary) {
    let o = program.op(op);
    match &o.kind {
        OpKind::Execute => {
            for prim in program.execute_primitives(op) {
                summarize_into(program, prim, s);
            }
        }
        OpKind::Dma { dst, src } => {
            s.reads.push(PartialRegion::from_access(program, src));
            s.writes.push(PartialRegion::from_access(program, dst));
            s.scalar_ins.extend(src.scalars());
            s.scalar_outs.extend(dst.scalars());
        }
        OpKind::ChannelPut { src, .. } => {
            s.reads.push(PartialRegion::from_access(program, src));
            s.scalar_ins.extend(src.scalars());
        }
        OpKind::ChannelGet { dst, .. } => {
            s.writes.push(PartialRegion::from_access(program, dst));
            s.scalar_outs.extend(dst.scalars());
        }
        OpKind::Linalg {
            inputs, outputs, ..
        } => {
            for &v in inputs {
                let ty = program.value_type(v);
                if ty.is_memref() {
                    s.reads.push(PartialRegion::whole(program, v));
                } else if ty.is_index() {
                    s.scalar_ins.push(v);
                }
            }
            for &v in outputs {
                let ty = program.value_type(v);
                if ty.is_memref() {
                    s.reads.push(PartialRegion::whole(program, v));
                    s.writes.push(PartialRegion::whole(program, v));
                } else if ty.is_index() {
                    s.scalar_ins.push(v);
                    s.scalar_outs.push(v);
                }
            }
        }
        OpKind::Dealloc { memref } => {
            s.reads.push(PartialRegion::whole(program, *memref));
            s.writes.push(PartialRegion::whole(program, *memref));
        }
        OpKind::Copy { source, target } => {
            s.reads.push(PartialRegion::whole(program, *source));
            s.reads.push(PartialRegion::whole(program, *target));
            s.writes.push(PartialRegion::whole(program, *target));
        }
        OpKind::MulI { lhs, rhs } | OpKind::AddI { lhs, rhs } => {
            s.scalar_ins.push(*lhs);
            s.scalar_ins.push(*rhs);
            s.scalar_outs.extend(o.results.iter().copied());
        }
        OpKind::AffineApply { operands } => {
            s.scalar_ins.extend(operands.iter().copied());
            s.scalar_outs.extend(o.results.iter().copied());
        }
        OpKind::Alloc | OpKind::Opaque { .. } => {
            o.for_each_operand(|&v, role| {
                if role == UseRole::AsyncDep {
                    return;
                }
                let ty = program.value_type(v);
                if ty.is_memref() {
                    s.reads.push(PartialRegion::whole(program, v));
                    s.writes.push(PartialRegion::whole(program, v));
                } else if ty.is_index() {
                    s.scalar_ins.push(v);
                    s.scalar_outs.push(v);
                }
            });
            for &r in &o.results {
                let ty = program.value_type(r);
                if ty.is_memref() {
                    s.writes.push(PartialRegion::whole(program, r));
                } else if ty.is_index() {
                    s.scalar_outs.push(r);
                }
            }
        }
        _ => {}
    }
}

/// Read/write classification of a buffer from its uses. Unknown users and
/// an unused buffer count as writes.
pub fn classify_operand(program: &Program, value: ValueId) -> Result<Access> {
    if !program.value_type(value).is_memref() {
        return Err(CanonError::NotAMemref { value });
    }
    let mut read = false;
    let mut write = false;
    for u in program.uses(value) {
        match u.role {
            UseRole::DmaSrc | UseRole::ChannelSrc | UseRole::LinalgInput => read = true,
            UseRole::DmaDst | UseRole::ChannelDst | UseRole::LinalgOutput => write = true,
            _ => write = true,
        }
    }
    if write || !read {
        Ok(Access::Write)
    } else {
        Ok(Access::Read)
    }
}

// ── Induction and control traces ─────────────────────────────────────────

/// Induction variables and hierarchy ids an event's scalars derive from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InductionTrace {
    pub loop_deps: Vec<ValueId>,
    /// Async events visited on the way back, in visit order.
    pub ops: Vec<OpId>,
}

fn candidate_scalars(program: &Program, op: OpId) -> Result<Vec<ValueId>> {
    let o = program.op(op);
    match &o.kind {
        OpKind::Dma { src, .. } => Ok(src.scalars().collect()),
        OpKind::Execute => {
            let prims = program.execute_primitives(op);
            if prims.len() != 1 {
                return Err(CanonError::MalformedExecute {
                    op,
                    reason: "expected exactly one primitive",
                });
            }
            Ok(program.op(prims[0]).operands().into_iter().map(|(v, _)| v).collect())
        }
        _ => Ok(o
            .operands()
            .into_iter()
            .filter(|&(_, role)| role != UseRole::AsyncDep)
            .map(|(v, _)| v)
            .collect()),
    }
}

pub fn trace_dependent_induction_var(program: &Program, op: OpId) -> Result<InductionTrace> {
    let mut out = InductionTrace::default();
    induction_var_rec(program, op, &mut out)?;
    Ok(out)
}

fn induction_var_rec(program: &Program, op: OpId, out: &mut InductionTrace) -> Result<()> {
    let candidates = candidate_scalars(program, op)?;
    for &v in &candidates {
        if program.for_induction_var_owner(v).is_some()
            || program.parallel_iv_owner(v).is_some()
            || program.hierarchy_id_owner(v).is_some()
        {
            out.loop_deps.push(v);
        }
    }
    for &v in &candidates {
        if !program.value_type(v).is_index() {
            continue;
        }
        match program.defining_op(v) {
            Some(def) if program.is_async(def) => {
                out.ops.push(def);
                induction_var_rec(program, def, out)?;
            }
            _ => {
                if program.for_iter_args_owner(v).is_some() {
                    out.loop_deps.push(v);
                }
            }
        }
    }
    Ok(())
}

fn is_control_token(program: &Program, op: OpId, token: ValueId) -> bool {
    if program.for_iter_args_owner(token).is_some()
        || program.parallel_init_vals_owner(op, token).is_some()
    {
        return true;
    }
    match program.defining_op(token) {
        Some(def) => matches!(
            program.op(def).kind,
            OpKind::WaitAll | OpKind::For { .. } | OpKind::Parallel { .. }
        ),
        None => false,
    }
}

/// The nearest control tokens (loop tokens and wait_all joins) reached
/// backward through dependency lists.
pub fn trace_dependent_control_tokens(program: &Program, op: OpId) -> Vec<ValueId> {
    let mut tokens = Vec::new();
    let mut visited = HashSet::new();
    control_token_rec(program, op, &mut tokens, &mut visited);
    tokens
}

fn control_token_rec(
    program: &Program,
    op: OpId,
    tokens: &mut Vec<ValueId>,
    visited: &mut HashSet<OpId>,
) {
    let deps = &program.op(op).async_deps;
    if let Some(&t) = deps.iter().find(|&&t| is_control_token(program, op, t)) {
        if !tokens.contains(&t) {
            tokens.push(t);
        }
        return;
    }
    for &t in deps {
        if let Some(def) = program.defining_op(t) {
            if program.is_async(def) && visited.insert(def) {
                control_token_rec(program, def, tokens, visited);
            }
        }
    }
}

// ── Tracer ───────────────────────────────────────────────────────────────

/// Outcome of the `trace` pass.
#[derive(Debug, Clone, Default)]
pub struct TraceResult {
    pub added: usize,
    /// Hierarchy ids that tile indices were found to depend on.
    pub hierarchy_ids: Vec<ValueId>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Stateful memory-dependency tracer over one program snapshot.
pub struct DependencyTracer {
    order: HashMap<OpId, usize>,
    pub added: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl DependencyTracer {
    pub fn new(program: &Program) -> Self {
        let order = program
            .walk()
            .into_iter()
            .enumerate()
            .map(|(i, op)| (op, i))
            .collect();
        Self {
            order,
            added: 0,
            diagnostics: Vec::new(),
        }
    }

    fn link(&mut self, program: &mut Program, source: OpId, sink: OpId) -> Result<bool> {
        let Some(token) = program.async_token(source) else {
            return Ok(false);
        };
        if program.add_async_dependency_if_new(sink, token)? {
            trace!(%source, %sink, "dependency added");
            self.added += 1;
        }
        Ok(true)
    }

    /// Attach `source` (or its first async ancestor sharing the sink's block
    /// and preceding it) as a predecessor of `sink`.
    pub fn add_dependency_between_ops(
        &mut self,
        program: &mut Program,
        source: OpId,
        sink: OpId,
    ) -> Result<()> {
        if !program.op(sink).kind.is_async_kind() {
            return Err(CanonError::NotAsync { op: sink });
        }
        if program.is_before_in_block(source, sink)
            && program.is_async(source)
            && self.link(program, source, sink)?
        {
            return Ok(());
        }
        for ancestor in program.ancestors(source) {
            if program.is_before_in_block(ancestor, sink)
                && program.is_async(ancestor)
                && self.link(program, ancestor, sink)?
            {
                return Ok(());
            }
        }
        let precedes = match (self.order.get(&source), self.order.get(&sink)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        };
        if precedes {
            warn!(%source, %sink, "no async ancestor shares the sink's block");
            self.diagnostics.push(
                Diagnostic::warning(Some(sink), "dependency could not be elevated to the sink's scope")
                    .with_code(codes::W0101)
                    .with_related(source, "producer")
                    .with_hint("thread the producer's token through an enclosing async event"),
            );
        }
        Ok(())
    }

    /// Add every prior use of `memref` that conflicts with `tile` under
    /// `filter` as a predecessor of `sink`.
    pub fn push_deps_at_current_scope(
        &mut self,
        program: &mut Program,
        memref: ValueId,
        sink: OpId,
        filter: AccessFilter,
        tile: Option<&PartialRegion>,
    ) -> Result<()> {
        if !program.value_type(memref).is_memref() {
            return Err(CanonError::NotAMemref { value: memref });
        }
        let overlaps = |program: &Program, region: PartialRegion| match tile {
            None => true,
            Some(t) => regions_conflict(program, t, &region),
        };
        for u in program.uses(memref) {
            let owner = program.op(u.owner).kind.clone();
            let source = match (&owner, u.role) {
                (OpKind::Dma { src, .. }, UseRole::DmaSrc) => (filter != AccessFilter::Writes
                    && overlaps(program, PartialRegion::from_access(program, src)))
                .then_some(u.owner),
                (OpKind::Dma { dst, .. }, UseRole::DmaDst) => (filter != AccessFilter::Reads
                    && overlaps(program, PartialRegion::from_access(program, dst)))
                .then_some(u.owner),
                (OpKind::ChannelPut { src, .. }, UseRole::ChannelSrc) => (filter
                    != AccessFilter::Writes
                    && overlaps(program, PartialRegion::from_access(program, src)))
                .then_some(u.owner),
                (OpKind::ChannelGet { dst, .. }, UseRole::ChannelDst) => (filter
                    != AccessFilter::Reads
                    && overlaps(program, PartialRegion::from_access(program, dst)))
                .then_some(u.owner),
                (OpKind::Linalg { .. }, role) => {
                    let admitted = match filter {
                        AccessFilter::Writes => role == UseRole::LinalgOutput,
                        _ => true,
                    };
                    program
                        .parent_op(u.owner)
                        .filter(|&p| admitted && matches!(program.op(p).kind, OpKind::Execute))
                }
                (OpKind::Hierarchy { .. }, UseRole::KernelOperand(i)) => {
                    match program.kernel_argument(u.owner, i as usize) {
                        Some(arg) => {
                            let access = classify_operand(program, arg)?;
                            filter.admits(access).then_some(u.owner)
                        }
                        None => None,
                    }
                }
                _ => program
                    .parent_op(u.owner)
                    .filter(|&p| matches!(program.op(p).kind, OpKind::Execute)),
            };
            if let Some(source) = source {
                self.add_dependency_between_ops(program, source, sink)?;
            }
        }
        Ok(())
    }

    /// The buffer-defining bundle of each region is a predecessor; then
    /// conflicting uses are added per `mode`.
    pub fn trace_dependency_from_op(
        &mut self,
        program: &mut Program,
        regions: &[PartialRegion],
        sink: OpId,
        mode: DepMode,
    ) -> Result<()> {
        for region in regions {
            if let Some(def) = program.defining_op(region.memref) {
                if def != sink && matches!(program.op(def).kind, OpKind::Execute) {
                    self.link(program, def, sink)?;
                }
            }
            self.push_deps_at_current_scope(program, region.memref, sink, mode.filter(), Some(region))?;
        }
        Ok(())
    }

    /// Index operands produced by bundles become predecessors. Hierarchy ids
    /// are returned instead; they are not tokens.
    pub fn trace_tile_indices(
        &mut self,
        program: &mut Program,
        summary: &AccessSummary,
        sink: OpId,
    ) -> Result<Vec<ValueId>> {
        let indices: Vec<ValueId> = summary
            .reads
            .iter()
            .chain(&summary.writes)
            .flat_map(|r| r.indices.iter().flatten().copied())
            .chain(summary.scalar_ins.iter().copied())
            .chain(summary.scalar_outs.iter().copied())
            .collect();
        let mut ids = Vec::new();
        for idx in indices {
            if let Some(def) = program.defining_op(idx) {
                if def != sink && matches!(program.op(def).kind, OpKind::Execute) {
                    self.link(program, def, sink)?;
                }
            } else if program.hierarchy_id_owner(idx).is_some() && !ids.contains(&idx) {
                ids.push(idx);
            }
        }
        Ok(ids)
    }
}

/// Thread `op` through its enclosing loops: the loop's carried token becomes
/// a predecessor of the event, and the event's token a predecessor of the
/// wait_all that feeds the loop's terminator.
pub fn reconnect_loop_carried_dependency(program: &mut Program, op: OpId) -> Result<()> {
    let async_op = match &program.op(op).kind {
        k if k.is_async_kind() => op,
        OpKind::Parallel { .. } | OpKind::For { .. } => {
            let token = program.loop_carried_token(op, LoopTokenSlot::Operand)?;
            program.defining_op(token).ok_or(CanonError::MalformedLoop {
                op,
                reason: "carried token has no producer",
            })?
        }
        k => {
            return Err(CanonError::UnknownKind {
                op,
                kind: k.mnemonic(),
            })
        }
    };
    let Some(parent) = program.parent_op(op) else {
        return Ok(());
    };
    let slot = match program.op(parent).kind {
        OpKind::Parallel { .. } => LoopTokenSlot::Operand,
        OpKind::For { .. } => LoopTokenSlot::Argument,
        _ => return Ok(()),
    };
    let result = program
        .op(op)
        .results
        .first()
        .copied()
        .ok_or(CanonError::MalformedLoop {
            op,
            reason: "event produces no token",
        })?;
    let token = program.loop_carried_token(parent, slot)?;
    program.add_async_dependency_if_new(async_op, token)?;
    let body = body_of(program, parent)?;
    let join_operand = match program.terminator(body).map(|t| &program.op(t).kind) {
        Some(OpKind::Reduce { operand }) => *operand,
        Some(OpKind::Yield { operands }) if !operands.is_empty() => operands[0],
        _ => {
            return Err(CanonError::MalformedLoop {
                op: parent,
                reason: "loop terminator carries no token",
            })
        }
    };
    let join = program
        .defining_op(join_operand)
        .filter(|&j| matches!(program.op(j).kind, OpKind::WaitAll))
        .ok_or(CanonError::MalformedLoop {
            op: parent,
            reason: "loop terminator is not fed by a wait_all",
        })?;
    program.add_async_dependency_if_new(join, result)?;
    reconnect_loop_carried_dependency(program, parent)
}

fn body_of(program: &Program, op: OpId) -> Result<BlockId> {
    program
        .op(op)
        .regions
        .first()
        .copied()
        .ok_or(CanonError::MalformedLoop {
            op,
            reason: "loop has no body",
        })
}

/// The `trace` pass: for every bundle, transfer and channel event in program
/// order, RAW on its reads, WAW/WAR on its writes, then tile indices.
pub fn infer_memory_dependencies(program: &mut Program) -> Result<TraceResult> {
    let mut tracer = DependencyTracer::new(program);
    let mut hierarchy_ids = Vec::new();
    for op in program.walk() {
        if !matches!(
            program.op(op).kind,
            OpKind::Execute | OpKind::Dma { .. } | OpKind::ChannelPut { .. } | OpKind::ChannelGet { .. }
        ) {
            continue;
        }
        let summary = access_summary(program, op);
        tracer.trace_dependency_from_op(program, &summary.reads, op, DepMode::Raw)?;
        tracer.trace_dependency_from_op(program, &summary.writes, op, DepMode::WawWar)?;
        for id in tracer.trace_tile_indices(program, &summary, op)? {
            if !hierarchy_ids.contains(&id) {
                hierarchy_ids.push(id);
            }
        }
    }
    debug!(added = tracer.added, "memory dependencies inferred");
    Ok(TraceResult {
        added: tracer.added,
        hierarchy_ids,
        diagnostics: tracer.diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{HierarchyLevel, MemAccess, MemorySpace, ValueType};

    const L2_1D: ValueType = ValueType::Memref {
        rank: 1,
        space: MemorySpace::L2,
    };

    fn token(p: &Program, op: OpId) -> ValueId {
        p.async_token(op).unwrap()
    }

    #[test]
    fn dep_mode_parses_known_modes_only() {
        assert_eq!("RAW".parse::<DepMode>().unwrap(), DepMode::Raw);
        assert_eq!("WAW/WAR".parse::<DepMode>().unwrap(), DepMode::WawWar);
        assert!(matches!(
            "RAR".parse::<DepMode>(),
            Err(CanonError::UnknownDepMode(_))
        ));
    }

    #[test]
    fn raw_links_every_prior_writer() {
        let mut p = Program::new();
        let a = p.add_input(L2_1D);
        let r = p.add_input(L2_1D);
        let b = p.add_input(L2_1D);
        let w1 = p.dma(p.body, vec![], MemAccess::whole(r), MemAccess::whole(a));
        let w2 = p.dma(p.body, vec![], MemAccess::whole(r), MemAccess::whole(a));
        let rd = p.dma(p.body, vec![], MemAccess::whole(b), MemAccess::whole(r));
        infer_memory_dependencies(&mut p).unwrap();
        assert_eq!(p.op(rd).async_deps, vec![token(&p, w1), token(&p, w2)]);
        // WAW between the writers
        assert_eq!(p.op(w2).async_deps, vec![token(&p, w1)]);
        assert!(p.op(w1).async_deps.is_empty());
    }

    #[test]
    fn disjoint_constant_offsets_do_not_conflict() {
        let mut p = Program::new();
        let a = p.add_input(L2_1D);
        let r = p.add_input(L2_1D);
        let c0 = p.constant(0);
        let c1 = p.constant(1);
        let w0 = p.dma(p.body, vec![], MemAccess::at(r, vec![c0]), MemAccess::whole(a));
        let w1 = p.dma(p.body, vec![], MemAccess::at(r, vec![c1]), MemAccess::whole(a));
        infer_memory_dependencies(&mut p).unwrap();
        assert!(p.op(w0).async_deps.is_empty());
        assert!(p.op(w1).async_deps.is_empty());
    }

    #[test]
    fn defining_bundle_becomes_predecessor() {
        let mut p = Program::new();
        let src = p.add_input(L2_1D);
        let exec = p.execute(p.body, vec![], Some(L2_1D), |p, b| vec![p.alloc(b, L2_1D)]);
        let buf = p.op(exec).results[1];
        let d = p.dma(p.body, vec![], MemAccess::whole(buf), MemAccess::whole(src));
        infer_memory_dependencies(&mut p).unwrap();
        assert_eq!(p.op(d).async_deps, vec![token(&p, exec)]);
    }

    #[test]
    fn elevation_attaches_async_ancestor() {
        let mut p = Program::new();
        let (launch, body) = p.hierarchy(p.body, HierarchyLevel::Launch, vec![], vec![], vec![], true);
        let inner = p.wait_all(body, vec![]);
        let sink = p.wait_all(p.body, vec![]);
        let mut tracer = DependencyTracer::new(&p);
        tracer.add_dependency_between_ops(&mut p, inner, sink).unwrap();
        assert_eq!(p.op(sink).async_deps, vec![token(&p, launch)]);
        assert!(tracer.diagnostics.is_empty());
    }

    #[test]
    fn elevation_miss_is_reported_not_added() {
        let mut p = Program::new();
        let (_, body) = p.scf_for_const(p.body, 0, 2, 1, vec![]);
        let inner = p.wait_all(body, vec![]);
        p.yield_(body, vec![]);
        let sink = p.wait_all(p.body, vec![]);
        let mut tracer = DependencyTracer::new(&p);
        tracer.add_dependency_between_ops(&mut p, inner, sink).unwrap();
        assert!(p.op(sink).async_deps.is_empty());
        assert_eq!(tracer.diagnostics.len(), 1);
        assert_eq!(tracer.diagnostics[0].code, Some(codes::W0101));
    }

    #[test]
    fn later_uses_are_never_linked() {
        let mut p = Program::new();
        let a = p.add_input(L2_1D);
        let r = p.add_input(L2_1D);
        let sink = p.wait_all(p.body, vec![]);
        let later = p.dma(p.body, vec![], MemAccess::whole(r), MemAccess::whole(a));
        let mut tracer = DependencyTracer::new(&p);
        tracer.add_dependency_between_ops(&mut p, later, sink).unwrap();
        assert!(p.op(sink).async_deps.is_empty());
        assert!(tracer.diagnostics.is_empty());
    }

    #[test]
    fn classify_operand_from_uses() {
        let mut p = Program::new();
        let unused = p.add_input(L2_1D);
        let read = p.add_input(L2_1D);
        let out = p.add_input(L2_1D);
        p.dma(p.body, vec![], MemAccess::whole(out), MemAccess::whole(read));
        assert_eq!(classify_operand(&p, unused).unwrap(), Access::Write);
        assert_eq!(classify_operand(&p, read).unwrap(), Access::Read);
        assert_eq!(classify_operand(&p, out).unwrap(), Access::Write);
        let idx = p.constant(0);
        assert!(classify_operand(&p, idx).is_err());
    }

    #[test]
    fn linalg_outputs_classify_as_writes() {
        let mut p = Program::new();
        let a = p.add_input(L2_1D);
        let c = p.add_input(L2_1D);
        p.execute(p.body, vec![], None, |p, b| {
            p.linalg(b, "matmul", vec![a], vec![c]);
            vec![]
        });
        assert_eq!(classify_operand(&p, a).unwrap(), Access::Read);
        assert_eq!(classify_operand(&p, c).unwrap(), Access::Write);
    }

    #[test]
    fn kernel_argument_classification_matches_mode() {
        let mut p = Program::new();
        let m = p.add_input(L2_1D);
        let l1 = p.add_input(L2_1D);
        let scratch = p.add_input(L2_1D);
        let (launch, body) = p.hierarchy(p.body, HierarchyLevel::Launch, vec![], vec![], vec![m], true);
        let arg = p.kernel_argument(launch, 0).unwrap();
        p.dma(body, vec![], MemAccess::whole(scratch), MemAccess::whole(arg));
        // reading m after a launch that only reads it: no RAW edge
        let reader = p.dma(p.body, vec![], MemAccess::whole(l1), MemAccess::whole(m));
        // writing m: WAR edge on the launch
        let writer = p.dma(p.body, vec![], MemAccess::whole(m), MemAccess::whole(l1));
        infer_memory_dependencies(&mut p).unwrap();
        assert!(!p.op(reader).async_deps.contains(&token(&p, launch)));
        assert!(p.op(writer).async_deps.contains(&token(&p, launch)));
    }

    #[test]
    fn induction_trace_walks_through_bundles() {
        let mut p = Program::new();
        let a = p.add_input(L2_1D);
        let b = p.add_input(L2_1D);
        let (_, body) = p.scf_for_const(p.body, 0, 4, 1, vec![]);
        let iv = p.block(body).args[0];
        let exec = p.execute(body, vec![], Some(ValueType::Index), |p, blk| {
            vec![p.affine_apply(blk, vec![iv])]
        });
        let off = p.op(exec).results[1];
        let d = p.dma(body, vec![], MemAccess::whole(b), MemAccess::at(a, vec![off]));
        p.yield_(body, vec![]);
        let t = trace_dependent_induction_var(&p, d).unwrap();
        assert_eq!(t.loop_deps, vec![iv]);
        assert_eq!(t.ops, vec![exec]);
    }

    #[test]
    fn tile_indices_add_bundle_tokens_and_report_ids() {
        let mut p = Program::new();
        let a = p.add_input(L2_1D);
        let b = p.add_input(L2_1D);
        let c2 = p.constant(2);
        let (herd, body) = p.hierarchy(p.body, HierarchyLevel::Herd, vec![], vec![c2], vec![a, b], true);
        let id = p.block(body).args[0];
        let ka = p.kernel_argument(herd, 0).unwrap();
        let kb = p.kernel_argument(herd, 1).unwrap();
        let exec = p.execute(body, vec![], Some(ValueType::Index), |p, blk| {
            vec![p.muli(blk, id, c2)]
        });
        let off = p.op(exec).results[1];
        let d = p.dma(body, vec![], MemAccess::at(kb, vec![id]), MemAccess::at(ka, vec![off]));
        let result = infer_memory_dependencies(&mut p).unwrap();
        assert_eq!(p.op(d).async_deps, vec![token(&p, exec)]);
        assert_eq!(result.hierarchy_ids, vec![id]);
    }

    #[test]
    fn reconnect_threads_event_through_for_loop() {
        let mut p = Program::new();
        let a = p.add_input(L2_1D);
        let b = p.add_input(L2_1D);
        let w0 = p.wait_all(p.body, vec![]);
        let t0 = token(&p, w0);
        let (f, body) = p.scf_for_const(p.body, 0, 4, 1, vec![t0]);
        let carried = p.block(body).args[1];
        let d = p.dma(body, vec![], MemAccess::whole(b), MemAccess::whole(a));
        let join = p.wait_all(body, vec![]);
        let jt = token(&p, join);
        p.yield_(body, vec![jt]);
        reconnect_loop_carried_dependency(&mut p, d).unwrap();
        assert_eq!(p.op(d).async_deps, vec![carried]);
        assert_eq!(p.op(join).async_deps, vec![token(&p, d)]);
        // the loop itself sits at the top level: nothing further to thread
        assert!(p.op(w0).async_deps.is_empty());
        assert_eq!(p.parent_op(f), None);
    }

    #[test]
    fn reconnect_requires_a_join_before_the_reduce() {
        let mut p = Program::new();
        let w0 = p.wait_all(p.body, vec![]);
        let t0 = token(&p, w0);
        let c0 = p.constant(0);
        let c2 = p.constant(2);
        let c1 = p.constant(1);
        let (_, body) = p.scf_parallel(p.body, vec![c0], vec![c2], vec![c1], vec![t0]);
        let inner = p.wait_all(body, vec![]);
        let it = token(&p, inner);
        let d = p.wait_all(body, vec![]);
        p.reduce(body, it);
        reconnect_loop_carried_dependency(&mut p, d).unwrap();
        assert_eq!(p.op(d).async_deps, vec![t0]);
        assert_eq!(p.op(inner).async_deps, vec![token(&p, d)]);
    }

    #[test]
    fn control_tokens_found_through_dependency_chain() {
        let mut p = Program::new();
        let a = p.add_input(L2_1D);
        let b = p.add_input(L2_1D);
        let w = p.wait_all(p.body, vec![]);
        let wt = token(&p, w);
        let d = p.dma(p.body, vec![wt], MemAccess::whole(b), MemAccess::whole(a));
        let dt = token(&p, d);
        let (h, _) = p.hierarchy(p.body, HierarchyLevel::Launch, vec![dt], vec![], vec![], true);
        assert_eq!(trace_dependent_control_tokens(&p, h), vec![wt]);
        assert_eq!(trace_dependent_control_tokens(&p, d), vec![wt]);
        assert!(trace_dependent_control_tokens(&p, w).is_empty());
    }
}
