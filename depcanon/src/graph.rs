// graph.rs — Per-level scope graph construction
//
// Builds one directed dependency graph per nesting level (host, launch,
// partition, herd). Every async event, loop and loop terminator gets a
// vertex; compute bundles expand into a chain of vertices, one per
// primitive. Edges come from declared token lists, resolved through loop
// ownership and conditional joins. Hierarchy vertices point to their child
// graph; child terminators point back to the parent.
//
// Preconditions: every token has exactly one producer; every channel op has
//   exactly one partner of the opposite direction.
// Postconditions: every non-start vertex of a graph is reachable from its
//   start vertex; in hierarchy graphs every sink feeds the terminator.
//   Op `id_tag`s are rewritten to the vertex ids of this run.
// Failure modes: `CanonError::UnknownKind` for bundle primitives with no
//   vertex rule; `ChannelPairing` for unpaired channels; `MalformedExecute`
//   for empty bundles.
// Side effects: writes `id_tag` on every op that receives a vertex.

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::{debug, trace};

use crate::diag::Diagnostic;
use crate::error::{CanonError, Result};
use crate::id::{BlockId, GraphId, OpId, ValueId};
use crate::ir::{HierarchyLevel, MemAccess, MemorySpace, OpKind, Program, ValueType};

// ── Public types ────────────────────────────────────────────────────────────

/// Vertex category. Also keys the per-kind id tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexKind {
    Start,
    Dma,
    Channel,
    Execute,
    WaitAll,
    ForLoop,
    ParallelLoop,
    Hierarchy,
    HierarchyTerminator,
    /// `scf.yield` of a sequential loop or `scf.reduce` of a parallel loop.
    Terminator,
}

impl VertexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VertexKind::Start => "start",
            VertexKind::Dma => "dma",
            VertexKind::Channel => "channel",
            VertexKind::Execute => "execute",
            VertexKind::WaitAll => "wait_all",
            VertexKind::ForLoop => "for_loop",
            VertexKind::ParallelLoop => "parallel_loop",
            VertexKind::Hierarchy => "hierarchy",
            VertexKind::HierarchyTerminator => "hierarchy_terminator",
            VertexKind::Terminator => "terminator",
        }
    }

    /// The id counter this kind draws from.
    fn counter(self) -> VertexKind {
        match self {
            VertexKind::Channel => VertexKind::Dma,
            VertexKind::HierarchyTerminator => VertexKind::Terminator,
            k => k,
        }
    }

    /// Vertex kind of an op, or `None` if the op never gets a vertex of its own.
    pub fn of(kind: &OpKind) -> Option<VertexKind> {
        match kind {
            OpKind::Dma { .. } => Some(VertexKind::Dma),
            OpKind::ChannelPut { .. } | OpKind::ChannelGet { .. } => Some(VertexKind::Channel),
            OpKind::Execute => Some(VertexKind::Execute),
            OpKind::WaitAll => Some(VertexKind::WaitAll),
            OpKind::For { .. } => Some(VertexKind::ForLoop),
            OpKind::Parallel { .. } => Some(VertexKind::ParallelLoop),
            OpKind::Hierarchy { .. } => Some(VertexKind::Hierarchy),
            OpKind::HierarchyTerminator { .. } => Some(VertexKind::HierarchyTerminator),
            OpKind::Yield { .. } | OpKind::Reduce { .. } => Some(VertexKind::Terminator),
            _ => None,
        }
    }
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vertex of a scope graph.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub kind: VertexKind,
    /// Display label (`DmaMemcpyNdOp`, `ChannelPutOp@c(L2-->L1)`, ...).
    pub name: String,
    pub color: &'static str,
    pub shape: &'static str,
    /// Per-kind id; 0 for start vertices.
    pub id: u32,
    /// The event this vertex stands for. For bundle chains this is the
    /// `Execute` op itself.
    pub op: Option<OpId>,
    /// The primitive inside a bundle this vertex was built from.
    pub primitive: Option<OpId>,
    /// Child graph (hierarchy vertex) or parent graph (hierarchy terminator).
    pub next_graph: Option<GraphId>,
}

impl Vertex {
    fn start() -> Self {
        Vertex {
            kind: VertexKind::Start,
            name: "start".into(),
            color: "yellow",
            shape: "box",
            id: 0,
            op: None,
            primitive: None,
            next_graph: None,
        }
    }
}

/// Nesting level of a scope graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Host,
    Launch,
    Partition,
    Herd,
}

impl Level {
    pub fn name(self) -> &'static str {
        match self {
            Level::Host => "host",
            Level::Launch => "launch",
            Level::Partition => "partition",
            Level::Herd => "herd",
        }
    }
}

impl From<HierarchyLevel> for Level {
    fn from(level: HierarchyLevel) -> Self {
        match level {
            HierarchyLevel::Launch => Level::Launch,
            HierarchyLevel::Partition => Level::Partition,
            HierarchyLevel::Herd => Level::Herd,
        }
    }
}

/// One dependency graph for one nesting level.
#[derive(Debug, Clone)]
pub struct ScopeGraph {
    pub g: DiGraph<Vertex, ()>,
    pub level: Level,
    /// The hierarchy op that opened this scope (`None` for host).
    pub hierarchy_op: Option<OpId>,
    pub parent: Option<GraphId>,
    pub children: Vec<GraphId>,
    pub start: NodeIndex,
    pub terminator: Option<NodeIndex>,
}

impl ScopeGraph {
    fn new(level: Level, hierarchy_op: Option<OpId>, parent: Option<GraphId>) -> Self {
        let mut g = DiGraph::new();
        let start = g.add_node(Vertex::start());
        ScopeGraph {
            g,
            level,
            hierarchy_op,
            parent,
            children: Vec::new(),
            start,
            terminator: None,
        }
    }
}

/// All scope graphs of one program, host first, children in pre-order.
#[derive(Debug, Clone, Default)]
pub struct GraphTree {
    pub graphs: Vec<ScopeGraph>,
}

impl GraphTree {
    pub const HOST: GraphId = GraphId(0);

    pub fn graph(&self, id: GraphId) -> &ScopeGraph {
        &self.graphs[id.index()]
    }

    pub fn graph_mut(&mut self, id: GraphId) -> &mut ScopeGraph {
        &mut self.graphs[id.index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = GraphId> {
        (0..self.graphs.len() as u32).map(GraphId)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Short name used in errors and logs, e.g. `herd g3`.
    pub fn describe(&self, id: GraphId) -> String {
        format!("{} {}", self.graph(id).level.name(), id)
    }

    fn depth(&self, id: GraphId) -> usize {
        let mut depth = 0;
        let mut cur = self.graph(id).parent;
        while let Some(p) = cur {
            depth += 1;
            cur = self.graph(p).parent;
        }
        depth
    }
}

/// Per-run tables: per-kind id counters and (kind, id) → (vertex, graph).
#[derive(Debug, Clone, Default)]
pub struct DependencyContext {
    counters: HashMap<VertexKind, u32>,
    pub op_to_v: HashMap<(VertexKind, u32), (NodeIndex, GraphId)>,
}

impl DependencyContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self, kind: VertexKind) -> u32 {
        let c = self.counters.entry(kind.counter()).or_insert(0);
        *c += 1;
        *c
    }

    pub fn lookup(&self, kind: VertexKind, id: u32) -> Option<(NodeIndex, GraphId)> {
        self.op_to_v.get(&(kind, id)).copied()
    }
}

/// Which end of a bundle chain to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexEnd {
    /// First primitive: where incoming dependencies land.
    Front,
    /// Last primitive: where outgoing dependencies leave.
    Back,
}

/// Result of graph construction.
#[derive(Debug)]
pub struct GraphResult {
    pub tree: GraphTree,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Build the scope graph tree of `program`, recording every vertex in `ctx`.
pub fn build_graphs(program: &mut Program, ctx: &mut DependencyContext) -> Result<GraphResult> {
    for op in &mut program.ops {
        op.id_tag = None;
    }
    let mut builder = TreeBuilder::new(program);
    let host = builder.new_graph(Level::Host, None, None);
    let body = program.body;
    builder.add_vertices_in_block(program, ctx, body, host)?;
    builder.parse_edges(program, ctx);
    builder.connect_terminators();
    builder.connect_starts();

    let tree = builder.tree;
    debug!(
        graphs = tree.len(),
        vertices = tree.graphs.iter().map(|s| s.g.node_count()).sum::<usize>(),
        "scope graphs built"
    );
    Ok(GraphResult {
        tree,
        diagnostics: Vec::new(),
    })
}

/// The vertex standing for `op` in this run, if any. Bundles resolve to the
/// first or last vertex of their chain.
pub fn vertex_of(
    program: &Program,
    ctx: &DependencyContext,
    op: OpId,
    end: VertexEnd,
) -> Option<(NodeIndex, GraphId)> {
    let o = program.op(op);
    if o.erased {
        return None;
    }
    let (kind, id) = match &o.kind {
        OpKind::Execute => {
            let body = program.block(*o.regions.first()?);
            let member = match end {
                VertexEnd::Front => body.ops.first()?,
                VertexEnd::Back => body.ops.last()?,
            };
            (VertexKind::Execute, program.op(*member).id_tag?)
        }
        k => (VertexKind::of(k)?, o.id_tag?),
    };
    ctx.lookup(kind, id)
}

/// Ops whose completion `token` stands for, as seen from its consumer `op`.
///
/// Iteration arguments resolve to their `For`, parallel initial values to
/// the enclosing `Parallel`, loop results to the loop's terminator and
/// conditional results to every producer feeding the branch terminators.
pub fn trace_op_from_token(program: &Program, op: OpId, token: ValueId) -> Vec<OpId> {
    if let Some(par) = program.parallel_init_vals_owner(op, token) {
        return vec![par];
    }
    if let Some(owner) = program.for_iter_args_owner(token) {
        return vec![owner];
    }
    let mut out = Vec::new();
    producers_of(program, token, &mut out);
    out
}

fn producers_of(program: &Program, value: ValueId, out: &mut Vec<OpId>) {
    let Some(def) = program.defining_op(value) else {
        return;
    };
    let found = match &program.op(def).kind {
        k if k.is_async_kind() => Some(def),
        OpKind::For { .. } | OpKind::Parallel { .. } => program
            .op(def)
            .regions
            .first()
            .and_then(|&body| program.terminator(body)),
        OpKind::If { .. } => {
            for &branch in &program.op(def).regions {
                let Some(term) = program.terminator(branch) else {
                    continue;
                };
                if let OpKind::Yield { operands } = &program.op(term).kind {
                    for &v in operands {
                        producers_of(program, v, out);
                    }
                }
            }
            None
        }
        _ => None,
    };
    if let Some(found) = found {
        if !out.contains(&found) {
            out.push(found);
        }
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for GraphTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GraphTree ({} graphs)", self.len())?;
        for id in self.ids() {
            let sg = self.graph(id);
            writeln!(
                f,
                "{}{} {}: {} vertices, {} edges",
                "  ".repeat(self.depth(id) + 1),
                sg.level.name(),
                id,
                sg.g.node_count(),
                sg.g.edge_count()
            )?;
        }
        Ok(())
    }
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for graph construction postconditions (G1-G2).
#[derive(Debug, Clone)]
pub struct BuildCert {
    /// G1: Every scope graph is acyclic.
    pub g1_acyclic: bool,
    /// G2: The start vertex is the only source of every graph.
    pub g2_start_is_source: bool,
}

impl crate::pass::StageCert for BuildCert {
    fn all_pass(&self) -> bool {
        self.g1_acyclic && self.g2_start_is_source
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("G1_acyclic", self.g1_acyclic),
            ("G2_start_is_source", self.g2_start_is_source),
        ]
    }
}

pub fn verify_graphs(tree: &GraphTree) -> BuildCert {
    let g1 = tree.graphs.iter().all(|sg| !is_cyclic_directed(&sg.g));
    let g2 = tree.graphs.iter().all(|sg| {
        sg.g.node_indices().all(|n| {
            let has_preds = sg
                .g
                .neighbors_directed(n, Direction::Incoming)
                .next()
                .is_some();
            has_preds != (n == sg.start)
        })
    });
    BuildCert {
        g1_acyclic: g1,
        g2_start_is_source: g2,
    }
}

// ── Internal builder ────────────────────────────────────────────────────────

struct TreeBuilder {
    tree: GraphTree,
    /// Live channel ops, for partner lookup.
    channel_ops: Vec<OpId>,
}

impl TreeBuilder {
    fn new(program: &Program) -> Self {
        let channel_ops = program
            .walk()
            .into_iter()
            .filter(|&o| {
                matches!(
                    program.op(o).kind,
                    OpKind::ChannelPut { .. } | OpKind::ChannelGet { .. }
                )
            })
            .collect();
        TreeBuilder {
            tree: GraphTree::default(),
            channel_ops,
        }
    }

    fn new_graph(&mut self, level: Level, hierarchy_op: Option<OpId>, parent: Option<GraphId>) -> GraphId {
        let id = GraphId(self.tree.graphs.len() as u32);
        self.tree
            .graphs
            .push(ScopeGraph::new(level, hierarchy_op, parent));
        if let Some(p) = parent {
            self.tree.graph_mut(p).children.push(id);
        }
        id
    }

    fn add_vertex(
        &mut self,
        ctx: &mut DependencyContext,
        graph: GraphId,
        mut vertex: Vertex,
    ) -> NodeIndex {
        vertex.id = ctx.next_id(vertex.kind);
        let key = (vertex.kind, vertex.id);
        let v = self.tree.graph_mut(graph).g.add_node(vertex);
        ctx.op_to_v.insert(key, (v, graph));
        v
    }

    /// Add a vertex for `op` and stamp its id into the op.
    fn add_op_vertex(
        &mut self,
        program: &mut Program,
        ctx: &mut DependencyContext,
        graph: GraphId,
        op: OpId,
        mut vertex: Vertex,
    ) -> NodeIndex {
        vertex.op = Some(op);
        let v = self.add_vertex(ctx, graph, vertex);
        program.op_mut(op).id_tag = Some(self.tree.graph(graph).g[v].id);
        v
    }

    fn add_vertices_in_block(
        &mut self,
        program: &mut Program,
        ctx: &mut DependencyContext,
        block: BlockId,
        graph: GraphId,
    ) -> Result<()> {
        for op in program.block(block).ops.clone() {
            self.add_vertices_for_op(program, ctx, op, graph)?;
        }
        Ok(())
    }

    fn add_vertices_for_op(
        &mut self,
        program: &mut Program,
        ctx: &mut DependencyContext,
        op: OpId,
        graph: GraphId,
    ) -> Result<()> {
        let kind = program.op(op).kind.clone();
        let mut descend = true;
        match &kind {
            OpKind::Dma { .. } => {
                self.add_op_vertex(
                    program,
                    ctx,
                    graph,
                    op,
                    styled(VertexKind::Dma, "DmaMemcpyNdOp", "cyan", "oval"),
                );
            }
            OpKind::ChannelPut { .. } | OpKind::ChannelGet { .. } => {
                let name = self.channel_label(program, op)?;
                self.add_op_vertex(
                    program,
                    ctx,
                    graph,
                    op,
                    styled(VertexKind::Channel, name, "cyan", "oval"),
                );
            }
            OpKind::Execute => {
                self.add_execute_chain(program, ctx, op, graph)?;
                descend = false;
            }
            OpKind::WaitAll => {
                if !feeds_reduce_return(program, op) {
                    self.add_op_vertex(
                    program,
                    ctx,
                    graph,
                    op,
                    styled(VertexKind::WaitAll, "WaitAllOp", "crimson", "oval"),
                );
                }
            }
            OpKind::For { .. } => {
                self.add_op_vertex(
                    program,
                    ctx,
                    graph,
                    op,
                    styled(VertexKind::ForLoop, "ScfForOp", "crimson", "box"),
                );
            }
            OpKind::Parallel { .. } => {
                self.add_op_vertex(
                    program,
                    ctx,
                    graph,
                    op,
                    styled(VertexKind::ParallelLoop, "ScfParallelOp", "crimson", "box"),
                );
            }
            OpKind::Yield { .. } => {
                let in_for = program
                    .parent_op(op)
                    .is_some_and(|p| matches!(program.op(p).kind, OpKind::For { .. }));
                if in_for {
                    self.add_op_vertex(
                    program,
                    ctx,
                    graph,
                    op,
                    styled(VertexKind::Terminator, "ScfForYieldOp", "crimson", "box"),
                );
                }
            }
            OpKind::Reduce { .. } => {
                self.add_op_vertex(
                    program,
                    ctx,
                    graph,
                    op,
                    styled(VertexKind::Terminator, "ScfReduceOp", "crimson", "box"),
                );
            }
            OpKind::Hierarchy { level, .. } => {
                let v = self.add_op_vertex(
                    program,
                    ctx,
                    graph,
                    op,
                    styled(VertexKind::Hierarchy, level.op_name(), "yellow", "box"),
                );
                let child = self.new_graph((*level).into(), Some(op), Some(graph));
                self.tree.graph_mut(graph).g[v].next_graph = Some(child);
                trace!(%op, graph = %child, level = level.name(), "scope opened");
                for region in program.op(op).regions.clone() {
                    self.add_vertices_in_block(program, ctx, region, child)?;
                }
                descend = false;
            }
            OpKind::HierarchyTerminator { level } => {
                let v = self.add_op_vertex(
                    program,
                    ctx,
                    graph,
                    op,
                    styled(VertexKind::HierarchyTerminator, level.terminator_name(), "yellow", "box"),
                );
                let sg = self.tree.graph_mut(graph);
                sg.terminator = Some(v);
                sg.g[v].next_graph = sg.parent;
            }
            // Structural ops and primitives outside a bundle carry no vertex.
            _ => {}
        }
        if descend {
            for region in program.op(op).regions.clone() {
                self.add_vertices_in_block(program, ctx, region, graph)?;
            }
        }
        Ok(())
    }

    /// One vertex per bundle member (terminator included), chained in order.
    fn add_execute_chain(
        &mut self,
        program: &mut Program,
        ctx: &mut DependencyContext,
        exec: OpId,
        graph: GraphId,
    ) -> Result<()> {
        let body = *program
            .op(exec)
            .regions
            .first()
            .ok_or(CanonError::MalformedExecute {
                op: exec,
                reason: "execute has no body",
            })?;
        let members = program.block(body).ops.clone();
        if members.is_empty() {
            return Err(CanonError::MalformedExecute {
                op: exec,
                reason: "execute body is empty",
            });
        }
        let mut prev = None;
        for member in members {
            let name = primitive_label(program, member)?;
            let mut vertex = styled(VertexKind::Execute, name, "chartreuse", "oval");
            vertex.op = Some(exec);
            vertex.primitive = Some(member);
            let v = self.add_vertex(ctx, graph, vertex);
            program.op_mut(member).id_tag = Some(self.tree.graph(graph).g[v].id);
            if let Some(p) = prev {
                self.tree.graph_mut(graph).g.add_edge(p, v, ());
            }
            prev = Some(v);
        }
        Ok(())
    }

    fn channel_label(&self, program: &Program, op: OpId) -> Result<String> {
        let (channel, is_put, access) = match &program.op(op).kind {
            OpKind::ChannelPut { channel, src } => (channel, true, src),
            OpKind::ChannelGet { channel, dst } => (channel, false, dst),
            _ => {
                return Err(CanonError::UnknownKind {
                    op,
                    kind: program.op(op).kind.mnemonic(),
                })
            }
        };
        let partners: Vec<&MemAccess> = self
            .channel_ops
            .iter()
            .filter_map(|&o| match &program.op(o).kind {
                OpKind::ChannelPut { channel: c, src } if !is_put && c == channel => Some(src),
                OpKind::ChannelGet { channel: c, dst } if is_put && c == channel => Some(dst),
                _ => None,
            })
            .collect();
        let [partner] = partners.as_slice() else {
            return Err(CanonError::ChannelPairing {
                channel: channel.clone(),
                direction: if is_put { "get" } else { "put" },
                found: partners.len(),
            });
        };
        let own = memory_space(program, access.memref)?;
        let other = memory_space(program, partner.memref)?;
        let mut label = if is_put {
            format!("ChannelPutOp@{channel}({own}-->{other})")
        } else {
            format!("ChannelGetOp@{channel}({own}<--{other})")
        };
        if let Some(decl) = program.channels.iter().find(|d| &d.name == channel) {
            if let Some(shape) = &decl.broadcast_shape {
                label.push_str(&format!(
                    "\n(broadcast[{}]-->[{}])",
                    join_dims(&decl.size),
                    join_dims(shape)
                ));
            }
        }
        Ok(label)
    }

    /// Connect every vertex's producers to it, within its own graph.
    fn parse_edges(&mut self, program: &Program, ctx: &DependencyContext) {
        let mut seen = HashSet::new();
        let ops: Vec<OpId> = self
            .tree
            .graphs
            .iter()
            .flat_map(|sg| sg.g.node_weights().filter_map(|v| v.op))
            .filter(|&op| seen.insert(op))
            .collect();
        for op in ops {
            let Some((dst, graph)) = vertex_of(program, ctx, op, VertexEnd::Front) else {
                continue;
            };
            for token in declared_list(program, op) {
                for src_op in trace_op_from_token(program, op, token) {
                    let Some((src, src_graph)) = vertex_of(program, ctx, src_op, VertexEnd::Back)
                    else {
                        continue;
                    };
                    if src_graph != graph {
                        trace!(%src_op, %op, "producer in another scope, skipped");
                        continue;
                    }
                    let g = &mut self.tree.graph_mut(graph).g;
                    if src != dst && !g.contains_edge(src, dst) {
                        g.add_edge(src, dst, ());
                    }
                }
            }
        }
    }

    /// In hierarchy graphs, every sink other than start flows into the terminator.
    fn connect_terminators(&mut self) {
        for sg in &mut self.tree.graphs {
            let Some(term) = sg.terminator else {
                continue;
            };
            let sinks: Vec<NodeIndex> = sg
                .g
                .node_indices()
                .filter(|&n| n != sg.start && n != term)
                .filter(|&n| sg.g.neighbors_directed(n, Direction::Outgoing).next().is_none())
                .collect();
            for n in sinks {
                sg.g.add_edge(n, term, ());
            }
        }
    }

    /// Every source other than start hangs off start.
    fn connect_starts(&mut self) {
        for sg in &mut self.tree.graphs {
            let sources: Vec<NodeIndex> = sg
                .g
                .node_indices()
                .filter(|&n| n != sg.start)
                .filter(|&n| sg.g.neighbors_directed(n, Direction::Incoming).next().is_none())
                .collect();
            for n in sources {
                sg.g.add_edge(sg.start, n, ());
            }
        }
    }
}

fn styled(kind: VertexKind, name: impl Into<String>, color: &'static str, shape: &'static str) -> Vertex {
    Vertex {
        kind,
        name: name.into(),
        color,
        shape,
        id: 0,
        op: None,
        primitive: None,
        next_graph: None,
    }
}

/// The token list whose producers become in-edges of `op`'s vertex.
fn declared_list(program: &Program, op: OpId) -> Vec<ValueId> {
    let o = program.op(op);
    match &o.kind {
        k if k.is_async_kind() => o.async_deps.clone(),
        OpKind::For { iter_operands, .. } => iter_operands.clone(),
        OpKind::Parallel { .. } => o.operands().into_iter().map(|(v, _)| v).collect(),
        OpKind::Yield { operands } => operands.clone(),
        OpKind::Reduce { operand } => vec![*operand],
        _ => Vec::new(),
    }
}

fn feeds_reduce_return(program: &Program, op: OpId) -> bool {
    let Some(token) = program.async_token(op) else {
        return false;
    };
    let Some(block) = program.parent_block(op) else {
        return false;
    };
    program
        .terminator(block)
        .is_some_and(|t| program.op(t).kind == OpKind::ReduceReturn { operand: token })
}

fn primitive_label(program: &Program, op: OpId) -> Result<&'static str> {
    let name = match &program.op(op).kind {
        OpKind::Linalg { .. } => "LinalgOp",
        OpKind::Alloc => "AllocOp",
        OpKind::Dealloc { .. } => "DeallocOp",
        OpKind::Copy { .. } => "CopyOp",
        OpKind::AffineApply { .. } => "AffineApplyOp",
        OpKind::ExecuteTerminator { .. } => "ExecuteTerminatorOp",
        OpKind::MulI { .. } => "MuliOp",
        OpKind::AddI { .. } => "AddIOp",
        k => {
            return Err(CanonError::UnknownKind {
                op,
                kind: k.mnemonic(),
            })
        }
    };
    Ok(name)
}

fn memory_space(program: &Program, v: ValueId) -> Result<MemorySpace> {
    match program.value_type(v) {
        ValueType::Memref { space, .. } => Ok(space),
        _ => Err(CanonError::NotAMemref { value: v }),
    }
}

fn join_dims(dims: &[i64]) -> String {
    dims.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

// ── Tests ───────────────────────────────────────────────────────────────────
