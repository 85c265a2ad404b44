// reduce.rs — Per-level transitive reduction of the scope graph tree
//
// Removes every edge (u, v) for which another path u → ... → v of length
// two or more exists. Each level is reduced independently into a parallel
// tree that keeps every vertex (with its attributes) at the same index.
//
// Preconditions: `tree` comes from `graph::build_graphs`.
// Postconditions: per level, the reduced graph has the same reachability
//   relation as the original and no edge is implied by the others.
// Failure modes: `CanonError::CyclicGraph` if any level has a cycle;
//   `CanonError::TreeShapeMismatch` if the skeleton diverges from the input.
// Side effects: none.

use std::collections::HashSet;
use std::fmt;

use petgraph::algo::{toposort, Cycle};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use petgraph::Direction;
use tracing::{debug, trace};

use crate::diag::Diagnostic;
use crate::error::{CanonError, Result};
use crate::graph::{GraphTree, ScopeGraph};
use crate::id::GraphId;

// ── Public types ────────────────────────────────────────────────────────────

/// Bidirectional vertex correspondence between an original and a reduced graph.
#[derive(Debug, Clone, Default)]
pub struct VertexMap {
    pub to_reduced: Vec<NodeIndex>,
    pub to_original: Vec<NodeIndex>,
}

impl VertexMap {
    fn identity(n: usize) -> Self {
        let ids: Vec<NodeIndex> = (0..n).map(NodeIndex::new).collect();
        VertexMap {
            to_reduced: ids.clone(),
            to_original: ids,
        }
    }
}

/// The reduced graphs, one per original graph, plus their vertex maps.
#[derive(Debug, Clone, Default)]
pub struct ReducedTree {
    pub tree: GraphTree,
    /// Indexed by `GraphId`.
    pub maps: Vec<VertexMap>,
}

impl ReducedTree {
    pub fn map(&self, id: GraphId) -> &VertexMap {
        &self.maps[id.index()]
    }
}

/// Result of the reduction pass.
#[derive(Debug)]
pub struct ReduceResult {
    pub reduced: ReducedTree,
    pub removed_edges: usize,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Transitive reduction of a DAG. Vertex `i` of the result is a clone of
/// vertex `i` of the input; edges are inserted in (source, target) order.
pub fn transitive_reduction<V: Clone>(
    g: &DiGraph<V, ()>,
) -> std::result::Result<DiGraph<V, ()>, Cycle<NodeIndex>> {
    let order = toposort(g, None)?;
    let n = g.node_count();
    let mut position = vec![0usize; n];
    for (i, v) in order.iter().enumerate() {
        position[v.index()] = i;
    }

    // Reverse topological order: every successor's reach set is final
    // before its predecessors are visited.
    let mut reach: Vec<BitSet> = vec![BitSet::new(n); n];
    let mut kept: Vec<Vec<NodeIndex>> = vec![Vec::new(); n];
    for &u in order.iter().rev() {
        let mut children: Vec<NodeIndex> = g.neighbors_directed(u, Direction::Outgoing).collect();
        children.sort_by_key(|c| position[c.index()]);
        children.dedup();
        let mut acc = BitSet::new(n);
        for c in children {
            if acc.contains(c.index()) {
                continue;
            }
            kept[u.index()].push(c);
            acc.insert(c.index());
            acc.union_with(&reach[c.index()]);
        }
        reach[u.index()] = acc;
    }

    let mut out = DiGraph::with_capacity(n, g.edge_count());
    for v in g.node_indices() {
        out.add_node(g[v].clone());
    }
    for (u, targets) in kept.iter_mut().enumerate() {
        targets.sort();
        for &v in targets.iter() {
            out.add_edge(NodeIndex::new(u), v, ());
        }
    }
    Ok(out)
}

/// Reduce every level of `tree` into a parallel tree of reduced graphs.
pub fn canonicalize_graphs(tree: &GraphTree) -> Result<ReduceResult> {
    let mut skeleton = empty_skeleton(tree);
    check_shape(tree, &skeleton, GraphTree::HOST, GraphTree::HOST)?;

    let mut maps = Vec::with_capacity(tree.len());
    let mut removed_edges = 0;
    for id in tree.ids() {
        let original = tree.graph(id);
        let reduced = transitive_reduction(&original.g).map_err(|cycle| CanonError::CyclicGraph {
            graph: tree.describe(id),
            op: original.g[cycle.node_id()].op,
        })?;
        let removed = original.g.edge_count() - reduced.edge_count();
        trace!(graph = %id, before = original.g.edge_count(), removed, "level reduced");
        removed_edges += removed;
        maps.push(VertexMap::identity(reduced.node_count()));
        skeleton.graph_mut(id).g = reduced;
    }
    debug!(graphs = tree.len(), removed_edges, "transitive reduction done");
    Ok(ReduceResult {
        reduced: ReducedTree {
            tree: skeleton,
            maps,
        },
        removed_edges,
        diagnostics: Vec::new(),
    })
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for ReducedTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in self.tree.ids() {
            let sg = self.tree.graph(id);
            writeln!(f, "{}:", self.tree.describe(id))?;
            let mut edges: Vec<(NodeIndex, NodeIndex)> = sg
                .g
                .edge_references()
                .map(|e| (e.source(), e.target()))
                .collect();
            edges.sort();
            for (a, b) in edges {
                writeln!(
                    f,
                    "  {}#{} -> {}#{}",
                    sg.g[a].name.replace('\n', " "),
                    a.index(),
                    sg.g[b].name.replace('\n', " "),
                    b.index()
                )?;
            }
        }
        Ok(())
    }
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for reduction postconditions (R1-R2).
#[derive(Debug, Clone)]
pub struct ReduceCert {
    /// R1: Every level keeps the reachability relation of its original.
    pub r1_reachability_preserved: bool,
    /// R2: No reduced edge is implied by a longer path.
    pub r2_minimal: bool,
}

impl crate::pass::StageCert for ReduceCert {
    fn all_pass(&self) -> bool {
        self.r1_reachability_preserved && self.r2_minimal
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("R1_reachability_preserved", self.r1_reachability_preserved),
            ("R2_minimal", self.r2_minimal),
        ]
    }
}

pub fn verify_reduction(original: &GraphTree, reduced: &ReducedTree) -> ReduceCert {
    let mut r1 = original.len() == reduced.tree.len();
    let mut r2 = true;
    for (a, b) in original.graphs.iter().zip(&reduced.tree.graphs) {
        r1 &= reachability(&a.g) == reachability(&b.g);
        r2 &= is_minimal(&b.g);
    }
    ReduceCert {
        r1_reachability_preserved: r1,
        r2_minimal: r2,
    }
}

/// For every vertex, the set of vertices reachable through at least one edge.
pub fn reachability<V>(g: &DiGraph<V, ()>) -> Vec<HashSet<NodeIndex>> {
    g.node_indices()
        .map(|start| {
            let mut seen = HashSet::new();
            for next in g.neighbors_directed(start, Direction::Outgoing) {
                let mut dfs = Dfs::new(g, next);
                while let Some(v) = dfs.next(g) {
                    seen.insert(v);
                }
            }
            seen
        })
        .collect()
}

/// True if no edge (u, v) has a sibling successor of `u` that reaches `v`.
pub fn is_minimal<V>(g: &DiGraph<V, ()>) -> bool {
    let reach = reachability(g);
    g.edge_references().all(|e| {
        g.neighbors_directed(e.source(), Direction::Outgoing)
            .filter(|&w| w != e.target())
            .all(|w| !reach[w.index()].contains(&e.target()))
    })
}

// ── Internal helpers ────────────────────────────────────────────────────────

/// The tree with every graph's attributes but no vertices or edges yet.
fn empty_skeleton(tree: &GraphTree) -> GraphTree {
    let mut skeleton = GraphTree::default();
    add_skeleton_graph(tree, GraphTree::HOST, None, &mut skeleton);
    skeleton
}

fn add_skeleton_graph(tree: &GraphTree, id: GraphId, parent: Option<GraphId>, out: &mut GraphTree) {
    let src = tree.graph(id);
    let new_id = GraphId(out.graphs.len() as u32);
    out.graphs.push(ScopeGraph {
        g: DiGraph::new(),
        level: src.level,
        hierarchy_op: src.hierarchy_op,
        parent,
        children: Vec::new(),
        start: src.start,
        terminator: src.terminator,
    });
    if let Some(p) = parent {
        out.graph_mut(p).children.push(new_id);
    }
    for &child in &src.children {
        add_skeleton_graph(tree, child, Some(new_id), out);
    }
}

fn check_shape(tree: &GraphTree, skeleton: &GraphTree, a: GraphId, b: GraphId) -> Result<()> {
    let (ga, gb) = (tree.graph(a), skeleton.graph(b));
    if a != b || ga.children.len() != gb.children.len() || ga.level != gb.level {
        return Err(CanonError::TreeShapeMismatch {
            graph: tree.describe(a),
            reason: format!(
                "{} children in original, {} in reduced tree",
                ga.children.len(),
                gb.children.len()
            ),
        });
    }
    for (&ca, &cb) in ga.children.iter().zip(&gb.children) {
        check_shape(tree, skeleton, ca, cb)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    fn new(n: usize) -> Self {
        BitSet {
            words: vec![0; n.div_ceil(64)],
        }
    }

    fn insert(&mut self, i: usize) {
        self.words[i / 64] |= 1u64 << (i % 64);
    }

    fn contains(&self, i: usize) -> bool {
        self.words[i / 64] & (1u64 << (i % 64)) != 0
    }

    fn union_with(&mut self, other: &BitSet) {
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_graphs, DependencyContext};
    use crate::ir::{HierarchyLevel, MemAccess, MemorySpace, Program, ValueType};
    use crate::pass::StageCert;

    fn dag(n: usize, edges: &[(usize, usize)]) -> DiGraph<usize, ()> {
        let mut g = DiGraph::new();
        for i in 0..n {
            g.add_node(i);
        }
        for &(a, b) in edges {
            g.add_edge(NodeIndex::new(a), NodeIndex::new(b), ());
        }
        g
    }

    fn edges(g: &DiGraph<usize, ()>) -> Vec<(usize, usize)> {
        g.edge_references()
            .map(|e| (e.source().index(), e.target().index()))
            .collect()
    }

    #[test]
    fn shortcut_edge_is_removed() {
        let g = dag(3, &[(0, 1), (1, 2), (0, 2)]);
        let r = transitive_reduction(&g).unwrap();
        assert_eq!(edges(&r), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn diamond_keeps_both_branches() {
        let g = dag(4, &[(0, 1), (0, 2), (1, 3), (2, 3), (0, 3)]);
        let r = transitive_reduction(&g).unwrap();
        assert_eq!(edges(&r), vec![(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert!(is_minimal(&r));
        assert_eq!(reachability(&g), reachability(&r));
    }

    #[test]
    fn vertex_weights_keep_their_indices() {
        let g = dag(3, &[(2, 0), (0, 1), (2, 1)]);
        let r = transitive_reduction(&g).unwrap();
        for v in r.node_indices() {
            assert_eq!(r[v], v.index());
        }
        assert_eq!(edges(&r), vec![(0, 1), (2, 0)]);
    }

    #[test]
    fn cycle_is_reported() {
        let g = dag(2, &[(0, 1), (1, 0)]);
        assert!(transitive_reduction(&g).is_err());
    }

    #[test]
    fn cyclic_level_fails_the_whole_tree() {
        let mut p = Program::new();
        let w0 = p.wait_all(p.body, vec![]);
        let t0 = p.async_token(w0).unwrap();
        p.wait_all(p.body, vec![t0]);
        let mut ctx = DependencyContext::new();
        let mut tree = build_graphs(&mut p, &mut ctx).unwrap().tree;
        let host = tree.graph_mut(GraphTree::HOST);
        host.g.add_edge(NodeIndex::new(2), NodeIndex::new(1), ());
        assert!(matches!(
            canonicalize_graphs(&tree),
            Err(CanonError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn tree_reduction_keeps_shape_and_passes_cert() {
        let mut p = Program::new();
        let ty = ValueType::Memref {
            rank: 1,
            space: MemorySpace::L2,
        };
        let a = p.add_input(ty);
        let b = p.add_input(ty);
        let d0 = p.dma(p.body, vec![], MemAccess::whole(b), MemAccess::whole(a));
        let t0 = p.async_token(d0).unwrap();
        let d1 = p.dma(p.body, vec![t0], MemAccess::whole(a), MemAccess::whole(b));
        let t1 = p.async_token(d1).unwrap();
        let c1 = p.constant(1);
        p.hierarchy(
            p.body,
            HierarchyLevel::Launch,
            vec![t0, t1],
            vec![c1],
            vec![],
            true,
        );
        let mut ctx = DependencyContext::new();
        let tree = build_graphs(&mut p, &mut ctx).unwrap().tree;
        let result = canonicalize_graphs(&tree).unwrap();
        assert_eq!(result.removed_edges, 1);
        assert_eq!(result.reduced.tree.len(), 2);
        assert_eq!(result.reduced.tree.graph(GraphTree::HOST).children, vec![GraphId(1)]);
        assert_eq!(result.reduced.map(GraphId(1)).to_original.len(), 2);
        let cert = verify_reduction(&tree, &result.reduced);
        assert!(cert.all_pass(), "{:?}", cert.obligations());
    }
}
