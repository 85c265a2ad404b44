// dot.rs — Graphviz DOT output for scope graphs
//
// Renders one scope graph per DOT file, dumps a whole tree into a
// directory, or renders the tree as a single graph with one nested cluster
// per hierarchy level.
//
// Preconditions: `tree` is a fully built (or reduced) GraphTree.
// Postconditions: returns valid DOT text; output order follows graph and
//   vertex indices, so it is deterministic.
// Failure modes: `dump_dot_files` reports I/O problems as warning
//   diagnostics and never fails.
// Side effects: `dump_dot_files` creates a directory and writes files.

use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use petgraph::visit::EdgeRef;
use tracing::{debug, warn};

use crate::diag::{codes, Diagnostic};
use crate::graph::{GraphTree, Level, ScopeGraph, Vertex, VertexKind};
use crate::id::GraphId;

/// Emit one scope graph as a standalone DOT digraph.
pub fn emit_graph_dot(graph: &ScopeGraph) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph {} {{", graph.level.name()).unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    for n in graph.g.node_indices() {
        let v = &graph.g[n];
        writeln!(buf, "    v{} [{}];", n.index(), vertex_attrs(v)).unwrap();
    }
    for e in graph.g.edge_references() {
        writeln!(buf, "    v{} -> v{};", e.source().index(), e.target().index()).unwrap();
    }
    writeln!(buf, "}}").unwrap();
    buf
}

/// Write every graph of `tree` into `dir`: `host.dot`, then
/// `launch_<i>.dot`, `partition_<i>_<j>.dot`, `herd_<i>_<j>_<k>.dot`.
pub fn dump_dot_files(tree: &GraphTree, dir: &Path) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let dir = match std::fs::create_dir_all(dir) {
        Ok(()) => dir.to_path_buf(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot create dump directory");
            diagnostics.push(
                Diagnostic::warning(None, format!("cannot create '{}': {e}", dir.display()))
                    .with_code(codes::W0301)
                    .with_hint("graphs are written to the current directory instead"),
            );
            PathBuf::from(".")
        }
    };
    if tree.is_empty() {
        return diagnostics;
    }
    let mut files = Vec::new();
    collect_file_names(tree, GraphTree::HOST, &mut Vec::new(), &mut files);
    for (id, name) in files {
        let path = dir.join(&name);
        if let Err(e) = std::fs::write(&path, emit_graph_dot(tree.graph(id))) {
            warn!(path = %path.display(), error = %e, "cannot write graph dump");
            diagnostics.push(
                Diagnostic::warning(None, format!("cannot write '{}': {e}", path.display()))
                    .with_code(codes::W0302),
            );
        }
    }
    debug!(dir = %dir.display(), graphs = tree.len(), "graphs dumped");
    diagnostics
}

/// Emit the whole tree as one DOT digraph. Each hierarchy scope is a
/// cluster nested inside its parent's; channel puts are linked to their
/// gets with dashed edges.
pub fn emit_flat_dot(tree: &GraphTree) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph canon {{").unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    if tree.is_empty() {
        writeln!(buf, "}}").unwrap();
        return buf;
    }

    let mut counters: HashMap<Level, usize> = HashMap::new();
    write_cluster(&mut buf, tree, GraphTree::HOST, &mut counters, "    ");

    // Edges last so every node is declared inside its cluster first.
    writeln!(buf).unwrap();
    for id in tree.ids() {
        let sg = tree.graph(id);
        for e in sg.g.edge_references() {
            writeln!(
                buf,
                "    {} -> {};",
                flat_id(id, e.source().index()),
                flat_id(id, e.target().index())
            )
            .unwrap();
        }
        for n in sg.g.node_indices() {
            let v = &sg.g[n];
            if v.kind != VertexKind::Hierarchy {
                continue;
            }
            if let Some(child) = v.next_graph {
                let start = tree.graph(child).start.index();
                writeln!(
                    buf,
                    "    {} -> {} [style=bold];",
                    flat_id(id, n.index()),
                    flat_id(child, start)
                )
                .unwrap();
            }
        }
    }

    for (put, get) in channel_pairs(tree) {
        writeln!(buf, "    {put} -> {get} [style=dashed, color=gray50];").unwrap();
    }
    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn escape(label: &str) -> String {
    label.replace('"', "\\\"").replace('\n', "\\n")
}

fn vertex_attrs(v: &Vertex) -> String {
    format!(
        "label=\"{}\", color={}, shape={}, style=filled",
        escape(&v.name),
        v.color,
        v.shape
    )
}

fn flat_id(graph: GraphId, node: usize) -> String {
    format!("g{}_v{}", graph.0, node)
}

/// Pre-order file names; `path` holds the child index at each depth below host.
fn collect_file_names(
    tree: &GraphTree,
    id: GraphId,
    path: &mut Vec<usize>,
    out: &mut Vec<(GraphId, String)>,
) {
    let sg = tree.graph(id);
    let name = if path.is_empty() {
        "host.dot".to_string()
    } else {
        let suffix: Vec<String> = path.iter().map(|i| i.to_string()).collect();
        format!("{}_{}.dot", sg.level.name(), suffix.join("_"))
    };
    out.push((id, name));
    for (i, &child) in sg.children.iter().enumerate() {
        path.push(i);
        collect_file_names(tree, child, path, out);
        path.pop();
    }
}

fn write_cluster(
    buf: &mut String,
    tree: &GraphTree,
    id: GraphId,
    counters: &mut HashMap<Level, usize>,
    indent: &str,
) {
    let sg = tree.graph(id);
    let inner = if sg.level == Level::Host {
        indent.to_string()
    } else {
        let counter = counters.entry(sg.level).or_default();
        let label = format!("{}{}", sg.level.name(), counter);
        *counter += 1;
        writeln!(buf).unwrap();
        writeln!(buf, "{indent}subgraph cluster{} {{", id.0).unwrap();
        writeln!(buf, "{indent}    label=\"{label}\";").unwrap();
        writeln!(buf, "{indent}    style=rounded;").unwrap();
        writeln!(buf, "{indent}    color=gray50;").unwrap();
        format!("{indent}    ")
    };
    for n in sg.g.node_indices() {
        writeln!(buf, "{inner}{} [{}];", flat_id(id, n.index()), vertex_attrs(&sg.g[n])).unwrap();
    }
    for &child in &sg.children {
        write_cluster(buf, tree, child, counters, &inner);
    }
    if sg.level != Level::Host {
        writeln!(buf, "{indent}}}").unwrap();
    }
}

/// `(channel, is_put)` for channel vertices, read back from the label.
fn channel_endpoint(v: &Vertex) -> Option<(&str, bool)> {
    if v.kind != VertexKind::Channel {
        return None;
    }
    let (rest, is_put) = if let Some(rest) = v.name.strip_prefix("ChannelPutOp@") {
        (rest, true)
    } else {
        (v.name.strip_prefix("ChannelGetOp@")?, false)
    };
    let channel = rest.split('(').next()?;
    Some((channel, is_put))
}

fn channel_pairs(tree: &GraphTree) -> Vec<(String, String)> {
    let mut puts: Vec<(&str, String)> = Vec::new();
    let mut gets: Vec<(&str, String)> = Vec::new();
    for id in tree.ids() {
        let sg = tree.graph(id);
        for n in sg.g.node_indices() {
            if let Some((channel, is_put)) = channel_endpoint(&sg.g[n]) {
                let node = flat_id(id, n.index());
                if is_put {
                    puts.push((channel, node));
                } else {
                    gets.push((channel, node));
                }
            }
        }
    }
    let mut pairs = Vec::new();
    for (channel, put) in &puts {
        for (other, get) in &gets {
            if channel == other {
                pairs.push((put.clone(), get.clone()));
            }
        }
    }
    pairs
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_graphs, DependencyContext};
    use crate::ir::{HierarchyLevel, MemAccess, MemorySpace, Program, ValueType};

    const L1_1D: ValueType = ValueType::Memref {
        rank: 1,
        space: MemorySpace::L1,
    };
    const L2_1D: ValueType = ValueType::Memref {
        rank: 1,
        space: MemorySpace::L2,
    };

    /// host → launch → partition → two herds, with a channel pair across
    /// the partition and its first herd.
    fn nested_tree() -> GraphTree {
        let mut p = Program::new();
        p.declare_channel("c", vec![1], None);
        let src = p.add_input(L2_1D);
        let dst = p.add_input(L1_1D);
        let c1 = p.constant(1);
        let (_, launch) = p.hierarchy(p.body, HierarchyLevel::Launch, vec![], vec![c1], vec![], true);
        let (_, part) = p.hierarchy(launch, HierarchyLevel::Partition, vec![], vec![c1], vec![], true);
        p.channel_put(part, vec![], "c", MemAccess::whole(src));
        let (_, herd0) = p.hierarchy(part, HierarchyLevel::Herd, vec![], vec![c1], vec![], true);
        p.channel_get(herd0, vec![], "c", MemAccess::whole(dst));
        p.hierarchy(part, HierarchyLevel::Herd, vec![], vec![c1], vec![], true);
        let mut ctx = DependencyContext::new();
        build_graphs(&mut p, &mut ctx).unwrap().tree
    }

    #[test]
    fn graph_dot_carries_vertex_styles() {
        let tree = nested_tree();
        let dot = emit_graph_dot(tree.graph(GraphTree::HOST));
        assert!(dot.starts_with("digraph host {"));
        assert!(dot.contains("label=\"start\", color=yellow, shape=box, style=filled"));
        assert!(dot.contains("v0 -> v1;"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn labels_are_escaped() {
        assert_eq!(escape("a\n\"b\""), "a\\n\\\"b\\\"");
    }

    #[test]
    fn dump_names_follow_nesting() {
        let tree = nested_tree();
        let mut files = Vec::new();
        collect_file_names(&tree, GraphTree::HOST, &mut Vec::new(), &mut files);
        let names: Vec<&str> = files.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "host.dot",
                "launch_0.dot",
                "partition_0_0.dot",
                "herd_0_0_0.dot",
                "herd_0_0_1.dot"
            ]
        );
    }

    #[test]
    fn dump_writes_one_file_per_graph() {
        let tree = nested_tree();
        let dir = std::env::temp_dir().join(format!("depcanon-dot-{}", std::process::id()));
        let diags = dump_dot_files(&tree, &dir);
        assert!(diags.is_empty());
        for name in ["host.dot", "launch_0.dot", "herd_0_0_1.dot"] {
            let text = std::fs::read_to_string(dir.join(name)).unwrap();
            assert!(text.starts_with("digraph "));
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn flat_dot_nests_clusters_and_pairs_channels() {
        let tree = nested_tree();
        let dot = emit_flat_dot(&tree);
        assert!(dot.contains("label=\"launch0\";"));
        assert!(dot.contains("label=\"partition0\";"));
        assert!(dot.contains("label=\"herd0\";"));
        assert!(dot.contains("label=\"herd1\";"));
        assert_eq!(dot.matches("[style=bold];").count(), 4);
        assert_eq!(dot.matches("[style=dashed, color=gray50];").count(), 1);
    }

    #[test]
    fn flat_dot_is_deterministic() {
        assert_eq!(emit_flat_dot(&nested_tree()), emit_flat_dot(&nested_tree()));
    }

    #[test]
    fn empty_tree_renders_empty_graph() {
        let dot = emit_flat_dot(&GraphTree::default());
        assert_eq!(dot.lines().count(), 4);
    }
}
