// End-to-end scenarios through the library pipeline.
//
// Each test builds a small program with the builder API, runs
// `canonicalize`, and checks the resulting dependency lists.

use depcanon::error::CanonError;
use depcanon::graph::{build_graphs, DependencyContext, GraphTree};
use depcanon::id::{OpId, ValueId};
use depcanon::ir::{HierarchyLevel, MemAccess, MemorySpace, OpKind, Program, ValueType};
use depcanon::pass::StageCert;
use depcanon::pipeline::{canonicalize, CanonOptions};
use depcanon::reduce::canonicalize_graphs;
use petgraph::graph::NodeIndex;

const L2_1D: ValueType = ValueType::Memref {
    rank: 1,
    space: MemorySpace::L2,
};

fn token(p: &Program, op: OpId) -> ValueId {
    p.async_token(op).unwrap()
}

#[test]
fn reader_waits_on_last_writer_only() {
    let mut p = Program::new();
    let x = p.add_input(L2_1D);
    let y = p.add_input(L2_1D);
    let r = p.add_input(L2_1D);
    let z = p.add_input(L2_1D);
    let a = p.dma(p.body, vec![], MemAccess::whole(r), MemAccess::whole(x));
    let b = p.dma(p.body, vec![], MemAccess::whole(r), MemAccess::whole(y));
    let c = p.dma(p.body, vec![], MemAccess::whole(z), MemAccess::whole(r));

    let state = canonicalize(p, &CanonOptions::default()).unwrap();
    let p = &state.program;
    assert_eq!(p.op(b).async_deps, vec![token(p, a)]);
    assert_eq!(p.op(c).async_deps, vec![token(p, b)]);

    let reduced = state.reduced.as_ref().unwrap();
    assert_eq!(reduced.tree.graph(GraphTree::HOST).g.edge_count(), 3);
}

#[test]
fn writes_to_disjoint_constant_indices_stay_unordered() {
    let mut p = Program::new();
    let x = p.add_input(L2_1D);
    let r = p.add_input(L2_1D);
    let c0 = p.constant(0);
    let c1 = p.constant(1);
    let a = p.dma(p.body, vec![], MemAccess::at(r, vec![c0]), MemAccess::whole(x));
    let b = p.dma(p.body, vec![], MemAccess::at(r, vec![c1]), MemAccess::whole(x));

    let state = canonicalize(p, &CanonOptions::default()).unwrap();
    assert!(state.program.op(a).async_deps.is_empty());
    assert!(state.program.op(b).async_deps.is_empty());
}

#[test]
fn single_input_join_is_bypassed() {
    let mut p = Program::new();
    let x = p.add_input(L2_1D);
    let y = p.add_input(L2_1D);
    let u = p.add_input(L2_1D);
    let v = p.add_input(L2_1D);
    let a = p.dma(p.body, vec![], MemAccess::whole(y), MemAccess::whole(x));
    let ta = token(&p, a);
    let join = p.wait_all(p.body, vec![ta]);
    let tj = token(&p, join);
    let c = p.dma(p.body, vec![tj], MemAccess::whole(v), MemAccess::whole(u));

    let state = canonicalize(p, &CanonOptions::default()).unwrap();
    let p = &state.program;
    assert!(p.op(join).erased);
    assert_eq!(p.op(c).async_deps, vec![ta]);
    assert_eq!(state.cleanup.as_ref().unwrap().joins_collapsed, 1);
}

#[test]
fn nested_hierarchy_keeps_only_control_tokens() {
    let mut p = Program::new();
    let x = p.add_input(L2_1D);
    let y = p.add_input(L2_1D);
    let one = p.constant(1);
    let join = p.wait_all(p.body, vec![]);
    let tj = token(&p, join);
    let d = p.dma(p.body, vec![tj], MemAccess::whole(y), MemAccess::whole(x));
    let td = token(&p, d);
    let (herd, _) = p.hierarchy(p.body, HierarchyLevel::Herd, vec![td], vec![one], vec![], true);

    let state = canonicalize(p, &CanonOptions::default()).unwrap();
    assert_eq!(state.program.op(herd).async_deps, vec![tj]);
    assert!(depcanon::cleanup::verify_cleanup(&state.program).all_pass());
    assert!(state.diagnostics.is_empty());
}

#[test]
fn launch_dependencies_are_left_alone() {
    let mut p = Program::new();
    let x = p.add_input(L2_1D);
    let y = p.add_input(L2_1D);
    let one = p.constant(1);
    let d = p.dma(p.body, vec![], MemAccess::whole(y), MemAccess::whole(x));
    let td = token(&p, d);
    let (launch, _) = p.hierarchy(p.body, HierarchyLevel::Launch, vec![td], vec![one], vec![], true);

    let state = canonicalize(p, &CanonOptions::default()).unwrap();
    assert_eq!(state.program.op(launch).async_deps, vec![td]);
    assert!(matches!(
        state.program.op(launch).kind,
        OpKind::Hierarchy {
            level: HierarchyLevel::Launch,
            ..
        }
    ));
}

#[test]
fn cyclic_level_fails_fast() {
    let mut p = Program::new();
    let w0 = p.wait_all(p.body, vec![]);
    let t0 = token(&p, w0);
    p.wait_all(p.body, vec![t0]);
    let mut ctx = DependencyContext::new();
    let mut tree = build_graphs(&mut p, &mut ctx).unwrap().tree;
    tree.graph_mut(GraphTree::HOST)
        .g
        .add_edge(NodeIndex::new(2), NodeIndex::new(1), ());

    assert!(matches!(
        canonicalize_graphs(&tree),
        Err(CanonError::CyclicGraph { .. })
    ));
}
