// Property-based tests for canonicalization invariants.
//
// Two categories:
// 1. Transitive reduction over random DAGs: reachability kept, result minimal
// 2. Random join networks through the pipeline: ordering kept, lists
//    duplicate-free, a second run changes nothing, cleanup certificate holds
// 3. Random transfer sequences with tracing on: a second run changes nothing
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::HashSet;

use depcanon::cleanup::verify_cleanup;
use depcanon::id::{OpId, ValueId};
use depcanon::ir::{MemAccess, MemorySpace, Program, ValueType};
use depcanon::pass::StageCert;
use depcanon::pipeline::{canonicalize, CanonOptions};
use depcanon::reduce::{is_minimal, reachability, transitive_reduction};
use petgraph::graph::{DiGraph, NodeIndex};
use proptest::prelude::*;
use proptest::sample::Index;

// ── Generators ──────────────────────────────────────────────────────────────

/// For each node, indices picking predecessors among the nodes before it.
fn arb_dag_shape() -> impl Strategy<Value = Vec<Vec<Index>>> {
    prop::collection::vec(prop::collection::vec(any::<Index>(), 0..4), 1..14)
}

fn dag_from_shape(shape: &[Vec<Index>]) -> DiGraph<usize, ()> {
    let mut g = DiGraph::new();
    for i in 0..shape.len() {
        g.add_node(i);
    }
    for (i, preds) in shape.iter().enumerate().skip(1) {
        for p in preds {
            let src = NodeIndex::new(p.index(i));
            let dst = NodeIndex::new(i);
            if !g.contains_edge(src, dst) {
                g.add_edge(src, dst, ());
            }
        }
    }
    g
}

/// A straight-line program of wait_alls shaped like the DAG; duplicate
/// tokens are kept on purpose.
fn program_from_shape(shape: &[Vec<Index>]) -> (Program, Vec<OpId>) {
    let mut p = Program::new();
    let mut ops: Vec<OpId> = Vec::new();
    for (i, preds) in shape.iter().enumerate() {
        let deps: Vec<ValueId> = if i == 0 {
            Vec::new()
        } else {
            preds
                .iter()
                .map(|idx| p.async_token(ops[idx.index(i)]).unwrap())
                .collect()
        };
        let op = p.wait_all(p.body, deps);
        ops.push(op);
    }
    (p, ops)
}

/// Ops each op transitively waits on, following dependency lists.
fn waits_on(p: &Program, ops: &[OpId]) -> Vec<HashSet<OpId>> {
    let mut out: Vec<HashSet<OpId>> = Vec::new();
    for &op in ops {
        let mut set = HashSet::new();
        for &t in &p.op(op).async_deps {
            if let Some(def) = p.defining_op(t) {
                set.insert(def);
                let j = ops.iter().position(|&o| o == def).unwrap();
                set.extend(out[j].iter().copied());
            }
        }
        out.push(set);
    }
    out
}

/// Transfers between three buffers, no deps declared, closed by a sync join
/// over every token.
fn arb_transfers() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..3usize, 0..3usize), 1..10)
}

fn program_from_transfers(transfers: &[(usize, usize)]) -> Program {
    let ty = ValueType::Memref {
        rank: 1,
        space: MemorySpace::L2,
    };
    let mut p = Program::new();
    let bufs: Vec<ValueId> = (0..3).map(|_| p.add_input(ty)).collect();
    let mut tokens = Vec::new();
    for &(dst, src) in transfers {
        let src = if src == dst { (dst + 1) % 3 } else { src };
        let op = p.dma(p.body, vec![], MemAccess::whole(bufs[dst]), MemAccess::whole(bufs[src]));
        tokens.push(p.async_token(op).unwrap());
    }
    p.wait_all_sync(p.body, tokens);
    p
}

fn rewrite_only() -> CanonOptions {
    CanonOptions {
        infer_memory_deps: false,
        cleanup: false,
        ..CanonOptions::default()
    }
}

// ── Reduction properties ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn reduction_preserves_reachability(shape in arb_dag_shape()) {
        let g = dag_from_shape(&shape);
        let reduced = transitive_reduction(&g).unwrap();
        prop_assert_eq!(reduced.node_count(), g.node_count());
        prop_assert_eq!(reachability(&reduced), reachability(&g));
    }

    #[test]
    fn reduction_is_minimal(shape in arb_dag_shape()) {
        let g = dag_from_shape(&shape);
        let reduced = transitive_reduction(&g).unwrap();
        prop_assert!(is_minimal(&reduced));
        prop_assert!(reduced.edge_count() <= g.edge_count());
    }

    #[test]
    fn reduction_of_reduced_graph_is_identity(shape in arb_dag_shape()) {
        let once = transitive_reduction(&dag_from_shape(&shape)).unwrap();
        let twice = transitive_reduction(&once).unwrap();
        prop_assert_eq!(once.edge_count(), twice.edge_count());
    }
}

// ── Pipeline properties ─────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rewrite_keeps_ordering(shape in arb_dag_shape()) {
        let (p, ops) = program_from_shape(&shape);
        let before = waits_on(&p, &ops);
        let state = canonicalize(p, &rewrite_only()).unwrap();
        prop_assert_eq!(waits_on(&state.program, &ops), before);
    }

    #[test]
    fn rewritten_lists_have_no_duplicates(shape in arb_dag_shape()) {
        let (p, ops) = program_from_shape(&shape);
        let state = canonicalize(p, &rewrite_only()).unwrap();
        for op in ops {
            let deps = &state.program.op(op).async_deps;
            let unique: HashSet<&ValueId> = deps.iter().collect();
            prop_assert_eq!(unique.len(), deps.len());
        }
    }

    #[test]
    fn canonicalization_is_idempotent(shape in arb_dag_shape()) {
        let (mut p, ops) = program_from_shape(&shape);
        let all: Vec<ValueId> = ops.iter().map(|&op| p.async_token(op).unwrap()).collect();
        p.wait_all_sync(p.body, all);
        let once = canonicalize(p, &rewrite_only()).unwrap().program;
        let text = once.to_string();
        let twice = canonicalize(once, &rewrite_only()).unwrap().program;
        prop_assert_eq!(twice.to_string(), text);
    }

    #[test]
    fn cleanup_leaves_minimal_lists(shape in arb_dag_shape()) {
        let (mut p, ops) = program_from_shape(&shape);
        let all: Vec<ValueId> = ops.iter().map(|&op| p.async_token(op).unwrap()).collect();
        p.wait_all_sync(p.body, all);
        let state = canonicalize(p, &CanonOptions::default()).unwrap();
        prop_assert!(!state.has_error);
        prop_assert!(verify_cleanup(&state.program).all_pass());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn traced_canonicalization_is_idempotent(transfers in arb_transfers()) {
        let options = CanonOptions {
            cleanup: false,
            ..CanonOptions::default()
        };
        let once = canonicalize(program_from_transfers(&transfers), &options).unwrap().program;
        let text = once.to_string();
        let twice = canonicalize(once, &options).unwrap().program;
        prop_assert_eq!(twice.to_string(), text);
    }
}
