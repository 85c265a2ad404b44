use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use depcanon::graph::{build_graphs, DependencyContext};
use depcanon::ir::{HierarchyLevel, MemAccess, MemorySpace, Program, ValueType};
use depcanon::pipeline::{canonicalize, CanonOptions};
use depcanon::reduce::canonicalize_graphs;

const L2_1D: ValueType = ValueType::Memref {
    rank: 1,
    space: MemorySpace::L2,
};

/// `n` transfers cycling over four buffers, no deps declared, so the tracer
/// has to find every ordering.
fn transfer_chain(n: usize) -> Program {
    let mut p = Program::new();
    let bufs: Vec<_> = (0..4).map(|_| p.add_input(L2_1D)).collect();
    for i in 0..n {
        let dst = MemAccess::whole(bufs[i % 4]);
        let src = MemAccess::whole(bufs[(i + 1) % 4]);
        p.dma(p.body, vec![], dst, src);
    }
    p
}

/// A launch holding `n` herds, each with a loop of transfers.
fn nested_herds(n: usize) -> Program {
    let mut p = Program::new();
    let a = p.add_input(L2_1D);
    let b = p.add_input(L2_1D);
    let one = p.constant(1);
    let (l, launch) = p.hierarchy(p.body, HierarchyLevel::Launch, vec![], vec![one], vec![a, b], true);
    let ka = p.kernel_argument(l, 0).expect("launch has two kernel arguments");
    let kb = p.kernel_argument(l, 1).expect("launch has two kernel arguments");
    for _ in 0..n {
        let (herd, body) = p.hierarchy(launch, HierarchyLevel::Herd, vec![], vec![one], vec![ka, kb], true);
        let ha = p.kernel_argument(herd, 0).unwrap();
        let hb = p.kernel_argument(herd, 1).unwrap();
        let init = p.wait_all(body, vec![]);
        let t = p.async_token(init).unwrap();
        let (_, loop_body) = p.scf_for_const(body, 0, 8, 1, vec![t]);
        let carried = p.block(loop_body).args[1];
        let d = p.dma(loop_body, vec![carried], MemAccess::whole(hb), MemAccess::whole(ha));
        let td = p.async_token(d).unwrap();
        p.yield_(loop_body, vec![td]);
    }
    p
}

fn scenarios() -> Vec<(&'static str, Program)> {
    vec![
        ("chain_64", transfer_chain(64)),
        ("chain_256", transfer_chain(256)),
        ("herds_16", nested_herds(16)),
    ]
}

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("canon/full_pipeline");
    let options = CanonOptions::default();
    for (name, program) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &program, |b, program| {
            b.iter_batched(
                || program.clone(),
                |p| {
                    let state = canonicalize(black_box(p), &options).expect("scenario must canonicalize");
                    black_box(state.program);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("canon/reduce");
    for (name, mut program) in scenarios() {
        let mut ctx = DependencyContext::new();
        depcanon::tracer::infer_memory_dependencies(&mut program).expect("scenario must trace");
        let tree = build_graphs(&mut program, &mut ctx).expect("scenario must build").tree;
        group.bench_with_input(BenchmarkId::from_parameter(name), &tree, |b, tree| {
            b.iter(|| {
                let r = canonicalize_graphs(black_box(tree)).expect("scenario must reduce");
                black_box(r.removed_edges);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_full_pipeline, bench_reduce);
criterion_main!(benches);
