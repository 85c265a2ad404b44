// depcanon — async dependency canonicalizer
//
// Library root. The passes run in module order: tracer, graph, reduce,
// rewrite, cleanup; `pipeline` strings them together.

pub mod build;
pub mod cleanup;
pub mod diag;
pub mod dot;
pub mod error;
pub mod graph;
pub mod id;
pub mod ir;
pub mod pass;
pub mod pipeline;
pub mod print;
pub mod reduce;
pub mod region;
pub mod rewrite;
pub mod tracer;
