// rewrite.rs — Regenerate dependency lists from the reduced graphs
//
// Purges the dependency list of every async event that has a reduced
// vertex, then refills it from the vertex's surviving in-edges: a loop
// source contributes its carried token, a loop terminator the loop's
// result, any other event its own token (lifted out of conditional
// branches the consumer is not part of).
//
// Preconditions: `reduced` was built from the same program run, so vertex
//   ops and `id_tag`s are current.
// Postconditions: every rewritten list is duplicate-free and mirrors the
//   in-edges of its reduced vertex; `id_tag` is kept only on transfers,
//   channel ops and hierarchy ops.
// Failure modes: `CanonError` when a loop carries no token or an add is
//   not a token.
// Side effects: mutates dependency lists and `id_tag`s.

use std::collections::HashSet;

use petgraph::graph::NodeIndex;
use petgraph::Direction;
use tracing::{debug, trace};

use crate::diag::Diagnostic;
use crate::error::Result;
use crate::graph::{ScopeGraph, Vertex, VertexKind};
use crate::id::{OpId, ValueId};
use crate::ir::{LoopTokenSlot, OpKind, Program};
use crate::reduce::ReducedTree;

/// Result of the rewrite pass.
#[derive(Debug)]
pub struct RewriteResult {
    /// Events whose lists were regenerated.
    pub rewritten: usize,
    /// Tokens added across all lists.
    pub tokens: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Rewrite every in-scope dependency list to match `reduced`.
pub fn update_dep_list(program: &mut Program, reduced: &ReducedTree) -> Result<RewriteResult> {
    let mut rewritten = HashSet::new();
    for sg in &reduced.tree.graphs {
        for op in sg.g.node_weights().filter_map(|v| v.op) {
            if program.is_async(op) && rewritten.insert(op) {
                program.clear_async_dependencies(op);
            }
        }
    }

    let mut tokens = 0;
    for sg in &reduced.tree.graphs {
        tokens += fill_from_graph(program, sg)?;
    }

    for op in &mut program.ops {
        if !matches!(
            op.kind,
            OpKind::Dma { .. }
                | OpKind::ChannelPut { .. }
                | OpKind::ChannelGet { .. }
                | OpKind::Hierarchy { .. }
        ) {
            op.id_tag = None;
        }
    }

    debug!(events = rewritten.len(), tokens, "dependency lists rewritten");
    Ok(RewriteResult {
        rewritten: rewritten.len(),
        tokens,
        diagnostics: Vec::new(),
    })
}

fn fill_from_graph(program: &mut Program, sg: &ScopeGraph) -> Result<usize> {
    let mut added = 0;
    for dst in sg.g.node_indices() {
        let Some(dst_op) = sg.g[dst].op else {
            continue;
        };
        if !program.is_async(dst_op) {
            continue;
        }
        let mut sources: Vec<NodeIndex> = sg.g.neighbors_directed(dst, Direction::Incoming).collect();
        sources.sort();
        for src in sources {
            let vertex = &sg.g[src];
            let Some(src_op) = vertex.op else {
                continue;
            };
            if src_op == dst_op {
                continue;
            }
            if let Some(token) = token_for_source(program, vertex, src_op, dst_op)? {
                if program.add_async_dependency_if_new(dst_op, token)? {
                    trace!(%src_op, %dst_op, %token, "dependency restored");
                    added += 1;
                }
            }
        }
    }
    Ok(added)
}

/// The token `dst` must wait on to be ordered after the source vertex.
fn token_for_source(
    program: &Program,
    vertex: &Vertex,
    src: OpId,
    dst: OpId,
) -> Result<Option<ValueId>> {
    let token = match vertex.kind {
        VertexKind::ForLoop => Some(program.loop_carried_token(src, LoopTokenSlot::Argument)?),
        VertexKind::ParallelLoop => Some(program.loop_carried_token(src, LoopTokenSlot::Operand)?),
        VertexKind::Terminator => program
            .parent_op(src)
            .and_then(|parent| first_token_result(program, parent)),
        _ if program.is_async(src) => {
            let lifted = lift_out_of_conditionals(program, src, dst);
            if lifted == src {
                program.async_token(src)
            } else {
                first_token_result(program, lifted)
            }
        }
        _ => None,
    };
    Ok(token)
}

fn first_token_result(program: &Program, op: OpId) -> Option<ValueId> {
    program
        .op(op)
        .results
        .iter()
        .copied()
        .find(|&v| program.value_type(v).is_token())
}

/// Walk from `src` up through directly enclosing conditionals that do not
/// also enclose `dst`.
fn lift_out_of_conditionals(program: &Program, src: OpId, dst: OpId) -> OpId {
    let dst_ancestors = program.ancestors(dst);
    let mut cur = src;
    while let Some(parent) = program.parent_op(cur) {
        if !matches!(program.op(parent).kind, OpKind::If { .. }) || dst_ancestors.contains(&parent) {
            break;
        }
        cur = parent;
    }
    cur
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for rewrite postconditions (W1).
#[derive(Debug, Clone)]
pub struct RewriteCert {
    /// W1: No dependency list holds the same token twice.
    pub w1_no_duplicate_tokens: bool,
}

impl crate::pass::StageCert for RewriteCert {
    fn all_pass(&self) -> bool {
        self.w1_no_duplicate_tokens
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![("W1_no_duplicate_tokens", self.w1_no_duplicate_tokens)]
    }
}

pub fn verify_rewrite(program: &Program) -> RewriteCert {
    let w1 = program.walk().into_iter().all(|op| {
        let deps = &program.op(op).async_deps;
        let unique: HashSet<&ValueId> = deps.iter().collect();
        unique.len() == deps.len()
    });
    RewriteCert {
        w1_no_duplicate_tokens: w1,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
