// cleanup.rs — Post-rewrite cleanup passes
//
// A fixed sequence of local rewrites run after dependency lists have been
// regenerated:
//   1. drop repeated tokens from dependency lists (first occurrence kept);
//   2. erase wait_alls and pure compute bundles nobody consumes;
//   3. collapse wait_alls with a single input into that input;
//   4. make non-launch hierarchy ops depend on control tokens only;
//   5. erase hierarchy kernel operands whose argument is unused.
//
// Preconditions: program passed through `rewrite::update_dep_list` (or is
//   otherwise well-formed).
// Postconditions: each pass is idempotent; see `CleanupCert`.
// Failure modes: `CanonError` on malformed dependency lists.
// Side effects: mutates and erases ops; emits `tracing` events.

use std::collections::HashSet;

use tracing::{debug, trace, warn};

use crate::diag::{codes, Diagnostic};
use crate::error::Result;
use crate::id::{OpId, ValueId};
use crate::ir::{HierarchyLevel, OpKind, Program, UseRole};
use crate::tracer::trace_dependent_control_tokens;

/// Counters and diagnostics from one cleanup run.
#[derive(Debug, Default)]
pub struct CleanupResult {
    pub duplicates_removed: usize,
    pub events_removed: usize,
    pub joins_collapsed: usize,
    pub hierarchy_deps_dropped: usize,
    pub kernel_operands_removed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Run all five passes in order.
pub fn run_cleanup(program: &mut Program) -> Result<CleanupResult> {
    let mut result = CleanupResult {
        duplicates_removed: remove_dep_list_repetition(program),
        ..CleanupResult::default()
    };
    result.events_removed = remove_unused_events(program)?;
    result.joins_collapsed = remove_redundant_wait_alls(program);
    let (dropped, diags) = canonicalize_hierarchy_dependency(program)?;
    result.hierarchy_deps_dropped = dropped;
    result.diagnostics = diags;
    result.kernel_operands_removed = remove_unused_kernel_operands(program)?;
    debug!(
        duplicates = result.duplicates_removed,
        events = result.events_removed,
        joins = result.joins_collapsed,
        hierarchy_deps = result.hierarchy_deps_dropped,
        kernel_operands = result.kernel_operands_removed,
        "cleanup done"
    );
    Ok(result)
}

// ── Pass 1: repeated tokens ──────────────────────────────────────────────────

pub fn remove_dep_list_repetition(program: &mut Program) -> usize {
    program.walk().into_iter().map(|op| dedupe(program, op)).sum()
}

fn dedupe(program: &mut Program, op: OpId) -> usize {
    let deps = &mut program.op_mut(op).async_deps;
    let before = deps.len();
    let mut seen = HashSet::new();
    deps.retain(|&t| seen.insert(t));
    before - deps.len()
}

// ── Pass 2: unconsumed events ────────────────────────────────────────────────

/// Erase unconsumed events until none is left. A removed event's own
/// dependencies take the place of its token in every consumer.
pub fn remove_unused_events(program: &mut Program) -> Result<usize> {
    let mut removed = 0;
    loop {
        let mut changed = false;
        for op in program.walk() {
            if program.op(op).erased || !is_removable(program, op) {
                continue;
            }
            splice_out(program, op)?;
            removed += 1;
            changed = true;
        }
        if !changed {
            return Ok(removed);
        }
    }
}

fn is_removable(program: &Program, op: OpId) -> bool {
    let o = program.op(op);
    let Some(token) = program.async_token(op) else {
        return false;
    };
    match o.kind {
        OpKind::WaitAll => !program.has_uses(token),
        OpKind::Execute => {
            let [_, value] = o.results[..] else {
                return false;
            };
            let pure = program.execute_primitives(op).iter().all(|&p| {
                matches!(
                    program.op(p).kind,
                    OpKind::Alloc | OpKind::AffineApply { .. } | OpKind::MulI { .. } | OpKind::AddI { .. }
                )
            });
            pure && !program.has_uses(value)
                && program
                    .uses(token)
                    .iter()
                    .all(|u| u.role == UseRole::AsyncDep)
        }
        _ => false,
    }
}

fn splice_out(program: &mut Program, op: OpId) -> Result<()> {
    let deps = program.op(op).async_deps.clone();
    if let Some(token) = program.async_token(op) {
        let mut owners: Vec<OpId> = program.uses(token).into_iter().map(|u| u.owner).collect();
        owners.dedup();
        for owner in owners {
            program.erase_async_dependency(owner, token)?;
            for &d in &deps {
                program.add_async_dependency_if_new(owner, d)?;
            }
        }
    }
    trace!(%op, "unconsumed event erased");
    program.erase_op(op);
    Ok(())
}

// ── Pass 3: single-input joins ───────────────────────────────────────────────

pub fn remove_redundant_wait_alls(program: &mut Program) -> usize {
    let mut collapsed = 0;
    for op in program.walk() {
        if program.op(op).erased || !matches!(program.op(op).kind, OpKind::WaitAll) {
            continue;
        }
        let Some(token) = program.async_token(op) else {
            continue;
        };
        let [input] = program.op(op).async_deps[..] else {
            continue;
        };
        let users = program.uses(token);
        program.replace_all_uses_with(token, input);
        for u in users.into_iter().filter(|u| u.role == UseRole::AsyncDep) {
            dedupe(program, u.owner);
        }
        program.erase_op(op);
        trace!(%op, %input, "single-input join collapsed");
        collapsed += 1;
    }
    collapsed
}

// ── Pass 4: hierarchy control dependencies ───────────────────────────────────

/// A token a hierarchy op may keep: a loop-carried token, a loop result, a
/// join, or a value that is not produced by an op at all.
pub fn is_control_dependency(program: &Program, hier: OpId, token: ValueId) -> bool {
    if program.for_iter_args_owner(token).is_some()
        || program.parallel_init_vals_owner(hier, token).is_some()
    {
        return true;
    }
    match program.defining_op(token) {
        None => true,
        Some(def) => matches!(
            program.op(def).kind,
            OpKind::WaitAll | OpKind::For { .. } | OpKind::Parallel { .. }
        ),
    }
}

pub fn canonicalize_hierarchy_dependency(program: &mut Program) -> Result<(usize, Vec<Diagnostic>)> {
    let mut dropped = 0;
    let mut diagnostics = Vec::new();
    for hier in program.walk() {
        match program.op(hier).kind {
            OpKind::Hierarchy { level, .. } if level != HierarchyLevel::Launch => {}
            _ => continue,
        }
        let control = trace_dependent_control_tokens(program, hier);
        for &t in &control {
            program.add_async_dependency_if_new(hier, t)?;
        }
        let erased: Vec<ValueId> = program
            .op(hier)
            .async_deps
            .iter()
            .copied()
            .filter(|&t| !is_control_dependency(program, hier, t))
            .collect();
        for t in erased {
            program.erase_async_dependency(hier, t)?;
            dropped += 1;
            if !is_covered(program, t, &control) {
                warn!(op = %hier, token = %t, "hierarchy dependency dropped without control replacement");
                let mut diag = Diagnostic::warning(
                    Some(hier),
                    format!("dependency on {t} dropped with no control token to replace it"),
                )
                .with_code(codes::W0201)
                .with_hint("carry the ordering through a loop token or a wait_all");
                if let Some(def) = program.defining_op(t) {
                    diag = diag.with_related(def, "dropped producer");
                }
                diagnostics.push(diag);
            }
        }
    }
    Ok((dropped, diagnostics))
}

/// Whether the producer of `token` waits, through its dependency chain, on
/// one of the control tokens kept in its place.
fn is_covered(program: &Program, token: ValueId, control: &[ValueId]) -> bool {
    let mut stack: Vec<OpId> = program.defining_op(token).into_iter().collect();
    let mut visited = HashSet::new();
    while let Some(op) = stack.pop() {
        if !visited.insert(op) {
            continue;
        }
        for &d in &program.op(op).async_deps {
            if control.contains(&d) {
                return true;
            }
            stack.extend(program.defining_op(d));
        }
    }
    false
}

// ── Pass 5: unused kernel operands ───────────────────────────────────────────

pub fn remove_unused_kernel_operands(program: &mut Program) -> Result<usize> {
    let mut removed = 0;
    for hier in program.walk() {
        let OpKind::Hierarchy {
            kernel_operands, ..
        } = &program.op(hier).kind
        else {
            continue;
        };
        for i in (0..kernel_operands.len()).rev() {
            let unused = program
                .kernel_argument(hier, i)
                .is_some_and(|arg| !program.has_uses(arg));
            if unused {
                program.erase_kernel_operand(hier, i)?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for cleanup postconditions (C1-C2).
#[derive(Debug, Clone)]
pub struct CleanupCert {
    /// C1: Every non-launch hierarchy op depends on control tokens only.
    pub c1_hierarchy_control_only: bool,
    /// C2: No list repeats a token and no async join has a single input.
    pub c2_lists_minimal: bool,
}

impl crate::pass::StageCert for CleanupCert {
    fn all_pass(&self) -> bool {
        self.c1_hierarchy_control_only && self.c2_lists_minimal
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("C1_hierarchy_control_only", self.c1_hierarchy_control_only),
            ("C2_lists_minimal", self.c2_lists_minimal),
        ]
    }
}

pub fn verify_cleanup(program: &Program) -> CleanupCert {
    let ops = program.walk();
    let c1 = ops.iter().all(|&op| match program.op(op).kind {
        OpKind::Hierarchy { level, .. } if level != HierarchyLevel::Launch => program
            .op(op)
            .async_deps
            .iter()
            .all(|&t| is_control_dependency(program, op, t)),
        _ => true,
    });
    let c2 = ops.iter().all(|&op| {
        let o = program.op(op);
        let unique: HashSet<&ValueId> = o.async_deps.iter().collect();
        let single_join = matches!(o.kind, OpKind::WaitAll)
            && o.async_deps.len() == 1
            && program.async_token(op).is_some();
        unique.len() == o.async_deps.len() && !single_join
    });
    CleanupCert {
        c1_hierarchy_control_only: c1,
        c2_lists_minimal: c2,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
