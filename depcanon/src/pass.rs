// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the canonicalizer's five passes, their dependency edges, and the
// artifacts they produce. Used by the pipeline runner to compute the minimal
// pass subset for each --emit target.

use std::collections::HashSet;
use std::fmt;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Trace,
    BuildGraphs,
    Reduce,
    Rewrite,
    Cleanup,
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(descriptor(*self).name)
    }
}

/// Machine-readable artifact identifiers. Each maps to a field of
/// `CanonState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    TracedProgram, // Program with inferred deps
    Trace,         // TraceResult
    Graphs,        // GraphTree
    Reduced,       // ReducedTree
    Rewritten,     // Program with regenerated deps
    Cleaned,       // Program after cleanup
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    pub name: &'static str,
    /// Passes whose outputs this pass consumes.
    pub inputs: &'static [PassId],
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Trace => PassDescriptor {
            name: "trace",
            inputs: &[],
            outputs: &[ArtifactId::TracedProgram, ArtifactId::Trace],
            invalidation_key: "program",
            invariants: "every conflicting access pair is ordered by a token",
        },
        PassId::BuildGraphs => PassDescriptor {
            name: "build_graphs",
            inputs: &[PassId::Trace],
            outputs: &[ArtifactId::Graphs],
            invalidation_key: "program + dependency lists",
            invariants: "G1-G2: every scope graph acyclic, start is the only source",
        },
        PassId::Reduce => PassDescriptor {
            name: "reduce",
            inputs: &[PassId::BuildGraphs],
            outputs: &[ArtifactId::Reduced],
            invalidation_key: "graphs",
            invariants: "R1-R2: reachability preserved, edge set minimal",
        },
        PassId::Rewrite => PassDescriptor {
            name: "rewrite",
            inputs: &[PassId::Reduce],
            outputs: &[ArtifactId::Rewritten],
            invalidation_key: "program + reduced graphs",
            invariants: "W1: no dependency list repeats a token",
        },
        PassId::Cleanup => PassDescriptor {
            name: "cleanup",
            inputs: &[PassId::Rewrite],
            outputs: &[ArtifactId::Cleaned],
            invalidation_key: "rewritten program",
            invariants: "C1-C2: hierarchy deps are control tokens, lists minimal",
        },
    }
}

// ── Certificates ───────────────────────────────────────────────────────────

/// Machine-checkable postconditions of one pass.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    /// `(name, holds)` for each obligation, in a fixed order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Dependency resolution ──────────────────────────────────────────────────

pub const ALL_PASSES: [PassId; 5] = [
    PassId::Trace,
    PassId::BuildGraphs,
    PassId::Reduce,
    PassId::Rewrite,
    PassId::Cleanup,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
