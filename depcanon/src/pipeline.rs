// pipeline.rs — Canonicalization state and pass orchestration
//
// Holds the program and every pass artifact, and runs the minimal set of
// passes for a given terminal PassId. Each pass is followed by its
// certificate check; a failed obligation becomes an error diagnostic.
//
// Preconditions: `state.program` is well-formed.
// Postconditions: artifacts for all required passes are populated, or
//   `has_error` is set.
// Failure modes: a fatal `CanonError` in any pass, or a failed certificate.
// Side effects: calls `on_pass_complete` after each pass; may write graph
//   dumps when `CanonOptions::dump_graphs` is set.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cleanup::{run_cleanup, verify_cleanup, CleanupResult};
use crate::diag::{codes, has_errors, DiagCode, Diagnostic};
use crate::error::CanonError;
use crate::graph::{build_graphs, verify_graphs, DependencyContext, GraphTree};
use crate::ir::Program;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::reduce::{canonicalize_graphs, verify_reduction, ReducedTree};
use crate::rewrite::{update_dep_list, verify_rewrite, RewriteResult};
use crate::tracer::{infer_memory_dependencies, TraceResult};

// ── Options ────────────────────────────────────────────────────────────────

/// Run configuration. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonOptions {
    /// Run the memory-dependency tracer before building graphs.
    pub infer_memory_deps: bool,
    /// Run the cleanup passes after rewriting.
    pub cleanup: bool,
    /// Write one DOT file per reduced scope graph.
    pub dump_graphs: bool,
    /// Dump target; the current directory when unset.
    pub dump_dir: Option<PathBuf>,
}

impl Default for CanonOptions {
    fn default() -> Self {
        CanonOptions {
            infer_memory_deps: true,
            cleanup: true,
            dump_graphs: false,
            dump_dir: None,
        }
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Provenance metadata for reproducibility checks.
///
/// `input_hash`: SHA-256 of the raw input program text.
/// `output_hash`: SHA-256 of the emitted program JSON.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub input_hash: [u8; 32],
    pub output_hash: [u8; 32],
    pub version: &'static str,
}

impl Provenance {
    pub fn input_hash_hex(&self) -> String {
        bytes_to_hex(&self.input_hash)
    }

    pub fn output_hash_hex(&self) -> String {
        bytes_to_hex(&self.output_hash)
    }

    /// Serialize provenance as a JSON string for `--emit fingerprint`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"input_hash\": \"{}\",\n  \"output_hash\": \"{}\",\n  \"version\": \"{}\"\n}}\n",
            self.input_hash_hex(),
            self.output_hash_hex(),
            self.version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

pub fn compute_provenance(input: &str, output: &str) -> Provenance {
    Provenance {
        input_hash: sha256(input),
        output_hash: sha256(output),
        version: env!("CARGO_PKG_VERSION"),
    }
}

/// The program being canonicalized plus every pass artifact.
#[derive(Debug)]
pub struct CanonState {
    pub program: Program,
    pub trace: Option<TraceResult>,
    pub graphs: Option<GraphTree>,
    pub reduced: Option<ReducedTree>,
    pub rewrite: Option<RewriteResult>,
    pub cleanup: Option<CleanupResult>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CanonState {
    pub fn new(program: Program) -> Self {
        CanonState {
            program,
            trace: None,
            graphs: None,
            reduced: None,
            rewrite: None,
            cleanup: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// A pass failed. Certificate failures leave `fatal` empty; the failed
/// obligations are in `CanonState::diagnostics`.
#[derive(Debug, Error)]
#[error("{failing_pass} pass failed")]
pub struct PipelineError {
    pub failing_pass: PassId,
    #[source]
    pub fatal: Option<CanonError>,
}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

fn finish_pass(
    state: &mut CanonState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    let desc = descriptor(pass_id);
    debug!(
        pass = %pass_id,
        outputs = ?desc.outputs,
        invalidated_by = desc.invalidation_key,
        ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
            fatal: None,
        });
    }
    Ok(())
}

fn fatal(state: &mut CanonState, pass_id: PassId, err: CanonError) -> PipelineError {
    state.has_error = true;
    state.diagnostics.push(Diagnostic::error(None, err.to_string()));
    PipelineError {
        failing_pass: pass_id,
        fatal: Some(err),
    }
}

/// Append an error diagnostic naming the failed obligations, if any.
fn check_cert(cert: &impl StageCert, pass_id: PassId, code: DiagCode, diags: &mut Vec<Diagnostic>) {
    if cert.all_pass() {
        return;
    }
    let failed: Vec<&str> = cert
        .obligations()
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name)
        .collect();
    diags.push(
        Diagnostic::error(None, format!("{pass_id} verification failed: {}", failed.join(", ")))
            .with_code(code)
            .with_hint(format!("expected {}", descriptor(pass_id).invariants)),
    );
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → certificate → on_pass_complete → error check.
pub fn run_pipeline(
    state: &mut CanonState,
    terminal: PassId,
    options: &CanonOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        match pass_id {
            PassId::Trace => {
                if !options.infer_memory_deps {
                    debug!("memory dependency inference disabled");
                    continue;
                }
                let result = infer_memory_dependencies(&mut state.program)
                    .map_err(|e| fatal(state, pass_id, e))?;
                let diags = result.diagnostics.clone();
                state.trace = Some(result);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::BuildGraphs => {
                let mut ctx = DependencyContext::new();
                let result = build_graphs(&mut state.program, &mut ctx)
                    .map_err(|e| fatal(state, pass_id, e))?;
                let mut diags = result.diagnostics;
                check_cert(&verify_graphs(&result.tree), pass_id, codes::E0401, &mut diags);
                state.graphs = Some(result.tree);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Reduce => {
                let Some(tree) = state.graphs.as_ref() else {
                    return Err(missing(pass_id));
                };
                let result = match canonicalize_graphs(tree) {
                    Ok(result) => result,
                    Err(e) => return Err(fatal(state, pass_id, e)),
                };
                let mut diags = result.diagnostics;
                check_cert(
                    &verify_reduction(tree, &result.reduced),
                    pass_id,
                    codes::E0402,
                    &mut diags,
                );
                if options.dump_graphs {
                    let dir = options.dump_dir.clone().unwrap_or_else(|| PathBuf::from("."));
                    diags.extend(crate::dot::dump_dot_files(&result.reduced.tree, &dir));
                }
                state.reduced = Some(result.reduced);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Rewrite => {
                let reduced = state.reduced.as_ref().ok_or_else(|| missing(pass_id))?;
                let result = update_dep_list(&mut state.program, reduced)
                    .map_err(|e| fatal(state, pass_id, e))?;
                let mut diags = result.diagnostics.clone();
                check_cert(&verify_rewrite(&state.program), pass_id, codes::E0403, &mut diags);
                state.rewrite = Some(result);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Cleanup => {
                if !options.cleanup {
                    debug!("cleanup disabled");
                    continue;
                }
                let result = run_cleanup(&mut state.program).map_err(|e| fatal(state, pass_id, e))?;
                let mut diags = result.diagnostics.clone();
                check_cert(&verify_cleanup(&state.program), pass_id, codes::E0404, &mut diags);
                state.cleanup = Some(result);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
        }
    }
    Ok(())
}

fn missing(pass_id: PassId) -> PipelineError {
    PipelineError {
        failing_pass: pass_id,
        fatal: None,
    }
}

/// Run every pass on `program` and return the final state.
pub fn canonicalize(program: Program, options: &CanonOptions) -> Result<CanonState, PipelineError> {
    let mut state = CanonState::new(program);
    run_pipeline(&mut state, PassId::Cleanup, options, |_, _| {})?;
    Ok(state)
}

// ── Tests ──────────────────────────────────────────────────────────────────
