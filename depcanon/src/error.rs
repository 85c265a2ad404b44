// error.rs — Fatal invariant violations
//
// Every condition here aborts the run: it means the input program broke a
// precondition of the analysis or the analysis itself produced an
// inconsistent structure. Recoverable conditions are reported as
// `diag::Diagnostic` values instead.

use thiserror::Error;

use crate::id::{OpId, ValueId};

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("no vertex construction rule for {kind} ({op})")]
    UnknownKind { op: OpId, kind: String },

    #[error("unknown dependency mode '{0}' (expected 'RAW' or 'WAW/WAR')")]
    UnknownDepMode(String),

    #[error("{value} is not an async token")]
    NotAToken { value: ValueId },

    #[error("{value} is not a memref")]
    NotAMemref { value: ValueId },

    #[error("{op} is not an async event")]
    NotAsync { op: OpId },

    #[error("malformed dependency list on {op}: {reason}")]
    MalformedDepList { op: OpId, reason: &'static str },

    #[error("dependency graph {graph} contains a cycle through {op:?}")]
    CyclicGraph { graph: String, op: Option<OpId> },

    #[error("graph tree shape mismatch at {graph}: {reason}")]
    TreeShapeMismatch { graph: String, reason: String },

    #[error("channel '{channel}' has {found} matching {direction} ops (expected exactly 1)")]
    ChannelPairing {
        channel: String,
        direction: &'static str,
        found: usize,
    },

    #[error("malformed loop {op}: {reason}")]
    MalformedLoop { op: OpId, reason: &'static str },

    #[error("malformed execute {op}: {reason}")]
    MalformedExecute { op: OpId, reason: &'static str },

    #[error("{owner} refers to {kind} {index}, which does not exist")]
    DanglingId {
        owner: String,
        kind: &'static str,
        index: u32,
    },
}

pub type Result<T> = std::result::Result<T, CanonError>;
