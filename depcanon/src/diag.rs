// diag.rs — Non-fatal diagnostics shared by all passes
//
// Conditions that do not abort a run (a dropped cross-scope edge, a lossy
// hierarchy rewrite, a dump directory fallback, a failed certificate) are
// collected as `Diagnostic` values and returned alongside each pass result.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::OpId;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `W0101`, `E0402`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code keeps its meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// Cross-scope elevation found no async ancestor sharing the sink's block.
    pub const W0101: DiagCode = DiagCode("W0101");
    /// A hierarchy dependency was dropped with no control token to replace it.
    pub const W0201: DiagCode = DiagCode("W0201");
    /// Graph dump directory could not be used; fell back to the working directory.
    pub const W0301: DiagCode = DiagCode("W0301");
    /// Graph dump file could not be written.
    pub const W0302: DiagCode = DiagCode("W0302");
    /// Build certificate failed (G1/G2).
    pub const E0401: DiagCode = DiagCode("E0401");
    /// Reduction certificate failed (R1/R2).
    pub const E0402: DiagCode = DiagCode("E0402");
    /// Rewrite certificate failed (W1).
    pub const E0403: DiagCode = DiagCode("E0403");
    /// Cleanup certificate failed (C1/C2).
    pub const E0404: DiagCode = DiagCode("E0404");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related op ───────────────────────────────────────────────────────────

/// A secondary op providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedOp {
    pub op: OpId,
    pub label: String,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining how a condition was reached.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub op: Option<OpId>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// The op the diagnostic is anchored at, if any.
    pub op: Option<OpId>,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedOp>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, related ops, or causes.
    pub fn new(level: DiagLevel, op: Option<OpId>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            op,
            message: message.into(),
            hint: None,
            related: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    pub fn warning(op: Option<OpId>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, op, message)
    }

    pub fn error(op: Option<OpId>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, op, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related op.
    pub fn with_related(mut self, op: OpId, label: impl Into<String>) -> Self {
        self.related.push(RelatedOp {
            op,
            label: label.into(),
        });
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, op: Option<OpId>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            op,
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(op) = self.op {
            write!(f, "\n  at: {}", op)?;
        }
        for r in &self.related {
            write!(f, "\n  related: {} ({})", r.op, r.label)?;
        }
        for c in &self.cause_chain {
            match c.op {
                Some(op) => write!(f, "\n  cause: {} ({})", c.message, op)?,
                None => write!(f, "\n  cause: {}", c.message)?,
            }
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}
