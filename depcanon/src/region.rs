// region.rs — Partial region descriptors and conflict test
//
// A region is a buffer plus one index per dimension, where `None` means the
// whole extent of that dimension. Two regions of the same buffer conflict
// when every dimension may overlap.

use crate::id::ValueId;
use crate::ir::{MemAccess, Program, ValueType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialRegion {
    pub memref: ValueId,
    pub rank: u32,
    pub indices: Vec<Option<ValueId>>,
}

impl PartialRegion {
    /// Region of a whole buffer: every dimension unconstrained.
    pub fn whole(program: &Program, memref: ValueId) -> Self {
        let rank = memref_rank(program, memref);
        Self {
            memref,
            rank,
            indices: vec![None; rank as usize],
        }
    }

    /// Region addressed by an access; without offsets it covers everything.
    pub fn from_access(program: &Program, acc: &MemAccess) -> Self {
        if acc.offsets.is_empty() {
            return Self::whole(program, acc.memref);
        }
        Self {
            memref: acc.memref,
            rank: acc.offsets.len() as u32,
            indices: acc.offsets.iter().map(|&o| Some(o)).collect(),
        }
    }
}

fn memref_rank(program: &Program, v: ValueId) -> u32 {
    match program.value_type(v) {
        ValueType::Memref { rank, .. } => rank,
        _ => 0,
    }
}

/// Two indices conflict unless both are known and provably different.
pub fn indices_conflict(program: &Program, a: Option<ValueId>, b: Option<ValueId>) -> bool {
    let (Some(a), Some(b)) = (a, b) else {
        return true;
    };
    if a == b {
        return true;
    }
    match (program.constant_value(a), program.constant_value(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Per-dimension conflict test. Rank mismatch never conflicts.
pub fn regions_conflict(program: &Program, a: &PartialRegion, b: &PartialRegion) -> bool {
    if a.rank != b.rank {
        return false;
    }
    a.indices
        .iter()
        .zip(&b.indices)
        .all(|(&x, &y)| indices_conflict(program, x, y))
}
