// id.rs — Stable arena identifiers for the program model and scope graphs
//
// Every entity in a `Program` (op, value, block) and every graph in a
// `GraphTree` is addressed by a dense u32 index into its owning arena.
// Indices are allocated in creation order, so a given construction sequence
// always yields the same ids.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of an operation in `Program::ops`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(pub u32);

/// Index of an SSA value in `Program::values`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

/// Index of a block in `Program::blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

/// Index of a scope graph in `GraphTree::graphs`. The host graph is `GraphId(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(pub u32);

macro_rules! arena_index {
    ($($ty:ident),*) => {$(
        impl $ty {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    )*};
}

arena_index!(OpId, ValueId, BlockId, GraphId);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "^bb{}", self.0)
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes() {
        assert_eq!(OpId(3).to_string(), "op3");
        assert_eq!(ValueId(7).to_string(), "%7");
        assert_eq!(BlockId(0).to_string(), "^bb0");
        assert_eq!(GraphId(2).to_string(), "g2");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ValueId(12)).unwrap();
        assert_eq!(json, "12");
        let back: OpId = serde_json::from_str("5").unwrap();
        assert_eq!(back, OpId(5));
    }
}
