//! Typed identifiers shared across storage and VM components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable variable-slot index within one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(
    /// Raw slot index.
    pub u32,
);

impl VarId {
    /// Slot index as a usize for direct vector addressing.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable column handle index within one column pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnId(
    /// Raw arena slot value.
    pub u32,
);

impl ColumnId {
    /// Arena slot as a usize for direct vector addressing.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
