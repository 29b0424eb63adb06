//! Cost-driven partitioning pass ("mitosis") over frozen programs.
//!
//! Architecture role:
//! - locates the dominant base-column access in a program through an
//!   opaque row-count oracle
//! - decides a slice count from the configured memory/thread budget
//! - rewrites the instruction stream into per-slice clones plus an
//!   order-independent fan-in, re-checking the result before returning it
//!
//! Key modules:
//! - [`mitosis`]
//! - [`stats`]

pub mod mitosis;
pub mod stats;

pub use mitosis::{partition, MitosisOutcome, SkipReason};
pub use stats::{CatalogStats, RowCountOracle};
