//! Heap manager, column store, and reference-counted column pool.
//!
//! Architecture role:
//! - owns raw backing storage for columns and charges it against the
//!   process-wide memory accountant
//! - represents one typed value sequence per column with incremental
//!   sortedness/null bookkeeping
//! - publishes columns into a shared arena with an explicit reference-count
//!   table, the unit every VM instruction operates on
//!
//! Key modules:
//! - [`heap`]
//! - [`column`]
//! - [`pool`]

pub mod column;
pub mod heap;
pub mod pool;

pub use column::{Column, ColumnFlags, FixedElem, Persistence, MAX_ELEMS};
pub use heap::{Heap, MapMode};
pub use pool::{ColumnHandle, ColumnPool};
