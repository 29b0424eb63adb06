//! Shared configuration, error types, IDs, element types, and memory
//! accounting for basalt crates.
//!
//! Architecture role:
//! - defines the engine configuration passed across layers
//! - provides the common [`BasaltError`] / [`Result`] contracts
//! - hosts the closed element-type system used by columns and programs
//! - hosts the process-wide memory accountant enforced by the heap manager
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`memory`]
//! - [`types`]

pub mod config;
pub mod error;
pub mod ids;
pub mod memory;
pub mod types;

pub use config::EngineConfig;
pub use error::{BasaltError, Result};
pub use ids::{ColumnId, VarId};
pub use memory::MemoryAccountant;
pub use types::{ElemType, Scalar, ValueType};
