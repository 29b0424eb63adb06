//! Row-count estimation contract between the compiler surface and the
//! partitioner.
//!
//! The partitioner treats the oracle as opaque: whoever compiles programs
//! populates estimates from whatever statistics it keeps. [`CatalogStats`]
//! is the built-in implementation over the catalog's actual base-column
//! counts.

use std::sync::Arc;

use basalt_common::ids::VarId;
use basalt_common::types::{Scalar, ValueType};
use basalt_vm::{Catalog, Program, Value};

/// Estimates consumed by the partitioner.
pub trait RowCountOracle {
    /// Estimated row count of the column a variable will hold, if known.
    fn estimated_row_count(&self, program: &Program, var: VarId) -> Option<u64>;

    /// Estimated bytes per row of the column a variable will hold.
    ///
    /// The default derives the entry width from the variable's declared
    /// type; implementations with payload statistics (string side-heaps)
    /// can do better.
    fn estimated_row_bytes(&self, program: &Program, var: VarId) -> Option<u64> {
        match program.var(var).vtype {
            ValueType::Column(t) => Some(t.entry_width() as u64),
            ValueType::ColumnAny => Some(8),
            _ => None,
        }
    }
}

/// Oracle backed by the catalog's live base-column counts.
#[derive(Debug, Clone)]
pub struct CatalogStats {
    catalog: Arc<Catalog>,
}

impl CatalogStats {
    /// Oracle over `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

impl RowCountOracle for CatalogStats {
    fn estimated_row_count(&self, program: &Program, var: VarId) -> Option<u64> {
        let instr = program
            .instrs()
            .iter()
            .find(|instr| instr.control.is_none() && instr.results().first() == Some(&var))?;
        match (instr.module.as_str(), instr.function.as_str()) {
            ("catalog", "bind") => {
                let name_var = instr.args().first()?;
                match program.constant_value(*name_var)? {
                    Value::Scalar(Scalar::Str(name)) => self.catalog.row_count(name),
                    _ => None,
                }
            }
            // A scan yields as many rows as its source.
            ("scan", "range") => {
                let src = instr.args().first()?;
                self.estimated_row_count(program, *src)
            }
            _ => None,
        }
    }
}
