//! Runtime values bound to stack-frame slots.

use basalt_common::error::{BasaltError, Result};
use basalt_common::types::{Scalar, ValueType};
use basalt_storage::ColumnHandle;

/// One runtime value: a typed scalar or a reference-counted column handle.
///
/// Cloning a column value retains it; dropping releases. Values are owned
/// by exactly one frame slot at a time and are never deep-copied when
/// passed between frames.
#[derive(Debug, Clone)]
pub enum Value {
    /// Unbound slot.
    Void,
    /// Typed scalar, including typed nils.
    Scalar(Scalar),
    /// Reference-counted column handle.
    Column(ColumnHandle),
}

impl Value {
    /// Declared-type view of this value; `None` for unbound slots.
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Void => None,
            Value::Scalar(s) => Some(ValueType::Scalar(s.elem_type())),
            Value::Column(h) => Some(ValueType::Column(h.elem_type())),
        }
    }

    /// Borrow the scalar payload or fail with a type mismatch.
    pub fn as_scalar(&self) -> Result<&Scalar> {
        match self {
            Value::Scalar(s) => Ok(s),
            other => Err(BasaltError::TypeMismatch(format!(
                "expected scalar, got {}",
                other.describe()
            ))),
        }
    }

    /// Borrow the column handle or fail with a type mismatch.
    pub fn as_column(&self) -> Result<&ColumnHandle> {
        match self {
            Value::Column(h) => Ok(h),
            other => Err(BasaltError::TypeMismatch(format!(
                "expected column, got {}",
                other.describe()
            ))),
        }
    }

    /// Short human-readable tag for error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.value_type() {
            Some(t) => t.to_string(),
            None => "void".to_string(),
        }
    }
}
