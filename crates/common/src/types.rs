//! Closed element-type system shared by columns, values, and program
//! signatures.
//!
//! One tagged enum replaces per-type code paths: every operation that cares
//! about element width, nil representation, or ordering dispatches over
//! [`ElemType`] instead of duplicating a code path per type.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BasaltError, Result};

/// Element kinds storable in a column or scalar slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemType {
    /// Single-byte boolean (nil sentinel `0x80`).
    Bool,
    /// 32-bit signed integer (nil sentinel `i32::MIN`).
    Int,
    /// 64-bit signed integer (nil sentinel `i64::MIN`).
    Lng,
    /// 64-bit float (nil sentinel NaN).
    Dbl,
    /// Dense logical position identifier (nil sentinel `u64::MAX`).
    Oid,
    /// Variable-width UTF-8 string, stored through a side-heap.
    Str,
}

impl ElemType {
    /// Width of one element in the column's main heap, in bytes.
    ///
    /// For [`ElemType::Str`] this is the width of the side-heap offset slot,
    /// not of the string payload.
    #[must_use]
    pub fn entry_width(self) -> usize {
        match self {
            ElemType::Bool => 1,
            ElemType::Int => 4,
            ElemType::Lng | ElemType::Dbl | ElemType::Oid | ElemType::Str => 8,
        }
    }

    /// Fixed payload width, or `None` for variable-width types.
    #[must_use]
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ElemType::Str => None,
            other => Some(other.entry_width()),
        }
    }

    /// True when elements live partly in a side-heap.
    #[must_use]
    pub fn is_varsized(self) -> bool {
        self.fixed_width().is_none()
    }

    /// The nil scalar of this type.
    #[must_use]
    pub fn nil(self) -> Scalar {
        Scalar::Nil(self)
    }

    /// Parse a lowercase type name as used in operation signatures.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "bool" => Ok(ElemType::Bool),
            "int" => Ok(ElemType::Int),
            "lng" => Ok(ElemType::Lng),
            "dbl" => Ok(ElemType::Dbl),
            "oid" => Ok(ElemType::Oid),
            "str" => Ok(ElemType::Str),
            other => Err(BasaltError::TypeMismatch(format!(
                "unknown element type name {other:?}"
            ))),
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElemType::Bool => "bool",
            ElemType::Int => "int",
            ElemType::Lng => "lng",
            ElemType::Dbl => "dbl",
            ElemType::Oid => "oid",
            ElemType::Str => "str",
        };
        f.write_str(name)
    }
}

/// Declared type of a program variable or signature slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    /// Wildcard used by polymorphic operation signatures.
    Any,
    /// Scalar of a concrete element type.
    Scalar(ElemType),
    /// Column of a concrete element type.
    Column(ElemType),
    /// Column of any element type (polymorphic column slots).
    ColumnAny,
}

impl ValueType {
    /// Signature-side acceptance check: does a slot declared as `self`
    /// accept a variable declared as `actual`?
    #[must_use]
    pub fn accepts(self, actual: ValueType) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::ColumnAny => {
                matches!(actual, ValueType::Column(_) | ValueType::ColumnAny)
            }
            other => other == actual,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => f.write_str("any"),
            ValueType::Scalar(t) => write!(f, "{t}"),
            ValueType::Column(t) => write!(f, "[{t}]"),
            ValueType::ColumnAny => f.write_str("[any]"),
        }
    }
}

/// One typed scalar, including the typed nil of each element type.
///
/// `Dbl(NaN)` and `Nil(Dbl)` are the same logical value; [`Scalar::is_nil`]
/// and the ordering helpers treat them identically.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Boolean value.
    Bool(bool),
    /// 32-bit integer value.
    Int(i32),
    /// 64-bit integer value.
    Lng(i64),
    /// 64-bit float value.
    Dbl(f64),
    /// Logical position identifier.
    Oid(u64),
    /// Owned UTF-8 string value.
    Str(String),
    /// Typed nil.
    Nil(ElemType),
}

impl Scalar {
    /// Element type of this scalar.
    #[must_use]
    pub fn elem_type(&self) -> ElemType {
        match self {
            Scalar::Bool(_) => ElemType::Bool,
            Scalar::Int(_) => ElemType::Int,
            Scalar::Lng(_) => ElemType::Lng,
            Scalar::Dbl(_) => ElemType::Dbl,
            Scalar::Oid(_) => ElemType::Oid,
            Scalar::Str(_) => ElemType::Str,
            Scalar::Nil(t) => *t,
        }
    }

    /// True for the typed nil (and for `Dbl(NaN)`, which encodes it).
    #[must_use]
    pub fn is_nil(&self) -> bool {
        match self {
            Scalar::Nil(_) => true,
            Scalar::Dbl(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Total order between two scalars of the same element type, with nil
    /// ordered before every non-nil value.
    ///
    /// Returns a [`BasaltError::TypeMismatch`] for cross-type comparisons.
    pub fn order(&self, other: &Scalar) -> Result<Ordering> {
        if self.elem_type() != other.elem_type() {
            return Err(BasaltError::TypeMismatch(format!(
                "cannot order {} against {}",
                self.elem_type(),
                other.elem_type()
            )));
        }
        Ok(match (self.is_nil(), other.is_nil()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => match (self, other) {
                (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
                (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
                (Scalar::Lng(a), Scalar::Lng(b)) => a.cmp(b),
                (Scalar::Dbl(a), Scalar::Dbl(b)) => a.total_cmp(b),
                (Scalar::Oid(a), Scalar::Oid(b)) => a.cmp(b),
                (Scalar::Str(a), Scalar::Str(b)) => a.cmp(b),
                _ => unreachable!("same-type comparison after type check"),
            },
        })
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Lng(v) => write!(f, "{v}"),
            Scalar::Dbl(v) => write!(f, "{v}"),
            Scalar::Oid(v) => write!(f, "{v}@0"),
            Scalar::Str(v) => write!(f, "{v:?}"),
            Scalar::Nil(t) => write!(f, "nil:{t}"),
        }
    }
}
