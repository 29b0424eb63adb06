//! Baseline operation modules registered by every engine build.
//!
//! The set is intentionally small: base-column binding, the sliceable
//! materializing scan, the order-independent fan-in, column builders, and
//! the aggregates the partitioner reasons about. Everything else arrives
//! through the same registration contract from outside the core (see
//! [`foreign_aggregate`]).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use basalt_common::error::{BasaltError, Result};
use basalt_common::types::{ElemType, Scalar, ValueType};
use basalt_storage::Column;

use crate::interpreter::EvalCtx;
use crate::registry::{OpFn, OpKind, OpRegistry, OpSignature, Operation};
use crate::value::Value;

/// Install the baseline modules into a registry.
pub fn install(registry: &OpRegistry) {
    registry.register(Operation {
        module: "catalog".to_string(),
        function: "bind".to_string(),
        signature: OpSignature::new(
            vec![ValueType::Scalar(ElemType::Str)],
            vec![ValueType::ColumnAny],
        ),
        kind: OpKind::Plain,
        callable: Arc::new(bind),
    });
    registry.register(Operation {
        module: "scan".to_string(),
        function: "range".to_string(),
        signature: OpSignature::new(vec![ValueType::ColumnAny], vec![ValueType::ColumnAny]),
        kind: OpKind::Sliceable,
        callable: Arc::new(scan_range),
    });
    registry.register(Operation {
        module: "columns".to_string(),
        function: "pack".to_string(),
        signature: OpSignature::variadic(vec![], ValueType::ColumnAny, vec![ValueType::ColumnAny]),
        kind: OpKind::FanIn,
        callable: Arc::new(pack),
    });
    registry.register(Operation {
        module: "columns".to_string(),
        function: "new".to_string(),
        signature: OpSignature::new(
            vec![ValueType::Scalar(ElemType::Str)],
            vec![ValueType::ColumnAny],
        ),
        kind: OpKind::Plain,
        callable: Arc::new(new_column),
    });
    registry.register(Operation {
        module: "columns".to_string(),
        function: "append".to_string(),
        signature: OpSignature::new(
            vec![ValueType::ColumnAny, ValueType::Any],
            vec![ValueType::ColumnAny],
        ),
        kind: OpKind::Plain,
        callable: Arc::new(append_value),
    });
    registry.register(Operation {
        module: "columns".to_string(),
        function: "assert_key".to_string(),
        signature: OpSignature::new(vec![ValueType::ColumnAny], vec![ValueType::ColumnAny]),
        kind: OpKind::UniqueAssertion,
        callable: Arc::new(assert_key),
    });
    registry.register(Operation {
        module: "aggr".to_string(),
        function: "sum".to_string(),
        signature: OpSignature::new(vec![ValueType::ColumnAny], vec![ValueType::Any]),
        kind: OpKind::Aggregate { recombinable: true },
        callable: Arc::new(sum),
    });
    registry.register(Operation {
        module: "aggr".to_string(),
        function: "count".to_string(),
        signature: OpSignature::new(
            vec![ValueType::ColumnAny],
            vec![ValueType::Scalar(ElemType::Lng)],
        ),
        kind: OpKind::Aggregate { recombinable: true },
        callable: Arc::new(count),
    });
    registry.register(Operation {
        module: "aggr".to_string(),
        function: "median".to_string(),
        signature: OpSignature::new(vec![ValueType::ColumnAny], vec![ValueType::Any]),
        kind: OpKind::Aggregate {
            recombinable: false,
        },
        callable: Arc::new(median),
    });
    registry.register(Operation {
        module: "group".to_string(),
        function: "id".to_string(),
        signature: OpSignature::new(
            vec![ValueType::ColumnAny],
            vec![ValueType::Column(ElemType::Oid)],
        ),
        kind: OpKind::Grouping,
        callable: Arc::new(group_id),
    });
}

/// Build a foreign-function aggregate registration.
///
/// Embedded-script bridges register through this: the core records the
/// signature and the [`OpKind::ForeignAggregate`] classification (which
/// blocks slicing) and otherwise treats the callable as opaque.
#[must_use]
pub fn foreign_aggregate(
    module: impl Into<String>,
    function: impl Into<String>,
    signature: OpSignature,
    callable: OpFn,
) -> Operation {
    Operation {
        module: module.into(),
        function: function.into(),
        signature,
        kind: OpKind::ForeignAggregate,
        callable,
    }
}

fn bind(ctx: &mut EvalCtx, args: &[Value]) -> Result<Vec<Value>> {
    let name = match args[0].as_scalar()? {
        Scalar::Str(name) => name,
        other => {
            return Err(BasaltError::TypeMismatch(format!(
                "catalog.bind name is {}, not str",
                other.elem_type()
            )));
        }
    };
    let handle = ctx.env.catalog.handle(name).ok_or_else(|| {
        BasaltError::Execution(format!("unknown base column {name:?}"))
    })?;
    Ok(vec![Value::Column(handle)])
}

/// Materializing scan over a base column.
///
/// Honors the slice annotation by reading only its disjoint row range; the
/// output's seqbase preserves the rows' global positions.
fn scan_range(ctx: &mut EvalCtx, args: &[Value]) -> Result<Vec<Value>> {
    let input = args[0].as_column()?.pin()?;
    let count = input.count();
    let (lo, hi) = match ctx.slice {
        Some(slice) => slice.bounds(count),
        None => (0, count),
    };
    let mut out = Column::new(input.accountant(), input.elem_type(), hi - lo)?;
    for pos in lo..hi {
        out.append(&input.get(pos)?)?;
    }
    out.set_seqbase(input.seqbase() + lo as u64);
    Ok(vec![Value::Column(ctx.env.pool.publish(out))])
}

/// Fan-in: concatenate slice results in argument (= slice index) order.
///
/// Binding by slice index makes the recombination independent of worker
/// completion order.
fn pack(ctx: &mut EvalCtx, args: &[Value]) -> Result<Vec<Value>> {
    if args.is_empty() {
        return Err(BasaltError::Execution(
            "columns.pack needs at least one part".to_string(),
        ));
    }
    let parts = args
        .iter()
        .map(|v| v.as_column()?.pin())
        .collect::<Result<Vec<_>>>()?;
    let elem = parts[0].elem_type();
    for part in &parts[1..] {
        if part.elem_type() != elem {
            return Err(BasaltError::TypeMismatch(format!(
                "columns.pack over {} and {}",
                elem,
                part.elem_type()
            )));
        }
    }
    let total: usize = parts.iter().map(|p| p.count()).sum();
    let mut out = Column::new(parts[0].accountant(), elem, total)?;
    for part in &parts {
        for pos in 0..part.count() {
            out.append(&part.get(pos)?)?;
        }
    }
    out.set_seqbase(parts[0].seqbase());
    Ok(vec![Value::Column(ctx.env.pool.publish(out))])
}

fn new_column(ctx: &mut EvalCtx, args: &[Value]) -> Result<Vec<Value>> {
    let name = match args[0].as_scalar()? {
        Scalar::Str(name) => name,
        other => {
            return Err(BasaltError::TypeMismatch(format!(
                "columns.new type name is {}, not str",
                other.elem_type()
            )));
        }
    };
    let elem = ElemType::parse(name)?;
    let col = Column::new(&ctx.env.acct, elem, 8)?;
    Ok(vec![Value::Column(ctx.env.pool.publish(col))])
}

/// Copying append: builds a fresh column with the value added.
///
/// Instruction-level appends copy because the argument column is shared
/// with the frame while the instruction runs; bulk loads append in place
/// on the exclusively owned column before publication instead.
fn append_value(ctx: &mut EvalCtx, args: &[Value]) -> Result<Vec<Value>> {
    let input = args[0].as_column()?.pin()?;
    let value = args[1].as_scalar()?;
    let mut out = Column::new(input.accountant(), input.elem_type(), input.count() + 1)?;
    for pos in 0..input.count() {
        out.append(&input.get(pos)?)?;
    }
    out.append(value)?;
    out.set_seqbase(input.seqbase());
    Ok(vec![Value::Column(ctx.env.pool.publish(out))])
}

fn assert_key(_ctx: &mut EvalCtx, args: &[Value]) -> Result<Vec<Value>> {
    let col = args[0].as_column()?;
    let pinned = col.pin()?;
    if !pinned.flags().key {
        let mut seen: HashSet<Vec<u8>> = HashSet::with_capacity(pinned.count());
        for pos in 0..pinned.count() {
            if !seen.insert(entry_key(&pinned, pos)?) {
                return Err(BasaltError::Execution(format!(
                    "key constraint violated at position {pos}"
                )));
            }
        }
    }
    Ok(vec![Value::Column(col.clone())])
}

fn sum(_ctx: &mut EvalCtx, args: &[Value]) -> Result<Vec<Value>> {
    let col = args[0].as_column()?.pin()?;
    match col.elem_type() {
        ElemType::Int | ElemType::Lng => {
            let mut acc: i64 = 0;
            for pos in 0..col.count() {
                match col.get(pos)? {
                    Scalar::Int(v) => acc += i64::from(v),
                    Scalar::Lng(v) => acc += v,
                    s if s.is_nil() => {}
                    _ => unreachable!("typed column yields its own type"),
                }
            }
            Ok(vec![Value::Scalar(Scalar::Lng(acc))])
        }
        ElemType::Dbl => {
            let mut acc: f64 = 0.0;
            for pos in 0..col.count() {
                if let Scalar::Dbl(v) = col.get(pos)? {
                    acc += v;
                }
            }
            Ok(vec![Value::Scalar(Scalar::Dbl(acc))])
        }
        other => Err(BasaltError::TypeMismatch(format!(
            "aggr.sum over column of {other}"
        ))),
    }
}

fn count(_ctx: &mut EvalCtx, args: &[Value]) -> Result<Vec<Value>> {
    let col = args[0].as_column()?.pin()?;
    Ok(vec![Value::Scalar(Scalar::Lng(col.count() as i64))])
}

/// Lower median over non-nil values; nil for an empty input.
///
/// Not recombinable: the median of packed slice medians is not the median
/// of the column, so the partitioner refuses programs containing it.
fn median(_ctx: &mut EvalCtx, args: &[Value]) -> Result<Vec<Value>> {
    let col = args[0].as_column()?.pin()?;
    let mut values: Vec<Scalar> = Vec::with_capacity(col.count());
    for pos in 0..col.count() {
        let v = col.get(pos)?;
        if !v.is_nil() {
            values.push(v);
        }
    }
    if values.is_empty() {
        return Ok(vec![Value::Scalar(col.elem_type().nil())]);
    }
    values.sort_by(|a, b| a.order(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = (values.len() - 1) / 2;
    Ok(vec![Value::Scalar(values[mid].clone())])
}

fn group_id(ctx: &mut EvalCtx, args: &[Value]) -> Result<Vec<Value>> {
    let col = args[0].as_column()?.pin()?;
    let mut ids: HashMap<Vec<u8>, u64> = HashMap::with_capacity(col.count());
    let mut out = Column::new(col.accountant(), ElemType::Oid, col.count())?;
    for pos in 0..col.count() {
        let next = ids.len() as u64;
        let id = *ids.entry(entry_key(&col, pos)?).or_insert(next);
        out.append(&Scalar::Oid(id))?;
    }
    Ok(vec![Value::Column(ctx.env.pool.publish(out))])
}

/// Comparable byte key of one entry, usable across all element types.
fn entry_key(col: &Column, pos: usize) -> Result<Vec<u8>> {
    match col.elem_type() {
        ElemType::Str => Ok(match col.str_at(pos)? {
            None => vec![0],
            Some(s) => {
                let mut key = Vec::with_capacity(1 + s.len());
                key.push(1);
                key.extend_from_slice(s.as_bytes());
                key
            }
        }),
        other => {
            let width = other.entry_width();
            Ok(col.tail_bytes()[pos * width..(pos + 1) * width].to_vec())
        }
    }
}
