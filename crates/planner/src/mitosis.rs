//! The partitioning rewrite: split one oversized base-column scan into
//! per-slice clones plus a fan-in.
//!
//! The pass is conservative by construction: any construct that cannot be
//! recombined safely (uniqueness assertions, grouping, non-recombinable or
//! foreign aggregates) rejects the whole program, and a rewrite that fails
//! its mandatory re-check is a hard error while the caller keeps the
//! original program untouched.

use basalt_common::config::EngineConfig;
use basalt_common::error::{BasaltError, Result};
use basalt_common::ids::VarId;
use basalt_vm::{OpKind, OpRegistry, Program, SliceSpec};

use crate::stats::RowCountOracle;

/// Why a program came back unsliced. An observability signal, not an
/// error: the program executes unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No sliceable base-column access with a usable row estimate.
    NoTarget,
    /// The dominant scan fits one piece under the configured budget.
    BudgetFitsOnePiece {
        /// Estimated rows of the dominant scan.
        rows: u64,
    },
    /// A construct incompatible with slicing is present.
    Unsafe {
        /// `module.function` of the offending operation.
        op: String,
    },
}

/// Result of the partitioning pass.
#[derive(Debug)]
pub enum MitosisOutcome {
    /// The rewritten, re-checked program and its slice count.
    Sliced {
        /// The rewritten program, stamped with `pieces`.
        program: Program,
        /// Number of slice clones emitted.
        pieces: u64,
    },
    /// The input program should run unmodified.
    Unchanged {
        /// Machine-readable skip reason.
        reason: SkipReason,
    },
}

impl MitosisOutcome {
    /// Slice count: 0 for an unchanged program.
    #[must_use]
    pub fn pieces(&self) -> u64 {
        match self {
            MitosisOutcome::Sliced { pieces, .. } => *pieces,
            MitosisOutcome::Unchanged { .. } => 0,
        }
    }
}

/// Partition the dominant base-column scan of `program` into independent
/// slices sized to the configured budget.
///
/// The input program is never consumed or modified; on any failure
/// (including [`BasaltError::OptimizerTypecheckFailed`]) the caller simply
/// keeps executing the original.
pub fn partition(
    program: &Program,
    oracle: &dyn RowCountOracle,
    registry: &OpRegistry,
    config: &EngineConfig,
) -> Result<MitosisOutcome> {
    // Safety precedes sizing: an unsliceable construct rejects the program
    // regardless of budget or overrides.
    if let Some(op) = find_unsafe_construct(program) {
        tracing::debug!(%op, "partitioning skipped: unsafe construct");
        return Ok(MitosisOutcome::Unchanged {
            reason: SkipReason::Unsafe { op },
        });
    }

    let Some((target_pc, rows)) = find_target(program, oracle) else {
        tracing::debug!("partitioning skipped: no sliceable target");
        return Ok(MitosisOutcome::Unchanged {
            reason: SkipReason::NoTarget,
        });
    };

    let row_bytes = config
        .slice_row_bytes_override
        .or_else(|| {
            let result = program.instrs()[target_pc].results()[0];
            oracle.estimated_row_bytes(program, result)
        })
        .unwrap_or(8)
        .max(1);

    let pieces = match config.pieces_override {
        Some(explicit) => explicit,
        None => {
            let rows_per_piece = (config.mem_ceiling_bytes as u64 / row_bytes)
                .min(config.min_partition_rows)
                .max(1);
            if rows <= rows_per_piece {
                tracing::debug!(rows, rows_per_piece, "partitioning skipped: fits one piece");
                return Ok(MitosisOutcome::Unchanged {
                    reason: SkipReason::BudgetFitsOnePiece { rows },
                });
            }
            let threads = config.thread_count.max(1) as u64;
            let computed = rows.div_ceil(rows_per_piece).div_ceil(threads) * 4;
            computed.clamp(threads, config.max_slices.max(threads))
        }
    };
    if pieces <= 1 {
        return Ok(MitosisOutcome::Unchanged {
            reason: SkipReason::BudgetFitsOnePiece { rows },
        });
    }

    let rewritten = rewrite(program, target_pc, pieces, registry)
        .map_err(|e| BasaltError::OptimizerTypecheckFailed(e.to_string()))?;
    tracing::debug!(pieces, rows, target_pc, "partitioned dominant scan");
    Ok(MitosisOutcome::Sliced {
        program: rewritten.with_pieces(pieces),
        pieces,
    })
}

fn find_unsafe_construct(program: &Program) -> Option<String> {
    program.instrs().iter().enumerate().find_map(|(pc, instr)| {
        let kind = program.resolved_op(pc)?.kind;
        let unsliceable = matches!(
            kind,
            OpKind::UniqueAssertion
                | OpKind::Grouping
                | OpKind::ForeignAggregate
                | OpKind::Aggregate {
                    recombinable: false
                }
        );
        unsliceable.then(|| format!("{}.{}", instr.module, instr.function))
    })
}

/// The sliceable instruction whose result is estimated larger than all
/// others. Instructions already carrying a slice annotation are multi-way
/// variants and are never re-split.
fn find_target(program: &Program, oracle: &dyn RowCountOracle) -> Option<(usize, u64)> {
    let mut best: Option<(usize, u64)> = None;
    for (pc, instr) in program.instrs().iter().enumerate() {
        if instr.slice.is_some() || instr.retc != 1 {
            continue;
        }
        let Some(op) = program.resolved_op(pc) else {
            continue;
        };
        if op.kind != OpKind::Sliceable {
            continue;
        }
        let Some(rows) = oracle.estimated_row_count(program, instr.results()[0]) else {
            continue;
        };
        if best.map_or(true, |(_, most)| rows > most) {
            best = Some((pc, rows));
        }
    }
    best
}

/// Emit the rewritten instruction stream: the target cloned once per slice
/// with fresh result variables, then the fan-in binding the original
/// result, then everything downstream unchanged.
fn rewrite(
    program: &Program,
    target_pc: usize,
    pieces: u64,
    registry: &OpRegistry,
) -> Result<Program> {
    let mut builder = program.to_builder();
    for (pc, instr) in program.instrs().iter().enumerate() {
        if pc != target_pc {
            builder.push(instr.clone());
            continue;
        }

        let result = instr.results()[0];
        let result_decl = program.var(result);
        let args: Vec<VarId> = instr.args().to_vec();
        let mut parts: Vec<VarId> = Vec::with_capacity(pieces as usize);
        for index in 0..pieces {
            let part = builder.declare(
                format!("{}_p{index}", result_decl.name),
                result_decl.vtype,
            );
            builder.emit_sliced(
                &instr.module,
                &instr.function,
                &[part],
                &args,
                SliceSpec { index, of: pieces },
            );
            parts.push(part);
        }
        builder.emit("columns", "pack", &[result], &parts);
    }
    builder.freeze(registry)
}
