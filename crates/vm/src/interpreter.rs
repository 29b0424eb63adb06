//! Instruction dispatch loop.
//!
//! The program counter is instruction-owned state: every step returns an
//! explicit flow decision and the loop re-reads the counter rather than
//! always incrementing, so barrier constructs and re-entrant executions of
//! shared programs stay well-defined. Contiguous runs of slice-annotated
//! instructions fan out to worker threads; each clone reads a disjoint row
//! range and writes a private result, and results bind in slice order once
//! the whole group has completed.

use std::sync::Arc;

use rayon::prelude::*;

use basalt_common::error::{BasaltError, Result};
use basalt_common::memory::MemoryAccountant;
use basalt_common::types::Scalar;

use crate::catalog::Catalog;
use crate::program::{Control, Program, SliceSpec};
use crate::registry::{OpRegistry, Operation};
use crate::stack::StackFrame;
use crate::value::Value;

/// Shared services every execution runs against.
#[derive(Debug, Clone)]
pub struct ExecEnv {
    /// Operation registry programs were frozen against.
    pub registry: Arc<OpRegistry>,
    /// Column arena.
    pub pool: Arc<basalt_storage::ColumnPool>,
    /// Named base columns.
    pub catalog: Arc<Catalog>,
    /// Process-wide memory accountant.
    pub acct: Arc<MemoryAccountant>,
}

/// Per-dispatch context handed to callables.
#[derive(Debug, Clone)]
pub struct EvalCtx {
    /// Shared services.
    pub env: ExecEnv,
    /// Slice annotation of the dispatching instruction, if any.
    pub slice: Option<SliceSpec>,
}

/// Execute a frozen program against a frame.
///
/// Execution resumes from the frame's saved program counter (0 for a fresh
/// frame). On failure the error is recorded on the frame and the frame is
/// fully cleared before the error propagates; no partial results of the
/// failing instruction are committed.
pub fn execute(program: &Program, frame: &mut StackFrame, env: &ExecEnv) -> Result<()> {
    let instrs = program.instrs();
    let mut pc = frame.saved_pc();
    while pc < instrs.len() {
        frame.set_saved_pc(pc);
        let instr = &instrs[pc];

        if let Some(control) = instr.control {
            match control {
                Control::Barrier => match barrier_holds(frame, pc, program) {
                    Ok(true) => pc += 1,
                    Ok(false) => {
                        pc = program
                            .jump_target(pc)
                            .expect("freeze matched every barrier");
                    }
                    Err(err) => {
                        frame.fail(&err);
                        frame.clear();
                        return Err(err);
                    }
                },
                Control::Exit => pc += 1,
                Control::Redo => {
                    pc = program
                        .jump_target(pc)
                        .expect("freeze matched every redo");
                }
                Control::Return => break,
            }
            continue;
        }

        if instr.slice.is_some() {
            let end = slice_group_end(program, pc);
            if let Err(err) = dispatch_group(program, frame, env, pc, end) {
                frame.fail(&err);
                frame.clear();
                return Err(err);
            }
            pc = end;
            continue;
        }

        if let Err(err) = dispatch_one(program, frame, env, pc) {
            tracing::debug!(
                pc,
                module = %instr.module,
                function = %instr.function,
                error = %err,
                "instruction dispatch failed"
            );
            frame.fail(&err);
            frame.clear();
            return Err(err);
        }
        pc += 1;
    }
    frame.set_saved_pc(0);
    Ok(())
}

/// Create a frame for `program`, execute it, and return the finished frame.
pub fn run(program: &Program, env: &ExecEnv) -> Result<StackFrame> {
    let mut frame = StackFrame::new(program);
    execute(program, &mut frame, env)?;
    Ok(frame)
}

fn barrier_holds(frame: &StackFrame, pc: usize, program: &Program) -> Result<bool> {
    let cond = program.instrs()[pc].args()[0];
    match frame.get(cond) {
        Value::Scalar(Scalar::Bool(v)) => Ok(*v),
        Value::Scalar(s) if s.is_nil() => Ok(false),
        other => Err(BasaltError::Execution(format!(
            "barrier condition at {pc} is {}, not bool",
            other.describe()
        ))),
    }
}

fn slice_group_end(program: &Program, start: usize) -> usize {
    let instrs = program.instrs();
    let mut end = start;
    while end < instrs.len() && instrs[end].control.is_none() && instrs[end].slice.is_some() {
        end += 1;
    }
    end
}

fn dispatch_one(program: &Program, frame: &mut StackFrame, env: &ExecEnv, pc: usize) -> Result<()> {
    let instr = &program.instrs()[pc];
    let op = resolved(program, pc)?;
    let args: Vec<Value> = instr.args().iter().map(|id| frame.get(*id).clone()).collect();

    frame.set_keep_alive(true);
    let mut ctx = EvalCtx {
        env: env.clone(),
        slice: instr.slice,
    };
    let outcome = (op.callable)(&mut ctx, &args);
    frame.set_keep_alive(false);

    bind_results(frame, program, pc, outcome?)
}

/// Dispatch the slice clones in `[start, end)` on worker threads.
///
/// All argument values are snapshotted up front (retaining their columns),
/// so the frame is untouched while workers run. Results bind in slice
/// order only after every clone succeeded; on any failure the produced
/// partial results drop with this scope, releasing their columns.
fn dispatch_group(
    program: &Program,
    frame: &mut StackFrame,
    env: &ExecEnv,
    start: usize,
    end: usize,
) -> Result<()> {
    let prepared: Vec<(usize, Arc<Operation>, Option<SliceSpec>, Vec<Value>)> = (start..end)
        .map(|pc| {
            let instr = &program.instrs()[pc];
            let args = instr.args().iter().map(|id| frame.get(*id).clone()).collect();
            Ok((pc, Arc::clone(resolved(program, pc)?), instr.slice, args))
        })
        .collect::<Result<_>>()?;

    frame.set_keep_alive(true);
    let outcomes: Vec<(usize, Result<Vec<Value>>)> = prepared
        .into_par_iter()
        .map(|(pc, op, slice, args)| {
            let mut ctx = EvalCtx {
                env: env.clone(),
                slice,
            };
            (pc, (op.callable)(&mut ctx, &args))
        })
        .collect();
    frame.set_keep_alive(false);

    let mut bound: Vec<(usize, Vec<Value>)> = Vec::with_capacity(outcomes.len());
    for (pc, outcome) in outcomes {
        match outcome {
            Ok(results) => bound.push((pc, results)),
            // First failure in slice order wins; the other clones' results
            // are released when `bound` and the remaining outcomes drop.
            Err(err) => return Err(err),
        }
    }
    for (pc, results) in bound {
        bind_results(frame, program, pc, results)?;
    }
    Ok(())
}

fn bind_results(
    frame: &mut StackFrame,
    program: &Program,
    pc: usize,
    results: Vec<Value>,
) -> Result<()> {
    let instr = &program.instrs()[pc];
    if results.len() != instr.retc {
        return Err(BasaltError::Execution(format!(
            "{}.{} produced {} results for {} slots",
            instr.module,
            instr.function,
            results.len(),
            instr.retc
        )));
    }
    for (id, value) in instr.results().iter().zip(results) {
        frame.set(*id, value);
    }
    Ok(())
}

fn resolved<'a>(program: &'a Program, pc: usize) -> Result<&'a Arc<Operation>> {
    program.resolved_op(pc).ok_or_else(|| {
        BasaltError::Execution(format!("instruction {pc} has no resolved callable"))
    })
}
