//! Program representation: a declared variable table plus a sequence of
//! typed instructions, frozen before execution.
//!
//! Programs are built through [`ProgramBuilder`] and frozen exactly once.
//! Freezing performs the whole-program check (declaration, resolution,
//! typing, barrier nesting) and caches the resolved callables, so re-entrant
//! executions never re-check. A frozen [`Program`] is immutable; rewrite
//! passes build a new program wholesale instead of mutating instructions in
//! place, which keeps concurrently executing clones safe.

use std::sync::Arc;

use basalt_common::error::{BasaltError, Result};
use basalt_common::ids::VarId;
use basalt_common::types::ValueType;

use crate::registry::{OpRegistry, Operation};
use crate::value::Value;

/// One declared variable slot: name, type, optional constant binding.
#[derive(Debug, Clone)]
pub struct VarDecl {
    /// Slot name, unique only for human consumption.
    pub name: String,
    /// Declared type.
    pub vtype: ValueType,
    /// Constant payload bound at frame creation.
    pub constant: Option<Value>,
    /// Type is pinned and exempt from later resolution.
    pub type_fixed: bool,
}

/// Control-flow role of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Enter the block when the condition holds, otherwise jump past the
    /// matching exit.
    Barrier,
    /// Close the innermost open barrier block.
    Exit,
    /// Jump back to the innermost enclosing barrier.
    Redo,
    /// Stop executing the program.
    Return,
}

/// Mitosis annotation: this clone reads slice `index` of `of`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceSpec {
    /// Zero-based slice index.
    pub index: u64,
    /// Total slice count.
    pub of: u64,
}

impl SliceSpec {
    /// Disjoint `[lo, hi)` element range of this slice over `count` rows.
    ///
    /// Every position in `0..count` falls in exactly one slice's range;
    /// trailing slices may be empty.
    #[must_use]
    pub fn bounds(&self, count: usize) -> (usize, usize) {
        let of = self.of.max(1) as usize;
        let chunk = count.div_ceil(of).max(1);
        let lo = (self.index as usize).saturating_mul(chunk).min(count);
        let hi = lo.saturating_add(chunk).min(count);
        (lo, hi)
    }
}

/// One operation: opcode identity plus result and argument slots.
///
/// `argv` lists result slots first (`retc` of them), then argument slots.
#[derive(Debug, Clone)]
pub struct Instr {
    /// Module part of the opcode identity.
    pub module: String,
    /// Function part of the opcode identity.
    pub function: String,
    /// Number of result slots at the front of `argv`.
    pub retc: usize,
    /// Result slots followed by argument slots.
    pub argv: Vec<VarId>,
    /// Control-flow role, if any.
    pub control: Option<Control>,
    /// Mitosis slice annotation, if any.
    pub slice: Option<SliceSpec>,
}

impl Instr {
    /// Result slots of this instruction.
    #[must_use]
    pub fn results(&self) -> &[VarId] {
        &self.argv[..self.retc]
    }

    /// Argument slots of this instruction.
    #[must_use]
    pub fn args(&self) -> &[VarId] {
        &self.argv[self.retc..]
    }
}

/// Mutable program under construction.
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    vars: Vec<VarDecl>,
    instrs: Vec<Instr>,
}

impl ProgramBuilder {
    /// Start an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a typed variable slot.
    pub fn declare(&mut self, name: impl Into<String>, vtype: ValueType) -> VarId {
        self.vars.push(VarDecl {
            name: name.into(),
            vtype,
            constant: None,
            type_fixed: true,
        });
        VarId((self.vars.len() - 1) as u32)
    }

    /// Declare a constant slot bound to `value` at frame creation.
    pub fn constant(&mut self, value: Value) -> VarId {
        let vtype = value.value_type().unwrap_or(ValueType::Any);
        self.vars.push(VarDecl {
            name: format!("_{}", self.vars.len()),
            vtype,
            constant: Some(value),
            type_fixed: true,
        });
        VarId((self.vars.len() - 1) as u32)
    }

    /// Append a plain instruction.
    pub fn emit(&mut self, module: &str, function: &str, results: &[VarId], args: &[VarId]) {
        self.push(Instr {
            module: module.to_string(),
            function: function.to_string(),
            retc: results.len(),
            argv: results.iter().chain(args).copied().collect(),
            control: None,
            slice: None,
        });
    }

    /// Append a slice-annotated clone of a sliceable instruction.
    pub fn emit_sliced(
        &mut self,
        module: &str,
        function: &str,
        results: &[VarId],
        args: &[VarId],
        slice: SliceSpec,
    ) {
        self.push(Instr {
            module: module.to_string(),
            function: function.to_string(),
            retc: results.len(),
            argv: results.iter().chain(args).copied().collect(),
            control: None,
            slice: Some(slice),
        });
    }

    /// Append a control instruction.
    pub fn emit_control(&mut self, control: Control, args: &[VarId]) {
        self.push(Instr {
            module: "control".to_string(),
            function: match control {
                Control::Barrier => "barrier",
                Control::Exit => "exit",
                Control::Redo => "redo",
                Control::Return => "return",
            }
            .to_string(),
            retc: 0,
            argv: args.to_vec(),
            control: Some(control),
            slice: None,
        });
    }

    /// Append an already-built instruction (rewrite passes).
    pub fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Declared type of a slot, if declared.
    #[must_use]
    pub fn var_type(&self, id: VarId) -> Option<ValueType> {
        self.vars.get(id.index()).map(|v| v.vtype)
    }

    /// Number of declared variables.
    #[must_use]
    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// Freeze into an executable program.
    ///
    /// This is the one-time whole-program check: every slot resolves to a
    /// declaration, every opcode resolves to a registered operation
    /// ([`BasaltError::UnknownFunction`] otherwise), declared types satisfy
    /// the registered signatures, `retc <= argc` holds, and barrier/exit
    /// nesting is balanced. The resolved callables and jump targets are
    /// cached on the program.
    pub fn freeze(self, registry: &OpRegistry) -> Result<Program> {
        let mut resolved: Vec<Option<Arc<Operation>>> = Vec::with_capacity(self.instrs.len());
        let mut jumps: Vec<Option<usize>> = vec![None; self.instrs.len()];
        let mut open_barriers: Vec<usize> = Vec::new();

        for (pc, instr) in self.instrs.iter().enumerate() {
            if instr.retc > instr.argv.len() {
                return Err(BasaltError::TypeMismatch(format!(
                    "instruction {pc}: retc {} exceeds argc {}",
                    instr.retc,
                    instr.argv.len()
                )));
            }
            for id in &instr.argv {
                if id.index() >= self.vars.len() {
                    return Err(BasaltError::TypeMismatch(format!(
                        "instruction {pc}: undeclared variable {id}"
                    )));
                }
            }

            match instr.control {
                Some(Control::Barrier) => {
                    self.check_barrier_condition(pc, instr)?;
                    open_barriers.push(pc);
                    resolved.push(None);
                }
                Some(Control::Exit) => {
                    let barrier = open_barriers.pop().ok_or_else(|| {
                        BasaltError::TypeMismatch(format!(
                            "instruction {pc}: exit without open barrier"
                        ))
                    })?;
                    jumps[barrier] = Some(pc);
                    resolved.push(None);
                }
                Some(Control::Redo) => {
                    let barrier = *open_barriers.last().ok_or_else(|| {
                        BasaltError::TypeMismatch(format!(
                            "instruction {pc}: redo outside barrier block"
                        ))
                    })?;
                    jumps[pc] = Some(barrier);
                    resolved.push(None);
                }
                Some(Control::Return) => resolved.push(None),
                None => {
                    let op = registry.get(&instr.module, &instr.function).ok_or_else(|| {
                        BasaltError::UnknownFunction(format!(
                            "{}.{}",
                            instr.module, instr.function
                        ))
                    })?;
                    self.check_signature(pc, instr, &op)?;
                    resolved.push(Some(op));
                }
            }
        }
        if let Some(barrier) = open_barriers.pop() {
            return Err(BasaltError::TypeMismatch(format!(
                "barrier at instruction {barrier} is never closed"
            )));
        }

        for var in &self.vars {
            if let Some(constant) = &var.constant {
                let actual = constant.value_type().unwrap_or(ValueType::Any);
                if !var.vtype.accepts(actual) {
                    return Err(BasaltError::TypeMismatch(format!(
                        "constant {} declared {} but bound {}",
                        var.name, var.vtype, actual
                    )));
                }
            }
        }

        Ok(Program {
            vars: self.vars,
            instrs: self.instrs,
            resolved,
            jumps,
            pieces: 0,
        })
    }

    fn check_barrier_condition(&self, pc: usize, instr: &Instr) -> Result<()> {
        if instr.args().len() != 1 {
            return Err(BasaltError::TypeMismatch(format!(
                "instruction {pc}: barrier takes exactly one condition"
            )));
        }
        let cond = instr.args()[0];
        let vtype = self.vars[cond.index()].vtype;
        if !ValueType::Scalar(basalt_common::types::ElemType::Bool).accepts(vtype) {
            return Err(BasaltError::TypeMismatch(format!(
                "instruction {pc}: barrier condition is {vtype}, not bool"
            )));
        }
        Ok(())
    }

    fn check_signature(&self, pc: usize, instr: &Instr, op: &Operation) -> Result<()> {
        let sig = &op.signature;
        if sig.rets.len() != instr.retc {
            return Err(BasaltError::TypeMismatch(format!(
                "instruction {pc}: {}.{} returns {} values, {} bound",
                instr.module,
                instr.function,
                sig.rets.len(),
                instr.retc
            )));
        }
        for (slot, id) in sig.rets.iter().zip(instr.results()) {
            let declared = self.vars[id.index()].vtype;
            if !slot.accepts(declared) {
                return Err(BasaltError::TypeMismatch(format!(
                    "instruction {pc}: result {id} declared {declared}, signature wants {slot}"
                )));
            }
        }

        let args = instr.args();
        if args.len() < sig.args.len() {
            return Err(BasaltError::TypeMismatch(format!(
                "instruction {pc}: {}.{} takes {} arguments, {} given",
                instr.module,
                instr.function,
                sig.args.len(),
                args.len()
            )));
        }
        for (slot, id) in sig.args.iter().zip(args) {
            let declared = self.vars[id.index()].vtype;
            if !slot.accepts(declared) {
                return Err(BasaltError::TypeMismatch(format!(
                    "instruction {pc}: argument {id} declared {declared}, signature wants {slot}"
                )));
            }
        }
        let extra = &args[sig.args.len()..];
        if !extra.is_empty() {
            let Some(variadic) = sig.variadic else {
                return Err(BasaltError::TypeMismatch(format!(
                    "instruction {pc}: {}.{} takes {} arguments, {} given",
                    instr.module,
                    instr.function,
                    sig.args.len(),
                    args.len()
                )));
            };
            for id in extra {
                let declared = self.vars[id.index()].vtype;
                if !variadic.accepts(declared) {
                    return Err(BasaltError::TypeMismatch(format!(
                        "instruction {pc}: variadic argument {id} declared {declared}, signature wants {variadic}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A frozen, executable program.
#[derive(Debug, Clone)]
pub struct Program {
    vars: Vec<VarDecl>,
    instrs: Vec<Instr>,
    resolved: Vec<Option<Arc<Operation>>>,
    jumps: Vec<Option<usize>>,
    pieces: u64,
}

impl Program {
    /// Declared variable table.
    #[must_use]
    pub fn vars(&self) -> &[VarDecl] {
        &self.vars
    }

    /// Frozen instruction sequence.
    #[must_use]
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Declaration of one slot.
    #[must_use]
    pub fn var(&self, id: VarId) -> &VarDecl {
        &self.vars[id.index()]
    }

    /// Constant bound to a slot, if any.
    #[must_use]
    pub fn constant_value(&self, id: VarId) -> Option<&Value> {
        self.vars.get(id.index()).and_then(|v| v.constant.as_ref())
    }

    /// Callable resolved at freeze time for the instruction at `pc`.
    #[must_use]
    pub fn resolved_op(&self, pc: usize) -> Option<&Arc<Operation>> {
        self.resolved.get(pc).and_then(|op| op.as_ref())
    }

    /// Jump target of the control instruction at `pc`: matching exit for a
    /// barrier, enclosing barrier for a redo.
    #[must_use]
    pub fn jump_target(&self, pc: usize) -> Option<usize> {
        self.jumps.get(pc).copied().flatten()
    }

    /// Slice count stamped by the partitioner (0 = never sliced).
    #[must_use]
    pub fn pieces(&self) -> u64 {
        self.pieces
    }

    /// Stamp the partitioner's slice count.
    #[must_use]
    pub fn with_pieces(mut self, pieces: u64) -> Self {
        self.pieces = pieces;
        self
    }

    /// Start a builder over this program's variable table for wholesale
    /// rewriting.
    ///
    /// Instructions are not carried over: a rewrite pass re-emits the
    /// sequence it wants (cloning unchanged instructions as it goes) and
    /// re-freezes, so no frozen program is ever mutated in place.
    #[must_use]
    pub fn to_builder(&self) -> ProgramBuilder {
        ProgramBuilder {
            vars: self.vars.clone(),
            instrs: Vec::new(),
        }
    }
}
