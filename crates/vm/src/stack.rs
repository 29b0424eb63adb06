//! Per-invocation stack frames binding program variables to runtime
//! values.

use basalt_common::error::BasaltError;
use basalt_common::ids::VarId;

use crate::program::Program;
use crate::value::Value;

/// One array of values indexed by variable slot, paired with a
/// program-counter save point for re-entrancy.
///
/// Frames nest caller-to-callee through interpreter recursion, so teardown
/// is callee-first by construction. [`StackFrame::clear`] is the single
/// mandatory cleanup path; every dispatch failure and abort reaches it
/// before control returns to the caller, and `Drop` routes through it as a
/// backstop.
#[derive(Debug)]
pub struct StackFrame {
    values: Vec<Value>,
    saved_pc: usize,
    keep_alive: bool,
    error: Option<String>,
}

impl StackFrame {
    /// Frame sized to the program's variable count, with constants bound.
    #[must_use]
    pub fn new(program: &Program) -> Self {
        let values = program
            .vars()
            .iter()
            .map(|var| var.constant.clone().unwrap_or(Value::Void))
            .collect();
        Self {
            values,
            saved_pc: 0,
            keep_alive: false,
            error: None,
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the frame has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Grow to `new_size` slots, keeping live values.
    ///
    /// Only dynamically growing global frames use this; most frames are
    /// fixed-size for their program's lifetime. Shrinking is a no-op.
    pub fn grow(&mut self, new_size: usize) {
        if new_size > self.values.len() {
            self.values.resize_with(new_size, || Value::Void);
        }
    }

    /// Value bound to a slot.
    #[must_use]
    pub fn get(&self, id: VarId) -> &Value {
        &self.values[id.index()]
    }

    /// Bind a slot, displacing (and thereby releasing) the previous value.
    pub fn set(&mut self, id: VarId, value: Value) {
        self.values[id.index()] = value;
    }

    /// Release every owned value.
    ///
    /// Idempotent: a second call finds only unbound slots and releases
    /// nothing.
    pub fn clear(&mut self) {
        for slot in &mut self.values {
            *slot = Value::Void;
        }
    }

    /// Record a dispatch failure on the frame.
    pub fn fail(&mut self, err: &BasaltError) {
        self.error = Some(err.to_string());
    }

    /// Failure recorded on the frame, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Program-counter save point for re-entrant execution.
    #[must_use]
    pub fn saved_pc(&self) -> usize {
        self.saved_pc
    }

    /// Update the program-counter save point.
    pub fn set_saved_pc(&mut self, pc: usize) {
        self.saved_pc = pc;
    }

    /// True while an instruction is mid-dispatch; external reclaimers must
    /// not touch the frame's columns.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Mark the frame as mid-dispatch.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }
}

impl Drop for StackFrame {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_common::types::{Scalar, ValueType};
    use crate::program::ProgramBuilder;
    use crate::registry::OpRegistry;

    #[test]
    fn grow_keeps_live_values_and_never_shrinks() {
        let mut b = ProgramBuilder::new();
        let c = b.constant(Value::Scalar(Scalar::Lng(11)));
        b.declare("x", ValueType::Scalar(basalt_common::types::ElemType::Lng));
        let registry = OpRegistry::new();
        let program = b.freeze(&registry).unwrap();

        let mut frame = StackFrame::new(&program);
        assert_eq!(frame.len(), 2);
        frame.grow(5);
        assert_eq!(frame.len(), 5);
        assert!(matches!(frame.get(c), Value::Scalar(Scalar::Lng(11))));
        frame.grow(3);
        assert_eq!(frame.len(), 5);
    }
}
