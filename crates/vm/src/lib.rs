#![deny(missing_docs)]

//! Typed bytecode program representation, operation registry, execution
//! stack, and interpreter.
//!
//! Architecture role:
//! - represents a compiled plan as a frozen sequence of typed instructions
//!   over a declared variable table
//! - resolves opcodes against a registration contract shared with
//!   foreign-function modules
//! - executes programs against per-invocation stack frames with mandatory
//!   cleanup on every exit path
//! - fans slice-annotated instruction groups out to worker threads
//!
//! Key modules:
//! - [`catalog`]
//! - [`interpreter`]
//! - [`ops`]
//! - [`program`]
//! - [`registry`]
//! - [`stack`]
//! - [`value`]

pub mod catalog;
pub mod interpreter;
pub mod ops;
pub mod program;
pub mod registry;
pub mod stack;
pub mod value;

pub use catalog::Catalog;
pub use interpreter::{execute, EvalCtx, ExecEnv};
pub use program::{Control, Instr, Program, ProgramBuilder, SliceSpec, VarDecl};
pub use registry::{OpKind, OpRegistry, OpSignature, Operation};
pub use stack::StackFrame;
pub use value::Value;
