//! Operation registry: the registration contract between the core and
//! callable modules.
//!
//! A module supplies a `(module, function)` name, a typed signature, and a
//! callable; the dispatcher looks callables up at program-freeze time and
//! fails fast with an unknown-function error if absent. The core never
//! inspects what a callable does, only its declared signature and its
//! [`OpKind`], which tells the partitioner what it may safely slice.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use basalt_common::error::Result;
use basalt_common::types::ValueType;

use crate::interpreter::EvalCtx;
use crate::value::Value;

/// Typed signature of a registered operation.
#[derive(Debug, Clone)]
pub struct OpSignature {
    /// Fixed argument slots.
    pub args: Vec<ValueType>,
    /// Accepted type of trailing variadic arguments, if any.
    pub variadic: Option<ValueType>,
    /// Result slots.
    pub rets: Vec<ValueType>,
}

impl OpSignature {
    /// Fixed-arity signature.
    #[must_use]
    pub fn new(args: Vec<ValueType>, rets: Vec<ValueType>) -> Self {
        Self {
            args,
            variadic: None,
            rets,
        }
    }

    /// Signature with trailing variadic arguments of one type.
    #[must_use]
    pub fn variadic(args: Vec<ValueType>, variadic: ValueType, rets: Vec<ValueType>) -> Self {
        Self {
            args,
            variadic: Some(variadic),
            rets,
        }
    }
}

/// Partitioner-relevant classification of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// No special role.
    Plain,
    /// Base-column access that honors a slice annotation over a disjoint
    /// row range.
    Sliceable,
    /// Order-independent recombiner of slice results.
    FanIn,
    /// Aggregate; `recombinable` says whether packing slice outputs before
    /// the aggregate preserves its result.
    Aggregate {
        /// Safe to compute over packed slice outputs.
        recombinable: bool,
    },
    /// Grouping operator; never safely sliceable.
    Grouping,
    /// Primary-key/uniqueness assertion; never safely sliceable.
    UniqueAssertion,
    /// Foreign-function (embedded-script) aggregate; never safely
    /// sliceable.
    ForeignAggregate,
}

/// Callable invoked by the dispatcher with the argument values of one
/// instruction.
pub type OpFn = Arc<dyn Fn(&mut EvalCtx, &[Value]) -> Result<Vec<Value>> + Send + Sync>;

/// One registered operation.
#[derive(Clone)]
pub struct Operation {
    /// Module part of the opcode identity.
    pub module: String,
    /// Function part of the opcode identity.
    pub function: String,
    /// Declared signature checked at freeze time.
    pub signature: OpSignature,
    /// Partitioner classification.
    pub kind: OpKind,
    /// The callable itself.
    pub callable: OpFn,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("module", &self.module)
            .field("function", &self.function)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Registry mapping `(module, function)` to operations.
#[derive(Debug, Default)]
pub struct OpRegistry {
    map: RwLock<HashMap<(String, String), Arc<Operation>>>,
}

impl OpRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register or replace an operation.
    ///
    /// Returns `true` when an existing operation with the same name was
    /// replaced.
    pub fn register(&self, op: Operation) -> bool {
        self.map
            .write()
            .expect("operation registry lock poisoned")
            .insert((op.module.clone(), op.function.clone()), Arc::new(op))
            .is_some()
    }

    /// Deregister an operation by name.
    ///
    /// Returns `true` when an existing operation was removed.
    pub fn deregister(&self, module: &str, function: &str) -> bool {
        self.map
            .write()
            .expect("operation registry lock poisoned")
            .remove(&(module.to_string(), function.to_string()))
            .is_some()
    }

    /// Look an operation up by name.
    #[must_use]
    pub fn get(&self, module: &str, function: &str) -> Option<Arc<Operation>> {
        self.map
            .read()
            .expect("operation registry lock poisoned")
            .get(&(module.to_string(), function.to_string()))
            .cloned()
    }
}
