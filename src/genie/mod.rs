//! The tree-walking evaluator ("genie") and its runtime structures.
//!
//! - [`value`] - runtime values: fat-pointer names, row handles, routines
//! - [`stack`] - the contiguous frame stack with static/dynamic links
//! - [`heap`] - handle-indirected heap with mark-sweep collection
//! - [`specialise`] - propagator assignment and constant folding
//! - [`eval`] - the evaluator proper
//!
//! Evaluation threads every intermediate value through the operand stack, so
//! the collector's root set is exactly the frames plus that stack. Non-local
//! control transfers are ordinary `Err` values unwound by the clauses that
//! can host their targets.

mod eval;
mod heap;
mod specialise;
mod stack;
mod value;

pub use eval::{Genie, GenieOutcome, IntrinsicFn};
pub use heap::{GcStats, HandleId, HandleStatus, Heap, HeapObject, RowDescriptor, Tuple};
pub use specialise::{Folded, specialise};
pub use stack::{FrameError, FrameHeader, FrameStack};
pub use value::{Address, ProcBody, ProcValue, RefValue, Value};

use crate::base::Diagnostic;
use crate::semantic::TagId;

/// Index of a standard-prelude implementation in the intrinsic registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntrinsicId(pub u32);

/// A cached evaluator action. The analyser assigns one per node after
/// coercion insertion; evaluation is then a single `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagator {
    /// Folded denotation; the value sits in the constant table.
    Constant,
    Denotation,
    QuickIdentifier,
    Dereference,
    Deprocedure,
    Widen,
    RowUp,
    Unite,
    Void,
    Formula,
    MonadicFormula,
    Call,
    Slice,
    Selection,
    Assignation,
    IdentityRelation,
    Cast,
    RoutineText,
    Generator,
    Jump,
    Skip,
    Nil,
    SerialClause,
    ClosedClause,
    ConditionalClause,
    CaseClause,
    ConformityClause,
    LoopClause,
    Collateral,
    Parallel,
    Completer,
}

/// A non-local transfer of control, unwound through ordinary results.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// GOTO: unwind to the serial clause hosting the label's range.
    Jump { label: TagId, level: u32 },
    /// A runtime error; evaluation aborts to the top-level handler.
    Error(Diagnostic),
    /// Explicit termination with an exit code.
    Stop { code: i32 },
}

/// Every evaluation step may be interrupted.
pub type Eval<T> = Result<T, Interrupt>;
