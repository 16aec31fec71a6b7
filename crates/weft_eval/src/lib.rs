//! Weft Eval - the executing half of the weft prompt compiler.
//!
//! # Architecture
//!
//! - `Scope`: variable frames with O(1) copy/pointer/restore and a deep
//!   stash for cross-turn persistence
//! - `evaluate_binary` / `evaluate_unary`: direct enum-based operator
//!   dispatch with host-language coercion semantics
//! - `Evaluator`: expression walking, short-circuit logic, member access,
//!   host calls, and scope writes
//! - `Engine`: the single-pass, resumable AST walk producing messages
//! - `Chain`: the turn-based driver over repeated engine passes
//! - `StatusTable`: the per-node side table that carries resumability state
//!   across passes, keeping the AST itself immutable

mod chain;
mod engine;
pub mod errors;
mod evaluator;
mod operators;
mod scope;
mod status;
mod unary_operators;

pub use chain::{Chain, ChainError, StepOutcome, StepResponse};
pub use engine::{Engine, RunOutcome};
pub use evaluator::Evaluator;
pub use operators::{evaluate_binary, loose_eq, strict_eq, to_int32};
pub use scope::{PathSegment, Scope, ScopeError, ScopePointer, ScopeStash};
pub use status::{Mark, NodeStatus, StatusTable};
pub use unary_operators::evaluate_unary;
