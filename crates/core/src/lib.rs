//! Polish Core: the language model for a tiny postfix stack machine
//!
//! Programs are sequences of [`Operation`]s over a stack of `u64` values.
//! Function arguments form the initial stack (first argument at the bottom)
//! and a valid program leaves exactly one value, its result.
//!
//! # Modules
//!
//! - `op`: the operation set and its static stack effects
//! - `interpreter`: the reference interpreter compiled code is checked against

pub mod interpreter;
pub mod op;

pub use interpreter::{InterpretError, interpret};
pub use op::{BinaryOpKind, Operation, StackEffect, TraceElement, TraceFn};
