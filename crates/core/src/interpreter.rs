//! Reference interpreter
//!
//! Runs a program directly on a `Vec<u64>`. Compiled code must agree with
//! this interpreter on the result and on the sequence of traced values for
//! every input, so it is kept deliberately plain.

use crate::op::Operation;
use std::fmt;
use tracing::debug;

/// Why a program could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpretError {
    /// Operation at `position` needed more elements than the stack held.
    Underflow {
        position: usize,
        mnemonic: &'static str,
        depth: usize,
    },
    /// Program finished with `depth` elements instead of exactly one.
    FinalDepth { depth: usize },
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpretError::Underflow {
                position,
                mnemonic,
                depth,
            } => write!(
                f,
                "operation #{} ({}) cannot run on a stack of {} element(s)",
                position, mnemonic, depth
            ),
            InterpretError::FinalDepth { depth } => write!(
                f,
                "program ends with {} element(s) on the stack, expected 1",
                depth
            ),
        }
    }
}

impl std::error::Error for InterpretError {}

/// Interpret `program` with `args` as the initial stack (first argument at
/// the bottom) and return the single remaining value.
pub fn interpret(program: &[Operation], args: &[u64]) -> Result<u64, InterpretError> {
    let mut stack: Vec<u64> = args.to_vec();

    for (position, op) in program.iter().enumerate() {
        if stack.len() < op.effect().required {
            debug!(position, op = %op, depth = stack.len(), "interpreter underflow");
            return Err(InterpretError::Underflow {
                position,
                mnemonic: op.mnemonic(),
                depth: stack.len(),
            });
        }

        // Only `push` runs on an empty stack, and it does not read `top`.
        let top = stack.len().saturating_sub(1);
        match op {
            Operation::BinaryOp(kind) => {
                let rhs = stack[top];
                stack.truncate(top);
                stack[top - 1] = kind.apply(stack[top - 1], rhs);
            }
            Operation::Duplicate { from } => {
                stack.push(stack[top - from]);
            }
            Operation::Push { value } => {
                stack.push(u64::from(*value));
            }
            Operation::Pop => {
                stack.truncate(top);
            }
            Operation::Swap => {
                stack.swap(top, top - 1);
            }
            Operation::TraceElement(trace) => {
                trace.fire(stack[top - trace.index()]);
            }
        }
    }

    match stack.as_slice() {
        [value] => Ok(*value),
        rest => Err(InterpretError::FinalDepth { depth: rest.len() }),
    }
}
