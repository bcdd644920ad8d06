//! Stack-depth validation
//!
//! Simulates only the *size* of the stack across a program. Because every
//! operation's effect on the size is fixed, this decides exactly which
//! programs can run: anything that passes here cannot fail at run time, and
//! anything rejected here would fail in the interpreter too.

use polish_core::Operation;
use std::fmt;

/// Facts about a valid program's stack usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackDepth {
    /// Largest stack size reached, including the initial arguments.
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Operation needs `required` elements but the stack holds `depth`.
    Underflow { required: usize, depth: usize },
    /// `dup`/`trace` addresses an element below the bottom of the stack.
    IndexOutOfRange { index: usize, depth: usize },
    /// Program ends with `depth` elements instead of exactly one.
    FinalDepth { depth: usize },
}

/// A program rejected by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    /// Offending operation (position and mnemonic); `None` for final depth.
    pub operation: Option<(usize, &'static str)>,
    /// Largest stack size reached before the failure.
    pub max_depth: usize,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((position, mnemonic)) = self.operation {
            write!(f, "operation #{} ({}): ", position, mnemonic)?;
        }
        match &self.kind {
            ValidationErrorKind::Underflow { required, depth } => write!(
                f,
                "needs {} stack element(s) but only {} available",
                required, depth
            ),
            ValidationErrorKind::IndexOutOfRange { index, depth } => write!(
                f,
                "index {} is out of range for a stack of {} element(s)",
                index, depth
            ),
            ValidationErrorKind::FinalDepth { depth } => write!(
                f,
                "program leaves {} element(s) on the stack, expected exactly 1",
                depth
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check that `program` runs on an initial stack of `nargs` elements and
/// leaves exactly one. Linear in the program length.
pub fn validate(program: &[Operation], nargs: usize) -> Result<StackDepth, ValidationError> {
    let mut depth = nargs;
    let mut max = nargs;

    for (position, op) in program.iter().enumerate() {
        let effect = op.effect();
        if depth < effect.required {
            let kind = match op.depth_index() {
                Some(index) => ValidationErrorKind::IndexOutOfRange { index, depth },
                None => ValidationErrorKind::Underflow {
                    required: effect.required,
                    depth,
                },
            };
            return Err(ValidationError {
                kind,
                operation: Some((position, op.mnemonic())),
                max_depth: max,
            });
        }
        depth = depth.wrapping_add_signed(effect.delta);
        max = max.max(depth);
    }

    if depth != 1 {
        return Err(ValidationError {
            kind: ValidationErrorKind::FinalDepth { depth },
            operation: None,
            max_depth: max,
        });
    }
    Ok(StackDepth { max })
}
