//! Operations of the Polish stack machine
//!
//! A program is an ordered slice of [`Operation`]s applied to a stack of
//! `u64` values. Every operation has a fixed effect on the *size* of the
//! stack that never depends on the values on it:
//!
//! ```text
//! op           needs        size after
//! add/sub/mul  size >= 2    size - 1
//! dup N        N < size     size + 1
//! push V       -            size + 1
//! pop          size >= 1    size - 1
//! swap         size >= 2    size
//! trace N      N < size     size
//! ```
//!
//! Indices (`dup N`, `trace N`) count from the top of the stack: `0` is the
//! top element.

use std::ffi::c_void;
use std::fmt;

/// Callback invoked by a [`TraceElement`] with its context and the traced value.
pub type TraceFn = unsafe extern "C" fn(*mut c_void, u64);

/// Arithmetic performed by [`Operation::BinaryOp`].
///
/// All arithmetic wraps modulo 2^64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mult,
}

impl BinaryOpKind {
    /// Apply the operation to `lhs` (second from top) and `rhs` (top).
    #[inline]
    pub fn apply(self, lhs: u64, rhs: u64) -> u64 {
        match self {
            BinaryOpKind::Add => lhs.wrapping_add(rhs),
            BinaryOpKind::Sub => lhs.wrapping_sub(rhs),
            BinaryOpKind::Mult => lhs.wrapping_mul(rhs),
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOpKind::Add => "add",
            BinaryOpKind::Sub => "sub",
            BinaryOpKind::Mult => "mul",
        }
    }
}

/// Observe the value at `index` (from the top) without changing the stack.
///
/// Construction is `unsafe` because compiled code calls the callback through
/// a raw pointer long after the operation itself is gone.
#[derive(Clone, Copy)]
pub struct TraceElement {
    index: usize,
    context: *mut c_void,
    callback: TraceFn,
}

impl TraceElement {
    /// Create a trace operation.
    ///
    /// # Safety
    ///
    /// `callback(context, value)` must be sound to call at any time while a
    /// function compiled from a program containing this operation is alive,
    /// from every thread that calls that function.
    pub unsafe fn new(index: usize, context: *mut c_void, callback: TraceFn) -> Self {
        TraceElement {
            index,
            context,
            callback,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn context(&self) -> *mut c_void {
        self.context
    }

    pub fn callback(&self) -> TraceFn {
        self.callback
    }

    /// Invoke the callback with `value`.
    pub fn fire(&self, value: u64) {
        // SAFETY: upheld by the contract of `TraceElement::new`.
        unsafe { (self.callback)(self.context, value) }
    }
}

impl fmt::Debug for TraceElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceElement")
            .field("index", &self.index)
            .field("context", &self.context)
            .field("callback", &(self.callback as *const ()))
            .finish()
    }
}

/// A single stack-machine operation.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Pop `rhs` then `lhs`, push `lhs <op> rhs`.
    BinaryOp(BinaryOpKind),
    /// Push a copy of the element `from` positions below the top.
    Duplicate { from: usize },
    /// Push a zero-extended 32-bit constant.
    Push { value: u32 },
    Pop,
    /// Exchange the two topmost elements.
    Swap,
    TraceElement(TraceElement),
}

/// Static effect of an operation on the stack size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    /// Minimum stack size before the operation.
    pub required: usize,
    /// Change in stack size: -1, 0 or +1.
    pub delta: isize,
}

impl Operation {
    pub const fn add() -> Self {
        Operation::BinaryOp(BinaryOpKind::Add)
    }

    pub const fn sub() -> Self {
        Operation::BinaryOp(BinaryOpKind::Sub)
    }

    pub const fn mult() -> Self {
        Operation::BinaryOp(BinaryOpKind::Mult)
    }

    /// The size precondition and size change of this operation.
    pub fn effect(&self) -> StackEffect {
        let (required, delta) = match self {
            Operation::BinaryOp(_) => (2, -1),
            Operation::Duplicate { from } => (from.saturating_add(1), 1),
            Operation::Push { .. } => (0, 1),
            Operation::Pop => (1, -1),
            Operation::Swap => (2, 0),
            Operation::TraceElement(trace) => (trace.index.saturating_add(1), 0),
        };
        StackEffect { required, delta }
    }

    /// Index from the top addressed by `dup` and `trace`.
    pub fn depth_index(&self) -> Option<usize> {
        match self {
            Operation::Duplicate { from } => Some(*from),
            Operation::TraceElement(trace) => Some(trace.index),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Operation::BinaryOp(kind) => kind.mnemonic(),
            Operation::Duplicate { .. } => "dup",
            Operation::Push { .. } => "push",
            Operation::Pop => "pop",
            Operation::Swap => "swap",
            Operation::TraceElement(_) => "trace",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Duplicate { from } => write!(f, "dup {}", from),
            Operation::Push { value } => write!(f, "push {}", value),
            Operation::TraceElement(trace) => write!(f, "trace {}", trace.index),
            other => f.write_str(other.mnemonic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn ignore(_: *mut c_void, _: u64) {}

    #[test]
    fn test_effects_table() {
        let trace = unsafe { TraceElement::new(3, std::ptr::null_mut(), ignore) };
        let cases = [
            (Operation::add(), 2, -1),
            (Operation::Duplicate { from: 0 }, 1, 1),
            (Operation::Duplicate { from: 4 }, 5, 1),
            (Operation::Push { value: 7 }, 0, 1),
            (Operation::Pop, 1, -1),
            (Operation::Swap, 2, 0),
            (Operation::TraceElement(trace), 4, 0),
        ];
        for (op, required, delta) in cases {
            assert_eq!(op.effect(), StackEffect { required, delta }, "{}", op);
        }
    }

    #[test]
    fn test_huge_index_does_not_overflow() {
        let op = Operation::Duplicate { from: usize::MAX };
        assert_eq!(op.effect().required, usize::MAX);
    }

    #[test]
    fn test_wrapping_arithmetic() {
        assert_eq!(BinaryOpKind::Add.apply(u64::MAX, 2), 1);
        assert_eq!(BinaryOpKind::Sub.apply(1, 2), u64::MAX);
        assert_eq!(BinaryOpKind::Mult.apply(1 << 63, 2), 0);
        assert_eq!(BinaryOpKind::Mult.apply(3, 5), 15);
    }

    #[test]
    fn test_display() {
        assert_eq!(Operation::mult().to_string(), "mul");
        assert_eq!(Operation::Duplicate { from: 2 }.to_string(), "dup 2");
        assert_eq!(Operation::Push { value: 9 }.to_string(), "push 9");
    }
}
