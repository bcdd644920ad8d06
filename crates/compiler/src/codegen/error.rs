//! Code generation error types.

/// Error type for code generation operations.
///
/// A validated program never produces one of these; they signal a bug in the
/// generator rather than a problem with the input.
#[derive(Debug)]
pub enum CodeGenError {
    /// An inconsistency in generator state (e.g., virtual stack underflow)
    Logic(String),
    /// More frame slots were needed than the prologue reserved
    FrameExhausted { limit: u32 },
    /// The frame does not fit in a 32-bit displacement
    FrameTooLarge { slots: usize },
    /// `rsp` would be misaligned at a call instruction
    Misaligned { offset: i32 },
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::Logic(s) => write!(f, "{}", s),
            CodeGenError::FrameExhausted { limit } => {
                write!(f, "frame slot limit of {} exhausted", limit)
            }
            CodeGenError::FrameTooLarge { slots } => {
                write!(f, "stack frame of {} slots is too large", slots)
            }
            CodeGenError::Misaligned { offset } => {
                write!(f, "rsp misaligned by {} bytes at call site", offset)
            }
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<String> for CodeGenError {
    fn from(s: String) -> Self {
        CodeGenError::Logic(s)
    }
}
