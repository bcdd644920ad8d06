//! Target calling convention (System V AMD64).

use super::x86_64::Reg;

/// Integer argument registers, in argument order.
pub const ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Largest arity a compiled function may have.
pub const MAX_ARGS: usize = ARG_REGS.len();

/// Registers that may hold stack-machine values, in allocation order.
///
/// Starts with the argument registers so incoming arguments need no moves.
/// `rax` is kept out as scratch (and return) register, `rbp` as frame pointer.
pub const REGISTER_POOL: [Reg; 13] = [
    Reg::Rdi,
    Reg::Rsi,
    Reg::Rdx,
    Reg::Rcx,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
    Reg::Rbx,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

pub const SCRATCH: Reg = Reg::Rax;
pub const RETURN: Reg = Reg::Rax;

/// Required `rsp` alignment at every `call` instruction.
pub const STACK_ALIGN: i32 = 16;

pub const WORD: i32 = 8;

/// Whether code generated by this crate can run on the host.
pub fn host_supported() -> bool {
    cfg!(all(target_arch = "x86_64", unix))
}

/// Human readable name of the generated code's target.
pub fn target_name() -> &'static str {
    #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
    {
        "x86_64-apple-darwin (System V)"
    }

    #[cfg(all(unix, not(target_os = "macos"), target_arch = "x86_64"))]
    {
        "x86_64-unknown-unix (System V)"
    }

    #[cfg(not(all(unix, target_arch = "x86_64")))]
    {
        "unsupported"
    }
}
