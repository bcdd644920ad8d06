//! Native x86-64 Code Generation
//!
//! Translates a validated program straight into System V AMD64 machine code
//! for a function `extern "C" fn(u64, ...) -> u64`.
//!
//! # Code Generation Strategy
//!
//! Every abstract stack position lives in a location: a register from
//! [`platform::REGISTER_POOL`] or an 8-byte slot in the generated frame.
//! Arguments start out in their argument registers, so a program that never
//! exceeds the register budget touches no memory at all.
//!
//! - `push`/`dup` allocate a location and write it
//! - binary operations combine the top two locations in place and release one
//! - `pop` and `swap` only rename locations
//! - `trace` saves live caller-saved registers around an aligned call
//!
//! # Frame Layout
//!
//! ```text
//! [rbp + 8]              return address
//! [rbp]                  caller's rbp
//! [rbp - 8 * (1..=s)]    callee-saved registers the program may use
//! [rbp - 8 * (s+1+j)]    frame slot j
//!                        padding to 16 bytes
//! rsp ->
//! ```
//!
//! The slot area is sized from the maximum stack depth found by validation,
//! so no slot request can exceed it.

mod error;
pub mod platform;
mod virtual_stack;
pub mod x86_64;

pub use error::CodeGenError;

use platform::{ARG_REGS, REGISTER_POOL, RETURN, SCRATCH, STACK_ALIGN, WORD};
use polish_core::{BinaryOpKind, Operation, TraceElement};
use tracing::debug;
use virtual_stack::{Location, VirtualStack};
use x86_64::{AluOp, Assembler, Reg};

/// Rough machine code size of one operation, for buffer pre-allocation.
const BYTES_PER_OP: usize = 6;

struct CodeGen {
    asm: Assembler,
    stack: VirtualStack,
    /// Callee-saved registers pushed by the prologue, in push order.
    saved: Vec<Reg>,
    /// Bytes reserved below the saved registers for slots and padding.
    frame_bytes: i32,
    /// Bytes pushed since the prologue; zero mod 16 means `rsp` is aligned.
    rsp_offset: i32,
}

/// Generate the machine code for a program that passed validation.
///
/// `max_depth` is the largest stack depth the program reaches (counting the
/// arguments). `register_budget` caps how many pool registers hold values;
/// everything beyond lives in frame slots.
pub fn generate(
    program: &[Operation],
    nargs: usize,
    max_depth: usize,
    register_budget: usize,
) -> Result<Vec<u8>, CodeGenError> {
    if nargs > ARG_REGS.len() {
        return Err(CodeGenError::Logic(format!(
            "{} arguments exceed the {} argument registers",
            nargs,
            ARG_REGS.len()
        )));
    }

    let mut codegen = CodeGen::new(program.len(), max_depth, register_budget)?;
    codegen.emit_prologue(nargs)?;
    for op in program {
        codegen.emit_op(op)?;
    }
    codegen.emit_epilogue()?;

    debug!(
        ops = program.len(),
        bytes = codegen.asm.len(),
        slots = codegen.stack.slots_used(),
        saved = codegen.saved.len(),
        "generated native code"
    );
    Ok(codegen.asm.finish())
}

impl CodeGen {
    fn new(program_len: usize, max_depth: usize, register_budget: usize) -> Result<Self, CodeGenError> {
        let budget = register_budget.min(REGISTER_POOL.len());
        let pool = &REGISTER_POOL[..budget];

        // Registers are taken in pool order, so only the first `max_depth`
        // can ever hold a value.
        let saved: Vec<Reg> = pool
            .iter()
            .take(max_depth)
            .copied()
            .filter(|reg| reg.is_callee_saved())
            .collect();

        let slots = max_depth.saturating_sub(budget);
        let words = saved.len() + 1 + slots;
        if i32::try_from(words)
            .ok()
            .and_then(|w| w.checked_mul(WORD))
            .is_none()
        {
            return Err(CodeGenError::FrameTooLarge { slots });
        }

        let pushed = saved.len() as i32 * WORD;
        let slot_bytes = slots as i32 * WORD;
        let frame_bytes = align_up(pushed + slot_bytes, STACK_ALIGN) - pushed;

        Ok(CodeGen {
            asm: Assembler::with_capacity(program_len.saturating_mul(BYTES_PER_OP) + 64),
            stack: VirtualStack::new(pool, slots as u32),
            saved,
            frame_bytes,
            rsp_offset: 0,
        })
    }

    /// `rbp`-relative displacement of a frame slot.
    fn slot_disp(&self, slot: u32) -> i32 {
        -WORD * (self.saved.len() as i32 + 1 + slot as i32)
    }

    fn emit_prologue(&mut self, nargs: usize) -> Result<(), CodeGenError> {
        self.asm.push(Reg::Rbp);
        self.asm.mov_rr(Reg::Rbp, Reg::Rsp);
        for &reg in &self.saved {
            self.asm.push(reg);
        }
        if self.frame_bytes > 0 {
            self.asm.sub_rsp(self.frame_bytes);
        }

        // Claim every argument register first so that allocating slots for
        // the remaining arguments cannot hand out a register still in use.
        let args = &ARG_REGS[..nargs];
        let claimed: Vec<bool> = args.iter().map(|&reg| self.stack.claim(reg)).collect();
        for (&reg, claimed) in args.iter().zip(claimed) {
            let location = if claimed {
                Location::Reg(reg)
            } else {
                let location = self.stack.allocate()?;
                self.emit_move(location, Location::Reg(reg));
                location
            };
            self.stack.push(location);
        }
        Ok(())
    }

    fn emit_op(&mut self, op: &Operation) -> Result<(), CodeGenError> {
        match op {
            Operation::BinaryOp(kind) => self.emit_binary(*kind),
            Operation::Duplicate { from } => {
                let source = self.stack.peek(*from)?;
                let target = self.stack.allocate()?;
                self.emit_move(target, source);
                self.stack.push(target);
                Ok(())
            }
            Operation::Push { value } => {
                let target = self.stack.allocate()?;
                match target {
                    Location::Reg(reg) => self.asm.mov_imm32(reg, *value),
                    Location::Slot(slot) => {
                        let disp = self.slot_disp(slot);
                        self.asm.mov_imm32(SCRATCH, *value);
                        self.asm.mov_store(disp, SCRATCH);
                    }
                }
                self.stack.push(target);
                Ok(())
            }
            Operation::Pop => {
                let location = self.stack.pop()?;
                self.stack.release(location);
                Ok(())
            }
            Operation::Swap => self.stack.swap_top(),
            Operation::TraceElement(trace) => self.emit_trace(trace),
        }
    }

    /// Copy a value between locations; frame-to-frame goes through `rax`.
    fn emit_move(&mut self, dst: Location, src: Location) {
        match (dst, src) {
            _ if dst == src => {}
            (Location::Reg(d), Location::Reg(s)) => self.asm.mov_rr(d, s),
            (Location::Reg(d), Location::Slot(s)) => {
                let disp = self.slot_disp(s);
                self.asm.mov_load(d, disp);
            }
            (Location::Slot(d), Location::Reg(s)) => {
                let disp = self.slot_disp(d);
                self.asm.mov_store(disp, s);
            }
            (Location::Slot(d), Location::Slot(s)) => {
                let (ddisp, sdisp) = (self.slot_disp(d), self.slot_disp(s));
                self.asm.mov_load(SCRATCH, sdisp);
                self.asm.mov_store(ddisp, SCRATCH);
            }
        }
    }

    fn emit_binary(&mut self, kind: BinaryOpKind) -> Result<(), CodeGenError> {
        let rhs = self.stack.pop()?;
        let lhs = self.stack.peek(0)?;

        let alu = match kind {
            BinaryOpKind::Add => Some(AluOp::Add),
            BinaryOpKind::Sub => Some(AluOp::Sub),
            BinaryOpKind::Mult => None,
        };

        match (lhs, rhs) {
            (Location::Reg(l), Location::Reg(r)) => match alu {
                Some(op) => self.asm.alu_rr(op, l, r),
                None => self.asm.imul_rr(l, r),
            },
            (Location::Reg(l), Location::Slot(r)) => {
                let disp = self.slot_disp(r);
                match alu {
                    Some(op) => self.asm.alu_load(op, l, disp),
                    None => self.asm.imul_load(l, disp),
                }
            }
            (Location::Slot(l), Location::Reg(r)) => {
                let disp = self.slot_disp(l);
                if kind == BinaryOpKind::Sub {
                    self.asm.alu_store(AluOp::Sub, disp, r);
                } else {
                    // Commutative: keep the result in the register instead.
                    match alu {
                        Some(op) => self.asm.alu_load(op, r, disp),
                        None => self.asm.imul_load(r, disp),
                    }
                    self.stack.replace_top(rhs)?;
                    self.stack.release(lhs);
                    return Ok(());
                }
            }
            (Location::Slot(l), Location::Slot(r)) => {
                let (ldisp, rdisp) = (self.slot_disp(l), self.slot_disp(r));
                match alu {
                    Some(op) => {
                        self.asm.mov_load(SCRATCH, rdisp);
                        self.asm.alu_store(op, ldisp, SCRATCH);
                    }
                    None => {
                        self.asm.mov_load(SCRATCH, ldisp);
                        self.asm.imul_load(SCRATCH, rdisp);
                        self.asm.mov_store(ldisp, SCRATCH);
                    }
                }
            }
        }

        self.stack.release(rhs);
        Ok(())
    }

    fn emit_trace(&mut self, trace: &TraceElement) -> Result<(), CodeGenError> {
        let value = self.stack.peek(trace.index())?;
        let live = self.stack.live_caller_saved();

        for &reg in &live {
            self.asm.push(reg);
            self.rsp_offset += WORD;
        }
        let padding = align_up(self.rsp_offset, STACK_ALIGN) - self.rsp_offset;
        if padding > 0 {
            self.asm.sub_rsp(padding);
            self.rsp_offset += padding;
        }

        // Second argument first: the value may sit in rdi.
        match value {
            Location::Reg(reg) if reg == ARG_REGS[1] => {}
            Location::Reg(reg) => self.asm.mov_rr(ARG_REGS[1], reg),
            Location::Slot(slot) => {
                let disp = self.slot_disp(slot);
                self.asm.mov_load(ARG_REGS[1], disp);
            }
        }
        self.asm.mov_imm64(ARG_REGS[0], trace.context() as usize as u64);
        self.asm.mov_imm64(SCRATCH, trace.callback() as usize as u64);

        if self.rsp_offset % STACK_ALIGN != 0 {
            return Err(CodeGenError::Misaligned {
                offset: self.rsp_offset % STACK_ALIGN,
            });
        }
        self.asm.call_reg(SCRATCH);

        if padding > 0 {
            self.asm.add_rsp(padding);
            self.rsp_offset -= padding;
        }
        for &reg in live.iter().rev() {
            self.asm.pop(reg);
            self.rsp_offset -= WORD;
        }
        Ok(())
    }

    fn emit_epilogue(&mut self) -> Result<(), CodeGenError> {
        if self.stack.depth() != 1 {
            return Err(CodeGenError::Logic(format!(
                "program ends with virtual stack depth {}",
                self.stack.depth()
            )));
        }
        let result = self.stack.pop()?;
        self.emit_move(Location::Reg(RETURN), result);

        if self.frame_bytes > 0 {
            self.asm.add_rsp(self.frame_bytes);
        }
        for &reg in self.saved.iter().rev() {
            self.asm.pop(reg);
        }
        self.asm.pop(Reg::Rbp);
        self.asm.ret();
        Ok(())
    }
}

fn align_up(value: i32, align: i32) -> i32 {
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use polish_core::Operation as Op;

    #[test]
    fn test_identity_is_a_bare_frame() {
        let code = generate(&[], 1, 1, REGISTER_POOL.len()).unwrap();
        assert_eq!(
            code,
            [
                0x55, // push rbp
                0x48, 0x89, 0xE5, // mov rbp, rsp
                0x48, 0x89, 0xF8, // mov rax, rdi
                0x5D, // pop rbp
                0xC3, // ret
            ]
        );
    }

    #[test]
    fn test_register_arithmetic() {
        // f(a, b) = a * (b + 3)
        let program = [Op::Push { value: 3 }, Op::add(), Op::mult()];
        let code = generate(&program, 2, 3, REGISTER_POOL.len()).unwrap();
        assert_eq!(
            code,
            [
                0x55, 0x48, 0x89, 0xE5, // prologue
                0xBA, 0x03, 0x00, 0x00, 0x00, // mov edx, 3
                0x48, 0x01, 0xD6, // add rsi, rdx
                0x48, 0x0F, 0xAF, 0xFE, // imul rdi, rsi
                0x48, 0x89, 0xF8, // mov rax, rdi
                0x5D, 0xC3, // epilogue
            ]
        );
    }

    #[test]
    fn test_swap_and_pop_emit_nothing() {
        let plain = generate(&[Op::Pop], 2, 2, REGISTER_POOL.len()).unwrap();
        let swapped = generate(&[Op::Swap, Op::Swap, Op::Pop], 2, 2, REGISTER_POOL.len()).unwrap();
        assert_eq!(plain, swapped);
    }

    #[test]
    fn test_callee_saved_only_when_reachable() {
        // Depth 9 reaches rbx, the ninth pool register.
        let mut program = vec![Op::Push { value: 1 }; 8];
        program.extend(vec![Op::add(); 8]);
        let code = generate(&program, 1, 9, REGISTER_POOL.len()).unwrap();
        assert_eq!(&code[..5], &[0x55, 0x48, 0x89, 0xE5, 0x53]); // push rbx

        let shallow = generate(&program[..0], 1, 1, REGISTER_POOL.len()).unwrap();
        assert!(!shallow.contains(&0x53));
    }

    #[test]
    fn test_zero_budget_spills_arguments() {
        let code = generate(&[Op::add()], 2, 2, 0).unwrap();
        assert_eq!(
            code,
            [
                0x55, 0x48, 0x89, 0xE5, // prologue
                0x48, 0x83, 0xEC, 0x10, // sub rsp, 16
                0x48, 0x89, 0x7D, 0xF8, // mov [rbp-8], rdi
                0x48, 0x89, 0x75, 0xF0, // mov [rbp-16], rsi
                0x48, 0x8B, 0x45, 0xF0, // mov rax, [rbp-16]
                0x48, 0x01, 0x45, 0xF8, // add [rbp-8], rax
                0x48, 0x8B, 0x45, 0xF8, // mov rax, [rbp-8]
                0x48, 0x83, 0xC4, 0x10, // add rsp, 16
                0x5D, 0xC3, // epilogue
            ]
        );
    }

    #[test]
    fn test_frame_keeps_alignment() {
        for budget in 0..=REGISTER_POOL.len() {
            for depth in 1..20 {
                let codegen = CodeGen::new(0, depth, budget).unwrap();
                let below_rbp = codegen.saved.len() as i32 * WORD + codegen.frame_bytes;
                assert_eq!(below_rbp % STACK_ALIGN, 0, "budget {budget} depth {depth}");
            }
        }
    }

    #[test]
    fn test_invalid_program_is_a_logic_error() {
        let result = generate(&[Op::Pop, Op::Pop], 1, 1, REGISTER_POOL.len());
        assert!(matches!(result, Err(CodeGenError::Logic(_))));
    }
}
