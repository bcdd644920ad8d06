//! Minimal x86-64 assembler
//!
//! Encodes only the instruction forms the code generator needs. Memory
//! operands are always frame slots addressed from `rbp`, which keeps ModRM
//! encoding free of SIB bytes.

/// General purpose 64-bit registers, numbered by their hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    #[inline]
    fn low(self) -> u8 {
        self as u8 & 0b111
    }

    /// Whether the register needs a REX extension bit.
    #[inline]
    fn high(self) -> bool {
        self as u8 >= 8
    }

    /// Registers a System V callee must preserve.
    pub fn is_callee_saved(self) -> bool {
        matches!(
            self,
            Reg::Rbx | Reg::Rbp | Reg::Rsp | Reg::R12 | Reg::R13 | Reg::R14 | Reg::R15
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Reg::Rax => "rax",
            Reg::Rcx => "rcx",
            Reg::Rdx => "rdx",
            Reg::Rbx => "rbx",
            Reg::Rsp => "rsp",
            Reg::Rbp => "rbp",
            Reg::Rsi => "rsi",
            Reg::Rdi => "rdi",
            Reg::R8 => "r8",
            Reg::R9 => "r9",
            Reg::R10 => "r10",
            Reg::R11 => "r11",
            Reg::R12 => "r12",
            Reg::R13 => "r13",
            Reg::R14 => "r14",
            Reg::R15 => "r15",
        }
    }
}

/// Two-operand integer ALU instructions sharing the classic opcode layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
}

impl AluOp {
    /// `op r/m64, r64`
    fn opcode_store(self) -> u8 {
        match self {
            AluOp::Add => 0x01,
            AluOp::Sub => 0x29,
        }
    }

    /// `op r64, r/m64`
    fn opcode_load(self) -> u8 {
        match self {
            AluOp::Add => 0x03,
            AluOp::Sub => 0x2B,
        }
    }
}

const REX_W: u8 = 0x48;

/// Append-only machine code buffer.
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Assembler {
            code: Vec::with_capacity(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    fn rex(&mut self, wide: bool, reg: Reg, rm: Reg) {
        let mut rex = 0x40;
        if wide {
            rex |= 0x08;
        }
        if reg.high() {
            rex |= 0x04;
        }
        if rm.high() {
            rex |= 0x01;
        }
        if rex != 0x40 {
            self.code.push(rex);
        }
    }

    fn modrm_direct(&mut self, reg: Reg, rm: Reg) {
        self.code.push(0xC0 | (reg.low() << 3) | rm.low());
    }

    /// ModRM (+ displacement) for `[rbp + disp]`.
    fn modrm_frame(&mut self, reg: Reg, disp: i32) {
        if let Ok(disp8) = i8::try_from(disp) {
            self.code.push(0x40 | (reg.low() << 3) | Reg::Rbp.low());
            self.code.push(disp8 as u8);
        } else {
            self.code.push(0x80 | (reg.low() << 3) | Reg::Rbp.low());
            self.code.extend_from_slice(&disp.to_le_bytes());
        }
    }

    /// `mov dst, src`
    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.rex(true, src, dst);
        self.code.push(0x89);
        self.modrm_direct(src, dst);
    }

    /// `mov dst, [rbp + disp]`
    pub fn mov_load(&mut self, dst: Reg, disp: i32) {
        self.rex(true, dst, Reg::Rbp);
        self.code.push(0x8B);
        self.modrm_frame(dst, disp);
    }

    /// `mov [rbp + disp], src`
    pub fn mov_store(&mut self, disp: i32, src: Reg) {
        self.rex(true, src, Reg::Rbp);
        self.code.push(0x89);
        self.modrm_frame(src, disp);
    }

    /// `mov dst32, imm32`, which zero-extends into the full register.
    pub fn mov_imm32(&mut self, dst: Reg, imm: u32) {
        if dst.high() {
            self.code.push(0x41);
        }
        self.code.push(0xB8 + dst.low());
        self.code.extend_from_slice(&imm.to_le_bytes());
    }

    /// `movabs dst, imm64`
    pub fn mov_imm64(&mut self, dst: Reg, imm: u64) {
        self.code.push(REX_W | u8::from(dst.high()));
        self.code.push(0xB8 + dst.low());
        self.code.extend_from_slice(&imm.to_le_bytes());
    }

    /// `op dst, src`
    pub fn alu_rr(&mut self, op: AluOp, dst: Reg, src: Reg) {
        self.rex(true, src, dst);
        self.code.push(op.opcode_store());
        self.modrm_direct(src, dst);
    }

    /// `op dst, [rbp + disp]`
    pub fn alu_load(&mut self, op: AluOp, dst: Reg, disp: i32) {
        self.rex(true, dst, Reg::Rbp);
        self.code.push(op.opcode_load());
        self.modrm_frame(dst, disp);
    }

    /// `op [rbp + disp], src`
    pub fn alu_store(&mut self, op: AluOp, disp: i32, src: Reg) {
        self.rex(true, src, Reg::Rbp);
        self.code.push(op.opcode_store());
        self.modrm_frame(src, disp);
    }

    /// `imul dst, src`
    pub fn imul_rr(&mut self, dst: Reg, src: Reg) {
        self.rex(true, dst, src);
        self.code.extend_from_slice(&[0x0F, 0xAF]);
        self.modrm_direct(dst, src);
    }

    /// `imul dst, [rbp + disp]`
    pub fn imul_load(&mut self, dst: Reg, disp: i32) {
        self.rex(true, dst, Reg::Rbp);
        self.code.extend_from_slice(&[0x0F, 0xAF]);
        self.modrm_frame(dst, disp);
    }

    pub fn push(&mut self, reg: Reg) {
        if reg.high() {
            self.code.push(0x41);
        }
        self.code.push(0x50 + reg.low());
    }

    pub fn pop(&mut self, reg: Reg) {
        if reg.high() {
            self.code.push(0x41);
        }
        self.code.push(0x58 + reg.low());
    }

    /// `sub rsp, imm`
    pub fn sub_rsp(&mut self, imm: i32) {
        self.rsp_arith(0b101, imm);
    }

    /// `add rsp, imm`
    pub fn add_rsp(&mut self, imm: i32) {
        self.rsp_arith(0b000, imm);
    }

    fn rsp_arith(&mut self, ext: u8, imm: i32) {
        self.code.push(REX_W);
        let modrm = 0xC0 | (ext << 3) | Reg::Rsp.low();
        if let Ok(imm8) = i8::try_from(imm) {
            self.code.extend_from_slice(&[0x83, modrm, imm8 as u8]);
        } else {
            self.code.extend_from_slice(&[0x81, modrm]);
            self.code.extend_from_slice(&imm.to_le_bytes());
        }
    }

    /// `call reg`
    pub fn call_reg(&mut self, target: Reg) {
        if target.high() {
            self.code.push(0x41);
        }
        self.code.extend_from_slice(&[0xFF, 0xD0 | target.low()]);
    }

    pub fn ret(&mut self) {
        self.code.push(0xC3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
        let mut asm = Assembler::new();
        f(&mut asm);
        asm.finish()
    }

    #[test]
    fn test_register_moves() {
        assert_eq!(encode(|a| a.mov_rr(Reg::Rax, Reg::Rdi)), [0x48, 0x89, 0xF8]);
        assert_eq!(encode(|a| a.mov_rr(Reg::R8, Reg::R9)), [0x4D, 0x89, 0xC8]);
        assert_eq!(encode(|a| a.mov_rr(Reg::Rbp, Reg::Rsp)), [0x48, 0x89, 0xE5]);
    }

    #[test]
    fn test_frame_access() {
        assert_eq!(encode(|a| a.mov_load(Reg::Rax, -8)), [0x48, 0x8B, 0x45, 0xF8]);
        assert_eq!(
            encode(|a| a.mov_store(-16, Reg::Rdi)),
            [0x48, 0x89, 0x7D, 0xF0]
        );
        assert_eq!(
            encode(|a| a.mov_load(Reg::R12, -256)),
            [0x4C, 0x8B, 0xA5, 0x00, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            encode(|a| a.alu_rr(AluOp::Add, Reg::Rdi, Reg::Rsi)),
            [0x48, 0x01, 0xF7]
        );
        assert_eq!(
            encode(|a| a.alu_rr(AluOp::Sub, Reg::Rax, Reg::R11)),
            [0x4C, 0x29, 0xD8]
        );
        assert_eq!(
            encode(|a| a.alu_load(AluOp::Sub, Reg::Rcx, -24)),
            [0x48, 0x2B, 0x4D, 0xE8]
        );
        assert_eq!(
            encode(|a| a.alu_store(AluOp::Add, -8, Reg::Rax)),
            [0x48, 0x01, 0x45, 0xF8]
        );
        assert_eq!(
            encode(|a| a.imul_rr(Reg::Rdi, Reg::Rsi)),
            [0x48, 0x0F, 0xAF, 0xFE]
        );
        assert_eq!(
            encode(|a| a.imul_load(Reg::R15, -8)),
            [0x4C, 0x0F, 0xAF, 0x7D, 0xF8]
        );
    }

    #[test]
    fn test_immediates() {
        assert_eq!(
            encode(|a| a.mov_imm32(Reg::Rax, 5)),
            [0xB8, 0x05, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            encode(|a| a.mov_imm32(Reg::R10, 0x8000_0000)),
            [0x41, 0xBA, 0x00, 0x00, 0x00, 0x80]
        );
        assert_eq!(
            encode(|a| a.mov_imm64(Reg::Rdi, 0x1122_3344_5566_7788)),
            [0x48, 0xBF, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn test_stack_and_control() {
        assert_eq!(encode(|a| a.push(Reg::Rbp)), [0x55]);
        assert_eq!(encode(|a| a.push(Reg::R12)), [0x41, 0x54]);
        assert_eq!(encode(|a| a.pop(Reg::R15)), [0x41, 0x5F]);
        assert_eq!(encode(|a| a.sub_rsp(8)), [0x48, 0x83, 0xEC, 0x08]);
        assert_eq!(
            encode(|a| a.add_rsp(4096)),
            [0x48, 0x81, 0xC4, 0x00, 0x10, 0x00, 0x00]
        );
        assert_eq!(encode(|a| a.call_reg(Reg::Rax)), [0xFF, 0xD0]);
        assert_eq!(encode(|a| a.ret()), [0xC3]);
    }
}
