//! x86-64 instruction encoding.
//!
//! Only the 64-bit forms used by the method compiler are provided. Memory
//! operands are always `[base + disp]`; the encoder picks the shortest
//! displacement and adds the SIB byte that RSP/R12 bases require.

use std::fmt;

use super::codebuf::CodeBuffer;

/// x86-64 general-purpose registers.
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
    pub const ALL: [Reg; 16] = [
        Reg::Rax,
        Reg::Rcx,
        Reg::Rdx,
        Reg::Rbx,
        Reg::Rsp,
        Reg::Rbp,
        Reg::Rsi,
        Reg::Rdi,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
    ];

    /// Register from its 4-bit number.
    pub fn from_index(index: u8) -> Reg {
        Self::ALL[(index & 0xF) as usize]
    }

    /// Get the register code (lower 3 bits).
    pub fn code(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Check if this register requires REX.B or REX.R extension.
    pub fn needs_rex_ext(self) -> bool {
        (self as u8) >= 8
    }

    /// Get the REX.B bit for this register (when used as base/rm).
    pub fn rex_b(self) -> u8 {
        if self.needs_rex_ext() { 0x01 } else { 0x00 }
    }

    /// Get the REX.R bit for this register (when used as reg).
    pub fn rex_r(self) -> u8 {
        if self.needs_rex_ext() { 0x04 } else { 0x00 }
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

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// x86-64 condition codes (for Jcc, SETcc, CMOVcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    O = 0x0,  // Overflow
    No = 0x1, // Not overflow
    B = 0x2,  // Below (unsigned <)
    Ae = 0x3, // Above or equal (unsigned >=)
    E = 0x4,  // Equal
    Ne = 0x5, // Not equal
    Be = 0x6, // Below or equal (unsigned <=)
    A = 0x7,  // Above (unsigned >)
    S = 0x8,  // Sign (negative)
    Ns = 0x9, // Not sign (non-negative)
    P = 0xA,  // Parity even
    Np = 0xB, // Parity odd
    L = 0xC,  // Less (signed <)
    Ge = 0xD, // Greater or equal (signed >=)
    Le = 0xE, // Less or equal (signed <=)
    G = 0xF,  // Greater (signed >)
}

impl Cond {
    pub fn from_code(code: u8) -> Cond {
        const ALL: [Cond; 16] = [
            Cond::O,
            Cond::No,
            Cond::B,
            Cond::Ae,
            Cond::E,
            Cond::Ne,
            Cond::Be,
            Cond::A,
            Cond::S,
            Cond::Ns,
            Cond::P,
            Cond::Np,
            Cond::L,
            Cond::Ge,
            Cond::Le,
            Cond::G,
        ];
        ALL[(code & 0xF) as usize]
    }

    /// Mnemonic suffix, as in `cmovl`.
    pub fn suffix(self) -> &'static str {
        match self {
            Cond::O => "o",
            Cond::No => "no",
            Cond::B => "b",
            Cond::Ae => "ae",
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::Be => "be",
            Cond::A => "a",
            Cond::S => "s",
            Cond::Ns => "ns",
            Cond::P => "p",
            Cond::Np => "np",
            Cond::L => "l",
            Cond::Ge => "ge",
            Cond::Le => "le",
            Cond::G => "g",
        }
    }
}

/// Group-1 arithmetic operations sharing one encoding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Cmp,
}

impl AluOp {
    /// `op r/m64, r64`
    fn opcode_rm_r(self) -> u8 {
        match self {
            AluOp::Add => 0x01,
            AluOp::Sub => 0x29,
            AluOp::Cmp => 0x39,
        }
    }

    /// `op r64, r/m64`
    fn opcode_r_rm(self) -> u8 {
        self.opcode_rm_r() + 2
    }

    /// ModR/M reg-field extension for the immediate forms (0x81 / 0x83).
    pub fn ext(self) -> u8 {
        match self {
            AluOp::Add => 0,
            AluOp::Sub => 5,
            AluOp::Cmp => 7,
        }
    }

    pub fn from_ext(ext: u8) -> Option<AluOp> {
        match ext {
            0 => Some(AluOp::Add),
            5 => Some(AluOp::Sub),
            7 => Some(AluOp::Cmp),
            _ => None,
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<(AluOp, bool)> {
        [AluOp::Add, AluOp::Sub, AluOp::Cmp]
            .into_iter()
            .find_map(|op| {
                if opcode == op.opcode_rm_r() {
                    Some((op, false))
                } else if opcode == op.opcode_r_rm() {
                    Some((op, true))
                } else {
                    None
                }
            })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Cmp => "cmp",
        }
    }
}

fn fits_i8(value: i32) -> bool {
    (-128..=127).contains(&value)
}

/// Low-level x86-64 encoder.
pub struct Encoder<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf }
    }

    // ==================== REX prefix helpers ====================

    /// Emit REX.W prefix for 64-bit operations.
    fn emit_rex_w(&mut self, reg: Reg, rm: Reg) {
        let rex = 0x48 | reg.rex_r() | rm.rex_b();
        self.buf.emit_u8(rex);
    }

    /// Emit REX.W prefix for single register operations.
    fn emit_rex_w_single(&mut self, rm: Reg) {
        let rex = 0x48 | rm.rex_b();
        self.buf.emit_u8(rex);
    }

    // ==================== ModR/M helpers ====================

    /// Encode ModR/M byte.
    /// mod: 2 bits, reg: 3 bits, rm: 3 bits
    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// Emit ModR/M (+ SIB, + displacement) for `[base + disp]`.
    fn emit_mem(&mut self, reg_field: u8, base: Reg, disp: i32) {
        // rbp/r13 with mod=00 means rip-relative, so they always carry a displacement
        let mode = if disp == 0 && base.code() != 0b101 {
            0b00
        } else if fits_i8(disp) {
            0b01
        } else {
            0b10
        };

        if base.code() == 0b100 {
            // rsp/r12 as base need a SIB byte: no index, base = rsp/r12
            self.buf.emit_u8(Self::modrm(mode, reg_field, 0b100));
            self.buf.emit_u8(0x24);
        } else {
            self.buf.emit_u8(Self::modrm(mode, reg_field, base.code()));
        }

        match mode {
            0b01 => self.buf.emit_u8(disp as u8),
            0b10 => self.buf.emit_u32(disp as u32),
            _ => {}
        }
    }

    // ==================== Data Movement ====================

    /// MOV r64, r64
    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex_w(src, dst);
        self.buf.emit_u8(0x89); // MOV r/m64, r64
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// MOV r64, imm64
    pub fn mov_ri64(&mut self, dst: Reg, imm: i64) {
        self.emit_rex_w_single(dst);
        self.buf.emit_u8(0xB8 + dst.code()); // MOV r64, imm64
        self.buf.emit_u64(imm as u64);
    }

    /// MOV r64, imm32 (sign-extended)
    pub fn mov_ri32(&mut self, dst: Reg, imm: i32) {
        self.emit_rex_w_single(dst);
        self.buf.emit_u8(0xC7); // MOV r/m64, imm32
        self.buf.emit_u8(Self::modrm(0b11, 0, dst.code()));
        self.buf.emit_u32(imm as u32);
    }

    /// MOV r64, [base + disp]
    pub fn mov_rm(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.emit_rex_w(dst, base);
        self.buf.emit_u8(0x8B); // MOV r64, r/m64
        self.emit_mem(dst.code(), base, disp);
    }

    /// MOV [base + disp], r64
    pub fn mov_mr(&mut self, base: Reg, disp: i32, src: Reg) {
        self.emit_rex_w(src, base);
        self.buf.emit_u8(0x89); // MOV r/m64, r64
        self.emit_mem(src.code(), base, disp);
    }

    /// MOV QWORD [base + disp], imm32 (sign-extended)
    pub fn mov_mi32(&mut self, base: Reg, disp: i32, imm: i32) {
        self.emit_rex_w_single(base);
        self.buf.emit_u8(0xC7); // MOV r/m64, imm32
        self.emit_mem(0, base, disp);
        self.buf.emit_u32(imm as u32);
    }

    // ==================== Arithmetic Operations ====================

    /// ADD/SUB/CMP r64, r64
    pub fn alu_rr(&mut self, op: AluOp, dst: Reg, src: Reg) {
        self.emit_rex_w(src, dst);
        self.buf.emit_u8(op.opcode_rm_r());
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// ADD/SUB/CMP r64, [base + disp]
    pub fn alu_rm(&mut self, op: AluOp, dst: Reg, base: Reg, disp: i32) {
        self.emit_rex_w(dst, base);
        self.buf.emit_u8(op.opcode_r_rm());
        self.emit_mem(dst.code(), base, disp);
    }

    /// ADD/SUB/CMP [base + disp], r64
    pub fn alu_mr(&mut self, op: AluOp, base: Reg, disp: i32, src: Reg) {
        self.emit_rex_w(src, base);
        self.buf.emit_u8(op.opcode_rm_r());
        self.emit_mem(src.code(), base, disp);
    }

    /// ADD/SUB/CMP r64, imm32 (sign-extended)
    pub fn alu_ri32(&mut self, op: AluOp, dst: Reg, imm: i32) {
        self.emit_rex_w_single(dst);
        if fits_i8(imm) {
            self.buf.emit_u8(0x83); // op r/m64, imm8
            self.buf.emit_u8(Self::modrm(0b11, op.ext(), dst.code()));
            self.buf.emit_u8(imm as u8);
        } else {
            self.buf.emit_u8(0x81); // op r/m64, imm32
            self.buf.emit_u8(Self::modrm(0b11, op.ext(), dst.code()));
            self.buf.emit_u32(imm as u32);
        }
    }

    /// ADD/SUB/CMP QWORD [base + disp], imm32 (sign-extended)
    pub fn alu_mi32(&mut self, op: AluOp, base: Reg, disp: i32, imm: i32) {
        self.emit_rex_w_single(base);
        if fits_i8(imm) {
            self.buf.emit_u8(0x83);
            self.emit_mem(op.ext(), base, disp);
            self.buf.emit_u8(imm as u8);
        } else {
            self.buf.emit_u8(0x81);
            self.emit_mem(op.ext(), base, disp);
            self.buf.emit_u32(imm as u32);
        }
    }

    // ==================== Conditional Move ====================

    /// CMOVcc r64, r64
    pub fn cmov_rr(&mut self, cond: Cond, dst: Reg, src: Reg) {
        self.emit_rex_w(dst, src);
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x40 + cond as u8); // CMOVcc r64, r/m64
        self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
    }

    /// CMOVcc r64, [base + disp]
    pub fn cmov_rm(&mut self, cond: Cond, dst: Reg, base: Reg, disp: i32) {
        self.emit_rex_w(dst, base);
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x40 + cond as u8);
        self.emit_mem(dst.code(), base, disp);
    }

    // ==================== Stack Operations ====================

    /// PUSH r64
    pub fn push(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41); // REX.B
        }
        self.buf.emit_u8(0x50 + reg.code());
    }

    /// POP r64
    pub fn pop(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41); // REX.B
        }
        self.buf.emit_u8(0x58 + reg.code());
    }

    // ==================== Control Flow ====================

    /// CALL rel32 (relative to the end of the instruction)
    pub fn call_rel32(&mut self, offset: i32) {
        self.buf.emit_u8(0xE8);
        self.buf.emit_u32(offset as u32);
    }

    /// CALL r64
    pub fn call_r(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41); // REX.B
        }
        self.buf.emit_u8(0xFF); // CALL r/m64
        self.buf.emit_u8(Self::modrm(0b11, 2, reg.code()));
    }

    /// CALL QWORD [base + disp]
    pub fn call_m(&mut self, base: Reg, disp: i32) {
        if base.needs_rex_ext() {
            self.buf.emit_u8(0x41); // REX.B
        }
        self.buf.emit_u8(0xFF);
        self.emit_mem(2, base, disp);
    }

    /// RET
    pub fn ret(&mut self) {
        self.buf.emit_u8(0xC3);
    }
}

/// Length in bytes of `CALL rel32`.
pub const CALL_REL32_LEN: usize = 5;

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(f: impl FnOnce(&mut Encoder)) -> Vec<u8> {
        let mut buf = CodeBuffer::new();
        f(&mut Encoder::new(&mut buf));
        buf.into_code()
    }

    #[test]
    fn test_mov_rr() {
        // MOV RAX, RBX = 48 89 D8
        assert_eq!(encode(|e| e.mov_rr(Reg::Rax, Reg::Rbx)), [0x48, 0x89, 0xD8]);
        // MOV R8, RAX = 49 89 C0
        assert_eq!(encode(|e| e.mov_rr(Reg::R8, Reg::Rax)), [0x49, 0x89, 0xC0]);
        // MOV R12, RDI = 49 89 FC
        assert_eq!(encode(|e| e.mov_rr(Reg::R12, Reg::Rdi)), [0x49, 0x89, 0xFC]);
    }

    #[test]
    fn test_mov_ri64() {
        assert_eq!(
            encode(|e| e.mov_ri64(Reg::Rax, 0x123456789ABCDEF0u64 as i64)),
            [0x48, 0xB8, 0xF0, 0xDE, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn test_mov_ri32() {
        // MOV R8, 0x14 = 49 C7 C0 14 00 00 00
        assert_eq!(
            encode(|e| e.mov_ri32(Reg::R8, 0x14)),
            [0x49, 0xC7, 0xC0, 0x14, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_mov_rm_forms() {
        // MOV RAX, [RBX] = 48 8B 03
        assert_eq!(encode(|e| e.mov_rm(Reg::Rax, Reg::Rbx, 0)), [0x48, 0x8B, 0x03]);
        // MOV RAX, [RBX+16] = 48 8B 43 10
        assert_eq!(encode(|e| e.mov_rm(Reg::Rax, Reg::Rbx, 16)), [0x48, 0x8B, 0x43, 0x10]);
        // MOV R8, [RAX-8] = 4C 8B 40 F8
        assert_eq!(encode(|e| e.mov_rm(Reg::R8, Reg::Rax, -8)), [0x4C, 0x8B, 0x40, 0xF8]);
        // MOV RAX, [RBX+0x100] = 48 8B 83 00 01 00 00
        assert_eq!(
            encode(|e| e.mov_rm(Reg::Rax, Reg::Rbx, 0x100)),
            [0x48, 0x8B, 0x83, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_r13_base_always_has_displacement() {
        // MOV RCX, [R13+0] = 49 8B 4D 00
        assert_eq!(encode(|e| e.mov_rm(Reg::Rcx, Reg::R13, 0)), [0x49, 0x8B, 0x4D, 0x00]);
        // MOV RAX, [R13+8] = 49 8B 45 08
        assert_eq!(encode(|e| e.mov_rm(Reg::Rax, Reg::R13, 8)), [0x49, 0x8B, 0x45, 0x08]);
    }

    #[test]
    fn test_r12_base_needs_sib() {
        // MOV RAX, [R12] = 49 8B 04 24
        assert_eq!(encode(|e| e.mov_rm(Reg::Rax, Reg::R12, 0)), [0x49, 0x8B, 0x04, 0x24]);
        // MOV [R12], R13 = 4D 89 2C 24
        assert_eq!(encode(|e| e.mov_mr(Reg::R12, 0, Reg::R13)), [0x4D, 0x89, 0x2C, 0x24]);
        // MOV [R12+0x10], R13 = 4D 89 6C 24 10
        assert_eq!(
            encode(|e| e.mov_mr(Reg::R12, 0x10, Reg::R13)),
            [0x4D, 0x89, 0x6C, 0x24, 0x10]
        );
    }

    #[test]
    fn test_mov_mr() {
        // MOV [RBX], RAX = 48 89 03
        assert_eq!(encode(|e| e.mov_mr(Reg::Rbx, 0, Reg::Rax)), [0x48, 0x89, 0x03]);
        // MOV [RCX+8], R8 = 4C 89 41 08
        assert_eq!(encode(|e| e.mov_mr(Reg::Rcx, 8, Reg::R8)), [0x4C, 0x89, 0x41, 0x08]);
        // MOV [R13+8], R8 = 4D 89 45 08
        assert_eq!(encode(|e| e.mov_mr(Reg::R13, 8, Reg::R8)), [0x4D, 0x89, 0x45, 0x08]);
    }

    #[test]
    fn test_mov_mi32() {
        // MOV QWORD [R13+0x18], 5 = 49 C7 45 18 05 00 00 00
        assert_eq!(
            encode(|e| e.mov_mi32(Reg::R13, 0x18, 5)),
            [0x49, 0xC7, 0x45, 0x18, 0x05, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_alu_rr() {
        // ADD RAX, RBX = 48 01 D8
        assert_eq!(encode(|e| e.alu_rr(AluOp::Add, Reg::Rax, Reg::Rbx)), [0x48, 0x01, 0xD8]);
        // ADD R8, R9 = 4D 01 C8
        assert_eq!(encode(|e| e.alu_rr(AluOp::Add, Reg::R8, Reg::R9)), [0x4D, 0x01, 0xC8]);
        // SUB RAX, RBX = 48 29 D8
        assert_eq!(encode(|e| e.alu_rr(AluOp::Sub, Reg::Rax, Reg::Rbx)), [0x48, 0x29, 0xD8]);
        // CMP R8, R9 = 4D 39 C8
        assert_eq!(encode(|e| e.alu_rr(AluOp::Cmp, Reg::R8, Reg::R9)), [0x4D, 0x39, 0xC8]);
    }

    #[test]
    fn test_alu_ri32() {
        // ADD RAX, 16 = 48 83 C0 10
        assert_eq!(encode(|e| e.alu_ri32(AluOp::Add, Reg::Rax, 16)), [0x48, 0x83, 0xC0, 0x10]);
        // ADD RAX, 256 = 48 81 C0 00 01 00 00
        assert_eq!(
            encode(|e| e.alu_ri32(AluOp::Add, Reg::Rax, 256)),
            [0x48, 0x81, 0xC0, 0x00, 0x01, 0x00, 0x00]
        );
        // SUB RSP, 32 = 48 83 EC 20
        assert_eq!(encode(|e| e.alu_ri32(AluOp::Sub, Reg::Rsp, 32)), [0x48, 0x83, 0xEC, 0x20]);
        // SUB R13, 32 = 49 83 ED 20
        assert_eq!(encode(|e| e.alu_ri32(AluOp::Sub, Reg::R13, 32)), [0x49, 0x83, 0xED, 0x20]);
        // CMP RAX, 0 = 48 83 F8 00
        assert_eq!(encode(|e| e.alu_ri32(AluOp::Cmp, Reg::Rax, 0)), [0x48, 0x83, 0xF8, 0x00]);
    }

    #[test]
    fn test_alu_memory_forms() {
        // ADD RAX, [RCX+8] = 48 03 41 08
        assert_eq!(
            encode(|e| e.alu_rm(AluOp::Add, Reg::Rax, Reg::Rcx, 8)),
            [0x48, 0x03, 0x41, 0x08]
        );
        // SUB [RCX], RDX = 48 29 11
        assert_eq!(encode(|e| e.alu_mr(AluOp::Sub, Reg::Rcx, 0, Reg::Rdx)), [0x48, 0x29, 0x11]);
        // ADD QWORD [RAX+8], 1 = 48 83 40 08 01
        assert_eq!(
            encode(|e| e.alu_mi32(AluOp::Add, Reg::Rax, 8, 1)),
            [0x48, 0x83, 0x40, 0x08, 0x01]
        );
    }

    #[test]
    fn test_cmov() {
        // CMOVL RAX, RCX = 48 0F 4C C1
        assert_eq!(encode(|e| e.cmov_rr(Cond::L, Reg::Rax, Reg::Rcx)), [0x48, 0x0F, 0x4C, 0xC1]);
        // CMOVL R8, R9 = 4D 0F 4C C1
        assert_eq!(encode(|e| e.cmov_rr(Cond::L, Reg::R8, Reg::R9)), [0x4D, 0x0F, 0x4C, 0xC1]);
        // CMOVL RAX, [RCX] = 48 0F 4C 01
        assert_eq!(
            encode(|e| e.cmov_rm(Cond::L, Reg::Rax, Reg::Rcx, 0)),
            [0x48, 0x0F, 0x4C, 0x01]
        );
    }

    #[test]
    fn test_push_pop() {
        // PUSH RBX = 53, PUSH R12 = 41 54, POP R12 = 41 5C, POP RBX = 5B
        let code = encode(|e| {
            e.push(Reg::Rbx);
            e.push(Reg::R12);
            e.pop(Reg::R12);
            e.pop(Reg::Rbx);
        });
        assert_eq!(code, [0x53, 0x41, 0x54, 0x41, 0x5C, 0x5B]);
    }

    #[test]
    fn test_calls() {
        assert_eq!(encode(|e| e.call_rel32(0x10)), [0xE8, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(encode(|e| e.call_r(Reg::Rax)), [0xFF, 0xD0]);
        assert_eq!(encode(|e| e.call_r(Reg::R12)), [0x41, 0xFF, 0xD4]);
        // CALL [RAX] = FF 10
        assert_eq!(encode(|e| e.call_m(Reg::Rax, 0)), [0xFF, 0x10]);
        // CALL [R13+8] = 41 FF 55 08
        assert_eq!(encode(|e| e.call_m(Reg::R13, 8)), [0x41, 0xFF, 0x55, 0x08]);
    }

    #[test]
    fn test_ret() {
        assert_eq!(encode(|e| e.ret()), [0xC3]);
    }

    #[test]
    fn test_alu_opcode_lookup() {
        assert_eq!(AluOp::from_opcode(0x01), Some((AluOp::Add, false)));
        assert_eq!(AluOp::from_opcode(0x2B), Some((AluOp::Sub, true)));
        assert_eq!(AluOp::from_opcode(0x3B), Some((AluOp::Cmp, true)));
        assert_eq!(AluOp::from_opcode(0x89), None);
    }
}
