//! Abstract instruction list and its encoding.
//!
//! The method compiler records [`Insn`]s on an [`Assembler`]; nothing is
//! encoded until the code block knows where the bytes will live, because
//! calls to absolute addresses are encoded relative to the target address.

use std::fmt;

use super::codebuf::CodeBuffer;
use super::x86_64::{AluOp, CALL_REL32_LEN, Cond, Encoder, Reg};

/// Instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opnd {
    Reg(Reg),
    /// `[base + disp]`
    Mem { base: Reg, disp: i32 },
    Imm(i64),
}

impl Opnd {
    pub fn mem(base: Reg, disp: i32) -> Opnd {
        Opnd::Mem { base, disp }
    }

    pub fn imm(value: impl Into<i64>) -> Opnd {
        Opnd::Imm(value.into())
    }
}

impl From<Reg> for Opnd {
    fn from(reg: Reg) -> Self {
        Opnd::Reg(reg)
    }
}

impl fmt::Display for Opnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Opnd::Reg(reg) => write!(f, "{}", reg),
            Opnd::Mem { base, disp } if disp < 0 => write!(f, "[{}-{:#x}]", base, -(disp as i64)),
            Opnd::Mem { base, disp: 0 } => write!(f, "[{}]", base),
            Opnd::Mem { base, disp } => write!(f, "[{}+{:#x}]", base, disp),
            Opnd::Imm(value) => write!(f, "{:#x}", value),
        }
    }
}

/// One abstract instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insn {
    Mov(Opnd, Opnd),
    Add(Opnd, Opnd),
    Sub(Opnd, Opnd),
    /// Sets flags for the `CMovL` that must follow it.
    Cmp(Opnd, Opnd),
    CMovL(Opnd, Opnd),
    Push(Reg),
    Pop(Reg),
    /// `Imm` is an absolute address; a far target clobbers `rax`.
    Call(Opnd),
    Ret,
}

impl Insn {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Insn::Mov(..) => "mov",
            Insn::Add(..) => "add",
            Insn::Sub(..) => "sub",
            Insn::Cmp(..) => "cmp",
            Insn::CMovL(..) => "cmovl",
            Insn::Push(_) => "push",
            Insn::Pop(_) => "pop",
            Insn::Call(_) => "call",
            Insn::Ret => "ret",
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Mov(a, b)
            | Insn::Add(a, b)
            | Insn::Sub(a, b)
            | Insn::Cmp(a, b)
            | Insn::CMovL(a, b) => write!(f, "{} {}, {}", self.mnemonic(), a, b),
            Insn::Push(reg) | Insn::Pop(reg) => write!(f, "{} {}", self.mnemonic(), reg),
            Insn::Call(target) => write!(f, "call {}", target),
            Insn::Ret => f.write_str("ret"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AsmError {
    #[error("invalid operands for `{insn}`: {dst}, {src}")]
    InvalidOperands {
        insn: &'static str,
        dst: Opnd,
        src: Opnd,
    },
    #[error("invalid call target {0}")]
    InvalidCallTarget(Opnd),
    #[error("immediate {value:#x} does not fit in 32 bits for `{insn}`")]
    ImmediateOutOfRange { insn: &'static str, value: i64 },
    #[error("`cmp` at index {index} is not immediately followed by `cmovl`")]
    DanglingCompare { index: usize },
    #[error("code needs {needed} bytes but only {available} are available")]
    BufferTooSmall { needed: usize, available: usize },
}

pub type AsmResult<T> = Result<T, AsmError>;

fn imm32(insn: &'static str, value: i64) -> AsmResult<i32> {
    i32::try_from(value).map_err(|_| AsmError::ImmediateOutOfRange { insn, value })
}

/// An ordered list of abstract instructions.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    insns: Vec<Insn>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn push_insn(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    pub fn mov(&mut self, dst: impl Into<Opnd>, src: impl Into<Opnd>) {
        self.push_insn(Insn::Mov(dst.into(), src.into()));
    }

    pub fn add(&mut self, dst: impl Into<Opnd>, src: impl Into<Opnd>) {
        self.push_insn(Insn::Add(dst.into(), src.into()));
    }

    pub fn sub(&mut self, dst: impl Into<Opnd>, src: impl Into<Opnd>) {
        self.push_insn(Insn::Sub(dst.into(), src.into()));
    }

    pub fn cmp(&mut self, a: impl Into<Opnd>, b: impl Into<Opnd>) {
        self.push_insn(Insn::Cmp(a.into(), b.into()));
    }

    pub fn cmovl(&mut self, dst: impl Into<Opnd>, src: impl Into<Opnd>) {
        self.push_insn(Insn::CMovL(dst.into(), src.into()));
    }

    pub fn push(&mut self, reg: Reg) {
        self.push_insn(Insn::Push(reg));
    }

    pub fn pop(&mut self, reg: Reg) {
        self.push_insn(Insn::Pop(reg));
    }

    pub fn call(&mut self, target: impl Into<Opnd>) {
        self.push_insn(Insn::Call(target.into()));
    }

    pub fn ret(&mut self) {
        self.push_insn(Insn::Ret);
    }

    /// Encode every instruction as if the first byte lives at `target`.
    ///
    /// The output depends only on the instruction list and `target`.
    pub fn encode(&self, target: u64) -> AsmResult<Vec<u8>> {
        let mut buf = CodeBuffer::with_capacity(self.insns.len() * 4);
        for (index, insn) in self.insns.iter().enumerate() {
            if matches!(insn, Insn::Cmp(..)) && !matches!(self.insns.get(index + 1), Some(Insn::CMovL(..))) {
                return Err(AsmError::DanglingCompare { index });
            }
            let here = target.wrapping_add(buf.len() as u64);
            encode_insn(&mut Encoder::new(&mut buf), insn, here)?;
        }
        Ok(buf.into_code())
    }

    /// Encode for `target` into `out`, returning the number of bytes written.
    ///
    /// Bytes past the returned length are left untouched, and nothing is
    /// written when the code does not fit.
    pub fn assemble(&self, target: u64, out: &mut [u8]) -> AsmResult<usize> {
        let code = self.encode(target)?;
        if code.len() > out.len() {
            return Err(AsmError::BufferTooSmall {
                needed: code.len(),
                available: out.len(),
            });
        }
        out[..code.len()].copy_from_slice(&code);
        Ok(code.len())
    }
}

fn encode_insn(enc: &mut Encoder, insn: &Insn, here: u64) -> AsmResult<()> {
    match *insn {
        Insn::Mov(dst, src) => match (dst, src) {
            (Opnd::Reg(d), Opnd::Reg(s)) => enc.mov_rr(d, s),
            (Opnd::Reg(d), Opnd::Mem { base, disp }) => enc.mov_rm(d, base, disp),
            (Opnd::Mem { base, disp }, Opnd::Reg(s)) => enc.mov_mr(base, disp, s),
            (Opnd::Reg(d), Opnd::Imm(value)) => match i32::try_from(value) {
                Ok(imm) => enc.mov_ri32(d, imm),
                Err(_) => enc.mov_ri64(d, value),
            },
            (Opnd::Mem { base, disp }, Opnd::Imm(value)) => {
                enc.mov_mi32(base, disp, imm32("mov", value)?)
            }
            _ => return Err(invalid(insn, dst, src)),
        },
        Insn::Add(dst, src) => encode_alu(enc, AluOp::Add, insn, dst, src)?,
        Insn::Sub(dst, src) => encode_alu(enc, AluOp::Sub, insn, dst, src)?,
        Insn::Cmp(a, b) => encode_alu(enc, AluOp::Cmp, insn, a, b)?,
        Insn::CMovL(dst, src) => match (dst, src) {
            (Opnd::Reg(d), Opnd::Reg(s)) => enc.cmov_rr(Cond::L, d, s),
            (Opnd::Reg(d), Opnd::Mem { base, disp }) => enc.cmov_rm(Cond::L, d, base, disp),
            _ => return Err(invalid(insn, dst, src)),
        },
        Insn::Push(reg) => enc.push(reg),
        Insn::Pop(reg) => enc.pop(reg),
        Insn::Call(target) => match target {
            Opnd::Imm(addr) => {
                let next = here.wrapping_add(CALL_REL32_LEN as u64);
                let rel = (addr as u64).wrapping_sub(next) as i64;
                match i32::try_from(rel) {
                    Ok(rel) => enc.call_rel32(rel),
                    Err(_) => {
                        enc.mov_ri64(Reg::Rax, addr);
                        enc.call_r(Reg::Rax);
                    }
                }
            }
            Opnd::Reg(reg) => enc.call_r(reg),
            Opnd::Mem { base, disp } => enc.call_m(base, disp),
        },
        Insn::Ret => enc.ret(),
    }
    Ok(())
}

fn encode_alu(enc: &mut Encoder, op: AluOp, insn: &Insn, dst: Opnd, src: Opnd) -> AsmResult<()> {
    match (dst, src) {
        (Opnd::Reg(d), Opnd::Reg(s)) => enc.alu_rr(op, d, s),
        (Opnd::Reg(d), Opnd::Mem { base, disp }) => enc.alu_rm(op, d, base, disp),
        (Opnd::Mem { base, disp }, Opnd::Reg(s)) => enc.alu_mr(op, base, disp, s),
        (Opnd::Reg(d), Opnd::Imm(value)) => enc.alu_ri32(op, d, imm32(op.mnemonic(), value)?),
        (Opnd::Mem { base, disp }, Opnd::Imm(value)) => {
            enc.alu_mi32(op, base, disp, imm32(op.mnemonic(), value)?)
        }
        _ => return Err(invalid(insn, dst, src)),
    }
    Ok(())
}

fn invalid(insn: &Insn, dst: Opnd, src: Opnd) -> AsmError {
    AsmError::InvalidOperands {
        insn: insn.mnemonic(),
        dst,
        src,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
        let mut asm = Assembler::new();
        f(&mut asm);
        asm.encode(0x1000).unwrap()
    }

    #[test]
    fn test_mov_operand_forms() {
        assert_eq!(encoded(|a| a.mov(Reg::R8, Reg::Rax)), [0x49, 0x89, 0xC0]);
        assert_eq!(
            encoded(|a| a.mov(Reg::Rax, Opnd::mem(Reg::R13, 8))),
            [0x49, 0x8B, 0x45, 0x08]
        );
        assert_eq!(
            encoded(|a| a.mov(Opnd::mem(Reg::R12, 0x10), Reg::R13)),
            [0x4D, 0x89, 0x6C, 0x24, 0x10]
        );
        assert_eq!(
            encoded(|a| a.mov(Reg::R8, Opnd::imm(0x14))),
            [0x49, 0xC7, 0xC0, 0x14, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            encoded(|a| a.mov(Opnd::mem(Reg::R13, 0x18), Opnd::imm(5))),
            [0x49, 0xC7, 0x45, 0x18, 0x05, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_mov_wide_immediate_uses_imm64() {
        let code = encoded(|a| a.mov(Reg::Rax, Opnd::imm(0x1_0000_0000i64)));
        assert_eq!(code, [0x48, 0xB8, 0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_memory_to_memory_rejected() {
        let mut asm = Assembler::new();
        asm.mov(Opnd::mem(Reg::Rax, 0), Opnd::mem(Reg::Rcx, 0));
        assert!(matches!(
            asm.encode(0),
            Err(AsmError::InvalidOperands { insn: "mov", .. })
        ));

        let mut asm = Assembler::new();
        asm.add(Opnd::imm(1), Reg::Rax);
        assert!(matches!(
            asm.encode(0),
            Err(AsmError::InvalidOperands { insn: "add", .. })
        ));
    }

    #[test]
    fn test_wide_immediate_rejected_for_alu() {
        let mut asm = Assembler::new();
        asm.sub(Reg::R8, Opnd::imm(i64::MAX));
        assert_eq!(
            asm.encode(0),
            Err(AsmError::ImmediateOutOfRange {
                insn: "sub",
                value: i64::MAX
            })
        );
    }

    #[test]
    fn test_tagged_arithmetic_sequence() {
        let code = encoded(|a| {
            a.add(Reg::R8, Reg::R9);
            a.sub(Reg::R8, Opnd::imm(1));
        });
        assert_eq!(code, [0x4D, 0x01, 0xC8, 0x49, 0x83, 0xE8, 0x01]);
    }

    #[test]
    fn test_compare_must_feed_cmovl() {
        let code = encoded(|a| {
            a.cmp(Reg::R8, Reg::R9);
            a.cmovl(Reg::Rax, Reg::Rcx);
        });
        assert_eq!(code, [0x4D, 0x39, 0xC8, 0x48, 0x0F, 0x4C, 0xC1]);

        let mut asm = Assembler::new();
        asm.cmp(Reg::R8, Reg::R9);
        asm.mov(Reg::Rax, Reg::Rcx);
        asm.cmovl(Reg::Rax, Reg::Rcx);
        assert_eq!(asm.encode(0), Err(AsmError::DanglingCompare { index: 0 }));

        let mut asm = Assembler::new();
        asm.cmp(Reg::R8, Reg::R9);
        assert_eq!(asm.encode(0), Err(AsmError::DanglingCompare { index: 0 }));
    }

    #[test]
    fn test_call_near_target_is_relative() {
        let mut asm = Assembler::new();
        asm.push(Reg::R8); // 2 bytes
        asm.call(Opnd::imm(0x1000));
        asm.pop(Reg::R8);
        // call starts at 0x2002, next insn at 0x2007: rel = 0x1000 - 0x2007
        let code = asm.encode(0x2000).unwrap();
        assert_eq!(&code[..2], &[0x41, 0x50]);
        assert_eq!(code[2], 0xE8);
        let rel = i32::from_le_bytes([code[3], code[4], code[5], code[6]]);
        assert_eq!(rel, 0x1000 - 0x2007);
        assert_eq!(&code[7..], &[0x41, 0x58]);
    }

    #[test]
    fn test_call_far_target_goes_through_rax() {
        let mut asm = Assembler::new();
        let far = 0x7000_0000_0000i64;
        asm.call(Opnd::imm(far));
        let code = asm.encode(0x1000).unwrap();
        assert_eq!(&code[..2], &[0x48, 0xB8]);
        assert_eq!(&code[2..10], &(far as u64).to_le_bytes());
        assert_eq!(&code[10..], &[0xFF, 0xD0]);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let mut asm = Assembler::new();
        asm.mov(Reg::Rcx, Opnd::mem(Reg::R13, 0));
        asm.mov(Opnd::mem(Reg::Rcx, 0), Reg::R8);
        asm.call(Opnd::imm(0x4000));
        asm.ret();
        assert_eq!(asm.encode(0x3000), asm.encode(0x3000));
    }

    #[test]
    fn test_assemble_writes_only_its_range() {
        let mut asm = Assembler::new();
        asm.mov(Reg::Rax, Reg::R8);
        asm.ret();

        let mut out = [0xCCu8; 8];
        let n = asm.assemble(0, &mut out).unwrap();
        assert_eq!(n, 4);
        assert_eq!(out, [0x4C, 0x89, 0xC0, 0xC3, 0xCC, 0xCC, 0xCC, 0xCC]);
    }

    #[test]
    fn test_assemble_refuses_short_output() {
        let mut asm = Assembler::new();
        asm.mov(Reg::Rax, Opnd::imm(0x1_0000_0000i64));

        let mut out = [0u8; 4];
        assert_eq!(
            asm.assemble(0, &mut out),
            Err(AsmError::BufferTooSmall {
                needed: 10,
                available: 4
            })
        );
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn test_display() {
        assert_eq!(Insn::Mov(Opnd::Reg(Reg::R8), Opnd::mem(Reg::Rax, -8)).to_string(), "mov r8, [rax-0x8]");
        assert_eq!(Insn::Call(Opnd::imm(0x40)).to_string(), "call 0x40");
        assert_eq!(Insn::Push(Reg::R11).to_string(), "push r11");
    }
}
