//! Diagnostic disassembly of generated code.
//!
//! [`X86Disassembler`] understands the instruction forms [`Encoder`] emits
//! and nothing more; anything else is shown as a `.byte` line so a dump never
//! fails.
//!
//! [`Encoder`]: super::x86_64::Encoder

use std::io;

use serde::Serialize;

use super::asm::Opnd;
use super::x86_64::{AluOp, Cond, Reg};
use crate::config::DisasmFormat;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisasmLine {
    pub address: u64,
    pub mnemonic: String,
    pub operands: String,
    #[serde(skip)]
    pub len: usize,
}

impl DisasmLine {
    fn new(address: u64, len: usize, mnemonic: impl Into<String>, operands: impl Into<String>) -> Self {
        Self {
            address,
            mnemonic: mnemonic.into(),
            operands: operands.into(),
            len,
        }
    }
}

/// Turns a byte range into instruction lines.
pub trait Disassembler {
    /// Decode `code` as if its first byte lives at `address`.
    fn disassemble(&self, code: &[u8], address: u64) -> Vec<DisasmLine>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct X86Disassembler;

impl Disassembler for X86Disassembler {
    fn disassemble(&self, code: &[u8], address: u64) -> Vec<DisasmLine> {
        let mut lines = Vec::new();
        let mut offset = 0;
        while offset < code.len() {
            let here = address + offset as u64;
            let line = Cursor::new(&code[offset..], here)
                .decode()
                .unwrap_or_else(|| DisasmLine::new(here, 1, ".byte", format!("{:#04x}", code[offset])));
            offset += line.len.max(1);
            lines.push(line);
        }
        lines
    }
}

/// Write `lines` to `out` in the requested format.
///
/// JSON output is one object per line.
pub fn render(lines: &[DisasmLine], format: DisasmFormat, out: &mut dyn io::Write) -> io::Result<()> {
    for line in lines {
        match format {
            DisasmFormat::Text => {
                if line.operands.is_empty() {
                    writeln!(out, "  {:#014x}:  {}", line.address, line.mnemonic)?;
                } else {
                    writeln!(out, "  {:#014x}:  {:<6} {}", line.address, line.mnemonic, line.operands)?;
                }
            }
            DisasmFormat::Json => {
                let json = serde_json::to_string(line).map_err(io::Error::other)?;
                writeln!(out, "{}", json)?;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
struct Rex {
    w: bool,
    r: bool,
    b: bool,
}

struct Cursor<'a> {
    code: &'a [u8],
    pos: usize,
    address: u64,
}

impl<'a> Cursor<'a> {
    fn new(code: &'a [u8], address: u64) -> Self {
        Self {
            code,
            pos: 0,
            address,
        }
    }

    fn u8(&mut self) -> Option<u8> {
        let byte = *self.code.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn i8(&mut self) -> Option<i64> {
        self.u8().map(|b| b as i8 as i64)
    }

    fn i32(&mut self) -> Option<i64> {
        let bytes = self.code.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64)
    }

    fn i64(&mut self) -> Option<i64> {
        let bytes = self.code.get(self.pos..self.pos + 8)?;
        self.pos += 8;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        Some(i64::from_le_bytes(word))
    }

    /// Decode ModR/M, returning the reg field and the r/m operand.
    fn modrm(&mut self, rex: Rex) -> Option<(Reg, Opnd)> {
        let modrm = self.u8()?;
        let mode = modrm >> 6;
        let reg = Reg::from_index(((modrm >> 3) & 7) | if rex.r { 8 } else { 0 });
        let rm = modrm & 7;
        let ext_b = if rex.b { 8 } else { 0 };

        if mode == 0b11 {
            return Some((reg, Opnd::Reg(Reg::from_index(rm | ext_b))));
        }

        let base = if rm == 0b100 {
            let sib = self.u8()?;
            // only the "no index" form is ever emitted
            if (sib >> 3) & 7 != 0b100 {
                return None;
            }
            Reg::from_index((sib & 7) | ext_b)
        } else if mode == 0b00 && rm == 0b101 {
            // rip-relative, never emitted
            return None;
        } else {
            Reg::from_index(rm | ext_b)
        };

        let disp = match mode {
            0b00 => 0,
            0b01 => self.i8()?,
            _ => self.i32()?,
        };
        Some((reg, Opnd::mem(base, disp as i32)))
    }

    fn line(&self, mnemonic: impl Into<String>, operands: impl Into<String>) -> Option<DisasmLine> {
        Some(DisasmLine::new(self.address, self.pos, mnemonic, operands))
    }

    fn decode(mut self) -> Option<DisasmLine> {
        let mut op = self.u8()?;
        let mut rex = Rex::default();
        if (0x40..=0x4F).contains(&op) {
            rex = Rex {
                w: op & 0x08 != 0,
                r: op & 0x04 != 0,
                b: op & 0x01 != 0,
            };
            op = self.u8()?;
        }
        let ext_b = if rex.b { 8 } else { 0 };

        match op {
            0x50..=0x57 => self.line("push", Reg::from_index((op - 0x50) | ext_b).name()),
            0x58..=0x5F => self.line("pop", Reg::from_index((op - 0x58) | ext_b).name()),
            0x89 if rex.w => {
                let (reg, rm) = self.modrm(rex)?;
                self.line("mov", format!("{}, {}", rm, reg))
            }
            0x8B if rex.w => {
                let (reg, rm) = self.modrm(rex)?;
                self.line("mov", format!("{}, {}", reg, rm))
            }
            0xB8..=0xBF if rex.w => {
                let reg = Reg::from_index((op - 0xB8) | ext_b);
                let imm = self.i64()?;
                self.line("mov", format!("{}, {}", reg, Opnd::Imm(imm)))
            }
            0xC7 if rex.w => {
                let (reg, rm) = self.modrm(rex)?;
                if reg.code() != 0 {
                    return None;
                }
                let imm = self.i32()?;
                self.line("mov", format!("{}, {}", rm, Opnd::Imm(imm)))
            }
            0x81 | 0x83 if rex.w => {
                let (reg, rm) = self.modrm(Rex { r: false, ..rex })?;
                let alu = AluOp::from_ext(reg.code())?;
                let imm = if op == 0x83 { self.i8()? } else { self.i32()? };
                self.line(alu.mnemonic(), format!("{}, {}", rm, Opnd::Imm(imm)))
            }
            0x0F => {
                let op2 = self.u8()?;
                if !(0x40..=0x4F).contains(&op2) || !rex.w {
                    return None;
                }
                let (reg, rm) = self.modrm(rex)?;
                let cond = Cond::from_code(op2 - 0x40);
                self.line(format!("cmov{}", cond.suffix()), format!("{}, {}", reg, rm))
            }
            0xE8 => {
                let rel = self.i32()?;
                let target = (self.address + self.pos as u64).wrapping_add(rel as u64);
                self.line("call", format!("{:#x}", target))
            }
            0xFF => {
                let (reg, rm) = self.modrm(Rex { r: false, ..rex })?;
                if reg.code() != 2 {
                    return None;
                }
                self.line("call", rm.to_string())
            }
            0xC3 => self.line("ret", ""),
            _ if rex.w => {
                let (alu, reg_is_dst) = AluOp::from_opcode(op)?;
                let (reg, rm) = self.modrm(rex)?;
                if reg_is_dst {
                    self.line(alu.mnemonic(), format!("{}, {}", reg, rm))
                } else {
                    self.line(alu.mnemonic(), format!("{}, {}", rm, reg))
                }
            }
            _ => None,
        }
    }
}
