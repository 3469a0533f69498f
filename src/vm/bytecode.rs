//! Instruction table and decoder for the word-encoded instruction stream.
//!
//! Every instruction is one opcode word followed by zero or more operand
//! words. The table below is the single source of truth for instruction
//! names and their encoded lengths; the decoder advances by the declared
//! length, never by inspecting the operands.

use std::fmt;

use super::value::Value;

/// Opcode numbers, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    GetLocal,
    SetLocal,
    PutNil,
    PutSelf,
    PutObject,
    PutObjectInt0,
    PutObjectInt1,
    Dup,
    Pop,
    OptPlus,
    OptMinus,
    OptMult,
    OptLt,
    Jump,
    BranchIf,
    SendWithoutBlock,
    Leave,
}

/// Fixed per-opcode metadata.
#[derive(Debug)]
pub struct InsnInfo {
    pub opcode: Opcode,
    pub name: &'static str,
    /// Encoded length in words, opcode word included.
    pub len: usize,
}

const fn info(opcode: Opcode, name: &'static str, len: usize) -> InsnInfo {
    InsnInfo { opcode, name, len }
}

pub static INSN_TABLE: [InsnInfo; 18] = [
    info(Opcode::Nop, "nop", 1),
    info(Opcode::GetLocal, "getlocal", 2),
    info(Opcode::SetLocal, "setlocal", 2),
    info(Opcode::PutNil, "putnil", 1),
    info(Opcode::PutSelf, "putself", 1),
    info(Opcode::PutObject, "putobject", 2),
    info(Opcode::PutObjectInt0, "putobject_int_0", 1),
    info(Opcode::PutObjectInt1, "putobject_int_1", 1),
    info(Opcode::Dup, "dup", 1),
    info(Opcode::Pop, "pop", 1),
    info(Opcode::OptPlus, "opt_plus", 1),
    info(Opcode::OptMinus, "opt_minus", 1),
    info(Opcode::OptMult, "opt_mult", 1),
    info(Opcode::OptLt, "opt_lt", 1),
    info(Opcode::Jump, "jump", 2),
    info(Opcode::BranchIf, "branchif", 2),
    info(Opcode::SendWithoutBlock, "send_without_block", 2),
    info(Opcode::Leave, "leave", 1),
];

impl Opcode {
    pub fn from_word(word: u64) -> Option<Opcode> {
        usize::try_from(word)
            .ok()
            .and_then(|idx| INSN_TABLE.get(idx))
            .map(|info| info.opcode)
    }

    pub fn from_name(name: &str) -> Option<Opcode> {
        INSN_TABLE
            .iter()
            .find(|info| info.name == name)
            .map(|info| info.opcode)
    }

    pub fn info(self) -> &'static InsnInfo {
        &INSN_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn len(self) -> usize {
        self.info().len
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insn {
    Nop,
    /// Read local `idx`, counted downward from the environment pointer (1-based).
    GetLocal { idx: usize },
    SetLocal { idx: usize },
    PutNil,
    PutSelf,
    /// Push a literal word taken verbatim from the stream.
    PutObject(Value),
    PutObjectInt0,
    PutObjectInt1,
    Dup,
    Pop,
    OptPlus,
    OptMinus,
    OptMult,
    OptLt,
    /// Relative to the start of the next instruction, in words.
    Jump { offset: i64 },
    BranchIf { offset: i64 },
    /// Index into the method's call-data table.
    SendWithoutBlock { call_data: usize },
    Leave,
}

impl Insn {
    pub fn opcode(&self) -> Opcode {
        match self {
            Insn::Nop => Opcode::Nop,
            Insn::GetLocal { .. } => Opcode::GetLocal,
            Insn::SetLocal { .. } => Opcode::SetLocal,
            Insn::PutNil => Opcode::PutNil,
            Insn::PutSelf => Opcode::PutSelf,
            Insn::PutObject(_) => Opcode::PutObject,
            Insn::PutObjectInt0 => Opcode::PutObjectInt0,
            Insn::PutObjectInt1 => Opcode::PutObjectInt1,
            Insn::Dup => Opcode::Dup,
            Insn::Pop => Opcode::Pop,
            Insn::OptPlus => Opcode::OptPlus,
            Insn::OptMinus => Opcode::OptMinus,
            Insn::OptMult => Opcode::OptMult,
            Insn::OptLt => Opcode::OptLt,
            Insn::Jump { .. } => Opcode::Jump,
            Insn::BranchIf { .. } => Opcode::BranchIf,
            Insn::SendWithoutBlock { .. } => Opcode::SendWithoutBlock,
            Insn::Leave => Opcode::Leave,
        }
    }

    /// Operand word, if the instruction has one.
    fn operand(&self) -> Option<u64> {
        match *self {
            Insn::GetLocal { idx } | Insn::SetLocal { idx } => Some(idx as u64),
            Insn::PutObject(value) => Some(value.raw()),
            Insn::Jump { offset } | Insn::BranchIf { offset } => Some(offset as u64),
            Insn::SendWithoutBlock { call_data } => Some(call_data as u64),
            _ => None,
        }
    }

    /// Append the encoded form of this instruction to `out`.
    pub fn encode_into(&self, out: &mut Vec<u64>) {
        out.push(self.opcode() as u64);
        if let Some(word) = self.operand() {
            out.push(word);
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Insn::PutObject(value) => write!(f, "putobject {}", value),
            Insn::SendWithoutBlock { call_data } => {
                write!(f, "send_without_block <calldata:{}>", call_data)
            }
            insn => match insn.operand() {
                Some(word) if matches!(insn, Insn::Jump { .. } | Insn::BranchIf { .. }) => {
                    write!(f, "{} {}", insn.opcode(), word as i64)
                }
                Some(word) => write!(f, "{} {}", insn.opcode(), word),
                None => write!(f, "{}", insn.opcode()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode {word:#x} at pc {pc}")]
    UnknownOpcode { pc: usize, word: u64 },
    #[error("truncated `{name}` at pc {pc}: needs {len} words, {available} left")]
    Truncated {
        pc: usize,
        name: &'static str,
        len: usize,
        available: usize,
    },
}

/// Decode the instruction starting at `pc`, returning it with its length in words.
pub fn decode(iseq: &[u64], pc: usize) -> Result<(Insn, usize), DecodeError> {
    let word = iseq.get(pc).copied().ok_or(DecodeError::Truncated {
        pc,
        name: "<opcode>",
        len: 1,
        available: 0,
    })?;
    let opcode = Opcode::from_word(word).ok_or(DecodeError::UnknownOpcode { pc, word })?;
    let len = opcode.len();
    let available = iseq.len() - pc;
    if available < len {
        return Err(DecodeError::Truncated {
            pc,
            name: opcode.name(),
            len,
            available,
        });
    }

    let operand = if len > 1 { iseq[pc + 1] } else { 0 };
    let insn = match opcode {
        Opcode::Nop => Insn::Nop,
        Opcode::GetLocal => Insn::GetLocal {
            idx: operand as usize,
        },
        Opcode::SetLocal => Insn::SetLocal {
            idx: operand as usize,
        },
        Opcode::PutNil => Insn::PutNil,
        Opcode::PutSelf => Insn::PutSelf,
        Opcode::PutObject => Insn::PutObject(Value::from_raw(operand)),
        Opcode::PutObjectInt0 => Insn::PutObjectInt0,
        Opcode::PutObjectInt1 => Insn::PutObjectInt1,
        Opcode::Dup => Insn::Dup,
        Opcode::Pop => Insn::Pop,
        Opcode::OptPlus => Insn::OptPlus,
        Opcode::OptMinus => Insn::OptMinus,
        Opcode::OptMult => Insn::OptMult,
        Opcode::OptLt => Insn::OptLt,
        Opcode::Jump => Insn::Jump {
            offset: operand as i64,
        },
        Opcode::BranchIf => Insn::BranchIf {
            offset: operand as i64,
        },
        Opcode::SendWithoutBlock => Insn::SendWithoutBlock {
            call_data: operand as usize,
        },
        Opcode::Leave => Insn::Leave,
    };
    Ok((insn, len))
}

/// Iterator over `(pc, insn)` pairs of an instruction stream.
///
/// Stops after the first decode error.
pub struct InsnIter<'a> {
    iseq: &'a [u64],
    pc: usize,
    failed: bool,
}

impl<'a> InsnIter<'a> {
    pub fn new(iseq: &'a [u64]) -> Self {
        Self {
            iseq,
            pc: 0,
            failed: false,
        }
    }
}

impl Iterator for InsnIter<'_> {
    type Item = Result<(usize, Insn), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pc >= self.iseq.len() {
            return None;
        }
        match decode(self.iseq, self.pc) {
            Ok((insn, len)) => {
                let pc = self.pc;
                self.pc += len;
                Some(Ok((pc, insn)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
