//! Program files.
//!
//! A program is a TOML document naming an entry method and listing methods
//! with their bodies in mnemonic form:
//!
//! ```toml
//! entry = "main"
//! args = [40]
//!
//! [[methods]]
//! name = "add2"
//! locals = 1
//! body = ["getlocal 1", "putobject 2", "opt_plus", "leave"]
//!
//! [[methods]]
//! name = "main"
//! locals = 1
//! body = ["putself", "getlocal 1", "send add2 1", "leave"]
//! ```
//!
//! `send <callee> <argc>` refers to callees by name, in any order.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::vm::{Insn, MethodBuilder, MethodId, Opcode, Program, Value};

#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse program: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("method `{0}` is defined twice")]
    DuplicateMethod(String),
    #[error("entry method `{0}` is not defined")]
    UnknownEntry(String),
    #[error("{method}:{line}: {message}")]
    Body {
        method: String,
        line: usize,
        message: String,
    },
    #[error("integer {0} does not fit in a fixnum")]
    FixnumRange(i64),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProgramFile {
    entry: String,
    #[serde(default)]
    receiver: Option<i64>,
    #[serde(default)]
    args: Vec<i64>,
    methods: Vec<MethodDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MethodDef {
    name: String,
    #[serde(default)]
    locals: usize,
    body: Vec<String>,
}

/// A parsed program together with how to enter it.
#[derive(Debug)]
pub struct LoadedProgram {
    pub program: Program,
    pub entry: MethodId,
    pub receiver: Value,
    pub args: Vec<Value>,
}

pub fn load(path: &Path) -> Result<LoadedProgram, ProgramError> {
    let source = fs::read_to_string(path).map_err(|source| ProgramError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&source)
}

pub fn parse(source: &str) -> Result<LoadedProgram, ProgramError> {
    let file: ProgramFile = toml::from_str(source)?;

    let mut ids = HashMap::new();
    for (i, def) in file.methods.iter().enumerate() {
        if ids.insert(def.name.as_str(), MethodId(i)).is_some() {
            return Err(ProgramError::DuplicateMethod(def.name.clone()));
        }
    }

    let mut program = Program::new();
    for def in &file.methods {
        let mut builder = MethodBuilder::new(def.name.as_str(), def.locals);
        for (i, line) in def.body.iter().enumerate() {
            parse_line(&mut builder, line, &ids).map_err(|message| ProgramError::Body {
                method: def.name.clone(),
                line: i + 1,
                message,
            })?;
        }
        program.add(builder.build());
    }

    let entry = *ids
        .get(file.entry.as_str())
        .ok_or_else(|| ProgramError::UnknownEntry(file.entry.clone()))?;
    let receiver = match file.receiver {
        Some(n) => fixnum(n)?,
        None => Value::NIL,
    };
    let args = file.args.into_iter().map(fixnum).collect::<Result<Vec<_>, ProgramError>>()?;

    Ok(LoadedProgram {
        program,
        entry,
        receiver,
        args,
    })
}

fn fixnum(n: i64) -> Result<Value, ProgramError> {
    Value::try_fixnum(n).ok_or(ProgramError::FixnumRange(n))
}

/// Parse a `putobject` literal: an integer, `nil`, `true` or `false`.
pub fn parse_literal(text: &str) -> Result<Value, String> {
    match text {
        "nil" => Ok(Value::NIL),
        "true" => Ok(Value::TRUE),
        "false" => Ok(Value::FALSE),
        _ => {
            let n: i64 = text
                .parse()
                .map_err(|_| format!("invalid literal `{}`", text))?;
            Value::try_fixnum(n).ok_or_else(|| format!("integer {} does not fit in a fixnum", n))
        }
    }
}

fn parse_line(
    builder: &mut MethodBuilder,
    line: &str,
    ids: &HashMap<&str, MethodId>,
) -> Result<(), String> {
    let code = line.split('#').next().unwrap_or_default();
    let mut words = code.split_whitespace();
    let Some(mnemonic) = words.next() else {
        return Ok(());
    };
    let operands: Vec<&str> = words.collect();

    let expect = |n: usize| {
        if operands.len() == n {
            Ok(())
        } else {
            Err(format!(
                "`{}` takes {} operand(s), {} given",
                mnemonic,
                n,
                operands.len()
            ))
        }
    };
    let number = |text: &str| -> Result<i64, String> {
        text.parse()
            .map_err(|_| format!("invalid number `{}` for `{}`", text, mnemonic))
    };
    let index = |text: &str| -> Result<usize, String> {
        text.parse()
            .map_err(|_| format!("invalid index `{}` for `{}`", text, mnemonic))
    };

    let opcode = match mnemonic {
        "send" => Opcode::SendWithoutBlock,
        _ => Opcode::from_name(mnemonic).ok_or_else(|| format!("unknown instruction `{}`", mnemonic))?,
    };
    // sends name the callee and argc instead of a call-data index
    let arity = match opcode {
        Opcode::SendWithoutBlock => 2,
        _ => opcode.len() - 1,
    };
    expect(arity)?;

    let insn = match opcode {
        Opcode::Nop => Insn::Nop,
        Opcode::GetLocal => Insn::GetLocal {
            idx: index(operands[0])?,
        },
        Opcode::SetLocal => Insn::SetLocal {
            idx: index(operands[0])?,
        },
        Opcode::PutNil => Insn::PutNil,
        Opcode::PutSelf => Insn::PutSelf,
        Opcode::PutObject => Insn::PutObject(parse_literal(operands[0])?),
        Opcode::PutObjectInt0 => Insn::PutObjectInt0,
        Opcode::PutObjectInt1 => Insn::PutObjectInt1,
        Opcode::Dup => Insn::Dup,
        Opcode::Pop => Insn::Pop,
        Opcode::OptPlus => Insn::OptPlus,
        Opcode::OptMinus => Insn::OptMinus,
        Opcode::OptMult => Insn::OptMult,
        Opcode::OptLt => Insn::OptLt,
        Opcode::Jump => Insn::Jump {
            offset: number(operands[0])?,
        },
        Opcode::BranchIf => Insn::BranchIf {
            offset: number(operands[0])?,
        },
        Opcode::SendWithoutBlock => {
            let callee = *ids
                .get(operands[0])
                .ok_or_else(|| format!("unknown method `{}`", operands[0]))?;
            builder.send(callee, index(operands[1])?);
            return Ok(());
        }
        Opcode::Leave => Insn::Leave,
    };
    builder.insn(insn);
    Ok(())
}
