//! Reference interpreter.
//!
//! Executes an instruction stream one instruction at a time against a plain
//! value stack. It runs every opcode in the table, including the ones the
//! JIT rejects, and serves as the oracle compiled code is checked against.

use super::bytecode::{DecodeError, Insn, decode};
use super::method::{MethodId, Program};
use super::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unknown method {0}")]
    UnknownMethod(MethodId),
    #[error("stack underflow in `{method}` at pc {pc}")]
    StackUnderflow { method: String, pc: usize },
    #[error("`{insn}` expects fixnum operands, got {value:?}")]
    NotFixnum { insn: &'static str, value: Value },
    #[error("local {idx} out of range in `{method}` at pc {pc}")]
    BadLocal { method: String, pc: usize, idx: usize },
    #[error("call data {idx} out of range in `{method}`")]
    BadCallData { method: String, idx: usize },
    #[error("`{callee}` takes {expected} arguments, {got} given")]
    ArityMismatch {
        callee: String,
        expected: usize,
        got: usize,
    },
    #[error("jump to {target} out of range in `{method}` at pc {pc}")]
    JumpOutOfRange { method: String, pc: usize, target: i64 },
    #[error("`{method}` ran off the end of its instruction stream")]
    MissingReturn { method: String },
    #[error("call depth exceeded {0}")]
    CallDepthExceeded(usize),
    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),
}

pub type InterpResult<T> = Result<T, InterpError>;

pub struct Interpreter<'p> {
    program: &'p Program,
    max_depth: usize,
    step_limit: u64,
    steps: u64,
    depth: usize,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            max_depth: 1024,
            step_limit: 10_000_000,
            steps: 0,
            depth: 0,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_step_limit(mut self, step_limit: u64) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Invoke `id` on `self_value` with `args` and return its result.
    pub fn call(&mut self, id: MethodId, self_value: Value, args: &[Value]) -> InterpResult<Value> {
        if self.depth >= self.max_depth {
            return Err(InterpError::CallDepthExceeded(self.max_depth));
        }
        self.depth += 1;
        let result = self.run_method(id, self_value, args);
        self.depth -= 1;
        result
    }

    fn run_method(&mut self, id: MethodId, self_value: Value, args: &[Value]) -> InterpResult<Value> {
        let program = self.program;
        let method = program.method(id).ok_or(InterpError::UnknownMethod(id))?;
        if args.len() != method.num_locals() {
            return Err(InterpError::ArityMismatch {
                callee: method.name().to_string(),
                expected: method.num_locals(),
                got: args.len(),
            });
        }

        let mut locals = args.to_vec();
        let mut stack: Vec<Value> = Vec::with_capacity(8);
        let iseq = method.iseq();
        let mut pc = 0;

        let underflow = |pc| InterpError::StackUnderflow {
            method: method.name().to_string(),
            pc,
        };
        // `getlocal idx` reads ep[-idx]; the last argument sits right below ep.
        let local_slot = |idx: usize, pc| {
            if idx == 0 || idx > method.num_locals() {
                Err(InterpError::BadLocal {
                    method: method.name().to_string(),
                    pc,
                    idx,
                })
            } else {
                Ok(method.num_locals() - idx)
            }
        };

        while pc < iseq.len() {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(InterpError::StepLimit(self.step_limit));
            }

            let (insn, len) = decode(iseq, pc)?;
            let next_pc = pc + len;
            match insn {
                Insn::Nop => {}
                Insn::GetLocal { idx } => {
                    let slot = local_slot(idx, pc)?;
                    stack.push(locals[slot]);
                }
                Insn::SetLocal { idx } => {
                    let slot = local_slot(idx, pc)?;
                    locals[slot] = stack.pop().ok_or_else(|| underflow(pc))?;
                }
                Insn::PutNil => stack.push(Value::NIL),
                Insn::PutSelf => stack.push(self_value),
                Insn::PutObject(value) => stack.push(value),
                Insn::PutObjectInt0 => stack.push(Value::fixnum(0)),
                Insn::PutObjectInt1 => stack.push(Value::fixnum(1)),
                Insn::Dup => {
                    let top = stack.last().copied().ok_or_else(|| underflow(pc))?;
                    stack.push(top);
                }
                Insn::Pop => {
                    stack.pop().ok_or_else(|| underflow(pc))?;
                }
                Insn::OptPlus | Insn::OptMinus | Insn::OptMult | Insn::OptLt => {
                    let b = stack.pop().ok_or_else(|| underflow(pc))?;
                    let a = stack.pop().ok_or_else(|| underflow(pc))?;
                    stack.push(binary_op(insn, a, b)?);
                }
                Insn::Jump { offset } => {
                    pc = self.jump_target(method.name(), iseq.len(), pc, next_pc, offset)?;
                    continue;
                }
                Insn::BranchIf { offset } => {
                    let cond = stack.pop().ok_or_else(|| underflow(pc))?;
                    if cond.is_truthy() {
                        pc = self.jump_target(method.name(), iseq.len(), pc, next_pc, offset)?;
                        continue;
                    }
                }
                Insn::SendWithoutBlock { call_data } => {
                    let cd = *method.call_data(call_data).ok_or_else(|| {
                        InterpError::BadCallData {
                            method: method.name().to_string(),
                            idx: call_data,
                        }
                    })?;
                    if stack.len() < cd.argc + 1 {
                        return Err(underflow(pc));
                    }
                    let args = stack.split_off(stack.len() - cd.argc);
                    let recv = stack.pop().ok_or_else(|| underflow(pc))?;
                    let result = self.call(cd.callee, recv, &args)?;
                    stack.push(result);
                }
                Insn::Leave => {
                    return stack.pop().ok_or_else(|| underflow(pc));
                }
            }
            pc = next_pc;
        }

        Err(InterpError::MissingReturn {
            method: method.name().to_string(),
        })
    }

    fn jump_target(
        &self,
        method: &str,
        len: usize,
        pc: usize,
        next_pc: usize,
        offset: i64,
    ) -> InterpResult<usize> {
        let target = next_pc as i64 + offset;
        if target < 0 || target as usize >= len {
            return Err(InterpError::JumpOutOfRange {
                method: method.to_string(),
                pc,
                target,
            });
        }
        Ok(target as usize)
    }
}

fn binary_op(insn: Insn, a: Value, b: Value) -> InterpResult<Value> {
    let (Some(x), Some(y)) = (a.as_fixnum(), b.as_fixnum()) else {
        let value = if a.is_fixnum() { b } else { a };
        return Err(InterpError::NotFixnum {
            insn: insn.opcode().name(),
            value,
        });
    };
    Ok(match insn {
        Insn::OptPlus => a.tagged_add(b),
        Insn::OptMinus => a.tagged_sub(b),
        Insn::OptLt => a.tagged_lt(b),
        _ => Value::fixnum(x.wrapping_mul(y)),
    })
}
