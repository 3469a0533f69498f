//! Method compiler: bytecode to x86-64.
//!
//! Compilation is template based and single pass. The operand stack of the
//! bytecode is never materialized in memory; stack slot `i` lives in
//! [`regs::STACK`]`[i]` and the compiler only tracks the current height.
//! Callees are compiled depth-first before the call site that needs their
//! address, so every call is to already placed code.

use super::asm::{Assembler, Opnd};
use super::codeblock::{CodeBlock, CodePtr};
use super::error::{JitError, JitResult};
use super::x86_64::Reg;
use crate::vm::{
    CONTEXT_LAYOUT, FRAME_LAYOUT, Insn, Method, MethodId, Program, Value, WORD_SIZE,
};
use crate::vm::frame::ENV_HEADER;

/// Register conventions for generated code.
///
/// - R12: execution context pointer, shared by every compiled method
/// - R13: current control frame pointer
/// - R8-R11: operand stack slots 0-3
/// - RAX: return value
/// - RCX, RDX: scratch
pub mod regs {
    use super::Reg;

    pub const EC: Reg = Reg::R12;
    pub const CFP: Reg = Reg::R13;
    pub const RET: Reg = Reg::Rax;

    pub const STACK: [Reg; 4] = [Reg::R8, Reg::R9, Reg::R10, Reg::R11];

    // Temporaries
    pub const TMP0: Reg = Reg::Rcx;
    pub const TMP1: Reg = Reg::Rdx;
}

/// Operand stack mapped onto [`regs::STACK`].
#[derive(Debug, Default)]
struct RegStack {
    height: usize,
}

impl RegStack {
    fn push(&mut self) -> Option<Reg> {
        let reg = *regs::STACK.get(self.height)?;
        self.height += 1;
        Some(reg)
    }

    fn pop(&mut self) -> Option<Reg> {
        self.height = self.height.checked_sub(1)?;
        Some(regs::STACK[self.height])
    }

    fn top(&self) -> Option<Reg> {
        regs::STACK.get(self.height.checked_sub(1)?).copied()
    }

    /// Register `depth` slots below the top (0 = top).
    fn peek(&self, depth: usize) -> Option<Reg> {
        let idx = self.height.checked_sub(depth + 1)?;
        regs::STACK.get(idx).copied()
    }
}

/// Per-method code generation state.
struct MethodCtx<'m> {
    method: &'m Method,
    asm: Assembler,
    stack: RegStack,
    pc: usize,
}

impl MethodCtx<'_> {
    fn overflow(&self) -> JitError {
        JitError::StackOverflow {
            method: self.method.name().to_string(),
            pc: self.pc,
            max: regs::STACK.len(),
        }
    }

    fn underflow(&self, insn: &Insn) -> JitError {
        JitError::StackUnderflow {
            method: self.method.name().to_string(),
            pc: self.pc,
            insn: insn.opcode().name(),
        }
    }

    fn push(&mut self) -> JitResult<Reg> {
        self.stack.push().ok_or_else(|| self.overflow())
    }

    fn pop(&mut self, insn: &Insn) -> JitResult<Reg> {
        self.stack.pop().ok_or_else(|| self.underflow(insn))
    }

    /// Pop the right operand and return `(left, right)`; the result goes in `left`.
    fn binary_operands(&mut self, insn: &Insn) -> JitResult<(Reg, Reg)> {
        let rhs = self.pop(insn)?;
        let lhs = self.stack.top().ok_or_else(|| self.underflow(insn))?;
        Ok((lhs, rhs))
    }
}

/// Compiles methods of one [`Program`] into a [`CodeBlock`].
pub struct MethodCompiler<'a> {
    program: &'a Program,
    code: &'a mut CodeBlock,
    max_depth: usize,
    /// Methods currently being compiled, outermost first.
    active: Vec<MethodId>,
}

impl<'a> MethodCompiler<'a> {
    pub fn new(program: &'a Program, code: &'a mut CodeBlock, max_depth: usize) -> Self {
        Self {
            program,
            code,
            max_depth,
            active: Vec::new(),
        }
    }

    fn method(&self, id: MethodId) -> JitResult<&'a Method> {
        self.program.method(id).ok_or(JitError::UnknownMethod(id))
    }

    /// Return the entry point of `id`, compiling it and any uncompiled
    /// callees first.
    pub fn compile(&mut self, id: MethodId) -> JitResult<CodePtr> {
        let method = self.method(id)?;
        match method.jit_entry() {
            Some(entry) => self.owned(method, entry),
            None => self.compile_uncached(id),
        }
    }

    /// Entries installed by another compiler's block cannot be called from here.
    fn owned(&self, method: &Method, entry: CodePtr) -> JitResult<CodePtr> {
        if self.code.contains(entry) {
            Ok(entry)
        } else {
            Err(JitError::ForeignEntry {
                method: method.name().to_string(),
            })
        }
    }

    /// Generate and place code for `id` even if it already has an entry.
    ///
    /// The entry slot keeps its first value; the returned pointer is the
    /// installed entry, which is not necessarily the code just placed.
    pub fn compile_uncached(&mut self, id: MethodId) -> JitResult<CodePtr> {
        let method = self.method(id)?;
        if self.active.contains(&id) {
            let caller = self
                .active
                .last()
                .and_then(|&c| self.program.method(c))
                .map_or("?", |m| m.name());
            return Err(JitError::RecursiveCall {
                caller: caller.to_string(),
                callee: method.name().to_string(),
            });
        }
        if self.active.len() >= self.max_depth {
            return Err(JitError::CompileDepthExceeded {
                limit: self.max_depth,
            });
        }

        self.active.push(id);
        let generated = self.gen_method(method);
        self.active.pop();
        let asm = generated?;

        let before = self.code.used();
        let placed = self.code.place(&asm)?;
        let entry = method.install_jit_entry(placed);
        tracing::debug!(
            "[JIT] compiled `{}` ({} insns, {} bytes at {})",
            method.name(),
            asm.len(),
            self.code.used() - before,
            placed
        );
        self.owned(method, entry)
    }

    fn gen_method(&mut self, method: &'a Method) -> JitResult<Assembler> {
        let mut ctx = MethodCtx {
            method,
            asm: Assembler::new(),
            stack: RegStack::default(),
            pc: 0,
        };
        let mut returns = false;

        for item in method.insns() {
            let (pc, insn) = item.map_err(|source| JitError::Decode {
                method: method.name().to_string(),
                source,
            })?;
            ctx.pc = pc;
            returns = matches!(insn, Insn::Leave);
            self.gen_insn(&mut ctx, insn)?;
        }

        if !returns {
            return Err(JitError::MissingReturn {
                method: method.name().to_string(),
            });
        }
        Ok(ctx.asm)
    }

    fn gen_insn(&mut self, ctx: &mut MethodCtx<'a>, insn: Insn) -> JitResult<()> {
        match insn {
            Insn::Nop => {}
            Insn::GetLocal { idx } => Self::emit_getlocal(ctx, idx)?,
            Insn::PutNil => Self::emit_push_imm(ctx, Value::NIL)?,
            Insn::PutSelf => {
                let dst = ctx.push()?;
                ctx.asm.mov(dst, Opnd::mem(regs::CFP, FRAME_LAYOUT.self_value));
            }
            Insn::PutObject(value) => Self::emit_push_imm(ctx, value)?,
            Insn::PutObjectInt0 => Self::emit_push_imm(ctx, Value::fixnum(0))?,
            Insn::PutObjectInt1 => Self::emit_push_imm(ctx, Value::fixnum(1))?,
            Insn::Dup => {
                let src = ctx.stack.top().ok_or_else(|| ctx.underflow(&insn))?;
                let dst = ctx.push()?;
                ctx.asm.mov(dst, src);
            }
            Insn::Pop => {
                ctx.pop(&insn)?;
            }
            Insn::OptPlus => {
                let (lhs, rhs) = ctx.binary_operands(&insn)?;
                ctx.asm.add(lhs, rhs);
                ctx.asm.sub(lhs, Opnd::imm(1));
            }
            Insn::OptMinus => {
                let (lhs, rhs) = ctx.binary_operands(&insn)?;
                ctx.asm.sub(lhs, rhs);
                ctx.asm.add(lhs, Opnd::imm(1));
            }
            Insn::OptLt => {
                let (lhs, rhs) = ctx.binary_operands(&insn)?;
                Self::emit_lt(ctx, lhs, rhs);
            }
            Insn::SendWithoutBlock { call_data } => self.emit_send(ctx, &insn, call_data)?,
            Insn::Leave => {
                let top = ctx.pop(&insn)?;
                Self::emit_leave(ctx, top);
            }
            Insn::SetLocal { .. }
            | Insn::OptMult
            | Insn::Jump { .. }
            | Insn::BranchIf { .. } => {
                return Err(JitError::Unsupported {
                    method: ctx.method.name().to_string(),
                    pc: ctx.pc,
                    insn: insn.opcode().name(),
                });
            }
        }
        Ok(())
    }

    fn emit_push_imm(ctx: &mut MethodCtx, value: Value) -> JitResult<()> {
        let dst = ctx.push()?;
        ctx.asm.mov(dst, Opnd::Imm(value.raw() as i64));
        Ok(())
    }

    /// Local `idx` is at `ep - idx * WORD_SIZE`.
    fn emit_getlocal(ctx: &mut MethodCtx, idx: usize) -> JitResult<()> {
        let num_locals = ctx.method.num_locals();
        let disp = i32::try_from(idx)
            .ok()
            .filter(|_| (1..=num_locals).contains(&idx))
            .and_then(|idx| idx.checked_mul(-WORD_SIZE))
            .ok_or_else(|| JitError::BadLocal {
                method: ctx.method.name().to_string(),
                pc: ctx.pc,
                idx,
                num_locals,
            })?;

        let dst = ctx.push()?;
        ctx.asm.mov(regs::TMP0, Opnd::mem(regs::CFP, FRAME_LAYOUT.ep));
        ctx.asm.mov(dst, Opnd::mem(regs::TMP0, disp));
        Ok(())
    }

    /// `lhs = lhs < rhs ? true : false`, without branches.
    fn emit_lt(ctx: &mut MethodCtx, lhs: Reg, rhs: Reg) {
        ctx.asm.mov(regs::RET, Opnd::Imm(Value::FALSE.raw() as i64));
        ctx.asm.mov(regs::TMP0, Opnd::Imm(Value::TRUE.raw() as i64));
        ctx.asm.cmp(lhs, rhs);
        ctx.asm.cmovl(regs::RET, regs::TMP0);
        ctx.asm.mov(lhs, regs::RET);
    }

    fn emit_leave(ctx: &mut MethodCtx, top: Reg) {
        ctx.asm.add(regs::CFP, Opnd::imm(FRAME_LAYOUT.size));
        ctx.asm.mov(Opnd::mem(regs::EC, CONTEXT_LAYOUT.cfp), regs::CFP);
        ctx.asm.mov(regs::RET, top);
        ctx.asm.ret();
    }

    /// Call with the receiver and `argc` arguments on top of the stack.
    ///
    /// Arguments are stored at the caller's `sp`, followed by the env header;
    /// the callee frame gets `ep` pointing at the header and `sp` just above.
    fn emit_send(&mut self, ctx: &mut MethodCtx<'a>, insn: &Insn, idx: usize) -> JitResult<()> {
        let cd = *ctx
            .method
            .call_data(idx)
            .ok_or_else(|| JitError::BadCallData {
                method: ctx.method.name().to_string(),
                idx,
            })?;
        let callee = self.method(cd.callee)?;
        if cd.argc != callee.num_locals() {
            return Err(JitError::ArityMismatch {
                callee: callee.name().to_string(),
                expected: callee.num_locals(),
                got: cd.argc,
            });
        }
        let recv = ctx.stack.peek(cd.argc).ok_or_else(|| ctx.underflow(insn))?;
        let args: Vec<Reg> = (0..cd.argc)
            .rev()
            .filter_map(|depth| ctx.stack.peek(depth))
            .collect();

        let entry = self.compile(cd.callee)?;

        let word = WORD_SIZE as i64;
        let env_offset = cd.argc as i64 * word;
        let asm = &mut ctx.asm;

        asm.mov(regs::TMP0, Opnd::mem(regs::CFP, FRAME_LAYOUT.sp));
        for (i, &arg) in args.iter().enumerate() {
            asm.mov(Opnd::mem(regs::TMP0, i as i32 * WORD_SIZE), arg);
        }
        asm.mov(
            Opnd::mem(regs::TMP0, env_offset as i32),
            Opnd::Imm(ENV_HEADER as i64),
        );
        asm.mov(regs::TMP1, regs::TMP0);
        if env_offset != 0 {
            asm.add(regs::TMP1, Opnd::Imm(env_offset));
        }

        // push the callee frame
        asm.sub(regs::CFP, Opnd::imm(FRAME_LAYOUT.size));
        asm.mov(Opnd::mem(regs::CFP, FRAME_LAYOUT.self_value), recv);
        asm.mov(Opnd::mem(regs::CFP, FRAME_LAYOUT.ep), regs::TMP1);
        asm.add(regs::TMP1, Opnd::Imm(word));
        asm.mov(Opnd::mem(regs::CFP, FRAME_LAYOUT.sp), regs::TMP1);
        asm.mov(
            Opnd::mem(regs::CFP, FRAME_LAYOUT.method),
            Opnd::Imm(cd.callee.0 as i64),
        );
        asm.mov(Opnd::mem(regs::EC, CONTEXT_LAYOUT.cfp), regs::CFP);

        for reg in regs::STACK {
            asm.push(reg);
        }
        asm.call(Opnd::Imm(entry.raw_addr() as i64));
        for reg in regs::STACK.into_iter().rev() {
            asm.pop(reg);
        }
        asm.mov(recv, regs::RET);

        ctx.stack.height -= cd.argc;
        Ok(())
    }
}
