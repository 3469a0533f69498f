//! JIT compilation for the stack bytecode.
//!
//! This module provides:
//! - Executable memory allocation with W^X toggling
//! - x86-64 instruction encoding and an abstract assembler on top of it
//! - The shared code block compiled methods are placed in
//! - The method compiler and the [`Jit`] facade that runs its output

mod asm;
mod codebuf;
mod codeblock;
mod compiler;
mod disasm;
mod error;
mod memory;
pub mod x86_64;

use std::io;

pub use asm::{AsmError, Assembler, Insn as AsmInsn, Opnd};
pub use codeblock::{CodeBlock, CodePtr};
pub use compiler::{MethodCompiler, regs};
pub use disasm::{DisasmLine, Disassembler, X86Disassembler, render as render_disasm};
pub use error::{JitError, JitResult};
pub use memory::{ExecutableMemory, MemoryError};

use crate::config::JitConfig;
use crate::vm::{ControlFrame, ExecutionContext, MethodId, Program, Value, VmStack};

/// Signature of the entry trampoline.
#[cfg(all(target_arch = "x86_64", unix))]
type EntryFn = unsafe extern "C" fn(*mut ExecutionContext, *mut ControlFrame, *const u8) -> u64;

/// Whether generated code can run on this platform.
pub const fn is_supported() -> bool {
    cfg!(all(target_arch = "x86_64", unix))
}

/// Glue from the native calling convention into generated code:
/// `entry(ec, cfp, code)` loads the reserved registers and calls `code`.
fn entry_trampoline() -> Assembler {
    use x86_64::Reg;

    let mut asm = Assembler::new();
    asm.push(regs::EC);
    asm.push(regs::CFP);
    asm.mov(regs::EC, Reg::Rdi);
    asm.mov(regs::CFP, Reg::Rsi);
    asm.call(Reg::Rdx);
    asm.pop(regs::CFP);
    asm.pop(regs::EC);
    asm.ret();
    asm
}

/// The JIT: one code block shared by every compiled method.
pub struct Jit {
    code: CodeBlock,
    config: JitConfig,
    trampoline: CodePtr,
}

impl Jit {
    /// Create a JIT whose disassembly dump, if enabled, goes to stderr.
    pub fn new(config: JitConfig) -> JitResult<Self> {
        Self::with_disasm_sink(config, Box::new(io::stderr()))
    }

    /// Create a JIT that writes its disassembly dump to `sink`.
    pub fn with_disasm_sink(config: JitConfig, sink: Box<dyn io::Write>) -> JitResult<Self> {
        let mut code = CodeBlock::new(config.code_buffer_size)?;
        if config.dump_disasm {
            code.set_disasm_dump(config.disasm_format, sink);
        }
        let trampoline = code.place(&entry_trampoline())?;
        if config.trace_jit {
            tracing::info!(
                "[JIT] code block ready: {} bytes, trampoline at {}",
                code.capacity(),
                trampoline
            );
        }
        Ok(Self {
            code,
            config,
            trampoline,
        })
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn code_block(&self) -> &CodeBlock {
        &self.code
    }

    /// Compile `id` (and its uncompiled callees) if it has no entry yet.
    pub fn compile(&mut self, program: &Program, id: MethodId) -> JitResult<CodePtr> {
        let before = self.code.used();
        let entry = MethodCompiler::new(program, &mut self.code, self.config.max_compile_depth)
            .compile(id)?;
        self.trace_compiled(program, id, entry, self.code.used() - before);
        Ok(entry)
    }

    /// Place fresh code for `id` even if it is already compiled. The
    /// method's entry stays the one installed first.
    pub fn recompile(&mut self, program: &Program, id: MethodId) -> JitResult<CodePtr> {
        MethodCompiler::new(program, &mut self.code, self.config.max_compile_depth)
            .compile_uncached(id)
    }

    /// Compile `id` or abort the process.
    ///
    /// A method that fails to compile is never installed, and there is no
    /// fallback once compilation has been attempted.
    pub fn compile_or_abort(&mut self, program: &Program, id: MethodId) -> CodePtr {
        match self.compile(program, id) {
            Ok(entry) => entry,
            Err(err) => {
                let name = program.method(id).map_or("?", |m| m.name());
                tracing::error!("[JIT] failed to compile `{}`: {}", name, err);
                eprintln!("fatal: failed to compile `{}`: {}", name, err);
                std::process::abort();
            }
        }
    }

    /// Run `id` natively on `self_value` with `args`, compiling it first if
    /// needed.
    pub fn execute(
        &mut self,
        program: &Program,
        id: MethodId,
        self_value: Value,
        args: &[Value],
    ) -> JitResult<Value> {
        let method = program.method(id).ok_or(JitError::UnknownMethod(id))?;
        if args.len() != method.num_locals() {
            return Err(JitError::ArityMismatch {
                callee: method.name().to_string(),
                expected: method.num_locals(),
                got: args.len(),
            });
        }
        if !is_supported() {
            return Err(JitError::PlatformUnsupported);
        }
        let entry = self.compile(program, id)?;

        // without recursion no call chain is longer than the method table
        let mut stack = VmStack::for_depth(program.len(), args.len());
        let root = stack.root_frame();
        let cfp = stack
            .push_frame(self_value, args, id)
            .ok_or_else(|| JitError::StackExhausted {
                method: method.name().to_string(),
            })?;
        let ec = stack.ec_ptr();

        // SAFETY: `ec` and `cfp` point into `stack`, which outlives the call
        // and is sized for the deepest possible call chain; `entry` is code
        // placed by `self.code`, which follows the register conventions in
        // `regs`.
        let raw = unsafe { self.enter(ec, cfp, entry) }?;

        if stack.cfp() != root {
            return Err(JitError::FrameMismatch {
                method: method.name().to_string(),
            });
        }
        let result = Value::from_raw(raw);
        if self.config.trace_jit {
            tracing::info!("[JIT] executed `{}`, result: {}", method.name(), result);
        }
        Ok(result)
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    unsafe fn enter(
        &self,
        ec: *mut ExecutionContext,
        cfp: *mut ControlFrame,
        entry: CodePtr,
    ) -> JitResult<u64> {
        // SAFETY: the trampoline was placed by `new` and has this signature.
        let trampoline: EntryFn =
            unsafe { std::mem::transmute::<*const u8, EntryFn>(self.trampoline.as_ptr()) };
        Ok(unsafe { trampoline(ec, cfp, entry.as_ptr()) })
    }

    #[cfg(not(all(target_arch = "x86_64", unix)))]
    unsafe fn enter(
        &self,
        _ec: *mut ExecutionContext,
        _cfp: *mut ControlFrame,
        _entry: CodePtr,
    ) -> JitResult<u64> {
        Err(JitError::PlatformUnsupported)
    }

    fn trace_compiled(&self, program: &Program, id: MethodId, entry: CodePtr, bytes: usize) {
        if !self.config.trace_jit || bytes == 0 {
            return;
        }
        let name = program.method(id).map_or("?", |m| m.name());
        tracing::info!(
            "[JIT] compiled '{}' at {} ({} bytes incl. callees, {} left)",
            name,
            entry,
            bytes,
            self.code.remaining()
        );
    }
}

impl std::fmt::Debug for Jit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jit")
            .field("code", &self.code)
            .field("config", &self.config)
            .field("trampoline", &self.trampoline)
            .finish()
    }
}
