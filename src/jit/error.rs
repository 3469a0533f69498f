use super::asm::AsmError;
use super::memory::MemoryError;
use crate::vm::{DecodeError, MethodId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JitError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Asm(#[from] AsmError),
    #[error("in `{method}`: {source}")]
    Decode { method: String, source: DecodeError },
    #[error("code buffer full: {needed} bytes needed, {available} available")]
    CodeBufferFull { needed: usize, available: usize },
    #[error("`{insn}` at pc {pc} in `{method}` is not supported by the JIT")]
    Unsupported {
        method: String,
        pc: usize,
        insn: &'static str,
    },
    #[error("stack height exceeds {max} registers at pc {pc} in `{method}`")]
    StackOverflow {
        method: String,
        pc: usize,
        max: usize,
    },
    #[error("`{insn}` at pc {pc} in `{method}` pops from an empty stack")]
    StackUnderflow {
        method: String,
        pc: usize,
        insn: &'static str,
    },
    #[error("local {idx} out of range at pc {pc} in `{method}` ({num_locals} locals)")]
    BadLocal {
        method: String,
        pc: usize,
        idx: usize,
        num_locals: usize,
    },
    #[error("call data {idx} out of range in `{method}`")]
    BadCallData { method: String, idx: usize },
    #[error("unknown method {0}")]
    UnknownMethod(MethodId),
    #[error("`{callee}` takes {expected} arguments, {got} given")]
    ArityMismatch {
        callee: String,
        expected: usize,
        got: usize,
    },
    #[error("`{method}` has no `leave` at the end of its instruction stream")]
    MissingReturn { method: String },
    #[error("`{callee}` is already being compiled (recursive call from `{caller}`)")]
    RecursiveCall { caller: String, callee: String },
    #[error("callee compilation nested deeper than {limit}")]
    CompileDepthExceeded { limit: usize },
    #[error("`{method}` is compiled into a different code block")]
    ForeignEntry { method: String },
    #[error("native code execution is not supported on this platform")]
    PlatformUnsupported,
    #[error("value or frame stack exhausted before entering `{method}`")]
    StackExhausted { method: String },
    #[error("frame pointer not restored after returning from `{method}`")]
    FrameMismatch { method: String },
}

pub type JitResult<T> = Result<T, JitError>;
