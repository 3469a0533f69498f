//! stackjit - a method-at-a-time x86-64 JIT for a small stack bytecode
//!
//! The library provides the runtime model compiled code runs against
//! ([`vm`]), the compiler and its code buffer ([`jit`]), configuration and a
//! loader for textual program files.

pub mod config;
pub mod jit;
pub mod logging;
pub mod program;
pub mod vm;

// Re-export commonly used types
pub use config::{DisasmFormat, JitConfig, JitMode};
pub use jit::{CodePtr, Jit, JitError};
pub use vm::{Interpreter, MethodBuilder, MethodId, Program, Value};
