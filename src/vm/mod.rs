//! Runtime model the compiled code runs against: tagged values, the
//! instruction stream, method descriptors, the frame ABI and a reference
//! interpreter.

pub mod bytecode;
pub mod frame;
pub mod interp;
mod method;
mod value;

pub use bytecode::{DecodeError, Insn, InsnIter, Opcode};
pub use frame::{
    CONTEXT_LAYOUT, ControlFrame, ExecutionContext, FRAME_LAYOUT, FrameLayout, VmStack, WORD_SIZE,
};
pub use interp::{InterpError, Interpreter};
pub use method::{CallData, Method, MethodBuilder, MethodId, Program};
pub use value::Value;
