//! Execution context and control frame layout shared with generated code.
//!
//! Generated code addresses these structs only through the offsets in
//! [`FRAME_LAYOUT`] and [`CONTEXT_LAYOUT`], so the layout contract is checked
//! here rather than implied by constants scattered through the compiler.
//!
//! Stack picture for a frame entered with two arguments:
//!
//! ```text
//!   caller sp -> [arg0][arg1][env header][callee operand area ...]
//!                              ^ ep        ^ callee sp
//! ```
//!
//! Local `idx` (1-based) lives at `ep[-idx]`. Frames grow downward: pushing
//! a frame subtracts `FRAME_LAYOUT.size` from the frame pointer.

use std::mem::{offset_of, size_of};
use std::ptr;

use super::method::MethodId;
use super::value::Value;

pub const WORD_SIZE: i32 = size_of::<u64>() as i32;

/// Value of the environment header word.
pub const ENV_HEADER: u64 = 0;

/// Process-wide interpreter state.
#[repr(C)]
#[derive(Debug)]
pub struct ExecutionContext {
    /// Currently active frame.
    pub cfp: *mut ControlFrame,
}

/// One activation record.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ControlFrame {
    /// Operand-stack top; outgoing call arguments are written here.
    pub sp: *mut Value,
    pub self_value: Value,
    /// Environment pointer.
    pub ep: *mut Value,
    /// Index of the running method, for diagnostics.
    pub method: u64,
}

impl ControlFrame {
    const EMPTY: ControlFrame = ControlFrame {
        sp: ptr::null_mut(),
        self_value: Value::NIL,
        ep: ptr::null_mut(),
        method: u64::MAX,
    };
}

/// Byte offsets of [`ControlFrame`] fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub sp: i32,
    pub self_value: i32,
    pub ep: i32,
    pub method: i32,
    pub size: i32,
}

/// Byte offsets of [`ExecutionContext`] fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLayout {
    pub cfp: i32,
}

pub const FRAME_LAYOUT: FrameLayout = FrameLayout {
    sp: offset_of!(ControlFrame, sp) as i32,
    self_value: offset_of!(ControlFrame, self_value) as i32,
    ep: offset_of!(ControlFrame, ep) as i32,
    method: offset_of!(ControlFrame, method) as i32,
    size: size_of::<ControlFrame>() as i32,
};

pub const CONTEXT_LAYOUT: ContextLayout = ContextLayout {
    cfp: offset_of!(ExecutionContext, cfp) as i32,
};

/// Value and frame stacks for one native execution.
///
/// Both stacks are fixed-size boxes so that raw pointers handed to generated
/// code stay valid for the lifetime of the `VmStack`.
pub struct VmStack {
    values: Box<[Value]>,
    frames: Box<[ControlFrame]>,
    ec: Box<ExecutionContext>,
}

impl VmStack {
    /// Operand words a single frame can consume: receiver, up to four
    /// arguments (bounded by the register stack) and the env header.
    const WORDS_PER_FRAME: usize = 6;

    /// A stack deep enough for a call chain of `max_depth` compiled methods
    /// below an entry frame taking `entry_args` arguments.
    pub fn for_depth(max_depth: usize, entry_args: usize) -> Self {
        let frames = max_depth + 2;
        Self::new(frames * Self::WORDS_PER_FRAME + entry_args, frames)
    }

    pub fn new(value_slots: usize, frame_slots: usize) -> Self {
        let mut values = vec![Value::NIL; value_slots.max(1)].into_boxed_slice();
        let mut frames = vec![ControlFrame::EMPTY; frame_slots.max(1)].into_boxed_slice();

        let root = frames.len() - 1;
        frames[root].sp = values.as_mut_ptr();
        let cfp = &mut frames[root] as *mut ControlFrame;

        Self {
            values,
            frames,
            ec: Box::new(ExecutionContext { cfp }),
        }
    }

    pub fn ec_ptr(&mut self) -> *mut ExecutionContext {
        &mut *self.ec
    }

    pub fn cfp(&self) -> *mut ControlFrame {
        self.ec.cfp
    }

    pub fn root_frame(&mut self) -> *mut ControlFrame {
        let root = self.frames.len() - 1;
        &mut self.frames[root]
    }

    /// Number of frames pushed above the root frame.
    pub fn depth(&self) -> usize {
        let base = self.frames.as_ptr() as usize;
        let cfp = self.ec.cfp as usize;
        let index = (cfp - base) / size_of::<ControlFrame>();
        self.frames.len() - 1 - index
    }

    /// Push a frame for `method` the same way a compiled call site does and
    /// make it current.
    ///
    /// Returns `None` when either stack would overflow.
    pub fn push_frame(
        &mut self,
        self_value: Value,
        args: &[Value],
        method: MethodId,
    ) -> Option<*mut ControlFrame> {
        let depth = self.depth();
        let index = (self.frames.len() - 1).checked_sub(depth + 1)?;

        // SAFETY: `cfp` points into `self.frames` and its `sp` into `self.values`.
        let caller_sp = unsafe { (*self.ec.cfp).sp };
        let offset = (caller_sp as usize - self.values.as_ptr() as usize) / size_of::<Value>();
        if offset + args.len() + 1 > self.values.len() {
            return None;
        }

        let env = &mut self.values[offset..];
        env[..args.len()].copy_from_slice(args);
        env[args.len()] = Value::from_raw(ENV_HEADER);
        // SAFETY: bounds checked above; `ep` stays inside `values` and the
        // callee sp may point one past the end, which is never dereferenced
        // without a further bounds check.
        let ep = unsafe { self.values.as_mut_ptr().add(offset + args.len()) };
        let sp = unsafe { ep.add(1) };

        let frame = &mut self.frames[index];
        frame.sp = sp;
        frame.self_value = self_value;
        frame.ep = ep;
        frame.method = method.0 as u64;
        let cfp = frame as *mut ControlFrame;
        self.ec.cfp = cfp;
        Some(cfp)
    }

    /// Read local `idx` of the current frame.
    pub fn local(&self, idx: usize) -> Option<Value> {
        let frame = self.current()?;
        let base = self.values.as_ptr() as usize;
        let ep = (frame.ep as usize).checked_sub(base)? / size_of::<Value>();
        let slot = ep.checked_sub(idx)?;
        self.values.get(slot).copied()
    }

    fn current(&self) -> Option<&ControlFrame> {
        let base = self.frames.as_ptr() as usize;
        let index = (self.ec.cfp as usize).checked_sub(base)? / size_of::<ControlFrame>();
        self.frames.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout_matches_struct() {
        assert_eq!(FRAME_LAYOUT.sp, 0);
        assert_eq!(FRAME_LAYOUT.self_value, 8);
        assert_eq!(FRAME_LAYOUT.ep, 16);
        assert_eq!(FRAME_LAYOUT.method, 24);
        assert_eq!(FRAME_LAYOUT.size, 32);
        assert_eq!(CONTEXT_LAYOUT.cfp, 0);
        assert_eq!(WORD_SIZE, 8);
    }

    #[test]
    fn test_push_frame_lays_out_environment() {
        let mut stack = VmStack::new(16, 4);
        let root = stack.root_frame();
        assert_eq!(stack.depth(), 0);

        let args = [Value::fixnum(10), Value::fixnum(20)];
        let cfp = stack.push_frame(Value::fixnum(7), &args, MethodId(3)).unwrap();
        assert_eq!(stack.depth(), 1);
        assert_eq!(cfp as usize, root as usize - FRAME_LAYOUT.size as usize);

        let frame = unsafe { *cfp };
        assert_eq!(frame.self_value, Value::fixnum(7));
        assert_eq!(frame.method, 3);
        assert_eq!(frame.sp as usize, frame.ep as usize + WORD_SIZE as usize);
        assert_eq!(stack.local(1), Some(Value::fixnum(20)));
        assert_eq!(stack.local(2), Some(Value::fixnum(10)));
    }

    #[test]
    fn test_nested_frames_stack_arguments() {
        let mut stack = VmStack::new(16, 4);
        stack.push_frame(Value::NIL, &[Value::fixnum(1)], MethodId(0)).unwrap();
        stack.push_frame(Value::NIL, &[Value::fixnum(2)], MethodId(1)).unwrap();
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.local(1), Some(Value::fixnum(2)));
    }

    #[test]
    fn test_for_depth_fits_entry_frame_and_chain() {
        let mut stack = VmStack::for_depth(3, 7);
        let args = vec![Value::fixnum(1); 7];
        assert!(stack.push_frame(Value::NIL, &args, MethodId(0)).is_some());
        for _ in 0..3 {
            assert!(stack.push_frame(Value::NIL, &[Value::NIL; 4], MethodId(1)).is_some());
        }
        assert_eq!(stack.depth(), 4);
    }

    #[test]
    fn test_frame_stack_overflow() {
        let mut stack = VmStack::new(64, 2);
        assert!(stack.push_frame(Value::NIL, &[], MethodId(0)).is_some());
        assert!(stack.push_frame(Value::NIL, &[], MethodId(0)).is_none());
    }

    #[test]
    fn test_value_stack_overflow() {
        let mut stack = VmStack::new(2, 8);
        assert!(stack
            .push_frame(Value::NIL, &[Value::NIL, Value::NIL], MethodId(0))
            .is_none());
    }
}
