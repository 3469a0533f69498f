//! The shared executable code buffer.
//!
//! A [`CodeBlock`] owns one mapped region for the lifetime of the JIT and
//! appends each compiled routine after the previous one. Between calls to
//! [`CodeBlock::place`] the region is read+execute only; it becomes writable
//! just for the duration of one placement.

use std::fmt;
use std::io;
use std::ptr::NonNull;

use super::asm::{AsmError, Assembler};
use super::disasm::{self, Disassembler, X86Disassembler};
use super::error::{JitError, JitResult};
use super::memory::ExecutableMemory;
use crate::config::DisasmFormat;

/// Address of placed machine code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodePtr(NonNull<u8>);

impl CodePtr {
    pub(crate) fn new(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *const u8 {
        self.0.as_ptr()
    }

    pub fn raw_addr(self) -> u64 {
        self.0.as_ptr() as u64
    }
}

impl fmt::Debug for CodePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodePtr({:#x})", self.raw_addr())
    }
}

impl fmt::Display for CodePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.raw_addr())
    }
}

struct DisasmDump {
    format: DisasmFormat,
    sink: Box<dyn io::Write>,
}

pub struct CodeBlock {
    mem: ExecutableMemory,
    write_pos: usize,
    dump: Option<DisasmDump>,
}

impl CodeBlock {
    /// Map a region of at least `size` bytes and leave it executable.
    pub fn new(size: usize) -> JitResult<Self> {
        let mut mem = ExecutableMemory::new(size)?;
        mem.make_executable()?;
        Ok(Self {
            mem,
            write_pos: 0,
            dump: None,
        })
    }

    /// Disassemble every placed range into `sink`.
    pub fn set_disasm_dump(&mut self, format: DisasmFormat, sink: Box<dyn io::Write>) {
        self.dump = Some(DisasmDump { format, sink });
    }

    pub fn capacity(&self) -> usize {
        self.mem.size()
    }

    /// Bytes placed so far.
    pub fn used(&self) -> usize {
        self.write_pos
    }

    pub fn remaining(&self) -> usize {
        self.mem.size() - self.write_pos
    }

    pub fn is_executable(&self) -> bool {
        self.mem.is_executable()
    }

    pub fn is_writable(&self) -> bool {
        self.mem.is_writable()
    }

    /// Whether `ptr` points into code placed in this block.
    pub fn contains(&self, ptr: CodePtr) -> bool {
        ptr.raw_addr()
            .checked_sub(self.mem.as_ptr() as u64)
            .is_some_and(|offset| offset < self.write_pos as u64)
    }

    /// Placed bytes starting at `ptr`, if `[ptr, ptr + len)` lies inside the
    /// used part of the block.
    pub fn bytes_at(&self, ptr: CodePtr, len: usize) -> Option<&[u8]> {
        let start = (ptr.raw_addr()).checked_sub(self.mem.as_ptr() as u64)? as usize;
        let end = start.checked_add(len)?;
        if end > self.write_pos {
            return None;
        }
        self.mem.bytes().get(start..end)
    }

    /// Encode `asm` at the current write position and return its address.
    ///
    /// Nothing is written and the position does not move when the code does
    /// not fit. The block is executable again when this returns, whether or
    /// not placement succeeded.
    pub fn place(&mut self, asm: &Assembler) -> JitResult<CodePtr> {
        let start = self.write_pos;
        let target = self.mem.as_ptr() as u64 + start as u64;

        self.mem.make_writable()?;
        let written = self
            .mem
            .tail_mut(start)
            .map_err(JitError::from)
            .and_then(|tail| {
                asm.assemble(target, tail).map_err(|err| match err {
                    AsmError::BufferTooSmall { needed, available } => {
                        JitError::CodeBufferFull { needed, available }
                    }
                    err => err.into(),
                })
            });
        self.mem.make_executable()?;
        let len = written?;

        let entry = self
            .mem
            .ptr_at(start)
            .map(CodePtr::new)
            .ok_or(JitError::CodeBufferFull {
                needed: len,
                available: 0,
            })?;
        self.write_pos += len;

        tracing::trace!(
            "[JIT] placed {} bytes at {} ({} of {} used)",
            len,
            entry,
            self.write_pos,
            self.capacity()
        );
        self.dump_range(start, len, target);
        Ok(entry)
    }

    fn dump_range(&mut self, start: usize, len: usize, address: u64) {
        let Some(dump) = self.dump.as_mut() else {
            return;
        };
        let lines = X86Disassembler.disassemble(&self.mem.bytes()[start..start + len], address);
        if let Err(err) = disasm::render(&lines, dump.format, dump.sink.as_mut()) {
            tracing::warn!("[JIT] failed to write disassembly: {}", err);
        }
    }
}

impl fmt::Debug for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeBlock")
            .field("mem", &self.mem)
            .field("write_pos", &self.write_pos)
            .field("dump", &self.dump.as_ref().map(|d| d.format))
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::jit::asm::Opnd;
    use crate::jit::x86_64::Reg;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn ret_42() -> Assembler {
        let mut asm = Assembler::new();
        asm.mov(Reg::Rax, Opnd::imm(42));
        asm.ret();
        asm
    }

    #[test]
    fn test_new_block_is_executable_and_empty() {
        let block = CodeBlock::new(4096).unwrap();
        assert!(block.is_executable());
        assert!(!block.is_writable());
        assert_eq!(block.used(), 0);
        assert_eq!(block.remaining(), block.capacity());
    }

    #[test]
    fn test_place_appends_and_leaves_executable() {
        let mut block = CodeBlock::new(4096).unwrap();
        let first = block.place(&ret_42()).unwrap();
        assert!(block.is_executable());
        assert_eq!(block.used(), 8);

        let second = block.place(&ret_42()).unwrap();
        assert_eq!(second.raw_addr(), first.raw_addr() + 8);
        assert_eq!(block.used(), 16);
        assert_eq!(
            block.bytes_at(second, 8),
            Some(&[0x48, 0xC7, 0xC0, 42, 0, 0, 0, 0xC3][..])
        );
        assert_eq!(block.bytes_at(second, 9), None);
    }

    #[test]
    fn test_exhaustion_writes_nothing() {
        let mut block = CodeBlock::new(1).unwrap();
        let mut big = Assembler::new();
        for _ in 0..block.capacity() {
            big.ret();
        }
        big.ret();

        let err = block.place(&big).unwrap_err();
        assert_eq!(
            err,
            JitError::CodeBufferFull {
                needed: block.capacity() + 1,
                available: block.capacity()
            }
        );
        assert_eq!(block.used(), 0);
        assert!(block.is_executable());
        assert!(block.mem.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_placement_fills_block_exactly() {
        let mut block = CodeBlock::new(1).unwrap();
        let mut fill = Assembler::new();
        for _ in 0..block.capacity() {
            fill.ret();
        }
        block.place(&fill).unwrap();
        assert_eq!(block.remaining(), 0);
        assert!(matches!(
            block.place(&ret_42()),
            Err(JitError::CodeBufferFull { available: 0, .. })
        ));
    }

    #[test]
    fn test_asm_error_leaves_block_executable() {
        let mut block = CodeBlock::new(4096).unwrap();
        let mut bad = Assembler::new();
        bad.cmp(Reg::R8, Reg::R9);
        assert!(matches!(block.place(&bad), Err(JitError::Asm(_))));
        assert!(block.is_executable());
        assert_eq!(block.used(), 0);
    }

    #[test]
    fn test_disasm_dump() {
        let mut block = CodeBlock::new(4096).unwrap();
        let out = SharedBuf::default();
        block.set_disasm_dump(DisasmFormat::Text, Box::new(out.clone()));
        block.place(&ret_42()).unwrap();

        let text = String::from_utf8(out.0.borrow().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2, "{}", text);
        assert!(lines[0].ends_with("mov    rax, 0x2a"), "{}", text);
        assert!(lines[1].ends_with("ret"), "{}", text);
    }
}
