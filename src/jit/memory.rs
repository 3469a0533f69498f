//! Executable memory management using mmap.
//!
//! One region is mapped up front and flipped between read+write and
//! read+execute with `mprotect`. It is never writable and executable at the
//! same time.

use std::ptr::NonNull;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("memory allocation failed")]
    AllocationFailed,
    #[error("memory protection change failed")]
    ProtectionFailed,
    #[error("invalid memory size")]
    InvalidSize,
    #[error("write to memory that is not writable")]
    NotWritable,
    #[error("executable memory is not supported on this platform")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protection {
    ReadWrite,
    ReadExec,
}

/// A block of memory that can be toggled between writable and executable.
///
/// The memory starts writable. Writes are refused while it is executable.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    protection: Protection,
}

impl ExecutableMemory {
    /// Map `size` bytes, rounded up to the page size.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let page_size = Self::page_size();
        let aligned_size = size
            .checked_add(page_size - 1)
            .ok_or(MemoryError::InvalidSize)?
            & !(page_size - 1);

        let ptr = Self::mmap_alloc(aligned_size)?;

        Ok(Self {
            ptr,
            size: aligned_size,
            protection: Protection::ReadWrite,
        })
    }

    #[cfg(unix)]
    fn page_size() -> usize {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 { size as usize } else { 4096 }
    }

    #[cfg(not(unix))]
    fn page_size() -> usize {
        4096
    }

    #[cfg(unix)]
    fn mmap_alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }

        NonNull::new(ptr as *mut u8).ok_or(MemoryError::AllocationFailed)
    }

    #[cfg(not(unix))]
    fn mmap_alloc(_size: usize) -> Result<NonNull<u8>, MemoryError> {
        Err(MemoryError::Unsupported)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Address of byte `offset`, or `None` past the end.
    pub fn ptr_at(&self, offset: usize) -> Option<NonNull<u8>> {
        if offset >= self.size {
            return None;
        }
        // SAFETY: `offset` is inside the mapping.
        Some(unsafe { self.ptr.add(offset) })
    }

    pub fn is_writable(&self) -> bool {
        self.protection == Protection::ReadWrite
    }

    pub fn is_executable(&self) -> bool {
        self.protection == Protection::ReadExec
    }

    /// Writable view of `[offset, size)`. Fails while the memory is executable.
    pub fn tail_mut(&mut self, offset: usize) -> Result<&mut [u8], MemoryError> {
        if !self.is_writable() {
            return Err(MemoryError::NotWritable);
        }
        if offset > self.size {
            return Err(MemoryError::InvalidSize);
        }
        // SAFETY: the mapping is `size` bytes long, currently PROT_WRITE, and
        // the returned borrow ties it to `&mut self`.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), self.size - offset) })
    }

    /// Copy `data` to `offset`.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        let end = offset.checked_add(data.len()).ok_or(MemoryError::InvalidSize)?;
        if end > self.size {
            return Err(MemoryError::InvalidSize);
        }
        self.tail_mut(offset)?[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read-only view of the whole region.
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: the mapping is always readable.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    pub fn make_writable(&mut self) -> Result<(), MemoryError> {
        self.protect(Protection::ReadWrite)
    }

    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        self.protect(Protection::ReadExec)
    }

    #[cfg(unix)]
    fn protect(&mut self, protection: Protection) -> Result<(), MemoryError> {
        if self.protection == protection {
            return Ok(());
        }

        let prot = match protection {
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Protection::ReadExec => libc::PROT_READ | libc::PROT_EXEC,
        };
        let result =
            unsafe { libc::mprotect(self.ptr.as_ptr() as *mut libc::c_void, self.size, prot) };
        if result != 0 {
            return Err(MemoryError::ProtectionFailed);
        }

        self.protection = protection;
        Ok(())
    }

    #[cfg(not(unix))]
    fn protect(&mut self, _protection: Protection) -> Result<(), MemoryError> {
        Err(MemoryError::Unsupported)
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            unsafe {
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            }
        }
    }
}

impl std::fmt::Debug for ExecutableMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableMemory")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .field("protection", &self.protection)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_memory() {
        let mem = ExecutableMemory::new(4096).unwrap();
        assert!(mem.size() >= 4096);
        assert!(mem.is_writable());
        assert!(!mem.is_executable());
    }

    #[test]
    fn test_size_is_page_rounded() {
        let mem = ExecutableMemory::new(1).unwrap();
        assert_eq!(mem.size(), ExecutableMemory::page_size());
    }

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(ExecutableMemory::new(0).unwrap_err(), MemoryError::InvalidSize);
    }

    #[test]
    fn test_write_memory() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        mem.write(4, &[0x90, 0x90, 0xC3]).unwrap();
        assert_eq!(&mem.bytes()[4..7], &[0x90, 0x90, 0xC3]);
    }

    #[test]
    fn test_ptr_at_bounds() {
        let mem = ExecutableMemory::new(4096).unwrap();
        let base = mem.as_ptr() as usize;
        assert_eq!(mem.ptr_at(16).map(|p| p.as_ptr() as usize), Some(base + 16));
        assert!(mem.ptr_at(mem.size()).is_none());
    }

    #[test]
    fn test_write_past_end_rejected() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        let end = mem.size();
        assert_eq!(mem.write(end - 1, &[0, 0]), Err(MemoryError::InvalidSize));
    }

    #[test]
    fn test_cannot_write_while_executable() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        mem.make_executable().unwrap();
        assert!(mem.is_executable());
        assert!(!mem.is_writable());
        assert_eq!(mem.write(0, &[0x90]), Err(MemoryError::NotWritable));
        assert!(mem.tail_mut(0).is_err());
    }

    #[test]
    fn test_toggle_back_to_writable() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        mem.make_executable().unwrap();
        mem.make_writable().unwrap();
        mem.write(0, &[0xC3]).unwrap();
        mem.make_executable().unwrap();
        assert_eq!(mem.bytes()[0], 0xC3);
    }
}
