//! Growable byte sink the encoder writes machine code into.

/// A buffer for building machine code.
#[derive(Debug, Default, Clone)]
pub struct CodeBuffer {
    code: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self { code: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    /// Emit a 32-bit value (little-endian).
    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit value (little-endian).
    pub fn emit_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn into_code(self) -> Vec<u8> {
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_bytes() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0x90);
        buf.emit_u32(0xDEADBEEF);
        buf.emit_bytes(&[0xC3]);

        assert_eq!(buf.len(), 6);
        assert_eq!(buf.code(), &[0x90, 0xEF, 0xBE, 0xAD, 0xDE, 0xC3]);
    }

    #[test]
    fn test_emit_u64() {
        let mut buf = CodeBuffer::with_capacity(8);
        assert!(buf.is_empty());
        buf.emit_u64(0x0102030405060708);
        assert_eq!(buf.into_code(), vec![8, 7, 6, 5, 4, 3, 2, 1]);
    }
}
