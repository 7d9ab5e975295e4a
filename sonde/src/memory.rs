//! Raw reads out of the target address space. The core decoder only ever
//! consumes [`MemoryReader`]; what backs it (an attached process, a dump
//! file) is the host's business.

use std::fs;
use std::path::Path;

use thiserror::Error;

pub type Address = u64;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot file: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte-level view of the target process memory.
///
/// Implementations must not panic for addresses inside their mapped
/// range; behavior on unmapped addresses is each implementation's
/// contract to define. All multi-byte reads are little-endian.
pub trait MemoryReader {
    fn read_bytes(&self, addr: Address, buf: &mut [u8]);

    #[inline]
    fn read_u8(&self, addr: Address) -> u8 {
        let mut buf = [0u8; 1];
        self.read_bytes(addr, &mut buf);
        buf[0]
    }

    #[inline]
    fn read_u16(&self, addr: Address) -> u16 {
        let mut buf = [0u8; 2];
        self.read_bytes(addr, &mut buf);
        u16::from_le_bytes(buf)
    }

    #[inline]
    fn read_u32(&self, addr: Address) -> u32 {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf);
        u32::from_le_bytes(buf)
    }

    #[inline]
    fn read_u64(&self, addr: Address) -> u64 {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf);
        u64::from_le_bytes(buf)
    }

    #[inline]
    fn read_i8(&self, addr: Address) -> i8 {
        self.read_u8(addr).cast_signed()
    }

    #[inline]
    fn read_i16(&self, addr: Address) -> i16 {
        self.read_u16(addr).cast_signed()
    }

    #[inline]
    fn read_i32(&self, addr: Address) -> i32 {
        self.read_u32(addr).cast_signed()
    }

    #[inline]
    fn read_i64(&self, addr: Address) -> i64 {
        self.read_u64(addr).cast_signed()
    }

    #[inline]
    fn read_f64(&self, addr: Address) -> f64 {
        f64::from_bits(self.read_u64(addr))
    }

    /// Length-counted one-byte text. Lossy: a foreign heap may hold
    /// arbitrary bytes and decoding must not fail mid-walk.
    fn read_utf8(&self, addr: Address, len: usize) -> String {
        let mut buf = vec![0u8; len];
        self.read_bytes(addr, &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Length-counted two-byte text, `len` in code units.
    fn read_utf16(&self, addr: Address, len: usize) -> String {
        let mut units = Vec::with_capacity(len);
        for i in 0..len {
            units.push(self.read_u16(addr.wrapping_add(2 * i as u64)));
        }
        String::from_utf16_lossy(&units)
    }
}

/// A dumped memory region mapped at a fixed base address.
///
/// Reads outside the region yield zero bytes and a log line instead of a
/// panic, mirroring the degrade-don't-abort policy of the decoder.
#[derive(Debug, Clone)]
pub struct SnapshotMemory {
    base: Address,
    bytes: Vec<u8>,
}

impl SnapshotMemory {
    pub fn new(base: Address, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    pub fn from_file(base: Address, path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let bytes = fs::read(path)?;
        Ok(Self { base, bytes })
    }

    #[inline]
    pub fn base(&self) -> Address {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl MemoryReader for SnapshotMemory {
    fn read_bytes(&self, addr: Address, buf: &mut [u8]) {
        buf.fill(0);
        let end = self.base.wrapping_add(self.bytes.len() as u64);
        if addr < self.base || addr >= end {
            log::warn!(
                "read of {} bytes at {addr:#x} outside snapshot [{:#x}, {end:#x})",
                buf.len(),
                self.base
            );
            return;
        }
        let start = (addr - self.base) as usize;
        let avail = self.bytes.len() - start;
        let n = buf.len().min(avail);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        if n < buf.len() {
            log::warn!(
                "read of {} bytes at {addr:#x} truncated to {n} by snapshot end",
                buf.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SnapshotMemory {
        SnapshotMemory::new(0x1000, vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88])
    }

    #[test]
    fn reads_are_little_endian() {
        let mem = snapshot();
        assert_eq!(mem.read_u8(0x1000), 0x11);
        assert_eq!(mem.read_u16(0x1000), 0x2211);
        assert_eq!(mem.read_u32(0x1002), 0x66554433);
        assert_eq!(mem.read_u64(0x1000), 0x8877665544332211);
    }

    #[test]
    fn out_of_range_reads_zero() {
        let mem = snapshot();
        assert_eq!(mem.read_u64(0x2000), 0);
        assert_eq!(mem.read_u32(0x0), 0);
    }

    #[test]
    fn read_past_end_truncates_with_zero_fill() {
        let mem = snapshot();
        // last two mapped bytes, then zeros
        assert_eq!(mem.read_u32(0x1006), 0x0000_8877);
    }

    #[test]
    fn signed_reads_sign_extend() {
        let mem = SnapshotMemory::new(0, vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(mem.read_i8(0), -1);
        assert_eq!(mem.read_i16(0), -1);
        assert_eq!(mem.read_i64(0), -1);
    }

    #[test]
    fn utf8_read_is_lossy_not_fatal() {
        let mem = SnapshotMemory::new(0, vec![b'h', b'i', 0xFF]);
        assert_eq!(mem.read_utf8(0, 2), "hi");
        assert_eq!(mem.read_utf8(0, 3), "hi\u{FFFD}");
    }

    #[test]
    fn utf16_read_decodes_code_units() {
        let mem = SnapshotMemory::new(0, vec![0x68, 0x00, 0x69, 0x00]);
        assert_eq!(mem.read_utf16(0, 2), "hi");
    }
}
