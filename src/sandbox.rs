//! An in-memory stand-in for the hardware kernel region, used by the tests
//! and the demo programs. It backs the image with a plain byte buffer, can
//! be told to fault on chosen address ranges, and panics if anything writes
//! to it outside a protection bracket.

use std::ops::Range;

use crate::layout::{E_LFANEW_OFFSET, SIZE_OF_IMAGE_OFFSET};
use crate::memory::{KernelMemory, MemoryFault};

// Where blank() places the NT headers and, right after them, the fake
// hardware-info flags word.
const E_LFANEW: u32 = 0x40;
const FLAGS_OFFSET: u32 = 0x98;

/// A fake kernel image. Guarded reads fault on poisoned ranges and on
/// anything outside the buffer, which is also how the region past the real
/// image's end behaves.

pub struct SandboxKernel {
    base: u32,
    flags_addr: u32,
    buffer: Vec<u8>,
    poisoned: Vec<Range<u32>>,
    protection_suspended: bool,
}

impl SandboxKernel {
    /// Creates a zero-filled image of `size` bytes mapped at `base`, with a
    /// minimal executable header stamped in so the bounds resolver finds
    /// the right limit. The flags word sits just past the header; `size`
    /// must leave room for both.
    pub fn blank(base: u32, size: u32) -> Self {
        assert!(
            size > FLAGS_OFFSET + 4,
            "sandbox image too small to hold its own header"
        );

        let mut sandbox = SandboxKernel {
            base,
            flags_addr: base + FLAGS_OFFSET,
            buffer: vec![0; size as usize],
            poisoned: Vec::new(),
            protection_suspended: false,
        };

        sandbox.put_u32(base + E_LFANEW_OFFSET, E_LFANEW);
        sandbox.put_u32(base + E_LFANEW + SIZE_OF_IMAGE_OFFSET, size);
        sandbox
    }

    /// Plants raw bytes in the image during test setup. Not a patch write;
    /// the protection bracket does not apply.
    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) {
        let start = self.offset_of(addr);
        self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Seeds the hardware-info flags word.
    pub fn set_flags(&mut self, flags: u32) {
        let addr = self.flags_addr;
        self.put_u32(addr, flags);
    }

    /// Current value of the hardware-info flags word.
    pub fn flags(&self) -> u32 {
        let start = self.offset_of(self.flags_addr);
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buffer[start..start + 4]);
        u32::from_le_bytes(bytes)
    }

    /// Relocates the fake hardware-info structure, for tests that derive
    /// address-dependent signatures from somewhere other than the default.
    pub fn set_flags_addr(&mut self, addr: u32) {
        self.flags_addr = addr;
    }

    /// Marks an address range as unreadable. Guarded reads touching it
    /// fault from then on; writes are unaffected.
    pub fn poison_range(&mut self, range: Range<u32>) {
        self.poisoned.push(range);
    }

    /// Direct peek at one image byte, for assertions.
    pub fn byte_at(&self, addr: u32) -> u8 {
        self.buffer[self.offset_of(addr)]
    }

    fn put_u32(&mut self, addr: u32, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    fn offset_of(&self, addr: u32) -> usize {
        match addr.checked_sub(self.base) {
            Some(offset) if (offset as usize) < self.buffer.len() => offset as usize,
            _ => panic!("address {addr:#010x} is outside the sandbox image"),
        }
    }
}

impl KernelMemory for SandboxKernel {
    fn base(&self) -> u32 {
        self.base
    }

    fn flags_addr(&self) -> u32 {
        self.flags_addr
    }

    fn read_byte(&self, addr: u32) -> Result<u8, MemoryFault> {
        if self.poisoned.iter().any(|range| range.contains(&addr)) {
            return Err(MemoryFault { addr });
        }

        let offset = addr.checked_sub(self.base).ok_or(MemoryFault { addr })? as usize;
        self.buffer.get(offset).copied().ok_or(MemoryFault { addr })
    }

    unsafe fn write_byte(&mut self, addr: u32, value: u8) {
        assert!(
            self.protection_suspended,
            "patch write at {addr:#010x} outside a protection bracket"
        );

        let offset = self.offset_of(addr);
        self.buffer[offset] = value;
    }

    fn suspend_protection(&mut self) {
        assert!(!self.protection_suspended, "protection bracket does not nest");
        self.protection_suspended = true;
    }

    fn restore_protection(&mut self) {
        assert!(
            self.protection_suspended,
            "restore_protection without a matching suspend"
        );
        self.protection_suspended = false;
    }
}
