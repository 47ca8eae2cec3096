//! The boundary between the patch engine and whatever actually backs the
//! kernel image, be it the real memory-mapped region or a sandbox buffer.

use thiserror::Error;

/// Produced by a guarded read when the backing region faults instead of
/// handing back data. The scanner converts this into an ordinary "not
/// found" result; it never escapes a scan as an error.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("memory fault reading address {addr:#010x}")]
pub struct MemoryFault {
    /// The address whose read faulted.
    pub addr: u32,
}

/// A live kernel image mapped at a fixed base address. The two
/// implementations are the real hardware region (`live::LiveKernel`, only
/// present on the bare-metal target) and the in-memory fake used by tests
/// and demos ([crate::SandboxKernel]).
///
/// Reads are guarded: a read the backing region cannot satisfy resolves to
/// a [MemoryFault] instead of taking the machine down. Writes are
/// unconditional, and are only legal between [KernelMemory::suspend_protection]
/// and [KernelMemory::restore_protection].

pub trait KernelMemory {
    /// The fixed address the kernel image is mapped at.
    fn base(&self) -> u32;

    /// The address of the hardware-info flags word this handle aliases.
    fn flags_addr(&self) -> u32;

    /// Reads one byte, intercepting any fault from the backing region.
    fn read_byte(&self, addr: u32) -> Result<u8, MemoryFault>;

    /// Reads a little-endian doubleword via [KernelMemory::read_byte].
    /// A read that would wrap around the top of the address space counts
    /// as a fault.
    fn read_u32(&self, addr: u32) -> Result<u32, MemoryFault> {
        let mut bytes = [0u8; 4];
        for (i, slot) in bytes.iter_mut().enumerate() {
            let byte_addr = addr.checked_add(i as u32).ok_or(MemoryFault { addr })?;
            *slot = self.read_byte(byte_addr)?;
        }

        Ok(u32::from_le_bytes(bytes))
    }

    /// Writes one byte into the kernel image.
    ///
    /// # Safety
    ///
    /// The caller must have the protection bracket open, and must only
    /// write to addresses produced by a signature match or to the flags
    /// word; a write anywhere else corrupts the running kernel.

    unsafe fn write_byte(&mut self, addr: u32, value: u8);

    /// Writes a little-endian doubleword via [KernelMemory::write_byte].
    ///
    /// # Safety
    ///
    /// Same contract as [KernelMemory::write_byte], for all four bytes.

    unsafe fn write_u32(&mut self, addr: u32, value: u32) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write_byte(addr + i as u32, byte);
        }
    }

    /// Drops memory write protection (and, on hardware, interrupts) so the
    /// code region can be written. Every call must be paired with a
    /// [KernelMemory::restore_protection]; the bracket does not nest, and
    /// nothing but the patch writes themselves belongs inside it.
    fn suspend_protection(&mut self);

    /// Re-arms write protection after a patch write.
    fn restore_protection(&mut self);
}
