//! The real-hardware backing: raw reads and writes against the kernel
//! image at its fixed base, with the protection toggle implemented on the
//! processor control register. Only compiled for the 32-bit bare-metal
//! target this program actually boots on.

use core::arch::asm;

use crate::layout::KERNEL_BASE;
use crate::memory::{KernelMemory, MemoryFault};

/// Top of the RAM window the kernel image can occupy. Reads past it are
/// answered with a fault instead of being attempted, since the region
/// between the image end and here may be unmapped depending on the memory
/// configuration.
const RAM_LIMIT: u32 = 0x8400_0000;

/// The live kernel region. There is exactly one kernel; treat a value of
/// this type as the one handle to it.

pub struct LiveKernel {
    flags_addr: u32,
    protection_suspended: bool,
}

impl LiveKernel {
    /// Takes the live kernel region, with the hardware-info flags word at
    /// `flags_addr` (resolved by the embedding program from the kernel's
    /// hardware-info export).
    ///
    /// # Safety
    ///
    /// The caller must be the only code on the machine touching kernel
    /// memory: a single instance, a single thread of execution, and a
    /// kernel image actually mapped at [KERNEL_BASE].

    pub unsafe fn acquire(flags_addr: u32) -> Self {
        LiveKernel {
            flags_addr,
            protection_suspended: false,
        }
    }
}

impl KernelMemory for LiveKernel {
    fn base(&self) -> u32 {
        KERNEL_BASE
    }

    fn flags_addr(&self) -> u32 {
        self.flags_addr
    }

    fn read_byte(&self, addr: u32) -> Result<u8, MemoryFault> {
        // A read outside the RAM window would trap with nothing around to
        // catch it; screen it out so the scanner sees a fault result.
        if !(KERNEL_BASE..RAM_LIMIT).contains(&addr) {
            return Err(MemoryFault { addr });
        }

        // SAFETY: addr lies inside the mapped RAM window checked above.
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u8) })
    }

    unsafe fn write_byte(&mut self, addr: u32, value: u8) {
        debug_assert!(self.protection_suspended);
        core::ptr::write_volatile(addr as usize as *mut u8, value);
    }

    fn suspend_protection(&mut self) {
        assert!(!self.protection_suspended, "protection bracket does not nest");
        self.protection_suspended = true;

        // SAFETY: single core and sole thread of execution; interrupts
        // come back on in restore_protection.
        unsafe {
            asm!(
                "cli",
                "mov eax, cr0",
                "and eax, 0xFFFEFFFF",
                "mov cr0, eax",
                out("eax") _,
                options(nostack),
            );
        }
    }

    fn restore_protection(&mut self) {
        assert!(
            self.protection_suspended,
            "restore_protection without a matching suspend"
        );
        self.protection_suspended = false;

        // SAFETY: undoes exactly what suspend_protection did.
        unsafe {
            asm!(
                "mov eax, cr0",
                "or eax, 0x00010000",
                "mov cr0, eax",
                "sti",
                out("eax") _,
                options(nostack),
            );
        }
    }
}

impl Drop for LiveKernel {
    fn drop(&mut self) {
        if self.protection_suspended {
            // We don't want the code region left writable if something
            // panics while a bracket is open.
            self.restore_protection();
        }
    }
}
