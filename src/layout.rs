//! Fixed layout constants for the kernel image on this hardware generation,
//! and the scan bounds derived from the image's own executable header.

use crate::memory::{KernelMemory, MemoryFault};

/// Address the kernel image is mapped at. Compile-time configuration for
/// one firmware generation; there is no runtime way to discover it.
pub const KERNEL_BASE: u32 = 0x8001_0000;

/// Offset of the `e_lfanew` pointer inside the DOS header at the image base.
pub const E_LFANEW_OFFSET: u32 = 0x3c;

/// Offset of the `SizeOfImage` field inside the NT headers.
pub const SIZE_OF_IMAGE_OFFSET: u32 = 0x50;

/// Bit of the hardware-info flags word reporting a devkit kernel.
pub const DEVKIT_FLAG: u32 = 0x0000_0002;

/// The scan region computed from the image header: addresses in
/// `[base, limit)` belong to the image.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBounds {
    pub base: u32,
    pub limit: u32,
}

impl ImageBounds {
    /// Total size of the image in bytes.
    pub fn size(&self) -> u32 {
        self.limit.saturating_sub(self.base)
    }
}

/// Follows the image's own header to find the end of the scan region: the
/// DOS header at the base points at the NT headers, which carry the image
/// size, and `limit` is `base + size`.
///
/// A wrong base address is indistinguishable from a right one here. If the
/// constant does not match the running kernel this computes garbage, and
/// the design accepts that; the only error this can actually produce is a
/// fault from the backing region.

pub fn resolve_image_bounds<M: KernelMemory>(mem: &M) -> Result<ImageBounds, MemoryFault> {
    let base = mem.base();
    let e_lfanew = mem.read_u32(base + E_LFANEW_OFFSET)?;
    let size_of_image = mem.read_u32(base.wrapping_add(e_lfanew).wrapping_add(SIZE_OF_IMAGE_OFFSET))?;

    let limit = base.wrapping_add(size_of_image);
    log::debug!("kernel image spans {:#010x}..{:#010x}", base, limit);
    Ok(ImageBounds { base, limit })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxKernel;

    #[test]
    fn bounds_come_from_the_header() {
        let kernel = SandboxKernel::blank(KERNEL_BASE, 0x800);
        let bounds = resolve_image_bounds(&kernel).unwrap();
        assert_eq!(bounds.base, KERNEL_BASE);
        assert_eq!(bounds.limit, KERNEL_BASE + 0x800);
        assert_eq!(bounds.size(), 0x800);
    }

    #[test]
    fn unreadable_header_faults() {
        let mut kernel = SandboxKernel::blank(KERNEL_BASE, 0x800);
        kernel.poison_range(KERNEL_BASE + E_LFANEW_OFFSET..KERNEL_BASE + E_LFANEW_OFFSET + 4);
        let fault = resolve_image_bounds(&kernel).unwrap_err();
        assert_eq!(fault.addr, KERNEL_BASE + E_LFANEW_OFFSET);
    }
}
