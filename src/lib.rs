//! A library used to locate and rewrite byte signatures inside a live,
//! memory-mapped kernel image. It derives the scan region from the image's
//! own executable header, matches exact byte patterns with every read
//! guarded against faults, and applies per-target patches with memory
//! write protection dropped only for the writes themselves.
//!
//! # Note
//!
//! The fixed base address and header offsets in [layout] are specific to
//! one hardware generation. Pointed at a kernel laid out differently this
//! computes a nonsense scan limit and nothing here can detect that, so
//! re-derive the constants before trusting it on new hardware.

pub mod layout;
pub mod memory;
pub mod pipeline;
pub mod sandbox;
pub mod sig;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod live;

pub use layout::{resolve_image_bounds, ImageBounds};
pub use memory::{KernelMemory, MemoryFault};
pub use sandbox::SandboxKernel;
pub use sig::Signature;

/// The primary interface of this library. It wraps a kernel memory handle,
/// resolves the scan bounds from the image header once on construction,
/// and exposes the signature scanner and the patch operations that the
/// boot pipeline in [pipeline] drives.
///
/// # Example Usage
///
/// ```rust
/// use kernpatch::{KernelPatcher, SandboxKernel, Signature};
///
/// // Stand up a fake kernel image with the service name planted in it.
/// let mut kernel = SandboxKernel::blank(0x8001_0000, 0x400);
/// kernel.write_bytes(0x8001_0200, b"XONLINE");
///
/// let mut patcher = KernelPatcher::new(kernel).unwrap();
/// let addr = patcher.find_signature(&Signature::xonline()).unwrap();
///
/// unsafe {
///     // This is safe because the address came from a signature match
///     // inside the image.
///     patcher.substitute_byte(addr, 1, b'I');
/// }
///
/// // "XINLINE" no longer matches the original signature.
/// assert_eq!(patcher.find_signature(&Signature::xonline()), None);
/// ```

pub struct KernelPatcher<M: KernelMemory> {
    mem: M,
    bounds: ImageBounds,
}

impl<M: KernelMemory> KernelPatcher<M> {
    /// Creates a patcher over `mem`, reading the scan bounds out of the
    /// image header. The bounds are read exactly once; every scan this
    /// patcher runs uses them.

    pub fn new(mem: M) -> Result<Self, MemoryFault> {
        let bounds = resolve_image_bounds(&mem)?;
        Ok(KernelPatcher { mem, bounds })
    }

    /// The scan region resolved at construction.
    pub fn bounds(&self) -> ImageBounds {
        self.bounds
    }

    /// Borrows the underlying memory handle.
    pub fn memory(&self) -> &M {
        &self.mem
    }

    /// Gives the memory handle back, for callers that want to inspect the
    /// patched image afterwards.
    pub fn into_inner(self) -> M {
        self.mem
    }

    /// Scans the image for `sig`, in ascending address order, and returns
    /// the lowest address where every byte matches. Candidate start
    /// addresses run from the image base to `limit - len` inclusive, so a
    /// match is always entirely inside the image.
    ///
    /// Any fault from the backing region aborts the whole scan and comes
    /// back as `None`: the range near the image boundary is allowed to be
    /// unmapped, and a signature we cannot finish looking for is treated
    /// the same as one that is not there.

    pub fn find_signature(&self, sig: &Signature) -> Option<u32> {
        if sig.is_empty() {
            return None;
        }

        // Also rejects signatures longer than the whole image.
        let last_start = self.bounds.limit.checked_sub(sig.len())?;

        let mut addr = self.bounds.base;
        while addr <= last_start {
            match self.matches_at(addr, sig) {
                Ok(true) => {
                    log::debug!("signature found: {addr:#010x}");
                    return Some(addr);
                }
                Ok(false) => addr += 1,
                Err(fault) => {
                    log::debug!("scan aborted by {fault}");
                    return None;
                }
            }
        }

        None
    }

    fn matches_at(&self, addr: u32, sig: &Signature) -> Result<bool, MemoryFault> {
        for (i, &expected) in sig.as_bytes().iter().enumerate() {
            if self.mem.read_byte(addr + i as u32)? != expected {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Overwrites the byte at `offset` inside a match with `replacement`,
    /// corrupting a recognized pattern just enough that whatever compares
    /// against it stops matching.
    ///
    /// # Safety
    ///
    /// `addr` must come from [KernelPatcher::find_signature] and `offset`
    /// must fall inside the matched bytes; writing anywhere else corrupts
    /// the running kernel.

    pub unsafe fn substitute_byte(&mut self, addr: u32, offset: u32, replacement: u8) {
        self.mem.suspend_protection();
        self.mem.write_byte(addr + offset, replacement);
        self.mem.restore_protection();
    }

    /// Blanks `len` bytes starting at `addr` with no-op opcodes,
    /// neutralizing the whole matched instruction.
    ///
    /// # Safety
    ///
    /// `addr` must come from [KernelPatcher::find_signature] and `len`
    /// must not exceed the matched length, otherwise this tramples code
    /// that was never matched.

    pub unsafe fn nop_fill(&mut self, addr: u32, len: u32) {
        self.mem.suspend_protection();
        for i in 0..len {
            self.mem.write_byte(addr + i, sig::NOP);
        }
        self.mem.restore_protection();
    }

    /// Rewrites the conditional branch at `offset` inside a match into an
    /// unconditional jump, forcing the check to take its passing path.
    ///
    /// # Safety
    ///
    /// `addr` must come from [KernelPatcher::find_signature] and `offset`
    /// must point at the branch opcode of the matched sequence.

    pub unsafe fn rewrite_branch(&mut self, addr: u32, offset: u32) {
        self.mem.suspend_protection();
        self.mem.write_byte(addr + offset, sig::JMP_SHORT);
        self.mem.restore_protection();
    }

    /// Whether the hardware-info flags word currently reports a devkit
    /// kernel.
    pub fn has_devkit_flag(&self) -> Result<bool, MemoryFault> {
        let flags = self.mem.read_u32(self.mem.flags_addr())?;
        Ok(flags & layout::DEVKIT_FLAG != 0)
    }

    /// Clears the devkit bit of the hardware-info flags word, leaving
    /// every other bit alone. This does not persist on its own: an
    /// instruction elsewhere in the kernel re-sets the bit, and has to be
    /// blanked separately (the pipeline applies both together).

    pub fn clear_devkit_flag(&mut self) -> Result<(), MemoryFault> {
        let flags_addr = self.mem.flags_addr();
        let flags = self.mem.read_u32(flags_addr)?;

        self.mem.suspend_protection();
        // SAFETY: the flags word is the one piece of kernel data this
        // program is meant to rewrite, and only one bit changes.
        unsafe {
            self.mem.write_u32(flags_addr, flags & !layout::DEVKIT_FLAG);
        }
        self.mem.restore_protection();
        Ok(())
    }
}
