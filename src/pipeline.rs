//! The fixed boot pipeline: which signatures to hunt, what to do at each
//! match, and the firmware handoff once every target has been visited.
//!
//! Targets are independent. A signature that is not there is reported and
//! skipped, never an error; the only hard stop is the final reboot.

use log::{debug, info};

use crate::memory::KernelMemory;
use crate::sig::Signature;
use crate::KernelPatcher;

/// Offset of the byte substituted inside the XONLINE match.
const XONLINE_SUBSTITUTE_OFFSET: u32 = 1;

/// Turns "XONLINE" into "XINLINE", which no string compare confuses with
/// the original.
const XONLINE_REPLACEMENT: u8 = b'I';

/// Offset of the conditional branch inside the dashboard-check match.
const DASHBOARD_BRANCH_OFFSET: u32 = 12;

/// Seconds between the last patch and the firmware handoff.
const COUNTDOWN_SECONDS: u32 = 10;

/// What to do to the bytes of a located match. The pipeline hardwires one
/// action per target; the enum exists so callers assembling their own
/// steps can reuse the appliers uniformly.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchAction {
    /// Replace the byte at `offset` with `replacement`.
    Substitute { offset: u32, replacement: u8 },
    /// Blank the whole match out with no-op opcodes.
    NopFill,
    /// Overwrite the conditional branch at `offset` with an unconditional
    /// jump.
    RewriteBranch { offset: u32 },
}

impl PatchAction {
    /// Applies this action to a match of `len` bytes at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must describe a genuine match of the signature the
    /// action was written for; see the individual appliers on
    /// [KernelPatcher].

    pub unsafe fn apply<M: KernelMemory>(self, patcher: &mut KernelPatcher<M>, addr: u32, len: u32) {
        match self {
            PatchAction::Substitute { offset, replacement } => {
                patcher.substitute_byte(addr, offset, replacement)
            }
            PatchAction::NopFill => patcher.nop_fill(addr, len),
            PatchAction::RewriteBranch { offset } => patcher.rewrite_branch(addr, offset),
        }
    }
}

/// The firmware-reentry collaborator the pipeline defers to when it is
/// done. On hardware this wraps the HAL reboot routine; hosts substitute
/// whatever "never comes back" means for them.

pub trait Firmware {
    /// Ticks one second of the pre-reboot countdown.
    fn sleep_second(&mut self);

    /// Re-enters firmware. Never returns.
    fn reboot(&mut self) -> !;
}

/// What one pipeline run did, for callers that want to inspect the outcome
/// instead of rebooting straight away.

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    /// The online-service string was found and corrupted.
    pub xonline_patched: bool,
    /// The devkit flag was set and got cleared.
    pub devkit_flag_cleared: bool,
    /// The instruction that re-sets the devkit flag was blanked.
    pub devkit_instruction_patched: bool,
    /// How many dashboard-detection sites were rewritten.
    pub dashboard_sites_patched: u32,
}

/// Runs every patch step in its fixed order and reports what happened.
///
/// The devkit flag clear and the devkit instruction blank are two halves
/// of one fix: the cleared bit does not survive the instruction running
/// again, so the steps stay adjacent and unconditional in the order below.

pub fn run<M: KernelMemory>(patcher: &mut KernelPatcher<M>) -> PipelineReport {
    let mut report = PipelineReport::default();

    info!("Checking for XONLINE signature...");
    if let Some(addr) = patcher.find_signature(&Signature::xonline()) {
        info!("Found. Your BIOS may block XBL. Patching...");
        // SAFETY: addr is a fresh match of the 7-byte signature.
        unsafe {
            patcher.substitute_byte(addr, XONLINE_SUBSTITUTE_OFFSET, XONLINE_REPLACEMENT);
        }
        info!("Done. XBL should be unblocked now.");
        report.xonline_patched = true;
    } else {
        info!("Not found, you should be fine.");
    }

    info!("Checking devkit flag...");
    // A fault reading the flags word reads as "flag absent": skip and move on.
    if patcher.has_devkit_flag().unwrap_or(false) {
        info!("Found. MACS wouldn't work. Patching...");
        report.devkit_flag_cleared = patcher.clear_devkit_flag().is_ok();
        info!("Done. MACS should now work.");
    } else {
        info!("Not found, you should be fine.");
    }

    info!("Checking for devkit flag set instruction...");
    let devkit_sig = Signature::devkit_flag_set(patcher.memory().flags_addr());
    if let Some(addr) = patcher.find_signature(&devkit_sig) {
        info!("Found. MACS wouldn't work. Patching...");
        // SAFETY: addr matches the full devkit instruction, all of which
        // gets blanked.
        unsafe {
            patcher.nop_fill(addr, devkit_sig.len());
        }
        info!("Done. MACS should work now.");
        report.devkit_instruction_patched = true;
    } else {
        info!("Not found, maybe it'll work, maybe not.");
    }

    info!("Checking for dashboard detection code...");
    let dashboard_sig = Signature::dashboard_check();
    // The check recurs at several call sites, so patch until the scan comes
    // up empty. The cap keeps this finite even if a patch ever failed to
    // change the bytes underneath us.
    let cap = patcher.bounds().size() / dashboard_sig.len() + 1;
    for _ in 0..cap {
        let Some(addr) = patcher.find_signature(&dashboard_sig) else {
            break;
        };
        info!("Found. Patching...");
        // SAFETY: addr is a fresh match; the branch byte sits at a fixed
        // offset inside it.
        unsafe {
            patcher.rewrite_branch(addr, DASHBOARD_BRANCH_OFFSET);
        }
        report.dashboard_sites_patched += 1;
    }

    report
}

/// The full boot flow: run the pipeline, count down, hand control to the
/// firmware. Never returns.

pub fn run_and_reboot<M: KernelMemory>(
    patcher: &mut KernelPatcher<M>,
    firmware: &mut impl Firmware,
) -> ! {
    let report = run(patcher);
    debug!("pipeline report: {report:?}");

    info!("We're done here. Rebooting in");
    for remaining in (1..=COUNTDOWN_SECONDS).rev() {
        info!("{remaining}");
        firmware.sleep_second();
    }

    firmware.reboot()
}
