//! # Purpose
//!
//! Runs the whole boot pipeline against a sandboxed kernel image with every
//! patch target planted in it, printing the same status lines the
//! on-console program shows, then "reboots" by exiting. Useful for eyeballing
//! the pipeline without flashing anything.
//!
//! # Usage
//!
//! `cargo run --example boot_patch`

use std::thread;
use std::time::Duration;

use anyhow::Result;
use kernpatch::pipeline::{self, Firmware};
use kernpatch::{KernelMemory, KernelPatcher, SandboxKernel, Signature};

/// Stands in for the HAL: the countdown really sleeps, the reboot is an
/// exit.
struct HostFirmware;

impl Firmware for HostFirmware {
    fn sleep_second(&mut self) {
        thread::sleep(Duration::from_secs(1));
    }

    fn reboot(&mut self) -> ! {
        log::info!("(firmware reentry)");
        std::process::exit(0);
    }
}

fn init_logging() -> Result<()> {
    fern::Dispatch::new()
        .format(|out, msg, record| out.finish(format_args!("[{:5}] {}", record.level(), msg)))
        .level(log::LevelFilter::Debug)
        .chain(std::io::stdout())
        .apply()?;

    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let mut kernel = SandboxKernel::blank(0x8001_0000, 0x2000);

    // The online-service string, the devkit flag plus the instruction that
    // re-sets it, and two dashboard-detection call sites.
    kernel.write_bytes(0x8001_0480, b"XONLINE");
    kernel.set_flags(0x0000_0007);
    let devkit_sig = Signature::devkit_flag_set(kernel.flags_addr());
    kernel.write_bytes(0x8001_0900, devkit_sig.as_bytes());
    let dashboard_sig = Signature::dashboard_check();
    kernel.write_bytes(0x8001_0c00, dashboard_sig.as_bytes());
    kernel.write_bytes(0x8001_1400, dashboard_sig.as_bytes());

    let mut patcher = KernelPatcher::new(kernel)?;
    pipeline::run_and_reboot(&mut patcher, &mut HostFirmware)
}
