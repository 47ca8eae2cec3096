//! The full boot pipeline over a sandboxed image: step ordering, the
//! devkit flag/instruction coupling, skip-and-continue behavior, and the
//! countdown handoff.

use kernpatch::pipeline::{self, Firmware, PipelineReport};
use kernpatch::sig::{JMP_SHORT, NOP};
use kernpatch::{KernelMemory, KernelPatcher, SandboxKernel, Signature};

const BASE: u32 = 0x8001_0000;

const XONLINE_AT: u32 = BASE + 0x480;
const DEVKIT_INSTR_AT: u32 = BASE + 0x900;
const DASH_AT: [u32; 2] = [BASE + 0xc00, BASE + 0x1400];

fn fully_loaded_kernel() -> SandboxKernel {
    let mut kernel = SandboxKernel::blank(BASE, 0x2000);
    kernel.write_bytes(XONLINE_AT, b"XONLINE");
    kernel.set_flags(0x0000_0003);
    let devkit_sig = Signature::devkit_flag_set(kernel.flags_addr());
    kernel.write_bytes(DEVKIT_INSTR_AT, devkit_sig.as_bytes());
    let dashboard_sig = Signature::dashboard_check();
    for &site in &DASH_AT {
        kernel.write_bytes(site, dashboard_sig.as_bytes());
    }

    kernel
}

#[test]
fn patches_every_target_in_one_run() {
    let mut patcher = KernelPatcher::new(fully_loaded_kernel()).unwrap();
    let report = pipeline::run(&mut patcher);

    assert_eq!(
        report,
        PipelineReport {
            xonline_patched: true,
            devkit_flag_cleared: true,
            devkit_instruction_patched: true,
            dashboard_sites_patched: 2,
        }
    );

    // None of the original signatures survive.
    let devkit_sig = Signature::devkit_flag_set(patcher.memory().flags_addr());
    assert_eq!(patcher.find_signature(&Signature::xonline()), None);
    assert_eq!(patcher.find_signature(&devkit_sig), None);
    assert_eq!(patcher.find_signature(&Signature::dashboard_check()), None);

    let kernel = patcher.into_inner();
    assert_eq!(kernel.byte_at(XONLINE_AT + 1), b'I');
    assert_eq!(kernel.byte_at(DEVKIT_INSTR_AT), NOP);
    for site in DASH_AT {
        assert_eq!(kernel.byte_at(site + 12), JMP_SHORT);
    }
}

// The flag clear and the instruction blank are one fix in two parts: after
// a run of the pipeline both the bit and the instruction that would re-set
// it are gone.
#[test]
fn devkit_flag_and_instruction_go_together() {
    let mut patcher = KernelPatcher::new(fully_loaded_kernel()).unwrap();
    pipeline::run(&mut patcher);

    let kernel = patcher.into_inner();
    assert_eq!(kernel.flags() & 0x2, 0);
    assert_eq!(kernel.byte_at(DEVKIT_INSTR_AT), NOP);
    assert_eq!(kernel.byte_at(DEVKIT_INSTR_AT + 6), NOP);
}

#[test]
fn an_empty_image_runs_clean_through() {
    let kernel = SandboxKernel::blank(BASE, 0x800);
    let mut patcher = KernelPatcher::new(kernel).unwrap();

    assert_eq!(pipeline::run(&mut patcher), PipelineReport::default());
}

#[test]
fn one_missing_target_does_not_stop_the_rest() {
    // No XONLINE string anywhere; everything else still gets patched.
    let mut kernel = fully_loaded_kernel();
    kernel.write_bytes(XONLINE_AT, &[0; 7]);

    let mut patcher = KernelPatcher::new(kernel).unwrap();
    let report = pipeline::run(&mut patcher);

    assert!(!report.xonline_patched);
    assert!(report.devkit_flag_cleared);
    assert!(report.devkit_instruction_patched);
    assert_eq!(report.dashboard_sites_patched, 2);
}

// The devkit signature is rebuilt from wherever the hardware-info
// structure actually lives, not from a baked-in address.
#[test]
fn the_devkit_signature_follows_the_flags_structure() {
    let mut kernel = SandboxKernel::blank(BASE, 0x2000);
    kernel.set_flags_addr(BASE + 0x700);
    kernel.set_flags(0x0000_0002);
    let devkit_sig = Signature::devkit_flag_set(kernel.flags_addr());
    kernel.write_bytes(DEVKIT_INSTR_AT, devkit_sig.as_bytes());

    let mut patcher = KernelPatcher::new(kernel).unwrap();
    let report = pipeline::run(&mut patcher);

    assert!(report.devkit_flag_cleared);
    assert!(report.devkit_instruction_patched);
    assert_eq!(patcher.into_inner().flags(), 0);
}

#[test]
fn a_faulting_image_runs_clean_through() {
    // Poisoning the flags word aborts every scan that walks over it and
    // makes the flag unreadable; the pipeline still finishes.
    let mut kernel = fully_loaded_kernel();
    let flags_addr = kernel.flags_addr();
    kernel.poison_range(flags_addr..flags_addr + 4);

    let mut patcher = KernelPatcher::new(kernel).unwrap();
    assert_eq!(pipeline::run(&mut patcher), PipelineReport::default());
}

struct CountingFirmware {
    sleeps: u32,
}

impl Firmware for CountingFirmware {
    fn sleep_second(&mut self) {
        self.sleeps += 1;
    }

    fn reboot(&mut self) -> ! {
        panic!("firmware reentry")
    }
}

#[test]
fn the_countdown_runs_before_the_firmware_handoff() {
    let kernel = SandboxKernel::blank(BASE, 0x800);
    let mut patcher = KernelPatcher::new(kernel).unwrap();
    let mut firmware = CountingFirmware { sleeps: 0 };

    let handoff = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pipeline::run_and_reboot(&mut patcher, &mut firmware);
    }));

    assert!(handoff.is_err(), "reboot must be reached");
    assert_eq!(firmware.sleeps, 10);
}
