//! This example shows the fault containment the scanner relies on near the
//! image boundary. The sandbox image has the XONLINE string planted in it,
//! but the range in front of it is poisoned, so the scan faults partway
//! through and comes back empty-handed instead of crashing.

use kernpatch::{KernelPatcher, SandboxKernel, Signature};

fn main() {
    let mut kernel = SandboxKernel::blank(0x8001_0000, 0x1000);
    kernel.write_bytes(0x8001_0800, b"XONLINE");

    let patcher = KernelPatcher::new(kernel).unwrap();
    println!(
        "clean scan: {:x?}",
        patcher.find_signature(&Signature::xonline())
    );

    let mut kernel = patcher.into_inner();
    kernel.poison_range(0x8001_0400..0x8001_0500);

    let patcher = KernelPatcher::new(kernel).unwrap();
    println!(
        "poisoned scan: {:x?}",
        patcher.find_signature(&Signature::xonline())
    );
}
