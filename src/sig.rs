//! The byte signatures identifying the kernel code this program rewrites,
//! plus the opcodes the patches write over them.

/// x86 no-op, used to blank out whole instructions.
pub const NOP: u8 = 0x90;

/// Short unconditional jump, written over a conditional branch to force it.
pub const JMP_SHORT: u8 = 0xeb;

/// Short jump-if-not-zero, the branch the dashboard check takes when it
/// dislikes what it finds.
pub const JNZ_SHORT: u8 = 0x75;

/// An exact byte sequence to locate inside the kernel image. No wildcards
/// and no masking: every byte has to match.
///
/// Most signatures are plain constants, but the devkit one embeds the
/// runtime address of the hardware-info structure and has to be rebuilt
/// from the live address on every run.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    bytes: Vec<u8>,
}

impl Signature {
    /// A signature over literal bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Signature { bytes: bytes.to_vec() }
    }

    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The "XONLINE" service-name string that the online-service block
    /// recognizes.
    pub fn xonline() -> Self {
        Signature::from_bytes(b"XONLINE")
    }

    /// The `or dword ptr [flags], 2` instruction that sets the devkit bit
    /// during boot. The four middle bytes are the address of the
    /// hardware-info flags word encoded as the instruction's memory
    /// operand, which is why this takes the live address instead of
    /// spelling the whole sequence out as a constant.
    pub fn devkit_flag_set(flags_addr: u32) -> Self {
        let mut bytes = vec![0x83, 0x0d];
        bytes.extend_from_slice(&flags_addr.to_le_bytes());
        bytes.push(0x02);
        Signature { bytes }
    }

    /// The dashboard-detection sequence: a load of a kernel global, a
    /// compare against it, and the `jnz` to the rejection path. The
    /// trailing branch byte is the one the patch rewrites.
    pub fn dashboard_check() -> Self {
        Signature::from_bytes(&[
            0xa1, 0x18, 0x01, 0x01, 0x00,
            0x81, 0x78, 0x08, 0x00, 0x00, 0xfe, 0xff,
            JNZ_SHORT,
        ])
    }
}
