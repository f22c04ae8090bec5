//! Code the bridge keeps in guest-visible memory.
//!
//! Host-side entry points are represented in the guest by reserved Line-F
//! opcodes: when the guest executes one, the core reports a Line-F gate and the
//! bridge runs the matching host routine.

use tosemu_cpu::{Size, OPCODE_RTE, OPCODE_RTS};

use crate::host::HostMemory;

pub(crate) const STUB_SUPEXEC: u16 = 0xF7A0;
pub(crate) const STUB_USERDEF: u16 = 0xF7A1;
pub(crate) const STUB_VECTOR: u16 = 0xF7A2;

const RETURN_OFFSET: u32 = 0;
const SUPEXEC_OFFSET: u32 = 2;
const USERDEF_OFFSET: u32 = 4;
const VECTOR_OFFSET: u32 = 8;

const IMAGE: [u16; 6] = [
    OPCODE_RTS,
    STUB_SUPEXEC,
    STUB_USERDEF,
    OPCODE_RTS,
    STUB_VECTOR,
    OPCODE_RTE,
];

/// Addresses of the resident stubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidentCode {
    base: u32,
}

impl ResidentCode {
    pub const BYTES: u32 = IMAGE.len() as u32 * 2;

    /// Writes the stubs at `base`.
    pub fn install<M: HostMemory + ?Sized>(host: &mut M, base: u32) -> Self {
        for (i, word) in IMAGE.iter().enumerate() {
            host.write(base + i as u32 * 2, Size::Word, u32::from(*word));
        }
        Self { base }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Plain `RTS`. Exception frames built for guest interrupt handlers return
    /// here, where the return sentinel ends the nested run.
    pub fn return_stub(&self) -> u32 {
        self.base + RETURN_OFFSET
    }

    /// Target of `Supexec`: runs the callback and returns to the caller.
    pub fn supexec_trampoline(&self) -> u32 {
        self.base + SUPEXEC_OFFSET
    }

    /// Stored into hooked USERBLKs in place of the guest's draw routine.
    pub fn userdef_trampoline(&self) -> u32 {
        self.base + USERDEF_OFFSET
    }

    /// Stored into real vector slots the guest installs handlers for.
    pub fn vector_trampoline(&self) -> u32 {
        self.base + VECTOR_OFFSET
    }

    pub fn contains(&self, address: u32) -> bool {
        (self.base..self.base + Self::BYTES).contains(&address)
    }
}
