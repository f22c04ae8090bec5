use bitflags::bitflags;

bitflags! {
    /// 680x0 status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusRegister: u16 {
        const CARRY = 1 << 0;
        const OVERFLOW = 1 << 1;
        const ZERO = 1 << 2;
        const NEGATIVE = 1 << 3;
        const EXTEND = 1 << 4;
        /// Interrupt priority mask (3 bits).
        const IPL = 0b111 << 8;
        const MASTER = 1 << 12;
        const SUPERVISOR = 1 << 13;
        const TRACE0 = 1 << 14;
        const TRACE1 = 1 << 15;
    }
}

impl StatusRegister {
    pub fn from_reg(value: u32) -> Self {
        Self::from_bits_retain(value as u16)
    }

    pub fn ipl(self) -> u8 {
        ((self.bits() & Self::IPL.bits()) >> 8) as u8
    }
}

/// Registers addressable through [`crate::GuestCpu::reg`].
///
/// `Sp` and `A7` both name the active stack pointer. `Usp`/`Isp` name the
/// banked user and interrupt stack pointers regardless of the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    D0,
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    Pc,
    Sr,
    Sp,
    Usp,
    Isp,
    /// Address of the instruction currently executing.
    Ppc,
    /// Opcode word of the instruction currently executing.
    Ir,
}

impl Register {
    pub const DATA: [Register; 8] = [
        Register::D0,
        Register::D1,
        Register::D2,
        Register::D3,
        Register::D4,
        Register::D5,
        Register::D6,
        Register::D7,
    ];

    pub const ADDRESS: [Register; 8] = [
        Register::A0,
        Register::A1,
        Register::A2,
        Register::A3,
        Register::A4,
        Register::A5,
        Register::A6,
        Register::A7,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Size {
    Byte,
    Word,
    Long,
}

impl Size {
    pub const fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Long => 4,
        }
    }

    pub const fn mask(self) -> u32 {
        match self {
            Size::Byte => 0xFF,
            Size::Word => 0xFFFF,
            Size::Long => 0xFFFF_FFFF,
        }
    }
}

/// Complete snapshot of a guest core.
///
/// Besides the architectural registers this carries the core's scheduling
/// state (cycle pool, pending interrupt cycles, stopped flag) so that a
/// restore puts the core back exactly where the snapshot was taken. Code
/// outside the core only moves snapshots around; it never edits them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestContext {
    pub d: [u32; 8],
    /// `a[7]` is the active stack pointer.
    pub a: [u32; 8],
    /// The stack pointer of the mode that is not active (USP while in
    /// supervisor mode, ISP while in user mode).
    pub inactive_sp: u32,
    pub pc: u32,
    pub ppc: u32,
    pub sr: u16,
    pub ir: u16,
    pub cycles: i32,
    pub initial_cycles: i32,
    pub int_cycles: i32,
    pub stopped: bool,
}

impl GuestContext {
    pub fn status(&self) -> StatusRegister {
        StatusRegister::from_bits_retain(self.sr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipl_is_extracted_from_mask_bits() {
        assert_eq!(StatusRegister::from_reg(0x2300).ipl(), 3);
        assert_eq!(StatusRegister::from_reg(0x0700).ipl(), 7);
        assert!(StatusRegister::from_reg(0x2300).contains(StatusRegister::SUPERVISOR));
    }

    #[test]
    fn size_masks() {
        assert_eq!(Size::Word.mask(), 0xFFFF);
        assert_eq!(Size::Long.bytes(), 4);
    }
}
