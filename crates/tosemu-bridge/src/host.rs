//! The native side of the bridge: the real TOS the guest's calls end up in.

use tosemu_cpu::Size;

/// Memory as the host sees it. Guest and host share one address space.
pub trait HostMemory {
    fn read(&mut self, address: u32, size: Size) -> u32;
    fn write(&mut self, address: u32, size: Size, value: u32);

    /// Read with the host temporarily in supervisor mode (low memory, I/O).
    fn supervisor_read(&mut self, address: u32, size: Size) -> u32;

    /// Write with the host temporarily in supervisor mode (low memory, I/O).
    fn supervisor_write(&mut self, address: u32, size: Size, value: u32);
}

/// Opaque value returned by a host privilege raise and handed back to undo it
/// (the previous supervisor stack pointer on a real TOS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPrivilegeToken(pub u32);

/// Guest registers a forwarded OS call needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapRegisters {
    pub d0: u32,
    pub d1: u32,
    /// Guest stack pointer; the call number and arguments start here.
    pub sp: u32,
}

/// Scratch registers a native Line-A routine hands back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineARegisters {
    pub d0: u32,
    pub a0: u32,
    pub a1: u32,
    pub a2: u32,
}

/// The sixteen Line-A graphics primitives, by opcode low nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LineAFunction {
    Init = 0,
    PutPixel = 1,
    GetPixel = 2,
    Line = 3,
    HorizontalLine = 4,
    FilledRect = 5,
    FilledPolygon = 6,
    BitBlt = 7,
    TextBlt = 8,
    ShowMouse = 9,
    HideMouse = 10,
    TransformMouse = 11,
    UndrawSprite = 12,
    DrawSprite = 13,
    CopyRaster = 14,
    SeedFill = 15,
}

impl LineAFunction {
    pub const ALL: [LineAFunction; 16] = [
        LineAFunction::Init,
        LineAFunction::PutPixel,
        LineAFunction::GetPixel,
        LineAFunction::Line,
        LineAFunction::HorizontalLine,
        LineAFunction::FilledRect,
        LineAFunction::FilledPolygon,
        LineAFunction::BitBlt,
        LineAFunction::TextBlt,
        LineAFunction::ShowMouse,
        LineAFunction::HideMouse,
        LineAFunction::TransformMouse,
        LineAFunction::UndrawSprite,
        LineAFunction::DrawSprite,
        LineAFunction::CopyRaster,
        LineAFunction::SeedFill,
    ];

    pub fn from_opcode(opcode: u16) -> Self {
        Self::ALL[usize::from(opcode & 0xF)]
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Entry points back into the guest, handed to the host while it runs a
/// forwarded call.
///
/// The native AES draws `G_USERDEF` objects by calling their code pointer,
/// which after hooking is the bridge's trampoline; the host routes such calls
/// through [`GuestCallbacks::call_userdef`]. Real interrupts that arrive while
/// the host is busy go through [`GuestCallbacks::interrupt`].
pub trait GuestCallbacks {
    /// Invokes USERDEF `code` with the PARMBLK at `parmblk`. Returns the value
    /// the AES should see.
    fn call_userdef(&mut self, host: &mut dyn HostOs, code: u32, parmblk: u32) -> u16;

    fn interrupt(&mut self, host: &mut dyn HostOs, vector: u8);
}

pub trait HostOs: HostMemory {
    /// Allocates `bytes` of memory visible to the guest. Called only while the
    /// bridge is built.
    fn allocate(&mut self, bytes: u32) -> Option<u32>;

    /// Whether the host is currently in supervisor mode.
    fn super_inquire(&mut self) -> bool;
    fn super_enter(&mut self) -> HostPrivilegeToken;
    fn super_leave(&mut self, token: HostPrivilegeToken);

    /// Runs `TRAP #number` natively with the guest's registers and returns D0.
    fn trap(&mut self, number: u8, regs: TrapRegisters, guest: &mut dyn GuestCallbacks) -> u32;

    /// Runs Line-A `function` natively with the guest's stack pointer.
    fn line_a(&mut self, function: LineAFunction, sp: u32) -> LineARegisters;

    /// Next pending real interrupt that should reach the guest, if any.
    fn poll_interrupt(&mut self) -> Option<u8> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_a_functions_follow_opcode_nibble() {
        assert_eq!(LineAFunction::from_opcode(0xA000), LineAFunction::Init);
        assert_eq!(LineAFunction::from_opcode(0xA00A), LineAFunction::HideMouse);
        assert_eq!(LineAFunction::from_opcode(0xA92F), LineAFunction::SeedFill);
        for (index, function) in LineAFunction::ALL.iter().enumerate() {
            assert_eq!(function.index(), index);
        }
    }
}
