//! TOS and GEM constants and big-endian structure layouts the bridge reads
//! out of guest memory.

pub const TRAP_GEMDOS: u8 = 1;
pub const TRAP_AES_VDI: u8 = 2;
pub const TRAP_BIOS: u8 = 13;
pub const TRAP_XBIOS: u8 = 14;

pub mod gemdos {
    pub const SUPER: u16 = 0x20;
    /// `Super(1)` only asks for the current mode.
    pub const SUPER_INQUIRE: u32 = 1;
}

pub mod bios {
    pub const SETEXC: u16 = 5;
    /// `Setexc` handler argument that reads the vector without changing it.
    pub const SETEXC_INQUIRE: u32 = 0xFFFF_FFFF;
}

pub mod xbios {
    pub const SUPEXEC: u16 = 0x26;
}

pub mod aes {
    /// D0 value selecting the AES on trap #2 (VDI uses 115).
    pub const MAGIC: u16 = 200;

    pub const MENU_BAR: u16 = 30;
    pub const OBJC_ADD: u16 = 40;
    pub const OBJC_DRAW: u16 = 42;
    pub const OBJC_CHANGE: u16 = 47;

    /// `menu_bar` has no depth argument; the whole bar is walked.
    pub const MENU_BAR_DEPTH: i16 = 20;
}

/// AES parameter block: six pointers to the parameter arrays.
pub mod aespb {
    pub const CONTROL: u32 = 0;
    pub const GLOBAL: u32 = 4;
    pub const INTIN: u32 = 8;
    pub const INTOUT: u32 = 12;
    pub const ADDRIN: u32 = 16;
    pub const ADDROUT: u32 = 20;
    pub const SIZE: u32 = 24;
}

/// `OBJECT`, one entry of an object tree.
pub mod object {
    pub const NEXT: u32 = 0;
    pub const HEAD: u32 = 2;
    pub const TAIL: u32 = 4;
    pub const TYPE: u32 = 6;
    pub const FLAGS: u32 = 8;
    pub const STATE: u32 = 10;
    pub const SPEC: u32 = 12;
    pub const X: u32 = 16;
    pub const Y: u32 = 18;
    pub const WIDTH: u32 = 20;
    pub const HEIGHT: u32 = 22;
    pub const SIZE: u32 = 24;

    /// Terminates `ob_head`/`ob_next` chains.
    pub const NIL: i16 = -1;
    /// Object drawn by application code through a `USERBLK`.
    pub const G_USERDEF: u16 = 24;

    pub fn address(tree: u32, index: i16) -> u32 {
        tree.wrapping_add(u32::from(index as u16) * SIZE)
    }
}

/// `USERBLK`, pointed to by the `ob_spec` of a `G_USERDEF` object.
pub mod userblk {
    pub const CODE: u32 = 0;
    pub const PARM: u32 = 4;
    pub const SIZE: u32 = 8;
}

/// `PARMBLK`, handed to USERDEF draw routines.
pub mod parmblk {
    pub const TREE: u32 = 0;
    pub const OBJ: u32 = 4;
    pub const PREVSTATE: u32 = 6;
    pub const CURRSTATE: u32 = 8;
    pub const X: u32 = 10;
    pub const Y: u32 = 12;
    pub const WIDTH: u32 = 14;
    pub const HEIGHT: u32 = 16;
    pub const CLIP_X: u32 = 18;
    pub const CLIP_Y: u32 = 20;
    pub const CLIP_WIDTH: u32 = 22;
    pub const CLIP_HEIGHT: u32 = 24;
    pub const PARM: u32 = 26;
    pub const SIZE: u32 = 30;
}
