//! Guest exception stack frames as a 68020 stacks them, encoded big-endian in
//! the order they appear in memory starting at the final stack pointer.
//!
//! Every frame starts with SR, PC and the format/vector-offset word, so `RTE`
//! can find out from the format nibble how much to unstack.

use crate::state::Size;

pub const FC_USER_DATA: u8 = 1;
pub const FC_USER_PROGRAM: u8 = 2;
pub const FC_SUPERVISOR_DATA: u8 = 5;
pub const FC_SUPERVISOR_PROGRAM: u8 = 6;

pub const VECTOR_BUS_ERROR: u8 = 2;
pub const VECTOR_ADDRESS_ERROR: u8 = 3;

const FORMAT_NORMAL: u16 = 0x0;
const FORMAT_SHORT_BUS_FAULT: u16 = 0xA;

/// Bytes a frame stacks beyond its first eight, read from its
/// format/vector-offset word. `None` for formats a 68020 never builds.
pub fn extra_frame_bytes(format_vector: u16) -> Option<u32> {
    match format_vector >> 12 {
        0x0 | 0x1 => Some(0),
        0x2 => Some(4),
        0x9 => Some(12),
        0xA => Some(24),
        0xB => Some(84),
        _ => None,
    }
}

fn format_word(format: u16, vector: u8) -> u16 {
    (format << 12) | (u16::from(vector) << 2)
}

/// Format $A (short bus cycle) fault frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusErrorFrame {
    pub pc: u32,
    pub sr: u16,
    pub vector: u8,
    /// Opcode of the faulting instruction, stacked as pipe stage C.
    pub ir: u16,
    pub address: u32,
    pub size: Size,
    pub write: bool,
    /// The fault hit an instruction prefetch rather than a data cycle.
    pub instruction: bool,
    pub function_code: u8,
    /// Data output buffer: the value a faulting write tried to store.
    pub data: u32,
}

impl BusErrorFrame {
    pub const LEN: u32 = 32;

    /// Special status word: FC (stage C fault) or DF (data fault), RW (set
    /// for reads), SIZE and the function code.
    pub fn status_word(&self) -> u16 {
        let mut word = u16::from(self.function_code & 0x7);
        word |= match self.size {
            Size::Byte => 0x0010,
            Size::Word => 0x0020,
            Size::Long => 0x0000,
        };
        if !self.write {
            word |= 0x0040;
        }
        if self.instruction {
            word |= 0x8000;
        } else {
            word |= 0x0100;
        }
        word
    }

    pub fn encode(&self) -> [u8; Self::LEN as usize] {
        let mut out = [0u8; Self::LEN as usize];
        out[0..2].copy_from_slice(&self.sr.to_be_bytes());
        out[2..6].copy_from_slice(&self.pc.to_be_bytes());
        out[6..8].copy_from_slice(&format_word(FORMAT_SHORT_BUS_FAULT, self.vector).to_be_bytes());
        out[10..12].copy_from_slice(&self.status_word().to_be_bytes());
        out[12..14].copy_from_slice(&self.ir.to_be_bytes());
        out[16..20].copy_from_slice(&self.address.to_be_bytes());
        out[24..28].copy_from_slice(&self.data.to_be_bytes());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionFrame {
    /// Format $0 frame: SR, PC, format/vector-offset word.
    Normal { sr: u16, pc: u32, vector: u8 },
    BusFault(BusErrorFrame),
}

impl ExceptionFrame {
    /// Picks the frame layout the guest expects for `vector`.
    ///
    /// Bus and address error vectors get a format $A frame describing a data
    /// read of `pc` in supervisor space; everything else gets a format $0
    /// frame.
    pub fn for_vector(vector: u8, sr: u16, pc: u32) -> Self {
        match vector {
            VECTOR_BUS_ERROR | VECTOR_ADDRESS_ERROR => ExceptionFrame::BusFault(BusErrorFrame {
                pc,
                sr,
                vector,
                ir: 0,
                address: pc,
                size: Size::Word,
                write: false,
                instruction: false,
                function_code: FC_SUPERVISOR_DATA,
                data: 0,
            }),
            _ => ExceptionFrame::Normal { sr, pc, vector },
        }
    }

    pub fn byte_len(&self) -> u32 {
        match self {
            ExceptionFrame::Normal { .. } => 8,
            ExceptionFrame::BusFault(_) => BusErrorFrame::LEN,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ExceptionFrame::Normal { sr, pc, vector } => {
                let mut out = Vec::with_capacity(8);
                out.extend_from_slice(&sr.to_be_bytes());
                out.extend_from_slice(&pc.to_be_bytes());
                out.extend_from_slice(&format_word(FORMAT_NORMAL, *vector).to_be_bytes());
                out
            }
            ExceptionFrame::BusFault(frame) => frame.encode().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fault() -> BusErrorFrame {
        BusErrorFrame {
            pc: 0x0001_2344,
            sr: 0x2300,
            vector: VECTOR_BUS_ERROR,
            ir: 0x23FC,
            address: 0x00FF_FA42,
            size: Size::Long,
            write: true,
            instruction: false,
            function_code: FC_USER_DATA,
            data: 0xCAFE_F00D,
        }
    }

    #[test]
    fn bus_error_status_word() {
        assert_eq!(write_fault().status_word(), 0x0100 | 0x01);

        let read = BusErrorFrame {
            size: Size::Byte,
            write: false,
            instruction: true,
            function_code: FC_SUPERVISOR_PROGRAM,
            ..write_fault()
        };
        assert_eq!(read.status_word(), 0x8000 | 0x40 | 0x10 | 0x06);
    }

    #[test]
    fn format0_layout() {
        let frame = ExceptionFrame::for_vector(69, 0x2300, 0x0001_2344);
        assert_eq!(frame.byte_len(), 8);
        assert_eq!(
            frame.encode(),
            vec![0x23, 0x00, 0x00, 0x01, 0x23, 0x44, 0x01, 0x14]
        );
    }

    #[test]
    fn format_a_layout() {
        let bytes = write_fault().encode();
        assert_eq!(&bytes[0..8], &[0x23, 0x00, 0x00, 0x01, 0x23, 0x44, 0xA0, 0x08]);
        assert_eq!(&bytes[10..14], &[0x01, 0x01, 0x23, 0xFC]);
        assert_eq!(&bytes[16..20], &[0x00, 0xFF, 0xFA, 0x42]);
        assert_eq!(&bytes[24..28], &[0xCA, 0xFE, 0xF0, 0x0D]);
    }

    #[test]
    fn every_frame_unstacks_by_its_own_format() {
        for vector in [VECTOR_BUS_ERROR, VECTOR_ADDRESS_ERROR, 4, 69] {
            let frame = ExceptionFrame::for_vector(vector, 0x2000, 0x100);
            let bytes = frame.encode();
            assert_eq!(bytes.len() as u32, frame.byte_len());

            let format_vector = u16::from_be_bytes([bytes[6], bytes[7]]);
            assert_eq!(format_vector & 0x0FFF, u16::from(vector) << 2);
            assert_eq!(extra_frame_bytes(format_vector), Some(frame.byte_len() - 8));
        }
        assert_eq!(extra_frame_bytes(0x7000), None);
    }
}
