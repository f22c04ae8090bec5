//! Exception-vector virtualization.
//!
//! The guest never writes the real vector table. A handler it installs is
//! remembered in a [`TrampolineBinding`] and the real slot is pointed at the
//! bridge's vector trampoline instead; when the interrupt really happens the
//! guest handler is run in the emulator through
//! [`tosemu_cpu::SubroutineExecutor`].

use tosemu_cpu::frame::{FC_SUPERVISOR_DATA, FC_USER_DATA, VECTOR_BUS_ERROR};
use tosemu_cpu::{
    BusErrorFrame, CpuExit, ExceptionFrame, GuestCpu, Register, Size, StatusRegister,
    RETURN_SENTINEL,
};
use tosemu_store::{HashTable, StoreError};
use tracing::{debug, trace, warn};

use crate::bridge::Session;
use crate::config::VECTOR_TABLE_END;

/// Shadow slot holding the guest's bus-error handler. Seeding the bus-error
/// vector's own slot lands here.
pub const BUS_ERROR_SHADOW_INDEX: usize = VECTOR_BUS_ERROR as usize + 1;

const VECTOR_SLOTS: usize = (VECTOR_TABLE_END / 4) as usize;

/// Guest-side copies of vector handlers, indexed by vector number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorShadowTable {
    slots: [u32; 256],
}

impl Default for VectorShadowTable {
    fn default() -> Self {
        Self { slots: [0; 256] }
    }
}

impl VectorShadowTable {
    /// Handler recorded at `index`, 0 when there is none.
    pub fn get(&self, index: usize) -> u32 {
        self.slots.get(index).copied().unwrap_or(0)
    }

    fn set(&mut self, index: usize, handler: u32) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = handler;
                true
            }
            None => false,
        }
    }
}

/// A real vector slot redirected to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrampolineBinding {
    /// What the real slot now holds.
    pub trampoline: u32,
    /// The guest routine the slot was meant to run.
    pub handler: u32,
}

impl TrampolineBinding {
    fn encode(&self) -> [u8; 8] {
        let mut out = [0; 8];
        out[..4].copy_from_slice(&self.trampoline.to_be_bytes());
        out[4..].copy_from_slice(&self.handler.to_be_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; 8] = bytes.try_into().ok()?;
        let (trampoline, handler) = bytes.split_at(4);
        Some(Self {
            trampoline: u32::from_be_bytes(trampoline.try_into().ok()?),
            handler: u32::from_be_bytes(handler.try_into().ok()?),
        })
    }
}

/// Bytes of one vector slot the guest has written so far through narrower
/// or misaligned writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PartialSlot {
    value: u32,
    written: u8,
}

impl PartialSlot {
    const COMPLETE: u8 = 0xF;

    /// Merges the byte at `offset` within the slot. Returns the whole long
    /// once all four bytes are in.
    fn merge(&mut self, offset: u32, byte: u8) -> Option<u32> {
        let shift = 8 * (3 - offset);
        self.value = (self.value & !(0xFF << shift)) | (u32::from(byte) << shift);
        self.written |= 1 << offset;
        (self.written == Self::COMPLETE).then(|| std::mem::take(self).value)
    }
}

#[derive(Debug, Clone)]
pub struct VectorVirtualizer {
    shadow: VectorShadowTable,
    bindings: HashTable,
    partial: [PartialSlot; VECTOR_SLOTS],
}

impl VectorVirtualizer {
    pub fn new(buckets: usize) -> Result<Self, StoreError> {
        Ok(Self {
            shadow: VectorShadowTable::default(),
            bindings: HashTable::with_buckets(buckets)?,
            partial: [PartialSlot::default(); VECTOR_SLOTS],
        })
    }

    pub fn shadow(&self) -> &VectorShadowTable {
        &self.shadow
    }

    /// Binding for the real slot at `slot_address`.
    pub fn binding(&self, slot_address: u32) -> Option<TrampolineBinding> {
        self.bindings
            .get(&slot_address.to_be_bytes())
            .and_then(TrampolineBinding::decode)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Shadow index a write to the seed slot at `address` lands in.
    pub fn seed_index(address: u32) -> usize {
        address as usize / 4 + 1
    }

    /// Whether the slot at `slot_address` has bytes waiting for the rest of
    /// its long word.
    pub fn has_partial(&self, slot_address: u32) -> bool {
        self.partial
            .get(slot_address as usize / 4)
            .is_some_and(|slot| slot.written != 0)
    }

    fn bind(&mut self, slot_address: u32, binding: TrampolineBinding) -> Result<(), StoreError> {
        self.bindings
            .put(&slot_address.to_be_bytes(), &binding.encode())
    }

    /// Records one byte written into the vector table. Returns the slot
    /// address and its handler once the slot has been written whole.
    fn merge_byte(&mut self, address: u32, byte: u8) -> Option<(u32, u32)> {
        let slot_address = address & !3;
        let slot = self.partial.get_mut(slot_address as usize / 4)?;
        slot.merge(address & 3, byte).map(|handler| (slot_address, handler))
    }

    fn clear_partial(&mut self, slot_address: u32) {
        if let Some(slot) = self.partial.get_mut(slot_address as usize / 4) {
            *slot = PartialSlot::default();
        }
    }
}

impl Session<'_> {
    /// Guest write to a guarded address.
    pub(crate) fn guarded_write(
        &mut self,
        cpu: &mut dyn GuestCpu,
        address: u32,
        size: Size,
        value: u32,
    ) {
        if self.state.config.bus_error_addresses.contains(&address) {
            self.raise_bus_error(cpu, address, size, value);
            return;
        }

        if address >= VECTOR_TABLE_END {
            self.host.supervisor_write(address, size, value);
            return;
        }

        if address % 4 == 0 && size == Size::Long {
            self.state.vectors.clear_partial(address);
            self.vector_slot_write(address, value);
            return;
        }

        // Narrow or misaligned: collect bytes per slot and act once a slot is
        // whole. Bytes past the table are ordinary system variables.
        let len = size.bytes();
        for offset in 0..len {
            let byte_address = address.wrapping_add(offset);
            let byte = (value >> (8 * (len - 1 - offset))) as u8;
            if byte_address >= VECTOR_TABLE_END {
                self.host.supervisor_write(byte_address, Size::Byte, u32::from(byte));
                continue;
            }
            match self.state.vectors.merge_byte(byte_address, byte) {
                Some((slot_address, handler)) => self.vector_slot_write(slot_address, handler),
                None => trace!(byte_address, byte, "holding partial vector write"),
            }
        }
    }

    /// A whole long word written to the vector slot at `slot_address`.
    fn vector_slot_write(&mut self, slot_address: u32, handler: u32) {
        if slot_address != self.state.config.seed_vector_address {
            self.install_vector(slot_address, handler);
            return;
        }

        let index = VectorVirtualizer::seed_index(slot_address);
        if self.state.vectors.shadow.set(index, handler) {
            debug!(slot_address, index, handler, "seeded shadow vector");
        } else {
            warn!(slot_address, index, "seed vector index out of range");
        }
    }

    fn install_vector(&mut self, slot_address: u32, handler: u32) {
        let binding = TrampolineBinding {
            trampoline: self.state.resident.vector_trampoline(),
            handler,
        };

        if let Err(err) = self.state.vectors.bind(slot_address, binding) {
            warn!(slot_address, handler, %err, "could not record vector binding");
            return;
        }
        self.host
            .supervisor_write(slot_address, Size::Long, binding.trampoline);
        debug!(
            vector = slot_address / 4,
            handler,
            trampoline = binding.trampoline,
            "installed guest vector"
        );
    }

    /// Answers a write to a bus-error address the way the real machine does:
    /// with a bus-error exception in the guest.
    fn raise_bus_error(&mut self, cpu: &mut dyn GuestCpu, address: u32, size: Size, value: u32) {
        let handler = self.state.vectors.shadow.get(BUS_ERROR_SHADOW_INDEX);
        if handler == 0 {
            warn!(address, "bus error without a guest handler, write dropped");
            return;
        }

        let sr = cpu.status();
        let frame = BusErrorFrame {
            pc: cpu.reg(Register::Pc),
            sr: sr.bits(),
            vector: VECTOR_BUS_ERROR,
            ir: cpu.reg(Register::Ir) as u16,
            address,
            size,
            write: true,
            instruction: false,
            function_code: if sr.contains(StatusRegister::SUPERVISOR) {
                FC_SUPERVISOR_DATA
            } else {
                FC_USER_DATA
            },
            data: value & size.mask(),
        };

        let exception_sr =
            (sr | StatusRegister::SUPERVISOR) - (StatusRegister::TRACE0 | StatusRegister::TRACE1);
        cpu.set_reg(Register::Sr, u32::from(exception_sr.bits()));

        let sp = cpu.reg(Register::Sp).wrapping_sub(BusErrorFrame::LEN);
        self.poke_bytes(sp, &frame.encode());
        cpu.set_reg(Register::Sp, sp);
        cpu.set_reg(Register::Pc, handler);

        debug!(address, handler, pc = frame.pc, "synthesized guest bus error");
    }

    /// Runs the guest handler bound to `vector` as if the interrupt had been
    /// taken by the emulated CPU.
    pub fn deliver_interrupt(&mut self, cpu: &mut dyn GuestCpu, vector: u8) -> Result<(), CpuExit> {
        let slot_address = u32::from(vector) * 4;
        let Some(binding) = self.state.vectors.binding(slot_address) else {
            debug!(vector, "no guest handler for interrupt");
            return Ok(());
        };

        let Some(stack) = self
            .state
            .arena
            .alloc(self.state.config.interrupt_stack_bytes)
        else {
            warn!(vector, "scratch arena exhausted, interrupt dropped");
            return Ok(());
        };

        let top = stack.top().wrapping_sub(4);
        self.poke_u32(top, RETURN_SENTINEL);

        // The handler's RTE must come back to the stub on this stack, so the
        // stacked SR stays in supervisor mode.
        let sr = cpu.status() | StatusRegister::SUPERVISOR;
        let return_stub = self.state.resident.return_stub();
        let frame = ExceptionFrame::for_vector(vector, sr.bits(), return_stub);
        let sp = top.wrapping_sub(frame.byte_len());
        self.poke_bytes(sp, &frame.encode());

        debug!(vector, handler = binding.handler, "delivering interrupt to guest");
        let executor = self.state.executor;
        let exit = executor.execute(cpu, self, sp, binding.handler);
        self.state.arena.release(stack);
        exit.map(|_| ())
    }
}
