use thiserror::Error;

use crate::state::{GuestContext, Register, Size, StatusRegister};

/// Reasons a guest core stops executing and hands control back to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuExit {
    /// A privileged-execution request named a callback the host cannot run.
    #[error("privileged callback target {target:#010x} cannot be resolved")]
    UnresolvedCallback { target: u32 },
    /// The core decoded an opcode it has no handler for.
    #[error("illegal instruction {opcode:#06x} at {pc:#010x}")]
    IllegalInstruction { opcode: u16, pc: u32 },
}

/// Guest instructions whose semantics live outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    /// `TRAP #n`. The core has already advanced PC past the instruction.
    Trap(u8),
    /// Line-A (`0xAxxx`) opcode.
    LineA(u16),
    /// Line-F (`0xFxxx`) opcode.
    LineF(u16),
}

/// A black-box 680x0 emulation core.
///
/// The main loop is exposed as separate steps so that callers can interpose
/// between fetching an instruction and executing it, while still going through
/// the core's own bookkeeping for both.
pub trait GuestCpu {
    fn reg(&self, reg: Register) -> u32;

    /// Writes a register. Writing `Sr` with a different supervisor bit banks
    /// the stack pointers exactly as an architectural mode switch does.
    fn set_reg(&mut self, reg: Register, value: u32);

    fn snapshot(&self) -> GuestContext;
    fn restore(&mut self, context: &GuestContext);

    /// Whether the core is halted or waiting in `STOP`.
    fn is_stopped(&self) -> bool;

    /// Grants a pool of `cycles` and charges any pending interrupt cycles
    /// against it.
    fn begin_timeslice(&mut self, cycles: i32);

    /// Runs the per-instruction prologue (instruction hook, trace state,
    /// previous-PC bookkeeping) and reads the next opcode word.
    fn fetch(&mut self, host: &mut dyn GuestHost) -> u16;

    /// Executes a fetched opcode and charges its cycles.
    fn dispatch(&mut self, opcode: u16, host: &mut dyn GuestHost) -> Result<(), CpuExit>;

    fn cycles_remaining(&self) -> i32;

    /// Closes a timeslice and returns the number of cycles it consumed.
    fn end_timeslice(&mut self) -> i32;

    /// Closes a timeslice without running anything (stopped core).
    fn abandon_timeslice(&mut self);

    fn status(&self) -> StatusRegister {
        StatusRegister::from_reg(self.reg(Register::Sr))
    }

    fn is_supervisor(&self) -> bool {
        self.status().contains(StatusRegister::SUPERVISOR)
    }
}

/// Everything a [`GuestCpu`] delegates back to its embedder.
pub trait GuestHost {
    fn read(&mut self, address: u32, size: Size) -> u32;

    /// Memory write hook. The core is passed along because some writes are
    /// answered with a guest exception instead of a store.
    fn write(&mut self, cpu: &mut dyn GuestCpu, address: u32, size: Size, value: u32);

    fn gate(&mut self, cpu: &mut dyn GuestCpu, gate: Gate) -> Result<(), CpuExit>;

    /// Called once per instruction before it is fetched.
    fn instruction_hook(&mut self, _pc: u32) {}
}

/// Top-level execution loop: runs the core for up to `cycles` and returns the
/// number of cycles used.
pub fn execute(
    cpu: &mut dyn GuestCpu,
    host: &mut dyn GuestHost,
    cycles: i32,
) -> Result<i32, CpuExit> {
    if cpu.is_stopped() {
        cpu.abandon_timeslice();
        return Ok(0);
    }

    cpu.begin_timeslice(cycles);
    loop {
        let opcode = cpu.fetch(host);
        cpu.dispatch(opcode, host)?;
        if cpu.cycles_remaining() <= 0 {
            break;
        }
    }
    Ok(cpu.end_timeslice())
}
