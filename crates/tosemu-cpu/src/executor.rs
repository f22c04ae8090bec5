use tracing::{debug, warn};

use crate::cpu::{CpuExit, GuestCpu, GuestHost};
use crate::state::{Register, Size, StatusRegister};

/// Long word standing in for a return address on stacks the host builds for
/// guest subroutines.
pub const RETURN_SENTINEL: u32 = 0xAFFE_AFFE;

pub const OPCODE_RTS: u16 = 0x4E75;
pub const OPCODE_RTE: u16 = 0x4E73;

pub const DEFAULT_CYCLE_BUDGET: i32 = 10_000;
/// Supervisor mode, interrupt mask 3.
pub const DEFAULT_SUBROUTINE_STATUS: u16 = 0x2300;

/// How a guest subroutine run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubroutineExit {
    /// The subroutine executed `RTS` onto the return sentinel. Carries D0.
    Returned(u32),
    /// The cycle budget ran out first. Carries the cycles consumed.
    BudgetExhausted { cycles: i32 },
    /// The core was stopped; nothing ran.
    Stopped,
}

impl SubroutineExit {
    /// The single integer the result historically travelled as: D0 for a
    /// return, the consumed cycle count on exhaustion, 0 when stopped.
    pub fn raw(self) -> u32 {
        match self {
            SubroutineExit::Returned(d0) => d0,
            SubroutineExit::BudgetExhausted { cycles } => cycles as u32,
            SubroutineExit::Stopped => 0,
        }
    }

    pub fn returned(self) -> Option<u32> {
        match self {
            SubroutineExit::Returned(d0) => Some(d0),
            _ => None,
        }
    }
}

/// Runs guest subroutines synchronously on behalf of host code.
///
/// Each call snapshots the whole core first and restores it on every way out,
/// so calls nest to any depth: a guest routine may trap into the host, which
/// may run another guest routine, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubroutineExecutor {
    cycle_budget: i32,
    status: StatusRegister,
}

impl Default for SubroutineExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CYCLE_BUDGET, DEFAULT_SUBROUTINE_STATUS)
    }
}

impl SubroutineExecutor {
    pub fn new(cycle_budget: i32, status: u16) -> Self {
        Self {
            cycle_budget,
            status: StatusRegister::from_bits_retain(status),
        }
    }

    pub fn cycle_budget(&self) -> i32 {
        self.cycle_budget
    }

    pub fn status(&self) -> StatusRegister {
        self.status
    }

    /// Runs the routine at `entry` with the stack pointer set to
    /// `stack_pointer`.
    ///
    /// The long at `stack_pointer` is expected to be [`RETURN_SENTINEL`]: the
    /// routine's final `RTS` is recognised and not executed. The caller's full
    /// context is back in place when this returns, including on error.
    pub fn execute(
        &self,
        cpu: &mut dyn GuestCpu,
        host: &mut dyn GuestHost,
        stack_pointer: u32,
        entry: u32,
    ) -> Result<SubroutineExit, CpuExit> {
        let saved = cpu.snapshot();
        debug!("running guest subroutine at {entry:#010x}, sp={stack_pointer:#010x}");

        cpu.set_reg(Register::Pc, entry);
        cpu.set_reg(Register::Sr, u32::from(self.status.bits()));
        cpu.set_reg(Register::Sp, stack_pointer);

        if cpu.is_stopped() {
            warn!("guest core is stopped, subroutine at {entry:#010x} not run");
            cpu.abandon_timeslice();
            cpu.restore(&saved);
            return Ok(SubroutineExit::Stopped);
        }

        cpu.begin_timeslice(self.cycle_budget);
        let exit = Self::run(cpu, host);
        cpu.restore(&saved);

        match &exit {
            Ok(SubroutineExit::Returned(d0)) => {
                debug!("guest subroutine at {entry:#010x} returned {d0:#x}")
            }
            Ok(SubroutineExit::BudgetExhausted { cycles }) => {
                warn!("guest subroutine at {entry:#010x} did not return within {cycles} cycles")
            }
            Ok(SubroutineExit::Stopped) => {}
            Err(err) => warn!("guest subroutine at {entry:#010x} aborted: {err}"),
        }
        exit
    }

    fn run(cpu: &mut dyn GuestCpu, host: &mut dyn GuestHost) -> Result<SubroutineExit, CpuExit> {
        loop {
            let opcode = cpu.fetch(host);

            if opcode == OPCODE_RTS
                && host.read(cpu.reg(Register::Sp), Size::Long) == RETURN_SENTINEL
            {
                return Ok(SubroutineExit::Returned(cpu.reg(Register::D0)));
            }

            cpu.dispatch(opcode, host)?;
            if cpu.cycles_remaining() <= 0 {
                break;
            }
        }

        Ok(SubroutineExit::BudgetExhausted {
            cycles: cpu.end_timeslice(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_keeps_the_dual_meaning() {
        assert_eq!(SubroutineExit::Returned(42).raw(), 42);
        assert_eq!(SubroutineExit::BudgetExhausted { cycles: 10_000 }.raw(), 10_000);
        assert_eq!(SubroutineExit::Stopped.raw(), 0);
        assert_eq!(SubroutineExit::BudgetExhausted { cycles: 1 }.returned(), None);
    }

    #[test]
    fn default_runs_supervisor_with_mask_3() {
        let exec = SubroutineExecutor::default();
        assert_eq!(exec.cycle_budget(), 10_000);
        assert!(exec.status().contains(StatusRegister::SUPERVISOR));
        assert_eq!(exec.status().ipl(), 3);
    }
}
