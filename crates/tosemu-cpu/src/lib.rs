//! The seam between the guest bridge and a black-box 680x0 emulation core.
//!
//! The core implements [`GuestCpu`]: register access, whole-context
//! snapshots, and the individual steps of its main loop (timeslice setup,
//! instruction fetch, dispatch, end-of-slice bookkeeping). Anything the core
//! cannot handle by itself (memory accesses, trap gates, unimplemented opcode
//! lines) is routed back through [`GuestHost`].
//!
//! On top of those primitives this crate provides the top-level [`execute`]
//! loop and the [`SubroutineExecutor`], which runs a guest subroutine to
//! completion from host context and restores the caller's state afterwards.

#![forbid(unsafe_code)]

pub mod cpu;
pub mod executor;
pub mod frame;
pub mod state;
pub mod toy;

pub use cpu::{execute, CpuExit, Gate, GuestCpu, GuestHost};
pub use executor::{
    SubroutineExecutor, SubroutineExit, DEFAULT_CYCLE_BUDGET, DEFAULT_SUBROUTINE_STATUS,
    OPCODE_RTE, OPCODE_RTS, RETURN_SENTINEL,
};
pub use frame::{BusErrorFrame, ExceptionFrame};
pub use state::{GuestContext, Register, Size, StatusRegister};
