//! Bridges an emulated 680x0 TOS/GEM program to the real operating system
//! underneath it.
//!
//! The guest runs on a black-box [`tosemu_cpu::GuestCpu`]; everything it
//! cannot do on its own goes through a [`Bridge`]:
//!
//! - privilege changes (`Super`) are mirrored on the host,
//! - OS call gates are either handled here or forwarded to [`HostOs`],
//! - writes to the exception-vector area install host trampolines that later
//!   run the guest handler on real interrupts,
//! - GEM `G_USERDEF` objects are rewired so the native AES calls back into
//!   guest drawing code.
//!
//! Guest code that has to run on behalf of the host (interrupt handlers,
//! USERDEF callbacks, `Supexec` routines) goes through
//! [`tosemu_cpu::SubroutineExecutor`], which nests to any depth.

#![forbid(unsafe_code)]

mod arena;
mod bridge;
mod config;
mod error;
mod host;
mod privilege;
mod resident;
mod traps;
mod userdefs;
mod vectors;

pub mod layout;
pub mod testing;

pub use arena::{ScratchStack, StackArena};
pub use bridge::{Bridge, BridgeState, Session};
pub use config::BridgeConfig;
pub use error::{BridgeError, ConfigError, PrivilegeError};
pub use host::{
    GuestCallbacks, HostMemory, HostOs, HostPrivilegeToken, LineAFunction, LineARegisters,
    TrapRegisters,
};
pub use privilege::{elevate_host, restore_host, PrivilegeBridge};
pub use resident::ResidentCode;
pub use traps::{LineAHandler, LINE_A_HANDLERS};
pub use userdefs::{CallbackBlockBinding, CallbackInterceptor};
pub use vectors::{
    TrampolineBinding, VectorShadowTable, VectorVirtualizer, BUS_ERROR_SHADOW_INDEX,
};
