use thiserror::Error;
use tosemu_store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cycle budget must be positive (got {0})")]
    CycleBudget(i32),

    #[error("subroutine status {0:#06x} does not select supervisor mode")]
    SubroutineStatus(u16),

    #[error("{table} table needs at least one bucket")]
    ZeroBuckets { table: &'static str },

    #[error("seed vector address {address:#x} is not a long-aligned vector slot below {limit:#x}")]
    SeedVector { address: u32, limit: u32 },

    #[error("low memory limit {0:#x} does not cover the vector table")]
    LowMemoryLimit(u32),

    #[error("{stack} stack of {bytes} bytes is too small (minimum {minimum})")]
    StackTooSmall {
        stack: &'static str,
        bytes: u32,
        minimum: u32,
    },

    #[error("scratch arena of {arena} bytes cannot hold a {stack} stack of {bytes} bytes")]
    ArenaTooSmall {
        arena: u32,
        stack: &'static str,
        bytes: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrivilegeError {
    #[error("leaving supervisor mode without a matching enter")]
    NotElevated,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid bridge configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("bridge table allocation failed: {0}")]
    Store(#[from] StoreError),

    #[error("host could not allocate {bytes} bytes for bridge {purpose}")]
    HostAllocation { purpose: &'static str, bytes: u32 },
}
