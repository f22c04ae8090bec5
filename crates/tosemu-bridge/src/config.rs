use serde::{Deserialize, Serialize};
use tosemu_cpu::{SubroutineExecutor, DEFAULT_CYCLE_BUDGET, DEFAULT_SUBROUTINE_STATUS};

use crate::error::ConfigError;

/// End of the 68k exception vector table.
pub(crate) const VECTOR_TABLE_END: u32 = 0x400;

const MIN_STACK_BYTES: u32 = 64;

/// Tunables for a [`crate::Bridge`].
///
/// Every field has a default, so a config file only needs to name the values
/// it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Cycles a nested guest subroutine may use before it is abandoned.
    pub cycle_budget: i32,
    /// Status register nested guest subroutines start with.
    pub subroutine_status: u16,
    /// Guest accesses at or below this address are intercepted.
    pub low_memory_limit: u32,
    /// Vector slot whose writes only seed the shadow table.
    pub seed_vector_address: u32,
    /// Addresses that raise a bus error on the real machine.
    pub bus_error_addresses: Vec<u32>,
    pub vector_buckets: usize,
    pub userdef_buckets: usize,
    pub callback_block_buckets: usize,
    pub interrupt_stack_bytes: u32,
    pub callback_stack_bytes: u32,
    /// Host memory reserved once for all scratch stacks.
    pub scratch_arena_bytes: u32,
    /// Honour the depth argument of `objc_draw` when hooking USERDEFs.
    pub enforce_tree_depth: bool,
    /// Emit a `trace` event for every guest instruction.
    pub trace_instructions: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cycle_budget: DEFAULT_CYCLE_BUDGET,
            subroutine_status: DEFAULT_SUBROUTINE_STATUS,
            low_memory_limit: 0x800,
            seed_vector_address: 8,
            bus_error_addresses: vec![0x00FF_FA42, 0xFFFF_FA42],
            vector_buckets: 20,
            userdef_buckets: 40,
            callback_block_buckets: 40,
            interrupt_stack_bytes: 512,
            callback_stack_bytes: 4096,
            scratch_arena_bytes: 64 * 1024,
            enforce_tree_depth: false,
            trace_instructions: false,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_budget <= 0 {
            return Err(ConfigError::CycleBudget(self.cycle_budget));
        }
        if self.subroutine_status & 0x2000 == 0 {
            return Err(ConfigError::SubroutineStatus(self.subroutine_status));
        }
        if self.low_memory_limit < VECTOR_TABLE_END - 1 {
            return Err(ConfigError::LowMemoryLimit(self.low_memory_limit));
        }
        if self.seed_vector_address % 4 != 0 || self.seed_vector_address >= VECTOR_TABLE_END {
            return Err(ConfigError::SeedVector {
                address: self.seed_vector_address,
                limit: VECTOR_TABLE_END,
            });
        }

        for (table, buckets) in [
            ("vector", self.vector_buckets),
            ("userdef", self.userdef_buckets),
            ("callback block", self.callback_block_buckets),
        ] {
            if buckets == 0 {
                return Err(ConfigError::ZeroBuckets { table });
            }
        }

        for (stack, bytes) in [
            ("interrupt", self.interrupt_stack_bytes),
            ("callback", self.callback_stack_bytes),
        ] {
            if bytes < MIN_STACK_BYTES {
                return Err(ConfigError::StackTooSmall {
                    stack,
                    bytes,
                    minimum: MIN_STACK_BYTES,
                });
            }
            if bytes > self.scratch_arena_bytes {
                return Err(ConfigError::ArenaTooSmall {
                    arena: self.scratch_arena_bytes,
                    stack,
                    bytes,
                });
            }
        }

        Ok(())
    }

    pub fn executor(&self) -> SubroutineExecutor {
        SubroutineExecutor::new(self.cycle_budget, self.subroutine_status)
    }

    pub fn is_guarded(&self, address: u32) -> bool {
        address <= self.low_memory_limit || self.bus_error_addresses.contains(&address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert!(config.is_guarded(0));
        assert!(config.is_guarded(0x800));
        assert!(!config.is_guarded(0x802));
        assert!(config.is_guarded(0xFFFF_FA42));
        assert_eq!(config.executor().cycle_budget(), 10_000);
    }

    #[test]
    fn rejects_bad_values() {
        let config = BridgeConfig {
            cycle_budget: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::CycleBudget(0)));

        let config = BridgeConfig {
            subroutine_status: 0x0300,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::SubroutineStatus(0x0300)));

        let config = BridgeConfig {
            userdef_buckets: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroBuckets { table: "userdef" })
        );

        let config = BridgeConfig {
            seed_vector_address: 6,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SeedVector { address: 6, .. })
        ));

        let config = BridgeConfig {
            callback_stack_bytes: 128 * 1024,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ArenaTooSmall {
                stack: "callback",
                ..
            })
        ));
    }
}
