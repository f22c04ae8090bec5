//! GEM `G_USERDEF` interception.
//!
//! A USERDEF object carries a pointer to guest drawing code that the native
//! AES would call directly. Before such a tree reaches the AES, every USERBLK
//! code pointer is swapped for the bridge's USERDEF trampoline and the
//! original is remembered twice: per (tree, object) for dispatch, and per
//! USERBLK because applications share one USERBLK between many objects.

use std::collections::HashSet;

use tosemu_cpu::{CpuExit, GuestCpu};
use tosemu_store::{HashTable, StoreError};
use tracing::{debug, warn};

use crate::bridge::Session;
use crate::layout::{object, parmblk, userblk};

/// What the bridge did to one USERBLK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackBlockBinding {
    pub trampoline: u32,
    pub original: u32,
}

impl CallbackBlockBinding {
    fn encode(&self) -> [u8; 8] {
        let mut out = [0; 8];
        out[..4].copy_from_slice(&self.trampoline.to_be_bytes());
        out[4..].copy_from_slice(&self.original.to_be_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            trampoline: be_u32(bytes.get(..4)?)?,
            original: be_u32(bytes.get(4..8)?)?,
        })
    }
}

fn be_u32(bytes: &[u8]) -> Option<u32> {
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

fn object_key(tree: u32, obj: i16) -> [u8; 6] {
    let mut key = [0; 6];
    key[..4].copy_from_slice(&tree.to_be_bytes());
    key[4..].copy_from_slice(&obj.to_be_bytes());
    key
}

#[derive(Debug, Clone)]
pub struct CallbackInterceptor {
    objects: HashTable,
    blocks: HashTable,
}

impl CallbackInterceptor {
    pub fn new(object_buckets: usize, block_buckets: usize) -> Result<Self, StoreError> {
        Ok(Self {
            objects: HashTable::with_buckets(object_buckets)?,
            blocks: HashTable::with_buckets(block_buckets)?,
        })
    }

    /// Guest draw routine recorded for object `obj` of `tree`.
    pub fn original(&self, tree: u32, obj: i16) -> Option<u32> {
        self.objects.get(&object_key(tree, obj)).and_then(be_u32)
    }

    pub fn block(&self, userblk: u32) -> Option<CallbackBlockBinding> {
        self.blocks
            .get(&userblk.to_be_bytes())
            .and_then(CallbackBlockBinding::decode)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Records `code` for (`tree`, `obj`) unless something is recorded already.
    fn bind_object(&mut self, tree: u32, obj: i16, code: u32) -> Result<(), StoreError> {
        let key = object_key(tree, obj);
        if self.objects.contains_key(&key) {
            return Ok(());
        }
        self.objects.put(&key, &code.to_be_bytes())
    }

    fn bind_block(
        &mut self,
        userblk: u32,
        binding: CallbackBlockBinding,
    ) -> Result<(), StoreError> {
        let key = userblk.to_be_bytes();
        if self.blocks.contains_key(&key) {
            return Ok(());
        }
        self.blocks.put(&key, &binding.encode())
    }
}

impl Session<'_> {
    /// Hooks every USERDEF object reachable from `start` in `tree`.
    ///
    /// The start object is visited, then its children along the `ob_head` /
    /// `ob_next` chains. Each object is visited at most once, so malformed
    /// trees with loops terminate. `max_depth` limits the walk only when
    /// [`crate::BridgeConfig::enforce_tree_depth`] is set.
    pub fn fix_userdefs(&mut self, tree: u32, start: i16, max_depth: i16) {
        if tree == 0 || start < 0 {
            debug!(tree, start, "nothing to hook");
            return;
        }

        let enforce_depth = self.state.config.enforce_tree_depth;
        let mut visited = HashSet::from([start]);
        let mut pending = vec![(start, max_depth)];

        while let Some((obj, depth)) = pending.pop() {
            self.hook_object(tree, obj);

            if enforce_depth && depth <= 0 {
                continue;
            }

            let mut child = self.peek_i16(object::address(tree, obj).wrapping_add(object::HEAD));
            while child >= 0 && visited.insert(child) {
                pending.push((child, depth.saturating_sub(1)));
                child = self.peek_i16(object::address(tree, child).wrapping_add(object::NEXT));
            }
        }
    }

    fn hook_object(&mut self, tree: u32, obj: i16) {
        let address = object::address(tree, obj);
        let ob_type = self.peek_u16(address.wrapping_add(object::TYPE));
        if ob_type & 0xFF != object::G_USERDEF {
            return;
        }

        let ub = self.peek_u32(address.wrapping_add(object::SPEC));
        let code = self.peek_u32(ub.wrapping_add(userblk::CODE));
        let trampoline = self.state.resident.userdef_trampoline();
        let userdefs = &mut self.state.userdefs;

        if code == trampoline {
            // Shared USERBLK, hooked through another object already.
            match userdefs.block(ub) {
                Some(binding) => {
                    if let Err(err) = userdefs.bind_object(tree, obj, binding.original) {
                        warn!(tree, obj, %err, "could not record USERDEF object");
                    }
                }
                None => warn!(tree, obj, ub, "USERBLK holds the trampoline but was never hooked"),
            }
            return;
        }

        let bound = userdefs.bind_object(tree, obj, code).and_then(|()| {
            userdefs.bind_block(
                ub,
                CallbackBlockBinding {
                    trampoline,
                    original: code,
                },
            )
        });
        match bound {
            Ok(()) => {
                self.poke_u32(ub.wrapping_add(userblk::CODE), trampoline);
                debug!(tree, obj, ub, original = code, "hooked USERDEF");
            }
            Err(err) => warn!(tree, obj, ub, %err, "USERDEF left unhooked"),
        }
    }

    /// Runs the guest draw routine behind a hooked USERDEF. `code` is the
    /// pointer the AES called, `parmblk` the PARMBLK it passed.
    ///
    /// The guest's return value is not passed on; the AES always sees 0.
    pub fn call_userdef(
        &mut self,
        cpu: &mut dyn GuestCpu,
        code: u32,
        parmblk: u32,
    ) -> Result<u16, CpuExit> {
        if code != self.state.resident.userdef_trampoline() {
            warn!(code, parmblk, "USERDEF called through a pointer the bridge did not install");
            return Ok(0);
        }

        let tree = self.peek_u32(parmblk.wrapping_add(parmblk::TREE));
        let obj = self.peek_i16(parmblk.wrapping_add(parmblk::OBJ));
        let Some(original) = self.state.userdefs.original(tree, obj) else {
            warn!(tree, obj, "USERDEF callback for an object that was never hooked");
            return Ok(0);
        };

        debug!(tree, obj, original, parmblk, "running USERDEF callback");
        let stack_bytes = self.state.config.callback_stack_bytes;
        self.call_on_scratch_stack(cpu, original, &[parmblk], stack_bytes)?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{init_tracing, FakeTos, TreeBuilder};
    use crate::{Bridge, BridgeConfig};

    const TREE: u32 = 0x2_0000;
    const UB: u32 = 0x2_1000;
    const DRAW: u32 = 0x3_0000;

    fn bridge(config: BridgeConfig) -> Bridge<FakeTos> {
        init_tracing();
        Bridge::new(FakeTos::new(), config).unwrap()
    }

    #[test]
    fn hooks_userdef_and_remembers_original() {
        let mut bridge = bridge(BridgeConfig::default());
        TreeBuilder::new(TREE)
            .userdef(0, UB, DRAW)
            .write(&mut bridge.host_mut().memory);

        bridge.fix_userdefs(TREE, 0, 8);

        let trampoline = bridge.state().resident().userdef_trampoline();
        assert_eq!(bridge.host().memory.read_u32(UB), trampoline);
        let userdefs = bridge.state().userdefs();
        assert_eq!(userdefs.original(TREE, 1), Some(DRAW));
        assert_eq!(
            userdefs.block(UB),
            Some(CallbackBlockBinding {
                trampoline,
                original: DRAW
            })
        );
    }

    #[test]
    fn shared_userblk_binds_every_object() {
        let mut bridge = bridge(BridgeConfig::default());
        TreeBuilder::new(TREE)
            .userdef(0, UB, DRAW)
            .userdef(0, UB, DRAW)
            .userdef(0, UB, DRAW)
            .write(&mut bridge.host_mut().memory);

        bridge.fix_userdefs(TREE, 0, 8);
        // A second pass sees trampolines only and changes nothing.
        bridge.fix_userdefs(TREE, 0, 8);

        let userdefs = bridge.state().userdefs();
        for obj in 1..=3 {
            assert_eq!(userdefs.original(TREE, obj), Some(DRAW));
        }
        assert_eq!(userdefs.object_count(), 3);
        assert_eq!(userdefs.block_count(), 1);
    }

    #[test]
    fn cyclic_tree_terminates() {
        let mut bridge = bridge(BridgeConfig::default());
        TreeBuilder::new(TREE)
            .userdef(0, UB, DRAW)
            .userdef(0, UB + 8, DRAW + 0x100)
            .write(&mut bridge.host_mut().memory);
        // Point the last child back at the first instead of at the parent.
        bridge
            .host_mut()
            .memory
            .write_u16(object::address(TREE, 2) + object::NEXT, 1);

        bridge.fix_userdefs(TREE, 0, 8);

        assert_eq!(bridge.state().userdefs().object_count(), 2);
    }

    #[test]
    fn depth_is_enforced_only_when_configured() {
        for (enforce, expected) in [(false, 1), (true, 0)] {
            let mut bridge = bridge(BridgeConfig {
                enforce_tree_depth: enforce,
                ..Default::default()
            });
            TreeBuilder::new(TREE)
                .userdef(0, UB, DRAW)
                .write(&mut bridge.host_mut().memory);

            bridge.fix_userdefs(TREE, 0, 0);

            assert_eq!(bridge.state().userdefs().object_count(), expected);
        }
    }

    #[test]
    fn foreign_code_pointer_is_refused() {
        let mut bridge = bridge(BridgeConfig::default());
        let mut cpu = tosemu_cpu::toy::ToyCpu::new();
        let result = bridge
            .session()
            .call_userdef(&mut cpu, DRAW, 0x4_0000)
            .unwrap();
        assert_eq!(result, 0);
    }
}
