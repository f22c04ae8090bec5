use tosemu_cpu::{
    execute, CpuExit, Gate, GuestCpu, GuestHost, Size, SubroutineExecutor, SubroutineExit,
    RETURN_SENTINEL,
};
use tracing::{trace, warn};

use crate::arena::StackArena;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::host::{GuestCallbacks, HostOs};
use crate::privilege::PrivilegeBridge;
use crate::resident::ResidentCode;
use crate::userdefs::CallbackInterceptor;
use crate::vectors::VectorVirtualizer;

/// Everything the bridge remembers between guest calls.
#[derive(Debug)]
pub struct BridgeState {
    pub(crate) config: BridgeConfig,
    pub(crate) executor: SubroutineExecutor,
    pub(crate) privilege: PrivilegeBridge,
    pub(crate) vectors: VectorVirtualizer,
    pub(crate) userdefs: CallbackInterceptor,
    pub(crate) arena: StackArena,
    pub(crate) resident: ResidentCode,
}

impl BridgeState {
    /// Validates `config`, builds the lookup tables and reserves the resident
    /// stubs and the scratch arena in host memory.
    pub fn new(host: &mut dyn HostOs, config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;

        let vectors = VectorVirtualizer::new(config.vector_buckets)?;
        let userdefs =
            CallbackInterceptor::new(config.userdef_buckets, config.callback_block_buckets)?;

        let resident_base = host
            .allocate(ResidentCode::BYTES)
            .ok_or(BridgeError::HostAllocation {
                purpose: "resident code",
                bytes: ResidentCode::BYTES,
            })?;
        let resident = ResidentCode::install(&mut *host, resident_base);

        let arena_base = host
            .allocate(config.scratch_arena_bytes)
            .ok_or(BridgeError::HostAllocation {
                purpose: "scratch stacks",
                bytes: config.scratch_arena_bytes,
            })?;
        let arena = StackArena::new(arena_base, config.scratch_arena_bytes);

        Ok(Self {
            executor: config.executor(),
            config,
            privilege: PrivilegeBridge::new(),
            vectors,
            userdefs,
            arena,
            resident,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn executor(&self) -> SubroutineExecutor {
        self.executor
    }

    pub fn privilege(&self) -> &PrivilegeBridge {
        &self.privilege
    }

    pub fn vectors(&self) -> &VectorVirtualizer {
        &self.vectors
    }

    pub fn userdefs(&self) -> &CallbackInterceptor {
        &self.userdefs
    }

    pub fn arena(&self) -> &StackArena {
        &self.arena
    }

    pub fn resident(&self) -> &ResidentCode {
        &self.resident
    }
}

/// A guest program's connection to the host OS.
pub struct Bridge<H> {
    host: H,
    state: BridgeState,
}

impl<H: HostOs> Bridge<H> {
    pub fn new(mut host: H, config: BridgeConfig) -> Result<Self, BridgeError> {
        let state = BridgeState::new(&mut host, config)?;
        Ok(Self { host, state })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    pub fn into_host(self) -> H {
        self.host
    }

    pub fn session(&mut self) -> Session<'_> {
        Session {
            host: &mut self.host,
            state: &mut self.state,
        }
    }

    /// Runs the guest for up to `cycles`, first delivering any real
    /// interrupts the host has pending. Returns the cycles used.
    ///
    /// The only error is a fatal [`CpuExit`]; by the time it is returned every
    /// nested guest call has put its caller's context back.
    pub fn run(&mut self, cpu: &mut dyn GuestCpu, cycles: i32) -> Result<i32, CpuExit> {
        let mut session = self.session();
        while let Some(vector) = session.host.poll_interrupt() {
            session.deliver_interrupt(cpu, vector)?;
        }
        execute(cpu, &mut session, cycles)
    }

    pub fn deliver_interrupt(&mut self, cpu: &mut dyn GuestCpu, vector: u8) -> Result<(), CpuExit> {
        self.session().deliver_interrupt(cpu, vector)
    }

    pub fn fix_userdefs(&mut self, tree: u32, start: i16, max_depth: i16) {
        self.session().fix_userdefs(tree, start, max_depth)
    }

    /// Runs the guest routine at `entry` to completion on a bridge scratch
    /// stack, passing `args` as long words above the return address.
    pub fn call_guest(
        &mut self,
        cpu: &mut dyn GuestCpu,
        entry: u32,
        args: &[u32],
    ) -> Result<Option<SubroutineExit>, CpuExit> {
        let bytes = self.state.config.callback_stack_bytes;
        self.session().call_on_scratch_stack(cpu, entry, args, bytes)
    }
}

/// The bridge seen from inside one guest run: the host borrowed alongside the
/// bridge state. Implements [`GuestHost`] for the CPU core.
pub struct Session<'a> {
    pub(crate) host: &'a mut dyn HostOs,
    pub(crate) state: &'a mut BridgeState,
}

impl<'a> Session<'a> {
    pub fn new(host: &'a mut dyn HostOs, state: &'a mut BridgeState) -> Self {
        Self { host, state }
    }

    pub fn state(&self) -> &BridgeState {
        &*self.state
    }

    pub(crate) fn peek_u16(&mut self, address: u32) -> u16 {
        self.host.read(address, Size::Word) as u16
    }

    pub(crate) fn peek_i16(&mut self, address: u32) -> i16 {
        self.peek_u16(address) as i16
    }

    pub(crate) fn peek_u32(&mut self, address: u32) -> u32 {
        self.host.read(address, Size::Long)
    }

    pub(crate) fn poke_u32(&mut self, address: u32, value: u32) {
        self.host.write(address, Size::Long, value);
    }

    pub(crate) fn poke_bytes(&mut self, address: u32, bytes: &[u8]) {
        for (offset, byte) in (0u32..).zip(bytes) {
            self.host
                .write(address.wrapping_add(offset), Size::Byte, u32::from(*byte));
        }
    }

    /// Runs `entry` on a fresh scratch stack holding the return sentinel with
    /// `args` above it. `None` when the arena has no room left.
    pub(crate) fn call_on_scratch_stack(
        &mut self,
        cpu: &mut dyn GuestCpu,
        entry: u32,
        args: &[u32],
        stack_bytes: u32,
    ) -> Result<Option<SubroutineExit>, CpuExit> {
        let Some(stack) = self.state.arena.alloc(stack_bytes) else {
            warn!(
                entry,
                used = self.state.arena.used(),
                "scratch arena exhausted, guest routine skipped"
            );
            return Ok(None);
        };

        let mut sp = stack.top();
        for arg in args.iter().rev() {
            sp = sp.wrapping_sub(4);
            self.poke_u32(sp, *arg);
        }
        sp = sp.wrapping_sub(4);
        self.poke_u32(sp, RETURN_SENTINEL);

        let executor = self.state.executor;
        let exit = executor.execute(cpu, self, sp, entry);
        self.state.arena.release(stack);
        exit.map(Some)
    }
}

impl GuestHost for Session<'_> {
    fn read(&mut self, address: u32, size: Size) -> u32 {
        if self.state.config.is_guarded(address) {
            self.host.supervisor_read(address, size)
        } else {
            self.host.read(address, size)
        }
    }

    fn write(&mut self, cpu: &mut dyn GuestCpu, address: u32, size: Size, value: u32) {
        if self.state.config.is_guarded(address) {
            self.guarded_write(cpu, address, size, value);
        } else {
            self.host.write(address, size, value);
        }
    }

    fn gate(&mut self, cpu: &mut dyn GuestCpu, gate: Gate) -> Result<(), CpuExit> {
        match gate {
            Gate::Trap(number) => self.trap(cpu, number),
            Gate::LineA(opcode) => {
                self.line_a(cpu, opcode);
                Ok(())
            }
            Gate::LineF(opcode) => self.line_f(cpu, opcode),
        }
    }

    fn instruction_hook(&mut self, pc: u32) {
        if self.state.config.trace_instructions {
            trace!("{pc:#010x}");
        }
    }
}

/// Handed to the host during a forwarded call so that native code can run
/// guest callbacks. A fatal exit inside such a callback is held here and
/// raised once the host returns.
pub(crate) struct Reentry<'a> {
    pub(crate) cpu: &'a mut dyn GuestCpu,
    pub(crate) state: &'a mut BridgeState,
    pub(crate) fault: Option<CpuExit>,
}

impl GuestCallbacks for Reentry<'_> {
    fn call_userdef(&mut self, host: &mut dyn HostOs, code: u32, parmblk: u32) -> u16 {
        if self.fault.is_some() {
            return 0;
        }
        let mut session = Session::new(host, &mut *self.state);
        match session.call_userdef(&mut *self.cpu, code, parmblk) {
            Ok(result) => result,
            Err(exit) => {
                self.fault = Some(exit);
                0
            }
        }
    }

    fn interrupt(&mut self, host: &mut dyn HostOs, vector: u8) {
        if self.fault.is_some() {
            return;
        }
        let mut session = Session::new(host, &mut *self.state);
        if let Err(exit) = session.deliver_interrupt(&mut *self.cpu, vector) {
            self.fault = Some(exit);
        }
    }
}
