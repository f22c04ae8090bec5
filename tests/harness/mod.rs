#![allow(dead_code)]

use anyhow::Result;
use tosemu_bridge::testing::FakeTos;
use tosemu_bridge::{Bridge, BridgeConfig};
use tosemu_cpu::toy::{Asm, FlatMemory, ToyCpu};
use tosemu_cpu::{GuestCpu, Register};

pub const PROGRAM: u32 = 0x1000;
pub const USER_STACK: u32 = 0x8000;
pub const SUPER_STACK: u32 = 0x4000;
/// Scratch long words guest code writes to so tests can see it ran.
pub const MARKER: u32 = 0x7000;
pub const SLICE: i32 = 2000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A user-mode guest program on a [`ToyCpu`] wired to a [`FakeTos`].
pub struct Machine {
    pub bridge: Bridge<FakeTos>,
    pub cpu: ToyCpu,
}

impl Machine {
    pub fn new() -> Result<Self> {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Result<Self> {
        init_tracing();
        let bridge = Bridge::new(FakeTos::new(), config)?;

        let mut cpu = ToyCpu::new();
        cpu.set_reg(Register::Pc, PROGRAM);
        cpu.set_reg(Register::Sp, USER_STACK);
        cpu.set_reg(Register::Isp, SUPER_STACK);
        Ok(Self { bridge, cpu })
    }

    /// Loads `code` at [`PROGRAM`].
    pub fn program(self, code: Asm) -> Self {
        self.code(PROGRAM, code)
    }

    pub fn code(mut self, address: u32, code: Asm) -> Self {
        self.bridge.host_mut().memory.load(address, &code.to_bytes());
        self
    }

    pub fn run(&mut self) -> Result<i32> {
        Ok(self.bridge.run(&mut self.cpu, SLICE)?)
    }

    pub fn memory(&self) -> &FlatMemory {
        &self.bridge.host().memory
    }

    pub fn memory_mut(&mut self) -> &mut FlatMemory {
        &mut self.bridge.host_mut().memory
    }

    pub fn host(&self) -> &FakeTos {
        self.bridge.host()
    }

    pub fn host_mut(&mut self) -> &mut FakeTos {
        self.bridge.host_mut()
    }

    pub fn reg(&self, reg: Register) -> u32 {
        self.cpu.reg(reg)
    }

    pub fn marker(&self) -> u32 {
        self.memory().read_u32(MARKER)
    }
}
