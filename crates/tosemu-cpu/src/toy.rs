//! A deliberately tiny [`GuestCpu`] implementation for tests.
//!
//! [`ToyCpu`] understands just enough of the 680x0 instruction set to drive
//! the bridge from test programs: stack and register moves, absolute memory
//! accesses, `JSR`/`RTS`/`RTE`, `BRA.S`, `STOP`, `TRAP` and the Line-A/Line-F
//! gates. Every instruction costs [`ToyCpu::CYCLES_PER_INSTRUCTION`]. Memory
//! lives on the host side; [`FlatMemory`] and [`FlatHost`] provide a flat
//! big-endian address space for tests that do not need a full bridge.
//!
//! [`Asm`] emits the supported instructions.

use tracing::trace;

use crate::cpu::{CpuExit, Gate, GuestCpu, GuestHost};
use crate::frame;
use crate::state::{GuestContext, Register, Size, StatusRegister};

const SR_IMPLEMENTED: u16 = 0xF71F;

#[derive(Debug, Clone, Default)]
pub struct ToyCpu {
    ctx: GuestContext,
    retired: u64,
}

impl ToyCpu {
    pub const CYCLES_PER_INSTRUCTION: i32 = 4;

    /// A core in user mode with IPL 3, as a freshly loaded program sees it.
    pub fn new() -> Self {
        let mut cpu = Self::default();
        cpu.ctx.sr = 0x0300;
        cpu
    }

    /// Instructions executed through [`GuestCpu::dispatch`] so far.
    pub fn retired(&self) -> u64 {
        self.retired
    }

    fn imm16(&mut self, host: &mut dyn GuestHost) -> u16 {
        let value = host.read(self.ctx.pc, Size::Word) as u16;
        self.ctx.pc = self.ctx.pc.wrapping_add(2);
        value
    }

    fn imm32(&mut self, host: &mut dyn GuestHost) -> u32 {
        let value = host.read(self.ctx.pc, Size::Long);
        self.ctx.pc = self.ctx.pc.wrapping_add(4);
        value
    }

    fn push(&mut self, host: &mut dyn GuestHost, size: Size, value: u32) {
        let sp = self.ctx.a[7].wrapping_sub(size.bytes());
        self.ctx.a[7] = sp;
        host.write(self, sp, size, value);
    }

    fn pop(&mut self, host: &mut dyn GuestHost, size: Size) -> u32 {
        let sp = self.ctx.a[7];
        let value = host.read(sp, size);
        self.ctx.a[7] = sp.wrapping_add(size.bytes());
        value
    }

    fn set_sr(&mut self, value: u16) {
        let value = value & SR_IMPLEMENTED;
        let changed = (self.ctx.sr ^ value) & StatusRegister::SUPERVISOR.bits();
        if changed != 0 {
            std::mem::swap(&mut self.ctx.a[7], &mut self.ctx.inactive_sp);
        }
        self.ctx.sr = value;
    }

    fn supervisor(&self) -> bool {
        self.ctx.status().contains(StatusRegister::SUPERVISOR)
    }

    fn execute_opcode(&mut self, opcode: u16, host: &mut dyn GuestHost) -> Result<(), CpuExit> {
        let reg = usize::from((opcode >> 9) & 7);

        match opcode {
            0x4E71 => {}
            0x4E75 => {
                self.ctx.pc = self.pop(host, Size::Long);
            }
            0x4E73 => {
                let sp = self.ctx.a[7];
                let format_vector = host.read(sp.wrapping_add(6), Size::Word) as u16;
                // No exception processing here, so a format error stops the core.
                let Some(extra) = frame::extra_frame_bytes(format_vector) else {
                    return Err(CpuExit::IllegalInstruction {
                        opcode,
                        pc: self.ctx.ppc,
                    });
                };
                let sr = host.read(sp, Size::Word) as u16;
                self.ctx.pc = host.read(sp.wrapping_add(2), Size::Long);
                self.ctx.a[7] = sp.wrapping_add(8 + extra);
                self.set_sr(sr);
            }
            0x4E72 => {
                let sr = self.imm16(host);
                self.set_sr(sr);
                self.ctx.stopped = true;
                self.ctx.cycles = 0;
                return Ok(());
            }
            0x4E40..=0x4E4F => host.gate(self, Gate::Trap((opcode & 0xF) as u8))?,
            0x4EB9 => {
                let target = self.imm32(host);
                let ret = self.ctx.pc;
                self.push(host, Size::Long, ret);
                self.ctx.pc = target;
            }
            0x4FEF => {
                let disp = self.imm16(host) as i16;
                self.ctx.a[7] = self.ctx.a[7].wrapping_add(disp as i32 as u32);
            }
            0x2F3C => {
                let value = self.imm32(host);
                self.push(host, Size::Long, value);
            }
            0x3F3C => {
                let value = self.imm16(host);
                self.push(host, Size::Word, u32::from(value));
            }
            0x23FC => {
                let value = self.imm32(host);
                let address = self.imm32(host);
                host.write(self, address, Size::Long, value);
            }
            0x2039 => {
                let address = self.imm32(host);
                self.ctx.d[0] = host.read(address, Size::Long);
            }
            _ if opcode & 0xF1FF == 0x203C => {
                self.ctx.d[reg] = self.imm32(host);
            }
            _ if opcode & 0xF100 == 0x7000 => {
                self.ctx.d[reg] = opcode as u8 as i8 as i32 as u32;
            }
            _ if opcode & 0xF1F8 == 0x5080 => {
                let quick = match reg {
                    0 => 8,
                    n => n as u32,
                };
                let dn = usize::from(opcode & 7);
                self.ctx.d[dn] = self.ctx.d[dn].wrapping_add(quick);
            }
            _ if opcode & 0xFF00 == 0x6000 && opcode & 0xFF != 0 => {
                let disp = opcode as u8 as i8;
                self.ctx.pc = self.ctx.pc.wrapping_add(disp as i32 as u32);
            }
            _ if opcode & 0xF000 == 0xA000 => host.gate(self, Gate::LineA(opcode))?,
            _ if opcode & 0xF000 == 0xF000 => host.gate(self, Gate::LineF(opcode))?,
            _ => {
                return Err(CpuExit::IllegalInstruction {
                    opcode,
                    pc: self.ctx.ppc,
                })
            }
        }

        self.ctx.cycles -= Self::CYCLES_PER_INSTRUCTION;
        Ok(())
    }
}

impl GuestCpu for ToyCpu {
    fn reg(&self, reg: Register) -> u32 {
        let ctx = &self.ctx;
        match reg {
            Register::D0 => ctx.d[0],
            Register::D1 => ctx.d[1],
            Register::D2 => ctx.d[2],
            Register::D3 => ctx.d[3],
            Register::D4 => ctx.d[4],
            Register::D5 => ctx.d[5],
            Register::D6 => ctx.d[6],
            Register::D7 => ctx.d[7],
            Register::A0 => ctx.a[0],
            Register::A1 => ctx.a[1],
            Register::A2 => ctx.a[2],
            Register::A3 => ctx.a[3],
            Register::A4 => ctx.a[4],
            Register::A5 => ctx.a[5],
            Register::A6 => ctx.a[6],
            Register::A7 | Register::Sp => ctx.a[7],
            Register::Pc => ctx.pc,
            Register::Sr => u32::from(ctx.sr),
            Register::Usp if self.supervisor() => ctx.inactive_sp,
            Register::Usp => ctx.a[7],
            Register::Isp if self.supervisor() => ctx.a[7],
            Register::Isp => ctx.inactive_sp,
            Register::Ppc => ctx.ppc,
            Register::Ir => u32::from(ctx.ir),
        }
    }

    fn set_reg(&mut self, reg: Register, value: u32) {
        if reg == Register::Sr {
            self.set_sr(value as u16);
            return;
        }
        let supervisor = self.supervisor();
        let ctx = &mut self.ctx;
        match reg {
            Register::D0 => ctx.d[0] = value,
            Register::D1 => ctx.d[1] = value,
            Register::D2 => ctx.d[2] = value,
            Register::D3 => ctx.d[3] = value,
            Register::D4 => ctx.d[4] = value,
            Register::D5 => ctx.d[5] = value,
            Register::D6 => ctx.d[6] = value,
            Register::D7 => ctx.d[7] = value,
            Register::A0 => ctx.a[0] = value,
            Register::A1 => ctx.a[1] = value,
            Register::A2 => ctx.a[2] = value,
            Register::A3 => ctx.a[3] = value,
            Register::A4 => ctx.a[4] = value,
            Register::A5 => ctx.a[5] = value,
            Register::A6 => ctx.a[6] = value,
            Register::A7 | Register::Sp => ctx.a[7] = value,
            Register::Pc => ctx.pc = value,
            Register::Sr => {} // banked above
            Register::Usp if supervisor => ctx.inactive_sp = value,
            Register::Usp => ctx.a[7] = value,
            Register::Isp if supervisor => ctx.a[7] = value,
            Register::Isp => ctx.inactive_sp = value,
            Register::Ppc => ctx.ppc = value,
            Register::Ir => ctx.ir = value as u16,
        }
    }

    fn snapshot(&self) -> GuestContext {
        self.ctx.clone()
    }

    fn restore(&mut self, context: &GuestContext) {
        self.ctx = context.clone();
    }

    fn is_stopped(&self) -> bool {
        self.ctx.stopped
    }

    fn begin_timeslice(&mut self, cycles: i32) {
        self.ctx.cycles = cycles;
        self.ctx.initial_cycles = cycles;
        self.ctx.cycles -= self.ctx.int_cycles;
        self.ctx.int_cycles = 0;
    }

    fn fetch(&mut self, host: &mut dyn GuestHost) -> u16 {
        host.instruction_hook(self.ctx.pc);
        self.ctx.ppc = self.ctx.pc;
        let opcode = self.imm16(host);
        self.ctx.ir = opcode;
        opcode
    }

    fn dispatch(&mut self, opcode: u16, host: &mut dyn GuestHost) -> Result<(), CpuExit> {
        trace!("toy: {:#010x}: {opcode:#06x}", self.ctx.ppc);
        self.execute_opcode(opcode, host)?;
        self.retired += 1;
        Ok(())
    }

    fn cycles_remaining(&self) -> i32 {
        self.ctx.cycles
    }

    fn end_timeslice(&mut self) -> i32 {
        self.ctx.ppc = self.ctx.pc;
        self.ctx.cycles -= self.ctx.int_cycles;
        self.ctx.int_cycles = 0;
        self.ctx.initial_cycles - self.ctx.cycles
    }

    fn abandon_timeslice(&mut self) {
        self.ctx.cycles = 0;
        self.ctx.int_cycles = 0;
    }
}

/// Flat big-endian memory starting at address 0.
///
/// Reads outside the backing store return 0 and writes outside it are
/// dropped.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    bytes: Vec<u8>,
}

impl FlatMemory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn load(&mut self, address: u32, data: &[u8]) {
        let start = address as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    pub fn slice(&self, address: u32, len: usize) -> &[u8] {
        let start = address as usize;
        &self.bytes[start..start + len]
    }

    pub fn read(&self, address: u32, size: Size) -> u32 {
        let start = address as usize;
        let len = size.bytes() as usize;
        match self.bytes.get(start..start.saturating_add(len)) {
            Some(bytes) => bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)),
            None => 0,
        }
    }

    pub fn write(&mut self, address: u32, size: Size, value: u32) {
        let start = address as usize;
        let len = size.bytes() as usize;
        if let Some(bytes) = self.bytes.get_mut(start..start.saturating_add(len)) {
            let be = value.to_be_bytes();
            bytes.copy_from_slice(&be[4 - len..]);
        }
    }

    pub fn read_u16(&self, address: u32) -> u16 {
        self.read(address, Size::Word) as u16
    }

    pub fn read_u32(&self, address: u32) -> u32 {
        self.read(address, Size::Long)
    }

    pub fn write_u16(&mut self, address: u32, value: u16) {
        self.write(address, Size::Word, u32::from(value));
    }

    pub fn write_u32(&mut self, address: u32, value: u32) {
        self.write(address, Size::Long, value);
    }
}

/// [`GuestHost`] over a [`FlatMemory`] that records gates without acting on
/// them.
#[derive(Debug, Clone)]
pub struct FlatHost {
    pub memory: FlatMemory,
    pub gates: Vec<Gate>,
}

impl FlatHost {
    pub fn new(size: usize) -> Self {
        Self {
            memory: FlatMemory::new(size),
            gates: Vec::new(),
        }
    }
}

impl GuestHost for FlatHost {
    fn read(&mut self, address: u32, size: Size) -> u32 {
        self.memory.read(address, size)
    }

    fn write(&mut self, _cpu: &mut dyn GuestCpu, address: u32, size: Size, value: u32) {
        self.memory.write(address, size, value);
    }

    fn gate(&mut self, _cpu: &mut dyn GuestCpu, gate: Gate) -> Result<(), CpuExit> {
        self.gates.push(gate);
        Ok(())
    }
}

/// Assembler for the instructions [`ToyCpu`] implements.
#[derive(Debug, Clone, Default)]
pub struct Asm {
    words: Vec<u16>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn word(mut self, word: u16) -> Self {
        self.words.push(word);
        self
    }

    fn long(self, value: u32) -> Self {
        self.word((value >> 16) as u16).word(value as u16)
    }

    pub fn nop(self) -> Self {
        self.word(0x4E71)
    }

    pub fn rts(self) -> Self {
        self.word(0x4E75)
    }

    pub fn rte(self) -> Self {
        self.word(0x4E73)
    }

    pub fn stop(self, sr: u16) -> Self {
        self.word(0x4E72).word(sr)
    }

    pub fn trap(self, number: u8) -> Self {
        self.word(0x4E40 | u16::from(number & 0xF))
    }

    pub fn line_a(self, function: u8) -> Self {
        self.word(0xA000 | u16::from(function & 0xF))
    }

    /// `MOVEQ #value,Dn`
    pub fn moveq(self, dn: u8, value: i8) -> Self {
        self.word(0x7000 | (u16::from(dn & 7) << 9) | u16::from(value as u8))
    }

    /// `ADDQ.L #quick,Dn` (1..=8)
    pub fn addq_l(self, quick: u8, dn: u8) -> Self {
        let q = u16::from(quick & 7);
        self.word(0x5080 | (q << 9) | u16::from(dn & 7))
    }

    /// `MOVE.L #value,Dn`
    pub fn move_l_imm(self, dn: u8, value: u32) -> Self {
        self.word(0x203C | (u16::from(dn & 7) << 9)).long(value)
    }

    /// `MOVE.L #value,-(SP)`
    pub fn push_l(self, value: u32) -> Self {
        self.word(0x2F3C).long(value)
    }

    /// `MOVE.W #value,-(SP)`
    pub fn push_w(self, value: u16) -> Self {
        self.word(0x3F3C).word(value)
    }

    /// `MOVE.L #value,(address).L`
    pub fn store_l(self, value: u32, address: u32) -> Self {
        self.word(0x23FC).long(value).long(address)
    }

    /// `MOVE.L (address).L,D0`
    pub fn load_l_d0(self, address: u32) -> Self {
        self.word(0x2039).long(address)
    }

    /// `LEA disp(SP),SP`
    pub fn lea_sp(self, disp: i16) -> Self {
        self.word(0x4FEF).word(disp as u16)
    }

    /// `BRA.S *`: spins until the cycle budget runs out.
    pub fn spin(self) -> Self {
        self.word(0x60FE)
    }

    /// `JSR (address).L`
    pub fn jsr(self, address: u32) -> Self {
        self.word(0x4EB9).long(address)
    }

    pub fn len(&self) -> u32 {
        self.words.len() as u32 * 2
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::execute;

    #[test]
    fn supervisor_switch_banks_stack_pointers() {
        let mut cpu = ToyCpu::new();
        cpu.set_reg(Register::Sp, 0x8000);
        cpu.set_reg(Register::Isp, 0x4000);

        cpu.set_reg(Register::Sr, 0x2300);
        assert_eq!(cpu.reg(Register::Sp), 0x4000);
        assert_eq!(cpu.reg(Register::Usp), 0x8000);

        cpu.set_reg(Register::Sr, 0x0300);
        assert_eq!(cpu.reg(Register::Sp), 0x8000);
        assert_eq!(cpu.reg(Register::Isp), 0x4000);
    }

    #[test]
    fn runs_small_program_until_stop() {
        let mut host = FlatHost::new(0x10000);
        let code = Asm::new()
            .moveq(0, -2)
            .addq_l(3, 0)
            .store_l(0x1234_5678, 0x3000)
            .trap(1)
            .line_a(5)
            .stop(0x2700)
            .to_bytes();
        host.memory.load(0x1000, &code);

        let mut cpu = ToyCpu::new();
        cpu.set_reg(Register::Pc, 0x1000);
        cpu.set_reg(Register::Sp, 0x8000);

        let used = execute(&mut cpu, &mut host, 1000).unwrap();
        assert!(cpu.is_stopped());
        assert_eq!(used, 1000);
        assert_eq!(cpu.reg(Register::D0), 1);
        assert_eq!(host.memory.read_u32(0x3000), 0x1234_5678);
        assert_eq!(host.gates, vec![Gate::Trap(1), Gate::LineA(0xA005)]);
        assert_eq!(cpu.retired(), 6);
    }

    #[test]
    fn jsr_and_rts_use_the_stack() {
        let mut host = FlatHost::new(0x10000);
        host.memory.load(0x1000, &Asm::new().jsr(0x2000).stop(0x2700).to_bytes());
        host.memory.load(0x2000, &Asm::new().moveq(1, 9).rts().to_bytes());

        let mut cpu = ToyCpu::new();
        cpu.set_reg(Register::Pc, 0x1000);
        cpu.set_reg(Register::Sp, 0x8000);
        execute(&mut cpu, &mut host, 100).unwrap();

        assert_eq!(cpu.reg(Register::D1), 9);
        assert_eq!(cpu.reg(Register::Sp), 0x8000);
    }

    fn run_rte(stacked: &[u8]) -> (ToyCpu, Result<i32, CpuExit>) {
        let mut host = FlatHost::new(0x10000);
        host.memory.load(0x1000, &Asm::new().rte().to_bytes());
        host.memory.load(0x3000, stacked);
        host.memory.load(0x2000, &Asm::new().stop(0x2700).to_bytes());

        let mut cpu = ToyCpu::new();
        cpu.set_reg(Register::Sr, 0x2300);
        cpu.set_reg(Register::Pc, 0x1000);
        cpu.set_reg(Register::Sp, 0x3000);
        let exit = execute(&mut cpu, &mut host, 100);
        (cpu, exit)
    }

    #[test]
    fn rte_unstacks_the_whole_frame() {
        let normal = crate::ExceptionFrame::for_vector(69, 0x2000, 0x2000).encode();
        let (cpu, exit) = run_rte(&normal);
        exit.unwrap();
        assert_eq!(cpu.reg(Register::Isp), 0x3008);

        let fault = crate::ExceptionFrame::for_vector(frame::VECTOR_BUS_ERROR, 0x2000, 0x2000);
        let (cpu, exit) = run_rte(&fault.encode());
        exit.unwrap();
        assert!(cpu.is_stopped());
        assert_eq!(cpu.reg(Register::Isp), 0x3000 + frame::BusErrorFrame::LEN);
    }

    #[test]
    fn rte_with_unknown_format_is_reported() {
        let (cpu, exit) = run_rte(&[0x20, 0x00, 0x00, 0x00, 0x20, 0x00, 0x70, 0x00]);
        assert_eq!(
            exit,
            Err(CpuExit::IllegalInstruction {
                opcode: 0x4E73,
                pc: 0x1000
            })
        );
        assert_eq!(cpu.reg(Register::Sp), 0x3000);
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let mut host = FlatHost::new(0x10000);
        host.memory.load(0x1000, &[0x4A, 0xFC]); // ILLEGAL
        let mut cpu = ToyCpu::new();
        cpu.set_reg(Register::Pc, 0x1000);

        let err = execute(&mut cpu, &mut host, 100).unwrap_err();
        assert_eq!(
            err,
            CpuExit::IllegalInstruction {
                opcode: 0x4AFC,
                pc: 0x1000
            }
        );
    }
}
