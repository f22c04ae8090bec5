//! Guest OS call gates: `TRAP #1/#2/#13/#14`, Line-A and the bridge's own
//! Line-F stubs.

use tosemu_cpu::{CpuExit, GuestCpu, Register};
use tracing::{debug, error, warn};

use crate::bridge::{Reentry, Session};
use crate::host::{HostOs, LineAFunction, LineARegisters, TrapRegisters};
use crate::layout::{
    aes, aespb, bios, gemdos, xbios, TRAP_AES_VDI, TRAP_BIOS, TRAP_GEMDOS, TRAP_XBIOS,
};
use crate::privilege::{elevate_host, restore_host};
use crate::resident::{STUB_SUPEXEC, STUB_USERDEF, STUB_VECTOR};

/// Native implementation of one Line-A primitive, called with the guest stack
/// pointer.
pub type LineAHandler = fn(&mut dyn HostOs, u32) -> LineARegisters;

macro_rules! line_a_handlers {
    ($($handler:ident => $function:ident),* $(,)?) => {
        $(
            fn $handler(host: &mut dyn HostOs, sp: u32) -> LineARegisters {
                host.line_a(LineAFunction::$function, sp)
            }
        )*

        /// Line-A handlers indexed by the low nibble of the opcode.
        pub static LINE_A_HANDLERS: [LineAHandler; 16] = [$($handler),*];
    };
}

line_a_handlers! {
    line_a_init => Init,
    line_a_put_pixel => PutPixel,
    line_a_get_pixel => GetPixel,
    line_a_line => Line,
    line_a_horizontal_line => HorizontalLine,
    line_a_filled_rect => FilledRect,
    line_a_filled_polygon => FilledPolygon,
    line_a_bit_blt => BitBlt,
    line_a_text_blt => TextBlt,
    line_a_show_mouse => ShowMouse,
    line_a_hide_mouse => HideMouse,
    line_a_transform_mouse => TransformMouse,
    line_a_undraw_sprite => UndrawSprite,
    line_a_draw_sprite => DrawSprite,
    line_a_copy_raster => CopyRaster,
    line_a_seed_fill => SeedFill,
}

impl Session<'_> {
    pub(crate) fn trap(&mut self, cpu: &mut dyn GuestCpu, number: u8) -> Result<(), CpuExit> {
        match number {
            TRAP_GEMDOS => self.gemdos(cpu),
            TRAP_AES_VDI => self.aes_vdi(cpu),
            TRAP_BIOS => self.bios(cpu),
            TRAP_XBIOS => self.xbios(cpu),
            _ => self.forward(cpu, number),
        }
    }

    fn gemdos(&mut self, cpu: &mut dyn GuestCpu) -> Result<(), CpuExit> {
        let sp = cpu.reg(Register::Sp);
        let call = self.peek_u16(sp);
        debug!(call, "GEMDOS");

        if call == gemdos::SUPER {
            let param = self.peek_u32(sp.wrapping_add(2));
            debug!(param, "Super");

            if param != gemdos::SUPER_INQUIRE {
                let privilege = &mut self.state.privilege;
                if self.host.super_inquire() {
                    match privilege.leave_supervisor(cpu, &mut *self.host, param) {
                        Ok(()) => return Ok(()),
                        Err(err) => warn!(%err, "Super: passing the call to the host"),
                    }
                } else {
                    let new_sp = (param != 0).then_some(param);
                    privilege.enter_supervisor(cpu, &mut *self.host, new_sp);
                    return Ok(());
                }
            }
        }

        self.forward(cpu, TRAP_GEMDOS)
    }

    fn aes_vdi(&mut self, cpu: &mut dyn GuestCpu) -> Result<(), CpuExit> {
        if cpu.reg(Register::D0) as u16 == aes::MAGIC {
            let pb = cpu.reg(Register::D1);
            let control = self.peek_u32(pb.wrapping_add(aespb::CONTROL));
            let opcode = self.peek_u16(control);

            match opcode {
                aes::OBJC_ADD => debug!(pb, "objc_add"),
                aes::MENU_BAR | aes::OBJC_DRAW | aes::OBJC_CHANGE => {
                    let addrin = self.peek_u32(pb.wrapping_add(aespb::ADDRIN));
                    let tree = self.peek_u32(addrin);
                    let intin = self.peek_u32(pb.wrapping_add(aespb::INTIN));

                    let (start, depth) = match opcode {
                        aes::OBJC_DRAW => (
                            self.peek_i16(intin),
                            self.peek_i16(intin.wrapping_add(2)),
                        ),
                        aes::OBJC_CHANGE => (self.peek_i16(intin), 0),
                        _ => (0, aes::MENU_BAR_DEPTH),
                    };
                    debug!(opcode, tree, start, depth, "AES call may draw USERDEFs");
                    self.fix_userdefs(tree, start, depth);
                }
                _ => {}
            }
        }

        self.forward(cpu, TRAP_AES_VDI)
    }

    fn bios(&mut self, cpu: &mut dyn GuestCpu) -> Result<(), CpuExit> {
        let sp = cpu.reg(Register::Sp);
        let call = self.peek_u16(sp);
        debug!(call, "BIOS");

        if call == bios::SETEXC {
            let vector = self.peek_u16(sp.wrapping_add(2));
            let handler = self.peek_u32(sp.wrapping_add(4));
            if handler == bios::SETEXC_INQUIRE {
                debug!(vector, "Setexc inquiry");
            } else {
                debug!(vector, handler, "Setexc reroutes vector");
            }
        }

        self.forward(cpu, TRAP_BIOS)
    }

    fn xbios(&mut self, cpu: &mut dyn GuestCpu) -> Result<(), CpuExit> {
        let sp = cpu.reg(Register::Sp);
        let call = self.peek_u16(sp);
        if call != xbios::SUPEXEC {
            debug!(call, "XBIOS");
            return self.forward(cpu, TRAP_XBIOS);
        }

        // Divert into the resident trampoline as if the guest had called it.
        let return_address = cpu.reg(Register::Pc);
        let sp = sp.wrapping_sub(4);
        self.poke_u32(sp, return_address);
        cpu.set_reg(Register::Sp, sp);
        cpu.set_reg(Register::Pc, self.state.resident.supexec_trampoline());
        Ok(())
    }

    /// Passes `TRAP #number` to the host unchanged and stores its result in D0.
    fn forward(&mut self, cpu: &mut dyn GuestCpu, number: u8) -> Result<(), CpuExit> {
        let regs = TrapRegisters {
            d0: cpu.reg(Register::D0),
            d1: cpu.reg(Register::D1),
            sp: cpu.reg(Register::Sp),
        };

        let mut reentry = Reentry {
            cpu: &mut *cpu,
            state: &mut *self.state,
            fault: None,
        };
        let d0 = self.host.trap(number, regs, &mut reentry);
        if let Some(fault) = reentry.fault {
            return Err(fault);
        }

        debug!(number, d0, "forwarded trap returned");
        cpu.set_reg(Register::D0, d0);
        Ok(())
    }

    pub(crate) fn line_a(&mut self, cpu: &mut dyn GuestCpu, opcode: u16) {
        let function = LineAFunction::from_opcode(opcode);
        debug!(opcode, ?function, "Line-A");

        let handler = LINE_A_HANDLERS[function.index()];
        let regs = handler(&mut *self.host, cpu.reg(Register::Sp));

        cpu.set_reg(Register::D0, regs.d0);
        cpu.set_reg(Register::A0, regs.a0);
        cpu.set_reg(Register::A1, regs.a1);
        cpu.set_reg(Register::A2, regs.a2);
    }

    pub(crate) fn line_f(&mut self, cpu: &mut dyn GuestCpu, opcode: u16) -> Result<(), CpuExit> {
        match opcode {
            STUB_SUPEXEC => self.supexec(cpu),
            STUB_USERDEF => {
                // Guest code calling a hooked USERBLK itself: C calling
                // convention, PARMBLK pointer above the return address.
                let parmblk = self.peek_u32(cpu.reg(Register::Sp).wrapping_add(4));
                let code = self.state.resident.userdef_trampoline();
                let result = self.call_userdef(cpu, code, parmblk)?;
                cpu.set_reg(Register::D0, u32::from(result));
                Ok(())
            }
            STUB_VECTOR => {
                warn!(
                    pc = cpu.reg(Register::Ppc),
                    "guest entered the vector trampoline directly"
                );
                Ok(())
            }
            _ => {
                debug!(opcode, pc = cpu.reg(Register::Ppc), "ignoring Line-F opcode");
                Ok(())
            }
        }
    }

    /// Body of the `Supexec` trampoline. On entry the stack holds the caller's
    /// return address followed by the original `Supexec` arguments.
    fn supexec(&mut self, cpu: &mut dyn GuestCpu) -> Result<(), CpuExit> {
        let sp = cpu.reg(Register::Sp);
        let return_address = self.peek_u32(sp);
        let callback = self.peek_u32(sp.wrapping_add(6));

        if callback == 0 || callback & 1 != 0 {
            error!(callback, "Supexec callback cannot be run");
            return Err(CpuExit::UnresolvedCallback { target: callback });
        }

        debug!(callback, "Supexec");
        let token = elevate_host(&mut *self.host);
        let stack_bytes = self.state.config.callback_stack_bytes;
        let exit = self.call_on_scratch_stack(cpu, callback, &[], stack_bytes);
        restore_host(&mut *self.host, token);

        let result = exit?.map_or(0, |exit| exit.raw());
        cpu.set_reg(Register::D0, result);
        cpu.set_reg(Register::Sp, sp.wrapping_add(4));
        cpu.set_reg(Register::Pc, return_address);
        Ok(())
    }
}
