use tosemu_cpu::{GuestCpu, Register, StatusRegister};
use tracing::debug;

use crate::error::PrivilegeError;
use crate::host::{HostOs, HostPrivilegeToken};

/// Keeps the host's privilege level in step with the guest's.
///
/// Every guest switch to supervisor mode raises the host too; the host tokens
/// are kept on a stack so that nested raises unwind in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivilegeBridge {
    tokens: Vec<HostPrivilegeToken>,
}

impl PrivilegeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding host raises.
    pub fn depth(&self) -> usize {
        self.tokens.len()
    }

    /// Puts host and guest into supervisor mode.
    ///
    /// The guest's supervisor stack becomes `new_sp`, or the current guest
    /// stack when `None`. The previous supervisor stack pointer is written to
    /// D0 and returned.
    pub fn enter_supervisor(
        &mut self,
        cpu: &mut dyn GuestCpu,
        host: &mut dyn HostOs,
        new_sp: Option<u32>,
    ) -> u32 {
        self.tokens.push(host.super_enter());

        let new_sp = new_sp.unwrap_or_else(|| cpu.reg(Register::Sp));
        let sr = cpu.status() | StatusRegister::SUPERVISOR;
        cpu.set_reg(Register::Sr, u32::from(sr.bits()));

        let previous = cpu.reg(Register::Sp);
        cpu.set_reg(Register::Sp, new_sp);
        cpu.set_reg(Register::D0, previous);

        debug!(
            ssp = new_sp,
            previous,
            depth = self.tokens.len(),
            "guest entered supervisor mode"
        );
        previous
    }

    /// Undoes the most recent [`Self::enter_supervisor`]: the host drops back,
    /// the guest supervisor stack becomes `saved_sp` and the guest returns to
    /// user mode with D0 cleared.
    pub fn leave_supervisor(
        &mut self,
        cpu: &mut dyn GuestCpu,
        host: &mut dyn HostOs,
        saved_sp: u32,
    ) -> Result<(), PrivilegeError> {
        let token = self.tokens.pop().ok_or(PrivilegeError::NotElevated)?;
        host.super_leave(token);

        cpu.set_reg(Register::Sp, saved_sp);
        let sr = cpu.status() - StatusRegister::SUPERVISOR;
        cpu.set_reg(Register::Sr, u32::from(sr.bits()));
        cpu.set_reg(Register::D0, 0);

        debug!(ssp = saved_sp, depth = self.tokens.len(), "guest left supervisor mode");
        Ok(())
    }
}

/// Raises the host alone, unless it is already privileged.
pub fn elevate_host(host: &mut dyn HostOs) -> Option<HostPrivilegeToken> {
    if host.super_inquire() {
        None
    } else {
        Some(host.super_enter())
    }
}

/// Undoes [`elevate_host`].
pub fn restore_host(host: &mut dyn HostOs, token: Option<HostPrivilegeToken>) {
    if let Some(token) = token {
        host.super_leave(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTos;
    use tosemu_cpu::toy::ToyCpu;

    fn user_cpu() -> ToyCpu {
        let mut cpu = ToyCpu::new();
        cpu.set_reg(Register::Sp, 0x8000);
        cpu.set_reg(Register::Isp, 0x4000);
        cpu
    }

    #[test]
    fn enter_with_current_stack_returns_previous_ssp() {
        let mut host = FakeTos::new();
        let mut cpu = user_cpu();
        let mut privilege = PrivilegeBridge::new();

        let previous = privilege.enter_supervisor(&mut cpu, &mut host, None);

        assert_eq!(previous, 0x4000);
        assert_eq!(cpu.reg(Register::D0), 0x4000);
        assert!(cpu.is_supervisor());
        assert_eq!(cpu.reg(Register::Sp), 0x8000);
        assert!(host.is_supervisor());
        assert_eq!(privilege.depth(), 1);
    }

    #[test]
    fn round_trip_restores_both_sides() {
        let mut host = FakeTos::new();
        let mut cpu = user_cpu();
        let mut privilege = PrivilegeBridge::new();

        let previous = privilege.enter_supervisor(&mut cpu, &mut host, Some(0x6000));
        assert_eq!(cpu.reg(Register::Sp), 0x6000);

        privilege
            .leave_supervisor(&mut cpu, &mut host, previous)
            .unwrap();

        assert!(!cpu.is_supervisor());
        assert!(!host.is_supervisor());
        assert_eq!(cpu.reg(Register::Sp), 0x8000);
        assert_eq!(cpu.reg(Register::Isp), 0x4000);
        assert_eq!(cpu.reg(Register::D0), 0);
        assert_eq!(privilege.depth(), 0);
    }

    #[test]
    fn unbalanced_leave_is_rejected_without_side_effects() {
        let mut host = FakeTos::new();
        let mut cpu = user_cpu();
        cpu.set_reg(Register::D0, 77);
        let before = cpu.clone();
        let mut privilege = PrivilegeBridge::new();

        assert_eq!(
            privilege.leave_supervisor(&mut cpu, &mut host, 0x1234),
            Err(PrivilegeError::NotElevated)
        );
        assert_eq!(cpu.snapshot(), before.snapshot());
        assert!(host.privilege_log().is_empty());
    }

    #[test]
    fn host_only_elevation_is_skipped_when_privileged() {
        let mut host = FakeTos::new();
        let token = elevate_host(&mut host);
        assert!(token.is_some());
        assert!(elevate_host(&mut host).is_none());
        restore_host(&mut host, token);
        assert!(!host.is_supervisor());
    }
}
