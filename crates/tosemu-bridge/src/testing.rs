//! An in-memory stand-in for the real TOS, for tests.
//!
//! [`FakeTos`] shares one flat address space with the guest, tracks host
//! privilege, records everything forwarded to it and contains just enough of
//! an AES to draw object trees: USERDEF objects are drawn by calling their
//! code pointer back through [`GuestCallbacks::call_userdef`].

use std::collections::{HashMap, HashSet, VecDeque};

use tosemu_cpu::toy::FlatMemory;
use tosemu_cpu::Size;

use crate::host::{
    GuestCallbacks, HostMemory, HostOs, HostPrivilegeToken, LineAFunction, LineARegisters,
    TrapRegisters,
};
use crate::layout::{aes, aespb, object, parmblk, userblk, TRAP_AES_VDI};

pub const MEMORY_BYTES: usize = 0x20_0000;
/// First address handed out by [`HostOs::allocate`].
pub const HEAP_BASE: u32 = 0x18_0000;
const PARMBLK_SCRATCH: u32 = 0x17_FF00;
const HOST_SSP: u32 = 0x00E0_0000;

/// Sends bridge events to the test output.
#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAccess {
    Read { address: u32, size: Size },
    Write { address: u32, size: Size, value: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeEvent {
    Enter(HostPrivilegeToken),
    Leave(HostPrivilegeToken),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardedTrap {
    pub number: u8,
    /// First word on the guest stack (the call number for GEMDOS/BIOS/XBIOS).
    pub call: u16,
    pub regs: TrapRegisters,
    /// Host privilege when the call arrived.
    pub supervisor: bool,
}

/// One USERDEF draw the fake AES performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserdefDraw {
    pub tree: u32,
    pub obj: i16,
    pub code: u32,
    pub result: u16,
}

#[derive(Debug)]
pub struct FakeTos {
    pub memory: FlatMemory,
    /// D0 results for forwarded calls, by (trap, call). Unlisted calls return 0.
    pub replies: HashMap<(u8, u16), u32>,
    supervisor: bool,
    next_alloc: u32,
    privilege_log: Vec<PrivilegeEvent>,
    supervisor_accesses: Vec<SupervisorAccess>,
    traps: Vec<ForwardedTrap>,
    line_a_calls: Vec<(LineAFunction, u32)>,
    userdef_draws: Vec<UserdefDraw>,
    pending_interrupts: VecDeque<u8>,
    interrupts_during_trap: Vec<u8>,
}

impl Default for FakeTos {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTos {
    pub fn new() -> Self {
        Self {
            memory: FlatMemory::new(MEMORY_BYTES),
            replies: HashMap::new(),
            supervisor: false,
            next_alloc: HEAP_BASE,
            privilege_log: Vec::new(),
            supervisor_accesses: Vec::new(),
            traps: Vec::new(),
            line_a_calls: Vec::new(),
            userdef_draws: Vec::new(),
            pending_interrupts: VecDeque::new(),
            interrupts_during_trap: Vec::new(),
        }
    }

    pub fn is_supervisor(&self) -> bool {
        self.supervisor
    }

    pub fn privilege_log(&self) -> &[PrivilegeEvent] {
        &self.privilege_log
    }

    pub fn supervisor_accesses(&self) -> &[SupervisorAccess] {
        &self.supervisor_accesses
    }

    pub fn traps(&self) -> &[ForwardedTrap] {
        &self.traps
    }

    pub fn line_a_calls(&self) -> &[(LineAFunction, u32)] {
        &self.line_a_calls
    }

    pub fn userdef_draws(&self) -> &[UserdefDraw] {
        &self.userdef_draws
    }

    pub fn reply(&mut self, trap: u8, call: u16, d0: u32) {
        self.replies.insert((trap, call), d0);
    }

    /// Queues a real interrupt for [`HostOs::poll_interrupt`].
    pub fn raise_interrupt(&mut self, vector: u8) {
        self.pending_interrupts.push_back(vector);
    }

    /// Delivers `vector` to the guest in the middle of the next forwarded
    /// trap, while the host is busy.
    pub fn interrupt_during_next_trap(&mut self, vector: u8) {
        self.interrupts_during_trap.push(vector);
    }

    /// The registers the fake Line-A hands back for `function`.
    pub fn line_a_reply(function: LineAFunction) -> LineARegisters {
        let n = function.index() as u32;
        LineARegisters {
            d0: 0x100 + n,
            a0: 0x00A0_0000 + n,
            a1: 0x00A1_0000 + n,
            a2: 0x00A2_0000 + n,
        }
    }

    /// Minimal `objc_draw`: every USERDEF reachable from `start` within
    /// `depth` levels is drawn through its code pointer.
    fn objc_draw(&mut self, guest: &mut dyn GuestCallbacks, tree: u32, start: i16, depth: i16) {
        let mut userdefs = Vec::new();
        let mut visited = HashSet::from([start]);
        let mut pending = vec![(start, depth)];
        while let Some((obj, depth)) = pending.pop() {
            let address = object::address(tree, obj);
            let ob_type = self.memory.read_u16(address.wrapping_add(object::TYPE));
            if ob_type & 0xFF == object::G_USERDEF {
                let ub = self.memory.read_u32(address.wrapping_add(object::SPEC));
                userdefs.push((obj, ub));
            }
            if depth <= 0 {
                continue;
            }
            let mut child = self.memory.read_u16(address.wrapping_add(object::HEAD)) as i16;
            while child >= 0 && visited.insert(child) {
                pending.push((child, depth.saturating_sub(1)));
                let next = object::address(tree, child).wrapping_add(object::NEXT);
                child = self.memory.read_u16(next) as i16;
            }
        }

        for (obj, ub) in userdefs {
            let code = self.memory.read_u32(ub.wrapping_add(userblk::CODE));
            let parm = self.memory.read_u32(ub.wrapping_add(userblk::PARM));
            let state = self
                .memory
                .read_u16(object::address(tree, obj).wrapping_add(object::STATE));

            let pb = PARMBLK_SCRATCH;
            self.memory.write_u32(pb + parmblk::TREE, tree);
            self.memory.write_u16(pb + parmblk::OBJ, obj as u16);
            self.memory.write_u16(pb + parmblk::PREVSTATE, state);
            self.memory.write_u16(pb + parmblk::CURRSTATE, state);
            self.memory.write_u32(pb + parmblk::PARM, parm);

            let result = guest.call_userdef(self, code, pb);
            self.userdef_draws.push(UserdefDraw {
                tree,
                obj,
                code,
                result,
            });
        }
    }

    fn aes(&mut self, regs: TrapRegisters, guest: &mut dyn GuestCallbacks) -> u32 {
        if regs.d0 as u16 != aes::MAGIC {
            return 0;
        }
        let pb = regs.d1;
        let control = self.memory.read_u32(pb.wrapping_add(aespb::CONTROL));
        let intin = self.memory.read_u32(pb.wrapping_add(aespb::INTIN));
        let addrin = self.memory.read_u32(pb.wrapping_add(aespb::ADDRIN));
        let tree = self.memory.read_u32(addrin);

        match self.memory.read_u16(control) {
            aes::OBJC_DRAW => {
                let start = self.memory.read_u16(intin) as i16;
                let depth = self.memory.read_u16(intin.wrapping_add(2)) as i16;
                self.objc_draw(guest, tree, start, depth);
            }
            aes::OBJC_CHANGE => {
                let start = self.memory.read_u16(intin) as i16;
                self.objc_draw(guest, tree, start, 0);
            }
            aes::MENU_BAR => self.objc_draw(guest, tree, 0, aes::MENU_BAR_DEPTH),
            _ => {}
        }
        1
    }
}

impl HostMemory for FakeTos {
    fn read(&mut self, address: u32, size: Size) -> u32 {
        self.memory.read(address, size)
    }

    fn write(&mut self, address: u32, size: Size, value: u32) {
        self.memory.write(address, size, value);
    }

    fn supervisor_read(&mut self, address: u32, size: Size) -> u32 {
        self.supervisor_accesses
            .push(SupervisorAccess::Read { address, size });
        self.memory.read(address, size)
    }

    fn supervisor_write(&mut self, address: u32, size: Size, value: u32) {
        self.supervisor_accesses.push(SupervisorAccess::Write {
            address,
            size,
            value,
        });
        self.memory.write(address, size, value);
    }
}

impl HostOs for FakeTos {
    fn allocate(&mut self, bytes: u32) -> Option<u32> {
        let base = self.next_alloc;
        let end = base.checked_add(bytes.checked_add(3)? & !3)?;
        if end as usize > self.memory.size() {
            return None;
        }
        self.next_alloc = end;
        Some(base)
    }

    fn super_inquire(&mut self) -> bool {
        self.supervisor
    }

    fn super_enter(&mut self) -> HostPrivilegeToken {
        let depth = self
            .privilege_log
            .iter()
            .filter(|event| matches!(event, PrivilegeEvent::Enter(_)))
            .count() as u32;
        let token = HostPrivilegeToken(HOST_SSP - depth * 0x100);
        self.supervisor = true;
        self.privilege_log.push(PrivilegeEvent::Enter(token));
        token
    }

    fn super_leave(&mut self, token: HostPrivilegeToken) {
        self.supervisor = false;
        self.privilege_log.push(PrivilegeEvent::Leave(token));
    }

    fn trap(&mut self, number: u8, regs: TrapRegisters, guest: &mut dyn GuestCallbacks) -> u32 {
        let call = self.memory.read_u16(regs.sp);
        self.traps.push(ForwardedTrap {
            number,
            call,
            regs,
            supervisor: self.supervisor,
        });

        for vector in std::mem::take(&mut self.interrupts_during_trap) {
            guest.interrupt(self, vector);
        }

        if number == TRAP_AES_VDI {
            return self.aes(regs, guest);
        }
        self.replies.get(&(number, call)).copied().unwrap_or(0)
    }

    fn line_a(&mut self, function: LineAFunction, sp: u32) -> LineARegisters {
        self.line_a_calls.push((function, sp));
        Self::line_a_reply(function)
    }

    fn poll_interrupt(&mut self) -> Option<u8> {
        self.pending_interrupts.pop_front()
    }
}

/// Builds GEM object trees in [`FlatMemory`].
///
/// Object 0 is a plain box; every further object is appended as the last
/// child of its parent. USERBLKs are written where the caller puts them.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    tree: u32,
    objects: Vec<TreeObject>,
    userblks: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, Copy)]
struct TreeObject {
    next: i16,
    head: i16,
    tail: i16,
    ob_type: u16,
    spec: u32,
}

const G_BOX: u16 = 20;

impl TreeBuilder {
    pub fn new(tree: u32) -> Self {
        Self {
            tree,
            objects: vec![TreeObject {
                next: object::NIL,
                head: object::NIL,
                tail: object::NIL,
                ob_type: G_BOX,
                spec: 0,
            }],
            userblks: Vec::new(),
        }
    }

    pub fn child(self, parent: i16) -> Self {
        self.push(parent, G_BOX, 0)
    }

    /// Appends a `G_USERDEF` child of `parent` whose USERBLK at `block`
    /// points at `code`.
    pub fn userdef(mut self, parent: i16, block: u32, code: u32) -> Self {
        self.userblks.push((block, code));
        self.push(parent, object::G_USERDEF, block)
    }

    fn push(mut self, parent: i16, ob_type: u16, spec: u32) -> Self {
        let index = self.objects.len() as i16;
        let p = parent as usize;
        match self.objects[p].tail {
            object::NIL => self.objects[p].head = index,
            tail => self.objects[tail as usize].next = index,
        }
        self.objects[p].tail = index;
        self.objects.push(TreeObject {
            next: parent,
            head: object::NIL,
            tail: object::NIL,
            ob_type,
            spec,
        });
        self
    }

    pub fn write(&self, memory: &mut FlatMemory) {
        for (index, obj) in self.objects.iter().enumerate() {
            let address = object::address(self.tree, index as i16);
            memory.write_u16(address + object::NEXT, obj.next as u16);
            memory.write_u16(address + object::HEAD, obj.head as u16);
            memory.write_u16(address + object::TAIL, obj.tail as u16);
            memory.write_u16(address + object::TYPE, obj.ob_type);
            memory.write_u16(address + object::FLAGS, 0);
            memory.write_u16(address + object::STATE, 0);
            memory.write_u32(address + object::SPEC, obj.spec);
            memory.write_u16(address + object::WIDTH, 16);
            memory.write_u16(address + object::HEIGHT, 16);
        }
        for &(block, code) in &self.userblks {
            memory.write_u32(block + userblk::CODE, code);
            memory.write_u32(block + userblk::PARM, block);
        }
    }
}

/// Writes an AES parameter block for `opcode` at `pb` with its arrays right
/// behind it, and returns `pb` for D1.
pub fn write_aes_call(
    memory: &mut FlatMemory,
    pb: u32,
    opcode: u16,
    intin: &[i16],
    tree: u32,
) -> u32 {
    let control = pb + aespb::SIZE;
    let intin_address = control + 16;
    let addrin = intin_address + 16;
    memory.write_u32(pb + aespb::CONTROL, control);
    memory.write_u32(pb + aespb::INTIN, intin_address);
    memory.write_u32(pb + aespb::ADDRIN, addrin);
    memory.write_u16(control, opcode);
    for (i, value) in intin.iter().enumerate() {
        memory.write_u16(intin_address + i as u32 * 2, *value as u16);
    }
    memory.write_u32(addrin, tree);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_disjoint_and_bounded() {
        let mut tos = FakeTos::new();
        let a = tos.allocate(10).unwrap();
        let b = tos.allocate(4).unwrap();
        assert_eq!(a, HEAP_BASE);
        assert_eq!(b, HEAP_BASE + 12);
        assert!(tos.allocate(MEMORY_BYTES as u32).is_none());
    }

    #[test]
    fn tree_builder_links_siblings_back_to_parent() {
        let mut memory = FlatMemory::new(0x1000);
        TreeBuilder::new(0x100)
            .child(0)
            .child(0)
            .child(1)
            .write(&mut memory);

        let field =
            |obj: i16, offset: u32| memory.read_u16(object::address(0x100, obj) + offset) as i16;
        assert_eq!(field(0, object::HEAD), 1);
        assert_eq!(field(0, object::TAIL), 2);
        assert_eq!(field(1, object::NEXT), 2);
        assert_eq!(field(2, object::NEXT), 0);
        assert_eq!(field(1, object::HEAD), 3);
        assert_eq!(field(3, object::NEXT), 1);
    }
}
