use tracing::warn;

/// A stack carved out of the [`StackArena`]. Stacks grow down from
/// [`ScratchStack::top`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "scratch stacks must be released back to the arena"]
pub struct ScratchStack {
    base: u32,
    len: u32,
}

impl ScratchStack {
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the highest byte of the stack.
    pub fn top(&self) -> u32 {
        self.base + self.len
    }
}

/// LIFO allocator over one block of guest-visible host memory.
///
/// Nested guest calls allocate their stacks strictly inside the lifetime of
/// their parent, so a bump pointer that is reset on release is enough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackArena {
    base: u32,
    size: u32,
    used: u32,
}

impl StackArena {
    pub fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            size: size & !3,
            used: 0,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    /// Reserves `len` bytes (rounded up to a long word). `None` when the
    /// arena is exhausted.
    pub fn alloc(&mut self, len: u32) -> Option<ScratchStack> {
        let len = len.checked_add(3)? & !3;
        let end = self.used.checked_add(len)?;
        if end > self.size {
            return None;
        }
        let stack = ScratchStack {
            base: self.base + self.used,
            len,
        };
        self.used = end;
        Some(stack)
    }

    /// Returns `stack` and everything allocated after it.
    pub fn release(&mut self, stack: ScratchStack) {
        let offset = stack.base.wrapping_sub(self.base);
        if offset > self.used {
            warn!(
                base = stack.base,
                used = self.used,
                "scratch stack released twice or out of order"
            );
            return;
        }
        self.used = offset;
    }
}
