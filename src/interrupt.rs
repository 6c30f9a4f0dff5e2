//! Guest exceptions and the signals shared with threads outside the execution loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

#[cfg(test)]
#[path = "./interrupt_test.rs"]
mod interrupt_test;

/// processor exceptions raised by instruction handlers.
/// http://wiki.osdev.org/Exceptions
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exception {
    DIV0,    // Divide error
    DB,      // Debug (single step)
    BP,      // Breakpoint (INT3)
    OF,      // Overflow (INTO)
    BR,      // BOUND range exceeded
    UD,      // Invalid opcode
    NM,      // Coprocessor not available
    DF,      // Double fault
    TS(u16), // Invalid TSS
    NP(u16), // Segment not present
    SS(u16), // Stack-segment fault
    GP(u16), // General protection fault
}

impl Exception {
    pub fn vector(self) -> u8 {
        match self {
            Exception::DIV0 => 0,
            Exception::DB => 1,
            Exception::BP => 3,
            Exception::OF => 4,
            Exception::BR => 5,
            Exception::UD => 6,
            Exception::NM => 7,
            Exception::DF => 8,
            Exception::TS(_) => 10,
            Exception::NP(_) => 11,
            Exception::SS(_) => 12,
            Exception::GP(_) => 13,
        }
    }

    /// error code pushed in protected mode
    pub fn error_code(self) -> Option<u16> {
        match self {
            Exception::DF => Some(0),
            Exception::TS(c) | Exception::NP(c) | Exception::SS(c) | Exception::GP(c) => Some(c),
            _ => None,
        }
    }

    /// traps return to the following instruction, faults restart the faulting one
    pub fn is_trap(self) -> bool {
        match self {
            Exception::DB | Exception::BP | Exception::OF | Exception::NM => true,
            _ => false,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Exception::DIV0 => "#DE",
            Exception::DB => "#DB",
            Exception::BP => "#BP",
            Exception::OF => "#OF",
            Exception::BR => "#BR",
            Exception::UD => "#UD",
            Exception::NM => "#NM",
            Exception::DF => "#DF",
            Exception::TS(_) => "#TS",
            Exception::NP(_) => "#NP",
            Exception::SS(_) => "#SS",
            Exception::GP(_) => "#GP",
        };
        match self.error_code() {
            Some(code) => write!(f, "{}({:04X})", name, code),
            None => write!(f, "{}", name),
        }
    }
}

/// the 16 hardware interrupt lines. clones share state, so devices on other
/// threads can raise lines while the execution loop consumes them
#[derive(Clone, Debug, Default)]
pub struct IrqHandle {
    pending: Arc<AtomicU16>,
}

impl IrqHandle {
    pub fn new() -> Self {
        IrqHandle::default()
    }

    pub fn raise(&self, line: u8) {
        debug_assert!(line < 16);
        self.pending.fetch_or(1 << (line & 15), Ordering::SeqCst);
    }

    pub fn lower(&self, line: u8) {
        self.pending.fetch_and(!(1 << (line & 15)), Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst) != 0
    }

    /// removes and returns the highest priority (lowest numbered) pending line
    pub fn take_highest(&self) -> Option<u8> {
        let mut cur = self.pending.load(Ordering::SeqCst);
        loop {
            if cur == 0 {
                return None;
            }
            let line = cur.trailing_zeros() as u8;
            match self.pending.compare_exchange(cur, cur & !(1 << line), Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Some(line),
                Err(actual) => cur = actual,
            }
        }
    }
}

/// interrupt vector of IRQ `line`, given the vector bases of the two interrupt controllers
pub fn irq_vector(line: u8, master_base: u8, slave_base: u8) -> u8 {
    if line < 8 {
        master_base.wrapping_add(line)
    } else {
        slave_base.wrapping_add(line - 8)
    }
}

/// cooperative stop request, polled once per loop iteration
#[derive(Clone, Debug, Default)]
pub struct ExitHandle {
    requested: Arc<AtomicBool>,
}

impl ExitHandle {
    pub fn new() -> Self {
        ExitHandle::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}
