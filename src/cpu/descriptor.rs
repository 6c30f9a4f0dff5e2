//! Protected mode descriptor table entries.

use bincode::deserialize;

#[cfg(test)]
#[path = "./descriptor_test.rs"]
mod descriptor_test;

pub const ACCESS_ACCESSED: u8 = 0x01;
pub const ACCESS_RW: u8 = 0x02;
pub const ACCESS_DC: u8 = 0x04;
pub const ACCESS_EXEC: u8 = 0x08;
pub const ACCESS_CODE_DATA: u8 = 0x10;
pub const ACCESS_PRESENT: u8 = 0x80;

const FLAG_BIG: u8 = 0x40;
const FLAG_GRANULARITY: u8 = 0x80;

/// a GDT/LDT entry as stored in memory
#[derive(Deserialize, Debug, Default)]
struct RawDescriptor {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    /// limit bits 16-19 in the low nibble, G/DB/L/AVL in the high nibble
    flags_limit_high: u8,
    base_high: u8,
}

/// an IDT entry as stored in memory
#[derive(Deserialize, Debug, Default)]
struct RawGate {
    offset_low: u16,
    selector: u16,
    _reserved: u8,
    access: u8,
    offset_high: u16,
}

/// cached segment descriptor, one per segment register
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub base: u32,

    /// byte granular limit (granularity already applied)
    pub limit: u32,

    pub access: u8,

    /// D/B bit: 32-bit default operand size for code, 32-bit stack pointer for stacks
    pub big: bool,
}

impl SegmentDescriptor {
    /// the descriptor a real mode segment load synthesizes
    pub fn real_mode(selector: u16) -> Self {
        SegmentDescriptor {
            base: u32::from(selector) << 4,
            limit: 0xF_FFFF,
            access: ACCESS_PRESENT | ACCESS_CODE_DATA | ACCESS_RW,
            big: false,
        }
    }

    /// decodes the 8 bytes of a descriptor table entry
    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        let raw: RawDescriptor = deserialize(&bytes[..]).unwrap_or_default();
        let mut limit = u32::from(raw.limit_low) | (u32::from(raw.flags_limit_high & 0x0F) << 16);
        if raw.flags_limit_high & FLAG_GRANULARITY != 0 {
            limit = (limit << 12) | 0xFFF;
        }
        SegmentDescriptor {
            base: u32::from(raw.base_low) | (u32::from(raw.base_mid) << 16) | (u32::from(raw.base_high) << 24),
            limit,
            access: raw.access,
            big: raw.flags_limit_high & FLAG_BIG != 0,
        }
    }

    pub fn is_present(&self) -> bool {
        self.access & ACCESS_PRESENT != 0
    }

    pub fn dpl(&self) -> u8 {
        (self.access >> 5) & 3
    }

    /// system descriptors (LDT, TSS, gates) have the S bit clear
    pub fn is_system(&self) -> bool {
        self.access & ACCESS_CODE_DATA == 0
    }

    /// the 4-bit type field of a system descriptor
    pub fn system_type(&self) -> u8 {
        self.access & 0x0F
    }

    pub fn is_code(&self) -> bool {
        !self.is_system() && self.access & ACCESS_EXEC != 0
    }

    pub fn is_data(&self) -> bool {
        !self.is_system() && self.access & ACCESS_EXEC == 0
    }

    pub fn is_writable(&self) -> bool {
        self.is_data() && self.access & ACCESS_RW != 0
    }

    pub fn is_readable(&self) -> bool {
        self.is_data() || (self.is_code() && self.access & ACCESS_RW != 0)
    }

    pub fn is_expand_down(&self) -> bool {
        self.is_data() && self.access & ACCESS_DC != 0
    }

    /// checks that `len` bytes starting at `offset` lie within the segment
    pub fn contains(&self, offset: u32, len: u32) -> bool {
        let last = u64::from(offset) + u64::from(len) - 1;
        if self.is_expand_down() {
            let upper = if self.big { 0xFFFF_FFFF } else { 0xFFFF };
            u64::from(offset) > u64::from(self.limit) && last <= upper
        } else {
            last <= u64::from(self.limit)
        }
    }
}

/// GDTR / IDTR contents
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorTable {
    pub base: u32,
    pub limit: u16,
}

impl DescriptorTable {
    /// the real mode interrupt vector table
    pub fn real_mode_ivt() -> Self {
        DescriptorTable { base: 0, limit: 0x3FF }
    }

    /// linear address of the 8-byte entry at byte offset `offset`, if inside the limit
    pub fn entry_address(&self, offset: u32) -> Option<u32> {
        if offset + 7 > u32::from(self.limit) {
            None
        } else {
            Some(self.base.wrapping_add(offset))
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GateKind {
    Task,
    Interrupt16,
    Trap16,
    Interrupt32,
    Trap32,
}

impl GateKind {
    pub fn is_32bit(self) -> bool {
        self == GateKind::Interrupt32 || self == GateKind::Trap32
    }

    /// interrupt gates clear IF on entry, trap gates leave it alone
    pub fn clears_interrupt_flag(self) -> bool {
        self == GateKind::Interrupt16 || self == GateKind::Interrupt32
    }
}

/// a decoded IDT entry
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GateDescriptor {
    pub offset: u32,
    pub selector: u16,
    pub kind: Option<GateKind>,
    pub dpl: u8,
    pub present: bool,
}

impl GateDescriptor {
    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        let raw: RawGate = deserialize(&bytes[..]).unwrap_or_default();
        let kind = match raw.access & 0x1F {
            0x05 => Some(GateKind::Task),
            0x06 => Some(GateKind::Interrupt16),
            0x07 => Some(GateKind::Trap16),
            0x0E => Some(GateKind::Interrupt32),
            0x0F => Some(GateKind::Trap32),
            _ => None,
        };
        GateDescriptor {
            offset: u32::from(raw.offset_low) | (u32::from(raw.offset_high) << 16),
            selector: raw.selector,
            kind,
            dpl: (raw.access >> 5) & 3,
            present: raw.access & ACCESS_PRESENT != 0,
        }
    }
}
