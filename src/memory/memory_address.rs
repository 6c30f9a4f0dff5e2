use std::fmt;

/// a real mode segment:offset pair
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryAddress {
    pub segment: u16,
    pub offset: u16,
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.segment, self.offset)
    }
}

impl MemoryAddress {
    pub fn new(segment: u16, offset: u16) -> Self {
        MemoryAddress { segment, offset }
    }

    /// translates the pair to a linear address (0x0_0000 - 0x10_FFEF)
    pub fn value(self) -> u32 {
        (u32::from(self.segment) << 4) + u32::from(self.offset)
    }
}
