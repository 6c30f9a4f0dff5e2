use crate::memory::{FlatMemory, MemoryAddress};

#[cfg(test)]
#[path = "./mmu_test.rs"]
mod mmu_test;

/// first address of the legacy graphics window
pub const VGA_WINDOW_START: u32 = 0xA_0000;

/// last address of the legacy graphics window
pub const VGA_WINDOW_END: u32 = 0xA_FFFF;

/// memory above the configured RAM size that is always backed, so the HMA is addressable
pub const HIGH_EXTENSION: usize = 0x1_0000;

const A20_BIT: u32 = 1 << 20;

/// a device that claims the legacy graphics window
pub trait MemoryHook {
    fn read_u8(&mut self, addr: u32) -> u8;
    fn write_u8(&mut self, addr: u32, data: u8);
}

pub struct MMU {
    pub memory: FlatMemory,
    a20_enabled: bool,
    hook: Option<Box<dyn MemoryHook>>,
}

impl Default for MMU {
    fn default() -> Self {
        MMU::new(0x10_0000)
    }
}

impl MMU {
    /// creates a memory unit with `ram_size` bytes of RAM
    pub fn new(ram_size: usize) -> Self {
        MMU {
            memory: FlatMemory::new(ram_size + HIGH_EXTENSION),
            a20_enabled: false,
            hook: None,
        }
    }

    pub fn a20_enabled(&self) -> bool {
        self.a20_enabled
    }

    pub fn set_a20(&mut self, enabled: bool) {
        self.a20_enabled = enabled;
    }

    /// routes accesses to 0xA0000-0xAFFFF to `hook`
    pub fn attach_hook(&mut self, hook: Box<dyn MemoryHook>) {
        self.hook = Some(hook);
    }

    pub fn detach_hook(&mut self) -> Option<Box<dyn MemoryHook>> {
        self.hook.take()
    }

    /// applies the A20 gate to a linear address
    pub fn physical(&self, addr: u32) -> u32 {
        if self.a20_enabled {
            addr
        } else {
            addr & !A20_BIT
        }
    }

    pub fn read_u8(&mut self, addr: u32) -> u8 {
        let addr = self.physical(addr);
        if addr >= VGA_WINDOW_START && addr <= VGA_WINDOW_END {
            if let Some(hook) = self.hook.as_mut() {
                return hook.read_u8(addr);
            }
        }
        self.memory.read_u8(addr)
    }

    pub fn write_u8(&mut self, addr: u32, data: u8) {
        let addr = self.physical(addr);
        if addr >= VGA_WINDOW_START && addr <= VGA_WINDOW_END {
            if let Some(hook) = self.hook.as_mut() {
                hook.write_u8(addr, data);
                return;
            }
        }
        self.memory.write_u8(addr, data);
    }

    pub fn read_u16(&mut self, addr: u32) -> u16 {
        u16::from(self.read_u8(addr.wrapping_add(1))) << 8 | u16::from(self.read_u8(addr))
    }

    pub fn write_u16(&mut self, addr: u32, data: u16) {
        self.write_u8(addr, data as u8);
        self.write_u8(addr.wrapping_add(1), (data >> 8) as u8);
    }

    pub fn read_u32(&mut self, addr: u32) -> u32 {
        u32::from(self.read_u16(addr.wrapping_add(2))) << 16 | u32::from(self.read_u16(addr))
    }

    pub fn write_u32(&mut self, addr: u32, data: u32) {
        self.write_u16(addr, data as u16);
        self.write_u16(addr.wrapping_add(2), (data >> 16) as u16);
    }

    /// reads a sequence of data from memory
    pub fn read(&mut self, addr: u32, length: usize) -> Vec<u8> {
        (0..length).map(|i| self.read_u8(addr.wrapping_add(i as u32))).collect()
    }

    /// writes a sequence of data to memory
    pub fn write(&mut self, addr: u32, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.write_u8(addr.wrapping_add(i as u32), *b);
        }
    }

    /// reads the real mode interrupt vector `v` from the table at `base`
    pub fn read_vec(&mut self, base: u32, v: u8) -> MemoryAddress {
        let entry = base.wrapping_add(u32::from(v) << 2);
        let offset = self.read_u16(entry);
        let segment = self.read_u16(entry.wrapping_add(2));
        MemoryAddress::new(segment, offset)
    }

    /// writes the real mode interrupt vector `v` to the table at `base`
    pub fn write_vec(&mut self, base: u32, v: u8, addr: MemoryAddress) {
        let entry = base.wrapping_add(u32::from(v) << 2);
        self.write_u16(entry, addr.offset);
        self.write_u16(entry.wrapping_add(2), addr.segment);
    }
}
