use crate::cpu::Width;

#[cfg(test)]
#[path = "./flag_test.rs"]
mod flag_test;

/// https://en.wikipedia.org/wiki/FLAGS_register
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub carry: bool,       // 0
    pub parity: bool,      // 2
    pub adjust: bool,      // 4
    pub zero: bool,        // 6
    pub sign: bool,        // 7
    pub trap: bool,        // 8: single step
    pub interrupt: bool,   // 9
    pub direction: bool,   // 10
    pub overflow: bool,    // 11
    pub iopl: u8,          // 12-13: I/O privilege level (286+)
    pub nested_task: bool, // 14 (286+)
    pub resume: bool,      // 16 (386+)
    pub vm: bool,          // 17: virtual 8086 mode (386+)
    pub vif: bool,         // 19
    pub vip: bool,         // 20
}

pub const FLAG_CF: u32 = 0x0000_0001;
pub const FLAG_PF: u32 = 0x0000_0004;
pub const FLAG_AF: u32 = 0x0000_0010;
pub const FLAG_ZF: u32 = 0x0000_0040;
pub const FLAG_SF: u32 = 0x0000_0080;
pub const FLAG_TF: u32 = 0x0000_0100;
pub const FLAG_IF: u32 = 0x0000_0200;
pub const FLAG_DF: u32 = 0x0000_0400;
pub const FLAG_OF: u32 = 0x0000_0800;
pub const FLAG_IOPL: u32 = 0x0000_3000;
pub const FLAG_NT: u32 = 0x0000_4000;
pub const FLAG_RF: u32 = 0x0001_0000;
pub const FLAG_VM: u32 = 0x0002_0000;
pub const FLAG_VIF: u32 = 0x0008_0000;
pub const FLAG_VIP: u32 = 0x0010_0000;

/// bit 1 reads as set on every model
const FLAG_RESERVED1: u32 = 0x0000_0002;

/// bits 12-15 read as set on the 8086 and 80186
pub const FLAG_HIGH_NIBBLE: u32 = 0x0000_F000;

/// the arithmetic status flags
pub const FLAG_STATUS: u32 = FLAG_CF | FLAG_PF | FLAG_AF | FLAG_ZF | FLAG_SF | FLAG_OF;

/// even parity of each byte value
static PARITY_LOOKUP: [bool; 256] = {
    let mut t = [false; 256];
    let mut i = 0;
    while i < 256 {
        t[i] = (i as u8).count_ones() % 2 == 0;
        i += 1;
    }
    t
};

impl Flags {
    pub fn new() -> Self {
        Flags::default()
    }

    pub fn new_from_u16(val: u16) -> Flags {
        let mut f = Flags::new();
        f.set_u16(val);
        f
    }

    pub fn u16(&self) -> u16 {
        self.u32() as u16
    }

    pub fn u32(&self) -> u32 {
        let mut v = FLAG_RESERVED1 | (u32::from(self.iopl & 3) << 12);
        let bits = [
            (self.carry, FLAG_CF), (self.parity, FLAG_PF), (self.adjust, FLAG_AF),
            (self.zero, FLAG_ZF), (self.sign, FLAG_SF), (self.trap, FLAG_TF),
            (self.interrupt, FLAG_IF), (self.direction, FLAG_DF), (self.overflow, FLAG_OF),
            (self.nested_task, FLAG_NT), (self.resume, FLAG_RF), (self.vm, FLAG_VM),
            (self.vif, FLAG_VIF), (self.vip, FLAG_VIP),
        ];
        for &(set, mask) in bits.iter() {
            if set {
                v |= mask;
            }
        }
        v
    }

    /// loads the low 16 flag bits, leaving the extended ones alone
    pub fn set_u16(&mut self, val: u16) {
        let val = u32::from(val);
        self.carry = val & FLAG_CF != 0;
        self.parity = val & FLAG_PF != 0;
        self.adjust = val & FLAG_AF != 0;
        self.zero = val & FLAG_ZF != 0;
        self.sign = val & FLAG_SF != 0;
        self.trap = val & FLAG_TF != 0;
        self.interrupt = val & FLAG_IF != 0;
        self.direction = val & FLAG_DF != 0;
        self.overflow = val & FLAG_OF != 0;
        self.iopl = ((val & FLAG_IOPL) >> 12) as u8;
        self.nested_task = val & FLAG_NT != 0;
    }

    pub fn set_u32(&mut self, val: u32) {
        self.set_u16(val as u16);
        self.resume = val & FLAG_RF != 0;
        self.vm = val & FLAG_VM != 0;
        self.vif = val & FLAG_VIF != 0;
        self.vip = val & FLAG_VIP != 0;
    }

    /// sets sign, zero and parity flags from a result of `width`
    pub fn set_szp(&mut self, res: u32, width: Width) {
        let res = res & width.mask();
        self.sign = res & width.sign_bit() != 0;
        self.zero = res == 0;
        self.set_parity(res);
    }

    /// Set if the least-significant byte of the result contains an
    /// even number of 1 bits; cleared otherwise.
    pub fn set_parity(&mut self, v: u32) {
        self.parity = PARITY_LOOKUP[(v & 0xFF) as usize];
    }

    pub fn carry_val(&self) -> u32 {
        if self.carry { 1 } else { 0 }
    }

    /// compact representation used by the instruction trace
    pub fn trace_str(&self) -> String {
        format!(
            "C{} Z{} S{} O{} A{} P{} D{} I{} T{}",
            self.carry as u8, self.zero as u8, self.sign as u8, self.overflow as u8,
            self.adjust as u8, self.parity as u8, self.direction as u8,
            self.interrupt as u8, self.trap as u8,
        )
    }
}
