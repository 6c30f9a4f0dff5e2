use std::fmt;

use crate::cpu::{Flags, Width};

#[cfg(test)]
#[path = "./register_test.rs"]
mod register_test;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum R {
    AL, CL, DL, BL, AH, CH, DH, BH,
    AX, CX, DX, BX, SP, BP, SI, DI,
    EAX, ECX, EDX, EBX, ESP, EBP, ESI, EDI,
    ES, CS, SS, DS, FS, GS,
}

impl fmt::Display for R {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const R8: [R; 8] = [R::AL, R::CL, R::DL, R::BL, R::AH, R::CH, R::DH, R::BH];
const R16: [R; 8] = [R::AX, R::CX, R::DX, R::BX, R::SP, R::BP, R::SI, R::DI];
const R32: [R; 8] = [R::EAX, R::ECX, R::EDX, R::EBX, R::ESP, R::EBP, R::ESI, R::EDI];
const SR: [R; 6] = [R::ES, R::CS, R::SS, R::DS, R::FS, R::GS];

impl R {
    /// 8-bit register from the 3-bit register encoding
    pub fn r8(n: u8) -> R {
        R8[(n & 7) as usize]
    }

    pub fn r16(n: u8) -> R {
        R16[(n & 7) as usize]
    }

    pub fn r32(n: u8) -> R {
        R32[(n & 7) as usize]
    }

    /// general purpose register of `width` from the 3-bit register encoding
    pub fn gpr(n: u8, width: Width) -> R {
        match width {
            Width::Byte => R::r8(n),
            Width::Word => R::r16(n),
            Width::Dword => R::r32(n),
        }
    }

    /// segment register from the 3-bit encoding, 6 and 7 are undefined
    pub fn sr(n: u8) -> Option<R> {
        SR.get(n as usize).copied()
    }

    /// the accumulator (AL, AX, EAX) of `width`
    pub fn accumulator(width: Width) -> R {
        R::gpr(0, width)
    }

    /// storage slot: 0-7 for general purpose registers, 0-5 for segment registers
    pub fn index(self) -> usize {
        match self {
            R::AL | R::AX | R::EAX | R::AH | R::ES => 0,
            R::CL | R::CX | R::ECX | R::CH | R::CS => 1,
            R::DL | R::DX | R::EDX | R::DH | R::SS => 2,
            R::BL | R::BX | R::EBX | R::BH | R::DS => 3,
            R::SP | R::ESP | R::FS => 4,
            R::BP | R::EBP | R::GS => 5,
            R::SI | R::ESI => 6,
            R::DI | R::EDI => 7,
        }
    }

    pub fn is_sreg(self) -> bool {
        match self {
            R::ES | R::CS | R::SS | R::DS | R::FS | R::GS => true,
            _ => false,
        }
    }

    pub fn width(self) -> Width {
        match self {
            R::AL | R::CL | R::DL | R::BL | R::AH | R::CH | R::DH | R::BH => Width::Byte,
            R::EAX | R::ECX | R::EDX | R::EBX | R::ESP | R::EBP | R::ESI | R::EDI => Width::Dword,
            _ => Width::Word,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            R::AL => "al", R::CL => "cl", R::DL => "dl", R::BL => "bl",
            R::AH => "ah", R::CH => "ch", R::DH => "dh", R::BH => "bh",
            R::AX => "ax", R::CX => "cx", R::DX => "dx", R::BX => "bx",
            R::SP => "sp", R::BP => "bp", R::SI => "si", R::DI => "di",
            R::EAX => "eax", R::ECX => "ecx", R::EDX => "edx", R::EBX => "ebx",
            R::ESP => "esp", R::EBP => "ebp", R::ESI => "esi", R::EDI => "edi",
            R::ES => "es", R::CS => "cs", R::SS => "ss",
            R::DS => "ds", R::FS => "fs", R::GS => "gs",
        }
    }
}

/// 16-bit addressing forms selected by the r/m field
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AMode {
    BXSI, BXDI, BPSI, BPDI, SI, DI, BP, BX,
}

impl AMode {
    pub fn from_rm(rm: u8) -> AMode {
        match rm & 7 {
            0 => AMode::BXSI,
            1 => AMode::BXDI,
            2 => AMode::BPSI,
            3 => AMode::BPDI,
            4 => AMode::SI,
            5 => AMode::DI,
            6 => AMode::BP,
            _ => AMode::BX,
        }
    }

    /// base and index register pair
    pub fn registers(self) -> (R, Option<R>) {
        match self {
            AMode::BXSI => (R::BX, Some(R::SI)),
            AMode::BXDI => (R::BX, Some(R::DI)),
            AMode::BPSI => (R::BP, Some(R::SI)),
            AMode::BPDI => (R::BP, Some(R::DI)),
            AMode::SI => (R::SI, None),
            AMode::DI => (R::DI, None),
            AMode::BP => (R::BP, None),
            AMode::BX => (R::BX, None),
        }
    }

    /// BP based forms address the stack segment by default
    pub fn uses_bp(self) -> bool {
        match self {
            AMode::BPSI | AMode::BPDI | AMode::BP => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AMode::BXSI => "bx+si",
            AMode::BXDI => "bx+di",
            AMode::BPSI => "bp+si",
            AMode::BPDI => "bp+di",
            AMode::SI => "si",
            AMode::DI => "di",
            AMode::BP => "bp",
            AMode::BX => "bx",
        }
    }
}

pub const CR0_PE: u32 = 0x0000_0001;
pub const CR0_TS: u32 = 0x0000_0008;
pub const CR0_ET: u32 = 0x0000_0010;
pub const CR0_PG: u32 = 0x8000_0000;

/// the register file. every general purpose register is stored once as 32 bits,
/// the narrower views mask into it
#[derive(Clone, Debug, Default)]
pub struct RegisterState {
    pub gpr: [u32; 8],
    pub sreg16: [u16; 6],
    pub eip: u32,
    pub flags: Flags,
    pub cr: [u32; 5],
    pub dr: [u32; 8],
}

impl RegisterState {
    pub fn get_r8(&self, r: R) -> u8 {
        match r {
            R::AL | R::CL | R::DL | R::BL => self.gpr[r.index()] as u8,
            R::AH | R::CH | R::DH | R::BH => (self.gpr[r.index()] >> 8) as u8,
            _ => unreachable!("get_r8 {}", r),
        }
    }

    pub fn set_r8(&mut self, r: R, val: u8) {
        let slot = &mut self.gpr[r.index()];
        match r {
            R::AL | R::CL | R::DL | R::BL => *slot = (*slot & 0xFFFF_FF00) | u32::from(val),
            R::AH | R::CH | R::DH | R::BH => *slot = (*slot & 0xFFFF_00FF) | (u32::from(val) << 8),
            _ => unreachable!("set_r8 {}", r),
        }
    }

    pub fn get_r16(&self, r: R) -> u16 {
        if r.is_sreg() {
            self.sreg16[r.index()]
        } else {
            self.gpr[r.index()] as u16
        }
    }

    /// sets a 16-bit general purpose register, or the selector value of a segment register
    pub fn set_r16(&mut self, r: R, val: u16) {
        if r.is_sreg() {
            self.sreg16[r.index()] = val;
        } else {
            let slot = &mut self.gpr[r.index()];
            *slot = (*slot & 0xFFFF_0000) | u32::from(val);
        }
    }

    pub fn get_r32(&self, r: R) -> u32 {
        self.gpr[r.index()]
    }

    pub fn set_r32(&mut self, r: R, val: u32) {
        self.gpr[r.index()] = val;
    }

    /// reads any register, zero extended
    pub fn get(&self, r: R) -> u32 {
        match r.width() {
            Width::Byte => u32::from(self.get_r8(r)),
            Width::Word => u32::from(self.get_r16(r)),
            Width::Dword => self.get_r32(r),
        }
    }

    /// writes the low bits of `val` into register `r`
    pub fn set(&mut self, r: R, val: u32) {
        match r.width() {
            Width::Byte => self.set_r8(r, val as u8),
            Width::Word => self.set_r16(r, val as u16),
            Width::Dword => self.set_r32(r, val),
        }
    }

    pub fn ip(&self) -> u16 {
        self.eip as u16
    }
}
