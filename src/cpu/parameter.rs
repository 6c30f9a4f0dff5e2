use std::fmt;

use crate::cpu::segment::Segment;
use crate::cpu::{AMode, Width, R};

/// A set of Parameters for an Instruction
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSet {
    pub dst: Parameter,
    pub src: Parameter,
    pub src2: Parameter,
}

/// effective address of a memory operand, before segmentation
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Address {
    /// [disp16] or [disp32]
    Direct(u32),

    /// 16-bit register form: [amode+disp]
    Amode(AMode, i16),

    /// 32-bit register form: [base+index*scale+disp]
    Indexed {
        base: Option<R>,
        index: Option<R>,
        scale: u8,
        disp: i32,
    },
}

fn write_disp(f: &mut fmt::Formatter, disp: i64) -> fmt::Result {
    if disp < 0 {
        write!(f, "-0x{:X}", -disp)
    } else if disp > 0 {
        write!(f, "+0x{:X}", disp)
    } else {
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Address::Direct(v) => write!(f, "0x{:04X}", v),
            Address::Amode(amode, disp) => {
                write!(f, "{}", amode.as_str())?;
                write_disp(f, i64::from(disp))
            }
            Address::Indexed { base, index, scale, disp } => {
                let mut parts = Vec::new();
                if let Some(base) = base {
                    parts.push(base.as_str().to_owned());
                }
                if let Some(index) = index {
                    if scale > 1 {
                        parts.push(format!("{}*{}", index, scale));
                    } else {
                        parts.push(index.as_str().to_owned());
                    }
                }
                if parts.is_empty() {
                    return write!(f, "0x{:08X}", disp as u32);
                }
                write!(f, "{}", parts.join("+"))?;
                write_disp(f, i64::from(disp))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Parameter {
    /// 8-bit general purpose register
    Reg8(R),
    /// 16-bit general purpose register
    Reg16(R),
    /// 32-bit general purpose register
    Reg32(R),
    /// 16-bit segment register
    SReg16(R),
    /// control register CRn
    CReg(u8),
    /// debug register DRn
    DReg(u8),

    Imm8(u8),                      // byte 0x80
    ImmS8(i8),                     // byte +0x3f
    Imm16(u16),                    // word 0x8000
    Imm32(u32),                    // dword 0x8000_0000
    Ptr16Imm(u16, u32),            // jmp far u16:u16 or u16:u32

    Ptr8(Segment, Address),        // byte [ds:bx+si]
    Ptr16(Segment, Address),       // word [ss:bp-0x20]
    Ptr32(Segment, Address),       // dword [ds:eax+ecx*4]
    None,
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Parameter::Reg8(r) | Parameter::Reg16(r) | Parameter::Reg32(r) | Parameter::SReg16(r) => {
                write!(f, "{}", r)
            }
            Parameter::CReg(n) => write!(f, "cr{}", n),
            Parameter::DReg(n) => write!(f, "dr{}", n),
            Parameter::Imm8(imm) => write!(f, "0x{:02X}", imm),
            Parameter::Imm16(imm) => write!(f, "0x{:04X}", imm),
            Parameter::Imm32(imm) => write!(f, "0x{:08X}", imm),
            Parameter::ImmS8(imm) => {
                let sign = if imm < 0 { "-" } else { "+" };
                write!(f, "byte {}0x{:02X}", sign, i16::from(imm).abs())
            }
            Parameter::Ptr16Imm(seg, v) => write!(f, "{:04X}:{:04X}", seg, v),
            Parameter::Ptr8(seg, ref addr) => write!(f, "byte [{}:{}]", seg, addr),
            Parameter::Ptr16(seg, ref addr) => write!(f, "word [{}:{}]", seg, addr),
            Parameter::Ptr32(seg, ref addr) => write!(f, "dword [{}:{}]", seg, addr),
            Parameter::None => Ok(()),
        }
    }
}

impl Parameter {
    /// register operand of the register's own width
    pub fn reg(r: R) -> Parameter {
        match r.width() {
            Width::Byte => Parameter::Reg8(r),
            Width::Word if r.is_sreg() => Parameter::SReg16(r),
            Width::Word => Parameter::Reg16(r),
            Width::Dword => Parameter::Reg32(r),
        }
    }

    /// memory operand of `width`
    pub fn ptr(width: Width, seg: Segment, addr: Address) -> Parameter {
        match width {
            Width::Byte => Parameter::Ptr8(seg, addr),
            Width::Word => Parameter::Ptr16(seg, addr),
            Width::Dword => Parameter::Ptr32(seg, addr),
        }
    }

    /// immediate of `width`
    pub fn imm(width: Width, v: u32) -> Parameter {
        match width {
            Width::Byte => Parameter::Imm8(v as u8),
            Width::Word => Parameter::Imm16(v as u16),
            Width::Dword => Parameter::Imm32(v),
        }
    }

    pub fn is_ptr(&self) -> bool {
        match *self {
            Parameter::Ptr8(_, _) | Parameter::Ptr16(_, _) | Parameter::Ptr32(_, _) => true,
            _ => false,
        }
    }

    /// the memory location of a pointer parameter
    pub fn memory(&self) -> Option<(Segment, Address)> {
        match *self {
            Parameter::Ptr8(seg, addr) | Parameter::Ptr16(seg, addr) | Parameter::Ptr32(seg, addr) => {
                Some((seg, addr))
            }
            _ => None,
        }
    }

    /// operand width, None for parameters without an inherent size
    pub fn width(&self) -> Option<Width> {
        match *self {
            Parameter::Reg8(_) | Parameter::Imm8(_) | Parameter::Ptr8(_, _) => Some(Width::Byte),
            Parameter::Reg16(_) | Parameter::SReg16(_) | Parameter::Imm16(_) | Parameter::Ptr16(_, _) => {
                Some(Width::Word)
            }
            Parameter::Reg32(_) | Parameter::CReg(_) | Parameter::DReg(_) | Parameter::Imm32(_)
            | Parameter::Ptr32(_, _) => Some(Width::Dword),
            _ => None,
        }
    }
}

/// Instruction encoding layout for Scale/Index/Base byte
#[derive(Debug)]
pub struct SIB {
    /// High 2 bits
    pub scale: u8,
    /// Mid 3 bits
    pub index: u8,
    /// Low 3 bits
    pub base: u8,
}

impl SIB {
    pub fn from_u8(b: u8) -> Self {
        SIB { scale: b >> 6, index: (b >> 3) & 7, base: b & 7 }
    }
}

/// Instruction encoding layout for Mod/Reg/RM byte
#[derive(Debug)]
pub struct ModRegRm {
    /// "mod" is correct name, but is reserved keyword
    /// High 2 bits
    pub md: u8,

    /// mid 3 bits
    pub reg: u8,

    /// low 3 bits
    pub rm: u8,
}

impl ModRegRm {
    pub fn from_u8(b: u8) -> Self {
        ModRegRm { md: b >> 6, reg: (b >> 3) & 7, rm: b & 7 }
    }

    pub fn u8(&self) -> u8 {
        (self.md << 6) | (self.reg << 3) | self.rm
    }
}
