use std::fmt;

use crate::cpu::{AluOp, Flags, ShiftOp};
use crate::string::hex_bytes;

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Add, Or, Adc, Sbb, And, Sub, Xor, Cmp
    Alu(AluOp),

    /// rotates and shifts
    Shift(ShiftOp),

    /// ASCII Adjust After Addition
    Aaa,

    /// ASCII Adjust AX Before Division
    Aad,

    /// ASCII Adjust AX After Multiply
    Aam,

    /// ASCII Adjust AL After Subtraction
    Aas,

    /// Adjust RPL Field of Segment Selector
    Arpl,

    /// Check Array Index Against Bounds
    Bound,

    /// Bit Scan Forward
    Bsf,

    /// Bit Scan Reverse
    Bsr,

    /// Bit Test
    Bt,
    Btc,
    Btr,
    Bts,

    CallNear,
    CallFar,

    /// Convert Byte to Word (CBW), Word to Dword (CWDE)
    Cbw,

    /// Convert Word to Doubleword (CWD), Dword to Qword (CDQ)
    Cwd,

    Clc,
    Cld,
    Cli,

    /// Clear Task-Switched Flag in CR0
    Clts,

    Cmc,
    Cmps,

    /// Decimal Adjust AL after Addition
    Daa,

    /// Decimal Adjust AL after Subtraction
    Das,

    Dec,
    Div,

    /// Make Stack Frame for Procedure Parameters
    Enter,

    /// coprocessor escape (0xD8-0xDF)
    Esc,

    Hlt,
    Idiv,

    /// one operand signed multiply, to AX / DX:AX / EDX:EAX
    Imul,

    /// two and three operand signed multiply
    ImulTrunc,

    In,
    Inc,
    Ins,
    Int,
    Int3,
    Into,
    Iret,
    Jcc(Cond),
    Jcxz,
    JmpNear,
    JmpFar,
    Lahf,
    Lds,
    Lea,
    Leave,
    Les,
    Lfs,
    Lgs,
    Lss,

    /// Load Global Descriptor Table Register
    Lgdt,

    /// Load Interrupt Descriptor Table Register
    Lidt,

    /// Load Local Descriptor Table Register
    Lldt,

    /// Load Machine Status Word
    Lmsw,

    Lods,
    Loop,
    Loope,
    Loopne,

    /// Load Task Register
    Ltr,

    Mov,
    Movs,
    Movsx,
    Movzx,
    Mul,
    Neg,
    Nop,
    Not,
    Out,
    Outs,
    Pop,
    Popa,
    Popf,
    Push,
    Pusha,
    Pushf,
    Retf,
    Retn,
    Sahf,

    /// Set AL from Carry Flag (undocumented)
    Salc,

    Scas,
    Setcc(Cond),
    Sgdt,
    Shld,
    Shrd,
    Sidt,
    Sldt,
    Smsw,
    Stc,
    Std,
    Sti,
    Stos,
    Str,
    Test,
    Wait,
    Xchg,
    Xlat,

    /// Invalid encoding
    Invalid(Vec<u8>, Invalid),
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Op::Alu(op) => write!(f, "{:?}", op),
            Op::Shift(op) => write!(f, "{:?}", op),
            Op::Jcc(c) => write!(f, "J{}", c.as_str()),
            Op::Setcc(c) => write!(f, "Set{}", c.as_str()),
            Op::Invalid(bytes, _) => write!(f, "INVALID {}", hex_bytes(bytes)),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl Op {
    pub fn is_valid(&self) -> bool {
        match *self {
            Op::Invalid(_, _) => false,
            _ => true,
        }
    }

    /// string instructions honor REP prefixes
    pub fn is_string(&self) -> bool {
        match *self {
            Op::Movs | Op::Cmps | Op::Scas | Op::Lods | Op::Stos | Op::Ins | Op::Outs => true,
            _ => false,
        }
    }

    /// CMPS and SCAS terminate a repeat on the ZF condition
    pub fn is_string_compare(&self) -> bool {
        match *self {
            Op::Cmps | Op::Scas => true,
            _ => false,
        }
    }
}

/// the class of instruction decode error that occured
#[derive(Clone, Debug, PartialEq)]
pub enum Invalid {
    /// a reg value of a group opcode was undefined
    Reg(u8),

    /// undefined opcode for the configured cpu
    Op,

    /// register operand where only memory is allowed
    RegisterOperand,

    /// the instruction exceeds 15 bytes
    TooLong,
}

/// condition codes of Jcc and SETcc, in encoding order
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cond {
    O, NO, B, AE, E, NE, BE, A, S, NS, P, NP, L, GE, LE, G,
}

impl Cond {
    pub fn from_index(n: u8) -> Cond {
        match n & 0xF {
            0x0 => Cond::O,
            0x1 => Cond::NO,
            0x2 => Cond::B,
            0x3 => Cond::AE,
            0x4 => Cond::E,
            0x5 => Cond::NE,
            0x6 => Cond::BE,
            0x7 => Cond::A,
            0x8 => Cond::S,
            0x9 => Cond::NS,
            0xA => Cond::P,
            0xB => Cond::NP,
            0xC => Cond::L,
            0xD => Cond::GE,
            0xE => Cond::LE,
            _ => Cond::G,
        }
    }

    pub fn test(self, f: &Flags) -> bool {
        match self {
            Cond::O => f.overflow,
            Cond::NO => !f.overflow,
            Cond::B => f.carry,
            Cond::AE => !f.carry,
            Cond::E => f.zero,
            Cond::NE => !f.zero,
            Cond::BE => f.carry || f.zero,
            Cond::A => !f.carry && !f.zero,
            Cond::S => f.sign,
            Cond::NS => !f.sign,
            Cond::P => f.parity,
            Cond::NP => !f.parity,
            Cond::L => f.sign != f.overflow,
            Cond::GE => f.sign == f.overflow,
            Cond::LE => f.zero || f.sign != f.overflow,
            Cond::G => !f.zero && f.sign == f.overflow,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Cond::O => "o",
            Cond::NO => "no",
            Cond::B => "c",
            Cond::AE => "nc",
            Cond::E => "z",
            Cond::NE => "nz",
            Cond::BE => "na",
            Cond::A => "a",
            Cond::S => "s",
            Cond::NS => "ns",
            Cond::P => "pe",
            Cond::NP => "po",
            Cond::L => "l",
            Cond::GE => "nl",
            Cond::LE => "ng",
            Cond::G => "g",
        }
    }
}
