use std::fmt;

use crate::cpu::Segment;
use crate::cpu::{Op, Width};
use crate::cpu::{Parameter, ParameterSet};
use crate::string::{hex_bytes, right_pad};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddressSize {
    _16bit,
    _32bit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub command: Op,
    pub params: ParameterSet,
    pub length: u8,
    // op prefixes
    pub segment_prefix: Segment,    // segment prefix opcode
    pub repeat: RepeatMode,         // REPcc prefix
    pub lock: bool,                 // LOCK prefix
    pub op_size: Width,             // operand width, 0x66 prefix toggles word/dword
    pub address_size: AddressSize,  // 0x67 prefix
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let instr = self.describe_instruction();
        if self.segment_prefix == Segment::Default || self.params.dst.is_ptr() || self.params.src.is_ptr() {
            write!(f, "{}", instr)
        } else {
            write!(f, "{} {}", self.segment_prefix.as_str(), instr)
        }
    }
}

impl Instruction {
    pub fn new(op: Op) -> Self {
        Instruction::new3(op, Parameter::None, Parameter::None, Parameter::None)
    }

    pub fn new1(op: Op, dst: Parameter) -> Self {
        Instruction::new3(op, dst, Parameter::None, Parameter::None)
    }

    pub fn new2(op: Op, dst: Parameter, src: Parameter) -> Self {
        Instruction::new3(op, dst, src, Parameter::None)
    }

    pub fn new3(op: Op, dst: Parameter, src: Parameter, src2: Parameter) -> Self {
        let op_size = dst.width().unwrap_or(Width::Word);
        Instruction {
            command: op,
            segment_prefix: Segment::Default,
            params: ParameterSet { dst, src, src2 },
            lock: false,
            repeat: RepeatMode::None,
            op_size,
            address_size: AddressSize::_16bit,
            length: 0,
        }
    }

    /// overrides the operand width derived from the destination
    pub fn with_size(mut self, op_size: Width) -> Self {
        self.op_size = op_size;
        self
    }

    fn mnemonic(&self) -> String {
        let suffix = match self.op_size {
            Width::Byte => "b",
            Width::Word => "w",
            Width::Dword => "d",
        };
        match self.command {
            Op::Movs | Op::Cmps | Op::Scas | Op::Lods | Op::Stos | Op::Ins | Op::Outs => {
                format!("{}{}", self.command, suffix)
            }
            Op::Pusha | Op::Popa | Op::Pushf | Op::Popf | Op::Iret if self.op_size == Width::Dword => {
                format!("{}d", self.command)
            }
            _ => format!("{}", self.command),
        }
    }

    fn describe_instruction(&self) -> String {
        let op_space = 9;
        let mut prefix = self.repeat.as_str().to_owned();
        if prefix != "" {
            prefix = right_pad(&prefix, op_space);
        }

        match self.params.dst {
            Parameter::None => format!("{}{}", prefix, self.mnemonic()),
            _ => {
                let cmd = right_pad(&format!("{}{}", prefix, self.mnemonic()), op_space);

                match self.params.src2 {
                    Parameter::None => match self.params.src {
                        Parameter::None => format!("{}{}", cmd, self.params.dst),
                        _ => format!("{}{}, {}", cmd, self.params.dst, self.params.src),
                    },
                    _ => format!("{}{}, {}, {}", cmd, self.params.dst, self.params.src, self.params.src2),
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct InstructionInfo {
    pub segment: u16,
    pub offset: u32,
    pub bytes: Vec<u8>,
    pub instruction: Instruction,
}

impl fmt::Display for InstructionInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{:04X}:{:04X}] {} {}",
            self.segment,
            self.offset,
            right_pad(&hex_bytes(&self.bytes), 16),
            self.instruction,
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RepeatMode {
    None,
    Rep,
    Repe,  // alias repz
    Repne, // alias repnz
}

impl RepeatMode {
    fn as_str(self) -> &'static str {
        match self {
            RepeatMode::None => "",
            RepeatMode::Rep => "Rep",
            RepeatMode::Repe => "Repe",
            RepeatMode::Repne => "Repne",
        }
    }
}
