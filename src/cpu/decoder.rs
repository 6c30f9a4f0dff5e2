use crate::cpu::{
    AMode, Address, AddressSize, AluOp, Cond, CpuFeatures, Instruction, InstructionInfo, Invalid,
    ModRegRm, Op, Parameter, RepeatMode, Segment, ShiftOp, Width, R, SIB,
};
use crate::memory::MMU;

#[cfg(test)]
#[path = "./decoder_test.rs"]
mod decoder_test;

/// longest legal instruction, prefixes included
pub const MAX_INSTRUCTION_LENGTH: u8 = 15;

/// prefix state carried into the opcode decode
#[derive(Copy, Clone, Debug)]
struct Prefixes {
    segment: Segment,
    /// 0xF2, 0xF3 or 0
    repeat: u8,
    lock: bool,
    op32: bool,
    addr32: bool,
}

#[derive(Clone)]
pub struct Decoder {
    features: CpuFeatures,

    /// linear base of the code segment being decoded
    base: u32,

    /// offset of the next byte to read
    offset: u32,

    /// 32-bit code segment (wraps offsets at 4GB instead of 64KB)
    code32: bool,

    bytes: [u8; 16],
    length: u8,
}

/// maps the 80186 opcodes to what the 8086 executes for them
fn alias_8086(b: u8) -> u8 {
    match b {
        0x60..=0x6F => b + 0x10,
        0xC0 | 0xC1 | 0xC8 | 0xC9 => b + 2,
        _ => b,
    }
}

impl Decoder {
    pub fn new(features: CpuFeatures) -> Self {
        Decoder {
            features,
            base: 0,
            offset: 0,
            code32: false,
            bytes: [0; 16],
            length: 0,
        }
    }

    pub fn features(&self) -> CpuFeatures {
        self.features
    }

    /// decodes the instruction at `offset` of the code segment based at linear address `base`
    pub fn decode(&mut self, mmu: &mut MMU, base: u32, offset: u32, code32: bool) -> Instruction {
        self.base = base;
        self.offset = offset;
        self.code32 = code32;
        self.length = 0;

        let wide = self.features.wide_registers;
        let mut p = Prefixes {
            segment: Segment::Default,
            repeat: 0,
            lock: false,
            op32: code32,
            addr32: code32,
        };

        let b = loop {
            let b = self.read_u8(mmu);
            if self.length > MAX_INSTRUCTION_LENGTH {
                return Instruction::new(self.invalid(Invalid::TooLong));
            }
            match b {
                0x26 | 0x2E | 0x36 | 0x3E => p.segment = Segment::from_prefix(b).unwrap_or(p.segment),
                0x64 | 0x65 if wide => p.segment = Segment::from_prefix(b).unwrap_or(p.segment),
                0x66 if wide => p.op32 = !code32,
                0x67 if wide => p.addr32 = !code32,
                0xF0 => p.lock = true,
                0xF1 if !self.features.extended_opcodes => p.lock = true,
                0xF2 | 0xF3 => p.repeat = b,
                _ => break b,
            }
        };

        let mut op = self.decode_opcode(mmu, b, &p);
        if self.length > MAX_INSTRUCTION_LENGTH {
            op = Instruction::new(self.invalid(Invalid::TooLong));
        }
        op.length = self.length;
        op.segment_prefix = p.segment;
        op.lock = p.lock;
        op.address_size = if p.addr32 { AddressSize::_32bit } else { AddressSize::_16bit };
        op.repeat = match p.repeat {
            0xF3 if op.command.is_string_compare() => RepeatMode::Repe,
            0xF2 if op.command.is_string_compare() => RepeatMode::Repne,
            0xF2 | 0xF3 if op.command.is_string() => RepeatMode::Rep,
            _ => RepeatMode::None,
        };
        op
    }

    /// decodes a real mode instruction at `segment:offset`
    pub fn get_instruction_info(&mut self, mmu: &mut MMU, segment: u16, offset: u32) -> InstructionInfo {
        let instruction = self.decode(mmu, u32::from(segment) << 4, offset, false);
        let len = (instruction.length as usize).min(self.bytes.len());
        InstructionInfo {
            segment,
            offset,
            bytes: self.bytes[..len].to_vec(),
            instruction,
        }
    }

    pub fn decode_to_block(&mut self, mmu: &mut MMU, segment: u16, offset: u32, n: usize) -> Vec<InstructionInfo> {
        let mut ops: Vec<InstructionInfo> = Vec::new();
        let mut offset = offset;
        for _ in 0..n {
            let info = self.get_instruction_info(mmu, segment, offset);
            offset = (offset + u32::from(info.instruction.length)) & 0xFFFF;
            ops.push(info);
        }
        ops
    }

    /// decodes `n` instructions starting at `segment:offset`, one per line
    pub fn disassemble_block_to_str(&mut self, mmu: &mut MMU, segment: u16, offset: u32, n: usize) -> String {
        let ops = self.decode_to_block(mmu, segment, offset, n);
        let lines: Vec<String> = ops.iter().map(|op| op.to_string()).collect();
        lines.join("\n")
    }

    fn invalid(&self, kind: Invalid) -> Op {
        let len = (self.length as usize).min(self.bytes.len());
        Op::Invalid(self.bytes[..len].to_vec(), kind)
    }

    fn invalid_instr(&self, kind: Invalid) -> Instruction {
        Instruction::new(self.invalid(kind))
    }

    fn decode_opcode(&mut self, mmu: &mut MMU, b: u8, p: &Prefixes) -> Instruction {
        let ext = self.features.extended_opcodes;
        let wide = self.features.wide_registers;
        let b = if ext { b } else { alias_8086(b) };
        let opw = self.opw(p);

        match b {
            0x00..=0x3F if b & 7 < 6 => {
                let op = Op::Alu(AluOp::from_index(b >> 3));
                let w = self.width_of(b, p);
                match b & 7 {
                    0 | 1 => {
                        let x = self.read_mod_reg_rm(mmu);
                        let dst = self.rm(mmu, &x, w, p);
                        Instruction::new2(op, dst, Parameter::reg(R::gpr(x.reg, w)))
                    }
                    2 | 3 => {
                        let x = self.read_mod_reg_rm(mmu);
                        let src = self.rm(mmu, &x, w, p);
                        Instruction::new2(op, Parameter::reg(R::gpr(x.reg, w)), src)
                    }
                    _ => {
                        let imm = self.read_imm(mmu, w);
                        Instruction::new2(op, Parameter::reg(R::accumulator(w)), Parameter::imm(w, imm))
                    }
                }
            }
            0x06 => Instruction::new1(Op::Push, Parameter::SReg16(R::ES)).with_size(opw),
            0x07 => Instruction::new1(Op::Pop, Parameter::SReg16(R::ES)).with_size(opw),
            0x0E => Instruction::new1(Op::Push, Parameter::SReg16(R::CS)).with_size(opw),
            0x0F if wide => self.decode_0f(mmu, p),
            0x0F if !ext => Instruction::new1(Op::Pop, Parameter::SReg16(R::CS)),
            0x16 => Instruction::new1(Op::Push, Parameter::SReg16(R::SS)).with_size(opw),
            0x17 => Instruction::new1(Op::Pop, Parameter::SReg16(R::SS)).with_size(opw),
            0x1E => Instruction::new1(Op::Push, Parameter::SReg16(R::DS)).with_size(opw),
            0x1F => Instruction::new1(Op::Pop, Parameter::SReg16(R::DS)).with_size(opw),
            0x27 => Instruction::new(Op::Daa),
            0x2F => Instruction::new(Op::Das),
            0x37 => Instruction::new(Op::Aaa),
            0x3F => Instruction::new(Op::Aas),
            0x40..=0x47 => Instruction::new1(Op::Inc, Parameter::reg(R::gpr(b, opw))),
            0x48..=0x4F => Instruction::new1(Op::Dec, Parameter::reg(R::gpr(b, opw))),
            0x50..=0x57 => Instruction::new1(Op::Push, Parameter::reg(R::gpr(b, opw))),
            0x58..=0x5F => Instruction::new1(Op::Pop, Parameter::reg(R::gpr(b, opw))),
            0x60 => Instruction::new(Op::Pusha).with_size(opw),
            0x61 => Instruction::new(Op::Popa).with_size(opw),
            0x62 => {
                let x = self.read_mod_reg_rm(mmu);
                match self.mem(mmu, &x, opw, p) {
                    Some(m) => Instruction::new2(Op::Bound, Parameter::reg(R::gpr(x.reg, opw)), m),
                    None => self.invalid_instr(Invalid::RegisterOperand),
                }
            }
            0x63 if wide => {
                let x = self.read_mod_reg_rm(mmu);
                let dst = self.rm(mmu, &x, Width::Word, p);
                Instruction::new2(Op::Arpl, dst, Parameter::Reg16(R::r16(x.reg)))
            }
            0x68 => {
                let imm = self.read_imm(mmu, opw);
                Instruction::new1(Op::Push, Parameter::imm(opw, imm))
            }
            0x69 | 0x6B => {
                let x = self.read_mod_reg_rm(mmu);
                let src = self.rm(mmu, &x, opw, p);
                let imm = if b == 0x69 {
                    let v = self.read_imm(mmu, opw);
                    Parameter::imm(opw, v)
                } else {
                    Parameter::ImmS8(self.read_u8(mmu) as i8)
                };
                Instruction::new3(Op::ImulTrunc, Parameter::reg(R::gpr(x.reg, opw)), src, imm)
            }
            0x6A => Instruction::new1(Op::Push, Parameter::ImmS8(self.read_u8(mmu) as i8)).with_size(opw),
            0x6C | 0x6D => Instruction::new(Op::Ins).with_size(self.width_of(b, p)),
            0x6E | 0x6F => Instruction::new(Op::Outs).with_size(self.width_of(b, p)),
            0x70..=0x7F => {
                let target = self.rel(mmu, Width::Byte, p);
                Instruction::new1(Op::Jcc(Cond::from_index(b)), target)
            }
            0x80..=0x83 => {
                let w = self.width_of(b, p);
                let x = self.read_mod_reg_rm(mmu);
                let dst = self.rm(mmu, &x, w, p);
                let src = match b {
                    0x81 => {
                        let v = self.read_imm(mmu, w);
                        Parameter::imm(w, v)
                    }
                    0x83 => Parameter::ImmS8(self.read_u8(mmu) as i8),
                    _ => Parameter::Imm8(self.read_u8(mmu)),
                };
                Instruction::new2(Op::Alu(AluOp::from_index(x.reg)), dst, src).with_size(w)
            }
            0x84..=0x8B => {
                let w = self.width_of(b, p);
                let x = self.read_mod_reg_rm(mmu);
                let rm = self.rm(mmu, &x, w, p);
                let reg = Parameter::reg(R::gpr(x.reg, w));
                match b {
                    0x84 | 0x85 => Instruction::new2(Op::Test, rm, reg),
                    0x86 | 0x87 => Instruction::new2(Op::Xchg, rm, reg),
                    0x88 | 0x89 => Instruction::new2(Op::Mov, rm, reg),
                    _ => Instruction::new2(Op::Mov, reg, rm),
                }
            }
            0x8C | 0x8E => {
                let x = self.read_mod_reg_rm(mmu);
                let sreg = if wide { R::sr(x.reg) } else { R::sr(x.reg & 3) };
                let rm = self.rm(mmu, &x, Width::Word, p);
                match sreg {
                    Some(R::CS) if b == 0x8E && wide => self.invalid_instr(Invalid::Reg(x.reg)),
                    Some(sr) if b == 0x8C => Instruction::new2(Op::Mov, rm, Parameter::SReg16(sr)),
                    Some(sr) => Instruction::new2(Op::Mov, Parameter::SReg16(sr), rm),
                    None => self.invalid_instr(Invalid::Reg(x.reg)),
                }
            }
            0x8D => {
                let x = self.read_mod_reg_rm(mmu);
                match self.mem(mmu, &x, opw, p) {
                    Some(m) => Instruction::new2(Op::Lea, Parameter::reg(R::gpr(x.reg, opw)), m),
                    None => self.invalid_instr(Invalid::RegisterOperand),
                }
            }
            0x8F => {
                let x = self.read_mod_reg_rm(mmu);
                if x.reg != 0 {
                    return self.invalid_instr(Invalid::Reg(x.reg));
                }
                let dst = self.rm(mmu, &x, opw, p);
                Instruction::new1(Op::Pop, dst)
            }
            0x90 => Instruction::new(Op::Nop),
            0x91..=0x97 => {
                Instruction::new2(Op::Xchg, Parameter::reg(R::accumulator(opw)), Parameter::reg(R::gpr(b, opw)))
            }
            0x98 => Instruction::new(Op::Cbw).with_size(opw),
            0x99 => Instruction::new(Op::Cwd).with_size(opw),
            0x9A => {
                let offset = self.read_imm(mmu, opw);
                let segment = self.read_u16(mmu);
                Instruction::new1(Op::CallFar, Parameter::Ptr16Imm(segment, offset)).with_size(opw)
            }
            0x9B => Instruction::new(Op::Wait),
            0x9C => Instruction::new(Op::Pushf).with_size(opw),
            0x9D => Instruction::new(Op::Popf).with_size(opw),
            0x9E => Instruction::new(Op::Sahf),
            0x9F => Instruction::new(Op::Lahf),
            0xA0..=0xA3 => {
                let w = self.width_of(b, p);
                let disp = if p.addr32 { self.read_u32(mmu) } else { u32::from(self.read_u16(mmu)) };
                let seg = if p.segment == Segment::Default { Segment::DS } else { p.segment };
                let mem = Parameter::ptr(w, seg, Address::Direct(disp));
                let acc = Parameter::reg(R::accumulator(w));
                if b < 0xA2 {
                    Instruction::new2(Op::Mov, acc, mem)
                } else {
                    Instruction::new2(Op::Mov, mem, acc)
                }
            }
            0xA4 | 0xA5 => Instruction::new(Op::Movs).with_size(self.width_of(b, p)),
            0xA6 | 0xA7 => Instruction::new(Op::Cmps).with_size(self.width_of(b, p)),
            0xA8 | 0xA9 => {
                let w = self.width_of(b, p);
                let imm = self.read_imm(mmu, w);
                Instruction::new2(Op::Test, Parameter::reg(R::accumulator(w)), Parameter::imm(w, imm))
            }
            0xAA | 0xAB => Instruction::new(Op::Stos).with_size(self.width_of(b, p)),
            0xAC | 0xAD => Instruction::new(Op::Lods).with_size(self.width_of(b, p)),
            0xAE | 0xAF => Instruction::new(Op::Scas).with_size(self.width_of(b, p)),
            0xB0..=0xB7 => {
                let imm = self.read_u8(mmu);
                Instruction::new2(Op::Mov, Parameter::Reg8(R::r8(b)), Parameter::Imm8(imm))
            }
            0xB8..=0xBF => {
                let imm = self.read_imm(mmu, opw);
                Instruction::new2(Op::Mov, Parameter::reg(R::gpr(b, opw)), Parameter::imm(opw, imm))
            }
            0xC0 | 0xC1 | 0xD0..=0xD3 => {
                let w = self.width_of(b, p);
                let x = self.read_mod_reg_rm(mmu);
                let dst = self.rm(mmu, &x, w, p);
                let count = match b {
                    0xC0 | 0xC1 => Parameter::Imm8(self.read_u8(mmu)),
                    0xD0 | 0xD1 => Parameter::Imm8(1),
                    _ => Parameter::Reg8(R::CL),
                };
                Instruction::new2(Op::Shift(ShiftOp::from_index(x.reg)), dst, count)
            }
            0xC2 => Instruction::new1(Op::Retn, Parameter::Imm16(self.read_u16(mmu))).with_size(opw),
            0xC3 => Instruction::new(Op::Retn).with_size(opw),
            0xC4 | 0xC5 => {
                let x = self.read_mod_reg_rm(mmu);
                let op = if b == 0xC4 { Op::Les } else { Op::Lds };
                match self.mem(mmu, &x, opw, p) {
                    Some(m) => Instruction::new2(op, Parameter::reg(R::gpr(x.reg, opw)), m),
                    None => self.invalid_instr(Invalid::RegisterOperand),
                }
            }
            0xC6 | 0xC7 => {
                let w = self.width_of(b, p);
                let x = self.read_mod_reg_rm(mmu);
                if x.reg != 0 {
                    return self.invalid_instr(Invalid::Reg(x.reg));
                }
                let dst = self.rm(mmu, &x, w, p);
                let imm = self.read_imm(mmu, w);
                Instruction::new2(Op::Mov, dst, Parameter::imm(w, imm))
            }
            0xC8 => {
                let size = self.read_u16(mmu);
                let level = self.read_u8(mmu);
                Instruction::new2(Op::Enter, Parameter::Imm16(size), Parameter::Imm8(level)).with_size(opw)
            }
            0xC9 => Instruction::new(Op::Leave).with_size(opw),
            0xCA => Instruction::new1(Op::Retf, Parameter::Imm16(self.read_u16(mmu))).with_size(opw),
            0xCB => Instruction::new(Op::Retf).with_size(opw),
            0xCC => Instruction::new(Op::Int3),
            0xCD => Instruction::new1(Op::Int, Parameter::Imm8(self.read_u8(mmu))),
            0xCE => Instruction::new(Op::Into),
            0xCF => Instruction::new(Op::Iret).with_size(opw),
            0xD4 => Instruction::new1(Op::Aam, Parameter::Imm8(self.read_u8(mmu))),
            0xD5 => Instruction::new1(Op::Aad, Parameter::Imm8(self.read_u8(mmu))),
            0xD6 => Instruction::new(Op::Salc),
            0xD7 => Instruction::new(Op::Xlat),
            0xD8..=0xDF => {
                let x = self.read_mod_reg_rm(mmu);
                let operand = self.rm(mmu, &x, Width::Word, p);
                Instruction::new2(Op::Esc, Parameter::Imm8(((b & 7) << 3) | x.reg), operand)
            }
            0xE0 => Instruction::new1(Op::Loopne, self.rel(mmu, Width::Byte, p)),
            0xE1 => Instruction::new1(Op::Loope, self.rel(mmu, Width::Byte, p)),
            0xE2 => Instruction::new1(Op::Loop, self.rel(mmu, Width::Byte, p)),
            0xE3 => Instruction::new1(Op::Jcxz, self.rel(mmu, Width::Byte, p)),
            0xE4 | 0xE5 => {
                let w = self.width_of(b, p);
                let port = self.read_u8(mmu);
                Instruction::new2(Op::In, Parameter::reg(R::accumulator(w)), Parameter::Imm8(port))
            }
            0xE6 | 0xE7 => {
                let w = self.width_of(b, p);
                let port = self.read_u8(mmu);
                Instruction::new2(Op::Out, Parameter::Imm8(port), Parameter::reg(R::accumulator(w))).with_size(w)
            }
            0xE8 => Instruction::new1(Op::CallNear, self.rel(mmu, opw, p)),
            0xE9 => Instruction::new1(Op::JmpNear, self.rel(mmu, opw, p)),
            0xEA => {
                let offset = self.read_imm(mmu, opw);
                let segment = self.read_u16(mmu);
                Instruction::new1(Op::JmpFar, Parameter::Ptr16Imm(segment, offset)).with_size(opw)
            }
            0xEB => Instruction::new1(Op::JmpNear, self.rel(mmu, Width::Byte, p)),
            0xEC | 0xED => {
                let w = self.width_of(b, p);
                Instruction::new2(Op::In, Parameter::reg(R::accumulator(w)), Parameter::Reg16(R::DX))
            }
            0xEE | 0xEF => {
                let w = self.width_of(b, p);
                Instruction::new2(Op::Out, Parameter::Reg16(R::DX), Parameter::reg(R::accumulator(w))).with_size(w)
            }
            0xF4 => Instruction::new(Op::Hlt),
            0xF5 => Instruction::new(Op::Cmc),
            0xF6 | 0xF7 => {
                let w = self.width_of(b, p);
                let x = self.read_mod_reg_rm(mmu);
                let dst = self.rm(mmu, &x, w, p);
                match x.reg {
                    0 | 1 => {
                        let imm = self.read_imm(mmu, w);
                        Instruction::new2(Op::Test, dst, Parameter::imm(w, imm))
                    }
                    2 => Instruction::new1(Op::Not, dst),
                    3 => Instruction::new1(Op::Neg, dst),
                    4 => Instruction::new1(Op::Mul, dst),
                    5 => Instruction::new1(Op::Imul, dst),
                    6 => Instruction::new1(Op::Div, dst),
                    _ => Instruction::new1(Op::Idiv, dst),
                }
            }
            0xF8 => Instruction::new(Op::Clc),
            0xF9 => Instruction::new(Op::Stc),
            0xFA => Instruction::new(Op::Cli),
            0xFB => Instruction::new(Op::Sti),
            0xFC => Instruction::new(Op::Cld),
            0xFD => Instruction::new(Op::Std),
            0xFE => {
                let x = self.read_mod_reg_rm(mmu);
                let dst = self.rm(mmu, &x, Width::Byte, p);
                match x.reg {
                    0 => Instruction::new1(Op::Inc, dst),
                    1 => Instruction::new1(Op::Dec, dst),
                    _ => self.invalid_instr(Invalid::Reg(x.reg)),
                }
            }
            0xFF => {
                let x = self.read_mod_reg_rm(mmu);
                match x.reg {
                    0 | 1 | 2 | 4 | 6 => {
                        let dst = self.rm(mmu, &x, opw, p);
                        let op = match x.reg {
                            0 => Op::Inc,
                            1 => Op::Dec,
                            2 => Op::CallNear,
                            4 => Op::JmpNear,
                            _ => Op::Push,
                        };
                        Instruction::new1(op, dst)
                    }
                    3 | 5 => {
                        let op = if x.reg == 3 { Op::CallFar } else { Op::JmpFar };
                        match self.mem(mmu, &x, opw, p) {
                            Some(m) => Instruction::new1(op, m),
                            None => self.invalid_instr(Invalid::RegisterOperand),
                        }
                    }
                    _ => self.invalid_instr(Invalid::Reg(x.reg)),
                }
            }
            _ => self.invalid_instr(Invalid::Op),
        }
    }

    /// the 0x0F opcode page of the 80386
    fn decode_0f(&mut self, mmu: &mut MMU, p: &Prefixes) -> Instruction {
        let b = self.read_u8(mmu);
        let opw = self.opw(p);
        match b {
            0x00 => {
                let x = self.read_mod_reg_rm(mmu);
                let op = match x.reg {
                    0 => Op::Sldt,
                    1 => Op::Str,
                    2 => Op::Lldt,
                    3 => Op::Ltr,
                    _ => return self.invalid_instr(Invalid::Reg(x.reg)),
                };
                let dst = self.rm(mmu, &x, Width::Word, p);
                Instruction::new1(op, dst)
            }
            0x01 => {
                let x = self.read_mod_reg_rm(mmu);
                match x.reg {
                    0..=3 => {
                        let op = match x.reg {
                            0 => Op::Sgdt,
                            1 => Op::Sidt,
                            2 => Op::Lgdt,
                            _ => Op::Lidt,
                        };
                        match self.mem(mmu, &x, Width::Word, p) {
                            Some(m) => Instruction::new1(op, m).with_size(opw),
                            None => self.invalid_instr(Invalid::RegisterOperand),
                        }
                    }
                    4 => {
                        let dst = self.rm(mmu, &x, Width::Word, p);
                        Instruction::new1(Op::Smsw, dst)
                    }
                    6 => {
                        let src = self.rm(mmu, &x, Width::Word, p);
                        Instruction::new1(Op::Lmsw, src)
                    }
                    _ => self.invalid_instr(Invalid::Reg(x.reg)),
                }
            }
            0x06 => Instruction::new(Op::Clts),
            0x20..=0x23 => {
                let x = self.read_mod_reg_rm(mmu);
                let reg = Parameter::Reg32(R::r32(x.rm));
                let special = if b & 1 == 0 {
                    match x.reg {
                        0 | 2 | 3 => Parameter::CReg(x.reg),
                        _ => return self.invalid_instr(Invalid::Reg(x.reg)),
                    }
                } else {
                    Parameter::DReg(x.reg)
                };
                if b < 0x22 {
                    Instruction::new2(Op::Mov, reg, special)
                } else {
                    Instruction::new2(Op::Mov, special, reg)
                }
            }
            0x80..=0x8F => {
                let target = self.rel(mmu, opw, p);
                Instruction::new1(Op::Jcc(Cond::from_index(b)), target)
            }
            0x90..=0x9F => {
                let x = self.read_mod_reg_rm(mmu);
                let dst = self.rm(mmu, &x, Width::Byte, p);
                Instruction::new1(Op::Setcc(Cond::from_index(b)), dst)
            }
            0xA0 => Instruction::new1(Op::Push, Parameter::SReg16(R::FS)).with_size(opw),
            0xA1 => Instruction::new1(Op::Pop, Parameter::SReg16(R::FS)).with_size(opw),
            0xA8 => Instruction::new1(Op::Push, Parameter::SReg16(R::GS)).with_size(opw),
            0xA9 => Instruction::new1(Op::Pop, Parameter::SReg16(R::GS)).with_size(opw),
            0xA3 | 0xAB | 0xB3 | 0xBB => {
                let x = self.read_mod_reg_rm(mmu);
                let dst = self.rm(mmu, &x, opw, p);
                let op = match b {
                    0xA3 => Op::Bt,
                    0xAB => Op::Bts,
                    0xB3 => Op::Btr,
                    _ => Op::Btc,
                };
                Instruction::new2(op, dst, Parameter::reg(R::gpr(x.reg, opw)))
            }
            0xA4 | 0xA5 | 0xAC | 0xAD => {
                let x = self.read_mod_reg_rm(mmu);
                let dst = self.rm(mmu, &x, opw, p);
                let count = if b & 1 == 0 {
                    Parameter::Imm8(self.read_u8(mmu))
                } else {
                    Parameter::Reg8(R::CL)
                };
                let op = if b < 0xAC { Op::Shld } else { Op::Shrd };
                Instruction::new3(op, dst, Parameter::reg(R::gpr(x.reg, opw)), count)
            }
            0xAF => {
                let x = self.read_mod_reg_rm(mmu);
                let src = self.rm(mmu, &x, opw, p);
                Instruction::new2(Op::ImulTrunc, Parameter::reg(R::gpr(x.reg, opw)), src)
            }
            0xB2 | 0xB4 | 0xB5 => {
                let x = self.read_mod_reg_rm(mmu);
                let op = match b {
                    0xB2 => Op::Lss,
                    0xB4 => Op::Lfs,
                    _ => Op::Lgs,
                };
                match self.mem(mmu, &x, opw, p) {
                    Some(m) => Instruction::new2(op, Parameter::reg(R::gpr(x.reg, opw)), m),
                    None => self.invalid_instr(Invalid::RegisterOperand),
                }
            }
            0xB6 | 0xB7 | 0xBE | 0xBF => {
                let x = self.read_mod_reg_rm(mmu);
                let src_width = if b & 1 == 0 { Width::Byte } else { Width::Word };
                let src = self.rm(mmu, &x, src_width, p);
                let op = if b < 0xBE { Op::Movzx } else { Op::Movsx };
                Instruction::new2(op, Parameter::reg(R::gpr(x.reg, opw)), src)
            }
            0xBA => {
                let x = self.read_mod_reg_rm(mmu);
                let op = match x.reg {
                    4 => Op::Bt,
                    5 => Op::Bts,
                    6 => Op::Btr,
                    7 => Op::Btc,
                    _ => return self.invalid_instr(Invalid::Reg(x.reg)),
                };
                let dst = self.rm(mmu, &x, opw, p);
                Instruction::new2(op, dst, Parameter::Imm8(self.read_u8(mmu)))
            }
            0xBC | 0xBD => {
                let x = self.read_mod_reg_rm(mmu);
                let src = self.rm(mmu, &x, opw, p);
                let op = if b == 0xBC { Op::Bsf } else { Op::Bsr };
                Instruction::new2(op, Parameter::reg(R::gpr(x.reg, opw)), src)
            }
            _ => self.invalid_instr(Invalid::Op),
        }
    }

    fn opw(&self, p: &Prefixes) -> Width {
        if p.op32 {
            Width::Dword
        } else {
            Width::Word
        }
    }

    /// bit 0 of most opcodes selects byte or full size operands
    fn width_of(&self, b: u8, p: &Prefixes) -> Width {
        if b & 1 == 0 {
            Width::Byte
        } else {
            self.opw(p)
        }
    }

    /// register or memory operand selected by the mod and rm fields
    fn rm(&mut self, mmu: &mut MMU, x: &ModRegRm, w: Width, p: &Prefixes) -> Parameter {
        if x.md == 3 {
            Parameter::reg(R::gpr(x.rm, w))
        } else {
            let (seg, addr) = self.address(mmu, x, p);
            Parameter::ptr(w, seg, addr)
        }
    }

    /// memory only operand, None for the register form
    fn mem(&mut self, mmu: &mut MMU, x: &ModRegRm, w: Width, p: &Prefixes) -> Option<Parameter> {
        if x.md == 3 {
            None
        } else {
            Some(self.rm(mmu, x, w, p))
        }
    }

    /// reads SIB and displacement bytes, and picks the segment
    fn address(&mut self, mmu: &mut MMU, x: &ModRegRm, p: &Prefixes) -> (Segment, Address) {
        let (default_seg, addr) = if p.addr32 {
            self.address32(mmu, x)
        } else {
            self.address16(mmu, x)
        };
        let seg = if p.segment == Segment::Default { default_seg } else { p.segment };
        (seg, addr)
    }

    fn address16(&mut self, mmu: &mut MMU, x: &ModRegRm) -> (Segment, Address) {
        if x.md == 0 && x.rm == 6 {
            return (Segment::DS, Address::Direct(u32::from(self.read_u16(mmu))));
        }
        let amode = AMode::from_rm(x.rm);
        let disp = match x.md {
            1 => i16::from(self.read_u8(mmu) as i8),
            2 => self.read_u16(mmu) as i16,
            _ => 0,
        };
        let seg = if amode.uses_bp() { Segment::SS } else { Segment::DS };
        (seg, Address::Amode(amode, disp))
    }

    fn address32(&mut self, mmu: &mut MMU, x: &ModRegRm) -> (Segment, Address) {
        let (base, index, scale) = if x.rm == 4 {
            let sib = SIB::from_u8(self.read_u8(mmu));
            let index = if sib.index == 4 { None } else { Some(R::r32(sib.index)) };
            let base = if sib.base == 5 && x.md == 0 { None } else { Some(R::r32(sib.base)) };
            (base, index, 1 << sib.scale)
        } else if x.rm == 5 && x.md == 0 {
            (None, None, 1)
        } else {
            (Some(R::r32(x.rm)), None, 1)
        };

        let disp = match x.md {
            1 => i32::from(self.read_u8(mmu) as i8),
            2 => self.read_u32(mmu) as i32,
            _ if base.is_none() => self.read_u32(mmu) as i32,
            _ => 0,
        };

        if base.is_none() && index.is_none() {
            return (Segment::DS, Address::Direct(disp as u32));
        }
        let seg = match base {
            Some(R::ESP) | Some(R::EBP) => Segment::SS,
            _ => Segment::DS,
        };
        (seg, Address::Indexed { base, index, scale, disp })
    }

    /// relative jump target, computed from the end of the instruction
    fn rel(&mut self, mmu: &mut MMU, disp_width: Width, p: &Prefixes) -> Parameter {
        let disp = match disp_width {
            Width::Byte => self.read_u8(mmu) as i8 as i32 as u32,
            Width::Word => self.read_u16(mmu) as i16 as i32 as u32,
            Width::Dword => self.read_u32(mmu),
        };
        let target = self.offset.wrapping_add(disp);
        if p.op32 {
            Parameter::Imm32(target)
        } else {
            Parameter::Imm16(target as u16)
        }
    }

    fn read_mod_reg_rm(&mut self, mmu: &mut MMU) -> ModRegRm {
        ModRegRm::from_u8(self.read_u8(mmu))
    }

    fn read_u8(&mut self, mmu: &mut MMU) -> u8 {
        let b = mmu.read_u8(self.base.wrapping_add(self.offset));
        if let Some(slot) = self.bytes.get_mut(self.length as usize) {
            *slot = b;
        }
        self.length = self.length.saturating_add(1);
        self.offset = if self.code32 {
            self.offset.wrapping_add(1)
        } else {
            (self.offset + 1) & 0xFFFF
        };
        b
    }

    fn read_u16(&mut self, mmu: &mut MMU) -> u16 {
        let lo = self.read_u8(mmu);
        let hi = self.read_u8(mmu);
        u16::from(hi) << 8 | u16::from(lo)
    }

    fn read_u32(&mut self, mmu: &mut MMU) -> u32 {
        let lo = self.read_u16(mmu);
        let hi = self.read_u16(mmu);
        u32::from(hi) << 16 | u32::from(lo)
    }

    fn read_imm(&mut self, mmu: &mut MMU, w: Width) -> u32 {
        match w {
            Width::Byte => u32::from(self.read_u8(mmu)),
            Width::Word => u32::from(self.read_u16(mmu)),
            Width::Dword => self.read_u32(mmu),
        }
    }
}
