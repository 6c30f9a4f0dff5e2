use crate::cpu::{AddressSize, Cond, Instruction, Location, Op, Operand, Parameter, Width, FLAG_STATUS, R};
use crate::interrupt::Exception;
use crate::machine::Machine;

impl Machine {
    pub(super) fn mov(&mut self, op: &Instruction) -> Result<(), Exception> {
        match (&op.params.dst, &op.params.src) {
            (Parameter::CReg(_), _) | (Parameter::DReg(_), _) | (_, Parameter::CReg(_)) | (_, Parameter::DReg(_)) => {
                self.mov_special(op)
            }
            (Parameter::SReg16(sr), src) => {
                let src = self.operand(op, src);
                let selector = self.read(src, Width::Word)? as u16;
                self.cpu.load_segment(&mut self.mmu, *sr, selector)?;
                if *sr == R::SS {
                    self.cpu.interrupt_shadow = true;
                }
                Ok(())
            }
            (dst, Parameter::SReg16(sr)) => {
                let dst = self.operand(op, dst);
                let v = u32::from(self.cpu.get_r16(*sr));
                self.write(dst, Width::Word, v)
            }
            (dst, src) => {
                let w = op.op_size;
                let src = self.operand(op, src);
                let dst = self.operand(op, dst);
                let v = self.read(src, w)?;
                self.write(dst, w, v)
            }
        }
    }

    /// MOVZX, MOVSX
    pub(super) fn mov_extend(&mut self, op: &Instruction) -> Result<(), Exception> {
        let src_width = op.params.src.width().unwrap_or(Width::Byte);
        let src = self.operand(op, &op.params.src);
        let dst = self.operand(op, &op.params.dst);
        let mut v = self.read(src, src_width)?;
        if op.command == Op::Movsx {
            v = src_width.sign_extend(v);
        }
        self.write(dst, op.op_size, v)
    }

    pub(super) fn xchg(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let dst = self.operand(op, &op.params.dst);
        let src = self.operand(op, &op.params.src);
        let a = self.read(dst, w)?;
        let b = self.read(src, w)?;
        self.write(dst, w, b)?;
        self.write(src, w, a)
    }

    pub(super) fn lea(&mut self, op: &Instruction) -> Result<(), Exception> {
        let dst = self.operand(op, &op.params.dst);
        match self.operand(op, &op.params.src) {
            Operand::Memory(loc) => self.write(dst, op.op_size, loc.offset),
            _ => Err(Exception::UD),
        }
    }

    /// LDS, LES, LFS, LGS, LSS
    pub(super) fn load_far_pointer(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let sr = match op.command {
            Op::Lds => R::DS,
            Op::Les => R::ES,
            Op::Lfs => R::FS,
            Op::Lgs => R::GS,
            _ => R::SS,
        };
        let loc = match self.operand(op, &op.params.src) {
            Operand::Memory(loc) => loc,
            _ => return Err(Exception::UD),
        };
        let offset = self.cpu.read_mem(&mut self.mmu, loc, w)?;
        let selector = self.cpu.read_mem(&mut self.mmu, loc.add(w.bytes()), Width::Word)? as u16;
        self.cpu.load_segment(&mut self.mmu, sr, selector)?;
        let dst = self.operand(op, &op.params.dst);
        self.write(dst, w, offset)
    }

    pub(super) fn push_op(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let v = match op.params.dst {
            Parameter::SReg16(sr) => u32::from(self.cpu.get_r16(sr)),
            Parameter::Reg16(R::SP) if self.cpu.features.push_sp_decremented => {
                // 8086 and 80186 push the value SP has after the decrement
                u32::from(self.cpu.get_r16(R::SP).wrapping_sub(2))
            }
            ref p => {
                let src = self.operand(op, p);
                self.read(src, w)?
            }
        };
        self.push(v, w)
    }

    pub(super) fn pop_op(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let v = self.pop(w)?;
        match op.params.dst {
            Parameter::SReg16(sr) => {
                self.cpu.load_segment(&mut self.mmu, sr, v as u16)?;
                if sr == R::SS {
                    self.cpu.interrupt_shadow = true;
                }
                Ok(())
            }
            ref p => {
                // the destination is addressed with the incremented stack pointer
                let dst = self.operand(op, p);
                self.write(dst, w, v)
            }
        }
    }

    pub(super) fn pusha(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let sp = self.cpu.regs.get(R::gpr(4, w));
        for n in 0..8 {
            let v = if n == 4 { sp } else { self.cpu.regs.get(R::gpr(n, w)) };
            self.push(v, w)?;
        }
        Ok(())
    }

    pub(super) fn popa(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        // nothing is written back until all eight pops succeed
        let mut values = [0u32; 8];
        for v in values.iter_mut().rev() {
            *v = self.pop(w)?;
        }
        for (n, &v) in values.iter().enumerate() {
            // the stored SP is discarded
            if n != 4 {
                self.cpu.regs.set(R::gpr(n as u8, w), v);
            }
        }
        Ok(())
    }

    pub(super) fn pushf(&mut self, op: &Instruction) -> Result<(), Exception> {
        let v = self.cpu.flags_value();
        self.push(v, op.op_size)
    }

    pub(super) fn popf(&mut self, op: &Instruction) -> Result<(), Exception> {
        let v = self.pop(op.op_size)?;
        self.cpu.load_flags(v, op.op_size);
        Ok(())
    }

    pub(super) fn lahf(&mut self) -> Result<(), Exception> {
        let v = self.cpu.regs.flags.u16() as u8;
        self.cpu.set_r8(R::AH, v);
        Ok(())
    }

    /// loads SF, ZF, AF, PF and CF from AH
    pub(super) fn sahf(&mut self) -> Result<(), Exception> {
        let ah = u32::from(self.cpu.get_r8(R::AH));
        let old = self.cpu.regs.flags.u32();
        let status = FLAG_STATUS & 0xFF;
        let v = (old & !status) | (ah & status);
        self.cpu.regs.flags.set_u32(v);
        Ok(())
    }

    /// CLC, STC, CMC, CLD, STD, CLI, STI
    pub(super) fn flag_op(&mut self, op: &Instruction) -> Result<(), Exception> {
        if op.command == Op::Cli || op.command == Op::Sti {
            self.check_io()?;
        }
        if op.command == Op::Sti && !self.cpu.regs.flags.interrupt {
            self.cpu.interrupt_shadow = true;
        }
        let f = &mut self.cpu.regs.flags;
        match op.command {
            Op::Clc => f.carry = false,
            Op::Stc => f.carry = true,
            Op::Cmc => f.carry = !f.carry,
            Op::Cld => f.direction = false,
            Op::Std => f.direction = true,
            Op::Cli => f.interrupt = false,
            _ => f.interrupt = true,
        }
        Ok(())
    }

    /// AL = [seg:BX + AL]
    pub(super) fn xlat(&mut self, op: &Instruction) -> Result<(), Exception> {
        let addr32 = op.address_size == AddressSize::_32bit;
        let base = if addr32 { self.cpu.get_r32(R::EBX) } else { u32::from(self.cpu.get_r16(R::BX)) };
        let offset = base.wrapping_add(u32::from(self.cpu.get_r8(R::AL)));
        let loc = Location::new(op.segment_prefix.or(R::DS), offset, addr32);
        let v = self.cpu.read_mem(&mut self.mmu, loc, Width::Byte)?;
        self.cpu.set_r8(R::AL, v as u8);
        Ok(())
    }

    /// I/O and interrupt flag instructions are limited by IOPL in protected mode
    pub(super) fn check_io(&self) -> Result<(), Exception> {
        if self.cpu.protected_mode() && self.cpu.cpl() > self.cpu.regs.flags.iopl {
            Err(Exception::GP(0))
        } else {
            Ok(())
        }
    }

    fn port(&mut self, op: &Instruction, p: &Parameter) -> Result<u16, Exception> {
        let port = self.operand(op, p);
        Ok(self.read(port, Width::Word)? as u16)
    }

    pub(super) fn in_op(&mut self, op: &Instruction) -> Result<(), Exception> {
        self.check_io()?;
        let port = self.port(op, &op.params.src)?;
        let v = self.in_port(port, op.op_size);
        let dst = self.operand(op, &op.params.dst);
        self.write(dst, op.op_size, v)
    }

    pub(super) fn out_op(&mut self, op: &Instruction) -> Result<(), Exception> {
        self.check_io()?;
        let port = self.port(op, &op.params.dst)?;
        let src = self.operand(op, &op.params.src);
        let v = self.read(src, op.op_size)?;
        self.out_port(port, op.op_size, v);
        Ok(())
    }

    pub(super) fn setcc(&mut self, op: &Instruction, cond: Cond) -> Result<(), Exception> {
        let dst = self.operand(op, &op.params.dst);
        let v = if cond.test(&self.cpu.regs.flags) { 1 } else { 0 };
        self.write(dst, Width::Byte, v)
    }
}
