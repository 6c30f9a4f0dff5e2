use crate::cpu::alu;
use crate::cpu::{AluOp, Instruction, Op, Operand, Parameter, ShiftOp, Width, R};
use crate::interrupt::Exception;
use crate::machine::Machine;

impl Machine {
    /// ADD, OR, ADC, SBB, AND, SUB, XOR, CMP
    pub(super) fn alu_op(&mut self, op: &Instruction, kind: AluOp) -> Result<(), Exception> {
        let w = op.op_size;
        let dst = self.operand(op, &op.params.dst);
        let src = self.operand(op, &op.params.src);
        let a = self.read(dst, w)?;
        let b = self.read(src, w)?;
        let (res, flags) = alu::binary(kind, a, b, w, self.cpu.regs.flags);
        if kind != AluOp::Cmp {
            self.write(dst, w, res)?;
        }
        self.cpu.regs.flags = flags;
        Ok(())
    }

    pub(super) fn test(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let dst = self.operand(op, &op.params.dst);
        let src = self.operand(op, &op.params.src);
        let a = self.read(dst, w)?;
        let b = self.read(src, w)?;
        let (_, flags) = alu::and(a, b, w, self.cpu.regs.flags);
        self.cpu.regs.flags = flags;
        Ok(())
    }

    /// INC, DEC, NEG, NOT
    pub(super) fn unary(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let dst = self.operand(op, &op.params.dst);
        let v = self.read(dst, w)?;
        let f = self.cpu.regs.flags;
        let (res, flags) = match op.command {
            Op::Inc => alu::inc(v, w, f),
            Op::Dec => alu::dec(v, w, f),
            Op::Neg => alu::neg(v, w, f),
            // NOT affects no flags
            _ => (!v & w.mask(), f),
        };
        self.write(dst, w, res)?;
        self.cpu.regs.flags = flags;
        Ok(())
    }

    pub(super) fn shift_op(&mut self, op: &Instruction, kind: ShiftOp) -> Result<(), Exception> {
        let w = op.op_size;
        let dst = self.operand(op, &op.params.dst);
        let count = self.operand(op, &op.params.src);
        let v = self.read(dst, w)?;
        let count = self.read(count, Width::Byte)?;
        let (res, flags) = alu::shift(kind, v, count, w, self.cpu.regs.flags, &self.cpu.features);
        self.write(dst, w, res)?;
        self.cpu.regs.flags = flags;
        Ok(())
    }

    /// SHLD, SHRD
    pub(super) fn double_shift(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let dst = self.operand(op, &op.params.dst);
        let src = self.operand(op, &op.params.src);
        let count = self.operand(op, &op.params.src2);
        let a = self.read(dst, w)?;
        let b = self.read(src, w)?;
        let count = self.read(count, Width::Byte)?;
        let f = self.cpu.regs.flags;
        let (res, flags) = if op.command == Op::Shld {
            alu::shld(a, b, count, w, f)
        } else {
            alu::shrd(a, b, count, w, f)
        };
        self.write(dst, w, res)?;
        self.cpu.regs.flags = flags;
        Ok(())
    }

    /// one operand MUL and IMUL, storing to AX, DX:AX or EDX:EAX
    pub(super) fn multiply(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let src = self.operand(op, &op.params.dst);
        let b = self.read(src, w)?;
        let a = self.cpu.regs.get(R::accumulator(w));
        let f = self.cpu.regs.flags;
        let (product, flags) = if op.command == Op::Mul {
            alu::mul(a, b, w, f, &self.cpu.features)
        } else {
            alu::imul(a, b, w, f, &self.cpu.features)
        };
        self.store_double(product, w);
        self.cpu.regs.flags = flags;
        Ok(())
    }

    /// two and three operand IMUL, the result is truncated to the destination size
    pub(super) fn imul_trunc(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let dst = self.operand(op, &op.params.dst);
        let src = self.operand(op, &op.params.src);
        let (a, b) = match op.params.src2 {
            Parameter::None => (self.read(dst, w)?, self.read(src, w)?),
            ref p => {
                let imm = self.operand(op, p);
                (self.read(src, w)?, self.read(imm, w)?)
            }
        };
        let (product, flags) = alu::imul(a, b, w, self.cpu.regs.flags, &self.cpu.features);
        self.write(dst, w, product as u32)?;
        self.cpu.regs.flags = flags;
        Ok(())
    }

    fn store_double(&mut self, v: u64, w: Width) {
        match w {
            Width::Byte => self.cpu.set_r16(R::AX, v as u16),
            Width::Word => {
                self.cpu.set_r16(R::AX, v as u16);
                self.cpu.set_r16(R::DX, (v >> 16) as u16);
            }
            Width::Dword => {
                self.cpu.set_r32(R::EAX, v as u32);
                self.cpu.set_r32(R::EDX, (v >> 32) as u32);
            }
        }
    }

    /// the DIV/IDIV dividend: AX, DX:AX or EDX:EAX
    fn load_double(&self, w: Width) -> u64 {
        match w {
            Width::Byte => u64::from(self.cpu.get_r16(R::AX)),
            Width::Word => u64::from(self.cpu.get_r16(R::DX)) << 16 | u64::from(self.cpu.get_r16(R::AX)),
            Width::Dword => u64::from(self.cpu.get_r32(R::EDX)) << 32 | u64::from(self.cpu.get_r32(R::EAX)),
        }
    }

    /// DIV and IDIV. a zero divisor or a quotient overflow raises a divide error
    pub(super) fn divide(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let src = self.operand(op, &op.params.dst);
        let divisor = self.read(src, w)?;
        let dividend = self.load_double(w);
        let (quotient, remainder) = if op.command == Op::Div {
            alu::div(dividend, divisor, w)
        } else {
            let signed = match w {
                Width::Byte => i64::from(dividend as u16 as i16),
                Width::Word => i64::from(dividend as u32 as i32),
                Width::Dword => dividend as i64,
            };
            alu::idiv(signed, divisor, w, &self.cpu.features)
        }
        .ok_or(Exception::DIV0)?;
        match w {
            Width::Byte => {
                self.cpu.set_r8(R::AL, quotient as u8);
                self.cpu.set_r8(R::AH, remainder as u8);
            }
            Width::Word => {
                self.cpu.set_r16(R::AX, quotient as u16);
                self.cpu.set_r16(R::DX, remainder as u16);
            }
            Width::Dword => {
                self.cpu.set_r32(R::EAX, quotient);
                self.cpu.set_r32(R::EDX, remainder);
            }
        }
        Ok(())
    }

    /// AAA, AAS, DAA, DAS
    pub(super) fn bcd_adjust(&mut self, op: &Instruction) -> Result<(), Exception> {
        let f = self.cpu.regs.flags;
        match op.command {
            Op::Daa | Op::Das => {
                let al = self.cpu.get_r8(R::AL);
                let (res, flags) = if op.command == Op::Daa { alu::daa(al, f) } else { alu::das(al, f) };
                self.cpu.set_r8(R::AL, res);
                self.cpu.regs.flags = flags;
            }
            _ => {
                let ax = self.cpu.get_r16(R::AX);
                let (res, flags) = if op.command == Op::Aaa {
                    alu::aaa(ax, f, &self.cpu.features)
                } else {
                    alu::aas(ax, f, &self.cpu.features)
                };
                self.cpu.set_r16(R::AX, res);
                self.cpu.regs.flags = flags;
            }
        }
        Ok(())
    }

    pub(super) fn aam(&mut self, op: &Instruction) -> Result<(), Exception> {
        let base = self.imm8(op);
        let al = self.cpu.get_r8(R::AL);
        let (ax, flags) = alu::aam(al, base, self.cpu.regs.flags).ok_or(Exception::DIV0)?;
        self.cpu.set_r16(R::AX, ax);
        self.cpu.regs.flags = flags;
        Ok(())
    }

    pub(super) fn aad(&mut self, op: &Instruction) -> Result<(), Exception> {
        let base = self.imm8(op);
        let ax = self.cpu.get_r16(R::AX);
        let (ax, flags) = alu::aad(ax, base, self.cpu.regs.flags);
        self.cpu.set_r16(R::AX, ax);
        self.cpu.regs.flags = flags;
        Ok(())
    }

    fn imm8(&self, op: &Instruction) -> u8 {
        match op.params.dst {
            Parameter::Imm8(v) => v,
            _ => 10,
        }
    }

    /// CBW, or CWDE with a 32-bit operand size
    pub(super) fn cbw(&mut self, op: &Instruction) -> Result<(), Exception> {
        if op.op_size == Width::Dword {
            let ax = self.cpu.get_r16(R::AX);
            self.cpu.set_r32(R::EAX, Width::Word.sign_extend(u32::from(ax)));
        } else {
            let al = self.cpu.get_r8(R::AL);
            self.cpu.set_r16(R::AX, Width::Byte.sign_extend(u32::from(al)) as u16);
        }
        Ok(())
    }

    /// CWD, or CDQ with a 32-bit operand size
    pub(super) fn cwd(&mut self, op: &Instruction) -> Result<(), Exception> {
        if op.op_size == Width::Dword {
            let high = if self.cpu.get_r32(R::EAX) & 0x8000_0000 != 0 { 0xFFFF_FFFF } else { 0 };
            self.cpu.set_r32(R::EDX, high);
        } else {
            let high = if self.cpu.get_r16(R::AX) & 0x8000 != 0 { 0xFFFF } else { 0 };
            self.cpu.set_r16(R::DX, high);
        }
        Ok(())
    }

    /// BT, BTS, BTR, BTC
    pub(super) fn bit_test(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let mut dst = self.operand(op, &op.params.dst);
        let src = self.operand(op, &op.params.src);
        let offset = self.read(src, w)?;
        if let (Operand::Memory(loc), Operand::Register(_)) = (dst, src) {
            // a register bit offset addresses memory beyond the operand
            let signed = w.sign_extend(offset) as i32;
            let delta = (signed >> w.bits().trailing_zeros()).wrapping_mul(w.bytes() as i32);
            dst = Operand::Memory(loc.add(delta as u32));
        }
        let bit = offset & (w.bits() - 1);
        let v = self.read(dst, w)?;
        let mask = 1 << bit;
        let res = match op.command {
            Op::Bts => Some(v | mask),
            Op::Btr => Some(v & !mask),
            Op::Btc => Some(v ^ mask),
            _ => None,
        };
        if let Some(res) = res {
            self.write(dst, w, res)?;
        }
        self.cpu.regs.flags.carry = v & mask != 0;
        Ok(())
    }

    /// BSF, BSR. a zero source sets ZF and leaves the destination unchanged
    pub(super) fn bit_scan(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let dst = self.operand(op, &op.params.dst);
        let src = self.operand(op, &op.params.src);
        let v = self.read(src, w)?;
        let found = if op.command == Op::Bsf { alu::bsf(v, w) } else { alu::bsr(v, w) };
        match found {
            Some(index) => {
                self.write(dst, w, index)?;
                self.cpu.regs.flags.zero = false;
            }
            None => self.cpu.regs.flags.zero = true,
        }
        Ok(())
    }
}
