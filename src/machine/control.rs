use crate::cpu::{AddressSize, Instruction, Location, Op, Operand, Parameter, Width, R};
use crate::interrupt::Exception;
use crate::machine::Machine;

impl Machine {
    fn branch_target(&mut self, op: &Instruction) -> Result<u32, Exception> {
        let target = self.operand(op, &op.params.dst);
        self.read(target, op.op_size)
    }

    pub(super) fn jmp_near(&mut self, op: &Instruction) -> Result<(), Exception> {
        let target = self.branch_target(op)?;
        self.cpu.set_ip(target);
        Ok(())
    }

    pub(super) fn call_near(&mut self, op: &Instruction) -> Result<(), Exception> {
        let target = self.branch_target(op)?;
        let ret = self.cpu.regs.eip;
        self.push(ret, op.op_size)?;
        self.cpu.set_ip(target);
        Ok(())
    }

    /// segment and offset of a far JMP or CALL, immediate or from memory
    fn far_target(&mut self, op: &Instruction) -> Result<(u16, u32), Exception> {
        if let Parameter::Ptr16Imm(seg, offset) = op.params.dst {
            return Ok((seg, offset));
        }
        let w = op.op_size;
        match self.operand(op, &op.params.dst) {
            Operand::Memory(loc) => {
                let offset = self.cpu.read_mem(&mut self.mmu, loc, w)?;
                let seg = self.cpu.read_mem(&mut self.mmu, loc.add(w.bytes()), Width::Word)?;
                Ok((seg as u16, offset))
            }
            _ => Err(Exception::UD),
        }
    }

    pub(super) fn jmp_far(&mut self, op: &Instruction) -> Result<(), Exception> {
        let (seg, offset) = self.far_target(op)?;
        self.cpu.load_cs(&mut self.mmu, seg, offset)
    }

    pub(super) fn call_far(&mut self, op: &Instruction) -> Result<(), Exception> {
        let (seg, offset) = self.far_target(op)?;
        let cs = self.cpu.get_r16(R::CS);
        let ret = self.cpu.regs.eip;
        self.push(u32::from(cs), op.op_size)?;
        self.push(ret, op.op_size)?;
        self.cpu.load_cs(&mut self.mmu, seg, offset)
    }

    /// bytes to release from the stack after a RET imm16
    fn release(&mut self, op: &Instruction) {
        if let Parameter::Imm16(n) = op.params.dst {
            let sp = self.cpu.stack_pointer().wrapping_add(u32::from(n));
            self.cpu.set_stack_pointer(sp);
        }
    }

    pub(super) fn retn(&mut self, op: &Instruction) -> Result<(), Exception> {
        let ip = self.pop(op.op_size)?;
        self.cpu.set_ip(ip);
        self.release(op);
        Ok(())
    }

    pub(super) fn retf(&mut self, op: &Instruction) -> Result<(), Exception> {
        let ip = self.pop(op.op_size)?;
        let cs = self.pop(op.op_size)? as u16;
        self.cpu.load_cs(&mut self.mmu, cs, ip)?;
        self.release(op);
        Ok(())
    }

    /// LOOP, LOOPE, LOOPNE, JCXZ. the counter is CX or ECX by address size
    pub(super) fn loop_op(&mut self, op: &Instruction) -> Result<(), Exception> {
        let counter = if op.address_size == AddressSize::_32bit { R::ECX } else { R::CX };
        let mut count = self.cpu.regs.get(counter);
        if op.command != Op::Jcxz {
            count = count.wrapping_sub(1);
            self.cpu.regs.set(counter, count);
            count &= counter.width().mask();
        }
        let zf = self.cpu.regs.flags.zero;
        let taken = match op.command {
            Op::Jcxz => count == 0,
            Op::Loop => count != 0,
            Op::Loope => count != 0 && zf,
            _ => count != 0 && !zf,
        };
        if taken {
            self.jmp_near(op)?;
        }
        Ok(())
    }

    /// INT imm8. a component may service the call natively
    pub(super) fn int(&mut self, op: &Instruction) -> Result<(), Exception> {
        let vector = match op.params.dst {
            Parameter::Imm8(v) => v,
            _ => return Err(Exception::UD),
        };
        for component in &mut self.components {
            if component.int(vector, &mut self.cpu, &mut self.mmu) {
                return Ok(());
            }
        }
        self.interrupt(vector, None, true)
    }

    pub(super) fn enter(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let size = match op.params.dst {
            Parameter::Imm16(v) => u32::from(v),
            _ => 0,
        };
        let level = match op.params.src {
            Parameter::Imm8(v) => v & 0x1F,
            _ => 0,
        };
        let bp_reg = if w == Width::Dword { R::EBP } else { R::BP };

        let bp = self.cpu.regs.get(bp_reg);
        self.push(bp, w)?;
        let frame = self.cpu.stack_pointer();
        if level > 0 {
            let stack32 = self.cpu.stack32();
            let mut bp = bp;
            for _ in 1..level {
                bp = bp.wrapping_sub(w.bytes());
                let loc = Location::new(R::SS, bp, stack32);
                let v = self.cpu.read_mem(&mut self.mmu, loc, w)?;
                self.push(v, w)?;
            }
            self.push(frame, w)?;
        }
        self.cpu.regs.set(bp_reg, frame);
        let sp = self.cpu.stack_pointer().wrapping_sub(size);
        self.cpu.set_stack_pointer(sp);
        Ok(())
    }

    pub(super) fn leave(&mut self, op: &Instruction) -> Result<(), Exception> {
        let bp = self.cpu.get_r32(R::EBP);
        self.cpu.set_stack_pointer(bp);
        let v = self.pop(op.op_size)?;
        if op.op_size == Width::Dword {
            self.cpu.set_r32(R::EBP, v);
        } else {
            self.cpu.set_r16(R::BP, v as u16);
        }
        Ok(())
    }

    /// raises BR when the signed index is outside the bounds pair in memory
    pub(super) fn bound(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let index = self.operand(op, &op.params.dst);
        let index = w.sign_extend(self.read(index, w)?) as i32;
        let loc = match self.operand(op, &op.params.src) {
            Operand::Memory(loc) => loc,
            _ => return Err(Exception::UD),
        };
        let lower = w.sign_extend(self.cpu.read_mem(&mut self.mmu, loc, w)?) as i32;
        let upper = w.sign_extend(self.cpu.read_mem(&mut self.mmu, loc.add(w.bytes()), w)?) as i32;
        if index < lower || index > upper {
            return Err(Exception::BR);
        }
        Ok(())
    }

    pub(super) fn hlt(&mut self) -> Result<(), Exception> {
        self.cpu.require_privilege()?;
        if !self.cpu.regs.flags.interrupt {
            error!(
                "[{:04X}:{:04X}] HLT with interrupts disabled, stopping",
                self.cpu.get_r16(R::CS),
                self.cpu.regs.eip
            );
            self.cpu.fatal_error = true;
        }
        self.cpu.halted = true;
        Ok(())
    }
}
