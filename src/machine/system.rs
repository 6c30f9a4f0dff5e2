use crate::cpu::{
    GateDescriptor, GateKind, Instruction, Location, Op, Operand, Parameter, Width, CR0_ET, CR0_PE, CR0_PG, CR0_TS, R,
};
use crate::interrupt::Exception;
use crate::machine::Machine;

impl Machine {
    /// vectors to interrupt `vector` through the IVT in real mode or the IDT in protected mode.
    /// `error_code` is pushed in protected mode only. software interrupts honor the gate DPL
    pub fn interrupt(&mut self, vector: u8, error_code: Option<u16>, software: bool) -> Result<(), Exception> {
        if self.cpu.protected_mode() {
            self.interrupt_protected(vector, error_code, software)
        } else {
            self.interrupt_real(vector)
        }
    }

    fn interrupt_real(&mut self, vector: u8) -> Result<(), Exception> {
        let offset = u32::from(vector) << 2;
        if offset + 3 > u32::from(self.cpu.idtr.limit) {
            return Err(Exception::GP(0));
        }
        let target = self.mmu.read_vec(self.cpu.idtr.base, vector);
        let flags = self.cpu.flags_value();
        let cs = self.cpu.get_r16(R::CS);
        let ip = self.cpu.regs.ip();
        self.cpu.push16(&mut self.mmu, flags as u16)?;
        self.cpu.push16(&mut self.mmu, cs)?;
        self.cpu.push16(&mut self.mmu, ip)?;
        self.cpu.regs.flags.interrupt = false;
        self.cpu.regs.flags.trap = false;
        self.cpu.set_r16(R::CS, target.segment);
        self.cpu.regs.eip = u32::from(target.offset);
        Ok(())
    }

    fn interrupt_protected(&mut self, vector: u8, error_code: Option<u16>, software: bool) -> Result<(), Exception> {
        let offset = u32::from(vector) * 8;
        // error code for a bad IDT entry: index plus the IDT bit
        let code = (offset + 2) as u16;
        let entry = self.cpu.idtr.entry_address(offset).ok_or(Exception::GP(code))?;
        let mut bytes = [0u8; 8];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.mmu.read_u8(entry.wrapping_add(i as u32));
        }
        let gate = GateDescriptor::from_bytes(&bytes);
        let kind = match gate.kind {
            Some(GateKind::Task) | None => return Err(Exception::GP(code)),
            Some(kind) => kind,
        };
        if software && gate.dpl < self.cpu.cpl() {
            return Err(Exception::GP(code));
        }
        if !gate.present {
            return Err(Exception::NP(code));
        }

        let w = if kind.is_32bit() { Width::Dword } else { Width::Word };
        let flags = self.cpu.flags_value();
        let cs = self.cpu.get_r16(R::CS);
        let eip = self.cpu.regs.eip;
        self.cpu.load_cs(&mut self.mmu, gate.selector, gate.offset)?;
        self.push(flags, w)?;
        self.push(u32::from(cs), w)?;
        self.push(eip, w)?;
        if let Some(code) = error_code {
            self.push(u32::from(code), w)?;
        }
        let f = &mut self.cpu.regs.flags;
        f.trap = false;
        f.nested_task = false;
        f.resume = false;
        if kind.clears_interrupt_flag() {
            f.interrupt = false;
        }
        debug!("interrupt {:02X} via IDT to {:04X}:{:08X}", vector, gate.selector, gate.offset);
        Ok(())
    }

    /// IRET, IRETD. privileged flag bits are masked by `load_flags`
    pub(super) fn iret(&mut self, w: Width) -> Result<(), Exception> {
        let ip = self.pop(w)?;
        let cs = self.pop(w)? as u16;
        let flags = self.pop(w)?;
        self.cpu.load_cs(&mut self.mmu, cs, ip)?;
        self.cpu.load_flags(flags, w);
        Ok(())
    }

    fn table_operand(&mut self, op: &Instruction) -> Result<Location, Exception> {
        match self.operand(op, &op.params.dst) {
            Operand::Memory(loc) => Ok(loc),
            _ => Err(Exception::UD),
        }
    }

    /// LGDT, LIDT. a 16-bit operand size loads a 24-bit base
    pub(super) fn load_table_register(&mut self, op: &Instruction) -> Result<(), Exception> {
        self.cpu.require_privilege()?;
        let loc = self.table_operand(op)?;
        let limit = self.cpu.read_mem(&mut self.mmu, loc, Width::Word)? as u16;
        let mut base = self.cpu.read_mem(&mut self.mmu, loc.add(2), Width::Dword)?;
        if op.op_size != Width::Dword {
            base &= 0x00FF_FFFF;
        }
        let table = if op.command == Op::Lgdt { &mut self.cpu.gdtr } else { &mut self.cpu.idtr };
        table.base = base;
        table.limit = limit;
        debug!("{} base {:08X} limit {:04X}", op.command, base, limit);
        Ok(())
    }

    /// SGDT, SIDT
    pub(super) fn store_table_register(&mut self, op: &Instruction) -> Result<(), Exception> {
        let loc = self.table_operand(op)?;
        let table = if op.command == Op::Sgdt { self.cpu.gdtr } else { self.cpu.idtr };
        let mut base = table.base;
        if op.op_size != Width::Dword {
            base &= 0x00FF_FFFF;
        }
        self.cpu.write_mem(&mut self.mmu, loc, Width::Word, u32::from(table.limit))?;
        self.cpu.write_mem(&mut self.mmu, loc.add(2), Width::Dword, base)
    }

    /// LLDT, LTR. the selector is recorded, local tables and task switches are not modelled
    pub(super) fn load_system_selector(&mut self, op: &Instruction) -> Result<(), Exception> {
        if !self.cpu.protected_mode() {
            return Err(Exception::UD);
        }
        self.cpu.require_privilege()?;
        let src = self.operand(op, &op.params.dst);
        let selector = self.read(src, Width::Word)? as u16;
        if op.command == Op::Lldt {
            self.cpu.ldtr = selector;
        } else {
            self.cpu.tr = selector;
        }
        debug!("{} {:04X}", op.command, selector);
        Ok(())
    }

    /// SLDT, STR
    pub(super) fn store_system_selector(&mut self, op: &Instruction) -> Result<(), Exception> {
        if !self.cpu.protected_mode() {
            return Err(Exception::UD);
        }
        let v = if op.command == Op::Sldt { self.cpu.ldtr } else { self.cpu.tr };
        let dst = self.operand(op, &op.params.dst);
        self.write(dst, Width::Word, u32::from(v))
    }

    /// LMSW loads the low 4 bits of CR0 but can not clear PE
    pub(super) fn lmsw(&mut self, op: &Instruction) -> Result<(), Exception> {
        self.cpu.require_privilege()?;
        let src = self.operand(op, &op.params.dst);
        let v = self.read(src, Width::Word)? & 0xF;
        let cr0 = self.cpu.regs.cr[0];
        self.set_cr0((cr0 & !0xF) | v | (cr0 & CR0_PE));
        Ok(())
    }

    pub(super) fn smsw(&mut self, op: &Instruction) -> Result<(), Exception> {
        let dst = self.operand(op, &op.params.dst);
        let v = self.cpu.regs.cr[0] & 0xFFFF;
        self.write(dst, Width::Word, v)
    }

    pub(super) fn clts(&mut self) -> Result<(), Exception> {
        self.cpu.require_privilege()?;
        self.cpu.regs.cr[0] &= !CR0_TS;
        Ok(())
    }

    /// raises the RPL of the destination selector to that of the source
    pub(super) fn arpl(&mut self, op: &Instruction) -> Result<(), Exception> {
        if !self.cpu.protected_mode() {
            return Err(Exception::UD);
        }
        let dst = self.operand(op, &op.params.dst);
        let src = self.operand(op, &op.params.src);
        let a = self.read(dst, Width::Word)?;
        let b = self.read(src, Width::Word)?;
        if a & 3 < b & 3 {
            self.write(dst, Width::Word, (a & !3) | (b & 3))?;
            self.cpu.regs.flags.zero = true;
        } else {
            self.cpu.regs.flags.zero = false;
        }
        Ok(())
    }

    fn set_cr0(&mut self, v: u32) {
        let old = self.cpu.regs.cr[0];
        // the 80387 is reported as present
        let v = v | CR0_ET;
        if (old ^ v) & CR0_PE != 0 {
            if v & CR0_PE != 0 {
                debug!("entering protected mode at {:04X}:{:08X}", self.cpu.get_r16(R::CS), self.cpu.regs.eip);
            } else {
                debug!("returning to real mode at {:04X}:{:08X}", self.cpu.get_r16(R::CS), self.cpu.regs.eip);
            }
        }
        if v & CR0_PG != 0 && old & CR0_PG == 0 {
            warn!("paging is not supported, CR0.PG has no effect");
        }
        self.cpu.regs.cr[0] = v;
    }

    /// MOV to and from the control and debug registers
    pub(super) fn mov_special(&mut self, op: &Instruction) -> Result<(), Exception> {
        self.cpu.require_privilege()?;
        match (&op.params.dst, &op.params.src) {
            (Parameter::CReg(n), Parameter::Reg32(r)) => {
                let v = self.cpu.get_r32(*r);
                match n {
                    0 => self.set_cr0(v),
                    _ => self.cpu.regs.cr[*n as usize] = v,
                }
            }
            (Parameter::DReg(n), Parameter::Reg32(r)) => {
                self.cpu.regs.dr[*n as usize] = self.cpu.get_r32(*r);
            }
            (Parameter::Reg32(r), Parameter::CReg(n)) => {
                let v = self.cpu.regs.cr[*n as usize];
                self.cpu.set_r32(*r, v);
            }
            (Parameter::Reg32(r), Parameter::DReg(n)) => {
                let v = self.cpu.regs.dr[*n as usize];
                self.cpu.set_r32(*r, v);
            }
            _ => return Err(Exception::UD),
        }
        Ok(())
    }
}
