use crate::cpu::alu;
use crate::cpu::{AddressSize, Instruction, Location, Op, RepeatMode, R};
use crate::interrupt::Exception;
use crate::machine::Machine;

impl Machine {
    /// source and destination index registers plus the per element step
    fn string_regs(&self, op: &Instruction) -> (R, R, u32) {
        let w = op.op_size;
        let step = if self.cpu.regs.flags.direction { w.bytes().wrapping_neg() } else { w.bytes() };
        match op.address_size {
            AddressSize::_32bit => (R::ESI, R::EDI, step),
            AddressSize::_16bit => (R::SI, R::DI, step),
        }
    }

    fn advance(&mut self, r: R, step: u32) {
        let v = self.cpu.regs.get(r).wrapping_add(step);
        self.cpu.regs.set(r, v);
    }

    /// one element of MOVS, CMPS, SCAS, LODS, STOS, INS or OUTS
    pub(super) fn string_op(&mut self, op: &Instruction) -> Result<(), Exception> {
        let w = op.op_size;
        let addr32 = op.address_size == AddressSize::_32bit;
        let (si, di, step) = self.string_regs(op);
        // the source segment can be overridden, ES:DI can not
        let src = Location::new(op.segment_prefix.or(R::DS), self.cpu.regs.get(si), addr32);
        let dst = Location::new(R::ES, self.cpu.regs.get(di), addr32);
        let acc = R::accumulator(w);

        match op.command {
            Op::Movs => {
                let v = self.cpu.read_mem(&mut self.mmu, src, w)?;
                self.cpu.write_mem(&mut self.mmu, dst, w, v)?;
                self.advance(si, step);
                self.advance(di, step);
            }
            Op::Cmps => {
                let a = self.cpu.read_mem(&mut self.mmu, src, w)?;
                let b = self.cpu.read_mem(&mut self.mmu, dst, w)?;
                let (_, flags) = alu::sub(a, b, w, self.cpu.regs.flags);
                self.cpu.regs.flags = flags;
                self.advance(si, step);
                self.advance(di, step);
            }
            Op::Scas => {
                let a = self.cpu.regs.get(acc);
                let b = self.cpu.read_mem(&mut self.mmu, dst, w)?;
                let (_, flags) = alu::sub(a, b, w, self.cpu.regs.flags);
                self.cpu.regs.flags = flags;
                self.advance(di, step);
            }
            Op::Lods => {
                let v = self.cpu.read_mem(&mut self.mmu, src, w)?;
                self.cpu.regs.set(acc, v);
                self.advance(si, step);
            }
            Op::Stos => {
                let v = self.cpu.regs.get(acc);
                self.cpu.write_mem(&mut self.mmu, dst, w, v)?;
                self.advance(di, step);
            }
            Op::Ins => {
                self.check_io()?;
                let port = self.cpu.get_r16(R::DX);
                let v = self.in_port(port, w);
                self.cpu.write_mem(&mut self.mmu, dst, w, v)?;
                self.advance(di, step);
            }
            Op::Outs => {
                self.check_io()?;
                let port = self.cpu.get_r16(R::DX);
                let v = self.cpu.read_mem(&mut self.mmu, src, w)?;
                self.out_port(port, w, v);
                self.advance(si, step);
            }
            _ => return Err(Exception::UD),
        }
        Ok(())
    }

    /// runs a REP, REPE or REPNE prefixed string instruction to completion.
    /// the count register reflects the progress made if an element faults
    pub(super) fn execute_repeated(&mut self, op: &Instruction) -> Result<(), Exception> {
        let counter = match op.address_size {
            AddressSize::_32bit => R::ECX,
            AddressSize::_16bit => R::CX,
        };
        loop {
            let count = self.cpu.regs.get(counter);
            if count == 0 {
                return Ok(());
            }
            self.string_op(op)?;
            self.cpu.regs.set(counter, count - 1);
            self.cpu.cycle_count += 1;

            let zf = self.cpu.regs.flags.zero;
            match op.repeat {
                RepeatMode::Repe if !zf => return Ok(()),
                RepeatMode::Repne if zf => return Ok(()),
                _ => {}
            }
        }
    }
}
