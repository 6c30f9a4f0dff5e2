use crate::cpu::{
    Address, AddressSize, CpuFeatures, CpuModel, Decoder, DescriptorTable, Instruction, Parameter,
    RegisterState, SegmentDescriptor, Width, ACCESS_ACCESSED, CR0_ET, CR0_PE, FLAG_HIGH_NIBBLE,
    FLAG_IF, FLAG_IOPL, FLAG_NT, FLAG_RF, FLAG_VIF, FLAG_VIP, FLAG_VM, R,
};
use crate::interrupt::Exception;
use crate::memory::MMU;

#[cfg(test)]
#[path = "./cpu_test.rs"]
mod cpu_test;

/// a resolved memory operand: segment register plus effective offset
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub seg: R,
    pub offset: u32,
    /// 32-bit address size, 16-bit offsets wrap at 64k
    pub addr32: bool,
}

impl Location {
    pub fn new(seg: R, offset: u32, addr32: bool) -> Self {
        Location { seg, offset: offset & offset_mask(addr32), addr32 }
    }

    /// the location `delta` bytes further, wrapping inside the segment
    pub fn add(self, delta: u32) -> Location {
        Location::new(self.seg, self.offset.wrapping_add(delta), self.addr32)
    }
}

fn offset_mask(addr32: bool) -> u32 {
    if addr32 {
        0xFFFF_FFFF
    } else {
        0xFFFF
    }
}

/// an instruction operand, resolved once before the instruction executes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Register(R),
    Memory(Location),
    /// sign or zero extended to 32 bits
    Immediate(u32),
    None,
}

/// register state captured at instruction start, restored when the instruction faults
#[derive(Copy, Clone, Debug)]
pub struct Snapshot {
    pub cs: u16,
    pub eip: u32,
    pub esp: u32,
    pub cs_cache: SegmentDescriptor,
}

pub struct CPU {
    pub regs: RegisterState,
    pub model: CpuModel,
    pub features: CpuFeatures,

    /// descriptor caches, indexed like the segment registers
    pub seg_cache: [SegmentDescriptor; 6],

    pub gdtr: DescriptorTable,
    pub idtr: DescriptorTable,
    pub ldtr: u16,
    pub tr: u16,

    /// waiting for an interrupt after HLT
    pub halted: bool,

    /// interrupts are held off until the next instruction completes (STI, MOV SS, POP SS)
    pub interrupt_shadow: bool,

    pub decoder: Decoder,
    pub instruction_count: usize,
    pub cycle_count: usize,

    /// set on shutdown, HLT with interrupts disabled and similar unrecoverable states
    pub fatal_error: bool,
}

impl CPU {
    pub fn new(model: CpuModel) -> Self {
        let features = model.features();
        let mut regs = RegisterState::default();
        if features.wide_registers {
            regs.cr[0] = CR0_ET;
        }
        CPU {
            regs,
            model,
            features,
            seg_cache: [SegmentDescriptor::real_mode(0); 6],
            gdtr: DescriptorTable::default(),
            idtr: DescriptorTable::real_mode_ivt(),
            ldtr: 0,
            tr: 0,
            halted: false,
            interrupt_shadow: false,
            decoder: Decoder::new(features),
            instruction_count: 0,
            cycle_count: 0,
            fatal_error: false,
        }
    }

    pub fn get_r8(&self, r: R) -> u8 {
        self.regs.get_r8(r)
    }

    pub fn set_r8(&mut self, r: R, val: u8) {
        self.regs.set_r8(r, val);
    }

    pub fn get_r16(&self, r: R) -> u16 {
        self.regs.get_r16(r)
    }

    /// sets a 16-bit register. segment registers are loaded with real mode semantics
    pub fn set_r16(&mut self, r: R, val: u16) {
        self.regs.set_r16(r, val);
        if r.is_sreg() {
            self.seg_cache[r.index()] = SegmentDescriptor::real_mode(val);
        }
    }

    pub fn get_r32(&self, r: R) -> u32 {
        self.regs.get_r32(r)
    }

    pub fn set_r32(&mut self, r: R, val: u32) {
        self.regs.set_r32(r, val);
    }

    pub fn protected_mode(&self) -> bool {
        self.regs.cr[0] & CR0_PE != 0
    }

    /// current privilege level
    pub fn cpl(&self) -> u8 {
        if self.protected_mode() {
            (self.regs.sreg16[R::CS.index()] & 3) as u8
        } else {
            0
        }
    }

    /// the code segment has the 32-bit default operand size
    pub fn code32(&self) -> bool {
        self.seg_cache[R::CS.index()].big
    }

    /// the stack segment uses ESP rather than SP
    pub fn stack32(&self) -> bool {
        self.seg_cache[R::SS.index()].big
    }

    pub fn segment_base(&self, sr: R) -> u32 {
        self.seg_cache[sr.index()].base
    }

    /// moves EIP, honoring the code segment size
    pub fn set_ip(&mut self, v: u32) {
        self.regs.eip = v & offset_mask(self.code32());
    }

    /// decodes the instruction at CS:EIP
    pub fn decode_current(&mut self, mmu: &mut MMU) -> Instruction {
        let base = self.segment_base(R::CS);
        let code32 = self.code32();
        self.decoder.decode(mmu, base, self.regs.eip, code32)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            cs: self.regs.sreg16[R::CS.index()],
            eip: self.regs.eip,
            esp: self.regs.get_r32(R::ESP),
            cs_cache: self.seg_cache[R::CS.index()],
        }
    }

    /// rolls back to the start of the faulting instruction
    pub fn restore(&mut self, s: &Snapshot) {
        self.regs.sreg16[R::CS.index()] = s.cs;
        self.seg_cache[R::CS.index()] = s.cs_cache;
        self.regs.eip = s.eip;
        self.regs.set_r32(R::ESP, s.esp);
    }

    /// FLAGS as pushed to the stack
    pub fn flags_value(&self) -> u32 {
        let mut v = self.regs.flags.u32() & !(FLAG_RF | FLAG_VM);
        if self.features.flags_high_nibble_set {
            v |= FLAG_HIGH_NIBBLE;
        }
        if !self.features.wide_registers {
            v &= 0xFFFF;
        }
        v
    }

    /// loads FLAGS from POPF or IRET. bits the current privilege may not change keep their value
    pub fn load_flags(&mut self, val: u32, w: Width) {
        let old = self.regs.flags.u32();
        let mut keep = FLAG_VM | FLAG_VIF | FLAG_VIP;
        if !self.features.wide_registers {
            keep |= FLAG_IOPL | FLAG_NT;
        }
        if self.protected_mode() {
            let cpl = self.cpl();
            if cpl > 0 {
                keep |= FLAG_IOPL;
            }
            if cpl > self.regs.flags.iopl {
                keep |= FLAG_IF;
            }
        }
        let v = (val & !keep) | (old & keep);
        match w {
            Width::Dword => self.regs.flags.set_u32(v),
            _ => self.regs.flags.set_u16(v as u16),
        }
    }

    /// computes the effective offset of a memory address
    pub fn effective_address(&self, addr: &Address, size: AddressSize) -> u32 {
        let addr32 = size == AddressSize::_32bit;
        let offset = match *addr {
            Address::Direct(v) => v,
            Address::Amode(amode, disp) => {
                let (base, index) = amode.registers();
                let mut v = u32::from(self.regs.get_r16(base));
                if let Some(index) = index {
                    v = v.wrapping_add(u32::from(self.regs.get_r16(index)));
                }
                v.wrapping_add(disp as i32 as u32)
            }
            Address::Indexed { base, index, scale, disp } => {
                let mut v = disp as u32;
                if let Some(base) = base {
                    v = v.wrapping_add(self.regs.get_r32(base));
                }
                if let Some(index) = index {
                    v = v.wrapping_add(self.regs.get_r32(index).wrapping_mul(u32::from(scale)));
                }
                v
            }
        };
        offset & offset_mask(addr32)
    }

    /// resolves an instruction parameter to a register, memory location or immediate
    pub fn resolve(&self, p: &Parameter, size: AddressSize) -> Operand {
        match *p {
            Parameter::Reg8(r) | Parameter::Reg16(r) | Parameter::Reg32(r) | Parameter::SReg16(r) => {
                Operand::Register(r)
            }
            Parameter::Imm8(v) => Operand::Immediate(u32::from(v)),
            Parameter::ImmS8(v) => Operand::Immediate(v as i32 as u32),
            Parameter::Imm16(v) => Operand::Immediate(u32::from(v)),
            Parameter::Imm32(v) => Operand::Immediate(v),
            Parameter::Ptr8(seg, ref addr) | Parameter::Ptr16(seg, ref addr) | Parameter::Ptr32(seg, ref addr) => {
                let offset = self.effective_address(addr, size);
                Operand::Memory(Location::new(seg.or(R::DS), offset, size == AddressSize::_32bit))
            }
            _ => Operand::None,
        }
    }

    /// checks a memory access against the cached descriptor
    fn check_access(&self, loc: Location, len: u32, write: bool) -> Result<(), Exception> {
        if !self.protected_mode() {
            return Ok(());
        }
        let desc = &self.seg_cache[loc.seg.index()];
        let ok = desc.is_present()
            && !desc.is_system()
            && (if write { desc.is_writable() } else { desc.is_readable() })
            && desc.contains(loc.offset, len);
        if ok {
            Ok(())
        } else if loc.seg == R::SS {
            Err(Exception::SS(0))
        } else {
            Err(Exception::GP(0))
        }
    }

    pub fn read_mem(&self, mmu: &mut MMU, loc: Location, w: Width) -> Result<u32, Exception> {
        self.check_access(loc, w.bytes(), false)?;
        let base = self.segment_base(loc.seg);
        let last = u64::from(loc.offset) + u64::from(w.bytes()) - 1;
        if last <= u64::from(offset_mask(loc.addr32)) {
            let addr = base.wrapping_add(loc.offset);
            return Ok(match w {
                Width::Byte => u32::from(mmu.read_u8(addr)),
                Width::Word => u32::from(mmu.read_u16(addr)),
                Width::Dword => mmu.read_u32(addr),
            });
        }
        // straddles the end of a 16-bit segment: the high bytes wrap to offset 0
        let mut v = 0;
        for i in 0..w.bytes() {
            let addr = base.wrapping_add(loc.add(i).offset);
            v |= u32::from(mmu.read_u8(addr)) << (8 * i);
        }
        Ok(v)
    }

    pub fn write_mem(&self, mmu: &mut MMU, loc: Location, w: Width, val: u32) -> Result<(), Exception> {
        self.check_access(loc, w.bytes(), true)?;
        let base = self.segment_base(loc.seg);
        for i in 0..w.bytes() {
            let addr = base.wrapping_add(loc.add(i).offset);
            mmu.write_u8(addr, (val >> (8 * i)) as u8);
        }
        Ok(())
    }

    /// reads an operand, truncated to `w`
    pub fn read_operand(&self, mmu: &mut MMU, op: Operand, w: Width) -> Result<u32, Exception> {
        match op {
            Operand::Register(r) => Ok(self.regs.get(r) & w.mask()),
            Operand::Memory(loc) => self.read_mem(mmu, loc, w),
            Operand::Immediate(v) => Ok(v & w.mask()),
            Operand::None => Err(Exception::UD),
        }
    }

    /// writes an operand. segment registers are never written here, see `load_segment`
    pub fn write_operand(&mut self, mmu: &mut MMU, op: Operand, w: Width, val: u32) -> Result<(), Exception> {
        match op {
            Operand::Register(r) => {
                debug_assert!(!r.is_sreg());
                self.regs.set(r, val & w.mask());
                Ok(())
            }
            Operand::Memory(loc) => self.write_mem(mmu, loc, w, val),
            Operand::Immediate(_) | Operand::None => Err(Exception::UD),
        }
    }

    fn stack_mask(&self) -> u32 {
        offset_mask(self.stack32())
    }

    pub fn stack_pointer(&self) -> u32 {
        self.regs.get_r32(R::ESP) & self.stack_mask()
    }

    pub fn set_stack_pointer(&mut self, v: u32) {
        if self.stack32() {
            self.regs.set_r32(R::ESP, v);
        } else {
            self.regs.set_r16(R::SP, v as u16);
        }
    }

    pub fn push(&mut self, mmu: &mut MMU, val: u32, w: Width) -> Result<(), Exception> {
        let sp = self.stack_pointer().wrapping_sub(w.bytes()) & self.stack_mask();
        let loc = Location::new(R::SS, sp, self.stack32());
        self.write_mem(mmu, loc, w, val)?;
        self.set_stack_pointer(sp);
        Ok(())
    }

    pub fn push16(&mut self, mmu: &mut MMU, val: u16) -> Result<(), Exception> {
        self.push(mmu, u32::from(val), Width::Word)
    }

    pub fn pop(&mut self, mmu: &mut MMU, w: Width) -> Result<u32, Exception> {
        let sp = self.stack_pointer();
        let loc = Location::new(R::SS, sp, self.stack32());
        let val = self.read_mem(mmu, loc, w)?;
        self.set_stack_pointer(sp.wrapping_add(w.bytes()) & self.stack_mask());
        Ok(val)
    }

    pub fn pop16(&mut self, mmu: &mut MMU) -> Result<u16, Exception> {
        Ok(self.pop(mmu, Width::Word)? as u16)
    }

    /// loads a segment register. protected mode selectors go through the GDT
    pub fn load_segment(&mut self, mmu: &mut MMU, sr: R, selector: u16) -> Result<(), Exception> {
        debug_assert!(sr.is_sreg());
        if !self.protected_mode() {
            self.set_r16(sr, selector);
            return Ok(());
        }

        if selector & 0xFFFC == 0 {
            if sr == R::SS || sr == R::CS {
                return Err(Exception::GP(0));
            }
            self.regs.set_r16(sr, selector);
            self.seg_cache[sr.index()] = SegmentDescriptor::default();
            return Ok(());
        }

        let code = selector & 0xFFFC;
        if selector & 7 != 0 {
            // only ring 0 GDT selectors are supported
            return Err(Exception::GP(code));
        }

        let entry = self.gdtr.entry_address(u32::from(selector)).ok_or(Exception::GP(code))?;
        let mut bytes = [0u8; 8];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = mmu.read_u8(entry.wrapping_add(i as u32));
        }
        let mut desc = SegmentDescriptor::from_bytes(&bytes);

        let type_ok = match sr {
            R::SS => desc.is_data() && desc.is_writable(),
            R::CS => desc.is_code(),
            _ => desc.is_data() || (desc.is_code() && desc.is_readable()),
        };
        if !type_ok {
            return Err(Exception::GP(code));
        }
        if !desc.is_present() {
            return Err(if sr == R::SS { Exception::SS(code) } else { Exception::NP(code) });
        }

        if desc.access & ACCESS_ACCESSED == 0 {
            desc.access |= ACCESS_ACCESSED;
            mmu.write_u8(entry.wrapping_add(5), desc.access);
        }
        debug!("load {} = {:04X}, base {:08X} limit {:08X}", sr, selector, desc.base, desc.limit);
        self.regs.set_r16(sr, selector);
        self.seg_cache[sr.index()] = desc;
        Ok(())
    }

    /// far control transfer target
    pub fn load_cs(&mut self, mmu: &mut MMU, selector: u16, eip: u32) -> Result<(), Exception> {
        self.load_segment(mmu, R::CS, selector)?;
        self.set_ip(eip);
        Ok(())
    }

    /// CPL 0 check for system instructions in protected mode
    pub fn require_privilege(&self) -> Result<(), Exception> {
        if self.cpl() == 0 {
            Ok(())
        } else {
            Err(Exception::GP(0))
        }
    }

    /// IF gates maskable interrupts; the shadow holds them for one instruction
    pub fn accepts_irq(&self) -> bool {
        self.regs.flags.interrupt && !self.interrupt_shadow
    }
}
