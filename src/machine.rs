use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread;

use crate::config::MachineConfig;
use crate::cpu::{Instruction, Op, Operand, Parameter, RegisterState, RepeatMode, Snapshot, Width, CPU, R};
use crate::error::Error;
use crate::interrupt::{irq_vector, Exception, ExitHandle, IrqHandle};
use crate::memory::MMU;
use crate::string::{hex_bytes, right_pad};

mod arith;
mod control;
mod data;
mod string;
mod system;

#[cfg(test)]
#[path = "./machine_test.rs"]
mod machine_test;

/// a device or service collaborator: I/O ports and native software interrupt handlers
pub trait Component {
    /// reads a byte from `port`, None if the port is not handled by this component
    fn in_u8(&mut self, _port: u16) -> Option<u8> {
        None
    }

    fn in_u16(&mut self, _port: u16) -> Option<u16> {
        None
    }

    /// writes a byte to `port`, returns false if the port is not handled by this component
    fn out_u8(&mut self, _port: u16, _data: u8) -> bool {
        false
    }

    fn out_u16(&mut self, _port: u16, _data: u16) -> bool {
        false
    }

    /// services software interrupt `int` natively instead of through the vector table.
    /// returns true if handled
    fn int(&mut self, _int: u8, _cpu: &mut CPU, _mmu: &mut MMU) -> bool {
        false
    }
}

pub struct Machine {
    pub cpu: CPU,
    pub mmu: MMU,
    components: Vec<Box<dyn Component>>,
    irq: IrqHandle,
    exit: ExitHandle,
    instructions_per_tick: usize,
    tick_countdown: usize,
    irq_base_master: u8,
    irq_base_slave: u8,
    tracer: Option<BufWriter<File>>,
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new(&MachineConfig::default())
    }
}

impl Machine {
    pub fn new(config: &MachineConfig) -> Self {
        let mut mmu = MMU::new(config.memory_kb as usize * 1024);
        mmu.set_a20(config.a20_enabled);
        let instructions_per_tick = config.instructions_per_tick.max(1);
        Machine {
            cpu: CPU::new(config.cpu),
            mmu,
            components: Vec::new(),
            irq: IrqHandle::new(),
            exit: ExitHandle::new(),
            instructions_per_tick,
            tick_countdown: instructions_per_tick,
            irq_base_master: config.irq_base_master,
            irq_base_slave: config.irq_base_slave,
            tracer: None,
        }
    }

    /// creates a machine, opening the trace file if one is configured
    pub fn from_config(config: &MachineConfig) -> Result<Self, Error> {
        let mut machine = Machine::new(config);
        if let Some(path) = &config.trace {
            machine.write_trace_to(path)?;
        }
        Ok(machine)
    }

    pub fn add_component(&mut self, component: Box<dyn Component>) {
        self.components.push(component);
    }

    /// handle for raising IRQ lines, possibly from another thread
    pub fn irq_handle(&self) -> IrqHandle {
        self.irq.clone()
    }

    /// handle for stopping `run` from another thread
    pub fn exit_handle(&self) -> ExitHandle {
        self.exit.clone()
    }

    /// copies `data` to `segment:offset` and points CS:IP at it
    pub fn load_image(&mut self, data: &[u8], segment: u16, offset: u16) -> Result<(), Error> {
        let addr = (u32::from(segment) << 4) + u32::from(offset);
        if addr as usize + data.len() > self.mmu.memory.len() {
            return Err(Error::ImageTooLarge(data.len(), addr));
        }
        self.mmu.write(addr, data);
        self.cpu.set_r16(R::CS, segment);
        self.cpu.regs.eip = u32::from(offset);
        Ok(())
    }

    /// loads a .com style program into CS:0100 and sets up the segment registers and stack
    pub fn load_com(&mut self, data: &[u8]) -> Result<(), Error> {
        // CS,DS,ES,SS = PSP segment
        let psp_segment = 0x085F; // is what dosbox used
        self.load_image(data, psp_segment, 0x0100)?;
        self.cpu.set_r16(R::DS, psp_segment);
        self.cpu.set_r16(R::ES, psp_segment);
        self.cpu.set_r16(R::SS, psp_segment);

        // offset of last word available in first 64k segment
        self.cpu.set_r16(R::SP, 0xFFFE);
        Ok(())
    }

    /// returns a copy of register values at a given time
    pub fn register_snapshot(&self) -> RegisterState {
        self.cpu.regs.clone()
    }

    /// writes one line per executed instruction to `path`
    pub fn write_trace_to<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let file = File::create(path)?;
        self.tracer = Some(BufWriter::new(file));
        Ok(())
    }

    /// flushes the instruction trace, if any
    pub fn flush_trace(&mut self) -> Result<(), Error> {
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.flush()?;
        }
        Ok(())
    }

    /// runs until an exit is requested or the machine hits a fatal error.
    /// returns the number of executed instructions
    pub fn run(&mut self) -> usize {
        let start = self.cpu.instruction_count;
        while !self.exit.is_requested() && !self.cpu.fatal_error {
            self.step();
            if self.cpu.halted && !self.irq.is_pending() {
                thread::yield_now();
            }
        }
        self.cpu.instruction_count - start
    }

    /// executes n loop iterations. used by the frontend --count option, benches and tests
    pub fn execute_instructions(&mut self, count: usize) {
        for _ in 0..count {
            if self.cpu.fatal_error {
                break;
            }
            self.step();
        }
    }

    /// one iteration of the execution loop: an instruction (unless halted), the timer tick and IRQ delivery
    pub fn step(&mut self) {
        if !self.cpu.halted {
            self.execute_instruction();
        }
        self.tick();
        self.service_irq();
    }

    fn tick(&mut self) {
        self.tick_countdown -= 1;
        if self.tick_countdown == 0 {
            self.tick_countdown = self.instructions_per_tick;
            self.irq.raise(0);
        }
    }

    fn service_irq(&mut self) {
        if !self.irq.is_pending() || !self.cpu.accepts_irq() {
            return;
        }
        if let Some(line) = self.irq.take_highest() {
            let vector = irq_vector(line, self.irq_base_master, self.irq_base_slave);
            self.cpu.halted = false;
            let snapshot = self.cpu.snapshot();
            if let Err(e) = self.interrupt(vector, None, false) {
                self.cpu.restore(&snapshot);
                self.deliver_exception(e, &snapshot);
            }
        }
    }

    /// fetches, decodes and executes the instruction at CS:EIP, then delivers any
    /// exception it raised and the single step trap
    pub fn execute_instruction(&mut self) {
        let snapshot = self.cpu.snapshot();
        let op = self.cpu.decode_current(&mut self.mmu);
        trace!("[{:04X}:{:04X}] {}", snapshot.cs, snapshot.eip, op);
        if self.tracer.is_some() {
            self.trace_instruction(&snapshot, &op);
        }

        let single_step = self.cpu.regs.flags.trap;
        self.cpu.interrupt_shadow = false;
        self.cpu.set_ip(snapshot.eip.wrapping_add(u32::from(op.length)));
        self.cpu.instruction_count += 1;
        self.cpu.cycle_count += 1;

        let res = if op.repeat == RepeatMode::None {
            self.execute(&op)
        } else {
            self.execute_repeated(&op)
        };
        match res {
            Ok(()) => {
                if single_step {
                    let after = self.cpu.snapshot();
                    self.deliver_exception(Exception::DB, &after);
                }
            }
            Err(e) => {
                if !e.is_trap() {
                    self.cpu.restore(&snapshot);
                }
                // a trap completes the instruction, so a pending single step follows it
                if self.deliver_exception(e, &snapshot) && e.is_trap() && single_step {
                    let after = self.cpu.snapshot();
                    self.deliver_exception(Exception::DB, &after);
                }
            }
        }
    }

    /// delivers `e`, escalating to a double fault and then to shutdown.
    /// returns true if the handler for `e` itself was entered
    fn deliver_exception(&mut self, e: Exception, snapshot: &Snapshot) -> bool {
        debug!("{} at {:04X}:{:04X}", e, snapshot.cs, snapshot.eip);
        // INT3 and INTO are gated like INT n
        let software = e == Exception::BP || e == Exception::OF;
        let second = match self.interrupt(e.vector(), e.error_code(), software) {
            Ok(()) => return true,
            Err(second) => second,
        };
        if e == Exception::DF {
            self.shutdown(&format!("{} while delivering double fault", second));
            return false;
        }
        if software {
            debug!("{} refused {}, faulting the instruction", second, e);
            self.cpu.restore(snapshot);
            self.deliver_exception(second, snapshot);
            return false;
        }
        debug!("{} while delivering {}, raising double fault", second, e);
        self.cpu.restore(snapshot);
        if let Err(third) = self.interrupt(Exception::DF.vector(), Exception::DF.error_code(), false) {
            self.shutdown(&format!("{} while delivering double fault", third));
        }
        false
    }

    fn shutdown(&mut self, reason: &str) {
        error!("shutdown at {:04X}:{:04X}: {}", self.cpu.get_r16(R::CS), self.cpu.regs.eip, reason);
        self.cpu.fatal_error = true;
    }

    fn trace_instruction(&mut self, s: &Snapshot, op: &Instruction) {
        let r = &self.cpu.regs;
        let line = format!(
            "{:04X}:{:08X}  {} EAX:{:08X} EBX:{:08X} ECX:{:08X} EDX:{:08X} ESI:{:08X} EDI:{:08X} EBP:{:08X} ESP:{:08X} DS:{:04X} ES:{:04X} FS:{:04X} GS:{:04X} SS:{:04X} C{} Z{} S{} O{} I{}",
            s.cs,
            s.eip,
            right_pad(&op.to_string(), 30),
            r.get_r32(R::EAX),
            r.get_r32(R::EBX),
            r.get_r32(R::ECX),
            r.get_r32(R::EDX),
            r.get_r32(R::ESI),
            r.get_r32(R::EDI),
            r.get_r32(R::EBP),
            r.get_r32(R::ESP),
            r.get_r16(R::DS),
            r.get_r16(R::ES),
            r.get_r16(R::FS),
            r.get_r16(R::GS),
            r.get_r16(R::SS),
            r.flags.carry as u8,
            r.flags.zero as u8,
            r.flags.sign as u8,
            r.flags.overflow as u8,
            r.flags.interrupt as u8,
        );
        let failed = match self.tracer.as_mut() {
            Some(tracer) => writeln!(tracer, "{}", line).is_err(),
            None => false,
        };
        if failed {
            warn!("instruction trace write failed, tracing disabled");
            self.tracer = None;
        }
    }

    fn execute(&mut self, op: &Instruction) -> Result<(), Exception> {
        match op.command {
            Op::Alu(kind) => self.alu_op(op, kind),
            Op::Shift(kind) => self.shift_op(op, kind),
            Op::Aaa | Op::Aas | Op::Daa | Op::Das => self.bcd_adjust(op),
            Op::Aam => self.aam(op),
            Op::Aad => self.aad(op),
            Op::Arpl => self.arpl(op),
            Op::Bound => self.bound(op),
            Op::Bsf | Op::Bsr => self.bit_scan(op),
            Op::Bt | Op::Btc | Op::Btr | Op::Bts => self.bit_test(op),
            Op::CallNear => self.call_near(op),
            Op::CallFar => self.call_far(op),
            Op::Cbw => self.cbw(op),
            Op::Cwd => self.cwd(op),
            Op::Clc | Op::Cld | Op::Cli | Op::Cmc | Op::Stc | Op::Std | Op::Sti => self.flag_op(op),
            Op::Clts => self.clts(),
            Op::Cmps | Op::Ins | Op::Lods | Op::Movs | Op::Outs | Op::Scas | Op::Stos => self.string_op(op),
            Op::Dec | Op::Inc | Op::Neg | Op::Not => self.unary(op),
            Op::Div | Op::Idiv => self.divide(op),
            Op::Mul | Op::Imul => self.multiply(op),
            Op::ImulTrunc => self.imul_trunc(op),
            Op::Enter => self.enter(op),
            Op::Leave => self.leave(op),
            Op::Esc => Err(Exception::NM),
            Op::Hlt => self.hlt(),
            Op::In => self.in_op(op),
            Op::Out => self.out_op(op),
            Op::Int => self.int(op),
            Op::Int3 => Err(Exception::BP),
            Op::Into => {
                if self.cpu.regs.flags.overflow {
                    Err(Exception::OF)
                } else {
                    Ok(())
                }
            }
            Op::Iret => self.iret(op.op_size),
            Op::Jcc(cond) => {
                if cond.test(&self.cpu.regs.flags) {
                    self.jmp_near(op)
                } else {
                    Ok(())
                }
            }
            Op::Jcxz | Op::Loop | Op::Loope | Op::Loopne => self.loop_op(op),
            Op::JmpNear => self.jmp_near(op),
            Op::JmpFar => self.jmp_far(op),
            Op::Lahf => self.lahf(),
            Op::Sahf => self.sahf(),
            Op::Lds | Op::Les | Op::Lfs | Op::Lgs | Op::Lss => self.load_far_pointer(op),
            Op::Lea => self.lea(op),
            Op::Lgdt | Op::Lidt => self.load_table_register(op),
            Op::Sgdt | Op::Sidt => self.store_table_register(op),
            Op::Lldt | Op::Ltr => self.load_system_selector(op),
            Op::Sldt | Op::Str => self.store_system_selector(op),
            Op::Lmsw => self.lmsw(op),
            Op::Smsw => self.smsw(op),
            Op::Mov => self.mov(op),
            Op::Movsx | Op::Movzx => self.mov_extend(op),
            Op::Nop | Op::Wait => Ok(()),
            Op::Pop => self.pop_op(op),
            Op::Popa => self.popa(op),
            Op::Popf => self.popf(op),
            Op::Push => self.push_op(op),
            Op::Pusha => self.pusha(op),
            Op::Pushf => self.pushf(op),
            Op::Retf => self.retf(op),
            Op::Retn => self.retn(op),
            Op::Salc => {
                let al = if self.cpu.regs.flags.carry { 0xFF } else { 0 };
                self.cpu.set_r8(R::AL, al);
                Ok(())
            }
            Op::Setcc(cond) => self.setcc(op, cond),
            Op::Shld | Op::Shrd => self.double_shift(op),
            Op::Test => self.test(op),
            Op::Xchg => self.xchg(op),
            Op::Xlat => self.xlat(op),
            Op::Invalid(ref bytes, ref reason) => {
                error!(
                    "[{:04X}:{:04X}] invalid opcode {} ({:?})",
                    self.cpu.get_r16(R::CS),
                    self.cpu.regs.eip.wrapping_sub(u32::from(op.length)),
                    hex_bytes(bytes),
                    reason
                );
                Err(Exception::UD)
            }
        }
    }

    fn operand(&self, op: &Instruction, p: &Parameter) -> Operand {
        self.cpu.resolve(p, op.address_size)
    }

    fn read(&mut self, o: Operand, w: Width) -> Result<u32, Exception> {
        self.cpu.read_operand(&mut self.mmu, o, w)
    }

    fn write(&mut self, o: Operand, w: Width, val: u32) -> Result<(), Exception> {
        self.cpu.write_operand(&mut self.mmu, o, w, val)
    }

    fn push(&mut self, val: u32, w: Width) -> Result<(), Exception> {
        self.cpu.push(&mut self.mmu, val, w)
    }

    fn pop(&mut self, w: Width) -> Result<u32, Exception> {
        self.cpu.pop(&mut self.mmu, w)
    }

    /// reads a byte from an I/O port. unhandled ports float high
    pub fn in_u8(&mut self, port: u16) -> u8 {
        for component in &mut self.components {
            if let Some(v) = component.in_u8(port) {
                return v;
            }
        }
        warn!("in_u8: unhandled port {:04X}", port);
        0xFF
    }

    pub fn in_u16(&mut self, port: u16) -> u16 {
        for component in &mut self.components {
            if let Some(v) = component.in_u16(port) {
                return v;
            }
        }
        let lo = self.in_u8(port);
        let hi = self.in_u8(port.wrapping_add(1));
        u16::from(hi) << 8 | u16::from(lo)
    }

    pub fn out_u8(&mut self, port: u16, data: u8) {
        for component in &mut self.components {
            if component.out_u8(port, data) {
                return;
            }
        }
        warn!("out_u8: unhandled port {:04X} = {:02X}", port, data);
    }

    pub fn out_u16(&mut self, port: u16, data: u16) {
        for component in &mut self.components {
            if component.out_u16(port, data) {
                return;
            }
        }
        self.out_u8(port, data as u8);
        self.out_u8(port.wrapping_add(1), (data >> 8) as u8);
    }

    fn in_port(&mut self, port: u16, w: Width) -> u32 {
        match w {
            Width::Byte => u32::from(self.in_u8(port)),
            Width::Word => u32::from(self.in_u16(port)),
            Width::Dword => {
                let lo = self.in_u16(port);
                let hi = self.in_u16(port.wrapping_add(2));
                u32::from(hi) << 16 | u32::from(lo)
            }
        }
    }

    fn out_port(&mut self, port: u16, w: Width, val: u32) {
        match w {
            Width::Byte => self.out_u8(port, val as u8),
            Width::Word => self.out_u16(port, val as u16),
            Width::Dword => {
                self.out_u16(port, val as u16);
                self.out_u16(port.wrapping_add(2), (val >> 16) as u16);
            }
        }
    }
}
