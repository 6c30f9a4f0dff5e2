use std::fs;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempdir::TempDir;

use crate::config::MachineConfig;
use crate::cpu::{CpuModel, CPU, CR0_PE, R};
use crate::error::Error;
use crate::machine::{Component, Machine};
use crate::memory::{MemoryAddress, MMU};

fn machine(model: CpuModel) -> Machine {
    Machine::new(&MachineConfig { cpu: model, ..MachineConfig::default() })
}

/// points interrupt vector `v` at 0000:`offset`
fn set_vector(m: &mut Machine, v: u8, offset: u16) {
    m.mmu.write_vec(0, v, MemoryAddress::new(0, offset));
}

/// reads the word at SS:SP + `delta`
fn stack_word(m: &mut Machine, delta: u16) -> u16 {
    let addr = m.cpu.segment_base(R::SS) + u32::from(m.cpu.get_r16(R::SP).wrapping_add(delta));
    m.mmu.read_u16(addr)
}

/// GDT with a flat data segment at 0008 and a code segment at 0010, and an empty IDT at 0x2000
fn protected_mode_tables(m: &mut Machine) {
    let gdt = [
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // null
        0xFF, 0xFF, 0x00, 0x00, 0x00, 0x92, 0x00, 0x00, // data
        0xFF, 0xFF, 0x00, 0x00, 0x00, 0x9A, 0x00, 0x00, // code
    ];
    m.mmu.write(0x1000, &gdt);
    m.cpu.gdtr.base = 0x1000;
    m.cpu.gdtr.limit = gdt.len() as u16 - 1;
    m.cpu.idtr.base = 0x2000;
    m.cpu.idtr.limit = 0x7FF;
}

/// 16-bit interrupt gate for vector `v` to 0010:`offset`
fn set_gate(m: &mut Machine, v: u8, offset: u16, dpl: u8) {
    let access = 0x86 | (dpl << 5);
    let gate = [offset as u8, (offset >> 8) as u8, 0x10, 0x00, 0x00, access, 0x00, 0x00];
    m.mmu.write(0x2000 + u32::from(v) * 8, &gate);
}

#[test]
fn can_handle_stack() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xB8, 0x88, 0x88, // mov ax,0x8888
        0x8E, 0xD8,       // mov ds,ax
        0x1E,             // push ds
        0x07,             // pop es
    ];
    m.load_com(&code).unwrap();

    m.execute_instructions(2);
    assert_eq!(0xFFFE, m.cpu.get_r16(R::SP));
    m.execute_instruction(); // push
    assert_eq!(0xFFFC, m.cpu.get_r16(R::SP));
    m.execute_instruction(); // pop
    assert_eq!(0xFFFE, m.cpu.get_r16(R::SP));

    assert_eq!(0x107, m.cpu.regs.eip);
    assert_eq!(0x8888, m.cpu.get_r16(R::AX));
    assert_eq!(0x8888, m.cpu.get_r16(R::DS));
    assert_eq!(0x8888, m.cpu.get_r16(R::ES));
}

#[test]
fn inc_al_wraps_to_zero() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xB8, 0xFF, 0x00, // mov ax,0xff
        0xFE, 0xC0,       // inc al
    ];
    m.load_com(&code).unwrap();
    m.execute_instructions(2);

    assert_eq!(0x00, m.cpu.get_r8(R::AL));
    assert_eq!(0x00, m.cpu.get_r8(R::AH));
    let f = m.cpu.regs.flags;
    assert_eq!(false, f.carry); // INC leaves CF alone
    assert_eq!(true, f.parity);
    assert_eq!(true, f.adjust);
    assert_eq!(true, f.zero);
    assert_eq!(false, f.sign);
    assert_eq!(false, f.overflow);
}

#[test]
fn add_word_memory_immediate_writes_back_in_place() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xBB, 0x00, 0x02,             // mov bx,0x200
        0x81, 0x47, 0x10, 0x34, 0x12, // add word [bx+0x10],0x1234
    ];
    m.load_com(&code).unwrap();
    let ds = m.cpu.segment_base(R::DS);
    m.mmu.write_u16(ds + 0x20E, 0xAAAA);
    m.mmu.write_u16(ds + 0x210, 0x0001);
    m.mmu.write_u16(ds + 0x212, 0xBBBB);
    m.execute_instructions(2);

    assert_eq!(0x108, m.cpu.regs.eip);
    assert_eq!(0x1235, m.mmu.read_u16(ds + 0x210));
    assert_eq!(0xAAAA, m.mmu.read_u16(ds + 0x20E));
    assert_eq!(0xBBBB, m.mmu.read_u16(ds + 0x212));
    assert_eq!(0x0200, m.cpu.get_r16(R::BX));
}

#[test]
fn inc_byte_bp_si_disp_uses_stack_segment() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xBD, 0x00, 0x03, // mov bp,0x300
        0xBE, 0x10, 0x00, // mov si,0x10
        0xFE, 0x42, 0x20, // inc byte [bp+si+0x20]
    ];
    m.load_com(&code).unwrap();
    m.cpu.set_r16(R::SS, 0x2000);
    let ds = m.cpu.segment_base(R::DS);
    m.mmu.write(0x2_032F, &[0x11, 0x7F, 0x22]);
    m.mmu.write_u8(ds + 0x330, 0x55);
    m.execute_instructions(3);

    assert_eq!(0x109, m.cpu.regs.eip);
    assert_eq!(0x80, m.mmu.read_u8(0x2_0330));
    assert_eq!(0x11, m.mmu.read_u8(0x2_032F));
    assert_eq!(0x22, m.mmu.read_u8(0x2_0331));
    assert_eq!(0x55, m.mmu.read_u8(ds + 0x330));
    assert_eq!(true, m.cpu.regs.flags.overflow);
    assert_eq!(true, m.cpu.regs.flags.sign);
}

#[test]
fn push_pop_round_trip() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xBB, 0x34, 0x12, // mov bx,0x1234
        0x53,             // push bx
        0x59,             // pop cx
        0x6A, 0xFE,       // push byte -0x2
        0x58,             // pop ax
    ];
    m.load_com(&code).unwrap();

    m.execute_instructions(3);
    assert_eq!(0x1234, m.cpu.get_r16(R::CX));
    assert_eq!(0xFFFE, m.cpu.get_r16(R::SP));
    assert_eq!(0x105, m.cpu.regs.eip);

    m.execute_instructions(2);
    assert_eq!(0xFFFE, m.cpu.get_r16(R::AX));
    assert_eq!(0xFFFE, m.cpu.get_r16(R::SP));
}

#[test]
fn aam_splits_decimal_digits() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xB0, 0x0F,       // mov al,0xf
        0xB4, 0x00,       // mov ah,0x0
        0xD4, 0x0A,       // aam
    ];
    m.load_com(&code).unwrap();
    m.execute_instructions(3);

    assert_eq!(0x01, m.cpu.get_r8(R::AH));
    assert_eq!(0x05, m.cpu.get_r8(R::AL));
    assert_eq!(false, m.cpu.regs.flags.zero);
    assert_eq!(true, m.cpu.regs.flags.parity);
    assert_eq!(false, m.cpu.regs.flags.sign);
}

#[test]
fn aam_with_zero_base_is_divide_error() {
    let mut m = machine(CpuModel::I80186);
    set_vector(&mut m, 0, 0x0500);
    let code: Vec<u8> = vec![
        0xD4, 0x00,       // aam 0x0
    ];
    m.load_com(&code).unwrap();
    m.execute_instruction();

    assert_eq!(0x0000, m.cpu.get_r16(R::CS));
    assert_eq!(0x0500, m.cpu.regs.eip);
    assert_eq!(0x0100, stack_word(&mut m, 0));
}

/// runs REPE CMPSB over 8 bytes at DS:0200 and ES:0300
fn repe_cmpsb(a: &[u8], b: &[u8]) -> Machine {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xBE, 0x00, 0x02, // mov si,0x200
        0xBF, 0x00, 0x03, // mov di,0x300
        0xB9, 0x08, 0x00, // mov cx,0x8
        0xFC,             // cld
        0xF3, 0xA6,       // repe cmpsb
    ];
    m.load_com(&code).unwrap();
    let base = m.cpu.segment_base(R::DS);
    m.mmu.write(base + 0x200, a);
    m.mmu.write(base + 0x300, b);
    m.execute_instructions(5);
    assert_eq!(0x10C, m.cpu.regs.eip);
    m
}

#[test]
fn repe_cmpsb_equal_buffers() {
    let data = [1, 2, 3, 4, 5, 6, 7, 8];
    let m = repe_cmpsb(&data, &data);
    assert_eq!(0, m.cpu.get_r16(R::CX));
    assert_eq!(true, m.cpu.regs.flags.zero);
    assert_eq!(0x208, m.cpu.get_r16(R::SI));
    assert_eq!(0x308, m.cpu.get_r16(R::DI));
}

#[test]
fn repe_cmpsb_stops_at_first_difference() {
    let a = [1, 2, 3, 4, 5, 6, 7, 8];
    let b = [1, 2, 3, 0, 5, 6, 7, 8];
    let m = repe_cmpsb(&a, &b);
    // k = 3: CX = len - k - 1, SI and DI advanced by k + 1
    assert_eq!(4, m.cpu.get_r16(R::CX));
    assert_eq!(false, m.cpu.regs.flags.zero);
    assert_eq!(0x204, m.cpu.get_r16(R::SI));
    assert_eq!(0x304, m.cpu.get_r16(R::DI));
}

#[test]
fn rep_stosw_fills_and_respects_direction() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xB8, 0xAA, 0x55, // mov ax,0x55aa
        0xBF, 0x06, 0x04, // mov di,0x406
        0xB9, 0x04, 0x00, // mov cx,0x4
        0xFD,             // std
        0xF3, 0xAB,       // rep stosw
    ];
    m.load_com(&code).unwrap();
    m.execute_instructions(5);

    let base = m.cpu.segment_base(R::ES);
    for i in 0..4 {
        assert_eq!(0x55AA, m.mmu.read_u16(base + 0x400 + i * 2));
    }
    assert_eq!(0x3FE, m.cpu.get_r16(R::DI));
    assert_eq!(0, m.cpu.get_r16(R::CX));
}

#[test]
fn div_by_zero_returns_to_faulting_instruction() {
    let mut m = machine(CpuModel::I80186);
    set_vector(&mut m, 0, 0x0500);
    let code: Vec<u8> = vec![
        0xB8, 0x01, 0x00, // mov ax,0x1
        0xBB, 0x00, 0x00, // mov bx,0x0
        0xF7, 0xF3,       // div bx
    ];
    m.load_com(&code).unwrap();
    m.cpu.regs.flags.interrupt = true;
    m.execute_instructions(3);

    assert_eq!(0x0000, m.cpu.get_r16(R::CS));
    assert_eq!(0x0500, m.cpu.regs.eip);
    assert_eq!(false, m.cpu.regs.flags.interrupt);
    assert_eq!(0xFFF8, m.cpu.get_r16(R::SP));
    assert_eq!(0x0106, stack_word(&mut m, 0)); // the DIV itself
    assert_eq!(0x085F, stack_word(&mut m, 2));
    assert_eq!(0x0200, stack_word(&mut m, 4) & 0x0200);
    assert_eq!(0x0001, m.cpu.get_r16(R::AX));
}

#[test]
fn idiv_quotient_overflow_is_divide_error() {
    let mut m = machine(CpuModel::I80186);
    set_vector(&mut m, 0, 0x0500);
    let code: Vec<u8> = vec![
        0xB8, 0x00, 0x80, // mov ax,0x8000
        0xB3, 0x01,       // mov bl,0x1
        0xF6, 0xFB,       // idiv bl
    ];
    m.load_com(&code).unwrap();
    m.execute_instructions(3);

    assert_eq!(0x0500, m.cpu.regs.eip);
    assert_eq!(0x0105, stack_word(&mut m, 0));
}

#[test]
fn protected_mode_selector_fault_is_delivered() {
    let mut m = machine(CpuModel::I80386);
    let gdt = [
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // null
        0xFF, 0xFF, 0x00, 0x00, 0x00, 0x92, 0x00, 0x00, // data
        0xFF, 0xFF, 0x00, 0x00, 0x00, 0x9A, 0x00, 0x00, // code
    ];
    m.mmu.write(0x1000, &gdt);
    m.cpu.gdtr.base = 0x1000;
    m.cpu.gdtr.limit = gdt.len() as u16 - 1;

    // 16-bit interrupt gate for #GP to 0010:0600
    let gate = [0x00, 0x06, 0x10, 0x00, 0x00, 0x86, 0x00, 0x00];
    m.mmu.write(0x2000 + 13 * 8, &gate);
    m.cpu.idtr.base = 0x2000;
    m.cpu.idtr.limit = 0x7FF;

    let code: Vec<u8> = vec![
        0xB8, 0x0B, 0x00, // mov ax,0xb
        0x8E, 0xD8,       // mov ds,ax
    ];
    m.load_com(&code).unwrap();
    m.cpu.regs.cr[0] |= CR0_PE;
    m.execute_instructions(2);

    assert_eq!(false, m.cpu.fatal_error);
    assert_eq!(0x0010, m.cpu.get_r16(R::CS));
    assert_eq!(0x0600, m.cpu.regs.eip);
    assert_eq!(0x085F, m.cpu.get_r16(R::DS));
    assert_eq!(0x0008, stack_word(&mut m, 0)); // error code
    assert_eq!(0x0103, stack_word(&mut m, 2)); // faulting instruction
    assert_eq!(0x085F, stack_word(&mut m, 4));
}

#[test]
fn fault_without_handler_shuts_down() {
    let mut m = machine(CpuModel::I80386);
    let code: Vec<u8> = vec![
        0xFE, 0x38,       // group 4 /7 is undefined
    ];
    m.load_com(&code).unwrap();
    m.cpu.idtr.limit = 0;
    m.cpu.regs.cr[0] |= CR0_PE;
    m.execute_instruction();

    assert_eq!(true, m.cpu.fatal_error);
    assert_eq!(0x0100, m.cpu.regs.eip);
    assert_eq!(0, m.run());
}

#[test]
fn invalid_opcode_raises_ud() {
    let mut m = machine(CpuModel::I80186);
    set_vector(&mut m, 6, 0x0900);
    let code: Vec<u8> = vec![
        0xFE, 0x38,       // group 4 /7 is undefined
    ];
    m.load_com(&code).unwrap();
    m.execute_instruction();

    assert_eq!(0x0900, m.cpu.regs.eip);
    assert_eq!(0x0100, stack_word(&mut m, 0));
}

#[test]
fn esc_raises_coprocessor_unavailable_after_operand() {
    let mut m = machine(CpuModel::I8086);
    set_vector(&mut m, 7, 0x0A00);
    let code: Vec<u8> = vec![
        0xD8, 0x06, 0x34, 0x12, // fadd dword [0x1234]
    ];
    m.load_com(&code).unwrap();
    m.execute_instruction();

    assert_eq!(0x0A00, m.cpu.regs.eip);
    assert_eq!(0x0104, stack_word(&mut m, 0));
}

#[test]
fn push_sp_differs_between_models() {
    let code: Vec<u8> = vec![
        0x54,             // push sp
    ];

    let mut m = machine(CpuModel::I8086);
    m.load_com(&code).unwrap();
    m.execute_instruction();
    assert_eq!(0xFFFC, m.cpu.get_r16(R::SP));
    assert_eq!(0xFFFC, stack_word(&mut m, 0));

    let mut m = machine(CpuModel::I80386);
    m.load_com(&code).unwrap();
    m.execute_instruction();
    assert_eq!(0xFFFC, m.cpu.get_r16(R::SP));
    assert_eq!(0xFFFE, stack_word(&mut m, 0));
}

#[test]
fn pusha_popa_round_trip() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xB8, 0x11, 0x11, // mov ax,0x1111
        0xBD, 0x66, 0x66, // mov bp,0x6666
        0x60,             // pusha
        0x31, 0xC0,       // xor ax,ax
        0x31, 0xED,       // xor bp,bp
        0x61,             // popa
    ];
    m.load_com(&code).unwrap();
    m.execute_instructions(3);
    assert_eq!(0xFFEE, m.cpu.get_r16(R::SP));
    assert_eq!(0xFFFE, stack_word(&mut m, 6)); // the original SP
    m.execute_instructions(3);
    assert_eq!(0x1111, m.cpu.get_r16(R::AX));
    assert_eq!(0x6666, m.cpu.get_r16(R::BP));
    assert_eq!(0xFFFE, m.cpu.get_r16(R::SP));
}

#[test]
fn popa_stack_fault_leaves_registers_untouched() {
    let mut m = machine(CpuModel::I80386);
    protected_mode_tables(&mut m);
    set_gate(&mut m, 12, 0x0600, 0);
    let code: Vec<u8> = vec![
        0x61,             // popa
    ];
    m.load_com(&code).unwrap();
    for (i, w) in [0xAAAAu16, 0xBBBB, 0xCCCC, 0xDDDD].iter().enumerate() {
        let addr = m.cpu.segment_base(R::SS) + 0xFFF0 + 2 * i as u32;
        m.mmu.write_u16(addr, *w);
    }
    m.cpu.set_r16(R::DI, 0x1111);
    m.cpu.set_r16(R::SI, 0x2222);
    m.cpu.set_r16(R::BP, 0x3333);
    m.cpu.set_r16(R::SP, 0xFFF0);
    // the fifth pop crosses the stack limit
    m.cpu.seg_cache[R::SS.index()].limit = 0xFFF7;
    m.cpu.regs.cr[0] |= CR0_PE;
    m.execute_instruction();

    assert_eq!(false, m.cpu.fatal_error);
    assert_eq!(0x0010, m.cpu.get_r16(R::CS));
    assert_eq!(0x0600, m.cpu.regs.eip);
    assert_eq!(0x1111, m.cpu.get_r16(R::DI));
    assert_eq!(0x2222, m.cpu.get_r16(R::SI));
    assert_eq!(0x3333, m.cpu.get_r16(R::BP));
    assert_eq!(0xFFE8, m.cpu.get_r16(R::SP));
    assert_eq!(0x0000, stack_word(&mut m, 0)); // error code
    assert_eq!(0x0100, stack_word(&mut m, 2)); // the POPA itself
}

#[test]
fn call_and_ret() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xE8, 0x03, 0x00, // call 0x106
        0x90,             // nop
        0x90,             // nop
        0x90,             // nop
        0xC3,             // ret
    ];
    m.load_com(&code).unwrap();

    m.execute_instruction();
    assert_eq!(0x106, m.cpu.regs.eip);
    assert_eq!(0x103, stack_word(&mut m, 0));
    m.execute_instruction();
    assert_eq!(0x103, m.cpu.regs.eip);
    assert_eq!(0xFFFE, m.cpu.get_r16(R::SP));
}

#[test]
fn loop_counts_down_cx() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xB9, 0x03, 0x00, // mov cx,0x3
        0x40,             // inc ax
        0xE2, 0xFD,       // loop 0x103
    ];
    m.load_com(&code).unwrap();
    m.execute_instructions(7);

    assert_eq!(3, m.cpu.get_r16(R::AX));
    assert_eq!(0, m.cpu.get_r16(R::CX));
    assert_eq!(0x106, m.cpu.regs.eip);
}

#[test]
fn enter_and_leave_build_frame() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xC8, 0x10, 0x00, 0x00, // enter 0x10,0x0
        0xC9,                   // leave
    ];
    m.load_com(&code).unwrap();
    m.cpu.set_r16(R::BP, 0x1234);

    m.execute_instruction();
    assert_eq!(0xFFFC, m.cpu.get_r16(R::BP));
    assert_eq!(0xFFEC, m.cpu.get_r16(R::SP));
    m.execute_instruction();
    assert_eq!(0x1234, m.cpu.get_r16(R::BP));
    assert_eq!(0xFFFE, m.cpu.get_r16(R::SP));
}

#[test]
fn bound_raises_br_outside_range() {
    let mut m = machine(CpuModel::I80186);
    set_vector(&mut m, 5, 0x0500);
    let code: Vec<u8> = vec![
        0xB8, 0x05, 0x00,       // mov ax,0x5
        0x62, 0x06, 0x00, 0x02, // bound ax,[0x200]
        0xB8, 0x0B, 0x00,       // mov ax,0xb
        0x62, 0x06, 0x00, 0x02, // bound ax,[0x200]
    ];
    m.load_com(&code).unwrap();
    let base = m.cpu.segment_base(R::DS);
    m.mmu.write_u16(base + 0x200, 0x0000);
    m.mmu.write_u16(base + 0x202, 0x000A);

    m.execute_instructions(2);
    assert_eq!(0x107, m.cpu.regs.eip);
    m.execute_instructions(2);
    assert_eq!(0x0500, m.cpu.regs.eip);
    assert_eq!(0x10A, stack_word(&mut m, 0));
}

#[test]
fn trap_flag_delivers_single_step() {
    let mut m = machine(CpuModel::I80186);
    set_vector(&mut m, 1, 0x0800);
    let code: Vec<u8> = vec![
        0x90,             // nop
    ];
    m.load_com(&code).unwrap();
    m.cpu.regs.flags.trap = true;
    m.execute_instruction();

    assert_eq!(0x0800, m.cpu.regs.eip);
    assert_eq!(false, m.cpu.regs.flags.trap);
    assert_eq!(0x0101, stack_word(&mut m, 0));
    assert_eq!(0x0100, stack_word(&mut m, 4) & 0x0100);
}

#[test]
fn trap_flag_steps_into_trap_handlers() {
    let cases: Vec<(Vec<u8>, u8, u16)> = vec![
        (vec![0xCC], 3, 0x0101),                   // int3
        (vec![0xCD, 0x03], 3, 0x0102),             // int 0x3
        (vec![0xCE], 4, 0x0101),                   // into
        (vec![0xD8, 0x06, 0x34, 0x12], 7, 0x0104), // fadd dword [0x1234]
    ];
    for (code, vector, ret) in cases {
        let mut m = machine(CpuModel::I80186);
        set_vector(&mut m, 1, 0x0600);
        set_vector(&mut m, vector, 0x0500);
        m.load_com(&code).unwrap();
        m.cpu.regs.flags.overflow = true;
        m.cpu.regs.flags.trap = true;
        m.execute_instruction();

        // the single step lands on the first handler instruction
        assert_eq!(0x0000, m.cpu.get_r16(R::CS));
        assert_eq!(0x0600, m.cpu.regs.eip);
        assert_eq!(false, m.cpu.regs.flags.trap);
        assert_eq!(0x0500, stack_word(&mut m, 0));
        assert_eq!(0x0000, stack_word(&mut m, 2));
        assert_eq!(0x0000, stack_word(&mut m, 4) & 0x0100);
        assert_eq!(ret, stack_word(&mut m, 6));
        assert_eq!(0x085F, stack_word(&mut m, 8));
        assert_eq!(0x0100, stack_word(&mut m, 10) & 0x0100);
    }
}

#[test]
fn int3_honors_gate_privilege() {
    let mut m = machine(CpuModel::I80386);
    protected_mode_tables(&mut m);
    set_gate(&mut m, 3, 0x0500, 0);
    set_gate(&mut m, 13, 0x0600, 0);
    let code: Vec<u8> = vec![
        0xCC,             // int3
    ];
    m.load_com(&code).unwrap();
    m.cpu.regs.cr[0] |= CR0_PE;
    // CS 085F runs at CPL 3
    m.execute_instruction();

    assert_eq!(false, m.cpu.fatal_error);
    assert_eq!(0x0010, m.cpu.get_r16(R::CS));
    assert_eq!(0x0600, m.cpu.regs.eip);
    assert_eq!(0x001A, stack_word(&mut m, 0)); // IDT entry 3
    assert_eq!(0x0100, stack_word(&mut m, 2)); // the INT3 itself

    let mut m = machine(CpuModel::I80386);
    protected_mode_tables(&mut m);
    set_gate(&mut m, 3, 0x0500, 3);
    set_gate(&mut m, 13, 0x0600, 0);
    m.load_com(&code).unwrap();
    m.cpu.regs.cr[0] |= CR0_PE;
    m.execute_instruction();

    assert_eq!(0x0010, m.cpu.get_r16(R::CS));
    assert_eq!(0x0500, m.cpu.regs.eip);
    assert_eq!(0x0101, stack_word(&mut m, 0));
}

#[test]
fn irq_waits_for_interrupt_shadow() {
    let mut m = machine(CpuModel::I80186);
    set_vector(&mut m, 0x09, 0x0700);
    let code: Vec<u8> = vec![
        0xFB,             // sti
        0x90,             // nop
        0x90,             // nop
    ];
    m.load_com(&code).unwrap();
    m.irq_handle().raise(1);

    m.step();
    assert_eq!(0x101, m.cpu.regs.eip);
    m.step();
    assert_eq!(0x0700, m.cpu.regs.eip);
    assert_eq!(0x0102, stack_word(&mut m, 0));
    assert_eq!(false, m.irq_handle().is_pending());
}

#[test]
fn irq_is_masked_by_interrupt_flag() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0x90,             // nop
        0x90,             // nop
    ];
    m.load_com(&code).unwrap();
    m.irq_handle().raise(3);
    m.execute_instructions(2);

    assert_eq!(0x102, m.cpu.regs.eip);
    assert_eq!(true, m.irq_handle().is_pending());
}

#[test]
fn timer_tick_raises_irq0() {
    let mut m = Machine::new(&MachineConfig { instructions_per_tick: 2, ..MachineConfig::default() });
    set_vector(&mut m, 0x08, 0x0700);
    let code: Vec<u8> = vec![
        0xFB,             // sti
        0x90,             // nop
        0x90,             // nop
    ];
    m.load_com(&code).unwrap();
    m.execute_instructions(2);

    assert_eq!(0x0700, m.cpu.regs.eip);
    assert_eq!(0x0102, stack_word(&mut m, 0));
}

#[test]
fn hlt_resumes_on_irq() {
    let mut m = machine(CpuModel::I80186);
    set_vector(&mut m, 0x09, 0x0700);
    let code: Vec<u8> = vec![
        0xFB,             // sti
        0xF4,             // hlt
        0x90,             // nop
    ];
    m.load_com(&code).unwrap();
    m.execute_instructions(4);
    assert_eq!(true, m.cpu.halted);
    assert_eq!(0x102, m.cpu.regs.eip);
    assert_eq!(2, m.cpu.instruction_count);

    m.irq_handle().raise(1);
    m.step();
    assert_eq!(false, m.cpu.halted);
    assert_eq!(0x0700, m.cpu.regs.eip);
    assert_eq!(0x0102, stack_word(&mut m, 0));
}

#[test]
fn hlt_with_interrupts_disabled_is_fatal() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xF4,             // hlt
    ];
    m.load_com(&code).unwrap();
    m.execute_instruction();
    assert_eq!(true, m.cpu.fatal_error);
}

#[test]
fn iret_restores_flags() {
    let mut m = machine(CpuModel::I80186);
    set_vector(&mut m, 0x21, 0x0700);
    m.mmu.write_u8(0x0700, 0xCF); // iret
    let code: Vec<u8> = vec![
        0xF9,             // stc
        0xCD, 0x21,       // int 0x21
        0x90,             // nop
    ];
    m.load_com(&code).unwrap();
    m.cpu.regs.flags.interrupt = true;
    m.execute_instructions(2);
    assert_eq!(0x0700, m.cpu.regs.eip);
    assert_eq!(false, m.cpu.regs.flags.interrupt);

    m.execute_instruction();
    assert_eq!(0x085F, m.cpu.get_r16(R::CS));
    assert_eq!(0x0103, m.cpu.regs.eip);
    assert_eq!(true, m.cpu.regs.flags.interrupt);
    assert_eq!(true, m.cpu.regs.flags.carry);
    assert_eq!(0xFFFE, m.cpu.get_r16(R::SP));
}

struct Dos {
    calls: usize,
}

impl Component for Dos {
    fn in_u8(&mut self, port: u16) -> Option<u8> {
        match port {
            0x0060 => Some(0x1C),
            _ => None,
        }
    }

    fn int(&mut self, int: u8, cpu: &mut CPU, _mmu: &mut MMU) -> bool {
        if int != 0x21 {
            return false;
        }
        self.calls += 1;
        cpu.set_r16(R::AX, 0x4C00);
        true
    }
}

#[test]
fn component_services_int_and_ports() {
    let mut m = machine(CpuModel::I80186);
    m.add_component(Box::new(Dos { calls: 0 }));
    let code: Vec<u8> = vec![
        0xCD, 0x21,       // int 0x21
        0xE4, 0x60,       // in al,0x60
        0xE4, 0x61,       // in al,0x61
    ];
    m.load_com(&code).unwrap();

    m.execute_instruction();
    assert_eq!(0x4C00, m.cpu.get_r16(R::AX));
    assert_eq!(0x102, m.cpu.regs.eip);
    assert_eq!(0xFFFE, m.cpu.get_r16(R::SP));

    m.execute_instruction();
    assert_eq!(0x4C1C, m.cpu.get_r16(R::AX));
    m.execute_instruction();
    assert_eq!(0x4CFF, m.cpu.get_r16(R::AX));
}

#[test]
fn executes_32bit_operands() {
    let mut m = machine(CpuModel::I80386);
    let code: Vec<u8> = vec![
        0x66, 0xB8, 0x78, 0x56, 0x34, 0x12, // mov eax,0x12345678
        0x66, 0xC1, 0xC0, 0x08,             // rol eax,byte 0x8
        0x66, 0x0F, 0xB6, 0xD8,             // movzx ebx,al
        0x66, 0x0F, 0xBF, 0xC8,             // movsx ecx,ax
    ];
    m.load_com(&code).unwrap();
    m.execute_instructions(4);

    assert_eq!(0x3456_7812, m.cpu.get_r32(R::EAX));
    assert_eq!(0x0000_0012, m.cpu.get_r32(R::EBX));
    assert_eq!(0x0000_7812, m.cpu.get_r32(R::ECX));
}

#[test]
fn bit_test_and_scan() {
    let mut m = machine(CpuModel::I80386);
    let code: Vec<u8> = vec![
        0xB8, 0x10, 0x00,       // mov ax,0x10
        0x0F, 0xBA, 0xE8, 0x04, // bts ax,0x4
        0x0F, 0xBA, 0xF0, 0x01, // btr ax,0x1
        0x0F, 0xBC, 0xD8,       // bsf bx,ax
        0x31, 0xC9,             // xor cx,cx
        0x0F, 0xBD, 0xD1,       // bsr dx,cx
    ];
    m.load_com(&code).unwrap();

    m.execute_instructions(2);
    assert_eq!(true, m.cpu.regs.flags.carry);
    m.execute_instruction();
    assert_eq!(false, m.cpu.regs.flags.carry);
    m.execute_instruction();
    assert_eq!(4, m.cpu.get_r16(R::BX));
    assert_eq!(false, m.cpu.regs.flags.zero);
    m.cpu.set_r16(R::DX, 0xBEEF);
    m.execute_instructions(2);
    assert_eq!(true, m.cpu.regs.flags.zero);
    assert_eq!(0xBEEF, m.cpu.get_r16(R::DX));
}

#[test]
fn run_stops_on_exit_request() {
    let mut m = machine(CpuModel::I80186);
    let code: Vec<u8> = vec![
        0xEB, 0xFE,       // jmp short 0x100
    ];
    m.load_com(&code).unwrap();

    let exit = m.exit_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        exit.request();
    });
    let count = m.run();
    stopper.join().unwrap();

    assert!(count > 0);
    assert_eq!(0x100, m.cpu.regs.eip);
}

#[test]
fn load_image_rejects_oversized_image() {
    let mut m = Machine::new(&MachineConfig { memory_kb: 64, ..MachineConfig::default() });
    let data = vec![0u8; 0x2_0000];
    match m.load_image(&data, 0x1000, 0) {
        Err(Error::ImageTooLarge(len, addr)) => {
            assert_eq!(0x2_0000, len);
            assert_eq!(0x1_0000, addr);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn writes_instruction_trace() {
    let dir = TempDir::new("emu86").unwrap();
    let path = dir.path().join("trace.log");
    let config = MachineConfig { trace: Some(path.to_string_lossy().into_owned()), ..MachineConfig::default() };
    let mut m = Machine::from_config(&config).unwrap();
    let code: Vec<u8> = vec![
        0xB8, 0x34, 0x12, // mov ax,0x1234
        0x90,             // nop
    ];
    m.load_com(&code).unwrap();
    m.execute_instructions(2);
    m.flush_trace().unwrap();

    let trace = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = trace.lines().collect();
    assert_eq!(2, lines.len());
    assert!(lines[0].starts_with("085F:00000100  Mov      ax, 0x1234"));
    assert!(lines[1].contains("EAX:00001234"));
}
