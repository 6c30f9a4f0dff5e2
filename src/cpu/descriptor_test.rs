use pretty_assertions::assert_eq;

use crate::cpu::{DescriptorTable, GateDescriptor, GateKind, SegmentDescriptor};

/// builds the 8 bytes of a code/data descriptor
fn encode(base: u32, limit: u32, access: u8, flags: u8) -> [u8; 8] {
    [
        limit as u8,
        (limit >> 8) as u8,
        base as u8,
        (base >> 8) as u8,
        (base >> 16) as u8,
        access,
        (flags & 0xF0) | ((limit >> 16) as u8 & 0x0F),
        (base >> 24) as u8,
    ]
}

#[test]
fn decodes_flat_code_descriptor() {
    let d = SegmentDescriptor::from_bytes(&encode(0, 0xF_FFFF, 0x9A, 0xC0));
    assert_eq!(0, d.base);
    assert_eq!(0xFFFF_FFFF, d.limit);
    assert_eq!(true, d.big);
    assert_eq!(true, d.is_present());
    assert_eq!(true, d.is_code());
    assert_eq!(true, d.is_readable());
    assert_eq!(false, d.is_writable());
    assert_eq!(0, d.dpl());
}

#[test]
fn decodes_split_base_and_byte_granular_limit() {
    let d = SegmentDescriptor::from_bytes(&encode(0x1234_5678, 0x0_FFFF, 0xF2, 0x00));
    assert_eq!(0x1234_5678, d.base);
    assert_eq!(0xFFFF, d.limit);
    assert_eq!(false, d.big);
    assert_eq!(true, d.is_writable());
    assert_eq!(3, d.dpl());
    assert_eq!(true, d.contains(0xFFFE, 2));
    assert_eq!(false, d.contains(0xFFFF, 2));
}

#[test]
fn expand_down_limits() {
    let d = SegmentDescriptor::from_bytes(&encode(0, 0x0FFF, 0x96, 0x00));
    assert_eq!(true, d.is_expand_down());
    assert_eq!(false, d.contains(0x0FFF, 1));
    assert_eq!(true, d.contains(0x1000, 2));
    assert_eq!(false, d.contains(0xFFFF, 2));
}

#[test]
fn system_descriptors() {
    let d = SegmentDescriptor::from_bytes(&encode(0x2000, 0x67, 0x89, 0x00));
    assert_eq!(true, d.is_system());
    assert_eq!(0x09, d.system_type());
    assert_eq!(false, d.is_code());
    assert_eq!(false, d.is_data());
}

#[test]
fn real_mode_descriptor() {
    let d = SegmentDescriptor::real_mode(0x085F);
    assert_eq!(0x85F0, d.base);
    assert_eq!(0xF_FFFF, d.limit);
    assert_eq!(true, d.is_writable());
}

#[test]
fn decodes_interrupt_gate() {
    let bytes = [0x78, 0x56, 0x08, 0x00, 0x00, 0x8E, 0x34, 0x12];
    let g = GateDescriptor::from_bytes(&bytes);
    assert_eq!(0x1234_5678, g.offset);
    assert_eq!(0x0008, g.selector);
    assert_eq!(Some(GateKind::Interrupt32), g.kind);
    assert_eq!(true, g.present);
    assert_eq!(true, g.kind.unwrap().clears_interrupt_flag());

    let g = GateDescriptor::from_bytes(&[0, 0, 0x08, 0, 0, 0x07, 0, 0]);
    assert_eq!(Some(GateKind::Trap16), g.kind);
    assert_eq!(false, g.present);
}

#[test]
fn table_limits() {
    let t = DescriptorTable { base: 0x1000, limit: 0x17 };
    assert_eq!(Some(0x1008), t.entry_address(0x08));
    assert_eq!(Some(0x1010), t.entry_address(0x10));
    assert_eq!(None, t.entry_address(0x18));
}
