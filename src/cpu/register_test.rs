use pretty_assertions::assert_eq;

use crate::cpu::{RegisterState, Width, R};

#[test]
fn byte_views_alias_word_and_dword() {
    let mut regs = RegisterState::default();
    regs.set_r32(R::EAX, 0x1234_5678);
    assert_eq!(0x5678, regs.get_r16(R::AX));
    assert_eq!(0x78, regs.get_r8(R::AL));
    assert_eq!(0x56, regs.get_r8(R::AH));

    regs.set_r8(R::AH, 0xAB);
    assert_eq!(0x1234_AB78, regs.get_r32(R::EAX));

    regs.set_r8(R::AL, 0xCD);
    assert_eq!(0x1234_ABCD, regs.get_r32(R::EAX));

    regs.set_r16(R::AX, 0xFFFF);
    assert_eq!(0x1234_FFFF, regs.get_r32(R::EAX));
}

#[test]
fn high_byte_registers_map_to_first_four_slots() {
    let mut regs = RegisterState::default();
    regs.set_r8(R::BH, 0x11);
    regs.set_r8(R::CH, 0x22);
    assert_eq!(0x1100, regs.get_r16(R::BX));
    assert_eq!(0x2200, regs.get_r16(R::CX));
    assert_eq!(0, regs.get_r16(R::DI));
    assert_eq!(0, regs.get_r16(R::BP));
}

#[test]
fn segment_registers_are_separate_from_gprs() {
    let mut regs = RegisterState::default();
    regs.set_r16(R::DS, 0x085F);
    regs.set_r16(R::BX, 0x1111);
    assert_eq!(0x085F, regs.get_r16(R::DS));
    assert_eq!(0x1111, regs.get_r16(R::BX));
}

#[test]
fn register_encodings() {
    assert_eq!(R::SP, R::r16(4));
    assert_eq!(R::AH, R::r8(4));
    assert_eq!(R::ESP, R::gpr(4, Width::Dword));
    assert_eq!(Some(R::DS), R::sr(3));
    assert_eq!(None, R::sr(6));
    assert_eq!(Width::Byte, R::BH.width());
    assert_eq!("edi", R::EDI.as_str());
}
