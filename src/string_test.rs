use pretty_assertions::assert_eq;

use crate::string::{hex_bytes, parse_number_string, parse_segment_offset, right_pad};

#[test]
fn test_parse_number_string() {
    assert_eq!(1234, parse_number_string("1234").unwrap());
    assert_eq!(0xFFFF, parse_number_string("0xFFFF").unwrap());
    assert_eq!(0x10_0000, parse_number_string("0x10_0000").unwrap());
    assert!(parse_number_string("0xZZ").is_err());
}

#[test]
fn test_parse_segment_offset() {
    assert_eq!(Some((0x085F, 0x0100)), parse_segment_offset("085F:0100"));
    assert_eq!(Some((0xF000, 0xFFF0)), parse_segment_offset("f000:fff0"));
    assert_eq!(None, parse_segment_offset("085F"));
    assert_eq!(None, parse_segment_offset("12345:0"));
}

#[test]
fn test_hex_and_padding() {
    assert_eq!("B8FF00", hex_bytes(&[0xB8, 0xFF, 0x00]));
    assert_eq!("mov  ", right_pad("mov", 5));
    assert_eq!("movsb", right_pad("movsb", 3));
}
