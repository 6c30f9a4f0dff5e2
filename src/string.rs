use std::num::ParseIntError;

#[cfg(test)]
#[path = "./string_test.rs"]
mod string_test;

/// pads `s` with spaces up to `len` characters
pub fn right_pad(s: &str, len: usize) -> String {
    let mut res = String::from(s);
    while res.len() < len {
        res.push(' ');
    }
    res
}

/// parses string to a integer. unprefixed values assume base 10, and "0x" prefix indicates base 16.
pub fn parse_number_string(s: &str) -> Result<u32, ParseIntError> {
    let x = &s.replace("_", "");
    if x.len() >= 2 && (&x[0..2] == "0x" || &x[0..2] == "0X") {
        u32::from_str_radix(&x[2..], 16)
    } else {
        x.parse::<u32>()
    }
}

/// parses a "SEG:OFF" pair of hex values, as printed in traces
pub fn parse_segment_offset(s: &str) -> Option<(u16, u16)> {
    let mut parts = s.splitn(2, ':');
    let seg = u16::from_str_radix(parts.next()?.trim(), 16).ok()?;
    let off = u16::from_str_radix(parts.next()?.trim(), 16).ok()?;
    Some((seg, off))
}

/// formats bytes as unseparated upper case hex pairs
pub fn hex_bytes(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}
