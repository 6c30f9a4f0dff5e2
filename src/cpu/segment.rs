use std::fmt;

use crate::cpu::R;

/// segment selection of a memory operand or string source.
/// `Default` means no override prefix was seen
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Segment {
    Default,
    CS,
    DS,
    ES,
    FS,
    GS,
    SS,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Segment {
    pub fn as_str(self) -> &'static str {
        match self {
            Segment::Default | Segment::DS => "ds",
            Segment::CS => "cs",
            Segment::ES => "es",
            Segment::FS => "fs",
            Segment::GS => "gs",
            Segment::SS => "ss",
        }
    }

    /// the segment register to use, `default` when no override is active
    pub fn or(self, default: R) -> R {
        match self {
            Segment::Default => default,
            Segment::CS => R::CS,
            Segment::DS => R::DS,
            Segment::ES => R::ES,
            Segment::FS => R::FS,
            Segment::GS => R::GS,
            Segment::SS => R::SS,
        }
    }

    /// the override selected by a prefix byte
    pub fn from_prefix(b: u8) -> Option<Segment> {
        match b {
            0x26 => Some(Segment::ES),
            0x2E => Some(Segment::CS),
            0x36 => Some(Segment::SS),
            0x3E => Some(Segment::DS),
            0x64 => Some(Segment::FS),
            0x65 => Some(Segment::GS),
            _ => None,
        }
    }
}
