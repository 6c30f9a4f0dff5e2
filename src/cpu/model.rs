use std::fmt;

/// the emulated processor generation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum CpuModel {
    #[serde(rename = "8086")]
    I8086,
    #[serde(rename = "80186")]
    I80186,
    #[serde(rename = "80386")]
    I80386,
}

impl Default for CpuModel {
    fn default() -> Self {
        CpuModel::I80186
    }
}

impl fmt::Display for CpuModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            CpuModel::I8086 => "8086",
            CpuModel::I80186 => "80186",
            CpuModel::I80386 => "80386",
        };
        write!(f, "{}", s)
    }
}

/// behaviour that differs between processor generations.
/// the decoder and ALU consult this table instead of comparing models
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CpuFeatures {
    /// shift and rotate counts are masked to 5 bits
    pub mask_shift_count: bool,

    /// MUL and IMUL set ZF from the low half of the result (cleared otherwise)
    pub mul_sets_zero: bool,

    /// PUSH SP stores the already decremented value
    pub push_sp_decremented: bool,

    /// FLAGS bits 12-15 always read as set
    pub flags_high_nibble_set: bool,

    /// AAA/AAS carry from AL into AH by adjusting AX as a whole
    pub aaa_adjusts_ax: bool,

    /// IDIV accepts the most negative quotient (-128, -32768)
    pub idiv_min_quotient: bool,

    /// the 80186 instruction additions
    pub extended_opcodes: bool,

    /// 32-bit registers, the 0x0F opcode page, FS/GS and protected mode
    pub wide_registers: bool,
}

impl CpuModel {
    pub fn features(self) -> CpuFeatures {
        match self {
            CpuModel::I8086 => CpuFeatures {
                mask_shift_count: false,
                mul_sets_zero: true,
                push_sp_decremented: true,
                flags_high_nibble_set: true,
                aaa_adjusts_ax: false,
                idiv_min_quotient: false,
                extended_opcodes: false,
                wide_registers: false,
            },
            CpuModel::I80186 => CpuFeatures {
                mask_shift_count: true,
                mul_sets_zero: false,
                push_sp_decremented: true,
                flags_high_nibble_set: true,
                aaa_adjusts_ax: false,
                idiv_min_quotient: true,
                extended_opcodes: true,
                wide_registers: false,
            },
            CpuModel::I80386 => CpuFeatures {
                mask_shift_count: true,
                mul_sets_zero: false,
                push_sp_decremented: false,
                flags_high_nibble_set: false,
                aaa_adjusts_ax: true,
                idiv_min_quotient: true,
                extended_opcodes: true,
                wide_registers: true,
            },
        }
    }
}
