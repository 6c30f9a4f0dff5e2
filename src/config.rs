use std::fs;
use std::path::Path;

use crate::cpu::CpuModel;
use crate::error::Error;

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

/// machine settings, normally read from a toml file
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MachineConfig {
    pub cpu: CpuModel,

    /// installed RAM in KiB
    pub memory_kb: u32,

    /// initial state of the A20 gate
    pub a20_enabled: bool,

    /// number of executed instructions between timer IRQs
    pub instructions_per_tick: usize,

    /// interrupt vector for IRQ 0-7
    pub irq_base_master: u8,

    /// interrupt vector for IRQ 8-15
    pub irq_base_slave: u8,

    /// writes an instruction trace to this file
    pub trace: Option<String>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            cpu: CpuModel::I80186,
            memory_kb: 1024,
            a20_enabled: false,
            instructions_per_tick: 65_536,
            irq_base_master: 0x08,
            irq_base_slave: 0x70,
            trace: None,
        }
    }
}

impl MachineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let cfg: MachineConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let data = fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.memory_kb < 64 {
            return Err(Error::InvalidConfig(format!("memory_kb {} is below 64", self.memory_kb)));
        }
        if self.memory_kb > 64 * 1024 {
            return Err(Error::InvalidConfig(format!("memory_kb {} exceeds 64 MiB", self.memory_kb)));
        }
        if self.instructions_per_tick == 0 {
            return Err(Error::InvalidConfig("instructions_per_tick must be non-zero".to_string()));
        }
        Ok(())
    }
}
