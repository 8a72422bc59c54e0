//! Machine configuration as handed over by the front end.

use nforce_pc_constants::DEFAULT_BIOS_SIZE;
use serde::{Deserialize, Serialize};

/// How guest instructions are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccelMode {
    /// Pure software emulation.
    #[default]
    Software,
    /// Hardware-assisted virtualization with in-kernel timer and interrupt controller.
    HardwareAssisted,
}

/// Requested NIC options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NicConfig {
    /// NIC model; `None` selects the machine's default model.
    pub model: Option<String>,
    /// Identifier of the host network backend the NIC is bound to.
    pub netdev: Option<String>,
    pub mac: Option<[u8; 6]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriveMedia {
    Disk,
    Cdrom,
}

/// One IDE drive attached to the on-board disk controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveConfig {
    /// IDE channel (0 = primary, 1 = secondary).
    pub channel: u8,
    /// Unit on the channel (0 = master, 1 = slave).
    pub unit: u8,
    pub media: DriveMedia,
    /// Host block backend identifier. An empty CD-ROM tray has none.
    #[serde(default)]
    pub backend: Option<String>,
}

/// Boot firmware parameters that influence the memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    /// Size of the system BIOS image in bytes.
    pub bios_size_bytes: u64,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            bios_size_bytes: DEFAULT_BIOS_SIZE,
        }
    }
}

/// Configuration requested by the machine-selection front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Registered machine type name.
    pub machine: String,
    /// CPU model; `None` selects the machine's default.
    pub cpu_model: Option<String>,
    pub cpu_count: u32,
    /// Guest RAM size in bytes.
    pub ram_size_bytes: u64,
    pub accel: AccelMode,
    pub nic: NicConfig,
    pub drives: Vec<DriveConfig>,
    pub firmware: FirmwareConfig,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            machine: "nforcepc".to_string(),
            cpu_model: None,
            cpu_count: 1,
            ram_size_bytes: 64 * 1024 * 1024,
            accel: AccelMode::Software,
            nic: NicConfig::default(),
            drives: Vec::new(),
            firmware: FirmwareConfig::default(),
        }
    }
}
