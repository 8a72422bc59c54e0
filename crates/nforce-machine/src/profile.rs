//! Static machine options and the immutable per-build platform profile.

use bitflags::bitflags;
use nforce_pc_constants::DEFAULT_NIC_MAC;
use serde::Serialize;

use crate::config::{AccelMode, DriveConfig, DriveMedia, MachineConfig};
use crate::error::ConfigError;

bitflags! {
    /// Chipset-level switches consumed by generic PC bootstrap code (firmware tables, ROM
    /// loading, memory layout).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChipsetFeatures: u32 {
        const PCI_ENABLED = 1 << 0;
        const ACPI_BUILD = 1 << 1;
        const SMBIOS_DEFAULTS = 1 << 2;
        const SMBIOS_LEGACY_MODE = 1 << 3;
        const GIGABYTE_ALIGN = 1 << 4;
        const RESERVED_MEMORY = 1 << 5;
        const OPTION_ROM_HAS_MR = 1 << 6;
        const ROM_FILE_HAS_MR = 1 << 7;
    }
}

/// Legacy removable media the front end may attach by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaSupport {
    pub floppy: bool,
    pub cdrom: bool,
    pub sdcard: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CpuModel {
    Pentium,
    Pentium2,
    Pentium3,
    Qemu32,
    /// Pass through the host CPU; only meaningful with hardware assistance.
    Host,
}

impl CpuModel {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pentium" => Some(Self::Pentium),
            "pentium2" => Some(Self::Pentium2),
            "pentium3" => Some(Self::Pentium3),
            "qemu32" => Some(Self::Qemu32),
            "host" => Some(Self::Host),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Pentium => "pentium",
            Self::Pentium2 => "pentium2",
            Self::Pentium3 => "pentium3",
            Self::Qemu32 => "qemu32",
            Self::Host => "host",
        }
    }

    /// Width of the physical address bus; RAM must end below `1 << phys_addr_bits`.
    pub const fn phys_addr_bits(self) -> u8 {
        match self {
            // P5 has no PAE.
            Self::Pentium => 32,
            Self::Pentium2 | Self::Pentium3 | Self::Qemu32 => 36,
            Self::Host => 40,
        }
    }
}

/// Static description of a machine type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineOptions {
    pub name: &'static str,
    pub desc: &'static str,
    pub max_cpus: u32,
    pub default_cpu_model: CpuModel,
    pub default_nic_model: &'static str,
    pub media: MediaSupport,
    pub features: ChipsetFeatures,
}

impl MachineOptions {
    /// The nForce PC board: a single-socket PC built around the nForce chipset.
    ///
    /// Firmware table generation (ACPI, SMBIOS defaults) is off; guests get the legacy SMBIOS
    /// entry point only.
    pub const NFORCEPC: MachineOptions = MachineOptions {
        name: "nforcepc",
        desc: "nForce PC",
        max_cpus: 1,
        default_cpu_model: CpuModel::Pentium3,
        default_nic_model: "nvnet",
        media: MediaSupport {
            floppy: true,
            cdrom: true,
            sdcard: true,
        },
        features: ChipsetFeatures::PCI_ENABLED
            .union(ChipsetFeatures::SMBIOS_LEGACY_MODE)
            .union(ChipsetFeatures::OPTION_ROM_HAS_MR),
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerVariant {
    /// Interval timer emulated in user space, raising ISA IRQ 0.
    Emulated,
    /// Interval timer provided by the hypervisor.
    InKernel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PicVariant {
    Emulated,
    InKernel,
}

/// The single place where the acceleration mode turns into device choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformStrategy {
    Software,
    HardwareAssisted,
}

impl PlatformStrategy {
    pub const fn for_accel(accel: AccelMode) -> Self {
        match accel {
            AccelMode::Software => Self::Software,
            AccelMode::HardwareAssisted => Self::HardwareAssisted,
        }
    }

    pub const fn timer(self) -> TimerVariant {
        match self {
            Self::Software => TimerVariant::Emulated,
            Self::HardwareAssisted => TimerVariant::InKernel,
        }
    }

    pub const fn pic(self) -> PicVariant {
        match self {
            Self::Software => PicVariant::Emulated,
            Self::HardwareAssisted => PicVariant::InKernel,
        }
    }

    /// Whether x87 FPU errors must be routed to IRQ 13 by the emulator. The hypervisor
    /// delivers them itself when hardware assistance is active.
    pub const fn signals_ferr_in_software(self) -> bool {
        matches!(self, Self::Software)
    }

    pub const fn has_paravirt_clock(self) -> bool {
        matches!(self, Self::HardwareAssisted)
    }
}

/// NIC settings after matching the request against the on-board model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NicBinding {
    pub model: &'static str,
    pub netdev: Option<String>,
    pub mac: [u8; 6],
}

/// Immutable machine-wide characteristics for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    options: MachineOptions,
    cpu_model: CpuModel,
    cpu_count: u32,
    ram_size_bytes: u64,
    bios_size_bytes: u64,
    strategy: PlatformStrategy,
    nic: NicBinding,
    drives: Vec<DriveConfig>,
}

impl PlatformProfile {
    pub fn from_config(options: &MachineOptions, cfg: &MachineConfig) -> Result<Self, ConfigError> {
        if cfg.cpu_count == 0 || cfg.cpu_count > options.max_cpus {
            return Err(ConfigError::InvalidCpuCount {
                machine: options.name,
                requested: cfg.cpu_count,
                max: options.max_cpus,
            });
        }
        if cfg.ram_size_bytes == 0 {
            return Err(ConfigError::ZeroRam);
        }

        let strategy = PlatformStrategy::for_accel(cfg.accel);
        let cpu_model = match cfg.cpu_model.as_deref() {
            None => options.default_cpu_model,
            Some(name) => CpuModel::from_name(name)
                .ok_or_else(|| ConfigError::UnknownCpuModel(name.to_string()))?,
        };
        if cpu_model == CpuModel::Host && strategy != PlatformStrategy::HardwareAssisted {
            return Err(ConfigError::HostCpuRequiresAcceleration);
        }

        if let Some(model) = cfg.nic.model.as_deref() {
            if model != options.default_nic_model {
                return Err(ConfigError::UnsupportedNicModel {
                    requested: model.to_string(),
                    available: options.default_nic_model,
                });
            }
        }
        let nic = NicBinding {
            model: options.default_nic_model,
            netdev: cfg.nic.netdev.clone(),
            mac: cfg.nic.mac.unwrap_or(DEFAULT_NIC_MAC),
        };

        for (idx, drive) in cfg.drives.iter().enumerate() {
            if drive.channel > 1 || drive.unit > 1 {
                return Err(ConfigError::InvalidIdeDrive {
                    channel: drive.channel,
                    unit: drive.unit,
                });
            }
            if cfg.drives[..idx]
                .iter()
                .any(|d| d.channel == drive.channel && d.unit == drive.unit)
            {
                return Err(ConfigError::DuplicateIdeDrive {
                    channel: drive.channel,
                    unit: drive.unit,
                });
            }
            if drive.media == DriveMedia::Cdrom && !options.media.cdrom {
                return Err(ConfigError::CdromDisabled(options.name));
            }
        }

        Ok(Self {
            options: *options,
            cpu_model,
            cpu_count: cfg.cpu_count,
            ram_size_bytes: cfg.ram_size_bytes,
            bios_size_bytes: cfg.firmware.bios_size_bytes,
            strategy,
            nic,
            drives: cfg.drives.clone(),
        })
    }

    pub fn options(&self) -> &MachineOptions {
        &self.options
    }

    pub fn cpu_model(&self) -> CpuModel {
        self.cpu_model
    }

    pub fn cpu_count(&self) -> u32 {
        self.cpu_count
    }

    pub fn ram_size_bytes(&self) -> u64 {
        self.ram_size_bytes
    }

    pub fn bios_size_bytes(&self) -> u64 {
        self.bios_size_bytes
    }

    pub fn strategy(&self) -> PlatformStrategy {
        self.strategy
    }

    pub fn features(&self) -> ChipsetFeatures {
        self.options.features
    }

    pub fn media(&self) -> MediaSupport {
        self.options.media
    }

    pub fn nic(&self) -> &NicBinding {
        &self.nic
    }

    pub fn drives(&self) -> &[DriveConfig] {
        &self.drives
    }
}
