use thiserror::Error;

use crate::bus::BusId;
use crate::device::{DeviceAddress, DeviceClass, DeviceId};
use crate::factory::FactoryError;
use crate::interrupts::Gsi;
use crate::io::IoRange;

pub type Result<T> = std::result::Result<T, MachineError>;

/// Errors returned while building a machine topology.
///
/// Every variant is fatal: a machine that failed to build is never handed out in a partially
/// constructed state.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("invalid machine configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("resource conflict: {0}")]
    ResourceConflict(#[from] ResourceConflict),

    #[error("cannot realize {device}: link `{link}` {reason}")]
    LinkResolution {
        device: String,
        link: &'static str,
        reason: LinkFailure,
    },

    #[error("device factory failed to realize {device}")]
    Realization {
        device: String,
        #[source]
        source: FactoryError,
    },
}

/// An invalid or unsupported value in the requested machine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown machine type `{0}`")]
    UnknownMachineType(String),

    #[error(
        "invalid cpu_count={requested}; the {machine} machine supports 1..={max} CPU(s)"
    )]
    InvalidCpuCount {
        machine: &'static str,
        requested: u32,
        max: u32,
    },

    #[error("unknown CPU model `{0}`")]
    UnknownCpuModel(String),

    #[error("CPU model `host` requires hardware-assisted acceleration")]
    HostCpuRequiresAcceleration,

    #[error("guest RAM size must be non-zero")]
    ZeroRam,

    #[error(
        "guest RAM size {ram_size_bytes:#x} does not fit below the {phys_addr_bits}-bit physical address limit"
    )]
    RamExceedsAddressSpace {
        ram_size_bytes: u64,
        phys_addr_bits: u8,
    },

    #[error("invalid BIOS image size {0:#x} (must be a non-zero multiple of 64 KiB, at most 16 MiB)")]
    InvalidBiosSize(u64),

    #[error("NIC model `{requested}` is not available; the on-board NIC is `{available}`")]
    UnsupportedNicModel {
        requested: String,
        available: &'static str,
    },

    #[error("IDE drive at channel {channel} unit {unit} is out of range (channels 0-1, units 0-1)")]
    InvalidIdeDrive { channel: u8, unit: u8 },

    #[error("IDE drive at channel {channel} unit {unit} is configured twice")]
    DuplicateIdeDrive { channel: u8, unit: u8 },

    #[error("CD-ROM drives are disabled on the {0} machine")]
    CdromDisabled(&'static str),
}

/// Two entities claim the same address, port range, memory range or interrupt line, or a claim
/// refers to a resource that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceConflict {
    #[error("{bus} address {address} is already occupied by device {existing}")]
    AddressInUse {
        bus: BusId,
        address: DeviceAddress,
        existing: DeviceId,
    },

    #[error("address {address} cannot be used on {bus}")]
    AddressNotValidOnBus { bus: BusId, address: DeviceAddress },

    #[error("bus {0} does not exist")]
    NoSuchBus(BusId),

    #[error("bus {0} is frozen; no further devices may attach")]
    BusFrozen(BusId),

    #[error("I/O ports {range} overlap ports already claimed by device {existing}")]
    IoPortsInUse { range: IoRange, existing: DeviceId },

    #[error("I/O range {range} overlaps another range of the same device")]
    IoPortsOverlapWithinDevice { range: IoRange },

    #[error("invalid I/O range {range}")]
    InvalidIoRange { range: IoRange },

    #[error("memory region `{name}` overlaps `{existing}` at priority {priority}")]
    MemoryOverlap {
        name: &'static str,
        existing: &'static str,
        priority: i32,
    },

    #[error("memory region `{name}` has an invalid extent (base={base:#x} size={size:#x})")]
    InvalidRegion {
        name: &'static str,
        base: u64,
        size: u64,
    },

    #[error("memory region `{0}` is missing from the address space")]
    MissingRegion(&'static str),

    #[error("GSI {0} does not exist")]
    NoSuchLine(Gsi),

    #[error("GSI {line} is already driven by device {existing}")]
    LineClaimed { line: Gsi, existing: DeviceId },

    #[error("GSI {0} is reserved for FERR# signalling")]
    LineReserved(Gsi),

    #[error("GSI {0} is already connected to an interrupt controller")]
    LineAlreadyConnected(Gsi),

    #[error("GSI {0} is not connected to an interrupt controller")]
    UnroutedLine(Gsi),

    #[error("devices on {bus} may not drive GSI {line}")]
    LineNotPermitted { bus: BusId, line: Gsi },
}

/// Why a device link could not be resolved at realization time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkFailure {
    #[error("was never set")]
    Unset,

    #[error("is not a link of this device type")]
    UnknownLink,

    #[error("points at device {0}, which has not been realized")]
    Dangling(DeviceId),

    #[error("points at a {found} device; expected a {expected} device")]
    WrongClass {
        found: DeviceClass,
        expected: DeviceClass,
    },
}
