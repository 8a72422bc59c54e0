//! Startup-time topology construction for the nForce PC machine.
//!
//! Building a machine is a one-shot, strictly ordered sequence:
//!
//! 1. [`PlatformProfile`] is derived from the requested [`MachineConfig`] and the static
//!    [`MachineOptions`] of the selected machine type.
//! 2. [`AddressSpace`] composes RAM, the PCI memory window and the firmware ROM regions.
//! 3. [`InterruptRouter`] allocates the global interrupt line table.
//! 4. [`BusHierarchy`] constructs the root PCI bus and its ISA, SMBus and AGP children.
//! 5. [`Provisioner`] realizes the fixed device catalogue in dependency order.
//!
//! [`MachineTopologyBuilder`] runs the whole sequence and hands back a frozen
//! [`MachineTopology`]. The device models themselves are external: every realized device is
//! announced to a [`DeviceFactory`], which may veto it.
#![forbid(unsafe_code)]

pub mod address_space;
pub mod bus;
pub mod config;
pub mod device;
mod error;
pub mod factory;
pub mod interrupts;
pub mod io;
pub mod profile;
pub mod provision;
pub mod registry;
pub mod topology;

pub use address_space::{AddressRegion, AddressSpace, MemoryContainer, RamLayout, RegionKind};
pub use bus::{Bus, BusHandles, BusHierarchy, BusId, BusKind, BusTable};
pub use config::{AccelMode, DriveConfig, DriveMedia, FirmwareConfig, MachineConfig, NicConfig};
pub use device::{
    Device, DeviceAddress, DeviceBuilder, DeviceClass, DeviceId, DeviceKind, DeviceTable,
    PropValue,
};
pub use error::{ConfigError, LinkFailure, MachineError, ResourceConflict, Result};
pub use factory::{AcceptAllFactory, DeviceFactory, FactoryError};
pub use interrupts::{FerrSignaling, Gsi, InterruptLine, InterruptRouter, LineSink, PicChip};
pub use io::{IoClaim, IoPortRegistry, IoRange};
pub use profile::{
    ChipsetFeatures, CpuModel, MachineOptions, MediaSupport, NicBinding, PicVariant,
    PlatformProfile, PlatformStrategy, TimerVariant,
};
pub use provision::Provisioner;
pub use registry::{lookup_machine, MachineType, MACHINE_TYPES};
pub use topology::{BusSummary, MachineTopology, MachineTopologyBuilder, TopologySummary};
