//! Machine types known to the front end.

use std::fmt;

use crate::config::MachineConfig;
use crate::error::{ConfigError, Result};
use crate::factory::DeviceFactory;
use crate::profile::MachineOptions;
use crate::topology::{build_pc, MachineTopology};

/// A selectable machine type: its static options and the function that builds it.
#[derive(Clone, Copy)]
pub struct MachineType {
    pub options: &'static MachineOptions,
    pub init: fn(&MachineConfig, &mut dyn DeviceFactory) -> Result<MachineTopology>,
}

impl fmt::Debug for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineType")
            .field("name", &self.options.name)
            .field("desc", &self.options.desc)
            .finish_non_exhaustive()
    }
}

fn init_nforcepc(
    config: &MachineConfig,
    factory: &mut dyn DeviceFactory,
) -> Result<MachineTopology> {
    build_pc(&MachineOptions::NFORCEPC, config, factory)
}

pub static MACHINE_TYPES: &[MachineType] = &[MachineType {
    options: &MachineOptions::NFORCEPC,
    init: init_nforcepc,
}];

pub fn lookup_machine(name: &str) -> std::result::Result<&'static MachineType, ConfigError> {
    MACHINE_TYPES
        .iter()
        .find(|m| m.options.name == name)
        .ok_or_else(|| ConfigError::UnknownMachineType(name.to_string()))
}
