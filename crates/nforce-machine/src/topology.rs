//! The assembled machine and the top-level build entry point.

use serde::Serialize;
use tracing::{debug, info};

use crate::address_space::{AddressRegion, AddressSpace, RamLayout};
use crate::bus::{Bus, BusHandles, BusHierarchy, BusId, BusKind, BusTable};
use crate::config::MachineConfig;
use crate::device::{Device, DeviceBuilder, DeviceId, DeviceTable};
use crate::error::{MachineError, ResourceConflict, Result};
use crate::factory::DeviceFactory;
use crate::interrupts::{FerrSignaling, InterruptLine, InterruptRouter};
use crate::io::{IoClaim, IoPortRegistry};
use crate::profile::{CpuModel, MachineOptions, MediaSupport, PlatformProfile, PlatformStrategy};
use crate::provision::Provisioner;
use crate::registry::lookup_machine;

/// Everything one machine build owns: the memory map, the I/O port and interrupt line tables,
/// the buses and the realized devices.
#[derive(Debug, Clone)]
pub struct MachineTopology {
    profile: PlatformProfile,
    address_space: AddressSpace,
    io_ports: IoPortRegistry,
    interrupts: InterruptRouter,
    buses: BusTable,
    devices: DeviceTable,
    system_bus: BusId,
    handles: Option<BusHandles>,
    rtc: Option<DeviceId>,
    frozen: bool,
}

impl MachineTopology {
    pub(crate) fn new(
        profile: PlatformProfile,
        address_space: AddressSpace,
        interrupts: InterruptRouter,
    ) -> Self {
        let mut buses = BusTable::new();
        let system_bus = buses.create(
            BusKind::System,
            "main-system-bus",
            None,
            None,
            Vec::new(),
            None,
        );
        Self {
            profile,
            address_space,
            io_ports: IoPortRegistry::new(),
            interrupts,
            buses,
            devices: DeviceTable::new(),
            system_bus,
            handles: None,
            rtc: None,
            frozen: false,
        }
    }

    /// Realizes `builder`: resolves its links, checks every resource it claims, lets `factory`
    /// instantiate the model, then commits the claims and attaches the device to its bus.
    ///
    /// Nothing is recorded unless every step succeeds.
    pub fn realize(
        &mut self,
        builder: DeviceBuilder,
        factory: &mut dyn DeviceFactory,
    ) -> Result<DeviceId> {
        let links = builder.resolve_links(&self.devices)?;

        let bus = self.buses.check_attach(builder.bus, builder.address)?;

        for (i, range) in builder.io.iter().enumerate() {
            if builder.io[..i].iter().any(|other| other.overlaps(range)) {
                return Err(ResourceConflict::IoPortsOverlapWithinDevice { range: *range }.into());
            }
            self.io_ports.check(*range)?;
        }

        for (i, &line) in builder.irqs.iter().enumerate() {
            if !bus.permits(line) {
                return Err(ResourceConflict::LineNotPermitted {
                    bus: builder.bus,
                    line,
                }
                .into());
            }
            self.interrupts.check_claim(line)?;
            if builder.irqs[..i].contains(&line) {
                return Err(ResourceConflict::LineClaimed {
                    line,
                    existing: self.devices.next_id(),
                }
                .into());
            }
        }

        let id = self.devices.next_id();
        let label = builder.label();
        let device = builder.into_device(id, links);
        factory
            .realize(&device)
            .map_err(|source| MachineError::Realization {
                device: label,
                source,
            })?;

        for range in device.io_ranges() {
            self.io_ports.claim(*range, id)?;
        }
        for &line in device.irqs() {
            self.interrupts.claim_source(line, id)?;
        }
        self.buses.attach(device.bus(), device.address(), id)?;
        debug!(
            device = %device.label(),
            id = %id,
            bus = self.buses.get(device.bus()).map(Bus::name).unwrap_or_default(),
            "realized device"
        );
        self.devices.push(device);
        Ok(id)
    }

    pub fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    /// Static descriptor of the machine type this topology was built for.
    pub fn options(&self) -> &MachineOptions {
        self.profile.options()
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    pub fn io_ports(&self) -> &IoPortRegistry {
        &self.io_ports
    }

    pub fn interrupts(&self) -> &InterruptRouter {
        &self.interrupts
    }

    pub(crate) fn interrupts_mut(&mut self) -> &mut InterruptRouter {
        &mut self.interrupts
    }

    pub fn buses(&self) -> &BusTable {
        &self.buses
    }

    pub(crate) fn buses_mut(&mut self) -> &mut BusTable {
        &mut self.buses
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn system_bus(&self) -> BusId {
        self.system_bus
    }

    pub fn bus_handles(&self) -> Option<BusHandles> {
        self.handles
    }

    pub(crate) fn set_bus_handles(&mut self, handles: BusHandles) {
        self.handles = Some(handles);
    }

    /// Root PCI bus (`pci.0`).
    pub fn pci_bus(&self) -> Option<&Bus> {
        self.handles.and_then(|h| self.buses.get(h.pci))
    }

    /// ISA bus behind the LPC bridge (`isa.0`).
    pub fn isa_bus(&self) -> Option<&Bus> {
        self.handles.and_then(|h| self.buses.get(h.isa))
    }

    /// The machine's canonical RTC, used by firmware for the CMOS clock.
    pub fn rtc(&self) -> Option<DeviceId> {
        self.rtc
    }

    pub(crate) fn set_rtc(&mut self, rtc: DeviceId) {
        self.rtc = Some(rtc);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn freeze(&mut self) {
        self.buses.freeze_all();
        self.frozen = true;
    }

    pub fn summary(&self) -> TopologySummary {
        let options = self.profile.options();
        TopologySummary {
            machine: options.name,
            description: options.desc,
            cpu_model: self.profile.cpu_model(),
            cpu_count: self.profile.cpu_count(),
            strategy: self.profile.strategy(),
            features: self
                .profile
                .features()
                .iter_names()
                .map(|(name, _)| name)
                .collect(),
            media: self.profile.media(),
            ram: self.address_space.ram_layout(),
            regions: self.address_space.regions().to_vec(),
            buses: self
                .buses
                .iter()
                .map(|bus| BusSummary {
                    id: bus.id(),
                    name: bus.name().to_string(),
                    kind: bus.kind(),
                    parent: bus
                        .parent()
                        .and_then(|p| self.buses.get(p))
                        .map(|p| p.name().to_string()),
                    bridge: bus.bridge(),
                    irq_lines: bus.irq_lines().to_vec(),
                    devices: bus.devices().iter().map(|(_, id)| *id).collect(),
                })
                .collect(),
            devices: self.devices.iter().cloned().collect(),
            io_ports: self.io_ports.claims().to_vec(),
            interrupts: self
                .interrupts
                .lines()
                .iter()
                .filter(|l| l.sink.is_some() || l.source.is_some())
                .cloned()
                .collect(),
            ferr: self.interrupts.ferr(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BusSummary {
    pub id: BusId,
    pub name: String,
    pub kind: BusKind,
    pub parent: Option<String>,
    pub bridge: Option<DeviceId>,
    pub irq_lines: Vec<u32>,
    pub devices: Vec<DeviceId>,
}

/// Serializable snapshot of a built machine.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySummary {
    pub machine: &'static str,
    pub description: &'static str,
    pub cpu_model: CpuModel,
    pub cpu_count: u32,
    pub strategy: PlatformStrategy,
    pub features: Vec<&'static str>,
    pub media: MediaSupport,
    pub ram: RamLayout,
    pub regions: Vec<AddressRegion>,
    pub buses: Vec<BusSummary>,
    pub devices: Vec<Device>,
    pub io_ports: Vec<IoClaim>,
    /// Lines that are connected to a controller or driven by a device.
    pub interrupts: Vec<InterruptLine>,
    pub ferr: FerrSignaling,
}

/// Entry point: builds a complete machine from a [`MachineConfig`].
#[derive(Debug, Clone)]
pub struct MachineTopologyBuilder {
    config: MachineConfig,
}

impl MachineTopologyBuilder {
    pub fn new(config: MachineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Runs every construction stage of the selected machine type. The first failure aborts the
    /// build; nothing partially built is returned.
    pub fn build(&self, factory: &mut dyn DeviceFactory) -> Result<MachineTopology> {
        let machine = lookup_machine(&self.config.machine)?;
        (machine.init)(&self.config, factory)
    }
}

/// Shared construction sequence for PC-style machine types.
pub(crate) fn build_pc(
    options: &MachineOptions,
    config: &MachineConfig,
    factory: &mut dyn DeviceFactory,
) -> Result<MachineTopology> {
    let profile = PlatformProfile::from_config(options, config)?;
    let address_space = AddressSpace::build(&profile)?;
    let interrupts = InterruptRouter::build(&profile);

    let mut topo = MachineTopology::new(profile, address_space, interrupts);
    let buses = BusHierarchy::build(&mut topo, factory)?;
    Provisioner::new(&mut topo, buses, factory).provision()?;

    info!(
        machine = topo.options().name,
        cpu = topo.profile().cpu_model().name(),
        strategy = ?topo.profile().strategy(),
        ram_bytes = topo.profile().ram_size_bytes(),
        devices = topo.devices().len(),
        buses = topo.buses().len(),
        "machine topology built"
    );
    Ok(topo)
}
