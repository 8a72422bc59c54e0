//! Bus table and construction of the chipset bus hierarchy.

use std::fmt;

use nforce_pc_constants::{
    AGP_BRIDGE_DEVFN, AGP_BRIDGE_ID, HOST_BRIDGE_DEVFN, HOST_BRIDGE_ID, LPC_BRIDGE_DEVFN,
    LPC_BRIDGE_ID, LPC_NUM_PIRQS, PCI_CONFIG_IOBASE, PCI_CONFIG_IO_LEN, PCI_ROUTABLE_IRQS,
    SMBUS_DEVFN, SMBUS_ID,
};
use serde::Serialize;
use tracing::debug;

use crate::address_space::PCI_WINDOW;
use crate::device::{DeviceAddress, DeviceBuilder, DeviceId, DeviceKind};
use crate::error::{self, ResourceConflict};
use crate::factory::DeviceFactory;
use crate::interrupts::Gsi;
use crate::io::IoRange;
use crate::topology::MachineTopology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BusId(pub(crate) usize);

impl BusId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusKind {
    /// Main system bus holding CPUs and other board-level devices.
    System,
    PciRoot,
    PciBridge,
    Isa,
    I2c,
    Ide,
}

impl BusKind {
    /// Whether `address` names a valid position on a bus of this kind.
    pub fn accepts(self, address: DeviceAddress) -> bool {
        match (self, address) {
            (Self::System, DeviceAddress::System { .. }) => true,
            (Self::PciRoot | Self::PciBridge, DeviceAddress::Pci { slot, function }) => {
                slot < 32 && function < 8
            }
            (Self::Isa, DeviceAddress::Isa { .. }) => true,
            (Self::I2c, DeviceAddress::I2c { addr }) => addr < 0x80,
            (Self::Ide, DeviceAddress::Ide { unit }) => unit < 2,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bus {
    id: BusId,
    kind: BusKind,
    name: String,
    parent: Option<BusId>,
    bridge: Option<DeviceId>,
    devices: Vec<(DeviceAddress, DeviceId)>,
    irq_lines: Vec<Gsi>,
    memory_window: Option<&'static str>,
    frozen: bool,
}

impl Bus {
    pub fn id(&self) -> BusId {
        self.id
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<BusId> {
        self.parent
    }

    /// Device that bridges this bus to its parent (or, for the root PCI bus, to the CPU).
    pub fn bridge(&self) -> Option<DeviceId> {
        self.bridge
    }

    /// Attached devices in attachment order.
    pub fn devices(&self) -> &[(DeviceAddress, DeviceId)] {
        &self.devices
    }

    pub fn device_at(&self, address: DeviceAddress) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(a, _)| *a == address)
            .map(|(_, id)| *id)
    }

    pub fn irq_lines(&self) -> &[Gsi] {
        &self.irq_lines
    }

    pub fn permits(&self, line: Gsi) -> bool {
        self.irq_lines.contains(&line)
    }

    pub fn memory_window(&self) -> Option<&'static str> {
        self.memory_window
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

#[derive(Debug, Clone, Default)]
pub struct BusTable {
    buses: Vec<Bus>,
}

impl BusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create(
        &mut self,
        kind: BusKind,
        name: impl Into<String>,
        parent: Option<BusId>,
        bridge: Option<DeviceId>,
        irq_lines: Vec<Gsi>,
        memory_window: Option<&'static str>,
    ) -> BusId {
        let id = BusId(self.buses.len());
        let bus = Bus {
            id,
            kind,
            name: name.into(),
            parent,
            bridge,
            devices: Vec::new(),
            irq_lines,
            memory_window,
            frozen: false,
        };
        debug!(
            bus = %bus.name,
            kind = ?bus.kind,
            parent = ?bus.parent.and_then(|p| self.get(p)).map(|p| p.name.as_str()),
            "created bus"
        );
        self.buses.push(bus);
        id
    }

    pub fn get(&self, id: BusId) -> Option<&Bus> {
        self.buses.get(id.0)
    }

    pub fn by_name(&self, name: &str) -> Option<&Bus> {
        self.buses.iter().find(|b| b.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bus> {
        self.buses.iter()
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    /// Checks that a device may attach to `bus` at `address` without attaching it.
    pub fn check_attach(
        &self,
        bus: BusId,
        address: DeviceAddress,
    ) -> Result<&Bus, ResourceConflict> {
        let b = self.get(bus).ok_or(ResourceConflict::NoSuchBus(bus))?;
        if b.frozen {
            return Err(ResourceConflict::BusFrozen(bus));
        }
        if !b.kind.accepts(address) {
            return Err(ResourceConflict::AddressNotValidOnBus { bus, address });
        }
        if let Some(existing) = b.device_at(address) {
            return Err(ResourceConflict::AddressInUse {
                bus,
                address,
                existing,
            });
        }
        Ok(b)
    }

    pub(crate) fn attach(
        &mut self,
        bus: BusId,
        address: DeviceAddress,
        device: DeviceId,
    ) -> Result<(), ResourceConflict> {
        self.check_attach(bus, address)?;
        self.buses[bus.0].devices.push((address, device));
        Ok(())
    }

    pub(crate) fn set_bridge(
        &mut self,
        bus: BusId,
        bridge: DeviceId,
    ) -> Result<(), ResourceConflict> {
        let b = self
            .buses
            .get_mut(bus.0)
            .ok_or(ResourceConflict::NoSuchBus(bus))?;
        b.bridge = Some(bridge);
        Ok(())
    }

    /// Lets devices on `bus` drive `lines`. Lines the bus already permits are skipped.
    pub(crate) fn grant_lines(
        &mut self,
        bus: BusId,
        lines: impl IntoIterator<Item = Gsi>,
    ) -> Result<(), ResourceConflict> {
        let b = self
            .buses
            .get_mut(bus.0)
            .ok_or(ResourceConflict::NoSuchBus(bus))?;
        if b.frozen {
            return Err(ResourceConflict::BusFrozen(bus));
        }
        for line in lines {
            if !b.irq_lines.contains(&line) {
                b.irq_lines.push(line);
            }
        }
        Ok(())
    }

    pub(crate) fn freeze_all(&mut self) {
        for bus in &mut self.buses {
            bus.frozen = true;
        }
    }
}

/// Handles of the buses every provisioning step needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusHandles {
    pub system: BusId,
    pub pci: BusId,
    pub isa: BusId,
    pub smbus: BusId,
    pub agp: BusId,
}

/// Builds the chipset bus hierarchy: the root PCI bus and the ISA, SMBus and AGP buses behind
/// their bridges.
pub struct BusHierarchy;

impl BusHierarchy {
    pub fn build(
        topo: &mut MachineTopology,
        factory: &mut dyn DeviceFactory,
    ) -> error::Result<BusHandles> {
        if topo.address_space().region(PCI_WINDOW).is_none() {
            return Err(ResourceConflict::MissingRegion(PCI_WINDOW).into());
        }
        let system = topo.system_bus();
        let pci_lines = PCI_ROUTABLE_IRQS.to_vec();

        // The root bus exists before its host bridge so the bridge can sit at 00.0 on it.
        let pci = topo.buses_mut().create(
            BusKind::PciRoot,
            "pci.0",
            Some(system),
            None,
            pci_lines.clone(),
            Some(PCI_WINDOW),
        );
        let host = topo.realize(
            DeviceBuilder::new(
                DeviceKind::HostBridge,
                pci,
                DeviceAddress::from_devfn(HOST_BRIDGE_DEVFN),
            )
            .pci_identity(HOST_BRIDGE_ID)
            .io(IoRange::new(PCI_CONFIG_IOBASE, PCI_CONFIG_IO_LEN)),
            factory,
        )?;
        topo.buses_mut().set_bridge(pci, host)?;

        let lpc = topo.realize(
            DeviceBuilder::new(
                DeviceKind::LpcBridge,
                pci,
                DeviceAddress::from_devfn(LPC_BRIDGE_DEVFN),
            )
            .pci_identity(LPC_BRIDGE_ID)
            .prop("num-pirqs", LPC_NUM_PIRQS),
            factory,
        )?;
        let isa = topo.buses_mut().create(
            BusKind::Isa,
            "isa.0",
            Some(pci),
            Some(lpc),
            // Input lines are granted when the provisioner registers them.
            Vec::new(),
            None,
        );

        let smbus_ctrl = topo.realize(
            DeviceBuilder::new(DeviceKind::SmBus, pci, DeviceAddress::from_devfn(SMBUS_DEVFN))
                .pci_identity(SMBUS_ID),
            factory,
        )?;
        let smbus = topo.buses_mut().create(
            BusKind::I2c,
            "i2c.0",
            Some(pci),
            Some(smbus_ctrl),
            Vec::new(),
            None,
        );

        let agp_bridge = topo.realize(
            DeviceBuilder::new(
                DeviceKind::AgpBridge,
                pci,
                DeviceAddress::from_devfn(AGP_BRIDGE_DEVFN),
            )
            .pci_identity(AGP_BRIDGE_ID),
            factory,
        )?;
        let agp = topo.buses_mut().create(
            BusKind::PciBridge,
            "pci.1",
            Some(pci),
            Some(agp_bridge),
            pci_lines,
            None,
        );

        let handles = BusHandles {
            system,
            pci,
            isa,
            smbus,
            agp,
        };
        topo.set_bus_handles(handles);
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_isa() -> (BusTable, BusId) {
        let mut table = BusTable::new();
        let isa = table.create(BusKind::Isa, "isa.0", None, None, (0..16).collect(), None);
        (table, isa)
    }

    #[test]
    fn address_must_match_bus_kind() {
        assert!(BusKind::PciRoot.accepts(DeviceAddress::pci(0x1F, 7)));
        assert!(!BusKind::PciRoot.accepts(DeviceAddress::pci(0x20, 0)));
        assert!(!BusKind::Isa.accepts(DeviceAddress::pci(1, 0)));
        assert!(BusKind::Ide.accepts(DeviceAddress::Ide { unit: 1 }));
        assert!(!BusKind::Ide.accepts(DeviceAddress::Ide { unit: 2 }));
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let (mut table, isa) = table_with_isa();
        let addr = DeviceAddress::Isa { iobase: 0x70 };
        table.attach(isa, addr, DeviceId(0)).unwrap();
        assert_eq!(
            table.attach(isa, addr, DeviceId(1)),
            Err(ResourceConflict::AddressInUse {
                bus: isa,
                address: addr,
                existing: DeviceId(0),
            })
        );
        assert_eq!(table.get(isa).unwrap().devices(), &[(addr, DeviceId(0))]);
    }

    #[test]
    fn frozen_and_unknown_buses_refuse_devices() {
        let (mut table, isa) = table_with_isa();
        table.freeze_all();
        assert_eq!(
            table.check_attach(isa, DeviceAddress::Isa { iobase: 0x61 }).unwrap_err(),
            ResourceConflict::BusFrozen(isa)
        );
        assert_eq!(
            table.check_attach(BusId(5), DeviceAddress::Isa { iobase: 0x61 }).unwrap_err(),
            ResourceConflict::NoSuchBus(BusId(5))
        );
    }

    #[test]
    fn permitted_lines_follow_bus_configuration() {
        let (table, isa) = table_with_isa();
        let bus = table.get(isa).unwrap();
        assert!(bus.permits(0) && bus.permits(15));
        assert!(!bus.permits(16));
        assert_eq!(table.by_name("isa.0").map(Bus::id), Some(isa));
    }

    #[test]
    fn granted_lines_extend_the_bus_until_frozen() {
        let mut table = BusTable::new();
        let isa = table.create(BusKind::Isa, "isa.0", None, None, Vec::new(), None);
        assert!(!table.get(isa).unwrap().permits(3));

        table.grant_lines(isa, [3, 4]).unwrap();
        table.grant_lines(isa, [4, 5]).unwrap();
        assert_eq!(table.get(isa).unwrap().irq_lines(), &[3, 4, 5]);

        assert_eq!(
            table.grant_lines(BusId(9), [1]),
            Err(ResourceConflict::NoSuchBus(BusId(9)))
        );
        table.freeze_all();
        assert_eq!(
            table.grant_lines(isa, [6]),
            Err(ResourceConflict::BusFrozen(isa))
        );
    }
}
