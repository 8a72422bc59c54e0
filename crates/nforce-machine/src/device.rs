//! Device descriptions and the realized-device table.
//!
//! A [`DeviceBuilder`] is a mutable description of a device that has not been realized yet: its
//! kind, parent bus, address, properties, claimed I/O ranges, interrupt lines and links to other
//! devices. Realization consumes the builder and produces an immutable [`Device`].

use std::collections::BTreeMap;
use std::fmt;

use nforce_pc_constants::PciIdentity;
use serde::{Serialize, Serializer};

use crate::bus::BusId;
use crate::error::{LinkFailure, MachineError};
use crate::interrupts::Gsi;
use crate::io::IoRange;

/// Index of a realized device in its topology's [`DeviceTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(pub(crate) usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse device category, used to type-check links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceClass {
    Cpu,
    Clock,
    Bridge,
    InterruptController,
    Rtc,
    Timer,
    Dma,
    Audio,
    Storage,
    StorageEndpoint,
    Usb,
    Network,
    Placeholder,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cpu => "cpu",
            Self::Clock => "clock",
            Self::Bridge => "bridge",
            Self::InterruptController => "interrupt controller",
            Self::Rtc => "rtc",
            Self::Timer => "timer",
            Self::Dma => "dma",
            Self::Audio => "audio",
            Self::Storage => "storage",
            Self::StorageEndpoint => "storage endpoint",
            Self::Usb => "usb",
            Self::Network => "network",
            Self::Placeholder => "placeholder",
        };
        f.write_str(name)
    }
}

/// Every device type the board knows how to place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    KvmClock,
    HostBridge,
    LpcBridge,
    SmBus,
    AgpBridge,
    Pic8259,
    KvmPic8259,
    Rtc,
    Pit,
    KvmPit,
    Dma8257,
    Speaker,
    IdeController,
    IdeDisk,
    IdeCdrom,
    UsbOhci,
    Nvnet,
    TestDev,
}

impl DeviceKind {
    /// Type name announced to the device factory.
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Cpu => "x86-cpu",
            Self::KvmClock => "kvmclock",
            Self::HostBridge => "nforce-host",
            Self::LpcBridge => "nforce-lpc",
            Self::SmBus => "nforce-smbus",
            Self::AgpBridge => "nforce-agp",
            Self::Pic8259 => "isa-i8259",
            Self::KvmPic8259 => "kvm-i8259",
            Self::Rtc => "mc146818rtc",
            Self::Pit => "isa-pit",
            Self::KvmPit => "kvm-pit",
            Self::Dma8257 => "i8257",
            Self::Speaker => "isa-pcspk",
            Self::IdeController => "piix3-ide",
            Self::IdeDisk => "ide-hd",
            Self::IdeCdrom => "ide-cd",
            Self::UsbOhci => "pci-ohci",
            Self::Nvnet => "nvnet",
            Self::TestDev => "pci-testdev",
        }
    }

    pub const fn class(self) -> DeviceClass {
        match self {
            Self::Cpu => DeviceClass::Cpu,
            Self::KvmClock => DeviceClass::Clock,
            Self::HostBridge | Self::LpcBridge | Self::SmBus | Self::AgpBridge => {
                DeviceClass::Bridge
            }
            Self::Pic8259 | Self::KvmPic8259 => DeviceClass::InterruptController,
            Self::Rtc => DeviceClass::Rtc,
            Self::Pit | Self::KvmPit => DeviceClass::Timer,
            Self::Dma8257 => DeviceClass::Dma,
            Self::Speaker => DeviceClass::Audio,
            Self::IdeController => DeviceClass::Storage,
            Self::IdeDisk | Self::IdeCdrom => DeviceClass::StorageEndpoint,
            Self::UsbOhci => DeviceClass::Usb,
            Self::Nvnet => DeviceClass::Network,
            Self::TestDev => DeviceClass::Placeholder,
        }
    }

    /// Links that must be set before a device of this kind can be realized, with the class the
    /// target must have.
    fn required_links(self) -> &'static [(&'static str, DeviceClass)] {
        match self {
            Self::Speaker => &[("pit", DeviceClass::Timer)],
            _ => &[],
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Serialize for DeviceKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.type_name())
    }
}

/// Location of a device on its parent bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "bus", rename_all = "kebab-case")]
pub enum DeviceAddress {
    System { index: u32 },
    Pci { slot: u8, function: u8 },
    Isa { iobase: u16 },
    I2c { addr: u8 },
    Ide { unit: u8 },
}

impl DeviceAddress {
    pub const fn pci(slot: u8, function: u8) -> Self {
        Self::Pci { slot, function }
    }

    /// Splits a packed `devfn` byte.
    pub const fn from_devfn(devfn: u8) -> Self {
        Self::Pci {
            slot: devfn >> 3,
            function: devfn & 0x07,
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System { index } => write!(f, "sys{index}"),
            Self::Pci { slot, function } => write!(f, "{slot:02x}.{function}"),
            Self::Isa { iobase } => write!(f, "isa{iobase:#x}"),
            Self::I2c { addr } => write!(f, "i2c{addr:#x}"),
            Self::Ide { unit } => write!(f, "unit{unit}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    U32(u32),
    U64(u64),
    Str(String),
    Mac([u8; 6]),
}

impl PropValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            Self::U32(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_mac(&self) -> Option<[u8; 6]> {
        match self {
            Self::Mac(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u32> for PropValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<u64> for PropValue {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<[u8; 6]> for PropValue {
    fn from(v: [u8; 6]) -> Self {
        Self::Mac(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingLink {
    name: &'static str,
    expected: DeviceClass,
    target: Option<DeviceId>,
}

/// Description of a device that has not been realized yet.
#[derive(Debug, Clone)]
pub struct DeviceBuilder {
    pub(crate) kind: DeviceKind,
    pub(crate) bus: BusId,
    pub(crate) address: DeviceAddress,
    pub(crate) props: BTreeMap<&'static str, PropValue>,
    pub(crate) io: Vec<IoRange>,
    pub(crate) irqs: Vec<Gsi>,
    links: Vec<PendingLink>,
}

impl DeviceBuilder {
    pub fn new(kind: DeviceKind, bus: BusId, address: DeviceAddress) -> Self {
        let links = kind
            .required_links()
            .iter()
            .map(|&(name, expected)| PendingLink {
                name,
                expected,
                target: None,
            })
            .collect();
        Self {
            kind,
            bus,
            address,
            props: BTreeMap::new(),
            io: Vec::new(),
            irqs: Vec::new(),
            links,
        }
    }

    pub fn prop(mut self, name: &'static str, value: impl Into<PropValue>) -> Self {
        self.props.insert(name, value.into());
        self
    }

    /// Records the PCI configuration-space identity of the device.
    pub fn pci_identity(self, id: PciIdentity) -> Self {
        self.prop("vendor-id", u32::from(id.vendor_id))
            .prop("device-id", u32::from(id.device_id))
            .prop("class", id.class)
    }

    pub fn io(mut self, range: IoRange) -> Self {
        self.io.push(range);
        self
    }

    pub fn irq(mut self, gsi: Gsi) -> Self {
        self.irqs.push(gsi);
        self
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// `type@address`, used in diagnostics.
    pub fn label(&self) -> String {
        format!("{}@{}", self.kind.type_name(), self.address)
    }

    /// Points link `name` at `target`. The target is validated at realization time.
    pub fn set_link(&mut self, name: &'static str, target: DeviceId) -> Result<(), MachineError> {
        match self.links.iter_mut().find(|l| l.name == name) {
            Some(link) => {
                link.target = Some(target);
                Ok(())
            }
            None => Err(MachineError::LinkResolution {
                device: self.label(),
                link: name,
                reason: LinkFailure::UnknownLink,
            }),
        }
    }

    /// Checks every declared link against the already-realized devices and returns the
    /// resolved `(name, target)` pairs.
    pub(crate) fn resolve_links(
        &self,
        devices: &DeviceTable,
    ) -> Result<Vec<(&'static str, DeviceId)>, MachineError> {
        self.links
            .iter()
            .map(|link| {
                let fail = |reason| MachineError::LinkResolution {
                    device: self.label(),
                    link: link.name,
                    reason,
                };
                let target = link.target.ok_or_else(|| fail(LinkFailure::Unset))?;
                let found = devices
                    .get(target)
                    .ok_or_else(|| fail(LinkFailure::Dangling(target)))?
                    .class();
                if found != link.expected {
                    return Err(fail(LinkFailure::WrongClass {
                        found,
                        expected: link.expected,
                    }));
                }
                Ok((link.name, target))
            })
            .collect()
    }

    pub(crate) fn into_device(
        self,
        id: DeviceId,
        links: Vec<(&'static str, DeviceId)>,
    ) -> Device {
        Device {
            id,
            kind: self.kind,
            bus: self.bus,
            address: self.address,
            props: self.props,
            io: self.io,
            irqs: self.irqs,
            links: links.into_iter().collect(),
        }
    }
}

/// A realized device. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    id: DeviceId,
    #[serde(rename = "type")]
    kind: DeviceKind,
    bus: BusId,
    address: DeviceAddress,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    props: BTreeMap<&'static str, PropValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    io: Vec<IoRange>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    irqs: Vec<Gsi>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    links: BTreeMap<&'static str, DeviceId>,
}

impl Device {
    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn class(&self) -> DeviceClass {
        self.kind.class()
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.get(name)
    }

    pub fn props(&self) -> &BTreeMap<&'static str, PropValue> {
        &self.props
    }

    pub fn io_ranges(&self) -> &[IoRange] {
        &self.io
    }

    pub fn irqs(&self) -> &[Gsi] {
        &self.irqs
    }

    pub fn link(&self, name: &str) -> Option<DeviceId> {
        self.links.get(name).copied()
    }

    pub fn label(&self) -> String {
        format!("{}@{}", self.kind.type_name(), self.address)
    }
}

/// All realized devices of one topology, indexed by [`DeviceId`] in realization order.
#[derive(Debug, Clone, Default)]
pub struct DeviceTable {
    devices: Vec<Device>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_id(&self) -> DeviceId {
        DeviceId(self.devices.len())
    }

    pub(crate) fn push(&mut self, device: Device) {
        debug_assert_eq!(device.id, self.next_id());
        self.devices.push(device);
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn find_by_kind(&self, kind: DeviceKind) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(move |d| d.kind == kind)
    }

    pub fn find_at(&self, bus: BusId, address: DeviceAddress) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.bus == bus && d.address == address)
    }
}
