use std::collections::HashSet;

use nforce_machine::{
    AcceptAllFactory, AccelMode, BusKind, Device, DeviceAddress, DeviceFactory, DeviceKind, FactoryError,
    IoRange, MachineConfig, MachineError, MachineTopology, MachineTopologyBuilder,
};

fn build(config: MachineConfig) -> MachineTopology {
    MachineTopologyBuilder::new(config)
        .build(&mut AcceptAllFactory)
        .expect("default nforcepc config should build")
}

fn pci_device(topo: &MachineTopology, slot: u8, function: u8) -> &Device {
    let pci = topo.pci_bus().expect("root PCI bus");
    topo.devices()
        .find_at(pci.id(), DeviceAddress::pci(slot, function))
        .unwrap_or_else(|| panic!("no device at {slot:02x}.{function}"))
}

#[test]
fn default_build_places_the_fixed_catalogue() {
    let topo = build(MachineConfig::default());

    assert_eq!(pci_device(&topo, 0x00, 0).type_name(), "nforce-host");
    assert_eq!(pci_device(&topo, 0x01, 0).type_name(), "nforce-lpc");
    assert_eq!(pci_device(&topo, 0x01, 1).type_name(), "nforce-smbus");
    assert_eq!(pci_device(&topo, 0x1E, 0).type_name(), "nforce-agp");

    let ide = pci_device(&topo, 0x09, 0);
    assert_eq!(ide.type_name(), "piix3-ide");
    assert_eq!(ide.irqs(), &[14, 15]);

    let usb = pci_device(&topo, 0x02, 0);
    assert_eq!(usb.type_name(), "pci-ohci");
    assert_eq!(usb.prop("num-ports").and_then(|v| v.as_u32()), Some(4));

    let nic = pci_device(&topo, 0x04, 0);
    assert_eq!(nic.type_name(), "nvnet");
    assert_eq!(nic.prop("default-boot").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        nic.prop("mac").and_then(|v| v.as_mac()),
        Some([0x52, 0x54, 0x00, 0x12, 0x34, 0x56])
    );
    assert!(nic.prop("netdev").is_none());

    let memctl = pci_device(&topo, 0x00, 3);
    assert_eq!(memctl.kind(), DeviceKind::TestDev);
}

#[test]
fn exactly_one_root_pci_bus_and_one_isa_bus() {
    let topo = build(MachineConfig::default());
    let kinds: Vec<_> = topo.buses().iter().map(|b| b.kind()).collect();
    assert_eq!(kinds.iter().filter(|k| **k == BusKind::PciRoot).count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == BusKind::Isa).count(), 1);

    let pci = topo.pci_bus().unwrap();
    let isa = topo.isa_bus().unwrap();
    assert_eq!(pci.name(), "pci.0");
    assert_eq!(isa.name(), "isa.0");
    assert_eq!(isa.parent(), Some(pci.id()));
    assert!(topo.buses().by_name("i2c.0").is_some());
    assert_eq!(
        topo.buses().by_name("pci.1").map(|b| b.kind()),
        Some(BusKind::PciBridge)
    );
}

#[test]
fn isa_devices_sit_at_their_legacy_ports() {
    let topo = build(MachineConfig::default());
    let isa = topo.isa_bus().unwrap().id();
    let at = |iobase| {
        topo.devices()
            .find_at(isa, DeviceAddress::Isa { iobase })
            .map(|d| d.type_name())
    };
    assert_eq!(at(0x20), Some("isa-i8259"));
    assert_eq!(at(0xA0), Some("isa-i8259"));
    assert_eq!(at(0x70), Some("mc146818rtc"));
    assert_eq!(at(0x40), Some("isa-pit"));
    assert_eq!(at(0x00), Some("i8257"));
    assert_eq!(at(0xC0), Some("i8257"));
    assert_eq!(at(0x61), Some("isa-pcspk"));

    let rtc = topo.device(topo.rtc().expect("canonical RTC")).unwrap();
    assert_eq!(rtc.prop("base_year").and_then(|v| v.as_u32()), Some(2000));
    assert_eq!(rtc.irqs(), &[8]);
}

#[test]
fn speaker_is_linked_to_the_timer() {
    let topo = build(MachineConfig::default());
    let speaker = topo
        .devices()
        .find_by_kind(DeviceKind::Speaker)
        .next()
        .unwrap();
    let pit = topo.devices().find_by_kind(DeviceKind::Pit).next().unwrap();
    assert_eq!(speaker.link("pit"), Some(pit.id()));
    assert!(pit.id() < speaker.id());
}

#[test]
fn default_cdrom_sits_on_the_secondary_channel() {
    let topo = build(MachineConfig::default());
    let ide1 = topo.buses().by_name("ide.1").unwrap();
    let cd = topo
        .devices()
        .find_at(ide1.id(), DeviceAddress::Ide { unit: 0 })
        .unwrap();
    assert_eq!(cd.type_name(), "ide-cd");
    assert!(cd.prop("drive").is_none());
    assert!(topo.buses().by_name("ide.0").unwrap().devices().is_empty());
}

#[test]
fn bus_and_address_pairs_are_unique() {
    let topo = build(MachineConfig::default());
    let mut seen = HashSet::new();
    for dev in topo.devices().iter() {
        assert!(
            seen.insert((dev.bus(), dev.address())),
            "duplicate placement for {}",
            dev.label()
        );
    }
    assert!(topo.buses().iter().all(|b| b.is_frozen()));
    assert!(topo.is_frozen());
}

#[test]
fn io_port_claims_never_overlap() {
    let topo = build(MachineConfig::default());
    let claims = topo.io_ports().claims();
    for (i, a) in claims.iter().enumerate() {
        for b in &claims[i + 1..] {
            assert!(
                !a.range.overlaps(&b.range),
                "{} ({}) overlaps {} ({})",
                a.range,
                a.owner,
                b.range,
                b.owner
            );
        }
    }
    let host = pci_device(&topo, 0, 0);
    assert_eq!(host.io_ranges(), &[IoRange::new(0xCF8, 8)]);
}

#[test]
fn interrupt_lines_have_one_source_and_a_sink() {
    let topo = build(MachineConfig::default());
    let router = topo.interrupts();
    let mut indices = HashSet::new();
    for line in router.lines() {
        assert!(indices.insert(line.index));
        if line.source.is_some() {
            assert!(line.sink.is_some(), "GSI {} driven without a sink", line.index);
        }
    }
    assert_eq!(router.lines().len(), 24);
    for line in 0..16 {
        assert!(router.line(line).unwrap().sink.is_some());
    }
    for line in 16..24 {
        assert!(router.line(line).unwrap().sink.is_none());
    }
}

#[test]
fn line_sources_match_device_records() {
    for accel in [AccelMode::Software, AccelMode::HardwareAssisted] {
        let topo = build(MachineConfig {
            accel,
            ..Default::default()
        });
        for line in topo.interrupts().lines() {
            if let Some(source) = line.source {
                let dev = topo.device(source).unwrap();
                assert!(
                    dev.irqs().contains(&line.index),
                    "GSI {} driven by {} which does not list it",
                    line.index,
                    dev.label()
                );
            }
        }
        for dev in topo.devices().iter() {
            for &gsi in dev.irqs() {
                assert_eq!(topo.interrupts().line(gsi).unwrap().source, Some(dev.id()));
            }
        }
    }

    let topo = build(MachineConfig::default());
    let cpu = topo.devices().find_by_kind(DeviceKind::Cpu).next().unwrap();
    assert_eq!(topo.interrupts().ferr_source(), Some(cpu.id()));
    assert!(cpu.irqs().is_empty());
}

#[test]
fn options_disable_firmware_table_generation() {
    let topo = build(MachineConfig::default());
    let options = topo.options();
    assert_eq!(options.name, "nforcepc");
    assert_eq!(options.max_cpus, 1);
    assert_eq!(options.default_nic_model, "nvnet");
    assert!(!options
        .features
        .contains(nforce_machine::ChipsetFeatures::ACPI_BUILD));
    assert!(!options
        .features
        .contains(nforce_machine::ChipsetFeatures::SMBIOS_DEFAULTS));
    assert!(options.media.floppy && options.media.cdrom && options.media.sdcard);
}

#[test]
fn two_builds_are_independent() {
    let first = build(MachineConfig::default());
    let second = build(MachineConfig {
        ram_size_bytes: 256 * 1024 * 1024,
        ..Default::default()
    });
    assert_eq!(first.devices().len(), second.devices().len());
    assert_eq!(first.address_space().ram_layout().below_4g, 64 * 1024 * 1024);
    assert_eq!(second.address_space().ram_layout().below_4g, 256 * 1024 * 1024);
    assert_eq!(first.io_ports().claims(), second.io_ports().claims());
}

struct Recording(Vec<&'static str>);

impl DeviceFactory for Recording {
    fn realize(&mut self, device: &Device) -> Result<(), FactoryError> {
        self.0.push(device.type_name());
        Ok(())
    }
}

#[test]
fn factory_sees_devices_in_dependency_order() {
    let mut factory = Recording(Vec::new());
    MachineTopologyBuilder::new(MachineConfig::default())
        .build(&mut factory)
        .unwrap();
    assert_eq!(
        factory.0,
        [
            "nforce-host",
            "nforce-lpc",
            "nforce-smbus",
            "nforce-agp",
            "x86-cpu",
            "isa-i8259",
            "isa-i8259",
            "mc146818rtc",
            "isa-pit",
            "i8257",
            "i8257",
            "isa-pcspk",
            "piix3-ide",
            "ide-cd",
            "pci-ohci",
            "nvnet",
            "pci-testdev",
        ]
    );
}

struct RejectKind(&'static str);

impl DeviceFactory for RejectKind {
    fn realize(&mut self, device: &Device) -> Result<(), FactoryError> {
        if device.type_name() == self.0 {
            Err(FactoryError::new("no backend available"))
        } else {
            Ok(())
        }
    }
}

#[test]
fn factory_failure_aborts_the_build() {
    let err = MachineTopologyBuilder::new(MachineConfig::default())
        .build(&mut RejectKind("pci-ohci"))
        .unwrap_err();
    match err {
        MachineError::Realization { device, source } => {
            assert_eq!(device, "pci-ohci@02.0");
            assert_eq!(source.to_string(), "no backend available");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Bridges go through the same path.
    let err = MachineTopologyBuilder::new(MachineConfig::default())
        .build(&mut RejectKind("nforce-agp"))
        .unwrap_err();
    assert!(matches!(err, MachineError::Realization { .. }));
}
