//! Realizes the board's fixed device catalogue in dependency order.
//!
//! Each step is a separate method so that the order is visible in one place
//! ([`Provisioner::provision`]) and so that individual steps can be exercised on their own.

use nforce_pc_constants::{
    DMA0_IOBASE, DMA0_PAGE_BASE, DMA1_IOBASE, DMA1_PAGE_BASE, IDE_DEVFN, IDE_PIIX3_ID,
    IDE_PRIMARY_CTRL, IDE_PRIMARY_IOBASE, IDE_PRIMARY_IRQ, IDE_SECONDARY_CTRL,
    IDE_SECONDARY_IOBASE, IDE_SECONDARY_IRQ, ISA_NUM_IRQS, MEMORY_CONTROLLER_DEVFN, NIC_DEVFN,
    NVNET_ID, OHCI_DEVFN, OHCI_ID, OHCI_NUM_PORTS, PIC_CASCADE_IRQ, PIC_MASTER_ELCR,
    PIC_MASTER_IOBASE, PIC_SLAVE_ELCR, PIC_SLAVE_IOBASE, PIT_IOBASE, PIT_IO_LEN, PIT_IRQ,
    RTC_BASE_YEAR, RTC_IOBASE, RTC_IO_LEN, RTC_IRQ, SPEAKER_IOBASE, TESTDEV_ID,
};
use tracing::{debug, warn};

use crate::bus::{BusHandles, BusId, BusKind};
use crate::config::DriveMedia;
use crate::device::{DeviceAddress, DeviceBuilder, DeviceId, DeviceKind};
use crate::error::{LinkFailure, MachineError, ResourceConflict, Result};
use crate::factory::DeviceFactory;
use crate::interrupts::{LineSink, PicChip};
use crate::io::IoRange;
use crate::profile::{PicVariant, TimerVariant};
use crate::topology::MachineTopology;

fn speaker_builder(isa: BusId) -> DeviceBuilder {
    DeviceBuilder::new(DeviceKind::Speaker, isa, DeviceAddress::Isa {
        iobase: SPEAKER_IOBASE,
    })
    .io(IoRange::single(SPEAKER_IOBASE))
}

pub struct Provisioner<'a> {
    topo: &'a mut MachineTopology,
    buses: BusHandles,
    factory: &'a mut dyn DeviceFactory,
    /// Created with the machine, realized once the timer it links to exists.
    speaker: Option<DeviceBuilder>,
    cpu: Option<DeviceId>,
    pit: Option<DeviceId>,
    ide_buses: Option<[BusId; 2]>,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        topo: &'a mut MachineTopology,
        buses: BusHandles,
        factory: &'a mut dyn DeviceFactory,
    ) -> Self {
        Self {
            topo,
            buses,
            factory,
            speaker: Some(speaker_builder(buses.isa)),
            cpu: None,
            pit: None,
            ide_buses: None,
        }
    }

    /// Runs every step in order and freezes all buses.
    pub fn provision(mut self) -> Result<()> {
        self.create_cpus()?;
        self.register_isa_irqs()?;
        self.create_pic()?;
        self.create_rtc()?;
        self.create_pit()?;
        self.create_dma()?;
        self.create_speaker()?;
        self.create_ide()?;
        self.create_usb()?;
        self.create_nic()?;
        self.create_memory_controller()?;
        self.topo.freeze();
        Ok(())
    }

    fn realize(&mut self, builder: DeviceBuilder) -> Result<DeviceId> {
        self.topo.realize(builder, &mut *self.factory)
    }

    /// CPU sockets on the system bus, plus the paravirtual clock when the hypervisor provides
    /// one. Returns the boot CPU.
    pub fn create_cpus(&mut self) -> Result<DeviceId> {
        let profile = self.topo.profile();
        let model = profile.cpu_model();
        let count = profile.cpu_count();
        let paravirt_clock = profile.strategy().has_paravirt_clock();

        let system = self.buses.system;
        let cpu = |index: u32| {
            DeviceBuilder::new(DeviceKind::Cpu, system, DeviceAddress::System { index })
            .prop("model", model.name())
            .prop("apic-id", index)
            .prop("phys-addr-bits", u32::from(model.phys_addr_bits()))
        };
        let boot_cpu = self.realize(cpu(0))?;
        for index in 1..count {
            self.realize(cpu(index))?;
        }
        if paravirt_clock {
            self.realize(DeviceBuilder::new(
                DeviceKind::KvmClock,
                self.buses.system,
                DeviceAddress::System { index: count },
            ))?;
        }

        self.cpu = Some(boot_cpu);
        Ok(boot_cpu)
    }

    /// Registers GSI 0-15 as the input lines ISA devices may drive. Until this runs, no device
    /// on `isa.0` can claim an interrupt.
    pub fn register_isa_irqs(&mut self) -> Result<()> {
        for gsi in 0..ISA_NUM_IRQS {
            self.topo
                .interrupts()
                .line(gsi)
                .ok_or(ResourceConflict::NoSuchLine(gsi))?;
        }
        self.topo
            .buses_mut()
            .grant_lines(self.buses.isa, 0..ISA_NUM_IRQS)?;
        debug!(lines = ISA_NUM_IRQS, "registered ISA interrupt inputs");
        Ok(())
    }

    /// Master/slave 8259 pair. GSI 0-15 are delivered to their inputs; the slave drives the
    /// master's cascade input. FERR# is wired to the boot CPU when the emulator signals it.
    pub fn create_pic(&mut self) -> Result<[DeviceId; 2]> {
        let kind = match self.topo.profile().strategy().pic() {
            PicVariant::Emulated => DeviceKind::Pic8259,
            PicVariant::InKernel => DeviceKind::KvmPic8259,
        };

        let master = self.realize(
            DeviceBuilder::new(kind, self.buses.isa, DeviceAddress::Isa {
                iobase: PIC_MASTER_IOBASE,
            })
            .prop("master", true)
            .io(IoRange::new(PIC_MASTER_IOBASE, 2))
            .io(IoRange::single(PIC_MASTER_ELCR)),
        )?;
        self.connect_pic_inputs(PicChip::Master, master)?;

        let slave = self.realize(
            DeviceBuilder::new(kind, self.buses.isa, DeviceAddress::Isa {
                iobase: PIC_SLAVE_IOBASE,
            })
            .prop("master", false)
            .io(IoRange::new(PIC_SLAVE_IOBASE, 2))
            .io(IoRange::single(PIC_SLAVE_ELCR))
            .irq(PIC_CASCADE_IRQ),
        )?;
        self.connect_pic_inputs(PicChip::Slave, slave)?;

        if self.topo.interrupts().ferr_line().is_some() {
            let cpu = self.cpu.ok_or_else(|| MachineError::LinkResolution {
                device: format!("{}@{}", kind.type_name(), DeviceAddress::Isa {
                    iobase: PIC_MASTER_IOBASE,
                }),
                link: "ferr-source",
                reason: LinkFailure::Unset,
            })?;
            self.topo.interrupts_mut().wire_ferr(cpu)?;
        }
        Ok([master, slave])
    }

    fn connect_pic_inputs(&mut self, chip: PicChip, controller: DeviceId) -> Result<()> {
        for gsi in 0..ISA_NUM_IRQS {
            let (target, pin) =
                PicChip::for_isa_irq(gsi).ok_or(ResourceConflict::NoSuchLine(gsi))?;
            if target == chip {
                self.topo
                    .interrupts_mut()
                    .connect_sink(gsi, LineSink { controller, pin })?;
            }
        }
        Ok(())
    }

    pub fn create_rtc(&mut self) -> Result<DeviceId> {
        let rtc = self.realize(
            DeviceBuilder::new(DeviceKind::Rtc, self.buses.isa, DeviceAddress::Isa {
                iobase: RTC_IOBASE,
            })
            .prop("base_year", RTC_BASE_YEAR)
            .io(IoRange::new(RTC_IOBASE, RTC_IO_LEN))
            .irq(RTC_IRQ),
        )?;
        self.topo.set_rtc(rtc);
        Ok(rtc)
    }

    pub fn create_pit(&mut self) -> Result<DeviceId> {
        let addr = DeviceAddress::Isa { iobase: PIT_IOBASE };
        let ports = IoRange::new(PIT_IOBASE, PIT_IO_LEN);
        let builder = match self.topo.profile().strategy().timer() {
            TimerVariant::Emulated => DeviceBuilder::new(DeviceKind::Pit, self.buses.isa, addr)
                .prop("iobase", u32::from(PIT_IOBASE))
                .io(ports)
                .irq(PIT_IRQ),
            // The in-kernel timer raises IRQ 0 inside the hypervisor.
            TimerVariant::InKernel => DeviceBuilder::new(DeviceKind::KvmPit, self.buses.isa, addr)
                .prop("iobase", u32::from(PIT_IOBASE))
                .io(ports),
        };
        let pit = self.realize(builder)?;
        self.pit = Some(pit);
        Ok(pit)
    }

    /// Two cascaded 8257 controllers; controller 1 uses word-wide register spacing.
    pub fn create_dma(&mut self) -> Result<[DeviceId; 2]> {
        let controllers = [(DMA0_IOBASE, DMA0_PAGE_BASE), (DMA1_IOBASE, DMA1_PAGE_BASE)];
        let mut ids = [DeviceId(0); 2];
        for (dshift, (iobase, page_base)) in (0u32..).zip(controllers) {
            ids[dshift as usize] = self.realize(
                DeviceBuilder::new(DeviceKind::Dma8257, self.buses.isa, DeviceAddress::Isa {
                    iobase,
                })
                .prop("base", u32::from(iobase))
                .prop("page-base", u32::from(page_base))
                .prop("high-page", false)
                .prop("dshift", dshift)
                .io(IoRange::new(iobase, 16 << dshift))
                .io(IoRange::new(page_base, 8)),
            )?;
        }
        Ok(ids)
    }

    /// Realizes the speaker created with the machine, linked to the interval timer.
    pub fn create_speaker(&mut self) -> Result<DeviceId> {
        let mut speaker = self
            .speaker
            .take()
            .unwrap_or_else(|| speaker_builder(self.buses.isa));
        if let Some(pit) = self.pit {
            speaker.set_link("pit", pit)?;
        }
        self.realize(speaker)
    }

    /// PIIX3-compatible IDE controller, its two channels and the drives attached to them.
    pub fn create_ide(&mut self) -> Result<DeviceId> {
        let ide = self.realize(
            DeviceBuilder::new(
                DeviceKind::IdeController,
                self.buses.pci,
                DeviceAddress::from_devfn(IDE_DEVFN),
            )
            .pci_identity(IDE_PIIX3_ID)
            .io(IoRange::new(IDE_PRIMARY_IOBASE, 8))
            .io(IoRange::single(IDE_PRIMARY_CTRL))
            .io(IoRange::new(IDE_SECONDARY_IOBASE, 8))
            .io(IoRange::single(IDE_SECONDARY_CTRL))
            .irq(IDE_PRIMARY_IRQ)
            .irq(IDE_SECONDARY_IRQ),
        )?;

        let pci = self.buses.pci;
        let channels = [
            self.topo
                .buses_mut()
                .create(BusKind::Ide, "ide.0", Some(pci), Some(ide), Vec::new(), None),
            self.topo
                .buses_mut()
                .create(BusKind::Ide, "ide.1", Some(pci), Some(ide), Vec::new(), None),
        ];
        self.ide_buses = Some(channels);

        let drives = self.topo.profile().drives().to_vec();
        if drives.is_empty() {
            if self.topo.profile().media().cdrom {
                self.realize(DeviceBuilder::new(
                    DeviceKind::IdeCdrom,
                    channels[1],
                    DeviceAddress::Ide { unit: 0 },
                ))?;
            }
            return Ok(ide);
        }

        for drive in drives {
            let kind = match drive.media {
                DriveMedia::Disk => DeviceKind::IdeDisk,
                DriveMedia::Cdrom => DeviceKind::IdeCdrom,
            };
            let mut builder = DeviceBuilder::new(
                kind,
                channels[usize::from(drive.channel)],
                DeviceAddress::Ide { unit: drive.unit },
            );
            if let Some(backend) = drive.backend {
                builder = builder.prop("drive", backend);
            }
            self.realize(builder)?;
        }
        Ok(ide)
    }

    pub fn create_usb(&mut self) -> Result<DeviceId> {
        self.realize(
            DeviceBuilder::new(
                DeviceKind::UsbOhci,
                self.buses.pci,
                DeviceAddress::from_devfn(OHCI_DEVFN),
            )
            .pci_identity(OHCI_ID)
            .prop("num-ports", OHCI_NUM_PORTS),
        )
    }

    pub fn create_nic(&mut self) -> Result<DeviceId> {
        let nic = self.topo.profile().nic().clone();
        let mut builder = DeviceBuilder::new(
            DeviceKind::Nvnet,
            self.buses.pci,
            DeviceAddress::from_devfn(NIC_DEVFN),
        )
        .pci_identity(NVNET_ID)
        .prop("mac", nic.mac)
        .prop("default-boot", true);
        if let Some(netdev) = nic.netdev {
            builder = builder.prop("netdev", netdev);
        }
        self.realize(builder)
    }

    /// The chipset memory controller has no model yet; a generic test device holds its slot so
    /// that guests probing 00.3 find something.
    pub fn create_memory_controller(&mut self) -> Result<DeviceId> {
        warn!(
            devfn = MEMORY_CONTROLLER_DEVFN,
            "memory controller is not emulated; using pci-testdev as a stand-in"
        );
        self.realize(
            DeviceBuilder::new(
                DeviceKind::TestDev,
                self.buses.pci,
                DeviceAddress::from_devfn(MEMORY_CONTROLLER_DEVFN),
            )
            .pci_identity(TESTDEV_ID),
        )
    }

    /// IDE channel buses, once [`Self::create_ide`] has run.
    pub fn ide_buses(&self) -> Option<[BusId; 2]> {
        self.ide_buses
    }
}
