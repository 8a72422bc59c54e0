#![forbid(unsafe_code)]

//! Shared physical address, port, interrupt and PCI topology constants for the nForce PC machine.
//!
//! The topology builder (`nforce-machine`) and anything that has to agree with it at runtime
//! (firmware tables, debugging tools) read these values from one place.

/// 4 GiB boundary; RAM above the low-memory limit is relocated here.
pub const FOUR_GIB: u64 = 0x1_0000_0000;

/// Highest guest-physical address covered by low RAM when gigabyte alignment is disabled.
///
/// Everything between this limit and 4 GiB is the PCI hole.
pub const LOWMEM_LIMIT: u64 = 0xE000_0000;
/// Low-memory limit used by boards that align the RAM split to a gigabyte boundary.
pub const GIGABYTE_ALIGNED_LOWMEM_LIMIT: u64 = 0xC000_0000;

/// Base of the legacy option ROM window (VGA BIOS and friends).
pub const OPTION_ROM_BASE: u64 = 0x000C_0000;
/// Size of the legacy option ROM window.
pub const OPTION_ROM_SIZE: u64 = 0x2_0000;

/// End (exclusive) of the real-mode 1 MiB window; the ISA BIOS alias ends here.
pub const ISA_BIOS_END: u64 = 0x10_0000;
/// Largest part of the system BIOS mirrored below 1 MiB.
pub const ISA_BIOS_MAX_SIZE: u64 = 0x2_0000;

/// Default system BIOS image size (`bios-256k.bin`).
pub const DEFAULT_BIOS_SIZE: u64 = 0x4_0000;
/// System BIOS images are loaded in 64 KiB granules.
pub const BIOS_SIZE_ALIGN: u64 = 0x1_0000;
/// Largest system BIOS image that can be mapped below 4 GiB.
pub const BIOS_MAX_SIZE: u64 = 0x100_0000;

/// Number of global system interrupt lines (IOAPIC input count).
pub const GSI_NUM_PINS: u32 = 24;
/// Number of lines driven by ISA devices (legacy PIC input count).
pub const ISA_NUM_IRQS: u32 = 16;

/// ISA IRQ of the interval timer.
pub const PIT_IRQ: u32 = 0;
/// ISA IRQ used by the slave PIC cascade.
pub const PIC_CASCADE_IRQ: u32 = 2;
/// ISA IRQ of the real-time clock.
pub const RTC_IRQ: u32 = 8;
/// ISA IRQ used for x87 FPU exception (FERR#) delivery.
pub const FERR_IRQ: u32 = 13;
/// Compatibility-mode IRQ of the primary IDE channel.
pub const IDE_PRIMARY_IRQ: u32 = 14;
/// Compatibility-mode IRQ of the secondary IDE channel.
pub const IDE_SECONDARY_IRQ: u32 = 15;

/// ISA IRQs that PCI INTx# lines may be steered to through the LPC PIRQ router.
pub const PCI_ROUTABLE_IRQS: [u32; 10] = [3, 4, 5, 7, 9, 10, 11, 12, 14, 15];

pub const PIC_MASTER_IOBASE: u16 = 0x20;
pub const PIC_SLAVE_IOBASE: u16 = 0xA0;
pub const PIC_MASTER_ELCR: u16 = 0x4D0;
pub const PIC_SLAVE_ELCR: u16 = 0x4D1;

pub const PIT_IOBASE: u16 = 0x40;
pub const PIT_IO_LEN: u16 = 4;

pub const SPEAKER_IOBASE: u16 = 0x61;

pub const RTC_IOBASE: u16 = 0x70;
pub const RTC_IO_LEN: u16 = 2;
/// Century the RTC reports until the guest programs it.
pub const RTC_BASE_YEAR: u32 = 2000;

pub const DMA0_IOBASE: u16 = 0x00;
pub const DMA0_PAGE_BASE: u16 = 0x80;
pub const DMA1_IOBASE: u16 = 0xC0;
pub const DMA1_PAGE_BASE: u16 = 0x88;

pub const IDE_PRIMARY_IOBASE: u16 = 0x1F0;
pub const IDE_PRIMARY_CTRL: u16 = 0x3F6;
pub const IDE_SECONDARY_IOBASE: u16 = 0x170;
pub const IDE_SECONDARY_CTRL: u16 = 0x376;

/// PCI configuration mechanism #1 address/data ports (`0xCF8..=0xCFF`).
pub const PCI_CONFIG_IOBASE: u16 = 0xCF8;
pub const PCI_CONFIG_IO_LEN: u16 = 8;

/// Number of PIRQ inputs on the LPC bridge.
pub const LPC_NUM_PIRQS: u32 = 4;

/// Default MAC address of the on-board NIC when the front end does not supply one.
pub const DEFAULT_NIC_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];

/// Downstream port count of the on-board OHCI controller.
///
/// The console chipset this board derives from exposes more; the PC board wires only four.
pub const OHCI_NUM_PORTS: u32 = 4;

/// Builds a PCI `devfn` byte from a slot (device) and function number.
pub const fn pci_devfn(slot: u8, function: u8) -> u8 {
    ((slot & 0x1F) << 3) | (function & 0x07)
}

pub const HOST_BRIDGE_DEVFN: u8 = pci_devfn(0x00, 0);
pub const MEMORY_CONTROLLER_DEVFN: u8 = pci_devfn(0x00, 3);
pub const LPC_BRIDGE_DEVFN: u8 = pci_devfn(0x01, 0);
pub const SMBUS_DEVFN: u8 = pci_devfn(0x01, 1);
pub const OHCI_DEVFN: u8 = pci_devfn(0x02, 0);
pub const NIC_DEVFN: u8 = pci_devfn(0x04, 0);
pub const IDE_DEVFN: u8 = pci_devfn(0x09, 0);
pub const AGP_BRIDGE_DEVFN: u8 = pci_devfn(0x1E, 0);

/// Vendor/device/class triple exposed in PCI configuration space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
    /// Base class, sub-class and programming interface packed as `0xCCSSPP`.
    pub class: u32,
}

pub const PCI_VENDOR_NVIDIA: u16 = 0x10DE;
pub const PCI_VENDOR_INTEL: u16 = 0x8086;
pub const PCI_VENDOR_REDHAT: u16 = 0x1B36;

pub const HOST_BRIDGE_ID: PciIdentity = PciIdentity {
    vendor_id: PCI_VENDOR_NVIDIA,
    device_id: 0x02A5,
    class: 0x06_00_00,
};
pub const LPC_BRIDGE_ID: PciIdentity = PciIdentity {
    vendor_id: PCI_VENDOR_NVIDIA,
    device_id: 0x01B2,
    class: 0x06_01_00,
};
pub const SMBUS_ID: PciIdentity = PciIdentity {
    vendor_id: PCI_VENDOR_NVIDIA,
    device_id: 0x01B4,
    class: 0x0C_05_00,
};
pub const AGP_BRIDGE_ID: PciIdentity = PciIdentity {
    vendor_id: PCI_VENDOR_NVIDIA,
    device_id: 0x01B7,
    class: 0x06_04_00,
};
pub const OHCI_ID: PciIdentity = PciIdentity {
    vendor_id: PCI_VENDOR_NVIDIA,
    device_id: 0x01C2,
    class: 0x0C_03_10,
};
pub const NVNET_ID: PciIdentity = PciIdentity {
    vendor_id: PCI_VENDOR_NVIDIA,
    device_id: 0x01C3,
    class: 0x02_00_00,
};
pub const IDE_PIIX3_ID: PciIdentity = PciIdentity {
    vendor_id: PCI_VENDOR_INTEL,
    device_id: 0x7010,
    class: 0x01_01_80,
};
/// Generic test device standing in for the chipset memory controller.
pub const TESTDEV_ID: PciIdentity = PciIdentity {
    vendor_id: PCI_VENDOR_REDHAT,
    device_id: 0x0005,
    class: 0x00_FF_00,
};
