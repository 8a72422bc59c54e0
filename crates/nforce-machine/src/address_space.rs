//! Guest-physical memory map composition.
//!
//! Regions live in one of two containers: the system memory map, and the PCI memory space that
//! is mapped into the system map underneath everything else. Firmware ROMs are placed inside the
//! PCI memory space so that they sit behind the same window PCI BARs decode through.
//!
//! Within a container, regions of equal priority must be disjoint. A region with a higher
//! priority may shadow any part of a lower-priority one; [`AddressSpace::resolve`] returns the
//! region that wins for a given address.

use nforce_pc_constants::{
    BIOS_MAX_SIZE, BIOS_SIZE_ALIGN, FOUR_GIB, GIGABYTE_ALIGNED_LOWMEM_LIMIT, ISA_BIOS_END,
    ISA_BIOS_MAX_SIZE, LOWMEM_LIMIT, OPTION_ROM_BASE, OPTION_ROM_SIZE,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{ConfigError, MachineError, ResourceConflict};
use crate::profile::{ChipsetFeatures, PlatformProfile};

pub const PCI_WINDOW: &str = "pci";
pub const RAM_BELOW_4G: &str = "ram-below-4g";
pub const RAM_ABOVE_4G: &str = "ram-above-4g";
pub const SYSTEM_BIOS: &str = "pc.bios";
pub const ISA_BIOS: &str = "isa-bios";
pub const OPTION_ROM: &str = "pc.rom";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryContainer {
    System,
    PciMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionKind {
    Ram,
    Rom,
    /// Read-only view into another region, starting `offset` bytes into it.
    RomAlias { of: &'static str, offset: u64 },
    /// Another container mapped at this location.
    Window(MemoryContainer),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressRegion {
    name: &'static str,
    container: MemoryContainer,
    base: u64,
    size: u64,
    priority: i32,
    kind: RegionKind,
}

impl AddressRegion {
    pub fn new(
        name: &'static str,
        container: MemoryContainer,
        base: u64,
        size: u64,
        priority: i32,
        kind: RegionKind,
    ) -> Self {
        Self {
            name,
            container,
            base,
            size,
            priority,
            kind,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn container(&self) -> MemoryContainer {
        self.container
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Last address covered by the region (inclusive). `None` for an empty region.
    ///
    /// Extents running past the end of the address space are clamped to `u64::MAX`;
    /// [`AddressSpace::add_region`] rejects both kinds.
    pub fn last(&self) -> Option<u64> {
        let len = self.size.checked_sub(1)?;
        Some(self.base.saturating_add(len))
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.last()
            .is_some_and(|last| addr >= self.base && addr <= last)
    }

    pub fn overlaps(&self, other: &AddressRegion) -> bool {
        match (self.last(), other.last()) {
            (Some(last), Some(other_last)) => {
                self.container == other.container && self.base <= other_last && other.base <= last
            }
            _ => false,
        }
    }
}

/// Split of guest RAM around the PCI hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RamLayout {
    pub below_4g: u64,
    pub above_4g: u64,
}

impl RamLayout {
    pub fn for_ram_size(ram_size_bytes: u64, features: ChipsetFeatures) -> Self {
        let lowmem = if features.contains(ChipsetFeatures::GIGABYTE_ALIGN) {
            GIGABYTE_ALIGNED_LOWMEM_LIMIT
        } else {
            LOWMEM_LIMIT
        };
        if ram_size_bytes >= lowmem {
            Self {
                below_4g: lowmem,
                above_4g: ram_size_bytes - lowmem,
            }
        } else {
            Self {
                below_4g: ram_size_bytes,
                above_4g: 0,
            }
        }
    }

    /// First guest-physical address past the end of RAM.
    pub fn end(&self) -> Option<u64> {
        if self.above_4g == 0 {
            Some(self.below_4g)
        } else {
            FOUR_GIB.checked_add(self.above_4g)
        }
    }
}

/// The machine's physical memory map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSpace {
    regions: Vec<AddressRegion>,
    ram: RamLayout,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Composes the PCI window, guest RAM and firmware ROM regions for `profile`.
    pub fn build(profile: &PlatformProfile) -> Result<Self, MachineError> {
        let ram_size = profile.ram_size_bytes();
        if ram_size == 0 {
            return Err(ConfigError::ZeroRam.into());
        }

        let phys_addr_bits = profile.cpu_model().phys_addr_bits();
        let layout = RamLayout::for_ram_size(ram_size, profile.features());
        match layout.end() {
            Some(end) if end <= 1u64 << phys_addr_bits => {}
            _ => {
                return Err(ConfigError::RamExceedsAddressSpace {
                    ram_size_bytes: ram_size,
                    phys_addr_bits,
                }
                .into())
            }
        }

        let bios_size = profile.bios_size_bytes();
        if bios_size == 0 || bios_size % BIOS_SIZE_ALIGN != 0 || bios_size > BIOS_MAX_SIZE {
            return Err(ConfigError::InvalidBiosSize(bios_size).into());
        }

        let mut space = Self::new();
        space.ram = layout;

        // The PCI window spans the whole 64-bit range and sits below RAM so RAM wins wherever
        // both decode.
        space.add_region(AddressRegion::new(
            PCI_WINDOW,
            MemoryContainer::System,
            0,
            u64::MAX,
            -1,
            RegionKind::Window(MemoryContainer::PciMemory),
        ))?;

        space.add_region(AddressRegion::new(
            RAM_BELOW_4G,
            MemoryContainer::System,
            0,
            layout.below_4g,
            0,
            RegionKind::Ram,
        ))?;
        if layout.above_4g > 0 {
            space.add_region(AddressRegion::new(
                RAM_ABOVE_4G,
                MemoryContainer::System,
                FOUR_GIB,
                layout.above_4g,
                0,
                RegionKind::Ram,
            ))?;
        }

        space.add_region(AddressRegion::new(
            SYSTEM_BIOS,
            MemoryContainer::PciMemory,
            FOUR_GIB - bios_size,
            bios_size,
            0,
            RegionKind::Rom,
        ))?;

        let isa_bios_size = bios_size.min(ISA_BIOS_MAX_SIZE);
        space.add_region(AddressRegion::new(
            ISA_BIOS,
            MemoryContainer::PciMemory,
            ISA_BIOS_END - isa_bios_size,
            isa_bios_size,
            1,
            RegionKind::RomAlias {
                of: SYSTEM_BIOS,
                offset: bios_size - isa_bios_size,
            },
        ))?;

        space.add_region(AddressRegion::new(
            OPTION_ROM,
            MemoryContainer::PciMemory,
            OPTION_ROM_BASE,
            OPTION_ROM_SIZE,
            1,
            RegionKind::Rom,
        ))?;

        Ok(space)
    }

    /// Registers `region`, rejecting empty extents and same-priority overlaps.
    pub fn add_region(&mut self, region: AddressRegion) -> Result<(), ResourceConflict> {
        if region.size == 0 || region.base.checked_add(region.size - 1).is_none() {
            return Err(ResourceConflict::InvalidRegion {
                name: region.name,
                base: region.base,
                size: region.size,
            });
        }
        if let Some(existing) = self
            .regions
            .iter()
            .find(|r| r.priority == region.priority && r.overlaps(&region))
        {
            return Err(ResourceConflict::MemoryOverlap {
                name: region.name,
                existing: existing.name,
                priority: region.priority,
            });
        }

        debug!(
            region = region.name,
            container = ?region.container,
            base = format_args!("{:#x}", region.base),
            size = format_args!("{:#x}", region.size),
            priority = region.priority,
            "mapped memory region"
        );
        self.regions.push(region);
        Ok(())
    }

    pub fn regions(&self) -> &[AddressRegion] {
        &self.regions
    }

    pub fn region(&self, name: &str) -> Option<&AddressRegion> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn ram_layout(&self) -> RamLayout {
        self.ram
    }

    /// Returns the highest-priority region of `container` that decodes `addr`.
    pub fn resolve(&self, container: MemoryContainer, addr: u64) -> Option<&AddressRegion> {
        self.regions
            .iter()
            .filter(|r| r.container == container && r.contains(addr))
            .max_by_key(|r| r.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccelMode, FirmwareConfig, MachineConfig};
    use crate::profile::MachineOptions;

    fn profile(ram_size_bytes: u64) -> PlatformProfile {
        PlatformProfile::from_config(
            &MachineOptions::NFORCEPC,
            &MachineConfig {
                ram_size_bytes,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn small_ram_stays_below_4g() {
        let space = AddressSpace::build(&profile(64 << 20)).unwrap();
        let ram = space.region(RAM_BELOW_4G).unwrap();
        assert_eq!((ram.base(), ram.size()), (0, 64 << 20));
        assert!(space.region(RAM_ABOVE_4G).is_none());
        assert_eq!(space.ram_layout().end(), Some(64 << 20));
    }

    #[test]
    fn large_ram_is_split_around_the_pci_hole() {
        let space = AddressSpace::build(&profile(4 << 30)).unwrap();
        assert_eq!(space.region(RAM_BELOW_4G).unwrap().size(), LOWMEM_LIMIT);
        let high = space.region(RAM_ABOVE_4G).unwrap();
        assert_eq!(high.base(), FOUR_GIB);
        assert_eq!(high.size(), (4 << 30) - LOWMEM_LIMIT);
    }

    #[test]
    fn rom_regions_shadow_ram_and_window() {
        let space = AddressSpace::build(&profile(64 << 20)).unwrap();

        // System map: RAM beats the PCI window below the end of RAM, the window decodes above.
        assert_eq!(
            space.resolve(MemoryContainer::System, 0xE_0000).unwrap().name(),
            RAM_BELOW_4G
        );
        assert_eq!(
            space.resolve(MemoryContainer::System, 0xFFFF_FFF0).unwrap().name(),
            PCI_WINDOW
        );

        // PCI memory space: the BIOS sits at the top of 4 GiB and is mirrored below 1 MiB.
        assert_eq!(
            space.resolve(MemoryContainer::PciMemory, 0xFFFF_FFF0).unwrap().name(),
            SYSTEM_BIOS
        );
        let isa = space.resolve(MemoryContainer::PciMemory, 0xF_FFF0).unwrap();
        assert_eq!(isa.name(), ISA_BIOS);
        assert_eq!(
            isa.kind(),
            RegionKind::RomAlias {
                of: SYSTEM_BIOS,
                offset: 0x2_0000,
            }
        );
        assert_eq!(
            space.resolve(MemoryContainer::PciMemory, OPTION_ROM_BASE).unwrap().name(),
            OPTION_ROM
        );
    }

    #[test]
    fn ram_beyond_physical_address_width_is_rejected() {
        let err = AddressSpace::build(&profile(1 << 36)).unwrap_err();
        assert!(matches!(
            err,
            MachineError::Config(ConfigError::RamExceedsAddressSpace {
                phys_addr_bits: 36,
                ..
            })
        ));
    }

    #[test]
    fn misaligned_bios_is_rejected() {
        let profile = PlatformProfile::from_config(
            &MachineOptions::NFORCEPC,
            &MachineConfig {
                accel: AccelMode::Software,
                firmware: FirmwareConfig {
                    bios_size_bytes: 0x1_8001,
                },
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            AddressSpace::build(&profile),
            Err(MachineError::Config(ConfigError::InvalidBiosSize(0x1_8001)))
        ));
    }

    #[test]
    fn same_priority_overlap_is_a_conflict() {
        let mut space = AddressSpace::new();
        space
            .add_region(AddressRegion::new(
                "a",
                MemoryContainer::System,
                0x1000,
                0x1000,
                0,
                RegionKind::Ram,
            ))
            .unwrap();
        let err = space
            .add_region(AddressRegion::new(
                "b",
                MemoryContainer::System,
                0x1FFF,
                0x10,
                0,
                RegionKind::Ram,
            ))
            .unwrap_err();
        assert_eq!(
            err,
            ResourceConflict::MemoryOverlap {
                name: "b",
                existing: "a",
                priority: 0
            }
        );

        // Same range in the other container, or at a different priority, is fine.
        space
            .add_region(AddressRegion::new(
                "c",
                MemoryContainer::PciMemory,
                0x1000,
                0x1000,
                0,
                RegionKind::Rom,
            ))
            .unwrap();
        space
            .add_region(AddressRegion::new(
                "d",
                MemoryContainer::System,
                0x1800,
                0x100,
                1,
                RegionKind::Rom,
            ))
            .unwrap();
    }

    #[test]
    fn empty_region_is_rejected() {
        let mut space = AddressSpace::new();
        assert!(matches!(
            space.add_region(AddressRegion::new(
                "empty",
                MemoryContainer::System,
                0,
                0,
                0,
                RegionKind::Ram
            )),
            Err(ResourceConflict::InvalidRegion { name: "empty", .. })
        ));
    }

    #[test]
    fn empty_region_covers_nothing() {
        let region = |name, base, size| {
            AddressRegion::new(name, MemoryContainer::System, base, size, 0, RegionKind::Ram)
        };
        let empty = region("empty", 0x1000, 0);
        let ram = region("ram", 0, 0x2000);
        assert_eq!(empty.last(), None);
        assert!(!empty.contains(0x1000));
        assert!(!empty.overlaps(&ram));
        assert!(!ram.overlaps(&empty));
        assert_eq!(ram.last(), Some(0x1FFF));

        let tail = region("tail", u64::MAX - 1, 0x10);
        assert_eq!(tail.last(), Some(u64::MAX));
        assert!(tail.contains(u64::MAX));
    }
}
