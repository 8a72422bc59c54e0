//! Global system interrupt (GSI) line table.
//!
//! Each line has at most one source device and at most one sink (an interrupt controller pin).
//! Sinks are connected when the PIC pair is realized; device sources claim lines afterwards, and
//! a claim on a line without a sink is refused so that no device ends up raising into nothing.
//!
//! The FERR# line is not a device claim. The CPU that drives it is recorded in
//! [`FerrSignaling`], and the line stays closed to device claims while it is reserved.

use nforce_pc_constants::{FERR_IRQ, GSI_NUM_PINS};
use serde::Serialize;
use tracing::debug;

use crate::device::DeviceId;
use crate::error::ResourceConflict;
use crate::profile::PlatformProfile;

/// Global system interrupt number.
pub type Gsi = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PicChip {
    Master,
    Slave,
}

impl PicChip {
    /// Controller and input pin that ISA IRQ `irq` (0-15) is delivered to. `None` for lines
    /// above the ISA range.
    pub fn for_isa_irq(irq: Gsi) -> Option<(Self, u8)> {
        let pin = (irq % 8) as u8;
        match irq {
            0..=7 => Some((Self::Master, pin)),
            8..=15 => Some((Self::Slave, pin)),
            _ => None,
        }
    }
}

/// The controller input a line is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineSink {
    pub controller: DeviceId,
    pub pin: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterruptLine {
    pub index: Gsi,
    pub source: Option<DeviceId>,
    pub sink: Option<LineSink>,
}

/// How x87 floating point errors reach the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FerrSignaling {
    /// The emulator raises `line` on behalf of `cpu`, once wired.
    Software { line: Gsi, cpu: Option<DeviceId> },
    /// The hypervisor delivers FERR# itself; no line is reserved.
    Host,
}

#[derive(Debug, Clone)]
pub struct InterruptRouter {
    lines: Vec<InterruptLine>,
    ferr: FerrSignaling,
}

impl InterruptRouter {
    pub fn build(profile: &PlatformProfile) -> Self {
        let lines = (0..GSI_NUM_PINS)
            .map(|index| InterruptLine {
                index,
                source: None,
                sink: None,
            })
            .collect();
        let ferr = if profile.strategy().signals_ferr_in_software() {
            FerrSignaling::Software {
                line: FERR_IRQ,
                cpu: None,
            }
        } else {
            FerrSignaling::Host
        };
        debug!(lines = GSI_NUM_PINS, ?ferr, "allocated interrupt lines");
        Self { lines, ferr }
    }

    pub fn line(&self, gsi: Gsi) -> Option<&InterruptLine> {
        self.lines.get(gsi as usize)
    }

    pub fn lines(&self) -> &[InterruptLine] {
        &self.lines
    }

    fn line_mut(&mut self, gsi: Gsi) -> Result<&mut InterruptLine, ResourceConflict> {
        self.lines
            .get_mut(gsi as usize)
            .ok_or(ResourceConflict::NoSuchLine(gsi))
    }

    /// Delivers `gsi` to `sink`. Each line feeds exactly one controller pin.
    pub fn connect_sink(&mut self, gsi: Gsi, sink: LineSink) -> Result<(), ResourceConflict> {
        let line = self.line_mut(gsi)?;
        if line.sink.is_some() {
            return Err(ResourceConflict::LineAlreadyConnected(gsi));
        }
        line.sink = Some(sink);
        Ok(())
    }

    /// Fails unless `gsi` is connected to a controller input.
    pub fn require_routed(&self, gsi: Gsi) -> Result<LineSink, ResourceConflict> {
        self.line(gsi)
            .ok_or(ResourceConflict::NoSuchLine(gsi))?
            .sink
            .ok_or(ResourceConflict::UnroutedLine(gsi))
    }

    /// Checks that a device could drive `gsi` without recording the claim.
    pub fn check_claim(&self, gsi: Gsi) -> Result<(), ResourceConflict> {
        self.require_routed(gsi)?;
        if self.ferr_line() == Some(gsi) {
            return Err(ResourceConflict::LineReserved(gsi));
        }
        if let Some(existing) = self.lines[gsi as usize].source {
            return Err(ResourceConflict::LineClaimed {
                line: gsi,
                existing,
            });
        }
        Ok(())
    }

    pub fn claim_source(&mut self, gsi: Gsi, device: DeviceId) -> Result<(), ResourceConflict> {
        self.check_claim(gsi)?;
        self.line_mut(gsi)?.source = Some(device);
        Ok(())
    }

    pub fn ferr(&self) -> FerrSignaling {
        self.ferr
    }

    pub fn ferr_line(&self) -> Option<Gsi> {
        match self.ferr {
            FerrSignaling::Software { line, .. } => Some(line),
            FerrSignaling::Host => None,
        }
    }

    /// CPU raising the FERR line, once wired.
    pub fn ferr_source(&self) -> Option<DeviceId> {
        match self.ferr {
            FerrSignaling::Software { cpu, .. } => cpu,
            FerrSignaling::Host => None,
        }
    }

    /// Makes `cpu` the driver of the reserved FERR line. The line must already be connected to
    /// the PIC. Returns `false` when FERR is delivered by the host and nothing needed wiring.
    pub fn wire_ferr(&mut self, cpu: DeviceId) -> Result<bool, ResourceConflict> {
        let FerrSignaling::Software { line, cpu: driver } = &mut self.ferr else {
            return Ok(false);
        };
        let line = *line;
        if let Some(existing) = *driver {
            return Err(ResourceConflict::LineClaimed { line, existing });
        }
        let routed = self
            .lines
            .get(line as usize)
            .ok_or(ResourceConflict::NoSuchLine(line))?;
        if routed.sink.is_none() {
            return Err(ResourceConflict::UnroutedLine(line));
        }
        *driver = Some(cpu);
        debug!(line, %cpu, "wired FERR# to interrupt line");
        Ok(true)
    }

    pub fn ferr_wired(&self) -> bool {
        self.ferr_source().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccelMode, MachineConfig};
    use crate::profile::MachineOptions;

    fn router(accel: AccelMode) -> InterruptRouter {
        let profile = PlatformProfile::from_config(
            &MachineOptions::NFORCEPC,
            &MachineConfig {
                accel,
                ..Default::default()
            },
        )
        .unwrap();
        InterruptRouter::build(&profile)
    }

    fn sink(pin: u8) -> LineSink {
        LineSink {
            controller: DeviceId(7),
            pin,
        }
    }

    #[test]
    fn table_has_every_gsi_unconnected() {
        let router = router(AccelMode::Software);
        assert_eq!(router.lines().len(), GSI_NUM_PINS as usize);
        assert!(router
            .lines()
            .iter()
            .enumerate()
            .all(|(i, l)| l.index as usize == i && l.source.is_none() && l.sink.is_none()));
        assert!(router.line(GSI_NUM_PINS).is_none());
    }

    #[test]
    fn ferr_is_reserved_only_for_software_strategy() {
        assert_eq!(
            router(AccelMode::Software).ferr(),
            FerrSignaling::Software {
                line: FERR_IRQ,
                cpu: None,
            }
        );
        let mut hw = router(AccelMode::HardwareAssisted);
        assert_eq!(hw.ferr(), FerrSignaling::Host);
        assert_eq!(hw.wire_ferr(DeviceId(0)), Ok(false));
        assert!(!hw.ferr_wired());
    }

    #[test]
    fn claims_require_a_sink_and_are_exclusive() {
        let mut router = router(AccelMode::Software);
        assert_eq!(
            router.claim_source(8, DeviceId(1)),
            Err(ResourceConflict::UnroutedLine(8))
        );

        router.connect_sink(8, sink(0)).unwrap();
        assert_eq!(router.require_routed(8), Ok(sink(0)));
        assert_eq!(
            router.connect_sink(8, sink(0)),
            Err(ResourceConflict::LineAlreadyConnected(8))
        );

        router.claim_source(8, DeviceId(1)).unwrap();
        assert_eq!(
            router.claim_source(8, DeviceId(2)),
            Err(ResourceConflict::LineClaimed {
                line: 8,
                existing: DeviceId(1),
            })
        );
        assert_eq!(
            router.claim_source(GSI_NUM_PINS, DeviceId(2)),
            Err(ResourceConflict::NoSuchLine(GSI_NUM_PINS))
        );
    }

    #[test]
    fn isa_irqs_split_across_the_pic_pair() {
        assert_eq!(PicChip::for_isa_irq(0), Some((PicChip::Master, 0)));
        assert_eq!(PicChip::for_isa_irq(7), Some((PicChip::Master, 7)));
        assert_eq!(PicChip::for_isa_irq(8), Some((PicChip::Slave, 0)));
        assert_eq!(PicChip::for_isa_irq(FERR_IRQ), Some((PicChip::Slave, 5)));
        assert_eq!(PicChip::for_isa_irq(15), Some((PicChip::Slave, 7)));
        assert_eq!(PicChip::for_isa_irq(16), None);
        assert_eq!(PicChip::for_isa_irq(GSI_NUM_PINS - 1), None);
    }

    #[test]
    fn ferr_wiring_records_the_cpu_without_a_device_claim() {
        let mut router = router(AccelMode::Software);
        assert_eq!(
            router.wire_ferr(DeviceId(0)),
            Err(ResourceConflict::UnroutedLine(FERR_IRQ))
        );
        assert!(!router.ferr_wired());

        router.connect_sink(FERR_IRQ, sink(5)).unwrap();
        assert_eq!(router.wire_ferr(DeviceId(0)), Ok(true));
        assert!(router.ferr_wired());
        assert_eq!(router.ferr_source(), Some(DeviceId(0)));
        assert_eq!(
            router.ferr(),
            FerrSignaling::Software {
                line: FERR_IRQ,
                cpu: Some(DeviceId(0)),
            }
        );
        assert_eq!(router.line(FERR_IRQ).unwrap().source, None);

        assert_eq!(
            router.wire_ferr(DeviceId(1)),
            Err(ResourceConflict::LineClaimed {
                line: FERR_IRQ,
                existing: DeviceId(0),
            })
        );
    }

    #[test]
    fn reserved_ferr_line_refuses_device_claims() {
        let mut sw = router(AccelMode::Software);
        sw.connect_sink(FERR_IRQ, sink(5)).unwrap();
        assert_eq!(
            sw.claim_source(FERR_IRQ, DeviceId(3)),
            Err(ResourceConflict::LineReserved(FERR_IRQ))
        );

        let mut hw = router(AccelMode::HardwareAssisted);
        hw.connect_sink(FERR_IRQ, sink(5)).unwrap();
        assert_eq!(hw.claim_source(FERR_IRQ, DeviceId(3)), Ok(()));
    }
}
