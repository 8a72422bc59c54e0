use std::fmt;

use serde::Serialize;

use crate::device::DeviceId;
use crate::error::ResourceConflict;

/// A contiguous range of x86 I/O ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IoRange {
    pub base: u16,
    pub len: u16,
}

impl IoRange {
    pub const fn new(base: u16, len: u16) -> Self {
        Self { base, len }
    }

    pub const fn single(port: u16) -> Self {
        Self { base: port, len: 1 }
    }

    /// Last port covered by the range, widened so that out-of-range ends are representable.
    pub fn last(&self) -> u32 {
        (u32::from(self.base) + u32::from(self.len)).saturating_sub(1)
    }

    pub fn is_valid(&self) -> bool {
        self.len != 0 && self.last() <= u32::from(u16::MAX)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.len != 0 && u32::from(port) >= u32::from(self.base) && u32::from(port) <= self.last()
    }

    pub fn overlaps(&self, other: &IoRange) -> bool {
        self.len != 0
            && other.len != 0
            && u32::from(self.base) <= other.last()
            && u32::from(other.base) <= self.last()
    }
}

impl fmt::Display for IoRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len == 0 {
            write!(f, "{:#x}..{:#x} (empty)", self.base, self.base)
        } else {
            write!(f, "{:#x}..={:#x}", self.base, self.last())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IoClaim {
    pub range: IoRange,
    pub owner: DeviceId,
}

/// Ownership map of the legacy I/O port space.
#[derive(Debug, Clone, Default)]
pub struct IoPortRegistry {
    claims: Vec<IoClaim>,
}

impl IoPortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that `range` is well-formed and unclaimed without recording anything.
    pub fn check(&self, range: IoRange) -> Result<(), ResourceConflict> {
        if !range.is_valid() {
            return Err(ResourceConflict::InvalidIoRange { range });
        }
        match self.claims.iter().find(|c| c.range.overlaps(&range)) {
            Some(existing) => Err(ResourceConflict::IoPortsInUse {
                range,
                existing: existing.owner,
            }),
            None => Ok(()),
        }
    }

    pub fn claim(&mut self, range: IoRange, owner: DeviceId) -> Result<(), ResourceConflict> {
        self.check(range)?;
        self.claims.push(IoClaim { range, owner });
        Ok(())
    }

    pub fn owner_of(&self, port: u16) -> Option<DeviceId> {
        self.claims
            .iter()
            .find(|c| c.range.contains(port))
            .map(|c| c.owner)
    }

    pub fn claims(&self) -> &[IoClaim] {
        &self.claims
    }
}
