//! Encoding of single PMP entries
//!
//! Each PMP slot consists of a `pmpaddr` register and an 8-bit configuration which is packed together with the
//! configuration of neighbouring slots into a `pmpcfg` register.
//!
//! ```text
//!    7    6   5    4   3    2   1   0
//! ┌───┬───────┬────────┬───┬───┬───┐
//! │ L │   0   │   A    │ X │ W │ R │
//! └───┴───────┴────────┴───┴───┴───┘
//!                  pmpcfg entry
//! ```
//!
//! `pmpaddr` registers hold bits `XLEN+1..2` of an address, i.e. the address shifted right by two.
//! The address matching mode `A` decides how the address register is interpreted:
//!
//! | `A` | Name | Matches |
//! | :-: | ---- | ------- |
//! | `0` | OFF | nothing |
//! | `1` | TOR | `pmpaddr[i-1] <= addr < pmpaddr[i]` |
//! | `2` | NA4 | the naturally aligned 4-byte region at `pmpaddr[i]` |
//! | `3` | NAPOT | a naturally aligned power-of-two region encoded by trailing ones in `pmpaddr[i]` |

use crate::error::PmpError;
use crate::pmp::plan::{PmpAlignment, WordWidth};
use bitflags::bitflags;

bitflags! {
    /// Access permissions granted by a PMP entry.
    ///
    /// An entry without any permission bits denies all accesses which is used for stack guards.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct PmpPermissions: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl PmpPermissions {
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);
    pub const READ_EXECUTE: Self = Self::READ.union(Self::EXECUTE);
}

/// Address matching mode of a PMP entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum AddressMatching {
    Off = 0,
    Tor = 1,
    Na4 = 2,
    Napot = 3,
}

const ADDRESS_MATCHING_SHIFT: u8 = 3;
const LOCK_BIT: u8 = 1 << 7;

/// Assemble the 8-bit configuration of a single slot.
pub const fn cfg_byte(permissions: PmpPermissions, matching: AddressMatching, locked: bool) -> u8 {
    let lock = if locked { LOCK_BIT } else { 0 };
    permissions.bits() | ((matching as u8) << ADDRESS_MATCHING_SHIFT) | lock
}

/// The values of one slot as they are written into the hardware.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PmpEntry {
    /// Raw value of the `pmpaddr` register
    pub addr: usize,
    /// 8-bit configuration of the slot
    pub cfg: u8,
}

impl PmpEntry {
    /// An entry that matches nothing.
    pub const OFF: Self = Self { addr: 0, cfg: 0 };

    /// Encode a naturally aligned power-of-two region as a single entry.
    ///
    /// Regions of exactly 4 bytes use NA4, larger ones NAPOT.
    pub fn napot(base: usize, size: usize, permissions: PmpPermissions) -> Result<Self, PmpError> {
        let invalid = PmpError::InvalidRegion { base, size };
        if size < 4 || !size.is_power_of_two() || base & (size - 1) != 0 {
            return Err(invalid);
        }

        if size == 4 {
            Ok(Self {
                addr: base >> 2,
                cfg: cfg_byte(permissions, AddressMatching::Na4, false),
            })
        } else {
            Ok(Self {
                addr: (base >> 2) | ((size >> 3) - 1),
                cfg: cfg_byte(permissions, AddressMatching::Napot, false),
            })
        }
    }

    /// Encode an arbitrary 4-byte granular region as a top-of-range pair.
    ///
    /// The first entry only carries the base address and is switched off, the second one carries the bound and the
    /// permissions.
    pub fn tor(
        base: usize,
        size: usize,
        permissions: PmpPermissions,
    ) -> Result<[Self; 2], PmpError> {
        let invalid = PmpError::InvalidRegion { base, size };
        if size == 0 || base & 0b11 != 0 || size & 0b11 != 0 {
            return Err(invalid);
        }
        let end = base.checked_add(size).ok_or(invalid)?;

        Ok([
            Self {
                addr: base >> 2,
                cfg: cfg_byte(PmpPermissions::empty(), AddressMatching::Off, false),
            },
            Self {
                addr: end >> 2,
                cfg: cfg_byte(permissions, AddressMatching::Tor, false),
            },
        ])
    }

    pub fn matching(&self) -> AddressMatching {
        match (self.cfg >> ADDRESS_MATCHING_SHIFT) & 0b11 {
            0 => AddressMatching::Off,
            1 => AddressMatching::Tor,
            2 => AddressMatching::Na4,
            _ => AddressMatching::Napot,
        }
    }

    pub fn permissions(&self) -> PmpPermissions {
        PmpPermissions::from_bits_truncate(self.cfg)
    }
}

/// One logical region encoded into the one or two slots it occupies.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EncodedRegion {
    entries: [PmpEntry; 2],
    len: usize,
}

impl EncodedRegion {
    /// Encode a region the way regions are expressed under `alignment`.
    pub fn new(
        base: usize,
        size: usize,
        permissions: PmpPermissions,
        alignment: PmpAlignment,
    ) -> Result<Self, PmpError> {
        match alignment {
            PmpAlignment::PowerOfTwo => Ok(Self::single(PmpEntry::napot(base, size, permissions)?)),
            PmpAlignment::Arbitrary => Ok(Self {
                entries: PmpEntry::tor(base, size, permissions)?,
                len: 2,
            }),
        }
    }

    pub fn single(entry: PmpEntry) -> Self {
        Self {
            entries: [entry, PmpEntry::OFF],
            len: 1,
        }
    }

    pub fn entries(&self) -> &[PmpEntry] {
        &self.entries[..self.len]
    }
}

/// Store the configuration of `slot` in the packed `pmpcfg` register values `cfg_registers`.
pub(crate) fn set_cfg(cfg_registers: &mut [usize], slot: usize, cfg: u8, word_width: WordWidth) {
    let per_register = word_width.cfg_entries_per_register();
    let shift = (slot % per_register) * 8;
    let register = &mut cfg_registers[slot / per_register];
    *register = (*register & !(0xff << shift)) | ((cfg as usize) << shift);
}

/// Extract the configuration of `slot` from the packed `pmpcfg` register values `cfg_registers`.
pub(crate) fn get_cfg(cfg_registers: &[usize], slot: usize, word_width: WordWidth) -> u8 {
    let per_register = word_width.cfg_entries_per_register();
    let shift = (slot % per_register) * 8;
    ((cfg_registers[slot / per_register] >> shift) & 0xff) as u8
}
