//! Capacity planning for the fixed number of PMP slots
//!
//! The PMP unit has a small number of slots that must be shared between several protections:
//!
//! | Protection | Slots (power-of-two) | Slots (arbitrary) |
//! | ---------- | :------------------: | :---------------: |
//! | interrupt stack guard (only with stack guards) | 1 | 1 |
//! | core state: `R` | 1 | 1 |
//! | program and read only data: `RX` | 1 | 2 |
//! | user thread stack: `RW` | 1 | 2 |
//! | each memory domain region | 1 | 2 |
//!
//! Regions of arbitrary size and alignment are expressed as a *top of range* pair where one slot holds the base
//! and the next one the bound, which is why they cost two slots each.
//! Machine mode additionally uses a fixed budget of [`MACHINE_MODE_SLOTS`] slots that is independent of the
//! per-thread budget.

use crate::error::ConfigError;

/// Number of slots that machine mode uses for stack guard windows and global boot entries.
///
/// This is plenty for machine mode and must be available even on hardware with very few PMP slots.
pub const MACHINE_MODE_SLOTS: usize = 8;

/// Maximum number of PMP entries that the RISC-V privileged ISA allows an implementation to have.
pub const MAX_HARDWARE_SLOTS: usize = 64;

/// Width of a machine word and therefore of every `pmpaddr` and `pmpcfg` register.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WordWidth {
    Bits32,
    Bits64,
}

impl WordWidth {
    /// The word width of the target this crate is compiled for.
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::Bits64
        } else {
            Self::Bits32
        }
    }

    /// How many 8-bit slot configurations one `pmpcfg` register packs.
    pub const fn cfg_entries_per_register(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    pub const fn bits(self) -> u32 {
        match self {
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }
}

/// How the PMP hardware expresses the address range of a region.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PmpAlignment {
    /// Regions are naturally aligned powers of two and occupy a single slot each.
    PowerOfTwo,
    /// Regions may have any 4-byte granular base and size and occupy a base/bound slot pair each.
    Arbitrary,
}

impl PmpAlignment {
    /// How many physical slots one logical region occupies.
    pub const fn slots_per_region(self) -> usize {
        match self {
            Self::PowerOfTwo => 1,
            Self::Arbitrary => 2,
        }
    }
}

/// The build-time inputs of capacity planning.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PmpConfig {
    /// Number of PMP entries implemented by the hardware
    pub total_slots: usize,
    pub word_width: WordWidth,
    pub alignment: PmpAlignment,
    /// Whether stack guard regions are enabled
    pub stack_guard: bool,
    /// Whether user threads are isolated from each other and from the kernel
    pub userspace: bool,
}

/// Number of slots that every user thread needs for its mandatory regions.
pub const fn reserved_for_user_thread(alignment: PmpAlignment, stack_guard: bool) -> usize {
    let regions = match alignment {
        // core state, program and stack
        PmpAlignment::PowerOfTwo => 3,
        // core state as one naturally aligned slot, program and stack as TOR pairs
        PmpAlignment::Arbitrary => 5,
    };
    if stack_guard {
        regions + 1
    } else {
        regions
    }
}

/// Number of `pmpcfg` registers needed to hold the configuration of `slots` slots.
pub const fn cfg_register_count(slots: usize, word_width: WordWidth) -> usize {
    let per_register = word_width.cfg_entries_per_register();
    (slots + per_register - 1) / per_register
}

/// The result of distributing the hardware's PMP slots between all protections.
///
/// A plan can only be constructed through [`PmpCapacityPlan::new`] so every instance is known to fit onto the
/// hardware it was computed for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PmpCapacityPlan {
    config: PmpConfig,
    reserved_for_user_thread: usize,
    max_dynamic_regions: usize,
    cfg_register_count: usize,
    machine_mode_cfg_register_count: usize,
}

impl PmpCapacityPlan {
    /// Distribute the slots described by `config`.
    ///
    /// Fails if the hardware cannot satisfy the requested protections.
    pub const fn new(config: PmpConfig) -> Result<Self, ConfigError> {
        if config.total_slots > MAX_HARDWARE_SLOTS {
            return Err(ConfigError::UnsupportedSlotCount(config.total_slots));
        }
        if config.word_width.bits() > usize::BITS {
            return Err(ConfigError::UnsupportedWordWidth);
        }
        if config.stack_guard && config.total_slots < MACHINE_MODE_SLOTS {
            return Err(ConfigError::MachineModeBudget {
                required: MACHINE_MODE_SLOTS,
                available: config.total_slots,
            });
        }

        let (reserved, max_dynamic_regions) = if config.userspace {
            let reserved = reserved_for_user_thread(config.alignment, config.stack_guard);
            if config.total_slots < reserved {
                return Err(ConfigError::InsufficientSlots {
                    required: reserved,
                    available: config.total_slots,
                });
            }
            (
                reserved,
                (config.total_slots - reserved) / config.alignment.slots_per_region(),
            )
        } else {
            (0, 0)
        };

        Ok(Self {
            config,
            reserved_for_user_thread: reserved,
            max_dynamic_regions,
            cfg_register_count: cfg_register_count(config.total_slots, config.word_width),
            machine_mode_cfg_register_count: cfg_register_count(
                MACHINE_MODE_SLOTS,
                config.word_width,
            ),
        })
    }

    pub const fn config(&self) -> &PmpConfig {
        &self.config
    }

    pub const fn total_slots(&self) -> usize {
        self.config.total_slots
    }

    pub const fn word_width(&self) -> WordWidth {
        self.config.word_width
    }

    pub const fn alignment(&self) -> PmpAlignment {
        self.config.alignment
    }

    pub const fn stack_guard(&self) -> bool {
        self.config.stack_guard
    }

    pub const fn userspace(&self) -> bool {
        self.config.userspace
    }

    /// Slots that hold the mandatory regions of every user thread.
    pub const fn reserved_for_user_thread(&self) -> usize {
        self.reserved_for_user_thread
    }

    /// How many memory domain regions a single user thread can have on top of its mandatory regions.
    pub const fn max_dynamic_regions(&self) -> usize {
        self.max_dynamic_regions
    }

    /// Number of `pmpcfg` registers covering all hardware slots.
    pub const fn cfg_register_count(&self) -> usize {
        self.cfg_register_count
    }

    pub const fn machine_mode_slots(&self) -> usize {
        MACHINE_MODE_SLOTS
    }

    /// Number of `pmpcfg` registers covering the machine mode slots.
    pub const fn machine_mode_cfg_register_count(&self) -> usize {
        self.machine_mode_cfg_register_count
    }
}
