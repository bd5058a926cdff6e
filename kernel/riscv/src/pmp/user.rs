//! PMP image of a single user thread
//!
//! The slots of a user thread's image are laid out in two consecutive ranges:
//!
//! ```text
//! 0                    domain_offset            last_programmed_index          total_slots
//! ┌────────────────────┬────────────────────────┬──────────────────────────────┐
//! │ mandatory regions  │ memory domain regions  │ unused (OFF)                 │
//! └────────────────────┴────────────────────────┴──────────────────────────────┘
//! ```
//!
//! The PMP unit grants an access according to the *first* slot whose range contains the address.
//! Mandatory regions therefore always come first and memory domain regions keep the order in which they were
//! appended.

use crate::error::{ConfigError, PmpError};
use crate::pmp::entry::{self, EncodedRegion, PmpEntry, PmpPermissions};
use crate::pmp::plan::{PmpAlignment, PmpCapacityPlan};
use crate::pmp::{load_image, PmpHardware};

/// A contiguous range of physical memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Region {
    pub base: usize,
    pub size: usize,
}

/// A region of a thread's memory domain together with the access it grants.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DomainRegion {
    pub base: usize,
    pub size: usize,
    pub permissions: PmpPermissions,
}

/// The static memory layout that every user thread is isolated to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UserLayout {
    /// Per-core kernel state that user code may read, e.g. the current thread pointer.
    ///
    /// Always encoded as a single naturally aligned slot.
    pub core_state: Region,
    /// Program code and read only data
    pub program: Region,
    /// The stack the thread uses while executing in user mode
    pub user_stack: Region,
    /// Boundary between the privileged and the unprivileged part of the thread's stack
    pub privileged_stack_base: usize,
    /// Guard below the interrupt stack, only programmed when stack guards are enabled.
    ///
    /// Always encoded as a single naturally aligned slot.
    pub stack_guard: Region,
}

/// Upper bound of mandatory slots under every configuration.
const MAX_MANDATORY_SLOTS: usize = 6;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UserModePmpState<const SLOTS: usize, const CFG: usize> {
    privileged_stack_base: usize,
    address_registers: [usize; SLOTS],
    config_registers: [usize; CFG],
    domain_offset: usize,
    last_programmed_index: usize,
    /// Bumped by every commit. 64 bits never wrap within the lifetime of a thread so a stale generation can
    /// never compare equal again.
    update_generation: u64,
    plan: &'static PmpCapacityPlan,
}

impl<const SLOTS: usize, const CFG: usize> UserModePmpState<SLOTS, CFG> {
    /// Create an empty image for a thread.
    ///
    /// All images of a build share the one `plan` they were created with.
    /// The storage dimensions `SLOTS` and `CFG` must be the ones computed by it.
    pub const fn new(plan: &'static PmpCapacityPlan) -> Result<Self, ConfigError> {
        if SLOTS != plan.total_slots() || CFG != plan.cfg_register_count() {
            return Err(ConfigError::StorageMismatch {
                slots: SLOTS,
                cfg_registers: CFG,
            });
        }

        Ok(Self {
            privileged_stack_base: 0,
            address_registers: [0; SLOTS],
            config_registers: [0; CFG],
            domain_offset: plan.reserved_for_user_thread(),
            last_programmed_index: plan.reserved_for_user_thread(),
            update_generation: 0,
            plan,
        })
    }

    /// Program the mandatory regions of the thread and [`reset`](Self::reset) its memory domain.
    ///
    /// Nothing is changed if any region of `layout` cannot be expressed by the PMP unit.
    pub fn set_mandatory_regions(&mut self, layout: &UserLayout) -> Result<(), PmpError> {
        let alignment = self.plan.alignment();
        let mut entries = [PmpEntry::OFF; MAX_MANDATORY_SLOTS];
        let mut count = 0;
        let mut push = |region: EncodedRegion| {
            for &entry in region.entries() {
                entries[count] = entry;
                count += 1;
            }
        };

        if self.plan.stack_guard() {
            let guard = layout.stack_guard;
            let entry = PmpEntry::napot(guard.base, guard.size, PmpPermissions::empty())?;
            push(EncodedRegion::single(entry));
        }
        let core_state = layout.core_state;
        let entry = PmpEntry::napot(core_state.base, core_state.size, PmpPermissions::READ)?;
        push(EncodedRegion::single(entry));

        let program = layout.program;
        let perms = PmpPermissions::READ_EXECUTE;
        push(EncodedRegion::new(program.base, program.size, perms, alignment)?);

        let stack = layout.user_stack;
        let perms = PmpPermissions::READ_WRITE;
        push(EncodedRegion::new(stack.base, stack.size, perms, alignment)?);
        debug_assert_eq!(count, self.plan.reserved_for_user_thread());

        for (slot, entry) in entries[..count].iter().enumerate() {
            self.write_slot(slot, *entry);
        }
        self.privileged_stack_base = layout.privileged_stack_base;
        log::trace!(
            "programmed {} mandatory PMP slots, privileged stack starts at {:#x}",
            count,
            layout.privileged_stack_base
        );
        self.reset();
        Ok(())
    }

    /// Drop all memory domain regions so that the image only contains the mandatory regions.
    pub fn reset(&mut self) {
        let reserved = self.plan.reserved_for_user_thread();
        for slot in reserved..SLOTS {
            self.write_slot(slot, PmpEntry::OFF);
        }
        self.domain_offset = reserved;
        self.last_programmed_index = reserved;
        log::trace!("reset user PMP image to {} mandatory slots", reserved);
    }

    /// Append a memory domain region behind all previously appended ones.
    ///
    /// Returns the first slot that the region occupies.
    /// Fails without modifying the image if the thread's dynamic region budget is exhausted or if the region
    /// cannot be expressed with the configured alignment mode.
    pub fn append_dynamic_region(
        &mut self,
        base: usize,
        size: usize,
        permissions: PmpPermissions,
    ) -> Result<usize, PmpError> {
        let max = self.plan.max_dynamic_regions();
        let alignment = self.plan.alignment();
        let limit = self.domain_offset + max * alignment.slots_per_region();
        if self.last_programmed_index + alignment.slots_per_region() > limit {
            log::warn!(
                "memory domain needs more than {} PMP regions, rejecting region at {:#x}",
                max,
                base
            );
            return Err(PmpError::CapacityExceeded { max });
        }

        let region = match EncodedRegion::new(base, size, permissions, alignment) {
            Ok(region) => region,
            Err(e) => {
                log::warn!("{}", e);
                return Err(e);
            }
        };

        let first_slot = self.last_programmed_index;
        for (i, entry) in region.entries().iter().enumerate() {
            self.write_slot(first_slot + i, *entry);
        }
        self.last_programmed_index += region.entries().len();
        log::trace!(
            "appended PMP region {:#x}+{:#x} ({:?}) at slot {}",
            base,
            size,
            permissions,
            first_slot
        );
        Ok(first_slot)
    }

    /// Mark the image as complete so that it is loaded on the next switch to the thread.
    ///
    /// Returns the new update generation.
    pub fn commit(&mut self) -> u64 {
        self.update_generation += 1;
        log::debug!(
            "committed user PMP image with {} domain slots as generation {}",
            self.last_programmed_index - self.domain_offset,
            self.update_generation
        );
        self.update_generation
    }

    /// Replace all memory domain regions with `regions` in iteration order and commit the result.
    ///
    /// If any region is rejected, the image is restored to the state it had before the call.
    pub fn rebuild_domain<I>(&mut self, regions: I) -> Result<u64, PmpError>
    where
        I: IntoIterator<Item = DomainRegion>,
    {
        let previous = self.clone();
        self.reset();
        for region in regions {
            let result = self.append_dynamic_region(region.base, region.size, region.permissions);
            if let Err(e) = result {
                *self = previous;
                return Err(e);
            }
        }
        Ok(self.commit())
    }

    /// Write the image into the PMP unit.
    ///
    /// Must be called with interrupts disabled since the PMP unit is inconsistent while it is being written.
    pub fn load<H: PmpHardware>(&self, hw: &mut H) {
        log::debug!(
            "loading user PMP image generation {} with {} slots",
            self.update_generation,
            self.last_programmed_index
        );
        load_image(
            hw,
            &self.address_registers,
            &self.config_registers,
            self.last_programmed_index,
            self.plan.cfg_register_count(),
        );
    }

    /// Whether this image already reflects the memory domain state of `generation`.
    pub fn is_current(&self, generation: u64) -> bool {
        self.update_generation == generation
    }

    pub fn privileged_stack_base(&self) -> usize {
        self.privileged_stack_base
    }

    pub fn address_registers(&self) -> &[usize; SLOTS] {
        &self.address_registers
    }

    pub fn config_registers(&self) -> &[usize; CFG] {
        &self.config_registers
    }

    /// The `pmpaddr` values of all memory domain slots, in hardware order.
    pub fn domain_address_registers(&self) -> &[usize] {
        &self.address_registers[self.domain_offset..self.last_programmed_index]
    }

    /// The 8-bit configuration of `slot`.
    pub fn slot_cfg(&self, slot: usize) -> u8 {
        entry::get_cfg(&self.config_registers, slot, self.plan.word_width())
    }

    pub fn domain_offset(&self) -> usize {
        self.domain_offset
    }

    pub fn last_programmed_index(&self) -> usize {
        self.last_programmed_index
    }

    pub fn update_generation(&self) -> u64 {
        self.update_generation
    }

    /// The capacity plan shared by all images of this build.
    pub fn plan(&self) -> &'static PmpCapacityPlan {
        self.plan
    }

    /// How many more memory domain regions fit into the image.
    pub fn remaining_dynamic_regions(&self) -> usize {
        let used = (self.last_programmed_index - self.domain_offset)
            / self.plan.alignment().slots_per_region();
        self.plan.max_dynamic_regions() - used
    }

    /// Whether regions of this image are encoded as base/bound pairs.
    pub fn uses_tor(&self) -> bool {
        self.plan.alignment() == PmpAlignment::Arbitrary
    }

    fn write_slot(&mut self, slot: usize, entry: PmpEntry) {
        self.address_registers[slot] = entry.addr;
        entry::set_cfg(
            &mut self.config_registers,
            slot,
            entry.cfg,
            self.plan.word_width(),
        );
    }
}
