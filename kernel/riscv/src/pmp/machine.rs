//! PMP image used while executing in machine mode
//!
//! Machine mode uses a fixed budget of [`MACHINE_MODE_SLOTS`] slots which is laid out as follows:
//!
//! ```text
//! 0                 guard_slots             last_programmed_index      MACHINE_MODE_SLOTS
//! ┌─────────────────┬───────────────────────┬──────────────────────────┐
//! │ stack guard     │ global boot entries   │ unused (OFF)             │
//! └─────────────────┴───────────────────────┴──────────────────────────┘
//! ```
//!
//! The stack guard must come first so that it takes priority over any global entry covering the same memory.
//! It is rewritten whenever a different stack becomes authoritative, e.g. when entering a nested interrupt.
//! This state is shared between all threads of a core and must only be modified with interrupts disabled, which
//! is why [`CoreArch`](crate::thread::CoreArch) only hands it out through an [`IrqSpinLock`](ksync::IrqSpinLock).

//!
//! Machine mode only honours unlocked entries while `mstatus.MPRV` redirects its accesses to user mode checks.
//! [`MachineModePmpState::load`] therefore enforces the image on machine mode after writing it, and the global
//! entries must include a catch-all region granting machine mode its regular access.

use crate::error::{ConfigError, PmpError};
use crate::pmp::entry::{self, EncodedRegion, PmpEntry, PmpPermissions};
use crate::pmp::plan::{PmpCapacityPlan, MACHINE_MODE_SLOTS};
use crate::pmp::{load_image, PmpHardware};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MachineModePmpState<const CFG: usize> {
    address_registers: [usize; MACHINE_MODE_SLOTS],
    config_registers: [usize; CFG],
    last_programmed_index: usize,
    plan: &'static PmpCapacityPlan,
}

impl<const CFG: usize> MachineModePmpState<CFG> {
    /// Create an image in which the guard slots are reserved but switched off.
    ///
    /// `CFG` must be the number of machine mode configuration registers computed by `plan`.
    pub const fn new(plan: &'static PmpCapacityPlan) -> Result<Self, ConfigError> {
        if CFG != plan.machine_mode_cfg_register_count() {
            return Err(ConfigError::StorageMismatch {
                slots: MACHINE_MODE_SLOTS,
                cfg_registers: CFG,
            });
        }
        if plan.total_slots() < MACHINE_MODE_SLOTS {
            return Err(ConfigError::MachineModeBudget {
                required: MACHINE_MODE_SLOTS,
                available: plan.total_slots(),
            });
        }

        Ok(Self {
            address_registers: [0; MACHINE_MODE_SLOTS],
            config_registers: [0; CFG],
            last_programmed_index: plan.alignment().slots_per_region(),
            plan,
        })
    }

    /// Number of slots at the head of the table that hold the stack guard.
    pub fn guard_slots(&self) -> usize {
        self.plan.alignment().slots_per_region()
    }

    /// Clear all global entries and the guard, reverting to the boot time state.
    pub fn init(&mut self) {
        for slot in 0..MACHINE_MODE_SLOTS {
            self.write_slot(slot, PmpEntry::OFF);
        }
        self.last_programmed_index = self.guard_slots();
        log::trace!(
            "initialized machine mode PMP image with {} guard slots",
            self.guard_slots()
        );
    }

    /// Append a global entry that applies to all machine mode code, e.g. a catch-all `RWX` region.
    ///
    /// Returns the slot that the entry starts at.
    /// Global entries are meant to be added once during boot.
    pub fn push_global(
        &mut self,
        base: usize,
        size: usize,
        permissions: PmpPermissions,
    ) -> Result<usize, PmpError> {
        let region = EncodedRegion::new(base, size, permissions, self.plan.alignment())?;
        let needed = region.entries().len();
        if self.last_programmed_index + needed > MACHINE_MODE_SLOTS {
            return Err(PmpError::CapacityExceeded {
                max: (MACHINE_MODE_SLOTS - self.guard_slots()) / needed,
            });
        }

        let first_slot = self.last_programmed_index;
        for (i, entry) in region.entries().iter().enumerate() {
            self.write_slot(first_slot + i, *entry);
        }
        self.last_programmed_index += needed;
        log::trace!(
            "added global machine mode PMP region {:#x}+{:#x} ({:?}) at slot {}",
            base,
            size,
            permissions,
            first_slot
        );
        Ok(first_slot)
    }

    /// (Re)write the guard slots so that `stack_size` bytes starting at `stack_base` become inaccessible.
    ///
    /// `stack_base` and `stack_size` describe the guard area at the low end of the stack that just became
    /// authoritative.
    /// If the area cannot be expressed by the PMP unit, the previous guard stays in place.
    pub fn program_guard(&mut self, stack_base: usize, stack_size: usize) -> Result<(), PmpError> {
        let denied = PmpPermissions::empty();
        let region = EncodedRegion::new(stack_base, stack_size, denied, self.plan.alignment())?;
        for (slot, entry) in region.entries().iter().enumerate() {
            self.write_slot(slot, *entry);
        }
        log::debug!(
            "machine mode stack guard now covers {:#x}+{:#x}",
            stack_base,
            stack_size
        );
        Ok(())
    }

    /// Write the image into the PMP unit, disabling all slots that machine mode does not use, and enforce it on
    /// machine mode accesses.
    ///
    /// Must be called with interrupts disabled since the PMP unit is inconsistent while it is being written.
    pub fn load<H: PmpHardware>(&self, hw: &mut H) {
        log::debug!(
            "loading machine mode PMP image with {} slots",
            self.last_programmed_index
        );
        load_image(
            hw,
            &self.address_registers,
            &self.config_registers,
            self.last_programmed_index,
            self.plan.cfg_register_count(),
        );
        hw.enforce_on_machine_mode();
    }

    pub fn address_registers(&self) -> &[usize; MACHINE_MODE_SLOTS] {
        &self.address_registers
    }

    pub fn config_registers(&self) -> &[usize; CFG] {
        &self.config_registers
    }

    /// The 8-bit configuration of `slot`.
    pub fn slot_cfg(&self, slot: usize) -> u8 {
        entry::get_cfg(&self.config_registers, slot, self.plan.word_width())
    }

    pub fn last_programmed_index(&self) -> usize {
        self.last_programmed_index
    }

    /// The capacity plan shared by all images of this build.
    pub fn plan(&self) -> &'static PmpCapacityPlan {
        self.plan
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::pmp::entry::{cfg_byte, AddressMatching};
    use crate::pmp::mock::{RecordingPmp, Write};
    use crate::pmp::plan::{PmpAlignment, PmpConfig, WordWidth};

    const fn plan(slots: usize, alignment: PmpAlignment, word_width: WordWidth) -> PmpCapacityPlan {
        let config = PmpConfig {
            total_slots: slots,
            word_width,
            alignment,
            stack_guard: slots >= MACHINE_MODE_SLOTS,
            userspace: slots >= MACHINE_MODE_SLOTS,
        };
        match PmpCapacityPlan::new(config) {
            Ok(plan) => plan,
            Err(e) => panic!("{}", e.describe()),
        }
    }

    const POW2_32: PmpCapacityPlan = plan(16, PmpAlignment::PowerOfTwo, WordWidth::Bits32);
    const POW2_64: PmpCapacityPlan = plan(16, PmpAlignment::PowerOfTwo, WordWidth::Bits64);
    const TOR_64: PmpCapacityPlan = plan(16, PmpAlignment::Arbitrary, WordWidth::Bits64);
    const TINY: PmpCapacityPlan = plan(4, PmpAlignment::PowerOfTwo, WordWidth::Bits32);

    fn pow2_state() -> MachineModePmpState<2> {
        let mut state = MachineModePmpState::new(&POW2_32).unwrap();
        state.init();
        state
    }

    fn napot_cfg(permissions: PmpPermissions) -> u8 {
        cfg_byte(permissions, AddressMatching::Napot, false)
    }

    #[test]
    fn test_cfg_storage_depends_on_word_width() {
        assert!(MachineModePmpState::<2>::new(&POW2_32).is_ok());
        assert!(MachineModePmpState::<1>::new(&POW2_64).is_ok());
        assert_eq!(
            MachineModePmpState::<1>::new(&POW2_32),
            Err(ConfigError::StorageMismatch {
                slots: MACHINE_MODE_SLOTS,
                cfg_registers: 1
            })
        );
    }

    #[test]
    fn test_machine_mode_needs_eight_hardware_slots() {
        assert_eq!(
            MachineModePmpState::<2>::new(&TINY),
            Err(ConfigError::MachineModeBudget {
                required: 8,
                available: 4
            })
        );
    }

    #[test]
    fn test_guard_precedes_global_entries() {
        let mut state = pow2_state();
        let result = state.push_global(0x8000_0000, 0x8000_0000, PmpPermissions::all());
        assert_eq!(result, Ok(1));
        state.program_guard(0x8010_0000, 0x40).unwrap();

        assert_eq!(state.last_programmed_index(), 2);
        assert_eq!(state.address_registers()[0], (0x8010_0000 >> 2) | 0x7);
        assert_eq!(state.slot_cfg(0), napot_cfg(PmpPermissions::empty()));
        assert_eq!(state.slot_cfg(1), napot_cfg(PmpPermissions::all()));
    }

    #[test]
    fn test_guard_is_rewritten_in_place() {
        let mut state = MachineModePmpState::<1>::new(&TOR_64).unwrap();
        state.init();
        let result = state.push_global(0x8000_0000, 0x1000_0000, PmpPermissions::all());
        assert_eq!(result, Ok(2));

        state.program_guard(0x8010_0000, 0x40).unwrap();
        state.program_guard(0x8020_0000, 0x80).unwrap();

        assert_eq!(state.last_programmed_index(), 4);
        assert_eq!(state.address_registers()[0], 0x8020_0000 >> 2);
        assert_eq!(state.address_registers()[1], 0x8020_0080 >> 2);
        assert_eq!(
            state.slot_cfg(1),
            cfg_byte(PmpPermissions::empty(), AddressMatching::Tor, false)
        );
        // the global entry is untouched
        assert_eq!(state.address_registers()[2], 0x8000_0000 >> 2);
    }

    #[test]
    fn test_invalid_guard_keeps_previous_guard() {
        let mut state = pow2_state();
        state.program_guard(0x8010_0000, 0x40).unwrap();
        let before = state.clone();

        assert!(state.program_guard(0x8010_0010, 0x40).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn test_global_entries_are_bounded() {
        let mut state = pow2_state();
        for i in 0..7 {
            let result = state.push_global(0x1000 * (i + 1), 0x1000, PmpPermissions::READ);
            assert_eq!(result, Ok(i + 1));
        }
        assert_eq!(
            state.push_global(0x10_0000, 0x1000, PmpPermissions::READ),
            Err(PmpError::CapacityExceeded { max: 7 })
        );
    }

    #[test]
    fn test_load_disables_all_other_hardware_slots() {
        let mut state = pow2_state();
        let result = state.push_global(0x8000_0000, 0x8000_0000, PmpPermissions::all());
        assert_eq!(result, Ok(1));
        state.program_guard(0x8010_0000, 0x40).unwrap();

        let mut hw = RecordingPmp::new();
        state.load(&mut hw);

        assert_eq!(hw.addr(0), Some(state.address_registers()[0]));
        assert_eq!(hw.addr(1), Some(state.address_registers()[1]));
        assert_eq!(hw.addr(2), None);
        assert_eq!(hw.cfg(0), Some(state.config_registers()[0]));
        for index in 1..4 {
            assert_eq!(hw.cfg(index), Some(0));
        }
    }

    #[test]
    fn test_load_enforces_guard_on_machine_mode() {
        let mut state = pow2_state();
        state.program_guard(0x8010_0000, 0x40).unwrap();

        let mut hw = RecordingPmp::new();
        state.load(&mut hw);

        // enforcement is switched on only after the whole image is in place
        let last = hw.writes().last();
        assert_eq!(last, Some(Write::MachineModeEnforced));
        let enforced = hw.writes().filter(|w| *w == Write::MachineModeEnforced);
        assert_eq!(enforced.count(), 1);
    }

    #[test]
    fn test_images_share_one_plan() {
        let state = pow2_state();
        assert_eq!(state.plan(), &POW2_32);
        assert!(core::ptr::eq(state.plan(), pow2_state().plan()));
    }
}
