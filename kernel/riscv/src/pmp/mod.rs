//! Physical Memory Protection bookkeeping
//!
//! The PMP unit restricts accesses to physical memory through a small table of address/configuration slots.
//! Because the table is tiny and matched in order, it is partitioned carefully:
//!
//! - [`plan`] decides at build time how many slots every kind of protection gets.
//! - [`user`] holds the image that is loaded whenever a user thread is scheduled.
//! - [`machine`] holds the image that guards kernel and interrupt stacks independent of the running thread.
//!
//! Images are only written into the hardware through the [`PmpHardware`] trait.

pub mod entry;
pub mod machine;
pub mod plan;
pub mod user;

pub use entry::{AddressMatching, EncodedRegion, PmpEntry, PmpPermissions};
pub use machine::MachineModePmpState;
pub use plan::{
    cfg_register_count, reserved_for_user_thread, PmpAlignment, PmpCapacityPlan, PmpConfig,
    WordWidth, MACHINE_MODE_SLOTS, MAX_HARDWARE_SLOTS,
};
pub use user::{DomainRegion, Region, UserLayout, UserModePmpState};

/// Write access to the PMP registers of the executing hart.
///
/// On RISC-V targets this is implemented by [`PmpCsrs`](crate::cpu::PmpCsrs).
pub trait PmpHardware {
    /// Write the raw value of the `pmpaddr` register of `slot`.
    fn write_addr(&mut self, slot: usize, value: usize);

    /// Write the `index`-th packed configuration register.
    ///
    /// `index` counts configuration words, not CSR numbers. On RV64 the word with index `i` is `pmpcfg(2 * i)`.
    fn write_cfg(&mut self, index: usize, value: usize);

    /// Make the loaded entries apply to machine mode loads and stores.
    ///
    /// Machine mode ignores all unlocked entries unless `mstatus.MPRV` is set with `MPP` selecting user mode.
    /// Once enforced, a machine mode access that matches no entry is denied, so the image must contain a
    /// catch-all region behind its guards.
    fn enforce_on_machine_mode(&mut self);
}

/// Load a materialized PMP image into the hardware.
///
/// All configuration registers of the hardware are cleared before any address is written so that no slot is ever
/// active with a mix of old and new values.
/// Slots beyond the image stay disabled.
pub(crate) fn load_image<H: PmpHardware>(
    hw: &mut H,
    address_registers: &[usize],
    config_registers: &[usize],
    programmed: usize,
    hardware_cfg_registers: usize,
) {
    for index in 0..hardware_cfg_registers {
        hw.write_cfg(index, 0);
    }
    for (slot, &addr) in address_registers[..programmed].iter().enumerate() {
        hw.write_addr(slot, addr);
    }
    for (index, &cfg) in config_registers.iter().enumerate() {
        if cfg != 0 {
            hw.write_cfg(index, cfg);
        }
    }
}

/// A [`PmpHardware`] recording every register write, used to inspect load sequences in tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::PmpHardware;

    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub enum Write {
        Addr(usize, usize),
        Cfg(usize, usize),
        MachineModeEnforced,
    }

    pub struct RecordingPmp {
        pub writes: [Option<Write>; 128],
        pub len: usize,
    }

    impl RecordingPmp {
        pub fn new() -> Self {
            Self {
                writes: [None; 128],
                len: 0,
            }
        }

        pub fn writes(&self) -> impl Iterator<Item = Write> + '_ {
            self.writes[..self.len].iter().flatten().copied()
        }

        /// The final value of every address register that was written, in slot order.
        pub fn addr(&self, slot: usize) -> Option<usize> {
            self.writes()
                .filter_map(|w| match w {
                    Write::Addr(s, value) if s == slot => Some(value),
                    _ => None,
                })
                .last()
        }

        pub fn cfg(&self, index: usize) -> Option<usize> {
            self.writes()
                .filter_map(|w| match w {
                    Write::Cfg(i, value) if i == index => Some(value),
                    _ => None,
                })
                .last()
        }

        fn push(&mut self, write: Write) {
            self.writes[self.len] = Some(write);
            self.len += 1;
        }
    }

    impl PmpHardware for RecordingPmp {
        fn write_addr(&mut self, slot: usize, value: usize) {
            self.push(Write::Addr(slot, value))
        }

        fn write_cfg(&mut self, index: usize, value: usize) {
            self.push(Write::Cfg(index, value))
        }

        fn enforce_on_machine_mode(&mut self) {
            self.push(Write::MachineModeEnforced)
        }
    }
}

#[cfg(test)]
mod test {
    use super::mock::{RecordingPmp, Write};
    use super::*;

    #[test]
    fn test_load_clears_cfg_before_writing_addresses() {
        let mut hw = RecordingPmp::new();
        load_image(&mut hw, &[0x10, 0x20, 0x30], &[0x0f0f], 2, 2);

        let writes: [Write; 5] = {
            let mut it = hw.writes();
            core::array::from_fn(|_| it.next().unwrap())
        };
        assert_eq!(
            writes,
            [
                Write::Cfg(0, 0),
                Write::Cfg(1, 0),
                Write::Addr(0, 0x10),
                Write::Addr(1, 0x20),
                Write::Cfg(0, 0x0f0f),
            ]
        );
        assert_eq!(hw.writes().count(), 5);
    }
}
