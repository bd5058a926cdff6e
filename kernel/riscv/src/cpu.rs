//! Handling of CPU control and status registers
//!
//! This module implements some dummy structs which each model a certain machine mode register as it is defined in
//! Chapter 3 of the [Risc-V Privileged Specification](https://github.com/riscv/riscv-isa-manual/releases/download/Priv-v1.12/riscv-privileged-20211203.pdf)
//! together with the hardware backed implementations of [`InterruptMask`] and [`PmpHardware`].

use crate::pmp::PmpHardware;
use crate::thread::CoreArch;
use bitflags::bitflags;
use core::arch::asm;
use ksync::InterruptMask;

/// Generate code to read from a specific register.
///
/// # Example:
/// ```rust
/// let val = read_reg!("mstatus");
/// ```
macro_rules! read_reg {
    ($csr:literal) => {{
        let res: usize;
        asm!(concat!("csrr {}, ", $csr), out(reg) res);
        res
    }};
}

/// Generate code to set specific register bits but leave others untouched
macro_rules! set_reg {
    ($csr:literal, $value:expr) => {
        asm!(concat!("csrs ", $csr, ", {}"), in(reg) $value)
    }
}

/// Generate code to clear specific register bits but leave others untouched
macro_rules! clear_reg {
    ($csr:literal, $value:expr) => {
        asm!(concat!("csrc ", $csr, ", {}"), in(reg) $value)
    };
}

/// Generate code to clear specific register bits and return the previous register value
macro_rules! read_clear_reg {
    ($csr:literal, $value:expr) => {{
        let res: usize;
        asm!(concat!("csrrc {}, ", $csr, ", {}"), out(reg) res, in(reg) $value);
        res
    }};
}

/// Generate a `match` that writes `$value` into the numbered CSR `$prefix<n>` selected by `$index`.
macro_rules! write_numbered_reg {
    ($prefix:literal, $index:expr, $value:expr, [$($n:literal),* $(,)?]) => {
        match $index {
            $(
                $n => unsafe {
                    asm!(concat!("csrw ", $prefix, stringify!($n), ", {}"), in(reg) $value)
                },
            )*
            other => unreachable!("there is no {}{} register", $prefix, other),
        }
    };
}

/// Machine Status Register.
///
/// It keeps track of the hart's current operating state in machine mode.
pub struct MStatus {}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct MStatusFlags: usize {
        /// The MIE bit enables or disables all interrupts in machine mode.
        const MIE = 1 << 3;
        /// The MPIE bit indicates whether machine interrupts were enabled prior to trapping into machine
        /// mode.
        const MPIE = 1 << 7;
        /// The privilege mode that was active prior to trapping into machine mode. All bits cleared selects
        /// user mode.
        const MPP = 0b11 << 11;
        /// When MPRV is set, loads and stores are translated and protected as though the current privilege
        /// mode were set to MPP.
        const MPRV = 1 << 17;
    }
}

impl MStatus {
    /// Read the raw value from the mstatus register
    pub fn read_raw() -> usize {
        unsafe { read_reg!("mstatus") }
    }

    /// Read the value of the mstatus register
    pub fn read() -> MStatusFlags {
        MStatusFlags::from_bits_truncate(Self::read_raw())
    }

    /// Set the bits of `mask` in the mstatus register
    ///
    /// # Safety
    /// Enabling interrupts or changing the effective privilege of memory accesses affects the soundness of
    /// the running kernel code.
    pub unsafe fn set(mask: MStatusFlags) {
        set_reg!("mstatus", mask.bits())
    }

    /// Clear the bits of `mask` in the mstatus register
    ///
    /// # Safety
    /// Changing the effective privilege of memory accesses affects the soundness of the running kernel code.
    pub unsafe fn clear(mask: MStatusFlags) {
        clear_reg!("mstatus", mask.bits())
    }

    /// Atomically clear the bits of `mask` in the mstatus register and return its previous value
    ///
    /// # Safety
    /// Disabling interrupts or changing the effective privilege of memory accesses affects the soundness of
    /// the running kernel code.
    pub unsafe fn read_and_clear(mask: MStatusFlags) -> MStatusFlags {
        MStatusFlags::from_bits_truncate(read_clear_reg!("mstatus", mask.bits()))
    }
}

/// Interrupt masking on the executing hart through the `MIE` bit of `mstatus`.
pub struct MachineInterrupts;

impl InterruptMask for MachineInterrupts {
    fn disable() -> bool {
        let previous = unsafe { MStatus::read_and_clear(MStatusFlags::MIE) };
        previous.contains(MStatusFlags::MIE)
    }

    fn restore(was_enabled: bool) {
        if was_enabled {
            unsafe { MStatus::set(MStatusFlags::MIE) }
        }
    }
}

/// The `pmpaddr` and `pmpcfg` registers of the executing hart.
pub struct PmpCsrs;

impl PmpHardware for PmpCsrs {
    fn write_addr(&mut self, slot: usize, value: usize) {
        write_numbered_reg!(
            "pmpaddr",
            slot,
            value,
            [
                0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22,
                23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43,
                44, 45, 46, 47, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63,
            ]
        )
    }

    #[cfg(target_arch = "riscv32")]
    fn write_cfg(&mut self, index: usize, value: usize) {
        write_numbered_reg!(
            "pmpcfg",
            index,
            value,
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
        )
    }

    // only the even numbered pmpcfg registers exist on RV64
    #[cfg(target_arch = "riscv64")]
    fn write_cfg(&mut self, index: usize, value: usize) {
        write_numbered_reg!("pmpcfg", 2 * index, value, [0, 2, 4, 6, 8, 10, 12, 14])
    }

    fn enforce_on_machine_mode(&mut self) {
        unsafe {
            MStatus::clear(MStatusFlags::MPP);
            MStatus::set(MStatusFlags::MPRV);
        }
    }
}

/// The per-core architecture state of a hart using its own machine mode interrupt masking.
pub type HartArch = CoreArch<MachineInterrupts>;
