//! Register state that is preserved across context switches
//!
//! ## ABI
//! The layout of [`RegisterContext`] is a contract with the assembly routine that switches between threads.
//! Fields are stored in exactly this order without any reordering:
//!
//! | Field | Size |
//! | ----- | ---- |
//! | `sp`, `ra`, `tp` | one machine word each |
//! | `s0`..`s11` | one machine word each |
//! | `fcsr` *(only with `fpu-sharing`)* | 32 bit |
//! | `fs0`..`fs11` *(only with `fpu-sharing`)* | 32 bit (`fpu-single`) or 64 bit (`fpu-double`) each |
//!
//! The byte offsets are exported in [`offsets`] for use in assembly and are checked at compile time.

use core::mem::{offset_of, size_of};
use static_assertions::const_assert_eq;

/// Number of callee saved integer registers `s0`..`s11`.
pub const SAVED_REGISTERS: usize = 12;

/// Number of callee saved floating point registers `fs0`..`fs11`.
pub const SAVED_FP_REGISTERS: usize = 12;

/// Storage type of a single floating point register.
#[cfg(feature = "fpu-double")]
pub type FpRegister = u64;

/// Storage type of a single floating point register.
#[cfg(not(feature = "fpu-double"))]
pub type FpRegister = u32;

/// The callee saved registers of a suspended thread.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct RegisterContext {
    /// Stack pointer (`x2`)
    pub sp: usize,
    /// Return address (`x1`)
    pub ra: usize,
    /// Thread pointer (`x4`)
    pub tp: usize,
    /// Saved registers `s0` (frame pointer) to `s11`
    pub s: [usize; SAVED_REGISTERS],
    /// Floating point control and status register
    #[cfg(feature = "fpu-sharing")]
    pub fcsr: u32,
    /// Saved floating point registers `fs0` to `fs11`
    #[cfg(feature = "fpu-sharing")]
    pub fs: [FpRegister; SAVED_FP_REGISTERS],
}

/// Access to the callee saved registers of the executing hart.
///
/// The switch routine implements this by moving values between the hart's registers and a [`RegisterContext`].
/// Implementations must not fail; they are plain register moves.
pub trait RegisterFile {
    /// Store the hart's `sp`, `ra`, `tp` and `s0`..`s11` into `ctx`.
    fn store_integer(&self, ctx: &mut RegisterContext);

    /// Load `sp`, `ra`, `tp` and `s0`..`s11` from `ctx` into the hart.
    fn load_integer(&mut self, ctx: &RegisterContext);

    /// Store the hart's `fcsr` and `fs0`..`fs11` into `ctx`.
    #[cfg(feature = "fpu-sharing")]
    fn store_fp(&self, ctx: &mut RegisterContext);

    /// Load `fcsr` and `fs0`..`fs11` from `ctx` into the hart.
    #[cfg(feature = "fpu-sharing")]
    fn load_fp(&mut self, ctx: &RegisterContext);
}

impl RegisterContext {
    /// Create a context with all registers zeroed
    pub const fn new() -> Self {
        Self {
            sp: 0,
            ra: 0,
            tp: 0,
            s: [0; SAVED_REGISTERS],
            #[cfg(feature = "fpu-sharing")]
            fcsr: 0,
            #[cfg(feature = "fpu-sharing")]
            fs: [0; SAVED_FP_REGISTERS],
        }
    }

    /// Create a context that starts executing at `entry_point` with the given stack when it is first restored.
    pub const fn with_entry(entry_point: usize, stack_start: usize) -> Self {
        let mut ctx = Self::new();
        ctx.ra = entry_point;
        ctx.sp = stack_start;
        ctx
    }

    /// Capture the callee saved registers of `hart`.
    ///
    /// Floating point registers are only captured if `fp_active` is set.
    pub fn save<R: RegisterFile + ?Sized>(&mut self, hart: &R, fp_active: bool) {
        hart.store_integer(self);
        if fp_active {
            self.save_fp(hart);
        }
    }

    /// Write the stored registers back into `hart`.
    ///
    /// Floating point registers are only restored if `fp_active` is set.
    pub fn restore<R: RegisterFile + ?Sized>(&self, hart: &mut R, fp_active: bool) {
        hart.load_integer(self);
        if fp_active {
            self.restore_fp(hart);
        }
    }

    #[cfg(feature = "fpu-sharing")]
    fn save_fp<R: RegisterFile + ?Sized>(&mut self, hart: &R) {
        hart.store_fp(self);
    }

    #[cfg(not(feature = "fpu-sharing"))]
    fn save_fp<R: RegisterFile + ?Sized>(&mut self, _hart: &R) {}

    #[cfg(feature = "fpu-sharing")]
    fn restore_fp<R: RegisterFile + ?Sized>(&self, hart: &mut R) {
        hart.load_fp(self);
    }

    #[cfg(not(feature = "fpu-sharing"))]
    fn restore_fp<R: RegisterFile + ?Sized>(&self, _hart: &mut R) {}
}

/// Byte offsets of the fields of [`RegisterContext`]
pub mod offsets {
    use super::*;

    pub const SP: usize = offset_of!(RegisterContext, sp);
    pub const RA: usize = offset_of!(RegisterContext, ra);
    pub const TP: usize = offset_of!(RegisterContext, tp);
    pub const S0: usize = offset_of!(RegisterContext, s);
    #[cfg(feature = "fpu-sharing")]
    pub const FCSR: usize = offset_of!(RegisterContext, fcsr);
    #[cfg(feature = "fpu-sharing")]
    pub const FS0: usize = offset_of!(RegisterContext, fs);

    /// Total size of a [`RegisterContext`]
    pub const SIZE: usize = size_of::<RegisterContext>();

    /// Offset of the saved register `s<n>`
    pub const fn s(n: usize) -> usize {
        S0 + n * size_of::<usize>()
    }

    /// Offset of the saved floating point register `fs<n>`
    #[cfg(feature = "fpu-sharing")]
    pub const fn fs(n: usize) -> usize {
        FS0 + n * size_of::<FpRegister>()
    }
}

const WORD: usize = size_of::<usize>();
const INTEGER_WORDS: usize = 3 + SAVED_REGISTERS;

const_assert_eq!(offsets::SP, 0);
const_assert_eq!(offsets::RA, WORD);
const_assert_eq!(offsets::TP, 2 * WORD);
const_assert_eq!(offsets::S0, 3 * WORD);
const_assert_eq!(offsets::s(11), 14 * WORD);

#[cfg(not(feature = "fpu-sharing"))]
const_assert_eq!(offsets::SIZE, INTEGER_WORDS * WORD);

#[cfg(feature = "fpu-sharing")]
mod fp_layout {
    use super::*;

    const FP_SIZE: usize = size_of::<FpRegister>();
    const FS0: usize = (INTEGER_WORDS * WORD + 4 + FP_SIZE - 1) / FP_SIZE * FP_SIZE;

    const_assert_eq!(offsets::FCSR, INTEGER_WORDS * WORD);
    const_assert_eq!(offsets::FS0, FS0);
    const_assert_eq!(offsets::fs(11), FS0 + 11 * FP_SIZE);
}


#[cfg(test)]
mod test {
    use super::mock::MockHart;
    use super::*;

    #[test]
    fn test_save_then_restore_is_a_noop() {
        let mut hart = MockHart::with_pattern(0x8000);
        let original = hart.clone();

        let mut ctx = RegisterContext::new();
        ctx.save(&hart, true);
        ctx.restore(&mut hart, true);

        assert_eq!(hart, original);
    }

    #[test]
    fn test_restore_resumes_suspended_thread() {
        let first = MockHart::with_pattern(0x1000);
        let mut ctx = RegisterContext::new();
        ctx.save(&first, true);

        // another thread runs in between and clobbers every register
        let mut hart = MockHart::with_pattern(0x9000);
        ctx.restore(&mut hart, true);

        assert_eq!(hart.sp, first.sp);
        assert_eq!(hart.ra, first.ra);
        assert_eq!(hart.tp, first.tp);
        assert_eq!(hart.s, first.s);
    }

    #[cfg(feature = "fpu-sharing")]
    #[test]
    fn test_fp_registers_are_skipped_when_inactive() {
        let first = MockHart::with_pattern(0x1000);
        let mut ctx = RegisterContext::new();
        ctx.save(&first, false);
        assert_eq!(ctx.fs, [0; SAVED_FP_REGISTERS]);

        ctx.save(&first, true);
        let mut hart = MockHart::with_pattern(0x9000);
        ctx.restore(&mut hart, false);
        assert_eq!(hart.fs, MockHart::with_pattern(0x9000).fs);

        ctx.restore(&mut hart, true);
        assert_eq!(hart.fs, first.fs);
        assert_eq!(hart.fcsr, first.fcsr);
    }

    #[test]
    fn test_integer_registers_come_first() {
        assert_eq!(offsets::SP, 0);
        assert_eq!(offsets::s(0), 3 * size_of::<usize>());
        #[cfg(feature = "fpu-sharing")]
        assert!(offsets::FCSR > offsets::s(11));
    }

    #[test]
    fn test_entry_context() {
        let ctx = RegisterContext::with_entry(0x8000_1000, 0x8010_0000);
        assert_eq!(ctx.ra, 0x8000_1000);
        assert_eq!(ctx.sp, 0x8010_0000);
        assert_eq!(ctx.s, [0; SAVED_REGISTERS]);
    }
}
