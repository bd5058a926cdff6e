//! Architecture specific state of threads and cores
//!
//! [`ThreadArch`] is embedded into every thread control block and holds everything that has to be swapped on a
//! context switch.
//! [`CoreArch`] exists once per hart and holds the protection state that is independent of the running thread.

#[cfg(any(feature = "userspace", feature = "stack-guard"))]
use crate::config::PLAN;
use crate::context::{RegisterContext, RegisterFile};
use core::marker::PhantomData;
use core::mem::offset_of;
use ksync::InterruptMask;
use static_assertions::const_assert_eq;

#[cfg(any(feature = "userspace", feature = "stack-guard"))]
use crate::pmp::PmpHardware;

#[cfg(feature = "userspace")]
use crate::config::{PMP_CFG_REGISTERS, PMP_SLOTS};
#[cfg(feature = "userspace")]
use crate::pmp::UserModePmpState;

#[cfg(feature = "stack-guard")]
use crate::config::MACHINE_PMP_CFG_REGISTERS;
#[cfg(feature = "stack-guard")]
use crate::error::PmpError;
#[cfg(feature = "stack-guard")]
use crate::pmp::MachineModePmpState;
#[cfg(feature = "stack-guard")]
use ksync::{IrqGuard, IrqSpinLock};

/// The PMP image of a user thread, sized for this build.
#[cfg(feature = "userspace")]
pub type UserPmp = UserModePmpState<PMP_SLOTS, PMP_CFG_REGISTERS>;

/// The machine mode PMP image of a core, sized for this build.
#[cfg(feature = "stack-guard")]
pub type MachinePmp = MachineModePmpState<MACHINE_PMP_CFG_REGISTERS>;

#[cfg(feature = "userspace")]
const EMPTY_USER_PMP: UserPmp = match UserPmp::new(&PLAN) {
    Ok(state) => state,
    Err(e) => panic!("{}", e.describe()),
};

#[cfg(feature = "stack-guard")]
const EMPTY_MACHINE_PMP: MachinePmp = match MachinePmp::new(&PLAN) {
    Ok(state) => state,
    Err(e) => panic!("{}", e.describe()),
};

/// Per-thread architecture state.
///
/// The saved registers are always the first field so that the switch routine can address them relative to the
/// start of this struct.
#[repr(C)]
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ThreadArch {
    pub callee_saved: RegisterContext,
    /// Whether the thread uses floating point registers which then need to be preserved
    #[cfg(feature = "fpu-sharing")]
    fp_active: bool,
    #[cfg(feature = "userspace")]
    user_pmp: UserPmp,
}

const_assert_eq!(offset_of!(ThreadArch, callee_saved), 0);

impl ThreadArch {
    pub const fn new() -> Self {
        Self {
            callee_saved: RegisterContext::new(),
            #[cfg(feature = "fpu-sharing")]
            fp_active: false,
            #[cfg(feature = "userspace")]
            user_pmp: EMPTY_USER_PMP,
        }
    }

    /// Create the state of a thread that starts executing at `entry_point` with the stack at `stack_start`.
    pub const fn with_entry(entry_point: usize, stack_start: usize) -> Self {
        let mut arch = Self::new();
        arch.callee_saved = RegisterContext::with_entry(entry_point, stack_start);
        arch
    }

    /// Capture the registers of `hart` when this thread is switched out.
    pub fn save<R: RegisterFile + ?Sized>(&mut self, hart: &R) {
        let fp_active = self.fp_active();
        self.callee_saved.save(hart, fp_active);
    }

    /// Load the registers of this thread into `hart` when it is switched in.
    pub fn restore<R: RegisterFile + ?Sized>(&self, hart: &mut R) {
        self.callee_saved.restore(hart, self.fp_active());
    }

    #[cfg(feature = "fpu-sharing")]
    pub fn fp_active(&self) -> bool {
        self.fp_active
    }

    #[cfg(not(feature = "fpu-sharing"))]
    pub fn fp_active(&self) -> bool {
        false
    }

    /// Mark whether the thread uses floating point registers.
    ///
    /// Usually set lazily from the trap raised on the thread's first floating point instruction.
    #[cfg(feature = "fpu-sharing")]
    pub fn set_fp_active(&mut self, active: bool) {
        log::trace!(
            "floating point sharing for thread turned {}",
            if active { "on" } else { "off" }
        );
        self.fp_active = active;
    }

    #[cfg(feature = "userspace")]
    pub fn user_pmp(&self) -> &UserPmp {
        &self.user_pmp
    }

    #[cfg(feature = "userspace")]
    pub fn user_pmp_mut(&mut self) -> &mut UserPmp {
        &mut self.user_pmp
    }

    /// Load the thread's PMP image into the hardware before returning to user mode.
    ///
    /// Returns the generation of the image that is now active.
    #[cfg(feature = "userspace")]
    pub fn activate_user_pmp<H: PmpHardware>(&self, hw: &mut H) -> u64 {
        self.user_pmp.load(hw);
        self.user_pmp.update_generation()
    }
}

impl Default for ThreadArch {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-core architecture state.
///
/// `M` masks interrupts on the executing hart while the machine mode PMP image is modified.
pub struct CoreArch<M: InterruptMask> {
    #[cfg(feature = "stack-guard")]
    machine_pmp: IrqSpinLock<MachinePmp, M>,
    _mask: PhantomData<fn() -> M>,
}

impl<M: InterruptMask> CoreArch<M> {
    pub const fn new() -> Self {
        Self {
            #[cfg(feature = "stack-guard")]
            machine_pmp: IrqSpinLock::new(EMPTY_MACHINE_PMP),
            _mask: PhantomData,
        }
    }

    /// Lock the machine mode PMP image of this core, keeping interrupts disabled until the guard is dropped.
    #[cfg(feature = "stack-guard")]
    pub fn machine_pmp(&self) -> IrqGuard<'_, MachinePmp, M> {
        self.machine_pmp.lock()
    }

    /// Make the stack whose guard area is `guard_size` bytes at `guard_base` authoritative for machine mode,
    /// then load the resulting image and enforce it on machine mode accesses.
    #[cfg(feature = "stack-guard")]
    pub fn enter_stack<H: PmpHardware>(
        &self,
        guard_base: usize,
        guard_size: usize,
        hw: &mut H,
    ) -> Result<(), PmpError> {
        let mut machine_pmp = self.machine_pmp.lock();
        machine_pmp.program_guard(guard_base, guard_size)?;
        machine_pmp.load(hw);
        Ok(())
    }
}

impl<M: InterruptMask> Default for CoreArch<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::mock::MockHart;

    #[test]
    fn test_thread_switch_preserves_registers() {
        let mut first = ThreadArch::new();
        let mut second = ThreadArch::with_entry(0x8000_2000, 0x8020_0000);

        let mut hart = MockHart::with_pattern(0x1000);
        let first_regs = hart.clone();
        first.save(&hart);
        second.restore(&mut hart);
        assert_eq!(hart.ra, 0x8000_2000);
        assert_eq!(hart.sp, 0x8020_0000);

        second.save(&hart);
        first.restore(&mut hart);
        assert_eq!(hart.sp, first_regs.sp);
        assert_eq!(hart.s, first_regs.s);
    }

    #[cfg(feature = "fpu-sharing")]
    #[test]
    fn test_fp_registers_follow_thread_flag() {
        let mut thread = ThreadArch::new();
        assert!(!thread.fp_active());

        let hart = MockHart::with_pattern(0x1000);
        thread.save(&hart);
        assert_eq!(thread.callee_saved.fcsr, 0);

        thread.set_fp_active(true);
        thread.save(&hart);
        assert_eq!(thread.callee_saved.fs, hart.fs);
    }

    #[cfg(feature = "userspace")]
    mod user {
        use super::*;
        use crate::pmp::mock::RecordingPmp;
        use crate::pmp::PmpPermissions;

        #[test]
        fn test_new_thread_has_empty_domain() {
            let thread = ThreadArch::new();
            let pmp = thread.user_pmp();
            assert_eq!(pmp.domain_offset(), PLAN.reserved_for_user_thread());
            assert_eq!(pmp.last_programmed_index(), PLAN.reserved_for_user_thread());
            assert_eq!(pmp.remaining_dynamic_regions(), PLAN.max_dynamic_regions());
        }

        #[test]
        fn test_threads_use_the_build_plan() {
            let first = ThreadArch::new();
            let second = ThreadArch::with_entry(0x8000_2000, 0x8020_0000);
            assert_eq!(first.user_pmp().plan(), &PLAN);
            assert_eq!(second.user_pmp().plan(), &PLAN);
        }

        #[test]
        fn test_activation_loads_committed_image() {
            let mut thread = ThreadArch::new();
            if PLAN.max_dynamic_regions() == 0 {
                return;
            }
            let slot = thread
                .user_pmp_mut()
                .append_dynamic_region(0x8040_0000, 0x1000, PmpPermissions::READ_WRITE)
                .unwrap();
            let generation = thread.user_pmp_mut().commit();

            let mut hw = RecordingPmp::new();
            assert_eq!(thread.activate_user_pmp(&mut hw), generation);
            assert!(thread.user_pmp().is_current(generation));
            assert_eq!(hw.addr(slot), Some(thread.user_pmp().address_registers()[slot]));
        }
    }

    #[cfg(feature = "stack-guard")]
    mod machine {
        use super::*;
        use crate::pmp::mock::{RecordingPmp, Write};
        use core::sync::atomic::{AtomicBool, Ordering};

        static ENABLED: AtomicBool = AtomicBool::new(true);

        struct Mask;

        impl InterruptMask for Mask {
            fn disable() -> bool {
                ENABLED.swap(false, Ordering::SeqCst)
            }

            fn restore(was_enabled: bool) {
                ENABLED.store(was_enabled, Ordering::SeqCst)
            }
        }

        #[test]
        fn test_enter_stack_programs_and_loads_guard() {
            let core = CoreArch::<Mask>::new();
            core.machine_pmp().init();

            let mut hw = RecordingPmp::new();
            core.enter_stack(0x8010_0000, 0x40, &mut hw).unwrap();
            assert!(ENABLED.load(Ordering::SeqCst));

            let machine_pmp = core.machine_pmp();
            assert!(!ENABLED.load(Ordering::SeqCst));
            assert_eq!(hw.addr(0), Some(machine_pmp.address_registers()[0]));
            assert_eq!(hw.cfg(0), Some(machine_pmp.config_registers()[0]));
            assert_eq!(machine_pmp.plan(), &PLAN);
        }

        #[test]
        fn test_entered_stack_guard_applies_to_machine_mode() {
            let core = CoreArch::<Mask>::new();
            core.machine_pmp().init();

            let mut hw = RecordingPmp::new();
            core.enter_stack(0x8020_0000, 0x100, &mut hw).unwrap();
            assert_eq!(hw.writes().last(), Some(Write::MachineModeEnforced));
        }
    }
}
