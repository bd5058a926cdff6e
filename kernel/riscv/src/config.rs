//! The build-time configuration of the architecture layer
//!
//! All options that influence the size or layout of per-thread state are collected into [`BUILD_CONFIG`] and
//! validated together exactly once in [`PLAN`].
//! Every other component sizes its storage from the constants derived here so that there is only a single source
//! of truth for slot counts.
//!
//! | Option | Source |
//! | ------ | ------ |
//! | number of hardware PMP slots | `PMP_SLOTS` environment variable at build time (default 16) |
//! | word width | the target's pointer width |
//! | alignment mode | feature `pmp-power-of-two` |
//! | stack guards | feature `stack-guard` |
//! | user mode isolation | feature `userspace` |
//! | FPU sharing | features `fpu-sharing` and `fpu-single` or `fpu-double` |
//!
//! An invalid combination fails the build.

use crate::error::ConfigError;
use crate::pmp::plan::{PmpAlignment, PmpCapacityPlan, PmpConfig, WordWidth};

#[cfg(all(feature = "fpu-single", feature = "fpu-double"))]
compile_error!("the features `fpu-single` and `fpu-double` are mutually exclusive");

include!(concat!(env!("OUT_DIR"), "/pmp_slots.rs"));

/// Precision of the floating point registers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpWidth {
    Single,
    Double,
}

/// Every build option of the architecture layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ArchConfig {
    pub pmp: PmpConfig,
    /// Whether floating point registers are saved on context switches
    pub fpu_sharing: bool,
    pub fp_width: Option<FpWidth>,
}

impl ArchConfig {
    /// Validate all options together and compute the PMP capacity plan.
    pub const fn validate(&self) -> Result<PmpCapacityPlan, ConfigError> {
        if self.fpu_sharing && self.fp_width.is_none() {
            return Err(ConfigError::FpuWidthUnresolved);
        }
        PmpCapacityPlan::new(self.pmp)
    }
}

/// The configuration this crate was built with.
pub const BUILD_CONFIG: ArchConfig = ArchConfig {
    pmp: PmpConfig {
        total_slots: PMP_SLOTS,
        word_width: WordWidth::native(),
        alignment: if cfg!(feature = "pmp-power-of-two") {
            PmpAlignment::PowerOfTwo
        } else {
            PmpAlignment::Arbitrary
        },
        stack_guard: cfg!(feature = "stack-guard"),
        userspace: cfg!(feature = "userspace"),
    },
    fpu_sharing: cfg!(feature = "fpu-sharing"),
    fp_width: if cfg!(feature = "fpu-double") {
        Some(FpWidth::Double)
    } else if cfg!(feature = "fpu-single") {
        Some(FpWidth::Single)
    } else {
        None
    },
};

/// The PMP capacity plan of this build.
pub const PLAN: PmpCapacityPlan = match BUILD_CONFIG.validate() {
    Ok(plan) => plan,
    Err(e) => panic!("{}", e.describe()),
};

/// Number of `pmpcfg` registers covering all hardware slots.
pub const PMP_CFG_REGISTERS: usize = PLAN.cfg_register_count();

/// Number of `pmpcfg` registers covering the machine mode slots.
pub const MACHINE_PMP_CFG_REGISTERS: usize = PLAN.machine_mode_cfg_register_count();

#[cfg(feature = "stack-guard")]
static_assertions::const_assert!(crate::pmp::plan::MACHINE_MODE_SLOTS <= PMP_SLOTS);
