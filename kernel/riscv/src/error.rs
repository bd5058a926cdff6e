//! Error types of the architecture layer
//!
//! There are two classes of errors which are handled at very different times:
//!
//! - [`ConfigError`]s describe a combination of build options that the PMP hardware cannot satisfy.
//!   They are detected while the build configuration is evaluated in a `const` context and abort compilation.
//! - [`PmpError`]s are returned at runtime when a single request cannot be fulfilled, e.g. because a thread's
//!   memory domain wants more regions than the PMP unit has slots left for it.
//!
//! Neither class is ever retried since both are deterministic functions of their inputs.

use thiserror_no_std::Error;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ConfigError {
    #[error("user threads need {required} PMP slots but the hardware only has {available}")]
    InsufficientSlots { required: usize, available: usize },

    #[error("machine mode stack guards need {required} PMP slots but only {available} exist")]
    MachineModeBudget { required: usize, available: usize },

    #[error("{0} PMP slots exceed the maximum number of PMP entries defined by the RISC-V ISA")]
    UnsupportedSlotCount(usize),

    #[error("the PMP configuration registers are wider than a machine word of the target")]
    UnsupportedWordWidth,

    #[error("FPU sharing is enabled but no floating point register width was selected")]
    FpuWidthUnresolved,

    #[error("storage for {slots} slots and {cfg_registers} cfg registers does not match the plan")]
    StorageMismatch { slots: usize, cfg_registers: usize },
}

impl ConfigError {
    /// A static description of the error.
    ///
    /// This is usable in `const` contexts where the formatting machinery of [`Display`](core::fmt::Display) is
    /// not available, e.g. to abort compilation with a readable message.
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::InsufficientSlots { .. } => {
                "the PMP unit has fewer slots than user threads need for their mandatory regions"
            }
            Self::MachineModeBudget { .. } => {
                "the PMP unit has fewer slots than machine mode stack guards need"
            }
            Self::UnsupportedSlotCount(_) => {
                "the configured number of PMP slots exceeds the RISC-V ISA maximum"
            }
            Self::UnsupportedWordWidth => {
                "the configured PMP word width is wider than the target's machine word"
            }
            Self::FpuWidthUnresolved => {
                "FPU sharing requires either the `fpu-single` or the `fpu-double` feature"
            }
            Self::StorageMismatch { .. } => {
                "PMP state storage is not sized according to the capacity plan"
            }
        }
    }
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum PmpError {
    #[error("the request needs more than the {max} PMP regions available to it")]
    CapacityExceeded { max: usize },

    #[error("the region {base:#x}+{size:#x} cannot be expressed in the configured alignment mode")]
    InvalidRegion { base: usize, size: usize },
}
