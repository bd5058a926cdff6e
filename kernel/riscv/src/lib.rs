//! RISC-V architecture support for the lunatix kernel
//!
//! This crate owns the per-thread state that must be preserved across context switches and the bookkeeping of the
//! Physical Memory Protection (PMP) unit:
//!
//! - [`context`] describes the callee saved register set of a suspended thread.
//! - [`pmp`] plans how the limited number of PMP slots is shared and keeps the per-thread and per-core images.
//! - [`thread`] combines both into the state that is embedded into thread control blocks.
//! - [`config`] collects the build options and fails the build if they cannot be satisfied.
//!
//! Hardware is only accessed through [`context::RegisterFile`], [`pmp::PmpHardware`] and
//! [`ksync::InterruptMask`] which the [`cpu`] module implements on RISC-V targets.
#![no_std]

pub mod config;
pub mod context;
#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub mod cpu;
pub mod error;
pub mod pmp;
pub mod thread;
