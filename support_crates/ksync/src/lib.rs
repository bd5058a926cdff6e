//! Kernel Synchronisation Primitives
#![no_std]

mod irq_lock;

pub use irq_lock::{InterruptMask, IrqGuard, IrqSpinLock};
