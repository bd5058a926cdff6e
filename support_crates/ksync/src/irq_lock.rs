use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Control over the interrupt enable state of the executing hart.
///
/// Implementations are provided by architecture crates, e.g. by toggling the `MIE` bit of `mstatus`.
pub trait InterruptMask {
    /// Disable interrupts on the executing hart and report whether they were enabled before.
    fn disable() -> bool;

    /// Restore the interrupt enable state that a previous call to [`disable`](InterruptMask::disable) reported.
    fn restore(was_enabled: bool);
}

/// A SpinLock Mutex which additionally keeps interrupts disabled while it is held.
///
/// This is needed for state that is shared between normal kernel code and trap handlers running on the same hart.
/// Without masking interrupts, a trap handler could observe the protected data in a partially written state or
/// deadlock by trying to take a lock its own hart already holds.
pub struct IrqSpinLock<T, M: InterruptMask> {
    is_locked: AtomicBool,
    value: UnsafeCell<T>,
    _mask: PhantomData<fn() -> M>,
}

/// A Guard protecting some data locked through an [`IrqSpinLock`].
///
/// Interrupts stay disabled for as long as the guard exists.
/// Use it via the implemented [`Deref`] and [`DerefMut`] traits.
pub struct IrqGuard<'a, T, M: InterruptMask> {
    lock: &'a IrqSpinLock<T, M>,
    irq_was_enabled: bool,
}

impl<T, M: InterruptMask> IrqSpinLock<T, M> {
    pub const fn new(value: T) -> Self {
        Self {
            is_locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
            _mask: PhantomData,
        }
    }

    /// Disable interrupts and try to lock the lock once, returning a [`IrqGuard`] if successful.
    ///
    /// If the lock is already held, the interrupt state is restored before returning.
    pub fn try_lock(&self) -> Result<IrqGuard<'_, T, M>, ()> {
        let irq_was_enabled = M::disable();
        if self.is_locked.swap(true, Ordering::Acquire) {
            M::restore(irq_was_enabled);
            Err(())
        } else {
            Ok(IrqGuard {
                lock: self,
                irq_was_enabled,
            })
        }
    }

    /// Disable interrupts and repeatedly try to lock the lock until it succeeds.
    pub fn lock(&self) -> IrqGuard<'_, T, M> {
        let irq_was_enabled = M::disable();
        while self.is_locked.swap(true, Ordering::Acquire) {
            spin_loop();
        }
        IrqGuard {
            lock: self,
            irq_was_enabled,
        }
    }

    /// Access the protected data without locking.
    ///
    /// This is sound because the exclusive borrow proves that no guard can exist.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    fn unlock(&self) {
        self.is_locked.store(false, Ordering::Release)
    }
}

unsafe impl<T, M: InterruptMask> Sync for IrqSpinLock<T, M> where T: Send {}

impl<T, M: InterruptMask> Deref for IrqGuard<'_, T, M> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: The very existence of this Guard guarantees we've exclusively locked the lock
        unsafe { &*self.lock.value.get() }
    }
}

impl<T, M: InterruptMask> DerefMut for IrqGuard<'_, T, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: The very existence of this Guard guarantees we've exclusively locked the lock
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T, M: InterruptMask> Drop for IrqGuard<'_, T, M> {
    fn drop(&mut self) {
        self.lock.unlock();
        M::restore(self.irq_was_enabled);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // every test uses its own mask type so that parallel test threads don't share interrupt state
    macro_rules! mock_mask {
        ($name:ident, $state:ident) => {
            static $state: AtomicBool = AtomicBool::new(true);

            struct $name;

            impl InterruptMask for $name {
                fn disable() -> bool {
                    $state.swap(false, Ordering::SeqCst)
                }

                fn restore(was_enabled: bool) {
                    $state.store(was_enabled, Ordering::SeqCst)
                }
            }
        };
    }

    #[test]
    fn test_interrupts_are_disabled_while_locked() {
        mock_mask!(Mask, ENABLED);
        let lock = IrqSpinLock::<u32, Mask>::new(1);

        {
            let mut guard = lock.lock();
            assert!(!ENABLED.load(Ordering::SeqCst));
            *guard += 1;
        }

        assert!(ENABLED.load(Ordering::SeqCst));
        assert_eq!(*lock.lock(), 2);
    }

    #[test]
    fn test_previously_disabled_interrupts_stay_disabled() {
        mock_mask!(Mask, ENABLED);
        ENABLED.store(false, Ordering::SeqCst);
        let lock = IrqSpinLock::<u32, Mask>::new(0);

        drop(lock.lock());

        assert!(!ENABLED.load(Ordering::SeqCst));
    }

    #[test]
    fn test_try_lock_fails_while_held_and_restores_interrupts() {
        mock_mask!(Mask, ENABLED);
        let lock = IrqSpinLock::<u32, Mask>::new(0);

        let guard = lock.lock();
        assert!(lock.try_lock().is_err());
        // the failed attempt restored the state it found, which was "disabled" because the guard is alive
        assert!(!ENABLED.load(Ordering::SeqCst));
        drop(guard);

        assert!(ENABLED.load(Ordering::SeqCst));
        assert!(lock.try_lock().is_ok());
    }

    #[test]
    fn test_get_mut_bypasses_locking() {
        mock_mask!(Mask, ENABLED);
        let mut lock = IrqSpinLock::<u32, Mask>::new(5);
        *lock.get_mut() = 7;
        assert!(ENABLED.load(Ordering::SeqCst));
        assert_eq!(lock.into_inner(), 7);
    }
}
