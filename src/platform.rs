//! Kernel services the driver depends on.
//!
//! The transfer engine needs a clock, a rendezvous to sleep on until the
//! interrupt handler finishes a command, and a way to keep its own
//! interrupt out while it programs registers. The host kernel supplies
//! these through `Platform`.

use crate::error::Result;

/// Clock, sleep/wakeup and interrupt masking.
pub trait Platform {
    /// Milliseconds since boot
    fn now_ms(&self) -> u64;

    /// Busy-wait for roughly `us` microseconds
    fn microdelay(&self, us: u32);

    /// Sleep until `done` returns true or `timeout_ms` has passed.
    ///
    /// Returns `Ok(())` in both cases; the caller re-checks its condition.
    /// Returns `Err(Error::Interrupted)` if the sleeping thread was cancelled.
    fn sleep(&self, timeout_ms: u64, done: &dyn Fn() -> bool) -> Result<()>;

    /// Wake whoever sleeps on this platform's rendezvous
    fn wakeup(&self);

    /// Run `f` with this controller's interrupt held off
    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R;

    /// Give up the processor while waiting for a lock held across a sleep
    fn yield_now(&self) {
        core::hint::spin_loop();
    }
}

/// Take a lock that may be held for a whole command, yielding between tries
pub fn lock_yielding<'a, T, P: Platform>(lock: &'a spin::Mutex<T>, platform: &P) -> spin::MutexGuard<'a, T> {
    loop {
        if let Some(guard) = lock.try_lock() {
            return guard;
        }
        platform.yield_now();
    }
}

/// Spinlock that is safe to share with an interrupt handler.
///
/// The lock is only ever taken with interrupts masked, so the handler can
/// never spin on a lock held by the code it interrupted.
pub struct IrqLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> IrqLock<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: spin::Mutex::new(value) }
    }

    /// Run `f` on the protected value with interrupts masked
    pub fn with<P: Platform, R>(&self, platform: &P, f: impl FnOnce(&mut T) -> R) -> R {
        platform.without_interrupts(|| {
            let mut guard = self.inner.lock();
            f(&mut guard)
        })
    }
}

// =============================================================================
// Bare-metal x86 platform
// =============================================================================

#[cfg(target_arch = "x86_64")]
pub use pit::PitPlatform;

#[cfg(target_arch = "x86_64")]
mod pit {
    use super::Platform;
    use crate::error::Result;
    use core::sync::atomic::{AtomicU64, Ordering};
    use x86_64::instructions::{hlt, interrupts};

    /// Polling platform driven by the system timer.
    ///
    /// The host kernel calls [`PitPlatform::tick`] from its timer interrupt.
    /// Sleeping halts until the next interrupt, which is either the timer or
    /// the disk, then re-checks the condition. Cancellation never happens.
    pub struct PitPlatform {
        ticks: AtomicU64,
        ms_per_tick: u64,
    }

    impl PitPlatform {
        pub const fn new(ms_per_tick: u64) -> Self {
            Self { ticks: AtomicU64::new(0), ms_per_tick }
        }

        /// Advance the clock by one timer period
        pub fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl Platform for PitPlatform {
        fn now_ms(&self) -> u64 {
            self.ticks.load(Ordering::Relaxed) * self.ms_per_tick
        }

        fn microdelay(&self, us: u32) {
            // ~10ns per spin on the machines we target
            for _ in 0..(us as u64) * 100 {
                core::hint::spin_loop();
            }
        }

        fn sleep(&self, timeout_ms: u64, done: &dyn Fn() -> bool) -> Result<()> {
            let start = self.now_ms();
            while !done() {
                if self.now_ms().wrapping_sub(start) >= timeout_ms {
                    break;
                }
                if interrupts::are_enabled() {
                    hlt();
                } else {
                    core::hint::spin_loop();
                }
            }
            Ok(())
        }

        fn wakeup(&self) {
            // The sleeper is halted; the interrupt itself wakes it
        }

        fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
            interrupts::without_interrupts(f)
        }

        fn yield_now(&self) {
            // the holder is sleeping on an interrupt; wait for the next one
            if interrupts::are_enabled() {
                hlt();
            } else {
                core::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Yielding {
        yields: AtomicUsize,
    }

    impl Platform for Yielding {
        fn now_ms(&self) -> u64 {
            0
        }

        fn microdelay(&self, _us: u32) {}

        fn sleep(&self, _timeout_ms: u64, _done: &dyn Fn() -> bool) -> Result<()> {
            Ok(())
        }

        fn wakeup(&self) {}

        fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
            f()
        }

        fn yield_now(&self) {
            self.yields.fetch_add(1, Ordering::Relaxed);
            thread::yield_now();
        }
    }

    #[test]
    fn test_contended_lock_yields() {
        let lock = Arc::new(spin::Mutex::new(0u32));
        let held = Arc::new(Barrier::new(2));

        let holder = {
            let lock = lock.clone();
            let held = held.clone();
            thread::spawn(move || {
                let mut guard = lock.lock();
                held.wait();
                thread::sleep(Duration::from_millis(20));
                *guard = 1;
            })
        };

        held.wait();
        let platform = Yielding::default();
        let guard = lock_yielding(&*lock, &platform);
        assert_eq!(*guard, 1);
        assert!(platform.yields.load(Ordering::Relaxed) > 0);
        drop(guard);
        holder.join().unwrap();
    }

    #[test]
    fn test_uncontended_lock_does_not_yield() {
        let lock = spin::Mutex::new(());
        let platform = Yielding::default();
        drop(lock_yielding(&lock, &platform));
        assert_eq!(platform.yields.load(Ordering::Relaxed), 0);
    }
}
