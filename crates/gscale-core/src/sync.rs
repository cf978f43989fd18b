//! Blocking primitives shared by the registry, the arbiter and the
//! completion waiter.
//!
//! The reference protocol is built on three kernel counting semaphores: a
//! per-session open gate (count 1), the device ownership lock (count 1) and
//! a completion semaphore (count 0, raised from interrupt context). Here
//! they map onto parking_lot `Mutex` + `Condvar` pairs:
//!
//! - [`BinarySemaphore`] — count-1 gate with a cancellable acquire;
//! - [`CompletionSignal`] — persistent-flag one-shot: a raise that lands
//!   before the wait starts is not lost, and the raiser never blocks on a
//!   lock a waiter holds while sleeping;
//! - [`CancelToken`] — the force-exit flag; cancellation is delivered by
//!   setting the flag and notifying whichever condvar the target could be
//!   sleeping on, so no waiter polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Outcome of a timed, cancellable completion wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The signal was raised within the budget.
    Signaled,
    /// The budget elapsed with no signal.
    TimedOut,
    /// The wait was interrupted by cancellation.
    Interrupted,
}

/// A cancellation flag shared between a session and whoever may abort it.
///
/// `take()` consumes one pending cancellation, mirroring the reference
/// driver's reset of its force-exit flag once observed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. The caller is responsible for notifying the condvars
    /// the target may be sleeping on.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Non-consuming check.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Consume a pending cancellation, returning whether one was pending.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    /// Clear without observing.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// A binary (count-1) semaphore with a cancellable blocking acquire.
#[derive(Debug)]
pub struct BinarySemaphore {
    available: Mutex<bool>,
    cvar: Condvar,
}

impl Default for BinarySemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl BinarySemaphore {
    /// New semaphore with the unit available.
    pub fn new() -> Self {
        Self {
            available: Mutex::new(true),
            cvar: Condvar::new(),
        }
    }

    /// Block until the unit is available or `cancel` fires.
    ///
    /// A cancelled acquire consumes the cancellation and returns `false`
    /// without taking the unit; the waiter never appears to have succeeded.
    pub fn acquire(&self, cancel: &CancelToken) -> bool {
        let mut available = self.available.lock();
        loop {
            if cancel.take() {
                return false;
            }
            if *available {
                *available = false;
                return true;
            }
            self.cvar.wait(&mut available);
        }
    }

    /// Non-blocking acquire.
    pub fn try_acquire(&self) -> bool {
        let mut available = self.available.lock();
        if *available {
            *available = false;
            true
        } else {
            false
        }
    }

    /// Return the unit and wake one waiter.
    pub fn release(&self) {
        let mut available = self.available.lock();
        *available = true;
        self.cvar.notify_one();
    }

    /// Force the unit back to available (the reference driver's
    /// `sema_init(sem, 1)` on recovery paths) and wake all waiters.
    pub fn reset(&self) {
        let mut available = self.available.lock();
        *available = true;
        self.cvar.notify_all();
    }

    /// Wake every waiter so cancellation flags get re-checked.
    pub fn interrupt_waiters(&self) {
        let _guard = self.available.lock();
        self.cvar.notify_all();
    }
}

/// One-shot completion signal with a persistent flag.
///
/// `raise()` is safe to call from the interrupt callback: it takes only the
/// signal's own short-lived lock, never an engine lock, and is idempotent
/// within one job. `reset()` rearms it for the next job.
#[derive(Debug)]
pub struct CompletionSignal {
    signaled: Mutex<bool>,
    cvar: Condvar,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    /// New, unsignaled.
    pub fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Raise the signal and wake every waiter. A raise that happens before
    /// the wait starts is observed by the flag, not lost.
    pub fn raise(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cvar.notify_all();
    }

    /// Rearm for the next job.
    pub fn reset(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = false;
    }

    /// Whether the signal is currently raised.
    pub fn is_raised(&self) -> bool {
        *self.signaled.lock()
    }

    /// Block for at most `timeout`, or until raised, or until `cancel`
    /// fires. Cancellation is consumed when observed.
    pub fn wait(&self, timeout: Duration, cancel: &CancelToken) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        loop {
            if *signaled {
                return WaitOutcome::Signaled;
            }
            if cancel.take() {
                return WaitOutcome::Interrupted;
            }
            if self.cvar.wait_until(&mut signaled, deadline).timed_out() {
                // Late raise between wakeup and here still counts.
                return if *signaled {
                    WaitOutcome::Signaled
                } else if cancel.take() {
                    WaitOutcome::Interrupted
                } else {
                    WaitOutcome::TimedOut
                };
            }
        }
    }

    /// Wake waiters without raising, so they re-check their cancel tokens.
    pub fn interrupt_waiters(&self) {
        let _guard = self.signaled.lock();
        self.cvar.notify_all();
    }
}
