//! Hardware exclusivity arbiter.
//!
//! One binary lock stands for the physical device. The arbiter tracks the
//! identity of the current holder alongside the lock itself so that the
//! invariant "holder is `None` exactly when the lock is free" is maintained
//! under one mutex. Stale-holder detection lives in the device layer, which
//! consults the liveness oracle and calls [`Arbiter::force_release`].

use parking_lot::{Condvar, Mutex};

use crate::error::{EngineError, EngineResult};
use crate::registry::ClientId;
use crate::sync::CancelToken;

#[derive(Debug)]
struct ArbState {
    available: bool,
    holder: Option<ClientId>,
}

/// The device ownership lock.
#[derive(Debug)]
pub struct Arbiter {
    state: Mutex<ArbState>,
    cvar: Condvar,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Arbiter {
    /// New arbiter in the FREE state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ArbState {
                available: true,
                holder: None,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Block until the device is free, then record `id` as holder.
    ///
    /// Interruptible: if `cancel` fires while waiting, the cancellation is
    /// consumed and `AcquireInterrupted` is returned with no state change.
    pub fn acquire(&self, id: ClientId, cancel: &CancelToken) -> EngineResult<()> {
        let mut st = self.state.lock();
        loop {
            if cancel.take() {
                tracing::debug!(client = %id, "device acquisition interrupted");
                return Err(EngineError::AcquireInterrupted);
            }
            if st.available {
                st.available = false;
                st.holder = Some(id);
                tracing::debug!(client = %id, "device acquired");
                return Ok(());
            }
            self.cvar.wait(&mut st);
        }
    }

    /// Release by the recorded holder. A mismatch means a caller released
    /// (or errored out of) a device it never owned; the lock is left alone
    /// and the violation is surfaced.
    pub fn release(&self, id: ClientId) -> EngineResult<()> {
        let mut st = self.state.lock();
        if st.holder != Some(id) {
            let holder = st.holder;
            drop(st);
            tracing::error!(client = %id, ?holder, "release by non-holder");
            return Err(EngineError::NotOwner { caller: id, holder });
        }
        st.holder = None;
        st.available = true;
        self.cvar.notify_one();
        tracing::debug!(client = %id, "device released");
        Ok(())
    }

    /// Recorded holder, if any.
    pub fn holder(&self) -> Option<ClientId> {
        self.state.lock().holder
    }

    /// Whether the lock is currently free.
    pub fn is_free(&self) -> bool {
        self.state.lock().available
    }

    /// Whether `id` currently holds the device.
    pub fn is_held_by(&self, id: ClientId) -> bool {
        self.state.lock().holder == Some(id)
    }

    /// Tear the lock away from a dead holder. No-op if somebody else has
    /// taken over in the meantime; returns whether the release happened.
    pub fn force_release(&self, expected: ClientId) -> bool {
        let mut st = self.state.lock();
        if st.holder != Some(expected) {
            return false;
        }
        st.holder = None;
        st.available = true;
        self.cvar.notify_one();
        tracing::warn!(client = %expected, "device lock force-released from dead holder");
        true
    }

    /// Wake all blocked acquirers so they re-check their cancel tokens.
    pub fn interrupt_waiters(&self) {
        let _guard = self.state.lock();
        self.cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_records_holder() {
        let arb = Arbiter::new();
        arb.acquire(ClientId(1), &CancelToken::new()).unwrap();
        assert_eq!(arb.holder(), Some(ClientId(1)));
        assert!(!arb.is_free());
        arb.release(ClientId(1)).unwrap();
        assert_eq!(arb.holder(), None);
        assert!(arb.is_free());
    }

    #[test]
    fn release_by_non_holder_is_rejected() {
        let arb = Arbiter::new();
        arb.acquire(ClientId(1), &CancelToken::new()).unwrap();
        let err = arb.release(ClientId(2)).unwrap_err();
        assert!(matches!(err, EngineError::NotOwner { .. }));
        // Holder state untouched by the bad release.
        assert_eq!(arb.holder(), Some(ClientId(1)));
    }

    #[test]
    fn interrupted_acquire_leaves_no_trace() {
        let arb = Arc::new(Arbiter::new());
        arb.acquire(ClientId(1), &CancelToken::new()).unwrap();

        let cancel = CancelToken::new();
        let arb2 = Arc::clone(&arb);
        let cancel2 = cancel.clone();
        let waiter = thread::spawn(move || arb2.acquire(ClientId(2), &cancel2));

        thread::sleep(Duration::from_millis(30));
        cancel.set();
        arb.interrupt_waiters();

        assert!(matches!(
            waiter.join().unwrap(),
            Err(EngineError::AcquireInterrupted)
        ));
        assert_eq!(arb.holder(), Some(ClientId(1)));
    }

    #[test]
    fn force_release_only_hits_the_expected_holder() {
        let arb = Arbiter::new();
        arb.acquire(ClientId(1), &CancelToken::new()).unwrap();
        assert!(!arb.force_release(ClientId(9)));
        assert!(arb.force_release(ClientId(1)));
        assert!(arb.is_free());
        // Second force is a no-op.
        assert!(!arb.force_release(ClientId(1)));
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let arb = Arc::new(Arbiter::new());
        arb.acquire(ClientId(1), &CancelToken::new()).unwrap();

        let arb2 = Arc::clone(&arb);
        let waiter = thread::spawn(move || {
            arb2.acquire(ClientId(2), &CancelToken::new()).unwrap();
            arb2.holder()
        });

        thread::sleep(Duration::from_millis(20));
        arb.release(ClientId(1)).unwrap();
        assert_eq!(waiter.join().unwrap(), Some(ClientId(2)));
    }
}
