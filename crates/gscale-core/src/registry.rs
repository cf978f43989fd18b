//! Bounded client-session registry.
//!
//! One slot per client identity, at most `max_sessions` concurrently open.
//! Opening is idempotent per identity: a second open by the same identity
//! finds the existing slot and then blocks on its gate until the first
//! session closes.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::sync::{BinarySemaphore, CancelToken};

/// Client identity — the submitting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    /// Sentinel for a free slot.
    pub const INVALID: ClientId = ClientId(u32::MAX);

    /// Identity of the calling process.
    pub fn current() -> Self {
        ClientId(std::process::id())
    }

    /// Whether this is a real identity.
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "none")
        }
    }
}

/// One registry slot: identity, open gate and cancellation token.
#[derive(Debug)]
pub struct SessionSlot {
    index: usize,
    id: Mutex<ClientId>,
    /// Serializes `open` per identity.
    pub(crate) open_gate: BinarySemaphore,
    /// Force-exit flag shared with the abort entry point.
    pub(crate) cancel: CancelToken,
}

impl SessionSlot {
    fn new(index: usize) -> Self {
        Self {
            index,
            id: Mutex::new(ClientId::INVALID),
            open_gate: BinarySemaphore::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Slot position in the table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current identity, if the slot is occupied.
    pub fn client_id(&self) -> Option<ClientId> {
        let id = *self.id.lock();
        id.is_valid().then_some(id)
    }

    /// The slot's cancellation token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// Fixed-size session table.
#[derive(Debug)]
pub struct ClientRegistry {
    slots: Vec<Arc<SessionSlot>>,
    /// Serializes scans against concurrent claim/reset.
    scan_lock: Mutex<()>,
}

impl ClientRegistry {
    /// Build a registry with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|i| Arc::new(SessionSlot::new(i))).collect(),
            scan_lock: Mutex::new(()),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn open_count(&self) -> usize {
        let _guard = self.scan_lock.lock();
        self.slots.iter().filter(|s| s.client_id().is_some()).count()
    }

    /// Find the slot for `id`, or claim the first free one.
    ///
    /// The linear scan prefers an existing match so that repeated opens by
    /// one identity land on the same slot.
    pub fn lookup_or_claim(&self, id: ClientId) -> EngineResult<Arc<SessionSlot>> {
        if !id.is_valid() {
            return Err(EngineError::SessionClosed);
        }
        let _guard = self.scan_lock.lock();

        for slot in &self.slots {
            if *slot.id.lock() == id {
                return Ok(Arc::clone(slot));
            }
        }
        for slot in &self.slots {
            let mut slot_id = slot.id.lock();
            if !slot_id.is_valid() {
                *slot_id = id;
                return Ok(Arc::clone(slot));
            }
        }

        tracing::warn!(client = %id, "session registry full");
        Err(EngineError::RegistryFull)
    }

    /// Re-assert a slot's identity after its gate was acquired. A close
    /// that raced in between may have reset the slot.
    pub fn confirm(&self, slot: &SessionSlot, id: ClientId) {
        let _guard = self.scan_lock.lock();
        *slot.id.lock() = id;
    }

    /// Release a slot: identity back to invalid, gate rearmed, any pending
    /// cancellation dropped.
    pub fn close(&self, slot: &SessionSlot) {
        let _guard = self.scan_lock.lock();
        *slot.id.lock() = ClientId::INVALID;
        slot.cancel.clear();
        slot.open_gate.reset();
    }

    /// Reset the slot owned by `id`, if any. Used by stale-holder recovery
    /// when the owning process died without closing.
    pub fn force_reset(&self, id: ClientId) {
        let _guard = self.scan_lock.lock();
        for slot in &self.slots {
            let mut slot_id = slot.id.lock();
            if *slot_id == id {
                *slot_id = ClientId::INVALID;
                slot.cancel.clear();
                slot.open_gate.reset();
                tracing::debug!(client = %id, slot = slot.index, "stale session slot reset");
                return;
            }
        }
    }
}
