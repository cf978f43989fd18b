//! Scripted liveness oracle.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::registry::ClientId;
use crate::traits::LivenessOracle;

/// Liveness oracle with per-identity overrides.
#[derive(Debug)]
pub struct ScriptedOracle {
    default_alive: bool,
    overrides: Mutex<HashMap<ClientId, bool>>,
}

impl ScriptedOracle {
    /// New oracle answering `default_alive` for unscripted identities.
    pub fn new(default_alive: bool) -> Self {
        Self {
            default_alive,
            overrides: Mutex::new(HashMap::new()),
        }
    }

    /// Everyone is alive unless scripted otherwise.
    pub fn all_alive() -> Self {
        Self::new(true)
    }

    /// Script the answer for one identity.
    pub fn set_alive(&self, id: ClientId, alive: bool) {
        self.overrides.lock().insert(id, alive);
    }
}

impl LivenessOracle for ScriptedOracle {
    fn is_alive(&self, id: ClientId) -> bool {
        *self.overrides.lock().get(&id).unwrap_or(&self.default_alive)
    }
}
