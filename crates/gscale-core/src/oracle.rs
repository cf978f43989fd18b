//! OS-backed liveness oracle.

use std::path::Path;

use crate::registry::ClientId;
use crate::traits::LivenessOracle;

/// Answers liveness by probing the process table through `/proc`.
///
/// Anywhere the process table cannot be read, the answer is "dead": the
/// device must never stay locked behind an owner whose existence cannot be
/// verified, so the conservative direction is to force recovery.
#[derive(Debug, Default)]
pub struct ProcScanOracle;

impl ProcScanOracle {
    /// New oracle.
    pub fn new() -> Self {
        Self
    }
}

impl LivenessOracle for ProcScanOracle {
    fn is_alive(&self, id: ClientId) -> bool {
        if !id.is_valid() {
            return false;
        }
        Path::new("/proc").join(id.0.to_string()).exists()
    }
}
