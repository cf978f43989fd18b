//! Simulated buffer allocator.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::traits::BufferMapper;
use crate::types::BufferHandle;

/// Deterministic address mapper with reference accounting.
///
/// Every key maps to a stable fake base address; tests can script failures
/// per key and assert that the engine balances every map with an unmap.
#[derive(Debug, Default)]
pub struct StubMapper {
    active: Mutex<HashMap<u64, usize>>,
    failing: Mutex<HashSet<u64>>,
    total_maps: AtomicUsize,
}

impl StubMapper {
    /// New mapper with no scripted failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every map of `key` fail from now on.
    pub fn fail_key(&self, key: u64) {
        self.failing.lock().insert(key);
    }

    /// Outstanding (mapped but not released) references.
    pub fn active_maps(&self) -> usize {
        self.active.lock().values().sum()
    }

    /// Total successful maps over the mapper's lifetime.
    pub fn total_maps(&self) -> usize {
        self.total_maps.load(Ordering::SeqCst)
    }
}

impl BufferMapper for StubMapper {
    fn map(&self, handle: &BufferHandle) -> Result<u64, String> {
        if self.failing.lock().contains(&handle.key) {
            return Err(format!("no such buffer: {}", handle.key));
        }
        *self.active.lock().entry(handle.key).or_insert(0) += 1;
        self.total_maps.fetch_add(1, Ordering::SeqCst);
        Ok(0x1000_0000 + handle.key * 0x0100_0000)
    }

    fn unmap(&self, handle: &BufferHandle) {
        let mut active = self.active.lock();
        match active.get_mut(&handle.key) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                active.remove(&handle.key);
            }
            None => {
                tracing::warn!(key = handle.key, "unmap of a handle that was never mapped");
            }
        }
    }
}
