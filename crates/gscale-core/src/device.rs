//! Device context, session handles and the submission pipeline.
//!
//! [`DeviceContext`] is the probe-to-remove singleton for one physical
//! scaler. Clients open a [`SessionHandle`] and submit jobs through it;
//! each submission runs the full acquire → stage → coefficients →
//! configure → trigger → wait → release pipeline under the exclusivity
//! arbiter. The interrupt callback and the stale-holder recovery path are
//! the only ways state changes outside that pipeline.
//!
//! Error paths never leak the device lock: every exit after acquisition
//! funnels through a quiesce/release ladder mirroring the reference
//! protocol (copy failure releases immediately; anything after hardware
//! init also deinitializes and releases the address mappings).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::arbiter::Arbiter;
use crate::capability::{Capability, ChipVariant};
use crate::coef::{self, CoefCache, RaisedCosineGenerator};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fault::{FaultRing, FaultSnapshot};
use crate::registry::{ClientId, ClientRegistry, SessionSlot};
use crate::staging;
use crate::sync::{CompletionSignal, WaitOutcome};
use crate::traits::{BufferMapper, CoefGenerator, LivenessOracle, ScalerHw};
use crate::types::{BufferHandle, JobConfig};

/// The process-wide context for one scaling device.
pub struct DeviceContext {
    cfg: EngineConfig,
    hw: Arc<dyn ScalerHw>,
    mapper: Arc<dyn BufferMapper>,
    oracle: Arc<dyn LivenessOracle>,
    generator: Arc<dyn CoefGenerator>,

    registry: ClientRegistry,
    arbiter: Arbiter,
    completion: CompletionSignal,

    /// The staged job buffer; written only by the arbiter holder.
    job: Mutex<JobConfig>,
    coef: Mutex<CoefCache>,
    coef_force: AtomicBool,
    suspended: AtomicBool,
    faults: Mutex<FaultRing>,

    capability: Capability,
    capability_bytes: Vec<u8>,
    jobs_done: AtomicU64,
}

impl DeviceContext {
    /// Probe a device with the default coefficient generator.
    pub fn probe(
        cfg: EngineConfig,
        variant: ChipVariant,
        hw: Arc<dyn ScalerHw>,
        mapper: Arc<dyn BufferMapper>,
        oracle: Arc<dyn LivenessOracle>,
    ) -> EngineResult<Arc<Self>> {
        Self::probe_with_generator(cfg, variant, hw, mapper, oracle, Arc::new(RaisedCosineGenerator))
    }

    /// Probe with an injected coefficient generator.
    pub fn probe_with_generator(
        cfg: EngineConfig,
        variant: ChipVariant,
        hw: Arc<dyn ScalerHw>,
        mapper: Arc<dyn BufferMapper>,
        oracle: Arc<dyn LivenessOracle>,
        generator: Arc<dyn CoefGenerator>,
    ) -> EngineResult<Arc<Self>> {
        cfg.validate()?;
        let capability = Capability::for_variant(variant);
        let capability_bytes = serde_json::to_vec(&capability)
            .map_err(|e| EngineError::Config(format!("capability encoding: {}", e)))?;

        tracing::info!(
            ?variant,
            sessions = cfg.max_sessions,
            timeout_ms = cfg.wait_timeout_ms,
            "scaler device probed"
        );

        Ok(Arc::new(Self {
            registry: ClientRegistry::new(cfg.max_sessions),
            faults: Mutex::new(FaultRing::new(cfg.fault_ring_len)),
            cfg,
            hw,
            mapper,
            oracle,
            generator,
            arbiter: Arbiter::new(),
            completion: CompletionSignal::new(),
            job: Mutex::new(JobConfig::default()),
            coef: Mutex::new(CoefCache::new()),
            coef_force: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            capability,
            capability_bytes,
            jobs_done: AtomicU64::new(0),
        }))
    }

    /// Open (or re-enter) the session for `id`.
    ///
    /// Blocks on the session's open gate so one identity cannot hold the
    /// same session object from two openings at once.
    pub fn open(self: &Arc<Self>, id: ClientId) -> EngineResult<SessionHandle> {
        let slot = self.registry.lookup_or_claim(id)?;
        if !slot.open_gate.acquire(&slot.cancel) {
            tracing::debug!(client = %id, "open interrupted");
            return Err(EngineError::OpenInterrupted);
        }
        // A close may have recycled the slot while we were gated.
        self.registry.confirm(&slot, id);
        tracing::debug!(client = %id, slot = slot.index(), "session opened");
        Ok(SessionHandle {
            device: Arc::clone(self),
            slot,
        })
    }

    /// The capability record derived at probe time.
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Stable serialized form of the capability record.
    pub fn capability_bytes(&self) -> &[u8] {
        &self.capability_bytes
    }

    /// Interrupt-context entry point: clear the latch, mask further
    /// interrupts, raise the completion signal. Takes no engine lock.
    pub fn on_interrupt(&self) {
        self.hw.clear_irq_status();
        self.hw.disable_irq();
        self.completion.raise();
    }

    /// Reject submissions until [`resume`](DeviceContext::resume).
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
        tracing::info!("device suspended");
    }

    /// Accept submissions again. The next scaling job regenerates its
    /// coefficient table regardless of the memo.
    pub fn resume(&self) {
        self.coef_force.store(true, Ordering::SeqCst);
        self.suspended.store(false, Ordering::SeqCst);
        tracing::info!("device resumed, coefficient recalc forced");
    }

    /// Whether submissions are currently rejected.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Recorded device holder, if any.
    pub fn holder(&self) -> Option<ClientId> {
        self.arbiter.holder()
    }

    /// Whether the device lock is free.
    pub fn is_idle(&self) -> bool {
        self.arbiter.is_free()
    }

    /// Jobs completed successfully since probe.
    pub fn jobs_completed(&self) -> u64 {
        self.jobs_done.load(Ordering::SeqCst)
    }

    /// Pop the oldest pending fault snapshot.
    pub fn pop_fault(&self) -> Option<FaultSnapshot> {
        self.faults.lock().pop()
    }

    /// Copy of the most recently staged job.
    pub fn staged_job(&self) -> JobConfig {
        self.job.lock().clone()
    }

    /// One-line device status, the reference driver's read-back string.
    pub fn status_line(&self) -> String {
        let holder = self.arbiter.holder();
        let state = if self.is_suspended() {
            "suspended"
        } else if holder.is_some() {
            "busy"
        } else {
            "idle"
        };
        format!(
            "gscale {}|holder {}|sessions {}|jobs {}|faults {}",
            state,
            holder.map_or_else(|| "none".to_string(), |h| h.to_string()),
            self.registry.open_count(),
            self.jobs_done.load(Ordering::SeqCst),
            self.faults.lock().len(),
        )
    }

    /// Force the device away from a holder that no longer exists: reset
    /// the dead owner's session slot, quiesce and reset the hardware,
    /// rearm the completion signal and free the lock.
    fn recover_stale(&self, dead: ClientId) {
        tracing::warn!(client = %dead, "holder is gone, recovering device");
        self.registry.force_reset(dead);
        self.hw.wait_idle();
        self.hw.disable_irq();
        self.hw.deinit();
        self.completion.reset();
        self.arbiter.force_release(dead);
    }

    fn close_session(&self, slot: &SessionSlot) {
        if let Some(id) = slot.client_id() {
            // A close while holding the device (process tearing down
            // mid-job) must run the recovery path or the lock leaks.
            if self.arbiter.is_held_by(id) {
                self.recover_stale(id);
            }
            tracing::debug!(client = %id, "session closed");
        }
        self.registry.close(slot);
    }

    fn abort_session(&self, slot: &SessionSlot) {
        tracing::debug!(client = ?slot.client_id(), "abort requested");
        slot.cancel.set();
        // Wake whichever gate the session's thread may be sleeping on so
        // the flag gets observed.
        slot.open_gate.interrupt_waiters();
        self.arbiter.interrupt_waiters();
        self.completion.interrupt_waiters();
    }

    fn release_device(&self, id: ClientId) {
        if let Err(e) = self.arbiter.release(id) {
            // Recovery already tore the lock away; nothing left to do.
            tracing::error!(client = %id, error = %e, "release after recovery raced");
        }
    }

    /// Error ladder for failures after hardware init: reset the device,
    /// drop the address mappings, free the lock. Hardware teardown is
    /// skipped when recovery already took the device away — only the
    /// current holder may touch it.
    fn bail_configured(&self, id: ClientId, mapped: &[BufferHandle]) {
        if self.arbiter.is_held_by(id) {
            self.hw.deinit();
        }
        staging::release_addresses(mapped, self.mapper.as_ref());
        self.release_device(id);
    }

    fn submit_for(&self, slot: &SessionSlot, bytes: &[u8]) -> EngineResult<()> {
        if self.is_suspended() {
            return Err(EngineError::Suspended);
        }
        let me = slot.client_id().ok_or(EngineError::SessionClosed)?;

        // Stale-holder probe before queueing: a recorded holder whose
        // process is gone is recovered here, invisibly to the caller.
        if let Some(holder) = self.arbiter.holder() {
            if holder != me && !self.oracle.is_alive(holder) {
                self.recover_stale(holder);
            }
        }

        self.arbiter.acquire(me, &slot.cancel)?;
        let result = self.run_job(me, slot, bytes);
        if result.is_ok() {
            self.jobs_done.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    fn run_job(&self, me: ClientId, slot: &SessionSlot, bytes: &[u8]) -> EngineResult<()> {
        // Copy the client payload into the job buffer. Failure here has
        // touched nothing: release and report.
        let mut staged = match staging::decode(bytes) {
            Ok(job) => job,
            Err(e) => {
                self.release_device(me);
                return Err(e);
            }
        };

        self.hw.init();
        staging::decide_scaling(&mut staged);
        staging::apply_clock_hints(&mut staged, &self.cfg);

        let mapped = match staging::resolve_addresses(&mut staged, self.mapper.as_ref()) {
            Ok(mapped) => mapped,
            Err(e) => {
                self.hw.deinit();
                self.release_device(me);
                return Err(e);
            }
        };

        // Coefficient stage runs before the control surface is written.
        {
            let mut cache = self.coef.lock();
            if let Err(e) = coef::prepare(
                &mut cache,
                &mut staged,
                &self.coef_force,
                self.generator.as_ref(),
                self.hw.as_ref(),
            ) {
                drop(cache);
                self.bail_configured(me, &mapped);
                return Err(e);
            }
        }

        *self.job.lock() = staged.clone();

        if let Err(msg) = self.hw.configure(&staged) {
            tracing::warn!(client = %me, error = %msg, "configure failed");
            self.bail_configured(me, &mapped);
            return Err(EngineError::ConfigureFailed(msg));
        }

        // Only the recorded holder may start the device. Recovery can have
        // torn the lock away while we were stuck above (our process judged
        // dead); in that case nothing here may touch the hardware.
        if !self.arbiter.is_held_by(me) {
            staging::release_addresses(&mapped, self.mapper.as_ref());
            return Err(EngineError::NotOwner {
                caller: me,
                holder: self.arbiter.holder(),
            });
        }

        if let Err(msg) = self.hw.trigger() {
            tracing::warn!(client = %me, error = %msg, "trigger failed");
            self.faults.lock().push(self.hw.fault_snapshot());
            self.bail_configured(me, &mapped);
            return Err(EngineError::TriggerFailed(msg));
        }

        let timeout = Duration::from_millis(self.cfg.wait_timeout_ms);
        let outcome = self.completion.wait(timeout, &slot.cancel);
        // An abort that lands between the signal and here still wins.
        let forced = slot.cancel.take();

        // Quiesce: busy-bit down, interrupts masked, mappings released,
        // device reset, signal rearmed, lock freed. If recovery already
        // took the device away mid-wait, only our own mappings go: the
        // shared state now belongs to the next holder.
        let still_holder = self.arbiter.is_held_by(me);
        if still_holder {
            self.hw.wait_idle();
            self.hw.disable_irq();
        }
        staging::release_addresses(&mapped, self.mapper.as_ref());
        if still_holder {
            self.hw.deinit();
            self.completion.reset();
            self.release_device(me);
        } else {
            return Err(EngineError::NotOwner {
                caller: me,
                holder: self.arbiter.holder(),
            });
        }

        if forced || outcome == WaitOutcome::Interrupted {
            tracing::warn!(client = %me, "job force-cancelled");
            return Err(EngineError::ForceExit);
        }
        match outcome {
            WaitOutcome::Signaled => Ok(()),
            _ => {
                tracing::warn!(
                    client = %me,
                    timeout_ms = self.cfg.wait_timeout_ms,
                    "completion wait timed out"
                );
                Err(EngineError::WaitTimeout {
                    ms: self.cfg.wait_timeout_ms,
                })
            }
        }
    }
}

/// An open client session.
///
/// Dropping the handle closes the session; if the owning identity still
/// holds the device at that point, the recovery path runs first so the
/// lock is never leaked by a teardown.
pub struct SessionHandle {
    device: Arc<DeviceContext>,
    slot: Arc<SessionSlot>,
}

impl SessionHandle {
    /// This session's identity.
    pub fn client_id(&self) -> Option<ClientId> {
        self.slot.client_id()
    }

    /// The cached capability record.
    pub fn capability(&self) -> &Capability {
        self.device.capability()
    }

    /// Stable serialized capability bytes; identical across calls.
    pub fn capability_bytes(&self) -> &[u8] {
        self.device.capability_bytes()
    }

    /// Submit a job and wait for its completion.
    pub fn submit(&self, job: &JobConfig) -> EngineResult<()> {
        let bytes = serde_json::to_vec(job)
            .map_err(|e| EngineError::CopyFailed(e.to_string()))?;
        self.device.submit_for(&self.slot, &bytes)
    }

    /// Submit a raw serialized payload, the wire form of
    /// [`submit`](SessionHandle::submit).
    pub fn submit_raw(&self, bytes: &[u8]) -> EngineResult<()> {
        self.device.submit_for(&self.slot, bytes)
    }

    /// Raise this session's force-exit flag and wake its blocked waiter.
    pub fn abort(&self) {
        self.device.abort_session(&self.slot);
    }

    /// A cloneable handle for aborting from another thread.
    pub fn aborter(&self) -> SessionAborter {
        SessionAborter {
            device: Arc::clone(&self.device),
            slot: Arc::clone(&self.slot),
        }
    }

    /// One-line device status.
    pub fn status_line(&self) -> String {
        self.device.status_line()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.device.close_session(&self.slot);
    }
}

/// Abort-only view of a session, safe to hand to a watcher thread.
#[derive(Clone)]
pub struct SessionAborter {
    device: Arc<DeviceContext>,
    slot: Arc<SessionSlot>,
}

impl SessionAborter {
    /// Raise the force-exit flag and wake the session's blocked waiter.
    pub fn abort(&self) {
        self.device.abort_session(&self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::{ScriptedOracle, StubBehavior, StubMapper, StubScaler};
    use crate::types::Rect;

    fn wired_device(behavior: StubBehavior) -> (Arc<DeviceContext>, Arc<StubScaler>) {
        let hw = Arc::new(StubScaler::with_behavior(behavior));
        let device = DeviceContext::probe(
            EngineConfig {
                wait_timeout_ms: 100,
                ..EngineConfig::default()
            },
            ChipVariant::Gen3,
            hw.clone(),
            Arc::new(StubMapper::new()),
            Arc::new(ScriptedOracle::all_alive()),
        )
        .unwrap();
        let dev = Arc::clone(&device);
        hw.set_irq_handler(move || dev.on_interrupt());
        (device, hw)
    }

    fn copy_job() -> JobConfig {
        let mut job = JobConfig::default();
        job.primary.enabled = true;
        job.primary.clip_rect = Rect::new(0, 0, 640, 480);
        job.primary.dest_rect = Rect::new(0, 0, 640, 480);
        job
    }

    #[test]
    fn submit_completes_through_the_interrupt_path() {
        let (device, hw) = wired_device(StubBehavior::CompleteAfter(
            std::time::Duration::from_millis(2),
        ));
        let session = device.open(ClientId(10)).unwrap();
        session.submit(&copy_job()).unwrap();
        assert!(device.is_idle());
        assert_eq!(device.jobs_completed(), 1);
        assert_eq!(hw.trigger_count(), 1);
        assert_eq!(hw.init_count(), hw.deinit_count());
    }

    #[test]
    fn suspended_device_rejects_submissions() {
        let (device, _hw) = wired_device(StubBehavior::CompleteAfter(
            std::time::Duration::from_millis(1),
        ));
        let session = device.open(ClientId(11)).unwrap();
        device.suspend();
        assert!(matches!(
            session.submit(&copy_job()),
            Err(EngineError::Suspended)
        ));
        device.resume();
        session.submit(&copy_job()).unwrap();
    }

    #[test]
    fn malformed_payload_releases_the_lock() {
        let (device, hw) = wired_device(StubBehavior::CompleteAfter(
            std::time::Duration::from_millis(1),
        ));
        let session = device.open(ClientId(12)).unwrap();
        let err = session.submit_raw(b"garbage").unwrap_err();
        assert!(matches!(err, EngineError::CopyFailed(_)));
        assert!(device.is_idle());
        // Copy failure happens before hardware init.
        assert_eq!(hw.init_count(), 0);
    }

    #[test]
    fn trigger_failure_records_a_fault() {
        let (device, _hw) = wired_device(StubBehavior::FailTrigger);
        let session = device.open(ClientId(13)).unwrap();
        let err = session.submit(&copy_job()).unwrap_err();
        assert!(matches!(err, EngineError::TriggerFailed(_)));
        assert!(device.is_idle());
        assert!(device.pop_fault().is_some());
    }

    #[test]
    fn configure_failure_releases_everything() {
        let hw = Arc::new(StubScaler::with_behavior(StubBehavior::FailConfigure));
        let mapper = Arc::new(StubMapper::new());
        let device = DeviceContext::probe(
            EngineConfig::default(),
            ChipVariant::Gen2,
            hw.clone(),
            mapper.clone(),
            Arc::new(ScriptedOracle::all_alive()),
        )
        .unwrap();
        let session = device.open(ClientId(14)).unwrap();

        let mut job = copy_job();
        job.primary.handle = Some(BufferHandle {
            key: 5,
            uv_offset: 0,
            v_offset: 0,
        });
        job.primary.addr = None;

        let err = session.submit(&job).unwrap_err();
        assert!(matches!(err, EngineError::ConfigureFailed(_)));
        assert!(device.is_idle());
        assert_eq!(mapper.active_maps(), 0, "mappings released on the bail path");
        assert!(!hw.is_initialized());
    }

    #[test]
    fn staged_job_carries_clock_hints() {
        let (device, _hw) = wired_device(StubBehavior::CompleteAfter(
            std::time::Duration::from_millis(1),
        ));
        let session = device.open(ClientId(15)).unwrap();
        session.submit(&copy_job()).unwrap();
        let staged = device.staged_job();
        assert_eq!(staged.misc.core_clock, 3);
        assert_eq!(staged.misc.bus_clock, 2);
    }

    #[test]
    fn close_while_holding_recovers_the_lock() {
        let (device, _hw) = wired_device(StubBehavior::CompleteAfter(
            std::time::Duration::from_millis(1),
        ));
        let session = device.open(ClientId(17)).unwrap();
        // Simulate a teardown arriving while this identity holds the
        // device (another thread of the process mid-job).
        device
            .arbiter
            .acquire(ClientId(17), &crate::sync::CancelToken::new())
            .unwrap();
        assert!(!device.is_idle());
        drop(session);
        assert!(device.is_idle(), "close must run the recovery path");
    }

    #[test]
    fn status_line_reflects_state() {
        let (device, _hw) = wired_device(StubBehavior::CompleteAfter(
            std::time::Duration::from_millis(1),
        ));
        let session = device.open(ClientId(16)).unwrap();
        let line = session.status_line();
        assert!(line.contains("idle"));
        assert!(line.contains("sessions 1"));
        drop(session);
        assert!(device.status_line().contains("sessions 0"));
    }
}
