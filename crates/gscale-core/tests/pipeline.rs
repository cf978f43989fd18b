//! End-to-end pipeline properties: timeout and abort paths release the
//! lock, the capability record is stable, the open gate serializes one
//! identity, and resume forces coefficient regeneration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gscale_core::stubs::{ScriptedOracle, StubBehavior, StubMapper, StubScaler};
use gscale_core::{
    BufferHandle, ChipVariant, ClientId, CoefGenerator, CoefKey, CoefTable, DeviceContext,
    EngineConfig, EngineError, JobConfig, RaisedCosineGenerator, Rect,
};

fn wired(behavior: StubBehavior, timeout_ms: u64) -> (Arc<DeviceContext>, Arc<StubScaler>) {
    let hw = Arc::new(StubScaler::with_behavior(behavior));
    let device = DeviceContext::probe(
        EngineConfig {
            wait_timeout_ms: timeout_ms,
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

fn plain_job() -> JobConfig {
    let mut job = JobConfig::default();
    job.primary.enabled = true;
    job.primary.clip_rect = Rect::new(0, 0, 1280, 720);
    job.primary.dest_rect = Rect::new(0, 0, 640, 360);
    job
}

#[test]
fn timeout_path_releases_the_lock() {
    let (device, hw) = wired(StubBehavior::Manual, 60);
    let session = device.open(ClientId(1)).unwrap();

    let err = session.submit(&plain_job()).unwrap_err();
    assert!(matches!(err, EngineError::WaitTimeout { ms: 60 }));
    assert!(device.is_idle(), "timeout must not leak the lock");
    assert_eq!(device.holder(), None);

    // The device is immediately usable again.
    hw.set_behavior(StubBehavior::CompleteAfter(Duration::from_millis(1)));
    session.submit(&plain_job()).unwrap();
    assert_eq!(device.jobs_completed(), 1);
}

#[test]
fn abort_unblocks_a_stuck_waiter() {
    let (device, _hw) = wired(StubBehavior::Manual, 10_000);
    let session = device.open(ClientId(2)).unwrap();
    let aborter = session.aborter();

    let started = Instant::now();
    let worker = thread::spawn(move || {
        let result = session.submit(&plain_job());
        (result, session)
    });

    thread::sleep(Duration::from_millis(50));
    aborter.abort();

    let (result, session) = worker.join().unwrap();
    assert!(matches!(result, Err(EngineError::ForceExit)));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "abort did not cut the wait short"
    );
    assert!(device.is_idle(), "force-exit must quiesce and release");

    drop(session);
}

#[test]
fn capability_is_byte_identical_across_calls() {
    let (device, _hw) = wired(StubBehavior::CompleteAfter(Duration::from_millis(1)), 500);
    let session = device.open(ClientId(3)).unwrap();

    let first = session.capability_bytes().to_vec();
    let second = session.capability_bytes().to_vec();
    assert_eq!(first, second);

    // A submission in between does not perturb the record.
    session.submit(&plain_job()).unwrap();
    assert_eq!(session.capability_bytes(), first.as_slice());
    assert_eq!(
        serde_json::to_vec(session.capability()).unwrap(),
        first,
        "record and serialized form agree"
    );
}

#[test]
fn open_gate_serializes_one_identity() {
    let (device, _hw) = wired(StubBehavior::CompleteAfter(Duration::from_millis(1)), 500);
    let first = device.open(ClientId(4)).unwrap();

    let dev = Arc::clone(&device);
    let opener = thread::spawn(move || {
        // Same identity: must block until the first session closes.
        let session = dev.open(ClientId(4)).unwrap();
        session.client_id()
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!opener.is_finished(), "second open must gate");

    drop(first);
    assert_eq!(opener.join().unwrap(), Some(ClientId(4)));
}

#[test]
fn registry_full_surfaces_to_the_client() {
    let hw = Arc::new(StubScaler::new());
    let device = DeviceContext::probe(
        EngineConfig {
            max_sessions: 2,
            ..EngineConfig::default()
        },
        ChipVariant::Gen1,
        hw,
        Arc::new(StubMapper::new()),
        Arc::new(ScriptedOracle::all_alive()),
    )
    .unwrap();

    let _a = device.open(ClientId(10)).unwrap();
    let _b = device.open(ClientId(11)).unwrap();
    assert!(matches!(
        device.open(ClientId(12)),
        Err(EngineError::RegistryFull)
    ));
}

#[test]
fn successful_job_balances_every_mapping() {
    let hw = Arc::new(StubScaler::with_behavior(StubBehavior::CompleteAfter(
        Duration::from_millis(1),
    )));
    let mapper = Arc::new(StubMapper::new());
    let device = DeviceContext::probe(
        EngineConfig::default(),
        ChipVariant::Gen3,
        hw.clone(),
        mapper.clone(),
        Arc::new(ScriptedOracle::all_alive()),
    )
    .unwrap();
    let dev = Arc::clone(&device);
    hw.set_irq_handler(move || dev.on_interrupt());

    let session = device.open(ClientId(5)).unwrap();
    let mut job = plain_job();
    job.primary.handle = Some(BufferHandle {
        key: 1,
        uv_offset: 0x10_0000,
        v_offset: 0,
    });
    job.dest.handle = Some(BufferHandle {
        key: 2,
        uv_offset: 0,
        v_offset: 0,
    });

    session.submit(&job).unwrap();
    assert_eq!(mapper.total_maps(), 2);
    assert_eq!(mapper.active_maps(), 0, "every map released after the job");
}

/// Generator wrapper counting invocations.
struct Counting {
    inner: RaisedCosineGenerator,
    calls: Arc<AtomicUsize>,
}

impl CoefGenerator for Counting {
    fn generate(&self, key: &CoefKey) -> Result<CoefTable, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.generate(key)
    }
}

#[test]
fn resume_forces_coefficient_regeneration() {
    let calls = Arc::new(AtomicUsize::new(0));
    let hw = Arc::new(StubScaler::with_behavior(StubBehavior::CompleteAfter(
        Duration::from_millis(1),
    )));
    let device = DeviceContext::probe_with_generator(
        EngineConfig::default(),
        ChipVariant::Gen3,
        hw.clone(),
        Arc::new(StubMapper::new()),
        Arc::new(ScriptedOracle::all_alive()),
        Arc::new(Counting {
            inner: RaisedCosineGenerator,
            calls: Arc::clone(&calls),
        }),
    )
    .unwrap();
    let dev = Arc::clone(&device);
    hw.set_irq_handler(move || dev.on_interrupt());

    let session = device.open(ClientId(6)).unwrap();

    session.submit(&plain_job()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Same geometry: the memo short-circuits generation.
    session.submit(&plain_job()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A suspend/resume cycle invalidates whatever the hardware held.
    device.suspend();
    assert!(matches!(
        session.submit(&plain_job()),
        Err(EngineError::Suspended)
    ));
    device.resume();
    session.submit(&plain_job()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
