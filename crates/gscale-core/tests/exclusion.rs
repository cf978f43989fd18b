//! Mutual-exclusion property: for any interleaving of concurrent
//! submitters, at most one job is ever between trigger and quiesce.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use gscale_core::stubs::{ScriptedOracle, StubBehavior, StubMapper, StubScaler};
use gscale_core::{ChipVariant, ClientId, DeviceContext, EngineConfig, JobConfig, Rect};

fn scaling_job(seed: u32) -> JobConfig {
    let mut job = JobConfig::default();
    job.primary.enabled = true;
    job.primary.clip_rect = Rect::new(0, 0, 1280 + (seed % 3) * 64, 720);
    job.primary.dest_rect = Rect::new(0, 0, 640, 360);
    job
}

#[test]
fn at_most_one_job_runs_at_a_time() {
    const CLIENTS: u32 = 8;
    const JOBS_PER_CLIENT: u32 = 10;

    let hw = Arc::new(StubScaler::with_behavior(StubBehavior::CompleteAfter(
        Duration::from_millis(1),
    )));
    let device = DeviceContext::probe(
        EngineConfig::default(),
        ChipVariant::Gen3,
        hw.clone(),
        Arc::new(StubMapper::new()),
        Arc::new(ScriptedOracle::all_alive()),
    )
    .unwrap();
    let dev = Arc::clone(&device);
    hw.set_irq_handler(move || dev.on_interrupt());

    let mut workers = Vec::new();
    for client in 0..CLIENTS {
        let device = Arc::clone(&device);
        workers.push(thread::spawn(move || {
            let session = device.open(ClientId(1000 + client)).unwrap();
            let mut rng = rand::thread_rng();
            for job in 0..JOBS_PER_CLIENT {
                session.submit(&scaling_job(client + job)).unwrap();
                thread::sleep(Duration::from_micros(rng.gen_range(0..500)));
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(
        hw.max_concurrent(),
        1,
        "two jobs were triggered concurrently"
    );
    assert_eq!(hw.trigger_count() as u32, CLIENTS * JOBS_PER_CLIENT);
    assert_eq!(device.jobs_completed() as u32, CLIENTS * JOBS_PER_CLIENT);
    assert!(device.is_idle());
    assert_eq!(device.holder(), None);
}

#[test]
fn serialized_submitters_never_observe_each_other() {
    let hw = Arc::new(StubScaler::with_behavior(StubBehavior::CompleteAfter(
        Duration::from_millis(2),
    )));
    let device = DeviceContext::probe(
        EngineConfig::default(),
        ChipVariant::Gen2,
        hw.clone(),
        Arc::new(StubMapper::new()),
        Arc::new(ScriptedOracle::all_alive()),
    )
    .unwrap();
    let dev = Arc::clone(&device);
    hw.set_irq_handler(move || dev.on_interrupt());

    // Two clients hammering in lockstep.
    let a = Arc::clone(&device);
    let ta = thread::spawn(move || {
        let session = a.open(ClientId(1)).unwrap();
        for _ in 0..20 {
            session.submit(&scaling_job(0)).unwrap();
        }
    });
    let b = Arc::clone(&device);
    let tb = thread::spawn(move || {
        let session = b.open(ClientId(2)).unwrap();
        for _ in 0..20 {
            session.submit(&scaling_job(1)).unwrap();
        }
    });
    ta.join().unwrap();
    tb.join().unwrap();

    assert_eq!(hw.max_concurrent(), 1);
    assert!(device.is_idle());
}
