//! Simulated scaling hardware.
//!
//! Behavior is scripted per test: complete after a delay (through the real
//! interrupt path), never complete, fail at configure or trigger, or block
//! inside configure until told otherwise. The stub also instruments the
//! mutual-exclusion property: it counts jobs between `trigger` and
//! `wait_idle` and records the high-water mark.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::coef::CoefTable;
use crate::fault::FaultSnapshot;
use crate::traits::ScalerHw;
use crate::types::JobConfig;

/// Scripted completion behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    /// Raise the completion interrupt after the given delay.
    CompleteAfter(Duration),
    /// Never complete on its own; the test fires the interrupt manually.
    Manual,
    /// Block inside `configure` until [`StubScaler::unblock_configure`].
    BlockConfigure,
    /// Reject `configure`.
    FailConfigure,
    /// Reject `trigger`.
    FailTrigger,
}

type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// The simulated device.
pub struct StubScaler {
    behavior: Mutex<StubBehavior>,
    irq_handler: Mutex<Option<IrqHandler>>,
    irq_enabled: Arc<AtomicBool>,
    irq_latched: Arc<AtomicBool>,
    initialized: AtomicBool,

    running_jobs: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,

    init_count: AtomicUsize,
    deinit_count: AtomicUsize,
    configure_count: AtomicUsize,
    trigger_count: AtomicUsize,
    wait_idle_count: AtomicUsize,
    coef_load_count: AtomicUsize,

    cfg_blocked: Mutex<bool>,
    cfg_cvar: Condvar,

    last_taps: Mutex<(u8, u8)>,
}

impl Default for StubScaler {
    fn default() -> Self {
        Self::new()
    }
}

impl StubScaler {
    /// New stub completing instantly (well, after 1 ms).
    pub fn new() -> Self {
        Self::with_behavior(StubBehavior::CompleteAfter(Duration::from_millis(1)))
    }

    /// New stub with the given scripted behavior.
    pub fn with_behavior(behavior: StubBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            irq_handler: Mutex::new(None),
            irq_enabled: Arc::new(AtomicBool::new(false)),
            irq_latched: Arc::new(AtomicBool::new(false)),
            initialized: AtomicBool::new(false),
            running_jobs: Arc::new(AtomicUsize::new(0)),
            max_concurrent: Arc::new(AtomicUsize::new(0)),
            init_count: AtomicUsize::new(0),
            deinit_count: AtomicUsize::new(0),
            configure_count: AtomicUsize::new(0),
            trigger_count: AtomicUsize::new(0),
            wait_idle_count: AtomicUsize::new(0),
            coef_load_count: AtomicUsize::new(0),
            cfg_blocked: Mutex::new(true),
            cfg_cvar: Condvar::new(),
            last_taps: Mutex::new((0, 0)),
        }
    }

    /// Swap the scripted behavior mid-test.
    pub fn set_behavior(&self, behavior: StubBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Install the engine's interrupt callback.
    pub fn set_irq_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.irq_handler.lock() = Some(Arc::new(handler));
    }

    /// Raise the interrupt line now (if interrupts are enabled), as the
    /// real device would at end of job.
    pub fn fire_irq(&self) {
        if !self.irq_enabled.load(Ordering::SeqCst) {
            return;
        }
        self.irq_latched.store(true, Ordering::SeqCst);
        let handler = self.irq_handler.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Open the configure gate for `BlockConfigure` scripts.
    pub fn unblock_configure(&self) {
        let mut blocked = self.cfg_blocked.lock();
        *blocked = false;
        self.cfg_cvar.notify_all();
    }

    /// High-water mark of jobs simultaneously between trigger and quiesce.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Number of `trigger` calls so far.
    pub fn trigger_count(&self) -> usize {
        self.trigger_count.load(Ordering::SeqCst)
    }

    /// Number of `configure` calls so far.
    pub fn configure_count(&self) -> usize {
        self.configure_count.load(Ordering::SeqCst)
    }

    /// Number of `init` calls so far.
    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    /// Number of `deinit` calls so far.
    pub fn deinit_count(&self) -> usize {
        self.deinit_count.load(Ordering::SeqCst)
    }

    /// Number of coefficient-table loads so far.
    pub fn coef_load_count(&self) -> usize {
        self.coef_load_count.load(Ordering::SeqCst)
    }

    /// Last tap modes written by the coefficient stage.
    pub fn last_taps(&self) -> (u8, u8) {
        *self.last_taps.lock()
    }

    /// Whether the device is currently initialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

impl ScalerHw for StubScaler {
    fn init(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        self.init_count.fetch_add(1, Ordering::SeqCst);
    }

    fn deinit(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.deinit_count.fetch_add(1, Ordering::SeqCst);
    }

    fn configure(&self, _job: &JobConfig) -> Result<(), String> {
        self.configure_count.fetch_add(1, Ordering::SeqCst);
        match *self.behavior.lock() {
            StubBehavior::FailConfigure => {
                return Err("scripted configure fault".to_string());
            }
            StubBehavior::BlockConfigure => {
                let mut blocked = self.cfg_blocked.lock();
                while *blocked {
                    self.cfg_cvar.wait(&mut blocked);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn trigger(&self) -> Result<(), String> {
        let behavior = *self.behavior.lock();
        if behavior == StubBehavior::FailTrigger {
            return Err("scripted trigger fault".to_string());
        }

        self.trigger_count.fetch_add(1, Ordering::SeqCst);
        let now = self.running_jobs.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        self.irq_enabled.store(true, Ordering::SeqCst);

        if let StubBehavior::CompleteAfter(delay) = behavior {
            let enabled = Arc::clone(&self.irq_enabled);
            let latched = Arc::clone(&self.irq_latched);
            let handler = self.irq_handler.lock().clone();
            thread::spawn(move || {
                thread::sleep(delay);
                if enabled.load(Ordering::SeqCst) {
                    latched.store(true, Ordering::SeqCst);
                    if let Some(handler) = handler {
                        handler();
                    }
                }
            });
        }
        Ok(())
    }

    fn wait_idle(&self) {
        self.wait_idle_count.fetch_add(1, Ordering::SeqCst);
        self.running_jobs.store(0, Ordering::SeqCst);
    }

    fn set_tap_modes(&self, row_mode: u8, col_mode: u8) {
        *self.last_taps.lock() = (row_mode, col_mode);
    }

    fn load_coefficients(&self, _table: &CoefTable) {
        self.coef_load_count.fetch_add(1, Ordering::SeqCst);
    }

    fn clear_irq_status(&self) {
        self.irq_latched.store(false, Ordering::SeqCst);
    }

    fn disable_irq(&self) {
        self.irq_enabled.store(false, Ordering::SeqCst);
    }

    fn fault_snapshot(&self) -> FaultSnapshot {
        FaultSnapshot {
            error_code: 0xDE,
            busy: self.running_jobs.load(Ordering::SeqCst) > 0,
            registers: vec![
                self.configure_count.load(Ordering::SeqCst) as u32,
                self.trigger_count.load(Ordering::SeqCst) as u32,
            ],
        }
    }
}
