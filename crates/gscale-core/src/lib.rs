//! gscale-core: job submission and resource arbitration for a shared 2D
//! graphics-scaling accelerator.
//!
//! One physical device, an unbounded number of client processes. The
//! engine provides:
//!
//! - a bounded [`registry`] of client sessions, one per process identity;
//! - an exclusivity [`arbiter`] over the device, tolerant of holders whose
//!   process died without releasing;
//! - job [`staging`] (payload copy-in, scaling decision, buffer-address
//!   resolution through the external allocator);
//! - a memoized scaling-[`coef`]ficient generator keyed on the effective
//!   filter geometry;
//! - a completion waiter turning the hardware interrupt into a synchronous
//!   submit result, with a bounded timeout and a client-driven abort.
//!
//! Everything board-specific sits behind the seams in [`traits`];
//! [`stubs`] provides simulated implementations for tests and tooling.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use gscale_core::{
//!     ChipVariant, ClientId, DeviceContext, EngineConfig, JobConfig, Rect,
//! };
//! use gscale_core::stubs::{ScriptedOracle, StubMapper, StubScaler};
//!
//! let hw = Arc::new(StubScaler::new());
//! let device = DeviceContext::probe(
//!     EngineConfig::default(),
//!     ChipVariant::Gen3,
//!     hw.clone(),
//!     Arc::new(StubMapper::new()),
//!     Arc::new(ScriptedOracle::all_alive()),
//! )
//! .unwrap();
//!
//! // Wire the simulated interrupt line to the engine.
//! let dev = Arc::clone(&device);
//! hw.set_irq_handler(move || dev.on_interrupt());
//!
//! let session = device.open(ClientId(1234)).unwrap();
//! let mut job = JobConfig::default();
//! job.primary.enabled = true;
//! job.primary.clip_rect = Rect::new(0, 0, 1920, 1080);
//! job.primary.dest_rect = Rect::new(0, 0, 1280, 720);
//! session.submit(&job).unwrap();
//! ```

pub mod arbiter;
pub mod capability;
pub mod coef;
pub mod config;
pub mod device;
pub mod error;
pub mod fault;
pub mod oracle;
pub mod registry;
pub mod staging;
pub mod stubs;
pub mod sync;
pub mod traits;
pub mod types;

pub use capability::{AddressMode, Capability, ChipVariant, Extent};
pub use coef::{CoefCache, CoefKey, CoefTable, RaisedCosineGenerator};
pub use config::{ClockConfig, EngineConfig};
pub use device::{DeviceContext, SessionAborter, SessionHandle};
pub use error::{EngineError, EngineResult};
pub use fault::FaultSnapshot;
pub use oracle::ProcScanOracle;
pub use registry::ClientId;
pub use traits::{BufferMapper, CoefGenerator, LivenessOracle, ScalerHw};
pub use types::{
    BufferHandle, DestConfig, JobConfig, LayerConfig, MiscConfig, OverlayConfig, PixelFormat,
    PlaneAddresses, Point, Rect, Rotation,
};
