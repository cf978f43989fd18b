//! Stub implementations of the external seams.
//!
//! Simulated hardware, allocator and liveness oracle for tests, the CLI
//! and anything else that wants the full engine without a real device.

pub mod hw;
pub mod mapper;
pub mod oracle;

pub use hw::{StubBehavior, StubScaler};
pub use mapper::StubMapper;
pub use oracle::ScriptedOracle;
