//! Engine configuration.
//!
//! Loaded in layers, teacher-style: `config/default.toml` (optional), an
//! environment-specific file selected by `GSCALE_ENV` (optional), then
//! `GSCALE__`-prefixed environment variables. `EngineConfig::default()` is
//! always valid and is what tests use.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Device clock selection hints carried into every job's misc block.
///
/// These mirror the reference hardware's module parameters: a core-clock
/// step (0..=3), a bus-clock step (0..=3) and a DDR access gap (0..=255).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClockConfig {
    /// Device core clock step, 0 (slowest) to 3 (fastest).
    pub core_clock: u8,
    /// Bus clock step, 0 to 3.
    pub bus_clock: u8,
    /// DDR request gap override. `None` keeps whatever the client supplied.
    pub ddr_gap: Option<u8>,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            core_clock: 3,
            bus_clock: 2,
            ddr_gap: None,
        }
    }
}

/// Main engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of concurrently open client sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Completion-wait budget per job, in milliseconds.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Number of hardware fault snapshots retained in the ring. Rounded up
    /// to a power of two by the ring itself.
    #[serde(default = "default_fault_ring")]
    pub fault_ring_len: usize,

    /// Clock hints applied to every staged job.
    #[serde(default)]
    pub clocks: ClockConfig,
}

fn default_max_sessions() -> usize {
    32
}

fn default_wait_timeout_ms() -> u64 {
    500
}

fn default_fault_ring() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            wait_timeout_ms: default_wait_timeout_ms(),
            fault_ring_len: default_fault_ring(),
            clocks: ClockConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from files and environment.
    ///
    /// Order: `config/default.toml`, `config/{GSCALE_ENV}.toml`, then
    /// `GSCALE__`-prefixed environment variables (`__` separates nesting,
    /// e.g. `GSCALE__CLOCKS__CORE_CLOCK=2`).
    pub fn load() -> EngineResult<Self> {
        let env = std::env::var("GSCALE_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("GSCALE").separator("__"));

        let cfg: EngineConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a single TOML file.
    pub fn from_file(path: &std::path::Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let cfg: EngineConfig = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("failed to parse config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check invariants the rest of the engine relies on.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_sessions == 0 {
            return Err(EngineError::Config("max_sessions must be at least 1".into()));
        }
        if self.wait_timeout_ms == 0 {
            return Err(EngineError::Config("wait_timeout_ms must be non-zero".into()));
        }
        if self.fault_ring_len == 0 {
            return Err(EngineError::Config("fault_ring_len must be non-zero".into()));
        }
        if self.clocks.core_clock > 3 || self.clocks.bus_clock > 3 {
            return Err(EngineError::Config("clock steps range from 0 to 3".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.wait_timeout_ms, 500);
        assert_eq!(cfg.max_sessions, 32);
    }

    #[test]
    fn zero_sessions_rejected() {
        let cfg = EngineConfig {
            max_sessions: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn bad_clock_step_rejected() {
        let cfg = EngineConfig {
            clocks: ClockConfig {
                core_clock: 9,
                ..ClockConfig::default()
            },
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
