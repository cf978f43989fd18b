//! Error types for gscale-core.
//!
//! Every failure a client can observe from the submission pipeline maps to a
//! distinct [`EngineError`] variant; nothing is retried behind the caller's
//! back except stale-holder recovery, which is internal self-healing and
//! never surfaces here.

use thiserror::Error;

use crate::registry::ClientId;

/// Top-level error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Every session slot is occupied by a live identity.
    #[error("session registry full")]
    RegistryFull,

    /// The wait on a session's open gate was interrupted by cancellation.
    #[error("open interrupted while waiting for session gate")]
    OpenInterrupted,

    /// The session handle was already closed (identity recycled).
    #[error("session is closed")]
    SessionClosed,

    /// The wait for device ownership was interrupted by cancellation.
    #[error("device acquisition interrupted")]
    AcquireInterrupted,

    /// A release/trigger/wait was attempted by an identity that does not
    /// hold the device. This is an invariant violation on the caller's part.
    #[error("client {caller} does not own the device (holder: {holder:?})")]
    NotOwner {
        /// The offending identity.
        caller: ClientId,
        /// The recorded holder at the time of the call, if any.
        holder: Option<ClientId>,
    },

    /// The client-supplied job payload could not be copied into the device
    /// job buffer.
    #[error("failed to copy job configuration from client: {0}")]
    CopyFailed(String),

    /// Resolving a buffer handle to a device-visible address failed.
    #[error("buffer address resolution failed: {0}")]
    AddressMap(String),

    /// The destination rectangle is below the hardware minimum of 4x4.
    #[error("scaled output {w}x{h} below hardware minimum")]
    OutputTooSmall {
        /// Destination width.
        w: u32,
        /// Destination height.
        h: u32,
    },

    /// A resize factor exceeds the 16x hardware limit.
    #[error("resize factor {factor_w}x{factor_h} out of range")]
    ScaleOutOfRange {
        /// Width decimation factor before bucketing.
        factor_w: u32,
        /// Height decimation factor before bucketing.
        factor_h: u32,
    },

    /// The coefficient generator rejected the geometry or ran out of
    /// resources. The previously installed table stays untouched.
    #[error("coefficient generation failed: {0}")]
    CoefGeneration(String),

    /// Writing the resolved job into the device control surface failed.
    #[error("hardware configure failed: {0}")]
    ConfigureFailed(String),

    /// The start command was rejected by the hardware.
    #[error("hardware trigger failed: {0}")]
    TriggerFailed(String),

    /// The completion interrupt did not arrive within the wait budget.
    /// The device has been quiesced and released by the time this returns.
    #[error("completion wait timed out after {ms} ms")]
    WaitTimeout {
        /// The configured wait budget.
        ms: u64,
    },

    /// The submission was cancelled through the session's abort entry point
    /// while waiting. The device has been quiesced and released.
    #[error("submission force-cancelled by client abort")]
    ForceExit,

    /// The device is suspended; submissions are rejected until resume.
    #[error("device is suspended")]
    Suspended,

    /// Invalid or unreadable engine configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = EngineError::WaitTimeout { ms: 500 };
        assert!(err.to_string().contains("500"));

        let err = EngineError::NotOwner {
            caller: ClientId(7),
            holder: Some(ClientId(3)),
        };
        assert!(err.to_string().contains('7'));
    }
}
