//! Job staging: copy-in, scaling decision, address resolution.
//!
//! Staging is everything that happens to a submission between the arbiter
//! grant and the first hardware register write: the client payload is
//! copied (deserialized) into the device job buffer, the scaling-required
//! flag is derived from the geometry, engine clock hints are folded in,
//! and unresolved buffer handles are mapped through the external allocator.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::traits::BufferMapper;
use crate::types::{BufferHandle, JobConfig, PlaneAddresses};

/// Copy the client payload into a job buffer.
///
/// The payload crosses the client boundary as serialized bytes; a payload
/// the engine cannot read is the copy-from-client failure of the reference
/// protocol and must not touch hardware.
pub fn decode(bytes: &[u8]) -> EngineResult<JobConfig> {
    serde_json::from_slice(bytes).map_err(|e| EngineError::CopyFailed(e.to_string()))
}

/// Derive whether the primary layer needs the scaler.
///
/// Pure function of the geometry: the crop rectangle (transposed for
/// 90/270-degree rotations) is compared against the destination rectangle;
/// any mismatch on either axis requires scaling.
pub fn decide_scaling(job: &mut JobConfig) {
    if !job.primary.enabled {
        return;
    }
    let clip = job.primary.clip_rect;
    let dest = job.primary.dest_rect;
    let mismatch = if job.primary.rotation.is_transposed() {
        clip.w != dest.h || clip.h != dest.w
    } else {
        clip.w != dest.w || clip.h != dest.h
    };
    if mismatch {
        job.primary.scaling_en = true;
    }
}

/// Fold the engine's clock hints into the staged job.
pub fn apply_clock_hints(job: &mut JobConfig, cfg: &EngineConfig) {
    job.misc.core_clock = cfg.clocks.core_clock;
    job.misc.bus_clock = cfg.clocks.bus_clock;
    if let Some(gap) = cfg.clocks.ddr_gap {
        job.misc.ddr_gap = gap;
    }
}

fn resolve_one(
    addr: &mut Option<PlaneAddresses>,
    handle: Option<BufferHandle>,
    mapper: &dyn BufferMapper,
    mapped: &mut Vec<BufferHandle>,
) -> EngineResult<()> {
    if addr.is_some() {
        return Ok(());
    }
    let Some(handle) = handle else {
        return Ok(());
    };
    match mapper.map(&handle) {
        Ok(base) => {
            *addr = Some(PlaneAddresses {
                y: base,
                uv: base + handle.uv_offset,
                v: base + handle.v_offset,
            });
            mapped.push(handle);
            Ok(())
        }
        Err(e) => {
            tracing::warn!(key = handle.key, error = %e, "buffer map failed");
            Err(EngineError::AddressMap(e))
        }
    }
}

/// Resolve every image with an unset address but a set buffer handle.
///
/// On success returns the handles that were mapped, to be released after
/// the job completes. On failure every mapping made so far is released
/// before the error propagates, so no allocator reference leaks.
pub fn resolve_addresses(
    job: &mut JobConfig,
    mapper: &dyn BufferMapper,
) -> EngineResult<Vec<BufferHandle>> {
    let mut mapped = Vec::new();

    let result = resolve_one(&mut job.primary.addr, job.primary.handle, mapper, &mut mapped)
        .and_then(|()| {
            resolve_one(&mut job.overlay.addr, job.overlay.handle, mapper, &mut mapped)
        })
        .and_then(|()| resolve_one(&mut job.dest.addr, job.dest.handle, mapper, &mut mapped));

    match result {
        Ok(()) => Ok(mapped),
        Err(e) => {
            release_addresses(&mapped, mapper);
            Err(e)
        }
    }
}

/// Release every mapping obtained by [`resolve_addresses`].
pub fn release_addresses(mapped: &[BufferHandle], mapper: &dyn BufferMapper) {
    for handle in mapped {
        mapper.unmap(handle);
    }
}
