//! Scaling-coefficient derivation and memoization.
//!
//! Coefficient-table generation is the expensive step of a submission, and
//! consecutive jobs very often share geometry (think video playback at a
//! fixed window size). The cache keys on the effective filter geometry —
//! decimated input size, output size and tap counts — and regenerates only
//! on a key change or when the force flag was raised by a power-state
//! transition.
//!
//! The factor bucketing thresholds are strict (`>8 → 4`, `>4 → 2`, else 1)
//! and load-bearing for image-quality regressions; tests pin each boundary.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::traits::{CoefGenerator, ScalerHw};
use crate::types::JobConfig;

/// Effective filter geometry: the memo key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoefKey {
    /// Decimated input width fed to the polyphase filter.
    pub coef_in_w: u32,
    /// Decimated input height.
    pub coef_in_h: u32,
    /// Output width.
    pub coef_out_w: u32,
    /// Output height.
    pub coef_out_h: u32,
    /// Horizontal tap count (2/4/6/8).
    pub h_tap: u8,
    /// Vertical tap count (2/4/6/8).
    pub v_tap: u8,
}

/// A generated coefficient table ready to load into the filter registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoefTable {
    /// The geometry this table was generated for.
    pub key: CoefKey,
    /// Horizontal filter phases, `h_tap` weights each.
    pub h_coeff: Vec<i32>,
    /// Vertical filter phases, `v_tap` weights each.
    pub v_coeff: Vec<i32>,
}

/// Memo of the last installed table's key.
#[derive(Debug, Default)]
pub struct CoefCache {
    last: Option<CoefKey>,
}

impl CoefCache {
    /// Fresh cache with nothing installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Key of the table currently loaded in the hardware, if any.
    pub fn installed(&self) -> Option<CoefKey> {
        self.last
    }

    /// Drop the memo so the next job regenerates.
    pub fn invalidate(&mut self) {
        self.last = None;
    }
}

pub(crate) fn ceil_div(a: u32, b: u32) -> u32 {
    debug_assert!(b > 0);
    a.div_ceil(b)
}

/// Bucket a raw decimation factor down to {1, 2, 4}. Strict thresholds.
pub(crate) fn bucket_factor(factor: u32) -> u32 {
    if factor > 8 {
        4
    } else if factor > 4 {
        2
    } else {
        1
    }
}

/// Map a tap count to the 2-bit hardware tap-mode field.
pub(crate) fn tap_to_mode(tap: u8) -> u8 {
    let mode = match tap {
        8 => 0,
        6 => 1,
        4 => 2,
        2 => 3,
        _ => 0,
    };
    mode & 0x3
}

/// Run the coefficient stage for a staged job.
///
/// No-op when the job needs no scaling. Otherwise derives the filter
/// geometry, picks tap counts, regenerates the table if the memo misses
/// (or `force` was raised), and writes the resolved tap modes into both
/// the job and the hardware. A generation failure leaves the previously
/// installed table and memo untouched.
pub fn prepare(
    cache: &mut CoefCache,
    job: &mut JobConfig,
    force: &AtomicBool,
    generator: &dyn CoefGenerator,
    hw: &dyn ScalerHw,
) -> EngineResult<()> {
    if !job.primary.scaling_en {
        return Ok(());
    }

    let dest = job.primary.dest_rect;
    if dest.w < 4 || dest.h < 4 {
        return Err(EngineError::OutputTooSmall {
            w: dest.w,
            h: dest.h,
        });
    }

    let clip = job.primary.clip_rect;
    let (after_rotate_w, after_rotate_h) = if job.primary.rotation.is_transposed() {
        (clip.h, clip.w)
    } else {
        (clip.w, clip.h)
    };

    let factor_w = ceil_div(after_rotate_w, dest.w);
    let factor_h = ceil_div(after_rotate_h, dest.h);
    if factor_w > 16 || factor_h > 16 {
        return Err(EngineError::ScaleOutOfRange { factor_w, factor_h });
    }

    let factor_w = bucket_factor(factor_w);
    let factor_h = bucket_factor(factor_h);

    let coef_in_w = ceil_div(after_rotate_w, factor_w);
    let coef_in_h = ceil_div(after_rotate_h, factor_h);
    let coef_out_w = dest.w;
    let coef_out_h = dest.h;

    let (mut h_tap, mut v_tap) = (8u8, 8u8);
    let downscale = coef_in_w >= coef_out_w || coef_in_h >= coef_out_h;
    if job.primary.format.is_video() && downscale {
        // Video downscales run short filters to control ringing; a clearly
        // anisotropic source gets 4 taps on its long axis.
        h_tap = 2;
        v_tap = 2;
        if 2 * coef_in_h > 3 * coef_in_w {
            v_tap = 4;
        }
        if 2 * coef_in_w > 3 * coef_in_h {
            h_tap = 4;
        }
    }

    // Caller override wins when set.
    if job.primary.row_tap != 0 {
        h_tap = job.primary.row_tap;
    }
    if job.primary.col_tap != 0 {
        v_tap = job.primary.col_tap;
    }

    let key = CoefKey {
        coef_in_w,
        coef_in_h,
        coef_out_w,
        coef_out_h,
        h_tap,
        v_tap,
    };

    if force.load(Ordering::SeqCst) || cache.last != Some(key) {
        let table = generator
            .generate(&key)
            .map_err(EngineError::CoefGeneration)?;
        hw.load_coefficients(&table);
        cache.last = Some(key);
        force.store(false, Ordering::SeqCst);
        tracing::debug!(
            in_w = key.coef_in_w,
            in_h = key.coef_in_h,
            out_w = key.coef_out_w,
            out_h = key.coef_out_h,
            h_tap = key.h_tap,
            v_tap = key.v_tap,
            "coefficient table regenerated"
        );
    }

    let row_mode = tap_to_mode(h_tap);
    let col_mode = tap_to_mode(v_tap);
    job.primary.row_tap_mode = row_mode;
    job.primary.col_tap_mode = col_mode;
    hw.set_tap_modes(row_mode, col_mode);

    Ok(())
}

/// Default generator: normalized raised-cosine polyphase weights.
///
/// Deterministic in the key, so identical geometry always yields an
/// identical table. Fixed-point Q10 weights, one phase per output step.
#[derive(Debug, Default)]
pub struct RaisedCosineGenerator;

const COEF_PHASES: usize = 8;
const COEF_FRAC_BITS: u32 = 10;

impl RaisedCosineGenerator {
    fn axis_coeff(taps: u8) -> Vec<i32> {
        let taps = taps as usize;
        let unit = 1i64 << COEF_FRAC_BITS;
        let mut out = Vec::with_capacity(COEF_PHASES * taps);
        for phase in 0..COEF_PHASES {
            let shift = phase as f64 / COEF_PHASES as f64;
            let mut weights = Vec::with_capacity(taps);
            let mut sum = 0f64;
            for t in 0..taps {
                let x = (t as f64 - (taps as f64 - 1.0) / 2.0 - shift)
                    / (taps as f64 / 2.0);
                let w = if x.abs() >= 1.0 {
                    0.0
                } else {
                    0.5 * (1.0 + (std::f64::consts::PI * x).cos())
                };
                sum += w;
                weights.push(w);
            }
            // Normalize each phase so the weights sum to one.
            for w in &weights {
                out.push(((w / sum) * unit as f64).round() as i32);
            }
        }
        out
    }
}

impl CoefGenerator for RaisedCosineGenerator {
    fn generate(&self, key: &CoefKey) -> Result<CoefTable, String> {
        if key.coef_out_w == 0 || key.coef_out_h == 0 {
            return Err("zero output dimension".to_string());
        }
        if !matches!(key.h_tap, 2 | 4 | 6 | 8) || !matches!(key.v_tap, 2 | 4 | 6 | 8) {
            return Err(format!(
                "unsupported tap counts {}x{}",
                key.h_tap, key.v_tap
            ));
        }
        Ok(CoefTable {
            key: *key,
            h_coeff: Self::axis_coeff(key.h_tap),
            v_coeff: Self::axis_coeff(key.v_tap),
        })
    }
}
