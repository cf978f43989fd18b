//! Job geometry and descriptor types.
//!
//! A [`JobConfig`] is the per-submission value a client hands to the engine:
//! up to two source layers (a scaling-capable primary and a positioned
//! overlay) plus one destination surface. It crosses the client boundary as
//! serialized bytes and is copied into the device job buffer by staging.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in source or destination pixel space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
}

impl Rect {
    /// Construct a rectangle.
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
}

/// A destination anchor point for the overlay layer (which never scales).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position.
    pub x: u32,
    /// Vertical position.
    pub y: u32,
}

/// Rotation applied to a source layer on the way to the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    /// No rotation.
    #[default]
    Deg0,
    /// 90 degrees clockwise.
    Deg90,
    /// 180 degrees.
    Deg180,
    /// 270 degrees clockwise.
    Deg270,
    /// Mirrored, no rotation.
    Deg0Mirror,
    /// Mirrored, then 90 degrees.
    Deg90Mirror,
    /// Mirrored, then 180 degrees.
    Deg180Mirror,
    /// Mirrored, then 270 degrees.
    Deg270Mirror,
}

impl Rotation {
    /// Whether this rotation transposes width and height (90/270 in either
    /// mirrored or non-mirrored variant).
    pub fn is_transposed(self) -> bool {
        matches!(
            self,
            Rotation::Deg90 | Rotation::Deg270 | Rotation::Deg90Mirror | Rotation::Deg270Mirror
        )
    }
}

/// Pixel format of a source or destination image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 32-bit ARGB.
    #[default]
    Argb8888,
    /// 24-bit RGB.
    Rgb888,
    /// 16-bit RGB.
    Rgb565,
    /// Planar YUV 4:2:0 (three planes).
    Yuv420Planar,
    /// Semi-planar YUV 4:2:0 (Y plane + interleaved UV).
    Yuv420SemiPlanar,
    /// Semi-planar YUV 4:2:2.
    Yuv422SemiPlanar,
    /// Luma-only.
    Yuv400,
}

impl PixelFormat {
    /// Whether this is a video (YUV-family) format. Video sources get the
    /// reduced-tap treatment on downscales to control ringing.
    pub fn is_video(self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv420Planar
                | PixelFormat::Yuv420SemiPlanar
                | PixelFormat::Yuv422SemiPlanar
                | PixelFormat::Yuv400
        )
    }
}

/// Fully resolved device-visible plane addresses for one image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneAddresses {
    /// Y (or packed RGB) plane base.
    pub y: u64,
    /// UV plane base.
    pub uv: u64,
    /// V plane base (planar formats only).
    pub v: u64,
}

/// An opaque buffer handle plus plane offsets, resolved through the
/// external allocator when the address field is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferHandle {
    /// Allocator key (the shared-buffer identifier).
    pub key: u64,
    /// Offset of the UV plane from the mapped base.
    pub uv_offset: u64,
    /// Offset of the V plane from the mapped base.
    pub v_offset: u64,
}

/// The scaling-capable primary source layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Whether this layer participates in the job.
    pub enabled: bool,
    /// Source pixel format.
    pub format: PixelFormat,
    /// Source row pitch in pixels.
    pub pitch: u32,
    /// Source crop rectangle.
    pub clip_rect: Rect,
    /// Destination rectangle (scaling target).
    pub dest_rect: Rect,
    /// Rotation applied on the way out.
    pub rotation: Rotation,
    /// Block alpha.
    pub alpha: u8,
    /// Resolved plane addresses, if the client already knows them.
    pub addr: Option<PlaneAddresses>,
    /// Unresolved buffer handle; staging maps it when `addr` is unset.
    pub handle: Option<BufferHandle>,
    /// Caller tap override for the horizontal filter (0 = auto).
    #[serde(default)]
    pub row_tap: u8,
    /// Caller tap override for the vertical filter (0 = auto).
    #[serde(default)]
    pub col_tap: u8,
    /// Derived by staging: whether this job needs the scaler at all.
    #[serde(default)]
    pub scaling_en: bool,
    /// Hardware-facing resolved horizontal tap mode, written by the
    /// coefficient stage.
    #[serde(default)]
    pub row_tap_mode: u8,
    /// Hardware-facing resolved vertical tap mode.
    #[serde(default)]
    pub col_tap_mode: u8,
}

/// The non-scaling overlay source layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Whether this layer participates in the job.
    pub enabled: bool,
    /// Source pixel format.
    pub format: PixelFormat,
    /// Source row pitch in pixels.
    pub pitch: u32,
    /// Source crop rectangle.
    pub clip_rect: Rect,
    /// Destination anchor (the overlay keeps its cropped size).
    pub dest_pos: Point,
    /// Rotation applied on the way out.
    pub rotation: Rotation,
    /// Block alpha.
    pub alpha: u8,
    /// Resolved plane addresses, if known.
    pub addr: Option<PlaneAddresses>,
    /// Unresolved buffer handle.
    pub handle: Option<BufferHandle>,
}

/// The destination surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestConfig {
    /// Destination pixel format.
    pub format: PixelFormat,
    /// Destination row pitch in pixels.
    pub pitch: u32,
    /// Resolved plane addresses, if known.
    pub addr: Option<PlaneAddresses>,
    /// Unresolved buffer handle.
    pub handle: Option<BufferHandle>,
}

/// Miscellaneous per-job device settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiscConfig {
    /// Output dithering.
    pub dithering: bool,
    /// DDR request gap (0..=255); the engine config may override it.
    pub ddr_gap: u8,
    /// Core clock step, filled in by staging from the engine config.
    #[serde(default)]
    pub core_clock: u8,
    /// Bus clock step, filled in by staging from the engine config.
    #[serde(default)]
    pub bus_clock: u8,
}

/// One complete job submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Primary (scaling-capable) layer.
    pub primary: LayerConfig,
    /// Overlay layer.
    pub overlay: OverlayConfig,
    /// Destination surface.
    pub dest: DestConfig,
    /// Per-job device settings.
    pub misc: MiscConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transposed_rotations() {
        assert!(Rotation::Deg90.is_transposed());
        assert!(Rotation::Deg270Mirror.is_transposed());
        assert!(!Rotation::Deg0.is_transposed());
        assert!(!Rotation::Deg180Mirror.is_transposed());
    }

    #[test]
    fn video_formats() {
        assert!(PixelFormat::Yuv420SemiPlanar.is_video());
        assert!(!PixelFormat::Argb8888.is_video());
    }

    #[test]
    fn job_round_trips_through_json() {
        let mut job = JobConfig::default();
        job.primary.enabled = true;
        job.primary.clip_rect = Rect::new(0, 0, 1920, 1080);
        job.primary.dest_rect = Rect::new(0, 0, 480, 270);
        job.primary.handle = Some(BufferHandle {
            key: 42,
            uv_offset: 1920 * 1080,
            v_offset: 0,
        });

        let bytes = serde_json::to_vec(&job).unwrap();
        let back: JobConfig = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(job, back);
    }
}
