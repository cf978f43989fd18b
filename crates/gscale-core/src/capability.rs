//! Chip variants and the capability table.
//!
//! The reference hardware shipped in several silicon revisions with
//! different layer counts, scale ranges and workaround requirements. The
//! variant is fixed at probe time; the derived [`Capability`] record is
//! computed once and cached for the life of the device context, so repeated
//! capability queries return byte-identical results.

use serde::{Deserialize, Serialize};

/// How the device addresses client buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMode {
    /// The device consumes raw physical addresses.
    Physical,
    /// The device consumes IOMMU-mapped virtual addresses.
    IoVirtual,
}

/// Known silicon revisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipVariant {
    /// First-generation part. Single layer, wide upscale range.
    Gen1,
    /// First-generation part with the broken IOMMU control path: must be
    /// fed physical addresses, and video sources need a bounce copy.
    Gen1VideoQuirk,
    /// Second generation with the output black-line defect: video sources
    /// need a bounce copy to avoid it.
    Gen2BlackLine,
    /// Second generation with the black-line defect fixed.
    Gen2,
    /// Third generation: blends video with OSD natively, two layers.
    Gen3,
    /// Unrecognized silicon; conservative single-layer defaults.
    #[default]
    Unknown,
}

/// Extent pair used for crop and output bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
}

/// The capability record returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Which silicon this record was derived from.
    pub variant: ChipVariant,
    /// Engine revision reported to clients.
    pub version: u8,
    /// Maximum layers in one job.
    pub max_layers: u8,
    /// Maximum layers when one of them is video.
    pub max_layers_with_video: u8,
    /// Maximum video layers in one job.
    pub max_video_layers: u8,
    /// Whether video blends with OSD in a single pass.
    pub blend_video_with_osd: bool,
    /// Whether video sources must be bounce-copied before submission.
    pub video_need_copy: bool,
    /// Whether video source dimensions are capped to the small-size tier.
    pub limited_video_size: bool,
    /// Maximum upscale numerator (denominator 1).
    pub scale_range_up: u16,
    /// Maximum downscale denominator (numerator 1).
    pub scale_range_down: u16,
    /// Whether one axis may upscale while the other downscales.
    pub scale_updown_sametime: bool,
    /// Whether OSD layers may be scaled.
    pub osd_scaling: bool,
    /// How buffers are addressed on this part.
    pub address_mode: AddressMode,
    /// Whether YUV geometry must be even-aligned.
    pub yuv_even_alignment: bool,
    /// Minimum crop size.
    pub crop_min: Extent,
    /// Maximum crop size.
    pub crop_max: Extent,
    /// Minimum output size.
    pub out_min: Extent,
    /// Maximum output size.
    pub out_max: Extent,
}

impl Capability {
    /// Derive the capability record for a silicon variant.
    pub fn for_variant(variant: ChipVariant) -> Self {
        // Baseline shared by every revision.
        let mut cap = Capability {
            variant,
            version: 0x00,
            max_layers: 1,
            max_layers_with_video: 1,
            max_video_layers: 1,
            blend_video_with_osd: false,
            video_need_copy: false,
            limited_video_size: false,
            scale_range_up: 64,
            scale_range_down: 1,
            scale_updown_sametime: false,
            osd_scaling: false,
            address_mode: AddressMode::IoVirtual,
            yuv_even_alignment: true,
            crop_min: Extent { w: 4, h: 4 },
            crop_max: Extent { w: 4095, h: 4095 },
            out_min: Extent { w: 4, h: 4 },
            out_max: Extent { w: 4095, h: 4095 },
        };

        match variant {
            ChipVariant::Gen1 => {
                cap.version = 0x00;
                cap.scale_range_up = 256;
            }
            ChipVariant::Gen1VideoQuirk => {
                // IOMMU control registers are unreliable on this stepping,
                // so the part runs on physical addresses only.
                cap.version = 0x01;
                cap.video_need_copy = true;
                cap.limited_video_size = true;
                cap.address_mode = AddressMode::Physical;
            }
            ChipVariant::Gen2BlackLine => {
                cap.version = 0x04;
                cap.video_need_copy = true;
            }
            ChipVariant::Gen2 => {
                cap.version = 0x05;
                cap.max_layers = 2;
                cap.scale_range_up = 256;
            }
            ChipVariant::Gen3 => {
                cap.version = 0x06;
                cap.blend_video_with_osd = true;
                cap.max_layers = 2;
                cap.max_layers_with_video = 2;
                cap.scale_range_up = 256;
            }
            ChipVariant::Unknown => {}
        }

        cap
    }
}
