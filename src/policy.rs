//! Texture transform policy
//!
//! Pure decision logic: given source dimensions and channel layout, compute
//! the target dimensions and the compression mode to hand to the encoder.
//! No I/O happens here, which is what makes the policy testable in
//! isolation from the pipeline.
//!
//! Block-compressed formats work on 4x4 pixel blocks, so both dimensions
//! are rounded up to the next multiple of 4. Square textures above the
//! configured ceiling are scaled down; non-square textures are never
//! clamped (they are assumed to be intentional, e.g. atlases and strips).

use image::ColorType;

use crate::config::MaxResolution;

/// Dimension above which an alpha-free texture is routed to BC7.
const BC7_THRESHOLD: u32 = 4096;

/// Channel layout of a decoded image, as the encoder cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Single channel, no transparency (grayscale)
    Gray,
    /// Single channel plus alpha
    GrayAlpha,
    /// Three channels, opaque
    Rgb,
    /// Four channels with alpha
    Rgba,
}

impl ChannelLayout {
    /// Map a decoded color type onto the layouts the policy understands.
    ///
    /// Unknown color types are treated as RGBA: assuming alpha picks the
    /// alpha-capable mode, which never discards data.
    pub fn classify(color: ColorType) -> Self {
        match color {
            ColorType::L8 | ColorType::L16 => ChannelLayout::Gray,
            ColorType::La8 | ColorType::La16 => ChannelLayout::GrayAlpha,
            ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => ChannelLayout::Rgb,
            ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => ChannelLayout::Rgba,
            _ => ChannelLayout::Rgba,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, ChannelLayout::GrayAlpha | ChannelLayout::Rgba)
    }

    pub fn is_single_channel(self) -> bool {
        matches!(self, ChannelLayout::Gray | ChannelLayout::GrayAlpha)
    }

    /// Promote single-channel layouts to the multi-channel layout the
    /// encoder operates on: alpha-carrying grayscale becomes RGBA,
    /// plain grayscale becomes RGB.
    pub fn promote(self) -> Self {
        match self {
            ChannelLayout::Gray => ChannelLayout::Rgb,
            ChannelLayout::GrayAlpha => ChannelLayout::Rgba,
            other => other,
        }
    }
}

/// Compression sub-format passed to nvcompress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// Opaque / 1-bit alpha, smallest output
    Bc1,
    /// Interpolated alpha
    Bc3,
    /// High quality, reserved for oversized alpha-free textures
    Bc7,
}

impl CompressionMode {
    /// The nvcompress command-line flag for this mode.
    pub fn flag(self) -> &'static str {
        match self {
            CompressionMode::Bc1 => "-bc1",
            CompressionMode::Bc3 => "-bc3",
            CompressionMode::Bc7 => "-bc7",
        }
    }
}

/// Outcome of the transform policy. Derived per conversion, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformDecision {
    /// Target width, 4-aligned, possibly clamped
    pub width: u32,
    /// Target height, 4-aligned or proportionally scaled
    pub height: u32,
    /// Channel layout after single-channel promotion
    pub layout: ChannelLayout,
    /// Selected compression mode
    pub mode: CompressionMode,
}

/// Round up to the next multiple of 4.
fn align4(n: u32) -> u32 {
    n.div_ceil(4) * 4
}

/// Compute target dimensions and compression mode for one source image.
///
/// Squareness is judged on the original dimensions, the clamp on the
/// 4-aligned ones. The proportional height truncates toward zero, so a
/// clamped square may come out one unit shy of perfectly square.
/// Callers guarantee `width` and `height` are positive.
pub fn plan_transform(
    width: u32,
    height: u32,
    layout: ChannelLayout,
    max_resolution: MaxResolution,
) -> TransformDecision {
    let mut target_w = align4(width);
    let mut target_h = align4(height);

    let max = max_resolution.pixels();
    if width == height && target_w > max {
        target_h = (target_h as u64 * max as u64 / target_w as u64) as u32;
        target_w = max;
    }

    let layout = layout.promote();

    let mode = if !layout.has_alpha() && (target_w > BC7_THRESHOLD || target_h > BC7_THRESHOLD) {
        CompressionMode::Bc7
    } else if layout.is_single_channel() {
        CompressionMode::Bc1
    } else if layout.has_alpha() {
        CompressionMode::Bc3
    } else {
        CompressionMode::Bc1
    };

    TransformDecision {
        width: target_w,
        height: target_h,
        layout,
        mode,
    }
}
