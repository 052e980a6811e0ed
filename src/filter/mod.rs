//! Filter engine
//!
//! A closed set of deterministic per-pixel transforms over RGBA buffers.
//! The same transform is used for the live preview and for baking final
//! captures, so the two paths cannot drift apart.

/// Available filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    /// Identity, no pixel is touched
    Normal,
    /// Each channel set to the integer mean of R, G, B
    Grayscale,
    /// Luminance-weighted RGB remix
    Sepia,
    /// Saturation boost about the pixel's own mean
    Vivid,
    /// Contrast stretch about mid-gray
    Contrast,
    /// Warm channel bias (hue-shift approximation)
    Warm,
    /// Cool channel bias (hue-shift approximation)
    Cool,
}

impl Default for FilterKind {
    fn default() -> Self {
        Self::Normal
    }
}

impl FilterKind {
    /// All filters in display order.
    pub const ALL: [FilterKind; 7] = [
        FilterKind::Normal,
        FilterKind::Grayscale,
        FilterKind::Sepia,
        FilterKind::Vivid,
        FilterKind::Contrast,
        FilterKind::Warm,
        FilterKind::Cool,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Normal => "Normal",
            FilterKind::Grayscale => "Black & White",
            FilterKind::Sepia => "Sepia",
            FilterKind::Vivid => "Vivid",
            FilterKind::Contrast => "Punch",
            FilterKind::Warm => "Warm",
            FilterKind::Cool => "Cool",
        }
    }
}

/// Saturation factor for [`FilterKind::Vivid`].
const VIVID_FACTOR: f32 = 1.3;
/// Contrast factor for [`FilterKind::Contrast`].
const CONTRAST_FACTOR: f32 = 1.25;
/// Channel bias for the warm/cool hue-shift approximations.
///
/// Not a true hue rotation: a fixed additive push toward red (warm) or
/// blue (cool), which is what the preview effect approximated.
const HUE_BIAS: i16 = 18;

/// Apply `filter` in place to an RGBA8 buffer.
///
/// Alpha is never touched; all channel math clamps to [0, 255].
/// `FilterKind::Normal` is a guaranteed no-op.
pub fn apply_pixel_transform(buffer: &mut [u8], filter: FilterKind) {
    if filter == FilterKind::Normal {
        return;
    }
    for px in buffer.chunks_exact_mut(4) {
        let (r, g, b) = (px[0], px[1], px[2]);
        let (nr, ng, nb) = transform_rgb(r, g, b, filter);
        px[0] = nr;
        px[1] = ng;
        px[2] = nb;
    }
}

/// Transform a single RGB triplet. Exposed for tests and spot checks.
pub fn transform_rgb(r: u8, g: u8, b: u8, filter: FilterKind) -> (u8, u8, u8) {
    match filter {
        FilterKind::Normal => (r, g, b),
        FilterKind::Grayscale => {
            let mean = ((r as u16 + g as u16 + b as u16) / 3) as u8;
            (mean, mean, mean)
        }
        FilterKind::Sepia => {
            let (rf, gf, bf) = (r as f32, g as f32, b as f32);
            let nr = 0.393 * rf + 0.769 * gf + 0.189 * bf;
            let ng = 0.349 * rf + 0.686 * gf + 0.168 * bf;
            let nb = 0.272 * rf + 0.534 * gf + 0.131 * bf;
            (clamp_f32(nr), clamp_f32(ng), clamp_f32(nb))
        }
        FilterKind::Vivid => {
            let mean = (r as f32 + g as f32 + b as f32) / 3.0;
            let sat = |c: u8| clamp_f32(mean + (c as f32 - mean) * VIVID_FACTOR);
            (sat(r), sat(g), sat(b))
        }
        FilterKind::Contrast => {
            let stretch = |c: u8| clamp_f32(128.0 + (c as f32 - 128.0) * CONTRAST_FACTOR);
            (stretch(r), stretch(g), stretch(b))
        }
        FilterKind::Warm => (
            clamp_i16(r as i16 + HUE_BIAS),
            g,
            clamp_i16(b as i16 - HUE_BIAS),
        ),
        FilterKind::Cool => (
            clamp_i16(r as i16 - HUE_BIAS),
            g,
            clamp_i16(b as i16 + HUE_BIAS),
        ),
    }
}

#[inline]
fn clamp_f32(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[inline]
fn clamp_i16(v: i16) -> u8 {
    v.clamp(0, 255) as u8
}
