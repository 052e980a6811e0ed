//! Frame compositor
//!
//! Merges a camera frame, the latest segmentation mask, a background fill
//! and a filter into one output frame. All work is CPU pixel math over a
//! reusable scratch buffer sized to the source frame; each tick overwrites
//! it, so no buffer is ever shared across ticks.
//!
//! When no background is selected, or no usable mask is available, the raw
//! frame is passed through untouched (apart from the filter). That fast
//! path skips segmentation cost entirely and is also the degraded mode when
//! the model failed to load.

use crate::background::BackgroundFill;
use crate::camera::{Frame, FrameOrigin};
use crate::capture::CaptureError;
use crate::filter::{self, FilterKind};
use crate::segmentation::SegmentationMask;
use crate::session::CapturedPhoto;

/// JPEG quality for captured photos. A tunable, not a contract.
pub const CAPTURE_JPEG_QUALITY: u8 = 90;

/// Software compositor with a reusable working buffer.
#[derive(Default)]
pub struct Compositor {
    scratch: Vec<u8>,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose one frame into the internal buffer and borrow the result.
    ///
    /// Output dimensions always equal the input frame's; every output pixel
    /// is fully opaque. A mask whose dimensions do not match the frame is
    /// treated as absent.
    pub fn compose_into(
        &mut self,
        frame: &Frame,
        mask: Option<&SegmentationMask>,
        background: Option<&BackgroundFill>,
        filter: FilterKind,
    ) -> &[u8] {
        let len = (frame.width * frame.height * 4) as usize;
        self.scratch.resize(len, 0);

        let usable_mask = mask.filter(|m| m.matches(frame.width, frame.height));

        match (background, usable_mask) {
            (Some(bg), Some(mask)) => {
                Self::fill_background(&mut self.scratch, bg, frame.width, frame.height);
                // Foreground pixels keep the live camera RGB, forced opaque.
                for (idx, px) in self.scratch.chunks_exact_mut(4).enumerate() {
                    if mask.data[idx] != 0 {
                        let src = idx * 4;
                        px[0] = frame.data[src];
                        px[1] = frame.data[src + 1];
                        px[2] = frame.data[src + 2];
                    }
                    px[3] = 255;
                }
            }
            // Fast path: no virtual background (or no usable mask) means a
            // straight copy, no segmentation work.
            _ => {
                self.scratch.copy_from_slice(&frame.data[..len]);
                for px in self.scratch.chunks_exact_mut(4) {
                    px[3] = 255;
                }
            }
        }

        filter::apply_pixel_transform(&mut self.scratch, filter);
        &self.scratch
    }

    /// Compose and return an owned frame tagged as composited.
    pub fn compose(
        &mut self,
        frame: &Frame,
        mask: Option<&SegmentationMask>,
        background: Option<&BackgroundFill>,
        filter: FilterKind,
    ) -> Frame {
        let data = self.compose_into(frame, mask, background, filter).to_vec();
        Frame {
            data,
            width: frame.width,
            height: frame.height,
            frame_number: frame.frame_number,
            timestamp: frame.timestamp,
            origin: FrameOrigin::Composited,
        }
    }

    /// Bake a final capture: exact pixel transform, then JPEG encode.
    ///
    /// Captures are not held to the preview frame budget; completion gates
    /// the countdown state machine instead.
    pub fn capture_still(
        &mut self,
        frame: &Frame,
        mask: Option<&SegmentationMask>,
        background: Option<&BackgroundFill>,
        filter: FilterKind,
    ) -> Result<CapturedPhoto, CaptureError> {
        let composed = self.compose(frame, mask, background, filter);
        encode_jpeg(&composed)
    }

    fn fill_background(scratch: &mut [u8], background: &BackgroundFill, width: u32, height: u32) {
        match background {
            BackgroundFill::Image { data, width: bw, height: bh } => {
                if *bw == width && *bh == height && data.len() >= scratch.len() {
                    scratch.copy_from_slice(&data[..scratch.len()]);
                } else {
                    // Cache handed us a wrong-sized fill; never leave
                    // unfilled pixels.
                    log::warn!(
                        "Background fill is {}x{}, frame is {}x{}; filling gray",
                        bw,
                        bh,
                        width,
                        height
                    );
                    fill_color(scratch, [0x80, 0x80, 0x80]);
                }
            }
            BackgroundFill::Color(rgb) => fill_color(scratch, *rgb),
        }
    }
}

fn fill_color(scratch: &mut [u8], rgb: [u8; 3]) {
    for px in scratch.chunks_exact_mut(4) {
        px[0] = rgb[0];
        px[1] = rgb[1];
        px[2] = rgb[2];
        px[3] = 255;
    }
}

/// Encode a composed frame as JPEG (RGBA flattened to RGB).
pub fn encode_jpeg(frame: &Frame) -> Result<CapturedPhoto, CaptureError> {
    let rgb: Vec<u8> = frame
        .data
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();

    let mut encoded = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
        &mut encoded,
        CAPTURE_JPEG_QUALITY,
    );
    image::ImageEncoder::write_image(
        encoder,
        &rgb,
        frame.width,
        frame.height,
        image::ExtendedColorType::Rgb8,
    )
    .map_err(|e| CaptureError::Encode(e.to_string()))?;

    Ok(CapturedPhoto {
        jpeg: encoded,
        width: frame.width,
        height: frame.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = (0..width * height)
            .flat_map(|_| [rgb[0], rgb[1], rgb[2], 255])
            .collect();
        Frame {
            data,
            width,
            height,
            frame_number: 1,
            timestamp: Instant::now(),
            origin: FrameOrigin::Camera,
        }
    }

    fn mask(width: u32, height: u32, data: Vec<u8>) -> SegmentationMask {
        SegmentationMask {
            width,
            height,
            data,
            frame_number: 1,
        }
    }

    #[test]
    fn test_output_dimensions_and_opacity() {
        let f = frame(4, 3, [10, 20, 30]);
        let m = mask(4, 3, vec![1; 12]);
        let bg = BackgroundFill::Color([200, 0, 0]);
        let mut comp = Compositor::new();

        let out = comp.compose(&f, Some(&m), Some(&bg), FilterKind::Normal);
        assert_eq!(out.width, 4);
        assert_eq!(out.height, 3);
        assert_eq!(out.origin, FrameOrigin::Composited);
        for px in out.data.chunks_exact(4) {
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn test_no_mask_equals_raw_frame() {
        let f = frame(3, 3, [7, 40, 99]);
        let bg = BackgroundFill::Color([255, 0, 0]);
        let mut comp = Compositor::new();

        let out = comp.compose_into(&f, None, Some(&bg), FilterKind::Normal);
        assert_eq!(out, &f.data[..]);
    }

    #[test]
    fn test_no_background_equals_raw_frame() {
        let f = frame(3, 2, [1, 2, 3]);
        let m = mask(3, 2, vec![1; 6]);
        let mut comp = Compositor::new();

        let out = comp.compose_into(&f, Some(&m), None, FilterKind::Normal);
        assert_eq!(out, &f.data[..]);
    }

    #[test]
    fn test_mismatched_mask_treated_as_absent() {
        let f = frame(4, 4, [9, 9, 9]);
        let wrong = mask(2, 2, vec![1; 4]);
        let bg = BackgroundFill::Color([0, 255, 0]);
        let mut comp = Compositor::new();

        let out = comp.compose_into(&f, Some(&wrong), Some(&bg), FilterKind::Normal);
        assert_eq!(out, &f.data[..]);
    }

    #[test]
    fn test_background_replaces_masked_out_pixels() {
        let f = frame(2, 1, [10, 20, 30]);
        // Left pixel foreground, right pixel background
        let m = mask(2, 1, vec![1, 0]);
        let bg = BackgroundFill::Color([200, 100, 50]);
        let mut comp = Compositor::new();

        let out = comp.compose_into(&f, Some(&m), Some(&bg), FilterKind::Normal);
        assert_eq!(&out[0..4], &[10, 20, 30, 255]);
        assert_eq!(&out[4..8], &[200, 100, 50, 255]);
    }

    #[test]
    fn test_image_fill_used_when_sized_right() {
        let f = frame(2, 1, [0, 0, 0]);
        let m = mask(2, 1, vec![0, 0]);
        let bg = BackgroundFill::Image {
            data: vec![1, 2, 3, 255, 4, 5, 6, 255],
            width: 2,
            height: 1,
        };
        let mut comp = Compositor::new();

        let out = comp.compose_into(&f, Some(&m), Some(&bg), FilterKind::Normal);
        assert_eq!(&out[0..4], &[1, 2, 3, 255]);
        assert_eq!(&out[4..8], &[4, 5, 6, 255]);
    }

    #[test]
    fn test_filter_applied_after_composition() {
        let f = frame(1, 1, [200, 100, 50]);
        let mut comp = Compositor::new();

        let out = comp.compose_into(&f, None, None, FilterKind::Grayscale);
        assert_eq!(&out[0..4], &[116, 116, 116, 255]);
    }

    #[test]
    fn test_capture_still_produces_jpeg() {
        let f = frame(8, 8, [120, 60, 200]);
        let mut comp = Compositor::new();

        let photo = comp
            .capture_still(&f, None, None, FilterKind::Sepia)
            .expect("encode");
        assert_eq!(photo.width, 8);
        assert_eq!(photo.height, 8);
        // JPEG SOI marker
        assert_eq!(&photo.jpeg[0..2], &[0xFF, 0xD8]);
    }
}
