//! Person segmentation engine
//!
//! Runs a selfie-segmentation ONNX model on a dedicated worker thread.
//! Frames are submitted without blocking over a bounded channel; the latest
//! completed mask is polled from behind a mutex, so the render loop never
//! waits on inference. Masks may lag the displayed frame by a tick or more;
//! that staleness is bounded by the latest-available policy, not eliminated.
//!
//! Loading tries an accelerated execution provider first and falls back
//! once to a plain CPU session with reduced settings. Both failing is
//! non-fatal for the caller: compositing degrades to the raw-frame path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Once;

use crossbeam_channel::{Receiver, Sender};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use parking_lot::Mutex;
use thiserror::Error;

use crate::camera::Frame;

/// Both load attempts failed. Non-fatal: the booth keeps running with the
/// natural background and a visible warning.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("segmentation model not found at {0:?}")]
    NotFound(PathBuf),
    #[error("failed to initialize ONNX Runtime: {0}")]
    Init(String),
    #[error("all inference backends failed (accelerated: {primary}; cpu: {fallback})")]
    Backend { primary: String, fallback: String },
    #[error("failed to spawn inference thread: {0}")]
    Thread(String),
}

/// A single frame failed to segment. Recovered locally: the last good mask
/// stays in place and nothing is surfaced per-occurrence.
#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("failed to build input tensor: {0}")]
    Input(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    Output(String),
}

/// Which backend the engine ended up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentationBackend {
    /// Platform execution provider (CoreML / DirectML / CUDA)
    Accelerated,
    /// CPU fallback with reduced quality settings
    Cpu,
}

/// Per-pixel foreground classification at the resolution of the frame it
/// was computed from. `1` = person, `0` = background.
#[derive(Clone)]
pub struct SegmentationMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Frame number this mask was computed from
    pub frame_number: u64,
}

impl SegmentationMask {
    /// Whether this mask can be applied to a frame of the given size.
    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height && self.data.len() == (width * height) as usize
    }

    #[inline]
    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.data
            .get((y * self.width + x) as usize)
            .map(|&v| v != 0)
            .unwrap_or(false)
    }
}

/// Inference input side for the accelerated backend.
const SEG_INPUT_FULL: u32 = 256;
/// Reduced inference input side for the CPU fallback.
const SEG_INPUT_REDUCED: u32 = 128;
/// Foreground threshold on the model's [0,1] output.
const FOREGROUND_THRESHOLD: f32 = 0.5;

static ORT_INIT: Once = Once::new();

/// Frame data queued for inference.
struct FrameJob {
    data: Vec<u8>,
    width: u32,
    height: u32,
    frame_number: u64,
}

/// Person segmentation engine with a worker thread owning the session.
pub struct SegmentationEngine {
    /// Latest completed mask, at source-frame resolution
    latest_mask: Arc<Mutex<Option<SegmentationMask>>>,
    /// Channel to the inference thread; dropping it stops the worker
    frame_sender: Option<Sender<FrameJob>>,
    /// Liveness flag checked at each loop iteration
    running: Arc<AtomicBool>,
    /// Inference thread handle
    thread_handle: Option<std::thread::JoinHandle<()>>,
    backend: SegmentationBackend,
}

impl SegmentationEngine {
    /// Load the model from the default search path and start the worker.
    pub fn load() -> Result<Self, ModelLoadError> {
        let model_path = Self::find_model()?;
        Self::load_from(&model_path)
    }

    /// Load the model from an explicit path and start the worker.
    pub fn load_from(model_path: &std::path::Path) -> Result<Self, ModelLoadError> {
        if !model_path.exists() {
            return Err(ModelLoadError::NotFound(model_path.to_path_buf()));
        }

        let mut init_err = None;
        ORT_INIT.call_once(|| {
            if let Err(e) = ort::init().with_name("photobooth").commit() {
                init_err = Some(e.to_string());
            }
        });
        if let Some(e) = init_err {
            return Err(ModelLoadError::Init(e));
        }

        // Primary: accelerated execution provider. Fallback: CPU session
        // with one intra-op thread, basic graph optimization and a smaller
        // inference input.
        let (session, backend, input_side) = match Self::build_accelerated(model_path) {
            Ok(s) => (s, SegmentationBackend::Accelerated, SEG_INPUT_FULL),
            Err(primary) => {
                log::warn!(
                    "Accelerated inference backend failed ({}), falling back to CPU",
                    primary
                );
                match Self::build_cpu(model_path) {
                    Ok(s) => (s, SegmentationBackend::Cpu, SEG_INPUT_REDUCED),
                    Err(fallback) => {
                        return Err(ModelLoadError::Backend { primary, fallback })
                    }
                }
            }
        };

        log::info!(
            "Segmentation model loaded from {:?} ({:?} backend, {}x{} input)",
            model_path,
            backend,
            input_side,
            input_side
        );

        let latest_mask = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let (frame_sender, frame_receiver) = crossbeam_channel::bounded::<FrameJob>(2);

        let latest_mask_clone = latest_mask.clone();
        let running_clone = running.clone();

        let thread_handle = std::thread::Builder::new()
            .name("segmentation".to_string())
            .spawn(move || {
                Self::inference_thread(
                    session,
                    input_side,
                    frame_receiver,
                    latest_mask_clone,
                    running_clone,
                );
            })
            .map_err(|e| ModelLoadError::Thread(e.to_string()))?;

        Ok(Self {
            latest_mask,
            frame_sender: Some(frame_sender),
            running,
            thread_handle: Some(thread_handle),
            backend,
        })
    }

    fn build_accelerated(model_path: &std::path::Path) -> Result<Session, String> {
        #[cfg(target_os = "macos")]
        let provider = ort::execution_providers::CoreMLExecutionProvider::default()
            .build()
            .error_on_failure();
        #[cfg(target_os = "windows")]
        let provider = ort::execution_providers::DirectMLExecutionProvider::default()
            .build()
            .error_on_failure();
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let provider = ort::execution_providers::CUDAExecutionProvider::default()
            .build()
            .error_on_failure();

        Session::builder()
            .map_err(|e| e.to_string())?
            .with_execution_providers([provider])
            .map_err(|e| e.to_string())?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| e.to_string())?
            .with_intra_threads(2)
            .map_err(|e| e.to_string())?
            .commit_from_file(model_path)
            .map_err(|e| e.to_string())
    }

    fn build_cpu(model_path: &std::path::Path) -> Result<Session, String> {
        Session::builder()
            .map_err(|e| e.to_string())?
            .with_optimization_level(GraphOptimizationLevel::Level1)
            .map_err(|e| e.to_string())?
            .with_intra_threads(1)
            .map_err(|e| e.to_string())?
            .commit_from_file(model_path)
            .map_err(|e| e.to_string())
    }

    /// Locate `selfie_segmentation.onnx` near the executable or cwd.
    fn find_model() -> Result<PathBuf, ModelLoadError> {
        const MODEL_FILE: &str = "selfie_segmentation.onnx";

        let mut candidates = Vec::new();
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(parent) = exe_path.parent() {
                candidates.push(parent.join("models").join(MODEL_FILE));
            }
        }
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join("models").join(MODEL_FILE));
            candidates.push(cwd.join("assets").join("models").join(MODEL_FILE));
        }

        for candidate in &candidates {
            if candidate.exists() {
                return Ok(candidate.clone());
            }
        }
        Err(ModelLoadError::NotFound(
            candidates.pop().unwrap_or_else(|| PathBuf::from(MODEL_FILE)),
        ))
    }

    /// Inference thread main loop
    fn inference_thread(
        mut session: Session,
        input_side: u32,
        frame_receiver: Receiver<FrameJob>,
        latest_mask: Arc<Mutex<Option<SegmentationMask>>>,
        running: Arc<AtomicBool>,
    ) {
        log::info!("Segmentation thread started");

        while running.load(Ordering::Acquire) {
            let job = match frame_receiver.recv() {
                Ok(job) => job,
                // Sender dropped: engine torn down
                Err(_) => break,
            };

            match Self::run_segmentation(&mut session, input_side, &job) {
                Ok(mask) => {
                    *latest_mask.lock() = Some(mask);
                }
                Err(e) => {
                    // Keep the last good mask; one bad frame must not
                    // flicker the preview.
                    log::warn!("Segmentation error: {}", e);
                }
            }
        }

        log::info!("Segmentation thread stopped");
    }

    /// Run one inference and upscale the thresholded mask to frame size.
    fn run_segmentation(
        session: &mut Session,
        input_side: u32,
        job: &FrameJob,
    ) -> Result<SegmentationMask, SegmentationError> {
        let input = Self::preprocess_nhwc(job, input_side, input_side);

        // NHWC (1, H, W, 3), normalized [0,1] RGB
        let input_array = Array4::from_shape_vec(
            (1, input_side as usize, input_side as usize, 3),
            input,
        )
        .map_err(|e| SegmentationError::Input(e.to_string()))?;

        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| SegmentationError::Input(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![input_tensor].map_err(|e| SegmentationError::Input(e.to_string()))?)
            .map_err(|e| SegmentationError::Inference(e.to_string()))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| SegmentationError::Output("no output tensor".to_string()))?;

        let (_shape, data) = output
            .1
            .try_extract_raw_tensor::<f32>()
            .map_err(|e| SegmentationError::Output(e.to_string()))?;

        let expected = (input_side * input_side) as usize;
        if data.len() < expected {
            return Err(SegmentationError::Output(format!(
                "mask has {} values, expected {}",
                data.len(),
                expected
            )));
        }

        let small: Vec<u8> = data[..expected]
            .iter()
            .map(|&v| u8::from(v >= FOREGROUND_THRESHOLD))
            .collect();

        Ok(SegmentationMask {
            data: upscale_nearest(&small, input_side, input_side, job.width, job.height),
            width: job.width,
            height: job.height,
            frame_number: job.frame_number,
        })
    }

    /// Resize to model input and convert to NHWC float RGB in [0,1].
    fn preprocess_nhwc(job: &FrameJob, target_width: u32, target_height: u32) -> Vec<f32> {
        let mut output = vec![0.0f32; (target_width * target_height * 3) as usize];

        let x_ratio = job.width as f32 / target_width as f32;
        let y_ratio = job.height as f32 / target_height as f32;

        for y in 0..target_height {
            for x in 0..target_width {
                let src_x = (x as f32 * x_ratio) as u32;
                let src_y = (y as f32 * y_ratio) as u32;
                let src_idx = ((src_y * job.width + src_x) * 4) as usize;

                if src_idx + 2 < job.data.len() {
                    let out_idx = ((y * target_width + x) * 3) as usize;
                    output[out_idx] = job.data[src_idx] as f32 / 255.0;
                    output[out_idx + 1] = job.data[src_idx + 1] as f32 / 255.0;
                    output[out_idx + 2] = job.data[src_idx + 2] as f32 / 255.0;
                }
            }
        }

        output
    }

    /// Submit a frame for segmentation (non-blocking).
    ///
    /// Dropped silently when the worker is behind; the preview keeps using
    /// the latest completed mask.
    pub fn submit(&self, frame: &Frame) {
        if let Some(ref sender) = self.frame_sender {
            let _ = sender.try_send(FrameJob {
                data: frame.data.clone(),
                width: frame.width,
                height: frame.height,
                frame_number: frame.frame_number,
            });
        }
    }

    /// Latest completed mask, if any.
    pub fn latest_mask(&self) -> Option<SegmentationMask> {
        self.latest_mask.lock().clone()
    }

    /// Which backend the engine loaded on.
    pub fn backend(&self) -> SegmentationBackend {
        self.backend
    }

    /// Discard the current mask (e.g. when the background is cleared).
    pub fn clear_mask(&self) {
        *self.latest_mask.lock() = None;
    }

    /// Stop the worker, cancelling in-flight submissions.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        // Closing the channel wakes the blocked recv.
        self.frame_sender = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SegmentationEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Nearest-neighbor upscale of a 0/1 byte mask.
fn upscale_nearest(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
    if sw == dw && sh == dh {
        return src.to_vec();
    }
    let mut out = vec![0u8; (dw * dh) as usize];
    let x_ratio = sw as f32 / dw as f32;
    let y_ratio = sh as f32 / dh as f32;
    for y in 0..dh {
        let sy = ((y as f32 * y_ratio) as u32).min(sh - 1);
        for x in 0..dw {
            let sx = ((x as f32 * x_ratio) as u32).min(sw - 1);
            out[(y * dw + x) as usize] = src[(sy * sw + sx) as usize];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_matches_dimensions() {
        let mask = SegmentationMask {
            width: 4,
            height: 2,
            data: vec![1; 8],
            frame_number: 0,
        };
        assert!(mask.matches(4, 2));
        assert!(!mask.matches(2, 4));
        assert!(!mask.matches(4, 3));
    }

    #[test]
    fn test_mask_foreground_lookup() {
        let mask = SegmentationMask {
            width: 2,
            height: 2,
            data: vec![1, 0, 0, 1],
            frame_number: 0,
        };
        assert!(mask.is_foreground(0, 0));
        assert!(!mask.is_foreground(1, 0));
        assert!(mask.is_foreground(1, 1));
        // Out of bounds reads as background
        assert!(!mask.is_foreground(5, 5));
    }

    #[test]
    fn test_upscale_nearest_doubles() {
        // 2x2 checkerboard to 4x4: each source pixel becomes a 2x2 block
        let src = vec![1, 0, 0, 1];
        let out = upscale_nearest(&src, 2, 2, 4, 4);
        assert_eq!(
            out,
            vec![
                1, 1, 0, 0, //
                1, 1, 0, 0, //
                0, 0, 1, 1, //
                0, 0, 1, 1,
            ]
        );
    }

    #[test]
    fn test_upscale_identity_when_same_size() {
        let src = vec![0, 1, 1, 0];
        assert_eq!(upscale_nearest(&src, 2, 2, 2, 2), src);
    }

    #[test]
    fn test_missing_model_is_not_found() {
        let result = SegmentationEngine::load_from(std::path::Path::new(
            "/nonexistent/selfie_segmentation.onnx",
        ));
        assert!(matches!(result, Err(ModelLoadError::NotFound(_))));
    }
}
