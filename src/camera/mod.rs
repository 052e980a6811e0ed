//! Camera frame source
//!
//! Cross-platform camera capture using the nokhwa crate. Frames are decoded
//! to RGBA on a dedicated capture thread; readers poll the latest complete
//! frame through a triple buffer. Opening resolves a facing preference
//! against the enumerated devices and retries once with the default device
//! before giving up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex;
use thiserror::Error;

/// Errors opening or enumerating cameras. Terminal for the view that asked:
/// the caller surfaces a persistent message and does not auto-retry.
#[derive(Error, Debug, Clone)]
pub enum CameraError {
    #[error("no camera device available")]
    NoDevice,
    #[error("failed to open camera: {0}")]
    Open(String),
    #[error("failed to start camera stream: {0}")]
    Stream(String),
    #[error("camera capture thread failed to start: {0}")]
    Thread(String),
}

/// Which camera the kiosk prefers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraFacing {
    /// User-facing camera (the kiosk default)
    Front,
    /// Rear camera
    Back,
    /// No preference
    Any,
}

/// Where a frame came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Raw camera output
    Camera,
    /// Output of the compositor
    Composited,
}

/// An immutable RGBA snapshot.
#[derive(Clone)]
pub struct Frame {
    /// RGBA pixel data, row-major
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Monotonic frame number
    pub frame_number: u64,
    /// Capture timestamp
    pub timestamp: Instant,
    /// Source tag
    pub origin: FrameOrigin,
}

/// How long `open` waits for the capture thread to report its first result.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Live camera stream with latest-frame polling.
///
/// Dropping (or calling [`CameraCapture::close`]) stops the capture thread
/// and releases the underlying device on every exit path.
pub struct CameraCapture {
    /// Triple-buffered latest frames
    frames: [Arc<Mutex<Option<Frame>>>; 3],
    /// Index of the latest complete frame
    latest_frame_idx: Arc<AtomicU64>,
    /// Liveness flag checked by the capture loop each iteration
    running: Arc<AtomicBool>,
    /// Capture thread handle
    thread_handle: Option<std::thread::JoinHandle<()>>,
    /// Frame counter
    frame_count: Arc<AtomicU64>,
}

impl CameraCapture {
    /// Open a camera stream with the given facing preference.
    ///
    /// The device is opened on the capture thread; the initial result is
    /// reported back synchronously. If the preferred device fails, one
    /// retry with the default device ("any camera") is attempted before
    /// this returns [`CameraError`].
    pub fn open(facing: CameraFacing) -> Result<Self, CameraError> {
        if let Ok(list) = nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            if list.is_empty() {
                return Err(CameraError::NoDevice);
            }
        }
        let preferred = Self::resolve_facing(facing);

        let frames: [Arc<Mutex<Option<Frame>>>; 3] = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let latest_frame_idx = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));

        // The open result is handed back over a one-shot channel so the
        // caller learns about failures instead of reading them from logs.
        let (result_tx, result_rx) = crossbeam_channel::bounded::<Result<(), CameraError>>(1);

        let frames_clone = frames.clone();
        let latest_frame_idx_clone = latest_frame_idx.clone();
        let running_clone = running.clone();
        let frame_count_clone = frame_count.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(
                    preferred,
                    result_tx,
                    frames_clone,
                    latest_frame_idx_clone,
                    running_clone,
                    frame_count_clone,
                );
            })
            .map_err(|e| CameraError::Thread(e.to_string()))?;

        let mut capture = Self {
            frames,
            latest_frame_idx,
            running,
            thread_handle: Some(thread_handle),
            frame_count,
        };

        match result_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(capture),
            Ok(Err(e)) => {
                capture.close();
                Err(e)
            }
            Err(_) => {
                capture.close();
                Err(CameraError::Open("timed out waiting for camera".to_string()))
            }
        }
    }

    /// Map a facing preference to a device index by enumeration.
    /// Falls back to the default device when nothing matches.
    fn resolve_facing(facing: CameraFacing) -> u32 {
        if facing == CameraFacing::Any {
            return 0;
        }
        let needles: &[&str] = match facing {
            CameraFacing::Front => &["front", "user", "facetime", "integrated"],
            CameraFacing::Back => &["back", "rear", "environment"],
            CameraFacing::Any => &[],
        };

        match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            Ok(list) => {
                for (idx, info) in list.iter().enumerate() {
                    let name = info.human_name().to_lowercase();
                    if needles.iter().any(|n| name.contains(n)) {
                        log::info!("Facing {:?} resolved to camera {} ({})", facing, idx, name);
                        return idx as u32;
                    }
                }
                0
            }
            Err(e) => {
                log::warn!("Failed to enumerate cameras: {:?}", e);
                0
            }
        }
    }

    /// Try to open one device, stepping down through requested formats.
    fn open_device(index: u32) -> Result<Camera, CameraError> {
        let index = CameraIndex::Index(index);

        let requested =
            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
        match Camera::new(index.clone(), requested) {
            Ok(c) => return Ok(c),
            Err(e) => {
                log::warn!("Failed to open camera at highest resolution: {:?}", e);
            }
        }

        // Last resort: let the backend pick the format.
        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None);
        Camera::new(index, requested).map_err(|e| CameraError::Open(e.to_string()))
    }

    /// Camera capture thread
    fn capture_thread(
        preferred_index: u32,
        result_tx: crossbeam_channel::Sender<Result<(), CameraError>>,
        frames: [Arc<Mutex<Option<Frame>>>; 3],
        latest_frame_idx: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        frame_count: Arc<AtomicU64>,
    ) {
        log::info!("Starting camera capture thread (camera {})", preferred_index);

        let mut camera = match Self::open_device(preferred_index) {
            Ok(c) => c,
            Err(first_err) if preferred_index != 0 => {
                // One retry with the default device before giving up.
                log::warn!("Preferred camera failed ({}), retrying any camera", first_err);
                match Self::open_device(0) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = result_tx.send(Err(e));
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = result_tx.send(Err(e));
                return;
            }
        };

        if let Err(e) = camera.open_stream() {
            let _ = result_tx.send(Err(CameraError::Stream(e.to_string())));
            return;
        }

        log::info!(
            "Camera opened: {} ({}x{})",
            camera.info().human_name(),
            camera.resolution().width(),
            camera.resolution().height()
        );
        let _ = result_tx.send(Ok(()));

        let mut write_idx: u64 = 0;

        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(raw) => match raw.decode_image::<RgbAFormat>() {
                    Ok(image) => {
                        let frame_num = frame_count.fetch_add(1, Ordering::Relaxed);
                        let frame = Frame {
                            width: raw.resolution().width(),
                            height: raw.resolution().height(),
                            data: image.into_raw(),
                            frame_number: frame_num,
                            timestamp: Instant::now(),
                            origin: FrameOrigin::Camera,
                        };

                        let slot = (write_idx % 3) as usize;
                        *frames[slot].lock() = Some(frame);

                        latest_frame_idx.store(write_idx, Ordering::Release);
                        write_idx = write_idx.wrapping_add(1);
                    }
                    Err(e) => {
                        log::warn!("Failed to decode frame: {:?}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }

        // Stops all media tracks before the device handle drops.
        if let Err(e) = camera.stop_stream() {
            log::warn!("Failed to stop camera stream: {:?}", e);
        }
        log::info!("Camera capture thread stopped");
    }

    /// Get the latest captured frame
    pub fn current_frame(&self) -> Option<Frame> {
        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        self.frames[slot].lock().clone()
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stop capturing and release the device.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.close();
    }
}
