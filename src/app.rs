//! Kiosk application state
//!
//! Wires the frame source, segmentation engine, compositor and capture
//! controller to the session store. Camera and model lifetimes are scoped
//! to the capture view: entering acquires them, leaving (or the inactivity
//! reset) releases them on every path via ownership and `Drop`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::background::{self, BackgroundCache, BackgroundFill};
use crate::camera::{CameraCapture, CameraError, CameraFacing, Frame, FrameOrigin};
use crate::capture::{
    CaptureController, CaptureError, CaptureEvent, CapturePhase, ShutterDelegate,
};
use crate::compositor::Compositor;
use crate::payment::{self, PaymentGateway, PaymentMethod, PaymentRequest, PrintJob};
use crate::segmentation::{SegmentationEngine, SegmentationMask};
use crate::session::{Action, CapturedPhoto, SessionState, Store, View, INACTIVITY_TIMEOUT};

/// How often the background catalog is re-read from disk.
const CATALOG_REFRESH: Duration = Duration::from_secs(60);

/// Blank-frame size used when the shutter must fall back with no camera
/// frame at hand.
const BLANK_CAPTURE_SIZE: (u32, u32) = (1280, 720);

/// Main application state
pub struct KioskApp {
    /// Single-writer session store
    store: Store,

    // Capture-view resources, acquired on entry and dropped on exit
    camera: Option<CameraCapture>,
    segmentation: Option<SegmentationEngine>,

    /// Terminal camera failure for the current view; persistent banner
    camera_error: Option<CameraError>,
    /// Both segmentation backends failed; visible warning, raw-frame mode
    model_load_failed: bool,

    compositor: Compositor,
    background_cache: BackgroundCache,

    /// Active capture session, if any
    capture: Option<CaptureController>,
    /// Countdown value currently shown, if any
    countdown: Option<u32>,

    gateway: PaymentGateway,

    /// Last composited preview frame, for presentation
    preview: Option<Frame>,
    last_preview_frame: u64,

    catalog_path: std::path::PathBuf,
    last_catalog_refresh: Instant,
}

impl KioskApp {
    pub fn new(now: Instant) -> Self {
        let mut store = Store::new(now);
        let catalog = background::load_catalog(Path::new(background::CATALOG_PATH));
        store.dispatch_at(Action::SetBackgrounds(catalog), now);

        Self {
            store,
            camera: None,
            segmentation: None,
            camera_error: None,
            model_load_failed: false,
            compositor: Compositor::new(),
            background_cache: BackgroundCache::new(),
            capture: None,
            countdown: None,
            gateway: PaymentGateway::new(),
            preview: None,
            last_preview_frame: 0,
            catalog_path: std::path::PathBuf::from(background::CATALOG_PATH),
            last_catalog_refresh: now,
        }
    }

    pub fn state(&self) -> &SessionState {
        self.store.state()
    }

    pub fn dispatch(&mut self, action: Action) {
        self.store.dispatch(action);
    }

    /// Persistent camera failure for the current view, if any.
    pub fn camera_error(&self) -> Option<&CameraError> {
        self.camera_error.as_ref()
    }

    /// True when segmentation is unavailable and the booth is running in
    /// natural-background mode.
    pub fn model_load_failed(&self) -> bool {
        self.model_load_failed
    }

    pub fn countdown(&self) -> Option<u32> {
        self.countdown
    }

    pub fn capture_phase(&self) -> Option<CapturePhase> {
        self.capture.as_ref().map(|c| c.phase())
    }

    /// Latest composited preview frame.
    pub fn preview(&self) -> Option<&Frame> {
        self.preview.as_ref()
    }

    /// Enter the capture view: acquire the camera and the model.
    ///
    /// A camera failure is terminal for the view (persistent banner, no
    /// auto-retry). A model failure is not: the preview degrades to the
    /// raw-frame fast path with a warning.
    pub fn enter_capture_view(&mut self) {
        self.store.dispatch(Action::SetView(View::Capture));
        self.camera_error = None;

        if self.camera.is_none() {
            match CameraCapture::open(CameraFacing::Front) {
                Ok(camera) => {
                    self.camera = Some(camera);
                }
                Err(e) => {
                    log::error!("Camera unavailable: {}", e);
                    self.camera_error = Some(e);
                }
            }
        }

        if self.segmentation.is_none() && !self.model_load_failed {
            match SegmentationEngine::load() {
                Ok(engine) => {
                    log::info!("Segmentation ready ({:?} backend)", engine.backend());
                    self.segmentation = Some(engine);
                }
                Err(e) => {
                    log::warn!("Segmentation unavailable, continuing without: {}", e);
                    self.model_load_failed = true;
                }
            }
        }
    }

    /// Leave the capture view, releasing camera and model.
    pub fn leave_capture_view(&mut self, view: View) {
        self.release_capture_resources();
        self.store.dispatch(Action::SetView(view));
    }

    fn release_capture_resources(&mut self) {
        // Dropping stops the capture thread and the inference loop.
        self.camera = None;
        self.segmentation = None;
        self.capture = None;
        self.countdown = None;
        self.preview = None;
    }

    /// Select a background (or clear it). Clearing also clears the stale
    /// mask so the fast path takes over immediately.
    pub fn select_background(&mut self, background: Option<background::Background>) {
        if background.is_none() {
            if let Some(engine) = &self.segmentation {
                engine.clear_mask();
            }
        }
        self.store.dispatch(Action::SetBackground(background));
    }

    /// Cycle to the next catalog background (wrapping to none).
    pub fn cycle_background(&mut self) {
        let catalog = self.state().available_backgrounds.clone();
        if catalog.is_empty() {
            return;
        }
        let next = match &self.state().selected_background {
            None => Some(catalog[0].clone()),
            Some(current) => {
                let idx = catalog.iter().position(|b| b.id == current.id);
                match idx {
                    Some(i) if i + 1 < catalog.len() => Some(catalog[i + 1].clone()),
                    _ => None,
                }
            }
        };
        self.select_background(next);
    }

    /// Cycle to the next filter.
    pub fn cycle_filter(&mut self) {
        use crate::filter::FilterKind;
        let current = self.state().selected_filter;
        let idx = FilterKind::ALL.iter().position(|f| *f == current).unwrap_or(0);
        let next = FilterKind::ALL[(idx + 1) % FilterKind::ALL.len()];
        self.store.dispatch(Action::SetFilter(next));
    }

    /// Trigger a capture session ("Take Photos").
    ///
    /// Refused while the camera is unavailable: a failed open is terminal
    /// for the view, so there is nothing a countdown could lead to.
    pub fn start_capture_session(&mut self, now: Instant) {
        if self.camera.is_none() {
            log::warn!("Ignoring capture trigger: no camera for this view");
            return;
        }
        if self.capture.as_ref().is_some_and(|c| c.is_active()) {
            return;
        }
        self.store.dispatch(Action::ClearPhotos);
        let mut controller = CaptureController::new(self.state().photos_per_session());
        if let Some(CaptureEvent::CountdownTick(n)) = controller.start(now) {
            self.countdown = Some(n);
        }
        self.capture = Some(controller);
    }

    /// One cooperative tick of the preview and capture loops.
    pub fn tick(&mut self, now: Instant) {
        self.check_inactivity(now);
        self.refresh_catalog(now);

        if self.state().current_view != View::Capture {
            return;
        }

        self.update_preview();
        self.drive_capture(now);
    }

    /// Compose the latest camera frame against the current selection.
    fn update_preview(&mut self) {
        let Some(camera) = &self.camera else { return };
        let Some(frame) = camera.current_frame() else { return };

        if frame.frame_number == self.last_preview_frame && self.preview.is_some() {
            return;
        }
        self.last_preview_frame = frame.frame_number;

        let state = self.store.state();
        let background_selected = state.selected_background.is_some();

        // Feed the segmentation loop only while a virtual background is
        // active; the fast path needs no masks.
        if background_selected {
            if let Some(engine) = &self.segmentation {
                engine.submit(&frame);
            }
        }

        let mask = self
            .segmentation
            .as_ref()
            .and_then(|e| e.latest_mask())
            .filter(|_| background_selected);
        let fill = state.selected_background.as_ref().map(|bg| {
            self.background_cache
                .fill_for(bg, frame.width, frame.height)
        });

        self.preview = Some(self.compositor.compose(
            &frame,
            mask.as_ref(),
            fill.as_deref(),
            state.selected_filter,
        ));
    }

    /// Advance the capture state machine and fold its events into state.
    fn drive_capture(&mut self, now: Instant) {
        let Some(mut controller) = self.capture.take() else { return };

        let events = {
            let state = self.store.state();
            let frame = self.camera.as_ref().and_then(|c| c.current_frame());
            let mask = self
                .segmentation
                .as_ref()
                .and_then(|e| e.latest_mask())
                .filter(|_| state.selected_background.is_some());
            let fill = match (&state.selected_background, &frame) {
                (Some(bg), Some(f)) => {
                    Some(self.background_cache.fill_for(bg, f.width, f.height))
                }
                _ => None,
            };

            let mut shutter = AppShutter {
                compositor: &mut self.compositor,
                frame,
                mask,
                fill,
                filter: state.selected_filter,
            };
            controller.tick(now, &mut shutter)
        };

        for event in events {
            match event {
                CaptureEvent::CountdownTick(n) => {
                    self.countdown = Some(n);
                }
                CaptureEvent::PhotoCaptured {
                    index,
                    photo,
                    fallback_used,
                } => {
                    if fallback_used {
                        log::warn!("Photo {} captured via raw-frame fallback", index + 1);
                    }
                    self.countdown = None;
                    self.store.dispatch(Action::AddPhoto(photo));
                }
                CaptureEvent::SessionComplete => {
                    self.countdown = None;
                    self.leave_capture_view(View::PhotoSelect);
                }
            }
        }

        // SessionComplete released the controller along with the camera.
        if self.camera.is_some() {
            self.capture = Some(controller);
        } else {
            self.countdown = None;
        }
    }

    /// Pay for the session and spool the print job.
    ///
    /// A decline keeps the user on the payment view with price and photos
    /// untouched; success advances to printing.
    pub fn checkout(&mut self, method: PaymentMethod) -> Result<PrintJob, CheckoutError> {
        let state = self.store.state();
        let request = PaymentRequest {
            amount: state.price,
            method,
            description: format!(
                "{:?} x{} prints",
                state.photo_mode, state.print_quantity
            ),
        };
        self.gateway
            .process_payment(&request)
            .map_err(CheckoutError::Payment)?;

        let state = self.store.state();
        let background_name = state
            .selected_background
            .as_ref()
            .map(|b| b.name.clone())
            .unwrap_or_else(|| "Natural".to_string());
        let job = payment::print_photos(
            &state.photos,
            state.print_quantity as usize,
            &background_name,
        )
        .map_err(CheckoutError::Print)?;

        self.store.dispatch(Action::SetView(View::Printing));
        Ok(job)
    }

    fn check_inactivity(&mut self, now: Instant) {
        if self.state().current_view == View::Welcome {
            return;
        }
        if self.store.idle_for(now) >= INACTIVITY_TIMEOUT {
            log::info!("Inactivity timeout, resetting kiosk");
            self.release_capture_resources();
            self.store.dispatch_at(Action::ResetApp, now);
        }
    }

    /// Periodic catalog re-read. A failed read keeps the current catalog
    /// and fill cache untouched.
    fn refresh_catalog(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_catalog_refresh) < CATALOG_REFRESH {
            return;
        }
        self.last_catalog_refresh = now;

        let Some(fresh) = background::read_catalog(&self.catalog_path) else {
            log::warn!("Catalog refresh failed, keeping current catalog");
            return;
        };
        if fresh != self.state().available_backgrounds {
            log::info!("Background catalog changed, {} entries", fresh.len());
            self.background_cache.clear();
            self.store.dispatch_at(Action::SetBackgrounds(fresh), now);
        }
    }
}

/// Checkout failures surfaced to the payment view.
#[derive(Debug)]
pub enum CheckoutError {
    Payment(payment::PaymentError),
    Print(payment::PrintError),
}

impl std::fmt::Display for CheckoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckoutError::Payment(e) => write!(f, "{}", e),
            CheckoutError::Print(e) => write!(f, "{}", e),
        }
    }
}

/// Shutter delegate working over the pieces gathered for one tick.
struct AppShutter<'a> {
    compositor: &'a mut Compositor,
    frame: Option<Frame>,
    mask: Option<SegmentationMask>,
    fill: Option<Arc<BackgroundFill>>,
    filter: crate::filter::FilterKind,
}

impl ShutterDelegate for AppShutter<'_> {
    fn capture_composited(&mut self) -> Result<CapturedPhoto, CaptureError> {
        let frame = self.frame.as_ref().ok_or(CaptureError::NoFrame)?;
        self.compositor.capture_still(
            frame,
            self.mask.as_ref(),
            self.fill.as_deref(),
            self.filter,
        )
    }

    fn capture_raw(&mut self) -> CapturedPhoto {
        let frame = match &self.frame {
            Some(f) => f.clone(),
            None => blank_frame(),
        };
        // Raw path: no mask, no background, no filter.
        match self.compositor.capture_still(&frame, None, None, crate::filter::FilterKind::Normal)
        {
            Ok(photo) => photo,
            Err(e) => {
                // Encoding a plain buffer failing is out of the ordinary;
                // the slot still must not be lost.
                log::error!("Raw capture encode failed ({}), storing empty JPEG", e);
                CapturedPhoto {
                    jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
                    width: frame.width,
                    height: frame.height,
                }
            }
        }
    }
}

fn blank_frame() -> Frame {
    let (width, height) = BLANK_CAPTURE_SIZE;
    Frame {
        data: vec![0; (width * height * 4) as usize],
        width,
        height,
        frame_number: 0,
        timestamp: Instant::now(),
        origin: FrameOrigin::Camera,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterKind;

    #[test]
    fn test_new_app_loads_catalog() {
        let app = KioskApp::new(Instant::now());
        assert!(!app.state().available_backgrounds.is_empty());
        assert_eq!(app.state().current_view, View::Welcome);
    }

    #[test]
    fn test_cycle_filter_wraps() {
        let mut app = KioskApp::new(Instant::now());
        for _ in 0..FilterKind::ALL.len() {
            app.cycle_filter();
        }
        assert_eq!(app.state().selected_filter, FilterKind::Normal);
    }

    #[test]
    fn test_cycle_background_ends_at_none() {
        let mut app = KioskApp::new(Instant::now());
        let n = app.state().available_backgrounds.len();
        for _ in 0..n {
            app.cycle_background();
            assert!(app.state().selected_background.is_some());
        }
        app.cycle_background();
        assert!(app.state().selected_background.is_none());
    }

    #[test]
    fn test_inactivity_resets_outside_welcome() {
        let t0 = Instant::now();
        let mut app = KioskApp::new(t0);
        app.dispatch(Action::SetView(View::Decorate));

        app.tick(t0 + INACTIVITY_TIMEOUT + Duration::from_secs(1));
        assert_eq!(app.state().current_view, View::Welcome);
        assert!(!app.state().available_backgrounds.is_empty());
    }

    #[test]
    fn test_welcome_never_resets() {
        let t0 = Instant::now();
        let mut app = KioskApp::new(t0);
        app.tick(t0 + INACTIVITY_TIMEOUT * 3);
        assert_eq!(app.state().current_view, View::Welcome);
    }

    #[test]
    fn test_failed_refresh_keeps_current_catalog() {
        let dir = std::env::temp_dir().join("photobooth-refresh-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("backgrounds.json");
        let custom = vec![crate::background::Background {
            id: "aurora".to_string(),
            name: "Aurora".to_string(),
            image_path: None,
            fallback_color: "#113355".to_string(),
        }];
        std::fs::write(&path, serde_json::to_string(&custom).unwrap()).unwrap();

        let t0 = Instant::now();
        let mut app = KioskApp::new(t0);
        app.catalog_path = path.clone();

        let t1 = t0 + CATALOG_REFRESH + Duration::from_secs(1);
        app.tick(t1);
        assert_eq!(app.state().available_backgrounds, custom);

        std::fs::write(&path, "{ not json").unwrap();
        let t2 = t1 + CATALOG_REFRESH + Duration::from_secs(1);
        app.tick(t2);
        assert_eq!(app.state().available_backgrounds, custom);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_capture_trigger_refused_without_camera() {
        let t0 = Instant::now();
        let mut app = KioskApp::new(t0);
        app.dispatch(Action::SetView(View::Capture));
        assert!(app.camera.is_none());

        app.start_capture_session(t0);
        assert!(app.capture_phase().is_none());
        assert!(app.countdown().is_none());
    }

    #[test]
    fn test_dropped_controller_clears_countdown() {
        let t0 = Instant::now();
        let mut app = KioskApp::new(t0);
        app.dispatch(Action::SetView(View::Capture));

        // A controller mid-countdown whose camera has since gone away.
        let mut controller = CaptureController::new(1);
        controller.start(t0);
        app.capture = Some(controller);
        app.countdown = Some(3);

        app.tick(t0 + Duration::from_millis(1100));
        assert!(app.capture_phase().is_none());
        assert!(app.countdown().is_none());
    }

    #[test]
    fn test_declined_checkout_preserves_state() {
        let mut app = KioskApp::new(Instant::now());
        app.dispatch(Action::AddPhoto(CapturedPhoto {
            jpeg: vec![0xFF, 0xD8],
            width: 1,
            height: 1,
        }));
        app.dispatch(Action::SetView(View::Payment));
        let price_before = app.state().price;
        app.gateway.decline_next = true;

        let result = app.checkout(PaymentMethod::Card);
        assert!(matches!(result, Err(CheckoutError::Payment(_))));
        assert_eq!(app.state().current_view, View::Payment);
        assert_eq!(app.state().price, price_before);
        assert_eq!(app.state().photos.len(), 1);
    }

    #[test]
    fn test_successful_checkout_advances_to_printing() {
        let mut app = KioskApp::new(Instant::now());
        app.dispatch(Action::AddPhoto(CapturedPhoto {
            jpeg: vec![0xFF, 0xD8],
            width: 1,
            height: 1,
        }));
        app.dispatch(Action::SetView(View::Payment));

        let job = app.checkout(PaymentMethod::Cash).expect("approved");
        assert_eq!(job.copies, 2);
        assert_eq!(app.state().current_view, View::Printing);
    }

    #[test]
    fn test_model_failure_degrades_to_raw_capture() {
        let mut app = KioskApp::new(Instant::now());
        app.model_load_failed = true;

        // The background selection survives; only segmentation is gone.
        let bg = app.state().available_backgrounds[0].clone();
        app.select_background(Some(bg.clone()));
        assert!(app.model_load_failed());
        assert_eq!(
            app.state().selected_background.as_ref().map(|b| b.id.as_str()),
            Some(bg.id.as_str())
        );

        let frame = Frame {
            data: vec![120u8; 4 * 4 * 4],
            width: 4,
            height: 4,
            frame_number: 7,
            timestamp: Instant::now(),
            origin: FrameOrigin::Camera,
        };
        let fill = app.background_cache.fill_for(&bg, frame.width, frame.height);

        // The shutter as a capture tick would assemble it: background fill
        // present, no mask to cut the person out with.
        let mut shutter = AppShutter {
            compositor: &mut app.compositor,
            frame: Some(frame.clone()),
            mask: None,
            fill: Some(fill),
            filter: FilterKind::Normal,
        };
        let photo = shutter.capture_composited().expect("captures without a mask");

        // Without a mask the still is the untouched camera frame.
        let raw = Compositor::new()
            .capture_still(&frame, None, None, FilterKind::Normal)
            .unwrap();
        assert_eq!(photo.jpeg, raw.jpeg);
    }

    #[test]
    fn test_raw_fallback_shutter_is_infallible() {
        let mut compositor = Compositor::new();
        let mut shutter = AppShutter {
            compositor: &mut compositor,
            frame: None,
            mask: None,
            fill: None,
            filter: FilterKind::Normal,
        };
        assert!(matches!(
            shutter.capture_composited(),
            Err(CaptureError::NoFrame)
        ));
        let photo = shutter.capture_raw();
        assert_eq!(photo.width, BLANK_CAPTURE_SIZE.0);
        assert!(!photo.jpeg.is_empty());
    }
}
