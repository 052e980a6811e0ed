//! Capture session state machine
//!
//! Drives countdown -> shutter -> hold -> next shot (or complete) on wall
//! clock deadlines. Each call to [`CaptureController::tick`] advances past
//! any deadlines that have elapsed, so a lagging caller cannot stall the
//! session or double-fire a shutter.
//!
//! The shutter itself goes through a [`ShutterDelegate`]: one retry on a
//! failed composite capture, then the raw camera frame. The raw path is
//! infallible, so a completed session always holds exactly
//! `photos_per_session` photos.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::session::CapturedPhoto;

/// A final-shot composite or encode failure. Retried once; never loses the
/// photo slot.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no camera frame available")]
    NoFrame,
    #[error("failed to encode photo: {0}")]
    Encode(String),
}

/// Countdown start value shown to the user.
pub const COUNTDOWN_START: u32 = 3;
/// Countdown decrement interval.
pub const COUNTDOWN_TICK: Duration = Duration::from_millis(1000);
/// How long the "Smile!" shutter feedback stays up.
pub const SHUTTER_DISPLAY: Duration = Duration::from_millis(600);
/// Pause between shots with no countdown shown.
pub const HOLD_BETWEEN_SHOTS: Duration = Duration::from_millis(900);

/// Performs the actual captures on behalf of the controller.
pub trait ShutterDelegate {
    /// Bake a final frame: exact filter transform, current background and
    /// segmentation state.
    fn capture_composited(&mut self) -> Result<CapturedPhoto, CaptureError>;

    /// Uncomposited raw-frame fallback. Infallible: implementations must
    /// always produce an image (the last camera frame, or a blank one if
    /// the camera produced nothing at all).
    fn capture_raw(&mut self) -> CapturedPhoto;
}

/// Current phase of the capture session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapturePhase {
    /// Waiting for a trigger
    Idle,
    /// Counting down to the next shot
    Counting { remaining: u32 },
    /// Shot just taken, feedback window showing
    Shutter,
    /// Brief pause between shots
    Holding,
    /// All shots taken; terminal for this controller
    Complete,
}

/// What happened during a tick, for the app layer to act on.
pub enum CaptureEvent {
    /// Countdown now shows this value
    CountdownTick(u32),
    /// A photo was captured and must be appended to the session
    PhotoCaptured {
        index: usize,
        photo: CapturedPhoto,
        /// True when the raw-frame fallback had to be used
        fallback_used: bool,
    },
    /// The session finished; the surrounding flow advances the view
    SessionComplete,
}

/// The countdown/multi-shot controller. One instance per session.
pub struct CaptureController {
    phase: CapturePhase,
    deadline: Option<Instant>,
    photos_taken: usize,
    photos_per_session: usize,
}

impl CaptureController {
    pub fn new(photos_per_session: usize) -> Self {
        Self {
            phase: CapturePhase::Idle,
            deadline: None,
            photos_taken: 0,
            photos_per_session,
        }
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    pub fn photos_taken(&self) -> usize {
        self.photos_taken
    }

    pub fn photos_per_session(&self) -> usize {
        self.photos_per_session
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.phase, CapturePhase::Idle | CapturePhase::Complete)
    }

    /// Begin the countdown. Only valid from `Idle`.
    pub fn start(&mut self, now: Instant) -> Option<CaptureEvent> {
        if self.phase != CapturePhase::Idle {
            return None;
        }
        log::info!(
            "Capture session started ({} photos)",
            self.photos_per_session
        );
        self.phase = CapturePhase::Counting {
            remaining: COUNTDOWN_START,
        };
        self.deadline = Some(now + COUNTDOWN_TICK);
        Some(CaptureEvent::CountdownTick(COUNTDOWN_START))
    }

    /// Advance past every deadline that has elapsed by `now`.
    pub fn tick(&mut self, now: Instant, shutter: &mut dyn ShutterDelegate) -> Vec<CaptureEvent> {
        let mut events = Vec::new();

        loop {
            let Some(deadline) = self.deadline else { break };
            if now < deadline {
                break;
            }

            match self.phase {
                CapturePhase::Counting { remaining } => {
                    if remaining > 1 {
                        self.phase = CapturePhase::Counting {
                            remaining: remaining - 1,
                        };
                        self.deadline = Some(deadline + COUNTDOWN_TICK);
                        events.push(CaptureEvent::CountdownTick(remaining - 1));
                    } else {
                        // Countdown hit zero: take the shot now. Capture is
                        // not time-budgeted; the shutter window starts when
                        // it completes.
                        events.push(self.fire_shutter(shutter));
                        self.phase = CapturePhase::Shutter;
                        // Deadline starts when the capture finished, not
                        // when the countdown expired; captures may overrun
                        // the frame budget.
                        self.deadline = Some(Instant::now().max(now) + SHUTTER_DISPLAY);
                        // The shutter deadline is freshly set from real
                        // time; stop replaying the backlog.
                        break;
                    }
                }
                CapturePhase::Shutter => {
                    self.phase = CapturePhase::Holding;
                    self.deadline = Some(deadline + HOLD_BETWEEN_SHOTS);
                }
                CapturePhase::Holding => {
                    if self.photos_taken < self.photos_per_session {
                        self.phase = CapturePhase::Counting {
                            remaining: COUNTDOWN_START,
                        };
                        self.deadline = Some(deadline + COUNTDOWN_TICK);
                        events.push(CaptureEvent::CountdownTick(COUNTDOWN_START));
                    } else {
                        log::info!("Capture session complete ({} photos)", self.photos_taken);
                        self.phase = CapturePhase::Complete;
                        self.deadline = None;
                        events.push(CaptureEvent::SessionComplete);
                    }
                }
                CapturePhase::Idle | CapturePhase::Complete => {
                    self.deadline = None;
                }
            }
        }

        events
    }

    /// One shot: composite capture, one retry, then the raw fallback.
    fn fire_shutter(&mut self, shutter: &mut dyn ShutterDelegate) -> CaptureEvent {
        let (photo, fallback_used) = match shutter.capture_composited() {
            Ok(photo) => (photo, false),
            Err(first) => {
                log::warn!("Capture failed ({}), retrying once", first);
                match shutter.capture_composited() {
                    Ok(photo) => (photo, false),
                    Err(second) => {
                        log::warn!("Capture failed again ({}), using raw frame", second);
                        (shutter.capture_raw(), true)
                    }
                }
            }
        };

        let index = self.photos_taken;
        self.photos_taken += 1;
        CaptureEvent::PhotoCaptured {
            index,
            photo,
            fallback_used,
        }
    }
}
