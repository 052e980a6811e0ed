//! Session state
//!
//! Process-wide kiosk state behind a single-writer store. All mutation goes
//! through the reducer: `reduce(state, action, now) -> state` is a pure
//! transition, and every action refreshes the activity timestamp that the
//! inactivity reset watches.

use std::time::{Duration, Instant};

use crate::background::Background;
use crate::filter::FilterKind;

/// Idle time after which the kiosk resets to a clean welcome screen.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Sticker size clamp bounds, in preview pixels.
pub const STICKER_MIN_SIZE: f32 = 20.0;
pub const STICKER_MAX_SIZE: f32 = 150.0;

/// Kiosk screens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Welcome,
    ModeSelect,
    Capture,
    PhotoSelect,
    Decorate,
    Payment,
    Printing,
    ThankYou,
}

impl Default for View {
    fn default() -> Self {
        Self::Welcome
    }
}

/// How many shots a session takes and what the base price is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhotoMode {
    /// Classic strip: eight shots, pick favorites later
    Strips,
    /// One large shot
    Single,
}

impl Default for PhotoMode {
    fn default() -> Self {
        Self::Strips
    }
}

impl PhotoMode {
    pub fn photos_per_session(&self) -> usize {
        match self {
            PhotoMode::Strips => 8,
            PhotoMode::Single => 1,
        }
    }

    pub fn base_price(&self) -> f64 {
        match self {
            PhotoMode::Strips => 10.0,
            PhotoMode::Single => 6.0,
        }
    }
}

/// Price multiplier per print quantity. Quantities outside the table are
/// rejected by the reducer.
pub fn quantity_multiplier(quantity: u32) -> Option<f64> {
    match quantity {
        2 => Some(1.0),
        4 => Some(1.8),
        6 => Some(2.5),
        8 => Some(3.0),
        _ => None,
    }
}

fn price_for(mode: PhotoMode, quantity: u32) -> f64 {
    mode.base_price() * quantity_multiplier(quantity).unwrap_or(1.0)
}

/// Decorative border choice. Rendering is UI glue; the core only stores the
/// selection.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameStyle {
    pub id: String,
    pub name: String,
}

/// One applied sticker instance. Free-form float position relative to the
/// preview container; only the last committed placement is stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Sticker {
    pub id: String,
    pub url: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
    pub z_index: i32,
}

impl Sticker {
    /// Apply a resize delta, clamping both dimensions to [20, 150].
    pub fn resize_by(&mut self, dw: f32, dh: f32) {
        self.width += dw;
        self.height += dh;
        self.clamp_size();
    }

    /// Force both dimensions into [20, 150].
    pub fn clamp_size(&mut self) {
        self.width = self.width.clamp(STICKER_MIN_SIZE, STICKER_MAX_SIZE);
        self.height = self.height.clamp(STICKER_MIN_SIZE, STICKER_MAX_SIZE);
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.x = x;
        self.y = y;
    }
}

/// An encoded still image, opaque once captured. Ordering in
/// [`SessionState::photos`] is capture order.
#[derive(Clone)]
pub struct CapturedPhoto {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// The full kiosk state.
#[derive(Clone)]
pub struct SessionState {
    pub current_view: View,
    pub available_backgrounds: Vec<Background>,
    pub selected_background: Option<Background>,
    pub selected_filter: FilterKind,
    pub selected_frame: Option<FrameStyle>,
    pub applied_stickers: Vec<Sticker>,
    pub photos: Vec<CapturedPhoto>,
    pub photo_mode: PhotoMode,
    pub print_quantity: u32,
    pub price: f64,
    pub last_activity: Instant,
}

impl SessionState {
    pub fn new(now: Instant) -> Self {
        let photo_mode = PhotoMode::default();
        let print_quantity = 2;
        Self {
            current_view: View::default(),
            available_backgrounds: Vec::new(),
            selected_background: None,
            selected_filter: FilterKind::Normal,
            selected_frame: None,
            applied_stickers: Vec::new(),
            photos: Vec::new(),
            photo_mode,
            print_quantity,
            price: price_for(photo_mode, print_quantity),
            last_activity: now,
        }
    }

    pub fn photos_per_session(&self) -> usize {
        self.photo_mode.photos_per_session()
    }
}

/// Every state transition the surrounding UI or the core can request.
#[derive(Clone)]
pub enum Action {
    SetView(View),
    SetBackground(Option<Background>),
    SetFilter(FilterKind),
    SetFrame(Option<FrameStyle>),
    SetAppliedStickers(Vec<Sticker>),
    SetPhotoMode(PhotoMode),
    SetPrintQuantity(u32),
    AddPhoto(CapturedPhoto),
    ClearPhotos,
    SetBackgrounds(Vec<Background>),
    ResetApp,
}

/// Pure transition: old state + action -> new state.
///
/// Every action, including rejected ones, refreshes `last_activity`.
pub fn reduce(state: SessionState, action: Action, now: Instant) -> SessionState {
    let mut next = state;
    next.last_activity = now;

    match action {
        Action::SetView(view) => {
            next.current_view = view;
        }
        Action::SetBackground(background) => {
            next.selected_background = background;
        }
        Action::SetFilter(filter) => {
            next.selected_filter = filter;
        }
        Action::SetFrame(frame) => {
            next.selected_frame = frame;
        }
        Action::SetAppliedStickers(mut stickers) => {
            // Size bounds hold no matter where the payload came from.
            for sticker in &mut stickers {
                sticker.clamp_size();
            }
            next.applied_stickers = stickers;
        }
        Action::SetPhotoMode(mode) => {
            next.photo_mode = mode;
            next.price = price_for(mode, next.print_quantity);
        }
        Action::SetPrintQuantity(quantity) => {
            // Quantities outside the multiplier table are rejected so the
            // price can never disagree with it.
            if quantity_multiplier(quantity).is_some() {
                next.print_quantity = quantity;
                next.price = price_for(next.photo_mode, quantity);
            } else {
                log::warn!("Rejected print quantity {}", quantity);
            }
        }
        Action::AddPhoto(photo) => {
            next.photos.push(photo);
        }
        Action::ClearPhotos => {
            next.photos.clear();
        }
        Action::SetBackgrounds(backgrounds) => {
            next.available_backgrounds = backgrounds;
        }
        Action::ResetApp => {
            // Everything back to defaults except the catalog.
            let backgrounds = std::mem::take(&mut next.available_backgrounds);
            next = SessionState::new(now);
            next.available_backgrounds = backgrounds;
        }
    }

    next
}

/// Single-owner store wrapping the reducer. Components receive `&Store` or
/// `&mut Store`; nothing mutates fields directly.
pub struct Store {
    state: SessionState,
}

impl Store {
    pub fn new(now: Instant) -> Self {
        Self {
            state: SessionState::new(now),
        }
    }

    pub fn dispatch(&mut self, action: Action) {
        self.dispatch_at(action, Instant::now());
    }

    pub fn dispatch_at(&mut self, action: Action, now: Instant) {
        let state = std::mem::replace(&mut self.state, SessionState::new(now));
        self.state = reduce(state, action, now);
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Time since the last dispatched action.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state.last_activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::default_catalog;

    fn photo() -> CapturedPhoto {
        CapturedPhoto {
            jpeg: vec![0xFF, 0xD8],
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn test_defaults() {
        let s = SessionState::new(Instant::now());
        assert_eq!(s.current_view, View::Welcome);
        assert_eq!(s.photo_mode, PhotoMode::Strips);
        assert_eq!(s.photos_per_session(), 8);
        assert_eq!(s.print_quantity, 2);
        assert_eq!(s.price, 10.0);
        assert!(s.selected_background.is_none());
        assert_eq!(s.selected_filter, FilterKind::Normal);
    }

    #[test]
    fn test_every_action_updates_activity() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(5);
        let actions: Vec<Action> = vec![
            Action::SetView(View::Capture),
            Action::SetBackground(None),
            Action::SetFilter(FilterKind::Sepia),
            Action::SetFrame(None),
            Action::SetAppliedStickers(Vec::new()),
            Action::SetPhotoMode(PhotoMode::Single),
            Action::SetPrintQuantity(4),
            Action::AddPhoto(photo()),
            Action::ClearPhotos,
            Action::SetBackgrounds(Vec::new()),
            Action::ResetApp,
        ];
        for action in actions {
            let state = SessionState::new(t0);
            let next = reduce(state, action, t1);
            assert_eq!(next.last_activity, t1);
        }
    }

    #[test]
    fn test_pricing_table() {
        let now = Instant::now();
        let mut state = SessionState::new(now);
        // strips base 10.00: {2:1, 4:1.8, 6:2.5, 8:3.0}
        for (quantity, expected) in [(2u32, 10.0f64), (4, 18.0), (6, 25.0), (8, 30.0)] {
            state = reduce(state, Action::SetPrintQuantity(quantity), now);
            assert_eq!(state.price, expected, "quantity {}", quantity);
        }
    }

    #[test]
    fn test_invalid_quantity_rejected() {
        let now = Instant::now();
        let state = SessionState::new(now);
        let next = reduce(state, Action::SetPrintQuantity(5), now);
        assert_eq!(next.print_quantity, 2);
        assert_eq!(next.price, 10.0);
    }

    #[test]
    fn test_mode_change_reprices() {
        let now = Instant::now();
        let state = SessionState::new(now);
        let state = reduce(state, Action::SetPrintQuantity(4), now);
        let state = reduce(state, Action::SetPhotoMode(PhotoMode::Single), now);
        assert_eq!(state.price, 6.0 * 1.8);
        assert_eq!(state.photos_per_session(), 1);
    }

    #[test]
    fn test_reset_preserves_catalog() {
        let now = Instant::now();
        let catalog = default_catalog();
        let state = SessionState::new(now);
        let state = reduce(state, Action::SetBackgrounds(catalog.clone()), now);
        let state = reduce(state, Action::SetView(View::Decorate), now);
        let state = reduce(state, Action::SetFilter(FilterKind::Warm), now);
        let state = reduce(state, Action::AddPhoto(photo()), now);

        let state = reduce(state, Action::ResetApp, now);
        assert_eq!(state.available_backgrounds, catalog);
        assert_eq!(state.current_view, View::Welcome);
        assert_eq!(state.selected_filter, FilterKind::Normal);
        assert!(state.photos.is_empty());
        assert_eq!(state.price, 10.0);
    }

    #[test]
    fn test_photos_keep_capture_order() {
        let now = Instant::now();
        let mut state = SessionState::new(now);
        for i in 0..3u8 {
            let mut p = photo();
            p.jpeg.push(i);
            state = reduce(state, Action::AddPhoto(p), now);
        }
        assert_eq!(state.photos.len(), 3);
        for (i, p) in state.photos.iter().enumerate() {
            assert_eq!(*p.jpeg.last().unwrap(), i as u8);
        }
    }

    #[test]
    fn test_sticker_clamp_over_any_delta_sequence() {
        let mut sticker = Sticker {
            id: "s1".to_string(),
            url: "stickers/star.png".to_string(),
            x: 0.0,
            y: 0.0,
            width: 80.0,
            height: 80.0,
            rotation: 0.0,
            z_index: 1,
        };
        let deltas = [
            (500.0f32, 500.0f32),
            (-1000.0, -1000.0),
            (30.0, -5.0),
            (0.0, 400.0),
            (-7.5, -7.5),
        ];
        for (dw, dh) in deltas {
            sticker.resize_by(dw, dh);
            assert!(sticker.width >= STICKER_MIN_SIZE && sticker.width <= STICKER_MAX_SIZE);
            assert!(sticker.height >= STICKER_MIN_SIZE && sticker.height <= STICKER_MAX_SIZE);
        }
    }

    #[test]
    fn test_applied_stickers_land_clamped() {
        let sticker = |w: f32, h: f32| Sticker {
            id: "s1".to_string(),
            url: "stickers/star.png".to_string(),
            x: 0.0,
            y: 0.0,
            width: w,
            height: h,
            rotation: 0.0,
            z_index: 1,
        };

        let now = Instant::now();
        let state = SessionState::new(now);
        let state = reduce(
            state,
            Action::SetAppliedStickers(vec![sticker(1000.0, 5.0), sticker(80.0, -3.0)]),
            now,
        );

        assert_eq!(state.applied_stickers[0].width, STICKER_MAX_SIZE);
        assert_eq!(state.applied_stickers[0].height, STICKER_MIN_SIZE);
        assert_eq!(state.applied_stickers[1].width, 80.0);
        assert_eq!(state.applied_stickers[1].height, STICKER_MIN_SIZE);
    }

    #[test]
    fn test_store_idle_measurement() {
        let t0 = Instant::now();
        let mut store = Store::new(t0);
        store.dispatch_at(Action::SetView(View::ModeSelect), t0 + Duration::from_secs(1));
        assert_eq!(
            store.idle_for(t0 + Duration::from_secs(31)),
            Duration::from_secs(30)
        );
    }
}
