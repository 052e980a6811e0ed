//! Photo booth kiosk - Main Entry Point
//!
//! Opens a raw-pixel window, runs the preview/capture loop at the target
//! cadence and maps a handful of keys onto the kiosk flow. All screen
//! layout beyond the live preview is placeholder color; the interesting
//! work happens in the library crate.

use std::time::Instant;

use minifb::{Key, KeyRepeat, Window, WindowOptions};
use photobooth::app::KioskApp;
use photobooth::payment::PaymentMethod;
use photobooth::session::{Action, PhotoMode, View};

const WINDOW_TITLE: &str = "Photo Booth";
const DEFAULT_WIDTH: usize = 1280;
const DEFAULT_HEIGHT: usize = 720;
/// Preview cadence: ~33 ms budget per displayed frame.
const TARGET_FPS: usize = 30;

/// Idle screen colors per view, shown where no live preview exists.
fn view_color(view: View) -> u32 {
    match view {
        View::Welcome => 0x1d3557,
        View::ModeSelect => 0x264653,
        View::Capture => 0x000000,
        View::PhotoSelect => 0x2a9d8f,
        View::Decorate => 0x6d597a,
        View::Payment => 0xe9c46a,
        View::Printing => 0xf4a261,
        View::ThankYou => 0x386641,
    }
}

/// Pack an RGBA buffer into minifb's 0RGB format.
fn pack_rgba(rgba: &[u8], out: &mut Vec<u32>) {
    out.clear();
    out.extend(rgba.chunks_exact(4).map(|px| {
        ((px[0] as u32) << 16) | ((px[1] as u32) << 8) | (px[2] as u32)
    }));
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Photo Booth v{}", env!("CARGO_PKG_VERSION"));

    let mut window = Window::new(
        WINDOW_TITLE,
        DEFAULT_WIDTH,
        DEFAULT_HEIGHT,
        WindowOptions::default(),
    )
    .expect("Failed to create window");
    window.set_target_fps(TARGET_FPS);

    let mut app = KioskApp::new(Instant::now());
    let mut screen: Vec<u32> = vec![0; DEFAULT_WIDTH * DEFAULT_HEIGHT];
    // Set once a print job is spooled; advances to the thank-you screen.
    let mut printing_done_at: Option<Instant> = None;

    log::info!("Space advances the flow, B cycles backgrounds, F cycles filters, ESC exits");

    while window.is_open() && !window.is_key_down(Key::Escape) {
        let now = Instant::now();

        if window.is_key_pressed(Key::Space, KeyRepeat::No) {
            match app.state().current_view {
                View::Welcome => {
                    app.dispatch(Action::SetView(View::ModeSelect));
                }
                View::ModeSelect => {
                    app.enter_capture_view();
                    if let Some(e) = app.camera_error() {
                        log::error!("Cannot start session: {}", e);
                    }
                }
                View::Capture => {
                    app.start_capture_session(now);
                }
                View::PhotoSelect => {
                    app.dispatch(Action::SetView(View::Decorate));
                }
                View::Decorate => {
                    app.dispatch(Action::SetView(View::Payment));
                }
                View::Payment => match app.checkout(PaymentMethod::Card) {
                    Ok(job) => {
                        printing_done_at = Some(now + job.estimated_duration);
                    }
                    Err(e) => {
                        log::warn!("Checkout failed: {}", e);
                    }
                },
                View::Printing | View::ThankYou => {
                    app.dispatch(Action::ResetApp);
                }
            }
        }

        if window.is_key_pressed(Key::B, KeyRepeat::No) {
            app.cycle_background();
        }
        if window.is_key_pressed(Key::F, KeyRepeat::No) {
            app.cycle_filter();
        }
        if window.is_key_pressed(Key::M, KeyRepeat::No) {
            let next = match app.state().photo_mode {
                PhotoMode::Strips => PhotoMode::Single,
                PhotoMode::Single => PhotoMode::Strips,
            };
            app.dispatch(Action::SetPhotoMode(next));
        }
        for (key, quantity) in [(Key::Key1, 2u32), (Key::Key2, 4), (Key::Key3, 6), (Key::Key4, 8)]
        {
            if window.is_key_pressed(key, KeyRepeat::No) {
                app.dispatch(Action::SetPrintQuantity(quantity));
                log::info!("Price: {:.2}", app.state().price);
            }
        }

        app.tick(now);

        if app.state().current_view == View::Printing {
            if let Some(done_at) = printing_done_at {
                if now >= done_at {
                    printing_done_at = None;
                    app.dispatch(Action::SetView(View::ThankYou));
                }
            }
        }

        if let Some(n) = app.countdown() {
            window.set_title(&format!("{} - {}", WINDOW_TITLE, n));
        } else {
            window.set_title(WINDOW_TITLE);
        }

        // Present the live preview on the capture view, a flat color
        // elsewhere.
        match app.preview() {
            Some(frame) if app.state().current_view == View::Capture => {
                pack_rgba(&frame.data, &mut screen);
                window
                    .update_with_buffer(&screen, frame.width as usize, frame.height as usize)
                    .expect("Failed to present frame");
            }
            _ => {
                let color = view_color(app.state().current_view);
                screen.clear();
                screen.resize(DEFAULT_WIDTH * DEFAULT_HEIGHT, color);
                window
                    .update_with_buffer(&screen, DEFAULT_WIDTH, DEFAULT_HEIGHT)
                    .expect("Failed to present frame");
            }
        }
    }

    log::info!("Shutting down");
}
