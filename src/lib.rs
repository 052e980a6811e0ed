//! Photo booth kiosk core
//!
//! Captures camera input, substitutes a virtual background behind the
//! person via ML segmentation, applies pixel filters, and drives the
//! countdown/multi-shot capture flow through to payment and printing.

pub mod app;
pub mod background;
pub mod camera;
pub mod capture;
pub mod compositor;
pub mod filter;
pub mod payment;
pub mod segmentation;
pub mod session;

pub use app::KioskApp;
