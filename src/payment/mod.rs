//! Payment and print collaborators
//!
//! Simulated gateway and printer. The core only consumes their
//! success/failure signal to drive view transitions; a declined payment
//! returns the user to method selection with state untouched.

use std::time::Duration;

use thiserror::Error;

use crate::session::CapturedPhoto;

#[derive(Error, Debug, PartialEq)]
pub enum PaymentError {
    #[error("payment declined")]
    Declined,
    #[error("invalid payment amount {0:.2}")]
    InvalidAmount(f64),
}

#[derive(Error, Debug, PartialEq)]
pub enum PrintError {
    #[error("nothing to print")]
    NoPhotos,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentMethod {
    Card,
    Cash,
    QrCode,
}

#[derive(Clone, Debug)]
pub struct PaymentRequest {
    pub amount: f64,
    pub method: PaymentMethod,
    pub description: String,
}

#[derive(Clone, Debug)]
pub struct Receipt {
    pub amount: f64,
    pub method: PaymentMethod,
}

/// Simulated print spool time per copy.
const PRINT_SECONDS_PER_COPY: u64 = 4;

#[derive(Clone, Debug)]
pub struct PrintJob {
    pub copies: usize,
    pub background_name: String,
    pub estimated_duration: Duration,
}

/// Simulated payment gateway.
///
/// `decline_next` lets the surrounding flow (and tests) exercise the
/// declined path deterministically.
#[derive(Default)]
pub struct PaymentGateway {
    pub decline_next: bool,
}

impl PaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_payment(&mut self, request: &PaymentRequest) -> Result<Receipt, PaymentError> {
        if !(request.amount > 0.0) {
            return Err(PaymentError::InvalidAmount(request.amount));
        }
        if self.decline_next {
            self.decline_next = false;
            log::warn!("Payment declined: {}", request.description);
            return Err(PaymentError::Declined);
        }
        log::info!(
            "Payment approved: {:.2} via {:?} ({})",
            request.amount,
            request.method,
            request.description
        );
        Ok(Receipt {
            amount: request.amount,
            method: request.method,
        })
    }
}

/// Simulated printer: spools the photos and reports an estimated duration.
pub fn print_photos(
    photos: &[CapturedPhoto],
    copies: usize,
    background_name: &str,
) -> Result<PrintJob, PrintError> {
    if photos.is_empty() {
        return Err(PrintError::NoPhotos);
    }
    let job = PrintJob {
        copies,
        background_name: background_name.to_string(),
        estimated_duration: Duration::from_secs(PRINT_SECONDS_PER_COPY * copies as u64),
    };
    log::info!(
        "Print job spooled: {} photos x {} copies on '{}' (~{:?})",
        photos.len(),
        copies,
        background_name,
        job.estimated_duration
    );
    Ok(job)
}
