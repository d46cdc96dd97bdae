//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use lms_core::{EnrollmentLedger, ProgressTracker, PurchaseFulfillment};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<EnrollmentLedger>,
    pub tracker: Arc<ProgressTracker>,
    pub fulfillment: Arc<PurchaseFulfillment>,
}
