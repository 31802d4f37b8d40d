//! Handover - singleton role handover and pending-work transfer

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod handover;
pub mod mailer;
pub mod models;
pub mod store;
pub mod token;

use std::sync::Arc;

use handover::HandoverService;

/// Application state shared across handlers
pub struct AppState {
    pub service: HandoverService,
}

impl AppState {
    pub fn new(service: HandoverService) -> Arc<Self> {
        Arc::new(Self { service })
    }
}
