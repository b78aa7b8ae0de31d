//! Inbound webhook fabric: Airtable change notifications, Google push
//! notifications, Chat commands and the scheduler endpoints.
//!
//! Receivers acknowledge quickly and republish to Pub/Sub; the event router
//! does the slow work when the push subscription delivers it back.

pub mod handlers;
pub mod payload;
pub mod routes;

use thiserror::Error;

use crate::airtable::AirtableError;
use crate::google::GoogleApiError;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Airtable error: {0}")]
    Airtable(#[from] AirtableError),

    #[error("Google API error: {0}")]
    Google(#[from] GoogleApiError),
}
