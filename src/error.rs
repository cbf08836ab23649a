//! Worker error types

use thiserror::Error;
use uuid::Uuid;

use crate::types::CampaignStatus;

/// Errors fatal to a single send attempt, never to the campaign.
///
/// Every variant ends the same way: the link is marked FAILED with the error
/// text, and the campaign moves on to the next recipient.
#[derive(Debug, Error)]
pub enum SendError {
    /// Account-level setup is missing (no WABA phone, no template row).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The campaign's message definition cannot produce a payload.
    #[error("invalid message: {0}")]
    Validation(String),

    /// The provider rejected the call or returned an unusable response.
    #[error("provider error: {0}")]
    Provider(String),
}

/// Campaign state errors raised synchronously to control-surface callers.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("campaign {0} not found")]
    NotFound(Uuid),

    #[error("cannot {action} campaign in {from} status")]
    InvalidState {
        from: CampaignStatus,
        action: &'static str,
    },

    #[error("cannot start campaign with no contacts")]
    NoContacts,
}
