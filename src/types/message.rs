//! Message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use super::campaign::MessageKind;

/// Message direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "message_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// Message delivery state as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "message_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
    Received,
}

impl MessageStatus {
    /// Weight on the progression lattice. Status webhooks can arrive out of
    /// order; a message row only ever moves to a heavier status.
    pub fn weight(self) -> u8 {
        match self {
            MessageStatus::Pending | MessageStatus::Received => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 4,
        }
    }

    pub fn is_newer_than(self, old: MessageStatus) -> bool {
        self.weight() > old.weight()
    }
}

/// One outbound or inbound message record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub waba_phone_id: Option<Uuid>,
    pub contact_id: Uuid,
    pub direction: MessageDirection,
    pub status: MessageStatus,
    pub wamid: Option<String>,
    pub message_kind: MessageKind,
    pub body: Option<String>,
    pub template_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_weights_are_ordered() {
        assert!(MessageStatus::Sent.weight() < MessageStatus::Delivered.weight());
        assert!(MessageStatus::Delivered.weight() < MessageStatus::Read.weight());
        assert!(MessageStatus::Pending.weight() < MessageStatus::Sent.weight());
    }

    #[test]
    fn test_out_of_order_webhook_is_not_newer() {
        // `delivered` arriving after `read` must not regress the message
        assert!(!MessageStatus::Delivered.is_newer_than(MessageStatus::Read));
        assert!(MessageStatus::Read.is_newer_than(MessageStatus::Delivered));
        assert!(!MessageStatus::Sent.is_newer_than(MessageStatus::Sent));
    }
}
