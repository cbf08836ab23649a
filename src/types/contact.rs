//! Contact types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::campaign::DeliveryStatus;

/// Contact entity.
///
/// Owned by the contacts collaborator; the worker only reads the phone
/// number and updates `last_message_at`/`status` as a side effect of sending.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub phone_number: String,
    pub status: Option<DeliveryStatus>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_incoming_message_at: Option<DateTime<Utc>>,
    pub unread_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
