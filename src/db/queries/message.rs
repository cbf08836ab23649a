//! Message database queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::types::{Message, MessageKind, MessageStatus};

const MESSAGE_COLUMNS: &str = r#"
    id, waba_phone_id, contact_id, direction, status, wamid,
    message_kind, body, template_id, created_at, updated_at
"#;

/// Create a pending outbound message row
pub async fn create_pending(
    exec: impl PgExecutor<'_>,
    waba_phone_id: Uuid,
    contact_id: Uuid,
    message_kind: MessageKind,
    body: &str,
    template_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<Message> {
    let message = sqlx::query_as::<_, Message>(&format!(
        r#"
        INSERT INTO messages (
            id, waba_phone_id, contact_id, direction, status,
            message_kind, body, template_id, created_at, updated_at
        )
        VALUES ($1, $2, $3, 'outbound', 'pending', $4, $5, $6, $7, $7)
        RETURNING {}
        "#,
        MESSAGE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(waba_phone_id)
    .bind(contact_id)
    .bind(message_kind)
    .bind(body)
    .bind(template_id)
    .bind(now)
    .fetch_one(exec)
    .await?;

    Ok(message)
}

/// Record the provider message ID after a successful send
pub async fn mark_sent(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    wamid: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE messages SET status = 'sent', wamid = $2, updated_at = $3 WHERE id = $1")
        .bind(id)
        .bind(wamid)
        .bind(now)
        .execute(exec)
        .await?;

    Ok(())
}

/// Resolve a message by the provider-assigned ID from a status webhook
pub async fn get_by_wamid(exec: impl PgExecutor<'_>, wamid: &str) -> Result<Option<Message>> {
    let message = sqlx::query_as::<_, Message>(&format!(
        "SELECT {} FROM messages WHERE wamid = $1",
        MESSAGE_COLUMNS
    ))
    .bind(wamid)
    .fetch_optional(exec)
    .await?;

    Ok(message)
}

/// Move a message to a new provider-reported status
pub async fn set_status(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    status: MessageStatus,
) -> Result<()> {
    sqlx::query("UPDATE messages SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status)
        .execute(exec)
        .await?;

    Ok(())
}

/// Most recent outbound campaign message for a contact, used to resolve
/// which campaign an inbound reply answers.
pub async fn latest_campaign_outbound_for_contact(
    exec: impl PgExecutor<'_>,
    contact_id: Uuid,
) -> Result<Option<Message>> {
    let message = sqlx::query_as::<_, Message>(&format!(
        r#"
        SELECT {}
        FROM messages m
        WHERE m.contact_id = $1
          AND m.direction = 'outbound'
          AND EXISTS (
            SELECT 1 FROM campaign_contacts cc WHERE cc.message_id = m.id
          )
        ORDER BY m.created_at DESC
        LIMIT 1
        "#,
        MESSAGE_COLUMNS
    ))
    .bind(contact_id)
    .fetch_optional(exec)
    .await?;

    Ok(message)
}
