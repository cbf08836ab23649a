//! Campaign contact (delivery link) database queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::types::{CampaignContact, DeliveryStatus};

const LINK_COLUMNS: &str = r#"
    id, campaign_id, contact_id, message_id, status,
    error_message, retry_count, can_send_after, created_at, updated_at
"#;

/// Get a delivery link by ID
pub async fn get_link(exec: impl PgExecutor<'_>, id: Uuid) -> Result<Option<CampaignContact>> {
    let link = sqlx::query_as::<_, CampaignContact>(&format!(
        "SELECT {} FROM campaign_contacts WHERE id = $1",
        LINK_COLUMNS
    ))
    .bind(id)
    .fetch_optional(exec)
    .await?;

    Ok(link)
}

/// Resolve the delivery link a sent message belongs to
pub async fn get_link_by_message_id(
    exec: impl PgExecutor<'_>,
    message_id: Uuid,
) -> Result<Option<CampaignContact>> {
    let link = sqlx::query_as::<_, CampaignContact>(&format!(
        "SELECT {} FROM campaign_contacts WHERE message_id = $1",
        LINK_COLUMNS
    ))
    .bind(message_id)
    .fetch_optional(exec)
    .await?;

    Ok(link)
}

/// One page of links still eligible for a send attempt: never attempted
/// (QUEUED), failed before any attempt (FAILED with retry_count = 0), or
/// deferred by the messaging window and due again (SCHEDULED with
/// can_send_after in the past).
pub async fn get_sendable_contacts(
    exec: impl PgExecutor<'_>,
    campaign_id: Uuid,
    now: DateTime<Utc>,
    limit: i64,
    offset: i64,
) -> Result<Vec<CampaignContact>> {
    let links = sqlx::query_as::<_, CampaignContact>(&format!(
        r#"
        SELECT {}
        FROM campaign_contacts
        WHERE campaign_id = $1
          AND (
            status = 'queued'
            OR (status = 'failed' AND retry_count = 0)
            OR (status = 'scheduled' AND can_send_after IS NOT NULL AND can_send_after <= $2)
          )
        ORDER BY created_at
        LIMIT $3 OFFSET $4
        "#,
        LINK_COLUMNS
    ))
    .bind(campaign_id)
    .bind(now)
    .bind(limit)
    .bind(offset)
    .fetch_all(exec)
    .await?;

    Ok(links)
}

/// Count links the campaign still owes an attempt to. Deferred (SCHEDULED)
/// links count regardless of their window so completion waits for them;
/// FAILED links with a recorded attempt are exhausted and do not block.
pub async fn count_remaining(exec: impl PgExecutor<'_>, campaign_id: Uuid) -> Result<i64> {
    let remaining = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM campaign_contacts
        WHERE campaign_id = $1
          AND (
            status IN ('queued', 'scheduled')
            OR (status = 'failed' AND retry_count = 0)
          )
        "#,
    )
    .bind(campaign_id)
    .fetch_one(exec)
    .await?;

    Ok(remaining)
}

/// Record a successful send on the link
pub async fn mark_sent(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    message_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE campaign_contacts
        SET status = 'sent', message_id = $2, updated_at = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(message_id)
    .bind(now)
    .execute(exec)
    .await?;

    Ok(())
}

/// Record a failed attempt: error text, retry counter bump
pub async fn mark_failed(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    error_message: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE campaign_contacts
        SET status = 'failed', error_message = $2, retry_count = retry_count + 1, updated_at = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(error_message)
    .bind(now)
    .execute(exec)
    .await?;

    Ok(())
}

/// Defer the link until the 24-hour messaging window reopens
pub async fn defer(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE campaign_contacts
        SET status = 'scheduled', can_send_after = $2, updated_at = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(until)
    .bind(now)
    .execute(exec)
    .await?;

    Ok(())
}

/// Move the link to a new delivery status (stats reconciliation)
pub async fn set_status(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    status: DeliveryStatus,
) -> Result<()> {
    sqlx::query("UPDATE campaign_contacts SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status)
        .execute(exec)
        .await?;

    Ok(())
}
