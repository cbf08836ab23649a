//! Campaign database queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::types::{Campaign, CampaignStatus, CounterDelta};

const CAMPAIGN_COLUMNS: &str = r#"
    id, name, message_kind, template_id, message_body, status,
    scheduled_at, started_at, completed_at,
    total_contacts, sent_count, delivered_count, read_count,
    failed_count, replied_count, messages_per_second,
    created_at, updated_at
"#;

/// Get a campaign by ID
pub async fn get_campaign(exec: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Campaign>> {
    let campaign = sqlx::query_as::<_, Campaign>(&format!(
        "SELECT {} FROM campaigns WHERE id = $1",
        CAMPAIGN_COLUMNS
    ))
    .bind(id)
    .fetch_optional(exec)
    .await?;

    Ok(campaign)
}

/// Fresh status read, used by the feeder and consumer to observe a
/// concurrent pause without caching.
pub async fn get_campaign_status(
    exec: impl PgExecutor<'_>,
    id: Uuid,
) -> Result<Option<CampaignStatus>> {
    let status = sqlx::query_scalar::<_, CampaignStatus>("SELECT status FROM campaigns WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await?;

    Ok(status)
}

/// Campaigns whose scheduled start time has passed
pub async fn get_scheduled_campaigns(
    exec: impl PgExecutor<'_>,
    now: DateTime<Utc>,
) -> Result<Vec<Campaign>> {
    let campaigns = sqlx::query_as::<_, Campaign>(&format!(
        r#"
        SELECT {}
        FROM campaigns
        WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= $1
        ORDER BY scheduled_at
        "#,
        CAMPAIGN_COLUMNS
    ))
    .bind(now)
    .fetch_all(exec)
    .await?;

    Ok(campaigns)
}

/// IDs of campaigns the completion sweep has to look at
pub async fn get_active_campaign_ids(exec: impl PgExecutor<'_>) -> Result<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM campaigns WHERE status IN ('running', 'paused')",
    )
    .fetch_all(exec)
    .await?;

    Ok(ids)
}

/// Transition to RUNNING from a startable state. Returns false if another
/// worker won the transition.
pub async fn set_running(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE campaigns
        SET status = 'running', started_at = $2, updated_at = $2
        WHERE id = $1 AND status IN ('draft', 'scheduled')
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_paused(exec: impl PgExecutor<'_>, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE campaigns SET status = 'paused', updated_at = $2 WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .bind(now)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_resumed(exec: impl PgExecutor<'_>, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE campaigns SET status = 'running', updated_at = $2 WHERE id = $1 AND status = 'paused'",
    )
    .bind(id)
    .bind(now)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Transition to COMPLETED. Conditional on an active status so that
/// concurrent completion checks fire the notification exactly once.
pub async fn set_completed(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE campaigns
        SET status = 'completed', completed_at = $2, updated_at = $2
        WHERE id = $1 AND status IN ('running', 'paused')
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a campaign FAILED after an unrecoverable start error.
pub async fn set_failed(exec: impl PgExecutor<'_>, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE campaigns
        SET status = 'failed', updated_at = $2
        WHERE id = $1 AND status IN ('scheduled', 'running')
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn increment_sent(exec: impl PgExecutor<'_>, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE campaigns SET sent_count = sent_count + 1, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;

    Ok(())
}

pub async fn increment_failed(exec: impl PgExecutor<'_>, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE campaigns SET failed_count = failed_count + 1, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .execute(exec)
    .await?;

    Ok(())
}

/// Apply a counter adjustment, flooring every counter at zero.
pub async fn adjust_counters(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    delta: &CounterDelta,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE campaigns
        SET sent_count = GREATEST(sent_count + $2, 0),
            delivered_count = GREATEST(delivered_count + $3, 0),
            read_count = GREATEST(read_count + $4, 0),
            failed_count = GREATEST(failed_count + $5, 0),
            replied_count = GREATEST(replied_count + $6, 0),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(delta.sent)
    .bind(delta.delivered)
    .bind(delta.read)
    .bind(delta.failed)
    .bind(delta.replied)
    .execute(exec)
    .await?;

    Ok(())
}
