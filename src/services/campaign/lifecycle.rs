//! Campaign lifecycle management
//!
//! Owns the state machine DRAFT → SCHEDULED → RUNNING ⇄ PAUSED → COMPLETED
//! (FAILED on an unrecoverable start error) and the completion-detection
//! check. State transitions are conditional UPDATEs, so two workers racing
//! on the same campaign resolve through the database, not through locks.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::queries;
use crate::error::LifecycleError;
use crate::services::campaign::tracker::{ProgressTracker, TrackerMap};
use crate::services::notify::Notifier;
use crate::types::{Campaign, CampaignStatus};

pub struct LifecycleManager {
    pool: PgPool,
    notifier: Notifier,
    trackers: TrackerMap,
}

/// Validate that a campaign can be started
fn validate_can_start(campaign: &Campaign) -> Result<(), LifecycleError> {
    if !matches!(
        campaign.status,
        CampaignStatus::Draft | CampaignStatus::Scheduled
    ) {
        return Err(LifecycleError::InvalidState {
            from: campaign.status,
            action: "start",
        });
    }
    if campaign.total_contacts == 0 {
        return Err(LifecycleError::NoContacts);
    }
    Ok(())
}

impl LifecycleManager {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        Self {
            pool,
            notifier,
            trackers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Live progress trackers, shared with the sender
    pub fn trackers(&self) -> &TrackerMap {
        &self.trackers
    }

    /// Start a campaign and initialize its tracker
    pub async fn start_campaign(&self, campaign_id: Uuid) -> Result<Campaign> {
        let campaign = queries::campaign::get_campaign(&self.pool, campaign_id)
            .await?
            .ok_or(LifecycleError::NotFound(campaign_id))?;

        validate_can_start(&campaign)?;

        let now = Utc::now();
        if !queries::campaign::set_running(&self.pool, campaign_id, now).await? {
            // Another worker got there first; re-read for the real state
            let status = queries::campaign::get_campaign_status(&self.pool, campaign_id)
                .await?
                .unwrap_or(campaign.status);
            return Err(LifecycleError::InvalidState {
                from: status,
                action: "start",
            }
            .into());
        }

        self.trackers
            .lock()
            .insert(campaign_id, ProgressTracker::new(campaign_id));

        info!("Campaign {} started", campaign_id);

        self.notifier
            .campaign_status(
                campaign_id,
                "running",
                json!({
                    "name": campaign.name,
                    "total_contacts": campaign.total_contacts,
                    "message_kind": campaign.message_kind,
                    "started_at": now,
                }),
            )
            .await;

        Ok(campaign)
    }

    /// Pause a running campaign
    pub async fn pause_campaign(&self, campaign_id: Uuid) -> Result<()> {
        let campaign = queries::campaign::get_campaign(&self.pool, campaign_id)
            .await?
            .ok_or(LifecycleError::NotFound(campaign_id))?;

        if !queries::campaign::set_paused(&self.pool, campaign_id, Utc::now()).await? {
            return Err(LifecycleError::InvalidState {
                from: campaign.status,
                action: "pause",
            }
            .into());
        }

        info!("Campaign {} paused", campaign_id);

        self.notifier
            .campaign_status(campaign_id, "paused", json!({ "name": campaign.name }))
            .await;

        Ok(())
    }

    /// Resume a paused campaign
    pub async fn resume_campaign(&self, campaign_id: Uuid) -> Result<()> {
        let campaign = queries::campaign::get_campaign(&self.pool, campaign_id)
            .await?
            .ok_or(LifecycleError::NotFound(campaign_id))?;

        if !queries::campaign::set_resumed(&self.pool, campaign_id, Utc::now()).await? {
            return Err(LifecycleError::InvalidState {
                from: campaign.status,
                action: "resume",
            }
            .into());
        }

        info!("Campaign {} resumed", campaign_id);

        self.notifier
            .campaign_status(campaign_id, "running", json!({ "name": campaign.name }))
            .await;

        Ok(())
    }

    /// Mark a campaign COMPLETED and emit the completion summary
    pub async fn complete_campaign(&self, campaign: &Campaign) -> Result<()> {
        let now = Utc::now();
        if !queries::campaign::set_completed(&self.pool, campaign.id, now).await? {
            // A concurrent check already completed it; nothing to re-fire
            debug!("Campaign {} already completed", campaign.id);
            return Ok(());
        }

        let duration_seconds = self
            .trackers
            .lock()
            .remove(&campaign.id)
            .map(|tracker| tracker.elapsed_seconds());

        info!(
            "Campaign {} completed: sent={}, delivered={}, failed={}",
            campaign.id, campaign.sent_count, campaign.delivered_count, campaign.failed_count
        );

        self.notifier
            .campaign_status(
                campaign.id,
                "completed",
                json!({
                    "name": campaign.name,
                    "total": campaign.total_contacts,
                    "sent": campaign.sent_count,
                    "delivered": campaign.delivered_count,
                    "failed": campaign.failed_count,
                    "duration_seconds": duration_seconds,
                    "completed_at": now,
                }),
            )
            .await;

        Ok(())
    }

    /// Mark a campaign FAILED after an error escaped the start path
    pub async fn fail_campaign(&self, campaign_id: Uuid, error: &str) -> Result<()> {
        if !queries::campaign::set_failed(&self.pool, campaign_id, Utc::now()).await? {
            debug!("Campaign {} not in a failable state", campaign_id);
            return Ok(());
        }

        self.trackers.lock().remove(&campaign_id);

        info!("Campaign {} marked failed: {}", campaign_id, error);

        self.notifier
            .campaign_status(campaign_id, "failed", json!({ "error": error }))
            .await;

        Ok(())
    }

    /// Complete the campaign if no sendable work remains.
    ///
    /// A FAILED link with a recorded attempt is exhausted (the queue never
    /// re-publishes failures), so only never-attempted links keep the
    /// campaign open.
    pub async fn check_and_complete_if_done(&self, campaign_id: Uuid) -> Result<()> {
        let Some(campaign) = queries::campaign::get_campaign(&self.pool, campaign_id).await? else {
            debug!("Campaign {} not found", campaign_id);
            return Ok(());
        };

        if !matches!(
            campaign.status,
            CampaignStatus::Running | CampaignStatus::Paused
        ) {
            debug!(
                "Campaign {} is {}, skipping completion check",
                campaign_id, campaign.status
            );
            return Ok(());
        }

        let remaining = queries::campaign_contact::count_remaining(&self.pool, campaign_id).await?;

        info!(
            "Campaign {} completion check: remaining={}, total={}, sent={}, delivered={}, read={}, failed={}, replied={}",
            campaign_id,
            remaining,
            campaign.total_contacts,
            campaign.sent_count,
            campaign.delivered_count,
            campaign.read_count,
            campaign.failed_count,
            campaign.replied_count
        );

        if remaining > 0 {
            return Ok(());
        }

        self.complete_campaign(&campaign).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::types::MessageKind;

    fn campaign_with(status: CampaignStatus, total_contacts: i32) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            name: "Promo".to_string(),
            message_kind: MessageKind::Template,
            template_id: Some(Uuid::new_v4()),
            message_body: None,
            status,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            total_contacts,
            sent_count: 0,
            delivered_count: 0,
            read_count: 0,
            failed_count: 0,
            replied_count: 0,
            messages_per_second: 10,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_start_allowed_from_draft_and_scheduled() {
        assert!(validate_can_start(&campaign_with(CampaignStatus::Draft, 3)).is_ok());
        assert!(validate_can_start(&campaign_with(CampaignStatus::Scheduled, 3)).is_ok());
    }

    #[test]
    fn test_start_rejected_from_active_and_terminal_states() {
        for status in [
            CampaignStatus::Running,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
        ] {
            let err = validate_can_start(&campaign_with(status, 3)).unwrap_err();
            assert!(matches!(err, LifecycleError::InvalidState { .. }), "{:?}", status);
        }
    }

    #[test]
    fn test_start_rejected_without_contacts() {
        let err = validate_can_start(&campaign_with(CampaignStatus::Draft, 0)).unwrap_err();
        assert!(matches!(err, LifecycleError::NoContacts));
    }
}
