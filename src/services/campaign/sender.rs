//! Single-recipient campaign message delivery
//!
//! One call sends one message. Message, link, contact and campaign updates
//! commit as a single transaction, so the counters can never diverge from
//! the recipient's actual state. Per-recipient failures are recorded and
//! swallowed — the queue must not redeliver them, and one bad recipient must
//! never take the campaign down.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::error::SendError;
use crate::services::campaign::lifecycle::LifecycleManager;
use crate::services::meta::{OutboundPayload, ProviderClient};
use crate::services::notify::Notifier;
use crate::types::{Campaign, CampaignStatus, MessageKind};

/// Messages a contact can be messaged again this long after the last one
const MESSAGING_WINDOW_HOURS: i64 = 24;

/// Maximum stored length of a per-recipient error
const ERROR_MESSAGE_MAX_CHARS: usize = 500;

/// What happened to one send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Message accepted by the provider and committed
    Sent,
    /// Nothing to do: stale task, non-running campaign, or already-sent link
    Skipped,
    /// Recipient is inside the messaging window; link rescheduled
    Deferred,
    /// Attempt failed and was recorded on the link
    Failed,
}

/// If the contact was messaged within the window, return when it reopens.
pub(crate) fn defer_until(
    last_message_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let window_end = last_message_at? + Duration::hours(MESSAGING_WINDOW_HOURS);
    (window_end > now).then_some(window_end)
}

/// Error text stored on the link, capped for the column
pub(crate) fn truncate_error(message: &str) -> String {
    message.chars().take(ERROR_MESSAGE_MAX_CHARS).collect()
}

pub struct CampaignSender {
    pool: PgPool,
    provider: Arc<dyn ProviderClient>,
    notifier: Notifier,
    lifecycle: Arc<LifecycleManager>,
}

impl CampaignSender {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn ProviderClient>,
        notifier: Notifier,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            pool,
            provider,
            notifier,
            lifecycle,
        }
    }

    /// Send one campaign message to one recipient.
    ///
    /// Never propagates an error to the task boundary: failures are recorded
    /// on the link and reported through the returned outcome.
    pub async fn send_single_message(
        &self,
        campaign_id: Uuid,
        link_id: Uuid,
        contact_id: Uuid,
    ) -> SendOutcome {
        let outcome = match self.try_send(campaign_id, link_id, contact_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Send to contact {} failed: {:#}", contact_id, e);
                if let Err(record_err) = self.record_failure(campaign_id, link_id, &e).await {
                    error!(
                        "Failed to record send failure for link {}: {:#}",
                        link_id, record_err
                    );
                }
                SendOutcome::Failed
            }
        };

        if let Err(e) = self.lifecycle.check_and_complete_if_done(campaign_id).await {
            warn!("Completion check failed for campaign {}: {:#}", campaign_id, e);
        }

        outcome
    }

    async fn try_send(
        &self,
        campaign_id: Uuid,
        link_id: Uuid,
        contact_id: Uuid,
    ) -> Result<SendOutcome> {
        let mut tx = self.pool.begin().await?;

        let campaign = queries::campaign::get_campaign(&mut *tx, campaign_id).await?;
        let link = queries::campaign_contact::get_link(&mut *tx, link_id).await?;
        let contact = queries::contact::get_contact(&mut *tx, contact_id).await?;

        let (Some(campaign), Some(link), Some(contact)) = (campaign, link, contact) else {
            warn!("Data missing for send task: link {}", link_id);
            return Ok(SendOutcome::Skipped);
        };

        if campaign.status != CampaignStatus::Running {
            info!(
                "Skipping contact {}: campaign is {}",
                contact_id, campaign.status
            );
            return Ok(SendOutcome::Skipped);
        }

        // Idempotency backstop: the queue is at-least-once, so a redelivered
        // task may land on a link that already has an attempt on record.
        if link.status.is_processed() {
            warn!(
                "Contact {} already processed (link status {})",
                contact_id, link.status
            );
            return Ok(SendOutcome::Skipped);
        }

        let now = Utc::now();
        if let Some(until) = defer_until(contact.last_message_at, now) {
            queries::campaign_contact::defer(&mut *tx, link_id, until, now).await?;
            tx.commit().await?;
            info!(
                "Contact {} inside messaging window, deferred until {}",
                contact_id, until
            );
            return Ok(SendOutcome::Deferred);
        }

        let waba_phone = queries::waba::get_default_phone(&mut *tx)
            .await?
            .ok_or_else(|| SendError::Configuration("no WABA phone number configured".into()))?;

        let payload = build_payload(&mut tx, &campaign).await?;

        let message = queries::message::create_pending(
            &mut *tx,
            waba_phone.id,
            contact.id,
            campaign.message_kind,
            payload.body_text(),
            campaign.template_id,
            now,
        )
        .await?;

        let response = self
            .provider
            .send_message(
                &waba_phone.phone_number_id,
                &payload.to_provider_json(&contact.phone_number),
            )
            .await
            .map_err(|e| SendError::Provider(format!("{:#}", e)))?;

        let wamid = response
            .wamid()
            .ok_or_else(|| SendError::Provider("no wamid in provider response".into()))?;

        queries::message::mark_sent(&mut *tx, message.id, wamid, now).await?;
        queries::campaign_contact::mark_sent(&mut *tx, link_id, message.id, now).await?;
        queries::contact::mark_sent(&mut *tx, contact_id, now).await?;
        queries::campaign::increment_sent(&mut *tx, campaign_id).await?;

        tx.commit().await?;

        info!("Message sent to {}, wamid {}", contact.phone_number, wamid);

        let tracker = {
            let mut trackers = self.lifecycle.trackers().lock();
            trackers.get_mut(&campaign_id).map(|tracker| {
                tracker.increment_sent();
                tracker.clone()
            })
        };

        self.notifier
            .notify(
                "message_sent",
                json!({
                    "campaign_id": campaign_id,
                    "contact_id": contact_id,
                    "phone": contact.phone_number,
                    "wamid": wamid,
                }),
            )
            .await;

        // Progress snapshot from a fresh read, so concurrent webhook
        // reconciliation is reflected too
        if let Some(fresh) = queries::campaign::get_campaign(&self.pool, campaign_id).await? {
            let remaining =
                (fresh.total_contacts - fresh.sent_count - fresh.failed_count).max(0) as u64;
            let rate = tracker.as_ref().map(|t| t.rate_per_minute());
            let eta = tracker.as_ref().and_then(|t| t.estimate_completion(remaining));
            self.notifier.campaign_progress(&fresh, rate, eta).await;
        }

        Ok(SendOutcome::Sent)
    }

    async fn record_failure(
        &self,
        campaign_id: Uuid,
        link_id: Uuid,
        error: &anyhow::Error,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let message = truncate_error(&format!("{:#}", error));
        queries::campaign_contact::mark_failed(&mut *tx, link_id, &message, Utc::now()).await?;
        queries::campaign::increment_failed(&mut *tx, campaign_id).await?;

        tx.commit().await?;

        if let Some(tracker) = self.lifecycle.trackers().lock().get_mut(&campaign_id) {
            tracker.increment_failed();
        }

        Ok(())
    }
}

/// Resolve the campaign's message definition into a provider payload
async fn build_payload(
    tx: &mut Transaction<'_, Postgres>,
    campaign: &Campaign,
) -> Result<OutboundPayload> {
    match campaign.message_kind {
        MessageKind::Text => {
            let body = campaign
                .message_body
                .clone()
                .ok_or_else(|| SendError::Validation("text campaign without message body".into()))?;
            Ok(OutboundPayload::Text { body })
        }
        MessageKind::Template => {
            let template_id = campaign.template_id.ok_or_else(|| {
                SendError::Configuration("template campaign without template reference".into())
            })?;
            let template = queries::template::get_template(&mut **tx, template_id)
                .await?
                .ok_or_else(|| {
                    SendError::Configuration(format!("template {} not found", template_id))
                })?;
            Ok(OutboundPayload::Template {
                name: template.name,
                language: template.language,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_contact_is_not_deferred() {
        let now = Utc::now();
        assert_eq!(defer_until(None, now), None);

        let old = now - Duration::hours(30);
        assert_eq!(defer_until(Some(old), now), None);
    }

    #[test]
    fn test_recent_contact_defers_to_window_end() {
        let now = Utc::now();
        let last = now - Duration::hours(10);

        let until = defer_until(Some(last), now).unwrap();
        assert_eq!(until, last + Duration::hours(24));
        assert!(until > now);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let now = Utc::now();
        let last = now - Duration::hours(24);
        assert_eq!(defer_until(Some(last), now), None);
    }

    #[test]
    fn test_error_truncation() {
        let long = "x".repeat(600);
        assert_eq!(truncate_error(&long).chars().count(), 500);

        let short = "timeout talking to provider";
        assert_eq!(truncate_error(short), short);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let wide = "é".repeat(600);
        let truncated = truncate_error(&wide);
        assert_eq!(truncated.chars().count(), 500);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
