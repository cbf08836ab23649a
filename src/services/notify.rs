//! Real-time UI notifications
//!
//! Events are published to a single core NATS subject; a gateway outside this
//! worker fans them out to connected clients. Publishing is fire-and-forget
//! and happens strictly after the database commit it reports, so a slow or
//! unavailable transport can never hold up delivery state.

use async_nats::Client;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::types::Campaign;

/// Subject all UI events are published to
pub const EVENTS_SUBJECT: &str = "wasend.events";

#[derive(Clone)]
pub struct Notifier {
    client: Client,
}

impl Notifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Publish one event. Errors are logged and swallowed.
    pub async fn notify(&self, event: &str, data: Value) {
        let envelope = json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now(),
        });

        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize '{}' notification: {}", event, e);
                return;
            }
        };

        if let Err(e) = self.client.publish(EVENTS_SUBJECT, payload.into()).await {
            warn!("Failed to publish '{}' notification: {}", event, e);
        }
    }

    /// Campaign status change (running/paused/completed/failed)
    pub async fn campaign_status(&self, campaign_id: Uuid, status: &str, mut data: Value) {
        if let Some(map) = data.as_object_mut() {
            map.insert("campaign_id".to_string(), json!(campaign_id));
            map.insert("status".to_string(), json!(status));
        }
        self.notify("campaign_status", data).await;
    }

    /// Delivery progress snapshot after a send attempt
    pub async fn campaign_progress(
        &self,
        campaign: &Campaign,
        rate_per_minute: Option<f64>,
        estimated_completion: Option<DateTime<Utc>>,
    ) {
        let progress = if campaign.total_contacts > 0 {
            (campaign.sent_count as f64 / campaign.total_contacts as f64) * 100.0
        } else {
            0.0
        };

        self.notify(
            "campaign_progress",
            json!({
                "campaign_id": campaign.id,
                "total": campaign.total_contacts,
                "sent": campaign.sent_count,
                "delivered": campaign.delivered_count,
                "failed": campaign.failed_count,
                "progress": (progress * 100.0).round() / 100.0,
                "rate_per_minute": rate_per_minute.map(|rate| (rate * 100.0).round() / 100.0),
                "estimated_completion": estimated_completion,
            }),
        )
        .await;
    }
}
