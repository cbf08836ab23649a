//! Webhook-relayed delivery status and reply handlers
//!
//! The webhook ingest layer verifies and parses provider callbacks, then
//! relays them over NATS. These handlers apply them to the message rows and
//! campaign counters. Both are plain subscribers: webhook events carry no
//! reply subject.

use anyhow::Result;
use async_nats::Client;
use futures::StreamExt;
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, error};

use crate::db::queries;
use crate::services::campaign::stats;
use crate::services::notify::Notifier;
use crate::types::{MessageStatus, ReplyEvent, StatusEventBatch};

/// Map a provider status string onto the message status enum
fn map_provider_status(status: &str) -> Option<MessageStatus> {
    match status {
        "sent" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "read" => Some(MessageStatus::Read),
        "failed" => Some(MessageStatus::Failed),
        _ => None,
    }
}

/// Handle webhook.status events
pub async fn handle_status_events(
    _client: Client,
    mut subscriber: async_nats::Subscriber,
    pool: PgPool,
    notifier: Notifier,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let batch: StatusEventBatch = match serde_json::from_slice(&msg.payload) {
            Ok(batch) => batch,
            Err(e) => {
                error!("Failed to parse status event batch: {}", e);
                continue;
            }
        };

        if let Err(e) = process_status_batch(&pool, &notifier, &batch).await {
            error!("Failed to process status batch: {:#}", e);
        }
    }

    Ok(())
}

/// Apply one batch of status updates in a single transaction, then notify.
async fn process_status_batch(
    pool: &PgPool,
    notifier: &Notifier,
    batch: &StatusEventBatch,
) -> Result<()> {
    let mut notifications = Vec::new();
    let mut tx = pool.begin().await?;

    for event in &batch.statuses {
        let Some(new_status) = map_provider_status(&event.status) else {
            debug!("Ignoring unknown provider status '{}'", event.status);
            continue;
        };

        let Some(message) = queries::message::get_by_wamid(&mut *tx, &event.wamid).await? else {
            debug!("No message for wamid {}", event.wamid);
            continue;
        };

        // Out-of-order webhooks never move a message backwards
        if !new_status.is_newer_than(message.status) {
            continue;
        }

        queries::message::set_status(&mut *tx, message.id, new_status).await?;
        stats::update_on_status_change(&mut tx, message.id, new_status).await?;

        notifications.push(json!({
            "message_id": message.id,
            "wamid": event.wamid,
            "status": event.status,
            "contact_id": message.contact_id,
        }));
    }

    tx.commit().await?;

    // Notifications go out strictly after the commit
    for data in notifications {
        notifier.notify("message_status", data).await;
    }

    Ok(())
}

/// Handle webhook.reply events: absorb the reply into the contact's most
/// recent campaign link.
pub async fn handle_reply_events(
    _client: Client,
    mut subscriber: async_nats::Subscriber,
    pool: PgPool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let event: ReplyEvent = match serde_json::from_slice(&msg.payload) {
            Ok(event) => event,
            Err(e) => {
                error!("Failed to parse reply event: {}", e);
                continue;
            }
        };

        let result: Result<()> = async {
            let mut tx = pool.begin().await?;
            stats::mark_replied(&mut tx, event.contact_id).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!(
                "Failed to process reply from contact {}: {:#}",
                event.contact_id, e
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(map_provider_status("sent"), Some(MessageStatus::Sent));
        assert_eq!(map_provider_status("delivered"), Some(MessageStatus::Delivered));
        assert_eq!(map_provider_status("read"), Some(MessageStatus::Read));
        assert_eq!(map_provider_status("failed"), Some(MessageStatus::Failed));
        assert_eq!(map_provider_status("warning"), None);
        assert_eq!(map_provider_status(""), None);
    }
}
