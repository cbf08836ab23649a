//! Campaign send-task dispatch over JetStream
//!
//! The feeder enumerates sendable recipients in bounded pages and publishes
//! one durable work item per recipient to the campaign's subject. A
//! per-campaign pull consumer fetches items in small batches and hands them
//! to the sender under the global rate limiter.
//!
//! Delivery is at-least-once and redelivery-on-failure is deliberately
//! defeated: every item is acked exactly once regardless of send outcome.
//! The sender's already-sent check is the dedup backstop, and failed
//! recipients are retried only by an explicit re-enumeration (resume), never
//! by the queue itself.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::jetstream::{self, consumer::PullConsumer, Context as JsContext};
use async_nats::Client;
use chrono::Utc;
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::services::campaign::lifecycle::LifecycleManager;
use crate::services::campaign::registry::{ConsumerGuard, ConsumerRegistry};
use crate::services::campaign::sender::CampaignSender;
use crate::services::rate_limit::SendRateLimiter;
use crate::types::{CampaignStatus, SendTask};

// Stream and subject names
const STREAM_NAME: &str = "WASEND_CAMPAIGNS";
const SUBJECT_PREFIX: &str = "campaigns.send";

const FEED_PAGE_SIZE: i64 = 100;
const FETCH_BATCH_SIZE: usize = 10;
const FETCH_EXPIRY: Duration = Duration::from_secs(1);
const EMPTY_FETCHES_BEFORE_CHECK: u32 = 3;

/// Per-campaign delivery subject
pub fn send_subject(campaign_id: Uuid) -> String {
    format!("{}.{}", SUBJECT_PREFIX, campaign_id)
}

fn durable_name(campaign_id: Uuid) -> String {
    format!("campaign-sender-{}", campaign_id)
}

/// Whether the consumer keeps pulling after a task
enum TaskFlow {
    Continue,
    Halt,
}

pub struct CampaignDispatcher {
    js: JsContext,
    pool: PgPool,
    sender: Arc<CampaignSender>,
    lifecycle: Arc<LifecycleManager>,
    limiter: Arc<SendRateLimiter>,
    consumers: ConsumerRegistry,
}

impl CampaignDispatcher {
    /// Create the dispatcher, initializing the JetStream work-queue stream
    pub async fn new(
        client: Client,
        pool: PgPool,
        sender: Arc<CampaignSender>,
        lifecycle: Arc<LifecycleManager>,
        limiter: Arc<SendRateLimiter>,
    ) -> Result<Self> {
        let js = jetstream::new(client);

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![format!("{}.>", SUBJECT_PREFIX)],
            max_messages: 1_000_000,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };

        js.get_or_create_stream(stream_config).await?;
        info!("JetStream stream '{}' ready", STREAM_NAME);

        Ok(Self {
            js,
            pool,
            sender,
            lifecycle,
            limiter,
            consumers: ConsumerRegistry::default(),
        })
    }

    /// Enumerate sendable recipients in pages and publish one task each.
    ///
    /// The campaign status is re-read from the database before every page,
    /// so a pause issued concurrently stops publishing within one page.
    pub async fn publish_send_tasks(&self, campaign_id: Uuid) -> Result<u64> {
        let subject = send_subject(campaign_id);
        let mut offset: i64 = 0;

        loop {
            match queries::campaign::get_campaign_status(&self.pool, campaign_id).await? {
                Some(CampaignStatus::Running) => {}
                status => {
                    info!(
                        "Halting task publish for campaign {}: status {:?}",
                        campaign_id, status
                    );
                    break;
                }
            }

            let links = queries::campaign_contact::get_sendable_contacts(
                &self.pool,
                campaign_id,
                Utc::now(),
                FEED_PAGE_SIZE,
                offset,
            )
            .await?;

            if links.is_empty() {
                break;
            }

            for link in &links {
                let task = SendTask {
                    campaign_id,
                    link_id: link.id,
                    contact_id: link.contact_id,
                };
                let payload = serde_json::to_vec(&task)?;
                self.js.publish(subject.clone(), payload.into()).await?.await?;
            }

            offset += links.len() as i64;
        }

        info!("Campaign {}: {} send tasks published", campaign_id, offset);
        Ok(offset as u64)
    }

    /// Start (or restart) the pull consumer task for a campaign
    pub fn start_consumer(self: Arc<Self>, campaign_id: Uuid) {
        let guard = self.consumers.register(campaign_id);
        let dispatcher = self;

        tokio::spawn(async move {
            if let Err(e) = dispatcher.run_consumer(campaign_id, &guard).await {
                error!("Consumer for campaign {} errored: {:#}", campaign_id, e);
            }

            // Final completion check when the consumer exits
            if let Err(e) = dispatcher
                .lifecycle
                .check_and_complete_if_done(campaign_id)
                .await
            {
                warn!(
                    "Final completion check failed for campaign {}: {:#}",
                    campaign_id, e
                );
            }

            drop(guard);
        });
    }

    /// Cancel the campaign's consumer (pause). In-flight sends finish.
    pub fn stop_consumer(&self, campaign_id: &Uuid) -> bool {
        let stopped = self.consumers.cancel(campaign_id);
        if stopped {
            info!("Stopped consumer for campaign {}", campaign_id);
        }
        stopped
    }

    async fn run_consumer(&self, campaign_id: Uuid, guard: &ConsumerGuard) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let durable = durable_name(campaign_id);
        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(durable.clone()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            filter_subject: send_subject(campaign_id),
            ..Default::default()
        };

        let consumer: PullConsumer = stream
            .get_or_create_consumer(&durable, consumer_config)
            .await?;
        info!("Pull consumer for campaign {} ready", campaign_id);

        let token = guard.token();
        let mut empty_fetches: u32 = 0;

        // Cancellation is checked between fetches; a fetch in progress is
        // allowed to drain so no pulled message is left unacked longer than
        // one batch.
        while !token.is_cancelled() {
            let batch = consumer
                .batch()
                .max_messages(FETCH_BATCH_SIZE)
                .expires(FETCH_EXPIRY)
                .messages()
                .await;

            let mut messages = match batch {
                Ok(messages) => messages,
                Err(e) => {
                    error!("Error fetching campaign {} tasks: {}", campaign_id, e);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            let mut received = 0u32;
            let mut halt = false;

            while let Some(item) = messages.next().await {
                let message = match item {
                    Ok(message) => message,
                    Err(e) => {
                        error!("Error receiving campaign {} task: {}", campaign_id, e);
                        break;
                    }
                };
                received += 1;

                match self.process_task(campaign_id, message).await {
                    TaskFlow::Continue => {}
                    TaskFlow::Halt => {
                        halt = true;
                        break;
                    }
                }
            }

            if halt {
                break;
            }

            if received == 0 {
                empty_fetches += 1;
                if empty_fetches >= EMPTY_FETCHES_BEFORE_CHECK {
                    if let Err(e) = self.lifecycle.check_and_complete_if_done(campaign_id).await {
                        warn!("Completion check failed for campaign {}: {:#}", campaign_id, e);
                    }
                    empty_fetches = 0;
                }
            } else {
                empty_fetches = 0;
                if let Some(tracker) = self.lifecycle.trackers().lock().get_mut(&campaign_id) {
                    tracker.increment_batch();
                }
            }
        }

        info!("Consumer for campaign {} stopped", campaign_id);
        Ok(())
    }

    /// Handle one pulled task. Always acks; all errors are contained here so
    /// a transient failure never kills the consumer.
    async fn process_task(&self, campaign_id: Uuid, message: jetstream::Message) -> TaskFlow {
        let task: SendTask = match serde_json::from_slice(&message.payload) {
            Ok(task) => task,
            Err(e) => {
                warn!("Discarding malformed send task: {}", e);
                ack(&message, campaign_id).await;
                return TaskFlow::Continue;
            }
        };

        // Fresh status read so a pause from another process is observed
        let status = match queries::campaign::get_campaign_status(&self.pool, task.campaign_id).await
        {
            Ok(status) => status,
            Err(e) => {
                // Leave unacked: the queue redelivers it once the DB is back
                error!("Status check failed for campaign {}: {:#}", campaign_id, e);
                return TaskFlow::Continue;
            }
        };

        match status {
            None => {
                debug!("Campaign {} not found, discarding task", task.campaign_id);
                ack(&message, campaign_id).await;
                TaskFlow::Continue
            }
            Some(CampaignStatus::Paused) => {
                debug!("Halting consumer; campaign {} is paused", task.campaign_id);
                ack(&message, campaign_id).await;
                TaskFlow::Halt
            }
            Some(CampaignStatus::Running) => {
                self.limiter.acquire().await;
                let outcome = self
                    .sender
                    .send_single_message(task.campaign_id, task.link_id, task.contact_id)
                    .await;
                debug!(
                    "Send task for link {} finished: {:?}",
                    task.link_id, outcome
                );
                ack(&message, campaign_id).await;
                TaskFlow::Continue
            }
            Some(status) => {
                // Completed/failed campaigns keep draining so the work queue
                // empties out
                debug!(
                    "Skipping task; campaign {} is {}",
                    task.campaign_id, status
                );
                ack(&message, campaign_id).await;
                TaskFlow::Continue
            }
        }
    }
}

async fn ack(message: &jetstream::Message, campaign_id: Uuid) {
    if let Err(e) = message.ack().await {
        error!("Failed to ack task for campaign {}: {:?}", campaign_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_per_campaign() {
        let id = Uuid::nil();
        assert_eq!(
            send_subject(id),
            "campaigns.send.00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_stream_names() {
        assert_eq!(STREAM_NAME, "WASEND_CAMPAIGNS");
        assert!(send_subject(Uuid::nil()).starts_with(SUBJECT_PREFIX));
    }

    #[test]
    fn test_durable_name_is_stable_per_campaign() {
        let id = Uuid::new_v4();
        assert_eq!(durable_name(id), durable_name(id));
        assert!(durable_name(id).starts_with("campaign-sender-"));
    }
}
