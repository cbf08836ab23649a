//! Campaign control handlers
//!
//! Request/reply handlers for starting, pausing and resuming campaigns.
//! Starting and resuming reply as soon as the state transition commits; the
//! task publish and consumer startup continue in a background task, and an
//! error there marks the campaign FAILED instead of crashing the worker.

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use futures::StreamExt;
use tracing::{error, info};
use uuid::Uuid;

use crate::services::campaign::dispatch::CampaignDispatcher;
use crate::services::campaign::lifecycle::LifecycleManager;
use crate::types::{
    CampaignActionRequest, CampaignActionResponse, ErrorResponse, Request, SuccessResponse,
};

/// Handle campaign.start requests
pub async fn handle_start(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    lifecycle: Arc<LifecycleManager>,
    dispatcher: Arc<CampaignDispatcher>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<CampaignActionRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse campaign start request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let campaign_id = request.payload.campaign_id;
        info!("Starting campaign {}", campaign_id);

        match lifecycle.start_campaign(campaign_id).await {
            Ok(_) => {
                feed_and_consume(campaign_id, Arc::clone(&lifecycle), Arc::clone(&dispatcher));

                let response = CampaignActionResponse {
                    campaign_id,
                    status: "running".to_string(),
                };
                let success = SuccessResponse::new(request.id, response);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Failed to start campaign {}: {:#}", campaign_id, e);
                let error = ErrorResponse::new(request.id, "START_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle campaign.pause requests
pub async fn handle_pause(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    lifecycle: Arc<LifecycleManager>,
    dispatcher: Arc<CampaignDispatcher>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<CampaignActionRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse campaign pause request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let campaign_id = request.payload.campaign_id;
        info!("Pausing campaign {}", campaign_id);

        match lifecycle.pause_campaign(campaign_id).await {
            Ok(()) => {
                // The consumer also observes the pause through its own status
                // reads; cancelling here just makes it prompt.
                dispatcher.stop_consumer(&campaign_id);

                let response = CampaignActionResponse {
                    campaign_id,
                    status: "paused".to_string(),
                };
                let success = SuccessResponse::new(request.id, response);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Failed to pause campaign {}: {:#}", campaign_id, e);
                let error = ErrorResponse::new(request.id, "PAUSE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle campaign.resume requests
pub async fn handle_resume(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    lifecycle: Arc<LifecycleManager>,
    dispatcher: Arc<CampaignDispatcher>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<CampaignActionRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse campaign resume request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let campaign_id = request.payload.campaign_id;
        info!("Resuming campaign {}", campaign_id);

        match lifecycle.resume_campaign(campaign_id).await {
            Ok(()) => {
                feed_and_consume(campaign_id, Arc::clone(&lifecycle), Arc::clone(&dispatcher));

                let response = CampaignActionResponse {
                    campaign_id,
                    status: "running".to_string(),
                };
                let success = SuccessResponse::new(request.id, response);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Failed to resume campaign {}: {:#}", campaign_id, e);
                let error = ErrorResponse::new(request.id, "RESUME_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Publish send tasks and start the consumer in the background. A publish
/// failure is the unrecoverable start error: the campaign is marked FAILED.
fn feed_and_consume(
    campaign_id: Uuid,
    lifecycle: Arc<LifecycleManager>,
    dispatcher: Arc<CampaignDispatcher>,
) {
    tokio::spawn(async move {
        match dispatcher.publish_send_tasks(campaign_id).await {
            Ok(published) => {
                info!("Campaign {}: feeding done, {} tasks", campaign_id, published);
                dispatcher.start_consumer(campaign_id);
            }
            Err(e) => {
                error!("Task publish failed for campaign {}: {:#}", campaign_id, e);
                if let Err(fail_err) = lifecycle.fail_campaign(campaign_id, &e.to_string()).await {
                    error!(
                        "Failed to mark campaign {} failed: {:#}",
                        campaign_id, fail_err
                    );
                }
            }
        }
    });
}
