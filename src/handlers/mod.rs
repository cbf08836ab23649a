//! NATS message handlers

pub mod campaigns;
pub mod status;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::services::campaign::dispatch::CampaignDispatcher;
use crate::services::campaign::lifecycle::LifecycleManager;
use crate::services::campaign::scheduler::CampaignScheduler;
use crate::services::campaign::sender::CampaignSender;
use crate::services::meta::{MetaClient, ProviderClient};
use crate::services::notify::Notifier;
use crate::services::rate_limit::SendRateLimiter;

/// Start all message handlers
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    // Shared services
    let provider: Arc<dyn ProviderClient> = Arc::new(MetaClient::new(
        &config.meta_api_url,
        &config.meta_access_token,
    ));
    let notifier = Notifier::new(client.clone());
    let lifecycle = Arc::new(LifecycleManager::new(pool.clone(), notifier.clone()));
    let limiter = Arc::new(SendRateLimiter::new(config.send_rate_per_second));
    let sender = Arc::new(CampaignSender::new(
        pool.clone(),
        provider,
        notifier.clone(),
        Arc::clone(&lifecycle),
    ));
    let dispatcher = Arc::new(
        CampaignDispatcher::new(
            client.clone(),
            pool.clone(),
            sender,
            Arc::clone(&lifecycle),
            limiter,
        )
        .await?,
    );

    // Subscribe to all subjects
    let campaign_start_sub = client.subscribe("wasend.campaign.start").await?;
    let campaign_pause_sub = client.subscribe("wasend.campaign.pause").await?;
    let campaign_resume_sub = client.subscribe("wasend.campaign.resume").await?;
    let webhook_status_sub = client.subscribe("wasend.webhook.status").await?;
    let webhook_reply_sub = client.subscribe("wasend.webhook.reply").await?;

    info!("Subscribed to NATS subjects");

    // Clone for each handler
    let client_start = client.clone();
    let client_pause = client.clone();
    let client_resume = client.clone();
    let client_status = client.clone();
    let client_reply = client.clone();

    let lifecycle_start = Arc::clone(&lifecycle);
    let lifecycle_pause = Arc::clone(&lifecycle);
    let lifecycle_resume = Arc::clone(&lifecycle);

    let dispatcher_start = Arc::clone(&dispatcher);
    let dispatcher_pause = Arc::clone(&dispatcher);
    let dispatcher_resume = Arc::clone(&dispatcher);

    let pool_status = pool.clone();
    let pool_reply = pool.clone();
    let notifier_status = notifier.clone();

    // Background sweeps (scheduled starts + completion safety net)
    let scheduler = CampaignScheduler::new(pool.clone(), Arc::clone(&lifecycle), Arc::clone(&dispatcher));
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run().await;
    });

    // Spawn handlers
    let campaign_start_handle = tokio::spawn(async move {
        campaigns::handle_start(client_start, campaign_start_sub, lifecycle_start, dispatcher_start)
            .await
    });

    let campaign_pause_handle = tokio::spawn(async move {
        campaigns::handle_pause(client_pause, campaign_pause_sub, lifecycle_pause, dispatcher_pause)
            .await
    });

    let campaign_resume_handle = tokio::spawn(async move {
        campaigns::handle_resume(
            client_resume,
            campaign_resume_sub,
            lifecycle_resume,
            dispatcher_resume,
        )
        .await
    });

    let webhook_status_handle = tokio::spawn(async move {
        status::handle_status_events(client_status, webhook_status_sub, pool_status, notifier_status)
            .await
    });

    let webhook_reply_handle = tokio::spawn(async move {
        status::handle_reply_events(client_reply, webhook_reply_sub, pool_reply).await
    });

    info!("All handlers running");

    // If any handler exits, log it and shut down
    select! {
        result = campaign_start_handle => {
            error!("Campaign start handler finished: {:?}", result);
        }
        result = campaign_pause_handle => {
            error!("Campaign pause handler finished: {:?}", result);
        }
        result = campaign_resume_handle => {
            error!("Campaign resume handler finished: {:?}", result);
        }
        result = webhook_status_handle => {
            error!("Webhook status handler finished: {:?}", result);
        }
        result = webhook_reply_handle => {
            error!("Webhook reply handler finished: {:?}", result);
        }
        result = scheduler_handle => {
            error!("Campaign scheduler finished: {:?}", result);
        }
    }

    Ok(())
}
