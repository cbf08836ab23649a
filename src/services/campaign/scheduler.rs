//! Background campaign sweeps
//!
//! One minute-interval loop with two duties: start campaigns whose scheduled
//! time has passed, and re-run the completion check over every active
//! campaign. The second duty is the safety net for completion signals lost
//! to a crash between a send and its check.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::db::queries;
use crate::services::campaign::dispatch::CampaignDispatcher;
use crate::services::campaign::lifecycle::LifecycleManager;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct CampaignScheduler {
    pool: PgPool,
    lifecycle: Arc<LifecycleManager>,
    dispatcher: Arc<CampaignDispatcher>,
}

impl CampaignScheduler {
    pub fn new(
        pool: PgPool,
        lifecycle: Arc<LifecycleManager>,
        dispatcher: Arc<CampaignDispatcher>,
    ) -> Self {
        Self {
            pool,
            lifecycle,
            dispatcher,
        }
    }

    /// Run the sweep loop forever
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Campaign scheduler started");

        loop {
            ticker.tick().await;

            if let Err(e) = self.start_due_campaigns().await {
                error!("Scheduled campaign sweep failed: {:#}", e);
            }
            if let Err(e) = self.check_active_campaigns().await {
                error!("Completion sweep failed: {:#}", e);
            }
        }
    }

    async fn start_due_campaigns(&self) -> Result<()> {
        let due = queries::campaign::get_scheduled_campaigns(&self.pool, Utc::now()).await?;
        if due.is_empty() {
            return Ok(());
        }

        info!("Found {} scheduled campaigns to start", due.len());

        for campaign in due {
            let campaign_id = campaign.id;
            info!("Starting scheduled campaign {} ({})", campaign_id, campaign.name);

            if let Err(e) = self.lifecycle.start_campaign(campaign_id).await {
                error!("Failed to start scheduled campaign {}: {:#}", campaign_id, e);
                continue;
            }

            match self.dispatcher.publish_send_tasks(campaign_id).await {
                Ok(_) => Arc::clone(&self.dispatcher).start_consumer(campaign_id),
                Err(e) => {
                    error!(
                        "Task publish failed for scheduled campaign {}: {:#}",
                        campaign_id, e
                    );
                    if let Err(fail_err) = self
                        .lifecycle
                        .fail_campaign(campaign_id, &e.to_string())
                        .await
                    {
                        error!(
                            "Failed to mark campaign {} failed: {:#}",
                            campaign_id, fail_err
                        );
                    }
                }
            }
        }

        Ok(())
    }

    async fn check_active_campaigns(&self) -> Result<()> {
        for campaign_id in queries::campaign::get_active_campaign_ids(&self.pool).await? {
            if let Err(e) = self.lifecycle.check_and_complete_if_done(campaign_id).await {
                warn!("Completion check failed for campaign {}: {:#}", campaign_id, e);
            }
        }
        Ok(())
    }
}
