//! Per-campaign delivery progress tracking
//!
//! Trackers are in-memory only. After a worker restart they are rebuilt
//! empty — rate and ETA history is lost, but the durable counters live on
//! the campaign row, so nothing about correctness depends on them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// Live trackers keyed by campaign ID. Owned by the lifecycle manager and
/// handed to collaborators by reference.
pub type TrackerMap = Arc<Mutex<HashMap<Uuid, ProgressTracker>>>;

/// In-memory delivery counters for one running campaign
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    pub campaign_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub batches_processed: u64,
    pub total_sent: u64,
    pub total_failed: u64,
}

impl ProgressTracker {
    pub fn new(campaign_id: Uuid) -> Self {
        Self {
            campaign_id,
            start_time: Utc::now(),
            batches_processed: 0,
            total_sent: 0,
            total_failed: 0,
        }
    }

    pub fn increment_sent(&mut self) {
        self.total_sent += 1;
    }

    pub fn increment_failed(&mut self) {
        self.total_failed += 1;
    }

    pub fn increment_batch(&mut self) {
        self.batches_processed += 1;
    }

    /// Send rate in messages per minute since the campaign started
    pub fn rate_per_minute(&self) -> f64 {
        self.rate_per_minute_at(Utc::now())
    }

    fn rate_per_minute_at(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_seconds = (now - self.start_time).num_milliseconds() as f64 / 1000.0;
        if elapsed_seconds <= 0.0 || self.total_sent == 0 {
            return 0.0;
        }
        (self.total_sent as f64 / elapsed_seconds) * 60.0
    }

    /// Projected completion time for the remaining contacts, or None while
    /// the rate is still unknown.
    pub fn estimate_completion(&self, remaining_contacts: u64) -> Option<DateTime<Utc>> {
        self.estimate_completion_at(remaining_contacts, Utc::now())
    }

    fn estimate_completion_at(
        &self,
        remaining_contacts: u64,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let rate_per_minute = self.rate_per_minute_at(now);
        if rate_per_minute <= 0.0 {
            return None;
        }
        let eta_seconds = (remaining_contacts as f64 / rate_per_minute) * 60.0;
        Some(now + Duration::milliseconds((eta_seconds * 1000.0) as i64))
    }

    /// Seconds since the campaign started
    pub fn elapsed_seconds(&self) -> f64 {
        (Utc::now() - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_started_ago(seconds: i64) -> (ProgressTracker, DateTime<Utc>) {
        let now = Utc::now();
        let tracker = ProgressTracker {
            campaign_id: Uuid::new_v4(),
            start_time: now - Duration::seconds(seconds),
            batches_processed: 0,
            total_sent: 0,
            total_failed: 0,
        };
        (tracker, now)
    }

    #[test]
    fn test_rate_is_zero_before_first_send() {
        let (tracker, now) = tracker_started_ago(60);
        assert_eq!(tracker.rate_per_minute_at(now), 0.0);
    }

    #[test]
    fn test_rate_per_minute() {
        let (mut tracker, now) = tracker_started_ago(60);
        for _ in 0..30 {
            tracker.increment_sent();
        }
        // 30 messages in 60 seconds = 30/min
        let rate = tracker.rate_per_minute_at(now);
        assert!((rate - 30.0).abs() < 0.5);
    }

    #[test]
    fn test_estimate_completion_none_without_rate() {
        let (tracker, now) = tracker_started_ago(60);
        assert!(tracker.estimate_completion_at(100, now).is_none());
    }

    #[test]
    fn test_estimate_completion_scales_with_remaining() {
        let (mut tracker, now) = tracker_started_ago(60);
        for _ in 0..60 {
            tracker.increment_sent();
        }
        // 60/min → 120 remaining should land ~2 minutes out
        let eta = tracker.estimate_completion_at(120, now).unwrap();
        let eta_seconds = (eta - now).num_seconds();
        assert!((115..=125).contains(&eta_seconds), "eta {}s", eta_seconds);
    }

    #[test]
    fn test_counters() {
        let mut tracker = ProgressTracker::new(Uuid::new_v4());
        tracker.increment_sent();
        tracker.increment_sent();
        tracker.increment_failed();
        tracker.increment_batch();

        assert_eq!(tracker.total_sent, 2);
        assert_eq!(tracker.total_failed, 1);
        assert_eq!(tracker.batches_processed, 1);
    }
}
