//! Campaign statistics reconciliation
//!
//! Consumes asynchronous delivery-status events and keeps the campaign
//! counters consistent with the per-recipient link states. Status webhooks
//! arrive in any order and may repeat; every transition is decided against
//! the link's current status, never against arrival order, and counter
//! decrements are floored at zero.
//!
//! All functions here run inside the caller's transaction and never commit.

use anyhow::Result;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::queries;
use crate::types::{CounterDelta, DeliveryStatus, MessageStatus};

/// Planned effect of one event on a delivery link and its campaign counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub link_status: DeliveryStatus,
    pub delta: CounterDelta,
}

/// Decide how a provider status event changes the link. Returns None when
/// the event must be ignored.
///
/// REPLIED is absorbing: provider echoes arriving after a reply never
/// overwrite it. DELIVERED never downgrades a link already at READ or
/// FAILED. FAILED does not decrement the displaced counter — the link's
/// previous status is already overwritten by the time the event lands, so
/// the counters are approximate by design.
pub fn plan_status_transition(
    current: DeliveryStatus,
    incoming: MessageStatus,
) -> Option<TransitionPlan> {
    if current == DeliveryStatus::Replied {
        return None;
    }

    match incoming {
        MessageStatus::Delivered => {
            if matches!(current, DeliveryStatus::Read | DeliveryStatus::Failed) {
                return None;
            }
            Some(TransitionPlan {
                link_status: DeliveryStatus::Delivered,
                delta: CounterDelta {
                    delivered: 1,
                    sent: -1,
                    ..Default::default()
                },
            })
        }
        MessageStatus::Read => Some(TransitionPlan {
            link_status: DeliveryStatus::Read,
            delta: CounterDelta {
                read: 1,
                delivered: -1,
                ..Default::default()
            },
        }),
        MessageStatus::Failed => Some(TransitionPlan {
            link_status: DeliveryStatus::Failed,
            delta: CounterDelta {
                failed: 1,
                ..Default::default()
            },
        }),
        _ => None,
    }
}

/// Decide the effect of an inbound reply on the link. The reply displaces a
/// known counter (the link's current status), so this path decrements
/// precisely before absorbing the link into REPLIED.
pub fn plan_reply_transition(current: DeliveryStatus) -> Option<TransitionPlan> {
    if current == DeliveryStatus::Replied {
        return None;
    }

    let mut delta = CounterDelta {
        replied: 1,
        ..Default::default()
    };
    match current {
        DeliveryStatus::Read => delta.read = -1,
        DeliveryStatus::Delivered => delta.delivered = -1,
        DeliveryStatus::Sent => delta.sent = -1,
        _ => {}
    }

    Some(TransitionPlan {
        link_status: DeliveryStatus::Replied,
        delta,
    })
}

/// Apply a provider status change for a message within the caller's
/// transaction. Messages without a campaign link are ignored.
pub async fn update_on_status_change(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
    new_status: MessageStatus,
) -> Result<()> {
    let Some(link) = queries::campaign_contact::get_link_by_message_id(&mut **tx, message_id).await?
    else {
        return Ok(());
    };

    let Some(plan) = plan_status_transition(link.status, new_status) else {
        return Ok(());
    };

    queries::campaign_contact::set_status(&mut **tx, link.id, plan.link_status).await?;
    queries::campaign::adjust_counters(&mut **tx, link.campaign_id, &plan.delta).await?;

    Ok(())
}

/// Absorb an inbound reply into the contact's most recent campaign link
/// within the caller's transaction.
pub async fn mark_replied(tx: &mut Transaction<'_, Postgres>, contact_id: Uuid) -> Result<()> {
    let Some(message) =
        queries::message::latest_campaign_outbound_for_contact(&mut **tx, contact_id).await?
    else {
        return Ok(());
    };

    let Some(link) =
        queries::campaign_contact::get_link_by_message_id(&mut **tx, message.id).await?
    else {
        return Ok(());
    };

    let Some(plan) = plan_reply_transition(link.status) else {
        return Ok(());
    };

    queries::campaign_contact::set_status(&mut **tx, link.id, plan.link_status).await?;
    queries::campaign::adjust_counters(&mut **tx, link.campaign_id, &plan.delta).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Campaign counters with the floor-at-zero rule, for walking event
    /// sequences through the planner.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct Counters {
        sent: i32,
        delivered: i32,
        read: i32,
        failed: i32,
        replied: i32,
    }

    impl Counters {
        fn apply(&mut self, delta: &CounterDelta) {
            self.sent = (self.sent + delta.sent).max(0);
            self.delivered = (self.delivered + delta.delivered).max(0);
            self.read = (self.read + delta.read).max(0);
            self.failed = (self.failed + delta.failed).max(0);
            self.replied = (self.replied + delta.replied).max(0);
        }

        fn all_non_negative(&self) -> bool {
            self.sent >= 0
                && self.delivered >= 0
                && self.read >= 0
                && self.failed >= 0
                && self.replied >= 0
        }
    }

    fn walk(start: DeliveryStatus, sent_count: i32, events: &[MessageStatus]) -> (DeliveryStatus, Counters) {
        let mut status = start;
        let mut counters = Counters {
            sent: sent_count,
            ..Default::default()
        };
        for &event in events {
            if let Some(plan) = plan_status_transition(status, event) {
                status = plan.link_status;
                counters.apply(&plan.delta);
            }
        }
        (status, counters)
    }

    #[test]
    fn test_delivered_moves_sent_to_delivered() {
        let (status, counters) = walk(DeliveryStatus::Sent, 1, &[MessageStatus::Delivered]);
        assert_eq!(status, DeliveryStatus::Delivered);
        assert_eq!(counters.sent, 0);
        assert_eq!(counters.delivered, 1);
    }

    #[test]
    fn test_delivered_does_not_downgrade_read() {
        assert!(plan_status_transition(DeliveryStatus::Read, MessageStatus::Delivered).is_none());
        assert!(plan_status_transition(DeliveryStatus::Failed, MessageStatus::Delivered).is_none());
    }

    #[test]
    fn test_replied_is_absorbing() {
        assert!(plan_status_transition(DeliveryStatus::Replied, MessageStatus::Delivered).is_none());
        assert!(plan_status_transition(DeliveryStatus::Replied, MessageStatus::Read).is_none());
        assert!(plan_status_transition(DeliveryStatus::Replied, MessageStatus::Failed).is_none());
        assert!(plan_reply_transition(DeliveryStatus::Replied).is_none());
    }

    #[test]
    fn test_sent_and_pending_events_are_ignored() {
        assert!(plan_status_transition(DeliveryStatus::Sent, MessageStatus::Sent).is_none());
        assert!(plan_status_transition(DeliveryStatus::Sent, MessageStatus::Pending).is_none());
    }

    #[test]
    fn test_failed_increments_without_decrement() {
        let plan = plan_status_transition(DeliveryStatus::Delivered, MessageStatus::Failed).unwrap();
        assert_eq!(plan.link_status, DeliveryStatus::Failed);
        assert_eq!(
            plan.delta,
            CounterDelta {
                failed: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_out_of_order_read_before_delivered() {
        // `read` lands first; the late `delivered` must not pull the link back
        let (status, counters) = walk(
            DeliveryStatus::Sent,
            1,
            &[MessageStatus::Read, MessageStatus::Delivered],
        );
        assert_eq!(status, DeliveryStatus::Read);
        assert_eq!(counters.read, 1);
        assert_eq!(counters.delivered, 0);
        assert!(counters.all_non_negative());
    }

    #[test]
    fn test_duplicate_delivered_keeps_lattice_position() {
        // A repeated `delivered` webhook finds the link already at DELIVERED.
        // The sent counter is floored at zero and the link never moves
        // backwards; the delivered counter may overcount, which is the
        // documented approximation.
        let (status, counters) = walk(
            DeliveryStatus::Sent,
            1,
            &[MessageStatus::Delivered, MessageStatus::Delivered],
        );
        assert_eq!(status, DeliveryStatus::Delivered);
        assert_eq!(counters.sent, 0);
        assert!(counters.all_non_negative());
    }

    #[test]
    fn test_counters_stay_non_negative_for_any_sequence() {
        let events = [
            MessageStatus::Read,
            MessageStatus::Failed,
            MessageStatus::Delivered,
            MessageStatus::Read,
            MessageStatus::Failed,
        ];
        // Exhaustive-ish: every start state, the full hostile sequence
        for start in [
            DeliveryStatus::Queued,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Read,
            DeliveryStatus::Failed,
            DeliveryStatus::Replied,
        ] {
            let (_, counters) = walk(start, 0, &events);
            assert!(counters.all_non_negative(), "start={:?}", start);
        }
    }

    #[test]
    fn test_promo_campaign_counter_walk() {
        // Three recipients sent; recipient #2 then reports delivered, read.
        let mut counters = Counters {
            sent: 3,
            ..Default::default()
        };
        let mut link2 = DeliveryStatus::Sent;

        let plan = plan_status_transition(link2, MessageStatus::Delivered).unwrap();
        link2 = plan.link_status;
        counters.apply(&plan.delta);
        assert_eq!((counters.sent, counters.delivered, counters.read), (2, 1, 0));

        let plan = plan_status_transition(link2, MessageStatus::Read).unwrap();
        link2 = plan.link_status;
        counters.apply(&plan.delta);
        assert_eq!((counters.sent, counters.delivered, counters.read), (2, 0, 1));
        assert_eq!(link2, DeliveryStatus::Read);
    }

    #[test]
    fn test_reply_decrements_displaced_counter() {
        let plan = plan_reply_transition(DeliveryStatus::Delivered).unwrap();
        assert_eq!(plan.link_status, DeliveryStatus::Replied);
        assert_eq!(
            plan.delta,
            CounterDelta {
                replied: 1,
                delivered: -1,
                ..Default::default()
            }
        );

        let plan = plan_reply_transition(DeliveryStatus::Queued).unwrap();
        assert_eq!(
            plan.delta,
            CounterDelta {
                replied: 1,
                ..Default::default()
            }
        );
    }
}
