//! Per-campaign consumer registry
//!
//! Tracks the cancellation token of each campaign's active queue consumer so
//! a pause can stop it cooperatively. Cancellation is observed between queue
//! fetches, never mid-send: an in-flight delivery always finishes and
//! commits.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct ConsumerEntry {
    generation: u64,
    token: CancellationToken,
}

/// RAII guard held by a running consumer task. Dropping it removes the
/// registry entry, unless a newer consumer has already replaced it.
pub struct ConsumerGuard {
    campaign_id: Uuid,
    generation: u64,
    token: CancellationToken,
    registry: ConsumerRegistry,
}

impl ConsumerGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.registry.remove_if_current(self.campaign_id, self.generation);
    }
}

/// Thread-safe registry of active campaign consumers
#[derive(Clone, Default)]
pub struct ConsumerRegistry {
    consumers: Arc<Mutex<HashMap<Uuid, ConsumerEntry>>>,
    next_generation: Arc<Mutex<u64>>,
}

impl ConsumerRegistry {
    /// Register a consumer for `campaign_id`, cancelling any previous one
    /// (a resume replaces the paused consumer's entry).
    pub fn register(&self, campaign_id: Uuid) -> ConsumerGuard {
        let generation = {
            let mut next = self.next_generation.lock();
            *next += 1;
            *next
        };
        let token = CancellationToken::new();

        let previous = self.consumers.lock().insert(
            campaign_id,
            ConsumerEntry {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        ConsumerGuard {
            campaign_id,
            generation,
            token,
            registry: self.clone(),
        }
    }

    /// Cancel the active consumer. Returns false if none is registered.
    pub fn cancel(&self, campaign_id: &Uuid) -> bool {
        match self.consumers.lock().get(campaign_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// True while a non-cancelled consumer is registered
    pub fn is_active(&self, campaign_id: &Uuid) -> bool {
        self.consumers
            .lock()
            .get(campaign_id)
            .is_some_and(|entry| !entry.token.is_cancelled())
    }

    fn remove_if_current(&self, campaign_id: Uuid, generation: u64) {
        let mut consumers = self.consumers.lock();
        if consumers
            .get(&campaign_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            consumers.remove(&campaign_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_cancel() {
        let registry = ConsumerRegistry::default();
        let campaign_id = Uuid::new_v4();

        let guard = registry.register(campaign_id);
        assert!(registry.is_active(&campaign_id));
        assert!(!guard.token().is_cancelled());

        assert!(registry.cancel(&campaign_id));
        assert!(guard.token().is_cancelled());
        assert!(!registry.is_active(&campaign_id));
    }

    #[test]
    fn test_cancel_unknown_returns_false() {
        let registry = ConsumerRegistry::default();
        assert!(!registry.cancel(&Uuid::new_v4()));
    }

    #[test]
    fn test_register_replaces_and_cancels_previous() {
        let registry = ConsumerRegistry::default();
        let campaign_id = Uuid::new_v4();

        let first = registry.register(campaign_id);
        let second = registry.register(campaign_id);

        // The stale consumer is cancelled, the new one is live
        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());
        assert!(registry.is_active(&campaign_id));
    }

    #[test]
    fn test_guard_drop_removes_entry() {
        let registry = ConsumerRegistry::default();
        let campaign_id = Uuid::new_v4();

        {
            let _guard = registry.register(campaign_id);
            assert!(registry.is_active(&campaign_id));
        }
        assert!(!registry.is_active(&campaign_id));
        assert!(!registry.cancel(&campaign_id));
    }

    #[test]
    fn test_stale_guard_drop_keeps_replacement() {
        let registry = ConsumerRegistry::default();
        let campaign_id = Uuid::new_v4();

        let first = registry.register(campaign_id);
        let second = registry.register(campaign_id);
        drop(first);

        // Dropping the replaced consumer's guard must not evict the new one
        assert!(registry.is_active(&campaign_id));
        drop(second);
        assert!(!registry.is_active(&campaign_id));
    }
}
