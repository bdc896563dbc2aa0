use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;
use verity_common::protocol::VerifiedAction;

/// What a subscriber can receive. Exactly one delivery per subscription.
#[derive(Debug)]
pub enum Delivery {
    Action(Box<VerifiedAction>),
    /// A newer subscription for the same user replaced this one.
    Superseded,
}

struct Slot {
    id: u64,
    sender: oneshot::Sender<Delivery>,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-user, single-slot hand-off of verified actions.
///
/// At most one listener per user; publishing with no listener drops the
/// action.
#[derive(Default)]
pub struct SubscriptionBus {
    slots: Slots,
    next_id: AtomicU64,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the listener for `user_id`, superseding any existing one.
    pub fn subscribe(&self, user_id: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = oneshot::channel();

        let previous = lock(&self.slots).insert(user_id.to_string(), Slot { id, sender });
        if let Some(previous) = previous {
            debug!(user_id, "Superseding subscription {}", previous.id);
            let _ = previous.sender.send(Delivery::Superseded);
        }

        Subscription {
            user_id: user_id.to_string(),
            id,
            receiver,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Hand `action` to the current listener for `user_id`.
    ///
    /// Returns whether a listener took it.
    pub fn publish(&self, user_id: &str, action: VerifiedAction) -> bool {
        let slot = lock(&self.slots).remove(user_id);
        match slot {
            Some(slot) => slot.sender.send(Delivery::Action(Box::new(action))).is_ok(),
            None => {
                debug!(user_id, "No subscriber, dropping verified action");
                false
            }
        }
    }

    pub fn has_subscriber(&self, user_id: &str) -> bool {
        lock(&self.slots).contains_key(user_id)
    }

    /// Drop every pending listener. Their waiters observe a closed channel.
    pub fn clear(&self) {
        lock(&self.slots).clear();
    }
}

/// Receiving side of one registration. Dropping it unregisters the slot,
/// unless a newer subscription already took the user over.
pub struct Subscription {
    user_id: String,
    id: u64,
    receiver: oneshot::Receiver<Delivery>,
    slots: Slots,
}

impl Subscription {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn receiver(&mut self) -> &mut oneshot::Receiver<Delivery> {
        &mut self.receiver
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        if slots.get(&self.user_id).is_some_and(|slot| slot.id == self.id) {
            slots.remove(&self.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(tool: &str) -> VerifiedAction {
        let mut action = VerifiedAction::error("test");
        action.tool_name = tool.to_string();
        action
    }

    #[tokio::test]
    async fn publish_reaches_only_matching_user() {
        let bus = SubscriptionBus::new();
        let mut u2 = bus.subscribe("u2");

        assert!(!bus.publish("u1", action("write_cell")));
        assert!(u2.receiver().try_recv().is_err());
        assert!(bus.has_subscriber("u2"));
    }

    #[tokio::test]
    async fn newer_subscription_supersedes_older() {
        let bus = SubscriptionBus::new();
        let mut first = bus.subscribe("u1");
        let mut second = bus.subscribe("u1");

        assert!(matches!(first.receiver().await, Ok(Delivery::Superseded)));

        // dropping the superseded handle leaves the newer slot in place
        drop(first);
        assert!(bus.has_subscriber("u1"));

        assert!(bus.publish("u1", action("write_cell")));
        match second.receiver().await {
            Ok(Delivery::Action(a)) => assert_eq!(a.tool_name, "write_cell"),
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let bus = SubscriptionBus::new();
        let sub = bus.subscribe("u1");
        drop(sub);
        assert!(!bus.has_subscriber("u1"));
        assert!(!bus.publish("u1", action("write_cell")));
    }
}
