#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::time::Instant;

use dashmap::DashMap;

/// One registered interest.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Identifier, `<client id>.s.<ordinal>`
    pub id: String,
    /// Ordinal the identifier was derived from
    pub ordinal: u64,
    /// Filter expression, opaque to this client. Empty matches everything the server allows.
    pub matcher: String,
    /// Durable name, if the interest should outlive the session
    pub durable: Option<String>,
    /// True from creation until the server confirms the subscription
    pub pending: bool,
    /// When the subscription was requested
    pub created_at: Instant,
}

impl Subscription {
    /// A new subscription awaiting confirmation.
    #[must_use]
    pub fn pending(client_id: &str, ordinal: u64, matcher: &str, durable: Option<&str>) -> Self {
        Self {
            id: subscription_id(client_id, ordinal),
            ordinal,
            matcher: matcher.to_owned(),
            durable: durable
                .filter(|name| !name.is_empty())
                .map(ToOwned::to_owned),
            pending: true,
            created_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn confirmed(mut self) -> Self {
        self.pending = false;
        self
    }

    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }
}

/// Build a subscription identifier from the client id and an ordinal.
#[must_use]
pub fn subscription_id(client_id: &str, ordinal: u64) -> String {
    format!("{client_id}.s.{ordinal}")
}

/// Confirmed subscriptions of one connection, keyed by identifier.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    active_subs: DashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription, replacing any entry with the same identifier.
    pub fn add(&self, subscription: Subscription) {
        #[cfg(feature = "tracing")]
        tracing::debug!(id = %subscription.id, "Registering subscription");

        self.active_subs
            .insert(subscription.id.clone(), subscription);
    }

    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<Subscription> {
        self.active_subs.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Subscription> {
        self.active_subs.remove(id).map(|(_, subscription)| subscription)
    }

    /// Snapshot of every subscription, in the order they were requested.
    #[must_use]
    pub fn all(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = self
            .active_subs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        // Ordinals come from a per-connection monotonic counter, so they reflect insertion order.
        subscriptions.sort_by_key(|subscription| subscription.ordinal);
        subscriptions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active_subs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_subs.is_empty()
    }
}
