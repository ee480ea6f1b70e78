//! Subscription registry (§3 DATA MODEL "Subscription", §4.3).

use std::collections::HashMap;

use serde_json::Value;

use crate::error::CompletionError;
use crate::message::Message;

/// Acknowledgement mode negotiated at subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    None,
}

impl AckMode {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Client => "client",
            Self::None => "none",
        }
    }
}

/// Durable subscription variant (GLOSSARY "Durable").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurableType {
    Standard,
    Shared,
    LastValue,
}

impl DurableType {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Shared => "shared",
            Self::LastValue => "last-value",
        }
    }
}

/// Durable subscription configuration.
#[derive(Debug, Clone)]
pub struct DurableSpec {
    pub name: String,
    pub durable_type: DurableType,
    /// Required when `durable_type == LastValue`.
    pub key: Option<String>,
}

/// Application-supplied callback set for a subscription.
///
/// A capability record passed at subscribe time, rather than a
/// dictionary-of-callbacks keyed by string (§9 DESIGN NOTES,
/// "Server-supplied callback dispatch"). Any callback left `None` is simply
/// not invoked.
pub struct SubscriptionCallbacks {
    pub on_subscribe: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_message: Option<Box<dyn Fn(Message) + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(CompletionError) + Send + Sync>>,
}

impl Default for SubscriptionCallbacks {
    fn default() -> Self {
        Self { on_subscribe: None, on_message: None, on_error: None }
    }
}

impl std::fmt::Debug for SubscriptionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionCallbacks").finish_non_exhaustive()
    }
}

/// A registered subscription. Identity is `"<client_id>.s.<n>"` (§3).
pub struct Subscription {
    pub id: String,
    pub matcher: Option<Value>,
    pub durable: Option<DurableSpec>,
    pub ack_mode: AckMode,
    /// Highest sequence number delivered to `on_message` so far; `-1` means
    /// nothing has been delivered yet.
    pub last_received_sequence_number: i64,
    /// True from registration until SUBSCRIBED/UNSUBSCRIBED is observed.
    pub pending: bool,
    pub callbacks: SubscriptionCallbacks,
}

impl Subscription {
    fn new(id: String, matcher: Option<Value>, durable: Option<DurableSpec>, ack_mode: AckMode, callbacks: SubscriptionCallbacks) -> Self {
        Self { id, matcher, durable, ack_mode, last_received_sequence_number: -1, pending: true, callbacks }
    }
}

/// Holds every subscription for one connection. The id is generated
/// client-side before any network round trip (§4.3).
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<String, Subscription>,
    next_seq: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next subscription id for `client_id` and register a new,
    /// pending [`Subscription`] under it.
    pub fn register(
        &mut self,
        client_id: &str,
        matcher: Option<Value>,
        durable: Option<DurableSpec>,
        ack_mode: AckMode,
        callbacks: SubscriptionCallbacks,
    ) -> String {
        self.next_seq += 1;
        let id = format!("{client_id}.s.{}", self.next_seq);
        self.subscriptions
            .insert(id.clone(), Subscription::new(id.clone(), matcher, durable, ack_mode, callbacks));
        id
    }

    pub fn get(&self, id: &str) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Subscription> {
        self.subscriptions.remove(id)
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }

    /// Iterate over `(id, subscription)` pairs — the standard shape
    /// everywhere subscriptions are walked in bulk (restoration batches,
    /// `unsubscribe_all`, diagnostics).
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Subscription)> {
        self.subscriptions.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Reset every subscription's cursor, as WELCOME with `resume=false`
    /// requires before re-sending SUBSCRIBE frames.
    pub fn reset_all_cursors(&mut self) {
        for sub in self.subscriptions.values_mut() {
            sub.last_received_sequence_number = -1;
        }
    }

    pub fn mark_all_pending(&mut self) {
        for sub in self.subscriptions.values_mut() {
            sub.pending = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_namespaced_and_monotonic() {
        let mut reg = SubscriptionRegistry::new();
        let a = reg.register("c1", None, None, AckMode::Auto, SubscriptionCallbacks::default());
        let b = reg.register("c1", None, None, AckMode::Auto, SubscriptionCallbacks::default());
        assert_eq!(a, "c1.s.1");
        assert_eq!(b, "c1.s.2");
    }

    #[test]
    fn new_subscription_starts_pending_with_no_delivery() {
        let mut reg = SubscriptionRegistry::new();
        let id = reg.register("c1", None, None, AckMode::Auto, SubscriptionCallbacks::default());
        let sub = reg.get(&id).unwrap();
        assert!(sub.pending);
        assert_eq!(sub.last_received_sequence_number, -1);
    }

    #[test]
    fn reset_cursors_affects_all_subscriptions() {
        let mut reg = SubscriptionRegistry::new();
        let id = reg.register("c1", None, None, AckMode::Auto, SubscriptionCallbacks::default());
        reg.get_mut(&id).unwrap().last_received_sequence_number = 7;
        reg.reset_all_cursors();
        assert_eq!(reg.get(&id).unwrap().last_received_sequence_number, -1);
    }
}
