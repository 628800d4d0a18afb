//! Correlation registry
//!
//! The single shared mutable structure in the system: a map from
//! correlation id to the rendezvous slot of the exchange awaiting that id.
//! Accessed concurrently by the reader loop and every outstanding exchange,
//! so every operation serializes on the internal mutex.

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

use crate::protocol::CorrelationId;

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("correlation id already in flight: {0}")]
    DuplicateId(CorrelationId),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Tokens delivered to the waiting exchange: everything after the id
pub type SlotPayload = Vec<String>;

/// Receiving end of a rendezvous slot
pub type Slot = oneshot::Receiver<SlotPayload>;

/// Map of in-flight exchanges awaiting their completing line
pub struct Registry {
    slots: Mutex<HashMap<CorrelationId, oneshot::Sender<SlotPayload>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Create and store a slot for `id`.
    ///
    /// Fails if an exchange is already awaiting that id; the caller must
    /// pick a fresh one.
    pub async fn register(&self, id: &CorrelationId) -> RegistryResult<Slot> {
        let mut slots = self.slots.lock().await;
        if slots.contains_key(id) {
            return Err(RegistryError::DuplicateId(id.clone()));
        }

        let (tx, rx) = oneshot::channel();
        slots.insert(id.clone(), tx);
        Ok(rx)
    }

    /// Generate a fresh id and register a slot for it.
    ///
    /// A generated id colliding with a live exchange is retried with a new
    /// id until insertion succeeds.
    pub async fn register_new(&self) -> (CorrelationId, Slot) {
        loop {
            let id = CorrelationId::generate();
            match self.register(&id).await {
                Ok(slot) => return (id, slot),
                Err(RegistryError::DuplicateId(id)) => {
                    tracing::warn!("correlation id collision on {}, regenerating", id);
                }
            }
        }
    }

    /// Hand `tokens` to the exchange awaiting `id`, consuming its slot.
    ///
    /// Returns false when no slot is registered for `id`, which the caller
    /// must treat as the start of a new peer-initiated exchange.
    pub async fn deliver(&self, id: &CorrelationId, tokens: SlotPayload) -> bool {
        let sender = self.slots.lock().await.remove(id);
        match sender {
            Some(tx) => {
                if tx.send(tokens).is_err() {
                    // The exchange gave up (ack timeout) between lookup and
                    // hand-off; the slot is gone either way.
                    tracing::debug!("exchange {} no longer waiting", id);
                }
                true
            }
            None => false,
        }
    }

    /// Unconditionally discard the slot for `id`, if any
    pub async fn remove(&self, id: &CorrelationId) {
        self.slots.lock().await.remove(id);
    }

    /// Number of exchanges currently awaiting a reply
    pub async fn outstanding(&self) -> usize {
        self.slots.lock().await.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_deliver() {
        let registry = Registry::new();
        let id = CorrelationId::from("c1");

        let slot = registry.register(&id).await.unwrap();
        assert!(registry.deliver(&id, vec!["ACK".to_string()]).await);

        let tokens = slot.await.unwrap();
        assert_eq!(tokens, vec!["ACK"]);
    }

    #[tokio::test]
    async fn test_deliver_unknown_id_returns_false() {
        let registry = Registry::new();
        let id = CorrelationId::from("ghost");
        assert!(!registry.deliver(&id, vec!["ACK".to_string()]).await);
    }

    #[tokio::test]
    async fn test_duplicate_register_fails() {
        let registry = Registry::new();
        let id = CorrelationId::from("c1");

        let _slot = registry.register(&id).await.unwrap();
        assert!(matches!(
            registry.register(&id).await,
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_id_reusable_after_deliver() {
        let registry = Registry::new();
        let id = CorrelationId::from("c1");

        let _slot = registry.register(&id).await.unwrap();
        assert!(registry.deliver(&id, vec!["DONE".to_string()]).await);

        // The slot was consumed, so the same id registers cleanly again.
        assert!(registry.register(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = Registry::new();
        let id = CorrelationId::from("c1");

        let _slot = registry.register(&id).await.unwrap();
        registry.remove(&id).await;
        registry.remove(&id).await;
        assert_eq!(registry.outstanding().await, 0);
        assert!(!registry.deliver(&id, vec!["ACK".to_string()]).await);
    }

    #[tokio::test]
    async fn test_register_new_yields_distinct_ids() {
        let registry = Registry::new();
        let (a, _slot_a) = registry.register_new().await;
        let (b, _slot_b) = registry.register_new().await;
        assert_ne!(a, b);
        assert_eq!(registry.outstanding().await, 2);
    }

    #[tokio::test]
    async fn test_deliver_to_dropped_waiter_still_consumes_slot() {
        let registry = Registry::new();
        let id = CorrelationId::from("c1");

        let slot = registry.register(&id).await.unwrap();
        drop(slot);

        // The line still counts as routed; the slot is gone afterwards.
        assert!(registry.deliver(&id, vec!["ACK".to_string()]).await);
        assert_eq!(registry.outstanding().await, 0);
    }
}
