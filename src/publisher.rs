//! Domain event publishing

use async_trait::async_trait;
use crate::domain::events::DomainEvent;

const SUBJECT_PREFIX: &str = "storefront.orders";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Delivery is fire-and-forget; failures are logged by the implementation.
    async fn publish(&self, event: &DomainEvent);

    async fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in &events { self.publish(event).await; }
    }
}

/// Publishes JSON-encoded events to NATS.
pub struct NatsPublisher { client: async_nats::Client }

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) {
        let subject = format!("{}.{}", SUBJECT_PREFIX, event.kind());
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => { tracing::warn!(error = %e, subject = %subject, "failed to encode event"); return; }
        };
        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            tracing::warn!(error = %e, subject = %subject, "failed to publish event");
        }
    }
}

/// Used when no broker is configured.
#[derive(Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &DomainEvent) {
        tracing::debug!(kind = event.kind(), ?event, "domain event");
    }
}
