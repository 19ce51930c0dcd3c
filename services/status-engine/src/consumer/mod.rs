//! Inbound event queue and the consumer pool that drains it.
//!
//! The queue is at-least-once: a received message stays invisible to other
//! consumers until it is acknowledged, or is redelivered after a nack or a
//! visibility timeout. Idempotency is the engine's job, not the queue's.

pub mod memory;
pub mod worker;

use async_trait::async_trait;

use crate::store::StoreResult;

pub use memory::InMemoryQueue;
pub use worker::{ConsumerConfig, ConsumerPool, ConsumerStats};

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Handle for acking or nacking this delivery.
    pub receipt: String,
    pub body: Vec<u8>,
    /// How many times the message has been handed out, this delivery included.
    pub delivery_count: u32,
}

/// Durable at-least-once message queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueues a raw envelope.
    async fn send(&self, body: &[u8]) -> StoreResult<()>;

    /// Receives up to `max` visible messages.
    async fn receive(&self, max: usize) -> StoreResult<Vec<ReceivedMessage>>;

    /// Deletes a delivered message.
    async fn ack(&self, receipt: &str) -> StoreResult<()>;

    /// Makes a delivered message visible again for redelivery.
    async fn nack(&self, receipt: &str) -> StoreResult<()>;
}
