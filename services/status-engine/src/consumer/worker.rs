//! Consumer pool.
//!
//! Runs a fixed number of consumer tasks against one queue. Each task:
//! 1. Receives a batch of messages
//! 2. Hands each message to the engine
//! 3. Acks on success or on a non-retryable error, nacks on a retryable one
//! 4. Sleeps if the queue was empty, then repeats
//!
//! Messages for the same key may be processed concurrently by different tasks;
//! the engine's guarded updates make that safe.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::{MessageQueue, ReceivedMessage};
use crate::engine::StatusEngine;
use crate::store::StoreResult;

/// Configuration for the consumer pool.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of concurrent consumer tasks.
    pub concurrency: usize,

    /// Maximum number of messages received per batch.
    pub batch_size: usize,

    /// How long to sleep when the queue is empty.
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 10,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Counts for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: usize,
    pub acked: usize,
    pub nacked: usize,
}

impl ConsumerStats {
    fn merge(&mut self, other: ConsumerStats) {
        self.received += other.received;
        self.acked += other.acked;
        self.nacked += other.nacked;
    }
}

/// Pool of queue consumers feeding one engine.
#[derive(Clone)]
pub struct ConsumerPool {
    queue: Arc<dyn MessageQueue>,
    engine: Arc<StatusEngine>,
    config: ConsumerConfig,
}

impl ConsumerPool {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        engine: Arc<StatusEngine>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            engine,
            config,
        }
    }

    /// Run all consumer tasks until the shutdown signal is received.
    #[instrument(skip(self, shutdown), name = "consumer_pool")]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency.max(1);
        info!(
            concurrency,
            batch_size = self.config.batch_size,
            "Starting consumer pool"
        );

        let mut tasks = JoinSet::new();
        for consumer in 0..concurrency {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { pool.consume(consumer, shutdown).await });
        }

        let mut totals = ConsumerStats::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(stats) => totals.merge(stats),
                Err(e) => error!(error = %e, "Consumer task panicked"),
            }
        }

        info!(
            received = totals.received,
            acked = totals.acked,
            nacked = totals.nacked,
            "Consumer pool stopped"
        );
    }

    async fn consume(&self, consumer: usize, mut shutdown: watch::Receiver<bool>) -> ConsumerStats {
        let mut totals = ConsumerStats::default();
        loop {
            if *shutdown.borrow() {
                debug!(consumer, "Shutdown signal received, stopping consumer");
                break;
            }

            match self.process_batch().await {
                Ok(stats) if stats.received > 0 => {
                    totals.merge(stats);
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(consumer, error = %e, "Failed to receive from queue");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(consumer, "Shutdown signal received during poll wait");
                        break;
                    }
                }
                _ = sleep(self.config.poll_interval) => {}
            }
        }
        totals
    }

    /// Receives and processes one batch.
    ///
    /// Only receive failures are returned; per-message failures are resolved
    /// by ack or nack.
    pub async fn process_batch(&self) -> StoreResult<ConsumerStats> {
        let messages = self.queue.receive(self.config.batch_size).await?;
        let mut stats = ConsumerStats {
            received: messages.len(),
            ..Default::default()
        };
        for message in messages {
            if self.process_message(&message).await {
                stats.acked += 1;
            } else {
                stats.nacked += 1;
            }
        }
        Ok(stats)
    }

    /// Processes one message. Returns true if it was acked.
    #[instrument(skip_all, fields(receipt = %message.receipt, delivery_count = message.delivery_count))]
    async fn process_message(&self, message: &ReceivedMessage) -> bool {
        let ack = match self.engine.handle_message(&message.body).await {
            Ok(outcome) => {
                debug!(outcome = outcome.as_str(), "Message handled");
                true
            }
            Err(e) if e.is_retryable() => {
                error!(error = %e, "Message handling failed, leaving for redelivery");
                false
            }
            Err(e) => {
                warn!(error = %e, "Message cannot be processed, acknowledging");
                true
            }
        };

        let settled = if ack {
            self.queue.ack(&message.receipt).await
        } else {
            self.queue.nack(&message.receipt).await
        };
        if let Err(e) = settled {
            // The visibility timeout will redeliver it.
            error!(error = %e, ack, "Failed to settle message");
        }
        ack
    }

    /// Processes batches until the queue is empty. Test and admin helper.
    pub async fn drain(&self) -> StoreResult<ConsumerStats> {
        let mut totals = ConsumerStats::default();
        loop {
            let stats = self.process_batch().await?;
            if stats.received == 0 {
                return Ok(totals);
            }
            totals.merge(stats);
            if stats.acked == 0 {
                // Everything was nacked; stop rather than spin on redelivery.
                return Ok(totals);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::StaticArtifactResolver;
    use crate::consumer::InMemoryQueue;
    use crate::store::{
        DeploymentMutation, EntityFactory, EntityMutation, InMemoryStatusStore, StatusStore,
        StoreError, Update,
    };
    use async_trait::async_trait;
    use cdp_id::{CdpDeploymentId, EntityName, LambdaId, TaskDefinitionArn};
    use cdp_reconcile::{Deployment, Entity, ReconcileConfig};
    use serde_json::json;

    /// A store whose backend is down.
    struct UnavailableStore;

    fn down<T>() -> StoreResult<T> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    #[async_trait]
    impl StatusStore for UnavailableStore {
        async fn get_deployment(&self, _: &CdpDeploymentId) -> StoreResult<Option<Deployment>> {
            down()
        }

        async fn find_deployment_by_lambda_id(
            &self,
            _: &LambdaId,
        ) -> StoreResult<Option<Deployment>> {
            down()
        }

        async fn find_latest_deployment_for_task_definition(
            &self,
            _: &str,
            _: &TaskDefinitionArn,
        ) -> StoreResult<Option<Deployment>> {
            down()
        }

        async fn list_deployments_for_service(
            &self,
            _: &str,
            _: Option<&str>,
        ) -> StoreResult<Vec<Deployment>> {
            down()
        }

        async fn insert_deployment(&self, _: Deployment) -> StoreResult<Update<Deployment>> {
            down()
        }

        async fn update_deployment(
            &self,
            _: &CdpDeploymentId,
            _: DeploymentMutation<'_>,
        ) -> StoreResult<Option<Update<Deployment>>> {
            down()
        }

        async fn get_entity(&self, _: &EntityName) -> StoreResult<Option<Entity>> {
            down()
        }

        async fn list_entity_names(&self) -> StoreResult<Vec<EntityName>> {
            down()
        }

        async fn upsert_entity(
            &self,
            _: &EntityName,
            _: EntityFactory<'_>,
            _: EntityMutation<'_>,
        ) -> StoreResult<Update<Entity>> {
            down()
        }

        async fn update_entity(
            &self,
            _: &EntityName,
            _: EntityMutation<'_>,
        ) -> StoreResult<Option<Update<Entity>>> {
            down()
        }
    }

    fn pool_with_store(queue: Arc<InMemoryQueue>, store: Arc<dyn StatusStore>) -> ConsumerPool {
        let engine = StatusEngine::new(
            store,
            Arc::new(StaticArtifactResolver::new()),
            ReconcileConfig::default(),
        );
        ConsumerPool::new(queue, Arc::new(engine), ConsumerConfig::default())
    }

    fn pool(queue: Arc<InMemoryQueue>) -> ConsumerPool {
        pool_with_store(queue, Arc::new(InMemoryStatusStore::new()))
    }

    #[test]
    fn test_consumer_config_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.batch_size, 10);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_acked() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.send(b"not json").await.unwrap();
        queue.send(br#"{"eventType": "something-else", "timestamp": "2026-01-01T00:00:00Z", "payload": {}}"#).await.unwrap();

        let stats = pool(queue.clone()).drain().await.unwrap();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.acked, 2);
        assert_eq!(queue.visible_len().unwrap(), 0);
        assert_eq!(queue.in_flight_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_outage_leaves_message_for_redelivery() {
        let queue = Arc::new(InMemoryQueue::new());
        let snapshot = json!({
            "eventType": "environment-state",
            "timestamp": "2026-01-01T10:00:00Z",
            "payload": {
                "environment": "dev",
                "tenants": [{"name": "service-a", "progress": {"complete": true}}]
            }
        });
        queue.send(snapshot.to_string().as_bytes()).await.unwrap();

        let pool = pool_with_store(queue.clone(), Arc::new(UnavailableStore));
        let stats = pool.process_batch().await.unwrap();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.acked, 0);
        assert_eq!(stats.nacked, 1);
        assert_eq!(queue.visible_len().unwrap(), 1);
        assert_eq!(queue.in_flight_len().unwrap(), 0);

        // Redelivered on the next batch and nacked again.
        let stats = pool.process_batch().await.unwrap();
        assert_eq!(stats.nacked, 1);
        assert_eq!(queue.visible_len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let queue = Arc::new(InMemoryQueue::new());
        let pool = pool(queue);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { pool.run(shutdown_rx).await });

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("consumer pool did not stop")
            .unwrap();
    }
}
