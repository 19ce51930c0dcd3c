//! In-memory message queue for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use ulid::Ulid;

use super::{MessageQueue, ReceivedMessage};
use crate::store::{StoreError, StoreResult};

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[derive(Debug, Clone)]
struct Queued {
    body: Vec<u8>,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    visible: VecDeque<Queued>,
    in_flight: HashMap<String, Queued>,
}

/// FIFO queue with explicit ack/nack. There is no visibility timeout: an
/// un-acked message stays in flight until it is acked or nacked.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting to be received.
    pub fn visible_len(&self) -> StoreResult<usize> {
        Ok(self.state.lock().map_err(poison_err)?.visible.len())
    }

    /// Messages received but not yet acked or nacked.
    pub fn in_flight_len(&self) -> StoreResult<usize> {
        Ok(self.state.lock().map_err(poison_err)?.in_flight.len())
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send(&self, body: &[u8]) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(poison_err)?;
        state.visible.push_back(Queued {
            body: body.to_vec(),
            delivery_count: 0,
        });
        Ok(())
    }

    async fn receive(&self, max: usize) -> StoreResult<Vec<ReceivedMessage>> {
        let mut state = self.state.lock().map_err(poison_err)?;
        let mut received = Vec::new();
        while received.len() < max {
            let Some(mut queued) = state.visible.pop_front() else {
                break;
            };
            queued.delivery_count += 1;
            let receipt = Ulid::new().to_string();
            received.push(ReceivedMessage {
                receipt: receipt.clone(),
                body: queued.body.clone(),
                delivery_count: queued.delivery_count,
            });
            state.in_flight.insert(receipt, queued);
        }
        Ok(received)
    }

    async fn ack(&self, receipt: &str) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(poison_err)?;
        state.in_flight.remove(receipt);
        Ok(())
    }

    async fn nack(&self, receipt: &str) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(poison_err)?;
        if let Some(queued) = state.in_flight.remove(receipt) {
            state.visible.push_back(queued);
        }
        Ok(())
    }
}
