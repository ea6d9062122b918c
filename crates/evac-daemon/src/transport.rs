//! Message transport boundary
//!
//! Consumers see an at-least-once queue with manual acknowledgement. A
//! delivery stays unacknowledged until [`Transport::ack`] or
//! [`Transport::nack`] is called for its tag; nack with `requeue` puts it
//! back at the head of its queue flagged as redelivered.

use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// One message handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub queue: String,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

/// Trait for queue transports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Append `payload` to `queue`
    async fn publish(&self, queue: &str, payload: &[u8]) -> TransportResult<()>;

    /// Wait for the next message on `queue`; `None` once the transport is closed
    async fn receive(&self, queue: &str) -> TransportResult<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> TransportResult<()>;

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> TransportResult<()>;
}

#[derive(Debug, Default)]
struct QueueState {
    ready: Mutex<VecDeque<Delivery>>,
    notify: Notify,
}

/// In-process transport for development and tests
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    queues: DashMap<String, Arc<QueueState>>,
    unacked: DashMap<u64, Delivery>,
    next_tag: AtomicU64,
    closed: AtomicBool,
    fail_publishes: AtomicBool,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Arc<QueueState> {
        self.queues
            .entry(name.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Stop handing out messages; pending receivers return `None`
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for queue in self.queues.iter() {
            queue.notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make publishes fail until switched off again
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Number of messages waiting on `queue`
    pub async fn depth(&self, queue: &str) -> usize {
        self.queue(queue).ready.lock().await.len()
    }

    /// Number of deliveries awaiting ack/nack
    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    /// Remove and return every waiting payload on `queue`
    pub async fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        self.queue(queue)
            .ready
            .lock()
            .await
            .drain(..)
            .map(|d| d.payload)
            .collect()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, queue: &str, payload: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed {
                queue: queue.to_string(),
                reason: "publishing disabled".to_string(),
            });
        }

        let state = self.queue(queue);
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        state.ready.lock().await.push_back(Delivery {
            tag,
            queue: queue.to_string(),
            payload: payload.to_vec(),
            redelivered: false,
        });
        state.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, queue: &str) -> TransportResult<Option<Delivery>> {
        let state = self.queue(queue);
        loop {
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Ok(None);
            }
            if let Some(delivery) = state.ready.lock().await.pop_front() {
                self.unacked.insert(delivery.tag, delivery.clone());
                return Ok(Some(delivery));
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> TransportResult<()> {
        self.unacked
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(TransportError::UnknownDelivery(delivery.tag))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> TransportResult<()> {
        let (_, mut delivery) = self
            .unacked
            .remove(&delivery.tag)
            .ok_or(TransportError::UnknownDelivery(delivery.tag))?;
        if requeue {
            delivery.redelivered = true;
            let state = self.queue(&delivery.queue);
            state.ready.lock().await.push_front(delivery);
            state.notify.notify_one();
        }
        Ok(())
    }
}
