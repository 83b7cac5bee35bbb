//! Slot and rate limited transport wrapper.
//!
//! `PooledTransport` admits at most `max_connections` concurrent sends and,
//! optionally, `rate_limit` sends per `rate_delta`. It publishes an
//! [`TransportState`] through a watch channel: `Idle` while a slot is free,
//! `Busy` while every slot is taken.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::mail::Mail;
use crate::metrics::DispatchMetrics;

use super::rate_limit::TokenBucket;
use super::{DeliveryReceipt, Transport, TransportError, TransportResult};

/// Capacity state of a pooled transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Idle,
    Busy,
}

/// Limits of a pooled transport
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_connections: usize,
    /// Sends per `rate_delta`, unlimited when `None`
    pub rate_limit: Option<u32>,
    pub rate_delta: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 20,
            rate_limit: Some(14),
            rate_delta: Duration::from_secs(1),
        }
    }
}

impl PoolOptions {
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn rate_limit(mut self, rate_limit: Option<u32>, rate_delta: Duration) -> Self {
        self.rate_limit = rate_limit;
        self.rate_delta = rate_delta;
        self
    }
}

/// Transport wrapper enforcing send slots and a send rate
pub struct PooledTransport {
    inner: Arc<dyn Transport>,
    slots: Arc<Semaphore>,
    max_connections: usize,
    limiter: Option<TokenBucket>,
    state: watch::Sender<TransportState>,
}

impl PooledTransport {
    pub fn new(inner: Arc<dyn Transport>, options: PoolOptions) -> Self {
        let max_connections = options.max_connections.max(1);
        let limiter = options
            .rate_limit
            .filter(|limit| *limit > 0)
            .map(|limit| TokenBucket::new(limit, options.rate_delta));
        let (state, _) = watch::channel(TransportState::Idle);

        Self {
            inner,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            limiter,
            state,
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn inner(&self) -> &Arc<dyn Transport> {
        &self.inner
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Sends currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.max_connections - self.slots.available_permits()
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn is_idle(&self) -> bool {
        self.state() == TransportState::Idle
    }

    /// Receiver of every idle/busy transition
    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    /// Reserve a send slot when one is free
    pub fn try_reserve(self: &Arc<Self>) -> Option<SendSlot> {
        let permit = self.slots.clone().try_acquire_owned().ok()?;
        Some(self.slot(permit))
    }

    /// Reserve a send slot, waiting for one to free up
    pub async fn reserve(self: &Arc<Self>) -> TransportResult<SendSlot> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(self.slot(permit))
    }

    /// Reserve a slot and send through it
    pub async fn send_mail(self: &Arc<Self>, mail: &Mail) -> TransportResult<DeliveryReceipt> {
        self.reserve().await?.send(mail).await
    }

    pub async fn verify(&self) -> TransportResult<()> {
        self.inner.verify().await
    }

    fn slot(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> SendSlot {
        self.publish();
        SendSlot {
            pool: self.clone(),
            permit: Some(permit),
        }
    }

    fn publish(&self) {
        let in_flight = self.in_flight();
        let next = if in_flight < self.max_connections {
            TransportState::Idle
        } else {
            TransportState::Busy
        };

        DispatchMetrics::set_in_flight(in_flight);
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                tracing::trace!(state = ?next, in_flight, "Transport state changed");
                *state = next;
                true
            }
        });
    }
}

/// One reserved unit of transport capacity.
///
/// The slot is released when the send completes or the slot is dropped.
pub struct SendSlot {
    pool: Arc<PooledTransport>,
    permit: Option<OwnedSemaphorePermit>,
}

impl SendSlot {
    /// Send one mail, waiting for the rate limiter first
    pub async fn send(self, mail: &Mail) -> TransportResult<DeliveryReceipt> {
        if let Some(limiter) = &self.pool.limiter {
            limiter.acquire().await;
        }

        self.pool.inner.send_mail(mail).await
    }
}

impl Drop for SendSlot {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.pool.publish();
    }
}
