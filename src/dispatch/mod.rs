//! Queue draining.
//!
//! The coordinator moves queued mails into the transport. With a pooled
//! transport it only takes a mail off the queue once a send slot is
//! reserved for it, so the queue keeps everything the transport cannot
//! accept yet:
//!
//! ```text
//! loop:
//!     wait until the transport is idle
//!     blocking pop -> reserve slot -> send        (priming send)
//!     drain: while a slot is free, pop -> send    (non-blocking)
//! ```
//!
//! With a simple transport it pops and awaits one send at a time.
//! At most one coordinator may drain a given transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::mail::Mail;
use crate::metrics::DispatchMetrics;
use crate::queue::MailQueue;
use crate::transport::{
    DeliveryReceipt, MailTransport, PooledTransport, SendSlot, Transport, TransportResult,
    TransportState,
};

/// Pause after a queue backend error before popping again
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Statistics for the dispatch coordinator
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Mails handed to the transport
    pub dispatched: AtomicU64,
    /// Mails the transport accepted
    pub delivered: AtomicU64,
    /// Mails the transport failed to send
    pub failed: AtomicU64,
    /// Queue backend errors
    pub queue_errors: AtomicU64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queue_errors: self.queue_errors.load(Ordering::Relaxed),
        }
    }

    fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        DispatchMetrics::record_dispatched();
    }

    fn record_result(&self, mail: &Mail, result: TransportResult<DeliveryReceipt>) {
        match result {
            Ok(receipt) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    mail_id = %mail.id,
                    to = %mail.to.address,
                    message_id = %receipt.message_id,
                    "Queued mail sent"
                );
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                DispatchMetrics::record_failed();
                tracing::error!(
                    mail_id = %mail.id,
                    to = %mail.to.address,
                    template = ?mail.template,
                    lang = %mail.lang,
                    subject = ?mail.subject,
                    error = %e,
                    "Failed to send queued mail"
                );
            }
        }
    }
}

/// Snapshot of dispatch statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub dispatched: u64,
    pub delivered: u64,
    pub failed: u64,
    pub queue_errors: u64,
}

/// Resets the drain flag, also when a drain is cancelled
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the mail queue into the transport
pub struct DispatchCoordinator {
    transport: MailTransport,
    queue: Option<Arc<dyn MailQueue>>,
    draining: AtomicBool,
    stats: Arc<DispatchStats>,
    error_backoff: Duration,
}

impl DispatchCoordinator {
    pub fn new(transport: MailTransport, queue: Option<Arc<dyn MailQueue>>) -> Self {
        Self {
            transport,
            queue,
            draining: AtomicBool::new(false),
            stats: Arc::new(DispatchStats::default()),
            error_backoff: QUEUE_ERROR_BACKOFF,
        }
    }

    /// Override the pause after queue backend errors
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Run the draining loop.
    ///
    /// Returns immediately when no queue is configured, otherwise runs
    /// until the task is aborted.
    pub async fn run(&self) {
        let Some(queue) = &self.queue else {
            tracing::info!("No mail queue configured, dispatch loop not started");
            return;
        };

        tracing::info!(
            queue = queue.backend_name(),
            transport = self.transport.name(),
            pooled = matches!(self.transport, MailTransport::Pooled(_)),
            "Dispatch loop started"
        );

        match &self.transport {
            MailTransport::Pooled(pool) => self.run_pooled(queue, pool).await,
            MailTransport::Simple(transport) => self.run_simple(queue, transport).await,
        }
    }

    /// Send queued mails while the transport has free slots.
    ///
    /// Never waits for mail or for capacity. Returns the number of mails
    /// dispatched; a call made while another drain runs returns 0.
    pub async fn drain(&self) -> usize {
        match (&self.queue, &self.transport) {
            (Some(queue), MailTransport::Pooled(pool)) => self.drain_with(queue, pool).await,
            _ => 0,
        }
    }

    async fn run_pooled(&self, queue: &Arc<dyn MailQueue>, pool: &Arc<PooledTransport>) {
        let mut state = pool.subscribe();

        loop {
            if state.wait_for(|s| *s == TransportState::Idle).await.is_err() {
                tracing::warn!("Transport state channel closed, dispatch loop stopped");
                return;
            }

            let mail = match queue.wait_and_pop().await {
                Ok(mail) => mail,
                Err(e) => {
                    self.queue_error(&e).await;
                    continue;
                }
            };

            let slot = match pool.reserve().await {
                Ok(slot) => slot,
                Err(e) => {
                    tracing::error!(mail_id = %mail.id, error = %e, "Transport closed, dispatch loop stopped");
                    return;
                }
            };
            self.dispatch(slot, mail);

            self.drain_with(queue, pool).await;
        }
    }

    async fn run_simple(&self, queue: &Arc<dyn MailQueue>, transport: &Arc<dyn Transport>) {
        loop {
            match queue.wait_and_pop().await {
                Ok(mail) => {
                    self.stats.record_dispatched();
                    let result = transport.send_mail(&mail).await;
                    self.stats.record_result(&mail, result);
                }
                Err(e) => self.queue_error(&e).await,
            }
        }
    }

    async fn drain_with(&self, queue: &Arc<dyn MailQueue>, pool: &Arc<PooledTransport>) -> usize {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("Drain already running");
            return 0;
        }
        let _guard = DrainGuard(&self.draining);

        let mut dispatched = 0;
        while let Some(slot) = pool.try_reserve() {
            match queue.pop().await {
                Ok(Some(mail)) => {
                    self.dispatch(slot, mail);
                    dispatched += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    self.stats.queue_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, "Failed to pop queued mail");
                    break;
                }
            }
        }

        if dispatched > 0 {
            tracing::debug!(dispatched, "Drained mail queue");
        }
        dispatched
    }

    fn dispatch(&self, slot: SendSlot, mail: Mail) {
        self.stats.record_dispatched();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let result = slot.send(&mail).await;
            stats.record_result(&mail, result);
        });
    }

    async fn queue_error(&self, error: &crate::queue::QueueError) {
        self.stats.queue_errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            error = %error,
            backoff_ms = self.error_backoff.as_millis() as u64,
            "Failed to pop queued mail"
        );
        tokio::time::sleep(self.error_backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::mail::Recipient;
    use crate::queue::{MemoryMailQueue, QueueResult};
    use crate::transport::{Envelope, PoolOptions, TransportError};

    /// Records sends and the peak number of concurrent sends
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl RecordingTransport {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_mail(&self, mail: &Mail) -> TransportResult<DeliveryReceipt> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.sent.lock().unwrap().push(mail.to.address.clone());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if mail.to.address.starts_with("bad") {
                return Err(TransportError::Rejected("mailbox unavailable".to_string()));
            }

            Ok(DeliveryReceipt {
                message_id: mail.id.to_string(),
                envelope: Envelope::of(mail),
                response: Some("250 OK".to_string()),
                message: None,
            })
        }
    }

    /// Memory queue whose non-blocking pop yields first
    struct SlowPopQueue(MemoryMailQueue);

    #[async_trait]
    impl MailQueue for SlowPopQueue {
        fn backend_name(&self) -> &'static str {
            "slow"
        }
        async fn push(&self, mail: Mail) -> QueueResult<usize> {
            self.0.push(mail).await
        }
        async fn pop(&self) -> QueueResult<Option<Mail>> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.0.pop().await
        }
        async fn wait_and_pop(&self) -> QueueResult<Mail> {
            self.0.wait_and_pop().await
        }
        async fn total(&self) -> QueueResult<usize> {
            self.0.total().await
        }
        async fn clear(&self) -> QueueResult<usize> {
            self.0.clear().await
        }
    }

    fn mail(address: &str) -> Mail {
        Mail::new(Recipient::new(address), "en")
    }

    fn pooled(transport: Arc<RecordingTransport>, max_connections: usize) -> MailTransport {
        MailTransport::pooled(
            transport,
            PoolOptions::default()
                .max_connections(max_connections)
                .rate_limit(None, Duration::from_secs(1)),
        )
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_drains_preloaded_queue_in_order() {
        let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(5)));
        let queue = Arc::new(MemoryMailQueue::new());
        let expected: Vec<String> = (0..5).map(|i| format!("user{}@example.com", i)).collect();
        for address in &expected {
            queue.push(mail(address)).await.unwrap();
        }

        let coordinator = Arc::new(DispatchCoordinator::new(
            pooled(transport.clone(), 1),
            Some(queue.clone()),
        ));
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run().await })
        };

        wait_until(|| transport.sent().len() == expected.len()).await;
        task.abort();

        assert_eq!(transport.sent(), expected);
        assert_eq!(queue.total().await.unwrap(), 0);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
        wait_until(|| coordinator.stats().delivered == 5).await;
        assert_eq!(coordinator.stats().dispatched, 5);
    }

    #[tokio::test]
    async fn test_mail_pushed_later_is_sent() {
        let transport = Arc::new(RecordingTransport::default());
        let queue = Arc::new(MemoryMailQueue::new());
        let coordinator = Arc::new(DispatchCoordinator::new(
            pooled(transport.clone(), 2),
            Some(queue.clone()),
        ));
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(mail("late@example.com")).await.unwrap();

        wait_until(|| transport.sent().len() == 1).await;
        task.abort();
        assert_eq!(transport.sent(), vec!["late@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_reentrant_drain_is_a_no_op() {
        let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(50)));
        let queue = Arc::new(SlowPopQueue(MemoryMailQueue::new()));
        for i in 0..3 {
            queue.push(mail(&format!("user{}@example.com", i))).await.unwrap();
        }
        let coordinator = DispatchCoordinator::new(pooled(transport.clone(), 1), Some(queue.clone()));

        let (first, second) = tokio::join!(coordinator.drain(), coordinator.drain());

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert!(!coordinator.is_draining());

        wait_until(|| transport.sent().len() == 1).await;
        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
        assert_eq!(queue.total().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_drain_fills_free_slots_only() {
        let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(50)));
        let queue = Arc::new(MemoryMailQueue::new());
        for i in 0..5 {
            queue.push(mail(&format!("user{}@example.com", i))).await.unwrap();
        }
        let coordinator = DispatchCoordinator::new(pooled(transport.clone(), 3), Some(queue.clone()));

        assert_eq!(coordinator.drain().await, 3);
        assert_eq!(queue.total().await.unwrap(), 2);

        // Every slot is still busy
        assert_eq!(coordinator.drain().await, 0);

        wait_until(|| transport.sent().len() == 3).await;
        assert!(transport.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_failed_send_does_not_stop_the_loop() {
        let transport = Arc::new(RecordingTransport::default());
        let queue = Arc::new(MemoryMailQueue::new());
        for address in ["a@example.com", "bad@example.com", "c@example.com"] {
            queue.push(mail(address)).await.unwrap();
        }
        let coordinator = Arc::new(DispatchCoordinator::new(
            pooled(transport.clone(), 1),
            Some(queue.clone()),
        ));
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run().await })
        };

        wait_until(|| coordinator.stats().delivered + coordinator.stats().failed == 3).await;
        task.abort();

        let stats = coordinator.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_simple_transport_loop() {
        let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(5)));
        let queue = Arc::new(MemoryMailQueue::new());
        for i in 0..3 {
            queue.push(mail(&format!("user{}@example.com", i))).await.unwrap();
        }
        let coordinator = Arc::new(DispatchCoordinator::new(
            MailTransport::simple(transport.clone()),
            Some(queue.clone()),
        ));
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run().await })
        };

        wait_until(|| transport.sent().len() == 3).await;
        task.abort();

        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.drain().await, 0);
    }

    #[tokio::test]
    async fn test_run_without_queue_returns() {
        let transport = Arc::new(RecordingTransport::default());
        let coordinator = DispatchCoordinator::new(pooled(transport, 1), None);

        tokio::time::timeout(Duration::from_secs(1), coordinator.run())
            .await
            .expect("run should return without a queue");
        assert_eq!(coordinator.drain().await, 0);
    }
}
