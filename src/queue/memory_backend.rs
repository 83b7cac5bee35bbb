//! In-memory mail queue.
//!
//! Mails live in process memory and are lost on restart.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::mail::Mail;
use crate::metrics::DispatchMetrics;

use super::{MailQueue, QueueResult};

/// `VecDeque` queue with a `Notify` waking blocked poppers
#[derive(Default)]
pub struct MemoryMailQueue {
    mails: Mutex<VecDeque<Mail>>,
    notify: Notify,
}

impl MemoryMailQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Mail>> {
        // A panic while holding the lock cannot leave the deque half-updated
        self.mails.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take(&self) -> Option<Mail> {
        let mut mails = self.lock();
        let mail = mails.pop_front();
        DispatchMetrics::set_queue_depth(mails.len());
        mail
    }
}

#[async_trait]
impl MailQueue for MemoryMailQueue {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, mail: Mail) -> QueueResult<usize> {
        let len = {
            let mut mails = self.lock();
            mails.push_back(mail);
            mails.len()
        };
        DispatchMetrics::set_queue_depth(len);

        // Stores a permit when nobody waits, so a racing popper still wakes
        self.notify.notify_one();
        Ok(len)
    }

    async fn pop(&self) -> QueueResult<Option<Mail>> {
        Ok(self.take())
    }

    async fn wait_and_pop(&self) -> QueueResult<Mail> {
        loop {
            if let Some(mail) = self.take() {
                return Ok(mail);
            }
            self.notify.notified().await;
        }
    }

    async fn total(&self) -> QueueResult<usize> {
        Ok(self.lock().len())
    }

    async fn clear(&self) -> QueueResult<usize> {
        let mut mails = self.lock();
        let cleared = mails.len();
        mails.clear();
        DispatchMetrics::set_queue_depth(0);
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::mail::Recipient;

    fn mail(address: &str) -> Mail {
        Mail::new(Recipient::new(address), "en")
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryMailQueue::new();

        assert_eq!(queue.push(mail("a@example.com")).await.unwrap(), 1);
        assert_eq!(queue.push(mail("b@example.com")).await.unwrap(), 2);

        assert_eq!(queue.pop().await.unwrap().unwrap().to.address, "a@example.com");
        assert_eq!(queue.pop().await.unwrap().unwrap().to.address, "b@example.com");
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_total_and_clear() {
        let queue = MemoryMailQueue::new();
        for i in 0..3 {
            queue.push(mail(&format!("u{}@example.com", i))).await.unwrap();
        }

        assert_eq!(queue.total().await.unwrap(), 3);
        assert_eq!(queue.clear().await.unwrap(), 3);
        assert_eq!(queue.total().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wait_and_pop_wakes_on_push() {
        let queue = Arc::new(MemoryMailQueue::new());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_and_pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.push(mail("late@example.com")).await.unwrap();

        let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(popped.to.address, "late@example.com");
    }

    #[tokio::test]
    async fn test_wait_and_pop_returns_existing_mail() {
        let queue = MemoryMailQueue::new();
        queue.push(mail("ready@example.com")).await.unwrap();

        let popped = queue.wait_and_pop().await.unwrap();
        assert_eq!(popped.to.address, "ready@example.com");
    }
}
