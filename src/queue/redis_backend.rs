//! Redis list mail queue.
//!
//! Mails are JSON documents in the list `{prefix}:{name}`: pushed with
//! `RPUSH`, taken with `LPOP`, and awaited with `BLPOP` on a dedicated
//! connection so a blocked pop never stalls the command connection.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use tokio::sync::{Mutex, RwLock};

use crate::mail::Mail;
use crate::metrics::DispatchMetrics;

use super::{MailQueue, QueueError, QueueResult};

/// Durable queue backed by a Redis list
pub struct RedisMailQueue {
    client: Client,
    /// Shared connection for non-blocking commands
    connection: RwLock<Option<MultiplexedConnection>>,
    /// Connection reserved for `BLPOP`
    blocking: Mutex<Option<MultiplexedConnection>>,
    key: String,
}

impl RedisMailQueue {
    pub fn new(url: &str, prefix: &str, name: &str) -> QueueResult<Self> {
        let client = Client::open(url)?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            blocking: Mutex::new(None),
            key: Self::queue_key(prefix, name),
        })
    }

    /// Redis key of the list
    pub fn key(&self) -> &str {
        &self.key
    }

    fn queue_key(prefix: &str, name: &str) -> String {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", prefix, name)
        }
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, RedisError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        let conn = self.client.get_multiplexed_tokio_connection().await?;
        *conn_guard = Some(conn.clone());
        tracing::info!(key = %self.key, "Redis queue connection established");
        Ok(conn)
    }

    /// Run a command on the shared connection, dropping it on connection errors
    async fn execute<F, T, Fut>(&self, f: F) -> QueueResult<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                }
                Err(QueueError::Redis(e))
            }
        }
    }

    fn decode(&self, payload: &str) -> QueueResult<Mail> {
        serde_json::from_str(payload).map_err(|e| {
            tracing::warn!(key = %self.key, error = %e, "Failed to deserialize queued mail");
            QueueError::Serialization(e)
        })
    }
}

#[async_trait]
impl MailQueue for RedisMailQueue {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn push(&self, mail: Mail) -> QueueResult<usize> {
        let payload = serde_json::to_string(&mail)?;
        let key = self.key.clone();

        let len: usize = self
            .execute(|mut conn| async move { conn.rpush(&key, payload).await })
            .await?;

        DispatchMetrics::set_queue_depth(len);
        tracing::debug!(key = %self.key, mail_id = %mail.id, queue_len = len, "Mail pushed to Redis");
        Ok(len)
    }

    async fn pop(&self) -> QueueResult<Option<Mail>> {
        let key = self.key.clone();

        let payload: Option<String> = self
            .execute(|mut conn| async move { conn.lpop(&key, None).await })
            .await?;

        payload.as_deref().map(|p| self.decode(p)).transpose()
    }

    async fn wait_and_pop(&self) -> QueueResult<Mail> {
        let mut guard = self.blocking.lock().await;

        let mut conn = match guard.as_ref() {
            Some(conn) => conn.clone(),
            None => {
                let conn = self.client.get_multiplexed_tokio_connection().await?;
                *guard = Some(conn.clone());
                conn
            }
        };

        // Timeout 0 blocks until an element arrives
        let popped: RedisResult<Option<(String, String)>> = conn.blpop(&self.key, 0.0).await;

        match popped {
            Ok(Some((_, payload))) => self.decode(&payload),
            Ok(None) => Err(QueueError::Redis(RedisError::from((
                redis::ErrorKind::ResponseError,
                "BLPOP returned no element",
            )))),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    *guard = None;
                }
                Err(QueueError::Redis(e))
            }
        }
    }

    async fn total(&self) -> QueueResult<usize> {
        let key = self.key.clone();
        let len: usize = self
            .execute(|mut conn| async move { conn.llen(&key).await })
            .await?;

        DispatchMetrics::set_queue_depth(len);
        Ok(len)
    }

    async fn clear(&self) -> QueueResult<usize> {
        let key = self.key.clone();
        let (len, _): (usize, usize) = self
            .execute(|mut conn| async move {
                redis::pipe()
                    .atomic()
                    .llen(&key)
                    .del(&key)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        DispatchMetrics::set_queue_depth(0);
        tracing::info!(key = %self.key, cleared = len, "Redis mail queue cleared");
        Ok(len)
    }
}
