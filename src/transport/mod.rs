//! Mail transports.
//!
//! A [`Transport`] delivers one assembled [`Mail`]. [`MailTransport`] is the
//! handle the rest of the crate holds; whether it is slot limited is decided
//! once, when it is built:
//!
//! - [`MailTransport::Pooled`]: wrapped in a [`PooledTransport`], exposing
//!   idle/busy state and send slots to the dispatch coordinator
//! - [`MailTransport::Simple`]: one send at a time, awaited by the caller

mod json;
mod pool;
mod rate_limit;
mod smtp;

pub use json::JsonTransport;
pub use pool::{PoolOptions, PooledTransport, SendSlot, TransportState};
pub use rate_limit::TokenBucket;
pub use smtp::SmtpTransport;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::{TransportConfig, TransportKind};
use crate::mail::Mail;

/// Transport-specific error type
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Mail has no sender")]
    MissingSender,

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Message(String),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The remote side refused the mail
    #[error("Mail rejected: {0}")]
    Rejected(String),

    #[error("Transport verification failed: {0}")]
    Verify(String),

    #[error("Transport is closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Sender and recipients a mail was delivered for
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub from: Option<String>,
    pub to: Vec<String>,
}

impl Envelope {
    pub fn of(mail: &Mail) -> Self {
        Self {
            from: mail.from.clone(),
            to: vec![mail.to.address.clone()],
        }
    }
}

/// What a transport reports for a delivered mail
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub envelope: Envelope,
    /// Server response line, when the transport talks to a server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Rendered message, for transports that do not deliver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Message-ID of a mail, `<id@sender-domain>`
pub fn message_id(mail: &Mail) -> String {
    let domain = mail
        .from
        .as_deref()
        .and_then(|from| from.rsplit_once('@'))
        .map(|(_, domain)| domain.trim_end_matches('>').trim())
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost");

    format!("<{}@{}>", mail.id, domain)
}

/// Delivers assembled mails
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short transport identifier
    fn name(&self) -> &'static str;

    async fn send_mail(&self, mail: &Mail) -> TransportResult<DeliveryReceipt>;

    /// Check the transport can deliver; called once at startup
    async fn verify(&self) -> TransportResult<()> {
        Ok(())
    }
}

/// Transport handle, pooled or simple
#[derive(Clone)]
pub enum MailTransport {
    Pooled(Arc<PooledTransport>),
    Simple(Arc<dyn Transport>),
}

impl MailTransport {
    pub fn pooled(inner: Arc<dyn Transport>, options: PoolOptions) -> Self {
        Self::Pooled(Arc::new(PooledTransport::new(inner, options)))
    }

    pub fn simple(inner: Arc<dyn Transport>) -> Self {
        Self::Simple(inner)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pooled(pool) => pool.name(),
            Self::Simple(transport) => transport.name(),
        }
    }

    /// Idle/busy state, `None` for simple transports
    pub fn state(&self) -> Option<TransportState> {
        match self {
            Self::Pooled(pool) => Some(pool.state()),
            Self::Simple(_) => None,
        }
    }

    pub async fn send_mail(&self, mail: &Mail) -> TransportResult<DeliveryReceipt> {
        match self {
            Self::Pooled(pool) => pool.send_mail(mail).await,
            Self::Simple(transport) => transport.send_mail(mail).await,
        }
    }

    pub async fn verify(&self) -> TransportResult<()> {
        match self {
            Self::Pooled(pool) => pool.verify().await,
            Self::Simple(transport) => transport.verify().await,
        }
    }
}

impl std::fmt::Debug for MailTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pooled(pool) => f
                .debug_struct("Pooled")
                .field("name", &pool.name())
                .field("max_connections", &pool.max_connections())
                .finish(),
            Self::Simple(transport) => f.debug_struct("Simple").field("name", &transport.name()).finish(),
        }
    }
}

/// Create the transport described by configuration
pub fn create_transport(config: &TransportConfig) -> TransportResult<MailTransport> {
    let inner: Arc<dyn Transport> = match config.kind {
        TransportKind::Smtp => Arc::new(SmtpTransport::new(config)?),
        TransportKind::Json => Arc::new(JsonTransport::new()),
    };

    tracing::info!(
        transport = inner.name(),
        host = %config.host,
        port = config.port,
        pool = config.pool,
        max_connections = config.max_connections,
        rate_limit = ?config.rate_limit,
        "Creating mail transport"
    );

    if config.pool {
        Ok(MailTransport::pooled(
            inner,
            PoolOptions::default()
                .max_connections(config.max_connections)
                .rate_limit(config.rate_limit, config.rate_delta()),
        ))
    } else {
        Ok(MailTransport::simple(inner))
    }
}
