// Core mail pipeline
pub mod dispatch;
pub mod labels;
pub mod mail;
pub mod queue;
pub mod sender;
pub mod template;
pub mod transport;

// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Preview server
pub mod api;
pub mod server;

pub use mail::{Mail, Recipient, SendRequest};
pub use sender::{Mailer, SendError, SendOutcome, SendReceipt};
pub use template::{RenderedTemplate, TemplateData, TemplateOptions, Templater};
