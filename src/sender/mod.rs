//! Send orchestration.
//!
//! [`Mailer`] turns one [`SendRequest`] into one mail per expanded recipient:
//! it validates the address, merges data, renders the template in the
//! recipient's language and hands the mail to the queue or the transport.
//! Failures are collected per recipient; a batch never fails as a whole.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{DefaultsConfig, Settings};
use crate::dispatch::{DispatchCoordinator, DispatchStatsSnapshot};
use crate::labels::{LabelError, Translations};
use crate::mail::{expand_recipients, is_valid_address, Mail, SendRequest};
use crate::metrics::SendMetrics;
use crate::queue::{create_mail_queue, MailQueue, QueueError};
use crate::template::{
    CompiledTemplate, TemplateData, TemplateError, TemplateOptions, Templater, TemplaterConfig,
};
use crate::transport::{create_transport, DeliveryReceipt, MailTransport, TransportError};

/// Why one recipient's mail was not sent
#[derive(Debug, Error)]
pub enum SendFailure {
    #[error("Invalid email address '{0}'")]
    InvalidAddress(String),

    #[error(transparent)]
    Template(Arc<TemplateError>),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl SendFailure {
    /// Short label, used as metric label
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "invalid_address",
            Self::Template(_) => "template",
            Self::Transport(_) => "transport",
            Self::Queue(_) => "queue",
        }
    }
}

/// A failed send, with the mail that was about to be sent
#[derive(Debug, Error)]
#[error("Error on sending mail to '{}'", .mail.to.address)]
pub struct SendError {
    /// Recipient, template, language and merged data of the failed send
    pub mail: Box<Mail>,
    #[source]
    pub cause: SendFailure,
}

impl SendError {
    pub fn new(mail: Mail, cause: SendFailure) -> Self {
        Self {
            mail: Box::new(mail),
            cause,
        }
    }
}

/// Outcome of one recipient's successful send
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "route", rename_all = "lowercase")]
pub enum SendReceipt {
    /// Sent directly through the transport
    Delivered(DeliveryReceipt),
    /// Pushed to the queue
    Queued { id: Uuid, position: usize },
}

/// Results and errors of a send request.
///
/// Holds exactly one entry per expanded recipient.
#[derive(Debug, Default)]
pub struct SendOutcome {
    pub results: Vec<SendReceipt>,
    pub errors: Vec<SendError>,
}

impl SendOutcome {
    pub fn len(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Startup failures
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Invalid transporter configuration: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to create mail queue: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to load translations: {0}")]
    Labels(#[from] LabelError),
}

/// Send context: templates, transport, queue and defaults
pub struct Mailer {
    templater: Arc<Templater>,
    transport: MailTransport,
    queue: Option<Arc<dyn MailQueue>>,
    defaults: DefaultsConfig,
    coordinator: Arc<DispatchCoordinator>,
}

impl Mailer {
    pub fn new(
        templater: Arc<Templater>,
        transport: MailTransport,
        queue: Option<Arc<dyn MailQueue>>,
        defaults: DefaultsConfig,
    ) -> Self {
        let coordinator = Arc::new(DispatchCoordinator::new(transport.clone(), queue.clone()));

        Self {
            templater,
            transport,
            queue,
            defaults,
            coordinator,
        }
    }

    /// Build every collaborator from settings.
    ///
    /// The transport is verified unless `disable_verify` is set.
    pub async fn from_settings(settings: &Settings) -> Result<Self, InitError> {
        let translations = match &settings.translations.path {
            Some(path) => Translations::from_file(path)?,
            None => Translations::default(),
        };

        let templater = Templater::from_dir(
            settings.templates.dir.clone(),
            Arc::new(translations),
            TemplaterConfig {
                default_lang: settings.defaults.lang.clone(),
                cache_capacity: settings.templates.cache_capacity,
            },
        );

        let queue = if settings.defaults.queue {
            Some(create_mail_queue(&settings.queue, &settings.redis)?)
        } else {
            tracing::info!("Mail queue disabled, mails are sent directly");
            None
        };

        let transport = create_transport(&settings.transport)?;

        if !settings.disable_verify {
            if let Err(e) = transport.verify().await {
                tracing::error!(error = %e, "Invalid transporter configuration");
                return Err(InitError::Transport(e));
            }
        }

        Ok(Self::new(
            Arc::new(templater),
            transport,
            queue,
            settings.defaults.clone(),
        ))
    }

    pub fn templater(&self) -> &Arc<Templater> {
        &self.templater
    }

    pub fn transport(&self) -> &MailTransport {
        &self.transport
    }

    pub fn queue(&self) -> Option<&Arc<dyn MailQueue>> {
        self.queue.as_ref()
    }

    pub fn defaults(&self) -> &DefaultsConfig {
        &self.defaults
    }

    pub fn dispatch_stats(&self) -> DispatchStatsSnapshot {
        self.coordinator.stats()
    }

    /// Run the queue draining loop on the current task
    pub async fn task(&self) {
        self.coordinator.run().await
    }

    /// Spawn the queue draining loop; abort the handle to stop it
    pub fn spawn_task(&self) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    }

    /// Send a request to every recipient
    #[tracing::instrument(
        name = "mailer.send_mail",
        skip(self, request),
        fields(template = ?request.template, queue = request.queue)
    )]
    pub async fn send_mail(&self, request: SendRequest) -> SendOutcome {
        let default_lang = request
            .lang
            .clone()
            .filter(|lang| !lang.is_empty())
            .unwrap_or_else(|| self.defaults.lang.clone());

        let compiled = match &request.template {
            Some(name) => {
                let options = TemplateOptions {
                    lang: Some(default_lang.clone()),
                    labels: request.labels.clone(),
                    disable_html: request.disable_html,
                    disable_text: request.disable_text,
                    disable_subject: request.disable_subject,
                };
                Some(self.templater.compile(name, &options).await.map_err(Arc::new))
            }
            None => None,
        };

        let recipients = expand_recipients(&request.to);
        SendMetrics::record_recipients(recipients.len());

        let mut outcome = SendOutcome::default();

        for recipient in recipients {
            let lang = recipient
                .lang
                .clone()
                .filter(|lang| !lang.is_empty())
                .unwrap_or_else(|| default_lang.clone());

            let mut data = Map::new();
            data.insert("lang".to_string(), Value::String(lang.clone()));
            data.extend(request.data.clone());
            data.extend(recipient.data.clone());
            data.extend(self.defaults.data.clone());

            let mut mail = Mail::new(recipient, lang);
            mail.from = request.from.clone().or_else(|| self.defaults.from.clone());
            mail.template = request.template.clone();
            mail.subject = request.subject.clone();
            mail.text = request.text.clone();
            mail.html = request.html.clone();
            mail.data = data;

            if !is_valid_address(&mail.to.address) {
                let address = mail.to.address.clone();
                self.fail(&mut outcome, mail, SendFailure::InvalidAddress(address));
                continue;
            }

            match &compiled {
                Some(Ok(compiled)) => self.render_into(&mut mail, compiled, &request),
                Some(Err(e)) => {
                    self.fail(&mut outcome, mail, SendFailure::Template(e.clone()));
                    continue;
                }
                None => {}
            }

            match self.route(&mail, request.queue).await {
                Ok(receipt) => outcome.results.push(receipt),
                Err(cause) => self.fail(&mut outcome, mail, cause),
            }
        }

        tracing::info!(
            sent = outcome.results.len(),
            failed = outcome.errors.len(),
            "Send request processed"
        );
        outcome
    }

    /// Render the compiled artifacts over the request's raw content
    fn render_into(&self, mail: &mut Mail, compiled: &CompiledTemplate, request: &SendRequest) {
        let labels = match (&request.labels, &mail.template) {
            (Some(labels), _) => labels.clone(),
            (None, Some(template)) => self.templater.labels(template, &mail.lang),
            (None, None) => return,
        };

        let data = TemplateData::new(mail.data.clone())
            .lang(mail.lang.clone())
            .labels(labels);
        let rendered = compiled.render(&data);

        if let Some(html) = rendered.html {
            mail.html = Some(html);
        }
        if let Some(text) = rendered.text {
            mail.text = Some(text);
        }
        if let Some(subject) = rendered.subject {
            mail.subject = Some(subject);
        }
    }

    async fn route(&self, mail: &Mail, use_queue: bool) -> Result<SendReceipt, SendFailure> {
        match (&self.queue, use_queue) {
            (Some(queue), true) => {
                let position = queue.push(mail.clone()).await?;
                SendMetrics::record_accepted("queue");
                tracing::debug!(mail_id = %mail.id, to = %mail.to.address, position, "Mail queued");
                Ok(SendReceipt::Queued {
                    id: mail.id,
                    position,
                })
            }
            _ => {
                let receipt = self.transport.send_mail(mail).await?;
                SendMetrics::record_accepted("direct");
                tracing::debug!(mail_id = %mail.id, to = %mail.to.address, "Mail sent");
                Ok(SendReceipt::Delivered(receipt))
            }
        }
    }

    fn fail(&self, outcome: &mut SendOutcome, mail: Mail, cause: SendFailure) {
        SendMetrics::record_failed(cause.reason());
        let error = SendError::new(mail, cause);

        tracing::error!(
            to = %error.mail.to.address,
            template = ?error.mail.template,
            lang = %error.mail.lang,
            data = ?error.mail.data,
            error = %error.cause,
            "Error on sending mail"
        );
        outcome.errors.push(error);
    }
}
