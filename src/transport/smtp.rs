//! SMTP transport
//!
//! Uses the `lettre` crate to deliver mails through an SMTP relay. `lettre`
//! keeps its own pool of SMTP connections.

use async_trait::async_trait;
use lettre::{
    message::{header, Mailbox, MultiPart, SinglePart},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::TransportConfig;
use crate::mail::Mail;

use super::{message_id, DeliveryReceipt, Envelope, Transport, TransportError, TransportResult};

/// SMTP transport over `lettre`'s async client
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpTransport {
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        let mut builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        builder = builder
            .port(config.port)
            .pool_config(PoolConfig::new().max_size(config.max_connections.max(1) as u32));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            host: config.host.clone(),
        })
    }

    /// Build the MIME message of a mail
    pub fn build_message(mail: &Mail) -> TransportResult<Message> {
        let from_addr = mail.from.as_deref().ok_or(TransportError::MissingSender)?;
        let from: Mailbox = from_addr
            .parse()
            .map_err(|e: lettre::address::AddressError| TransportError::InvalidAddress {
                address: from_addr.to_string(),
                reason: e.to_string(),
            })?;

        let to: Mailbox = mail.to.mailbox().map_err(
            |e: lettre::address::AddressError| TransportError::InvalidAddress {
                address: mail.to.address.clone(),
                reason: e.to_string(),
            },
        )?;

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .message_id(Some(message_id(mail)));

        if let Some(subject) = &mail.subject {
            builder = builder.subject(subject);
        }

        let message = match (&mail.html, &mail.text) {
            (Some(html), Some(text)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            ),
            (Some(html), None) => builder
                .header(header::ContentType::TEXT_HTML)
                .body(html.clone()),
            (None, Some(text)) => builder
                .header(header::ContentType::TEXT_PLAIN)
                .body(text.clone()),
            (None, None) => builder
                .header(header::ContentType::TEXT_PLAIN)
                .body(String::new()),
        };

        message.map_err(|e| TransportError::Message(e.to_string()))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send_mail(&self, mail: &Mail) -> TransportResult<DeliveryReceipt> {
        let message = Self::build_message(mail)?;
        let response = self.transport.send(message).await?;

        let response = format!(
            "{} {}",
            response.code(),
            response.message().collect::<Vec<_>>().join(" ")
        );

        tracing::debug!(
            mail_id = %mail.id,
            to = %mail.to.address,
            response = %response,
            "Mail delivered over SMTP"
        );

        Ok(DeliveryReceipt {
            message_id: message_id(mail),
            envelope: Envelope::of(mail),
            response: Some(response),
            message: None,
        })
    }

    async fn verify(&self) -> TransportResult<()> {
        match self.transport.test_connection().await? {
            true => {
                tracing::info!(host = %self.host, "SMTP transport verified");
                Ok(())
            }
            false => Err(TransportError::Verify(format!(
                "SMTP server {} did not accept the connection",
                self.host
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Recipient;

    fn mail() -> Mail {
        let mut mail = Mail::new(Recipient::new("kim@example.com").name("Kim"), "en");
        mail.from = Some("Ara <noreply@example.com>".to_string());
        mail.subject = Some("Hello".to_string());
        mail
    }

    #[test]
    fn test_build_message_with_html_and_text() {
        let mut mail = mail();
        mail.text = Some("Hello Kim".to_string());
        mail.html = Some("<p>Hello Kim</p>".to_string());

        let message = SmtpTransport::build_message(&mail).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains(&format!("Message-ID: <{}@example.com>", mail.id)));
        assert_eq!(message.envelope().to().len(), 1);
    }

    #[test]
    fn test_build_message_text_only() {
        let mut mail = mail();
        mail.text = Some("Hello Kim".to_string());

        let message = SmtpTransport::build_message(&mail).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("text/plain"));
    }

    #[test]
    fn test_build_message_with_quoted_display_name() {
        let mut mail = mail();
        mail.to = Recipient::new("kim@example.com").name("Kim \"KB\" Lee");
        mail.text = Some("Hello Kim".to_string());

        let message = SmtpTransport::build_message(&mail).unwrap();
        assert_eq!(message.envelope().to()[0].to_string(), "kim@example.com");
    }

    #[test]
    fn test_build_message_requires_sender() {
        let mut mail = mail();
        mail.from = None;

        assert!(matches!(
            SmtpTransport::build_message(&mail),
            Err(TransportError::MissingSender)
        ));
    }

    #[test]
    fn test_build_message_rejects_invalid_recipient() {
        let mail = Mail::new(Recipient::new("not-an-address"), "en");
        let mut mail = Mail {
            from: Some("noreply@example.com".to_string()),
            ..mail
        };
        mail.text = Some("hi".to_string());

        assert!(matches!(
            SmtpTransport::build_message(&mail),
            Err(TransportError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_new_plain_transport() {
        let config = TransportConfig::default();
        let transport = SmtpTransport::new(&config).unwrap();
        assert_eq!(transport.name(), "smtp");
    }
}
