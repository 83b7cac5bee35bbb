//! Transport rendering mails to JSON instead of delivering them.

use async_trait::async_trait;

use crate::mail::Mail;

use super::{message_id, DeliveryReceipt, Envelope, Transport, TransportResult};

/// Dry-run transport: the receipt's `message` holds the mail as JSON
#[derive(Debug, Default, Clone)]
pub struct JsonTransport;

impl JsonTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for JsonTransport {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn send_mail(&self, mail: &Mail) -> TransportResult<DeliveryReceipt> {
        let message = serde_json::to_string(mail)?;

        tracing::debug!(mail_id = %mail.id, to = %mail.to.address, "Mail rendered to JSON");

        Ok(DeliveryReceipt {
            message_id: message_id(mail),
            envelope: Envelope::of(mail),
            response: None,
            message: Some(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Recipient;

    #[tokio::test]
    async fn test_receipt_holds_mail_json() {
        let mut mail = Mail::new(Recipient::new("kim@example.com").name("Kim"), "fr");
        mail.from = Some("noreply@example.com".to_string());
        mail.subject = Some("Salut".to_string());

        let receipt = JsonTransport::new().send_mail(&mail).await.unwrap();

        assert_eq!(receipt.message_id, format!("<{}@example.com>", mail.id));
        assert_eq!(receipt.envelope.from.as_deref(), Some("noreply@example.com"));
        assert_eq!(receipt.envelope.to, vec!["kim@example.com".to_string()]);

        let decoded: Mail = serde_json::from_str(receipt.message.as_deref().unwrap()).unwrap();
        assert_eq!(decoded, mail);
    }
}
