use chrono::{DateTime, Utc};
use lettre::address::AddressError;
use lettre::message::Mailbox;
use lettre::Address;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::labels::LabelGetter;

/// A single mail recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    /// Mail address (may hold an address list before expansion)
    pub address: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Language override for this recipient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Data merged over the request's shared data
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            lang: None,
            data: Map::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Set recipient data; non-object values are ignored
    pub fn data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = map;
        }
        self
    }

    /// Mailbox with the display name, if any
    pub fn mailbox(&self) -> Result<Mailbox, AddressError> {
        let email: Address = self.address.parse()?;
        let name = self.name.clone().filter(|name| !name.is_empty());

        Ok(Mailbox::new(name, email))
    }
}

/// Recipient as written by callers: an address (list) string or an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecipientSpec {
    /// One or more comma-separated addresses
    List(String),
    /// A recipient object, whose `address` may itself be a list
    Detailed(Recipient),
}

impl From<&str> for RecipientSpec {
    fn from(value: &str) -> Self {
        Self::List(value.to_string())
    }
}

impl From<String> for RecipientSpec {
    fn from(value: String) -> Self {
        Self::List(value)
    }
}

impl From<Recipient> for RecipientSpec {
    fn from(value: Recipient) -> Self {
        Self::Detailed(value)
    }
}

fn deserialize_recipients<'de, D>(deserializer: D) -> Result<Vec<RecipientSpec>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<RecipientSpec>),
        One(RecipientSpec),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(specs) => specs,
        OneOrMany::One(spec) => vec![spec],
    })
}

fn default_true() -> bool {
    true
}

/// A logical send: one template, one or many recipients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    /// Template directory name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Recipients, before expansion
    #[serde(deserialize_with = "deserialize_recipients")]
    pub to: Vec<RecipientSpec>,

    /// Sender, falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Raw subject, used when the template has no subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Raw text body, used when the template has no text part
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Raw html body, used when the template has no html part
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    /// Data shared by every recipient
    #[serde(default)]
    pub data: Map<String, Value>,

    /// Language default for the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    /// Push to the queue (default) or send directly
    #[serde(default = "default_true")]
    pub queue: bool,

    #[serde(default)]
    pub disable_html: bool,

    #[serde(default)]
    pub disable_text: bool,

    #[serde(default)]
    pub disable_subject: bool,

    /// Label getter overriding the template's translations
    #[serde(skip)]
    pub labels: Option<LabelGetter>,
}

impl Default for SendRequest {
    fn default() -> Self {
        Self {
            template: None,
            to: Vec::new(),
            from: None,
            subject: None,
            text: None,
            html: None,
            data: Map::new(),
            lang: None,
            queue: true,
            disable_html: false,
            disable_text: false,
            disable_subject: false,
            labels: None,
        }
    }
}

impl SendRequest {
    /// Request rendering the given template
    pub fn template(name: impl Into<String>) -> Self {
        Self {
            template: Some(name.into()),
            ..Default::default()
        }
    }

    /// Add a recipient (address, address list or [`Recipient`])
    pub fn to(mut self, recipient: impl Into<RecipientSpec>) -> Self {
        self.to.push(recipient.into());
        self
    }

    /// Set the sender
    pub fn sender(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Set shared data; non-object values are ignored
    pub fn data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = map;
        }
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Send directly through the transport instead of the queue
    pub fn direct(mut self) -> Self {
        self.queue = false;
        self
    }

    pub fn disable_html(mut self) -> Self {
        self.disable_html = true;
        self
    }

    pub fn disable_text(mut self) -> Self {
        self.disable_text = true;
        self
    }

    pub fn disable_subject(mut self) -> Self {
        self.disable_subject = true;
        self
    }

    pub fn labels(mut self, labels: LabelGetter) -> Self {
        self.labels = Some(labels);
        self
    }
}

/// A fully assembled mail for one recipient.
///
/// This is the unit pushed to the queue and handed to transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: Recipient,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub lang: String,
    /// Data the template was rendered with
    #[serde(default)]
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Mail {
    pub fn new(to: Recipient, lang: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: None,
            to,
            subject: None,
            text: None,
            html: None,
            template: None,
            lang: lang.into(),
            data: Map::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_deserializes_single_recipient() {
        let request: SendRequest = serde_json::from_value(json!({
            "template": "helloWorld",
            "to": "a@example.com, b@example.com"
        }))
        .unwrap();

        assert_eq!(request.to, vec![RecipientSpec::from("a@example.com, b@example.com")]);
        assert!(request.queue);
    }

    #[test]
    fn test_request_deserializes_mixed_recipients() {
        let request: SendRequest = serde_json::from_value(json!({
            "to": [
                "a@example.com",
                { "address": "kaore@example.com", "lang": "fr", "data": { "username": "kaore" } }
            ],
            "queue": false
        }))
        .unwrap();

        assert_eq!(request.to.len(), 2);
        match &request.to[1] {
            RecipientSpec::Detailed(recipient) => {
                assert_eq!(recipient.lang.as_deref(), Some("fr"));
                assert_eq!(recipient.data["username"], "kaore");
            }
            other => panic!("expected detailed recipient, got {:?}", other),
        }
        assert!(!request.queue);
    }

    #[test]
    fn test_mailbox() {
        let bare = Recipient::new("a@example.com").mailbox().unwrap();
        assert_eq!(bare.name, None);
        assert_eq!(bare.email.to_string(), "a@example.com");

        let named = Recipient::new("a@example.com").name("Kaoré").mailbox().unwrap();
        assert_eq!(named.name.as_deref(), Some("Kaoré"));

        let quoted = Recipient::new("a@example.com")
            .name("Kevin \"KB\" Bertho")
            .mailbox()
            .unwrap();
        assert_eq!(quoted.name.as_deref(), Some("Kevin \"KB\" Bertho"));
        assert_eq!(quoted.email.to_string(), "a@example.com");

        assert!(Recipient::new("not an address").mailbox().is_err());
    }

    #[test]
    fn test_mail_serialization_skips_empty_parts() {
        let mail = Mail::new(Recipient::new("a@example.com"), "en");
        let json = serde_json::to_string(&mail).unwrap();

        assert!(!json.contains("subject"));
        let back: Mail = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mail);
    }
}
