//! Mail data model: send requests, recipients and assembled mails.

mod address;
mod types;

pub use address::{expand_recipients, is_valid_address, parse_address_list};
pub use types::{Mail, Recipient, RecipientSpec, SendRequest};
