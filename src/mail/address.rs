//! Recipient expansion and address validation.

use lettre::Address;
use mailparse::{addrparse, MailAddr, SingleInfo};

use super::{Recipient, RecipientSpec};

/// Expand recipient specs into one [`Recipient`] per address.
///
/// Address lists are split; object recipients keep their `lang` and `data` on
/// every address they expand to. Strings that cannot be parsed are kept as a
/// single recipient so validation reports them.
pub fn expand_recipients(specs: &[RecipientSpec]) -> Vec<Recipient> {
    let mut recipients = Vec::with_capacity(specs.len());

    for spec in specs {
        match spec {
            RecipientSpec::List(raw) => {
                recipients.extend(
                    parse_address_list(raw)
                        .into_iter()
                        .map(|(name, address)| Recipient {
                            name,
                            ..Recipient::new(address)
                        }),
                );
            }
            RecipientSpec::Detailed(recipient) => {
                recipients.extend(parse_address_list(&recipient.address).into_iter().map(
                    |(name, address)| Recipient {
                        address,
                        name: name.or_else(|| recipient.name.clone()),
                        lang: recipient.lang.clone(),
                        data: recipient.data.clone(),
                    },
                ));
            }
        }
    }

    recipients
}

/// Split an address list into `(display name, address)` pairs
pub fn parse_address_list(raw: &str) -> Vec<(Option<String>, String)> {
    let raw = drop_empty_entries(raw);
    let raw = raw.as_str();
    if raw.is_empty() {
        return Vec::new();
    }

    let parsed = match addrparse(raw) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![single(info)],
                MailAddr::Group(group) => group.addrs.iter().map(single).collect(),
            })
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::debug!(error = %e, raw = %raw, "Unparseable address list");
            Vec::new()
        }
    };

    if parsed.is_empty() {
        vec![(None, raw.to_string())]
    } else {
        parsed
    }
}

/// Remove blank entries from a comma-separated list.
///
/// Commas inside quoted display names or angle brackets do not split.
fn drop_empty_entries(raw: &str) -> String {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut angle = false;
    let mut escaped = false;

    for c in raw.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '<' if !quoted => angle = true,
            '>' if !quoted => angle = false,
            ',' if !quoted && !angle => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    entries.push(current);

    entries
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn single(info: &SingleInfo) -> (Option<String>, String) {
    let name = info
        .display_name
        .as_ref()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    (name, info.addr.trim().to_string())
}

/// Check the syntax of a single mail address
pub fn is_valid_address(address: &str) -> bool {
    address.parse::<Address>().is_ok()
}
