//! Message qualification and field extraction.
//!
//! Pure transformations over raw RFC 822 bytes: decide whether a message's
//! sender matches one of a mailbox's filters, pull out the displayable
//! fields, and project them into the HTML card handed to the renderer.

use mailparse::{MailAddr, MailHeaderMap};

/// Outcome of matching a From header against a mailbox's filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderMatch {
    /// Bare address as it appeared on the wire.
    pub address: String,
    /// `"<address> <alias>"` when the matched filter carries an alias,
    /// otherwise the bare address.
    pub label: String,
}

/// Fields extracted from a full message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMessage {
    pub subject: String,
    /// Decoded text/plain and text/html leaf payloads in structural order.
    pub body_parts: Vec<String>,
    /// Declared filenames of non-text leaf parts in structural order.
    pub attachment_names: Vec<String>,
}

/// Parse the From header out of raw headers and match it against the
/// mailbox's `(sender, alias)` filters.
///
/// Matching is exact and case-sensitive: `a@x.com` matches the filter
/// `a@x.com` but not `A@x.com`. Display names are discarded before
/// matching.
pub fn qualify_sender(
    raw_headers: &[u8],
    filters: &[(String, Option<String>)],
) -> Option<SenderMatch> {
    let (headers, _) = mailparse::parse_headers(raw_headers).ok()?;
    let from_header = headers.get_first_value("From")?;
    let address = primary_address(&from_header)?;

    let (sender, alias) = filters.iter().find(|(sender, _)| *sender == address)?;
    let label = match alias.as_deref() {
        Some(alias) if !alias.is_empty() => format!("{sender} {alias}"),
        _ => sender.clone(),
    };

    Some(SenderMatch {
        address: address.clone(),
        label,
    })
}

/// Extract subject, body text, and attachment names from a full raw message.
///
/// An absent or undecodable subject becomes the empty string. Header values
/// arrive RFC 2047 word-decoded from the parser.
pub fn extract_message(raw_message: &[u8]) -> anyhow::Result<ExtractedMessage> {
    let parsed = mailparse::parse_mail(raw_message)?;

    let subject = parsed
        .headers
        .get_first_value("Subject")
        .unwrap_or_default();

    let mut body_parts = Vec::new();
    let mut attachment_names = Vec::new();
    collect_parts(&parsed, &mut body_parts, &mut attachment_names);

    Ok(ExtractedMessage {
        subject,
        body_parts,
        attachment_names,
    })
}

/// Address-only view of the first mailbox in an address header.
fn primary_address(value: &str) -> Option<String> {
    let addresses = mailparse::addrparse(value).ok()?.into_inner();
    for address in addresses {
        match address {
            MailAddr::Single(single) => return Some(single.addr),
            MailAddr::Group(group) => {
                if let Some(single) = group.addrs.into_iter().next() {
                    return Some(single.addr);
                }
            }
        }
    }
    None
}

fn collect_parts(
    part: &mailparse::ParsedMail<'_>,
    body_parts: &mut Vec<String>,
    attachment_names: &mut Vec<String>,
) {
    if part.subparts.is_empty() {
        let mime_type = part.ctype.mimetype.to_ascii_lowercase();
        if mime_type.starts_with("text/plain") || mime_type.starts_with("text/html") {
            if let Ok(body) = part.get_body() {
                body_parts.push(body);
            }
            return;
        }

        let disposition = part.get_content_disposition();
        let filename = disposition
            .params
            .get("filename")
            .cloned()
            .or_else(|| part.ctype.params.get("name").cloned());
        if let Some(filename) = filename {
            attachment_names.push(filename);
        }
        return;
    }

    for subpart in &part.subparts {
        collect_parts(subpart, body_parts, attachment_names);
    }
}

const CARD_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: sans-serif; width: 600px; padding: 16px;">
  <div style="border: 1px solid #ccc; border-radius: 8px; padding: 16px;">
    <p><b>From:</b> {from}</p>
    <p><b>To:</b> {to}</p>
    <p><b>Subject:</b> {subject}</p>
    <hr>
    <p>{body}</p>
    <p><b>Attachments:</b> {attachments}</p>
  </div>
</body>
</html>"#;

/// Assemble the fixed HTML card handed to the external renderer.
///
/// Body parts are concatenated with blank lines, attachment names joined
/// with pipes. HTML-significant characters in the fields are escaped; body
/// newlines become `<br>`.
pub fn render_card(sender_label: &str, recipient: &str, message: &ExtractedMessage) -> String {
    let body = escape_html(&message.body_parts.join("\n\n")).replace('\n', "<br>");
    let attachments = if message.attachment_names.is_empty() {
        "-".to_string()
    } else {
        escape_html(&message.attachment_names.join(" | "))
    };

    CARD_TEMPLATE
        .replace("{from}", &escape_html(sender_label))
        .replace("{to}", &escape_html(recipient))
        .replace("{subject}", &escape_html(&message.subject))
        .replace("{body}", &body)
        .replace("{attachments}", &attachments)
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::{ExtractedMessage, extract_message, qualify_sender, render_card};
    use indoc::indoc;

    fn boss_filters() -> Vec<(String, Option<String>)> {
        vec![("boss@co.com".to_string(), Some("Boss".to_string()))]
    }

    #[test]
    fn matching_sender_gets_alias_label() {
        let headers = b"From: The Boss <boss@co.com>\r\nSubject: Q3\r\n\r\n";
        let matched = qualify_sender(headers, &boss_filters()).unwrap();
        assert_eq!(matched.address, "boss@co.com");
        assert_eq!(matched.label, "boss@co.com Boss");
    }

    #[test]
    fn unmatched_sender_is_not_qualified() {
        let headers = b"From: random@x.com\r\nSubject: hi\r\n\r\n";
        assert_eq!(qualify_sender(headers, &boss_filters()), None);
    }

    #[test]
    fn matching_is_case_sensitive_and_exact() {
        let filters = vec![("a@x.com".to_string(), None)];
        assert!(qualify_sender(b"From: a@x.com\r\n\r\n", &filters).is_some());
        assert!(qualify_sender(b"From: A@x.com\r\n\r\n", &filters).is_none());
        assert!(qualify_sender(b"From: sub.a@x.com\r\n\r\n", &filters).is_none());
    }

    #[test]
    fn empty_alias_falls_back_to_bare_address() {
        let filters = vec![("a@x.com".to_string(), Some(String::new()))];
        let matched = qualify_sender(b"From: a@x.com\r\n\r\n", &filters).unwrap();
        assert_eq!(matched.label, "a@x.com");
    }

    #[test]
    fn qualify_is_deterministic() {
        let headers = b"From: boss@co.com\r\n\r\n";
        let first = qualify_sender(headers, &boss_filters());
        let second = qualify_sender(headers, &boss_filters());
        assert_eq!(first, second);
    }

    #[test]
    fn extracts_subject_and_plain_body() {
        let raw = indoc! {"
            From: boss@co.com\r
            Subject: Q3\r
            Content-Type: text/plain\r
            \r
            Numbers attached.\r
        "};
        let message = extract_message(raw.as_bytes()).unwrap();
        assert_eq!(message.subject, "Q3");
        assert_eq!(message.body_parts.len(), 1);
        assert!(message.body_parts[0].contains("Numbers attached."));
        assert!(message.attachment_names.is_empty());
    }

    #[test]
    fn decodes_word_encoded_subject() {
        let raw = b"Subject: =?UTF-8?B?0J/RgNC40LLQtdGC?=\r\n\r\n";
        let message = extract_message(raw).unwrap();
        assert_eq!(message.subject, "\u{41f}\u{440}\u{438}\u{432}\u{435}\u{442}");
    }

    #[test]
    fn walks_multipart_in_structural_order() {
        let raw = indoc! {"
            From: boss@co.com\r
            Subject: report\r
            MIME-Version: 1.0\r
            Content-Type: multipart/mixed; boundary=outer\r
            \r
            --outer\r
            Content-Type: text/plain\r
            \r
            first\r
            --outer\r
            Content-Type: application/pdf; name=\"q3.pdf\"\r
            Content-Disposition: attachment; filename=\"q3.pdf\"\r
            Content-Transfer-Encoding: base64\r
            \r
            AAAA\r
            --outer\r
            Content-Type: text/html\r
            \r
            <p>second</p>\r
            --outer--\r
        "};
        let message = extract_message(raw.as_bytes()).unwrap();
        assert_eq!(message.body_parts.len(), 2);
        assert!(message.body_parts[0].contains("first"));
        assert!(message.body_parts[1].contains("second"));
        assert_eq!(message.attachment_names, vec!["q3.pdf"]);
    }

    #[test]
    fn unnamed_binary_parts_are_ignored() {
        let raw = indoc! {"
            Content-Type: multipart/mixed; boundary=b\r
            \r
            --b\r
            Content-Type: application/octet-stream\r
            \r
            AAAA\r
            --b--\r
        "};
        let message = extract_message(raw.as_bytes()).unwrap();
        assert!(message.attachment_names.is_empty());
        assert!(message.body_parts.is_empty());
    }

    #[test]
    fn attachment_disposition_without_filename_is_ignored() {
        let raw = indoc! {"
            Content-Type: multipart/mixed; boundary=b\r
            \r
            --b\r
            Content-Type: application/octet-stream\r
            Content-Disposition: attachment\r
            \r
            AAAA\r
            --b--\r
        "};
        let message = extract_message(raw.as_bytes()).unwrap();
        assert!(message.attachment_names.is_empty());
    }

    #[test]
    fn card_joins_attachments_with_pipes_and_escapes_fields() {
        let message = ExtractedMessage {
            subject: "Q3 <draft>".to_string(),
            body_parts: vec!["line one".to_string(), "line two".to_string()],
            attachment_names: vec!["a.pdf".to_string(), "b.xls".to_string()],
        };
        let card = render_card("boss@co.com Boss", "me@example.com", &message);
        assert!(card.contains("boss@co.com Boss"));
        assert!(card.contains("Q3 &lt;draft&gt;"));
        assert!(card.contains("line one<br><br>line two"));
        assert!(card.contains("a.pdf | b.xls"));
    }
}
