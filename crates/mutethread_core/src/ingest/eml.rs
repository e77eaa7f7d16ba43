//! RFC 5322 message parsing into store insert shapes.
//!
//! # Invariants
//! - Header values are unfolded and trimmed; source order is kept.
//! - Message-IDs are stored without angle brackets.

use super::{IngestError, IngestResult};
use crate::model::message::NewMessage;
use mail_parser::MessageParser;
use once_cell::sync::Lazy;
use regex::Regex;

static FOLDING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n[ \t]+").expect("valid folding regex"));
static MSG_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^<>\s]+)>").expect("valid message-id regex"));

/// Parses one raw message.
///
/// # Errors
/// - [`IngestError::Unparsable`] when the bytes are not a message.
/// - [`IngestError::MissingMessageId`] when no `Message-ID` is present.
pub fn parse_message(raw: &[u8]) -> IngestResult<NewMessage> {
    let message = MessageParser::new()
        .parse(raw)
        .ok_or(IngestError::Unparsable)?;
    let message_id = message
        .message_id()
        .map(strip_brackets)
        .filter(|value| !value.is_empty())
        .ok_or(IngestError::MissingMessageId)?;

    let source = message.raw_message();
    let mut headers = Vec::with_capacity(message.headers().len());
    for header in message.headers() {
        let name = header.name.as_str();
        let start = header.offset_start as usize;
        let end = header.offset_end as usize;
        let value = source
            .get(start..end)
            .map(|bytes| unfold(&String::from_utf8_lossy(bytes)))
            .unwrap_or_default();
        headers.push((name.to_string(), value));
    }

    // Decoded subject replaces the raw (possibly encoded-word) value.
    if let Some(subject) = message.subject() {
        for (name, value) in headers.iter_mut() {
            if name.eq_ignore_ascii_case("Subject") {
                *value = subject.to_string();
            }
        }
    }

    let in_reply_to = raw_header(&headers, "In-Reply-To")
        .and_then(|value| extract_message_ids(value).into_iter().next());
    let references = raw_header(&headers, "References")
        .map(extract_message_ids)
        .unwrap_or_default();
    let date = message.date().map(|date| date.to_timestamp()).unwrap_or(0);

    Ok(NewMessage {
        message_id,
        in_reply_to,
        references,
        date,
        headers,
        tags: Vec::new(),
    })
}

/// Extracts bracketed message ids in order of appearance.
pub fn extract_message_ids(value: &str) -> Vec<String> {
    MSG_ID_RE
        .captures_iter(value)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn raw_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(header, _)| header.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn strip_brackets(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn unfold(value: &str) -> String {
    FOLDING_RE.replace_all(value, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::{extract_message_ids, parse_message, unfold};
    use crate::ingest::IngestError;

    // Folded lines keep their leading whitespace.
    const REPLY: &str = concat!(
        "Message-ID: <child@example.com>\r\n",
        "From: Alice <alice@example.com>\r\n",
        "To: team@example.com,\r\n",
        " Me <me@example.com>\r\n",
        "Cc: boss@example.com\r\n",
        "Subject: Re: launch\r\n",
        "Date: Tue, 1 Oct 2024 10:00:00 +0000\r\n",
        "In-Reply-To: <root@example.com>\r\n",
        "References: <origin@example.com>\r\n",
        " <root@example.com>\r\n",
        "\r\n",
        "body\r\n",
    );

    #[test]
    fn parses_threading_headers_and_unfolds_values() {
        let message = parse_message(REPLY.as_bytes()).unwrap();
        assert_eq!(message.message_id, "child@example.com");
        assert_eq!(message.in_reply_to.as_deref(), Some("root@example.com"));
        assert_eq!(
            message.references,
            vec!["origin@example.com".to_string(), "root@example.com".to_string()]
        );
        assert_eq!(message.date, 1_727_776_800);

        let to = message
            .headers
            .iter()
            .find(|(name, _)| name == "To")
            .map(|(_, value)| value.as_str());
        assert_eq!(to, Some("team@example.com, Me <me@example.com>"));
    }

    #[test]
    fn missing_message_id_is_reported() {
        let raw = "From: a@example.com\r\nSubject: hi\r\n\r\nbody\r\n";
        assert!(matches!(
            parse_message(raw.as_bytes()),
            Err(IngestError::MissingMessageId)
        ));
    }

    #[test]
    fn extract_ids_ignores_text_between_brackets() {
        let ids = extract_message_ids("<a@x> (comment) <b@y>");
        assert_eq!(ids, vec!["a@x".to_string(), "b@y".to_string()]);
    }

    #[test]
    fn unfold_collapses_continuation_lines() {
        assert_eq!(unfold(" a,\r\n\tb\r\n"), "a, b");
    }
}
