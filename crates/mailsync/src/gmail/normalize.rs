//! Gmail API response normalization
//!
//! Converts Gmail API responses to local domain models.

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use super::api::{GmailMessage, MessagePart, MessagePayload};
use crate::models::{ExternalMetadata, LabelCatalog, Message, MessageId, classify_labels};

/// Normalize a full-format Gmail message into a local Message
pub fn normalize_message(
    gmail_msg: GmailMessage,
    account_id: &str,
    catalog: &LabelCatalog,
) -> Result<Message> {
    let payload = gmail_msg
        .payload
        .as_ref()
        .context("Message has no payload")?;

    let internal_date = parse_internal_date(&gmail_msg.internal_date).with_context(|| {
        format!("Invalid internal date {:?}", gmail_msg.internal_date)
    })?;

    let from = extract_header(payload, "From").unwrap_or_default();
    let to = extract_header(payload, "To").unwrap_or_default();
    let subject = extract_header(payload, "Subject").unwrap_or_default();

    let received_date = extract_header(payload, "Received")
        .and_then(|value| parse_received_date(&value))
        .unwrap_or(internal_date);

    let body = extract_html_body(payload)
        .or_else(|| extract_plain_text_body(payload))
        .unwrap_or_default();

    let label_ids = gmail_msg.label_ids.unwrap_or_default();
    let (flags, custom_labels) = classify_labels(&label_ids, catalog);

    let external_metadata = ExternalMetadata {
        history_id: gmail_msg.history_id,
        label_ids,
        size_estimate: gmail_msg.size_estimate,
    };

    Ok(Message::builder(MessageId::new(gmail_msg.id), account_id)
        .thread_id(gmail_msg.thread_id)
        .from(from)
        .to(to)
        .subject(subject)
        .snippet(decode_html_entities(&gmail_msg.snippet))
        .body(body)
        .internal_date(internal_date)
        .received_date(received_date)
        .flags(flags)
        .custom_labels(custom_labels)
        .external_metadata(external_metadata)
        .build())
}

/// Parse Gmail's internalDate (milliseconds since epoch, as a string)
pub fn parse_internal_date(raw: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = raw.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Date of a `Received:` header, i.e. the text after its last `;`
///
/// `from mx.example.com by mx.google.com; Tue, 1 Jul 2003 10:52:37 +0200 (CEST)`
fn parse_received_date(value: &str) -> Option<DateTime<Utc>> {
    let date = value.rsplit(';').next()?.trim();
    let date = match date.find(" (") {
        Some(idx) => &date[..idx],
        None => date,
    };
    DateTime::parse_from_rfc2822(date)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Extract a header value by name
///
/// Returns the first match, which for `Received` is the most recent hop.
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

/// Extract plain text body from message payload
fn extract_plain_text_body(payload: &MessagePayload) -> Option<String> {
    // Check if this is a simple message with body data
    if let Some(body) = &payload.body
        && let Some(data) = &body.data
        && payload
            .mime_type
            .as_ref()
            .is_some_and(|m| m.starts_with("text/plain"))
    {
        return decode_base64_body(data);
    }

    // Check parts for text/plain
    if let Some(parts) = &payload.parts
        && let Some(text) = find_part_with_mime(parts, "text/plain")
    {
        return Some(text);
    }

    // Fall back to any body content
    if let Some(body) = &payload.body
        && let Some(data) = &body.data
        && !data.is_empty()
    {
        return decode_base64_body(data);
    }

    None
}

/// Extract HTML body from message payload
fn extract_html_body(payload: &MessagePayload) -> Option<String> {
    if let Some(body) = &payload.body
        && let Some(data) = &body.data
        && payload
            .mime_type
            .as_ref()
            .is_some_and(|m| m.starts_with("text/html"))
    {
        return decode_base64_body(data);
    }

    payload
        .parts
        .as_ref()
        .and_then(|parts| find_part_with_mime(parts, "text/html"))
}

/// Depth-first search of message parts for the first decodable `mime` part
fn find_part_with_mime(parts: &[MessagePart], mime: &str) -> Option<String> {
    for part in parts {
        if part.mime_type.as_ref().is_some_and(|m| m.starts_with(mime))
            && let Some(body) = &part.body
            && let Some(data) = &body.data
            && let Some(text) = decode_base64_body(data)
        {
            return Some(text);
        }

        if let Some(nested) = &part.parts
            && let Some(text) = find_part_with_mime(nested, mime)
        {
            return Some(text);
        }
    }

    None
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data) {
            return Some(String::from_utf8_lossy(&decoded).into_owned());
        }
    }

    None
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
