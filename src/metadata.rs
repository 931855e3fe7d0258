use crate::models::{
    estimate_tokens, EmailRecord, ExtractedContent, Headers, NormalizedContent, RawMessage,
    RequestId,
};

pub const DEFAULT_SUBJECT: &str = "No Subject";
pub const DEFAULT_SENDER: &str = "Unknown Sender <unknown@example.com>";
pub const DEFAULT_DATE: &str = "Unknown";
pub const UNKNOWN_EMAIL: &str = "unknown@example.com";

/// Assembles the persisted record from a fetched message and its bodies
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataBuilder;

impl MetadataBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Drafts must be filtered out before this is called
    pub fn build(
        &self,
        message: &RawMessage,
        request_id: RequestId,
        content: &ExtractedContent,
        normalized: NormalizedContent,
    ) -> EmailRecord {
        let subject = header_or(&message.headers, "Subject", DEFAULT_SUBJECT);
        let from = header_or(&message.headers, "From", DEFAULT_SENDER);
        let date = header_or(&message.headers, "Date", DEFAULT_DATE);
        let (sender_name, sender_email) = parse_sender(from);

        let token_count = normalized
            .clean_markdown
            .as_deref()
            .map(estimate_tokens)
            .unwrap_or(0);

        EmailRecord {
            id: message.id.clone(),
            request_id,
            time_received: date.to_string(),
            is_read: !message.labels.is_unread(),
            sender_name,
            sender_email,
            subject: subject.to_string(),
            original_html: content.html.clone(),
            clean_html: normalized.clean_html,
            clean_markdown: normalized.clean_markdown,
            attachments: content.attachments.clone(),
            token_count,
        }
    }
}

/// Case-insensitive first match, or `default`
pub fn header_or<'a>(headers: &'a Headers, name: &str, default: &'a str) -> &'a str {
    headers.get_or(name, default)
}

/// Split a `From` value into display name and address
///
/// `"Name" <addr>` gives the unquoted name and the address. A value without an
/// angle-bracket address is taken as the name, with a placeholder address.
pub fn parse_sender(value: &str) -> (String, String) {
    if let Some(open) = value.find('<') {
        if let Some(len) = value[open..].find('>') {
            let name = value[..open].trim().trim_matches('"').trim().to_string();
            let email = value[open + 1..open + len].trim().to_string();
            return (name, email);
        }
    }
    (value.trim().to_string(), UNKNOWN_EMAIL.to_string())
}
