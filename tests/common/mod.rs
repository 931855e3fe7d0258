//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use gmail_export::client::{MailApi, MessagePage};
use gmail_export::error::{GmailError, Result};
use gmail_export::models::{EmailRecord, MessageId, RawMessage};
use gmail_export::sink::{RecordSink, SinkOutcome};
use mockall::mock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Inline text part shaped like a `messages.get` response part
pub fn text_part(mime_type: &str, content: &str) -> Value {
    json!({
        "partId": "0",
        "mimeType": mime_type,
        "filename": "",
        "headers": [{"name": "Content-Type", "value": format!("{}; charset=UTF-8", mime_type)}],
        "body": {
            "size": content.len(),
            "data": URL_SAFE_NO_PAD.encode(content.as_bytes())
        }
    })
}

/// Attachment part whose body lives behind an attachment id
pub fn attachment_part(mime_type: &str, filename: &str, attachment_id: &str) -> Value {
    json!({
        "partId": "1",
        "mimeType": mime_type,
        "filename": filename,
        "headers": [],
        "body": {"size": 2048, "attachmentId": attachment_id}
    })
}

pub fn multipart(mime_type: &str, parts: Vec<Value>) -> Value {
    json!({
        "partId": "",
        "mimeType": mime_type,
        "filename": "",
        "headers": [],
        "body": {"size": 0},
        "parts": parts
    })
}

/// Full `users.messages.get?format=full` response
pub fn gmail_message_json(
    id: &str,
    labels: &[&str],
    from: &str,
    subject: &str,
    mut payload: Value,
) -> Value {
    payload["headers"] = json!([
        {"name": "From", "value": from},
        {"name": "To", "value": "me@example.com"},
        {"name": "Subject", "value": subject},
        {"name": "Date", "value": "Mon, 1 Jan 2024 10:00:00 -0800"}
    ]);

    json!({
        "id": id,
        "threadId": format!("thread_{}", id),
        "labelIds": labels,
        "snippet": "Email snippet...",
        "payload": payload,
        "internalDate": "1704132000000",
        "sizeEstimate": 1234
    })
}

/// A `multipart/alternative` message with both bodies
pub fn alternative_message(id: &str, labels: &[&str], from: &str, subject: &str, body: &str) -> Value {
    gmail_message_json(
        id,
        labels,
        from,
        subject,
        multipart(
            "multipart/alternative",
            vec![
                text_part("text/plain", body),
                text_part("text/html", &format!("<p>{}</p>", body)),
            ],
        ),
    )
}

/// The reference scenario: Alice says hello
pub fn alice_message() -> Value {
    alternative_message("m-alice", &["UNREAD"], "Alice <alice@x.com>", "Hi!", "Hello")
}

pub fn raw_message(json: &Value) -> RawMessage {
    RawMessage::from_gmail_json(&json.to_string()).unwrap()
}

pub fn message_ids(n: usize) -> Vec<MessageId> {
    (0..n).map(|i| MessageId::new(format!("msg-{:04}", i))).collect()
}

/// In-memory mail service that records how it was called
pub struct FakeMailApi {
    pages: Vec<MessagePage>,
    messages: HashMap<String, Value>,
    fail_windows: Vec<usize>,
    pub list_calls: AtomicUsize,
    pub batch_sizes: Mutex<Vec<usize>>,
}

impl FakeMailApi {
    /// Serves `messages` from a single listing page
    pub fn new(messages: Vec<Value>) -> Self {
        let ids = messages
            .iter()
            .map(|m| MessageId::new(m["id"].as_str().unwrap_or_default()))
            .collect();
        Self {
            pages: vec![MessagePage {
                ids,
                next_page_token: None,
            }],
            messages: messages
                .into_iter()
                .map(|m| (m["id"].as_str().unwrap_or_default().to_string(), m))
                .collect(),
            fail_windows: vec![],
            list_calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(vec![]),
        }
    }

    pub fn with_pages(mut self, pages: Vec<MessagePage>) -> Self {
        self.pages = pages;
        self
    }

    /// Fail the grouped calls at these (zero-based) positions
    pub fn failing_windows(mut self, windows: Vec<usize>) -> Self {
        self.fail_windows = windows;
        self
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    fn lookup(&self, id: &MessageId) -> Result<RawMessage> {
        match self.messages.get(id.as_str()) {
            Some(json) => RawMessage::from_gmail_json(&json.to_string()),
            None => Err(GmailError::MessageNotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl MailApi for FakeMailApi {
    async fn list_page(
        &self,
        _query: &str,
        _page_token: Option<&str>,
        _page_size: u32,
    ) -> Result<MessagePage> {
        let index = self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }

    async fn get_message(&self, id: &MessageId) -> Result<RawMessage> {
        self.lookup(id)
    }

    async fn batch_get(&self, ids: &[MessageId]) -> Result<Vec<Result<RawMessage>>> {
        let window = {
            let mut sizes = self.batch_sizes.lock().unwrap();
            sizes.push(ids.len());
            sizes.len() - 1
        };
        if self.fail_windows.contains(&window) {
            return Err(GmailError::NetworkError("connection reset".to_string()));
        }
        Ok(ids.iter().map(|id| self.lookup(id)).collect())
    }
}

// Mock implementation of RecordSink for testing
mock! {
    pub RecordSink {}

    #[async_trait]
    impl RecordSink for RecordSink {
        async fn write(&self, record: &EmailRecord) -> Result<SinkOutcome>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alice_fixture_parses() {
        let message = raw_message(&alice_message());
        assert_eq!(message.id.as_str(), "m-alice");
        assert_eq!(message.headers.get("from"), Some("Alice <alice@x.com>"));
        assert!(message.labels.is_unread());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let ids = message_ids(130);
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 130);
    }
}
