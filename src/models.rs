use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GmailError, Result};

/// Label marking an unsent draft; such messages are never exported
pub const LABEL_DRAFT: &str = "DRAFT";

/// Label present while a message is unread
pub const LABEL_UNREAD: &str = "UNREAD";

/// Run-wide sequence number the batch scheduler assigns to every submitted id
pub type RequestId = u64;

/// Opaque Gmail message handle returned by listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Message headers in wire order. Names compare case-insensitively and the
/// first match wins when a name repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new(headers: Vec<Header>) -> Self {
        Self(headers)
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// First header whose name matches, ignoring ASCII case
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| Header {
                    name: name.into(),
                    value: value.into(),
                })
                .collect(),
        )
    }
}

/// Gmail label ids attached to a message, de-duplicated, in wire order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(Vec<String>);

impl Labels {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if !out.contains(&label) {
                out.push(label);
            }
        }
        Self(out)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.iter().any(|l| l == label)
    }

    pub fn is_draft(&self) -> bool {
        self.contains(LABEL_DRAFT)
    }

    pub fn is_unread(&self) -> bool {
        self.contains(LABEL_UNREAD)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Body of a single MIME part
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafBody {
    /// base64url text carried inline in the response
    Inline(String),
    /// Body stored separately; fetched with the attachments endpoint
    Attachment(String),
    Empty,
}

/// One node of a message's MIME tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadNode {
    Leaf {
        mime_type: String,
        filename: Option<String>,
        body: LeafBody,
    },
    /// `multipart/*`. Gmail may also send a part with an empty `parts` list
    /// and an inline body, so containers keep their own body.
    Container {
        mime_type: String,
        body: LeafBody,
        children: Vec<PayloadNode>,
    },
}

impl PayloadNode {
    pub fn mime_type(&self) -> &str {
        match self {
            PayloadNode::Leaf { mime_type, .. } | PayloadNode::Container { mime_type, .. } => {
                mime_type
            }
        }
    }

    /// Inline text leaf, encoded the way Gmail sends it
    pub fn text(mime_type: &str, content: &str) -> Self {
        PayloadNode::Leaf {
            mime_type: mime_type.to_string(),
            filename: None,
            body: LeafBody::Inline(URL_SAFE_NO_PAD.encode(content.as_bytes())),
        }
    }

    pub fn attachment(mime_type: &str, filename: Option<&str>, reference_id: &str) -> Self {
        PayloadNode::Leaf {
            mime_type: mime_type.to_string(),
            filename: filename.map(str::to_string),
            body: LeafBody::Attachment(reference_id.to_string()),
        }
    }

    pub fn multipart(mime_type: &str, children: Vec<PayloadNode>) -> Self {
        PayloadNode::Container {
            mime_type: mime_type.to_string(),
            body: LeafBody::Empty,
            children,
        }
    }
}

/// A fully fetched message as the pipeline sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: MessageId,
    pub headers: Headers,
    pub labels: Labels,
    pub payload: PayloadNode,
}

impl RawMessage {
    /// Parse a `users.messages.get?format=full` JSON response
    pub fn from_gmail_json(json: &str) -> Result<Self> {
        let wire: WireMessage = serde_json::from_str(json)?;
        wire.try_into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    payload: Option<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<WireBody>,
    parts: Option<Vec<WirePart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBody {
    data: Option<String>,
    attachment_id: Option<String>,
}

impl TryFrom<WireMessage> for RawMessage {
    type Error = GmailError;

    fn try_from(wire: WireMessage) -> Result<Self> {
        let mut payload = wire.payload.ok_or_else(|| {
            GmailError::InvalidMessageFormat(format!("message {} has no payload", wire.id))
        })?;
        let headers = Headers::new(std::mem::take(&mut payload.headers));

        Ok(RawMessage {
            id: MessageId::new(wire.id),
            headers,
            labels: Labels::new(wire.label_ids),
            payload: payload.into(),
        })
    }
}

impl From<WirePart> for PayloadNode {
    fn from(part: WirePart) -> Self {
        let body = match part.body {
            Some(WireBody {
                attachment_id: Some(id),
                ..
            }) => LeafBody::Attachment(id),
            Some(WireBody {
                data: Some(data), ..
            }) if !data.is_empty() => LeafBody::Inline(data),
            _ => LeafBody::Empty,
        };

        match part.parts {
            Some(parts) => PayloadNode::Container {
                mime_type: part.mime_type,
                body,
                children: parts.into_iter().map(PayloadNode::from).collect(),
            },
            None => PayloadNode::Leaf {
                mime_type: part.mime_type,
                filename: part.filename.filter(|f| !f.is_empty()),
                body,
            },
        }
    }
}

/// Attachment found while walking the MIME tree; never downloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub mime_type: String,
    pub reference_id: Option<String>,
}

/// Output of the MIME walk: at most one plain and one html body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    pub plain: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

impl ExtractedContent {
    pub fn has_body(&self) -> bool {
        self.plain.is_some() || self.html.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_body() && self.attachments.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedContent {
    pub clean_html: Option<String>,
    pub clean_markdown: Option<String>,
}

/// Normalized per-message output handed to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailRecord {
    pub id: MessageId,
    pub request_id: RequestId,
    /// Raw `Date` header, not parsed
    pub time_received: String,
    pub is_read: bool,
    pub sender_name: String,
    pub sender_email: String,
    pub subject: String,
    #[serde(skip)]
    pub original_html: Option<String>,
    #[serde(skip)]
    pub clean_html: Option<String>,
    #[serde(skip)]
    pub clean_markdown: Option<String>,
    pub attachments: Vec<AttachmentRef>,
    /// Rough size estimate for downstream consumers, not a real tokenizer count
    pub token_count: usize,
}

impl EmailRecord {
    /// One human-readable line describing the record
    pub fn metadata_line(&self) -> String {
        format!(
            "[{}] From: {} <{}> | Subject: {} | Date: {} | {} | {} attachment(s)",
            self.id,
            self.sender_name,
            self.sender_email,
            self.subject,
            self.time_received,
            if self.is_read { "read" } else { "unread" },
            self.attachments.len()
        )
    }
}

/// Roughly four characters per token
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
