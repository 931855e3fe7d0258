//! Gmail API access: the `MailApi` seam and its production implementation

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use futures::stream::{self, StreamExt};
use google_gmail1::api::{Message, MessagePart};
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{GmailError, Result};
use crate::models::{Header, Headers, Labels, LeafBody, MessageId, PayloadNode, RawMessage};

const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// One page of a message listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<MessageId>,
    pub next_page_token: Option<String>,
}

/// Remote mail service operations used by the exporter
///
/// Implementations own their transport and any retry policy. Rate limiting is
/// applied by the callers, before each call.
#[async_trait]
pub trait MailApi: Send + Sync {
    /// List one page of message ids matching `query`
    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<MessagePage>;

    /// Fetch one full message
    async fn get_message(&self, id: &MessageId) -> Result<RawMessage>;

    /// Fetch a group of messages as one grouped call
    ///
    /// The outer error is a failure of the whole group. The inner vector is
    /// positional: entry `i` is the sub-response for `ids[i]`.
    async fn batch_get(&self, ids: &[MessageId]) -> Result<Vec<Result<RawMessage>>>;
}

/// Production client backed by the google-gmail1 hub
///
/// Retries transient failures with exponential backoff; a grouped fetch fans
/// out its `messages.get` sub-requests concurrently.
pub struct GmailApiClient {
    hub: GmailHub,
    max_concurrent: usize,
    max_retries: u32,
}

impl GmailApiClient {
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `max_concurrent` - Sub-requests in flight within one grouped fetch
    pub fn new(hub: GmailHub, max_concurrent: usize) -> Self {
        Self {
            hub,
            max_concurrent: max_concurrent.max(1),
            max_retries: 3,
        }
    }

    /// Email address of the authenticated account
    pub async fn profile_email(&self) -> Result<String> {
        let (_, profile) = self
            .hub
            .users()
            .get_profile("me")
            .add_scope(READONLY_SCOPE)
            .doit()
            .await?;
        Ok(profile.email_address.unwrap_or_default())
    }

    async fn fetch_full(&self, id: &MessageId) -> Result<RawMessage> {
        Self::with_retry("messages.get", self.max_retries, || async {
            let (_, message) = self
                .hub
                .users()
                .messages_get("me", id.as_str())
                .format("full")
                .add_scope(READONLY_SCOPE)
                .doit()
                .await?;
            RawMessage::try_from(message)
        })
        .await
    }

    fn should_retry(error: &GmailError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    if let GmailError::RateLimitExceeded { retry_after } = e {
                        delay = delay.max(Duration::from_secs(retry_after));
                    }
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl MailApi for GmailApiClient {
    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<MessagePage> {
        Self::with_retry("messages.list", self.max_retries, || async {
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(page_size);

            if let Some(token) = page_token {
                call = call.page_token(token);
            }

            let (_, response) = call.add_scope(READONLY_SCOPE).doit().await?;

            let ids = response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id.map(MessageId::new))
                .collect();

            Ok(MessagePage {
                ids,
                next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
            })
        })
        .await
    }

    async fn get_message(&self, id: &MessageId) -> Result<RawMessage> {
        self.fetch_full(id).await
    }

    async fn batch_get(&self, ids: &[MessageId]) -> Result<Vec<Result<RawMessage>>> {
        debug!(
            "Fetching group of {} messages with {} concurrent sub-requests",
            ids.len(),
            self.max_concurrent
        );

        let mut indexed: Vec<(usize, Result<RawMessage>)> =
            stream::iter(ids.iter().cloned().enumerate())
                .map(|(index, id)| async move { (index, self.fetch_full(&id).await) })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, result)| result).collect())
    }
}

impl TryFrom<Message> for RawMessage {
    type Error = GmailError;

    fn try_from(message: Message) -> Result<Self> {
        let id = message
            .id
            .ok_or_else(|| GmailError::InvalidMessageFormat("Missing message ID".to_string()))?;

        let mut payload = message.payload.ok_or_else(|| {
            GmailError::InvalidMessageFormat(format!("message {} has no payload", id))
        })?;

        let headers = Headers::new(
            payload
                .headers
                .take()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|h| match (h.name, h.value) {
                    (Some(name), Some(value)) => Some(Header { name, value }),
                    _ => None,
                })
                .collect(),
        );

        Ok(RawMessage {
            id: MessageId::new(id),
            headers,
            labels: Labels::new(message.label_ids.unwrap_or_default()),
            payload: convert_part(payload),
        })
    }
}

/// google-gmail1 hands back decoded body bytes; they are re-encoded so every
/// source feeds the extractor the same base64url wire form.
fn convert_part(part: MessagePart) -> PayloadNode {
    let body = match part.body {
        Some(body) => match (body.attachment_id, body.data) {
            (Some(id), _) => LeafBody::Attachment(id),
            (None, Some(data)) if !data.is_empty() => LeafBody::Inline(URL_SAFE_NO_PAD.encode(data)),
            _ => LeafBody::Empty,
        },
        None => LeafBody::Empty,
    };
    let mime_type = part.mime_type.unwrap_or_default();

    match part.parts {
        Some(parts) => PayloadNode::Container {
            mime_type,
            body,
            children: parts.into_iter().map(convert_part).collect(),
        },
        None => PayloadNode::Leaf {
            mime_type,
            filename: part.filename.filter(|f| !f.is_empty()),
            body,
        },
    }
}
