//! Cursor-based listing of message ids

use std::sync::Arc;
use tracing::{debug, info};

use crate::client::MailApi;
use crate::error::Result;
use crate::models::MessageId;
use crate::rate_limiter::{FixedWindowLimiter, QuotaCost};

/// Walks `messages.list` pages until the continuation cursor runs out
pub struct Paginator {
    api: Arc<dyn MailApi>,
    limiter: FixedWindowLimiter,
    page_size: u32,
    max_messages: Option<usize>,
}

impl Paginator {
    /// `limiter` should carry the light policy; every page costs one call
    pub fn new(api: Arc<dyn MailApi>, limiter: FixedWindowLimiter, page_size: u32) -> Self {
        Self {
            api,
            limiter,
            page_size: page_size.max(1),
            max_messages: None,
        }
    }

    /// Stop listing once this many ids have been collected
    pub fn with_max_messages(mut self, max_messages: Option<usize>) -> Self {
        self.max_messages = max_messages;
        self
    }

    /// All ids matching `query`, in listing order
    ///
    /// Page errors are returned as-is; nothing is retried here and a failed
    /// listing is never resumed.
    pub async fn list(&self, query: &str) -> Result<Vec<MessageId>> {
        let mut ids: Vec<MessageId> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            self.limiter.acquire(QuotaCost::Call).await;

            let page = self
                .api
                .list_page(query, page_token.as_deref(), self.page_size)
                .await?;
            pages += 1;

            debug!(
                "Page {}: {} ids, more pages: {}",
                pages,
                page.ids.len(),
                page.next_page_token.is_some()
            );
            ids.extend(page.ids);

            if let Some(max) = self.max_messages {
                if ids.len() >= max {
                    ids.truncate(max);
                    debug!("Reached max_messages ({}), stopping listing", max);
                    break;
                }
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        info!(
            "Listed {} messages across {} page(s) for query '{}'",
            ids.len(),
            pages,
            query
        );
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MessagePage;
    use crate::error::GmailError;
    use crate::models::RawMessage;
    use crate::rate_limiter::RatePolicy;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves canned pages and records the cursor of every call
    struct PagedApi {
        pages: Vec<Result<MessagePage>>,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl PagedApi {
        fn new(pages: Vec<Result<MessagePage>>) -> Self {
            Self {
                pages,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MailApi for PagedApi {
        async fn list_page(
            &self,
            _query: &str,
            page_token: Option<&str>,
            _page_size: u32,
        ) -> Result<MessagePage> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push(page_token.map(str::to_string));
            match &self.pages[index] {
                Ok(page) => Ok(page.clone()),
                Err(e) => Err(GmailError::ApiError(e.to_string())),
            }
        }

        async fn get_message(&self, id: &MessageId) -> Result<RawMessage> {
            Err(GmailError::MessageNotFound(id.to_string()))
        }

        async fn batch_get(&self, _ids: &[MessageId]) -> Result<Vec<Result<RawMessage>>> {
            Ok(vec![])
        }
    }

    fn page(ids: &[&str], next: Option<&str>) -> Result<MessagePage> {
        Ok(MessagePage {
            ids: ids.iter().map(|id| MessageId::from(*id)).collect(),
            next_page_token: next.map(str::to_string),
        })
    }

    fn limiter() -> FixedWindowLimiter {
        FixedWindowLimiter::new(RatePolicy::light(2, Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_cursor_until_exhausted() {
        let api = Arc::new(PagedApi::new(vec![
            page(&["a", "b"], Some("t1")),
            page(&["c"], Some("t2")),
            page(&["d"], None),
        ]));
        let paginator = Paginator::new(api.clone(), limiter(), 2);

        let ids = paginator.list("after:2024/01/01").await.unwrap();

        assert_eq!(
            ids,
            vec!["a", "b", "c", "d"]
                .into_iter()
                .map(MessageId::from)
                .collect::<Vec<_>>()
        );
        assert_eq!(
            *api.calls.lock().unwrap(),
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_pages_wait_for_second_light_window() {
        let api = Arc::new(PagedApi::new(vec![
            page(&["a"], Some("t1")),
            page(&["b"], Some("t2")),
            page(&["c"], None),
        ]));
        let paginator = Paginator::new(api, limiter(), 1);
        let start = tokio::time::Instant::now();

        paginator.list("q").await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_messages_stops_early() {
        let api = Arc::new(PagedApi::new(vec![
            page(&["a", "b", "c"], Some("t1")),
            page(&["d"], None),
        ]));
        let paginator = Paginator::new(api.clone(), limiter(), 3).with_max_messages(Some(2));

        let ids = paginator.list("q").await.unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(api.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_error_propagates() {
        let api = Arc::new(PagedApi::new(vec![
            page(&["a"], Some("t1")),
            Err(GmailError::NetworkError("reset".to_string())),
        ]));
        let paginator = Paginator::new(api.clone(), limiter(), 1);

        let err = paginator.list("q").await.unwrap_err();

        assert!(matches!(err, GmailError::ApiError(_)));
        assert_eq!(api.calls.lock().unwrap().len(), 2);
    }
}
