//! Grouped message fetching under the heavy quota policy

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::MailApi;
use crate::error::{GmailError, Result};
use crate::models::{MessageId, RawMessage, RequestId};
use crate::rate_limiter::{FixedWindowLimiter, QuotaCost};

/// One per-id outcome handed to the handler
#[derive(Debug)]
pub struct Delivery {
    pub request_id: RequestId,
    pub id: MessageId,
    pub result: Result<RawMessage>,
}

/// Receives every delivery, in request order, one at a time
#[async_trait]
pub trait ResultHandler: Send {
    async fn on_result(&mut self, delivery: Delivery);
}

/// Counters threaded through a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    /// Request id the next submitted message receives
    pub next_request_id: RequestId,
    pub windows_submitted: usize,
    pub windows_failed: usize,
    pub delivered: usize,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            next_request_id: 1,
            windows_submitted: 0,
            windows_failed: 0,
            delivered: 0,
        }
    }
}

impl SchedulerState {
    /// Assign consecutive request ids to a window's members
    fn open_window(&mut self, index: usize, ids: &[MessageId]) -> BatchWindow {
        let members = ids
            .iter()
            .map(|id| {
                let request_id = self.next_request_id;
                self.next_request_id += 1;
                (request_id, id.clone())
            })
            .collect();
        self.windows_submitted += 1;
        BatchWindow { index, members }
    }
}

/// Ids of one grouped call plus their request ids
#[derive(Debug, Clone)]
pub struct BatchWindow {
    pub index: usize,
    pub members: Vec<(RequestId, MessageId)>,
}

impl BatchWindow {
    pub fn ids(&self) -> Vec<MessageId> {
        self.members.iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Splits ids into windows and fetches each window as one grouped call
pub struct BatchScheduler {
    api: Arc<dyn MailApi>,
    limiter: FixedWindowLimiter,
    batch_size: usize,
    cost_per_batch: u32,
    cooldown: Duration,
}

impl BatchScheduler {
    /// `limiter` should carry the heavy policy
    pub fn new(
        api: Arc<dyn MailApi>,
        limiter: FixedWindowLimiter,
        batch_size: usize,
        cost_per_batch: u32,
    ) -> Self {
        Self {
            api,
            limiter,
            batch_size: batch_size.max(1),
            cost_per_batch,
            cooldown: Duration::from_millis(500),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Fetch every id and hand each outcome to `handler` exactly once
    ///
    /// A window is fully delivered before the next one is submitted. A failed
    /// window fails each of its members and the run moves on.
    pub async fn run<H>(&self, ids: &[MessageId], handler: &mut H) -> SchedulerState
    where
        H: ResultHandler + ?Sized,
    {
        let mut state = SchedulerState::default();
        let total_windows = ids.len().div_ceil(self.batch_size);

        for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.cooldown.is_zero() {
                tokio::time::sleep(self.cooldown).await;
            }

            let window = state.open_window(index, chunk);
            self.limiter
                .acquire(QuotaCost::Batch(self.cost_per_batch))
                .await;

            debug!(
                "Submitting window {}/{} with {} messages",
                index + 1,
                total_windows,
                window.len()
            );

            match self.api.batch_get(&window.ids()).await {
                Ok(responses) => {
                    if responses.len() != window.len() {
                        warn!(
                            "Window {} returned {} responses for {} requests",
                            index,
                            responses.len(),
                            window.len()
                        );
                    }
                    let mut responses = responses.into_iter();
                    for (request_id, id) in window.members {
                        let result = responses.next().unwrap_or_else(|| {
                            Err(GmailError::BatchFailed {
                                window: index,
                                message: format!("no sub-response for {}", id),
                            })
                        });
                        deliver(&mut state, handler, request_id, id, result).await;
                    }
                }
                Err(e) => {
                    warn!("Window {} failed: {}", index, e);
                    state.windows_failed += 1;
                    let message = e.to_string();
                    for (request_id, id) in window.members {
                        let result = Err(GmailError::BatchFailed {
                            window: index,
                            message: message.clone(),
                        });
                        deliver(&mut state, handler, request_id, id, result).await;
                    }
                }
            }
        }

        info!(
            "Fetched {} messages in {} window(s), {} failed",
            state.delivered, state.windows_submitted, state.windows_failed
        );
        state
    }
}

async fn deliver<H>(
    state: &mut SchedulerState,
    handler: &mut H,
    request_id: RequestId,
    id: MessageId,
    result: Result<RawMessage>,
) where
    H: ResultHandler + ?Sized,
{
    handler
        .on_result(Delivery {
            request_id,
            id,
            result,
        })
        .await;
    state.delivered += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MessagePage;
    use crate::models::{Headers, Labels, PayloadNode};
    use crate::rate_limiter::RatePolicy;
    use std::sync::Mutex;

    fn raw(id: &MessageId) -> RawMessage {
        RawMessage {
            id: id.clone(),
            headers: Headers::default(),
            labels: Labels::default(),
            payload: PayloadNode::text("text/plain", "hi"),
        }
    }

    /// Fails the windows whose index is listed, truncates responses when asked
    struct WindowApi {
        fail_windows: Vec<usize>,
        drop_last: bool,
        calls: Mutex<Vec<usize>>,
    }

    impl WindowApi {
        fn new(fail_windows: Vec<usize>) -> Self {
            Self {
                fail_windows,
                drop_last: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MailApi for WindowApi {
        async fn list_page(
            &self,
            _query: &str,
            _page_token: Option<&str>,
            _page_size: u32,
        ) -> Result<MessagePage> {
            Ok(MessagePage::default())
        }

        async fn get_message(&self, id: &MessageId) -> Result<RawMessage> {
            Ok(raw(id))
        }

        async fn batch_get(&self, ids: &[MessageId]) -> Result<Vec<Result<RawMessage>>> {
            let window = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(ids.len());
                calls.len() - 1
            };
            if self.fail_windows.contains(&window) {
                return Err(GmailError::NetworkError("connection reset".to_string()));
            }
            let mut out: Vec<_> = ids.iter().map(|id| Ok(raw(id))).collect();
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }
    }

    #[derive(Default)]
    struct Collect(Vec<Delivery>);

    #[async_trait]
    impl ResultHandler for Collect {
        async fn on_result(&mut self, delivery: Delivery) {
            self.0.push(delivery);
        }
    }

    fn ids(n: usize) -> Vec<MessageId> {
        (0..n).map(|i| MessageId::new(format!("m{}", i))).collect()
    }

    fn scheduler(api: Arc<dyn MailApi>, batch_size: usize) -> BatchScheduler {
        BatchScheduler::new(
            api,
            FixedWindowLimiter::new(RatePolicy::heavy(500, Duration::from_secs(2))),
            batch_size,
            250,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_ids_are_run_wide_and_ordered() {
        let api = Arc::new(WindowApi::new(vec![]));
        let mut handler = Collect::default();

        let state = scheduler(api, 2).run(&ids(5), &mut handler).await;

        let request_ids: Vec<_> = handler.0.iter().map(|d| d.request_id).collect();
        assert_eq!(request_ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(state.next_request_id, 6);
        assert_eq!(state.windows_submitted, 3);
        assert_eq!(state.delivered, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_window_fails_each_member_and_run_continues() {
        let api = Arc::new(WindowApi::new(vec![0]));
        let mut handler = Collect::default();

        let state = scheduler(api.clone(), 2).run(&ids(3), &mut handler).await;

        assert_eq!(state.windows_failed, 1);
        assert_eq!(*api.calls.lock().unwrap(), vec![2, 1]);
        assert!(matches!(
            handler.0[0].result,
            Err(GmailError::BatchFailed { window: 0, .. })
        ));
        assert!(handler.0[1].result.is_err());
        assert!(handler.0[2].result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sub_response_is_item_error() {
        let api = Arc::new(WindowApi {
            drop_last: true,
            ..WindowApi::new(vec![])
        });
        let mut handler = Collect::default();

        let state = scheduler(api, 3).run(&ids(3), &mut handler).await;

        assert_eq!(state.delivered, 3);
        assert_eq!(state.windows_failed, 0);
        assert!(handler.0[0].result.is_ok());
        assert!(handler.0[1].result.is_ok());
        assert!(matches!(
            handler.0[2].result,
            Err(GmailError::BatchFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_only_between_windows() {
        let api = Arc::new(WindowApi::new(vec![]));
        let mut handler = Collect::default();
        let start = tokio::time::Instant::now();

        scheduler(api, 10)
            .with_cooldown(Duration::from_millis(500))
            .run(&ids(10), &mut handler)
            .await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        let api = Arc::new(WindowApi::new(vec![]));
        let start = tokio::time::Instant::now();
        scheduler(api, 5)
            .with_cooldown(Duration::from_millis(500))
            .run(&ids(10), &mut handler)
            .await;
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_window_waits_for_heavy_quota() {
        let api = Arc::new(WindowApi::new(vec![]));
        let mut handler = Collect::default();
        let start = tokio::time::Instant::now();

        scheduler(api, 1)
            .with_cooldown(Duration::ZERO)
            .run(&ids(3), &mut handler)
            .await;

        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_empty_input_submits_nothing() {
        let api = Arc::new(WindowApi::new(vec![]));
        let mut handler = Collect::default();

        let state = scheduler(api.clone(), 50).run(&[], &mut handler).await;

        assert_eq!(state, SchedulerState::default());
        assert!(api.calls.lock().unwrap().is_empty());
    }
}
