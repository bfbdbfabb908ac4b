use crate::{
    core::{AlertState, EvalContext, WebhookSender},
    notification::{Notifier, NotifierBase, NotifierConfig, NotifyError},
    webhook::{WebhookError, WebhookRequest},
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fake webhook transport that records every request it is given.
#[derive(Default)]
pub struct RecordingWebhookSender {
    requests: Mutex<Vec<WebhookRequest>>,
    // Queued failures; once empty every call succeeds.
    failures: Mutex<VecDeque<String>>,
    delay: Option<Duration>,
}

impl RecordingWebhookSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every response, honouring cancellation while waiting.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes the next call fail with a 503 carrying `body`.
    pub fn push_failure(&self, body: &str) {
        self.failures.lock().unwrap().push_back(body.to_string());
    }

    pub fn requests(&self) -> Vec<WebhookRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookSender for RecordingWebhookSender {
    async fn send(
        &self,
        cancel: &CancellationToken,
        request: WebhookRequest,
    ) -> Result<(), WebhookError> {
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WebhookError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match self.failures.lock().unwrap().pop_front() {
            Some(body) => Err(WebhookError::Status { status: 503, body }),
            None => Ok(()),
        }
    }
}

/// One call observed by a `FakeNotifier`.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyCall {
    pub rule_id: i64,
    pub state: AlertState,
    pub message: String,
}

struct FakeResponse {
    delay: Option<Duration>,
    result: Result<(), NotifyError>,
    panic: bool,
}

/// Fake channel with scripted responses.
pub struct FakeNotifier {
    base: NotifierBase,
    responses: Mutex<VecDeque<FakeResponse>>,
    started: Mutex<Vec<NotifyCall>>,
    completed: Mutex<Vec<NotifyCall>>,
}

impl FakeNotifier {
    /// A fake of type `kind` with id `id` that resolves and sends on every state.
    pub fn new(id: i64, kind: &str) -> Self {
        let config = NotifierConfig {
            id,
            name: format!("{}-{}", kind, id),
            kind: kind.to_string(),
            is_default: false,
            settings: Default::default(),
            send_on: Default::default(),
        };
        Self::from_config(&config, true)
    }

    pub fn from_config(config: &NotifierConfig, auto_resolve: bool) -> Self {
        Self {
            base: NotifierBase::new(config, auto_resolve),
            responses: Mutex::new(VecDeque::new()),
            started: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_auto_resolve(mut self, auto_resolve: bool) -> Self {
        self.base.auto_resolve = auto_resolve;
        self
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.base.is_default = is_default;
        self
    }

    /// Queues the result of the next call.
    pub fn push_result(&self, result: Result<(), NotifyError>) {
        self.push_result_after(Duration::ZERO, result);
    }

    /// Queues the result of the next call, returned after `delay`.
    pub fn push_result_after(&self, delay: Duration, result: Result<(), NotifyError>) {
        let delay = (!delay.is_zero()).then_some(delay);
        self.responses
            .lock()
            .unwrap()
            .push_back(FakeResponse {
                delay,
                result,
                panic: false,
            });
    }

    /// Makes the next call panic after it has been recorded as started.
    pub fn push_panic(&self) {
        self.responses.lock().unwrap().push_back(FakeResponse {
            delay: None,
            result: Ok(()),
            panic: true,
        });
    }

    /// Calls in the order they started.
    pub fn calls(&self) -> Vec<NotifyCall> {
        self.started.lock().unwrap().clone()
    }

    /// Calls in the order they finished.
    pub fn completed(&self) -> Vec<NotifyCall> {
        self.completed.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, ctx: &EvalContext) -> Result<(), NotifyError> {
        let call = NotifyCall {
            rule_id: ctx.rule.id,
            state: ctx.state,
            message: ctx.rule.message.clone(),
        };
        self.started.lock().unwrap().push(call.clone());

        let response = self.responses.lock().unwrap().pop_front();
        let (delay, result) = match response {
            Some(r) if r.panic => panic!("{} panicked while notifying", self.base.name),
            Some(r) => (r.delay, r.result),
            None => (None, Ok(())),
        };

        if let Some(delay) = delay {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(NotifyError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.completed.lock().unwrap().push(call);
        result
    }
}
