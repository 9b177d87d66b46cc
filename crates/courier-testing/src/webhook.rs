//! Scripted webhook sender double.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use courier_core::{
    error::{AppError, Result},
    models::{MessageContent, PhoneNumber},
};
use courier_dispatch::client::{WebhookDelivery, WebhookSender};

/// Scripted [`WebhookSender`] double.
///
/// Pops queued outcomes in order; once the script runs dry it succeeds with
/// generated `w-<n>` message ids. An optional per-call delay simulates a
/// slow endpoint; the delay observes the caller's cancellation token the
/// same way the real client does.
#[derive(Clone, Default)]
pub struct ScriptedWebhook {
    script: Arc<Mutex<VecDeque<Result<WebhookDelivery>>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    counter: Arc<AtomicU64>,
    delay: Arc<Mutex<Option<Duration>>>,
    panic_on_call: Arc<std::sync::atomic::AtomicBool>,
}

impl ScriptedWebhook {
    /// A webhook that accepts everything.
    pub fn always_ok() -> Self {
        Self::default()
    }

    /// A webhook that sleeps `delay` before answering each call.
    pub fn with_delay(delay: Duration) -> Self {
        let webhook = Self::default();
        *webhook.delay.lock().expect("webhook lock") = Some(delay);
        webhook
    }

    /// A webhook that panics on every call, for worker-supervision tests.
    pub fn panicking() -> Self {
        let webhook = Self::default();
        webhook.panic_on_call.store(true, Ordering::SeqCst);
        webhook
    }

    /// Queues the next outcome.
    pub fn push(&self, outcome: Result<WebhookDelivery>) {
        self.script.lock().expect("webhook lock").push_back(outcome);
    }

    /// Queues a success with the given webhook message id.
    pub fn push_ok(&self, message_id: &str) {
        self.push(Ok(WebhookDelivery {
            message_id: message_id.to_string(),
            message: "Accepted".to_string(),
        }));
    }

    /// Queues a 5xx-class failure.
    pub fn push_server_error(&self) {
        self.push(Err(AppError::Server("webhook server error: 500".to_string())));
    }

    /// Queues a non-2xx-below-500 failure.
    pub fn push_invalid_response(&self, body: &str) {
        self.push(Err(AppError::InvalidResponse(format!("webhook returned status 400: {body}"))));
    }

    /// Recorded `(phone, content)` pairs, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("webhook lock").clone()
    }

    /// Number of delivery attempts observed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("webhook lock").len()
    }
}

#[async_trait]
impl WebhookSender for ScriptedWebhook {
    async fn send(
        &self,
        cancel: &CancellationToken,
        phone_number: &PhoneNumber,
        content: &MessageContent,
    ) -> Result<WebhookDelivery> {
        self.calls
            .lock()
            .expect("webhook lock")
            .push((phone_number.to_string(), content.to_string()));

        assert!(
            !self.panic_on_call.load(Ordering::SeqCst),
            "scripted webhook configured to panic"
        );

        let delay = *self.delay.lock().expect("webhook lock");
        if let Some(delay) = delay {
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(AppError::Timeout("webhook request cancelled".to_string()));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        let scripted = self.script.lock().expect("webhook lock").pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(WebhookDelivery {
                    message_id: format!("w-{n}"),
                    message: "Accepted".to_string(),
                })
            },
        }
    }
}
