//! Submit/poll tracking for backends that answer in a single HTTP call.
//!
//! `start` launches the call as a background task and hands back a local
//! reference; `poll` reports `processing` until the task has finished. A
//! transport failure is reported once and the same request is relaunched
//! on the next poll.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;

use crate::adapter::{PollStatus, ProviderError, ProviderPayload, ProviderResult};
use crate::registry::ProviderId;

pub(crate) type CallResult = Result<ProviderResult, ProviderError>;

type CallFuture = Pin<Box<dyn Future<Output = CallResult> + Send>>;

/// Performs one request for a prepared payload.
pub(crate) type Call = Arc<dyn Fn(ProviderPayload) -> CallFuture + Send + Sync>;

/// Box a request function into a relaunchable [`Call`].
pub(crate) fn call<F, Fut>(f: F) -> Call
where
    F: Fn(ProviderPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult> + Send + 'static,
{
    Arc::new(move |payload: ProviderPayload| -> CallFuture { Box::pin(f(payload)) })
}

/// A launched request and the state of its latest attempt.
struct InFlight {
    payload: ProviderPayload,
    call: Call,
    attempt: Attempt,
}

enum Attempt {
    Running(JoinHandle<CallResult>),
    /// The last attempt failed with a transport error; relaunch on next poll.
    Retry,
}

pub(crate) struct PendingCalls {
    provider: ProviderId,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl PendingCalls {
    pub(crate) fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn start(&self, payload: &ProviderPayload, call: Call) -> String {
        let reference = uuid::Uuid::now_v7().to_string();
        let handle = tokio::spawn(call(payload.clone()));
        self.lock().insert(
            reference.clone(),
            InFlight {
                payload: payload.clone(),
                call,
                attempt: Attempt::Running(handle),
            },
        );
        tracing::debug!(
            provider = %self.provider,
            reference = %reference,
            endpoint = %payload.endpoint,
            "Provider request launched"
        );
        reference
    }

    pub(crate) async fn poll(&self, reference: &str) -> Result<PollStatus, ProviderError> {
        // Take a finished handle out under the lock; await it without the lock.
        let finished = {
            let mut in_flight = self.lock();
            let Some(entry) = in_flight.get_mut(reference) else {
                return Err(ProviderError::semantic(
                    "unknown_reference",
                    format!("no {} request with reference {reference}", self.provider),
                ));
            };
            if matches!(entry.attempt, Attempt::Retry) {
                let handle = tokio::spawn((entry.call)(entry.payload.clone()));
                entry.attempt = Attempt::Running(handle);
                tracing::debug!(provider = %self.provider, reference, "Provider request relaunched");
                return Ok(PollStatus::Processing);
            }
            if matches!(&entry.attempt, Attempt::Running(handle) if !handle.is_finished()) {
                return Ok(PollStatus::Processing);
            }
            match std::mem::replace(&mut entry.attempt, Attempt::Retry) {
                Attempt::Running(handle) => handle,
                Attempt::Retry => return Ok(PollStatus::Processing),
            }
        };

        let outcome = finished
            .await
            .unwrap_or_else(|e| Err(ProviderError::transport(format!("request task failed: {e}"))));

        match outcome {
            Ok(result) => {
                self.lock().remove(reference);
                Ok(PollStatus::Succeeded(result))
            }
            // Entry stays in `Retry`; the next poll relaunches the request.
            Err(err @ ProviderError::Transport(_)) => Err(err),
            Err(err) => {
                self.lock().remove(reference);
                Err(err)
            }
        }
    }

    /// Abort and forget the request. Idempotent.
    pub(crate) fn cancel(&self, reference: &str) {
        if let Some(entry) = self.lock().remove(reference) {
            if let Attempt::Running(handle) = entry.attempt {
                handle.abort();
            }
            tracing::debug!(provider = %self.provider, reference, "Provider request cancelled");
        }
    }
}
