//! Scripted adapter for worker and gateway tests.
//!
//! Each poll consumes the next scripted step; once the script runs out,
//! polls keep answering `processing`. An optional [`ManualClock`] is
//! advanced on every poll so deadlines pass deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use photochanger_core::clock::ManualClock;

use crate::adapter::{
    JobContext, PayloadBody, PollStatus, ProviderAdapter, ProviderError, ProviderPayload,
    ProviderResult,
};
use crate::registry::ProviderId;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Step {
    Processing,
    ActionRequired,
    Succeed { bytes: Vec<u8>, mime_type: String },
    Fail(ProviderError),
    /// Sleep (real time) before answering `processing`.
    Stall(Duration),
}

impl Step {
    pub fn succeed(bytes: &[u8], mime_type: &str) -> Self {
        Self::Succeed {
            bytes: bytes.to_vec(),
            mime_type: mime_type.to_string(),
        }
    }

    pub fn transport() -> Self {
        Self::Fail(ProviderError::transport("connection reset"))
    }

    pub fn semantic(code: &str) -> Self {
        Self::Fail(ProviderError::semantic(code, "rejected by provider"))
    }
}

#[derive(Default)]
struct Script {
    prepare_error: Option<ProviderError>,
    submits: VecDeque<Result<(), ProviderError>>,
    polls: VecDeque<Step>,
    cancelled: Vec<String>,
}

pub struct ScriptedProvider {
    id: ProviderId,
    script: Mutex<Script>,
    clock: Option<(Arc<ManualClock>, chrono::Duration)>,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            script: Mutex::new(Script::default()),
            clock: None,
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        }
    }

    /// Make `prepare_payload` fail.
    pub fn failing_prepare(self, err: ProviderError) -> Self {
        self.lock().prepare_error = Some(err);
        self
    }

    /// Results of successive `submit_job` calls; later calls succeed.
    pub fn with_submits(self, submits: Vec<Result<(), ProviderError>>) -> Self {
        self.lock().submits = submits.into();
        self
    }

    pub fn with_polls(self, polls: Vec<Step>) -> Self {
        self.lock().polls = polls.into();
        self
    }

    /// Advance `clock` by `per_poll` on every poll.
    pub fn advancing(mut self, clock: Arc<ManualClock>, per_poll: chrono::Duration) -> Self {
        self.clock = Some((clock, per_poll));
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    /// References passed to `cancel`, in call order.
    pub fn cancelled(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn provider_id(&self) -> ProviderId {
        self.id
    }

    fn prepare_payload(&self, ctx: &JobContext) -> Result<ProviderPayload, ProviderError> {
        if let Some(err) = self.lock().prepare_error.clone() {
            return Err(err);
        }
        Ok(ProviderPayload {
            endpoint: format!("mock://{}", self.id),
            body: PayloadBody::Json(serde_json::json!({ "job_id": ctx.job_id })),
            result_mime_hint: "image/png".to_string(),
        })
    }

    async fn submit_job(&self, _payload: &ProviderPayload) -> Result<String, ProviderError> {
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.lock().submits.pop_front() {
            Some(Err(err)) => Err(err),
            _ => Ok(format!("{}-ref-{call}", self.id)),
        }
    }

    async fn poll_status(&self, _reference: &str) -> Result<PollStatus, ProviderError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, per_poll)) = &self.clock {
            clock.advance(*per_poll);
        }
        let step = self.lock().polls.pop_front().unwrap_or(Step::Processing);
        match step {
            Step::Processing => Ok(PollStatus::Processing),
            Step::ActionRequired => Ok(PollStatus::ActionRequired("reconnect".to_string())),
            Step::Succeed { bytes, mime_type } => {
                Ok(PollStatus::Succeeded(ProviderResult { bytes, mime_type }))
            }
            Step::Fail(err) => Err(err),
            Step::Stall(duration) => {
                tokio::time::sleep(duration).await;
                Ok(PollStatus::Processing)
            }
        }
    }

    async fn cancel(&self, reference: &str) -> Result<(), ProviderError> {
        self.lock().cancelled.push(reference.to_string());
        Ok(())
    }
}
