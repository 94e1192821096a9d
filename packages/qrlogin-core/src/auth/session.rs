//! Login attempt orchestration.
//!
//! Each attempt runs on its own background task: request a token, show the
//! code, poll until confirmed, fetch the credential, store it. Only one
//! attempt is live per controller; starting another cancels the previous one
//! and waits for its task to wind down first.

use super::attempt::{AttemptHandle, AttemptState};
use super::fetcher::CredentialFetcher;
use super::observer::{LoginObserver, Outcome};
use super::poller::{PollOutcome, PollPhase, PollingEngine};
use super::store::CredentialStore;
use super::token::request_token;
use crate::api::LoginApi;
use crate::config::FlowConfig;
use crate::error::{FailureCause, LoginError};
use crate::render::{CodeRenderer, NoImage};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Everything one attempt needs, cheap to clone into its task
#[derive(Clone)]
struct LoginFlow {
    api: Arc<dyn LoginApi>,
    store: Arc<CredentialStore>,
    renderer: Arc<dyn CodeRenderer>,
    config: FlowConfig,
}

struct LiveAttempt {
    handle: AttemptHandle,
    task: JoinHandle<()>,
}

pub struct SessionController {
    flow: LoginFlow,
    live: Mutex<Option<LiveAttempt>>,
}

impl SessionController {
    pub fn new(api: Arc<dyn LoginApi>, store: CredentialStore, config: FlowConfig) -> Self {
        Self {
            flow: LoginFlow {
                api,
                store: Arc::new(store),
                renderer: Arc::new(NoImage),
                config,
            },
            live: Mutex::new(None),
        }
    }

    /// Use `renderer` to turn scan URLs into code images.
    pub fn with_renderer(mut self, renderer: Arc<dyn CodeRenderer>) -> Self {
        self.flow.renderer = renderer;
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.flow.store
    }

    /// Start a new login attempt reporting to `observer`.
    ///
    /// A still-running previous attempt is cancelled and awaited before the
    /// new one starts, so two attempts never report concurrently.
    pub async fn begin_attempt(&self, observer: Arc<dyn LoginObserver>) -> AttemptHandle {
        let mut live = self.live.lock().await;

        if let Some(previous) = live.take() {
            if previous.handle.cancel() {
                tracing::info!(
                    "Cancelling attempt {} to start a new one",
                    previous.handle.id()
                );
            }
            if let Err(e) = previous.task.await {
                tracing::warn!("Attempt {} ended abnormally: {}", previous.handle.id(), e);
            }
        }

        let handle = AttemptHandle::new();
        tracing::info!("Starting login attempt {}", handle.id());

        let flow = self.flow.clone();
        let attempt = handle.clone();
        let task = tokio::spawn(async move {
            flow.run(&attempt, observer.as_ref()).await;
        });

        *live = Some(LiveAttempt {
            handle: handle.clone(),
            task,
        });
        handle
    }

    /// Cancel an attempt. Returns false if it had already finished.
    pub fn cancel(&self, handle: &AttemptHandle) -> bool {
        handle.cancel()
    }

    /// Handle of the most recently started attempt.
    pub async fn current(&self) -> Option<AttemptHandle> {
        self.live.lock().await.as_ref().map(|l| l.handle.clone())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(live) = self.live.get_mut() {
            live.handle.cancel();
        }
    }
}

fn phase_text(phase: PollPhase) -> &'static str {
    match phase {
        PollPhase::Pending => "Scan the code with the mobile app",
        PollPhase::ScannedAwaitingConfirm => "Scanned, confirm the login on your phone",
    }
}

fn failed(err: &LoginError) -> Outcome {
    tracing::error!("Login attempt failed: {}", err);
    Outcome::Failed {
        cause: FailureCause::from(err),
    }
}

impl LoginFlow {
    async fn run(&self, attempt: &AttemptHandle, observer: &dyn LoginObserver) {
        let outcome = self.drive(attempt, observer).await;

        let state = match &outcome {
            Outcome::Succeeded { credential, .. } => AttemptState::Succeeded(credential.clone()),
            Outcome::Failed { cause } => AttemptState::Failed(cause.clone()),
            Outcome::Cancelled => AttemptState::Cancelled,
        };

        attempt.mark_reported();
        observer.on_image(None);
        observer.on_outcome(&outcome);
        attempt.advance(state);
    }

    async fn drive(&self, attempt: &AttemptHandle, observer: &dyn LoginObserver) -> Outcome {
        if attempt.is_cancelled() {
            return Outcome::Cancelled;
        }

        observer.on_status("Requesting login code");
        let token = match request_token(self.api.as_ref()).await {
            Ok(token) => token,
            Err(e) => return failed(&e),
        };
        attempt.advance(AttemptState::TokenIssued);

        observer.on_scan_url(token.scan_url());
        match self.renderer.render(token.scan_url()) {
            Ok(image) => observer.on_image(image.as_deref()),
            Err(e) => {
                tracing::warn!("Failed to render login code: {}", e);
                observer.on_image(None);
            }
        }

        if attempt.is_cancelled() {
            return Outcome::Cancelled;
        }
        attempt.advance(AttemptState::Polling);

        let engine = PollingEngine::new(self.api.as_ref(), &self.config);
        let confirmation = match engine
            .run(&token, attempt, |phase| observer.on_status(phase_text(phase)))
            .await
        {
            PollOutcome::Confirmed(confirmation) => confirmation,
            PollOutcome::Expired => return failed(&LoginError::Expired),
            PollOutcome::Cancelled => return Outcome::Cancelled,
            PollOutcome::Error(e) => return failed(&e),
        };

        observer.on_status("Login confirmed, fetching session");
        let fetcher = CredentialFetcher::new(self.api.as_ref(), &self.config);
        let credential = match fetcher.fetch_credential(&confirmation, attempt).await {
            Ok(credential) => credential,
            Err(LoginError::Cancelled) => return Outcome::Cancelled,
            Err(e) => return failed(&e),
        };

        if attempt.is_cancelled() {
            tracing::info!("Attempt cancelled before the credential was stored");
            return Outcome::Cancelled;
        }

        let location = self.store.persist(&credential).map_err(|e| {
            tracing::error!("Login succeeded but the credential was not stored: {}", e);
            FailureCause::from(&e)
        });

        Outcome::Succeeded {
            identity: credential.identity().to_string(),
            credential,
            location,
        }
    }
}
