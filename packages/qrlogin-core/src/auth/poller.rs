//! Login status polling.
//!
//! The engine owns the poll loop: it queries the status at a fixed interval
//! until the service confirms or expires the token, the local time budget
//! runs out, errors pile up, or the attempt is cancelled.

use super::attempt::AttemptHandle;
use crate::api::{Confirmation, LoginApi, LoginToken, PollResult};
use crate::config::FlowConfig;
use crate::error::LoginError;
use tokio::time::sleep;

/// Non-terminal phases reported while polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Waiting for the code to be scanned
    Pending,
    /// Scanned, waiting for confirmation on the phone
    ScannedAwaitingConfirm,
}

/// How a polling run ended.
#[derive(Debug)]
pub enum PollOutcome {
    Confirmed(Confirmation),
    Expired,
    Cancelled,
    Error(LoginError),
}

pub struct PollingEngine<'a> {
    api: &'a dyn LoginApi,
    config: &'a FlowConfig,
}

impl<'a> PollingEngine<'a> {
    pub fn new(api: &'a dyn LoginApi, config: &'a FlowConfig) -> Self {
        Self { api, config }
    }

    /// Poll until a terminal outcome.
    ///
    /// `on_transition` is called once per phase change, never for repeated
    /// identical results.
    pub async fn run<F>(
        &self,
        token: &LoginToken,
        attempt: &AttemptHandle,
        mut on_transition: F,
    ) -> PollOutcome
    where
        F: FnMut(PollPhase),
    {
        let mut phase: Option<PollPhase> = None;
        let mut consecutive_errors: u32 = 0;
        let mut polls: u32 = 0;

        loop {
            if attempt.is_cancelled() {
                tracing::info!("Polling cancelled after {} polls", polls);
                return PollOutcome::Cancelled;
            }

            if let Some(max_wait) = self.config.max_wait {
                if token.issued_at().elapsed() >= max_wait {
                    tracing::info!("Login code not confirmed within {:?}", max_wait);
                    return PollOutcome::Expired;
                }
            }

            polls += 1;
            let result = self.api.poll_status(token).await;

            // A cancel that arrived while the request was in flight wins over
            // whatever the service answered.
            if attempt.is_cancelled() {
                tracing::info!("Polling cancelled after {} polls", polls);
                return PollOutcome::Cancelled;
            }

            match result {
                Ok(status) => {
                    consecutive_errors = 0;
                    let next = match status {
                        PollResult::Pending => PollPhase::Pending,
                        PollResult::ScannedAwaitingConfirm => PollPhase::ScannedAwaitingConfirm,
                        PollResult::Confirmed(confirmation) => {
                            tracing::info!("Login confirmed after {} polls", polls);
                            return PollOutcome::Confirmed(confirmation);
                        }
                        PollResult::Expired => {
                            tracing::info!("Service reported the login code as expired");
                            return PollOutcome::Expired;
                        }
                    };
                    tracing::debug!("Poll {}: {:?}", polls, next);
                    if phase != Some(next) {
                        phase = Some(next);
                        on_transition(next);
                    }
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        tracing::error!(
                            "Giving up after {} consecutive poll failures: {}",
                            consecutive_errors,
                            e
                        );
                        return PollOutcome::Error(e);
                    }
                    tracing::warn!(
                        "Poll failed ({}/{}): {}",
                        consecutive_errors,
                        self.config.max_consecutive_errors,
                        e
                    );
                }
                Err(e) => {
                    tracing::error!("Poll failed: {}", e);
                    return PollOutcome::Error(e);
                }
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                _ = attempt.cancelled() => {}
            }
        }
    }
}
