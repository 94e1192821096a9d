use super::credential::Credential;
use crate::error::FailureCause;
use serde::Serialize;

/// Terminal result of a login attempt, reported exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Login succeeded. `location` is where the credential was stored, or
    /// why storing it failed; the login itself stands either way.
    Succeeded {
        identity: String,
        #[serde(skip)]
        credential: Credential,
        location: Result<String, FailureCause>,
    },
    Failed {
        cause: FailureCause,
    },
    Cancelled,
}

/// Receives progress of a login attempt.
///
/// Called from the attempt's background task. Implementations that touch
/// shared presentation state do their own locking.
pub trait LoginObserver: Send + Sync {
    /// Human-readable progress text.
    fn on_status(&self, text: &str);

    /// Code image to display, or `None` to clear it.
    fn on_image(&self, image: Option<&[u8]>);

    /// Terminal outcome; no further calls follow for this attempt.
    fn on_outcome(&self, outcome: &Outcome);

    /// The URL encoded in the code, for front ends that show it as text.
    fn on_scan_url(&self, _url: &str) {}
}
