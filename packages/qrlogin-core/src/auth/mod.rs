//! QR code login flow and credential storage.

mod attempt;
mod credential;
mod fetcher;
mod observer;
mod poller;
mod session;
mod store;
mod token;

pub use attempt::{AttemptHandle, AttemptState};
pub use credential::{Credential, cookie_field};
pub use fetcher::{CredentialFetcher, session_cookie};
pub use observer::{LoginObserver, Outcome};
pub use poller::{PollOutcome, PollPhase, PollingEngine};
pub use session::SessionController;
#[cfg(feature = "keyring-storage")]
pub use store::KeyringSink;
pub use store::{CredentialSink, CredentialStore, FALLBACK_KEY, FileSink, derive_key};
pub use token::request_token;
