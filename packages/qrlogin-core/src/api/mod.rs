//! Remote login API.
//!
//! [`LoginApi`] is the seam between the login flow and the service; the flow
//! only ever talks to it, so tests can script responses without a server.

mod client;

pub use client::PassportClient;

use crate::error::LoginError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Instant;

/// Token issued by the service for one login attempt.
#[derive(Debug, Clone)]
pub struct LoginToken {
    key: String,
    scan_url: String,
    issued_at: Instant,
}

impl LoginToken {
    pub fn new(key: impl Into<String>, scan_url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            scan_url: scan_url.into(),
            issued_at: Instant::now(),
        }
    }

    /// Opaque key used when polling.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// URL the mobile client has to scan.
    pub fn scan_url(&self) -> &str {
        &self.scan_url
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }
}

/// Session material handed back once the user confirmed the login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    /// Cross-domain redirect URL; carries the session fields as query pairs
    pub redirect_url: String,
    /// Cookies set by the service, in the order received
    pub cookies: Vec<(String, String)>,
    pub refresh_token: Option<String>,
}

/// Status reported by a single poll call.
///
/// Failures of the call itself are the `Err` side of
/// [`LoginApi::poll_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// Code not scanned yet
    Pending,
    /// Code scanned, waiting for the user to confirm on the phone
    ScannedAwaitingConfirm,
    /// Login confirmed
    Confirmed(Confirmation),
    /// The service declared the token expired
    Expired,
}

/// Identity the service associates with a session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub logged_in: bool,
    pub uname: Option<String>,
    pub mid: Option<u64>,
}

/// The three remote operations the login flow needs.
#[async_trait]
pub trait LoginApi: Send + Sync {
    /// Issue a new login token and its scan URL.
    async fn issue_token(&self) -> Result<LoginToken, LoginError>;

    /// Query the login status of a token once.
    async fn poll_status(&self, token: &LoginToken) -> Result<PollResult, LoginError>;

    /// Ask who the given session cookie belongs to.
    async fn fetch_identity(&self, cookie: &str) -> Result<Identity, LoginError>;
}
