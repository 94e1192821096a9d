//! Error types for the login flow.
//!
//! Every failure carries enough information to be classified as transient
//! (worth polling again) or terminal, and maps onto a coarse [`ErrorKind`]
//! that is reported to observers.

use serde::Serialize;
use std::fmt;

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response: {0}")]
    Protocol(String),

    #[error("Service rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Login code expired. Please start a new attempt.")]
    Expired,

    #[error("Login was confirmed but the session is not active yet")]
    InconsistentState,

    #[error("Failed to store credential: {0}")]
    Storage(String),

    #[error("Login attempt cancelled")]
    Cancelled,
}

/// Coarse classification of a failure, as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Protocol,
    Expired,
    InconsistentState,
    Storage,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network error"),
            ErrorKind::Protocol => write!(f, "protocol error"),
            ErrorKind::Expired => write!(f, "expired"),
            ErrorKind::InconsistentState => write!(f, "inconsistent state"),
            ErrorKind::Storage => write!(f, "storage error"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl LoginError {
    /// Build an error from a non-success HTTP status and its body.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        };
        LoginError::Http {
            status: status.as_u16(),
            body,
        }
    }

    /// The kind reported to observers.
    ///
    /// Server-side failures (5xx, throttling) count as network trouble; any
    /// other unexpected status is a protocol error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoginError::Network(_) => ErrorKind::Network,
            LoginError::Http { status, .. } if is_server_side(*status) => ErrorKind::Network,
            LoginError::Http { .. } => ErrorKind::Protocol,
            LoginError::Protocol(_) | LoginError::Rejected { .. } => ErrorKind::Protocol,
            LoginError::Expired => ErrorKind::Expired,
            LoginError::InconsistentState => ErrorKind::InconsistentState,
            LoginError::Storage(_) => ErrorKind::Storage,
            LoginError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether polling the same operation again may succeed.
    ///
    /// Network and protocol failures, rejection codes included, only end a
    /// polling run once they exceed the consecutive-error bound.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Protocol)
    }
}

fn is_server_side(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Cloneable summary of a failure, carried by outcomes and attempt state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCause {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&LoginError> for FailureCause {
    fn from(err: &LoginError) -> Self {
        FailureCause {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LoginError::Protocol("bad json".into()).is_transient());
        assert!(
            LoginError::Http {
                status: 502,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            LoginError::Http {
                status: 429,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            LoginError::Http {
                status: 403,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            LoginError::Rejected {
                code: -412,
                message: "request blocked".into()
            }
            .is_transient()
        );
        assert!(!LoginError::InconsistentState.is_transient());
        assert!(!LoginError::Storage("disk full".into()).is_transient());
        assert!(!LoginError::Expired.is_transient());
        assert!(!LoginError::Cancelled.is_transient());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(LoginError::Expired.kind(), ErrorKind::Expired);
        assert_eq!(
            LoginError::Http {
                status: 503,
                body: String::new()
            }
            .kind(),
            ErrorKind::Network
        );
        assert_eq!(
            LoginError::Http {
                status: 404,
                body: String::new()
            }
            .kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            LoginError::Storage("disk full".into()).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_from_status_truncates_body() {
        let body = "x".repeat(500);
        match LoginError::from_status(reqwest::StatusCode::BAD_GATEWAY, &body) {
            LoginError::Http { status, body } => {
                assert_eq!(status, 502);
                assert!(body.contains("truncated, 500 total bytes"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
