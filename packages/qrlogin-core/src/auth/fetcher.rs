use super::attempt::AttemptHandle;
use super::credential::{Credential, join_cookie};
use crate::api::{Confirmation, LoginApi};
use crate::config::FlowConfig;
use crate::error::LoginError;
use crate::retry::{RetryConfig, retry_with_backoff};

/// Redirect query parameters that are navigation hints, not session fields
const NON_SESSION_PARAMS: &[&str] = &["gourl", "first_domain"];

/// Turns a confirmed login into a [`Credential`].
pub struct CredentialFetcher<'a> {
    api: &'a dyn LoginApi,
    retry: RetryConfig,
}

impl<'a> CredentialFetcher<'a> {
    pub fn new(api: &'a dyn LoginApi, config: &FlowConfig) -> Self {
        Self {
            api,
            retry: RetryConfig {
                max_retries: config.fetch_retries,
                initial_delay: config.fetch_retry_delay,
                max_delay: config.fetch_retry_delay * 4,
                backoff_multiplier: 2.0,
            },
        }
    }

    /// Look up who the confirmed session belongs to.
    ///
    /// The service may briefly deny a session it has just confirmed; that
    /// case is retried a bounded number of times. Everything else surfaces
    /// unchanged.
    pub async fn fetch_credential(
        &self,
        confirmation: &Confirmation,
        attempt: &AttemptHandle,
    ) -> Result<Credential, LoginError> {
        let cookie = session_cookie(confirmation)?;
        let cookie = cookie.as_str();

        retry_with_backoff(
            &self.retry,
            || async move {
                if attempt.is_cancelled() {
                    return Err(LoginError::Cancelled);
                }
                self.fetch_once(cookie).await
            },
            |e| matches!(e, LoginError::InconsistentState),
            || attempt.cancelled(),
        )
        .await
    }

    async fn fetch_once(&self, cookie: &str) -> Result<Credential, LoginError> {
        let identity = self.api.fetch_identity(cookie).await?;

        if !identity.logged_in {
            tracing::warn!("Service does not report the confirmed session as logged in yet");
            return Err(LoginError::InconsistentState);
        }

        let label = identity
            .uname
            .or_else(|| identity.mid.map(|mid| mid.to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        tracing::info!("Logged in as {}", label);
        Ok(Credential::new(cookie, label, identity.mid))
    }
}

/// Build the session cookie string from a confirmation.
///
/// Prefers the cookies the service set; falls back to the session fields
/// carried in the redirect URL's query string, kept percent-encoded as they
/// would appear in a cookie.
pub fn session_cookie(confirmation: &Confirmation) -> Result<String, LoginError> {
    let cookie = if confirmation.cookies.is_empty() {
        let query = confirmation
            .redirect_url
            .split_once('?')
            .map(|(_, q)| q.split('#').next().unwrap_or_default())
            .unwrap_or_default();
        join_cookie(
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .filter(|(name, _)| !NON_SESSION_PARAMS.contains(name)),
        )
    } else {
        join_cookie(
            confirmation
                .cookies
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        )
    };

    if cookie.is_empty() {
        return Err(LoginError::Protocol(
            "Confirmed login carried no session cookies".to_string(),
        ));
    }
    Ok(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Identity, LoginToken, PollResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedIdentity {
        script: Mutex<VecDeque<Result<Identity, LoginError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedIdentity {
        fn new(script: Vec<Result<Identity, LoginError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LoginApi for ScriptedIdentity {
        async fn issue_token(&self) -> Result<LoginToken, LoginError> {
            unreachable!()
        }

        async fn poll_status(&self, _token: &LoginToken) -> Result<PollResult, LoginError> {
            unreachable!()
        }

        async fn fetch_identity(&self, _cookie: &str) -> Result<Identity, LoginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(not_logged_in()))
        }
    }

    fn not_logged_in() -> Identity {
        Identity {
            logged_in: false,
            uname: None,
            mid: None,
        }
    }

    fn alice() -> Identity {
        Identity {
            logged_in: true,
            uname: Some("alice".to_string()),
            mid: Some(42),
        }
    }

    fn config(retries: u32) -> FlowConfig {
        FlowConfig {
            fetch_retries: retries,
            fetch_retry_delay: Duration::from_millis(1),
            ..FlowConfig::default()
        }
    }

    fn confirmation() -> Confirmation {
        Confirmation {
            redirect_url: String::new(),
            cookies: vec![
                ("SESSDATA".to_string(), "s%2C1".to_string()),
                ("DedeUserID".to_string(), "42".to_string()),
            ],
            refresh_token: Some("r".to_string()),
        }
    }

    #[tokio::test]
    async fn test_fetch_after_inconsistent_state() {
        let api = ScriptedIdentity::new(vec![
            Ok(not_logged_in()),
            Ok(not_logged_in()),
            Ok(alice()),
        ]);
        let cred = CredentialFetcher::new(&api, &config(3))
            .fetch_credential(&confirmation(), &AttemptHandle::new())
            .await
            .unwrap();

        assert_eq!(cred.identity(), "alice");
        assert_eq!(cred.user_id(), Some(42));
        assert_eq!(cred.raw(), "SESSDATA=s%2C1; DedeUserID=42");
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_inconsistent_state_is_bounded() {
        let api = ScriptedIdentity::new(vec![]);
        let err = CredentialFetcher::new(&api, &config(2))
            .fetch_credential(&confirmation(), &AttemptHandle::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LoginError::InconsistentState));
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let api = ScriptedIdentity::new(vec![Err(LoginError::Rejected {
            code: -412,
            message: "blocked".to_string(),
        })]);
        let err = CredentialFetcher::new(&api, &config(3))
            .fetch_credential(&confirmation(), &AttemptHandle::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LoginError::Rejected { code: -412, .. }));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_attempt_does_not_fetch() {
        let api = ScriptedIdentity::new(vec![Ok(alice())]);
        let attempt = AttemptHandle::new();
        attempt.cancel();
        let err = CredentialFetcher::new(&api, &config(3))
            .fetch_credential(&confirmation(), &attempt)
            .await
            .unwrap_err();

        assert!(matches!(err, LoginError::Cancelled));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_ends_fetch() {
        let api = ScriptedIdentity::new(vec![]);
        let config = FlowConfig {
            fetch_retries: 3,
            fetch_retry_delay: Duration::from_secs(60),
            ..FlowConfig::default()
        };
        let attempt = AttemptHandle::new();

        let canceller = attempt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let fetcher = CredentialFetcher::new(&api, &config);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            fetcher.fetch_credential(&confirmation(), &attempt),
        )
        .await
        .expect("cancel should end the backoff wait");

        assert!(matches!(result, Err(LoginError::Cancelled)));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_label_falls_back_to_user_id() {
        let api = ScriptedIdentity::new(vec![Ok(Identity {
            logged_in: true,
            uname: None,
            mid: Some(7),
        })]);
        let cred = CredentialFetcher::new(&api, &config(0))
            .fetch_credential(&confirmation(), &AttemptHandle::new())
            .await
            .unwrap();
        assert_eq!(cred.identity(), "7");
    }

    #[test]
    fn test_session_cookie_from_redirect() {
        let confirmation = Confirmation {
            redirect_url: "https://passport.biligame.com/crossDomain?DedeUserID=42&DedeUserID__ckMd5=abc&Expires=15551000&SESSDATA=s%2C1&bili_jct=j&gourl=https%3A%2F%2Fwww.bilibili.com#frag".to_string(),
            cookies: vec![],
            refresh_token: None,
        };
        assert_eq!(
            session_cookie(&confirmation).unwrap(),
            "DedeUserID=42; DedeUserID__ckMd5=abc; Expires=15551000; SESSDATA=s%2C1; bili_jct=j"
        );
    }

    #[test]
    fn test_session_cookie_requires_fields() {
        let confirmation = Confirmation {
            redirect_url: "https://www.bilibili.com/".to_string(),
            cookies: vec![],
            refresh_token: None,
        };
        assert!(matches!(
            session_cookie(&confirmation),
            Err(LoginError::Protocol(_))
        ));
    }
}
