use crate::api::{LoginApi, LoginToken};
use crate::error::LoginError;

/// Request a login token and the URL the mobile client has to scan.
///
/// Issues exactly one request. Retrying is left to whoever started the
/// attempt.
pub async fn request_token(api: &dyn LoginApi) -> Result<LoginToken, LoginError> {
    let token = api.issue_token().await?;

    if token.key().trim().is_empty() {
        return Err(LoginError::Protocol("Service issued an empty login key".to_string()));
    }
    if token.scan_url().trim().is_empty() {
        return Err(LoginError::Protocol("Service issued an empty scan URL".to_string()));
    }

    tracing::info!("Login code issued: {}", token.scan_url());
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Identity, PollResult};
    use async_trait::async_trait;

    struct FixedToken(&'static str, &'static str);

    #[async_trait]
    impl LoginApi for FixedToken {
        async fn issue_token(&self) -> Result<LoginToken, LoginError> {
            Ok(LoginToken::new(self.0, self.1))
        }

        async fn poll_status(&self, _token: &LoginToken) -> Result<PollResult, LoginError> {
            unreachable!("token tests never poll")
        }

        async fn fetch_identity(&self, _cookie: &str) -> Result<Identity, LoginError> {
            unreachable!("token tests never fetch")
        }
    }

    #[tokio::test]
    async fn test_request_token() {
        let api = FixedToken("key-1", "https://example.com/scan?k=key-1");
        let token = request_token(&api).await.unwrap();
        assert_eq!(token.key(), "key-1");
        assert_eq!(token.scan_url(), "https://example.com/scan?k=key-1");
    }

    #[tokio::test]
    async fn test_empty_key_is_protocol_error() {
        let api = FixedToken(" ", "https://example.com/scan");
        let err = request_token(&api).await.unwrap_err();
        assert!(matches!(err, LoginError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_empty_url_is_protocol_error() {
        let api = FixedToken("key-1", "");
        let err = request_token(&api).await.unwrap_err();
        assert!(matches!(err, LoginError::Protocol(_)));
    }
}
