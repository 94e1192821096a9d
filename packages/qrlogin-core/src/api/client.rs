use super::{Confirmation, Identity, LoginApi, LoginToken, PollResult};
use crate::config::LoginConfig;
use crate::error::LoginError;
use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// The passport endpoints answer 412 to clients without a browser user agent
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const REQUEST_TIMEOUT_SECS: u64 = 10;

// Status codes inside the poll response's `data.code`
const POLL_CONFIRMED: i64 = 0;
const POLL_EXPIRED: i64 = 86038;
const POLL_SCANNED: i64 = 86090;
const POLL_NOT_SCANNED: i64 = 86101;

/// `code` of the nav endpoint for a cookie without an active session
const NAV_NOT_LOGGED_IN: i64 = -101;

/// HTTP client for the passport and web API endpoints.
#[derive(Debug, Clone)]
pub struct PassportClient {
    passport_url: String,
    api_url: String,
    http: reqwest::Client,
}

impl PassportClient {
    pub fn new(passport_url: &str, api_url: &str) -> Result<Self, LoginError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(BROWSER_USER_AGENT)
            .build()?;

        Ok(Self {
            passport_url: passport_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn from_config(config: &LoginConfig) -> Result<Self, LoginError> {
        Self::new(&config.passport_url, &config.api_url)
    }

    /// Send a request and decode the service's `{code, message, data}` envelope.
    ///
    /// Cookies from `Set-Cookie` headers are returned alongside, since the
    /// poll endpoint delivers the session that way.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(Envelope<T>, Vec<(String, String)>), LoginError> {
        let resp = request.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!("Request failed: {} - {}", status, body);
            return Err(LoginError::from_status(status, &body));
        }

        let cookies = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();

        let body = resp.text().await?;
        let envelope = serde_json::from_str::<Envelope<T>>(&body)
            .map_err(|e| LoginError::Protocol(format!("Failed to parse response: {}", e)))?;

        Ok((envelope, cookies))
    }
}

#[async_trait]
impl LoginApi for PassportClient {
    async fn issue_token(&self) -> Result<LoginToken, LoginError> {
        let url = format!(
            "{}/x/passport-login/web/qrcode/generate",
            self.passport_url
        );

        let (envelope, _) = self.send::<GenerateData>(self.http.get(&url)).await?;
        let data = envelope.into_data()?;

        Ok(LoginToken::new(data.qrcode_key, data.url))
    }

    async fn poll_status(&self, token: &LoginToken) -> Result<PollResult, LoginError> {
        let url = format!("{}/x/passport-login/web/qrcode/poll", self.passport_url);

        let request = self.http.get(&url).query(&[("qrcode_key", token.key())]);
        let (envelope, cookies) = self.send::<PollData>(request).await?;
        let data = envelope.into_data()?;

        match data.code {
            POLL_CONFIRMED => Ok(PollResult::Confirmed(Confirmation {
                redirect_url: data.url,
                cookies,
                refresh_token: Some(data.refresh_token).filter(|t| !t.is_empty()),
            })),
            POLL_NOT_SCANNED => Ok(PollResult::Pending),
            POLL_SCANNED => Ok(PollResult::ScannedAwaitingConfirm),
            POLL_EXPIRED => Ok(PollResult::Expired),
            code => Err(LoginError::Rejected {
                code,
                message: data.message,
            }),
        }
    }

    async fn fetch_identity(&self, cookie: &str) -> Result<Identity, LoginError> {
        let url = format!("{}/x/web-interface/nav", self.api_url);

        let request = self.http.get(&url).header(COOKIE, cookie);
        let (envelope, _) = self.send::<NavData>(request).await?;

        if envelope.code == NAV_NOT_LOGGED_IN {
            return Ok(Identity {
                logged_in: false,
                uname: None,
                mid: None,
            });
        }

        let data = envelope.into_data()?;
        Ok(Identity {
            logged_in: data.is_login,
            uname: data.uname.filter(|n| !n.is_empty()),
            mid: data.mid.filter(|m| *m != 0),
        })
    }
}

/// Split a `Set-Cookie` header into its name and value, dropping attributes.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, LoginError> {
        if self.code != 0 {
            return Err(LoginError::Rejected {
                code: self.code,
                message: self.message,
            });
        }
        self.data
            .ok_or_else(|| LoginError::Protocol("Response is missing the data field".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateData {
    url: String,
    qrcode_key: String,
}

#[derive(Debug, Deserialize)]
struct PollData {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct NavData {
    #[serde(rename = "isLogin", default)]
    is_login: bool,
    uname: Option<String>,
    mid: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("SESSDATA=abc%2C123; Path=/; Domain=bilibili.com; HttpOnly"),
            Some(("SESSDATA".to_string(), "abc%2C123".to_string()))
        );
        assert_eq!(
            parse_set_cookie("bili_jct=ff00"),
            Some(("bili_jct".to_string(), "ff00".to_string()))
        );
        assert_eq!(parse_set_cookie("=orphan; Path=/"), None);
        assert_eq!(parse_set_cookie("garbage"), None);
    }

    #[test]
    fn test_envelope_rejects_nonzero_code() {
        let envelope: Envelope<GenerateData> =
            serde_json::from_str(r#"{"code": -412, "message": "request blocked"}"#).unwrap();
        match envelope.into_data() {
            Err(LoginError::Rejected { code, message }) => {
                assert_eq!(code, -412);
                assert_eq!(message, "request blocked");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_envelope_requires_data() {
        let envelope: Envelope<GenerateData> =
            serde_json::from_str(r#"{"code": 0, "message": "0"}"#).unwrap();
        assert!(matches!(envelope.into_data(), Err(LoginError::Protocol(_))));
    }
}
