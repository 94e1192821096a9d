//! The session credential obtained by a successful login.

use serde::Serialize;

/// Authenticated session: a cookie-style `k=v; k2=v2` string plus the
/// identity the service reported for it.
///
/// Fields are only readable; a credential never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Credential {
    raw: String,
    identity: String,
    user_id: Option<u64>,
    obtained_at: chrono::DateTime<chrono::Utc>,
}

impl Credential {
    pub fn new(raw: impl Into<String>, identity: impl Into<String>, user_id: Option<u64>) -> Self {
        Self {
            raw: raw.into(),
            identity: identity.into(),
            user_id,
            obtained_at: chrono::Utc::now(),
        }
    }

    /// The serialized session, exactly as it is persisted.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Display name of the logged-in user.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn user_id(&self) -> Option<u64> {
        self.user_id
    }

    pub fn obtained_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.obtained_at
    }

    /// Value of one field of the cookie string.
    pub fn field(&self, name: &str) -> Option<&str> {
        cookie_field(&self.raw, name)
    }
}

/// Look up `name` in a `k=v; k2=v2` string.
pub fn cookie_field<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
}

/// Join name/value pairs into a cookie string, keeping the first occurrence
/// of each name.
pub fn join_cookie<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut seen: Vec<&str> = Vec::new();
    let mut parts = Vec::new();
    for (name, value) in pairs {
        if name.is_empty() || seen.contains(&name) {
            continue;
        }
        seen.push(name);
        parts.push(format!("{}={}", name, value));
    }
    parts.join("; ")
}
