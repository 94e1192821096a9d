use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Default passport endpoint (token issue and status polling)
const DEFAULT_PASSPORT_URL: &str = "https://passport.bilibili.com";

/// Default web API endpoint (identity lookup)
const DEFAULT_API_URL: &str = "https://api.bilibili.com";

/// Environment variable names for overrides
const ENV_PASSPORT_URL: &str = "QRLOGIN_PASSPORT_URL";
const ENV_API_URL: &str = "QRLOGIN_API_URL";
const ENV_STORAGE_DIR: &str = "QRLOGIN_STORAGE_DIR";

/// Default delay between two status polls
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
/// Consecutive transient poll failures tolerated before giving up
const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;
/// Local ceiling on one attempt; login codes are valid for 180s server-side
const DEFAULT_MAX_WAIT_SECS: u64 = 180;
const DEFAULT_FETCH_RETRIES: u32 = 3;
const DEFAULT_FETCH_RETRY_DELAY_MS: u64 = 1000;

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    endpoints: Option<EndpointsSection>,
    polling: Option<PollingSection>,
    storage: Option<StorageSection>,
}

#[derive(Debug, Deserialize, Default)]
struct EndpointsSection {
    /// Passport host (e.g., "https://passport.bilibili.com")
    passport_url: Option<String>,
    /// Web API host (e.g., "https://api.bilibili.com")
    api_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PollingSection {
    interval_secs: Option<u64>,
    max_consecutive_errors: Option<u32>,
    /// 0 disables the local ceiling
    max_wait_secs: Option<u64>,
    fetch_retries: Option<u32>,
    fetch_retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageSection {
    dir: Option<PathBuf>,
}

/// Timing and retry bounds of one login attempt
#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    /// Fixed delay between status polls
    pub poll_interval: Duration,
    /// Consecutive transient poll failures that end the attempt
    pub max_consecutive_errors: u32,
    /// Local wall-clock budget for polling, on top of server-side expiry
    pub max_wait: Option<Duration>,
    /// Extra identity lookups after a confirmed-but-not-active session
    pub fetch_retries: u32,
    pub fetch_retry_delay: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            max_wait: Some(Duration::from_secs(DEFAULT_MAX_WAIT_SECS)),
            fetch_retries: DEFAULT_FETCH_RETRIES,
            fetch_retry_delay: Duration::from_millis(DEFAULT_FETCH_RETRY_DELAY_MS),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub passport_url: String,
    pub api_url: String,
    /// Directory credential files are written to
    pub storage_dir: PathBuf,
    pub flow: FlowConfig,
    /// Source of the endpoint configuration (for logging)
    pub source: ConfigSource,
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("qrlogin").join("config.toml"))
}

/// Default directory for stored credentials
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .map(|d| d.join("qrlogin"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Load configuration from the config file
fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

fn clean_url(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    (!url.is_empty()).then(|| url.to_string())
}

/// Load configuration with priority:
/// 1. Environment variables (QRLOGIN_PASSPORT_URL, QRLOGIN_API_URL, QRLOGIN_STORAGE_DIR)
/// 2. Config file (~/.config/qrlogin/config.toml)
/// 3. Default values
pub fn load_config() -> LoginConfig {
    resolve_config(|name| std::env::var(name).ok(), load_config_file())
}

fn resolve_config<E>(env: E, file: Option<ConfigFile>) -> LoginConfig
where
    E: Fn(&str) -> Option<String>,
{
    let file = file.unwrap_or_default();
    let endpoints = file.endpoints.unwrap_or_default();
    let mut source = ConfigSource::Default;

    let env_passport = env(ENV_PASSPORT_URL).and_then(|u| clean_url(&u));
    let env_api = env(ENV_API_URL).and_then(|u| clean_url(&u));
    let file_passport = endpoints.passport_url.as_deref().and_then(clean_url);
    let file_api = endpoints.api_url.as_deref().and_then(clean_url);

    if env_passport.is_some() || env_api.is_some() {
        source = ConfigSource::Environment;
    } else if file_passport.is_some() || file_api.is_some() {
        source = ConfigSource::ConfigFile;
    }

    let passport_url = env_passport
        .or(file_passport)
        .unwrap_or_else(|| DEFAULT_PASSPORT_URL.to_string());
    let api_url = env_api
        .or(file_api)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    match source {
        ConfigSource::Default => tracing::debug!("Using default endpoints: {}", passport_url),
        _ => tracing::info!("Using passport endpoint from {}: {}", source, passport_url),
    }

    let storage_dir = env(ENV_STORAGE_DIR)
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
        .or(file.storage.and_then(|s| s.dir))
        .unwrap_or_else(default_storage_dir);

    LoginConfig {
        passport_url,
        api_url,
        storage_dir,
        flow: flow_config(file.polling.unwrap_or_default()),
        source,
    }
}

fn flow_config(polling: PollingSection) -> FlowConfig {
    let defaults = FlowConfig::default();

    let poll_interval = match polling.interval_secs {
        Some(0) => {
            tracing::warn!("polling.interval_secs must be positive, using default");
            defaults.poll_interval
        }
        Some(secs) => Duration::from_secs(secs),
        None => defaults.poll_interval,
    };

    let max_wait = match polling.max_wait_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => defaults.max_wait,
    };

    FlowConfig {
        poll_interval,
        max_consecutive_errors: polling
            .max_consecutive_errors
            .unwrap_or(defaults.max_consecutive_errors)
            .max(1),
        max_wait,
        fetch_retries: polling.fetch_retries.unwrap_or(defaults.fetch_retries),
        fetch_retry_delay: polling
            .fetch_retry_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.fetch_retry_delay),
    }
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/qrlogin/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# qrlogin configuration
# Place this file at: ~/.config/qrlogin/config.toml

[endpoints]
# passport_url = "https://passport.bilibili.com"
# api_url = "https://api.bilibili.com"

[polling]
# Seconds between status polls
# interval_secs = 2
# Consecutive network/parse failures tolerated while polling
# max_consecutive_errors = 5
# Local ceiling for one attempt in seconds (0 disables it)
# max_wait_secs = 180
# Identity lookups retried when the session is not active yet
# fetch_retries = 3
# fetch_retry_delay_ms = 1000

[storage]
# Directory for <user id>_cookie.txt files
# dir = "/home/me/.local/share/qrlogin"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = resolve_config(no_env, None);
        assert_eq!(config.passport_url, DEFAULT_PASSPORT_URL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.source, ConfigSource::Default);
        assert_eq!(config.flow, FlowConfig::default());
    }

    #[test]
    fn test_file_values() {
        let file: ConfigFile = toml::from_str(
            r#"
            [endpoints]
            passport_url = "http://localhost:8080/"

            [polling]
            interval_secs = 3
            max_wait_secs = 0
            fetch_retries = 1

            [storage]
            dir = "/tmp/cookies"
            "#,
        )
        .unwrap();

        let config = resolve_config(no_env, Some(file));
        assert_eq!(config.passport_url, "http://localhost:8080");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.source, ConfigSource::ConfigFile);
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/cookies"));
        assert_eq!(config.flow.poll_interval, Duration::from_secs(3));
        assert_eq!(config.flow.max_wait, None);
        assert_eq!(config.flow.fetch_retries, 1);
        assert_eq!(
            config.flow.max_consecutive_errors,
            DEFAULT_MAX_CONSECUTIVE_ERRORS
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [endpoints]
            passport_url = "http://from-file"
            "#,
        )
        .unwrap();

        let env = |name: &str| match name {
            ENV_PASSPORT_URL => Some(" http://from-env/ ".to_string()),
            ENV_STORAGE_DIR => Some("/var/lib/qrlogin".to_string()),
            _ => None,
        };

        let config = resolve_config(env, Some(file));
        assert_eq!(config.passport_url, "http://from-env");
        assert_eq!(config.source, ConfigSource::Environment);
        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/qrlogin"));
    }

    #[test]
    fn test_zero_interval_falls_back() {
        let file: ConfigFile = toml::from_str(
            r#"
            [polling]
            interval_secs = 0
            max_consecutive_errors = 0
            "#,
        )
        .unwrap();

        let config = resolve_config(no_env, Some(file));
        assert_eq!(
            config.flow.poll_interval,
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
        );
        assert_eq!(config.flow.max_consecutive_errors, 1);
    }

    #[test]
    fn test_example_config_parses() {
        let file: Result<ConfigFile, _> = toml::from_str(&generate_example_config());
        assert!(file.is_ok());
    }
}
