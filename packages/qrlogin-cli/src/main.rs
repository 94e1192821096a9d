//! qrlogin CLI - QR code login to the bilibili passport service
//!
//! This binary provides a terminal front end that can:
//! - Run a QR code login and store the resulting session cookie
//! - Check which stored sessions are still active
//! - Delete stored sessions

mod observer;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use observer::TerminalObserver;
use qrlogin_core::{
    CredentialStore, FailureCause, LoginApi, LoginConfig, Outcome, PassportClient,
    SessionController, config,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "qrlogin")]
#[command(version)]
#[command(about = "Log in to bilibili by scanning a QR code")]
#[command(long_about = "
qrlogin requests a login code from the bilibili passport service, waits
for it to be scanned and confirmed in the mobile app, and stores the
resulting session cookie as <user id>_cookie.txt.

Quick start:
  1. Log in:          qrlogin login
  2. Check sessions:  qrlogin status
  3. Forget one:      qrlogin logout <USER ID>
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in by scanning a QR code (Ctrl+C cancels)
    Login {
        /// Directory for the cookie file (overrides the configured one)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Print the obtained cookie string after a successful login
        #[arg(long)]
        show_cookie: bool,
    },

    /// List stored sessions and check whether they are still active
    Status,

    /// Delete a stored session
    Logout {
        /// Storage key of the session (the user id)
        key: String,
    },

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("qrlogin={},qrlogin_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = config::load_config();

    match &cli.command {
        Commands::Login {
            out_dir,
            show_cookie,
        } => cmd_login(&cli, config, out_dir.clone(), *show_cookie).await,
        Commands::Status => cmd_status(&cli, &config).await,
        Commands::Logout { key } => cmd_logout(&cli, &config, key),
        Commands::Config => cmd_config(&cli, &config),
    }
}

#[cfg(not(feature = "keyring"))]
fn open_store(dir: PathBuf) -> CredentialStore {
    CredentialStore::in_dir(dir)
}

#[cfg(feature = "keyring")]
fn open_store(_dir: PathBuf) -> CredentialStore {
    CredentialStore::new(qrlogin_core::auth::KeyringSink)
}

async fn cmd_login(
    cli: &Cli,
    config: LoginConfig,
    out_dir: Option<PathBuf>,
    show_cookie: bool,
) -> Result<()> {
    let storage_dir = out_dir.unwrap_or_else(|| config.storage_dir.clone());
    let api = Arc::new(
        PassportClient::from_config(&config).context("Failed to create the HTTP client")?,
    );
    let store = open_store(storage_dir);

    if let OutputFormat::Text = cli.format {
        println!("Starting login...");
    }

    let controller = SessionController::new(api, store, config.flow.clone());
    let observer = Arc::new(TerminalObserver::new(cli.format));
    let attempt = controller.begin_attempt(observer.clone()).await;

    let state = tokio::select! {
        state = attempt.finished() => state,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, cancelling login attempt {}", attempt.id());
            controller.cancel(&attempt);
            attempt.finished().await
        }
    };

    let Some(outcome) = observer.take_outcome() else {
        bail!("Login attempt ended without an outcome ({:?})", state);
    };

    match outcome {
        Outcome::Succeeded {
            identity,
            credential,
            location,
        } => {
            let cookie = show_cookie.then(|| credential.raw());
            match cli.format {
                OutputFormat::Text => {
                    println!();
                    println!("Logged in as {}", identity);
                    match &location {
                        Ok(path) => println!("Session saved to {}", path),
                        Err(cause) => eprintln!("Session could not be saved: {}", cause),
                    }
                    if let Some(cookie) = cookie {
                        println!();
                        println!("Cookie: {}", cookie);
                    }
                }
                OutputFormat::Json => {
                    println!("{}", succeeded_json(&identity, &location, cookie));
                }
            }
            Ok(())
        }
        Outcome::Failed { cause } => {
            if let OutputFormat::Json = cli.format {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "failed",
                        "cause": cause,
                    })
                );
            }
            bail!("Login failed: {}", cause)
        }
        Outcome::Cancelled => {
            match cli.format {
                OutputFormat::Text => println!("Login cancelled."),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "status": "cancelled" }));
                }
            }
            Ok(())
        }
    }
}

fn succeeded_json(
    identity: &str,
    location: &Result<String, FailureCause>,
    cookie: Option<&str>,
) -> serde_json::Value {
    let mut report = serde_json::json!({
        "status": "succeeded",
        "identity": identity,
        "location": location.as_ref().ok(),
        "storage_error": location.as_ref().err(),
    });
    if let Some(cookie) = cookie {
        report["cookie"] = serde_json::json!(cookie);
    }
    report
}

async fn cmd_status(cli: &Cli, config: &LoginConfig) -> Result<()> {
    let store = open_store(config.storage_dir.clone());
    let client =
        PassportClient::from_config(config).context("Failed to create the HTTP client")?;
    let keys = store.list().context("Failed to list stored sessions")?;

    let mut sessions = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(raw) = store
            .load(&key)
            .with_context(|| format!("Failed to read session {}", key))?
        else {
            continue;
        };

        let (active, identity, error) = match client.fetch_identity(&raw).await {
            Ok(identity) => (identity.logged_in, identity.uname, None),
            Err(e) => {
                tracing::debug!("Could not verify session {}: {}", key, e);
                (false, None, Some(e.to_string()))
            }
        };
        sessions.push(serde_json::json!({
            "key": key,
            "active": active,
            "identity": identity,
            "error": error,
        }));
    }

    match cli.format {
        OutputFormat::Text => {
            println!("Storage: {}", store.describe());
            println!();
            if sessions.is_empty() {
                println!("No stored sessions.");
                println!();
                println!("Run 'qrlogin login' to log in.");
            }
            for session in &sessions {
                let state = match (&session["active"], &session["error"]) {
                    (serde_json::Value::Bool(true), _) => "active",
                    (_, serde_json::Value::String(_)) => "unknown",
                    _ => "expired",
                };
                println!(
                    "  {:20} {:8} {}",
                    session["key"].as_str().unwrap_or("-"),
                    state,
                    session["identity"].as_str().unwrap_or("-")
                );
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "storage_info": store.describe(),
                    "sessions": sessions,
                })
            );
        }
    }

    Ok(())
}

fn cmd_logout(cli: &Cli, config: &LoginConfig, key: &str) -> Result<()> {
    let store = open_store(config.storage_dir.clone());
    let removed = store
        .remove(key)
        .with_context(|| format!("Failed to delete session {}", key))?;

    match cli.format {
        OutputFormat::Text => {
            if removed {
                println!("Deleted session {}", key);
            } else {
                println!("No session stored under {}", key);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": if removed { "deleted" } else { "not_found" },
                    "key": key,
                })
            );
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli, config: &LoginConfig) -> Result<()> {
    let config_path = config::get_config_file_path_string();
    let store = open_store(config.storage_dir.clone());
    let max_wait = config
        .flow
        .max_wait
        .map(|d| format!("{}s", d.as_secs()))
        .unwrap_or_else(|| "none".to_string());

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:       {}", config_path);
            println!("Passport endpoint: {} (from {})", config.passport_url, config.source);
            println!("API endpoint:      {}", config.api_url);
            println!("Credential store:  {}", store.describe());
            println!(
                "Polling:           every {}s, give up after {} errors, max wait {}",
                config.flow.poll_interval.as_secs(),
                config.flow.max_consecutive_errors,
                max_wait
            );
            println!();
            println!("Environment variables:");
            println!("  QRLOGIN_PASSPORT_URL - Override passport endpoint");
            println!("  QRLOGIN_API_URL      - Override web API endpoint");
            println!("  QRLOGIN_STORAGE_DIR  - Override credential directory");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "passport_url": config.passport_url,
                    "api_url": config.api_url,
                    "endpoint_source": format!("{}", config.source),
                    "credential_storage": store.describe(),
                    "poll_interval_secs": config.flow.poll_interval.as_secs(),
                    "max_consecutive_errors": config.flow.max_consecutive_errors,
                    "max_wait_secs": config.flow.max_wait.map(|d| d.as_secs()),
                })
            );
        }
    }

    Ok(())
}
