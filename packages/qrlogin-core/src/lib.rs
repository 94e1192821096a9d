//! qrlogin Core Library
//!
//! This crate implements a QR code login against the bilibili passport
//! service:
//! - Login token issue and status polling with bounded retries
//! - Session credential lookup once the login is confirmed
//! - Credential persistence keyed by user id (files, optionally the keyring)
//!
//! # Features
//!
//! - `keyring-storage`: Store credentials in the platform keyring
//!
//! # Example
//!
//! ```no_run
//! use qrlogin_core::{auth, config, PassportClient};
//! use std::sync::Arc;
//!
//! struct Print;
//!
//! impl auth::LoginObserver for Print {
//!     fn on_status(&self, text: &str) { println!("{}", text); }
//!     fn on_image(&self, _image: Option<&[u8]>) {}
//!     fn on_outcome(&self, outcome: &auth::Outcome) { println!("{:?}", outcome); }
//!     fn on_scan_url(&self, url: &str) { println!("Scan: {}", url); }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), qrlogin_core::LoginError> {
//!     let config = config::load_config();
//!     let api = Arc::new(PassportClient::from_config(&config)?);
//!     let store = auth::CredentialStore::in_dir(&config.storage_dir);
//!
//!     let controller = auth::SessionController::new(api, store, config.flow.clone());
//!     let attempt = controller.begin_attempt(Arc::new(Print)).await;
//!     attempt.finished().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod render;
pub mod retry;

// Re-export commonly used types
pub use api::{Confirmation, Identity, LoginApi, LoginToken, PassportClient, PollResult};
pub use auth::{
    AttemptHandle, AttemptState, Credential, CredentialStore, LoginObserver, Outcome,
    SessionController,
};
pub use config::{ConfigSource, FlowConfig, LoginConfig, load_config};
pub use error::{ErrorKind, FailureCause, LoginError};
pub use render::{CodeRenderer, NoImage};
