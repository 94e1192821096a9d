//! Credential persistence.
//!
//! Every credential is stored under a key derived from the user id field of
//! its cookie string, so a user logging in again overwrites their previous
//! session instead of accumulating files.
//!
//! Storage backends:
//! 1. Plain files, one per key (default)
//! 2. Platform keyring (if the `keyring-storage` feature is enabled)

use super::credential::{Credential, cookie_field};
use crate::error::LoginError;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(feature = "keyring-storage")]
use keyring::Entry;

/// Cookie field identifying the user
const KEY_FIELD: &str = "DedeUserID";
/// Key used when the credential carries no usable user id
pub const FALLBACK_KEY: &str = "unknown_user";
/// File name suffix for file-based storage
const FILE_SUFFIX: &str = "_cookie.txt";

/// Backend that durably writes a raw credential string under a key.
pub trait CredentialSink: Send + Sync {
    /// Write `raw` under `key`, replacing any previous value. Returns a
    /// human-readable location.
    fn write(&self, key: &str, raw: &str) -> Result<String, LoginError>;

    fn read(&self, key: &str) -> Result<Option<String>, LoginError>;

    /// Returns whether anything was deleted.
    fn delete(&self, key: &str) -> Result<bool, LoginError>;

    fn keys(&self) -> Result<Vec<String>, LoginError>;

    /// Where credentials end up (for documentation/debugging)
    fn describe(&self) -> String;
}

/// Derive the storage key of a raw credential string.
pub fn derive_key(raw: &str) -> String {
    cookie_field(raw, KEY_FIELD)
        .map(sanitize_key)
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| FALLBACK_KEY.to_string())
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Reject keys that would not survive sanitizing (path separators etc.)
fn checked_key(key: &str) -> Result<&str, LoginError> {
    if key.is_empty() || sanitize_key(key) != key {
        return Err(LoginError::Storage(format!("Invalid credential key: {:?}", key)));
    }
    Ok(key)
}

/// Derives keys and hands credentials to a [`CredentialSink`].
pub struct CredentialStore {
    sink: Box<dyn CredentialSink>,
}

impl CredentialStore {
    pub fn new(sink: impl CredentialSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    /// File-based store writing `<key>_cookie.txt` files into `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(FileSink::new(dir))
    }

    /// Persist a credential and return where it went.
    ///
    /// Persisting the same credential again yields the same location.
    pub fn persist(&self, credential: &Credential) -> Result<String, LoginError> {
        let key = derive_key(credential.raw());
        if key == FALLBACK_KEY {
            tracing::warn!("Credential has no {} field, storing as {}", KEY_FIELD, FALLBACK_KEY);
        }

        let location = self.sink.write(&key, credential.raw())?;
        tracing::info!(
            "Credential for {} saved to {}",
            credential.identity(),
            location
        );
        Ok(location)
    }

    /// Load the raw credential stored under `key`.
    pub fn load(&self, key: &str) -> Result<Option<String>, LoginError> {
        self.sink.read(checked_key(key)?)
    }

    /// Delete the credential stored under `key`.
    pub fn remove(&self, key: &str) -> Result<bool, LoginError> {
        let removed = self.sink.delete(checked_key(key)?)?;
        if removed {
            tracing::info!("Deleted stored credential {}", key);
        }
        Ok(removed)
    }

    /// Keys of all stored credentials.
    pub fn list(&self) -> Result<Vec<String>, LoginError> {
        self.sink.keys()
    }

    pub fn describe(&self) -> String {
        self.sink.describe()
    }
}

// ============================================================================
// File-based storage
// ============================================================================

pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, FILE_SUFFIX))
    }
}

fn storage_error(path: &Path, action: &str, e: std::io::Error) -> LoginError {
    LoginError::Storage(format!("Failed to {} {}: {}", action, path.display(), e))
}

impl CredentialSink for FileSink {
    fn write(&self, key: &str, raw: &str) -> Result<String, LoginError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .map_err(|e| storage_error(&self.dir, "create directory", e))?;
        }
        let path = self.path_for(key);

        // Owner read/write only: the file holds a live session
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)
                .map_err(|e| storage_error(&path, "create", e))?;
            let mut file = std::io::BufWriter::new(file);
            file.write_all(raw.as_bytes())
                .and_then(|_| file.flush())
                .map_err(|e| storage_error(&path, "write", e))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, raw).map_err(|e| storage_error(&path, "write", e))?;
        }

        tracing::debug!("Credential written to {:?}", path);
        Ok(path.display().to_string())
    }

    fn read(&self, key: &str) -> Result<Option<String>, LoginError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(|s| Some(s.trim().to_string()))
            .map_err(|e| storage_error(&path, "read", e))
    }

    fn delete(&self, key: &str) -> Result<bool, LoginError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .map(|_| true)
            .map_err(|e| storage_error(&path, "delete", e))
    }

    fn keys(&self) -> Result<Vec<String>, LoginError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.dir).map_err(|e| storage_error(&self.dir, "list", e))?;

        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(FILE_SUFFIX).map(str::to_string)
            })
            .filter(|key| !key.is_empty())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn describe(&self) -> String {
        format!("File-based storage: {}", self.dir.display())
    }
}

// ============================================================================
// Keyring-based storage (optional, platform-specific)
// ============================================================================

/// Service name used for keyring entries
#[cfg(feature = "keyring-storage")]
const KEYRING_SERVICE: &str = "qrlogin";

#[cfg(feature = "keyring-storage")]
pub struct KeyringSink;

#[cfg(feature = "keyring-storage")]
fn get_keyring_entry(key: &str) -> Result<Entry, LoginError> {
    tracing::trace!(
        "Creating keyring entry for service='{}', user='{}'",
        KEYRING_SERVICE,
        key
    );
    Entry::new(KEYRING_SERVICE, key)
        .map_err(|e| LoginError::Storage(format!("Failed to create keyring entry: {}", e)))
}

#[cfg(feature = "keyring-storage")]
impl CredentialSink for KeyringSink {
    fn write(&self, key: &str, raw: &str) -> Result<String, LoginError> {
        let entry = get_keyring_entry(key)?;
        entry
            .set_password(raw)
            .map_err(|e| LoginError::Storage(format!("Failed to save to keyring: {}", e)))?;

        // Verify the save worked
        match get_keyring_entry(key)?.get_password() {
            Ok(stored) if stored == raw => {
                tracing::debug!("Credential verified in keyring after save");
            }
            Ok(_) => {
                return Err(LoginError::Storage(
                    "Keyring returned a different credential after save".to_string(),
                ));
            }
            Err(e) => tracing::warn!("Could not verify credential after save: {}", e),
        }

        Ok(format!("keyring:{}/{}", KEYRING_SERVICE, key))
    }

    fn read(&self, key: &str) -> Result<Option<String>, LoginError> {
        match get_keyring_entry(key)?.get_password() {
            Ok(raw) => Ok(Some(raw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(LoginError::Storage(format!("Failed to read keyring: {}", e))),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, LoginError> {
        match get_keyring_entry(key)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(LoginError::Storage(format!(
                "Failed to delete credential from keyring: {}",
                e
            ))),
        }
    }

    fn keys(&self) -> Result<Vec<String>, LoginError> {
        Err(LoginError::Storage(
            "The platform keyring cannot enumerate stored credentials".to_string(),
        ))
    }

    fn describe(&self) -> String {
        #[cfg(target_os = "windows")]
        {
            "Windows Credential Manager".to_string()
        }
        #[cfg(target_os = "macos")]
        {
            "macOS Keychain".to_string()
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            "Linux Secret Service (GNOME Keyring/KWallet)".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("qrlogin-store-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_derive_key() {
        assert_eq!(derive_key("SESSDATA=x; DedeUserID=12345; bili_jct=y"), "12345");
        assert_eq!(derive_key("SESSDATA=x"), FALLBACK_KEY);
        assert_eq!(derive_key("DedeUserID=; SESSDATA=x"), FALLBACK_KEY);
        assert_eq!(derive_key("DedeUserID=../../etc"), "etc");
    }

    #[test]
    fn test_persist_is_idempotent() {
        let dir = scratch_dir();
        let store = CredentialStore::in_dir(&dir);
        let cred = Credential::new("SESSDATA=s; DedeUserID=42", "alice", Some(42));

        let first = store.persist(&cred).unwrap();
        let second = store.persist(&cred).unwrap();

        assert_eq!(first, second);
        assert!(first.ends_with("42_cookie.txt"));
        assert_eq!(
            fs::read_to_string(dir.join("42_cookie.txt")).unwrap(),
            "SESSDATA=s; DedeUserID=42"
        );
        assert_eq!(store.list().unwrap(), vec!["42".to_string()]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_relogin_overwrites() {
        let dir = scratch_dir();
        let store = CredentialStore::in_dir(&dir);

        store
            .persist(&Credential::new("SESSDATA=old; DedeUserID=42", "alice", Some(42)))
            .unwrap();
        store
            .persist(&Credential::new("SESSDATA=new; DedeUserID=42", "alice", Some(42)))
            .unwrap();

        assert_eq!(
            store.load("42").unwrap().as_deref(),
            Some("SESSDATA=new; DedeUserID=42")
        );
        assert_eq!(store.list().unwrap().len(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_user_id_uses_fallback() {
        let dir = scratch_dir();
        let store = CredentialStore::in_dir(&dir);

        let location = store
            .persist(&Credential::new("SESSDATA=s", "bob", None))
            .unwrap();
        assert!(location.ends_with("unknown_user_cookie.txt"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_remove_and_load() {
        let dir = scratch_dir();
        let store = CredentialStore::in_dir(&dir);
        store
            .persist(&Credential::new("DedeUserID=7", "carol", Some(7)))
            .unwrap();

        assert!(store.remove("7").unwrap());
        assert!(!store.remove("7").unwrap());
        assert_eq!(store.load("7").unwrap(), None);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let store = CredentialStore::in_dir(scratch_dir());
        assert!(matches!(store.load("../secret"), Err(LoginError::Storage(_))));
        assert!(matches!(store.remove(""), Err(LoginError::Storage(_))));
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let store = CredentialStore::in_dir(scratch_dir());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_write_failure_is_storage_error() {
        // A regular file where the directory should be
        let blocker = scratch_dir();
        fs::write(&blocker, "not a directory").unwrap();
        let store = CredentialStore::in_dir(blocker.join("nested"));

        let err = store
            .persist(&Credential::new("DedeUserID=1", "dave", Some(1)))
            .unwrap_err();
        assert!(matches!(err, LoginError::Storage(_)));

        fs::remove_file(&blocker).unwrap();
    }
}
