//! Session and identity module for the event gallery client.
//!
//! Sign-in flows live elsewhere; this crate only keeps the resulting session,
//! persists it in the system keyring and tells interested parties who the
//! current principal is.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::watch;

pub const KEYRING_SERVICE_NAME: &str = "PiczGallery";
pub const USE_FILE_STORE_ENV: &str = "USE_FILE_STORE";
const MOCK_KEYRING_ENV: &str = "MOCK_KEYRING";
const SESSION_ENTRY: &str = "session";

static MOCK_STORE: Lazy<Mutex<HashMap<String, String>>> = Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Keyring Error: {0}")]
    Keyring(String),
    #[error("Serialization Error: {0}")]
    Serialization(String),
    #[error("No active session")]
    NoSession,
    #[error("Other Error: {0}")]
    Other(String),
}

/// The authenticated user performing actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Principal {
    pub fn new(id: &str, email: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            email: email.map(str::to_string),
        }
    }

    /// `ada` for `ada@example.com`; `None` when there is no usable email.
    pub fn email_local_part(&self) -> Option<&str> {
        let email = self.email.as_deref()?;
        let local = email.split('@').next()?.trim();
        if local.is_empty() {
            None
        } else {
            Some(local)
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub principal: Principal,
    pub access_token: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("principal", &self.principal)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Source of the current principal.
pub trait IdentityProvider: Send + Sync {
    fn current_principal(&self) -> Option<Principal>;
}

/// Fixed identity, for tools and tests that never sign in or out.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<Principal>);

impl StaticIdentity {
    pub fn signed_in(principal: Principal) -> Self {
        Self(Some(principal))
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_principal(&self) -> Option<Principal> {
        self.0.clone()
    }
}

fn use_mock_store() -> bool {
    std::env::var(MOCK_KEYRING_ENV).is_ok()
}

#[cfg(feature = "file-store")]
fn file_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".picz_gallery")
        .join("session.json")
}

#[cfg(feature = "file-store")]
fn use_file_store() -> bool {
    std::env::var(USE_FILE_STORE_ENV).is_ok()
}

fn store_secret(key: &str, value: &str) -> Result<(), AuthError> {
    if use_mock_store() {
        MOCK_STORE
            .lock()
            .map_err(|_| AuthError::Other("Poisoned lock".into()))?
            .insert(key.to_string(), value.to_string());
        return Ok(());
    }
    #[cfg(feature = "file-store")]
    if use_file_store() {
        let path = file_store_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuthError::Other(e.to_string()))?;
        }
        return std::fs::write(path, value).map_err(|e| AuthError::Other(e.to_string()));
    }
    let entry = keyring::Entry::new(KEYRING_SERVICE_NAME, key)
        .map_err(|e| AuthError::Keyring(e.to_string()))?;
    entry
        .set_password(value)
        .map_err(|e| AuthError::Keyring(e.to_string()))
}

fn load_secret(key: &str) -> Result<Option<String>, AuthError> {
    if use_mock_store() {
        return Ok(MOCK_STORE
            .lock()
            .map_err(|_| AuthError::Other("Poisoned lock".into()))?
            .get(key)
            .cloned());
    }
    #[cfg(feature = "file-store")]
    if use_file_store() {
        return match std::fs::read_to_string(file_store_path()) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthError::Other(e.to_string())),
        };
    }
    let entry = keyring::Entry::new(KEYRING_SERVICE_NAME, key)
        .map_err(|e| AuthError::Keyring(e.to_string()))?;
    match entry.get_password() {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(AuthError::Keyring(e.to_string())),
    }
}

fn delete_secret(key: &str) -> Result<(), AuthError> {
    if use_mock_store() {
        MOCK_STORE
            .lock()
            .map_err(|_| AuthError::Other("Poisoned lock".into()))?
            .remove(key);
        return Ok(());
    }
    #[cfg(feature = "file-store")]
    if use_file_store() {
        return match std::fs::remove_file(file_store_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Other(e.to_string())),
        };
    }
    let entry = keyring::Entry::new(KEYRING_SERVICE_NAME, key)
        .map_err(|e| AuthError::Keyring(e.to_string()))?;
    match entry.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(AuthError::Keyring(e.to_string())),
    }
}

/// Holds the current session and broadcasts sign-in/sign-out transitions.
pub struct SessionManager {
    state: watch::Sender<Option<Session>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    /// Load a previously persisted session, if any.
    #[cfg_attr(feature = "trace-spans", tracing::instrument)]
    pub fn restore() -> Result<Self, AuthError> {
        let manager = Self::new();
        if let Some(raw) = load_secret(SESSION_ENTRY)? {
            let session: Session = serde_json::from_str(&raw)
                .map_err(|e| AuthError::Serialization(e.to_string()))?;
            tracing::info!(user_id = %session.principal.id, "Restored session");
            manager.state.send_replace(Some(session));
        }
        Ok(manager)
    }

    pub fn sign_in(&self, session: Session) -> Result<(), AuthError> {
        let raw = serde_json::to_string(&session)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        store_secret(SESSION_ENTRY, &raw)?;
        tracing::info!(user_id = %session.principal.id, "Signed in");
        self.state.send_replace(Some(session));
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), AuthError> {
        delete_secret(SESSION_ENTRY)?;
        if self.state.send_replace(None).is_some() {
            tracing::info!("Signed out");
        }
        Ok(())
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().clone()
    }

    pub fn access_token(&self) -> Result<String, AuthError> {
        self.state
            .borrow()
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(AuthError::NoSession)
    }

    /// Observe session lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.state.subscribe()
    }
}

impl IdentityProvider for SessionManager {
    fn current_principal(&self) -> Option<Principal> {
        self.state.borrow().as_ref().map(|s| s.principal.clone())
    }
}
