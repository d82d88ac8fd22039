//! Ambient session state made explicit: bearer token plus minimal user
//! profile, set on login and cleared on logout.
//!
//! The context is injected into the presenter and the push bridge. Absence
//! of a token refuses protected operations before any network call is made.
//! The session persists to a JSON file in the data dir so it survives
//! restarts.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
  pub token: String,
  pub user_id: String,
  pub name: String,
  pub email: Option<String>,
}

/// Shared, explicitly-passed session context.
#[derive(Clone)]
pub struct SessionContext {
  inner: Arc<RwLock<Option<Session>>>,
  path: Option<PathBuf>,
}

impl SessionContext {
  /// An in-memory context with no persistence. Used by tests.
  pub fn ephemeral() -> Self {
    Self {
      inner: Arc::new(RwLock::new(None)),
      path: None,
    }
  }

  /// Load the persisted session, if any, from `<data_dir>/session.json`.
  pub fn load(data_dir: &std::path::Path) -> Self {
    let path = data_dir.join("session.json");
    let session = std::fs::read_to_string(&path)
      .ok()
      .and_then(|raw| serde_json::from_str(&raw).ok());
    Self {
      inner: Arc::new(RwLock::new(session)),
      path: Some(path),
    }
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Session>> {
    self.inner.read().unwrap_or_else(|p| p.into_inner())
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Session>> {
    self.inner.write().unwrap_or_else(|p| p.into_inner())
  }

  /// Set on successful login.
  pub fn set(&self, session: Session) {
    *self.write() = Some(session);
    self.persist();
  }

  /// Cleared on logout or when the server reports the token invalid.
  pub fn clear(&self) {
    *self.write() = None;
    if let Some(path) = &self.path {
      if path.exists() {
        if let Err(err) = std::fs::remove_file(path) {
          warn!("failed to remove session file: {err}");
        }
      }
    }
  }

  pub fn current(&self) -> Option<Session> {
    self.read().clone()
  }

  pub fn token(&self) -> Option<String> {
    self.read().as_ref().map(|s| s.token.clone())
  }

  pub fn is_authenticated(&self) -> bool {
    self.read().is_some()
  }

  /// Token for a protected operation, refused up front when logged out.
  pub fn require_token(&self) -> Result<String> {
    self
      .token()
      .ok_or_else(|| Error::api(401, "not logged in"))
  }

  fn persist(&self) {
    let Some(path) = &self.path else { return };
    let session = self.read().clone();
    let result = (|| -> std::io::Result<()> {
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
      }
      let raw = serde_json::to_string_pretty(&session)?;
      std::fs::write(path, raw)
    })();
    if let Err(err) = result {
      warn!("failed to persist session: {err}");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn session() -> Session {
    Session {
      token: "tok-123".to_string(),
      user_id: "user-1".to_string(),
      name: "Dimas".to_string(),
      email: Some("dimas@example.com".to_string()),
    }
  }

  #[test]
  fn set_and_clear_lifecycle() {
    let ctx = SessionContext::ephemeral();
    assert!(!ctx.is_authenticated());
    assert!(ctx.require_token().unwrap_err().is_unauthorized());

    ctx.set(session());
    assert!(ctx.is_authenticated());
    assert_eq!(ctx.require_token().unwrap(), "tok-123");

    ctx.clear();
    assert!(!ctx.is_authenticated());
    assert!(ctx.token().is_none());
  }

  #[test]
  fn survives_a_poisoned_lock() {
    let ctx = SessionContext::ephemeral();
    let other = ctx.clone();
    std::thread::spawn(move || {
      let _guard = other.inner.write().unwrap();
      panic!("poison the lock");
    })
    .join()
    .unwrap_err();

    ctx.set(session());
    assert!(ctx.is_authenticated());
    assert_eq!(ctx.token().as_deref(), Some("tok-123"));
  }

  #[test]
  fn session_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = SessionContext::load(dir.path());
    assert!(!ctx.is_authenticated());

    ctx.set(session());

    let reloaded = SessionContext::load(dir.path());
    assert_eq!(reloaded.token().as_deref(), Some("tok-123"));
    assert_eq!(reloaded.current().unwrap().name, "Dimas");

    ctx.clear();
    let cleared = SessionContext::load(dir.path());
    assert!(!cleared.is_authenticated());
  }
}
