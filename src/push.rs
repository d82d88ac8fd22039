//! Push delivery bridge: connects the platform's subscription primitive to
//! the remote service's subscription records.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::warn;

use crate::error::{Error, Result};

/// Public VAPID key of the story service, base64url-encoded.
pub const DEFAULT_SERVER_KEY: &str =
  "BCCs2eonMI-6H2ctvFaWg-UYdDv387Vno_bzUzALpB442r2lCnsHmtrx8biyPi_E-1fSGABK_Qs_GlvPoJJqxbk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
  Granted,
  Denied,
  /// Not yet asked.
  Default,
}

/// Capability/permission tuple returned by [`PushBridge::check_support`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushSupport {
  pub supported: bool,
  pub permission: Permission,
}

/// A device subscription: endpoint plus key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSubscription {
  pub endpoint: String,
  pub p256dh: String,
  pub auth: String,
}

/// The platform's subscription primitive.
pub trait PushPlatform: Send {
  fn supported(&self) -> bool;
  fn permission(&self) -> Permission;
  /// Prompt the user. Only `subscribe` may trigger this.
  fn request_permission(&mut self) -> Permission;
  /// The currently active subscription, if one exists.
  fn subscription(&self) -> Option<PushSubscription>;
  fn subscribe(&mut self, application_server_key: &[u8]) -> Result<PushSubscription>;
  fn unsubscribe(&mut self) -> Result<()>;
}

/// The remote side of subscription management.
pub trait PushRegistry: Send + Sync {
  fn register(
    &self,
    subscription: &PushSubscription,
  ) -> impl std::future::Future<Output = Result<()>> + Send;

  fn remove(&self, endpoint: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl PushRegistry for crate::api::StoryClient {
  async fn register(&self, subscription: &PushSubscription) -> Result<()> {
    self
      .register_push_subscription(
        &subscription.endpoint,
        &subscription.p256dh,
        &subscription.auth,
      )
      .await
  }

  async fn remove(&self, endpoint: &str) -> Result<()> {
    self.remove_push_subscription(endpoint).await
  }
}

/// Decode a base64url-encoded applicationServerKey, tolerating padding.
pub fn decode_server_key(key: &str) -> Result<Vec<u8>> {
  URL_SAFE_NO_PAD
    .decode(key.trim_end_matches('='))
    .map_err(|e| Error::push(format!("invalid application server key: {e}")))
}

pub struct PushBridge<P: PushPlatform, R: PushRegistry> {
  platform: P,
  registry: R,
  server_key: Vec<u8>,
}

impl<P: PushPlatform, R: PushRegistry> PushBridge<P, R> {
  pub fn new(platform: P, registry: R, server_key: Vec<u8>) -> Self {
    Self {
      platform,
      registry,
      server_key,
    }
  }

  /// Report capability and permission. Never requests permission as a side
  /// effect of checking.
  pub fn check_support(&self) -> PushSupport {
    PushSupport {
      supported: self.platform.supported(),
      permission: self.platform.permission(),
    }
  }

  /// Subscribe the device and register the subscription with the remote
  /// service. Reuses an existing active subscription rather than creating
  /// a duplicate.
  pub async fn subscribe(&mut self) -> Result<PushSubscription> {
    if !self.platform.supported() {
      return Err(Error::push("push notifications are not supported"));
    }

    let permission = match self.platform.permission() {
      Permission::Default => self.platform.request_permission(),
      other => other,
    };
    if permission != Permission::Granted {
      return Err(Error::push("notification permission denied"));
    }

    let subscription = match self.platform.subscription() {
      Some(existing) => existing,
      None => self.platform.subscribe(&self.server_key)?,
    };

    self
      .registry
      .register(&subscription)
      .await
      .map_err(|e| Error::push(format!("failed to register subscription: {e}")))?;

    Ok(subscription)
  }

  /// Remove the remote registration first, then cancel the local
  /// subscription. When remote removal fails the local subscription is
  /// left intact so the server record never goes silently stale.
  pub async fn unsubscribe(&mut self) -> Result<bool> {
    let Some(subscription) = self.platform.subscription() else {
      return Ok(false);
    };

    self
      .registry
      .remove(&subscription.endpoint)
      .await
      .map_err(|e| {
        Error::push(format!(
          "failed to remove remote registration, local subscription kept: {e}"
        ))
      })?;

    self.platform.unsubscribe()?;
    Ok(true)
  }

  /// The server rotated its keys: re-subscribe with the same
  /// applicationServerKey and re-register. A failed re-registration is
  /// logged only; the device stops receiving pushes until the application
  /// explicitly re-subscribes.
  pub async fn handle_subscription_change(&mut self) {
    let key = self.server_key.clone();
    match self.platform.subscribe(&key) {
      Ok(subscription) => {
        if let Err(err) = self.registry.register(&subscription).await {
          warn!("re-registration after subscription change failed: {err}");
        }
      }
      Err(err) => warn!("re-subscribe after subscription change failed: {err}"),
    }
  }
}

/// Device-local platform for the CLI build. There is no push transport in a
/// terminal, so the subscription record lives on disk and the key material
/// is derived locally; the bridge and the server-side registration flow are
/// exercised for real.
pub struct LocalPushPlatform {
  path: std::path::PathBuf,
  permission: Permission,
}

impl LocalPushPlatform {
  pub fn new(data_dir: &std::path::Path) -> Self {
    Self {
      path: data_dir.join("push-subscription.json"),
      permission: Permission::Granted,
    }
  }

  fn read(&self) -> Option<PushSubscription> {
    let raw = std::fs::read_to_string(&self.path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    Some(PushSubscription {
      endpoint: value.get("endpoint")?.as_str()?.to_string(),
      p256dh: value.get("p256dh")?.as_str()?.to_string(),
      auth: value.get("auth")?.as_str()?.to_string(),
    })
  }
}

impl PushPlatform for LocalPushPlatform {
  fn supported(&self) -> bool {
    true
  }

  fn permission(&self) -> Permission {
    self.permission
  }

  fn request_permission(&mut self) -> Permission {
    self.permission = Permission::Granted;
    self.permission
  }

  fn subscription(&self) -> Option<PushSubscription> {
    self.read()
  }

  fn subscribe(&mut self, application_server_key: &[u8]) -> Result<PushSubscription> {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(application_server_key);
    hasher.update(self.path.as_os_str().as_encoded_bytes());
    hasher.update(chrono::Utc::now().to_rfc3339().as_bytes());
    let digest = hex::encode(hasher.finalize());

    let subscription = PushSubscription {
      endpoint: format!("https://updates.push.invalid/v1/{}", &digest[..32]),
      p256dh: URL_SAFE_NO_PAD.encode(&digest.as_bytes()[..32]),
      auth: URL_SAFE_NO_PAD.encode(&digest.as_bytes()[32..48]),
    };

    let raw = serde_json::json!({
      "endpoint": subscription.endpoint,
      "p256dh": subscription.p256dh,
      "auth": subscription.auth,
    });
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::push(format!("failed to create data directory: {e}")))?;
    }
    std::fs::write(&self.path, raw.to_string())
      .map_err(|e| Error::push(format!("failed to persist subscription: {e}")))?;

    Ok(subscription)
  }

  fn unsubscribe(&mut self) -> Result<()> {
    if self.path.exists() {
      std::fs::remove_file(&self.path)
        .map_err(|e| Error::push(format!("failed to remove subscription: {e}")))?;
    }
    Ok(())
  }
}
