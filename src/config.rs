use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::net::{CacheNames, ImageCacheLimits, RouteContext, ShellManifest};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub push: PushConfig,
  #[serde(default)]
  pub shell: ShellConfig,
  /// Override for the data directory (store, cache, session).
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Bound on remote calls so the offline fallback triggers in bounded time.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache namespace version; bumping it retires the previous build's
  /// namespaces on activation.
  #[serde(default = "default_cache_version")]
  pub version: String,
  #[serde(default = "default_image_max_entries")]
  pub image_max_entries: usize,
  #[serde(default = "default_image_max_age_days")]
  pub image_max_age_days: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_cache_version(),
      image_max_entries: default_image_max_entries(),
      image_max_age_days: default_image_max_age_days(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
  /// base64url applicationServerKey used for subscriptions.
  #[serde(default = "default_server_key")]
  pub server_key: String,
}

impl Default for PushConfig {
  fn default() -> Self {
    Self {
      server_key: default_server_key(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellConfig {
  /// Shell assets that must cache for install to succeed.
  #[serde(default)]
  pub required: Vec<String>,
  /// Shell assets whose failure does not block install.
  #[serde(default)]
  pub optional: Vec<String>,
  /// Page served when a navigation fails offline. Defaults to the first
  /// required asset.
  pub offline_page: Option<String>,
}

fn default_base_url() -> String {
  "https://story-api.dicoding.dev/v1/".to_string()
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_cache_version() -> String {
  "v1".to_string()
}

fn default_image_max_entries() -> usize {
  100
}

fn default_image_max_age_days() -> i64 {
  30
}

fn default_server_key() -> String {
  crate::push::DEFAULT_SERVER_KEY.to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storyshare.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storyshare/config.yaml
  ///
  /// With no file anywhere, built-in defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("storyshare.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storyshare").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Directory holding the store, the response cache, and the session file.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|p| p.join("storyshare"))
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", self.api.base_url, e))
  }

  pub fn remote_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.api.timeout_secs)
  }

  pub fn cache_names(&self) -> CacheNames {
    CacheNames::versioned(&self.cache.version)
  }

  pub fn image_limits(&self) -> ImageCacheLimits {
    ImageCacheLimits {
      max_entries: self.cache.image_max_entries,
      max_age: chrono::Duration::days(self.cache.image_max_age_days),
    }
  }

  pub fn shell_manifest(&self) -> ShellManifest {
    ShellManifest {
      required: self.shell.required.clone(),
      optional: self.shell.optional.clone(),
    }
  }

  pub fn route_context(&self) -> Result<RouteContext> {
    let mut shell_urls = self.shell.required.clone();
    shell_urls.extend(self.shell.optional.iter().cloned());
    let offline_page = self
      .shell
      .offline_page
      .clone()
      .or_else(|| self.shell.required.first().cloned())
      .unwrap_or_default();
    Ok(RouteContext {
      api_base: self.base_url()?,
      shell_urls,
      offline_page,
    })
  }
}
