use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::cache::CacheVersion;
use crate::db::Database;

/// Deployment subpath used when the app is not served from a local host.
const DEPLOYED_BASE_PATH: &str = "/asistencias";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the app shell is served from
  pub origin: String,
  pub base_path: BasePath,
  /// Remote endpoint receiving attendance submissions
  pub webhook_url: String,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub network: NetworkConfig,
  pub lifecycle: LifecycleConfig,
  /// SQLite database path (defaults to $XDG_DATA_HOME/asistencia/worker.db)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BasePath {
  /// Empty on localhost, the deployment subpath elsewhere
  #[default]
  Auto,
  Explicit(String),
}

impl<'de> Deserialize<'de> for BasePath {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let s = String::deserialize(deserializer)?;
    if s.eq_ignore_ascii_case("auto") {
      Ok(BasePath::Auto)
    } else {
      Ok(BasePath::Explicit(s.trim_end_matches('/').to_string()))
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Tier name prefix
  pub prefix: String,
  /// Deployment version embedded in tier names; bump to roll the cache
  pub version: String,
  /// App shell paths relative to the base path
  pub static_assets: Vec<String>,
  /// Page served to HTML requests when offline
  pub offline_page: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Background sync tag that triggers a queue drain
  pub tag: String,
  /// Drop a queued submission after this many failed deliveries (unlimited if unset)
  pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
  /// Activate a freshly installed version without waiting for open pages
  pub skip_waiting_on_install: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "https://ludwringliccien.dev".to_string(),
      base_path: BasePath::Auto,
      webhook_url: "https://n8n.ludwringliccien.dev/webhook/asistencias".to_string(),
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
      network: NetworkConfig::default(),
      lifecycle: LifecycleConfig::default(),
      database: None,
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "asistencia".to_string(),
      version: "v1.0.0".to_string(),
      static_assets: [
        "./",
        "./index.html",
        "./offline.html",
        "./manifest.json",
        "./styles.css",
        "./app.js",
        "./config.js",
        "./icons/icon-192x192.png",
        "./icons/icon-512x512.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      offline_page: "./offline.html".to_string(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "background-sync".to_string(),
      max_attempts: None,
    }
  }
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self {
      skip_waiting_on_install: true,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./asistencia.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/asistencia/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        info!("No configuration file found, using defaults");
        Self::default()
      }
    };

    if let Ok(url) = std::env::var("ASISTENCIA_WEBHOOK_URL") {
      config.webhook_url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("asistencia.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("asistencia").join("config.yaml");
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

  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  pub fn webhook_url(&self) -> Result<Url> {
    Url::parse(&self.webhook_url)
      .map_err(|e| eyre!("Invalid webhook URL '{}': {}", self.webhook_url, e))
  }

  /// Whether the origin points at a development machine.
  pub fn is_local(&self) -> bool {
    let host = Url::parse(&self.origin)
      .ok()
      .and_then(|url| url.host_str().map(String::from))
      .unwrap_or_default();
    matches!(host.as_str(), "" | "localhost" | "127.0.0.1")
  }

  /// Path prefix every asset lives under, without a trailing slash.
  pub fn base_path(&self) -> String {
    match &self.base_path {
      BasePath::Explicit(path) => path.clone(),
      BasePath::Auto if self.is_local() => String::new(),
      BasePath::Auto => DEPLOYED_BASE_PATH.to_string(),
    }
  }

  /// Root document URL of the app; relative asset paths resolve against it.
  pub fn app_root(&self) -> Result<Url> {
    self
      .origin()?
      .join(&format!("{}/", self.base_path()))
      .map_err(|e| eyre!("Invalid base path '{}': {}", self.base_path(), e))
  }

  /// Resolve an app-relative path such as "./styles.css".
  pub fn resolve_asset(&self, asset: &str) -> Result<Url> {
    let root = self.app_root()?;
    let relative = asset.trim_start_matches("./").trim_start_matches('/');
    root
      .join(relative)
      .map_err(|e| eyre!("Invalid asset path '{}': {}", asset, e))
  }

  /// The Static Asset Set resolved to absolute URLs.
  pub fn static_asset_urls(&self) -> Result<Vec<Url>> {
    self
      .cache
      .static_assets
      .iter()
      .map(|asset| self.resolve_asset(asset))
      .collect()
  }

  pub fn cache_version(&self) -> CacheVersion {
    CacheVersion::new(self.cache.prefix.clone(), self.cache.version.clone())
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.network.timeout_secs)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Database::default_path(),
    }
  }

  /// Directory for the rolling log file.
  pub fn log_dir() -> PathBuf {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .unwrap_or_else(std::env::temp_dir)
      .join("asistencia")
      .join("logs")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn with_origin(origin: &str) -> Config {
    Config {
      origin: origin.to_string(),
      ..Config::default()
    }
  }

  #[test]
  fn test_auto_base_path_is_empty_on_localhost() {
    assert_eq!(with_origin("http://localhost:8080").base_path(), "");
    assert_eq!(with_origin("http://127.0.0.1:5500").base_path(), "");
    assert_eq!(with_origin("https://example.github.io").base_path(), "/asistencias");
  }

  #[test]
  fn test_resolve_asset_under_base_path() {
    let config = with_origin("https://example.github.io");
    assert_eq!(
      config.resolve_asset("./").unwrap().as_str(),
      "https://example.github.io/asistencias/"
    );
    assert_eq!(
      config.resolve_asset("./icons/icon-192x192.png").unwrap().as_str(),
      "https://example.github.io/asistencias/icons/icon-192x192.png"
    );
  }

  #[test]
  fn test_resolve_asset_at_root_locally() {
    let config = with_origin("http://localhost:8080");
    assert_eq!(
      config.resolve_asset("./styles.css").unwrap().as_str(),
      "http://localhost:8080/styles.css"
    );
  }

  #[test]
  fn test_load_from_yaml_fills_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "origin: https://app.test\nbase_path: /pwa/\ncache:\n  version: v2\nsync:\n  max_attempts: 5"
    )
    .unwrap();

    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.base_path(), "/pwa");
    assert_eq!(config.cache.version, "v2");
    assert_eq!(config.cache.prefix, "asistencia");
    assert_eq!(config.sync.max_attempts, Some(5));
    assert_eq!(config.sync.tag, "background-sync");
    assert_eq!(config.cache_version().tier_names().static_tier, "asistencia-static-v2");
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/asistencia.yaml"))).is_err());
  }
}
