use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub app: AppConfig,
  pub cache: CacheConfig,
  /// App shell paths stored in the static generation at install time
  pub precache: PrecacheConfig,
  pub classifier: ClassifierConfig,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Display name used in the offline page
  pub name: String,
  /// Origin the app shell is served from; relative paths resolve against it
  pub origin: String,
  /// Client URLs under this prefix belong to the app (default: the origin)
  pub scope: Option<String>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      name: "Route 80".to_string(),
      origin: "http://localhost:8080/".to_string(),
      scope: None,
    }
  }
}

impl AppConfig {
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid app origin '{}': {}", self.origin, e))
  }

  pub fn scope_url(&self) -> Result<Url> {
    match &self.scope {
      Some(scope) => {
        Url::parse(scope).map_err(|e| eyre!("Invalid app scope '{}': {}", scope, e))
      }
      None => self.origin_url(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Naming prefix shared by every generation this worker owns
  pub prefix: String,
  pub version: String,
  /// Database location (default: $XDG_DATA_HOME/route80/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "route80".to_string(),
      version: "v1.2".to_string(),
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct PrecacheConfig {
  pub paths: Vec<String>,
}

impl Default for PrecacheConfig {
  fn default() -> Self {
    Self {
      paths: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
  /// File extensions treated as static assets (case-insensitive)
  #[serde(deserialize_with = "deserialize_lowercase_set")]
  pub static_extensions: BTreeSet<String>,
  pub manifest_filename: String,
  /// Hosts of the upstream feed provider
  #[serde(deserialize_with = "deserialize_lowercase_set")]
  pub api_hosts: BTreeSet<String>,
  /// Path segments that mark a feed request regardless of host
  pub api_path_markers: Vec<String>,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      static_extensions: ["html", "css", "js", "png", "jpg", "jpeg", "svg", "ico", "webp"]
        .into_iter()
        .map(String::from)
        .collect(),
      manifest_filename: "manifest.json".to_string(),
      api_hosts: ["metromap.cityofmadison.com".to_string()]
        .into_iter()
        .collect(),
      api_path_markers: vec!["/gtfsrt/".to_string()],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Tag of the background sync task that refreshes bus data
  pub tag: String,
  pub targets: Vec<String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    let targets = ["vehicles", "trips", "alerts"]
      .into_iter()
      .map(|feed| format!("https://metromap.cityofmadison.com/gtfsrt/{}", feed))
      .collect();

    Self {
      tag: "bus-data-sync".to_string(),
      targets,
    }
  }
}

impl SyncConfig {
  /// Parse the target list, preserving order.
  pub fn target_urls(&self) -> Result<Vec<Url>> {
    self
      .targets
      .iter()
      .map(|target| Url::parse(target).map_err(|e| eyre!("Invalid sync target '{}': {}", target, e)))
      .collect()
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub default_title: String,
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  pub view_icon: String,
  pub vibrate: Vec<u32>,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      default_title: "Route 80 Update".to_string(),
      default_body: "Your Route 80 bus is arriving soon!".to_string(),
      icon: "/icons/icon-192.png".to_string(),
      badge: "/icons/badge-72.png".to_string(),
      view_icon: "/icons/action-view.png".to_string(),
      vibrate: vec![200, 100, 200],
    }
  }
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./route80.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/route80/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
    // Check current directory
    let local = PathBuf::from("route80.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("route80").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Path of the cache database.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.path {
      return Ok(path.clone());
    }

    Ok(data_dir()?.join("cache.db"))
  }

  /// Resolve the precache manifest into absolute URLs.
  pub fn precache_urls(&self) -> Result<Vec<Url>> {
    let origin = self.app.origin_url()?;
    self
      .precache
      .paths
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map_err(|e| eyre!("Invalid precache path '{}': {}", path, e))
      })
      .collect()
  }
}

/// Per-user data directory for the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("route80"))
}
