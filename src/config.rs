use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::ManagerOptions;
use crate::db::DatabaseOptions;
use crate::store::SearchQuery;
use crate::sync::{RequestOptions, SavedSearchProvider, SyncOptions};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub github: GitHubConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
  /// Saved searches refreshed on every full pass
  #[serde(default)]
  pub searches: Vec<SearchQuery>,
  /// Repositories (`owner/name`) refreshed on every full pass
  #[serde(default)]
  pub repositories: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
  /// REST API root for GitHub Enterprise (defaults to api.github.com)
  pub api_url: Option<String>,
  #[serde(default)]
  pub accounts: Vec<AccountConfig>,
  /// Try an unauthenticated client after every account
  #[serde(default = "default_true")]
  pub anonymous_fallback: bool,
}

impl Default for GitHubConfig {
  fn default() -> Self {
    Self {
      api_url: None,
      accounts: Vec::new(),
      anonymous_fallback: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
  pub label: String,
  /// Environment variable holding this account's token
  pub token_env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Defaults to the platform data directory
  pub folder: Option<PathBuf>,
  pub file_name: String,
  pub periodic_interval_secs: u64,
  pub periodic_tick_secs: u64,
  pub update_threshold_secs: u64,
  pub prune_grace_secs: u64,
  pub search_retention_days: u64,
  pub page_size: u32,
  pub max_pages: u32,
  pub first_fetch_timeout_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      folder: None,
      file_name: "cache.db".to_string(),
      periodic_interval_secs: 30 * 60,
      periodic_tick_secs: 60,
      update_threshold_secs: 4 * 60 * 60,
      prune_grace_secs: 5 * 60,
      search_retention_days: 7,
      page_size: 50,
      max_pages: 2,
      first_fetch_timeout_secs: 60,
    }
  }
}

fn default_true() -> bool {
  true
}

/// Durations beyond a century are clamped.
const MAX_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn seconds(secs: u64) -> chrono::Duration {
  chrono::Duration::seconds(secs.min(MAX_SECS) as i64)
}

impl CacheConfig {
  /// Folder holding the database and the log file.
  pub fn data_folder(&self) -> PathBuf {
    self.folder.clone().unwrap_or_else(|| {
      dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("octocache")
    })
  }

  pub fn database_options(&self) -> DatabaseOptions {
    DatabaseOptions {
      folder: self.data_folder(),
      file_name: self.file_name.clone(),
    }
  }

  pub fn request_options(&self) -> RequestOptions {
    RequestOptions {
      page_size: self.page_size,
      max_pages: self.max_pages,
    }
  }

  pub fn sync_options(&self) -> SyncOptions {
    SyncOptions {
      request: self.request_options(),
      update_threshold: seconds(self.update_threshold_secs),
      prune_grace: seconds(self.prune_grace_secs),
      search_retention: seconds(self.search_retention_days.saturating_mul(24 * 60 * 60)),
    }
  }

  pub fn manager_options(&self) -> ManagerOptions {
    ManagerOptions {
      periodic_interval: seconds(self.periodic_interval_secs),
      periodic_tick: std::time::Duration::from_secs(self.periodic_tick_secs.max(1)),
    }
  }

  pub fn first_fetch_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.first_fetch_timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
  /// Defaults to the cache data folder
  pub directory: Option<PathBuf>,
  /// `tracing` filter directive, e.g. "octocache=debug"
  pub filter: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./octocache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/octocache/config.yaml
  ///
  /// Without a file every setting takes its default.
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
    let local = PathBuf::from("octocache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("octocache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Get the GitHub API token from environment variables.
  ///
  /// Checks OCTOCACHE_GITHUB_TOKEN first, then GITHUB_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("OCTOCACHE_GITHUB_TOKEN")
      .or_else(|_| std::env::var("GITHUB_TOKEN"))
      .map_err(|_| {
        eyre!("GitHub token not found. Set OCTOCACHE_GITHUB_TOKEN or GITHUB_TOKEN environment variable.")
      })
  }
}

impl SavedSearchProvider for Config {
  fn searches(&self) -> Vec<SearchQuery> {
    self.searches.clone()
  }

  fn repositories(&self) -> Vec<String> {
    self.repositories.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::SearchKind;

  #[test]
  fn empty_file_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert!(config.github.anonymous_fallback);
    assert_eq!(config.cache.file_name, "cache.db");
    assert_eq!(config.cache.request_options(), RequestOptions::default());
    assert!(config.searches.is_empty());
  }

  #[test]
  fn parses_accounts_searches_and_cache_settings() {
    let config = Config::parse(
      r#"
github:
  api_url: https://github.example.com/api/v3
  anonymous_fallback: false
  accounts:
    - label: work
      token_env: WORK_GITHUB_TOKEN
cache:
  page_size: 10
  prune_grace_secs: 0
searches:
  - name: My bugs
    query: is:issue label:bug assignee:@me
  - name: Reviews
    query: is:pr review-requested:@me
    kind: pull_requests
repositories:
  - octokit/octokit.net
"#,
    )
    .unwrap();

    assert!(!config.github.anonymous_fallback);
    assert_eq!(config.github.accounts[0].token_env, "WORK_GITHUB_TOKEN");
    assert_eq!(config.cache.page_size, 10);
    assert_eq!(config.cache.max_pages, 2);
    assert_eq!(config.cache.sync_options().prune_grace, chrono::Duration::zero());

    let searches = config.searches();
    assert_eq!(searches[0].kind, SearchKind::Unknown);
    assert_eq!(searches[0].effective_kind(), SearchKind::Issues);
    assert_eq!(searches[1].kind, SearchKind::PullRequests);
    assert_eq!(config.repositories(), vec!["octokit/octokit.net"]);
  }

  #[test]
  fn explicit_missing_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    assert!(Config::load(Some(&missing)).is_err());
  }

  #[test]
  fn loads_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("octocache.yaml");
    std::fs::write(&path, "repositories: [rust-lang/rust]\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.repositories, vec!["rust-lang/rust"]);
  }
}
