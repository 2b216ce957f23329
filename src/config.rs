use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_poll_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  /// Owner identifier the services are scoped to (the logged-in user).
  pub owner_id: String,
  /// How often subscriptions poll the remote store, in seconds.
  #[serde(default = "default_poll_secs")]
  pub poll_interval_secs: u64,
  /// Override for the cache database path (defaults to the platform data
  /// directory).
  pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  pub base_url: String,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./centime.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/centime/config.yaml
  /// 4. ~/.config/centime/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/centime/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("centime.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("centime").join("config.yaml");
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

  /// API token for the remote store, from the CENTIME_API_TOKEN
  /// environment variable. None means unauthenticated (dev servers).
  pub fn api_token() -> Option<String> {
    std::env::var("CENTIME_API_TOKEN").ok()
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs.max(1))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_minimal_config() {
    let config: Config = serde_yaml::from_str(
      r#"
remote:
  base_url: https://api.example.com
owner_id: u1
"#,
    )
    .unwrap();

    assert_eq!(config.remote.base_url, "https://api.example.com");
    assert_eq!(config.owner_id, "u1");
    assert_eq!(config.poll_interval_secs, 30);
    assert!(config.cache_path.is_none());
  }

  #[test]
  fn poll_interval_has_a_floor() {
    let config: Config = serde_yaml::from_str(
      r#"
remote:
  base_url: https://api.example.com
owner_id: u1
poll_interval_secs: 0
"#,
    )
    .unwrap();

    assert_eq!(config.poll_interval(), Duration::from_secs(1));
  }
}
