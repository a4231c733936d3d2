//! Configuration loading and resolution.

use crate::cache::CacheMode;
use crate::error::{BrowserError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/131.0.0.0 Safari/537.36";

/// Settings of one [`Browser`](crate::Browser).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Root of the site; relative routes and requests are resolved against it.
    pub base_url: Option<String>,
    pub timeout_ms: u64,
    pub max_redirects: usize,
    pub user_agent: String,
    /// Follow-up navigations one load hook chain may request.
    pub max_chained_loads: usize,
    /// Visited URLs kept in the navigation history.
    pub history_size: usize,
    /// Saved session states older than this are discarded. `None` keeps them.
    pub state_duration_minutes: Option<i64>,
    /// Response cache directory; enables recording or replay.
    pub responses_dir: Option<PathBuf>,
    /// Defaults to recording when only `responses_dir` is set.
    pub cache_mode: Option<CacheMode>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 30_000,
            max_redirects: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_chained_loads: 5,
            history_size: 50,
            state_duration_minutes: None,
            responses_dir: None,
            cache_mode: None,
        }
    }
}

impl BrowserConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            BrowserError::Config(format!("{}: {e}", path.display()))
        })
    }

    /// Resolve the config file (see [`resolve_config_path`]), read it when it
    /// exists, then apply environment overrides.
    pub fn load(explicit: Option<&str>) -> Result<Self> {
        let path = resolve_config_path(explicit);
        let mut config = if path.exists() {
            tracing::debug!(path = %path.display(), "loading config");
            Self::from_file(&path)?
        } else if explicit.is_some() {
            return Err(BrowserError::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// `SITEWALK_BASE_URL`, `SITEWALK_RESPONSES_DIR`, `SITEWALK_TIMEOUT_MS`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(base_url) = lookup("SITEWALK_BASE_URL") {
            self.base_url = Some(base_url);
        }
        if let Some(dir) = lookup("SITEWALK_RESPONSES_DIR") {
            self.responses_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup("SITEWALK_TIMEOUT_MS") {
            self.timeout_ms = raw.trim().parse().map_err(|_| {
                BrowserError::Config(format!("SITEWALK_TIMEOUT_MS is not a number: {raw:?}"))
            })?;
        }
        Ok(())
    }

    pub fn state_duration(&self) -> Option<chrono::Duration> {
        self.state_duration_minutes.map(chrono::Duration::minutes)
    }
}

/// Config file location: explicit path, then `SITEWALK_CONFIG`, then
/// `./sitewalk.json`, then `~/.sitewalk/config.json`.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var("SITEWALK_CONFIG") {
        return PathBuf::from(env_path);
    }

    let cwd_config = PathBuf::from("sitewalk.json");
    if cwd_config.exists() {
        return cwd_config;
    }

    sitewalk_home().join("config.json")
}

/// `~/.sitewalk`, or `./.sitewalk` when no home directory is known.
pub fn sitewalk_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sitewalk")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = BrowserConfig::default();
        assert_eq!(config.max_chained_loads, 5);
        assert_eq!(config.timeout_ms, 30_000);
        assert!(config.base_url.is_none());
        assert!(config.state_duration().is_none());
    }

    #[test]
    fn test_from_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sitewalk.json");
        std::fs::write(
            &path,
            r#"{"base_url": "https://bank.test", "state_duration_minutes": 15, "cache_mode": "replay"}"#,
        )
        .unwrap();

        let config = BrowserConfig::from_file(&path).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://bank.test"));
        assert_eq!(config.state_duration(), Some(chrono::Duration::minutes(15)));
        assert_eq!(config.cache_mode, Some(CacheMode::Replay));
        assert_eq!(config.history_size, 50);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            BrowserConfig::from_file(&path),
            Err(BrowserError::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SITEWALK_BASE_URL", "https://other.test"),
            ("SITEWALK_RESPONSES_DIR", "/tmp/responses"),
            ("SITEWALK_TIMEOUT_MS", "1500"),
        ]
        .into_iter()
        .collect();

        let mut config = BrowserConfig::new("https://bank.test");
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://other.test"));
        assert_eq!(config.responses_dir, Some(PathBuf::from("/tmp/responses")));
        assert_eq!(config.timeout_ms, 1500);

        let err = config
            .apply_overrides(|k| (k == "SITEWALK_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, BrowserError::Config(_)));
    }

    #[test]
    fn test_explicit_path_wins() {
        assert_eq!(
            resolve_config_path(Some("/etc/sitewalk.json")),
            PathBuf::from("/etc/sitewalk.json")
        );
        assert!(matches!(
            BrowserConfig::load(Some("/nonexistent/sitewalk.json")),
            Err(BrowserError::Config(_))
        ));
    }
}
