//! Saved browser sessions.
//!
//! A [`SessionState`] is what a flow persists between runs so that the next
//! run can skip the login: cookies per origin, the last location and free
//! form values of the site module.

use crate::config::sitewalk_home;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Cookies the jar sends to one URL, as a `Cookie` header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSnapshot {
    pub url: String,
    pub header: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub saved_at: DateTime<Utc>,
    /// Current page URL at save time.
    pub url: Option<String>,
    #[serde(default)]
    pub cookies: Vec<CookieSnapshot>,
    /// Site-specific values (tokens, selected account...).
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SessionState {
    pub fn new(url: Option<String>) -> Self {
        Self {
            saved_at: Utc::now(),
            url,
            cookies: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Older than `max_age` at `now`. A state saved in the future (clock
    /// skew) is not expired.
    pub fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.saved_at) > max_age
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.saved_at)
    }
}

/// JSON file holding one site's saved state.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.sitewalk/state/<site>.json`.
    pub fn default_for(site: &str) -> Self {
        Self::new(sitewalk_home().join("state").join(format!("{site}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved state, or `None` when nothing was saved yet.
    pub fn load(&self) -> Result<Option<SessionState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn save(&self, state: &SessionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(state)?)?;
        tracing::debug!(path = %self.path.display(), "session state saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
