//! On-disk response cache.
//!
//! In [`CacheMode::Record`] every response received by the client is written
//! to `<dir>/<key>.json`. In [`CacheMode::Replay`] no network request is made:
//! responses come from the directory, and a missing entry is a
//! [`BrowserError::CacheMiss`]. Keys hash the method, the absolute URL, the
//! query parameters and the form body, so a recorded session replays
//! identically as long as the flow issues the same requests.

use crate::error::{BrowserError, Result};
use crate::http_client::{HttpResponse, Request};
use chrono::{DateTime, Utc};
use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Record,
    Replay,
}

/// One cache file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    method: String,
    url: String,
    recorded_at: DateTime<Utc>,
    response: HttpResponse,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    mode: CacheMode,
}

impl ResponseCache {
    /// Open a cache directory. Record mode creates it when missing.
    pub fn new(dir: impl Into<PathBuf>, mode: CacheMode) -> Result<Self> {
        let dir = dir.into();
        if mode == CacheMode::Record {
            fs::create_dir_all(&dir)?;
        }
        tracing::debug!(dir = %dir.display(), ?mode, "response cache opened");
        Ok(Self { dir, mode })
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable cache key for a request sent to `url`.
    pub fn key(url: &Url, request: &Request) -> String {
        let mut hasher = FnvHasher::default();
        hasher.write(request.method.as_str().as_bytes());
        hasher.write_u8(0);
        hasher.write(url.as_str().as_bytes());
        for (name, value) in &request.params {
            hasher.write_u8(b'?');
            hasher.write(name.as_bytes());
            hasher.write_u8(b'=');
            hasher.write(value.as_bytes());
        }
        if let Some(data) = &request.data {
            for (name, value) in data {
                hasher.write_u8(b'&');
                hasher.write(name.as_bytes());
                hasher.write_u8(b'=');
                hasher.write(value.as_bytes());
            }
        }
        format!("{:016x}", hasher.finish())
    }

    fn path_for(&self, url: &Url, request: &Request) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key(url, request)))
    }

    /// Recorded response for this request, if any.
    pub fn lookup(&self, url: &Url, request: &Request) -> Result<Option<HttpResponse>> {
        let path = self.path_for(url, request);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let cached: CachedResponse = serde_json::from_str(&raw)?;
        tracing::debug!(url = %url, recorded_at = %cached.recorded_at, "replaying cached response");
        Ok(Some(cached.response))
    }

    /// Like [`lookup`](Self::lookup), but a missing entry is an error.
    pub fn replay(&self, url: &Url, request: &Request) -> Result<HttpResponse> {
        self.lookup(url, request)?
            .ok_or_else(|| BrowserError::CacheMiss {
                method: request.method.to_string(),
                url: url.to_string(),
            })
    }

    pub fn store(&self, url: &Url, request: &Request, response: &HttpResponse) -> Result<PathBuf> {
        let path = self.path_for(url, request);
        let cached = CachedResponse {
            method: request.method.to_string(),
            url: url.to_string(),
            recorded_at: Utc::now(),
            response: response.clone(),
        };
        fs::write(&path, serde_json::to_string_pretty(&cached)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> HttpResponse {
        HttpResponse {
            url: "https://bank.test/accounts".into(),
            final_url: "https://bank.test/accounts".into(),
            status: 200,
            headers: vec![("content-type".into(), "text/html".into())],
            body: body.into(),
        }
    }

    #[test]
    fn test_key_depends_on_method_params_and_body() {
        let url = Url::parse("https://bank.test/search").unwrap();
        let get = Request::get("/search").param("q", "loyer");
        let other = Request::get("/search").param("q", "cb");
        let post = Request::post("/search").field("q", "loyer");

        assert_eq!(ResponseCache::key(&url, &get), ResponseCache::key(&url, &get.clone()));
        assert_ne!(ResponseCache::key(&url, &get), ResponseCache::key(&url, &other));
        assert_ne!(ResponseCache::key(&url, &get), ResponseCache::key(&url, &post));
        assert_eq!(ResponseCache::key(&url, &get).len(), 16);
    }

    #[test]
    fn test_store_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ResponseCache::new(dir.path().join("rec"), CacheMode::Record).unwrap();
        let url = Url::parse("https://bank.test/accounts").unwrap();
        let request = Request::get("/accounts");

        let path = recorder.store(&url, &request, &response("<p>ok</p>")).unwrap();
        assert!(path.exists());

        let replayer = ResponseCache::new(dir.path().join("rec"), CacheMode::Replay).unwrap();
        let replayed = replayer.replay(&url, &request).unwrap();
        assert_eq!(replayed.body, "<p>ok</p>");
        assert_eq!(replayed.status, 200);
    }

    #[test]
    fn test_replay_miss_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), CacheMode::Replay).unwrap();
        let url = Url::parse("https://bank.test/nowhere").unwrap();

        assert!(cache.lookup(&url, &Request::get("/nowhere")).unwrap().is_none());
        assert!(matches!(
            cache.replay(&url, &Request::get("/nowhere")),
            Err(BrowserError::CacheMiss { .. })
        ));
    }
}
