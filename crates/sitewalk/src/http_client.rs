//! Async HTTP client wrapping reqwest.
//!
//! Not a browser: plain requests with a cookie jar, the configured timeout
//! and redirect policy, and an optional record/replay cache. Nothing is
//! retried; transient failures are reported to the calling flow.

use crate::cache::{CacheMode, ResponseCache};
use crate::config::BrowserConfig;
use crate::error::{BrowserError, Result};
use reqwest::cookie::{CookieStore, Jar};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }

    /// Parse a form `method` attribute; anything but POST is GET.
    pub fn from_form_attr(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("post") {
            Method::Post
        } else {
            Method::Get
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A navigation request. `url` may be relative; the browser resolves it
/// against the current page or the base URL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub method: Method,
    pub url: String,
    /// Query parameters appended to the URL.
    pub params: Vec<(String, String)>,
    /// URL-encoded form body.
    pub data: Option<Vec<(String, String)>>,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            data: Some(Vec::new()),
            ..Self::default()
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Add one form field; the request becomes a POST.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.method = Method::Post;
        self.data
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    /// Replace the form body; the request becomes a POST.
    pub fn form<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.method = Method::Post;
        self.data = Some(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl From<&str> for Request {
    fn from(url: &str) -> Self {
        Request::get(url)
    }
}

impl From<String> for Request {
    fn from(url: String) -> Self {
        Request::get(url)
    }
}

impl From<Url> for Request {
    fn from(url: Url) -> Self {
        Request::get(url.to_string())
    }
}

impl From<&Url> for Request {
    fn from(url: &Url) -> Self {
        Request::get(url.as_str())
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP client of one browser session.
pub struct HttpClient {
    client: reqwest::Client,
    jar: Arc<Jar>,
    cache: Option<ResponseCache>,
}

impl HttpClient {
    pub fn new(config: &BrowserConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.as_str())
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(|e| BrowserError::Config(format!("cannot build HTTP client: {e}")))?;

        let cache = match &config.responses_dir {
            Some(dir) => Some(ResponseCache::new(
                dir.clone(),
                config.cache_mode.unwrap_or(CacheMode::Record),
            )?),
            None => None,
        };

        Ok(Self { client, jar, cache })
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// `Cookie` header value the jar would send to `url`.
    pub fn cookies_for(&self, url: &Url) -> Option<String> {
        self.jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    /// Add every `name=value` pair of a `Cookie` header for `url`'s host.
    pub fn add_cookies(&self, url: &Url, header: &str) {
        for pair in header.split(';').map(str::trim).filter(|p| p.contains('=')) {
            self.jar.add_cookie_str(&format!("{pair}; Path=/"), url);
        }
    }

    /// Send `request` to the already resolved `url`.
    pub async fn send(&self, url: &Url, request: &Request) -> Result<HttpResponse> {
        if let Some(cache) = self.cache.as_ref().filter(|c| c.mode() == CacheMode::Replay) {
            return cache.replay(url, request);
        }

        let mut builder = match request.method {
            Method::Get => self.client.get(url.clone()),
            Method::Post => self.client.post(url.clone()),
        };
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(data) = &request.data {
            builder = builder.form(data);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let r = builder.send().await.map_err(|e| classify(url, e))?;
        let status = r.status().as_u16();
        let final_url = r.url().to_string();
        let headers: Vec<(String, String)> = r
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = r.text().await.map_err(|e| classify(url, e))?;

        let response = HttpResponse {
            url: url.to_string(),
            final_url,
            status,
            headers,
            body,
        };

        if let Some(cache) = self.cache.as_ref().filter(|c| c.mode() == CacheMode::Record) {
            if let Err(e) = cache.store(url, request, &response) {
                tracing::warn!(url = %url, "failed to record response: {e}");
            }
        }

        Ok(response)
    }
}

fn classify(url: &Url, error: reqwest::Error) -> BrowserError {
    if error.is_timeout() {
        BrowserError::Timeout {
            url: url.to_string(),
        }
    } else {
        BrowserError::Transport {
            url: url.to_string(),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let get = Request::get("/history").param("page", "2");
        assert_eq!(get.method, Method::Get);
        assert_eq!(get.params, vec![("page".to_string(), "2".to_string())]);
        assert!(get.data.is_none());

        let login = Request::get("/login").field("user", "alice").field("pass", "secret");
        assert_eq!(login.method, Method::Post);
        assert_eq!(login.data.as_ref().map(Vec::len), Some(2));

        let replaced = Request::post("/login").form([("otp", "123456")]);
        assert_eq!(
            replaced.data,
            Some(vec![("otp".to_string(), "123456".to_string())])
        );
    }

    #[test]
    fn test_method_from_form_attr() {
        assert_eq!(Method::from_form_attr("POST"), Method::Post);
        assert_eq!(Method::from_form_attr(" post "), Method::Post);
        assert_eq!(Method::from_form_attr("get"), Method::Get);
        assert_eq!(Method::from_form_attr("dialog"), Method::Get);
    }

    #[test]
    fn test_cookie_jar_round_trip() {
        let client = HttpClient::new(&BrowserConfig::default()).unwrap();
        let url = Url::parse("https://bank.test/accounts").unwrap();
        assert!(client.cookies_for(&url).is_none());

        client.add_cookies(&url, "SESSION=abc; lang=fr");
        let header = client.cookies_for(&url).unwrap();
        assert!(header.contains("SESSION=abc"));
        assert!(header.contains("lang=fr"));

        let other = Url::parse("https://other.test/").unwrap();
        assert!(client.cookies_for(&other).is_none());
    }

    #[test]
    fn test_response_header_lookup() {
        let response = HttpResponse {
            url: "https://bank.test/".into(),
            final_url: "https://bank.test/".into(),
            status: 200,
            headers: vec![("Content-Type".into(), "text/html".into())],
            body: String::new(),
        };
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.header("location"), None);
    }
}
