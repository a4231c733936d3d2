//! The browser engine: navigation, routing, page lifecycle, login gate.

use crate::config::BrowserConfig;
use crate::elements::ElementMapper;
use crate::error::{BrowserError, Result};
use crate::filters::Env;
use crate::form::Form;
use crate::http_client::{HttpClient, HttpResponse, Request};
use crate::page::{OnLoad, Page, PageKind};
use crate::pagination::{NextPage, Paginator};
use crate::router::{Route, Router};
use crate::state::{CookieSnapshot, SessionState};
use async_trait::async_trait;
use chrono::Utc;
use scraper::Html;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use url::Url;

/// Site login procedure, run by [`Browser::need_login`].
///
/// Implementations navigate with the browser they are given (fill the login
/// form, answer a second factor...) and report refused credentials with
/// [`BrowserError::IncorrectPassword`] or [`BrowserError::Banned`].
#[async_trait]
pub trait Authenticator<K: PageKind>: Send + Sync {
    async fn login(&self, browser: &mut Browser<K>) -> Result<()>;
}

/// One scripted session on one site.
///
/// Navigation methods take `&mut self`: a browser performs one request at a
/// time and every navigation completes (response read, page routed, load hook
/// run) before the call returns.
pub struct Browser<K: PageKind> {
    config: BrowserConfig,
    base_url: Url,
    client: HttpClient,
    router: Router<K>,
    page: Option<Page<K>>,
    history: VecDeque<Url>,
    logged_in: bool,
    authenticator: Option<Arc<dyn Authenticator<K>>>,
    requests: usize,
}

impl<K: PageKind> Browser<K> {
    pub fn new(router: Router<K>, config: BrowserConfig) -> Result<Self> {
        let raw = config
            .base_url
            .clone()
            .ok_or_else(|| BrowserError::Config("base_url is required".to_string()))?;
        let base_url = Url::parse(&raw).map_err(|e| BrowserError::InvalidUrl { url: raw, source: e })?;
        let client = HttpClient::new(&config)?;

        Ok(Self {
            config,
            base_url,
            client,
            router,
            page: None,
            history: VecDeque::new(),
            logged_in: false,
            authenticator: None,
            requests: 0,
        })
    }

    pub fn with_authenticator(mut self, authenticator: impl Authenticator<K> + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn set_authenticator(&mut self, authenticator: Arc<dyn Authenticator<K>>) {
        self.authenticator = Some(authenticator);
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn router(&self) -> &Router<K> {
        &self.router
    }

    pub fn page(&self) -> Option<&Page<K>> {
        self.page.as_ref()
    }

    /// The current page, or [`BrowserError::NoPage`] before the first navigation.
    pub fn current_page(&self) -> Result<&Page<K>> {
        self.page.as_ref().ok_or(BrowserError::NoPage)
    }

    /// URLs of installed pages, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Url> {
        self.history.iter()
    }

    /// HTTP requests sent since creation (replayed ones included).
    pub fn request_count(&self) -> usize {
        self.requests
    }

    /// Resolve a possibly relative URL against the current page, or the base
    /// URL before the first navigation.
    pub fn absolute_url(&self, raw: &str) -> Result<Url> {
        let from = self.page.as_ref().map(|p| p.url()).unwrap_or(&self.base_url);
        join(from, raw)
    }

    // ── Navigation ───────────────────────────────────────────────────────────

    /// Navigate and install the resulting page as current.
    pub async fn location(&mut self, request: impl Into<Request>) -> Result<&Page<K>> {
        let page = self.load(request.into()).await?;
        self.remember(page.url().clone());
        Ok(&*self.page.insert(page))
    }

    /// Navigate without replacing the current page.
    pub async fn open(&mut self, request: impl Into<Request>) -> Result<Page<K>> {
        self.load(request.into()).await
    }

    /// Navigate to the URL `route` renders with `params`.
    pub async fn go(&mut self, route: Route, params: &[(&str, &str)]) -> Result<&Page<K>> {
        let url = self.router.build(route, &self.base_url, params)?;
        self.location(url).await
    }

    /// Stay on the current page when it already is `route` with `params`,
    /// otherwise [`go`](Self::go) there.
    pub async fn stay_or_go(&mut self, route: Route, params: &[(&str, &str)]) -> Result<&Page<K>> {
        if self.is_here_with(route, params) {
            tracing::debug!(?route, "already there");
            return self.current_page();
        }
        self.go(route, params).await
    }

    /// The current page was built for `route`'s variant and its URL matches
    /// one of `route`'s patterns.
    pub fn is_here(&self, route: Route) -> bool {
        self.here_params(route).is_some()
    }

    /// Like [`is_here`](Self::is_here), with every given parameter equal to
    /// the one captured from the current URL.
    pub fn is_here_with(&self, route: Route, params: &[(&str, &str)]) -> bool {
        self.here_params(route).is_some_and(|captured| {
            params
                .iter()
                .all(|(k, v)| captured.get(*k).map(String::as_str) == Some(*v))
        })
    }

    fn here_params(&self, route: Route) -> Option<std::collections::HashMap<String, String>> {
        let page = self.page.as_ref()?;
        if self.router.kind(route) != Some(page.kind()) {
            return None;
        }
        self.router.route_params(route, &self.base_url, page.url())
    }

    pub async fn submit(&mut self, form: &Form) -> Result<&Page<K>> {
        self.location(form.request()).await
    }

    /// Lazily iterate a mapper over the current page and the pages `next`
    /// leads to.
    pub fn paginate<'b, M, N>(&'b mut self, mapper: &'b M, next: N, env: &'b Env) -> Paginator<'b, K, M, N>
    where
        M: ElementMapper,
        N: NextPage<K>,
    {
        Paginator::new(self, mapper, next, env)
    }

    async fn fetch(&mut self, url: &Url, request: &Request) -> Result<HttpResponse> {
        self.requests += 1;
        tracing::debug!(method = %request.method, url = %url, "request");
        self.client.send(url, request).await
    }

    async fn load(&mut self, request: Request) -> Result<Page<K>> {
        let start = self.absolute_url(&request.url)?;
        let mut url = start.clone();
        let mut request = request;
        let mut follows = 0usize;

        loop {
            let response = self.fetch(&url, &request).await?;
            let (page, action) = {
                let doc = Html::parse_document(&response.body);
                let page = self.router.build_page(&self.base_url, &response, &doc)?;
                let action = page.kind().on_load(&page, &doc)?;
                (page, action)
            };
            tracing::debug!(page = ?page.kind(), status = page.status(), url = %page.url(), "page loaded");

            match action {
                OnLoad::Done => return Ok(page),
                OnLoad::Logout => {
                    tracing::info!(page = %page.identity(), "session ended by the site");
                    self.logged_in = false;
                    return Ok(page);
                }
                OnLoad::Follow(next) => {
                    follows += 1;
                    if follows > self.config.max_chained_loads {
                        return Err(BrowserError::LoadChainTooLong {
                            url: start.to_string(),
                            limit: self.config.max_chained_loads,
                        });
                    }
                    url = join(page.url(), &next.url)?;
                    request = next;
                }
            }
        }
    }

    fn remember(&mut self, url: Url) {
        if self.config.history_size == 0 {
            return;
        }
        while self.history.len() >= self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(url);
    }

    // ── Authentication ───────────────────────────────────────────────────────

    pub fn is_logged_in(&self) -> bool {
        self.logged_in || self.page.as_ref().is_some_and(|p| p.kind().is_logged())
    }

    /// Mark the session as authenticated, for flows that log in by hand.
    pub fn set_logged_in(&mut self, logged_in: bool) {
        self.logged_in = logged_in;
    }

    /// Run the authenticator unless the session is already logged in.
    pub async fn need_login(&mut self) -> Result<()> {
        if self.is_logged_in() {
            return Ok(());
        }
        let authenticator = self
            .authenticator
            .clone()
            .ok_or_else(|| BrowserError::Config("login required but no authenticator installed".to_string()))?;

        tracing::info!(site = %self.base_url, "logging in");
        authenticator.login(self).await?;
        self.logged_in = true;
        tracing::info!(site = %self.base_url, "logged in");
        Ok(())
    }

    /// Drop cookies, current page and login flag.
    pub fn logout(&mut self) -> Result<()> {
        self.client = HttpClient::new(&self.config)?;
        self.page = None;
        self.logged_in = false;
        tracing::info!(site = %self.base_url, "logged out");
        Ok(())
    }

    // ── Cookies ──────────────────────────────────────────────────────────────

    /// `Cookie` header this browser would send to `url`.
    pub fn cookies_for(&self, url: &str) -> Result<Option<String>> {
        Ok(self.client.cookies_for(&self.absolute_url(url)?))
    }

    pub fn add_cookies(&self, url: &str, header: &str) -> Result<()> {
        self.client.add_cookies(&self.absolute_url(url)?, header);
        Ok(())
    }

    /// Copy the cookies `other` sends to `from_url` into this browser's jar
    /// for `to_url`. Returns whether there was anything to copy.
    pub fn share_cookies<O: PageKind>(&self, other: &Browser<O>, from_url: &str, to_url: &str) -> Result<bool> {
        match other.cookies_for(from_url)? {
            Some(header) => {
                self.add_cookies(to_url, &header)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ── Session state ────────────────────────────────────────────────────────

    /// Snapshot the cookies sent to every URL visited, plus the current
    /// location.
    ///
    /// The jar is queried for each origin root and for each visited path, so
    /// cookies scoped to a sub-path are kept. A cookie is recorded once per
    /// origin, under the shortest URL it was seen on.
    pub fn dump_state(&self) -> SessionState {
        let mut state = SessionState::new(self.page.as_ref().map(|p| p.url().to_string()));

        let urls: BTreeSet<String> = std::iter::once(&self.base_url)
            .chain(self.history.iter())
            .flat_map(|u| {
                let mut path = u.clone();
                path.set_query(None);
                path.set_fragment(None);
                [u.join("/").ok(), Some(path)]
            })
            .flatten()
            .map(|u| u.to_string())
            .collect();

        let mut seen: HashSet<(String, String)> = HashSet::new();
        for raw in urls {
            let Ok(url) = Url::parse(&raw) else { continue };
            let Some(header) = self.client.cookies_for(&url) else { continue };
            let origin = url.origin().ascii_serialization();
            let fresh: Vec<&str> = header
                .split(';')
                .map(str::trim)
                .filter(|pair| !pair.is_empty())
                .filter(|pair| seen.insert((origin.clone(), pair.to_string())))
                .collect();
            if !fresh.is_empty() {
                state.cookies.push(CookieSnapshot {
                    url: raw,
                    header: fresh.join("; "),
                });
            }
        }
        state
    }

    /// Restore a saved session. Returns `false` when the state is older than
    /// the configured state duration and was discarded.
    ///
    /// Failing to reopen the saved location is logged and ignored unless the
    /// site refused the credentials.
    pub async fn load_state(&mut self, state: &SessionState) -> Result<bool> {
        if let Some(max_age) = self.config.state_duration() {
            if state.is_expired(max_age, Utc::now()) {
                tracing::info!(saved_at = %state.saved_at, "discarding expired session state");
                return Ok(false);
            }
        }

        for snapshot in &state.cookies {
            match Url::parse(&snapshot.url) {
                Ok(url) => self.client.add_cookies(&url, &snapshot.header),
                Err(e) => tracing::warn!(url = %snapshot.url, "skipping cookies of invalid URL: {e}"),
            }
        }

        if let Some(url) = &state.url {
            match self.location(url.as_str()).await {
                Ok(page) => tracing::info!(page = %page.identity(), "session state restored"),
                Err(e) if e.is_credential_failure() => return Err(e),
                Err(e) => tracing::warn!(url = %url, "could not reopen saved location: {e}"),
            }
        }
        Ok(true)
    }
}

fn join(base: &Url, raw: &str) -> Result<Url> {
    base.join(raw).map_err(|e| BrowserError::InvalidUrl {
        url: raw.to_string(),
        source: e,
    })
}
