//! Pages: one routed HTTP response and the hooks of its variant.

use crate::elements::ElementMapper;
use crate::error::{BrowserError, FilterError, Result};
use crate::filters::{Env, Filter, Scope};
use crate::form::{Form, FormSelector};
use crate::http_client::{HttpResponse, Request};
use crate::router::Route;
use scraper::Html;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use url::Url;

/// What the browser does once a page's load hook has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnLoad {
    /// Install the page.
    Done,
    /// Navigate again, resolving the request against this page's URL.
    Follow(Request),
    /// The site ended the session; install the page and clear the login flag.
    Logout,
}

/// The closed set of page variants a site module knows.
///
/// Implemented by a plain `enum` of the site's pages; routes bind URL
/// patterns to these tags and the hooks below give each variant its
/// behaviour.
pub trait PageKind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Checked after a URL pattern matched, to pick between variants sharing
    /// one URL. The first matching route whose variant accepts wins.
    fn matches(&self, _page: &Page<Self>, _doc: &Html) -> bool {
        true
    }

    /// Runs once per page, before it becomes the current page. Errors abort
    /// the navigation and reach the caller unchanged.
    fn on_load(&self, _page: &Page<Self>, _doc: &Html) -> Result<OnLoad> {
        Ok(OnLoad::Done)
    }

    /// Being on this page proves the session is authenticated.
    fn is_logged(&self) -> bool {
        false
    }
}

/// A routed response.
///
/// The body is kept as text and parsed on demand: `scraper::Html` is not
/// `Send`, and a `Browser` must stay usable from a spawned task.
#[derive(Debug, Clone)]
pub struct Page<K> {
    route: Route,
    kind: K,
    url: Url,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    params: HashMap<String, String>,
}

impl<K: PageKind> Page<K> {
    pub(crate) fn new(
        route: Route,
        kind: K,
        url: Url,
        response: &HttpResponse,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            route,
            kind,
            url,
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            params,
        }
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn kind(&self) -> K {
        self.kind
    }

    /// Final URL of the response, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Named groups captured by the route pattern.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Variant at URL`, used in logs and extraction errors.
    pub fn identity(&self) -> String {
        format!("{:?} at {}", self.kind, self.url)
    }

    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }

    /// Run an element mapper over the whole document. The first item error
    /// aborts and is reported with the page identity.
    pub fn extract<M: ElementMapper>(&self, mapper: &M, env: &Env) -> Result<Vec<M::Item>> {
        let doc = self.document();
        self.extract_from(&doc, mapper, env)
    }

    /// Same as [`extract`](Self::extract) over an already parsed document.
    pub fn extract_from<M: ElementMapper>(
        &self,
        doc: &Html,
        mapper: &M,
        env: &Env,
    ) -> Result<Vec<M::Item>> {
        let scope = Scope::document(doc, env).with_url(&self.url);
        mapper
            .items(scope)
            .and_then(|items| items.collect::<std::result::Result<Vec<_>, FilterError>>())
            .map_err(|e| self.extraction_error(e))
    }

    /// Apply one filter at document level.
    pub fn select<F: Filter>(&self, filter: &F, env: &Env) -> Result<F::Output> {
        let doc = self.document();
        self.select_from(&doc, filter, env)
    }

    pub fn select_from<F: Filter>(&self, doc: &Html, filter: &F, env: &Env) -> Result<F::Output> {
        let scope = Scope::document(doc, env).with_url(&self.url);
        filter.apply(&scope).map_err(|e| self.extraction_error(e))
    }

    pub fn form(&self, selector: &FormSelector) -> Result<Form> {
        Form::find(&self.document(), &self.url, selector)
    }

    fn extraction_error(&self, source: FilterError) -> BrowserError {
        BrowserError::Extraction {
            page: format!("{:?}", self.kind),
            url: self.url.to_string(),
            source,
        }
    }
}
