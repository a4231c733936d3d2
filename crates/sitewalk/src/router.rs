//! URL routing: ordered pattern bindings from URLs to page variants.
//!
//! Patterns are regular expressions anchored at the start of the URL.
//! A pattern starting with a scheme (`https://`) is matched against the full
//! absolute URL; any other pattern is relative to the base URL, so `.*` at
//! its start never reaches another host. Bindings are tried in registration
//! order and the first one whose variant accepts the page claims it.

use crate::error::{BrowserError, Result};
use crate::http_client::HttpResponse;
use crate::page::{Page, PageKind};
use regex::Regex;
use scraper::Html;
use std::collections::HashMap;
use std::sync::OnceLock;
use url::Url;

/// Handle to a registered binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route(usize);

impl Route {
    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Route(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

fn has_scheme(pattern: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w?]+://").expect("scheme regex is valid"))
        .is_match(pattern)
}

/// What part of a URL a pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    /// The whole URL.
    Absolute,
    /// The URL after the base, starting with `/`.
    Rooted,
    /// The URL after the base and its trailing `/`.
    Bare,
}

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
    anchor: Anchor,
}

impl Pattern {
    fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{source})")).map_err(|e| BrowserError::InvalidPattern {
            pattern: source.to_string(),
            source: e,
        })?;
        let anchor = if has_scheme(source) {
            Anchor::Absolute
        } else if source.starts_with('/') {
            Anchor::Rooted
        } else {
            Anchor::Bare
        };
        Ok(Self {
            source: source.to_string(),
            regex,
            anchor,
        })
    }

    /// The part of `url` this pattern is matched against.
    fn target<'u>(&self, base: &str, url: &'u str) -> Option<&'u str> {
        match self.anchor {
            Anchor::Absolute => Some(url),
            Anchor::Rooted => url.strip_prefix(base).filter(|rest| rest.starts_with('/')),
            Anchor::Bare => url.strip_prefix(base)?.strip_prefix('/'),
        }
    }

    fn captures(&self, base: &Url, url: &Url) -> Option<HashMap<String, String>> {
        let target = self.target(trimmed_base(base), url.as_str())?;
        let caps = self.regex.captures(target)?;
        Some(
            self.regex
                .capture_names()
                .flatten()
                .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                .collect(),
        )
    }
}

fn trimmed_base(base: &Url) -> &str {
    base.as_str().trim_end_matches('/')
}

#[derive(Debug, Clone)]
struct Binding<K> {
    kind: K,
    patterns: Vec<Pattern>,
}

/// Ordered set of URL bindings for one site.
#[derive(Debug, Clone)]
pub struct Router<K> {
    bindings: Vec<Binding<K>>,
}

impl<K: PageKind> Default for Router<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PageKind> Router<K> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Bind `patterns` to `kind`. Later registrations never shadow earlier ones.
    pub fn register(&mut self, kind: K, patterns: &[&str]) -> Result<Route> {
        if patterns.is_empty() {
            return Err(BrowserError::Config(format!(
                "route for {kind:?} has no URL pattern"
            )));
        }
        let patterns = patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>>>()?;
        self.bindings.push(Binding { kind, patterns });
        Ok(Route(self.bindings.len() - 1))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn kind(&self, route: Route) -> Option<K> {
        self.bindings.get(route.0).map(|b| b.kind)
    }

    pub fn patterns(&self, route: Route) -> Vec<&str> {
        self.bindings
            .get(route.0)
            .map(|b| b.patterns.iter().map(|p| p.source.as_str()).collect())
            .unwrap_or_default()
    }

    /// Every binding matching `url`, in registration order, with its captures.
    pub fn candidates<'a>(
        &'a self,
        base: &'a Url,
        url: &'a Url,
    ) -> impl Iterator<Item = (Route, HashMap<String, String>)> + 'a {
        self.bindings
            .iter()
            .enumerate()
            .filter_map(move |(i, binding)| {
                binding
                    .patterns
                    .iter()
                    .find_map(|p| p.captures(base, url))
                    .map(|params| (Route(i), params))
            })
    }

    /// First binding whose URL pattern matches, ignoring variant predicates.
    pub fn match_url(&self, base: &Url, url: &Url) -> Option<(Route, HashMap<String, String>)> {
        self.candidates(base, url).next()
    }

    /// Captures of `route` on `url`, if one of its patterns matches.
    pub fn route_params(&self, route: Route, base: &Url, url: &Url) -> Option<HashMap<String, String>> {
        self.bindings
            .get(route.0)?
            .patterns
            .iter()
            .find_map(|p| p.captures(base, url))
    }

    /// Build the page for `response`, asking each candidate variant in turn.
    pub fn build_page(&self, base: &Url, response: &HttpResponse, doc: &Html) -> Result<Page<K>> {
        let url = Url::parse(&response.final_url).map_err(|e| BrowserError::InvalidUrl {
            url: response.final_url.clone(),
            source: e,
        })?;

        for (route, params) in self.candidates(base, &url) {
            let kind = self.bindings[route.0].kind;
            let page = Page::new(route, kind, url.clone(), response, params);
            if kind.matches(&page, doc) {
                return Ok(page);
            }
            tracing::trace!(?kind, url = %url, "variant declined page");
        }

        if response.status >= 400 {
            Err(BrowserError::HttpStatus {
                status: response.status,
                url: url.to_string(),
            })
        } else {
            Err(BrowserError::UnhandledPage {
                url: url.to_string(),
                status: response.status,
            })
        }
    }

    /// Render a URL for `route` from named parameters.
    ///
    /// Each pattern is tried in order; the first one that renders with
    /// exactly the given parameters, and whose rendering it matches, wins.
    pub fn build(&self, route: Route, base: &Url, params: &[(&str, &str)]) -> Result<Url> {
        let binding = self.bindings.get(route.0).ok_or_else(|| BrowserError::UrlBuild {
            route: format!("{route:?}"),
            reason: "unknown route".to_string(),
        })?;
        let params: HashMap<&str, &str> = params.iter().copied().collect();

        let mut reasons = Vec::new();
        for pattern in &binding.patterns {
            match render_pattern(pattern, base, &params) {
                Ok(url) => return Ok(url),
                Err(reason) => reasons.push(format!("{}: {reason}", pattern.source)),
            }
        }
        Err(BrowserError::UrlBuild {
            route: format!("{:?}", binding.kind),
            reason: reasons.join("; "),
        })
    }
}

// ── URL rendering ────────────────────────────────────────────────────────────

enum RenderError {
    Missing(String),
    Unrenderable(String),
}

#[derive(Default)]
struct Fragment {
    text: String,
    used: Vec<String>,
}

impl Fragment {
    fn extend(&mut self, other: Fragment) {
        self.text.push_str(&other.text);
        self.used.extend(other.used);
    }
}

fn render_pattern(
    pattern: &Pattern,
    base: &Url,
    params: &HashMap<&str, &str>,
) -> std::result::Result<Url, String> {
    let chars: Vec<char> = pattern.source.chars().collect();
    let fragment = render_slice(&chars, params, true).map_err(|e| match e {
        RenderError::Missing(name) => format!("missing parameter {name}"),
        RenderError::Unrenderable(what) => format!("cannot render {what}"),
    })?;

    if let Some(unused) = params.keys().find(|k| !fragment.used.iter().any(|u| u == *k)) {
        return Err(format!("parameter {unused} not used"));
    }
    if !pattern.regex.is_match(&fragment.text) {
        return Err(format!("{} does not match the pattern", fragment.text));
    }

    let absolute = match pattern.anchor {
        Anchor::Absolute => fragment.text,
        Anchor::Rooted => format!("{}{}", trimmed_base(base), fragment.text),
        Anchor::Bare => format!("{}/{}", trimmed_base(base), fragment.text),
    };
    Url::parse(&absolute).map_err(|e| format!("{absolute}: {e}"))
}

fn render_slice(
    chars: &[char],
    params: &HashMap<&str, &str>,
    top: bool,
) -> std::result::Result<Fragment, RenderError> {
    let mut out = Fragment::default();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                let escaped = *chars
                    .get(i + 1)
                    .ok_or_else(|| RenderError::Unrenderable("trailing backslash".into()))?;
                if escaped.is_ascii_alphanumeric() {
                    return Err(RenderError::Unrenderable(format!("\\{escaped}")));
                }
                out.text.push(escaped);
                i += 2;
                continue;
            }
            '(' => {
                let close = closing_paren(chars, i)?;
                let optional = chars.get(close + 1) == Some(&'?');
                match (render_group(&chars[i + 1..close], params), optional) {
                    (Ok(group), false) => out.extend(group),
                    (Ok(group), true) if !group.used.is_empty() => out.extend(group),
                    (Ok(_), true) | (Err(RenderError::Missing(_)), true) => {}
                    (Err(e), _) => return Err(e),
                }
                i = close + 1 + usize::from(optional);
                continue;
            }
            '^' if top && i == 0 => {}
            '$' if top && i + 1 == chars.len() => {}
            ')' | '*' | '+' | '?' | '[' | '{' | '|' => {
                return Err(RenderError::Unrenderable(format!("'{c}'")));
            }
            _ => out.text.push(c),
        }
        i += 1;
    }
    Ok(out)
}

fn render_group(
    body: &[char],
    params: &HashMap<&str, &str>,
) -> std::result::Result<Fragment, RenderError> {
    let name_start = if body.starts_with(&['?', 'P', '<']) {
        Some(3)
    } else if body.starts_with(&['?', '<']) && !matches!(body.get(2), Some(&'=') | Some(&'!')) {
        Some(2)
    } else {
        None
    };

    if let Some(start) = name_start {
        let len = body[start..]
            .iter()
            .position(|c| *c == '>')
            .ok_or_else(|| RenderError::Unrenderable("unterminated group name".into()))?;
        let name: String = body[start..start + len].iter().collect();
        return match params.get(name.as_str()) {
            Some(value) => Ok(Fragment {
                text: value.to_string(),
                used: vec![name],
            }),
            None => Err(RenderError::Missing(name)),
        };
    }

    if body.starts_with(&['?', ':']) {
        render_slice(&body[2..], params, false)
    } else if body.first() == Some(&'?') {
        Err(RenderError::Unrenderable("group flags".into()))
    } else {
        render_slice(body, params, false)
    }
}

fn closing_paren(chars: &[char], open: usize) -> std::result::Result<usize, RenderError> {
    let mut depth = 0usize;
    let mut in_class = false;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(RenderError::Unrenderable("unbalanced '('".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Login,
        Error,
        Account,
        AnyAccount,
        History,
        Sso,
    }

    impl PageKind for Kind {
        fn matches(&self, _page: &Page<Self>, doc: &Html) -> bool {
            match self {
                Kind::Error => {
                    let sel = Selector::parse("div.error").unwrap();
                    doc.select(&sel).next().is_some()
                }
                _ => true,
            }
        }
    }

    struct Fixture {
        router: Router<Kind>,
        base: Url,
        error: Route,
        account: Route,
        history: Route,
    }

    fn fixture() -> Fixture {
        let mut router = Router::new();
        let error = router.register(Kind::Error, &["/login"]).unwrap();
        router.register(Kind::Login, &["/login"]).unwrap();
        let account = router
            .register(Kind::Account, &[r"/accounts/(?P<id>\d+)$"])
            .unwrap();
        router.register(Kind::AnyAccount, &["/accounts/.*"]).unwrap();
        let history = router
            .register(
                Kind::History,
                &[
                    r"/history/.*",
                    r"/accounts/(?P<id>\d+)/history(\?page=(?P<page>\d+))?$",
                ],
            )
            .unwrap();
        router
            .register(Kind::Sso, &[r"https://auth\.bank\.test/sso"])
            .unwrap();
        Fixture {
            router,
            base: Url::parse("https://bank.test/").unwrap(),
            error,
            account,
            history,
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn kind_of(f: &Fixture, u: &str) -> Option<Kind> {
        f.router
            .match_url(&f.base, &url(u))
            .and_then(|(route, _)| f.router.kind(route))
    }

    #[test]
    fn test_first_registered_route_wins() {
        let f = fixture();
        assert_eq!(kind_of(&f, "https://bank.test/accounts/12"), Some(Kind::Account));
        assert_eq!(kind_of(&f, "https://bank.test/accounts/12/rib"), Some(Kind::AnyAccount));
        assert_eq!(kind_of(&f, "https://bank.test/accounts/12/history"), Some(Kind::AnyAccount));
        assert_eq!(kind_of(&f, "https://bank.test/login"), Some(Kind::Error));
    }

    #[test]
    fn test_relative_absolute_and_prefix_matching() {
        let f = fixture();
        assert_eq!(kind_of(&f, "https://bank.test/login?next=%2F"), Some(Kind::Error));
        assert_eq!(kind_of(&f, "https://auth.bank.test/sso?ticket=1"), Some(Kind::Sso));
        assert_eq!(kind_of(&f, "https://other.test/login"), None);
        assert_eq!(kind_of(&f, "https://bank.test/portal/login"), None);
    }

    #[test]
    fn test_scheme_less_patterns_stay_under_base() {
        let mut router: Router<Kind> = Router::new();
        let login = router
            .register(Kind::Login, &[r".*wsost/OstBrokerWeb/loginform.*"])
            .unwrap();
        let history = router
            .register(Kind::History, &[r"accounts/(?P<id>\d+)/history"])
            .unwrap();
        let base = url("https://bank.test/");

        let (route, _) = router
            .match_url(&base, &url("https://bank.test/wsost/OstBrokerWeb/loginform?TAM=1"))
            .unwrap();
        assert_eq!(route, login);
        assert!(router
            .match_url(&base, &url("https://evil.test/wsost/OstBrokerWeb/loginform"))
            .is_none());

        let (route, params) = router
            .match_url(&base, &url("https://bank.test/accounts/3/history"))
            .unwrap();
        assert_eq!(route, history);
        assert_eq!(params.get("id").map(String::as_str), Some("3"));
        assert_eq!(
            router.build(history, &base, &[("id", "3")]).unwrap().as_str(),
            "https://bank.test/accounts/3/history"
        );
    }

    #[test]
    fn test_named_groups_become_params() {
        let f = fixture();
        let (route, params) = f
            .router
            .match_url(&f.base, &url("https://bank.test/accounts/0042"))
            .unwrap();
        assert_eq!(route, f.account);
        assert_eq!(params.get("id").map(String::as_str), Some("0042"));
    }

    fn response(u: &str, status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            url: u.into(),
            final_url: u.into(),
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[test]
    fn test_variant_predicate_disambiguates_shared_url() {
        let f = fixture();
        let error = response("https://bank.test/login", 200, r#"<div class="error">Bad password</div>"#);
        let doc = Html::parse_document(&error.body);
        let page = f.router.build_page(&f.base, &error, &doc).unwrap();
        assert_eq!(page.kind(), Kind::Error);
        assert_eq!(page.route(), f.error);

        let form = response("https://bank.test/login", 200, "<form></form>");
        let doc = Html::parse_document(&form.body);
        assert_eq!(f.router.build_page(&f.base, &form, &doc).unwrap().kind(), Kind::Login);
    }

    #[test]
    fn test_unclaimed_response() {
        let f = fixture();
        let doc = Html::parse_document("");
        assert!(matches!(
            f.router.build_page(&f.base, &response("https://bank.test/promo", 200, ""), &doc),
            Err(BrowserError::UnhandledPage { status: 200, .. })
        ));
        assert!(matches!(
            f.router.build_page(&f.base, &response("https://bank.test/promo", 503, ""), &doc),
            Err(BrowserError::HttpStatus { status: 503, .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let mut router: Router<Kind> = Router::new();
        assert!(matches!(
            router.register(Kind::Login, &["/login("]),
            Err(BrowserError::InvalidPattern { .. })
        ));
        assert!(matches!(
            router.register(Kind::Login, &[]),
            Err(BrowserError::Config(_))
        ));
        assert!(router.is_empty());
    }

    #[test]
    fn test_build_substitutes_named_groups() {
        let f = fixture();
        let built = f.router.build(f.account, &f.base, &[("id", "42")]).unwrap();
        assert_eq!(built.as_str(), "https://bank.test/accounts/42");

        assert!(matches!(
            f.router.build(f.account, &f.base, &[]),
            Err(BrowserError::UrlBuild { .. })
        ));
        assert!(matches!(
            f.router.build(f.account, &f.base, &[("id", "42"), ("extra", "1")]),
            Err(BrowserError::UrlBuild { .. })
        ));
        assert!(matches!(
            f.router.build(f.account, &f.base, &[("id", "abc")]),
            Err(BrowserError::UrlBuild { .. })
        ));
    }

    #[test]
    fn test_build_skips_unrenderable_patterns_and_optional_groups() {
        let f = fixture();
        let first = f.router.build(f.history, &f.base, &[("id", "7")]).unwrap();
        assert_eq!(first.as_str(), "https://bank.test/accounts/7/history");

        let paged = f
            .router
            .build(f.history, &f.base, &[("id", "7"), ("page", "3")])
            .unwrap();
        assert_eq!(paged.as_str(), "https://bank.test/accounts/7/history?page=3");
    }

    #[test]
    fn test_build_absolute_pattern() {
        let mut router: Router<Kind> = Router::new();
        let sso = router
            .register(Kind::Sso, &[r"https://auth\.bank\.test/sso/(?P<realm>\w+)"])
            .unwrap();
        let base = url("https://bank.test/");
        assert_eq!(
            router.build(sso, &base, &[("realm", "pro")]).unwrap().as_str(),
            "https://auth.bank.test/sso/pro"
        );
    }
}
