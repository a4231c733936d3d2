//! Site descriptions loaded from JSON.
//!
//! A site file names its pages, the URL patterns that route to each one and
//! the tables to extract from them:
//!
//! ```json
//! {
//!   "base_url": "https://bank.test",
//!   "pages": [
//!     { "name": "History", "patterns": ["/accounts/(?P<id>\\d+)/history"],
//!       "logged": true, "next": "a.next",
//!       "tables": [{ "name": "operations", "head": "#ops thead th",
//!                    "rows": "#ops tbody tr",
//!                    "columns": { "date": ["Date"], "amount": ["Montant", "Amount"] } }] }
//!   ]
//! }
//! ```

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use sitewalk::filters::{cell, CleanText};
use sitewalk::{Filter, FilterError, FilterExt, NextLink, PageKind, Router, TableElement};
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteSpec {
    #[serde(default)]
    pub base_url: Option<String>,
    pub pages: Vec<PageSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageSpec {
    pub name: String,
    pub patterns: Vec<String>,
    /// Reaching this page proves the session is authenticated.
    #[serde(default)]
    pub logged: bool,
    /// CSS selector of the link to the following page.
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub head: String,
    pub rows: String,
    /// Column key to the header labels it may appear under.
    pub columns: BTreeMap<String, Vec<String>>,
}

/// Extracted row: column key to cell text, `None` for a missing cell.
pub type Row = BTreeMap<String, Option<String>>;

impl TableSpec {
    pub fn mapper(&self) -> TableElement<Row> {
        let keys: Vec<String> = self.columns.keys().cloned().collect();
        let mut table = TableElement::new(&self.head, &self.rows, move |s| {
            keys.iter()
                .map(|key| Ok((key.clone(), CleanText::new(cell(key)).optional().apply(s)?)))
                .collect::<Result<Row, FilterError>>()
        });
        for (key, labels) in &self.columns {
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            table = table.column(key, &labels);
        }
        table
    }
}

/// Page variant of a site described at runtime: the position of its
/// declaration in the site file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DynPage {
    pub index: usize,
    logged: bool,
}

impl PageKind for DynPage {
    fn is_logged(&self) -> bool {
        self.logged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteMatch {
    pub page: String,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Site {
    spec: SiteSpec,
}

impl Site {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading site file {}", path.display()))?;
        let spec: SiteSpec = serde_json::from_str(&raw)
            .with_context(|| format!("parsing site file {}", path.display()))?;
        Self::from_spec(spec)
    }

    /// Validate every pattern up front so that a bad site file fails before
    /// any request.
    pub fn from_spec(spec: SiteSpec) -> anyhow::Result<Self> {
        if spec.pages.is_empty() {
            bail!("site declares no pages");
        }
        let site = Self { spec };
        site.router()?;
        Ok(site)
    }

    pub fn base_url(&self) -> Option<&str> {
        self.spec.base_url.as_deref()
    }

    /// A fresh router over the declared pages, in declaration order.
    pub fn router(&self) -> anyhow::Result<Router<DynPage>> {
        let mut router = Router::new();
        for (index, page) in self.spec.pages.iter().enumerate() {
            let patterns: Vec<&str> = page.patterns.iter().map(String::as_str).collect();
            router
                .register(DynPage { index, logged: page.logged }, &patterns)
                .with_context(|| format!("page {:?}", page.name))?;
        }
        Ok(router)
    }

    fn page(&self, kind: DynPage) -> Option<&PageSpec> {
        self.spec.pages.get(kind.index)
    }

    pub fn name(&self, kind: DynPage) -> &str {
        self.page(kind).map_or("?", |p| p.name.as_str())
    }

    pub fn tables(&self, kind: DynPage) -> &[TableSpec] {
        self.page(kind).map(|p| p.tables.as_slice()).unwrap_or(&[])
    }

    pub fn next_link(&self, kind: DynPage) -> Option<NextLink> {
        self.page(kind)?.next.as_deref().map(NextLink::new)
    }

    /// The page `url` routes to, without fetching it.
    pub fn route(&self, base: &Url, url: &Url) -> anyhow::Result<Option<RouteMatch>> {
        let router = self.router()?;
        Ok(router.match_url(base, url).and_then(|(route, params)| {
            let kind = router.kind(route)?;
            Some(RouteMatch {
                page: self.name(kind).to_string(),
                params: params.into_iter().collect(),
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitewalk::{Env, Html, Scope};

    const SITE: &str = r##"{
        "base_url": "https://bank.test/app/",
        "pages": [
            { "name": "Accounts", "patterns": ["/accounts$"], "logged": true },
            { "name": "History", "patterns": ["/accounts/(?P<id>\\d+)/history"],
              "logged": true, "next": "a.next",
              "tables": [{ "name": "operations", "head": "#ops th", "rows": "#ops tbody tr",
                           "columns": { "date": ["Date"], "amount": ["Montant", "Amount"] } }] },
            { "name": "Any", "patterns": ["https://other\\.test/"] }
        ]
    }"##;

    fn site() -> Site {
        Site::from_spec(serde_json::from_str(SITE).unwrap()).unwrap()
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_route_relative_and_absolute_patterns() {
        let site = site();
        let base = url("https://bank.test/app/");

        let found = site
            .route(&base, &url("https://bank.test/app/accounts/42/history?page=2"))
            .unwrap()
            .unwrap();
        assert_eq!(found.page, "History");
        assert_eq!(found.params.get("id").map(String::as_str), Some("42"));

        let found = site.route(&base, &url("https://other.test/x")).unwrap().unwrap();
        assert_eq!(found.page, "Any");

        assert!(site.route(&base, &url("https://bank.test/app/accounts/x")).unwrap().is_none());
    }

    #[test]
    fn test_invalid_site_files_are_rejected() {
        let empty: SiteSpec = serde_json::from_str(r#"{"pages": []}"#).unwrap();
        assert!(Site::from_spec(empty).is_err());

        let bad: SiteSpec =
            serde_json::from_str(r#"{"pages": [{"name": "X", "patterns": ["/(unclosed"]}]}"#).unwrap();
        let err = Site::from_spec(bad).unwrap_err();
        assert!(format!("{err:#}").contains("\"X\""));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Site::load(&path).is_err());
        std::fs::write(&path, SITE).unwrap();
        assert_eq!(Site::load(&path).unwrap().base_url(), Some("https://bank.test/app/"));
    }

    #[test]
    fn test_table_mapper_reads_declared_columns() {
        let site = site();
        let history = DynPage { index: 1, logged: true };
        assert_eq!(site.name(history), "History");
        assert!(site.next_link(history).is_some());
        assert!(site.tables(DynPage { index: 0, logged: true }).is_empty());

        let doc = Html::parse_document(
            r#"<table id="ops">
                 <thead><tr><th>Amount</th><th>Date</th></tr></thead>
                 <tbody>
                   <tr><td>-12,50</td><td>14/01</td></tr>
                   <tr><td>3,00</td></tr>
                 </tbody>
               </table>"#,
        );
        let env = Env::new();
        let mapper = site.tables(history)[0].mapper();
        let rows: Vec<Row> = sitewalk::ElementMapper::items(&mapper, Scope::document(&doc, &env))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["amount"].as_deref(), Some("-12,50"));
        assert_eq!(rows[0]["date"].as_deref(), Some("14/01"));
        assert_eq!(rows[1]["date"], None);
    }
}
