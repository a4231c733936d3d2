//! The `fetch` command: load one URL, report the page and its tables.

use crate::site::{DynPage, Row, Site, TableSpec};
use anyhow::bail;
use serde::Serialize;
use sitewalk::{Browser, Env};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Only extract the table with this name.
    pub table: Option<String>,
    /// Follow the page's next link and gather rows from every page.
    pub all: bool,
}

#[derive(Debug, Serialize)]
pub struct FetchReport {
    pub page: String,
    pub url: String,
    pub status: u16,
    pub params: BTreeMap<String, String>,
    pub pages: usize,
    pub tables: BTreeMap<String, Vec<Row>>,
}

pub async fn fetch(
    browser: &mut Browser<DynPage>,
    site: &Site,
    url: &str,
    options: &FetchOptions,
) -> anyhow::Result<FetchReport> {
    let page = browser.location(url).await?;
    let kind = page.kind();
    let mut report = FetchReport {
        page: site.name(kind).to_string(),
        url: page.url().to_string(),
        status: page.status(),
        params: page.params().clone().into_iter().collect(),
        pages: 1,
        tables: BTreeMap::new(),
    };

    let tables: Vec<&TableSpec> = site
        .tables(kind)
        .iter()
        .filter(|t| options.table.as_deref().map_or(true, |name| t.name == name))
        .collect();
    if let (Some(name), true) = (&options.table, tables.is_empty()) {
        bail!("page {} declares no table {name:?}", report.page);
    }

    let env = Env::new();
    if options.all {
        let [table] = tables.as_slice() else {
            bail!("--all follows a single table; pick one with --table");
        };
        let Some(next) = site.next_link(kind) else {
            bail!("page {} declares no next link", report.page);
        };
        let mapper = table.mapper();
        let mut pager = browser.paginate(&mapper, next, &env);
        let mut rows = Vec::new();
        while let Some(row) = pager.next().await? {
            rows.push(row);
        }
        report.pages = pager.pages();
        report.tables.insert(table.name.clone(), rows);
    } else {
        let page = browser.current_page()?;
        for table in tables {
            report
                .tables
                .insert(table.name.clone(), page.extract(&table.mapper(), &env)?);
        }
    }

    tracing::info!(page = %report.page, pages = report.pages, "fetched");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitewalk::BrowserConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn site() -> Site {
        let spec = serde_json::json!({
            "pages": [
                { "name": "History", "patterns": ["/accounts/(?P<id>\\d+)/history"], "next": "a.next",
                  "tables": [
                      { "name": "operations", "head": "#ops th", "rows": "#ops tbody tr",
                        "columns": { "label": ["Libellé"], "amount": ["Montant"] } },
                      { "name": "pending", "head": "#pending th", "rows": "#pending tbody tr",
                        "columns": { "label": ["Libellé"] } }
                  ] }
            ]
        });
        Site::from_spec(serde_json::from_value(spec).unwrap()).unwrap()
    }

    fn page(label: &str, next: Option<&str>) -> ResponseTemplate {
        let next = next
            .map(|href| format!(r#"<a class="next" href="{href}">Suivant</a>"#))
            .unwrap_or_default();
        let body = format!(
            r#"<table id="ops"><thead><tr><th>Libellé</th><th>Montant</th></tr></thead>
               <tbody><tr><td>{label}</td><td>-1,00</td></tr></tbody></table>
               <table id="pending"><thead><tr><th>Libellé</th></tr></thead><tbody></tbody></table>
               {next}"#
        );
        ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/html")
    }

    async fn server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/42/history"))
            .respond_with(page("CB CARREFOUR", Some("?page=2")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/42/history"))
            .and(query_param("page", "2"))
            .respond_with(page("PRLV EDF", None))
            .with_priority(1)
            .mount(&server)
            .await;
        server
    }

    fn browser(site: &Site, base: &str) -> Browser<DynPage> {
        Browser::new(site.router().unwrap(), BrowserConfig::new(base)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_extracts_every_table_of_one_page() {
        let server = server().await;
        let site = site();
        let mut b = browser(&site, &server.uri());

        let report = fetch(&mut b, &site, "/accounts/42/history", &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(report.page, "History");
        assert_eq!(report.status, 200);
        assert_eq!(report.params.get("id").map(String::as_str), Some("42"));
        assert_eq!(report.pages, 1);
        assert_eq!(report.tables["operations"].len(), 1);
        assert_eq!(
            report.tables["operations"][0]["amount"].as_deref(),
            Some("-1,00")
        );
        assert!(report.tables["pending"].is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_follows_next_links() {
        let server = server().await;
        let site = site();
        let mut b = browser(&site, &server.uri());

        let options = FetchOptions {
            table: Some("operations".into()),
            all: true,
        };
        let report = fetch(&mut b, &site, "/accounts/42/history", &options).await.unwrap();
        assert_eq!(report.pages, 2);
        let labels: Vec<_> = report.tables["operations"]
            .iter()
            .map(|row| row["label"].clone().unwrap_or_default())
            .collect();
        assert_eq!(labels, vec!["CB CARREFOUR", "PRLV EDF"]);
        assert_eq!(b.request_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_option_errors() {
        let server = server().await;
        let site = site();
        let mut b = browser(&site, &server.uri());

        let all_tables = FetchOptions { table: None, all: true };
        assert!(fetch(&mut b, &site, "/accounts/42/history", &all_tables).await.is_err());

        let unknown = FetchOptions {
            table: Some("savings".into()),
            all: false,
        };
        let err = fetch(&mut b, &site, "/accounts/42/history", &unknown).await.unwrap_err();
        assert!(err.to_string().contains("savings"));
    }
}
