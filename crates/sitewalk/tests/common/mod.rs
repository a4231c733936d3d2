//! A small demo bank used by the integration tests, served by wiremock.

#![allow(dead_code)]

use async_trait::async_trait;
use sitewalk::filters::{Attr, CleanText, FilterExt};
use sitewalk::{
    Authenticator, Browser, BrowserConfig, BrowserError, Env, Filter, FormSelector, Html, OnLoad,
    Page, PageKind, Request, Route, Router, Scope,
};
use wiremock::ResponseTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bank {
    Login,
    Accounts,
    History,
    Redirect,
    Loop,
    Expired,
    Maintenance,
}

fn text(doc: &Html, css: &str) -> String {
    let env = Env::new();
    CleanText::new(css)
        .or_default(String::new())
        .apply(&Scope::document(doc, &env))
        .unwrap_or_default()
}

impl PageKind for Bank {
    fn on_load(&self, _page: &Page<Self>, doc: &Html) -> sitewalk::Result<OnLoad> {
        match self {
            Bank::Login => {
                let error = text(doc, "div.error");
                if error.contains("incorrect") {
                    Err(BrowserError::IncorrectPassword(error))
                } else if error.contains("blocked") {
                    Err(BrowserError::Banned(error))
                } else {
                    Ok(OnLoad::Done)
                }
            }
            Bank::Redirect => {
                let env = Env::new();
                let href = Attr::new("a#continue", "href")
                    .apply(&Scope::document(doc, &env))
                    .map_err(|e| BrowserError::Extraction {
                        page: "Redirect".into(),
                        url: String::new(),
                        source: e,
                    })?;
                Ok(OnLoad::Follow(Request::get(href)))
            }
            Bank::Loop => Ok(OnLoad::Follow(Request::get("/loop"))),
            Bank::Expired => Ok(OnLoad::Logout),
            Bank::Maintenance => Err(BrowserError::Unavailable("scheduled maintenance".into())),
            Bank::Accounts | Bank::History => Ok(OnLoad::Done),
        }
    }

    fn is_logged(&self) -> bool {
        matches!(self, Bank::Accounts | Bank::History)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Routes {
    pub login: Route,
    pub accounts: Route,
    pub history: Route,
}

pub fn router() -> (Router<Bank>, Routes) {
    let mut router = Router::new();
    let login = router.register(Bank::Login, &["/login"]).unwrap();
    let accounts = router.register(Bank::Accounts, &["/accounts$"]).unwrap();
    let history = router
        .register(Bank::History, &[r"/accounts/(?P<id>\d+)/history"])
        .unwrap();
    router.register(Bank::Redirect, &["/redirect"]).unwrap();
    router.register(Bank::Loop, &["/loop"]).unwrap();
    router.register(Bank::Expired, &["/expired"]).unwrap();
    router.register(Bank::Maintenance, &["/maintenance"]).unwrap();
    (router, Routes { login, accounts, history })
}

pub fn browser_with(config: BrowserConfig) -> (Browser<Bank>, Routes) {
    let (router, routes) = router();
    (Browser::new(router, config).unwrap(), routes)
}

pub fn browser(base: &str) -> (Browser<Bank>, Routes) {
    browser_with(BrowserConfig::new(base))
}

/// Fills the login form and submits it.
pub struct PasswordLogin {
    pub login_route: Route,
    pub user: String,
    pub password: String,
}

#[async_trait]
impl Authenticator<Bank> for PasswordLogin {
    async fn login(&self, browser: &mut Browser<Bank>) -> sitewalk::Result<()> {
        let mut form = browser
            .go(self.login_route, &[])
            .await?
            .form(&FormSelector::Name("auth".into()))?;
        form.set("login", self.user.as_str())
            .set("password", self.password.as_str());
        let page = browser.submit(&form).await?;
        if page.kind() != Bank::Accounts {
            return Err(BrowserError::IncorrectPassword(format!(
                "login ended on {}",
                page.identity()
            )));
        }
        Ok(())
    }
}

pub fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into().into_bytes(), "text/html")
}

pub const LOGIN_FORM: &str = r#"
    <html><body>
        <form name="auth" method="post" action="/login">
            <input type="hidden" name="token" value="xyz">
            <input type="text" name="login">
            <input type="password" name="password">
            <input type="submit" value="Connexion">
        </form>
    </body></html>
"#;

pub fn login_error(message: &str) -> String {
    LOGIN_FORM.replace(
        "<body>",
        &format!(r#"<body><div class="error">{message}</div>"#),
    )
}

pub const ACCOUNTS: &str = r#"
    <html><body>
        <ul id="accounts">
            <li data-id="42">
                <a href="/accounts/42/history">Compte courant</a>
                <span class="balance">1 234,56 €</span>
            </li>
            <li data-id="43">
                <a href="/accounts/43/history">Livret A</a>
                <span class="balance">10 000,00 €</span>
            </li>
        </ul>
    </body></html>
"#;

/// A statement page: rows of (date, label, amount) and an optional next link.
pub fn history_page(rows: &[(&str, &str, &str)], next: Option<&str>) -> String {
    let body: String = rows
        .iter()
        .map(|(date, label, amount)| {
            format!("<tr><td>{date}</td><td>{label}</td><td>{amount}</td></tr>")
        })
        .collect();
    let next = next
        .map(|href| format!(r#"<a class="next" href="{href}">Suivant</a>"#))
        .unwrap_or_default();
    format!(
        r#"<html><body>
            <table id="ops">
                <thead><tr><th>Date</th><th>Libellé</th><th>Montant</th></tr></thead>
                <tbody>{body}</tbody>
            </table>
            {next}
        </body></html>"#
    )
}
