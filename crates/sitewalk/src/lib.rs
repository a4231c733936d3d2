//! Sitewalk: browser core for scripted sessions on websites without an API.
//!
//! A site module declares its pages as a [`PageKind`] enum, binds URL
//! patterns to them in a [`Router`], and drives a [`Browser`]: every response
//! is routed to the page variant that claims it, the variant's load hook
//! runs, and the flow extracts typed data with [filters](filters) and
//! [element mappers](elements).

pub mod browser;
pub mod cache;
pub mod config;
pub mod elements;
pub mod error;
pub mod filters;
pub mod form;
pub mod http_client;
pub mod page;
pub mod pagination;
pub mod router;
pub mod state;

pub use browser::{Authenticator, Browser};
pub use cache::{CacheMode, ResponseCache};
pub use config::{resolve_config_path, BrowserConfig};
pub use elements::{Columns, ElementMapper, Items, ListElement, TableElement};
pub use error::{BrowserError, FilterError, Result};
pub use filters::{Env, Filter, FilterExt, Scope};
pub use form::{Form, FormSelector};
pub use http_client::{HttpResponse, Method, Request};
pub use page::{OnLoad, Page, PageKind};
pub use pagination::{NextLink, NextPage, Paginator};
pub use router::{Route, Router};
pub use state::{CookieSnapshot, SessionState, StateStore};

/// Re-exported so page variants can implement [`PageKind`] hooks without a
/// direct `scraper` dependency.
pub use scraper::Html;
