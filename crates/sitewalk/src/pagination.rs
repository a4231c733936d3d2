//! Item iteration spanning several pages.

use crate::browser::Browser;
use crate::elements::ElementMapper;
use crate::error::{BrowserError, Result};
use crate::filters::{CssPath, Env};
use crate::page::{Page, PageKind};
use scraper::Html;
use std::collections::{HashSet, VecDeque};
use url::Url;

/// Finds the URL of the page after `page`, if any.
///
/// Implemented by [`NextLink`] and by any
/// `Fn(&Page<K>, &Html) -> Option<String>` closure. Relative URLs are
/// resolved against the page URL.
pub trait NextPage<K: PageKind>: Send + Sync {
    fn next_page_url(&self, page: &Page<K>, doc: &Html) -> Option<String>;
}

impl<K, F> NextPage<K> for F
where
    K: PageKind,
    F: Fn(&Page<K>, &Html) -> Option<String> + Send + Sync,
{
    fn next_page_url(&self, page: &Page<K>, doc: &Html) -> Option<String> {
        self(page, doc)
    }
}

/// `href` of the first element matching a CSS selector.
#[derive(Debug, Clone)]
pub struct NextLink {
    css: CssPath,
}

impl NextLink {
    pub fn new(css: &str) -> Self {
        Self {
            css: CssPath::new(css),
        }
    }
}

impl<K: PageKind> NextPage<K> for NextLink {
    fn next_page_url(&self, _page: &Page<K>, doc: &Html) -> Option<String> {
        let selector = match self.css.selector() {
            Ok(selector) => selector,
            Err(e) => {
                tracing::warn!("next-page selector unusable: {e}");
                return None;
            }
        };
        doc.select(selector)
            .find_map(|el| el.value().attr("href"))
            .map(str::to_string)
    }
}

/// Cursor over the items of the current page, then of each following page.
///
/// Pages are fetched only when the items already extracted are consumed.
/// A next URL that was already visited during this iteration, or one that
/// lands on an already visited page, stops it with
/// [`BrowserError::PaginationStall`] before any item is extracted again. Once exhausted (or after an error) the
/// cursor keeps returning `Ok(None)`.
pub struct Paginator<'b, K: PageKind, M: ElementMapper, N> {
    browser: &'b mut Browser<K>,
    mapper: &'b M,
    next: N,
    env: &'b Env,
    buffer: VecDeque<M::Item>,
    visited: HashSet<String>,
    pending: Option<Url>,
    started: bool,
    done: bool,
    pages: usize,
}

impl<'b, K, M, N> Paginator<'b, K, M, N>
where
    K: PageKind,
    M: ElementMapper,
    N: NextPage<K>,
{
    pub fn new(browser: &'b mut Browser<K>, mapper: &'b M, next: N, env: &'b Env) -> Self {
        Self {
            browser,
            mapper,
            next,
            env,
            buffer: VecDeque::new(),
            visited: HashSet::new(),
            pending: None,
            started: false,
            done: false,
            pages: 0,
        }
    }

    /// Pages whose items were extracted so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Extract the current page and note where to go next.
    fn fill(&mut self) -> Result<()> {
        let page = self.browser.current_page()?;
        if self.pages > 0 && self.visited.contains(page.url().as_str()) {
            return Err(BrowserError::PaginationStall {
                url: page.url().to_string(),
            });
        }
        let doc = page.document();
        let items = page.extract_from(&doc, self.mapper, self.env)?;
        tracing::debug!(page = %page.identity(), items = items.len(), "page extracted");

        self.buffer.extend(items);
        self.visited.insert(page.url().to_string());
        self.pages += 1;
        self.pending = match self.next.next_page_url(page, &doc) {
            Some(raw) => Some(page.url().join(&raw).map_err(|e| BrowserError::InvalidUrl {
                url: raw.clone(),
                source: e,
            })?),
            None => None,
        };
        Ok(())
    }

    pub async fn next(&mut self) -> Result<Option<M::Item>> {
        let result = self.advance().await;
        if result.is_err() {
            self.done = true;
        }
        result
    }

    async fn advance(&mut self) -> Result<Option<M::Item>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.done {
                return Ok(None);
            }
            if !self.started {
                self.started = true;
                self.fill()?;
                continue;
            }

            let url = match self.pending.take() {
                Some(url) => url,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };
            if self.visited.contains(url.as_str()) {
                return Err(BrowserError::PaginationStall {
                    url: url.to_string(),
                });
            }
            self.browser.location(url.clone()).await?;
            self.fill()?;
            self.visited.insert(url.to_string());
        }
    }

    /// Drain the cursor.
    pub async fn collect(mut self) -> Result<Vec<M::Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }
}
