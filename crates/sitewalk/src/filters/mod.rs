//! Declarative value extractors over parsed HTML.
//!
//! A filter turns a [`Scope`] (one element of a parsed document plus the
//! extraction environment) into a typed value, or fails with a
//! [`FilterError`]. Leaf filters read markup through a [`Select`]ion;
//! transforming filters own their input filter, so chains are written
//! inside-out:
//!
//! ```
//! use sitewalk::filters::{cell, CleanDecimal, CleanText, Filter, FilterExt};
//!
//! let amount = CleanDecimal::new(CleanText::new(cell("amount"))).european();
//! let label = CleanText::new("td.label a").or_default(String::new());
//! # let _ = (amount, label);
//! ```
//!
//! All filters are pure: they only read the scope they are given. Scraper
//! types are `!Send`, so filters run synchronously on a document parsed for
//! the occasion; nothing here is held across an `.await`.

mod date;
mod number;
mod text;

pub use date::{guess_date, parse_date, Date, DateGuesser, Reference};
pub use number::{parse_decimal, Amount, CleanDecimal, DecimalFormat, Sign};
pub use text::{
    clean_text, Attr, CleanText, Const, FieldValue, FormValue, FromEnv, Link, Lower, MapValue,
    Regexp,
};

use crate::elements::Columns;
use crate::error::FilterError;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

// ── Extraction environment ───────────────────────────────────────────────────

/// Named values handed to an extraction by the calling flow (an account id,
/// a reference date, a "coming operations" flag...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    values: HashMap<String, String>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

// ── Scope ────────────────────────────────────────────────────────────────────

/// Where a filter runs: the current element, the page URL, the environment
/// and, inside a table, the header-to-column mapping.
#[derive(Clone)]
pub struct Scope<'a> {
    element: ElementRef<'a>,
    env: &'a Env,
    url: Option<&'a Url>,
    columns: Option<Arc<Columns>>,
}

impl<'a> Scope<'a> {
    pub fn new(element: ElementRef<'a>, env: &'a Env) -> Self {
        Self {
            element,
            env,
            url: None,
            columns: None,
        }
    }

    /// Scope rooted at the document's `<html>` element.
    pub fn document(doc: &'a Html, env: &'a Env) -> Self {
        Self::new(doc.root_element(), env)
    }

    pub fn with_url(mut self, url: &'a Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_columns(mut self, columns: Arc<Columns>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Same environment, URL and columns, focused on another element.
    pub fn child(&self, element: ElementRef<'a>) -> Self {
        Self {
            element,
            env: self.env,
            url: self.url,
            columns: self.columns.clone(),
        }
    }

    pub fn element(&self) -> ElementRef<'a> {
        self.element
    }

    pub fn env(&self) -> &'a Env {
        self.env
    }

    pub fn url(&self) -> Option<&'a Url> {
        self.url
    }

    pub fn columns(&self) -> Option<&Columns> {
        self.columns.as_deref()
    }
}

// ── Filter trait and combinators ─────────────────────────────────────────────

/// A pure extractor from a [`Scope`] to a value.
pub trait Filter {
    type Output;

    fn apply(&self, scope: &Scope<'_>) -> Result<Self::Output, FilterError>;
}

/// Combinators available on every filter.
pub trait FilterExt: Filter + Sized {
    /// Return `value` whenever extraction fails.
    fn or_default(self, value: Self::Output) -> WithDefault<Self>
    where
        Self::Output: Clone,
    {
        WithDefault {
            inner: self,
            default: value,
        }
    }

    /// `None` instead of an error.
    fn optional(self) -> Optional<Self> {
        Optional { inner: self }
    }

    /// Try `other` when this filter fails.
    fn or<G>(self, other: G) -> Or<Self, G>
    where
        G: Filter<Output = Self::Output>,
    {
        Or {
            first: self,
            second: other,
        }
    }

    fn map<U, M>(self, f: M) -> MapWith<Self, M>
    where
        M: Fn(Self::Output) -> U,
    {
        MapWith { inner: self, f }
    }

    fn try_map<U, M>(self, f: M) -> TryMapWith<Self, M>
    where
        M: Fn(Self::Output) -> Result<U, FilterError>,
    {
        TryMapWith { inner: self, f }
    }
}

impl<F: Filter> FilterExt for F {}

/// See [`FilterExt::or_default`].
pub struct WithDefault<F: Filter> {
    inner: F,
    default: F::Output,
}

impl<F> Filter for WithDefault<F>
where
    F: Filter,
    F::Output: Clone,
{
    type Output = F::Output;

    fn apply(&self, scope: &Scope<'_>) -> Result<F::Output, FilterError> {
        match self.inner.apply(scope) {
            Ok(value) => Ok(value),
            Err(FilterError::SkipItem) => Err(FilterError::SkipItem),
            Err(_) => Ok(self.default.clone()),
        }
    }
}

/// See [`FilterExt::optional`].
#[derive(Debug, Clone)]
pub struct Optional<F> {
    inner: F,
}

impl<F: Filter> Filter for Optional<F> {
    type Output = Option<F::Output>;

    fn apply(&self, scope: &Scope<'_>) -> Result<Self::Output, FilterError> {
        match self.inner.apply(scope) {
            Ok(value) => Ok(Some(value)),
            Err(FilterError::SkipItem) => Err(FilterError::SkipItem),
            Err(_) => Ok(None),
        }
    }
}

/// See [`FilterExt::or`].
#[derive(Debug, Clone)]
pub struct Or<A, B> {
    first: A,
    second: B,
}

impl<A, B> Filter for Or<A, B>
where
    A: Filter,
    B: Filter<Output = A::Output>,
{
    type Output = A::Output;

    fn apply(&self, scope: &Scope<'_>) -> Result<A::Output, FilterError> {
        match self.first.apply(scope) {
            Ok(value) => Ok(value),
            Err(FilterError::SkipItem) => Err(FilterError::SkipItem),
            Err(_) => self.second.apply(scope),
        }
    }
}

/// See [`FilterExt::map`].
#[derive(Clone)]
pub struct MapWith<F, M> {
    inner: F,
    f: M,
}

impl<F, M, U> Filter for MapWith<F, M>
where
    F: Filter,
    M: Fn(F::Output) -> U,
{
    type Output = U;

    fn apply(&self, scope: &Scope<'_>) -> Result<U, FilterError> {
        self.inner.apply(scope).map(&self.f)
    }
}

/// See [`FilterExt::try_map`].
#[derive(Clone)]
pub struct TryMapWith<F, M> {
    inner: F,
    f: M,
}

impl<F, M, U> Filter for TryMapWith<F, M>
where
    F: Filter,
    M: Fn(F::Output) -> Result<U, FilterError>,
{
    type Output = U;

    fn apply(&self, scope: &Scope<'_>) -> Result<U, FilterError> {
        self.inner.apply(scope).and_then(&self.f)
    }
}

// ── Selections ───────────────────────────────────────────────────────────────

/// A CSS selector kept with its source text. Parse failures are reported
/// when the selector is used, so declarations stay infallible.
#[derive(Debug, Clone)]
pub struct CssPath {
    source: String,
    selector: Option<Selector>,
}

impl CssPath {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            selector: Selector::parse(source).ok(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn selector(&self) -> Result<&Selector, FilterError> {
        self.selector
            .as_ref()
            .ok_or_else(|| FilterError::InvalidSelector(self.source.clone()))
    }
}

#[derive(Debug, Clone)]
enum Origin {
    Here,
    Cell(Vec<String>),
}

/// Which elements a leaf filter reads, relative to the scope element.
#[derive(Debug, Clone)]
pub struct Select {
    origin: Origin,
    css: Option<CssPath>,
}

/// Descendants of the scope element matching `selector`.
pub fn css(selector: &str) -> Select {
    Select {
        origin: Origin::Here,
        css: Some(CssPath::new(selector)),
    }
}

/// The scope element itself.
pub fn here() -> Select {
    Select {
        origin: Origin::Here,
        css: None,
    }
}

/// The cell of the current table row under column `key`.
pub fn cell(key: &str) -> Select {
    cell_any(&[key])
}

/// The cell under the first of `keys` that the table declares.
pub fn cell_any(keys: &[&str]) -> Select {
    Select {
        origin: Origin::Cell(keys.iter().map(|k| k.to_string()).collect()),
        css: None,
    }
}

impl Select {
    /// Narrow the selection to descendants matching `selector`.
    pub fn css(mut self, selector: &str) -> Self {
        let combined = match &self.css {
            Some(prev) => format!("{} {}", prev.as_str(), selector),
            None => selector.to_string(),
        };
        self.css = Some(CssPath::new(&combined));
        self
    }

    /// Human-readable description used in error messages.
    pub fn describe(&self) -> String {
        let origin = match &self.origin {
            Origin::Here => String::new(),
            Origin::Cell(keys) => format!("cell {}", keys.join("|")),
        };
        match (&self.css, origin.is_empty()) {
            (Some(css), true) => css.as_str().to_string(),
            (Some(css), false) => format!("{origin} > {}", css.as_str()),
            (None, true) => "current element".to_string(),
            (None, false) => origin,
        }
    }

    /// Resolve to the matching elements, in document order.
    pub fn resolve<'a>(&self, scope: &Scope<'a>) -> Result<Vec<ElementRef<'a>>, FilterError> {
        let base = match &self.origin {
            Origin::Here => scope.element(),
            Origin::Cell(keys) => table_cell(scope, keys)?,
        };
        match &self.css {
            None => Ok(vec![base]),
            Some(path) => Ok(base.select(path.selector()?).collect()),
        }
    }
}

impl From<&str> for Select {
    fn from(selector: &str) -> Self {
        css(selector)
    }
}

impl From<&String> for Select {
    fn from(selector: &String) -> Self {
        css(selector)
    }
}

fn table_cell<'a>(scope: &Scope<'a>, keys: &[String]) -> Result<ElementRef<'a>, FilterError> {
    let wanted = keys.join("|");
    let columns = scope
        .columns()
        .ok_or_else(|| FilterError::ColumnNotFound(wanted.clone()))?;
    let index = keys
        .iter()
        .find_map(|k| columns.get(k))
        .ok_or_else(|| FilterError::ColumnNotFound(wanted.clone()))?;

    scope
        .element()
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .nth(index)
        .ok_or_else(|| FilterError::NotFound(format!("cell {wanted}")))
}
