//! Text, attribute and pattern filters.

use super::{Filter, Scope, Select};
use crate::error::FilterError;
use regex::Regex;
use scraper::{ElementRef, Selector};

/// Collapse every run of whitespace (NBSP included) into one space and trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first<'a>(select: &Select, scope: &Scope<'a>) -> Result<ElementRef<'a>, FilterError> {
    select
        .resolve(scope)?
        .into_iter()
        .next()
        .ok_or_else(|| FilterError::NotFound(select.describe()))
}

// ── CleanText ────────────────────────────────────────────────────────────────

/// Normalized text content of the selected elements.
///
/// Several matches are joined with a single space. An empty selection is a
/// [`FilterError::NotFound`].
#[derive(Debug, Clone)]
pub struct CleanText {
    select: Select,
    replace: Vec<(String, String)>,
    own_text: bool,
}

impl CleanText {
    pub fn new(select: impl Into<Select>) -> Self {
        Self {
            select: select.into(),
            replace: Vec::new(),
            own_text: false,
        }
    }

    /// Replace `from` with `to` after normalization. Applied in declaration order.
    pub fn replace(mut self, from: &str, to: &str) -> Self {
        self.replace.push((from.to_string(), to.to_string()));
        self
    }

    /// Only read text nodes that are direct children of the selected elements.
    pub fn own_text(mut self) -> Self {
        self.own_text = true;
        self
    }
}

impl Filter for CleanText {
    type Output = String;

    fn apply(&self, scope: &Scope<'_>) -> Result<String, FilterError> {
        let elements = self.select.resolve(scope)?;
        if elements.is_empty() {
            return Err(FilterError::NotFound(self.select.describe()));
        }

        let raw = elements
            .iter()
            .map(|el| {
                if self.own_text {
                    el.children()
                        .filter_map(|node| node.value().as_text().map(|t| &**t))
                        .collect::<String>()
                } else {
                    el.text().collect::<String>()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        let mut text = clean_text(&raw);
        for (from, to) in &self.replace {
            text = text.replace(from.as_str(), to);
        }
        Ok(text)
    }
}

// ── Attributes and links ─────────────────────────────────────────────────────

/// Value of an attribute on the first selected element.
#[derive(Debug, Clone)]
pub struct Attr {
    select: Select,
    attr: String,
}

impl Attr {
    pub fn new(select: impl Into<Select>, attr: &str) -> Self {
        Self {
            select: select.into(),
            attr: attr.to_string(),
        }
    }
}

impl Filter for Attr {
    type Output = String;

    fn apply(&self, scope: &Scope<'_>) -> Result<String, FilterError> {
        let el = first(&self.select, scope)?;
        el.value()
            .attr(&self.attr)
            .map(str::to_string)
            .ok_or_else(|| FilterError::AttributeNotFound {
                selector: self.select.describe(),
                attr: self.attr.clone(),
            })
    }
}

/// `href` of the first selected element, made absolute against the page URL
/// when the scope carries one.
#[derive(Debug, Clone)]
pub struct Link {
    attr: Attr,
}

impl Link {
    pub fn new(select: impl Into<Select>) -> Self {
        Self {
            attr: Attr::new(select, "href"),
        }
    }
}

impl Filter for Link {
    type Output = String;

    fn apply(&self, scope: &Scope<'_>) -> Result<String, FilterError> {
        let href = self.attr.apply(scope)?;
        match scope.url().and_then(|base| base.join(&href).ok()) {
            Some(absolute) => Ok(absolute.to_string()),
            None => Ok(href),
        }
    }
}

// ── Form values ──────────────────────────────────────────────────────────────

/// Current value of a form control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    /// Checkbox or radio state.
    Checked(bool),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text.as_str()),
            FieldValue::Checked(_) => None,
        }
    }
}

/// Value of the first selected form control.
///
/// Checkboxes and radios give their checked state, text-like inputs their
/// `value`, textareas their content, selects the visible text of the selected
/// options (the first option when none is selected).
#[derive(Debug, Clone)]
pub struct FormValue {
    select: Select,
}

impl FormValue {
    pub fn new(select: impl Into<Select>) -> Self {
        Self {
            select: select.into(),
        }
    }
}

impl Filter for FormValue {
    type Output = FieldValue;

    fn apply(&self, scope: &Scope<'_>) -> Result<FieldValue, FilterError> {
        let el = first(&self.select, scope)?;
        let node = el.value();
        match node.name() {
            "input" => {
                let kind = node.attr("type").unwrap_or("").to_ascii_lowercase();
                match kind.as_str() {
                    "radio" | "checkbox" => Ok(FieldValue::Checked(node.attr("checked").is_some())),
                    "" | "text" | "email" | "search" | "tel" | "url" | "hidden" | "password"
                    | "number" => node
                        .attr("value")
                        .map(|v| FieldValue::Text(v.to_string()))
                        .ok_or_else(|| FilterError::AttributeNotFound {
                            selector: self.select.describe(),
                            attr: "value".to_string(),
                        }),
                    other => Err(FilterError::UnrecognizedElement(format!(
                        "input type={other}"
                    ))),
                }
            }
            "textarea" => Ok(FieldValue::Text(el.text().collect())),
            "select" => {
                let selected = parse_selector("option[selected]")?;
                let mut options: Vec<ElementRef<'_>> = el.select(&selected).collect();
                if options.is_empty() {
                    let any = parse_selector("option")?;
                    options.extend(el.select(&any).take(1));
                }
                let texts: Vec<String> = options
                    .iter()
                    .map(|o| clean_text(&o.text().collect::<String>()))
                    .collect();
                Ok(FieldValue::Text(texts.join("\n")))
            }
            other => Err(FilterError::UnrecognizedElement(other.to_string())),
        }
    }
}

fn parse_selector(source: &str) -> Result<Selector, FilterError> {
    Selector::parse(source).map_err(|_| FilterError::InvalidSelector(source.to_string()))
}

// ── Environment and constants ────────────────────────────────────────────────

/// Value passed by the calling flow through the extraction [`Env`](super::Env).
#[derive(Debug, Clone)]
pub struct FromEnv {
    key: String,
}

impl FromEnv {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl Filter for FromEnv {
    type Output = String;

    fn apply(&self, scope: &Scope<'_>) -> Result<String, FilterError> {
        scope
            .env()
            .get(&self.key)
            .map(str::to_string)
            .ok_or_else(|| FilterError::EnvMissing(self.key.clone()))
    }
}

/// Always yields the same value.
#[derive(Debug, Clone)]
pub struct Const<T> {
    value: T,
}

impl<T: Clone> Const<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Clone> Filter for Const<T> {
    type Output = T;

    fn apply(&self, _scope: &Scope<'_>) -> Result<T, FilterError> {
        Ok(self.value.clone())
    }
}

// ── Pattern filters ──────────────────────────────────────────────────────────

/// Regex extraction over the text produced by `inner`.
///
/// Without a template the first participating capture group is returned (the
/// whole match when the pattern has no group). Templates use the `regex`
/// crate syntax: `$1`, `${name}`.
#[derive(Debug, Clone)]
pub struct Regexp<F> {
    inner: F,
    pattern: String,
    regex: Option<Regex>,
    template: Option<String>,
    nth: usize,
}

impl<F> Regexp<F> {
    pub fn new(inner: F, pattern: &str) -> Self {
        Self {
            inner,
            pattern: pattern.to_string(),
            regex: Regex::new(pattern).ok(),
            template: None,
            nth: 0,
        }
    }

    pub fn template(mut self, template: &str) -> Self {
        self.template = Some(template.to_string());
        self
    }

    /// Use the n-th match (0-based) instead of the first.
    pub fn nth(mut self, nth: usize) -> Self {
        self.nth = nth;
        self
    }
}

impl<F: Filter<Output = String>> Filter for Regexp<F> {
    type Output = String;

    fn apply(&self, scope: &Scope<'_>) -> Result<String, FilterError> {
        let regex = self
            .regex
            .as_ref()
            .ok_or_else(|| FilterError::InvalidRegex(self.pattern.clone()))?;
        let text = self.inner.apply(scope)?;

        let caps = regex
            .captures_iter(&text)
            .nth(self.nth)
            .ok_or_else(|| FilterError::NoMatch {
                pattern: self.pattern.clone(),
                text: text.clone(),
            })?;

        match &self.template {
            Some(template) => {
                let mut out = String::new();
                caps.expand(template, &mut out);
                Ok(out)
            }
            None => Ok(caps
                .iter()
                .skip(1)
                .flatten()
                .next()
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()),
        }
    }
}

/// Lookup table from text to a typed value.
#[derive(Debug, Clone)]
pub struct MapValue<F, V> {
    inner: F,
    table: Vec<(String, V)>,
    contains: bool,
    ignore_case: bool,
}

impl<F, V> MapValue<F, V> {
    pub fn new<S, I>(inner: F, table: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, V)>,
    {
        Self {
            inner,
            table: table.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            contains: false,
            ignore_case: false,
        }
    }

    /// Match when the key occurs anywhere in the text; first key wins.
    pub fn contains(mut self) -> Self {
        self.contains = true;
        self
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }
}

impl<F, V> Filter for MapValue<F, V>
where
    F: Filter<Output = String>,
    V: Clone,
{
    type Output = V;

    fn apply(&self, scope: &Scope<'_>) -> Result<V, FilterError> {
        let text = self.inner.apply(scope)?;
        let fold = |s: &str| {
            if self.ignore_case {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        };
        let haystack = fold(&text);

        self.table
            .iter()
            .find(|(key, _)| {
                let key = fold(key);
                if self.contains {
                    haystack.contains(&key)
                } else {
                    haystack == key
                }
            })
            .map(|(_, value)| value.clone())
            .ok_or(FilterError::UnknownValue(text))
    }
}

/// Lower-cased output of `inner`.
#[derive(Debug, Clone)]
pub struct Lower<F> {
    inner: F,
}

impl<F> Lower<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: Filter<Output = String>> Filter for Lower<F> {
    type Output = String;

    fn apply(&self, scope: &Scope<'_>) -> Result<String, FilterError> {
        self.inner.apply(scope).map(|s| s.to_lowercase())
    }
}
