//! HTML form discovery and submission requests.

use crate::error::{BrowserError, Result};
use crate::http_client::{Method, Request};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Which form of a page to take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormSelector {
    Name(String),
    Id(String),
    /// Position among the page's forms, 0-based.
    Index(usize),
    Css(String),
}

impl FormSelector {
    fn describe(&self) -> String {
        match self {
            FormSelector::Name(name) => format!("form[name={name}]"),
            FormSelector::Id(id) => format!("form#{id}"),
            FormSelector::Index(i) => format!("form #{i}"),
            FormSelector::Css(css) => css.clone(),
        }
    }
}

/// A form as the page presents it, with its successful controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    action: Url,
    method: Method,
    fields: Vec<(String, String)>,
    submits: Vec<(String, String)>,
}

impl Form {
    /// Find a form in `doc`. Relative actions resolve against `page_url`; a
    /// missing or empty action submits to the page itself.
    pub fn find(doc: &Html, page_url: &Url, selector: &FormSelector) -> Result<Self> {
        let not_found = || BrowserError::FormNotFound(selector.describe());
        let css = match selector {
            FormSelector::Name(name) => format!("form[name=\"{name}\"]"),
            FormSelector::Id(id) => format!("form[id=\"{id}\"]"),
            FormSelector::Index(_) => "form".to_string(),
            FormSelector::Css(css) => css.clone(),
        };
        let sel = Selector::parse(&css).map_err(|_| not_found())?;
        let nth = match selector {
            FormSelector::Index(i) => *i,
            _ => 0,
        };
        let form = doc.select(&sel).nth(nth).ok_or_else(not_found)?;
        Ok(Self::from_element(form, page_url))
    }

    pub fn from_element(form: ElementRef<'_>, page_url: &Url) -> Self {
        let action = form
            .value()
            .attr("action")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .and_then(|a| page_url.join(a).ok())
            .unwrap_or_else(|| page_url.clone());
        let method = Method::from_form_attr(form.value().attr("method").unwrap_or("GET"));

        let field_sel = Selector::parse("input, select, textarea, button").expect("field selector is valid");
        let option_sel = Selector::parse("option").expect("option selector is valid");

        let mut fields = Vec::new();
        let mut submits = Vec::new();
        for field in form.select(&field_sel) {
            let node = field.value();
            let name = match node.attr("name") {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => continue,
            };
            if node.attr("disabled").is_some() {
                continue;
            }
            match node.name() {
                "input" => {
                    let kind = node.attr("type").unwrap_or("text").to_ascii_lowercase();
                    let value = node.attr("value").unwrap_or("").to_string();
                    match kind.as_str() {
                        "submit" | "image" => submits.push((name, value)),
                        "button" | "reset" | "file" => {}
                        "checkbox" | "radio" => {
                            if node.attr("checked").is_some() {
                                let value = node.attr("value").unwrap_or("on").to_string();
                                fields.push((name, value));
                            }
                        }
                        _ => fields.push((name, value)),
                    }
                }
                "button" => {
                    let kind = node.attr("type").unwrap_or("submit").to_ascii_lowercase();
                    if kind == "submit" {
                        submits.push((name, node.attr("value").unwrap_or("").to_string()));
                    }
                }
                "select" => {
                    let options: Vec<ElementRef<'_>> = field.select(&option_sel).collect();
                    let chosen = options
                        .iter()
                        .find(|o| o.value().attr("selected").is_some())
                        .or_else(|| options.first());
                    if let Some(option) = chosen {
                        let value = option
                            .value()
                            .attr("value")
                            .map(str::to_string)
                            .unwrap_or_else(|| option.text().collect::<String>().trim().to_string());
                        fields.push((name, value));
                    }
                }
                "textarea" => fields.push((name, field.text().collect())),
                _ => {}
            }
        }

        Self {
            action,
            method,
            fields,
            submits,
        }
    }

    pub fn action(&self) -> &Url {
        &self.action
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Named submit buttons, not sent unless [`press`](Self::press)ed.
    pub fn submits(&self) -> &[(String, String)] {
        &self.submits
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set a field, replacing its first occurrence or appending it.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
        self
    }

    /// Drop every occurrence of a field.
    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.fields.retain(|(k, _)| k != name);
        self
    }

    /// Include the named submit button in the submission.
    pub fn press(&mut self, name: &str) -> Result<&mut Self> {
        let (k, v) = self
            .submits
            .iter()
            .find(|(k, _)| k == name)
            .cloned()
            .ok_or_else(|| BrowserError::FormNotFound(format!("submit button {name}")))?;
        self.fields.push((k, v));
        Ok(self)
    }

    /// A GET submission replaces the query string of the action.
    pub fn request(&self) -> Request {
        match self.method {
            Method::Get => {
                let mut action = self.action.clone();
                action.set_query(None);
                action.set_fragment(None);
                Request::get(action.as_str()).params(self.fields.clone())
            }
            Method::Post => Request::post(self.action.as_str()).form(self.fields.clone()),
        }
    }
}
