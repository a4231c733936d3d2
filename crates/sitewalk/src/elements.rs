//! Element mappers: repeated markup (list entries, table rows) to items.
//!
//! A mapper selects the item elements under a scope and runs a builder on
//! each of them. Builders are ordinary closures composed of
//! [filters](crate::filters); returning [`FilterError::SkipItem`] drops the
//! current item, any other error is yielded in its place so the caller
//! decides whether one bad row aborts the extraction.

use crate::error::FilterError;
use crate::filters::{clean_text, CssPath, Scope};
use scraper::ElementRef;
use std::collections::HashMap;
use std::sync::Arc;

/// Lazily produced items of one mapper run.
pub type Items<'a, T> = Box<dyn Iterator<Item = Result<T, FilterError>> + 'a>;

type Builder<T> = Box<dyn Fn(&Scope<'_>) -> Result<T, FilterError> + Send + Sync>;
type Condition = Box<dyn Fn(&Scope<'_>) -> bool + Send + Sync>;

/// Something that turns a scope into a sequence of items.
pub trait ElementMapper {
    type Item;

    fn items<'a>(&'a self, scope: Scope<'a>) -> Result<Items<'a, Self::Item>, FilterError>;
}

/// Column key to cell index, resolved from a table header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    pub fn get(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn map_elements<'a, T>(
    elements: Vec<ElementRef<'a>>,
    scope: Scope<'a>,
    build: &'a Builder<T>,
    condition: Option<&'a Condition>,
) -> Items<'a, T>
where
    T: 'a,
{
    Box::new(elements.into_iter().filter_map(move |el| {
        let item_scope = scope.child(el);
        if let Some(keep) = condition {
            if !keep(&item_scope) {
                return None;
            }
        }
        match build(&item_scope) {
            Err(FilterError::SkipItem) => None,
            other => Some(other),
        }
    }))
}

// ── Lists ────────────────────────────────────────────────────────────────────

/// One item per element matching `item_css`.
pub struct ListElement<T> {
    item: CssPath,
    build: Builder<T>,
    condition: Option<Condition>,
}

impl<T> ListElement<T> {
    pub fn new(
        item_css: &str,
        build: impl Fn(&Scope<'_>) -> Result<T, FilterError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            item: CssPath::new(item_css),
            build: Box::new(build),
            condition: None,
        }
    }

    /// Only build items whose element satisfies `keep`.
    pub fn condition(mut self, keep: impl Fn(&Scope<'_>) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Box::new(keep));
        self
    }
}

impl<T> ElementMapper for ListElement<T> {
    type Item = T;

    fn items<'a>(&'a self, scope: Scope<'a>) -> Result<Items<'a, T>, FilterError> {
        let elements: Vec<ElementRef<'a>> = scope.element().select(self.item.selector()?).collect();
        Ok(map_elements(
            elements,
            scope,
            &self.build,
            self.condition.as_ref(),
        ))
    }
}

// ── Tables ───────────────────────────────────────────────────────────────────

/// One item per row, with cells addressed by column key.
///
/// Each declared column lists the header labels it may appear under; labels
/// are compared after whitespace normalization, ignoring case. Header cells
/// spanning several columns shift the following indexes by their `colspan`.
pub struct TableElement<T> {
    head: CssPath,
    item: CssPath,
    columns: Vec<(String, Vec<String>)>,
    build: Builder<T>,
    condition: Option<Condition>,
}

impl<T> TableElement<T> {
    pub fn new(
        head_css: &str,
        item_css: &str,
        build: impl Fn(&Scope<'_>) -> Result<T, FilterError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            head: CssPath::new(head_css),
            item: CssPath::new(item_css),
            columns: Vec::new(),
            build: Box::new(build),
            condition: None,
        }
    }

    pub fn column(mut self, key: &str, labels: &[&str]) -> Self {
        self.columns.push((
            key.to_string(),
            labels.iter().map(|l| clean_text(l).to_lowercase()).collect(),
        ));
        self
    }

    pub fn condition(mut self, keep: impl Fn(&Scope<'_>) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Box::new(keep));
        self
    }

    fn resolve_columns(&self, heads: &[ElementRef<'_>]) -> Result<Columns, FilterError> {
        let mut index = HashMap::new();
        let mut position = 0usize;
        for head in heads {
            let label = clean_text(&head.text().collect::<String>()).to_lowercase();
            for (key, labels) in &self.columns {
                if !index.contains_key(key) && labels.iter().any(|l| *l == label) {
                    index.insert(key.clone(), position);
                }
            }
            let span = head
                .value()
                .attr("colspan")
                .and_then(|s| s.trim().parse::<usize>().ok())
                .unwrap_or(1)
                .max(1);
            position += span;
        }

        if let Some((missing, _)) = self.columns.iter().find(|(key, _)| !index.contains_key(key)) {
            return Err(FilterError::ColumnNotFound(missing.clone()));
        }
        Ok(Columns { index })
    }
}

impl<T> ElementMapper for TableElement<T> {
    type Item = T;

    fn items<'a>(&'a self, scope: Scope<'a>) -> Result<Items<'a, T>, FilterError> {
        let root = scope.element();
        let heads: Vec<ElementRef<'a>> = root.select(self.head.selector()?).collect();
        let rows: Vec<ElementRef<'a>> = root.select(self.item.selector()?).collect();

        // Empty statements are often rendered without any table at all
        if heads.is_empty() && rows.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }

        let columns = Arc::new(self.resolve_columns(&heads)?);
        tracing::trace!(columns = columns.len(), rows = rows.len(), "table mapped");
        Ok(map_elements(
            rows,
            scope.with_columns(columns),
            &self.build,
            self.condition.as_ref(),
        ))
    }
}
