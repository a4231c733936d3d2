//! Error taxonomy for navigation and extraction.

/// Failure of a single filter or element mapper.
///
/// Filters report what they were looking for; the page identity is attached
/// later by [`BrowserError::Extraction`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("no element matches {0}")]
    NotFound(String),

    #[error("element {selector} has no attribute {attr}")]
    AttributeNotFound { selector: String, attr: String },

    #[error("pattern {pattern} does not match {text:?}")]
    NoMatch { pattern: String, text: String },

    #[error("not a decimal number: {0:?}")]
    InvalidDecimal(String),

    #[error("not a date: {0:?}")]
    InvalidDate(String),

    #[error("column {0} not found in table header")]
    ColumnNotFound(String),

    #[error("unknown value {0:?}")]
    UnknownValue(String),

    #[error("environment has no value for {0}")]
    EnvMissing(String),

    #[error("invalid CSS selector {0}")]
    InvalidSelector(String),

    #[error("invalid regular expression {0}")]
    InvalidRegex(String),

    #[error("unrecognized form element <{0}>")]
    UnrecognizedElement(String),

    /// Raised by an item builder to drop the current item.
    #[error("item skipped")]
    SkipItem,
}

/// Errors surfaced by the browser engine to the calling flow.
#[derive(thiserror::Error, Debug)]
pub enum BrowserError {
    #[error("no route claims {url} (HTTP {status})")]
    UnhandledPage { url: String, status: u16 },

    #[error("extraction failed on {page} at {url}: {source}")]
    Extraction {
        page: String,
        url: String,
        #[source]
        source: FilterError,
    },

    #[error("incorrect credentials: {0}")]
    IncorrectPassword(String),

    #[error("access denied: {0}")]
    Banned(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("pagination stalled: next page {url} was already visited")]
    PaginationStall { url: String },

    #[error("more than {limit} chained page loads starting from {url}")]
    LoadChainTooLong { url: String, limit: usize },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid URL pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("cannot build a URL for {route}: {reason}")]
    UrlBuild { route: String, reason: String },

    #[error("form not found: {0}")]
    FormNotFound(String),

    #[error("no page loaded yet")]
    NoPage,

    #[error("replay cache has no response for {method} {url}")]
    CacheMiss { method: String, url: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BrowserError {
    /// Whether a flow may retry the operation after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrowserError::Unavailable(_) | BrowserError::Timeout { .. } | BrowserError::Transport { .. }
        )
    }

    /// Whether the error means the credentials themselves are wrong or refused.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, BrowserError::IncorrectPassword(_) | BrowserError::Banned(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BrowserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BrowserError::Unavailable("maintenance".into()).is_transient());
        assert!(BrowserError::Timeout {
            url: "https://bank.test/".into()
        }
        .is_transient());
        assert!(!BrowserError::IncorrectPassword("bad".into()).is_transient());
        assert!(!BrowserError::PaginationStall {
            url: "https://bank.test/p2".into()
        }
        .is_transient());
    }

    #[test]
    fn test_credential_failures_are_distinct() {
        assert!(BrowserError::IncorrectPassword(String::new()).is_credential_failure());
        assert!(BrowserError::Banned(String::new()).is_credential_failure());
        assert!(!BrowserError::Unavailable(String::new()).is_credential_failure());
    }

    #[test]
    fn test_extraction_message_names_page() {
        let err = BrowserError::Extraction {
            page: "History".into(),
            url: "https://bank.test/history".into(),
            source: FilterError::ColumnNotFound("amount".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("History"));
        assert!(msg.contains("https://bank.test/history"));
        assert!(msg.contains("amount"));
    }
}
