use std::fmt;
use thiserror::Error;

/// Fatal errors: any of these aborts the archive run for the source.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Unknown source: {0} (try `list`)")]
    UnknownSource(String),

    #[error("Could not load listing page {url}: {cause}")]
    Listing { url: String, cause: FailureCause },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Expected `{selector}` on {url} but it is missing; the page layout has probably changed")]
    MissingElement { selector: String, url: String },

    #[error("No links discovered on {0}")]
    NoLinks(String),

    #[error("Run cannot move from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

/// Why a single item could not be archived. Recorded and counted, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    Network(String),
    Timeout,
    HttpStatus(u16),
    Body(String),
    Io(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Network(msg) => write!(f, "network error: {}", non_empty(msg)),
            FailureCause::Timeout => f.write_str("request timed out"),
            FailureCause::HttpStatus(code) => write!(f, "HTTP status {}", code),
            FailureCause::Body(msg) => write!(f, "transfer interrupted: {}", non_empty(msg)),
            FailureCause::Io(msg) => write!(f, "could not write file: {}", non_empty(msg)),
        }
    }
}

fn non_empty(msg: &str) -> &str {
    if msg.trim().is_empty() {
        "unknown"
    } else {
        msg
    }
}

impl From<reqwest::Error> for FailureCause {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FailureCause::Timeout
        } else if let Some(status) = e.status() {
            FailureCause::HttpStatus(status.as_u16())
        } else if e.is_body() || e.is_decode() {
            FailureCause::Body(e.to_string())
        } else {
            FailureCause::Network(e.to_string())
        }
    }
}

impl From<std::io::Error> for FailureCause {
    fn from(e: std::io::Error) -> Self {
        FailureCause::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causes_always_describe_themselves() {
        let causes = [
            FailureCause::Network(String::new()),
            FailureCause::Timeout,
            FailureCause::HttpStatus(404),
            FailureCause::Body("  ".into()),
            FailureCause::Io("disk full".into()),
        ];
        for cause in causes {
            let text = cause.to_string();
            assert!(!text.trim().is_empty());
            assert!(!text.ends_with(": "), "{text}");
        }
        assert_eq!(FailureCause::HttpStatus(503).to_string(), "HTTP status 503");
    }
}
