use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LitmergeError {
    /// Missing required identifiers or title; fatal for one candidate only.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Title failed the topical-relevance guard.
    #[error("Content rejected: {0}")]
    ContentRejected(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Source fetch or persistence connectivity failure. Aborts the run.
    #[error("Upstream unavailable ({service}): {message}")]
    UpstreamUnavailable { service: String, message: String },

    #[error("No results: {0}")]
    NoResults(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LitmergeError>;

/// Coarse error classification used in batch reports and run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ContentRejected,
    DimensionMismatch,
    UpstreamUnavailable,
    NoResults,
    Conflict,
    Transport,
    Parse,
    Config,
    Security,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation          => "validation",
            ErrorKind::ContentRejected     => "content_rejected",
            ErrorKind::DimensionMismatch   => "dimension_mismatch",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::NoResults           => "no_results",
            ErrorKind::Conflict            => "conflict",
            ErrorKind::Transport           => "transport",
            ErrorKind::Parse               => "parse",
            ErrorKind::Config              => "config",
            ErrorKind::Security            => "security",
            ErrorKind::Other               => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LitmergeError {
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        LitmergeError::UpstreamUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LitmergeError::Validation(_)                => ErrorKind::Validation,
            LitmergeError::ContentRejected(_)           => ErrorKind::ContentRejected,
            LitmergeError::DimensionMismatch { .. }     => ErrorKind::DimensionMismatch,
            LitmergeError::UpstreamUnavailable { .. }   => ErrorKind::UpstreamUnavailable,
            LitmergeError::NoResults(_)                 => ErrorKind::NoResults,
            LitmergeError::Conflict(_)                  => ErrorKind::Conflict,
            LitmergeError::Http(_)
            | LitmergeError::HttpStatus { .. }          => ErrorKind::Transport,
            LitmergeError::Serialization(_)
            | LitmergeError::Xml(_)                     => ErrorKind::Parse,
            LitmergeError::Config(_)                    => ErrorKind::Config,
            LitmergeError::Security(_)                  => ErrorKind::Security,
            LitmergeError::Other(_)                     => ErrorKind::Other,
        }
    }

    /// Whether this error must abort the whole run instead of one item.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, LitmergeError::UpstreamUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_upstream_is_run_fatal() {
        assert!(LitmergeError::upstream("pubmed", "connection refused").is_run_fatal());
        assert!(!LitmergeError::Validation("no ids".into()).is_run_fatal());
        assert!(!LitmergeError::ContentRejected("off topic".into()).is_run_fatal());
        assert!(!LitmergeError::NoResults("author".into()).is_run_fatal());
    }

    #[test]
    fn test_validation_and_rejection_are_distinguishable() {
        let v = LitmergeError::Validation("x".into()).kind();
        let r = LitmergeError::ContentRejected("x".into()).kind();
        assert_ne!(v, r);
        assert_eq!(r.as_str(), "content_rejected");
    }
}
