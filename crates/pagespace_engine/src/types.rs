use std::collections::BTreeSet;

use serde::Deserialize;

/// One published page as listed by the pages API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageDescriptor {
    pub url: String,
    #[serde(default)]
    pub name: String,
}

/// Raw rendered page as served by the content host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub html: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransformResult {
    pub html: String,
    /// Resource references found in the page, recorded before rewriting.
    pub resources: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "export cancelled")
    }
}

/// Category of a failed request, for logs and for tests to match on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureKind {
    #[error("unusable url")]
    InvalidUrl,
    #[error("host answered {0}")]
    HttpStatus(u16),
    #[error("request timed out")]
    Timeout,
    #[error("too many redirects")]
    RedirectLimitExceeded,
    #[error("body exceeds {max_bytes} bytes (got {actual:?})")]
    TooLarge { max_bytes: u64, actual: Option<u64> },
    #[error("cancelled")]
    Cancelled,
    #[error("connection failed")]
    Network,
}
