use thiserror::Error;

use crate::scraper::EndpointKind;

/// A fetch that did not produce a payload.
///
/// Transient failures are retried inside the fetcher; one that reaches the
/// caller has already used up its retries.
#[derive(Debug, Clone, Error)]
pub enum FetchFailure {
    #[error("{endpoint} fetch of {url} failed after {attempts} attempts: {reason}")]
    Transient {
        endpoint: EndpointKind,
        url: String,
        status: Option<u16>,
        attempts: u32,
        reason: String,
    },
    #[error("{endpoint} fetch of {url} failed: {reason}")]
    Permanent {
        endpoint: EndpointKind,
        url: String,
        status: Option<u16>,
        reason: String,
    },
}

impl FetchFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchFailure::Transient { status, .. } | FetchFailure::Permanent { status, .. } => {
                *status
            }
        }
    }

    pub fn url(&self) -> &str {
        match self {
            FetchFailure::Transient { url, .. } | FetchFailure::Permanent { url, .. } => url,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchFailure::Transient { .. })
    }
}

/// A whole payload that could not be turned into records.
#[derive(Debug, Clone, Error)]
#[error("could not normalize {endpoint} payload: {reason}")]
pub struct NormalizationFailure {
    pub endpoint: EndpointKind,
    pub reason: String,
}

impl NormalizationFailure {
    pub fn new(endpoint: EndpointKind, reason: impl Into<String>) -> Self {
        Self { endpoint, reason: reason.into() }
    }
}

/// The only failure that aborts a profiling run.
#[derive(Debug, Error)]
pub enum FatalRunFailure {
    #[error("catalog unavailable: {0}")]
    CatalogUnreachable(FetchFailure),
    #[error("catalog unreadable: {0}")]
    CatalogUnreadable(NormalizationFailure),
}
