//! Endpoint fallback for the download stage.
//!
//! Candidate endpoints are tried strictly in order, each at most once per
//! run, with no backoff between attempts. The attempt index and the last
//! failure classification live on the selector itself so the retry state is
//! inspectable and unit-testable.

use crate::Error;

/// Classification of a failed download attempt.
///
/// Both classes trigger fallback to the next endpoint; the distinction only
/// sharpens the terminal error message when the list is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport error, status 0, or an ambiguous partial-content status.
    /// Looks like a CORS or network-level rejection.
    NetworkLike,
    /// Any other non-success HTTP status.
    Http(u16),
    /// No completion within the per-attempt timeout.
    Timeout,
}

impl FailureKind {
    /// Classifies a failure from the status code the channel reported.
    ///
    /// Status 0 and 206 read as network/CORS-like; a missing status means
    /// the transport failed before producing one.
    pub fn classify(status: Option<u16>) -> Self {
        match status {
            None | Some(0) | Some(206) => FailureKind::NetworkLike,
            Some(code) => FailureKind::Http(code),
        }
    }
}

/// Sequential trial of candidate download endpoints.
#[derive(Debug)]
pub struct EndpointSelector {
    endpoints: Vec<String>,
    next_index: usize,
    last_failure: Option<FailureKind>,
}

impl EndpointSelector {
    pub fn new(endpoints: &[String]) -> Self {
        Self {
            endpoints: endpoints.to_vec(),
            next_index: 0,
            last_failure: None,
        }
    }

    /// Yields the next candidate as `(attempt_index, url)`, or `None` when
    /// the list is exhausted. Each endpoint is yielded at most once.
    pub fn next_endpoint(&mut self) -> Option<(usize, String)> {
        let index = self.next_index;
        let url = self.endpoints.get(index)?.clone();
        self.next_index += 1;
        Some((index, url))
    }

    /// Records the outcome of the most recent attempt.
    pub fn record_failure(&mut self, kind: FailureKind) {
        self.last_failure = Some(kind);
    }

    /// Number of attempts handed out so far.
    pub fn attempts_made(&self) -> usize {
        self.next_index
    }

    /// Terminal error once every candidate failed. Carries a CORS hint when
    /// the most recent failure looked network-level; timeouts do not.
    pub fn exhaustion_error(&self) -> Error {
        Error::EndpointsExhausted {
            cors_likely: matches!(self.last_failure, Some(FailureKind::NetworkLike)),
        }
    }
}
