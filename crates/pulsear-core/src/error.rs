//! Uniform failure classification.
//!
//! Every error type in this crate maps onto one of four kinds so that the
//! surrounding layer (HTTP, CLI, test harness) can produce uniform responses
//! without inspecting individual variants. "Unknown patient" is NOT here:
//! it is an expected outcome and is represented as a value
//! ([`MatchOutcome::Unknown`](crate::matcher::MatchOutcome)).

use std::fmt;

/// Coarse classification of a failure, shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller or upstream supplied malformed data. Never retried.
    InvalidInput,
    /// A referenced record does not exist. Normal outcome for lookups.
    NotFound,
    /// An external dependency failed or timed out. The generative tier
    /// retries once, everything else degrades immediately.
    UpstreamUnavailable,
    /// A registry (re)load was rejected; the previous snapshot stays active.
    LoadError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "invalid_input"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::UpstreamUnavailable => write!(f, "upstream_unavailable"),
            ErrorKind::LoadError => write!(f, "load_error"),
        }
    }
}
