use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ufc::VariationType;

/// Result type used by the bundled evaluation core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the bundled evaluation core while fetching configuration or delivering
/// events.
///
/// These never surface through assignment calls. They are logged and, where relevant, affect
/// readiness reported by [`Client::wait_for_initialization`](crate::Client::wait_for_initialization).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// `base_url` does not parse as a URL.
    #[error("base_url is not a valid URL")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The server rejected the API key.
    #[error("server rejected the api_key (401 Unauthorized)")]
    Unauthorized,

    /// Response body is not a valid configuration document.
    #[error("configuration response could not be parsed")]
    ConfigurationParse(#[source] Arc<serde_json::Error>),

    /// A background thread died from a panic.
    #[error("background thread panicked")]
    ThreadPanicked,

    #[allow(missing_docs)]
    #[error(transparent)]
    Io(Arc<std::io::Error>),

    /// Transport failure, retried by the poller.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ConfigurationParse(Arc::new(value))
    }
}

/// Why no assignment was produced. Callers of the typed getters receive their default instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EvaluationError {
    /// No configuration yet.
    #[error("configuration has not been fetched yet")]
    ConfigurationMissing,

    /// No flag with this key.
    #[error("flag is not in the configuration")]
    FlagNotFound,

    #[allow(missing_docs)]
    #[error("flag is disabled")]
    FlagDisabled,

    /// Every allocation skipped the subject.
    #[error("no allocation matched the subject")]
    NoAllocation,

    /// Requested flag has a different type than the caller expects.
    #[error("flag type mismatch: requested {expected:?}, flag is {found:?}")]
    TypeMismatch {
        /// Type requested by the caller.
        expected: VariationType,
        /// Type of the flag or of the value produced by the core.
        found: VariationType,
    },

    /// The flag uses a shape this SDK version does not understand.
    #[error("flag configuration is not understood by this SDK version")]
    ConfigurationParseError,

    /// The flag references variations that do not exist or have the wrong type.
    #[error("flag configuration is inconsistent")]
    ConfigurationError,
}

impl EvaluationError {
    /// `true` for conditions expected during normal operation, which are not worth a warning.
    pub fn is_normal(self) -> bool {
        match self {
            EvaluationError::ConfigurationMissing
            | EvaluationError::FlagNotFound
            | EvaluationError::FlagDisabled
            | EvaluationError::NoAllocation => true,

            EvaluationError::TypeMismatch { .. }
            | EvaluationError::ConfigurationParseError
            | EvaluationError::ConfigurationError => false,
        }
    }
}

/// Invalid [`ClientConfig`](crate::ClientConfig). This is the only error that
/// [`Client::init`](crate::Client::init) returns to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigValidationError {
    /// API key is empty or whitespace.
    #[error("invalid value for api_key: cannot be blank")]
    BlankApiKey,

    /// Base URL is not a valid absolute URL.
    #[error("invalid value for base_url")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Poll interval is set to zero.
    #[error("invalid value for poll_interval: must be greater than zero")]
    ZeroPollInterval,

    /// Jitter is larger than the poll interval it's applied to.
    #[error("invalid value for poll_jitter: {jitter:?} exceeds poll_interval {interval:?}")]
    JitterExceedsInterval {
        /// Configured poll interval.
        interval: Duration,
        /// Configured poll jitter.
        jitter: Duration,
    },

    /// Event ingestion URL is not a valid absolute URL.
    #[error("invalid value for event_ingestion_url")]
    InvalidEventIngestionUrl(#[source] url::ParseError),
}
