//! Error types for relaychat.
//!
//! Every layer (adapters, relay codec, persistence, session) reports failures through the
//! single [`Error`] enum defined here.  The session state machine is the only component that
//! decides how an error is surfaced to the user; see [`Error::is_retryable`] and
//! [`Error::is_blocking`].

use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;
use std::sync::Arc;

/// The main error type for relaychat.
#[derive(Clone, Debug)]
pub enum Error {
    /// The model identifier is not in the static model registry.
    UnknownModel {
        /// The identifier that failed lookup.
        model: String,
    },

    /// The request did not pass the authentication gate.
    Unauthorized {
        /// Human-readable error message.
        message: String,
    },

    /// The upstream provider or the relay transport failed mid-stream.
    UpstreamTransport {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A `delta` payload failed to decode against the Delta shape.
    MalformedDelta {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// Persisted state could not be read or failed validation.
    PersistedStateCorrupt {
        /// The store key that held the bad value.
        key: String,
        /// Human-readable error message.
        message: String,
    },

    /// A submission arrived while a turn was still streaming.
    TurnInFlight,

    /// A submission arrived while the last user message is still unanswered.
    AwaitingRetry,

    /// Retry was requested but the log holds no user message to resubmit.
    NothingToRetry,

    /// A provider or endpoint was not configured.
    Configuration {
        /// Human-readable error message.
        message: String,
    },

    /// The upstream returned a non-success HTTP status.
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Error during JSON serialization or deserialization.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },

    /// HTTP client error.
    HttpClient {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A URL parsing or manipulation error.
    Url {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<url::ParseError>,
    },

    /// Encoding/decoding error.
    Encoding {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new unknown model error.
    pub fn unknown_model(model: impl Into<String>) -> Self {
        Error::UnknownModel {
            model: model.into(),
        }
    }

    /// Creates a new unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Error::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new upstream transport error.
    pub fn upstream(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::UpstreamTransport {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new malformed delta error.
    pub fn malformed_delta(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::MalformedDelta {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new persisted-state error.
    pub fn persisted_state_corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PersistedStateCorrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new API error.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new HTTP client error.
    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new URL error.
    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    /// Creates a new encoding error.
    pub fn encoding(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Encoding {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Returns true if this error is an unknown model.
    pub fn is_unknown_model(&self) -> bool {
        matches!(self, Error::UnknownModel { .. })
    }

    /// Returns true if this error came from the authentication gate.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized { .. })
    }

    /// Returns true if this error is an upstream transport failure.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::UpstreamTransport { .. })
    }

    /// Returns true if this error is a malformed delta.
    pub fn is_malformed_delta(&self) -> bool {
        matches!(self, Error::MalformedDelta { .. })
    }

    /// Returns true if this error is a corrupt persisted value.
    pub fn is_persisted_state_corrupt(&self) -> bool {
        matches!(self, Error::PersistedStateCorrupt { .. })
    }

    /// Returns true if the submission was rejected because a turn is streaming.
    pub fn is_turn_in_flight(&self) -> bool {
        matches!(self, Error::TurnInFlight)
    }

    /// Returns true if a failed turn may be resubmitted with `retry`.
    ///
    /// Transport-level failures and malformed deltas are retryable; unknown models and
    /// authorization failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api { status_code, .. } => {
                matches!(status_code, 408 | 409 | 429 | 500..=599)
            }
            Error::UpstreamTransport { .. } => true,
            Error::MalformedDelta { .. } => true,
            Error::HttpClient { .. } => true,
            Error::Encoding { .. } => true,
            Error::Serialization { .. } => true,
            Error::Io { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this error is terminal for its request and is shown as a blocking state.
    pub fn is_blocking(&self) -> bool {
        match self {
            Error::UnknownModel { .. } => true,
            Error::Unauthorized { .. } => true,
            Error::Configuration { .. } => true,
            Error::Url { .. } => true,
            Error::Api { status_code, .. } => matches!(status_code, 400 | 401 | 403 | 404),
            _ => false,
        }
    }

    /// Returns the HTTP status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status_code, .. } => Some(*status_code),
            Error::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownModel { model } => {
                write!(f, "Unknown model: {model}")
            }
            Error::Unauthorized { message } => {
                write!(f, "Unauthorized: {message}")
            }
            Error::UpstreamTransport { message, .. } => {
                write!(f, "Upstream transport error: {message}")
            }
            Error::MalformedDelta { message, .. } => {
                write!(f, "Malformed delta: {message}")
            }
            Error::PersistedStateCorrupt { key, message } => {
                write!(f, "Persisted state corrupt ({key}): {message}")
            }
            Error::TurnInFlight => {
                write!(f, "A response is still streaming")
            }
            Error::AwaitingRetry => {
                write!(f, "The last message has no response; retry or dismiss it first")
            }
            Error::NothingToRetry => {
                write!(f, "Nothing to retry")
            }
            Error::Configuration { message } => {
                write!(f, "Configuration error: {message}")
            }
            Error::Api {
                status_code,
                message,
            } => {
                write!(f, "API error ({status_code}): {message}")
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
            Error::HttpClient { message, .. } => {
                write!(f, "HTTP client error: {message}")
            }
            Error::Url { message, .. } => {
                write!(f, "URL error: {message}")
            }
            Error::Encoding { message, .. } => {
                write!(f, "Encoding error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::UpstreamTransport { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::MalformedDelta { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Serialization { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source),
            Error::HttpClient { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            Error::Encoding { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::encoding(format!("UTF-8 error: {err}"), Some(Box::new(err)))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_body() || err.is_decode() {
            Error::upstream(format!("{err}"), Some(Box::new(err)))
        } else {
            Error::http_client(format!("Request failed: {err}"), Some(Box::new(err)))
        }
    }
}

/// A specialized Result type for relaychat operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Error::unknown_model("gpt-9").is_blocking());
        assert!(!Error::unknown_model("gpt-9").is_retryable());
        assert!(Error::unauthorized("no credentials").is_blocking());
        assert!(Error::upstream("reset", None).is_retryable());
        assert!(!Error::upstream("reset", None).is_blocking());
        assert!(Error::malformed_delta("bad", None).is_retryable());
        assert!(Error::api(503, "overloaded").is_retryable());
        assert!(Error::api(401, "nope").is_blocking());
        assert!(!Error::TurnInFlight.is_retryable());
    }

    #[test]
    fn display_names_the_model() {
        let err = Error::unknown_model("gpt-9");
        assert_eq!(err.to_string(), "Unknown model: gpt-9");
    }

    #[test]
    fn json_errors_are_serialization_errors() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(error::Error::source(&err).is_some());
    }

    #[test]
    fn unauthorized_maps_to_401() {
        assert_eq!(Error::unauthorized("x").status_code(), Some(401));
        assert_eq!(Error::api(502, "x").status_code(), Some(502));
        assert_eq!(Error::TurnInFlight.status_code(), None);
    }
}
