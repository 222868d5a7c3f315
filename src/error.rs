//! Error taxonomy for the upstream core.
//!
//! # Design Decisions
//! - One error type flows from servers through balancers to the facade
//! - Only the HTTP boundary turns an error into a status code (see `http::response`)
//! - Panics recovered from health probes become `ProbePanicked`, never raw payloads

use std::any::Any;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed source error from a backend transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while forwarding to, or probing, upstream servers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every server is offline or the registry is empty.
    #[error("no available servers")]
    NoAvailableServers,

    /// A forward or probe exceeded its deadline.
    #[error("deadline exceeded")]
    Timeout,

    /// The caller canceled the request scope.
    #[error("request canceled")]
    Canceled,

    /// Network or protocol failure talking to a backend.
    #[error("forwarding to server `{server}` failed: {source}")]
    Forward {
        server: String,
        #[source]
        source: BoxError,
    },

    /// A health probe reported the server as unhealthy.
    #[error("health probe for server `{server}` failed: {reason}")]
    Probe { server: String, reason: String },

    /// A health probe panicked; the payload has been reduced to a message.
    #[error("health probe for server `{server}` panicked: {message}")]
    ProbePanicked { server: String, message: String },

    /// No balancer builder is registered under this policy name.
    #[error("unknown balancer policy `{0}`")]
    UnknownPolicy(String),

    /// An updater with the same name is already registered.
    #[error("updater `{0}` is already registered")]
    DuplicateUpdater(String),

    /// A server could not be constructed from its definition.
    #[error("invalid server: {0}")]
    InvalidServer(String),
}

/// Coarse classification of an [`Error`], used by boundary mappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoAvailableServers,
    Timeout,
    Canceled,
    Forward,
    HealthCheck,
    Config,
}

impl Error {
    /// Wrap a transport error from `server`.
    pub fn forward(server: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Forward {
            server: server.into(),
            source: source.into(),
        }
    }

    /// Build a probe failure for `server`.
    pub fn probe(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Probe {
            server: server.into(),
            reason: reason.into(),
        }
    }

    /// Convert a recovered panic payload into a typed error.
    pub fn from_panic(server: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Error::ProbePanicked {
            server: server.into(),
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoAvailableServers => ErrorKind::NoAvailableServers,
            Error::Timeout => ErrorKind::Timeout,
            Error::Canceled => ErrorKind::Canceled,
            Error::Forward { .. } => ErrorKind::Forward,
            Error::Probe { .. } | Error::ProbePanicked { .. } => ErrorKind::HealthCheck,
            Error::UnknownPolicy(_) | Error::DuplicateUpdater(_) | Error::InvalidServer(_) => {
                ErrorKind::Config
            }
        }
    }

    /// True when another attempt on a different server cannot succeed.
    ///
    /// A server-side `Timeout` is not terminal; the request deadline is
    /// checked separately.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Canceled | Error::NoAvailableServers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_classification() {
        let err = Error::from_panic("s1", Box::new("boom"));
        match err {
            Error::ProbePanicked { server, message } => {
                assert_eq!(server, "s1");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = Error::from_panic("s2", Box::new(String::from("owned boom")));
        assert!(err.to_string().contains("owned boom"));

        let err = Error::from_panic("s3", Box::new(42u32));
        assert!(err.to_string().contains("non-string panic payload"));
        assert_eq!(err.kind(), ErrorKind::HealthCheck);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::NoAvailableServers.kind(), ErrorKind::NoAvailableServers);
        assert_eq!(Error::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(
            Error::forward("s1", "connection refused").kind(),
            ErrorKind::Forward
        );
        assert!(Error::Canceled.is_terminal());
        assert!(Error::NoAvailableServers.is_terminal());
        assert!(!Error::Timeout.is_terminal());
        assert!(!Error::forward("s1", "reset").is_terminal());
    }
}
