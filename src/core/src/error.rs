use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Broker-level errors.
#[derive(Debug, Error)]
pub enum VentError {
    #[error("handler for `{key}` must be callable")]
    InvalidHandler { key: String },

    #[error("handler for `{key}` failed: {source}")]
    Handler { key: String, source: HandlerError },

    #[error("request `{key}` rejected: {source}")]
    Rejected { key: String, source: HandlerError },

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T, E = VentError> = std::result::Result<T, E>;

/// Failure raised by a subscriber, either synchronously or from a deferred reply.
#[derive(Debug)]
pub struct HandlerError {
    message: String,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it reachable through `source()`.
    pub fn wrap<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for HandlerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = HandlerError::wrap(io);
        assert_eq!(err.message(), "disk gone");
        assert!(err.source().is_some());
        assert!(HandlerError::new("plain").source().is_none());
    }

    #[test]
    fn broker_error_messages_name_the_key() {
        let err = VentError::Handler {
            key: "orders.created".into(),
            source: "boom".into(),
        };
        assert_eq!(err.to_string(), "handler for `orders.created` failed: boom");
        assert!(err.source().is_some());

        let err = VentError::InvalidHandler { key: "x".into() };
        assert_eq!(err.to_string(), "handler for `x` must be callable");
    }
}
