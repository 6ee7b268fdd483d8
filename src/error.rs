//! Error types for the depthlink transport.
//!
//! All errors implement `std::error::Error` and carry enough context to decide
//! whether the failing operation should be retried.
//!
//! ## Error Categories
//!
//! - **Timeout**: a request or receive exceeded its deadline
//! - **Decode**: a payload's embedded lengths disagree with its size
//! - **Connection**: a socket could not be bound or connected
//! - **Saturated**: an outbound queue hit its high-water mark
//! - **Closed**: the transport has been disposed
//! - **Config / Io**: configuration loading failures
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use depthlink::LinkError;
//!
//! let error = LinkError::connection_failed("capture host not listening");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for transport operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Connection to {endpoint} failed: {reason}")]
    Connection {
        endpoint: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Outbound queue saturated for topic '{topic}'")]
    Saturated { topic: String },

    #[error("Transport is closed")]
    Closed,

    #[error("Invalid configuration: {details}")]
    Config { details: String },

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Connection { .. } => true,
            LinkError::Timeout { .. } => true,
            LinkError::Saturated { .. } => true,
            LinkError::Decode { .. } => false,
            LinkError::Closed => false,
            LinkError::Config { .. } => false,
            LinkError::Io { .. } => false,
        }
    }

    /// Returns true for errors caused by a malformed payload.
    pub fn is_decode(&self) -> bool {
        matches!(self, LinkError::Decode { .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkError::Connection { .. } => vec![
                "Ensure the capture host is running",
                "Check host and port in the link configuration",
                "Verify no firewall blocks the request or bus port",
            ],
            LinkError::Timeout { .. } => vec![
                "Check network latency to the capture host",
                "Increase request_timeout_ms",
                "Verify the capture host is still producing frames",
            ],
            LinkError::Decode { .. } => vec![
                "Check that host and consumer run compatible versions",
                "Verify the payload byte order is little-endian",
            ],
            LinkError::Saturated { .. } => vec![
                "Raise send_high_water_mark",
                "Check whether a subscriber has stalled",
            ],
            LinkError::Closed => vec!["Create a new connection"],
            LinkError::Config { .. } => vec![
                "Check the configuration file for typos",
                "Compare against the documented defaults",
            ],
            LinkError::Io { .. } => vec![
                "Check the file exists and is readable",
                "Check file permissions",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        LinkError::Connection { endpoint: "<unknown>".to_string(), reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors caused by an I/O failure.
    pub fn connection_io(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        LinkError::Connection {
            endpoint: endpoint.into(),
            reason: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Helper constructor for decode errors.
    pub fn decode(context: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        LinkError::Config { details: details.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        LinkError::Io { path, source }
    }
}

impl From<serde_yaml_ng::Error> for LinkError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        LinkError::Config { details: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            endpoint in "[a-z0-9.]{1,20}:[0-9]{1,5}",
            context in "\\w+",
            details in ".*",
            duration_ms in 1u64..60000u64
          ) {
            let connection = LinkError::Connection {
              endpoint: endpoint.clone(),
              reason: reason.clone(),
              source: None,
            };
            let msg = connection.to_string();
            prop_assert!(msg.contains(&endpoint));
            prop_assert!(msg.contains(&reason));

            let decode = LinkError::decode(context.clone(), details.clone());
            let msg = decode.to_string();
            prop_assert!(msg.contains(&context));
            prop_assert!(msg.contains(&details));

            let timeout = LinkError::Timeout { duration: Duration::from_millis(duration_ms) };
            prop_assert!(!timeout.to_string().is_empty());
          }

          #[test]
          fn io_source_is_preserved_through_connection_errors(message in ".+") {
            let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, message.clone());
            let error = LinkError::connection_io("127.0.0.1:1", io);

            let source = std::error::Error::source(&error);
            prop_assert!(source.is_some());
            prop_assert_eq!(source.map(|s| s.to_string()), Some(message));
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<LinkError>();

        let error = LinkError::connection_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retry_classification_matches_taxonomy() {
        assert!(LinkError::Timeout { duration: Duration::from_secs(1) }.is_retryable());
        assert!(LinkError::connection_failed("refused").is_retryable());
        assert!(LinkError::Saturated { topic: "Frame".into() }.is_retryable());
        assert!(!LinkError::decode("frame", "short").is_retryable());
        assert!(!LinkError::Closed.is_retryable());

        assert!(LinkError::decode("frame", "short").is_decode());
        assert!(!LinkError::Closed.is_decode());
    }

    #[test]
    fn recovery_suggestions_are_descriptive() {
        let errors = [
            LinkError::connection_failed("test"),
            LinkError::Timeout { duration: Duration::from_secs(1) },
            LinkError::decode("camera", "bad length"),
            LinkError::config("port is zero"),
        ];

        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }
    }

    #[test]
    fn yaml_errors_become_config_errors() {
        let err = serde_yaml_ng::from_str::<u32>("not: [a number").unwrap_err();
        let converted: LinkError = err.into();
        assert!(matches!(converted, LinkError::Config { .. }));
    }
}
