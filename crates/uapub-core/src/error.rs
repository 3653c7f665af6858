// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error taxonomy shared by every uapub crate.
//!
//! Each crate owns its own `thiserror` enum, but all of them classify into a
//! single [`ErrorClass`] so that callers can decide on retry, containment and
//! health reporting without knowing the concrete error type.
//!
//! # Error Hierarchy
//!
//! ```text
//! GatewayError (root)
//! ├── EgressError     - Egress queue and message client failures
//! ├── EncodingError   - Notification encoding failures
//! └── Other           - Errors from protocol crates, boxed with their class
//! ```
//!
//! # Examples
//!
//! ```
//! use uapub_core::error::{Classified, EgressError, ErrorClass};
//! use std::time::Duration;
//!
//! let error = EgressError::send_timeout(Duration::from_secs(5));
//! assert_eq!(error.class(), ErrorClass::Recoverable);
//! assert!(error.class().is_retryable());
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// ErrorClass
// =============================================================================

/// Coarse classification of every error produced by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Duplicate subscription or monitored item. Never auto-resolved.
    Conflict,
    /// Unknown subscription, item, session or connection.
    NotFound,
    /// Operation not allowed in the current state (e.g. subscription not empty).
    InvalidState,
    /// Transient failure that may succeed on a later attempt.
    Recoverable,
    /// Configuration or security failure that requires operator intervention.
    Fatal,
    /// A bounded resource is full.
    ResourceExhausted,
    /// A bounded wait expired.
    Timeout,
}

impl ErrorClass {
    /// Returns `true` if operations failing with this class may be retried.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Recoverable | ErrorClass::Timeout)
    }

    /// Returns `true` if this class must be surfaced without retry.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorClass::Fatal)
    }

    /// Returns the class name for logging/metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Conflict => "conflict",
            ErrorClass::NotFound => "not_found",
            ErrorClass::InvalidState => "invalid_state",
            ErrorClass::Recoverable => "recoverable",
            ErrorClass::Fatal => "fatal",
            ErrorClass::ResourceExhausted => "resource_exhausted",
            ErrorClass::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every error type that can be classified.
pub trait Classified {
    /// Returns the error class.
    fn class(&self) -> ErrorClass;

    /// Returns `true` if the operation may be retried.
    fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

// =============================================================================
// GatewayError - Root Error Type
// =============================================================================

/// The root error type for the gateway core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Egress error.
    #[error("Egress error: {0}")]
    Egress(#[from] EgressError),

    /// Encoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// An error from another crate, carried with its classification.
    #[error("{message}")]
    Other {
        /// Classification of the wrapped error.
        class: ErrorClass,
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl GatewayError {
    /// Wraps any classified error.
    pub fn wrap<E>(error: E) -> Self
    where
        E: Classified + std::error::Error + Send + Sync + 'static,
    {
        Self::Other {
            class: error.class(),
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Returns the error type as a string for logging/metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Egress(_) => "egress",
            GatewayError::Encoding(_) => "encoding",
            GatewayError::Other { .. } => "other",
        }
    }
}

impl Classified for GatewayError {
    fn class(&self) -> ErrorClass {
        match self {
            GatewayError::Egress(e) => e.class(),
            GatewayError::Encoding(e) => e.class(),
            GatewayError::Other { class, .. } => *class,
        }
    }
}

// =============================================================================
// EgressError
// =============================================================================

/// Errors raised on the transport-facing side.
#[derive(Debug, Clone, Error)]
pub enum EgressError {
    /// The message client rejected or failed to send a message.
    #[error("Send via '{client}' failed: {message}")]
    SendFailed {
        /// Name of the message client.
        client: String,
        /// Error message.
        message: String,
    },

    /// Send did not complete in time.
    #[error("Send timed out after {duration:?}")]
    SendTimeout {
        /// The timeout duration.
        duration: Duration,
    },

    /// The message client is not available.
    #[error("Message client '{client}' is unavailable")]
    ClientUnavailable {
        /// Name of the message client.
        client: String,
    },

    /// The queue was closed.
    #[error("Egress queue is closed")]
    Closed,

    /// The queue rejected a message.
    #[error("Egress queue is full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },
}

impl EgressError {
    /// Creates a send failed error.
    pub fn send_failed(client: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SendFailed {
            client: client.into(),
            message: message.into(),
        }
    }

    /// Creates a send timeout error.
    pub fn send_timeout(duration: Duration) -> Self {
        Self::SendTimeout { duration }
    }

    /// Creates a client unavailable error.
    pub fn client_unavailable(client: impl Into<String>) -> Self {
        Self::ClientUnavailable {
            client: client.into(),
        }
    }

    /// Returns a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            EgressError::SendFailed { client, .. } => format!("메시지 전송 실패 ({})", client),
            EgressError::SendTimeout { duration } => {
                format!("전송 시간 초과 ({:.1}초)", duration.as_secs_f64())
            }
            EgressError::ClientUnavailable { client } => {
                format!("전송 클라이언트를 사용할 수 없습니다: {}", client)
            }
            EgressError::Closed => "전송 큐가 닫혔습니다".to_string(),
            EgressError::QueueFull { .. } => "전송 큐가 가득 찼습니다".to_string(),
        }
    }
}

impl Classified for EgressError {
    fn class(&self) -> ErrorClass {
        match self {
            EgressError::SendFailed { .. } | EgressError::ClientUnavailable { .. } => {
                ErrorClass::Recoverable
            }
            EgressError::SendTimeout { .. } => ErrorClass::Timeout,
            EgressError::Closed => ErrorClass::InvalidState,
            EgressError::QueueFull { .. } => ErrorClass::ResourceExhausted,
        }
    }
}

// =============================================================================
// EncodingError
// =============================================================================

/// Errors raised while turning notifications into message payloads.
#[derive(Debug, Clone, Error)]
pub enum EncodingError {
    /// JSON serialization failed.
    #[error("JSON serialization failed: {message}")]
    Json {
        /// Error message.
        message: String,
    },

    /// A single notification exceeds the maximum message size.
    #[error("Notification of {size} bytes exceeds message limit of {limit} bytes")]
    TooLarge {
        /// Encoded size.
        size: usize,
        /// Effective payload limit.
        limit: usize,
    },

    /// The value cannot be represented in the selected encoding.
    #[error("Unsupported value for {encoding}: {message}")]
    Unsupported {
        /// Encoding name.
        encoding: &'static str,
        /// Error message.
        message: String,
    },
}

impl EncodingError {
    /// Creates a too-large error.
    pub fn too_large(size: usize, limit: usize) -> Self {
        Self::TooLarge { size, limit }
    }
}

impl From<serde_json::Error> for EncodingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl Classified for EncodingError {
    fn class(&self) -> ErrorClass {
        match self {
            EncodingError::TooLarge { .. } => ErrorClass::ResourceExhausted,
            _ => ErrorClass::Fatal,
        }
    }
}

/// A specialized `Result` type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_class_retryable() {
        assert!(ErrorClass::Recoverable.is_retryable());
        assert!(ErrorClass::Timeout.is_retryable());
        assert!(!ErrorClass::Fatal.is_retryable());
        assert!(!ErrorClass::Conflict.is_retryable());
        assert!(!ErrorClass::ResourceExhausted.is_retryable());
    }

    #[test]
    fn test_egress_error_class() {
        assert_eq!(
            EgressError::send_failed("stdout", "broken pipe").class(),
            ErrorClass::Recoverable
        );
        assert_eq!(EgressError::Closed.class(), ErrorClass::InvalidState);
        assert_eq!(
            EgressError::QueueFull { capacity: 4 }.class(),
            ErrorClass::ResourceExhausted
        );
    }

    #[test]
    fn test_gateway_error_preserves_class() {
        let err: GatewayError = EgressError::send_timeout(Duration::from_secs(1)).into();
        assert_eq!(err.class(), ErrorClass::Timeout);
        assert_eq!(err.error_type(), "egress");

        let wrapped = GatewayError::wrap(EncodingError::too_large(10, 5));
        assert_eq!(wrapped.class(), ErrorClass::ResourceExhausted);
        assert!(wrapped.to_string().contains("exceeds"));
    }

    #[test]
    fn test_error_class_display() {
        assert_eq!(ErrorClass::InvalidState.to_string(), "invalid_state");
    }
}
