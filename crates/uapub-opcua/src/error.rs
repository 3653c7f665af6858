// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA error types with diagnostics.
//!
//! Every error classifies into [`uapub_core::ErrorClass`], which drives retry
//! and containment decisions:
//!
//! ```text
//! OpcUaError
//! ├── Connection    - Endpoint reachability (recoverable; no matching endpoint is fatal)
//! ├── Session       - Session lifecycle (recoverable)
//! ├── Security      - Authentication and policy (fatal)
//! ├── Subscription  - Subscriptions and monitored items (conflict / not found / invalid state)
//! ├── Operation     - Read, write, browse
//! ├── Configuration - Invalid settings (fatal)
//! └── Timeout       - Bounded waits that expired
//! ```
//!
//! # Examples
//!
//! ```
//! use uapub_opcua::error::{OpcUaError, SubscriptionError};
//! use uapub_core::{Classified, ErrorClass};
//!
//! let error = OpcUaError::from(SubscriptionError::already_exists("fast"));
//! assert_eq!(error.class(), ErrorClass::Conflict);
//! assert!(!error.is_retryable());
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;
use uapub_core::{AttemptTimeout, Classified, ErrorClass, StatusCode};

// =============================================================================
// OpcUaError - Main Error Type
// =============================================================================

/// The main error type for OPC UA operations.
#[derive(Debug, Clone, Error)]
pub enum OpcUaError {
    /// Connection-related errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Security and authentication errors.
    #[error("{0}")]
    Security(#[from] SecurityError),

    /// Subscription and monitored item errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Read, write and browse errors.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

impl OpcUaError {
    // =========================================================================
    // Convenience Constructors
    // =========================================================================

    /// Creates a not connected error.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    /// Creates a connection refused error.
    pub fn connection_refused(endpoint: impl Into<String>) -> Self {
        Self::Connection(ConnectionError::refused(endpoint))
    }

    /// Creates an authentication failure.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::Security(SecurityError::authentication_failed(message))
    }

    /// Creates an operation timeout.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout(TimeoutError::operation(operation, duration))
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::invalid(field, message))
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self.class() {
            ErrorClass::Fatal => ErrorSeverity::Critical,
            ErrorClass::Recoverable | ErrorClass::Timeout => ErrorSeverity::Warning,
            ErrorClass::ResourceExhausted => ErrorSeverity::Warning,
            ErrorClass::Conflict | ErrorClass::NotFound | ErrorClass::InvalidState => {
                ErrorSeverity::Info
            }
        }
    }

    /// Returns the error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Session(_) => "session",
            Self::Security(_) => "security",
            Self::Subscription(_) => "subscription",
            Self::Operation(_) => "operation",
            Self::Configuration(_) => "configuration",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Security(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Operation(e) => ErrorCode::new(5, e.code()),
            Self::Configuration(_) => ErrorCode::new(6, 1),
            Self::Timeout(_) => ErrorCode::new(7, 1),
        }
    }

    /// Returns recovery hints for this error, most useful first.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Connection(ConnectionError::NoSuitableEndpoint { .. }) => vec![
                "Check the security mode and policy requested for the endpoint",
                "List the server endpoints and pick a supported combination",
            ],
            Self::Connection(_) | Self::Session(_) | Self::Timeout(_) => vec![
                "Verify the server is running and reachable",
                "The connection is retried automatically",
            ],
            Self::Security(_) => vec![
                "Verify the configured credentials",
                "Check that the client certificate is trusted by the server",
            ],
            Self::Subscription(SubscriptionError::NotEmpty { .. }) => {
                vec!["Remove all monitored items before removing the subscription"]
            }
            Self::Subscription(SubscriptionError::ItemRejected { .. }) => {
                vec!["Verify the node id exists in the server address space"]
            }
            Self::Subscription(_) => vec!["Check the requested subscription and item names"],
            Self::Operation(_) => vec!["Check node access rights and data types"],
            Self::Configuration(_) => vec!["Fix the configuration and restart"],
        }
    }

    /// Returns a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection(e) => e.user_message(),
            Self::Session(_) => "OPC UA 세션 오류가 발생했습니다".to_string(),
            Self::Security(_) => "OPC UA 보안 설정 또는 인증 정보를 확인하세요".to_string(),
            Self::Subscription(e) => e.user_message(),
            Self::Operation(e) => format!("OPC UA 작업 실패: {}", e),
            Self::Configuration(e) => format!("설정 오류: {}", e),
            Self::Timeout(TimeoutError::Operation { duration, .. }) => {
                format!("응답 시간 초과 ({:.1}초)", duration.as_secs_f64())
            }
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level, context and the first
    /// recovery hint.
    pub fn log(&self, context: &str) {
        let code = self.error_code();
        let class = self.class();
        let hint = self.recovery_hints().first().copied().unwrap_or_default();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                class = %class,
                context = context,
                retryable = class.is_retryable(),
                hint,
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                class = %class,
                context = context,
                retryable = class.is_retryable(),
                hint,
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                class = %class,
                context = context,
                retryable = class.is_retryable(),
                hint,
                "{self}"
            ),
        }
    }
}

impl Classified for OpcUaError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Connection(e) => e.class(),
            Self::Session(_) => ErrorClass::Recoverable,
            Self::Security(_) => ErrorClass::Fatal,
            Self::Subscription(e) => e.class(),
            Self::Operation(e) => e.class(),
            Self::Configuration(_) => ErrorClass::Fatal,
            Self::Timeout(_) => ErrorClass::Timeout,
        }
    }
}

impl From<AttemptTimeout> for OpcUaError {
    fn from(timeout: AttemptTimeout) -> Self {
        Self::timeout(format!("attempt {}", timeout.attempt), timeout.timeout)
    }
}

/// A specialized `Result` type for OPC UA operations.
pub type OpcUaResult<T> = Result<T, OpcUaError>;

// =============================================================================
// ConnectionError
// =============================================================================

/// Connection-related errors.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// Connection refused.
    #[error("Connection refused to '{endpoint}'")]
    Refused {
        /// Target endpoint.
        endpoint: String,
    },

    /// Connection timed out.
    #[error("Connection timed out to '{endpoint}' after {duration:?}")]
    TimedOut {
        /// Target endpoint.
        endpoint: String,
        /// Timeout duration.
        duration: Duration,
    },

    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL: '{url}' - {reason}")]
    InvalidEndpoint {
        /// The invalid URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// No endpoint matches the requested security settings.
    #[error("No endpoint at '{endpoint}' matches security mode '{security_mode}' and policy '{security_policy}'")]
    NoSuitableEndpoint {
        /// Target endpoint.
        endpoint: String,
        /// Requested security mode.
        security_mode: String,
        /// Requested security policy.
        security_policy: String,
    },

    /// Server not responding.
    #[error("Server not responding at '{endpoint}'")]
    ServerNotResponding {
        /// Target endpoint.
        endpoint: String,
    },

    /// Connection closed unexpectedly.
    #[error("Connection closed unexpectedly{}", reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Closed {
        /// Reason for closure.
        reason: Option<String>,
    },

    /// Not connected.
    #[error("Not connected to OPC UA server")]
    NotConnected,

    /// The connection is faulted and will not reconnect.
    #[error("Connection to '{endpoint}' is faulted: {reason}")]
    Faulted {
        /// Target endpoint.
        endpoint: String,
        /// Cause of the fault.
        reason: String,
    },

    /// Recoverable failures persisted past the retry ceiling.
    #[error("'{operation}' on '{endpoint}' gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Target endpoint.
        endpoint: String,
        /// The retried operation.
        operation: String,
        /// Attempts made.
        attempts: u32,
        /// The last error.
        last_error: String,
    },
}

impl ConnectionError {
    /// Creates a connection refused error.
    pub fn refused(endpoint: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
        }
    }

    /// Creates a connection timeout error.
    pub fn timed_out(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::TimedOut {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a no suitable endpoint error.
    pub fn no_suitable_endpoint(
        endpoint: impl Into<String>,
        security_mode: impl Into<String>,
        security_policy: impl Into<String>,
    ) -> Self {
        Self::NoSuitableEndpoint {
            endpoint: endpoint.into(),
            security_mode: security_mode.into(),
            security_policy: security_policy.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: Some(reason.into()),
        }
    }

    /// Creates a faulted error.
    pub fn faulted(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Faulted {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        attempts: u32,
        last_error: impl fmt::Display,
    ) -> Self {
        Self::RetriesExhausted {
            endpoint: endpoint.into(),
            operation: operation.into(),
            attempts,
            last_error: last_error.to_string(),
        }
    }

    /// Returns the error class.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidEndpoint { .. }
            | Self::NoSuitableEndpoint { .. }
            | Self::RetriesExhausted { .. } => ErrorClass::Fatal,
            Self::TimedOut { .. } => ErrorClass::Timeout,
            Self::Faulted { .. } => ErrorClass::InvalidState,
            _ => ErrorClass::Recoverable,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Refused { .. } => 1,
            Self::TimedOut { .. } => 2,
            Self::InvalidEndpoint { .. } => 3,
            Self::NoSuitableEndpoint { .. } => 4,
            Self::ServerNotResponding { .. } => 5,
            Self::Closed { .. } => 6,
            Self::NotConnected => 7,
            Self::Faulted { .. } => 8,
            Self::RetriesExhausted { .. } => 9,
        };
        ErrorCode::new(1, code)
    }

    /// Returns a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Refused { endpoint } => format!("서버 연결이 거부되었습니다: {}", endpoint),
            Self::TimedOut { endpoint, .. } => format!("서버 연결 시간 초과: {}", endpoint),
            Self::InvalidEndpoint { url, .. } => format!("잘못된 엔드포인트 주소: {}", url),
            Self::NoSuitableEndpoint { security_mode, .. } => {
                format!("보안 모드 '{}'를 지원하는 엔드포인트가 없습니다", security_mode)
            }
            Self::ServerNotResponding { endpoint } => format!("서버 응답 없음: {}", endpoint),
            Self::Closed { .. } => "서버 연결이 끊어졌습니다".to_string(),
            Self::NotConnected => "서버에 연결되어 있지 않습니다".to_string(),
            Self::Faulted { endpoint, .. } => {
                format!("연결이 복구 불가 상태입니다: {}", endpoint)
            }
            Self::RetriesExhausted { operation, attempts, .. } => {
                format!("{}회 재시도 후 '{}' 작업을 포기했습니다", attempts, operation)
            }
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Session creation failed.
    #[error("Session creation failed: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
    },

    /// Session activation failed.
    #[error("Session activation failed: {message}")]
    ActivationFailed {
        /// Error message.
        message: String,
    },

    /// Keep-alive check failed.
    #[error("Keep-alive failed: {message}")]
    KeepAliveFailed {
        /// Error message.
        message: String,
    },

    /// Session expired on the server.
    #[error("Session expired")]
    Expired,
}

impl SessionError {
    /// Creates a session creation failure.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates a keep-alive failure.
    pub fn keep_alive_failed(message: impl Into<String>) -> Self {
        Self::KeepAliveFailed {
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::CreationFailed { .. } => 1,
            Self::ActivationFailed { .. } => 2,
            Self::KeepAliveFailed { .. } => 3,
            Self::Expired => 4,
        };
        ErrorCode::new(2, code)
    }
}

// =============================================================================
// SecurityError
// =============================================================================

/// Security and authentication errors. Never retried.
#[derive(Debug, Clone, Error)]
pub enum SecurityError {
    /// The server rejected the user identity.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Error message.
        message: String,
    },

    /// The server rejected the client certificate.
    #[error("Certificate rejected: {message}")]
    CertificateRejected {
        /// Error message.
        message: String,
    },

    /// Security policy not supported.
    #[error("Security policy not supported: {policy}")]
    PolicyNotSupported {
        /// The policy.
        policy: String,
    },

    /// Security mode not supported.
    #[error("Security mode not supported: {mode}")]
    ModeNotSupported {
        /// The mode.
        mode: String,
    },
}

impl SecurityError {
    /// Creates an authentication failure.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Creates a certificate rejection.
    pub fn certificate_rejected(message: impl Into<String>) -> Self {
        Self::CertificateRejected {
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::AuthenticationFailed { .. } => 1,
            Self::CertificateRejected { .. } => 2,
            Self::PolicyNotSupported { .. } => 3,
            Self::ModeNotSupported { .. } => 4,
        };
        ErrorCode::new(3, code)
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitored item errors.
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    /// A subscription with this name already exists on the connection.
    #[error("Subscription '{name}' already exists")]
    AlreadyExists {
        /// Subscription name.
        name: String,
    },

    /// No subscription with this name.
    #[error("Subscription '{name}' not found")]
    NotFound {
        /// Subscription name.
        name: String,
    },

    /// The subscription still owns monitored items.
    #[error("Subscription '{name}' is not empty ({item_count} monitored items)")]
    NotEmpty {
        /// Subscription name.
        name: String,
        /// Remaining items.
        item_count: usize,
    },

    /// The server refused to create the subscription.
    #[error("Failed to create subscription '{name}': {message}")]
    CreationFailed {
        /// Subscription name.
        name: String,
        /// Error message.
        message: String,
    },

    /// A monitored item with this id already exists.
    #[error("Monitored item '{item_id}' already added to subscription '{subscription}'")]
    ItemAlreadyAdded {
        /// Subscription name.
        subscription: String,
        /// Item id.
        item_id: String,
    },

    /// No monitored item with this id.
    #[error("Monitored item '{item_id}' not found in subscription '{subscription}'")]
    ItemNotFound {
        /// Subscription name.
        subscription: String,
        /// Item id.
        item_id: String,
    },

    /// The server rejected a monitored item.
    #[error("Monitored item '{item_id}' ({node_id}) rejected: {status}")]
    ItemRejected {
        /// Item id.
        item_id: String,
        /// Node id.
        node_id: String,
        /// Status returned by the server.
        status: StatusCode,
    },

    /// The node id could not be parsed.
    #[error("Invalid node id '{node_id}': {reason}")]
    InvalidNodeId {
        /// The node id.
        node_id: String,
        /// Reason.
        reason: String,
    },

    /// Subscription parameters are invalid.
    #[error("Invalid subscription settings: {message}")]
    InvalidSettings {
        /// Error message.
        message: String,
    },
}

impl SubscriptionError {
    /// Creates an already-exists error.
    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    /// Creates a not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a not-empty error.
    pub fn not_empty(name: impl Into<String>, item_count: usize) -> Self {
        Self::NotEmpty {
            name: name.into(),
            item_count,
        }
    }

    /// Creates a creation failure.
    pub fn creation_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CreationFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an item-already-added error.
    pub fn item_already_added(subscription: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self::ItemAlreadyAdded {
            subscription: subscription.into(),
            item_id: item_id.into(),
        }
    }

    /// Creates an item-not-found error.
    pub fn item_not_found(subscription: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self::ItemNotFound {
            subscription: subscription.into(),
            item_id: item_id.into(),
        }
    }

    /// Creates an item-rejected error.
    pub fn item_rejected(
        item_id: impl Into<String>,
        node_id: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self::ItemRejected {
            item_id: item_id.into(),
            node_id: node_id.into(),
            status,
        }
    }

    /// Creates an invalid node id error.
    pub fn invalid_node_id(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error class.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyExists { .. } | Self::ItemAlreadyAdded { .. } => ErrorClass::Conflict,
            Self::NotFound { .. } | Self::ItemNotFound { .. } => ErrorClass::NotFound,
            Self::NotEmpty { .. } => ErrorClass::InvalidState,
            Self::CreationFailed { .. } => ErrorClass::Recoverable,
            Self::ItemRejected { status, .. } => match *status {
                StatusCode::BAD_TIMEOUT
                | StatusCode::BAD_TOO_MANY_OPERATIONS
                | StatusCode::BAD_NOT_CONNECTED => ErrorClass::Recoverable,
                _ => ErrorClass::Fatal,
            },
            Self::InvalidNodeId { .. } | Self::InvalidSettings { .. } => ErrorClass::Fatal,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::AlreadyExists { .. } => 1,
            Self::NotFound { .. } => 2,
            Self::NotEmpty { .. } => 3,
            Self::CreationFailed { .. } => 4,
            Self::ItemAlreadyAdded { .. } => 5,
            Self::ItemNotFound { .. } => 6,
            Self::ItemRejected { .. } => 7,
            Self::InvalidNodeId { .. } => 8,
            Self::InvalidSettings { .. } => 9,
        };
        ErrorCode::new(4, code)
    }

    /// Returns a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            Self::AlreadyExists { name } => format!("이미 존재하는 구독입니다: {}", name),
            Self::NotFound { name } => format!("구독을 찾을 수 없습니다: {}", name),
            Self::NotEmpty { name, item_count } => {
                format!("구독 '{}'에 모니터링 항목 {}개가 남아 있습니다", name, item_count)
            }
            Self::ItemAlreadyAdded { item_id, .. } => {
                format!("이미 추가된 모니터링 항목입니다: {}", item_id)
            }
            Self::ItemRejected { node_id, status, .. } => {
                format!("서버가 노드를 거부했습니다 ({}): {}", node_id, status.name())
            }
            other => format!("구독 오류: {}", other),
        }
    }
}

// =============================================================================
// OperationError
// =============================================================================

/// Read, write and browse errors.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    /// Read failed.
    #[error("Read failed for '{node_id}': {message}")]
    ReadFailed {
        /// Node id.
        node_id: String,
        /// Error message.
        message: String,
    },

    /// Write failed.
    #[error("Write failed for '{node_id}': {message}")]
    WriteFailed {
        /// Node id.
        node_id: String,
        /// Error message.
        message: String,
    },

    /// Browse failed.
    #[error("Browse failed for '{node_id}': {message}")]
    BrowseFailed {
        /// Node id.
        node_id: String,
        /// Error message.
        message: String,
    },

    /// The server answered with a bad status.
    #[error("Bad status for '{node_id}': {status}")]
    BadStatus {
        /// Node id.
        node_id: String,
        /// Status code.
        status: StatusCode,
    },

    /// The transport does not support the operation.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Operation name.
        operation: String,
    },
}

impl OperationError {
    /// Creates a read failure.
    pub fn read_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReadFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Creates a write failure.
    pub fn write_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Creates a browse failure.
    pub fn browse_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrowseFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Creates a not supported error.
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    fn class(&self) -> ErrorClass {
        match self {
            Self::BadStatus { status, .. } if *status == StatusCode::BAD_TIMEOUT => {
                ErrorClass::Recoverable
            }
            Self::BadStatus { .. } | Self::NotSupported { .. } => ErrorClass::Fatal,
            _ => ErrorClass::Recoverable,
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::ReadFailed { .. } => 1,
            Self::WriteFailed { .. } => 2,
            Self::BrowseFailed { .. } => 3,
            Self::BadStatus { .. } => 4,
            Self::NotSupported { .. } => 5,
        }
    }
}

// =============================================================================
// ConfigurationError & TimeoutError
// =============================================================================

/// Invalid settings.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A field has an invalid value.
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid configuration error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A bounded wait expired.
#[derive(Debug, Clone, Error)]
pub enum TimeoutError {
    /// A protocol operation did not complete in time.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Operation {
        /// Operation name.
        operation: String,
        /// Timeout duration.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Creates an operation timeout.
    pub fn operation(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Operation {
            operation: operation.into(),
            duration,
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::DEBUG,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code.
///
/// Format: `UA-XXYY` where XX is category and YY is specific error.
///
/// Categories:
/// - 1: Connection
/// - 2: Session
/// - 3: Security
/// - 4: Subscription
/// - 5: Operation
/// - 6: Configuration
/// - 7: Timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_classes() {
        assert_eq!(
            OpcUaError::connection_refused("opc.tcp://x").class(),
            ErrorClass::Recoverable
        );
        assert_eq!(
            OpcUaError::from(ConnectionError::no_suitable_endpoint("opc.tcp://x", "Sign", "Basic256Sha256"))
                .class(),
            ErrorClass::Fatal
        );
        assert_eq!(OpcUaError::not_connected().class(), ErrorClass::Recoverable);
    }

    #[test]
    fn test_security_is_fatal() {
        let err = OpcUaError::auth_failed("bad password");
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_subscription_classes() {
        assert_eq!(SubscriptionError::already_exists("a").class(), ErrorClass::Conflict);
        assert_eq!(SubscriptionError::not_found("a").class(), ErrorClass::NotFound);
        assert_eq!(SubscriptionError::not_empty("a", 2).class(), ErrorClass::InvalidState);
        assert_eq!(
            SubscriptionError::item_already_added("a", "i=1").class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            SubscriptionError::item_rejected("x", "ns=9;s=Missing", StatusCode::BAD_NODE_ID_UNKNOWN)
                .class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            SubscriptionError::item_rejected("x", "i=1", StatusCode::BAD_TOO_MANY_OPERATIONS).class(),
            ErrorClass::Recoverable
        );
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = OpcUaError::timeout("create_subscription", Duration::from_secs(5));
        assert!(err.is_retryable());
        assert_eq!(err.category(), "timeout");
    }

    #[test]
    fn test_attempt_timeout_is_a_timeout() {
        let err = OpcUaError::from(AttemptTimeout {
            attempt: 2,
            timeout: Duration::from_secs(3),
        });
        assert_eq!(err.class(), ErrorClass::Timeout);
        assert_eq!(err.category(), "timeout");
        assert_eq!(
            err.recovery_hints().first().copied(),
            Some("Verify the server is running and reachable")
        );
    }

    #[test]
    fn test_error_code_format() {
        let err = OpcUaError::from(SubscriptionError::not_empty("slow", 3));
        assert_eq!(err.error_code().to_string(), "UA-0403");
        assert!(!err.recovery_hints().is_empty());
        assert!(err.to_string().contains("3 monitored items"));
    }
}
