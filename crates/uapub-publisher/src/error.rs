// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types of the publishing engine.

use std::time::Duration;

use thiserror::Error;

use uapub_core::error::{Classified, EgressError, EncodingError, ErrorClass};
use uapub_opcua::OpcUaError;

/// Errors raised by the control surface and the pipelines.
#[derive(Debug, Clone, Error)]
pub enum PublisherError {
    /// An OPC UA operation failed.
    #[error("OPC UA error on '{endpoint}': {source}")]
    OpcUa {
        /// Endpoint URL.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: OpcUaError,
    },

    /// A request entry is malformed.
    #[error("Invalid entry field '{field}': {message}")]
    InvalidEntry {
        /// The offending field.
        field: String,
        /// Error message.
        message: String,
    },

    /// The endpoint has no configured nodes.
    #[error("Endpoint not configured: {endpoint}")]
    EndpointNotFound {
        /// Endpoint URL.
        endpoint: String,
    },

    /// Encoding failed.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Egress failed.
    #[error("Egress error: {0}")]
    Egress(#[from] EgressError),

    /// A shutdown phase did not finish in time.
    #[error("Shutdown phase '{phase}' timed out after {duration:?}")]
    ShutdownTimeout {
        /// Phase name.
        phase: &'static str,
        /// Phase budget.
        duration: Duration,
    },

    /// The engine no longer accepts requests.
    #[error("Publisher is shutting down")]
    ShuttingDown,
}

impl PublisherError {
    /// Wraps an OPC UA error with its endpoint.
    pub fn opcua(endpoint: impl Into<String>, source: OpcUaError) -> Self {
        Self::OpcUa {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Creates an invalid entry error.
    pub fn invalid_entry(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEntry {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an endpoint not found error.
    pub fn endpoint_not_found(endpoint: impl Into<String>) -> Self {
        Self::EndpointNotFound {
            endpoint: endpoint.into(),
        }
    }

    /// Returns a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            PublisherError::OpcUa { .. } => "PUB-0001",
            PublisherError::InvalidEntry { .. } => "PUB-0002",
            PublisherError::EndpointNotFound { .. } => "PUB-0003",
            PublisherError::Encoding(_) => "PUB-0004",
            PublisherError::Egress(_) => "PUB-0005",
            PublisherError::ShutdownTimeout { .. } => "PUB-0006",
            PublisherError::ShuttingDown => "PUB-0007",
        }
    }

    /// Returns a user-friendly error message in Korean.
    pub fn user_message(&self) -> String {
        match self {
            PublisherError::OpcUa { endpoint, source } => {
                format!("OPC UA 오류 ({}): {}", endpoint, source.user_message())
            }
            PublisherError::InvalidEntry { field, message } => {
                format!("잘못된 요청 항목 ({}): {}", field, message)
            }
            PublisherError::EndpointNotFound { endpoint } => {
                format!("구성되지 않은 엔드포인트입니다: {}", endpoint)
            }
            PublisherError::Encoding(e) => format!("메시지 인코딩 실패: {}", e),
            PublisherError::Egress(e) => e.user_message(),
            PublisherError::ShutdownTimeout { phase, .. } => {
                format!("종료 단계 시간 초과: {}", phase)
            }
            PublisherError::ShuttingDown => "게이트웨이가 종료 중입니다".to_string(),
        }
    }
}

impl Classified for PublisherError {
    fn class(&self) -> ErrorClass {
        match self {
            PublisherError::OpcUa { source, .. } => source.class(),
            PublisherError::InvalidEntry { .. } => ErrorClass::Fatal,
            PublisherError::EndpointNotFound { .. } => ErrorClass::NotFound,
            PublisherError::Encoding(e) => e.class(),
            PublisherError::Egress(e) => e.class(),
            PublisherError::ShutdownTimeout { .. } => ErrorClass::Timeout,
            PublisherError::ShuttingDown => ErrorClass::InvalidState,
        }
    }
}

/// A Result type with PublisherError.
pub type PublisherResult<T> = Result<T, PublisherError>;
