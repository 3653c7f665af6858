// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for uapub.
//!
//! This module provides the protocol-neutral vocabulary shared by the
//! session layer, the publishing pipeline and the egress side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifies one server endpoint together with the security settings used
/// to reach it.
///
/// Two connection configurations that differ in any security-relevant field
/// produce different ids, so each gets its own session.
///
/// # Examples
///
/// ```
/// use uapub_core::types::ConnectionId;
///
/// let id = ConnectionId::new("opc.tcp://plc:4840|None|None|anonymous");
/// assert!(id.as_str().starts_with("opc.tcp://"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a new connection ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies a data set writer: the unit that owns one message stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriterId(String);

impl WriterId {
    /// Creates a new writer ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WriterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Value Types
// =============================================================================

/// A data value carried by a notification.
///
/// # Examples
///
/// ```
/// use uapub_core::types::Value;
///
/// let temp = Value::Double(25.5);
/// assert_eq!(temp.as_f64(), Some(25.5));
/// assert_eq!(Value::from(true).type_name(), "Boolean");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Boolean value
    Boolean(bool),
    /// Signed 8-bit integer
    SByte(i8),
    /// Unsigned 8-bit integer
    Byte(u8),
    /// Signed 16-bit integer
    Int16(i16),
    /// Unsigned 16-bit integer
    UInt16(u16),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// Signed 64-bit integer
    Int64(i64),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// 32-bit floating point
    Float(f32),
    /// 64-bit floating point
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    ByteString(Vec<u8>),
    /// Date and time
    DateTime(DateTime<Utc>),
    /// Array of values
    Array(Vec<Value>),
    /// Empty variant
    #[default]
    Null,
}

impl Value {
    /// Returns the OPC UA built-in type name of this value.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "Boolean",
            Value::SByte(_) => "SByte",
            Value::Byte(_) => "Byte",
            Value::Int16(_) => "Int16",
            Value::UInt16(_) => "UInt16",
            Value::Int32(_) => "Int32",
            Value::UInt32(_) => "UInt32",
            Value::Int64(_) => "Int64",
            Value::UInt64(_) => "UInt64",
            Value::Float(_) => "Float",
            Value::Double(_) => "Double",
            Value::String(_) => "String",
            Value::ByteString(_) => "ByteString",
            Value::DateTime(_) => "DateTime",
            Value::Array(_) => "Array",
            Value::Null => "Null",
        }
    }

    /// Returns the OPC UA built-in type id (0 for null).
    pub fn type_id(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::SByte(_) => 2,
            Value::Byte(_) => 3,
            Value::Int16(_) => 4,
            Value::UInt16(_) => 5,
            Value::Int32(_) => 6,
            Value::UInt32(_) => 7,
            Value::Int64(_) => 8,
            Value::UInt64(_) => 9,
            Value::Float(_) => 10,
            Value::Double(_) => 11,
            Value::String(_) => 12,
            Value::DateTime(_) => 13,
            Value::ByteString(_) => 15,
            Value::Array(_) => 0x80,
        }
    }

    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Attempts to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::SByte(v) => Some(*v as f64),
            Value::Byte(v) => Some(*v as f64),
            Value::Int16(v) => Some(*v as f64),
            Value::UInt16(v) => Some(*v as f64),
            Value::Int32(v) => Some(*v as f64),
            Value::UInt32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get this value as a string reference.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Converts this value to a JSON value.
    ///
    /// Byte strings are rendered as base64, date times as RFC 3339.
    pub fn to_json(&self) -> serde_json::Value {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

        match self {
            Value::Boolean(v) => serde_json::Value::Bool(*v),
            Value::SByte(v) => serde_json::json!(*v),
            Value::Byte(v) => serde_json::json!(*v),
            Value::Int16(v) => serde_json::json!(*v),
            Value::UInt16(v) => serde_json::json!(*v),
            Value::Int32(v) => serde_json::json!(*v),
            Value::UInt32(v) => serde_json::json!(*v),
            Value::Int64(v) => serde_json::json!(*v),
            Value::UInt64(v) => serde_json::json!(*v),
            Value::Float(v) => serde_json::json!(*v),
            Value::Double(v) => serde_json::json!(*v),
            Value::String(v) => serde_json::Value::String(v.clone()),
            Value::ByteString(v) => serde_json::Value::String(BASE64.encode(v)),
            Value::DateTime(dt) => serde_json::json!(dt.to_rfc3339()),
            Value::Array(arr) => serde_json::Value::Array(arr.iter().map(Value::to_json).collect()),
            Value::Null => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::SByte(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Array(v) => write!(f, "[{} elements]", v.len()),
            Value::Null => write!(f, "null"),
        }
    }
}

macro_rules! impl_from_for_value {
    ($variant:ident, $type:ty) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_from_for_value!(Boolean, bool);
impl_from_for_value!(SByte, i8);
impl_from_for_value!(Byte, u8);
impl_from_for_value!(Int16, i16);
impl_from_for_value!(UInt16, u16);
impl_from_for_value!(Int32, i32);
impl_from_for_value!(UInt32, u32);
impl_from_for_value!(Int64, i64);
impl_from_for_value!(UInt64, u64);
impl_from_for_value!(Float, f32);
impl_from_for_value!(Double, f64);
impl_from_for_value!(String, String);
impl_from_for_value!(DateTime, DateTime<Utc>);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

// =============================================================================
// Status Code
// =============================================================================

/// An OPC UA status code.
///
/// The top two bits carry the severity: `00` good, `01` uncertain, `10` bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Good.
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    /// Generic uncertain.
    pub const UNCERTAIN: StatusCode = StatusCode(0x4000_0000);
    /// Generic bad.
    pub const BAD: StatusCode = StatusCode(0x8000_0000);
    /// The operation timed out.
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    /// The node id refers to a node that does not exist.
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    /// The syntax of the node id is not valid.
    pub const BAD_NODE_ID_INVALID: StatusCode = StatusCode(0x8033_0000);
    /// The server is not connected.
    pub const BAD_NOT_CONNECTED: StatusCode = StatusCode(0x808A_0000);
    /// The server is too busy.
    pub const BAD_TOO_MANY_OPERATIONS: StatusCode = StatusCode(0x8010_0000);

    /// Returns `true` for good status codes.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` for uncertain status codes.
    #[inline]
    pub fn is_uncertain(&self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Returns `true` for bad status codes.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns a symbolic name for well-known codes.
    pub fn name(&self) -> &'static str {
        match *self {
            StatusCode::GOOD => "Good",
            StatusCode::UNCERTAIN => "Uncertain",
            StatusCode::BAD => "Bad",
            StatusCode::BAD_TIMEOUT => "BadTimeout",
            StatusCode::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            StatusCode::BAD_NODE_ID_INVALID => "BadNodeIdInvalid",
            StatusCode::BAD_NOT_CONNECTED => "BadNotConnected",
            StatusCode::BAD_TOO_MANY_OPERATIONS => "BadTooManyOperations",
            s if s.is_good() => "Good",
            s if s.is_uncertain() => "Uncertain",
            _ => "Bad",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// The lifecycle state of one endpoint connection.
///
/// ```text
/// Disconnected → Connecting → Connected → (Subscribing → Active)*
///                                 ↑                        │
///                                 └──── Reconnecting ◄─────┘
///                                            │
///                                            ▼
///                                         Faulted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// Establishing transport and security.
    Connecting,
    /// Session established, no subscription activity in progress.
    Connected,
    /// A subscription or item operation is in progress.
    Subscribing,
    /// Session established with live subscriptions.
    Active,
    /// Session lost; replay pending.
    Reconnecting,
    /// Configuration-fatal failure; no further attempts.
    Faulted,
}

impl ConnectionState {
    /// Returns `true` if a session is established.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Subscribing | ConnectionState::Active
        )
    }

    /// Returns `true` if the connection is in a transitional state.
    #[inline]
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting | ConnectionState::Subscribing
        )
    }

    /// Returns `true` if the connection cannot be used without reconfiguration.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Faulted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Subscribing => "Subscribing",
            ConnectionState::Active => "Active",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Faulted => "Faulted",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Health
// =============================================================================

/// Aggregated health of a component or of the whole engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Everything configured is working.
    #[default]
    Healthy,
    /// A subset of connections or items is unhealthy.
    Degraded,
    /// Nothing configured is working.
    Down,
}

impl HealthState {
    /// Combines health of `healthy` out of `total` units.
    pub fn from_counts(healthy: usize, total: usize) -> Self {
        if total == 0 || healthy == total {
            HealthState::Healthy
        } else if healthy == 0 {
            HealthState::Down
        } else {
            HealthState::Degraded
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Down => write!(f, "down"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
