// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA-specific types.
//!
//! - **NodeId**: the four OPC UA node identifier kinds with parsing
//! - **SecurityMode/Policy**: endpoint security selection
//! - **UserIdentity**: how the session authenticates
//! - **ConnectionConfig**: everything that identifies one session
//! - **SubscriptionSettings**: subscription parameters
//! - **MonitoredItemSpec**: one monitored item as requested
//!
//! # Examples
//!
//! ```
//! use uapub_opcua::types::{ConnectionConfig, NodeId, SecurityMode};
//!
//! let node: NodeId = "ns=2;s=Line1.Temperature".parse().unwrap();
//! assert_eq!(node.namespace_index, 2);
//!
//! let config = ConnectionConfig::new("opc.tcp://plc:4840");
//! assert_eq!(config.security_mode, SecurityMode::None);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use uapub_core::config::MAX_HEARTBEAT_INTERVAL;
use uapub_core::{AuthenticationMode, ConnectionId, OpcNodeModel, PublishedNodesEntry};
use uuid::Uuid;

use crate::error::{ConfigurationError, OpcUaError, OpcUaResult, SubscriptionError};

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA Node Identifier.
///
/// A namespace index and an identifier that is numeric, string, GUID or
/// opaque (byte string).
///
/// # Examples
///
/// ```
/// use uapub_opcua::types::NodeId;
///
/// let numeric = NodeId::numeric(0, 2258);
/// assert_eq!(numeric.to_string(), "i=2258");
///
/// let parsed: NodeId = "ns=3;s=Boiler.Pressure".parse().unwrap();
/// assert_eq!(parsed, NodeId::string(3, "Boiler.Pressure"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a numeric node ID.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node ID.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque node ID.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    /// Returns the node id in OPC UA string format.
    pub fn to_opc_string(&self) -> String {
        let id = match &self.identifier {
            NodeIdentifier::Numeric(v) => format!("i={}", v),
            NodeIdentifier::String(v) => format!("s={}", v),
            NodeIdentifier::Guid(v) => format!("g={}", v),
            NodeIdentifier::Opaque(v) => format!("b={}", BASE64.encode(v)),
        };
        if self.namespace_index == 0 {
            id
        } else {
            format!("ns={};{}", self.namespace_index, id)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = OpcUaError;

    /// Parses `ns=<n>;<kind>=<value>` or `<kind>=<value>` where kind is one
    /// of `i`, `s`, `g`, `b`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| OpcUaError::from(SubscriptionError::invalid_node_id(s, reason));

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("Missing identifier after namespace"))?;
                let ns: u16 = ns.parse().map_err(|_| invalid("Invalid namespace index"))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(id.parse().map_err(|_| invalid("Invalid numeric identifier"))?)
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            if id.is_empty() {
                return Err(invalid("Empty string identifier"));
            }
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = identifier_part.strip_prefix("g=") {
            NodeIdentifier::Guid(
                Uuid::parse_str(id).map_err(|e| invalid(&format!("Invalid GUID: {}", e)))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("b=") {
            NodeIdentifier::Opaque(
                BASE64
                    .decode(id)
                    .map_err(|e| invalid(&format!("Invalid base64: {}", e)))?,
            )
        } else {
            return Err(invalid("Unknown identifier type. Expected i=, s=, g=, or b="));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

/// OPC UA node identifier kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),
    /// String identifier.
    String(String),
    /// GUID identifier.
    Guid(Uuid),
    /// Opaque (byte string) identifier.
    Opaque(Vec<u8>),
}

// =============================================================================
// Security
// =============================================================================

/// OPC UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SecurityMode {
    /// Messages are neither signed nor encrypted.
    #[default]
    None,
    /// Messages are signed.
    Sign,
    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityMode {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" | "nosecurity" => Ok(Self::None),
            "sign" | "signed" => Ok(Self::Sign),
            "signandencrypt" | "signencrypt" | "encrypted" => Ok(Self::SignAndEncrypt),
            _ => Err(OpcUaError::invalid_config("security_mode", format!("unknown mode '{}'", s))),
        }
    }
}

/// OPC UA security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SecurityPolicy {
    /// No security policy.
    #[default]
    None,
    /// Basic256Sha256.
    Basic256Sha256,
    /// Aes128_Sha256_RsaOaep.
    Aes128Sha256RsaOaep,
    /// Aes256_Sha256_RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the OPC UA policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    /// Returns the short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128Sha256RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256Sha256RsaPss",
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityPolicy {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let short = s.rsplit('#').next().unwrap_or(s);
        match short.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "basic256sha256" => Ok(Self::Basic256Sha256),
            "aes128sha256rsaoaep" | "aes128" => Ok(Self::Aes128Sha256RsaOaep),
            "aes256sha256rsapss" | "aes256" => Ok(Self::Aes256Sha256RsaPss),
            _ => Err(OpcUaError::invalid_config(
                "security_policy",
                format!("unknown policy '{}'", s),
            )),
        }
    }
}

// =============================================================================
// UserIdentity
// =============================================================================

/// How the session authenticates.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub enum UserIdentity {
    /// Anonymous.
    #[default]
    Anonymous,
    /// User name and password.
    UserName {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// X.509 certificate.
    Certificate {
        /// Certificate path.
        certificate_path: String,
        /// Private key path.
        private_key_path: String,
    },
}

impl UserIdentity {
    /// Returns a short label without secrets.
    pub fn label(&self) -> String {
        match self {
            Self::Anonymous => "anonymous".to_string(),
            Self::UserName { username, .. } => format!("user:{}", username),
            Self::Certificate { certificate_path, .. } => format!("cert:{}", certificate_path),
        }
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Certificate {
                certificate_path,
                private_key_path,
            } => f
                .debug_struct("Certificate")
                .field("certificate_path", certificate_path)
                .field("private_key_path", private_key_path)
                .finish(),
        }
    }
}

// =============================================================================
// ConnectionConfig
// =============================================================================

/// Everything that identifies one session.
///
/// Two requests resolving to equal configs share one connection; any
/// difference yields a different [`ConnectionId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionConfig {
    /// Endpoint URL (`opc.tcp://host:port/path`).
    pub endpoint_url: String,
    /// Message security mode.
    pub security_mode: SecurityMode,
    /// Security policy.
    pub security_policy: SecurityPolicy,
    /// User identity.
    pub identity: UserIdentity,
    /// Requested session timeout.
    pub session_timeout: Duration,
}

impl ConnectionConfig {
    /// Creates an unsecured anonymous configuration.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            security_mode: SecurityMode::None,
            security_policy: SecurityPolicy::None,
            identity: UserIdentity::Anonymous,
            session_timeout: Duration::from_secs(60),
        }
    }

    /// Sets security mode and policy.
    pub fn with_security(mut self, mode: SecurityMode, policy: SecurityPolicy) -> Self {
        self.security_mode = mode;
        self.security_policy = policy;
        self
    }

    /// Sets the user identity.
    pub fn with_identity(mut self, identity: UserIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Returns the connection id derived from every identifying field.
    pub fn id(&self) -> ConnectionId {
        ConnectionId::new(format!(
            "{}|{}|{}|{}",
            self.endpoint_url,
            self.security_mode,
            self.security_policy,
            self.identity.label()
        ))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> OpcUaResult<()> {
        let url = self.endpoint_url.trim();
        if url.is_empty() {
            return Err(ConfigurationError::invalid("endpoint_url", "must not be empty").into());
        }
        if !url.starts_with("opc.tcp://") {
            return Err(crate::error::ConnectionError::invalid_endpoint(
                url,
                "expected opc.tcp:// scheme",
            )
            .into());
        }
        match (self.security_mode, self.security_policy) {
            (SecurityMode::None, SecurityPolicy::None) => {}
            (SecurityMode::None, _) | (_, SecurityPolicy::None) => {
                return Err(ConfigurationError::invalid(
                    "security",
                    format!(
                        "mode '{}' and policy '{}' are inconsistent",
                        self.security_mode, self.security_policy
                    ),
                )
                .into())
            }
            _ => {}
        }
        if let UserIdentity::UserName { username, .. } = &self.identity {
            if username.is_empty() {
                return Err(ConfigurationError::invalid("username", "must not be empty").into());
            }
        }
        Ok(())
    }

    /// Resolves the connection part of a published nodes entry.
    ///
    /// An explicit security mode wins; otherwise `UseSecurity` selects
    /// `SignAndEncrypt` with `Basic256Sha256`.
    pub fn from_entry(entry: &PublishedNodesEntry) -> OpcUaResult<Self> {
        let mut config = Self::new(entry.endpoint_url.trim());

        match &entry.endpoint_security_mode {
            Some(mode) => {
                config.security_mode = mode.parse()?;
                config.security_policy = match &entry.endpoint_security_policy {
                    Some(policy) => policy.parse()?,
                    None if config.security_mode == SecurityMode::None => SecurityPolicy::None,
                    None => SecurityPolicy::Basic256Sha256,
                };
            }
            None if entry.use_security.unwrap_or(false) => {
                config.security_mode = SecurityMode::SignAndEncrypt;
                config.security_policy = match &entry.endpoint_security_policy {
                    Some(policy) => policy.parse()?,
                    None => SecurityPolicy::Basic256Sha256,
                };
            }
            None => {}
        }

        config.identity = match entry.opc_authentication_mode {
            AuthenticationMode::Anonymous => UserIdentity::Anonymous,
            AuthenticationMode::UsernamePassword => UserIdentity::UserName {
                username: entry.opc_authentication_username.clone().unwrap_or_default(),
                password: entry.opc_authentication_password.clone().unwrap_or_default(),
            },
            AuthenticationMode::Certificate => UserIdentity::Certificate {
                certificate_path: entry.opc_authentication_username.clone().unwrap_or_default(),
                private_key_path: entry.opc_authentication_password.clone().unwrap_or_default(),
            },
        };

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// OPC UA subscription parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing interval.
    #[serde(with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Publishing intervals without a publish request before the server
    /// drops the subscription.
    pub lifetime_count: u32,

    /// Publishing intervals without notifications before a keep-alive.
    pub max_keep_alive_count: u32,

    /// Maximum notifications per publish response (0 = unlimited).
    pub max_notifications_per_publish: u32,

    /// Relative priority.
    pub priority: u8,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: Duration::from_secs(1),
            lifetime_count: 60,
            max_keep_alive_count: 10,
            max_notifications_per_publish: 0,
            priority: 0,
        }
    }
}

impl SubscriptionSettings {
    /// Creates settings with a custom publishing interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            publishing_interval: interval,
            ..Default::default()
        }
    }

    /// Validates the settings.
    ///
    /// The lifetime count must be at least three times the keep-alive count.
    pub fn validate(&self) -> OpcUaResult<()> {
        let invalid = |message: String| {
            OpcUaError::from(SubscriptionError::InvalidSettings { message })
        };
        if self.publishing_interval.is_zero() {
            return Err(invalid("publishing interval must be positive".into()));
        }
        if self.max_keep_alive_count == 0 {
            return Err(invalid("max keep-alive count must be positive".into()));
        }
        if self.lifetime_count < self.max_keep_alive_count.saturating_mul(3) {
            return Err(invalid(format!(
                "lifetime count {} must be at least 3 x keep-alive count {}",
                self.lifetime_count, self.max_keep_alive_count
            )));
        }
        Ok(())
    }
}

// =============================================================================
// MonitoredItemSpec
// =============================================================================

/// One monitored item as requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItemSpec {
    /// Identifier within the subscription.
    pub id: String,
    /// Node to monitor.
    pub node_id: NodeId,
    /// Name used in messages.
    pub display_name: String,
    /// Sampling interval.
    pub sampling_interval: Duration,
    /// Server-side queue size.
    pub queue_size: u32,
    /// Discard the oldest value when the server queue overflows.
    pub discard_oldest: bool,
    /// Heartbeat interval, at most 24 h.
    pub heartbeat_interval: Option<Duration>,
    /// Suppress the first notification after each (re)subscription.
    pub skip_first: bool,
}

impl MonitoredItemSpec {
    /// Creates an item whose id and display name are the node id.
    pub fn new(node_id: NodeId) -> Self {
        let id = node_id.to_string();
        Self {
            display_name: id.clone(),
            id,
            node_id,
            sampling_interval: Duration::from_secs(1),
            queue_size: 1,
            discard_oldest: true,
            heartbeat_interval: None,
            skip_first: false,
        }
    }

    /// Sets the item id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the sampling interval.
    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Sets the heartbeat interval; zero disables it, values above 24 h are clamped.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = clamp_heartbeat(&self.id, interval);
        self
    }

    /// Sets the skip-first flag.
    pub fn with_skip_first(mut self, skip: bool) -> Self {
        self.skip_first = skip;
        self
    }

    /// Builds an item from a published node.
    pub fn from_node(node: &OpcNodeModel, default_sampling: Duration) -> OpcUaResult<Self> {
        let node_id: NodeId = node.id.parse()?;
        let mut spec = Self::new(node_id).with_id(node.item_id());
        spec.display_name = node.effective_display_name().to_string();
        spec.sampling_interval = node.sampling_interval().unwrap_or(default_sampling);
        spec.queue_size = node.queue_size.unwrap_or(1).max(1);
        spec.discard_oldest = !node.discard_new.unwrap_or(false);
        spec.skip_first = node.skip_first.unwrap_or(false);
        if let Some(heartbeat) = node.heartbeat() {
            spec = spec.with_heartbeat(heartbeat);
        }
        Ok(spec)
    }
}

fn clamp_heartbeat(item: &str, interval: Duration) -> Option<Duration> {
    if interval.is_zero() {
        None
    } else if interval > MAX_HEARTBEAT_INTERVAL {
        tracing::warn!(
            item = item,
            requested_secs = interval.as_secs(),
            max_secs = MAX_HEARTBEAT_INTERVAL.as_secs(),
            "Heartbeat interval clamped"
        );
        Some(MAX_HEARTBEAT_INTERVAL)
    } else {
        Some(interval)
    }
}

// =============================================================================
// Tests
// =============================================================================
