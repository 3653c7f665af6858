// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! [`UaTransport`] backed by the `opcua` crate client stack.
//!
//! The `opcua` session API is blocking, so every call runs on the blocking
//! pool; the surrounding [`SessionChannel`](super::SessionChannel) bounds it
//! with the operation timeout. Data change callbacks hand notifications to
//! the installed [`NotificationSink`] and return immediately.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opcua::client::prelude::{
    AttributeId, BrowseDescription, BrowseDescriptionResultMask, BrowseDirection, Client,
    ClientBuilder, DataChangeCallback, ExtensionObject, IdentityToken,
    MonitoredItemCreateRequest, MonitoringMode, MonitoringParameters, ReadValueId,
    ReferenceTypeId, Session, TimestampsToReturn, WriteValue,
};
use opcua::sync::RwLock as UaRwLock;
use opcua::types::{self as ua, Variant};
use uapub_core::{StatusCode, Value};

use crate::client::transport::{
    BrowseReference, MonitoredItemRequest, MonitoredItemResult, Notification,
    NotificationBatch, NotificationSink, ReadResult, SubscriptionHandle, TransportFactory,
    UaTransport,
};
use crate::error::{
    ConnectionError, OpcUaError, OpcUaResult, OperationError, SecurityError, SessionError,
    SubscriptionError,
};
use crate::types::{
    ConnectionConfig, NodeId, NodeIdentifier, SecurityMode, SecurityPolicy, SubscriptionSettings,
    UserIdentity,
};

const APPLICATION_NAME: &str = "uapub";
const APPLICATION_URI: &str = "urn:uapub:publisher";

/// `Server_ServerStatus_State`, read as the keep-alive check.
const SERVER_STATE_NODE: u32 = 2259;

const BAD_SECURITY_CHECKS_FAILED: u32 = 0x8013_0000;
const BAD_CERTIFICATE_INVALID: u32 = 0x8012_0000;
const BAD_USER_ACCESS_DENIED: u32 = 0x801F_0000;
const BAD_IDENTITY_TOKEN_INVALID: u32 = 0x8020_0000;
const BAD_IDENTITY_TOKEN_REJECTED: u32 = 0x8021_0000;

type SharedSession = Arc<UaRwLock<Session>>;

// =============================================================================
// RealUaTransport
// =============================================================================

/// Transport over a real OPC UA session.
pub struct RealUaTransport {
    endpoint: String,
    session: Option<SharedSession>,
    sink: Option<NotificationSink>,
}

impl RealUaTransport {
    /// Creates an unconnected transport.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            session: None,
            sink: None,
        }
    }

    fn build_client(config: &ConnectionConfig) -> OpcUaResult<Client> {
        ClientBuilder::new()
            .application_name(APPLICATION_NAME)
            .application_uri(APPLICATION_URI)
            .create_sample_keypair(true)
            .trust_server_certs(true)
            .session_retry_limit(0)
            .session_timeout(config.session_timeout.as_millis() as u32)
            .client()
            .ok_or_else(|| {
                ConnectionError::invalid_endpoint(&config.endpoint_url, "failed to build client").into()
            })
    }

    fn security_policy(policy: SecurityPolicy) -> ua::SecurityPolicy {
        match policy {
            SecurityPolicy::None => ua::SecurityPolicy::None,
            SecurityPolicy::Basic256Sha256 => ua::SecurityPolicy::Basic256Sha256,
            SecurityPolicy::Aes128Sha256RsaOaep => ua::SecurityPolicy::Aes128Sha256RsaOaep,
            SecurityPolicy::Aes256Sha256RsaPss => ua::SecurityPolicy::Aes256Sha256RsaPss,
        }
    }

    fn security_mode(mode: SecurityMode) -> ua::MessageSecurityMode {
        match mode {
            SecurityMode::None => ua::MessageSecurityMode::None,
            SecurityMode::Sign => ua::MessageSecurityMode::Sign,
            SecurityMode::SignAndEncrypt => ua::MessageSecurityMode::SignAndEncrypt,
        }
    }

    fn identity_token(identity: &UserIdentity) -> IdentityToken {
        match identity {
            UserIdentity::Anonymous => IdentityToken::Anonymous,
            UserIdentity::UserName { username, password } => {
                IdentityToken::UserName(username.clone(), password.clone())
            }
            UserIdentity::Certificate {
                certificate_path,
                private_key_path,
            } => IdentityToken::X509(
                std::path::PathBuf::from(certificate_path),
                std::path::PathBuf::from(private_key_path),
            ),
        }
    }

    fn session(&self) -> OpcUaResult<SharedSession> {
        self.session.clone().ok_or_else(OpcUaError::not_connected)
    }

    /// Runs a blocking session call on the blocking pool.
    async fn blocking<T, F>(session: SharedSession, call: F) -> OpcUaResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> OpcUaResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let guard = session.read();
            call(&guard)
        })
        .await
        .map_err(|e| ConnectionError::closed(format!("session task failed: {e}")))?
    }

    fn connect_error(config: &ConnectionConfig, status: ua::StatusCode) -> OpcUaError {
        match status.bits() {
            BAD_USER_ACCESS_DENIED | BAD_IDENTITY_TOKEN_INVALID | BAD_IDENTITY_TOKEN_REJECTED => {
                SecurityError::authentication_failed(format!("{status}")).into()
            }
            BAD_SECURITY_CHECKS_FAILED | BAD_CERTIFICATE_INVALID => {
                SecurityError::certificate_rejected(format!("{status}")).into()
            }
            _ => ConnectionError::refused(&config.endpoint_url).into(),
        }
    }
}

// =============================================================================
// Conversion
// =============================================================================

fn to_ua_node_id(node_id: &NodeId) -> ua::NodeId {
    let ns = node_id.namespace_index;
    match &node_id.identifier {
        NodeIdentifier::Numeric(v) => ua::NodeId::new(ns, *v),
        NodeIdentifier::String(v) => ua::NodeId::new(ns, v.clone()),
        NodeIdentifier::Guid(v) => ua::NodeId::new(ns, ua::Guid::from(*v)),
        NodeIdentifier::Opaque(v) => ua::NodeId::new(ns, ua::ByteString::from(v.as_slice())),
    }
}

fn from_ua_node_id(node_id: &ua::NodeId) -> NodeId {
    let ns = node_id.namespace;
    match &node_id.identifier {
        ua::Identifier::Numeric(v) => NodeId::numeric(ns, *v),
        ua::Identifier::String(v) => NodeId::string(ns, v.as_ref()),
        ua::Identifier::Guid(v) => NodeId::guid(ns, uuid::Uuid::from_bytes(*v.as_bytes())),
        ua::Identifier::ByteString(v) => NodeId::opaque(ns, v.value.clone().unwrap_or_default()),
    }
}

fn from_variant(variant: &Variant) -> Value {
    match variant {
        Variant::Empty => Value::Null,
        Variant::Boolean(v) => Value::Boolean(*v),
        Variant::SByte(v) => Value::SByte(*v),
        Variant::Byte(v) => Value::Byte(*v),
        Variant::Int16(v) => Value::Int16(*v),
        Variant::UInt16(v) => Value::UInt16(*v),
        Variant::Int32(v) => Value::Int32(*v),
        Variant::UInt32(v) => Value::UInt32(*v),
        Variant::Int64(v) => Value::Int64(*v),
        Variant::UInt64(v) => Value::UInt64(*v),
        Variant::Float(v) => Value::Float(*v),
        Variant::Double(v) => Value::Double(*v),
        Variant::String(v) => Value::String(v.as_ref().to_string()),
        Variant::DateTime(v) => Value::DateTime(v.as_chrono()),
        Variant::Guid(v) => Value::String(uuid::Uuid::from_bytes(*v.as_bytes()).to_string()),
        Variant::ByteString(v) => Value::ByteString(v.value.clone().unwrap_or_default()),
        Variant::Array(array) => Value::Array(array.values.iter().map(from_variant).collect()),
        other => Value::String(format!("{other:?}")),
    }
}

fn to_variant(value: &Value) -> Variant {
    match value {
        Value::Null => Variant::Empty,
        Value::Boolean(v) => Variant::Boolean(*v),
        Value::SByte(v) => Variant::SByte(*v),
        Value::Byte(v) => Variant::Byte(*v),
        Value::Int16(v) => Variant::Int16(*v),
        Value::UInt16(v) => Variant::UInt16(*v),
        Value::Int32(v) => Variant::Int32(*v),
        Value::UInt32(v) => Variant::UInt32(*v),
        Value::Int64(v) => Variant::Int64(*v),
        Value::UInt64(v) => Variant::UInt64(*v),
        Value::Float(v) => Variant::Float(*v),
        Value::Double(v) => Variant::Double(*v),
        Value::String(v) => Variant::String(ua::UAString::from(v.as_str())),
        Value::ByteString(v) => Variant::ByteString(ua::ByteString::from(v.as_slice())),
        Value::DateTime(v) => Variant::DateTime(Box::new(ua::DateTime::from(*v))),
        Value::Array(values) => {
            let variants: Vec<Variant> = values.iter().map(to_variant).collect();
            ua::Array::new(ua::VariantTypeId::Variant, variants)
                .map(|array| Variant::Array(Box::new(array)))
                .unwrap_or(Variant::Empty)
        }
    }
}

fn status_of(status: Option<ua::StatusCode>) -> StatusCode {
    StatusCode(status.map(|s| s.bits()).unwrap_or(0))
}

fn timestamp(value: Option<ua::DateTime>) -> Option<DateTime<Utc>> {
    value.map(|t| t.as_chrono())
}

fn notification_from(client_handle: u32, data: &ua::DataValue) -> Notification {
    Notification {
        client_handle,
        sequence_number: 0,
        value: data.value.as_ref().map(from_variant).unwrap_or_default(),
        status: status_of(data.status),
        source_timestamp: timestamp(data.source_timestamp).unwrap_or_else(Utc::now),
        server_timestamp: timestamp(data.server_timestamp),
        is_heartbeat: false,
    }
}

fn value_read(node_id: &NodeId) -> ReadValueId {
    ReadValueId {
        node_id: to_ua_node_id(node_id),
        attribute_id: AttributeId::Value as u32,
        index_range: ua::UAString::null(),
        data_encoding: ua::QualifiedName::null(),
    }
}

// =============================================================================
// UaTransport
// =============================================================================

#[async_trait]
impl UaTransport for RealUaTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn set_notification_sink(&mut self, sink: NotificationSink) {
        self.sink = Some(sink);
    }

    async fn connect(&mut self, config: &ConnectionConfig) -> OpcUaResult<()> {
        tracing::info!(endpoint = %config.endpoint_url, "Connecting to OPC UA server");
        let config = config.clone();

        let session = tokio::task::spawn_blocking(move || -> OpcUaResult<SharedSession> {
            let mut client = Self::build_client(&config)?;
            let endpoints = client
                .get_server_endpoints_from_url(config.endpoint_url.as_str())
                .map_err(|_| ConnectionError::refused(&config.endpoint_url))?;

            let policy = Self::security_policy(config.security_policy);
            let mode = Self::security_mode(config.security_mode);
            let endpoint = endpoints
                .iter()
                .find(|e| e.security_policy_uri.as_ref() == policy.to_uri() && e.security_mode == mode)
                .cloned()
                .ok_or_else(|| {
                    ConnectionError::no_suitable_endpoint(
                        &config.endpoint_url,
                        config.security_mode.name(),
                        config.security_policy.name(),
                    )
                })?;

            client
                .connect_to_endpoint(endpoint, Self::identity_token(&config.identity))
                .map_err(|status| Self::connect_error(&config, status))
        })
        .await
        .map_err(|e| ConnectionError::closed(format!("connect task failed: {e}")))??;

        self.session = Some(session);
        tracing::info!(endpoint = %self.endpoint, "Connected to OPC UA server");
        Ok(())
    }

    async fn disconnect(&mut self) -> OpcUaResult<()> {
        if let Some(session) = self.session.take() {
            Self::blocking(session, |session| {
                session.disconnect();
                Ok(())
            })
            .await?;
            tracing::info!(endpoint = %self.endpoint, "Disconnected from OPC UA server");
        }
        Ok(())
    }

    async fn keep_alive(&mut self) -> OpcUaResult<()> {
        let session = self.session()?;
        let state_read = value_read(&NodeId::numeric(0, SERVER_STATE_NODE));
        Self::blocking(session, move |session| {
            session
                .read(&[state_read], TimestampsToReturn::Neither, 0.0)
                .map(|_| ())
                .map_err(|status| SessionError::keep_alive_failed(format!("{status}")).into())
        })
        .await
    }

    async fn read_values(&mut self, node_ids: &[NodeId]) -> OpcUaResult<Vec<ReadResult>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.session()?;
        let requests: Vec<ReadValueId> = node_ids.iter().map(value_read).collect();
        let node_ids = node_ids.to_vec();

        Self::blocking(session, move |session| {
            let values = session
                .read(&requests, TimestampsToReturn::Both, 0.0)
                .map_err(|status| OperationError::read_failed("batch", format!("{status}")))?;
            Ok(node_ids
                .into_iter()
                .zip(values)
                .map(|(node_id, data)| ReadResult {
                    node_id,
                    value: data.value.as_ref().map(from_variant).unwrap_or_default(),
                    status: status_of(data.status),
                    source_timestamp: timestamp(data.source_timestamp),
                })
                .collect())
        })
        .await
    }

    async fn write_values(&mut self, writes: &[(NodeId, Value)]) -> OpcUaResult<Vec<StatusCode>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.session()?;
        let requests: Vec<WriteValue> = writes
            .iter()
            .map(|(node_id, value)| WriteValue {
                node_id: to_ua_node_id(node_id),
                attribute_id: AttributeId::Value as u32,
                index_range: ua::UAString::null(),
                value: ua::DataValue::new_now(to_variant(value)),
            })
            .collect();

        Self::blocking(session, move |session| {
            session
                .write(&requests)
                .map(|results| results.iter().map(|s| StatusCode(s.bits())).collect())
                .map_err(|status| OperationError::write_failed("batch", format!("{status}")).into())
        })
        .await
    }

    async fn browse(&mut self, node_id: &NodeId) -> OpcUaResult<Vec<BrowseReference>> {
        let session = self.session()?;
        let description = BrowseDescription {
            node_id: to_ua_node_id(node_id),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BrowseDescriptionResultMask::all().bits(),
        };
        let target = node_id.to_string();

        Self::blocking(session, move |session| {
            let results = session
                .browse(&[description])
                .map_err(|status| OperationError::browse_failed(&target, format!("{status}")))?
                .unwrap_or_default();
            Ok(results
                .first()
                .and_then(|r| r.references.as_ref())
                .map(|references| {
                    references
                        .iter()
                        .map(|r| BrowseReference {
                            node_id: from_ua_node_id(&r.node_id.node_id),
                            browse_name: r.browse_name.name.as_ref().to_string(),
                            display_name: r.display_name.text.as_ref().to_string(),
                            node_class: format!("{:?}", r.node_class),
                        })
                        .collect()
                })
                .unwrap_or_default())
        })
        .await
    }

    async fn create_subscription(
        &mut self,
        settings: &SubscriptionSettings,
    ) -> OpcUaResult<SubscriptionHandle> {
        let session = self.session()?;
        let settings = settings.clone();
        let sink = self.sink.clone();
        let bound_id = Arc::new(AtomicU32::new(0));
        let callback_id = Arc::clone(&bound_id);

        let callback = DataChangeCallback::new(move |items| {
            let Some(sink) = &sink else { return };
            let notifications = items
                .iter()
                .map(|item| notification_from(item.client_handle(), item.last_value()))
                .collect();
            sink.deliver(NotificationBatch {
                subscription_id: callback_id.load(Ordering::Acquire),
                notifications,
            });
        });

        let interval = settings.publishing_interval;
        let server_id = Self::blocking(session, move |session| {
            session
                .create_subscription(
                    interval.as_millis() as f64,
                    settings.lifetime_count,
                    settings.max_keep_alive_count,
                    settings.max_notifications_per_publish,
                    settings.priority,
                    true,
                    callback,
                )
                .map_err(|status| SubscriptionError::creation_failed("", format!("{status}")).into())
        })
        .await?;

        bound_id.store(server_id, Ordering::Release);
        Ok(SubscriptionHandle {
            server_id,
            revised_publishing_interval: interval,
        })
    }

    async fn delete_subscription(&mut self, subscription_id: u32) -> OpcUaResult<()> {
        let session = self.session()?;
        Self::blocking(session, move |session| {
            session
                .delete_subscription(subscription_id)
                .map(|_| ())
                .map_err(|_| SubscriptionError::not_found(subscription_id.to_string()).into())
        })
        .await
    }

    async fn create_monitored_items(
        &mut self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<MonitoredItemResult>> {
        let session = self.session()?;
        let handles: Vec<u32> = items.iter().map(|i| i.client_handle).collect();
        let requests: Vec<MonitoredItemCreateRequest> = items
            .iter()
            .map(|item| MonitoredItemCreateRequest {
                item_to_monitor: value_read(&item.node_id),
                monitoring_mode: MonitoringMode::Reporting,
                requested_parameters: MonitoringParameters {
                    client_handle: item.client_handle,
                    sampling_interval: item.sampling_interval.as_millis() as f64,
                    filter: ExtensionObject::null(),
                    queue_size: item.queue_size,
                    discard_oldest: item.discard_oldest,
                },
            })
            .collect();

        Self::blocking(session, move |session| {
            let results = session
                .create_monitored_items(subscription_id, TimestampsToReturn::Both, &requests)
                .map_err(|status| {
                    SubscriptionError::creation_failed(subscription_id.to_string(), format!("{status}"))
                })?;
            Ok(handles
                .into_iter()
                .zip(results)
                .map(|(handle, result)| {
                    if result.status_code.is_good() {
                        MonitoredItemResult::accepted(handle, result.monitored_item_id)
                    } else {
                        MonitoredItemResult::rejected(handle, StatusCode(result.status_code.bits()))
                    }
                })
                .collect())
        })
        .await
    }

    async fn delete_monitored_items(
        &mut self,
        subscription_id: u32,
        item_ids: &[u32],
    ) -> OpcUaResult<()> {
        let session = self.session()?;
        let item_ids = item_ids.to_vec();
        Self::blocking(session, move |session| {
            session
                .delete_monitored_items(subscription_id, &item_ids)
                .map(|_| ())
                .map_err(|status| {
                    SubscriptionError::creation_failed(subscription_id.to_string(), format!("{status}")).into()
                })
        })
        .await
    }
}

/// Creates [`RealUaTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTransportFactory;

impl TransportFactory for RealTransportFactory {
    fn create(&self, config: &ConnectionConfig) -> Box<dyn UaTransport> {
        Box::new(RealUaTransport::new(config.endpoint_url.clone()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_conversion() {
        for node in [
            NodeId::numeric(2, 1001),
            NodeId::string(2, "Boiler.Temperature"),
            NodeId::opaque(3, vec![1, 2, 3]),
        ] {
            assert_eq!(from_ua_node_id(&to_ua_node_id(&node)), node);
        }
    }

    #[test]
    fn test_value_conversion() {
        for value in [
            Value::Boolean(true),
            Value::Double(3.5),
            Value::String("hello".into()),
            Value::Null,
        ] {
            assert_eq!(from_variant(&to_variant(&value)), value);
        }
    }

    #[test]
    fn test_transport_starts_disconnected() {
        let transport = RealUaTransport::new("opc.tcp://localhost:4840");
        assert!(!transport.is_connected());
        assert_eq!(transport.endpoint(), "opc.tcp://localhost:4840");
    }
}
