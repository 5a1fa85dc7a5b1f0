//! Plugin-kind dispatch
//!
//! A plugin process serves one or more of a fixed set of interfaces. Each
//! kind has a trait the business logic implements, a [`Service`] variant
//! wrapping it, and a typed client. The [`Dispatcher`] routes
//! `Kind.Method` names by matching on explicit method strings.

pub mod application;
pub mod flavor;
pub mod group;
pub mod instance;
pub mod metadata;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::{codes, ErrorPayload};
use crate::server::Handler;
use crate::{IMPLEMENTS_METHOD, RPC_SCHEMA_VERSION};

pub use application::{ApplicationClient, ApplicationPlugin};
pub use flavor::{FlavorClient, FlavorPlugin};
pub use group::{GroupClient, GroupPlugin};
pub use instance::{InstanceClient, InstancePlugin};
pub use metadata::{MemoryMetadata, MetadataClient, MetadataPlugin};

/// Interfaces a plugin can implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PluginKind {
    Instance,
    Flavor,
    Group,
    Application,
    Metadata,
}

impl PluginKind {
    pub const ALL: [PluginKind; 5] = [
        PluginKind::Instance,
        PluginKind::Flavor,
        PluginKind::Group,
        PluginKind::Application,
        PluginKind::Metadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Instance => "Instance",
            PluginKind::Flavor => "Flavor",
            PluginKind::Group => "Group",
            PluginKind::Application => "Application",
            PluginKind::Metadata => "Metadata",
        }
    }

    /// Full wire name of `op` on this interface
    pub fn method(&self, op: &str) -> String {
        format!("{}.{}", self.as_str(), op)
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = ErrorPayload;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ErrorPayload::new(codes::METHOD_NOT_FOUND, format!("Unknown interface: {}", s)))
    }
}

/// An implemented interface, as reported by the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spi {
    pub kind: PluginKind,
    pub version: u32,
}

/// Errors returned by plugin implementations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PluginError {
    pub fn code(&self) -> &'static str {
        match self {
            PluginError::NotFound(_) => codes::NOT_FOUND,
            PluginError::InvalidInput(_) => codes::INVALID_PARAMS,
            PluginError::Unsupported(_) => codes::UNSUPPORTED,
            PluginError::Internal(_) => codes::INTERNAL,
        }
    }
}

impl From<PluginError> for ErrorPayload {
    fn from(e: PluginError) -> Self {
        ErrorPayload::new(e.code(), e.to_string())
    }
}

/// One served interface
#[derive(Clone)]
pub enum Service {
    Instance(Arc<dyn InstancePlugin>),
    Flavor(Arc<dyn FlavorPlugin>),
    Group(Arc<dyn GroupPlugin>),
    Application(Arc<dyn ApplicationPlugin>),
    Metadata(Arc<dyn MetadataPlugin>),
}

impl Service {
    pub fn kind(&self) -> PluginKind {
        match self {
            Service::Instance(_) => PluginKind::Instance,
            Service::Flavor(_) => PluginKind::Flavor,
            Service::Group(_) => PluginKind::Group,
            Service::Application(_) => PluginKind::Application,
            Service::Metadata(_) => PluginKind::Metadata,
        }
    }

    fn dispatch(&self, op: &str, params: serde_json::Value) -> Result<serde_json::Value, ErrorPayload> {
        match self {
            Service::Instance(p) => instance::dispatch(p.as_ref(), op, params),
            Service::Flavor(p) => flavor::dispatch(p.as_ref(), op, params),
            Service::Group(p) => group::dispatch(p.as_ref(), op, params),
            Service::Application(p) => application::dispatch(p.as_ref(), op, params),
            Service::Metadata(p) => metadata::dispatch(p.as_ref(), op, params),
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Service").field(&self.kind()).finish()
    }
}

/// Routes `Kind.Method` calls to the served interfaces
#[derive(Debug, Default, Clone)]
pub struct Dispatcher {
    services: Vec<Service>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `service`, replacing any service of the same kind
    pub fn with(mut self, service: Service) -> Self {
        self.services.retain(|s| s.kind() != service.kind());
        self.services.push(service);
        self
    }

    pub fn implements(&self) -> Vec<Spi> {
        let mut spis: Vec<Spi> = self
            .services
            .iter()
            .map(|s| Spi {
                kind: s.kind(),
                version: RPC_SCHEMA_VERSION,
            })
            .collect();
        spis.sort_by_key(|s| s.kind);
        spis
    }
}

impl Handler for Dispatcher {
    fn handle(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ErrorPayload> {
        if method == IMPLEMENTS_METHOD {
            return encode(self.implements());
        }

        let (kind, op) = method
            .split_once('.')
            .ok_or_else(|| ErrorPayload::method_not_found(method))?;
        let kind: PluginKind = kind.parse()?;

        let service = self
            .services
            .iter()
            .find(|s| s.kind() == kind)
            .ok_or_else(|| {
                ErrorPayload::new(
                    codes::METHOD_NOT_FOUND,
                    format!("Interface {} is not served here", kind),
                )
            })?;

        service.dispatch(op, params)
    }
}

pub(crate) fn decode<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, ErrorPayload> {
    serde_json::from_value(params).map_err(|e| ErrorPayload::invalid_params(e.to_string()))
}

pub(crate) fn encode<T: Serialize>(value: T) -> Result<serde_json::Value, ErrorPayload> {
    serde_json::to_value(value).map_err(|e| ErrorPayload::internal(e.to_string()))
}

pub(crate) fn unknown_op(kind: PluginKind, op: &str) -> ErrorPayload {
    ErrorPayload::method_not_found(&kind.method(op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata_dispatcher() -> Dispatcher {
        let store = MemoryMetadata::new();
        store.set("region", json!("us-east-1"));
        Dispatcher::new().with(Service::Metadata(Arc::new(store)))
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in PluginKind::ALL {
            assert_eq!(kind.as_str().parse::<PluginKind>().unwrap(), kind);
        }
        assert!("instance".parse::<PluginKind>().is_err());
    }

    #[test]
    fn test_implements_handshake() {
        let d = metadata_dispatcher();
        let value = d.handle(IMPLEMENTS_METHOD, serde_json::Value::Null).unwrap();
        let spis: Vec<Spi> = serde_json::from_value(value).unwrap();
        assert_eq!(
            spis,
            vec![Spi {
                kind: PluginKind::Metadata,
                version: RPC_SCHEMA_VERSION
            }]
        );
    }

    #[test]
    fn test_routes_to_service() {
        let d = metadata_dispatcher();
        let value = d.handle("Metadata.Get", json!({"path": "region"})).unwrap();
        assert_eq!(value, json!("us-east-1"));
    }

    #[test]
    fn test_unserved_interface() {
        let d = metadata_dispatcher();
        let err = d.handle("Group.InspectGroups", json!({})).unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_malformed_method_names() {
        let d = metadata_dispatcher();
        for method in ["NoDot", "Bogus.Get", "Metadata.Bogus"] {
            let err = d.handle(method, json!({})).unwrap_err();
            assert_eq!(err.code, codes::METHOD_NOT_FOUND, "{}", method);
        }
    }

    #[test]
    fn test_with_replaces_same_kind() {
        let d = metadata_dispatcher().with(Service::Metadata(Arc::new(MemoryMetadata::new())));
        assert_eq!(d.implements().len(), 1);
        let value = d.handle("Metadata.Get", json!({"path": "region"})).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_plugin_error_codes() {
        let payload: ErrorPayload = PluginError::NotFound("group workers".into()).into();
        assert_eq!(payload.code, codes::NOT_FOUND);
        assert!(payload.message.contains("group workers"));
    }
}
