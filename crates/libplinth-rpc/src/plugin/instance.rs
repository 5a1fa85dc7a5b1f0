//! Instance interface
//!
//! Instance plugins provision and destroy compute instances on some
//! provider. Instances are found again through their tags.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode, encode, unknown_op, PluginError, PluginKind};
use crate::client::Client;
use crate::error::RpcError;
use crate::messages::ErrorPayload;

/// Provider-assigned instance identifier
pub type InstanceId = String;

/// What to provision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Provider-specific properties
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Boot script
    #[serde(default)]
    pub init: String,
    /// Stable identity for pets (e.g. a fixed IP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

/// A provisioned instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub id: InstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Instance plugin
pub trait InstancePlugin: Send + Sync + 'static {
    fn validate(&self, properties: &Value) -> Result<(), PluginError>;

    /// Returns the new instance's id, if the provider assigns one synchronously
    fn provision(&self, spec: InstanceSpec) -> Result<Option<InstanceId>, PluginError>;

    fn label(&self, id: &str, labels: BTreeMap<String, String>) -> Result<(), PluginError>;

    fn destroy(&self, id: &str) -> Result<(), PluginError>;

    /// Instances carrying every one of `tags`
    fn describe_instances(
        &self,
        tags: &BTreeMap<String, String>,
    ) -> Result<Vec<InstanceDescription>, PluginError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ValidateParams {
    #[serde(default)]
    properties: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct LabelParams {
    id: InstanceId,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IdParams {
    id: InstanceId,
}

#[derive(Debug, Serialize, Deserialize)]
struct TagsParams {
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

pub(crate) fn dispatch(plugin: &dyn InstancePlugin, op: &str, params: Value) -> Result<Value, ErrorPayload> {
    match op {
        "Validate" => {
            let p: ValidateParams = decode(params)?;
            encode(plugin.validate(&p.properties)?)
        }
        "Provision" => {
            let spec: InstanceSpec = decode(params)?;
            encode(plugin.provision(spec)?)
        }
        "Label" => {
            let p: LabelParams = decode(params)?;
            encode(plugin.label(&p.id, p.labels)?)
        }
        "Destroy" => {
            let p: IdParams = decode(params)?;
            encode(plugin.destroy(&p.id)?)
        }
        "DescribeInstances" => {
            let p: TagsParams = decode(params)?;
            encode(plugin.describe_instances(&p.tags)?)
        }
        _ => Err(unknown_op(PluginKind::Instance, op)),
    }
}

/// Typed client for an instance plugin
#[derive(Debug, Clone)]
pub struct InstanceClient {
    client: Client,
}

impl InstanceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn method(op: &str) -> String {
        PluginKind::Instance.method(op)
    }

    pub async fn validate(&self, properties: Value) -> Result<(), RpcError> {
        self.client
            .call(&Self::method("Validate"), ValidateParams { properties })
            .await
    }

    pub async fn provision(&self, spec: &InstanceSpec) -> Result<Option<InstanceId>, RpcError> {
        self.client.call(&Self::method("Provision"), spec).await
    }

    pub async fn label(&self, id: &str, labels: BTreeMap<String, String>) -> Result<(), RpcError> {
        let params = LabelParams {
            id: id.to_string(),
            labels,
        };
        self.client.call(&Self::method("Label"), params).await
    }

    pub async fn destroy(&self, id: &str) -> Result<(), RpcError> {
        let params = IdParams { id: id.to_string() };
        self.client.call(&Self::method("Destroy"), params).await
    }

    pub async fn describe_instances(
        &self,
        tags: BTreeMap<String, String>,
    ) -> Result<Vec<InstanceDescription>, RpcError> {
        self.client
            .call(&Self::method("DescribeInstances"), TagsParams { tags })
            .await
    }
}
