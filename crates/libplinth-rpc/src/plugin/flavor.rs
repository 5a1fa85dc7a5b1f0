//! Flavor interface
//!
//! Flavor plugins shape an instance spec before provisioning (install
//! software, join a cluster) and judge the health of running instances.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::instance::{InstanceDescription, InstanceSpec};
use super::{decode, encode, unknown_op, PluginError, PluginKind};
use crate::client::Client;
use crate::error::RpcError;
use crate::messages::ErrorPayload;

/// How a group sizes its instances: a count for cattle, fixed ids for pets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logical_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Flavor plugin
pub trait FlavorPlugin: Send + Sync + 'static {
    fn validate(&self, properties: &Value, allocation: &Allocation) -> Result<(), PluginError>;

    fn prepare(
        &self,
        properties: &Value,
        spec: InstanceSpec,
        allocation: &Allocation,
    ) -> Result<InstanceSpec, PluginError>;

    fn healthy(&self, properties: &Value, instance: &InstanceDescription) -> Result<Health, PluginError>;

    /// Called before an instance is destroyed
    fn drain(&self, properties: &Value, instance: &InstanceDescription) -> Result<(), PluginError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ValidateParams {
    #[serde(default)]
    properties: Value,
    #[serde(default)]
    allocation: Allocation,
}

#[derive(Debug, Serialize, Deserialize)]
struct PrepareParams {
    #[serde(default)]
    properties: Value,
    spec: InstanceSpec,
    #[serde(default)]
    allocation: Allocation,
}

#[derive(Debug, Serialize, Deserialize)]
struct InstanceParams {
    #[serde(default)]
    properties: Value,
    instance: InstanceDescription,
}

pub(crate) fn dispatch(plugin: &dyn FlavorPlugin, op: &str, params: Value) -> Result<Value, ErrorPayload> {
    match op {
        "Validate" => {
            let p: ValidateParams = decode(params)?;
            encode(plugin.validate(&p.properties, &p.allocation)?)
        }
        "Prepare" => {
            let p: PrepareParams = decode(params)?;
            encode(plugin.prepare(&p.properties, p.spec, &p.allocation)?)
        }
        "Healthy" => {
            let p: InstanceParams = decode(params)?;
            encode(plugin.healthy(&p.properties, &p.instance)?)
        }
        "Drain" => {
            let p: InstanceParams = decode(params)?;
            encode(plugin.drain(&p.properties, &p.instance)?)
        }
        _ => Err(unknown_op(PluginKind::Flavor, op)),
    }
}

/// Typed client for a flavor plugin
#[derive(Debug, Clone)]
pub struct FlavorClient {
    client: Client,
}

impl FlavorClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn method(op: &str) -> String {
        PluginKind::Flavor.method(op)
    }

    pub async fn validate(&self, properties: Value, allocation: Allocation) -> Result<(), RpcError> {
        let params = ValidateParams {
            properties,
            allocation,
        };
        self.client.call(&Self::method("Validate"), params).await
    }

    pub async fn prepare(
        &self,
        properties: Value,
        spec: InstanceSpec,
        allocation: Allocation,
    ) -> Result<InstanceSpec, RpcError> {
        let params = PrepareParams {
            properties,
            spec,
            allocation,
        };
        self.client.call(&Self::method("Prepare"), params).await
    }

    pub async fn healthy(
        &self,
        properties: Value,
        instance: InstanceDescription,
    ) -> Result<Health, RpcError> {
        let params = InstanceParams { properties, instance };
        self.client.call(&Self::method("Healthy"), params).await
    }

    pub async fn drain(&self, properties: Value, instance: InstanceDescription) -> Result<(), RpcError> {
        let params = InstanceParams { properties, instance };
        self.client.call(&Self::method("Drain"), params).await
    }
}
