//! Group interface
//!
//! Group plugins keep a set of instances converged on a committed spec.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::instance::InstanceDescription;
use super::{decode, encode, unknown_op, PluginError, PluginKind};
use crate::client::Client;
use crate::error::RpcError;
use crate::messages::ErrorPayload;

pub type GroupId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub id: GroupId,
    #[serde(default)]
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescription {
    pub instances: Vec<InstanceDescription>,
    pub converged: bool,
}

/// Group plugin
pub trait GroupPlugin: Send + Sync + 'static {
    /// Start managing `spec`; with `pretend` only describe what would change
    fn commit_group(&self, spec: GroupSpec, pretend: bool) -> Result<String, PluginError>;

    /// Stop managing a group, leaving its instances alone
    fn free_group(&self, id: &str) -> Result<(), PluginError>;

    fn describe_group(&self, id: &str) -> Result<GroupDescription, PluginError>;

    /// Stop managing a group and destroy its instances
    fn destroy_group(&self, id: &str) -> Result<(), PluginError>;

    fn inspect_groups(&self) -> Result<Vec<GroupSpec>, PluginError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CommitParams {
    spec: GroupSpec,
    #[serde(default)]
    pretend: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct IdParams {
    id: GroupId,
}

pub(crate) fn dispatch(plugin: &dyn GroupPlugin, op: &str, params: Value) -> Result<Value, ErrorPayload> {
    match op {
        "CommitGroup" => {
            let p: CommitParams = decode(params)?;
            encode(plugin.commit_group(p.spec, p.pretend)?)
        }
        "FreeGroup" => {
            let p: IdParams = decode(params)?;
            encode(plugin.free_group(&p.id)?)
        }
        "DescribeGroup" => {
            let p: IdParams = decode(params)?;
            encode(plugin.describe_group(&p.id)?)
        }
        "DestroyGroup" => {
            let p: IdParams = decode(params)?;
            encode(plugin.destroy_group(&p.id)?)
        }
        "InspectGroups" => encode(plugin.inspect_groups()?),
        _ => Err(unknown_op(PluginKind::Group, op)),
    }
}

/// Typed client for a group plugin
#[derive(Debug, Clone)]
pub struct GroupClient {
    client: Client,
}

impl GroupClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn method(op: &str) -> String {
        PluginKind::Group.method(op)
    }

    pub async fn commit_group(&self, spec: GroupSpec, pretend: bool) -> Result<String, RpcError> {
        let params = CommitParams { spec, pretend };
        self.client.call(&Self::method("CommitGroup"), params).await
    }

    pub async fn free_group(&self, id: &str) -> Result<(), RpcError> {
        let params = IdParams { id: id.to_string() };
        self.client.call(&Self::method("FreeGroup"), params).await
    }

    pub async fn describe_group(&self, id: &str) -> Result<GroupDescription, RpcError> {
        let params = IdParams { id: id.to_string() };
        self.client.call(&Self::method("DescribeGroup"), params).await
    }

    pub async fn destroy_group(&self, id: &str) -> Result<(), RpcError> {
        let params = IdParams { id: id.to_string() };
        self.client.call(&Self::method("DestroyGroup"), params).await
    }

    pub async fn inspect_groups(&self) -> Result<Vec<GroupSpec>, RpcError> {
        self.client.call(&Self::method("InspectGroups"), ()).await
    }
}
