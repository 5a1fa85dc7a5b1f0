//! Metadata interface
//!
//! Metadata is a read-only tree of values addressed by slash-separated
//! paths (`aws/region`, `cluster/size`).

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode, encode, unknown_op, PluginError, PluginKind};
use crate::client::Client;
use crate::error::RpcError;
use crate::messages::ErrorPayload;

/// Metadata plugin
pub trait MetadataPlugin: Send + Sync + 'static {
    /// Names of the children of `path`; the empty path lists the root
    fn list(&self, path: &str) -> Result<Vec<String>, PluginError>;

    /// Value at `path`, if any
    fn get(&self, path: &str) -> Result<Option<Value>, PluginError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PathParams {
    #[serde(default)]
    path: String,
}

pub(crate) fn dispatch(plugin: &dyn MetadataPlugin, op: &str, params: Value) -> Result<Value, ErrorPayload> {
    match op {
        "List" => {
            let p: PathParams = decode(params)?;
            encode(plugin.list(&p.path)?)
        }
        "Get" => {
            let p: PathParams = decode(params)?;
            encode(plugin.get(&p.path)?)
        }
        _ => Err(unknown_op(PluginKind::Metadata, op)),
    }
}

/// Typed client for a metadata plugin
#[derive(Debug, Clone)]
pub struct MetadataClient {
    client: Client,
}

impl MetadataClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn list(&self, path: &str) -> Result<Vec<String>, RpcError> {
        let params = PathParams { path: path.to_string() };
        self.client.call(&PluginKind::Metadata.method("List"), params).await
    }

    pub async fn get(&self, path: &str) -> Result<Option<Value>, RpcError> {
        let params = PathParams { path: path.to_string() };
        self.client.call(&PluginKind::Metadata.method("Get"), params).await
    }
}

/// In-memory metadata tree
#[derive(Debug)]
pub struct MemoryMetadata {
    root: RwLock<Value>,
}

impl Default for MemoryMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Default::default())),
        }
    }

    /// Set `path` to `value`, creating intermediate nodes. A scalar found on
    /// the way is replaced by an object.
    pub fn set(&self, path: &str, value: Value) {
        let mut root = self.root.write().unwrap_or_else(|e| e.into_inner());
        let mut node = &mut *root;
        let segments: Vec<&str> = segments(path).collect();
        let Some((last, parents)) = segments.split_last() else {
            *node = value;
            return;
        };

        for segment in parents {
            if !node.is_object() {
                *node = Value::Object(Default::default());
            }
            let Value::Object(map) = node else {
                return;
            };
            node = map.entry(segment.to_string()).or_insert(Value::Null);
        }
        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        if let Value::Object(map) = node {
            map.insert(last.to_string(), value);
        }
    }

    fn lookup(&self, path: &str) -> Option<Value> {
        let root = self.root.read().unwrap_or_else(|e| e.into_inner());
        let mut node = &*root;
        for segment in segments(path) {
            node = node.as_object()?.get(segment)?;
        }
        Some(node.clone())
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl MetadataPlugin for MemoryMetadata {
    fn list(&self, path: &str) -> Result<Vec<String>, PluginError> {
        match self.lookup(path) {
            Some(Value::Object(map)) => Ok(map.keys().cloned().collect()),
            Some(_) => Ok(Vec::new()),
            None => Err(PluginError::NotFound(format!("metadata path '{}'", path))),
        }
    }

    fn get(&self, path: &str) -> Result<Option<Value>, PluginError> {
        Ok(self.lookup(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get() {
        let store = MemoryMetadata::new();
        store.set("aws/region", json!("eu-west-1"));
        store.set("aws/zones", json!(["a", "b"]));
        store.set("cluster/size", json!(3));

        assert_eq!(store.get("aws/region").unwrap(), Some(json!("eu-west-1")));
        assert_eq!(store.get("/cluster/size/").unwrap(), Some(json!(3)));
        assert_eq!(store.get("aws/missing").unwrap(), None);
    }

    #[test]
    fn test_list_children() {
        let store = MemoryMetadata::new();
        store.set("aws/region", json!("eu-west-1"));
        store.set("aws/zones", json!(["a"]));
        store.set("cluster/size", json!(3));

        assert_eq!(store.list("").unwrap(), vec!["aws", "cluster"]);
        assert_eq!(store.list("aws").unwrap(), vec!["region", "zones"]);
        assert!(store.list("cluster/size").unwrap().is_empty());
        assert!(matches!(store.list("nope"), Err(PluginError::NotFound(_))));
    }

    #[test]
    fn test_set_overwrites_scalar_parent() {
        let store = MemoryMetadata::new();
        store.set("a", json!(1));
        store.set("a/b", json!(2));
        assert_eq!(store.get("a").unwrap(), Some(json!({"b": 2})));
    }

    #[test]
    fn test_dispatch_decodes_params() {
        let store = MemoryMetadata::new();
        store.set("x", json!(true));
        assert_eq!(dispatch(&store, "Get", json!({"path": "x"})).unwrap(), json!(true));
        let err = dispatch(&store, "Get", json!({"path": 7})).unwrap_err();
        assert_eq!(err.code, crate::messages::codes::INVALID_PARAMS);
    }
}
