//! Application interface
//!
//! Application plugins receive resource change messages for software
//! running on the managed instances.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode, encode, unknown_op, PluginError, PluginKind};
use crate::client::Client;
use crate::error::RpcError;
use crate::messages::ErrorPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationMessage {
    pub op: Operation,
    /// Resource the change applies to
    pub resource: String,
    #[serde(default)]
    pub data: Value,
}

/// Application plugin
pub trait ApplicationPlugin: Send + Sync + 'static {
    fn validate(&self, properties: &Value) -> Result<(), PluginError>;

    fn update(&self, message: ApplicationMessage) -> Result<(), PluginError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ValidateParams {
    #[serde(default)]
    properties: Value,
}

pub(crate) fn dispatch(plugin: &dyn ApplicationPlugin, op: &str, params: Value) -> Result<Value, ErrorPayload> {
    match op {
        "Validate" => {
            let p: ValidateParams = decode(params)?;
            encode(plugin.validate(&p.properties)?)
        }
        "Update" => {
            let message: ApplicationMessage = decode(params)?;
            encode(plugin.update(message)?)
        }
        _ => Err(unknown_op(PluginKind::Application, op)),
    }
}

/// Typed client for an application plugin
#[derive(Debug, Clone)]
pub struct ApplicationClient {
    client: Client,
}

impl ApplicationClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn validate(&self, properties: Value) -> Result<(), RpcError> {
        self.client
            .call(&PluginKind::Application.method("Validate"), ValidateParams { properties })
            .await
    }

    pub async fn update(&self, message: &ApplicationMessage) -> Result<(), RpcError> {
        self.client
            .call(&PluginKind::Application.method("Update"), message)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ApplicationMessage>>,
    }

    impl ApplicationPlugin for Recorder {
        fn validate(&self, properties: &Value) -> Result<(), PluginError> {
            if properties.is_object() {
                Ok(())
            } else {
                Err(PluginError::InvalidInput("properties must be an object".into()))
            }
        }

        fn update(&self, message: ApplicationMessage) -> Result<(), PluginError> {
            self.seen.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[test]
    fn test_update_decodes_every_operation() {
        let recorder = Recorder::default();
        for op in ["Add", "Update", "Delete"] {
            let reply = dispatch(&recorder, "Update", json!({"op": op, "resource": "web"})).unwrap();
            assert_eq!(reply, Value::Null);
        }

        let seen = recorder.seen.lock().unwrap();
        let ops: Vec<Operation> = seen.iter().map(|m| m.op).collect();
        assert_eq!(ops, vec![Operation::Add, Operation::Update, Operation::Delete]);
        assert_eq!(seen[0].data, Value::Null);
    }

    #[test]
    fn test_bad_requests_map_to_codes() {
        let recorder = Recorder::default();
        let err = dispatch(&recorder, "Validate", json!({"properties": 3})).unwrap_err();
        assert_eq!(err.code, crate::messages::codes::INVALID_PARAMS);

        let err = dispatch(&recorder, "Update", json!({"op": "Upsert", "resource": "web"})).unwrap_err();
        assert_eq!(err.code, crate::messages::codes::INVALID_PARAMS);

        let err = dispatch(&recorder, "Rollback", json!({})).unwrap_err();
        assert_eq!(err.code, crate::messages::codes::METHOD_NOT_FOUND);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
