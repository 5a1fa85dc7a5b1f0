//! Typed plugin clients against a dispatcher served over a socket

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use libplinth_rpc::plugin::application::{ApplicationMessage, Operation};
use libplinth_rpc::plugin::flavor::{Allocation, Health};
use libplinth_rpc::plugin::group::{GroupDescription, GroupSpec};
use libplinth_rpc::plugin::instance::{InstanceDescription, InstanceId, InstanceSpec};
use libplinth_rpc::plugin::{
    ApplicationClient, ApplicationPlugin, Dispatcher, FlavorClient, FlavorPlugin, GroupClient,
    GroupPlugin, InstanceClient, InstancePlugin, PluginError, PluginKind, Service, Spi,
};
use libplinth_rpc::{Client, RpcError, Server, RPC_SCHEMA_VERSION};
use serde_json::{json, Value};
use tempfile::tempdir;

#[derive(Default)]
struct Groups {
    specs: Mutex<BTreeMap<String, GroupSpec>>,
}

impl GroupPlugin for Groups {
    fn commit_group(&self, spec: GroupSpec, pretend: bool) -> Result<String, PluginError> {
        let summary = format!("commit {}", spec.id);
        if !pretend {
            self.specs.lock().unwrap().insert(spec.id.clone(), spec);
        }
        Ok(summary)
    }

    fn free_group(&self, id: &str) -> Result<(), PluginError> {
        self.specs
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PluginError::NotFound(format!("group {}", id)))
    }

    fn describe_group(&self, id: &str) -> Result<GroupDescription, PluginError> {
        if !self.specs.lock().unwrap().contains_key(id) {
            return Err(PluginError::NotFound(format!("group {}", id)));
        }
        Ok(GroupDescription {
            instances: vec![InstanceDescription {
                id: format!("{}-1", id),
                logical_id: None,
                tags: BTreeMap::new(),
            }],
            converged: true,
        })
    }

    fn destroy_group(&self, id: &str) -> Result<(), PluginError> {
        self.free_group(id)
    }

    fn inspect_groups(&self) -> Result<Vec<GroupSpec>, PluginError> {
        Ok(self.specs.lock().unwrap().values().cloned().collect())
    }
}

struct Tagger;

impl FlavorPlugin for Tagger {
    fn validate(&self, _properties: &Value, allocation: &Allocation) -> Result<(), PluginError> {
        if allocation.size.is_none() && allocation.logical_ids.is_empty() {
            return Err(PluginError::InvalidInput("empty allocation".into()));
        }
        Ok(())
    }

    fn prepare(
        &self,
        properties: &Value,
        mut spec: InstanceSpec,
        _allocation: &Allocation,
    ) -> Result<InstanceSpec, PluginError> {
        if let Some(role) = properties.get("role").and_then(Value::as_str) {
            spec.tags.insert("role".into(), role.into());
        }
        Ok(spec)
    }

    fn healthy(&self, _properties: &Value, _instance: &InstanceDescription) -> Result<Health, PluginError> {
        Ok(Health::Healthy)
    }

    fn drain(&self, _properties: &Value, _instance: &InstanceDescription) -> Result<(), PluginError> {
        Err(PluginError::Unsupported("drain".into()))
    }
}

/// Records every change message it accepts
#[derive(Default)]
struct Deployments {
    changes: Mutex<Vec<(Operation, String, Value)>>,
}

impl ApplicationPlugin for Deployments {
    fn validate(&self, properties: &Value) -> Result<(), PluginError> {
        if properties.get("image").is_none() {
            return Err(PluginError::InvalidInput("image is required".into()));
        }
        Ok(())
    }

    fn update(&self, message: ApplicationMessage) -> Result<(), PluginError> {
        if message.resource.is_empty() {
            return Err(PluginError::InvalidInput("resource is required".into()));
        }
        self.changes
            .lock()
            .unwrap()
            .push((message.op, message.resource, message.data));
        Ok(())
    }
}

/// Keeps provisioned instances in memory
#[derive(Default)]
struct Fleet {
    instances: Mutex<Vec<InstanceDescription>>,
}

impl InstancePlugin for Fleet {
    fn validate(&self, properties: &Value) -> Result<(), PluginError> {
        match properties.get("size") {
            Some(_) => Ok(()),
            None => Err(PluginError::InvalidInput("size is required".into())),
        }
    }

    fn provision(&self, spec: InstanceSpec) -> Result<Option<InstanceId>, PluginError> {
        let mut instances = self.instances.lock().unwrap();
        let id = format!("vm-{}", instances.len() + 1);
        instances.push(InstanceDescription {
            id: id.clone(),
            logical_id: spec.logical_id,
            tags: spec.tags,
        });
        Ok(Some(id))
    }

    fn label(&self, id: &str, labels: BTreeMap<String, String>) -> Result<(), PluginError> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        instance.tags.extend(labels);
        Ok(())
    }

    fn destroy(&self, id: &str) -> Result<(), PluginError> {
        let mut instances = self.instances.lock().unwrap();
        let before = instances.len();
        instances.retain(|i| i.id != id);
        if instances.len() == before {
            return Err(PluginError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn describe_instances(
        &self,
        tags: &BTreeMap<String, String>,
    ) -> Result<Vec<InstanceDescription>, PluginError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|i| tags.iter().all(|(k, v)| i.tags.get(k) == Some(v)))
            .cloned()
            .collect())
    }
}

fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn remote_code(result: Result<impl std::fmt::Debug, RpcError>) -> String {
    match result {
        Err(RpcError::Remote { code, .. }) => code,
        other => panic!("expected a remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_application_and_instance_over_the_wire() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.sock");
    let deployments = Arc::new(Deployments::default());
    let dispatcher = Dispatcher::new()
        .with(Service::Application(deployments.clone()))
        .with(Service::Instance(Arc::new(Fleet::default())));

    let server = Server::start(&format!("unix://{}", path.display()), Arc::new(dispatcher), vec![])
        .await
        .unwrap();
    let client = Client::from_endpoint(server.endpoint().clone());
    assert_eq!(
        client.implements().await.unwrap(),
        vec![
            Spi { kind: PluginKind::Instance, version: RPC_SCHEMA_VERSION },
            Spi { kind: PluginKind::Application, version: RPC_SCHEMA_VERSION },
        ]
    );

    let app = ApplicationClient::new(client.clone());
    app.validate(json!({"image": "nginx:1.25"})).await.unwrap();
    assert_eq!(remote_code(app.validate(json!({})).await), "invalid_params");

    for (op, data) in [
        (Operation::Add, json!({"replicas": 1})),
        (Operation::Update, json!({"replicas": 3})),
        (Operation::Delete, Value::Null),
    ] {
        let message = ApplicationMessage {
            op,
            resource: "web".into(),
            data,
        };
        app.update(&message).await.unwrap();
    }
    let empty = ApplicationMessage {
        op: Operation::Add,
        resource: String::new(),
        data: Value::Null,
    };
    assert_eq!(remote_code(app.update(&empty).await), "invalid_params");

    let changes = deployments.changes.lock().unwrap().clone();
    let ops: Vec<Operation> = changes.iter().map(|(op, _, _)| *op).collect();
    assert_eq!(ops, vec![Operation::Add, Operation::Update, Operation::Delete]);
    assert!(changes.iter().all(|(_, resource, _)| resource == "web"));
    assert_eq!(changes[1].2, json!({"replicas": 3}));

    // Operations travel by name on the wire
    client
        .call_raw("Application.Update", json!({"op": "Delete", "resource": "db"}))
        .await
        .unwrap();
    assert_eq!(
        remote_code(
            client
                .call_raw("Application.Update", json!({"op": "Restart", "resource": "db"}))
                .await
        ),
        "invalid_params"
    );
    assert_eq!(
        remote_code(client.call_raw("Application.Rollback", json!({})).await),
        "method_not_found"
    );

    let fleet = InstanceClient::new(client.clone());
    fleet.validate(json!({"size": "small"})).await.unwrap();
    assert_eq!(remote_code(fleet.validate(json!({})).await), "invalid_params");

    let worker = InstanceSpec {
        tags: tags(&[("group", "workers")]),
        init: "echo hi".into(),
        ..InstanceSpec::default()
    };
    let pet = InstanceSpec {
        tags: tags(&[("group", "managers")]),
        logical_id: Some("10.0.0.5".into()),
        ..InstanceSpec::default()
    };
    assert_eq!(fleet.provision(&worker).await.unwrap().as_deref(), Some("vm-1"));
    assert_eq!(fleet.provision(&pet).await.unwrap().as_deref(), Some("vm-2"));

    fleet.label("vm-1", tags(&[("zone", "a")])).await.unwrap();
    assert_eq!(
        remote_code(fleet.label("vm-9", tags(&[("zone", "a")])).await),
        "not_found"
    );

    let workers = fleet.describe_instances(tags(&[("group", "workers")])).await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].tags, tags(&[("group", "workers"), ("zone", "a")]));

    let managers = fleet.describe_instances(tags(&[("group", "managers")])).await.unwrap();
    assert_eq!(managers[0].logical_id.as_deref(), Some("10.0.0.5"));
    assert_eq!(fleet.describe_instances(BTreeMap::new()).await.unwrap().len(), 2);

    fleet.destroy("vm-1").await.unwrap();
    assert_eq!(remote_code(fleet.destroy("vm-1").await), "not_found");
    assert_eq!(fleet.describe_instances(BTreeMap::new()).await.unwrap().len(), 1);
    assert_eq!(
        remote_code(client.call_raw("Instance.Reboot", json!({"id": "vm-2"})).await),
        "method_not_found"
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_group_and_flavor_over_the_wire() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("group.sock");
    let dispatcher = Dispatcher::new()
        .with(Service::Group(Arc::new(Groups::default())))
        .with(Service::Flavor(Arc::new(Tagger)));

    let server = Server::start(&format!("unix://{}", path.display()), Arc::new(dispatcher), vec![])
        .await
        .unwrap();
    let client = Client::from_endpoint(server.endpoint().clone());

    let spis = client.implements().await.unwrap();
    assert_eq!(
        spis,
        vec![
            Spi { kind: PluginKind::Flavor, version: RPC_SCHEMA_VERSION },
            Spi { kind: PluginKind::Group, version: RPC_SCHEMA_VERSION },
        ]
    );

    let groups = GroupClient::new(client.clone());
    let spec = GroupSpec {
        id: "workers".into(),
        properties: json!({"size": 3}),
    };
    assert_eq!(groups.commit_group(spec.clone(), true).await.unwrap(), "commit workers");
    assert!(groups.inspect_groups().await.unwrap().is_empty());

    groups.commit_group(spec.clone(), false).await.unwrap();
    assert_eq!(groups.inspect_groups().await.unwrap(), vec![spec]);

    let described = groups.describe_group("workers").await.unwrap();
    assert!(described.converged);
    assert_eq!(described.instances[0].id, "workers-1");

    groups.free_group("workers").await.unwrap();
    match groups.describe_group("workers").await {
        Err(RpcError::Remote { code, .. }) => assert_eq!(code, "not_found"),
        other => panic!("expected not_found, got {:?}", other),
    }

    let flavor = FlavorClient::new(client);
    let allocation = Allocation {
        size: Some(3),
        logical_ids: vec![],
    };
    flavor.validate(json!({}), allocation.clone()).await.unwrap();
    assert!(flavor.validate(json!({}), Allocation::default()).await.is_err());

    let prepared = flavor
        .prepare(json!({"role": "worker"}), InstanceSpec::default(), allocation)
        .await
        .unwrap();
    assert_eq!(prepared.tags.get("role").map(String::as_str), Some("worker"));

    let instance = InstanceDescription {
        id: "i-1".into(),
        logical_id: None,
        tags: BTreeMap::new(),
    };
    assert_eq!(
        flavor.healthy(json!({}), instance.clone()).await.unwrap(),
        Health::Healthy
    );
    match flavor.drain(json!({}), instance).await {
        Err(RpcError::Remote { code, .. }) => assert_eq!(code, "unsupported"),
        other => panic!("expected unsupported, got {:?}", other),
    }

    server.shutdown().await.unwrap();
}
