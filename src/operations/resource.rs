use serde_json::Value;

use super::{OperationError, Outcome, Plugin};
use crate::{
    context::{
        INSTANCE_RUNTIME_PROPERTY_KUBERNETES, InstanceContext, NODE_PROPERTY_API_MAPPING,
        NODE_PROPERTY_AUTHENTICATION, NODE_PROPERTY_CONFIGURATION, NODE_PROPERTY_OPTIONS,
        NodeContext, OperationContext, Properties,
    },
    internal_events::{CallOptionsIgnored, KubernetesClientInitialized},
    kubernetes::{
        ApiMapping, CallOptions, Dispatcher, ResourceApi, ResourceDefinition, Routes,
        client::config::{ClientConfiguration, ClientSettings},
        definition, dispatch,
    },
    resources,
};

/// The node's mapping resolved to routes, plus its call options.
struct Declared {
    routes: Routes,
    options: CallOptions,
}

impl Declared {
    fn from_node(node: &NodeContext) -> Result<Self, OperationError> {
        let mapping = node
            .properties
            .get(NODE_PROPERTY_API_MAPPING)
            .and_then(Value::as_object)
            .ok_or_else(|| {
                OperationError::non_recoverable(format!(
                    "node {:?} has no {NODE_PROPERTY_API_MAPPING} property",
                    node.id
                ))
            })?;
        let routes = ApiMapping::from_properties(mapping)
            .and_then(|mapping| mapping.resolve())
            .map_err(OperationError::non_recoverable)?;

        let options = match node.properties.get(NODE_PROPERTY_OPTIONS) {
            None | Some(Value::Null) => CallOptions::default(),
            Some(Value::Object(options)) => CallOptions::from_properties(options).map_err(|error| {
                OperationError::recoverable(format!("invalid options: {error}"))
            })?,
            Some(_) => {
                return Err(OperationError::recoverable(
                    "invalid options: expected a mapping",
                ));
            }
        };
        if !options.ignored.is_empty() {
            let keys: Vec<&str> = options.ignored.keys().map(String::as_str).collect();
            emit!(CallOptionsIgnored { keys: &keys });
        }

        Ok(Self { routes, options })
    }
}

fn load_definition(
    plugin: &Plugin,
    node: &NodeContext,
) -> Result<ResourceDefinition, OperationError> {
    ResourceDefinition::load(node, plugin.store.as_ref()).map_err(|error| match error {
        // The file may only be missing for now.
        definition::Error::LoadFile {
            source: resources::Error::Read { .. },
        } => OperationError::recoverable(error),
        error => OperationError::non_recoverable(error),
    })
}

fn dispatch_error(error: dispatch::Error) -> OperationError {
    if error.is_recoverable() {
        OperationError::recoverable(error)
    } else {
        OperationError::non_recoverable(error)
    }
}

fn configuration_name(configuration: &ClientConfiguration) -> &'static str {
    match configuration {
        ClientConfiguration::BlueprintFile(_) => "blueprint_file_name",
        ClientConfiguration::ManagerFile(_) => "manager_file_path",
        ClientConfiguration::FileContent(_) => "file_content",
        ClientConfiguration::ApiOptions(_) => "api_options",
        ClientConfiguration::InCluster => "in_cluster",
    }
}

/// Builds a client from the master's `configuration` and `authentication`
/// properties. Every failure here is recoverable.
pub(super) async fn connect(
    plugin: &Plugin,
    instance: &InstanceContext,
) -> Result<Box<dyn ResourceApi>, OperationError> {
    let configuration = instance
        .master_property(NODE_PROPERTY_CONFIGURATION)
        .map_err(OperationError::recoverable)?;
    let authentication = instance
        .master_property(NODE_PROPERTY_AUTHENTICATION)
        .map_err(OperationError::recoverable)?;

    let init_failed = |error: &dyn std::fmt::Display| {
        OperationError::recoverable(format!("Cannot initialize Kubernetes API client: {error}"))
    };
    let settings = ClientSettings::from_properties(&configuration, &authentication)
        .map_err(|error| init_failed(&error))?;
    let api = plugin
        .connector
        .connect(&settings, plugin.store.as_ref())
        .await
        .map_err(|error| init_failed(&error))?;

    emit!(KubernetesClientInitialized {
        configuration: configuration_name(&settings.configuration),
    });
    Ok(api)
}

pub(super) async fn create(
    plugin: &Plugin,
    ctx: &OperationContext,
) -> Result<Outcome, OperationError> {
    let declared = Declared::from_node(&ctx.node)?;
    let definition = load_definition(plugin, &ctx.node)?;
    let api = connect(plugin, &ctx.instance).await?;

    let created = Dispatcher::new(api.as_ref())
        .create(declared.routes.create, definition, &declared.options)
        .await
        .map_err(dispatch_error)?;

    let mut runtime_properties = ctx.instance.runtime_properties.clone();
    runtime_properties.insert(INSTANCE_RUNTIME_PROPERTY_KUBERNETES.into(), created);
    Ok(Outcome::runtime_properties(runtime_properties))
}

pub(super) async fn read(
    plugin: &Plugin,
    ctx: &OperationContext,
) -> Result<Outcome, OperationError> {
    let declared = Declared::from_node(&ctx.node)?;
    let target = ctx.instance.stored_resource().map_err(OperationError::recoverable)?;
    let api = connect(plugin, &ctx.instance).await?;

    let live = Dispatcher::new(api.as_ref())
        .read(
            declared.routes.read,
            target,
            &declared.options,
        )
        .await
        .map_err(dispatch_error)?;

    let mut runtime_properties = ctx.instance.runtime_properties.clone();
    runtime_properties.insert(INSTANCE_RUNTIME_PROPERTY_KUBERNETES.into(), live);
    Ok(Outcome::runtime_properties(runtime_properties))
}

pub(super) async fn delete(
    plugin: &Plugin,
    ctx: &OperationContext,
) -> Result<Outcome, OperationError> {
    let declared = Declared::from_node(&ctx.node)?;
    let target = ctx.instance.stored_resource().map_err(OperationError::recoverable)?;
    let api = connect(plugin, &ctx.instance).await?;

    Dispatcher::new(api.as_ref())
        .delete(
            declared.routes.delete,
            target,
            &declared.options,
        )
        .await
        .map_err(dispatch_error)?;

    let mut runtime_properties: Properties = ctx.instance.runtime_properties.clone();
    runtime_properties.remove(INSTANCE_RUNTIME_PROPERTY_KUBERNETES);
    Ok(Outcome::runtime_properties(runtime_properties))
}

/// Everything `create` checks before it needs a cluster.
pub(super) fn validate(plugin: &Plugin, ctx: &OperationContext) -> Result<Outcome, OperationError> {
    let declared = Declared::from_node(&ctx.node)?;
    let definition = load_definition(plugin, &ctx.node)?;
    dispatch::payload(declared.routes.create, definition).map_err(dispatch_error)?;
    Ok(Outcome::runtime_properties(
        ctx.instance.runtime_properties.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        kubernetes::dispatch::tests::{Call, FakeApi},
        operations::{
            Operation,
            tests::{FakeShell, plugin},
        },
    };

    fn operation_context(node: Value, runtime_properties: Value, master_runtime: Value) -> OperationContext {
        serde_json::from_value(json!({
            "node": node,
            "instance": {
                "id": "resource_1",
                "runtime_properties": runtime_properties,
                "relationships": [{
                    "type": crate::context::RELATIONSHIP_TYPE_MANAGED_BY_MASTER,
                    "target": {
                        "node": {
                            "id": "master",
                            "type": "cloudify.kubernetes.nodes.Master",
                            "properties": {
                                "configuration": {"api_options": {"host": "https://10.0.0.1:6443"}},
                            },
                        },
                        "instance": {"id": "master_1", "runtime_properties": master_runtime},
                    },
                }],
            },
        }))
        .unwrap()
    }

    fn deployment_node(mapping: Value) -> Value {
        json!({
            "id": "nginx",
            "type": "cloudify.kubernetes.nodes.Deployment",
            "properties": {
                "_api_mapping": mapping,
                "definition": {
                    "metadata": {"name": "nginx"},
                    "spec": {
                        "selector": {"matchLabels": {"app": "nginx"}},
                        "template": {
                            "metadata": {"labels": {"app": "nginx"}},
                            "spec": {"containers": [{"name": "nginx", "image": "nginx:1.25"}]},
                        },
                    },
                },
            },
        })
    }

    fn deployment_mapping() -> Value {
        json!({
            "create": {"api": "AppsV1Api", "method": "create_namespaced_deployment", "payload": "V1Deployment"},
            "read": {"api": "AppsV1Api", "method": "read_namespaced_deployment"},
            "delete": {"api": "AppsV1Api", "method": "delete_namespaced_deployment", "payload": "V1DeleteOptions"},
        })
    }

    #[tokio::test]
    async fn create_then_delete_round_trips_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::default());
        let plugin = plugin(Some(Arc::clone(&api)), FakeShell::default(), dir.path());

        let ctx = operation_context(deployment_node(deployment_mapping()), json!({}), json!({}));
        let outcome = plugin.run(Operation::ResourceCreate, &ctx).await.unwrap();
        let runtime = outcome.runtime_properties.unwrap();
        assert_eq!(runtime["kubernetes"]["kind"], "Deployment");
        assert_eq!(runtime["kubernetes"]["metadata"]["name"], "nginx");

        let ctx = operation_context(
            deployment_node(deployment_mapping()),
            Value::Object(runtime),
            json!({}),
        );
        let outcome = plugin.run(Operation::ResourceDelete, &ctx).await.unwrap();
        assert!(
            !outcome
                .runtime_properties
                .unwrap()
                .contains_key(INSTANCE_RUNTIME_PROPERTY_KUBERNETES)
        );

        assert_eq!(
            api.calls().last(),
            Some(&Call::Delete {
                kind: "Deployment",
                namespace: Some("default".into()),
                name: "nginx".into(),
            })
        );
    }

    #[tokio::test]
    async fn read_refreshes_stored_state() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::default());
        let plugin = plugin(Some(Arc::clone(&api)), FakeShell::default(), dir.path());

        let ctx = operation_context(
            deployment_node(deployment_mapping()),
            json!({"kubernetes": {"metadata": {"name": "nginx", "namespace": "web"}}, "other": 1}),
            json!({}),
        );
        let runtime = plugin
            .run(Operation::ResourceRead, &ctx)
            .await
            .unwrap()
            .runtime_properties
            .unwrap();
        assert_eq!(runtime["kubernetes"]["status"]["phase"], "Running");
        assert_eq!(runtime["other"], 1);
        assert_eq!(
            api.calls(),
            vec![Call::Read {
                kind: "Deployment",
                namespace: Some("web".into()),
                name: "nginx".into(),
            }]
        );
    }

    #[tokio::test]
    async fn unknown_api_class_is_not_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::default());
        let plugin = plugin(Some(Arc::clone(&api)), FakeShell::default(), dir.path());

        let mapping = json!({
            "create": {"api": "FooV1Api", "method": "create_namespaced_deployment", "payload": "V1Deployment"},
            "delete": {"api": "AppsV1Api", "method": "delete_namespaced_deployment"},
        });
        let error = plugin
            .run(
                Operation::ResourceCreate,
                &operation_context(deployment_node(mapping), json!({}), json!({})),
            )
            .await
            .unwrap_err();

        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("FooV1Api"));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn transient_failure_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = plugin(
            Some(Arc::new(FakeApi::unavailable())),
            FakeShell::default(),
            dir.path(),
        );

        let error = plugin
            .run(
                Operation::ResourceCreate,
                &operation_context(deployment_node(deployment_mapping()), json!({}), json!({})),
            )
            .await
            .unwrap_err();
        assert!(error.is_recoverable());
    }

    #[tokio::test]
    async fn client_initialization_failure_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = plugin(None, FakeShell::default(), dir.path());

        let error = plugin
            .run(
                Operation::ResourceCreate,
                &operation_context(deployment_node(deployment_mapping()), json!({}), json!({})),
            )
            .await
            .unwrap_err();
        assert!(error.is_recoverable());
        assert!(
            error
                .to_string()
                .starts_with("Cannot initialize Kubernetes API client: ")
        );
    }

    #[tokio::test]
    async fn master_runtime_configuration_wins() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::default());
        let plugin = plugin(Some(api), FakeShell::default(), dir.path());

        // The runtime side replaces a working configuration with an unusable one.
        let error = plugin
            .run(
                Operation::ResourceCreate,
                &operation_context(
                    deployment_node(deployment_mapping()),
                    json!({}),
                    json!({"configuration": {"api_options": {"port": 6443}}}),
                ),
            )
            .await
            .unwrap_err();
        assert!(error.is_recoverable());
        assert!(error.to_string().contains("api_options"));
    }

    #[tokio::test]
    async fn invalid_payload_keeps_message() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::default());
        let plugin = plugin(Some(Arc::clone(&api)), FakeShell::default(), dir.path());

        let mut node = deployment_node(deployment_mapping());
        node["properties"]["definition"]["spec"]["replicas"] = json!("three");
        let error = plugin
            .run(
                Operation::ResourceCreate,
                &operation_context(node, json!({}), json!({})),
            )
            .await
            .unwrap_err();

        assert!(!error.is_recoverable());
        let message = error.to_string();
        assert!(message.starts_with("invalid V1Deployment payload: "), "{message}");
        assert!(message.contains("invalid type: string \"three\""), "{message}");
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_master_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = plugin(
            Some(Arc::new(FakeApi::default())),
            FakeShell::default(),
            dir.path(),
        );

        let mut ctx = operation_context(deployment_node(deployment_mapping()), json!({}), json!({}));
        ctx.instance.relationships.clear();
        let error = plugin
            .run(Operation::ResourceCreate, &ctx)
            .await
            .unwrap_err();
        assert!(error.is_recoverable());
        assert!(error.to_string().contains("not managed by any master"));
    }

    #[tokio::test]
    async fn delete_without_stored_state_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::default());
        let plugin = plugin(Some(Arc::clone(&api)), FakeShell::default(), dir.path());

        let error = plugin
            .run(
                Operation::ResourceDelete,
                &operation_context(deployment_node(deployment_mapping()), json!({}), json!({})),
            )
            .await
            .unwrap_err();
        assert!(error.is_recoverable());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_options_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::default());
        let plugin = plugin(Some(Arc::clone(&api)), FakeShell::default(), dir.path());

        let mut node = deployment_node(deployment_mapping());
        node["properties"]["options"] = json!({"namespace": "web", "pretty": "true"});
        plugin
            .run(Operation::ResourceCreate, &operation_context(node, json!({}), json!({})))
            .await
            .unwrap();

        let calls = api.calls();
        let Call::Create { namespace, body, .. } = &calls[0] else {
            panic!("expected a create call, got {calls:?}");
        };
        assert_eq!(namespace.as_deref(), Some("web"));
        assert!(body.get("pretty").is_none());
    }

    #[tokio::test]
    async fn malformed_options_are_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::default());
        let plugin = plugin(Some(Arc::clone(&api)), FakeShell::default(), dir.path());

        let mut node = deployment_node(deployment_mapping());
        node["properties"]["options"] = json!({"grace_period_seconds": "soon"});
        let error = plugin
            .run(Operation::ResourceCreate, &operation_context(node, json!({}), json!({})))
            .await
            .unwrap_err();
        assert!(error.is_recoverable());
        assert!(error.to_string().starts_with("invalid options: "));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn validate_checks_without_a_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = plugin(None, FakeShell::default(), dir.path());

        let mut ctx = operation_context(deployment_node(deployment_mapping()), json!({"kept": true}), json!({}));
        ctx.instance.relationships.clear();
        let outcome = plugin.run(Operation::Validate, &ctx).await.unwrap();
        assert_eq!(outcome.runtime_properties.unwrap()["kept"], true);

        let mut node = deployment_node(deployment_mapping());
        node["properties"]["definition"]["kind"] = json!("Pod");
        let error = plugin
            .run(Operation::Validate, &operation_context(node, json!({}), json!({})))
            .await
            .unwrap_err();
        assert!(!error.is_recoverable());
    }
}
