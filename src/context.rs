//! The orchestrator's view of the node and instance an operation runs on.
//!
//! Every lifecycle operation receives one [`OperationContext`], deserialized
//! from the document the orchestrator hands to the plugin. Nothing here is
//! cached between invocations: whatever the plugin needs to remember travels
//! back to the orchestrator through the instance runtime properties.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{OptionExt, Snafu};

use crate::kubernetes::ResourceRef;

/// Runtime property under which the Kubernetes API response is persisted.
pub const INSTANCE_RUNTIME_PROPERTY_KUBERNETES: &str = "kubernetes";
pub const NODE_PROPERTY_API_MAPPING: &str = "_api_mapping";
pub const NODE_PROPERTY_AUTHENTICATION: &str = "authentication";
pub const NODE_PROPERTY_CONFIGURATION: &str = "configuration";
pub const NODE_PROPERTY_DEFINITION: &str = "definition";
pub const NODE_PROPERTY_OPTIONS: &str = "options";

/// Relationship type linking a resource to the master that owns its
/// connection settings.
pub const RELATIONSHIP_TYPE_MANAGED_BY_MASTER: &str =
    "cloudify.kubernetes.relationships.managed_by_master";

pub type Properties = Map<String, Value>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("instance {instance_id:?} is not managed by any master"))]
    NoMaster { instance_id: String },

    #[snafu(display(
        "instance {instance_id:?} has no stored resource name at kubernetes.metadata.name"
    ))]
    MissingResourceId { instance_id: String },
}

/// Everything the orchestrator passes to a single lifecycle call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OperationContext {
    pub node: NodeContext,
    pub instance: InstanceContext,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeContext {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub properties: Properties,
}

impl NodeContext {
    /// The last dot-separated segment of the node type, e.g. `Deployment`
    /// for `cloudify.kubernetes.resources.Deployment`.
    pub fn type_suffix(&self) -> &str {
        self.type_name.rsplit('.').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InstanceContext {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub runtime_properties: Properties,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub type_name: String,
    pub target: RelationshipTarget,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RelationshipTarget {
    pub node: NodeContext,
    pub instance: InstanceContext,
}

impl InstanceContext {
    /// The target of the first managed-by-master relationship, if any.
    pub fn master(&self) -> Option<&RelationshipTarget> {
        self.relationships
            .iter()
            .find(|relationship| relationship.type_name == RELATIONSHIP_TYPE_MANAGED_BY_MASTER)
            .map(|relationship| &relationship.target)
    }

    /// Reads `name` from the master's node properties and overlays the
    /// master instance's runtime property of the same name on top of it.
    ///
    /// The merge is shallow: a key present in both wins from the runtime
    /// side. Values that are not mappings count as empty.
    pub fn master_property(&self, name: &str) -> Result<Properties, Error> {
        let master = self.master().context(NoMasterSnafu {
            instance_id: self.id.clone(),
        })?;

        let mut merged = as_properties(master.node.properties.get(name));
        merged.extend(as_properties(master.instance.runtime_properties.get(name)));
        Ok(merged)
    }

    /// Name and namespace of the Kubernetes resource stored by a previous
    /// `create`.
    pub fn stored_resource(&self) -> Result<ResourceRef<'_>, Error> {
        self.runtime_properties
            .get(INSTANCE_RUNTIME_PROPERTY_KUBERNETES)
            .and_then(ResourceRef::from_state)
            .context(MissingResourceIdSnafu {
                instance_id: self.id.clone(),
            })
    }
}

fn as_properties(value: Option<&Value>) -> Properties {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Properties::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn instance_managed_by(static_props: Value, runtime_props: Value) -> InstanceContext {
        serde_json::from_value(json!({
            "id": "nginx_1",
            "relationships": [
                {
                    "type": "cloudify.relationships.depends_on",
                    "target": {
                        "node": {"id": "other", "type": "x", "properties": {"configuration": {"wrong": true}}},
                        "instance": {"id": "other_1"}
                    }
                },
                {
                    "type": RELATIONSHIP_TYPE_MANAGED_BY_MASTER,
                    "target": {
                        "node": {"id": "master", "type": "cloudify.kubernetes.nodes.Master", "properties": static_props},
                        "instance": {"id": "master_1", "runtime_properties": runtime_props}
                    }
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn type_suffix() {
        let node = NodeContext {
            type_name: "cloudify.kubernetes.resources.Deployment".into(),
            ..Default::default()
        };
        assert_eq!(node.type_suffix(), "Deployment");

        let node = NodeContext {
            type_name: "Pod".into(),
            ..Default::default()
        };
        assert_eq!(node.type_suffix(), "Pod");

        assert_eq!(NodeContext::default().type_suffix(), "");
    }

    #[test]
    fn master_property_runtime_wins() {
        let instance = instance_managed_by(
            json!({"configuration": {"host": "static", "verify_ssl": false}}),
            json!({"configuration": {"host": "runtime", "api_key": "abc"}}),
        );

        let merged = instance.master_property("configuration").unwrap();
        similar_asserts::assert_eq!(
            Value::Object(merged),
            json!({"host": "runtime", "verify_ssl": false, "api_key": "abc"})
        );
    }

    #[test]
    fn master_property_missing_on_both_sides() {
        let instance = instance_managed_by(json!({}), json!({}));
        assert!(instance.master_property("authentication").unwrap().is_empty());
    }

    #[test]
    fn master_property_ignores_non_mapping_values() {
        let instance = instance_managed_by(
            json!({"authentication": "not a mapping"}),
            json!({"authentication": {"token": "t"}}),
        );
        similar_asserts::assert_eq!(
            Value::Object(instance.master_property("authentication").unwrap()),
            json!({"token": "t"})
        );
    }

    #[test]
    fn master_property_without_master() {
        let instance = InstanceContext {
            id: "lonely_1".into(),
            ..Default::default()
        };
        let error = instance.master_property("configuration").unwrap_err();
        assert!(matches!(error, Error::NoMaster { .. }));
    }

    #[test]
    fn stored_resource_from_runtime_properties() {
        let mut instance = InstanceContext::default();
        assert!(matches!(
            instance.stored_resource(),
            Err(Error::MissingResourceId { .. })
        ));

        instance.runtime_properties.insert(
            INSTANCE_RUNTIME_PROPERTY_KUBERNETES.into(),
            json!({"kind": "Pod", "metadata": {"name": "nginx", "namespace": "web"}}),
        );
        assert_eq!(
            instance.stored_resource().unwrap(),
            ResourceRef {
                name: "nginx",
                namespace: Some("web"),
            }
        );

        instance.runtime_properties.insert(
            INSTANCE_RUNTIME_PROPERTY_KUBERNETES.into(),
            json!({"kind": "Namespace", "metadata": {"name": "web"}}),
        );
        assert_eq!(instance.stored_resource().unwrap().namespace, None);
    }
}
