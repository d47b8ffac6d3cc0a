//! Binding of lifecycle actions to concrete Kubernetes API calls.
//!
//! Blueprints name the call they want with an API class, a method and a
//! payload class, e.g. `CoreV1Api` / `create_namespaced_pod` / `V1Pod`. Those
//! names are resolved once, up front, against the closed [`KINDS`] table. A
//! name that does not resolve is a static configuration defect.

use std::{fmt, str::FromStr};

use k8s_openapi::{
    api::{
        apps::v1 as apps, autoscaling::v1 as autoscaling, batch::v1 as batch, core::v1 as core,
        networking::v1 as networking, policy::v1 as policy, rbac::v1 as rbac,
        storage::v1 as storage,
    },
};
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::context::Properties;

/// Payload class the delete calls accept.
pub const DELETE_OPTIONS_PAYLOAD: &str = "V1DeleteOptions";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid API mapping: {source}"))]
    InvalidMapping { source: serde_json::Error },

    #[snafu(display("unknown API class {name:?}"))]
    InvalidApiClass { name: String },

    #[snafu(display("API class {api} has no method {method:?} usable for {action}"))]
    InvalidApiMethod {
        api: ApiClass,
        method: String,
        action: Action,
    },

    #[snafu(display("payload class {name:?} does not fit {api}.{method}, expected {expected:?}"))]
    InvalidPayloadClass {
        name: String,
        api: ApiClass,
        method: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Read,
    Delete,
}

impl Action {
    const fn verb(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// The API groups a mapping may name, spelled the way blueprints spell them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiClass {
    CoreV1Api,
    AppsV1Api,
    AutoscalingV1Api,
    BatchV1Api,
    NetworkingV1Api,
    PolicyV1Api,
    RbacAuthorizationV1Api,
    StorageV1Api,
}

impl ApiClass {
    const ALL: [ApiClass; 8] = [
        ApiClass::CoreV1Api,
        ApiClass::AppsV1Api,
        ApiClass::AutoscalingV1Api,
        ApiClass::BatchV1Api,
        ApiClass::NetworkingV1Api,
        ApiClass::PolicyV1Api,
        ApiClass::RbacAuthorizationV1Api,
        ApiClass::StorageV1Api,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ApiClass::CoreV1Api => "CoreV1Api",
            ApiClass::AppsV1Api => "AppsV1Api",
            ApiClass::AutoscalingV1Api => "AutoscalingV1Api",
            ApiClass::BatchV1Api => "BatchV1Api",
            ApiClass::NetworkingV1Api => "NetworkingV1Api",
            ApiClass::PolicyV1Api => "PolicyV1Api",
            ApiClass::RbacAuthorizationV1Api => "RbacAuthorizationV1Api",
            ApiClass::StorageV1Api => "StorageV1Api",
        }
    }
}

impl FromStr for ApiClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApiClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .context(InvalidApiClassSnafu { name: s })
    }
}

impl fmt::Display for ApiClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// A Kubernetes object type the plugin knows how to dispatch.
///
/// The function pointers are monomorphized over the matching `k8s-openapi`
/// type, which is what makes the table statically checked.
pub struct ResourceKind {
    pub kind: &'static str,
    pub payload: &'static str,
    pub api: ApiClass,
    pub scope: Scope,
    /// Snake-case noun used in method names, `persistent_volume_claim` for
    /// `create_namespaced_persistent_volume_claim`.
    pub noun: &'static str,
    api_resource: fn() -> ApiResource,
    normalize: fn(Value) -> Result<Value, serde_json::Error>,
}

impl ResourceKind {
    /// Discovery information used to address the resource on the API server.
    pub fn api_resource(&self) -> ApiResource {
        (self.api_resource)()
    }

    /// Checks `definition` against the typed object for this kind and returns
    /// it with `apiVersion` filled in. Keys the typed object does not know
    /// are kept, the API server validates those.
    pub fn normalize(&self, definition: Value) -> Result<Value, serde_json::Error> {
        (self.normalize)(definition)
    }

    /// Name of the client method performing `action` on this kind.
    pub fn method(&self, action: Action) -> String {
        match self.scope {
            Scope::Namespaced => format!("{}_namespaced_{}", action.verb(), self.noun),
            Scope::Cluster => format!("{}_{}", action.verb(), self.noun),
        }
    }
}

impl fmt::Debug for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceKind")
            .field("kind", &self.kind)
            .field("api", &self.api)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ResourceKind {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.api == other.api
    }
}

fn api_resource<K>() -> ApiResource
where
    K: kube::Resource<DynamicType = ()>,
{
    ApiResource::erase::<K>(&())
}

fn normalize<K>(mut definition: Value) -> Result<Value, serde_json::Error>
where
    K: k8s_openapi::Resource + DeserializeOwned,
{
    if let Value::Object(object) = &mut definition {
        object
            .entry("apiVersion")
            .or_insert_with(|| Value::from(K::API_VERSION));
    }
    let _: K = K::deserialize(&definition)?;
    Ok(definition)
}

macro_rules! kind {
    ($ty:ty, $api:ident, $scope:ident, $noun:literal, $payload:literal) => {
        ResourceKind {
            kind: <$ty as k8s_openapi::Resource>::KIND,
            payload: $payload,
            api: ApiClass::$api,
            scope: Scope::$scope,
            noun: $noun,
            api_resource: api_resource::<$ty>,
            normalize: normalize::<$ty>,
        }
    };
}

/// Every resource kind the plugin dispatches.
pub static KINDS: &[ResourceKind] = &[
    kind!(core::ConfigMap, CoreV1Api, Namespaced, "config_map", "V1ConfigMap"),
    kind!(core::Namespace, CoreV1Api, Cluster, "namespace", "V1Namespace"),
    kind!(core::PersistentVolume, CoreV1Api, Cluster, "persistent_volume", "V1PersistentVolume"),
    kind!(
        core::PersistentVolumeClaim,
        CoreV1Api,
        Namespaced,
        "persistent_volume_claim",
        "V1PersistentVolumeClaim"
    ),
    kind!(core::Pod, CoreV1Api, Namespaced, "pod", "V1Pod"),
    kind!(
        core::ReplicationController,
        CoreV1Api,
        Namespaced,
        "replication_controller",
        "V1ReplicationController"
    ),
    kind!(core::Secret, CoreV1Api, Namespaced, "secret", "V1Secret"),
    kind!(core::Service, CoreV1Api, Namespaced, "service", "V1Service"),
    kind!(core::ServiceAccount, CoreV1Api, Namespaced, "service_account", "V1ServiceAccount"),
    kind!(apps::DaemonSet, AppsV1Api, Namespaced, "daemon_set", "V1DaemonSet"),
    kind!(apps::Deployment, AppsV1Api, Namespaced, "deployment", "V1Deployment"),
    kind!(apps::ReplicaSet, AppsV1Api, Namespaced, "replica_set", "V1ReplicaSet"),
    kind!(apps::StatefulSet, AppsV1Api, Namespaced, "stateful_set", "V1StatefulSet"),
    kind!(
        autoscaling::HorizontalPodAutoscaler,
        AutoscalingV1Api,
        Namespaced,
        "horizontal_pod_autoscaler",
        "V1HorizontalPodAutoscaler"
    ),
    kind!(batch::CronJob, BatchV1Api, Namespaced, "cron_job", "V1CronJob"),
    kind!(batch::Job, BatchV1Api, Namespaced, "job", "V1Job"),
    kind!(networking::Ingress, NetworkingV1Api, Namespaced, "ingress", "V1Ingress"),
    kind!(
        networking::NetworkPolicy,
        NetworkingV1Api,
        Namespaced,
        "network_policy",
        "V1NetworkPolicy"
    ),
    kind!(
        policy::PodDisruptionBudget,
        PolicyV1Api,
        Namespaced,
        "pod_disruption_budget",
        "V1PodDisruptionBudget"
    ),
    kind!(rbac::ClusterRole, RbacAuthorizationV1Api, Cluster, "cluster_role", "V1ClusterRole"),
    kind!(
        rbac::ClusterRoleBinding,
        RbacAuthorizationV1Api,
        Cluster,
        "cluster_role_binding",
        "V1ClusterRoleBinding"
    ),
    kind!(rbac::Role, RbacAuthorizationV1Api, Namespaced, "role", "V1Role"),
    kind!(rbac::RoleBinding, RbacAuthorizationV1Api, Namespaced, "role_binding", "V1RoleBinding"),
    kind!(storage::StorageClass, StorageV1Api, Cluster, "storage_class", "V1StorageClass"),
];

/// A resolved, validated API call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Route {
    pub action: Action,
    pub kind: &'static ResourceKind,
}

impl Route {
    pub fn method(&self) -> String {
        self.kind.method(self.action)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.api, self.method())
    }
}

/// One entry of the `_api_mapping` node property.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApiCall {
    pub api: String,
    pub method: String,
    #[serde(default)]
    pub payload: Option<String>,
}

impl ApiCall {
    /// Resolves this call against [`KINDS`] for the given action.
    pub fn resolve(&self, action: Action) -> Result<Route, Error> {
        let api: ApiClass = self.api.parse()?;

        let invalid_method = || InvalidApiMethodSnafu {
            api,
            method: self.method.as_str(),
            action,
        };

        let rest = self
            .method
            .strip_prefix(action.verb())
            .and_then(|rest| rest.strip_prefix('_'))
            .with_context(invalid_method)?;
        let (scope, noun) = match rest.strip_prefix("namespaced_") {
            Some(noun) => (Scope::Namespaced, noun),
            None => (Scope::Cluster, rest),
        };

        let kind = KINDS
            .iter()
            .find(|kind| kind.api == api && kind.scope == scope && kind.noun == noun)
            .with_context(invalid_method)?;

        let expected = match action {
            Action::Create | Action::Read => kind.payload,
            Action::Delete => DELETE_OPTIONS_PAYLOAD,
        };
        // Reads carry no body, any payload name is only informative there.
        let payload_ok = match (&self.payload, action) {
            (Some(payload), _) => payload == expected,
            (None, Action::Create) => false,
            (None, Action::Read | Action::Delete) => true,
        };
        ensure!(
            payload_ok,
            InvalidPayloadClassSnafu {
                name: self.payload.clone().unwrap_or_default(),
                api,
                method: self.method.as_str(),
                expected,
            }
        );

        Ok(Route { action, kind })
    }
}

/// The `_api_mapping` node property as written in blueprints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApiMapping {
    pub create: ApiCall,
    #[serde(default)]
    pub read: Option<ApiCall>,
    pub delete: ApiCall,
}

/// An [`ApiMapping`] whose every entry has been resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Routes {
    pub create: Route,
    pub read: Route,
    pub delete: Route,
}

impl ApiMapping {
    pub fn from_properties(properties: &Properties) -> Result<Self, Error> {
        serde_json::from_value(Value::Object(properties.clone())).context(InvalidMappingSnafu)
    }

    /// Resolves all entries, so a defect in any of them surfaces before the
    /// first call is made. Without an explicit `read` entry, reads go to the
    /// kind that `create` targets.
    pub fn resolve(&self) -> Result<Routes, Error> {
        let create = self.create.resolve(Action::Create)?;
        let delete = self.delete.resolve(Action::Delete)?;
        let read = match &self.read {
            Some(call) => call.resolve(Action::Read)?,
            None => Route {
                action: Action::Read,
                kind: create.kind,
            },
        };
        Ok(Routes {
            create,
            read,
            delete,
        })
    }
}
