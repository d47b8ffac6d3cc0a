//! Talking to the API server.
//!
//! Resource operations only see [`ResourceApi`]; [`KubeApi`] is the
//! implementation backed by a real [`kube::Client`].

pub mod config;

use async_trait::async_trait;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, PostParams, PropagationPolicy},
};
use serde::Deserialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};

use self::config::ClientSettings;
use super::mapping::{ResourceKind, Scope};
use crate::{context::Properties, resources::ResourceStore};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{kind} body is not a Kubernetes object: {source}"))]
    Body {
        kind: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("unable to {action} {kind}: {source}"))]
    Request {
        action: &'static str,
        kind: &'static str,
        source: kube::Error,
    },

    #[snafu(display("unable to encode {kind} returned by the API server: {source}"))]
    Response {
        kind: &'static str,
        source: serde_json::Error,
    },
}

/// How dependents are handled when deleting an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Propagation {
    Orphan,
    Background,
    Foreground,
}

impl From<Propagation> for PropagationPolicy {
    fn from(propagation: Propagation) -> Self {
        match propagation {
            Propagation::Orphan => Self::Orphan,
            Propagation::Background => Self::Background,
            Propagation::Foreground => Self::Foreground,
        }
    }
}

/// Per-call parameters taken from the node's `options` property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallOptions {
    /// Overrides the namespace declared in the definition.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    /// Only used on create.
    #[serde(default)]
    pub field_manager: Option<String>,
    /// Only used on delete.
    #[serde(default)]
    pub grace_period_seconds: Option<u32>,
    /// Only used on delete.
    #[serde(default)]
    pub propagation_policy: Option<Propagation>,
    /// Keys no call takes, such as `pretty`. They are not sent.
    #[serde(flatten)]
    pub ignored: Properties,
}

impl CallOptions {
    pub fn from_properties(properties: &Properties) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(properties.clone()))
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: self.dry_run,
            field_manager: self.field_manager.clone(),
        }
    }

    fn delete_params(&self) -> DeleteParams {
        DeleteParams {
            dry_run: self.dry_run,
            grace_period_seconds: self.grace_period_seconds,
            propagation_policy: self.propagation_policy.map(Into::into),
            ..Default::default()
        }
    }
}

/// The calls resource operations make against a cluster.
///
/// `namespace` is `None` for cluster-scoped kinds.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn create(
        &self,
        kind: &'static ResourceKind,
        namespace: Option<&str>,
        body: Value,
        options: &CallOptions,
    ) -> Result<Value, Error>;

    async fn read(
        &self,
        kind: &'static ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, Error>;

    async fn delete(
        &self,
        kind: &'static ResourceKind,
        namespace: Option<&str>,
        name: &str,
        options: &CallOptions,
    ) -> Result<(), Error>;
}

/// [`ResourceApi`] over dynamically typed objects, so a single client
/// serves every kind in the route table.
#[derive(Clone)]
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match (kind.scope, namespace) {
            (Scope::Namespaced, Some(namespace)) => {
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), &resource),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &resource),
        }
    }
}

#[async_trait]
impl ResourceApi for KubeApi {
    async fn create(
        &self,
        kind: &'static ResourceKind,
        namespace: Option<&str>,
        body: Value,
        options: &CallOptions,
    ) -> Result<Value, Error> {
        let object: DynamicObject = serde_json::from_value(body).context(BodySnafu { kind: kind.kind })?;
        let created = self
            .api(kind, namespace)
            .create(&options.post_params(), &object)
            .await
            .context(RequestSnafu {
                action: "create",
                kind: kind.kind,
            })?;
        serde_json::to_value(created).context(ResponseSnafu { kind: kind.kind })
    }

    async fn read(
        &self,
        kind: &'static ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, Error> {
        let object = self
            .api(kind, namespace)
            .get(name)
            .await
            .context(RequestSnafu {
                action: "read",
                kind: kind.kind,
            })?;
        serde_json::to_value(object).context(ResponseSnafu { kind: kind.kind })
    }

    async fn delete(
        &self,
        kind: &'static ResourceKind,
        namespace: Option<&str>,
        name: &str,
        options: &CallOptions,
    ) -> Result<(), Error> {
        self.api(kind, namespace)
            .delete(name, &options.delete_params())
            .await
            .context(RequestSnafu {
                action: "delete",
                kind: kind.kind,
            })?;
        Ok(())
    }
}

/// Builds a [`ResourceApi`] for a cluster.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        settings: &ClientSettings,
        store: &dyn ResourceStore,
    ) -> Result<Box<dyn ResourceApi>, config::Error>;
}

/// Connects through [`KubeApi`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeConnector;

#[async_trait]
impl Connector for KubeConnector {
    async fn connect(
        &self,
        settings: &ClientSettings,
        store: &dyn ResourceStore,
    ) -> Result<Box<dyn ResourceApi>, config::Error> {
        let client = settings.client(store).await?;
        Ok(Box::new(KubeApi::new(client)))
    }
}
