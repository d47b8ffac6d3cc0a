//! Carrying out resolved routes against a [`ResourceApi`].

use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};

use super::{
    client::{self, CallOptions, ResourceApi},
    definition::ResourceDefinition,
    mapping::{Action, Route, Scope},
};
use crate::internal_events::{
    KubernetesRequest, KubernetesRequestError, KubernetesResourceCreated,
    KubernetesResourceDeleted,
};

/// Namespace used for namespaced kinds when neither the options nor the
/// definition name one.
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("definition kind {found:?} does not match {route}, which expects {expected:?}"))]
    KindMismatch {
        route: String,
        expected: &'static str,
        found: String,
    },

    #[snafu(display("invalid {payload} payload: {source}"))]
    InvalidPayload {
        payload: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("{source}"))]
    Api { source: client::Error },
}

impl Error {
    /// Whether retrying the same call could succeed. Only failures reported
    /// by the cluster qualify; a definition that does not fit its route never
    /// will.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Api { .. })
    }
}

/// The stored identity of a resource created earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRef<'a> {
    pub name: &'a str,
    pub namespace: Option<&'a str>,
}

impl<'a> ResourceRef<'a> {
    /// Reads name and namespace from an object returned by the API server.
    pub fn from_state(state: &'a Value) -> Option<Self> {
        let metadata = state.get("metadata")?;
        Some(Self {
            name: metadata.get("name")?.as_str()?,
            namespace: metadata.get("namespace").and_then(Value::as_str),
        })
    }
}

pub struct Dispatcher<'a> {
    api: &'a dyn ResourceApi,
}

impl<'a> Dispatcher<'a> {
    pub const fn new(api: &'a dyn ResourceApi) -> Self {
        Self { api }
    }

    /// Creates `definition` through `route` and returns the object the API
    /// server answered with.
    pub async fn create(
        &self,
        route: Route,
        definition: ResourceDefinition,
        options: &CallOptions,
    ) -> Result<Value, Error> {
        debug_assert_eq!(route.action, Action::Create);
        let kind = route.kind;
        let name = definition.name().map(str::to_owned);
        let namespace = namespace(route, options, definition.namespace()).map(str::to_owned);
        let mut body = payload(route, definition)?;
        if let Some(namespace) = &namespace {
            set_namespace(&mut body, namespace);
        }

        let route_name = route.to_string();
        emit!(KubernetesRequest {
            route: &route_name,
            kind: kind.kind,
            name: name.as_deref(),
            namespace: namespace.as_deref(),
        });
        let created = self
            .api
            .create(kind, namespace.as_deref(), body, options)
            .await
            .map_err(|error| request_failed(&route_name, error))?;

        emit!(KubernetesResourceCreated {
            kind: kind.kind,
            name: ResourceRef::from_state(&created).map(|target| target.name),
            namespace: namespace.as_deref(),
        });
        Ok(created)
    }

    /// Fetches the live object `target` names.
    pub async fn read(
        &self,
        route: Route,
        target: ResourceRef<'_>,
        options: &CallOptions,
    ) -> Result<Value, Error> {
        debug_assert_eq!(route.action, Action::Read);
        let namespace = namespace(route, options, target.namespace);

        let route_name = route.to_string();
        emit!(KubernetesRequest {
            route: &route_name,
            kind: route.kind.kind,
            name: Some(target.name),
            namespace,
        });
        self.api
            .read(route.kind, namespace, target.name)
            .await
            .map_err(|error| request_failed(&route_name, error))
    }

    /// Deletes the object `target` names, exactly as stored by `create`.
    pub async fn delete(
        &self,
        route: Route,
        target: ResourceRef<'_>,
        options: &CallOptions,
    ) -> Result<(), Error> {
        debug_assert_eq!(route.action, Action::Delete);
        let namespace = namespace(route, options, target.namespace);

        let route_name = route.to_string();
        emit!(KubernetesRequest {
            route: &route_name,
            kind: route.kind.kind,
            name: Some(target.name),
            namespace,
        });
        self.api
            .delete(route.kind, namespace, target.name, options)
            .await
            .map_err(|error| request_failed(&route_name, error))?;

        emit!(KubernetesResourceDeleted {
            kind: route.kind.kind,
            name: target.name,
            namespace,
        });
        Ok(())
    }
}

/// Checks `definition` against the typed payload of `route` and returns the
/// request body.
pub fn payload(route: Route, definition: ResourceDefinition) -> Result<Value, Error> {
    let kind = route.kind;
    ensure!(
        definition.kind() == kind.kind,
        KindMismatchSnafu {
            route: route.to_string(),
            expected: kind.kind,
            found: definition.kind(),
        }
    );
    kind.normalize(definition.into_value())
        .context(InvalidPayloadSnafu {
            payload: kind.payload,
        })
}

/// The API server rejects a body whose namespace differs from the one in the
/// request path.
fn set_namespace(body: &mut Value, namespace: &str) {
    if let Some(object) = body.as_object_mut() {
        let metadata = object
            .entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("namespace".into(), namespace.into());
        }
    }
}

fn namespace<'a>(
    route: Route,
    options: &'a CallOptions,
    declared: Option<&'a str>,
) -> Option<&'a str> {
    match route.kind.scope {
        Scope::Cluster => None,
        Scope::Namespaced => Some(
            options
                .namespace
                .as_deref()
                .or(declared)
                .unwrap_or(DEFAULT_NAMESPACE),
        ),
    }
}

fn request_failed(route: &str, source: client::Error) -> Error {
    emit!(KubernetesRequestError {
        route,
        error: &source,
    });
    Error::Api { source }
}
