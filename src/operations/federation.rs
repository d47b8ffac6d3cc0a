//! Joining clusters to a federation control plane, driven over SSH on the
//! host that runs `kubefed`.

use serde::Deserialize;
use serde_json::Value;

use super::{OperationError, Outcome, Plugin, resource};
use crate::{
    context::{OperationContext, Properties},
    internal_events::{RemoteCommandExitedWithError, RemoteCommandOutput, RemoteCommandStarted},
    remote::{RemoteHost, RemoteShell},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Join,
    Unjoin,
}

impl Membership {
    const fn verb(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Unjoin => "unjoin",
        }
    }
}

#[derive(Deserialize)]
struct FederationProperties {
    federation_host: String,
    federation_host_username: String,
    federation_host_password: String,
    federate_context: String,
    federating_cluster_name: String,
    host_cluster_context: String,
    cluster_context: String,
}

impl FederationProperties {
    fn from_properties(properties: &Properties) -> Result<Self, OperationError> {
        serde_json::from_value(Value::Object(properties.clone())).map_err(|error| {
            OperationError::non_recoverable(format!("invalid federation properties: {error}"))
        })
    }

    fn host(&self) -> RemoteHost {
        RemoteHost {
            address: self.federation_host.clone(),
            username: self.federation_host_username.clone(),
            password: self.federation_host_password.clone(),
        }
    }

    fn commands(&self, membership: Membership) -> [String; 2] {
        [
            format!("kubectl config use-context {}", self.federate_context),
            format!(
                "kubefed {} {} --host-cluster-context={} --cluster-context={}",
                membership.verb(),
                self.federating_cluster_name,
                self.host_cluster_context,
                self.cluster_context,
            ),
        ]
    }
}

pub(super) async fn cluster_create(
    plugin: &Plugin,
    ctx: &OperationContext,
) -> Result<Outcome, OperationError> {
    federate(plugin, ctx, Membership::Join).await
}

pub(super) async fn cluster_delete(
    plugin: &Plugin,
    ctx: &OperationContext,
) -> Result<Outcome, OperationError> {
    federate(plugin, ctx, Membership::Unjoin).await
}

async fn federate(
    plugin: &Plugin,
    ctx: &OperationContext,
    membership: Membership,
) -> Result<Outcome, OperationError> {
    let properties = FederationProperties::from_properties(&ctx.node.properties)?;
    // The client is not used by kubefed, but a master that cannot be reached
    // fails the operation all the same.
    resource::connect(plugin, &ctx.instance).await?;

    let host = properties.host();
    for command in properties.commands(membership) {
        run(plugin.shell.as_ref(), &host, &command).await?;
    }

    Ok(Outcome::runtime_properties(
        ctx.instance.runtime_properties.clone(),
    ))
}

/// A non-zero exit status is logged, not treated as a failure.
async fn run(shell: &dyn RemoteShell, host: &RemoteHost, command: &str) -> Result<(), OperationError> {
    emit!(RemoteCommandStarted {
        host: &host.address,
        command,
    });
    let output = shell
        .exec(host, command)
        .await
        .map_err(OperationError::recoverable)?;

    for line in output.stdout.lines() {
        emit!(RemoteCommandOutput {
            command,
            line,
            stderr: false,
        });
    }
    for line in output.stderr.lines() {
        emit!(RemoteCommandOutput {
            command,
            line,
            stderr: true,
        });
    }
    if output.exit_status != 0 {
        emit!(RemoteCommandExitedWithError {
            command,
            exit_status: output.exit_status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        context::RELATIONSHIP_TYPE_MANAGED_BY_MASTER,
        kubernetes::dispatch::tests::FakeApi,
        operations::{
            Operation,
            tests::{FakeShell, plugin},
        },
    };

    fn federation_context(properties: Value) -> OperationContext {
        serde_json::from_value(json!({
            "node": {"id": "federation", "type": "cloudify.kubernetes.nodes.Federation", "properties": properties},
            "instance": {
                "id": "federation_1",
                "runtime_properties": {"joined": false},
                "relationships": [{
                    "type": RELATIONSHIP_TYPE_MANAGED_BY_MASTER,
                    "target": {
                        "node": {
                            "id": "master",
                            "type": "cloudify.kubernetes.nodes.Master",
                            "properties": {"configuration": {"api_options": {"host": "https://10.0.0.1:6443"}}},
                        },
                        "instance": {"id": "master_1"},
                    },
                }],
            },
        }))
        .unwrap()
    }

    fn federation_properties() -> Value {
        json!({
            "federation_host": "10.0.0.5",
            "federation_host_username": "centos",
            "federation_host_password": "secret",
            "federate_context": "federation",
            "federating_cluster_name": "us-east",
            "host_cluster_context": "host",
            "cluster_context": "us-east-ctx",
        })
    }

    #[tokio::test]
    async fn join_keeps_runtime_properties() {
        let dir = tempfile::tempdir().unwrap();
        let shell = FakeShell::default();
        let plugin = plugin(Some(Arc::new(FakeApi::default())), shell, dir.path());

        let outcome = plugin
            .run(
                Operation::ClusterCreate,
                &federation_context(federation_properties()),
            )
            .await
            .unwrap();
        assert_eq!(outcome.runtime_properties.unwrap()["joined"], false);
    }

    #[test]
    fn commands() {
        let properties =
            FederationProperties::from_properties(federation_properties().as_object().unwrap())
                .unwrap();
        assert_eq!(
            properties.commands(Membership::Join),
            [
                "kubectl config use-context federation".to_owned(),
                "kubefed join us-east --host-cluster-context=host --cluster-context=us-east-ctx"
                    .to_owned(),
            ]
        );
        assert_eq!(
            properties.commands(Membership::Unjoin)[1],
            "kubefed unjoin us-east --host-cluster-context=host --cluster-context=us-east-ctx"
        );
    }

    #[tokio::test]
    async fn commands_reach_the_shell() {
        let shell = FakeShell::default();
        let properties =
            FederationProperties::from_properties(federation_properties().as_object().unwrap())
                .unwrap();
        let host = properties.host();
        for command in properties.commands(Membership::Unjoin) {
            run(&shell, &host, &command).await.unwrap();
        }

        let commands = shell.commands.lock().unwrap().clone();
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|(address, _)| address == "10.0.0.5"));
        assert!(commands[1].1.starts_with("kubefed unjoin us-east"));
    }

    #[tokio::test]
    async fn missing_property_is_not_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = plugin(
            Some(Arc::new(FakeApi::default())),
            FakeShell::default(),
            dir.path(),
        );

        let mut properties = federation_properties();
        properties.as_object_mut().unwrap().remove("cluster_context");
        let error = plugin
            .run(Operation::ClusterCreate, &federation_context(properties))
            .await
            .unwrap_err();
        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("cluster_context"));
    }

    #[tokio::test]
    async fn unreachable_host_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let shell = FakeShell {
            unreachable: true,
            ..Default::default()
        };
        let plugin = plugin(Some(Arc::new(FakeApi::default())), shell, dir.path());

        let error = plugin
            .run(
                Operation::ClusterDelete,
                &federation_context(federation_properties()),
            )
            .await
            .unwrap_err();
        assert!(error.is_recoverable());
    }

    #[tokio::test]
    async fn client_initialization_runs_first() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = plugin(None, FakeShell::default(), dir.path());

        let error = plugin
            .run(
                Operation::ClusterCreate,
                &federation_context(federation_properties()),
            )
            .await
            .unwrap_err();
        assert!(error.is_recoverable());
        assert!(error.to_string().starts_with("Cannot initialize"));
    }
}
