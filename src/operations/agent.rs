//! Connection command for installing the orchestrator agent inside a pod.
//!
//! The agent installer runs every command through `conn_cmd`, so all each
//! lifecycle action has to do here is keep that command and the kubeconfig it
//! points at up to date.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};

use super::{OperationError, Outcome, Plugin};
use crate::{
    context::{OperationContext, Properties},
    internal_events::{AgentKubeconfigWritten, AgentPodNamePlaceholder},
};

/// Pod every connection command targets.
///
/// TODO: take the pod name from the definition's `metadata.name` once the
/// agent node carries one.
pub const AGENT_POD_NAME: &str = "pacman-9w4n7";

const NODE_PROPERTY_AGENT_CONFIG: &str = "agent_config";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("node has no agent_config.extra.kubeconfig mapping"))]
    MissingKubeconfig,

    #[snafu(display("agent kubeconfig is not valid YAML: {source}"))]
    ParseKubeconfig { source: serde_yaml::Error },

    #[snafu(display("agent kubeconfig has no current-context"))]
    MissingCurrentContext,

    #[snafu(display("unable to encode agent kubeconfig: {source}"))]
    EncodeKubeconfig { source: serde_yaml::Error },

    #[snafu(display("unable to write agent kubeconfig to {}: {source}", path.display()))]
    WriteKubeconfig {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    const fn is_recoverable(&self) -> bool {
        matches!(self, Self::WriteKubeconfig { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AgentAction {
    Create,
    Configure,
    Start,
    Stop,
    Delete,
    Restart,
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Configure => "configure",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Delete => "delete",
            Self::Restart => "restart",
        })
    }
}

/// Writes `kubeconfig` to `<work_dir>/.kube/config-<pod_name>` and returns
/// the command prefix that runs a command inside the pod. The prefix names the
/// file by absolute path, it is run from wherever the installer happens to be.
pub fn make_conn_cmd(work_dir: &Path, kubeconfig: &Value, pod_name: &str) -> Result<String, Error> {
    let parsed;
    let kubeconfig = match kubeconfig {
        Value::String(content) => {
            parsed = serde_yaml::from_str::<Value>(content).context(ParseKubeconfigSnafu)?;
            &parsed
        }
        other => other,
    };
    let context = kubeconfig
        .get("current-context")
        .and_then(Value::as_str)
        .filter(|context| !context.is_empty())
        .context(MissingCurrentContextSnafu)?;

    let directory = std::path::absolute(work_dir)
        .context(WriteKubeconfigSnafu { path: work_dir })?
        .join(".kube");
    fs::create_dir_all(&directory).context(WriteKubeconfigSnafu { path: &directory })?;
    let path = directory.join(format!("config-{pod_name}"));
    let content = serde_yaml::to_string(kubeconfig).context(EncodeKubeconfigSnafu)?;
    fs::write(&path, content).context(WriteKubeconfigSnafu { path: &path })?;
    emit!(AgentKubeconfigWritten {
        path: &path,
        pod_name,
    });

    Ok(format!(
        "kubectl --kubeconfig=\"{}\" --context={context} exec {pod_name} -i -- ",
        path.display()
    ))
}

fn update_agent_config(
    work_dir: &Path,
    node_properties: &Properties,
) -> Result<Value, Error> {
    let mut agent_config = node_properties
        .get(NODE_PROPERTY_AGENT_CONFIG)
        .filter(|config| config.is_object())
        .cloned()
        .context(MissingKubeconfigSnafu)?;
    let extra = agent_config
        .get_mut("extra")
        .and_then(Value::as_object_mut)
        .context(MissingKubeconfigSnafu)?;
    let kubeconfig = extra
        .get("kubeconfig")
        .filter(|kubeconfig| kubeconfig.is_object() || kubeconfig.is_string())
        .context(MissingKubeconfigSnafu)?;

    emit!(AgentPodNamePlaceholder {
        pod_name: AGENT_POD_NAME,
    });
    let conn_cmd = make_conn_cmd(work_dir, kubeconfig, AGENT_POD_NAME)?;

    extra.insert("conn_cmd".into(), conn_cmd.into());
    Ok(agent_config)
}

/// Every agent action needs the same preparation; running the action itself
/// is up to the agent installer.
pub(super) fn prepare(
    plugin: &Plugin,
    ctx: &OperationContext,
) -> Result<Outcome, OperationError> {
    let agent_config =
        update_agent_config(&plugin.work_dir, &ctx.node.properties).map_err(|error| {
            if error.is_recoverable() {
                OperationError::recoverable(error)
            } else {
                OperationError::non_recoverable(error)
            }
        })?;

    let mut node_properties = Properties::new();
    node_properties.insert(NODE_PROPERTY_AGENT_CONFIG.into(), agent_config);
    Ok(Outcome::node_properties(node_properties))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::operations::{
        Operation,
        tests::{FakeShell, plugin},
    };

    fn kubeconfig() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Config",
            "current-context": "kind-agents",
            "contexts": [{"name": "kind-agents", "context": {"cluster": "kind", "user": "admin"}}],
        })
    }

    #[test]
    fn conn_cmd_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let conn_cmd = make_conn_cmd(dir.path(), &kubeconfig(), "agent-pod").unwrap();

        let path = dir.path().join(".kube/config-agent-pod");
        assert_eq!(
            conn_cmd,
            format!(
                "kubectl --kubeconfig=\"{}\" --context=kind-agents exec agent-pod -i -- ",
                path.display()
            )
        );
        let written: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, kubeconfig());
    }

    #[test]
    fn kubeconfig_as_yaml_string() {
        let dir = tempfile::tempdir().unwrap();
        let content = indoc! {"
            apiVersion: v1
            kind: Config
            current-context: staging
        "};
        let conn_cmd = make_conn_cmd(dir.path(), &Value::from(content), AGENT_POD_NAME).unwrap();
        assert!(conn_cmd.contains("--context=staging exec pacman-9w4n7 -i -- "));
    }

    #[test]
    fn current_context_required() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            make_conn_cmd(dir.path(), &json!({"kind": "Config"}), AGENT_POD_NAME),
            Err(Error::MissingCurrentContext)
        ));
        assert!(!dir.path().join(".kube").exists());
    }

    #[rstest]
    #[case(AgentAction::Create)]
    #[case(AgentAction::Configure)]
    #[case(AgentAction::Start)]
    #[case(AgentAction::Stop)]
    #[case(AgentAction::Delete)]
    #[case(AgentAction::Restart)]
    #[tokio::test]
    async fn every_action_sets_conn_cmd(#[case] action: AgentAction) {
        let dir = tempfile::tempdir().unwrap();
        let plugin = plugin(None, FakeShell::default(), dir.path());
        let ctx: OperationContext = serde_json::from_value(json!({
            "node": {
                "id": "agent",
                "type": "cloudify.kubernetes.nodes.Agent",
                "properties": {
                    "agent_config": {
                        "install_method": "remote",
                        "extra": {"kubeconfig": kubeconfig()},
                    },
                },
            },
            "instance": {"id": "agent_1"},
        }))
        .unwrap();

        let outcome = plugin.run(Operation::Agent(action), &ctx).await.unwrap();
        assert!(outcome.runtime_properties.is_none());

        let agent_config = &outcome.node_properties.unwrap()["agent_config"];
        assert_eq!(agent_config["install_method"], "remote");
        assert_eq!(agent_config["extra"]["kubeconfig"], kubeconfig());
        assert!(
            agent_config["extra"]["conn_cmd"]
                .as_str()
                .unwrap()
                .ends_with("--context=kind-agents exec pacman-9w4n7 -i -- ")
        );
        assert!(dir.path().join(".kube/config-pacman-9w4n7").exists());
    }

    #[tokio::test]
    async fn missing_kubeconfig_is_not_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = plugin(None, FakeShell::default(), dir.path());
        let ctx: OperationContext = serde_json::from_value(json!({
            "node": {"id": "agent", "properties": {"agent_config": {"extra": {}}}},
            "instance": {"id": "agent_1"},
        }))
        .unwrap();

        let error = plugin
            .run(Operation::Agent(AgentAction::Create), &ctx)
            .await
            .unwrap_err();
        assert!(!error.is_recoverable());
    }
}
