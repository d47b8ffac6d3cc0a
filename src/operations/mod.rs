//! Lifecycle operations the orchestrator invokes.
//!
//! Each operation is a short pipeline over an explicit [`OperationContext`]:
//! resolve and validate what the node declares, build a client when the
//! operation needs one, perform the call and hand back the properties the
//! orchestrator should persist. Failures are classified into the two tiers
//! the orchestrator understands, see [`OperationError`].

mod agent;
mod federation;
mod resource;

use std::{fmt, path::PathBuf};

use serde::Serialize;
use serde_json::{Value, json};
use snafu::Snafu;

pub use self::agent::{AGENT_POD_NAME, AgentAction, make_conn_cmd};
use crate::{
    context::{OperationContext, Properties},
    internal_events::{OperationCompleted, OperationFailed, OperationStarted},
    kubernetes::Connector,
    remote::RemoteShell,
    resources::ResourceStore,
};

/// A failed operation, as reported to the orchestrator.
#[derive(Debug, Snafu)]
pub enum OperationError {
    /// The orchestrator may retry the operation.
    #[snafu(display("{message}"))]
    Recoverable { message: String },

    /// Retrying cannot help; the blueprint or its inputs must change.
    #[snafu(display("{message}"))]
    NonRecoverable { message: String },
}

impl OperationError {
    pub fn recoverable(error: impl fmt::Display) -> Self {
        Self::Recoverable {
            message: error.to_string(),
        }
    }

    pub fn non_recoverable(error: impl fmt::Display) -> Self {
        Self::NonRecoverable {
            message: error.to_string(),
        }
    }

    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable { .. })
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Recoverable { .. } => "RecoverableError",
            Self::NonRecoverable { .. } => "NonRecoverableError",
        }
    }

    pub const fn exit_code(&self) -> exitcode::ExitCode {
        match self {
            Self::Recoverable { .. } => exitcode::TEMPFAIL,
            Self::NonRecoverable { .. } => exitcode::CONFIG,
        }
    }

    /// The document written to stdout for a failed operation.
    pub fn to_document(&self) -> Value {
        json!({
            "error": {
                "type": self.type_name(),
                "message": self.to_string(),
            }
        })
    }
}

/// What the orchestrator should persist after a successful operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_properties: Option<Properties>,
}

impl Outcome {
    pub const fn runtime_properties(runtime_properties: Properties) -> Self {
        Self {
            runtime_properties: Some(runtime_properties),
            node_properties: None,
        }
    }

    pub const fn node_properties(node_properties: Properties) -> Self {
        Self {
            runtime_properties: None,
            node_properties: Some(node_properties),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ResourceCreate,
    ResourceRead,
    ResourceDelete,
    ClusterCreate,
    ClusterDelete,
    Agent(AgentAction),
    /// Checks mapping and definition without contacting the cluster.
    Validate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceCreate => f.write_str("resource_create"),
            Self::ResourceRead => f.write_str("resource_read"),
            Self::ResourceDelete => f.write_str("resource_delete"),
            Self::ClusterCreate => f.write_str("cluster_create"),
            Self::ClusterDelete => f.write_str("cluster_delete"),
            Self::Agent(action) => write!(f, "agent_{action}"),
            Self::Validate => f.write_str("validate"),
        }
    }
}

/// The plugin and the outside world it talks to.
pub struct Plugin {
    store: Box<dyn ResourceStore>,
    connector: Box<dyn Connector>,
    shell: Box<dyn RemoteShell>,
    work_dir: PathBuf,
}

impl Plugin {
    pub fn new(
        store: impl ResourceStore + 'static,
        connector: impl Connector + 'static,
        shell: impl RemoteShell + 'static,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store: Box::new(store),
            connector: Box::new(connector),
            shell: Box::new(shell),
            work_dir: work_dir.into(),
        }
    }

    pub async fn run(
        &self,
        operation: Operation,
        ctx: &OperationContext,
    ) -> Result<Outcome, OperationError> {
        let name = operation.to_string();
        emit!(OperationStarted {
            operation: &name,
            node_id: &ctx.node.id,
            instance_id: &ctx.instance.id,
        });

        let result = match operation {
            Operation::ResourceCreate => resource::create(self, ctx).await,
            Operation::ResourceRead => resource::read(self, ctx).await,
            Operation::ResourceDelete => resource::delete(self, ctx).await,
            Operation::Validate => resource::validate(self, ctx),
            Operation::ClusterCreate => federation::cluster_create(self, ctx).await,
            Operation::ClusterDelete => federation::cluster_delete(self, ctx).await,
            Operation::Agent(_) => agent::prepare(self, ctx),
        };

        match &result {
            Ok(_) => emit!(OperationCompleted { operation: &name }),
            Err(error) => emit!(OperationFailed {
                operation: &name,
                recoverable: error.is_recoverable(),
                error: &error.to_string(),
            }),
        }
        result
    }
}
