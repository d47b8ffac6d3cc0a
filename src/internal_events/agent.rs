use std::path::Path;

use super::InternalEvent;

#[derive(Debug)]
pub struct AgentKubeconfigWritten<'a> {
    pub path: &'a Path,
    pub pod_name: &'a str,
}

impl InternalEvent for AgentKubeconfigWritten<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Agent kubeconfig written.",
            path = %self.path.display(),
            pod_name = %self.pod_name,
        );
    }
}

/// The agent pod is not derived from the node yet, every connection command
/// targets the same fixed pod.
#[derive(Debug)]
pub struct AgentPodNamePlaceholder<'a> {
    pub pod_name: &'a str,
}

impl InternalEvent for AgentPodNamePlaceholder<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Agent connection targets a fixed placeholder pod.",
            pod_name = %self.pod_name,
        );
    }
}
