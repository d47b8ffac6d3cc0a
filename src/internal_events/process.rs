use super::InternalEvent;

#[derive(Debug)]
pub struct OperationStarted<'a> {
    pub operation: &'a str,
    pub node_id: &'a str,
    pub instance_id: &'a str,
}

impl InternalEvent for OperationStarted<'_> {
    fn emit_logs(&self) {
        info!(
            message = "Operation started.",
            operation = %self.operation,
            node_id = %self.node_id,
            instance_id = %self.instance_id,
            version = env!("CARGO_PKG_VERSION"),
        );
    }
}

#[derive(Debug)]
pub struct OperationCompleted<'a> {
    pub operation: &'a str,
}

impl InternalEvent for OperationCompleted<'_> {
    fn emit_logs(&self) {
        info!(
            message = "Operation completed.",
            operation = %self.operation,
        );
    }
}

#[derive(Debug)]
pub struct OperationFailed<'a> {
    pub operation: &'a str,
    pub recoverable: bool,
    pub error: &'a str,
}

impl InternalEvent for OperationFailed<'_> {
    fn emit_logs(&self) {
        if self.recoverable {
            warn!(
                message = "Operation failed, the orchestrator may retry it.",
                operation = %self.operation,
                error = %self.error,
                error_type = "recoverable",
            );
        } else {
            error!(
                message = "Operation failed permanently.",
                operation = %self.operation,
                error = %self.error,
                error_type = "non_recoverable",
            );
        }
    }
}

#[derive(Debug)]
pub struct ContextLoadFailed<'a> {
    pub path: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl InternalEvent for ContextLoadFailed<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Failed to load operation context.",
            path = %self.path,
            error = %self.error,
        );
    }
}
