use super::InternalEvent;

#[derive(Debug)]
pub struct RemoteCommandStarted<'a> {
    pub host: &'a str,
    pub command: &'a str,
}

impl InternalEvent for RemoteCommandStarted<'_> {
    fn emit_logs(&self) {
        info!(
            message = "Running remote command.",
            host = %self.host,
            command = %self.command,
        );
    }
}

/// One line a remote command printed. Standard error is logged as a warning.
#[derive(Debug)]
pub struct RemoteCommandOutput<'a> {
    pub command: &'a str,
    pub line: &'a str,
    pub stderr: bool,
}

impl InternalEvent for RemoteCommandOutput<'_> {
    fn emit_logs(&self) {
        if self.stderr {
            warn!(message = %self.line, command = %self.command, stream = "stderr");
        } else {
            info!(message = %self.line, command = %self.command, stream = "stdout");
        }
    }
}

#[derive(Debug)]
pub struct RemoteCommandExitedWithError<'a> {
    pub command: &'a str,
    pub exit_status: i32,
}

impl InternalEvent for RemoteCommandExitedWithError<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Remote command exited with non-zero status.",
            command = %self.command,
            exit_status = self.exit_status,
        );
    }
}
