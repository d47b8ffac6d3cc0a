use std::{
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
};

use serde_json::Value;
use snafu::{ResultExt, Snafu};

use crate::{
    cli::{Color, LogFormat, Opts},
    context::OperationContext,
    internal_events::ContextLoadFailed,
    kubernetes::KubeConnector,
    operations::Plugin,
    remote::SshShell,
    resources::LocalResourceStore,
    trace,
};

#[derive(Debug, Snafu)]
enum ContextError {
    #[snafu(display("unable to read {}: {source}", path.display()))]
    Read { path: PathBuf, source: io::Error },

    #[snafu(display("{} is not a valid operation context: {source}", path.display()))]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl ContextError {
    const fn exit_code(&self) -> exitcode::ExitCode {
        match self {
            Self::Read { .. } => exitcode::NOINPUT,
            Self::Parse { .. } => exitcode::DATAERR,
        }
    }
}

fn load_context(path: &Path) -> Result<OperationContext, ContextError> {
    let content = if path == Path::new("-") {
        io::read_to_string(io::stdin()).context(ReadSnafu { path })?
    } else {
        std::fs::read_to_string(path).context(ReadSnafu { path })?
    };
    serde_json::from_str(&content).context(ParseSnafu { path })
}

fn write_document(document: &Value) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, document)?;
    writeln!(stdout)?;
    stdout.flush()
}

/// Parses the command line, runs one operation and returns the process exit
/// code.
pub fn run() -> exitcode::ExitCode {
    let opts = match Opts::get_matches() {
        Ok(opts) => opts,
        Err(error) => {
            // Printing help or the version is not a failure.
            let _ = error.print();
            return if error.use_stderr() {
                exitcode::USAGE
            } else {
                exitcode::OK
            };
        }
    };
    run_with_opts(opts)
}

pub fn run_with_opts(opts: Opts) -> exitcode::ExitCode {
    let level = std::env::var("KUBERNETES_PLUGIN_LOG").unwrap_or_else(|_| match opts.log_level() {
        "off" => "off".to_owned(),
        level => [
            format!("kubernetes_plugin={level}"),
            format!("kube_client={level}"),
        ]
        .join(","),
    });

    let root_opts = opts.root;
    let color = match root_opts.color {
        Color::Auto => io::stderr().is_terminal(),
        Color::Always => true,
        Color::Never => false,
    };
    let json = match root_opts.log_format {
        LogFormat::Text => false,
        LogFormat::Json => true,
    };
    trace::init(color, json, &level);

    let ctx = match load_context(&root_opts.context) {
        Ok(ctx) => ctx,
        Err(error) => {
            emit!(ContextLoadFailed {
                path: &root_opts.context.to_string_lossy(),
                error: &error,
            });
            return error.exit_code();
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(message = "Unable to create async runtime.", %error);
            return exitcode::OSERR;
        }
    };

    let plugin = Plugin::new(
        LocalResourceStore::new(root_opts.resources_dir),
        KubeConnector,
        SshShell,
        root_opts.work_dir,
    );
    let result = runtime.block_on(plugin.run(opts.sub_command.operation(), &ctx));

    let (document, code) = match result {
        Ok(outcome) => match serde_json::to_value(outcome) {
            Ok(document) => (document, exitcode::OK),
            Err(error) => {
                error!(message = "Unable to encode operation outcome.", %error);
                return exitcode::SOFTWARE;
            }
        },
        Err(error) => (error.to_document(), error.exit_code()),
    };

    match write_document(&document) {
        Ok(()) => code,
        Err(error) => {
            error!(message = "Unable to write result document.", %error);
            exitcode::IOERR
        }
    }
}
