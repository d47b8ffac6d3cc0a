use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::operations::{AgentAction, Operation};

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case", version, about)]
pub struct Opts {
    #[command(flatten)]
    pub root: RootOpts,

    #[command(subcommand)]
    pub sub_command: SubCommand,
}

impl Opts {
    pub fn get_matches() -> Result<Self, clap::Error> {
        Self::try_parse()
    }

    pub const fn log_level(&self) -> &'static str {
        let (quiet_level, verbose_level) = match self.sub_command {
            SubCommand::Validate => {
                if self.root.verbose == 0 {
                    (self.root.quiet + 1, self.root.verbose)
                } else {
                    (self.root.quiet, self.root.verbose - 1)
                }
            }
            _ => (self.root.quiet, self.root.verbose),
        };
        match quiet_level {
            0 => match verbose_level {
                0 => "info",
                1 => "debug",
                2..=255 => "trace",
            },
            1 => "warn",
            2 => "error",
            3..=255 => "off",
        }
    }
}

#[derive(Args, Debug)]
#[command(rename_all = "kebab-case")]
pub struct RootOpts {
    /// Read the operation context from this file, `-` reads standard input.
    #[arg(
        long,
        global = true,
        env = "KUBERNETES_PLUGIN_CONTEXT",
        default_value = "-"
    )]
    pub context: PathBuf,

    /// Directory blueprint resources are looked up in.
    #[arg(
        long,
        global = true,
        env = "KUBERNETES_PLUGIN_RESOURCES_DIR",
        default_value = "."
    )]
    pub resources_dir: PathBuf,

    /// Directory agent kubeconfig files are written to.
    #[arg(
        long,
        global = true,
        env = "KUBERNETES_PLUGIN_WORK_DIR",
        default_value = "."
    )]
    pub work_dir: PathBuf,

    /// Enable more detailed internal logging. Repeat to increase level. Overridden by `--quiet`.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Reduce detail of internal logging. Repeat to reduce further. Overrides `--verbose`.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub quiet: u8,

    /// Set the logging format
    #[arg(long, global = true, default_value = "text", env = "KUBERNETES_PLUGIN_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Control when ANSI terminal formatting is used.
    ///
    /// By default the plugin detects whether stderr is a terminal and only
    /// then enables ANSI formatting. `--color always` and `--color never`
    /// force it on or off.
    #[arg(long, global = true, default_value = "auto", env = "KUBERNETES_PLUGIN_COLOR")]
    pub color: Color,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum SubCommand {
    /// Create the Kubernetes resource a node defines.
    ResourceCreate,

    /// Refresh the stored state of a previously created resource.
    ResourceRead,

    /// Delete the resource stored by a previous create.
    ResourceDelete,

    /// Join a cluster to a federation.
    ClusterCreate,

    /// Remove a cluster from a federation.
    ClusterDelete,

    /// Prepare the connection command of an agent installed in a pod.
    Agent {
        #[arg(value_enum)]
        action: AgentAction,
    },

    /// Check the API mapping and definition of a node without contacting a
    /// cluster, then exit.
    Validate,
}

impl SubCommand {
    pub const fn operation(&self) -> Operation {
        match self {
            Self::ResourceCreate => Operation::ResourceCreate,
            Self::ResourceRead => Operation::ResourceRead,
            Self::ResourceDelete => Operation::ResourceDelete,
            Self::ClusterCreate => Operation::ClusterCreate,
            Self::ClusterDelete => Operation::ClusterDelete,
            Self::Agent { action } => Operation::Agent(*action),
            Self::Validate => Operation::Validate,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Auto,
    Always,
    Never,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}
