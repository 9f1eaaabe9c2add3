//! Argument surface of the dedalus client.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Dedalus command-line client.
#[derive(Debug, Parser)]
#[command(name = "dedalus", version, about = "Dedalus commandline client")]
pub struct Cli {
    /// Dedalus master server.
    #[arg(short, long, default_value = "localhost", global = true)]
    pub server: String,

    /// Dedalus master port.
    #[arg(short, long, default_value_t = 8080, global = true)]
    pub port: u16,

    /// Use SSL while connecting to the dedalus master.
    #[arg(long, default_value_t = false, global = true)]
    pub use_ssl: bool,

    /// What api version to use.
    #[arg(long, default_value = "v1.0", global = true)]
    pub api_version: String,

    /// Log chattily.
    #[arg(long, default_value_t = false, global = true)]
    pub verbose: bool,

    /// Type of objects to manipulate.
    #[command(subcommand)]
    pub mode: Mode,
}

/// Top-level object kinds.
#[derive(Debug, Subcommand)]
pub enum Mode {
    /// Commands to work with graphs.
    Graph {
        /// Graph action.
        #[command(subcommand)]
        action: GraphAction,
    },
    /// Commands to work with instances.
    Instance {
        /// Instance action.
        #[command(subcommand)]
        action: InstanceAction,
    },
}

/// How a `graph create` input is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    /// Wrap a shell script into a one-task graph.
    #[default]
    Script,
    /// Post the input as a ready GraphStruct JSON document.
    Raw,
}

/// Graph subcommands.
#[derive(Debug, Subcommand)]
pub enum GraphAction {
    /// Create new graph.
    Create {
        /// Graph name to create.
        #[arg(short, long)]
        name: String,
        /// Path to the graph (stdin if omitted).
        #[arg(long)]
        graph: Option<PathBuf>,
        /// Hosts to run a script graph on (ignored in raw format).
        #[arg(long, num_args = 0.., default_values_t = vec!["localhost".to_string()])]
        hosts: Vec<String>,
        /// Format of the graph input.
        #[arg(short, long, value_enum, default_value = "script")]
        format: GraphFormat,
    },
    /// Get info about a graph.
    Info {
        /// Graph name to get info about.
        #[arg(short, long)]
        name: Option<String>,
        /// Graph revision (last one if omitted).
        #[arg(short, long)]
        revision: Option<u64>,
        /// Gather info about all graph revisions.
        #[arg(long, default_value_t = false)]
        list_all: bool,
    },
    /// Launch graph.
    Launch {
        /// Graph name to launch.
        #[arg(short, long)]
        name: String,
        /// Graph revision (last one if omitted).
        #[arg(short, long)]
        revision: Option<u64>,
    },
    /// Schedule periodic launches of a graph.
    Schedule {
        /// Graph name to schedule.
        #[arg(short, long)]
        name: String,
        /// Cron rule, e.g. "*/5 * * * *".
        #[arg(short = 'c', long)]
        rule: String,
    },
}

/// Target state for `instance ctrl`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TargetState {
    /// Start the instance.
    #[default]
    Start,
    /// Stop the instance.
    Stop,
}

/// Instance subcommands.
#[derive(Debug, Subcommand)]
pub enum InstanceAction {
    /// Get info about a graph instance.
    Info {
        /// Graph instance id.
        #[arg(short, long)]
        id: Option<String>,
        /// Gather info about all graph instances.
        #[arg(long, default_value_t = false)]
        list_all: bool,
    },
    /// Switch a graph instance to a state.
    Ctrl {
        /// Graph instance id to control.
        #[arg(short, long)]
        id: String,
        /// Target state for the instance.
        #[arg(short, long, value_enum, default_value = "start")]
        target_state: TargetState,
    },
    /// Get graph instance logs.
    Logs {
        /// Graph instance id.
        #[arg(short, long)]
        id: String,
        /// Task name to get logs for.
        #[arg(long)]
        task_name: String,
        /// Host to get logs from.
        #[arg(long)]
        host: String,
        /// Log type.
        #[arg(long, default_value = "out")]
        log_type: String,
    },
}
