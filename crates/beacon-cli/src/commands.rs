//! CLI command definitions.

use clap::{Args, Subcommand, ValueEnum};

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the project configuration without starting anything
    CheckConfig,

    /// Describe workers, builders, schedulers and reporters
    Desc,

    /// List environments of the catalog
    Environments {
        /// Environment name, `*` allowed at either end
        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        arch: Option<String>,

        #[arg(long)]
        os: Option<String>,

        /// Only environments carrying this tag
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Run the daemon: webhooks, dispatch, periodic timers and reporting
    Start {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Build one builder now
    Build {
        /// Builder name
        builder: String,

        #[command(flatten)]
        target: ForceArgs,
    },

    /// Trigger every builder of a scheduler now
    Force {
        /// Scheduler name
        scheduler: String,

        #[command(flatten)]
        target: ForceArgs,
    },

    /// Submit or collect the crossbow packaging builds
    Crossbow {
        #[command(subcommand)]
        command: CrossbowCommands,
    },

    /// Inspect jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// What to build when forcing.
#[derive(Args, Debug, Default)]
pub struct ForceArgs {
    #[arg(short, long)]
    pub branch: Option<String>,

    #[arg(short, long)]
    pub revision: Option<String>,

    /// Build the merge ref of this pull request
    #[arg(long = "pr")]
    pub pull_request: Option<u64>,

    /// Extra property, repeatable
    #[arg(short = 'P', long = "property", value_name = "KEY=VALUE")]
    pub properties: Vec<String>,

    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Subcommand)]
pub enum CrossbowCommands {
    /// Force the crossbow submit scheduler
    Submit {
        #[arg(long, default_value = "crossbow-submit")]
        scheduler: String,

        #[command(flatten)]
        target: ForceArgs,
    },
    /// Force the crossbow report scheduler
    Report {
        #[arg(long, default_value = "crossbow-report")]
        scheduler: String,

        #[command(flatten)]
        target: ForceArgs,
    },
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// Recent jobs, newest first
    List {
        #[arg(short, long)]
        builder: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one job
    Show { job_id: String },
    /// Cancel a pending job
    Cancel { job_id: String },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Configuration value
        value: String,
    },
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
