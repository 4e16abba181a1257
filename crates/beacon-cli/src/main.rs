//! Beacon CI CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod config;
mod daemon;
mod handlers;
mod secrets;

use beacon_core::environment::EnvironmentFilter;
use commands::{Commands, ConfigCommands, CrossbowCommands, JobCommands, LogFormat};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(author, version, about = "Beacon CI event routing and build dispatch", long_about = None)]
struct Cli {
    /// Project file
    #[arg(short, long, global = true, env = "BEACON_PROJECT")]
    project: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = CliConfig::load().unwrap_or_default();
    let project = cli
        .project
        .or_else(|| config.project.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("beacon.yaml"));

    match cli.command {
        Commands::CheckConfig => handlers::check_config(&project)?,
        Commands::Desc => handlers::describe(&project)?,
        Commands::Environments {
            name,
            arch,
            os,
            tag,
        } => handlers::environments(
            &project,
            EnvironmentFilter {
                name,
                arch,
                os,
                tag,
            },
        )?,
        Commands::Start { bind } => {
            let project = handlers::load_project(&project)?;
            daemon::run(project, bind).await?
        }
        Commands::Build { builder, target } => handlers::build(&config, &builder, target).await?,
        Commands::Force { scheduler, target } => {
            handlers::force(&config, &scheduler, target).await?
        }
        Commands::Crossbow { command } => match command {
            CrossbowCommands::Submit { scheduler, target }
            | CrossbowCommands::Report { scheduler, target } => {
                handlers::force(&config, &scheduler, target).await?
            }
        },
        Commands::Jobs { command } => match command {
            JobCommands::List { builder, limit } => {
                handlers::list_jobs(&config, builder.as_deref(), limit).await?
            }
            JobCommands::Show { job_id } => handlers::show_job(&config, &job_id).await?,
            JobCommands::Cancel { job_id } => handlers::cancel_job(&config, &job_id).await?,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(())
}
