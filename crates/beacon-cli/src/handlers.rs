//! Command handlers.

use crate::client::ApiClient;
use crate::commands::ForceArgs;
use crate::config::CliConfig;
use crate::secrets::EnvSecretSource;
use beacon_core::Error;
use beacon_core::environment::EnvironmentFilter;
use beacon_core::job::{Job, JobStatus};
use beacon_scheduler::{Cadence, ForceRequest, Project, ProjectConfig, SchedulerKind, assemble};
use console::style;
use std::path::Path;

/// Load and assemble the project file, printing every configuration problem.
pub fn load_project(path: &Path) -> anyhow::Result<Project> {
    let config = ProjectConfig::load(path)?;
    match assemble(config, &EnvSecretSource) {
        Ok(project) => Ok(project),
        Err(Error::Configuration(errors)) => {
            println!(
                "{} {} has {} problem(s):",
                style("✗").red(),
                path.display(),
                errors.len()
            );
            for problem in errors.iter() {
                println!("  - {}", problem);
            }
            anyhow::bail!("invalid configuration")
        }
        Err(e) => Err(e.into()),
    }
}

pub fn check_config(path: &Path) -> anyhow::Result<()> {
    let project = load_project(path)?;
    println!(
        "{} Project \"{}\" is valid",
        style("✓").green(),
        project.name
    );
    println!(
        "  {} workers, {} environments, {} builders, {} schedulers, {} reporters",
        project.workers.len(),
        project.environments.len(),
        project.builders().len(),
        project.schedulers().len(),
        project.reporters.len()
    );
    Ok(())
}

pub fn describe(path: &Path) -> anyhow::Result<()> {
    let project = load_project(path)?;

    println!("{} ({})", style(&project.name).bold(), project.repo);
    if let Some(url) = &project.url {
        println!("  {}", style(url).dim());
    }

    println!("\n{}", style("Workers").underlined());
    for worker in project.workers.iter() {
        let caps: Vec<&str> = worker.capabilities.iter().map(String::as_str).collect();
        println!(
            "  {} (max {} builds, arch {}) [{}]",
            worker.name,
            worker.max_builds,
            worker.arch.as_deref().unwrap_or("any"),
            caps.join(", ")
        );
    }

    println!("\n{}", style("Builders").underlined());
    for builder in project.builders() {
        println!("  {} {}", builder.name, style(&builder.image).dim());
    }

    println!("\n{}", style("Schedulers").underlined());
    for scheduler in project.schedulers() {
        let detail = match &scheduler.kind {
            SchedulerKind::Reactive { .. } => "reactive".to_string(),
            SchedulerKind::Periodic {
                cadence: Cadence::Daily { hour, minute },
            } => format!("periodic (daily {:02}:{:02} UTC)", hour, minute),
            SchedulerKind::Periodic {
                cadence: Cadence::Cron { cron },
            } => format!("periodic ({})", cron),
            SchedulerKind::Manual => "manual".to_string(),
        };
        println!("  {} {}", style(&scheduler.name).bold(), style(detail).dim());
        for builder in &scheduler.builders {
            println!("    - {}", builder);
        }
    }

    if !project.reporters.is_empty() {
        println!("\n{}", style("Reporters").underlined());
        for reporter in &project.reporters {
            println!(
                "  {} ({:?}, {} token(s))",
                reporter.name,
                reporter.kind,
                reporter.tokens.len()
            );
        }
    }
    Ok(())
}

pub fn environments(path: &Path, filter: EnvironmentFilter) -> anyhow::Result<()> {
    let project = load_project(path)?;
    let mut count = 0;
    for env in project.environments.filter(&filter) {
        count += 1;
        let tags: Vec<&str> = env.tags.iter().map(String::as_str).collect();
        println!(
            "{} {} {}",
            style(&env.name).bold(),
            env.image,
            style(format!("[{}]", tags.join(", "))).dim()
        );
    }
    if count == 0 {
        println!("{} No matching environments", style("i").blue());
    }
    Ok(())
}

fn force_request(args: ForceArgs) -> anyhow::Result<ForceRequest> {
    let mut properties = std::collections::BTreeMap::new();
    for pair in args.properties {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Property `{}` is not KEY=VALUE", pair))?;
        properties.insert(key.to_string(), value.to_string());
    }
    Ok(ForceRequest {
        branch: args.branch,
        revision: args.revision,
        pull_request: args.pull_request,
        properties,
        reason: args.reason,
        ..ForceRequest::default()
    })
}

pub async fn build(config: &CliConfig, builder: &str, args: ForceArgs) -> anyhow::Result<()> {
    println!("{} Building {}", style("▶").cyan(), style(builder).bold());
    let queued = ApiClient::new(config)
        .force_builder(builder, &force_request(args)?)
        .await?;
    for id in &queued.jobs {
        println!("{} Queued job {}", style("✓").green(), id);
    }
    Ok(())
}

pub async fn force(config: &CliConfig, scheduler: &str, args: ForceArgs) -> anyhow::Result<()> {
    println!("{} Forcing {}", style("▶").cyan(), style(scheduler).bold());
    let queued = ApiClient::new(config)
        .force_scheduler(scheduler, &force_request(args)?)
        .await?;
    if queued.jobs.is_empty() {
        println!("{} Nothing queued", style("i").blue());
    }
    for id in &queued.jobs {
        println!("{} Queued job {}", style("✓").green(), id);
    }
    Ok(())
}

fn status_style(status: JobStatus) -> console::StyledObject<&'static str> {
    let label = status.as_str();
    match status {
        JobStatus::Success => style(label).green(),
        JobStatus::Failure | JobStatus::Exception => style(label).red(),
        JobStatus::Cancelled => style(label).yellow(),
        JobStatus::Pending | JobStatus::Running => style(label).cyan(),
    }
}

fn print_job(job: &Job) {
    println!(
        "{}  {:<10} {}  {}",
        job.id,
        status_style(job.status),
        job.builder,
        style(&job.scheduler).dim()
    );
}

pub async fn list_jobs(config: &CliConfig, builder: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let jobs = ApiClient::new(config).list_jobs(builder, limit).await?;
    if jobs.is_empty() {
        println!("{} No jobs", style("i").blue());
    }
    for job in &jobs {
        print_job(job);
    }
    Ok(())
}

pub async fn show_job(config: &CliConfig, id: &str) -> anyhow::Result<()> {
    let job = ApiClient::new(config).get_job(id).await?;
    print_job(&job);
    if let Some(revision) = &job.change.revision {
        println!("  revision: {}", revision);
    }
    for (key, value) in &job.properties {
        println!("  {} = {}", style(key).dim(), value);
    }
    for (key, value) in &job.outputs {
        println!("  {} {} = {}", style("output").dim(), key, value);
    }
    if let Some(summary) = &job.summary {
        println!("  {}", summary);
    }
    Ok(())
}

pub async fn cancel_job(config: &CliConfig, id: &str) -> anyhow::Result<()> {
    println!("Cancelling job {}...", style(id).bold());
    let job = ApiClient::new(config).cancel_job(id).await?;
    println!("{} Job {} is {}", style("✓").green(), job.id, status_style(job.status));
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> anyhow::Result<()> {
    println!("Current configuration:");
    println!("  api_url: {}", config.api_url);
    println!(
        "  project: {}",
        config.project.as_deref().unwrap_or("(not set)")
    );

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> anyhow::Result<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value).map_err(anyhow::Error::msg)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_request_parses_properties() {
        let request = force_request(ForceArgs {
            revision: Some("abc".into()),
            properties: vec!["CMAKE_BUILD_TYPE=release".into(), "EMPTY=".into()],
            ..ForceArgs::default()
        })
        .unwrap();

        assert_eq!(request.revision.as_deref(), Some("abc"));
        assert_eq!(request.properties["CMAKE_BUILD_TYPE"], "release");
        assert_eq!(request.properties["EMPTY"], "");

        let bad = force_request(ForceArgs {
            properties: vec!["nope".into()],
            ..ForceArgs::default()
        });
        assert!(bad.is_err());
    }

    #[test]
    fn test_check_config_reads_project_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beacon.yaml");
        std::fs::write(
            &path,
            r#"
name: arrow
repo: apache/arrow
workers: [{ name: w1 }]
environments: [{ name: ubuntu, tags: [cpp], image: { repository: beacon/cpp } }]
templates: [{ name: C++, tags: [cpp], steps: [] }]
schedulers:
  - { name: manual, kind: manual, builders: [C++] }
"#,
        )
        .unwrap();
        check_config(&path).unwrap();

        std::fs::write(
            &path,
            r#"
name: arrow
repo: apache/arrow
workers: [{ name: w1 }]
schedulers:
  - { name: manual, kind: manual, builders: [Missing] }
"#,
        )
        .unwrap();
        assert!(check_config(&path).is_err());
    }
}
