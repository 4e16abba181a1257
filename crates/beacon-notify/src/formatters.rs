//! Render job results as pull request comment text (GitHub markdown).

use beacon_core::job::Job;
use beacon_core::reporting::FormatterKind;
use serde::Deserialize;
use std::fmt::Write;

/// Output carrying `archery benchmark diff` JSON lines.
pub const BENCHMARK_OUTPUT: &str = "benchmark_diff";
/// Output carrying the submitted crossbow job as JSON.
pub const CROSSBOW_OUTPUT: &str = "crossbow_job";

/// Turns a set of job results into one comment body.
pub trait Formatter: Send + Sync {
    fn format(&self, jobs: &[Job]) -> String;
}

pub fn formatter_for(kind: FormatterKind) -> Box<dyn Formatter> {
    match kind {
        FormatterKind::Summary => Box::new(SummaryFormatter),
        FormatterKind::Benchmark => Box::new(BenchmarkFormatter),
        FormatterKind::Crossbow => Box::new(CrossbowFormatter),
    }
}

/// Status line per job, with the engine's summary when there is one.
pub struct SummaryFormatter;

impl Formatter for SummaryFormatter {
    fn format(&self, jobs: &[Job]) -> String {
        match jobs {
            [] => String::new(),
            [job] => {
                let mut out = format!(
                    "{} `{}` finished with status **{}**.",
                    status_icon(job),
                    job.builder,
                    job.status
                );
                if let Some(revision) = &job.change.revision {
                    let _ = write!(out, "\n\nRevision: {}", revision);
                }
                if let Some(summary) = job.summary.as_deref().filter(|s| !s.is_empty()) {
                    let _ = write!(out, "\n\n{}", summary);
                }
                out
            }
            jobs => {
                let mut out = String::from("| Builder | Status | Duration |\n|---|---|---|\n");
                for job in jobs {
                    let duration = job
                        .duration_ms()
                        .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                        .unwrap_or_else(|| "-".to_string());
                    let _ = writeln!(
                        out,
                        "| {} | {} {} | {} |",
                        job.builder,
                        status_icon(job),
                        job.status,
                        duration
                    );
                }
                out
            }
        }
    }
}

fn status_icon(job: &Job) -> &'static str {
    use beacon_core::job::JobStatus;
    match job.status {
        JobStatus::Success => ":heavy_check_mark:",
        JobStatus::Failure => ":x:",
        JobStatus::Exception => ":warning:",
        JobStatus::Cancelled => ":no_entry_sign:",
        JobStatus::Pending | JobStatus::Running => ":hourglass:",
    }
}

#[derive(Debug, Deserialize)]
struct BenchmarkDiff {
    benchmark: String,
    change: f64,
    #[serde(default)]
    regression: bool,
    #[serde(default)]
    baseline: Option<f64>,
    #[serde(default)]
    contender: Option<f64>,
}

/// Table of benchmark changes, regressions first.
pub struct BenchmarkFormatter;

impl Formatter for BenchmarkFormatter {
    fn format(&self, jobs: &[Job]) -> String {
        let mut out = String::new();
        for job in jobs {
            let Some(raw) = job.outputs.get(BENCHMARK_OUTPUT) else {
                out.push_str(&SummaryFormatter.format(std::slice::from_ref(job)));
                out.push_str("\n\n");
                continue;
            };

            // One JSON object per line; anything unparsable is skipped.
            let mut diffs: Vec<BenchmarkDiff> = raw
                .lines()
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect();
            diffs.sort_by(|a, b| {
                b.regression
                    .cmp(&a.regression)
                    .then_with(|| a.change.total_cmp(&b.change))
            });

            let regressions = diffs.iter().filter(|d| d.regression).count();
            let _ = writeln!(out, "Benchmark results for `{}`:\n", job.builder);
            if regressions == 0 {
                out.push_str("No regressions detected.\n\n");
            } else {
                let _ = writeln!(out, "**{} regression(s) detected.**\n", regressions);
            }
            out.push_str("| Benchmark | Baseline | Contender | Change |\n|---|---|---|---|\n");
            for diff in &diffs {
                let marker = if diff.regression { " :x:" } else { "" };
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {:+.3}%{} |",
                    diff.benchmark,
                    number(diff.baseline),
                    number(diff.contender),
                    diff.change * 100.0,
                    marker
                );
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

fn number(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v))
}

#[derive(Debug, Deserialize)]
struct CrossbowJob {
    id: String,
    #[serde(default)]
    tasks: Vec<CrossbowTask>,
}

#[derive(Debug, Deserialize)]
struct CrossbowTask {
    name: String,
    status: String,
    #[serde(default)]
    url: Option<String>,
}

/// Matrix of crossbow tasks with links to their runs.
pub struct CrossbowFormatter;

impl Formatter for CrossbowFormatter {
    fn format(&self, jobs: &[Job]) -> String {
        let mut out = String::new();
        for job in jobs {
            let parsed = job
                .outputs
                .get(CROSSBOW_OUTPUT)
                .and_then(|raw| serde_json::from_str::<CrossbowJob>(raw).ok());
            let Some(crossbow) = parsed else {
                out.push_str(&SummaryFormatter.format(std::slice::from_ref(job)));
                out.push_str("\n\n");
                continue;
            };

            let _ = writeln!(out, "Submitted crossbow builds: `{}`\n", crossbow.id);
            out.push_str("| Task | Status |\n|---|---|\n");
            for task in &crossbow.tasks {
                let status = match &task.url {
                    Some(url) => format!("[{}]({})", task.status, url),
                    None => task.status.clone(),
                };
                let _ = writeln!(out, "| {} | {} |", task.name, status);
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}
