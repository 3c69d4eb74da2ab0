//! Job submission

use anyhow::{bail, Result};
use clap::Args;
use console::style;
use pdfdock_jobs::{JobOptions, JobService, JobStatus, JobView, Settings, Strategy, Upload};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Operation name, e.g. merge, split, rotate, compress, word-to-pdf
    pub operation: String,

    /// Operation option as KEY=VALUE (repeatable)
    #[arg(short = 'o', long = "option", value_parser = parse_option)]
    pub options: Vec<(String, String)>,

    /// Input file (repeatable, order matters)
    #[arg(short = 'f', long = "file")]
    pub files: Vec<PathBuf>,

    /// Wait for the job to finish and print its download links
    #[arg(short, long)]
    pub wait: bool,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "600")]
    pub wait_timeout: u64,
}

fn parse_option(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{}`", raw)),
    }
}

pub async fn submit(settings: Settings, args: SubmitArgs) -> Result<()> {
    let runtime = super::runtime(settings).await?;
    let service = runtime.service();

    let mut uploads = Vec::with_capacity(args.files.len());
    for path in &args.files {
        uploads.push(Upload::from_path(path).await?);
    }
    let options: JobOptions = args
        .options
        .into_iter()
        .map(|(key, value)| (key, serde_json::Value::String(value)))
        .collect();

    let job_id = service.submit(&args.operation, options, uploads).await?;
    println!("{} {}", style("Submitted").green().bold(), style(&job_id).cyan());

    // Local workers live in this process; leaving now would strand the job.
    let local = runtime.backend().strategy() == Strategy::Local;
    if local && !args.wait {
        println!(
            "{}",
            style("No queue configured, running the job in this process").dim()
        );
    }

    let result = if args.wait || local {
        wait_and_report(&service, job_id.as_str(), Duration::from_secs(args.wait_timeout)).await
    } else {
        Ok(())
    };
    runtime.shutdown().await?;
    result
}

async fn wait_and_report(service: &JobService, job_id: &str, limit: Duration) -> Result<()> {
    let view = wait_for(service, job_id, limit).await?;
    match view.status {
        JobStatus::Done => {
            println!("{} {}", style("Done").green().bold(), job_id);
            for link in service.links(job_id).await? {
                println!(
                    "  {} {} {}",
                    style(&link.filename).bold(),
                    style(format!("({} bytes)", link.size_bytes)).dim(),
                    link.token
                );
            }
            Ok(())
        }
        _ => bail!(
            "job {} failed: {}",
            job_id,
            view.error_message.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

async fn wait_for(service: &JobService, job_id: &str, limit: Duration) -> Result<JobView> {
    let deadline = tokio::time::Instant::now() + limit;
    let mut last_progress = None;
    loop {
        let view = service.status(job_id).await?;
        if view.status.is_terminal() {
            return Ok(view);
        }
        if last_progress != Some(view.progress) {
            println!("  {} {}%", style(view.status.as_str()).yellow(), view.progress);
            last_progress = Some(view.progress);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("job {} still {} after {}s", job_id, view.status, limit.as_secs());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
