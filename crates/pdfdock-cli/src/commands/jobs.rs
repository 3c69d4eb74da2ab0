//! Commands acting on existing jobs

use anyhow::Result;
use clap::Args;
use console::style;
use pdfdock_jobs::Settings;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Job id
    pub job_id: String,

    /// Produced file name
    pub filename: String,

    /// Download token from `pdfdock links`
    pub token: String,

    /// Where to write the file (defaults to the file name)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

pub async fn status(settings: Settings, job_id: &str) -> Result<()> {
    let runtime = super::runtime(settings).await?;
    let view = runtime.service().status(job_id).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    runtime.shutdown().await?;
    Ok(())
}

pub async fn remove(settings: Settings, job_id: &str) -> Result<()> {
    let runtime = super::runtime(settings).await?;
    runtime.service().remove(job_id).await?;
    println!("{} {}", style("Removed").green(), job_id);
    runtime.shutdown().await?;
    Ok(())
}

pub async fn links(settings: Settings, job_id: &str) -> Result<()> {
    let runtime = super::runtime(settings).await?;
    for link in runtime.service().links(job_id).await? {
        println!(
            "{}\t{}\t{}",
            style(&link.filename).bold(),
            link.size_bytes,
            link.token
        );
    }
    runtime.shutdown().await?;
    Ok(())
}

pub async fn fetch(settings: Settings, args: FetchArgs) -> Result<()> {
    let runtime = super::runtime(settings).await?;
    let mut download = runtime
        .service()
        .fetch(&args.job_id, &args.filename, &args.token)
        .await?;

    let out = args.out.unwrap_or_else(|| PathBuf::from(&download.filename));
    let mut file = tokio::fs::File::create(&out).await?;
    let written = tokio::io::copy(&mut download.file, &mut file).await?;
    println!(
        "{} {} ({} bytes)",
        style("Saved").green(),
        out.display(),
        written
    );
    runtime.shutdown().await?;
    Ok(())
}

pub async fn sweep(settings: Settings) -> Result<()> {
    let runtime = super::runtime(settings).await?;
    let removed = runtime
        .store()
        .sweep_expired(runtime.settings().storage_ttl())
        .await?;
    println!("{} {} expired job(s)", style("Removed").green(), removed);
    runtime.shutdown().await?;
    Ok(())
}
