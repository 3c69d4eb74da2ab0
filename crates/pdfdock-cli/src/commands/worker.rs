//! Queue worker process

use anyhow::Result;
use clap::Args;
use console::style;
use pdfdock_jobs::Settings;

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Seconds between sweeps of expired jobs
    #[arg(long, default_value = "60")]
    pub sweep_every: u64,
}

#[cfg(feature = "redis")]
pub async fn worker(settings: Settings, args: WorkerArgs) -> Result<()> {
    use pdfdock_jobs::store::spawn_sweeper;
    use std::time::Duration;
    use tokio::sync::watch;

    let runtime = super::runtime(settings).await?;
    let worker = runtime.queue_worker().await?;
    let sweeper = spawn_sweeper(
        runtime.store().clone(),
        runtime.settings().storage_ttl(),
        Duration::from_secs(args.sweep_every.max(1)),
    );

    println!(
        "{} consuming {}",
        style("pdfdock worker").bold(),
        style(&runtime.settings().queue_name).cyan()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current job");
        }
        let _ = shutdown_tx.send(true);
    });

    let result = worker.run(shutdown_rx).await;
    sweeper.abort();
    runtime.shutdown().await?;
    result?;

    println!("{}", style("Worker stopped").dim());
    Ok(())
}

#[cfg(not(feature = "redis"))]
pub async fn worker(_settings: Settings, _args: WorkerArgs) -> Result<()> {
    anyhow::bail!("this build has no queue support; rebuild with the `redis` feature")
}
