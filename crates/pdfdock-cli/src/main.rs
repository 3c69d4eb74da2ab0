//! pdfdock command line: queue worker, job submission and downloads

mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use pdfdock_jobs::{settings, LogFormat, Settings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    settings::load_dotenv();
    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    init_tracing(settings.log_format);

    cli.execute(settings).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pdfdock_jobs=info,pdfdock_ops=info"));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output on stdout stays scriptable.
    let _ = match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
}
