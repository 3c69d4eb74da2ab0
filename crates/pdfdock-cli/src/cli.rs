//! CLI argument parsing

use crate::commands::{self, FetchArgs, SubmitArgs, WorkerArgs};
use clap::{Parser, Subcommand};
use pdfdock_jobs::Settings;

/// pdfdock - document processing jobs
#[derive(Parser, Debug)]
#[command(name = "pdfdock")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Consume the shared job queue
    Worker(WorkerArgs),

    /// Submit a job
    Submit(SubmitArgs),

    /// Show the state of a job
    Status {
        /// Job id
        job_id: String,
    },

    /// Delete a job and its files
    Remove {
        /// Job id
        job_id: String,
    },

    /// Issue download tokens for a finished job
    Links {
        /// Job id
        job_id: String,
    },

    /// Download one produced file
    Fetch(FetchArgs),

    /// Remove expired jobs now
    Sweep,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self, settings: Settings) -> anyhow::Result<()> {
        match self.command {
            Commands::Worker(args) => commands::worker(settings, args).await,
            Commands::Submit(args) => commands::submit(settings, args).await,
            Commands::Status { job_id } => commands::status(settings, &job_id).await,
            Commands::Remove { job_id } => commands::remove(settings, &job_id).await,
            Commands::Links { job_id } => commands::links(settings, &job_id).await,
            Commands::Fetch(args) => commands::fetch(settings, args).await,
            Commands::Sweep => commands::sweep(settings).await,
        }
    }
}
