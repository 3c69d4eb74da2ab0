//! CLI commands

mod jobs;
mod submit;
mod worker;

pub use jobs::{fetch, links, remove, status, sweep, FetchArgs};
pub use submit::{submit, SubmitArgs};
pub use worker::{worker, WorkerArgs};

use pdfdock_jobs::{Runtime, Settings};
use pdfdock_ops::Toolbox;

/// Build the runtime with every operation this binary ships.
async fn runtime(settings: Settings) -> anyhow::Result<Runtime> {
    let registry = pdfdock_ops::registry(Toolbox::from_env(settings.tool_timeout()));
    Ok(Runtime::init(settings, registry).await?)
}
