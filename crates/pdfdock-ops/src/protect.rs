use crate::pdf;
use crate::tool::Toolbox;
use async_trait::async_trait;
use pdfdock_jobs::{Job, Operation, Processor, TaskFailure};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const QPDF: &[&str] = &["qpdf"];

#[derive(Deserialize)]
pub struct ProtectOptions {
    #[serde(default)]
    pub password: String,

    /// Defaults to `password`
    #[serde(default)]
    pub owner_password: Option<String>,
}

impl std::fmt::Debug for ProtectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectOptions").finish_non_exhaustive()
    }
}

impl ProtectOptions {
    /// `(user, owner)` passwords.
    fn passwords(&self) -> Result<(&str, &str), TaskFailure> {
        if self.password.is_empty() {
            return Err(TaskFailure::validation("a password is required"));
        }
        let owner = match self.owner_password.as_deref() {
            Some(owner) if !owner.is_empty() => owner,
            _ => self.password.as_str(),
        };
        // Arguments reach qpdf one per line.
        if [self.password.as_str(), owner].iter().any(|p| p.contains(['\n', '\r'])) {
            return Err(TaskFailure::validation("passwords cannot contain line breaks"));
        }
        Ok((self.password.as_str(), owner))
    }
}

/// Encrypt a PDF with AES-256 using qpdf.
#[derive(Debug, Clone)]
pub struct Protect {
    tools: Toolbox,
}

impl Protect {
    pub fn new(tools: Toolbox) -> Self {
        Self { tools }
    }
}

/// qpdf reads the arguments from a file so the passwords never show up in
/// the process list.
fn argument_file(user: &str, owner: &str, input: &Path, out: &Path) -> String {
    let args = [
        "--encrypt".to_string(),
        user.to_string(),
        owner.to_string(),
        "256".to_string(),
        "--".to_string(),
        input.display().to_string(),
        out.display().to_string(),
    ];
    let mut file = args.join("\n");
    file.push('\n');
    file
}

#[async_trait]
impl Processor for Protect {
    const OPERATION: Operation = Operation::Protect;
    type Options = ProtectOptions;

    async fn process(
        &self,
        job: &Job,
        options: ProtectOptions,
        inputs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, TaskFailure> {
        let (user, owner) = options.passwords()?;
        let input = &inputs[0];
        if !pdf::has_extension(input, &["pdf"]) {
            return Err(TaskFailure::validation(format!(
                "{} is not a PDF",
                pdf::display_name(input)
            )));
        }
        let qpdf = self
            .tools
            .find(QPDF)
            .ok_or_else(|| TaskFailure::dependency("qpdf not found"))?;

        let out = pdf::output_path(job, "protected");
        let args_path = job.workspace_path.join(format!(".{}_protect.args", job.id));
        tokio::fs::write(&args_path, argument_file(user, owner, input, &out)).await?;

        let mut arg = std::ffi::OsString::from("@");
        arg.push(&args_path);
        let result = self.tools.run(&qpdf, [arg]).await;
        if let Err(e) = tokio::fs::remove_file(&args_path).await {
            tracing::warn!(job_id = %job.id, error = %e, "could not remove qpdf argument file");
        }
        result?;

        if !out.is_file() {
            return Err(TaskFailure::execution("qpdf did not produce an output file"));
        }
        Ok(vec![out])
    }
}
