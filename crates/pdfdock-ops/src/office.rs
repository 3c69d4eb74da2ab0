use crate::tool::Toolbox;
use async_trait::async_trait;
use pdfdock_jobs::{Job, Operation, Processor, TaskFailure};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const LIBREOFFICE: &[&str] = &["soffice", "soffice.bin", "libreoffice"];

#[derive(Debug, Default, Deserialize)]
pub struct ConvertOptions {}

/// Convert `input` to PDF with headless LibreOffice, writing `<job id>.pdf`
/// into the job workspace.
async fn convert(tools: &Toolbox, job: &Job, input: &Path) -> Result<Vec<PathBuf>, TaskFailure> {
    let soffice = tools
        .find(LIBREOFFICE)
        .ok_or_else(|| TaskFailure::dependency("LibreOffice (soffice) not found"))?;

    let workspace = &job.workspace_path;
    let args: Vec<OsString> = vec![
        "--headless".into(),
        "--nologo".into(),
        "--convert-to".into(),
        "pdf".into(),
        "--outdir".into(),
        workspace.into(),
        input.into(),
    ];
    tools.run(&soffice, args).await?;

    let stem = input
        .file_stem()
        .ok_or_else(|| TaskFailure::execution("input has no file name"))?;
    let mut produced_name = stem.to_os_string();
    produced_name.push(".pdf");
    let produced = workspace.join(produced_name);
    if !produced.is_file() {
        return Err(TaskFailure::execution(format!(
            "LibreOffice did not produce {}",
            produced.display()
        )));
    }

    let out = workspace.join(format!("{}.pdf", job.id));
    if produced != out {
        tokio::fs::rename(&produced, &out).await?;
    }
    Ok(vec![out])
}

#[derive(Debug, Clone)]
pub struct WordToPdf {
    tools: Toolbox,
}

impl WordToPdf {
    pub fn new(tools: Toolbox) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Processor for WordToPdf {
    const OPERATION: Operation = Operation::WordToPdf;
    type Options = ConvertOptions;

    async fn process(
        &self,
        job: &Job,
        _options: ConvertOptions,
        inputs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, TaskFailure> {
        convert(&self.tools, job, &inputs[0]).await
    }
}

#[derive(Debug, Clone)]
pub struct PptxToPdf {
    tools: Toolbox,
}

impl PptxToPdf {
    pub fn new(tools: Toolbox) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Processor for PptxToPdf {
    const OPERATION: Operation = Operation::PptxToPdf;
    type Options = ConvertOptions;

    async fn process(
        &self,
        job: &Job,
        _options: ConvertOptions,
        inputs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, TaskFailure> {
        convert(&self.tools, job, &inputs[0]).await
    }
}
