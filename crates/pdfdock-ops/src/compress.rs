use crate::pdf;
use crate::tool::Toolbox;
use async_trait::async_trait;
use pdfdock_jobs::{Job, Operation, Processor, TaskFailure};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const GHOSTSCRIPT: &[&str] = &["gs", "gswin64c", "gswin32c"];
const QPDF: &[&str] = &["qpdf"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    /// Ghostscript `-dPDFSETTINGS` preset
    pub fn preset(&self) -> &'static str {
        match self {
            Self::Low => "/screen",
            Self::Medium => "/ebook",
            Self::High => "/printer",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CompressOptions {
    #[serde(default)]
    pub quality: Quality,
}

/// Shrink a PDF with Ghostscript, falling back to qpdf and then to an
/// in-process stream-compressing rewrite.
#[derive(Debug, Clone)]
pub struct Compress {
    tools: Toolbox,
}

impl Compress {
    pub fn new(tools: Toolbox) -> Self {
        Self { tools }
    }

    async fn with_ghostscript(&self, input: &Path, out: &Path, quality: Quality) -> bool {
        let Some(gs) = self.tools.find(GHOSTSCRIPT) else {
            return false;
        };
        let mut output_arg = OsString::from("-sOutputFile=");
        output_arg.push(out);
        let args: Vec<OsString> = vec![
            "-sDEVICE=pdfwrite".into(),
            "-dCompatibilityLevel=1.4".into(),
            format!("-dPDFSETTINGS={}", quality.preset()).into(),
            "-dNOPAUSE".into(),
            "-dQUIET".into(),
            "-dBATCH".into(),
            output_arg,
            input.into(),
        ];
        self.attempt(&gs, args, out).await
    }

    async fn with_qpdf(&self, input: &Path, out: &Path) -> bool {
        let Some(qpdf) = self.tools.find(QPDF) else {
            return false;
        };
        let args: Vec<OsString> = vec![
            "--linearize".into(),
            "--object-streams=generate".into(),
            "--stream-data=compress".into(),
            input.into(),
            out.into(),
        ];
        self.attempt(&qpdf, args, out).await
    }

    async fn attempt(&self, program: &Path, args: Vec<OsString>, out: &Path) -> bool {
        match self.tools.run(program, args).await {
            Ok(()) if out.is_file() => true,
            Ok(()) => {
                tracing::warn!(tool = %program.display(), "tool succeeded without writing output");
                false
            }
            Err(e) => {
                tracing::warn!("Compression attempt failed: {}", e);
                let _ = tokio::fs::remove_file(out).await;
                false
            }
        }
    }
}

#[async_trait]
impl Processor for Compress {
    const OPERATION: Operation = Operation::Compress;
    type Options = CompressOptions;

    async fn process(
        &self,
        job: &Job,
        options: CompressOptions,
        inputs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, TaskFailure> {
        let input = &inputs[0];
        let out = pdf::output_path(job, "compressed");

        if self.with_ghostscript(input, &out, options.quality).await {
            return Ok(vec![out]);
        }
        if self.with_qpdf(input, &out).await {
            return Ok(vec![out]);
        }

        tracing::debug!(job_id = %job.id, "no external compressor succeeded, rewriting in process");
        let input = input.clone();
        let target = out.clone();
        pdf::blocking(move || {
            let mut doc = pdf::load(&input)?;
            doc.prune_objects();
            doc.compress();
            pdf::save(&mut doc, &target)
        })
        .await?;
        Ok(vec![out])
    }
}
