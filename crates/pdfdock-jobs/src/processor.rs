use crate::error::TaskFailure;
use crate::job::Job;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::sync::Arc;

/// Known operation identifiers.
///
/// Names that do not match a known operation are kept as `Unknown` so that a
/// job submitted by a newer release still reaches a worker and fails cleanly
/// with `UnsupportedOperation`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Merge,
    Split,
    Rotate,
    Compress,
    WordToPdf,
    PptxToPdf,
    Watermark,
    ImagesToPdf,
    Protect,
    Unknown(String),
}

/// Number of input files an operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
    Between(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Self::Exactly(n) => count == n,
            Self::AtLeast(n) => count >= n,
            Self::Between(min, max) => (min..=max).contains(&count),
            Self::Any => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(1) => write!(f, "exactly one file"),
            Self::Exactly(n) => write!(f, "exactly {} files", n),
            Self::AtLeast(1) => write!(f, "at least one file"),
            Self::AtLeast(n) => write!(f, "at least {} files", n),
            Self::Between(min, max) => write!(f, "{} to {} files", min, max),
            Self::Any => write!(f, "any number of files"),
        }
    }
}

impl Operation {
    pub fn from_name(name: &str) -> Self {
        match name {
            "merge" => Self::Merge,
            "split" => Self::Split,
            "rotate" => Self::Rotate,
            "compress" => Self::Compress,
            "word-to-pdf" => Self::WordToPdf,
            "pptx-to-pdf" => Self::PptxToPdf,
            "watermark" => Self::Watermark,
            "images-to-pdf" => Self::ImagesToPdf,
            "protect" => Self::Protect,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Merge => "merge",
            Self::Split => "split",
            Self::Rotate => "rotate",
            Self::Compress => "compress",
            Self::WordToPdf => "word-to-pdf",
            Self::PptxToPdf => "pptx-to-pdf",
            Self::Watermark => "watermark",
            Self::ImagesToPdf => "images-to-pdf",
            Self::Protect => "protect",
            Self::Unknown(name) => name,
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Self::Merge => Arity::AtLeast(2),
            Self::ImagesToPdf => Arity::AtLeast(1),
            // The document, plus an optional stamp image
            Self::Watermark => Arity::Between(1, 2),
            Self::Unknown(_) => Arity::Any,
            _ => Arity::Exactly(1),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A unit of work: turns a job's inputs into output files in its workspace.
///
/// Implementations receive everything they need through their arguments and
/// must only write under `job.workspace_path`.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// The operation this processor implements
    const OPERATION: Operation;

    /// Strongly-typed options decoded from the job's option map
    type Options: DeserializeOwned + Send + Sync + Debug;

    /// Produce the output files, in manifest order
    async fn process(
        &self,
        job: &Job,
        options: Self::Options,
        inputs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, TaskFailure>;
}

/// A type-erased processor
#[async_trait]
pub trait ProcessorHandler: Send + Sync {
    async fn handle(&self, job: &Job, inputs: &[PathBuf]) -> Result<Vec<PathBuf>, TaskFailure>;
}

#[async_trait]
impl<P: Processor> ProcessorHandler for P {
    async fn handle(&self, job: &Job, inputs: &[PathBuf]) -> Result<Vec<PathBuf>, TaskFailure> {
        let arity = P::OPERATION.arity();
        if !arity.accepts(inputs.len()) {
            return Err(TaskFailure::validation(format!(
                "{} expects {}, got {}",
                P::OPERATION,
                arity,
                inputs.len()
            )));
        }

        let options: P::Options =
            serde_json::from_value(serde_json::Value::Object(job.options.clone())).map_err(
                |e| TaskFailure::validation(format!("invalid options for {}: {}", P::OPERATION, e)),
            )?;
        self.process(job, options, inputs).await
    }
}

/// Fixed table of processors, consulted at dispatch time.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<Operation, Arc<dyn ProcessorHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under its operation
    pub fn register<P: Processor>(mut self, processor: P) -> Self {
        self.handlers.insert(P::OPERATION, Arc::new(processor));
        self
    }

    /// Look up the processor for an operation name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ProcessorHandler>, TaskFailure> {
        let operation = Operation::from_name(name);
        self.handlers
            .get(&operation)
            .cloned()
            .ok_or_else(|| TaskFailure::unsupported(name))
    }

    pub fn operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.handlers.keys().cloned().collect();
        ops.sort_by(|a, b| a.name().cmp(b.name()));
        ops
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("operations", &self.operations())
            .finish()
    }
}
