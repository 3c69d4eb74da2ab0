use crate::pdf;
use async_trait::async_trait;
use lopdf::{Object, ObjectId};
use pdfdock_jobs::{Job, Operation, Processor, TaskFailure};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct RotateOptions {
    /// Clockwise rotation, a multiple of 90
    #[serde(default = "default_degrees", deserialize_with = "pdf::lenient")]
    pub degrees: i64,

    /// `all` or a comma separated list of page numbers
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_degrees() -> i64 {
    90
}

fn default_scope() -> String {
    "all".to_string()
}

/// Which pages a rotation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Pages(BTreeSet<u32>),
}

impl Scope {
    /// Tokens that are not page numbers are ignored.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            return Self::All;
        }
        Self::Pages(
            raw.split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect(),
        )
    }

    pub fn contains(&self, page: u32) -> bool {
        match self {
            Self::All => true,
            Self::Pages(pages) => pages.contains(&page),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Rotate;

#[async_trait]
impl Processor for Rotate {
    const OPERATION: Operation = Operation::Rotate;
    type Options = RotateOptions;

    async fn process(
        &self,
        job: &Job,
        options: RotateOptions,
        inputs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, TaskFailure> {
        if options.degrees % 90 != 0 {
            return Err(TaskFailure::validation(format!(
                "rotation must be a multiple of 90 degrees, got {}",
                options.degrees
            )));
        }
        let quarter_turns = options.degrees.rem_euclid(360);
        let scope = Scope::parse(&options.scope);
        let input = inputs[0].clone();
        let out = pdf::output_path(job, "rotated");
        let target = out.clone();

        pdf::blocking(move || {
            let mut doc = pdf::load(&input)?;
            pdf::materialize_inherited(&mut doc);
            let pages: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();
            for (number, page_id) in pages {
                if !scope.contains(number) {
                    continue;
                }
                let page = doc
                    .get_object_mut(page_id)
                    .and_then(Object::as_dict_mut)
                    .map_err(|e| TaskFailure::execution(format!("broken page {}: {}", number, e)))?;
                let current = page.get(b"Rotate").and_then(Object::as_i64).unwrap_or(0);
                page.set("Rotate", (current.rem_euclid(360) + quarter_turns).rem_euclid(360));
            }
            pdf::save(&mut doc, &target)
        })
        .await?;
        Ok(vec![out])
    }
}
