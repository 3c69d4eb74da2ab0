use crate::pdf;
use async_trait::async_trait;
use pdfdock_jobs::{Job, Operation, Processor, TaskFailure};
use serde::Deserialize;
use std::ops::RangeInclusive;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct SplitOptions {
    /// Page ranges such as `1-3,7,10-end`
    #[serde(default = "default_ranges")]
    pub ranges: String,
}

fn default_ranges() -> String {
    "1-end".to_string()
}

/// Write one document per requested page range.
#[derive(Debug, Clone, Default)]
pub struct Split;

#[async_trait]
impl Processor for Split {
    const OPERATION: Operation = Operation::Split;
    type Options = SplitOptions;

    async fn process(
        &self,
        job: &Job,
        options: SplitOptions,
        inputs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, TaskFailure> {
        let input = inputs[0].clone();
        let job = job.clone();
        pdf::blocking(move || {
            let doc = pdf::load(&input)?;
            let total = doc.get_pages().len() as u32;
            let ranges = parse_ranges(&options.ranges, total)?;

            let mut outputs = Vec::with_capacity(ranges.len());
            for (k, range) in ranges.into_iter().enumerate() {
                let mut part = doc.clone();
                let others: Vec<u32> = (1..=total).filter(|n| !range.contains(n)).collect();
                part.delete_pages(&others);
                part.prune_objects();
                part.renumber_objects();
                part.compress();

                let out = pdf::output_path(&job, &format!("part{}", k + 1));
                pdf::save(&mut part, &out)?;
                outputs.push(out);
            }
            Ok(outputs)
        })
        .await
    }
}

/// Parse a comma separated list of 1-based page ranges.
///
/// `N`, `A-B`, `A-end` and `-B` are accepted. Ranges are clamped to
/// `1..=total` and ranges that end up empty are skipped.
pub fn parse_ranges(expr: &str, total: u32) -> Result<Vec<RangeInclusive<u32>>, TaskFailure> {
    let mut ranges = Vec::new();
    for part in expr.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end): (u32, u32) = match part.split_once('-') {
            Some((a, b)) => (
                a.trim().parse().unwrap_or(1),
                b.trim().parse().unwrap_or(total),
            ),
            None => {
                let page: u32 = part
                    .parse()
                    .map_err(|_| TaskFailure::validation(format!("invalid page number `{}`", part)))?;
                (page, page)
            }
        };
        let start = start.max(1);
        let end = end.min(total);
        if start <= end {
            ranges.push(start..=end);
        }
    }
    if ranges.is_empty() {
        return Err(TaskFailure::validation(format!(
            "`{}` selects no pages of a {} page document",
            expr, total
        )));
    }
    Ok(ranges)
}
