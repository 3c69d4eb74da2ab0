use crate::pdf;
use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, ObjectId};
use pdfdock_jobs::{Job, Operation, Processor, TaskFailure};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct MergeOptions {}

/// Concatenate the pages of all inputs, in input order.
#[derive(Debug, Clone, Default)]
pub struct Merge;

#[async_trait]
impl Processor for Merge {
    const OPERATION: Operation = Operation::Merge;
    type Options = MergeOptions;

    async fn process(
        &self,
        job: &Job,
        _options: MergeOptions,
        inputs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, TaskFailure> {
        let inputs = inputs.to_vec();
        let out = pdf::output_path(job, "merged");
        let target = out.clone();
        pdf::blocking(move || {
            let mut merged = merge_documents(&inputs)?;
            pdf::save(&mut merged, &target)
        })
        .await?;
        Ok(vec![out])
    }
}

fn merge_documents(inputs: &[PathBuf]) -> Result<Document, TaskFailure> {
    let mut merged = Document::with_version("1.5");
    let mut page_ids: Vec<ObjectId> = Vec::new();
    let mut next_id = 1;

    for path in inputs {
        let mut doc = pdf::load(path)?;
        pdf::materialize_inherited(&mut doc);
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(TaskFailure::execution(format!(
                "{} has no pages",
                pdf::display_name(path)
            )));
        }
        page_ids.extend(pages);
        merged.objects.extend(doc.objects);
    }
    merged.max_id = next_id - 1;

    let pages_id = merged.new_object_id();
    for &page_id in &page_ids {
        let page = merged
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| TaskFailure::execution(format!("broken page object: {}", e)))?;
        page.set("Parent", pages_id);
    }
    let kids: Vec<Object> = page_ids.iter().map(|&id| Object::Reference(id)).collect();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    // Drops the source catalogs and page trees.
    merged.prune_objects();
    merged.renumber_objects();
    merged.compress();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testing::{markers, write_sample};

    #[test]
    fn test_pages_keep_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        write_sample(&a, 3, 10);
        write_sample(&b, 2, 20);

        let mut merged = merge_documents(&[a, b]).unwrap();
        let out = dir.path().join("out.pdf");
        merged.save(&out).unwrap();

        assert_eq!(markers(&out), vec![10, 11, 12, 20, 21]);
        let doc = Document::load(&out).unwrap();
        for id in doc.get_pages().into_values() {
            assert!(doc.get_dictionary(id).unwrap().has(b"MediaBox"));
        }
    }

    #[test]
    fn test_unreadable_input_is_execution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        write_sample(&a, 1, 0);
        std::fs::write(&b, b"definitely not a pdf").unwrap();

        let err = merge_documents(&[a, b]).unwrap_err();
        assert_eq!(err.kind, pdfdock_jobs::FailureKind::ExecutionFailure);
        assert!(err.message.contains("b.pdf"));
    }
}
