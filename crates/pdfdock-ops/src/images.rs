use crate::{pdf, raster};
use async_trait::async_trait;
use lopdf::content::{Content, Operation as Op};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use pdfdock_jobs::{Job, Operation, Processor, TaskFailure};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct ImagesToPdfOptions {}

/// One page per image, in input order, each page the size of its image.
#[derive(Debug, Clone, Default)]
pub struct ImagesToPdf;

#[async_trait]
impl Processor for ImagesToPdf {
    const OPERATION: Operation = Operation::ImagesToPdf;
    type Options = ImagesToPdfOptions;

    async fn process(
        &self,
        job: &Job,
        _options: ImagesToPdfOptions,
        inputs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, TaskFailure> {
        if let Some(other) = inputs.iter().find(|p| !raster::is_image(p)) {
            return Err(TaskFailure::validation(format!(
                "{} is not an image",
                pdf::display_name(other)
            )));
        }

        let inputs = inputs.to_vec();
        let out = pdf::output_path(job, "images");
        let target = out.clone();
        pdf::blocking(move || {
            let mut doc = build_document(&inputs)?;
            pdf::save(&mut doc, &target)
        })
        .await?;
        Ok(vec![out])
    }
}

fn build_document(inputs: &[PathBuf]) -> Result<Document, TaskFailure> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(inputs.len());

    for path in inputs {
        let image = raster::embed(&mut doc, path)?;
        kids.push(add_page(&mut doc, pages_id, image)?.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    Ok(doc)
}

fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    image: raster::Raster,
) -> Result<ObjectId, TaskFailure> {
    let (width, height) = image.size();
    let content = Content {
        operations: vec![
            Op::new("q", vec![]),
            Op::new(
                "cm",
                vec![width.into(), 0.into(), 0.into(), height.into(), 0.into(), 0.into()],
            ),
            Op::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Op::new("Q", vec![]),
        ],
    };
    let content = content
        .encode()
        .map_err(|e| TaskFailure::execution(format!("cannot encode page content: {}", e)))?;
    let contents_id = doc.add_object(Stream::new(Dictionary::new(), content));
    let media_box: Vec<Object> = vec![0.into(), 0.into(), width.into(), height.into()];

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => media_box,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image.id },
        },
        "Contents" => contents_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::testing::write_png;

    #[test]
    fn test_one_page_per_image_sized_to_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_png(&a, 40, 20, false);
        write_png(&b, 8, 16, true);

        let mut doc = build_document(&[a, b]).unwrap();
        let out = dir.path().join("out.pdf");
        doc.save(&out).unwrap();

        let doc = Document::load(&out).unwrap();
        let boxes: Vec<Vec<f64>> = doc
            .get_pages()
            .into_values()
            .map(|id| {
                doc.get_dictionary(id)
                    .unwrap()
                    .get(b"MediaBox")
                    .unwrap()
                    .as_array()
                    .unwrap()
                    .iter()
                    .filter_map(pdf::number)
                    .collect()
            })
            .collect();
        assert_eq!(boxes, vec![vec![0.0, 0.0, 30.0, 15.0], vec![0.0, 0.0, 6.0, 12.0]]);
    }

    #[test]
    fn test_bad_image_fails_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.gif");
        write_png(&a, 4, 4, false);
        std::fs::write(&b, b"GIF89a?").unwrap();

        let err = build_document(&[a, b]).unwrap_err();
        assert_eq!(err.kind, pdfdock_jobs::FailureKind::ExecutionFailure);
        assert!(err.message.contains("b.gif"));
    }
}
