use lopdf::{dictionary, Document, Object};
use pdfdock_jobs::{
    DispatchOutcome, Dispatcher, FailureKind, JobOptions, JobStatus, JobStore, TaskFailure,
    WorkItem,
};
use pdfdock_ops::Toolbox;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Write a PDF whose pages carry a `Marker` integer so their order can be checked.
fn write_pdf(path: &Path, markers: &[i64]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = markers
        .iter()
        .map(|&marker| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Marker" => marker,
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => markers.len() as i64,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

fn page_values(path: &Path, key: &[u8]) -> Vec<i64> {
    let doc = Document::load(path).unwrap();
    doc.get_pages()
        .into_values()
        .map(|id| {
            doc.get_dictionary(id)
                .unwrap()
                .get(key)
                .and_then(Object::as_i64)
                .unwrap_or(0)
        })
        .collect()
}

struct Fixture {
    _dir: tempfile::TempDir,
    _tools_dir: tempfile::TempDir,
    tools_path: PathBuf,
    store: JobStore,
    dispatcher: Dispatcher,
}

/// A store plus the full registry, with an empty tool search path.
async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let tools_dir = tempfile::tempdir().unwrap();
    let tools_path = tools_dir.path().to_path_buf();
    let store = JobStore::open(dir.path().join("jobs")).await.unwrap();
    let registry = pdfdock_ops::registry(Toolbox::with_search_path(
        &tools_path,
        Duration::from_secs(10),
    ));
    let dispatcher = Dispatcher::new(store.clone(), registry);
    Fixture {
        _dir: dir,
        _tools_dir: tools_dir,
        tools_path,
        store,
        dispatcher,
    }
}

fn options(value: serde_json::Value) -> JobOptions {
    value.as_object().cloned().unwrap_or_default()
}

impl Fixture {
    /// Create a job whose uploads are PDFs with the given page markers.
    async fn job_with_pdfs(
        &self,
        operation: &str,
        options: JobOptions,
        inputs: &[&[i64]],
    ) -> WorkItem {
        let job = self.store.create(operation, options).await.unwrap();
        let uploads = job.workspace_path.join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let paths = inputs
            .iter()
            .enumerate()
            .map(|(i, markers)| {
                let path = uploads.join(format!("in{}.pdf", i));
                write_pdf(&path, markers);
                path
            })
            .collect();
        WorkItem::new(job, paths)
    }

    async fn run(&self, item: WorkItem) -> (DispatchOutcome, Vec<PathBuf>) {
        let workspace = item.job.workspace_path.clone();
        let outcome = self.dispatcher.dispatch(item).await.unwrap();
        let outputs = match &outcome {
            DispatchOutcome::Done(manifest) => {
                manifest.iter().map(|e| workspace.join(&e.filename)).collect()
            }
            _ => Vec::new(),
        };
        (outcome, outputs)
    }
}

fn failure(outcome: DispatchOutcome) -> TaskFailure {
    match outcome {
        DispatchOutcome::Failed(failure) => failure,
        other => panic!("expected a failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_merge_concatenates_in_input_order() {
    let f = fixture().await;
    let item = f
        .job_with_pdfs("merge", JobOptions::new(), &[&[1, 2, 3], &[4, 5]])
        .await;
    let id = item.job.id.clone();

    let (_, outputs) = f.run(item).await;

    assert_eq!(outputs.len(), 1);
    assert_eq!(
        outputs[0].file_name().unwrap().to_str().unwrap(),
        format!("{}_merged.pdf", id)
    );
    assert_eq!(page_values(&outputs[0], b"Marker"), vec![1, 2, 3, 4, 5]);
    assert_eq!(f.store.load(&id).await.unwrap().status, JobStatus::Done);
}

#[tokio::test]
async fn test_merge_needs_two_files() {
    let f = fixture().await;
    let item = f.job_with_pdfs("merge", JobOptions::new(), &[&[1]]).await;

    let (outcome, _) = f.run(item).await;
    assert_eq!(failure(outcome).kind, FailureKind::Validation);
}

#[tokio::test]
async fn test_split_writes_one_part_per_range() {
    let f = fixture().await;
    let item = f
        .job_with_pdfs("split", options(json!({"ranges": "1-2,4"})), &[&[1, 2, 3, 4, 5]])
        .await;
    let id = item.job.id.clone();

    let (_, outputs) = f.run(item).await;

    let names: Vec<String> = outputs
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![format!("{}_part1.pdf", id), format!("{}_part2.pdf", id)]);
    assert_eq!(page_values(&outputs[0], b"Marker"), vec![1, 2]);
    assert_eq!(page_values(&outputs[1], b"Marker"), vec![4]);
}

#[tokio::test]
async fn test_split_defaults_to_whole_document() {
    let f = fixture().await;
    let item = f.job_with_pdfs("split", JobOptions::new(), &[&[7, 8]]).await;

    let (_, outputs) = f.run(item).await;
    assert_eq!(outputs.len(), 1);
    assert_eq!(page_values(&outputs[0], b"Marker"), vec![7, 8]);
}

#[tokio::test]
async fn test_split_out_of_range_is_validation_error() {
    let f = fixture().await;
    let item = f
        .job_with_pdfs("split", options(json!({"ranges": "9-12"})), &[&[1, 2]])
        .await;
    let id = item.job.id.clone();

    let (outcome, _) = f.run(item).await;
    assert_eq!(failure(outcome).kind, FailureKind::Validation);
    let job = f.store.load(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.result_manifest.is_none());
}

#[tokio::test]
async fn test_rotate_selected_pages() {
    let f = fixture().await;
    let item = f
        .job_with_pdfs(
            "rotate",
            options(json!({"degrees": "90", "scope": "2,3"})),
            &[&[1, 2, 3]],
        )
        .await;

    let (_, outputs) = f.run(item).await;
    assert_eq!(page_values(&outputs[0], b"Rotate"), vec![0, 90, 90]);
    assert_eq!(page_values(&outputs[0], b"Marker"), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_rotate_rejects_odd_angles() {
    let f = fixture().await;
    let item = f
        .job_with_pdfs("rotate", options(json!({"degrees": 45})), &[&[1]])
        .await;

    let (outcome, _) = f.run(item).await;
    assert_eq!(failure(outcome).kind, FailureKind::Validation);
}

#[tokio::test]
async fn test_compress_falls_back_to_rewrite() {
    let f = fixture().await;
    let item = f
        .job_with_pdfs("compress", options(json!({"quality": "low"})), &[&[1, 2]])
        .await;
    let id = item.job.id.clone();

    let (_, outputs) = f.run(item).await;
    assert_eq!(
        outputs[0].file_name().unwrap().to_str().unwrap(),
        format!("{}_compressed.pdf", id)
    );
    assert_eq!(page_values(&outputs[0], b"Marker"), vec![1, 2]);
}

#[tokio::test]
async fn test_office_conversion_without_libreoffice() {
    let f = fixture().await;
    let job = f.store.create("word-to-pdf", JobOptions::new()).await.unwrap();
    let input = job.workspace_path.join("uploads").join("letter.docx");
    std::fs::create_dir_all(input.parent().unwrap()).unwrap();
    std::fs::write(&input, b"PK fake docx").unwrap();

    let (outcome, _) = f.run(WorkItem::new(job, vec![input])).await;
    let failure = failure(outcome);
    assert_eq!(failure.kind, FailureKind::DependencyUnavailable);
    assert!(failure.message.contains("soffice"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_office_conversion_with_fake_libreoffice() {
    use std::os::unix::fs::PermissionsExt;

    let f = fixture().await;
    // Mimics `soffice --headless --nologo --convert-to pdf --outdir DIR INPUT`
    let script = f.tools_path.join("soffice");
    std::fs::write(
        &script,
        "#!/bin/sh\nbase=$(basename \"$7\")\nprintf '%%PDF-1.4 fake' > \"$6/${base%.*}.pdf\"\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let job = f.store.create("pptx-to-pdf", JobOptions::new()).await.unwrap();
    let id = job.id.clone();
    let input = job.workspace_path.join("uploads").join("deck.pptx");
    std::fs::create_dir_all(input.parent().unwrap()).unwrap();
    std::fs::write(&input, b"PK fake pptx").unwrap();

    let (outcome, outputs) = f.run(WorkItem::new(job, vec![input])).await;
    assert!(matches!(outcome, DispatchOutcome::Done(_)), "{:?}", outcome);
    assert_eq!(
        outputs[0].file_name().unwrap().to_str().unwrap(),
        format!("{}.pdf", id)
    );
    assert_eq!(std::fs::read(&outputs[0]).unwrap(), b"%PDF-1.4 fake");
}

#[tokio::test]
async fn test_operations_outside_the_registry_are_unsupported() {
    let f = fixture().await;
    let item = f.job_with_pdfs("html-to-pdf", JobOptions::new(), &[&[1]]).await;

    let (outcome, _) = f.run(item).await;
    assert_eq!(failure(outcome).kind, FailureKind::UnsupportedOperation);
}

/// Concatenated, decompressed content streams of every page.
fn page_contents(path: &Path) -> Vec<Vec<u8>> {
    let doc = Document::load(path).unwrap();
    doc.get_pages()
        .into_values()
        .map(|page_id| doc.get_page_content(page_id).unwrap())
        .collect()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[tokio::test]
async fn test_text_watermark_on_every_page() {
    let f = fixture().await;
    let opts = options(json!({"text": "DRAFT", "style": "tile", "size": "24"}));
    let item = f.job_with_pdfs("watermark", opts, &[&[1, 2]]).await;
    let id = item.job.id.clone();

    let (outcome, outputs) = f.run(item).await;
    assert!(matches!(outcome, DispatchOutcome::Done(_)), "{:?}", outcome);
    assert_eq!(
        outputs[0].file_name().unwrap().to_str().unwrap(),
        format!("{}_watermark.pdf", id)
    );
    assert_eq!(page_values(&outputs[0], b"Marker"), vec![1, 2]);
    for content in page_contents(&outputs[0]) {
        assert!(contains(&content, b"(DRAFT) Tj"));
    }
}

#[tokio::test]
async fn test_image_watermark_uses_uploaded_image() {
    let f = fixture().await;
    let item = f.job_with_pdfs("watermark", JobOptions::new(), &[&[7]]).await;
    let logo = item.job.workspace_path.join("uploads").join("logo.png");
    image::RgbaImage::from_pixel(6, 6, image::Rgba([0, 0, 255, 200]))
        .save(&logo)
        .unwrap();
    let mut inputs = item.input_paths.clone();
    inputs.push(logo);

    let (outcome, outputs) = f.run(WorkItem::new(item.job, inputs)).await;
    assert!(matches!(outcome, DispatchOutcome::Done(_)), "{:?}", outcome);
    let content = &page_contents(&outputs[0])[0];
    assert!(contains(content, b"/PdfdockWmImage Do"));
    assert!(contains(content, b"/PdfdockWmState gs"));
}

#[tokio::test]
async fn test_watermark_needs_a_pdf() {
    let f = fixture().await;
    let job = f.store.create("watermark", JobOptions::new()).await.unwrap();
    let uploads = job.workspace_path.join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    let logo = uploads.join("logo.png");
    image::RgbImage::new(2, 2).save(&logo).unwrap();

    let (outcome, _) = f.run(WorkItem::new(job, vec![logo])).await;
    assert_eq!(failure(outcome).kind, FailureKind::Validation);
}

#[tokio::test]
async fn test_images_to_pdf_one_page_per_image() {
    let f = fixture().await;
    let job = f.store.create("images-to-pdf", JobOptions::new()).await.unwrap();
    let id = job.id.clone();
    let uploads = job.workspace_path.join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    let first = uploads.join("first.png");
    let second = uploads.join("second.jpg");
    let third = uploads.join("third.bmp");
    image::RgbaImage::from_pixel(40, 20, image::Rgba([1, 2, 3, 0])).save(&first).unwrap();
    image::RgbImage::from_pixel(16, 16, image::Rgb([9, 9, 9])).save(&second).unwrap();
    image::RgbImage::from_pixel(4, 8, image::Rgb([200, 0, 0])).save(&third).unwrap();

    let (outcome, outputs) = f.run(WorkItem::new(job, vec![first, second, third])).await;
    assert!(matches!(outcome, DispatchOutcome::Done(_)), "{:?}", outcome);
    assert_eq!(
        outputs[0].file_name().unwrap().to_str().unwrap(),
        format!("{}_images.pdf", id)
    );
    let doc = Document::load(&outputs[0]).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
}

#[tokio::test]
async fn test_images_to_pdf_rejects_documents() {
    let f = fixture().await;
    let item = f.job_with_pdfs("images-to-pdf", JobOptions::new(), &[&[1]]).await;

    let (outcome, _) = f.run(item).await;
    let failure = failure(outcome);
    assert_eq!(failure.kind, FailureKind::Validation);
    assert!(failure.message.contains("in0.pdf"));
}

#[tokio::test]
async fn test_protect_without_qpdf() {
    let f = fixture().await;
    let item = f
        .job_with_pdfs("protect", options(json!({"password": "s3cret"})), &[&[1]])
        .await;

    let (outcome, _) = f.run(item).await;
    assert_eq!(failure(outcome).kind, FailureKind::DependencyUnavailable);
}

#[tokio::test]
async fn test_protect_requires_a_password() {
    let f = fixture().await;
    let item = f.job_with_pdfs("protect", JobOptions::new(), &[&[1]]).await;

    let (outcome, _) = f.run(item).await;
    assert_eq!(failure(outcome).kind, FailureKind::Validation);
}

#[cfg(unix)]
#[tokio::test]
async fn test_protect_with_fake_qpdf() {
    use std::os::unix::fs::PermissionsExt;

    let f = fixture().await;
    // Reads its arguments from the @file, checks them and writes the last one.
    let script = f.tools_path.join("qpdf");
    std::fs::write(
        &script,
        "#!/bin/sh\nargs=\"${1#@}\"\nhead -n 4 \"$args\" | tr '\\n' ' ' | grep -q -- '--encrypt s3cret boss 256' || exit 3\nprintf '%%PDF-1.7 encrypted' > \"$(tail -n 1 \"$args\")\"\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let opts = options(json!({"password": "s3cret", "owner_password": "boss"}));
    let item = f.job_with_pdfs("protect", opts, &[&[1]]).await;
    let workspace = item.job.workspace_path.clone();
    let id = item.job.id.clone();

    let (outcome, outputs) = f.run(item).await;
    assert!(matches!(outcome, DispatchOutcome::Done(_)), "{:?}", outcome);
    assert_eq!(
        outputs[0].file_name().unwrap().to_str().unwrap(),
        format!("{}_protected.pdf", id)
    );
    assert_eq!(std::fs::read(&outputs[0]).unwrap(), b"%PDF-1.7 encrypted");
    // The argument file with the passwords is gone.
    let leftovers: Vec<_> = std::fs::read_dir(&workspace)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".args"))
        .collect();
    assert!(leftovers.is_empty());
}
