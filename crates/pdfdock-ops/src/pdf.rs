//! Shared lopdf plumbing for the page-level operations.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use pdfdock_jobs::{Job, TaskFailure};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Deepest page tree walked when resolving inherited attributes.
const MAX_TREE_DEPTH: usize = 64;

/// Run lopdf work off the async runtime.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, TaskFailure>
where
    F: FnOnce() -> Result<T, TaskFailure> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| TaskFailure::execution(format!("PDF task aborted: {}", e)))?
}

pub(crate) fn load(path: &Path) -> Result<Document, TaskFailure> {
    Document::load(path).map_err(|e| {
        TaskFailure::execution(format!("cannot read {} as PDF: {}", display_name(path), e))
    })
}

pub(crate) fn save(doc: &mut Document, path: &Path) -> Result<(), TaskFailure> {
    doc.save(path)
        .map(|_| ())
        .map_err(|e| TaskFailure::execution(format!("cannot write {}: {}", display_name(path), e)))
}

/// `<workspace>/<job id>_<suffix>.pdf`
pub(crate) fn output_path(job: &Job, suffix: &str) -> PathBuf {
    job.workspace_path.join(format!("{}_{}.pdf", job.id, suffix))
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Copy inherited attributes onto every page so pages can be moved to a new
/// page tree without losing their resources or geometry.
pub(crate) fn materialize_inherited(doc: &mut Document) {
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for page_id in pages {
        let Ok(page) = doc.get_dictionary(page_id) else {
            continue;
        };
        let mut missing: Vec<&[u8]> = INHERITABLE.iter().copied().filter(|k| !page.has(k)).collect();
        let mut found: Vec<(&[u8], Object)> = Vec::new();
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();

        let mut depth = 0;
        while let Some(node_id) = parent {
            if missing.is_empty() || depth >= MAX_TREE_DEPTH {
                break;
            }
            let Ok(node) = doc.get_dictionary(node_id) else {
                break;
            };
            missing.retain(|key| match node.get(key) {
                Ok(value) => {
                    found.push((*key, value.clone()));
                    false
                }
                Err(_) => true,
            });
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
            depth += 1;
        }

        if found.is_empty() {
            continue;
        }
        if let Ok(page) = doc.get_object_mut(page_id).and_then(Object::as_dict_mut) {
            for (key, value) in found {
                page.set(key.to_vec(), value);
            }
        }
    }
}

/// Accept a value given either natively or as a string, as form fields
/// and command line options arrive.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Value(T),
        Text(String),
    }

    match Raw::<T>::deserialize(deserializer)? {
        Raw::Value(v) => Ok(v),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("unexpected value {:?}", s))),
    }
}

/// Visible area of a page: its CropBox if it has one, else its MediaBox.
/// Pages without usable geometry are treated as US Letter.
pub(crate) fn page_box(doc: &Document, page_id: ObjectId) -> [f64; 4] {
    const LETTER: [f64; 4] = [0.0, 0.0, 612.0, 792.0];
    let Ok(page) = doc.get_dictionary(page_id) else {
        return LETTER;
    };
    [b"CropBox".as_slice(), b"MediaBox".as_slice()]
        .iter()
        .find_map(|key| {
            let array = match page.get(key).ok()? {
                Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?,
                other => other.as_array().ok()?,
            };
            let values: Vec<f64> = array.iter().filter_map(number).collect();
            let [x0, y0, x1, y1] = <[f64; 4]>::try_from(values).ok()?;
            let rect = [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)];
            (rect[2] > rect[0] && rect[3] > rect[1]).then_some(rect)
        })
        .unwrap_or(LETTER)
}

pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Resolve `value` to a dictionary we can modify without touching shared
/// objects.
fn owned_dictionary(doc: &Document, value: Option<&Object>) -> Dictionary {
    match value {
        Some(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_default(),
        Some(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    }
}

/// Register `value` as `/name` in the `category` subdictionary (Font,
/// XObject, ExtGState) of the page's resources. The page gets its own copy
/// of the resources so pages sharing them are not affected.
pub(crate) fn add_page_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &str,
    name: &str,
    value: Object,
) -> Result<(), TaskFailure> {
    let page = doc.get_dictionary(page_id).map_err(broken_page)?;
    let mut resources = owned_dictionary(doc, page.get(b"Resources").ok());
    let mut group = owned_dictionary(doc, resources.get(category.as_bytes()).ok());
    group.set(name, value);
    resources.set(category, group);
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(broken_page)?
        .set("Resources", resources);
    Ok(())
}

/// Paint `content` on top of the page. The existing content is wrapped in
/// `q`/`Q` so graphics state it leaves behind does not leak into ours.
pub(crate) fn overlay_content(
    doc: &mut Document,
    page_id: ObjectId,
    content: Vec<u8>,
) -> Result<(), TaskFailure> {
    let page = doc.get_dictionary(page_id).map_err(broken_page)?;
    let existing: Vec<Object> = match page.get(b"Contents") {
        Ok(Object::Array(parts)) => parts.clone(),
        Ok(part @ Object::Reference(_)) => vec![part.clone()],
        _ => Vec::new(),
    };

    let mut parts = Vec::with_capacity(existing.len() + 2);
    let overlay = if existing.is_empty() {
        content
    } else {
        parts.push(doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec())).into());
        parts.extend(existing);
        let mut closed = b"\nQ\n".to_vec();
        closed.extend(content);
        closed
    };
    parts.push(doc.add_object(Stream::new(Dictionary::new(), overlay)).into());

    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(broken_page)?
        .set("Contents", parts);
    Ok(())
}

fn broken_page(err: lopdf::Error) -> TaskFailure {
    TaskFailure::execution(format!("broken page object: {}", err))
}

/// Split inputs into PDFs and everything else, by extension.
pub(crate) fn partition_pdfs(inputs: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    inputs.iter().cloned().partition(|path| has_extension(path, &["pdf"]))
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod testing {
    use lopdf::{dictionary, Document, Object};
    use std::path::Path;

    /// Write a PDF with `pages` empty pages, each tagged with a `Marker`
    /// integer starting at `first_marker`. Page geometry is inherited from
    /// the page tree root.
    pub fn write_sample(path: &Path, pages: i64, first_marker: i64) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..pages)
            .map(|i| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Marker" => first_marker + i,
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
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

    /// `Marker` values of the document's pages, in page order.
    pub fn markers(path: &Path) -> Vec<i64> {
        let doc = Document::load(path).unwrap();
        doc.get_pages()
            .into_values()
            .map(|id| {
                doc.get_dictionary(id)
                    .unwrap()
                    .get(b"Marker")
                    .unwrap()
                    .as_i64()
                    .unwrap()
            })
            .collect()
    }

    /// Effective `Rotate` of each page, in page order.
    pub fn rotations(path: &Path) -> Vec<i64> {
        let doc = Document::load(path).unwrap();
        doc.get_pages()
            .into_values()
            .map(|id| {
                doc.get_dictionary(id)
                    .unwrap()
                    .get(b"Rotate")
                    .and_then(Object::as_i64)
                    .unwrap_or(0)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn test_materialize_copies_media_box_from_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.pdf");
        testing::write_sample(&path, 2, 0);

        let mut doc = Document::load(&path).unwrap();
        materialize_inherited(&mut doc);

        for id in doc.get_pages().into_values() {
            let page = doc.get_dictionary(id).unwrap();
            assert!(page.has(b"MediaBox"));
            assert!(!page.has(b"Resources"));
        }
    }

    #[test]
    fn test_lenient_values() {
        #[derive(Deserialize)]
        struct Opt {
            #[serde(deserialize_with = "lenient")]
            n: i64,
            #[serde(default, deserialize_with = "lenient")]
            flag: bool,
            #[serde(default, deserialize_with = "lenient")]
            size: f64,
        }
        let a: Opt = serde_json::from_str(r#"{"n": 180, "flag": true, "size": 48}"#).unwrap();
        let b: Opt = serde_json::from_str(r#"{"n": " -90 ", "flag": "true", "size": "12.5"}"#).unwrap();
        assert_eq!((a.n, a.flag, a.size), (180, true, 48.0));
        assert_eq!((b.n, b.flag, b.size), (-90, true, 12.5));
        assert!(serde_json::from_str::<Opt>(r#"{"n": "ninety"}"#).is_err());
        assert!(serde_json::from_str::<Opt>(r#"{"n": 1, "flag": "yes"}"#).is_err());
    }

    #[test]
    fn test_page_box_prefers_crop_box_and_normalizes() {
        let mut doc = Document::with_version("1.5");
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(600), Object::Integer(800)],
            "CropBox" => vec![Object::Real(500.0), Object::Integer(700), Object::Integer(100), Object::Real(50.5)],
        });
        assert_eq!(page_box(&doc, page), [100.0, 50.5, 500.0, 700.0]);

        let bare = doc.add_object(dictionary! { "Type" => "Page" });
        assert_eq!(page_box(&doc, bare), [0.0, 0.0, 612.0, 792.0]);
    }

    #[test]
    fn test_overlay_keeps_shared_resources_untouched() {
        let mut doc = Document::with_version("1.5");
        let shared = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => "Helvetica" },
        });
        let body = doc.add_object(Stream::new(Dictionary::new(), b"0 0 m".to_vec()));
        let first = doc.add_object(dictionary! {
            "Type" => "Page", "Resources" => shared, "Contents" => body,
        });
        let second = doc.add_object(dictionary! {
            "Type" => "Page", "Resources" => shared,
        });

        add_page_resource(&mut doc, first, "Font", "Wm", Object::Null).unwrap();
        overlay_content(&mut doc, first, b"1 0 0 1 0 0 cm".to_vec()).unwrap();

        let page = doc.get_dictionary(first).unwrap();
        let fonts = page.get(b"Resources").unwrap().as_dict().unwrap()
            .get(b"Font").unwrap().as_dict().unwrap();
        assert!(fonts.has(b"F1") && fonts.has(b"Wm"));
        assert_eq!(page.get(b"Contents").unwrap().as_array().unwrap().len(), 3);

        let untouched = doc.get_dictionary(shared).unwrap().get(b"Font").unwrap().as_dict().unwrap();
        assert!(!untouched.has(b"Wm"));
        assert_eq!(
            doc.get_dictionary(second).unwrap().get(b"Resources").unwrap(),
            &Object::Reference(shared)
        );
    }

    #[test]
    fn test_partition_pdfs_by_extension() {
        let inputs = vec![PathBuf::from("a.PDF"), PathBuf::from("logo.png"), PathBuf::from("b.pdf")];
        let (pdfs, others) = partition_pdfs(&inputs);
        assert_eq!(pdfs, vec![PathBuf::from("a.PDF"), PathBuf::from("b.pdf")]);
        assert_eq!(others, vec![PathBuf::from("logo.png")]);
    }
}
