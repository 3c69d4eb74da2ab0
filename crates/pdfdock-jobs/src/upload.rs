use crate::error::{JobError, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Extensions accepted for uploaded inputs.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "gif", "tiff", "bmp", "doc", "docx", "ppt", "pptx",
];

/// One submitted input file: the client's file name plus its content.
pub struct Upload {
    filename: String,
    body: Box<dyn AsyncRead + Send + Unpin>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, body: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            filename: filename.into(),
            body: Box::new(body),
        }
    }

    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(filename, std::io::Cursor::new(bytes.into()))
    }

    /// Stream an existing file, keeping its name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| JobError::Validation(format!("invalid file name: {}", path.display())))?
            .to_string();
        let file = fs::File::open(path).await?;
        Ok(Self::new(filename, file))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Reduce a client-supplied name to a safe single path component.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let kept: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();
    let cleaned = kept.trim().replace(' ', "_");
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn allowed_file(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Pick the stored name of every upload, rejecting unsupported types.
///
/// Names are unique within the batch; clashes get a numeric prefix.
pub(crate) fn plan_names(uploads: &[Upload]) -> Result<Vec<String>> {
    let mut taken = HashSet::new();
    let mut names = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let clean = secure_filename(&upload.filename);
        if !allowed_file(&clean) {
            return Err(JobError::Validation(format!(
                "Unsupported file type: {}",
                upload.filename
            )));
        }
        let mut name = clean.clone();
        let mut n = 1;
        while !taken.insert(name.clone()) {
            name = format!("{}_{}", n, clean);
            n += 1;
        }
        names.push(name);
    }
    Ok(names)
}

/// Write uploads into `dir` under the planned names, in order.
pub(crate) async fn write_all(
    dir: &Path,
    uploads: Vec<Upload>,
    names: Vec<String>,
    max_bytes: u64,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).await?;
    let mut paths = Vec::with_capacity(names.len());
    for (upload, name) in uploads.into_iter().zip(names) {
        let path = dir.join(&name);
        let mut file = fs::File::create(&path).await?;
        let mut limited = upload.body.take(max_bytes.saturating_add(1));
        let written = tokio::io::copy(&mut limited, &mut file).await?;
        if written > max_bytes {
            return Err(JobError::Validation(format!(
                "{} exceeds the upload limit of {} bytes",
                upload.filename, max_bytes
            )));
        }
        file.flush().await?;
        paths.push(path);
    }
    Ok(paths)
}
