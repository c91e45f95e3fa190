/// Disk storage for uploaded message attachments
///
/// Files are written flat under the upload directory with a generated name
/// and served back at `/uploads/{name}`.
use crate::error::{ChatError, ChatResult};
use chrono::Utc;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::fs;

/// URL prefix uploaded files are served from
pub const UPLOADS_PREFIX: &str = "/uploads";

const MAX_EXTENSION_LEN: usize = 10;

/// Reference to a stored upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Generated file name on disk
    pub name: String,
    /// Public path recorded on messages
    pub file_ref: String,
}

/// Disk file store
#[derive(Clone)]
pub struct DiskFileStore {
    base_path: PathBuf,
    size_limit: usize,
}

impl DiskFileStore {
    pub fn new(base_path: PathBuf, size_limit: usize) -> Self {
        Self {
            base_path,
            size_limit,
        }
    }

    /// Create the upload directory if needed
    pub async fn ensure_dir(&self) -> ChatResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    /// Store an upload under a generated `{millis}-{random}{ext}` name
    pub async fn save(&self, original_name: Option<&str>, data: &[u8]) -> ChatResult<StoredFile> {
        if data.is_empty() {
            return Err(ChatError::Validation("Uploaded file is empty".to_string()));
        }
        if data.len() > self.size_limit {
            return Err(ChatError::Validation(format!(
                "File exceeds the {} byte upload limit",
                self.size_limit
            )));
        }

        let name = generate_name(original_name);
        self.ensure_dir().await?;
        fs::write(self.base_path.join(&name), data).await?;

        tracing::debug!(name = %name, size = data.len(), "stored upload");
        Ok(StoredFile {
            file_ref: format!("{}/{}", UPLOADS_PREFIX, name),
            name,
        })
    }

    /// Delete a stored upload by its generated name
    ///
    /// Returns false when the name is not a plain file name or nothing was
    /// stored under it.
    pub async fn remove(&self, name: &str) -> ChatResult<bool> {
        if name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Ok(false);
        }

        match fs::remove_file(self.base_path.join(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn generate_name(original_name: Option<&str>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!(
        "{}-{}{}",
        Utc::now().timestamp_millis(),
        suffix,
        sanitized_extension(original_name)
    )
}

/// Extension of the client-supplied name, reduced to `.[a-z0-9]+`
fn sanitized_extension(original_name: Option<&str>) -> String {
    let ext = original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ext.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .take(MAX_EXTENSION_LEN)
                .collect::<String>()
        })
        .unwrap_or_default();

    if ext.is_empty() {
        String::new()
    } else {
        format!(".{}", ext)
    }
}
