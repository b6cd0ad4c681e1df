//! Loads plain-text and Markdown files from a directory.

use std::path::Path;

use super::types::SourceDocument;
use crate::core::errors::RagError;

const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md"];

/// Read every supported file directly inside `dir`, sorted by file name.
/// The file name becomes the document's source uri. Files that are not
/// valid UTF-8 are skipped with a warning.
pub async fn load_directory(dir: &Path) -> Result<Vec<SourceDocument>, RagError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        RagError::config(format!("Cannot read source directory {}: {}", dir.display(), e))
    })?;

    let mut files = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to list {}: {}", dir.display(), e);
                break;
            }
        };
        let path = entry.path();
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if supported && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => documents.push(SourceDocument::new(name, text)),
            Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
        }
    }

    tracing::info!(count = documents.len(), dir = %dir.display(), "Loaded source documents");
    Ok(documents)
}
