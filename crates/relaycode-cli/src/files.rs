use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use relaycode_transfer::PendingUpload;

/// Builds the upload descriptors C3 needs from a list of local paths.
pub async fn build_uploads(paths: &[PathBuf]) -> Result<Vec<PendingUpload>> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("{} is not a regular file", path.display());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        uploads.push(PendingUpload {
            path: path.clone(),
            name: name.clone(),
            size: metadata.len(),
            mime_type: guess_mime_type(&name).to_string(),
        });
    }
    Ok(uploads)
}

/// A small fixed table rather than a MIME-sniffing crate; good enough for a
/// reference client where the receiver trusts the declared name anyway.
fn guess_mime_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "txt" => "text/plain",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}
