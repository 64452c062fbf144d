use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::container::{flatten_name, Attachment};
use crate::error::{SyncError, SyncResult};

/// Provides attachment payloads for a local selection. The engine treats the
/// returned bytes as opaque.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    async fn load(&self, selection: &[PathBuf]) -> SyncResult<Vec<Attachment>>;
}

/// Reads attachments straight from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsAttachmentSource;

#[async_trait]
impl AttachmentSource for FsAttachmentSource {
    async fn load(&self, selection: &[PathBuf]) -> SyncResult<Vec<Attachment>> {
        let mut attachments = Vec::with_capacity(selection.len());
        for path in selection {
            attachments.push(read_attachment(path).await?);
        }
        Ok(attachments)
    }
}

async fn read_attachment(path: &Path) -> SyncResult<Attachment> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| SyncError::Io(format!("failed to read '{}': {}", path.display(), e)))?;
    Ok(Attachment::new(flatten_name(&path.to_string_lossy()), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_source_reads_selection() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.png");
        let doc = dir.path().join("doc.pdf");
        std::fs::write(&photo, [0x89, 0x50]).unwrap();
        std::fs::write(&doc, b"%PDF").unwrap();

        let loaded = FsAttachmentSource.load(&[photo, doc]).await.unwrap();
        assert_eq!(
            loaded,
            vec![
                Attachment::new("photo.png", vec![0x89, 0x50]),
                Attachment::new("doc.pdf", b"%PDF".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_fs_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsAttachmentSource
            .load(&[dir.path().join("nope.bin")])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }
}
