use serde::Serialize;
use std::path::Path;
use tokio::fs;

use crate::container::{classify, encode_note, pack, unpack, Attachment, FileKind};
use crate::error::{SyncError, SyncResult};
use crate::notes::NoteDraft;
use crate::text_codec::{self, DEFAULT_ENCODING};

/// A note read from a local `.txt`, `.knote` or `.zip` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalNote {
    pub kind: FileKind,
    pub path: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl LocalNote {
    /// Draft for importing into the notes area, titled after the file stem.
    pub fn into_draft(self) -> NoteDraft {
        let title = Path::new(&self.path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        NoteDraft::new(title, self.text).with_attachments(self.attachments)
    }
}

pub async fn open_local(path: &Path) -> SyncResult<LocalNote> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| SyncError::Io(format!("failed to read '{}': {}", path.display(), e)))?;
    let kind = classify(&path.to_string_lossy(), None);
    let (text, attachments) = match kind {
        FileKind::Container => {
            let unpacked = unpack(&bytes)?;
            (unpacked.text, unpacked.attachments)
        }
        FileKind::PlainText => (text_codec::decode(&bytes), Vec::new()),
    };
    Ok(LocalNote {
        kind,
        path: path.to_string_lossy().into_owned(),
        text,
        attachments,
    })
}

/// Save a draft locally: `.txt` paths get encoded text (attachments are
/// dropped), any other path gets a container.
pub async fn save_local(path: &Path, draft: &NoteDraft) -> SyncResult<FileKind> {
    let encoding = draft.encoding.as_deref().unwrap_or(DEFAULT_ENCODING);
    let is_text = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("txt"));

    let (kind, bytes) = if is_text {
        encode_note(&draft.content, &[], encoding)?
    } else {
        (
            FileKind::Container,
            pack(&draft.content, &draft.attachments, encoding)?,
        )
    };

    fs::write(path, bytes)
        .await
        .map_err(|e| SyncError::Io(format!("failed to write '{}': {}", path.display(), e)))?;
    Ok(kind)
}
