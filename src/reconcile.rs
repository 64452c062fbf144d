use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::container::{classify, decode_note, Attachment};
use crate::engine::NoteEngine;
use crate::error::{SyncError, SyncResult};
use crate::metadata::{load_index, MetadataIndex, INDEX_FILE_NAME};
use crate::notes::display_title;
use crate::remote::{FileQuery, RemoteFile, RemoteStore};
use crate::session::{authorize, Session};

/// A note as presented to callers: remote file + index entry + decoded body.
/// `color`, `seq` and `created_at` are `None` for files the index does not know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    /// Display title derived from the file name.
    pub name: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub modified_time: Option<String>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub color: Option<String>,
    pub seq: Option<u64>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "error", rename_all = "kebab-case")]
pub enum SkipReason {
    /// Bytes could not be downloaded.
    Fetch(String),
    /// The archive could not be read.
    CorruptedContainer(String),
}

/// A remote file left out of a listing, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skipped {
    pub file_id: String,
    pub file_name: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteOutcome {
    Ok(Note),
    Skipped(Skipped),
}

/// Result of one reconciliation pass. Order is not meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub notes: Vec<Note>,
    pub skipped: Vec<Skipped>,
    /// Set when the index had to be reset during this pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_repaired: Option<String>,
}

impl Reconciliation {
    pub fn note(&self, file_id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == file_id)
    }
}

/// Merge one downloaded file with its index entry.
pub fn assemble_note(
    file: &RemoteFile,
    bytes: &[u8],
    index: &MetadataIndex,
) -> Result<Note, SkipReason> {
    let kind = classify(&file.name, file.mime_type.as_deref());
    let decoded = decode_note(kind, bytes).map_err(|err| match err {
        SyncError::CorruptedContainer(e) => SkipReason::CorruptedContainer(e),
        other => SkipReason::CorruptedContainer(other.to_string()),
    })?;

    let entry = index.entry(&file.id);
    Ok(Note {
        id: file.id.clone(),
        name: display_title(&file.name),
        file_name: file.name.clone(),
        mime_type: file.mime_type.clone(),
        modified_time: file.modified_time.clone(),
        content: decoded.text,
        attachments: decoded.attachments,
        color: entry.and_then(|e| e.color.clone()),
        seq: entry.and_then(|e| e.seq),
        created_at: entry.and_then(|e| e.created_at.clone()),
    })
}

impl<S: RemoteStore> NoteEngine<S> {
    /// List and decode every note in the notes area.
    ///
    /// Per-file failures never fail the pass; they are reported in
    /// [`Reconciliation::skipped`].
    pub async fn fetch_all(&self, session: &dyn Session) -> SyncResult<Reconciliation> {
        authorize(session).await?;
        let folder = self.notes_area(session).await?;
        let loaded = load_index(&self.store, session, &folder.id).await?;
        let files = self
            .store
            .list_files(session, &folder.id, &FileQuery::excluding(INDEX_FILE_NAME))
            .await?;

        let index = &loaded.index;
        let outcomes: Vec<NoteOutcome> = stream::iter(files)
            .map(|file| self.fetch_one(session, file, index))
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut result = Reconciliation {
            index_repaired: loaded.repaired.clone(),
            ..Reconciliation::default()
        };
        for outcome in outcomes {
            match outcome {
                NoteOutcome::Ok(note) => result.notes.push(note),
                NoteOutcome::Skipped(skipped) => result.skipped.push(skipped),
            }
        }
        debug!(
            notes = result.notes.len(),
            skipped = result.skipped.len(),
            "reconciliation finished"
        );
        Ok(result)
    }

    /// The notes only, as the request surface returns them.
    pub async fn list_notes(&self, session: &dyn Session) -> SyncResult<Vec<Note>> {
        Ok(self.fetch_all(session).await?.notes)
    }

    async fn fetch_one(
        &self,
        session: &dyn Session,
        file: RemoteFile,
        index: &MetadataIndex,
    ) -> NoteOutcome {
        let skipped = |reason: SkipReason| {
            warn!(file_id = %file.id, file_name = %file.name, reason = ?reason, "skipping note");
            NoteOutcome::Skipped(Skipped {
                file_id: file.id.clone(),
                file_name: file.name.clone(),
                reason,
            })
        };

        let bytes = match self.store.get_file_content(session, &file.id).await {
            Ok(bytes) => bytes,
            Err(err) => return skipped(SkipReason::Fetch(err.to_string())),
        };

        match assemble_note(&file, &bytes, index) {
            Ok(note) => NoteOutcome::Ok(note),
            Err(reason) => skipped(reason),
        }
    }
}
