use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::container::{encode_note, Attachment, FileKind};
use crate::engine::NoteEngine;
use crate::error::{SyncError, SyncResult};
use crate::metadata::{load_index, save_index, MetadataEntry};
use crate::reconcile::Note;
use crate::remote::{FileUpdate, RemoteFile, RemoteStore};
use crate::session::{authorize, Session};
use crate::text_codec::DEFAULT_ENCODING;

/// Title used when the caller leaves it blank.
pub const UNTITLED: &str = "note";

// ---- Requests and results ----

/// What the caller wants a note to contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Encoding name for the stored body; `utf8` when absent.
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl NoteDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    fn encoding(&self) -> &str {
        match self.encoding.as_deref() {
            Some(e) if !e.trim().is_empty() => e,
            _ => DEFAULT_ENCODING,
        }
    }

    fn color(&self) -> Option<String> {
        self.color
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }
}

/// Outcome of a create or update: the written file and the refreshed listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub file_id: String,
    pub file: RemoteFile,
    pub notes: Vec<Note>,
}

// ---- Naming ----

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9\-_. ]").expect("valid title regex"))
}

fn sequence_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}\s*-\s*").expect("valid prefix regex"))
}

fn note_extension() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.(txt|knote|zip)$").expect("valid extension regex"))
}

/// Replace every character outside `[A-Za-z0-9-_. ]` with `_`.
pub fn sanitize_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return UNTITLED.to_string();
    }
    unsafe_chars().replace_all(trimmed, "_").into_owned()
}

/// `NNNN - Title.ext`, or `Title.ext` for notes without a sequence.
pub fn note_file_name(seq: Option<u64>, title: &str, kind: FileKind) -> String {
    let safe = sanitize_title(title);
    match seq {
        Some(seq) => format!("{:04} - {}.{}", seq, safe, kind.extension()),
        None => format!("{}.{}", safe, kind.extension()),
    }
}

/// Title shown to users: file name without extension or sequence prefix.
pub fn display_title(file_name: &str) -> String {
    let base = file_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name);
    let without_ext = note_extension().replace(base, "");
    sequence_prefix().replace(&without_ext, "").into_owned()
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn require_id(file_id: &str) -> SyncResult<()> {
    if file_id.trim().is_empty() {
        return Err(SyncError::MissingIdentifier("fileId required".to_string()));
    }
    Ok(())
}

// ---- Orchestration ----

impl<S: RemoteStore> NoteEngine<S> {
    /// Write a new note, index it under the next sequence number and return
    /// the refreshed listing.
    pub async fn create_note(&self, session: &dyn Session, draft: &NoteDraft) -> SyncResult<Mutation> {
        let (kind, bytes) = encode_note(&draft.content, &draft.attachments, draft.encoding())?;
        authorize(session).await?;

        let folder = self.notes_area(session).await?;
        let mut loaded = load_index(&self.store, session, &folder.id).await?;

        let seq = loaded.index.next_sequence();
        let file_name = note_file_name(Some(seq), &draft.title, kind);
        let created = self
            .store
            .create_file(session, &folder.id, &file_name, kind.mime_type(), bytes)
            .await?;

        loaded.index.push_sequenced(MetadataEntry {
            seq: Some(seq),
            file_id: created.id.clone(),
            name: created.name.clone(),
            color: Some(draft.color().unwrap_or_else(|| self.config.default_color.clone())),
            created_at: Some(now_iso()),
        });
        save_index(&self.store, session, &loaded, self.config.write_strategy).await?;
        info!(file_id = %created.id, seq, file_name = %created.name, "note created");

        let notes = self.list_notes(session).await?;
        Ok(Mutation {
            file_id: created.id.clone(),
            file: created,
            notes,
        })
    }

    /// Rewrite an existing note. The stored representation follows the
    /// attachments, so a note may switch between plain text and container.
    pub async fn update_note(
        &self,
        session: &dyn Session,
        file_id: &str,
        draft: &NoteDraft,
    ) -> SyncResult<Mutation> {
        require_id(file_id)?;
        let (kind, bytes) = encode_note(&draft.content, &draft.attachments, draft.encoding())?;
        authorize(session).await?;

        let folder = self.notes_area(session).await?;
        let mut loaded = load_index(&self.store, session, &folder.id).await?;

        let seq = loaded.index.entry(file_id).and_then(|e| e.seq);
        let file_name = note_file_name(seq, &draft.title, kind);
        let updated = self
            .store
            .update_file(
                session,
                file_id,
                FileUpdate::content(kind.mime_type(), bytes).with_name(file_name),
            )
            .await?;

        match loaded.index.entry_mut(file_id) {
            Some(entry) => {
                entry.name = updated.name.clone();
                if let Some(color) = draft.color() {
                    entry.color = Some(color);
                }
            }
            None => {
                info!(file_id, "indexing legacy note");
                loaded.index.items.push(MetadataEntry {
                    seq: None,
                    file_id: file_id.to_string(),
                    name: updated.name.clone(),
                    color: Some(draft.color().unwrap_or_else(|| self.config.default_color.clone())),
                    created_at: Some(now_iso()),
                });
            }
        }
        save_index(&self.store, session, &loaded, self.config.write_strategy).await?;
        info!(file_id, file_name = %updated.name, "note updated");

        let notes = self.list_notes(session).await?;
        Ok(Mutation {
            file_id: file_id.to_string(),
            file: updated,
            notes,
        })
    }

    /// Permanently delete a note and drop its index entries.
    pub async fn delete_note(&self, session: &dyn Session, file_id: &str) -> SyncResult<Vec<Note>> {
        require_id(file_id)?;
        authorize(session).await?;

        match self.store.delete_file(session, file_id).await {
            Ok(()) => {}
            Err(SyncError::NotFound(reason)) => {
                warn!(file_id, reason = %reason, "note file already gone, pruning its index entry");
            }
            Err(err) => return Err(err),
        }

        let folder = self.notes_area(session).await?;
        let mut loaded = load_index(&self.store, session, &folder.id).await?;
        let removed = loaded.index.remove(file_id);
        save_index(&self.store, session, &loaded, self.config.write_strategy).await?;
        info!(file_id, removed, "note deleted");

        self.list_notes(session).await
    }
}
