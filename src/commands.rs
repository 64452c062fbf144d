//! Request surface used by front ends. Every handler resolves to a
//! `{success: true, ...}` payload or `{success: false, error}`; none panic or
//! leak a raw error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::attachments::{AttachmentSource, FsAttachmentSource};
use crate::container::{Attachment, FileKind};
use crate::engine::{AreaInfo, NoteEngine};
use crate::error::{SyncError, SyncResult};
use crate::local::{self, LocalNote};
use crate::notes::{Mutation, NoteDraft};
use crate::reconcile::{Note, Reconciliation};
use crate::remote::RemoteStore;
use crate::session::Session;
use crate::text_codec::DEFAULT_ENCODING;

// ---- Wire types ----

/// Create/update request as sent by a front end.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRequest {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Inline attachments (`{name, dataBase64}`).
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Local files to attach, read through the attachment source.
    #[serde(default)]
    pub attachment_paths: Vec<PathBuf>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotesPayload {
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedPayload {
    pub kind: FileKind,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response<T: Serialize> {
    Ok {
        success: bool,
        #[serde(flatten)]
        data: T,
    },
    Err {
        success: bool,
        error: String,
    },
}

impl<T: Serialize> Response<T> {
    pub fn ok(data: T) -> Self {
        Response::Ok {
            success: true,
            data,
        }
    }

    pub fn err(error: &SyncError) -> Self {
        Response::Err {
            success: false,
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Response::Ok { data, .. } => Some(data),
            Response::Err { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Response::Ok { .. } => None,
            Response::Err { error, .. } => Some(error),
        }
    }
}

fn respond<T: Serialize>(op: &str, result: SyncResult<T>) -> Response<T> {
    match result {
        Ok(data) => Response::ok(data),
        Err(err) => {
            warn!(op, error = %err, "request failed");
            Response::err(&err)
        }
    }
}

/// Read a local note file. Needs no session or store.
pub async fn open_local(path: &Path) -> Response<LocalNote> {
    respond("open_local", local::open_local(path).await)
}

// ---- Handlers ----

pub struct Commands<S: RemoteStore> {
    engine: NoteEngine<S>,
    session: Arc<dyn Session>,
    attachments: Box<dyn AttachmentSource>,
    default_encoding: String,
}

impl<S: RemoteStore> Commands<S> {
    pub fn new(engine: NoteEngine<S>, session: Arc<dyn Session>) -> Self {
        Self {
            engine,
            session,
            attachments: Box::new(FsAttachmentSource),
            default_encoding: DEFAULT_ENCODING.to_string(),
        }
    }

    pub fn with_attachment_source(mut self, source: Box<dyn AttachmentSource>) -> Self {
        self.attachments = source;
        self
    }

    /// Encoding applied to requests that do not name one.
    pub fn with_default_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.default_encoding = encoding.into();
        self
    }

    pub fn engine(&self) -> &NoteEngine<S> {
        &self.engine
    }

    async fn draft(&self, request: NoteRequest) -> SyncResult<NoteDraft> {
        let mut attachments = request.attachments;
        if !request.attachment_paths.is_empty() {
            attachments.extend(self.attachments.load(&request.attachment_paths).await?);
        }
        let encoding = request
            .encoding
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| self.default_encoding.clone());
        Ok(NoteDraft {
            title: request.title,
            content: request.content,
            attachments,
            encoding: Some(encoding),
            color: request.color,
        })
    }

    pub async fn list_notes(&self) -> Response<NotesPayload> {
        let result = self
            .engine
            .list_notes(self.session.as_ref())
            .await
            .map(|notes| NotesPayload { notes });
        respond("list_notes", result)
    }

    /// Listing with the files that had to be left out.
    pub async fn fetch_all(&self) -> Response<Reconciliation> {
        respond("fetch_all", self.engine.fetch_all(self.session.as_ref()).await)
    }

    pub async fn create_note(&self, request: NoteRequest) -> Response<Mutation> {
        let result = async {
            let draft = self.draft(request).await?;
            self.engine.create_note(self.session.as_ref(), &draft).await
        }
        .await;
        respond("create_note", result)
    }

    pub async fn update_note(&self, request: NoteRequest) -> Response<Mutation> {
        let result = async {
            let file_id = request
                .file_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| SyncError::MissingIdentifier("fileId required".to_string()))?;
            let draft = self.draft(request).await?;
            self.engine
                .update_note(self.session.as_ref(), &file_id, &draft)
                .await
        }
        .await;
        respond("update_note", result)
    }

    pub async fn delete_note(&self, file_id: Option<&str>) -> Response<NotesPayload> {
        let result: SyncResult<NotesPayload> = async {
            let file_id = file_id
                .ok_or_else(|| SyncError::MissingIdentifier("fileId required".to_string()))?;
            let notes = self.engine.delete_note(self.session.as_ref(), file_id).await?;
            Ok(NotesPayload { notes })
        }
        .await;
        respond("delete_note", result)
    }

    pub async fn check(&self) -> Response<AreaInfo> {
        respond("check", self.engine.check(self.session.as_ref()).await)
    }

    pub async fn open_local(&self, path: &Path) -> Response<LocalNote> {
        open_local(path).await
    }

    pub async fn save_local(&self, path: &Path, request: NoteRequest) -> Response<SavedPayload> {
        let result: SyncResult<SavedPayload> = async {
            let draft = self.draft(request).await?;
            let kind = local::save_local(path, &draft).await?;
            Ok(SavedPayload {
                kind,
                path: path.to_string_lossy().into_owned(),
            })
        }
        .await;
        respond("save_local", result)
    }

    /// Upload a local `.txt` / `.knote` file as a new note titled after the file.
    pub async fn import_local(&self, path: &Path) -> Response<Mutation> {
        let result = async {
            let opened = local::open_local(path).await?;
            let mut draft = opened.into_draft();
            draft.encoding = Some(self.default_encoding.clone());
            self.engine.create_note(self.session.as_ref(), &draft).await
        }
        .await;
        respond("import_local", result)
    }

    /// Write a stored note to a local file.
    pub async fn export_note(&self, file_id: &str, path: &Path) -> Response<SavedPayload> {
        let result: SyncResult<SavedPayload> = async {
            let listing = self.engine.fetch_all(self.session.as_ref()).await?;
            let note = listing
                .note(file_id)
                .ok_or_else(|| SyncError::NotFound(format!("note {}", file_id)))?;
            let draft = NoteDraft::new(note.name.clone(), note.content.clone())
                .with_attachments(note.attachments.clone())
                .with_encoding(self.default_encoding.clone());
            let kind = local::save_local(path, &draft).await?;
            Ok(SavedPayload {
                kind,
                path: path.to_string_lossy().into_owned(),
            })
        }
        .await;
        respond("export_note", result)
    }
}
