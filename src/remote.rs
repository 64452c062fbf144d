//! The remote object store the engine writes notes into.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::{SyncError, SyncResult};
use crate::session::Session;

/// Parent handle for top-level folders of the application-private area.
pub const APP_DATA_ROOT: &str = "appDataFolder";

/// File metadata as listed by the store. Content is fetched separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    /// Opaque token that changes on every content or metadata write.
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderHandle {
    pub id: String,
    pub name: String,
}

/// Name filter applied to a folder listing. Trashed files are never listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileQuery {
    pub name: Option<String>,
    pub exclude_name: Option<String>,
}

impl FileQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            exclude_name: None,
        }
    }

    pub fn excluding(name: &str) -> Self {
        Self {
            name: None,
            exclude_name: Some(name.to_string()),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name.as_deref().map_or(true, |n| n == name)
            && self.exclude_name.as_deref().map_or(true, |n| n != name)
    }
}

/// Partial update: every `None` field is left untouched.
#[derive(Debug, Clone, Default)]
pub struct FileUpdate {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub content: Option<Vec<u8>>,
}

impl FileUpdate {
    pub fn content(mime_type: &str, content: Vec<u8>) -> Self {
        Self {
            name: None,
            mime_type: Some(mime_type.to_string()),
            content: Some(content),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn find_folder(
        &self,
        session: &dyn Session,
        parent: &str,
        name: &str,
    ) -> SyncResult<Option<FolderHandle>>;

    async fn create_folder(
        &self,
        session: &dyn Session,
        parent: &str,
        name: &str,
    ) -> SyncResult<FolderHandle>;

    async fn list_files(
        &self,
        session: &dyn Session,
        folder_id: &str,
        query: &FileQuery,
    ) -> SyncResult<Vec<RemoteFile>>;

    async fn get_file(&self, session: &dyn Session, file_id: &str) -> SyncResult<RemoteFile>;

    async fn get_file_content(&self, session: &dyn Session, file_id: &str) -> SyncResult<Vec<u8>>;

    async fn create_file(
        &self,
        session: &dyn Session,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile>;

    async fn update_file(
        &self,
        session: &dyn Session,
        file_id: &str,
        update: FileUpdate,
    ) -> SyncResult<RemoteFile>;

    /// Permanent removal, not a move to trash.
    async fn delete_file(&self, session: &dyn Session, file_id: &str) -> SyncResult<()>;

    /// Update only if the file still carries `expected_version`.
    ///
    /// The default checks then writes, which narrows but does not close the
    /// race window; stores with native preconditions should override it.
    async fn update_file_if_version(
        &self,
        session: &dyn Session,
        file_id: &str,
        expected_version: Option<&str>,
        update: FileUpdate,
    ) -> SyncResult<RemoteFile> {
        let current = self.get_file(session, file_id).await?;
        if current.version.as_deref() != expected_version {
            return Err(SyncError::VersionConflict(format!(
                "file {} changed remotely (expected version {:?}, found {:?})",
                file_id, expected_version, current.version
            )));
        }
        self.update_file(session, file_id, update).await
    }
}

// ---- In-memory store ----

#[derive(Debug, Clone)]
struct StoredFolder {
    id: String,
    parent: String,
    name: String,
}

#[derive(Debug, Clone)]
struct StoredFile {
    folder_id: String,
    name: String,
    mime_type: Option<String>,
    modified_time: String,
    version: u64,
    content: Vec<u8>,
}

impl StoredFile {
    fn describe(&self, id: &str) -> RemoteFile {
        RemoteFile {
            id: id.to_string(),
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            modified_time: Some(self.modified_time.clone()),
            version: Some(self.version.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    folders: Vec<StoredFolder>,
    files: BTreeMap<String, StoredFile>,
    failing_content: HashSet<String>,
    offline: bool,
}

/// A process-local store with the same semantics as the remote one.
/// Clones share state. Supports failure injection for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().expect("memory store mutex")
    }

    /// Make every later call fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make content downloads of `file_id` fail.
    pub fn fail_content_of(&self, file_id: &str) {
        self.state().failing_content.insert(file_id.to_string());
    }

    /// Overwrite stored bytes without touching name or type.
    pub fn put_content(&self, file_id: &str, content: Vec<u8>) -> bool {
        let mut state = self.state();
        match state.files.get_mut(file_id) {
            Some(file) => {
                file.content = content;
                file.version += 1;
                true
            }
            None => false,
        }
    }

    pub fn content_of(&self, file_id: &str) -> Option<Vec<u8>> {
        self.state().files.get(file_id).map(|f| f.content.clone())
    }

    pub fn file(&self, file_id: &str) -> Option<RemoteFile> {
        self.state().files.get(file_id).map(|f| f.describe(file_id))
    }

    pub fn folder_count(&self, name: &str) -> usize {
        self.state().folders.iter().filter(|f| f.name == name).count()
    }

    pub fn file_count(&self) -> usize {
        self.state().files.len()
    }

    fn check(&self, session: &dyn Session) -> SyncResult<()> {
        if self.state().offline {
            return Err(SyncError::TransientNetwork("store unreachable".to_string()));
        }
        if session.access_token().is_none() {
            return Err(SyncError::NotAuthorized("missing access token".to_string()));
        }
        Ok(())
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn apply_update(
    state: &mut MemoryState,
    file_id: &str,
    update: FileUpdate,
) -> SyncResult<RemoteFile> {
    let file = state
        .files
        .get_mut(file_id)
        .ok_or_else(|| SyncError::NotFound(format!("file {}", file_id)))?;
    if let Some(name) = update.name {
        file.name = name;
    }
    if let Some(mime_type) = update.mime_type {
        file.mime_type = Some(mime_type);
    }
    if let Some(content) = update.content {
        file.content = content;
    }
    file.version += 1;
    file.modified_time = now_rfc3339();
    Ok(file.describe(file_id))
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn find_folder(
        &self,
        session: &dyn Session,
        parent: &str,
        name: &str,
    ) -> SyncResult<Option<FolderHandle>> {
        self.check(session)?;
        Ok(self
            .state()
            .folders
            .iter()
            .find(|f| f.parent == parent && f.name == name)
            .map(|f| FolderHandle {
                id: f.id.clone(),
                name: f.name.clone(),
            }))
    }

    async fn create_folder(
        &self,
        session: &dyn Session,
        parent: &str,
        name: &str,
    ) -> SyncResult<FolderHandle> {
        self.check(session)?;
        let folder = StoredFolder {
            id: new_id(),
            parent: parent.to_string(),
            name: name.to_string(),
        };
        let handle = FolderHandle {
            id: folder.id.clone(),
            name: folder.name.clone(),
        };
        self.state().folders.push(folder);
        Ok(handle)
    }

    async fn list_files(
        &self,
        session: &dyn Session,
        folder_id: &str,
        query: &FileQuery,
    ) -> SyncResult<Vec<RemoteFile>> {
        self.check(session)?;
        Ok(self
            .state()
            .files
            .iter()
            .filter(|(_, f)| f.folder_id == folder_id && query.matches(&f.name))
            .map(|(id, f)| f.describe(id))
            .collect())
    }

    async fn get_file(&self, session: &dyn Session, file_id: &str) -> SyncResult<RemoteFile> {
        self.check(session)?;
        self.file(file_id)
            .ok_or_else(|| SyncError::NotFound(format!("file {}", file_id)))
    }

    async fn get_file_content(&self, session: &dyn Session, file_id: &str) -> SyncResult<Vec<u8>> {
        self.check(session)?;
        let state = self.state();
        if state.failing_content.contains(file_id) {
            return Err(SyncError::TransientNetwork(format!(
                "download of {} interrupted",
                file_id
            )));
        }
        state
            .files
            .get(file_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| SyncError::NotFound(format!("file {}", file_id)))
    }

    async fn create_file(
        &self,
        session: &dyn Session,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile> {
        self.check(session)?;
        let id = new_id();
        let file = StoredFile {
            folder_id: folder_id.to_string(),
            name: name.to_string(),
            mime_type: Some(mime_type.to_string()),
            modified_time: now_rfc3339(),
            version: 1,
            content,
        };
        let described = file.describe(&id);
        self.state().files.insert(id, file);
        Ok(described)
    }

    async fn update_file(
        &self,
        session: &dyn Session,
        file_id: &str,
        update: FileUpdate,
    ) -> SyncResult<RemoteFile> {
        self.check(session)?;
        apply_update(&mut self.state(), file_id, update)
    }

    async fn delete_file(&self, session: &dyn Session, file_id: &str) -> SyncResult<()> {
        self.check(session)?;
        let mut state = self.state();
        if state.files.remove(file_id).is_some() {
            return Ok(());
        }
        // Folders are files too on the remote side.
        let before = state.folders.len();
        state.folders.retain(|f| f.id != file_id);
        if state.folders.len() < before {
            Ok(())
        } else {
            Err(SyncError::NotFound(format!("file {}", file_id)))
        }
    }

    async fn update_file_if_version(
        &self,
        session: &dyn Session,
        file_id: &str,
        expected_version: Option<&str>,
        update: FileUpdate,
    ) -> SyncResult<RemoteFile> {
        self.check(session)?;
        let mut state = self.state();
        let current = state.files.get(file_id).map(|f| f.version.to_string());
        if current.as_deref() != expected_version {
            return Err(SyncError::VersionConflict(format!(
                "file {} changed remotely",
                file_id
            )));
        }
        apply_update(&mut state, file_id, update)
    }
}
