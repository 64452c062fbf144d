use serde::Serialize;
use tracing::{info, warn};

use crate::error::SyncResult;
use crate::metadata::{load_index, WriteStrategy};
use crate::remote::{FolderHandle, RemoteStore, APP_DATA_ROOT};
use crate::session::{authorize, Session};

pub const DEFAULT_NOTES_FOLDER: &str = "notes";
pub const DEFAULT_COLOR: &str = "#fff9a8";
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Runtime knobs of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub notes_folder: String,
    pub default_color: String,
    pub fetch_concurrency: usize,
    pub write_strategy: WriteStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            notes_folder: DEFAULT_NOTES_FOLDER.to_string(),
            default_color: DEFAULT_COLOR.to_string(),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            write_strategy: WriteStrategy::default(),
        }
    }
}

/// Ids of the notes area and its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaInfo {
    pub folder_id: String,
    pub metadata_id: String,
}

/// Note synchronization engine over a remote store.
///
/// Holds no cached remote state: the notes area and the index are looked up
/// again on every call.
pub struct NoteEngine<S: RemoteStore> {
    pub(crate) store: S,
    pub(crate) config: EngineConfig,
}

impl<S: RemoteStore> NoteEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Find the notes folder, creating it on first use. A concurrent creator
    /// winning the race counts as success.
    pub async fn notes_area(&self, session: &dyn Session) -> SyncResult<FolderHandle> {
        let name = self.config.notes_folder.as_str();
        if let Some(folder) = self.store.find_folder(session, APP_DATA_ROOT, name).await? {
            return Ok(folder);
        }

        match self.store.create_folder(session, APP_DATA_ROOT, name).await {
            Ok(folder) => {
                info!(folder_id = %folder.id, "created notes folder");
                self.settle_folder(session, folder).await
            }
            Err(err) => {
                if let Some(folder) = self.store.find_folder(session, APP_DATA_ROOT, name).await? {
                    warn!(error = %err, folder_id = %folder.id, "notes folder created concurrently");
                    return Ok(folder);
                }
                Err(err)
            }
        }
    }

    /// Look the folder up again after creating it. Another client may have
    /// created one in the meantime; whichever the lookup returns is kept and
    /// our own duplicate is removed.
    async fn settle_folder(
        &self,
        session: &dyn Session,
        created: FolderHandle,
    ) -> SyncResult<FolderHandle> {
        let name = self.config.notes_folder.as_str();
        let Some(winner) = self.store.find_folder(session, APP_DATA_ROOT, name).await? else {
            return Ok(created);
        };
        if winner.id != created.id {
            warn!(
                kept = %winner.id,
                dropped = %created.id,
                "notes folder created concurrently, dropping duplicate"
            );
            if let Err(err) = self.store.delete_file(session, &created.id).await {
                warn!(
                    error = %err,
                    folder_id = %created.id,
                    "failed to remove duplicate notes folder"
                );
            }
        }
        Ok(winner)
    }

    /// Resolve (and lazily create) the notes area and its index.
    pub async fn check(&self, session: &dyn Session) -> SyncResult<AreaInfo> {
        authorize(session).await?;
        let folder = self.notes_area(session).await?;
        let loaded = load_index(&self.store, session, &folder.id).await?;
        Ok(AreaInfo {
            folder_id: folder.id,
            metadata_id: loaded.file_id,
        })
    }
}
