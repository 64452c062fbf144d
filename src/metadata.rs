use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::remote::{FileQuery, FileUpdate, RemoteStore};
use crate::session::Session;

/// Canonical name of the index document inside the notes area.
pub const INDEX_FILE_NAME: &str = "metadata.json";
pub const INDEX_MIME: &str = "application/json";

// ---- Document types ----

/// One indexed note. `seq` is absent for legacy files that were indexed
/// after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub file_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// The whole index document: `{lastId, items}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataIndex {
    #[serde(rename = "lastId", default)]
    pub last_sequence: u64,
    #[serde(default)]
    pub items: Vec<MetadataEntry>,
}

impl MetadataIndex {
    /// Parse stored bytes. Empty content is an empty index.
    pub fn parse(bytes: &[u8]) -> SyncResult<Self> {
        let content = String::from_utf8_lossy(bytes);
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut index: MetadataIndex = serde_json::from_str(&content)
            .map_err(|e| SyncError::CorruptedIndex(e.to_string()))?;
        index.normalize();
        Ok(index)
    }

    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_string_pretty(self)?.into_bytes())
    }

    /// Keep `last_sequence` at or above every assigned `seq`.
    fn normalize(&mut self) {
        let max_seq = self.items.iter().filter_map(|e| e.seq).max().unwrap_or(0);
        if max_seq > self.last_sequence {
            warn!(
                last_id = self.last_sequence,
                max_seq, "index lastId behind its items, raising it"
            );
            self.last_sequence = max_seq;
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.last_sequence + 1
    }

    pub fn entry(&self, file_id: &str) -> Option<&MetadataEntry> {
        self.items.iter().find(|e| e.file_id == file_id)
    }

    pub fn entry_mut(&mut self, file_id: &str) -> Option<&mut MetadataEntry> {
        self.items.iter_mut().find(|e| e.file_id == file_id)
    }

    /// Append an entry for a new note and advance the sequence.
    pub fn push_sequenced(&mut self, entry: MetadataEntry) {
        if let Some(seq) = entry.seq {
            self.last_sequence = self.last_sequence.max(seq);
        }
        self.items.push(entry);
    }

    /// Remove every entry for `file_id`. Returns how many were removed.
    pub fn remove(&mut self, file_id: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|e| e.file_id != file_id);
        before - self.items.len()
    }
}

// ---- Remote persistence ----

/// How [`save_index`] guards against concurrent writers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteStrategy {
    /// Plain overwrite; a concurrent writer's update may be lost.
    #[default]
    LastWriteWins,
    /// Overwrite only if the index still has the version seen at load.
    Conditional,
}

/// An index read from the store together with where it lives.
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    pub file_id: String,
    pub version: Option<String>,
    pub index: MetadataIndex,
    /// Set when the stored document was unreadable and got reset.
    pub repaired: Option<String>,
    pub created: bool,
}

/// Locate, create or repair the index in `folder_id`.
pub async fn load_index<S: RemoteStore + ?Sized>(
    store: &S,
    session: &dyn Session,
    folder_id: &str,
) -> SyncResult<LoadedIndex> {
    let found = store
        .list_files(session, folder_id, &FileQuery::named(INDEX_FILE_NAME))
        .await?;

    let Some(file) = found.into_iter().next() else {
        let initial = MetadataIndex::default();
        let created = store
            .create_file(session, folder_id, INDEX_FILE_NAME, INDEX_MIME, initial.to_bytes()?)
            .await?;
        info!(file_id = %created.id, "created metadata index");
        return Ok(LoadedIndex {
            file_id: created.id,
            version: created.version,
            index: initial,
            repaired: None,
            created: true,
        });
    };

    let bytes = store.get_file_content(session, &file.id).await?;
    match MetadataIndex::parse(&bytes) {
        Ok(index) => Ok(LoadedIndex {
            file_id: file.id,
            version: file.version,
            index,
            repaired: None,
            created: false,
        }),
        Err(err) => {
            warn!(file_id = %file.id, error = %err, "metadata index unreadable, resetting it");
            let initial = MetadataIndex::default();
            let rewritten = store
                .update_file(
                    session,
                    &file.id,
                    FileUpdate::content(INDEX_MIME, initial.to_bytes()?),
                )
                .await?;
            Ok(LoadedIndex {
                file_id: rewritten.id,
                version: rewritten.version,
                index: initial,
                repaired: Some(err.to_string()),
                created: false,
            })
        }
    }
}

/// Overwrite the whole index document.
pub async fn save_index<S: RemoteStore + ?Sized>(
    store: &S,
    session: &dyn Session,
    loaded: &LoadedIndex,
    strategy: WriteStrategy,
) -> SyncResult<()> {
    let update = FileUpdate::content(INDEX_MIME, loaded.index.to_bytes()?);
    match strategy {
        WriteStrategy::LastWriteWins => {
            store.update_file(session, &loaded.file_id, update).await?;
        }
        WriteStrategy::Conditional => {
            store
                .update_file_if_version(session, &loaded.file_id, loaded.version.as_deref(), update)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use crate::session::StaticSession;
    use serde_json::json;

    fn entry(seq: Option<u64>, file_id: &str) -> MetadataEntry {
        MetadataEntry {
            seq,
            file_id: file_id.to_string(),
            name: format!("{}.txt", file_id),
            color: Some("#fff9a8".to_string()),
            created_at: Some("2024-01-01T00:00:00.000Z".to_string()),
        }
    }

    #[test]
    fn test_document_shape() {
        let mut index = MetadataIndex::default();
        index.push_sequenced(entry(Some(1), "abc"));
        let value = serde_json::to_value(&index).unwrap();
        assert_eq!(
            value,
            json!({
                "lastId": 1,
                "items": [{
                    "seq": 1,
                    "fileId": "abc",
                    "name": "abc.txt",
                    "color": "#fff9a8",
                    "createdAt": "2024-01-01T00:00:00.000Z"
                }]
            })
        );
    }

    #[test]
    fn test_parse_legacy_entry_without_seq() {
        let raw = br##"{"lastId":3,"items":[{"fileId":"x","name":"x.txt","color":"#fff","createdAt":"2024"}]}"##;
        let index = MetadataIndex::parse(raw).unwrap();
        assert_eq!(index.last_sequence, 3);
        assert_eq!(index.entry("x").unwrap().seq, None);
        assert_eq!(index.entry("x").unwrap().color.as_deref(), Some("#fff"));
    }

    #[test]
    fn test_parse_empty_and_partial() {
        assert_eq!(MetadataIndex::parse(b"").unwrap(), MetadataIndex::default());
        assert_eq!(MetadataIndex::parse(b"{}").unwrap(), MetadataIndex::default());
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(matches!(
            MetadataIndex::parse(b"not json").unwrap_err(),
            SyncError::CorruptedIndex(_)
        ));
        assert!(MetadataIndex::parse(b"[1,2,3]").is_err());
        assert!(MetadataIndex::parse(br#"{"lastId":0,"items":"nope"}"#).is_err());
        assert!(MetadataIndex::parse(br#"{"lastId":-4,"items":[]}"#).is_err());
    }

    #[test]
    fn test_parse_raises_lagging_last_id() {
        let raw = br#"{"lastId":1,"items":[{"seq":7,"fileId":"a"}]}"#;
        assert_eq!(MetadataIndex::parse(raw).unwrap().last_sequence, 7);
    }

    #[test]
    fn test_remove_and_sequence() {
        let mut index = MetadataIndex::default();
        index.push_sequenced(entry(Some(1), "a"));
        index.push_sequenced(entry(Some(2), "b"));
        assert_eq!(index.next_sequence(), 3);
        assert_eq!(index.remove("a"), 1);
        assert_eq!(index.remove("a"), 0);
        assert_eq!(index.next_sequence(), 3);
    }

    #[tokio::test]
    async fn test_load_creates_then_reuses() {
        let store = MemoryStore::new();
        let session = StaticSession::new("t");

        let first = load_index(&store, &session, "folder").await.unwrap();
        assert!(first.created);
        assert_eq!(first.index, MetadataIndex::default());

        let second = load_index(&store, &session, "folder").await.unwrap();
        assert!(!second.created);
        assert_eq!(second.file_id, first.file_id);
        assert_eq!(store.file_count(), 1);
    }

    #[tokio::test]
    async fn test_load_repairs_corrupted_index() {
        let store = MemoryStore::new();
        let session = StaticSession::new("t");
        let first = load_index(&store, &session, "folder").await.unwrap();
        store.put_content(&first.file_id, b"{ oops".to_vec());

        let loaded = load_index(&store, &session, "folder").await.unwrap();
        assert!(loaded.repaired.is_some());
        assert_eq!(loaded.file_id, first.file_id);
        assert!(loaded.index.items.is_empty());

        let stored = MetadataIndex::parse(&store.content_of(&first.file_id).unwrap()).unwrap();
        assert_eq!(stored, MetadataIndex::default());
    }

    #[tokio::test]
    async fn test_save_strategies() {
        let store = MemoryStore::new();
        let session = StaticSession::new("t");

        let mut mine = load_index(&store, &session, "folder").await.unwrap();
        let mut theirs = load_index(&store, &session, "folder").await.unwrap();

        theirs.index.push_sequenced(entry(Some(1), "theirs"));
        save_index(&store, &session, &theirs, WriteStrategy::Conditional)
            .await
            .unwrap();

        mine.index.push_sequenced(entry(Some(1), "mine"));
        let err = save_index(&store, &session, &mine, WriteStrategy::Conditional)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::VersionConflict(_)));

        save_index(&store, &session, &mine, WriteStrategy::LastWriteWins)
            .await
            .unwrap();
        let stored = MetadataIndex::parse(&store.content_of(&mine.file_id).unwrap()).unwrap();
        assert!(stored.entry("mine").is_some());
        assert!(stored.entry("theirs").is_none());
    }
}
